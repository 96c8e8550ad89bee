// Test utilities shared by the unit tests of every module.

use std::thread;
use std::time::{Duration, Instant};

/// How long background work is given to settle before a test gives up
pub const SETTLE_TIMEOUT: Duration = Duration::from_secs(3);

/// Poll `condition` until it holds or [`SETTLE_TIMEOUT`] elapses.
pub fn wait_for(condition: impl Fn() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < SETTLE_TIMEOUT {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    condition()
}
