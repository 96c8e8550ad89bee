//! Error types for the finalizable reference registries.

use thiserror::Error;

/// Errors reported by handles, registries and the managed heap.
///
/// # Examples
///
/// ```
/// use finref::error::{RegistryError, RegistryResult};
///
/// let exhausted = RegistryError::ResourceExhausted {
///     requested: 4096,
///     available: 1024,
/// };
/// assert_eq!(
///     exhausted.to_string(),
///     "Resource exhausted: requested 4096 bytes, 1024 available"
/// );
///
/// let failure: RegistryResult<()> = Err(RegistryError::IllegalIteratorState);
/// assert!(failure.is_err());
/// ```
#[derive(Error, Debug)]
pub enum RegistryError {
    /// A handle was requested for an absent value
    #[error("Cannot track an absent value")]
    InvalidValue,
    /// Indexed access out of range, or a cursor advanced past its end
    #[error("No such element: {0}")]
    NoSuchElement(String),
    /// Cursor `remove` without a preceding `next`
    #[error("Illegal iterator state: remove requires a preceding next")]
    IllegalIteratorState,
    /// The heap could not satisfy a reservation even after clearing soft references
    #[error("Resource exhausted: requested {requested} bytes, {available} available")]
    ResourceExhausted { requested: usize, available: usize },
    /// The OS refused to spawn a background thread
    #[error("Failed to spawn background thread: {0}")]
    WorkerSpawn(#[from] std::io::Error),
}

impl RegistryError {
    pub(crate) fn index_out_of_range(index: usize, len: usize) -> Self {
        RegistryError::NoSuchElement(format!("index {index} out of range for length {len}"))
    }

    pub(crate) fn exhausted() -> Self {
        RegistryError::NoSuchElement("cursor is exhausted".to_string())
    }
}

/// Result type for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;
