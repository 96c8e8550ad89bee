//! Shared types: reference tiers, handle identifiers, descriptors and configuration.

use std::fmt;
use std::time::Duration;

/// Unique identifier assigned to every handle at creation.
pub type HandleId = u64;

/// Reclamation tier of a tracked reference.
///
/// The tier decides when the memory manager may reclaim a value and whether
/// the value can be observed through its handle.
///
/// # Examples
///
/// ```
/// use finref::Tier;
///
/// assert!(Tier::Weak.exposes_value());
/// assert!(Tier::Soft.exposes_value());
/// assert!(!Tier::Phantom.exposes_value());
/// assert_eq!(Tier::Soft.to_string(), "Soft");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    /// Reclaimed as soon as no strong holder remains
    Weak,
    /// Reclaimed only under memory pressure
    Soft,
    /// Reclaimed like weak, but the value is never observable through the handle
    Phantom,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Weak, Tier::Soft, Tier::Phantom];

    pub fn name(&self) -> &'static str {
        match self {
            Tier::Weak => "Weak",
            Tier::Soft => "Soft",
            Tier::Phantom => "Phantom",
        }
    }

    /// Whether a handle of this tier can yield its value before reclamation.
    pub fn exposes_value(&self) -> bool {
        !matches!(self, Tier::Phantom)
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Tier and value type captured from the first handle a registry creates.
///
/// Only used for diagnostic rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeDescriptor {
    pub tier: Tier,
    pub type_name: &'static str,
}

impl TypeDescriptor {
    pub fn of<T: ?Sized>(tier: Tier) -> Self {
        Self {
            tier,
            type_name: std::any::type_name::<T>(),
        }
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}<{}>", self.tier, self.type_name)
    }
}

/// Configuration for [`ManagedHeap`](crate::ManagedHeap).
///
/// # Examples
///
/// ```
/// use finref::HeapConfig;
/// use std::time::Duration;
///
/// let default_config = HeapConfig::default();
/// assert_eq!(default_config.capacity_bytes, 64 * 1024 * 1024);
/// assert!(default_config.collect_interval.is_none());
///
/// let custom = HeapConfig {
///     capacity_bytes: 1024,
///     collect_interval: Some(Duration::from_millis(10)),
/// };
/// assert_eq!(custom.capacity_bytes, 1024);
/// ```
#[derive(Debug, Clone)]
pub struct HeapConfig {
    /// Bytes available to [`ManagedHeap::allocate`](crate::ManagedHeap::allocate)
    pub capacity_bytes: usize,
    /// Period of the background collector, if one is started
    pub collect_interval: Option<Duration>,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            capacity_bytes: 64 * 1024 * 1024, // 64MB
            collect_interval: None,
        }
    }
}

/// Per-registry configuration.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Thread name given to the reclamation worker
    pub worker_name: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            worker_name: "finref-reclaimer".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_renders_tier_and_type() {
        let descriptor = TypeDescriptor::of::<String>(Tier::Weak);
        assert_eq!(descriptor.to_string(), "Weak<alloc::string::String>");

        let descriptor = TypeDescriptor::of::<u32>(Tier::Phantom);
        assert_eq!(descriptor.to_string(), "Phantom<u32>");
    }

    #[test]
    fn only_phantom_hides_values() {
        let hidden: Vec<_> = Tier::ALL
            .iter()
            .filter(|tier| !tier.exposes_value())
            .collect();
        assert_eq!(hidden, vec![&Tier::Phantom]);
    }

    #[test]
    fn registry_config_default_names_worker() {
        assert_eq!(RegistryConfig::default().worker_name, "finref-reclaimer");
    }
}
