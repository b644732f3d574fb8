//! # Lilium Core
//!
//! Basic utilities shared by the Lilium render device crates:
//!
//! - [`handle`] - generational handles and the arena that hands them out
//! - [`profiling`] - Tracy instrumentation macros (no-ops unless the
//!   `profiling` feature is enabled)

pub mod handle;
pub mod profiling;

pub use handle::{HandleArena, RawHandle};

/// Core library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
