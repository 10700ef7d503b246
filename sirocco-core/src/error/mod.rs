//! Error types and handling.
//!
//! Errors are split by domain:
//! - [`ConfigError`] — configuration loading and validation (fatal at boot)
//! - [`StorageError`] — mmap log creation and mapping
//! - [`SnapshotError`] — shared-memory snapshot regions
//! - [`EngineError`] — plugin host and module lifecycle
//!
//! Boot-time errors propagate to the binaries, which exit non-zero naming
//! the failing field or path. Steady-state errors are logged and never
//! unwind through the event bus.

use thiserror::Error;

mod config;
mod engine;
mod snapshot;
mod storage;

pub use config::ConfigError;
pub use engine::EngineError;
pub use snapshot::SnapshotError;
pub use storage::StorageError;

/// Top-level error type for the Sirocco engine.
#[derive(Error, Debug)]
pub enum SiroccoError {
    /// Configuration error.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// Mmap log storage error.
    #[error("{0}")]
    Storage(#[from] StorageError),

    /// Snapshot region error.
    #[error("{0}")]
    Snapshot(#[from] SnapshotError),

    /// Plugin host error.
    #[error("{0}")]
    Engine(#[from] EngineError),
}

impl SiroccoError {
    /// Returns the error category as a static string.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Storage(_) => "storage",
            Self::Snapshot(_) => "snapshot",
            Self::Engine(_) => "engine",
        }
    }
}

/// A specialized `Result` type for Sirocco operations.
pub type Result<T> = std::result::Result<T, SiroccoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category() {
        let err = SiroccoError::from(ConfigError::MissingField {
            field: "plugins".to_string(),
        });
        assert_eq!(err.category(), "config");

        let err = SiroccoError::from(EngineError::UnknownModule {
            name: "nope".to_string(),
        });
        assert_eq!(err.category(), "engine");
    }

    #[test]
    fn test_display_names_field() {
        let err = SiroccoError::from(ConfigError::MissingField {
            field: "snapshot.path".to_string(),
        });
        assert!(err.to_string().contains("snapshot.path"));
    }
}
