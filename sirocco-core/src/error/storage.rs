//! Mmap log storage errors.

use thiserror::Error;

/// Errors creating, mapping, or validating a mmap log.
///
/// Capacity exhaustion at write time is deliberately not an error: the
/// writer drops the record and counts it, per the provisioning contract.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Opening or growing a backing file failed.
    #[error("cannot open log file {path}: {source}")]
    Open {
        /// File path.
        path: String,
        /// OS error.
        #[source]
        source: std::io::Error,
    },

    /// Mapping a file into memory failed.
    #[error("cannot map log file {path}: {source}")]
    Map {
        /// File path.
        path: String,
        /// OS error.
        #[source]
        source: std::io::Error,
    },

    /// The meta header is malformed.
    #[error("bad meta header in {path}: {reason}")]
    BadMeta {
        /// Meta file path.
        path: String,
        /// What was wrong.
        reason: String,
    },
}
