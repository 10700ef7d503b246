//! Shared-memory snapshot errors.

use thiserror::Error;

/// Errors opening or validating a snapshot region.
///
/// Seqlock read tears are not errors; they surface as "no data" from the
/// read path after the bounded retry.
#[derive(Error, Debug)]
pub enum SnapshotError {
    /// Creating or opening the backing region failed.
    #[error("cannot open snapshot region {path}: {source}")]
    Open {
        /// Region path.
        path: String,
        /// OS error.
        #[source]
        source: std::io::Error,
    },

    /// Mapping the region failed.
    #[error("cannot map snapshot region {path}: {source}")]
    Map {
        /// Region path.
        path: String,
        /// OS error.
        #[source]
        source: std::io::Error,
    },

    /// The region exists but does not carry the snapshot magic.
    ///
    /// Readers fail fast on this; the writer re-initialises the region.
    #[error("snapshot region {path} has wrong magic {found:#018x}")]
    BadMagic {
        /// Region path.
        path: String,
        /// Magic value found.
        found: u64,
    },

    /// The region is smaller than the snapshot layout.
    #[error("snapshot region {path} is truncated ({len} bytes, need {need})")]
    Truncated {
        /// Region path.
        path: String,
        /// Actual byte length.
        len: u64,
        /// Required byte length.
        need: u64,
    },
}
