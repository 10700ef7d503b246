//! Configuration errors.

use thiserror::Error;

/// Configuration loading and validation errors. Fatal at boot.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("cannot read config file {path}: {reason}")]
    FileRead {
        /// File path.
        path: String,
        /// Underlying reason.
        reason: String,
    },

    /// The configuration file could not be parsed.
    #[error("cannot parse config file {path}: {reason}")]
    Parse {
        /// File path.
        path: String,
        /// Parse failure detail.
        reason: String,
    },

    /// The file extension is not a recognized configuration format.
    #[error("unrecognized config format for {path} (expected .yaml, .yml or .json)")]
    UnknownFormat {
        /// File path.
        path: String,
    },

    /// A mandatory field is missing.
    #[error("missing mandatory config field: {field}")]
    MissingField {
        /// Dotted field path.
        field: String,
    },

    /// A field value is invalid.
    #[error("invalid value for config field {field}: {reason}")]
    InvalidValue {
        /// Dotted field path.
        field: String,
        /// Why the value was rejected.
        reason: String,
    },
}
