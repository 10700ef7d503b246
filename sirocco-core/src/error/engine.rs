//! Plugin host and module lifecycle errors.

use thiserror::Error;

/// Errors raised by the plugin host and modules.
#[derive(Error, Debug)]
pub enum EngineError {
    /// No factory is registered under the requested module name.
    #[error("unknown module: {name}")]
    UnknownModule {
        /// Module name from the config.
        name: String,
    },

    /// A module failed to initialise.
    #[error("module {name} failed to init: {reason}")]
    ModuleInit {
        /// Module name.
        name: String,
        /// Failure detail.
        reason: String,
    },

    /// A module is missing a mandatory parameter.
    #[error("module {module} missing parameter: {param}")]
    MissingParam {
        /// Module name.
        module: String,
        /// Parameter key.
        param: String,
    },

    /// Installing the signal handlers failed.
    #[error("cannot install signal handler: {0}")]
    Signal(#[from] std::io::Error),
}
