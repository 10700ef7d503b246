//! Sirocco engine binary: the plugin host for a trading deployment.
//!
//! ```bash
//! sirocco conf/engine.yaml
//! ```
//!
//! Exits 0 on clean shutdown (signal or end-of-day cutoff), 1 on any
//! configuration or boot failure.

use std::path::PathBuf;

use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use sirocco_engine::{Engine, ModuleRegistry};

/// Sirocco trading engine.
#[derive(Parser, Debug)]
#[command(name = "sirocco")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the engine configuration file.
    config: PathBuf,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let registry = ModuleRegistry::with_builtins();

    let mut engine = match Engine::from_config_file(&args.config, &registry) {
        Ok(engine) => engine,
        Err(e) => {
            error!(config = %args.config.display(), error = %e, "engine boot failed");
            std::process::exit(1);
        }
    };

    if let Err(e) = engine.run() {
        error!(error = %e, "engine run failed");
        std::process::exit(1);
    }
}
