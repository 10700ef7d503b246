//! Sirocco market-data recorder binary.
//!
//! Runs the plugin host with the recorder module guaranteed on: whatever
//! feed modules the config enables publish ticks, and the recorder's
//! persistence thread drains them into the per-trading-day mmap log.
//!
//! ```bash
//! sirocco-recorder conf/recorder.yaml
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use sirocco_core::config::{self, EngineConfig, PluginConfig};
use sirocco_engine::{Engine, ModuleRegistry};

/// Sirocco market-data recorder.
#[derive(Parser, Debug)]
#[command(name = "sirocco-recorder")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the recorder configuration file.
    config: PathBuf,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();

    let mut engine_config: EngineConfig = match config::load_file(&args.config) {
        Ok(engine_config) => engine_config,
        Err(e) => {
            error!(config = %args.config.display(), error = %e, "cannot load recorder config");
            std::process::exit(1);
        }
    };

    // The recorder role always records, even when the config forgot to
    // list the module.
    let has_recorder = engine_config
        .plugins
        .iter()
        .any(|plugin| plugin.name == "recorder" && plugin.enabled);
    if !has_recorder {
        info!("recorder module not configured; adding it with defaults");
        engine_config.plugins.push(PluginConfig {
            name: "recorder".to_string(),
            enabled: true,
            ..PluginConfig::default()
        });
    }

    let registry = ModuleRegistry::with_builtins();
    let mut engine = match Engine::new(engine_config, &registry) {
        Ok(engine) => engine,
        Err(e) => {
            error!(error = %e, "recorder boot failed");
            std::process::exit(1);
        }
    };

    if let Err(e) = engine.run() {
        error!(error = %e, "recorder run failed");
        std::process::exit(1);
    }
}
