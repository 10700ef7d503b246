//! Sirocco log dump tool: sequentially prints a recorded tick or candle
//! log.
//!
//! ```bash
//! sirocco-logdump conf/logdump.yaml
//! ```
//!
//! The config names the log base path and the record kind:
//!
//! ```yaml
//! base: ./data/market_data_20260115
//! record: tick        # or: candle
//! limit: 100          # optional; 0 = all
//! ```

use std::path::PathBuf;

use clap::Parser;
use serde::Deserialize;
use tracing::error;
use tracing_subscriber::EnvFilter;

use sirocco_core::config;
use sirocco_core::data::{CandleRecord, TickRecord};
use sirocco_ipc::log::LogReader;

/// Sirocco log dump tool.
#[derive(Parser, Debug)]
#[command(name = "sirocco-logdump")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the dump configuration file.
    config: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
enum RecordKind {
    #[default]
    Tick,
    Candle,
}

#[derive(Debug, Deserialize)]
struct DumpConfig {
    /// Log base path (without the .dat/.meta suffix).
    base: PathBuf,
    #[serde(default)]
    record: RecordKind,
    /// Maximum records to print; 0 prints everything.
    #[serde(default)]
    limit: u64,
}

fn dump_ticks(config: &DumpConfig) -> Result<u64, sirocco_core::SiroccoError> {
    let mut reader = LogReader::<TickRecord>::open(&config.base)?;
    println!(
        "# {} ticks in {}",
        reader.total_count(),
        config.base.display()
    );

    let mut printed = 0u64;
    while let Some(tick) = reader.read_ptr() {
        println!(
            "{:>8} {:>9} {:<12} last={:<10} vol={:<8} oi={:<10} b1={}x{} a1={}x{}",
            tick.trading_day,
            tick.update_time,
            tick.ticker_str(),
            tick.last_price,
            tick.volume,
            tick.open_interest,
            tick.bid_price[0],
            tick.bid_volume[0],
            tick.ask_price[0],
            tick.ask_volume[0],
        );
        printed += 1;
        if config.limit > 0 && printed >= config.limit {
            break;
        }
    }
    Ok(printed)
}

fn dump_candles(config: &DumpConfig) -> Result<u64, sirocco_core::SiroccoError> {
    let mut reader = LogReader::<CandleRecord>::open(&config.base)?;
    println!(
        "# {} candles in {}",
        reader.total_count(),
        config.base.display()
    );

    let mut printed = 0u64;
    while let Some(candle) = reader.read_ptr() {
        let interval = candle.interval().map_or("?", |i| i.as_str());
        println!(
            "{:>8} {:>9} {:<12} {:<3} o={:<10} h={:<10} l={:<10} c={:<10} v={:<8} oi={}",
            candle.trading_day,
            candle.start_time,
            candle.ticker_str(),
            interval,
            candle.open,
            candle.high,
            candle.low,
            candle.close,
            candle.volume,
            candle.open_interest,
        );
        printed += 1;
        if config.limit > 0 && printed >= config.limit {
            break;
        }
    }
    Ok(printed)
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let args = Args::parse();
    let dump_config: DumpConfig = match config::load_file(&args.config) {
        Ok(dump_config) => dump_config,
        Err(e) => {
            error!(config = %args.config.display(), error = %e, "cannot load dump config");
            std::process::exit(1);
        }
    };

    let result = match dump_config.record {
        RecordKind::Tick => dump_ticks(&dump_config),
        RecordKind::Candle => dump_candles(&dump_config),
    };

    match result {
        Ok(printed) => println!("# printed {printed} records"),
        Err(e) => {
            error!(base = %dump_config.base.display(), error = %e, "dump failed");
            std::process::exit(1);
        }
    }
}
