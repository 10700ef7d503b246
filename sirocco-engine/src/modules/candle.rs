//! Candle builder.
//!
//! Builds one-minute bars from the tick stream, differencing the
//! cumulative session volume and turnover so each bar carries interval
//! deltas, and cascades closed one-minute bars into one-hour and daily
//! bars. A bar closes on the first tick belonging to the next interval
//! (or a new trading day). Every closed bar is republished on the candle
//! topic and persisted to a per-trading-day mmap log.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info};

use sirocco_core::bus::{Event, EventBus, Topic};
use sirocco_core::data::{CandleInterval, CandleRecord, TickRecord};
use sirocco_core::error::EngineError;
use sirocco_ipc::log::LogWriter;

use crate::module::{Module, ModuleContext};

const WRITER_CAPACITY_1M: u64 = 2_000_000;
const WRITER_CAPACITY_1H: u64 = 100_000;
const WRITER_CAPACITY_1D: u64 = 10_000;

/// Aligns `HHMMSSmmm` down to the start of its minute.
fn align_to_minute(update_time: u64) -> u64 {
    update_time / 1000 / 100 * 100 * 1000
}

/// Aligns `HHMMSSmmm` down to the start of its hour.
fn align_to_hour(start_time: u64) -> u64 {
    start_time / 10_000_000 * 10_000_000
}

#[derive(Default)]
struct SymbolState {
    current_1m: Option<CandleRecord>,
    /// Cumulative volume/turnover at the open of the current 1m bar.
    bar_base_volume: i32,
    bar_base_turnover: f64,
    current_1h: Option<CandleRecord>,
    current_1d: Option<CandleRecord>,
}

struct Writers {
    trading_day: u32,
    min1: Option<LogWriter<CandleRecord>>,
    hour1: Option<LogWriter<CandleRecord>>,
    day1: Option<LogWriter<CandleRecord>>,
}

struct CandleState {
    contexts: Mutex<HashMap<String, SymbolState>>,
    writers: Mutex<Option<Writers>>,
    output_path: PathBuf,
    persist_enabled: bool,
}

impl CandleState {
    fn new_bar(tick: &TickRecord, start_time: u64) -> CandleRecord {
        let mut bar = CandleRecord {
            instrument_id: tick.instrument_id,
            trading_day: tick.trading_day,
            start_time,
            open: tick.last_price,
            high: tick.last_price,
            low: tick.last_price,
            close: tick.last_price,
            open_interest: tick.open_interest,
            ..CandleRecord::default()
        };
        bar.ticker = tick.ticker;
        bar.set_interval(CandleInterval::Min1);
        bar
    }

    /// Folds a tick into the symbol's 1m bar; returns the closed bar when
    /// the tick opens a new interval.
    fn on_tick(&self, tick: &TickRecord) -> Option<CandleRecord> {
        let mut contexts = self.contexts.lock();
        let state = contexts.entry(tick.ticker_str().to_string()).or_default();
        let aligned = align_to_minute(tick.update_time);

        let mut closed = None;
        match &mut state.current_1m {
            None => {
                // First tick of the session seeds the bar; its cumulative
                // totals are the delta base, so the bar starts at zero.
                state.current_1m = Some(Self::new_bar(tick, aligned));
                state.bar_base_volume = tick.volume;
                state.bar_base_turnover = tick.turnover;
                return None;
            }
            Some(bar) => {
                if aligned > bar.start_time || tick.trading_day > bar.trading_day {
                    closed = Some(*bar);
                    if tick.trading_day > bar.trading_day {
                        // Cumulative counters reset with the session.
                        state.bar_base_volume = tick.volume;
                        state.bar_base_turnover = tick.turnover;
                    } else {
                        // Deltas for the new bar start from the cumulative
                        // totals seen so far.
                        state.bar_base_volume += bar.volume;
                        state.bar_base_turnover += bar.turnover;
                    }
                    *bar = Self::new_bar(tick, aligned);
                }

                bar.high = bar.high.max(tick.last_price);
                bar.low = bar.low.min(tick.last_price);
                bar.close = tick.last_price;
                bar.open_interest = tick.open_interest;
                bar.volume = tick.volume - state.bar_base_volume;
                bar.turnover = tick.turnover - state.bar_base_turnover;
            }
        }
        closed
    }

    /// Folds a closed bar into the next-coarser interval; returns the
    /// closed coarse bar when the input crosses its boundary.
    fn cascade(&self, input: &CandleRecord, target: CandleInterval) -> Option<CandleRecord> {
        let mut contexts = self.contexts.lock();
        let state = contexts.entry(input.ticker_str().to_string()).or_default();

        let (slot, aligned_start) = match target {
            CandleInterval::Hour1 => (&mut state.current_1h, align_to_hour(input.start_time)),
            CandleInterval::Day1 => (&mut state.current_1d, 0),
            _ => return None,
        };

        let seed = |input: &CandleRecord| {
            let mut bar = *input;
            bar.set_interval(target);
            bar.start_time = aligned_start;
            bar
        };

        match slot {
            None => {
                *slot = Some(seed(input));
                None
            }
            Some(bar) => {
                let crossed = match target {
                    CandleInterval::Hour1 => aligned_start > bar.start_time,
                    _ => input.trading_day > bar.trading_day,
                };
                if crossed {
                    let closed = *bar;
                    *bar = seed(input);
                    Some(closed)
                } else {
                    bar.high = bar.high.max(input.high);
                    bar.low = bar.low.min(input.low);
                    bar.close = input.close;
                    bar.open_interest = input.open_interest;
                    bar.volume += input.volume;
                    bar.turnover += input.turnover;
                    None
                }
            }
        }
    }

    fn persist(&self, bar: &CandleRecord) {
        if !self.persist_enabled {
            return;
        }
        let mut writers = self.writers.lock();
        let rotate = writers
            .as_ref()
            .map_or(true, |w| w.trading_day != bar.trading_day);
        if rotate {
            *writers = Some(self.open_writers(bar.trading_day));
        }

        let Some(writers) = writers.as_mut() else {
            return;
        };
        let writer = match bar.interval() {
            Some(CandleInterval::Min1) => writers.min1.as_mut(),
            Some(CandleInterval::Hour1) => writers.hour1.as_mut(),
            Some(CandleInterval::Day1) => writers.day1.as_mut(),
            _ => None,
        };
        if let Some(writer) = writer {
            writer.append(bar);
        }
    }

    fn open_writers(&self, trading_day: u32) -> Writers {
        let open = |suffix: &str, capacity: u64| {
            let base = self
                .output_path
                .join(format!("candle_{suffix}_{trading_day}"));
            match LogWriter::create(&base, capacity) {
                Ok(writer) => Some(writer),
                Err(e) => {
                    error!(base = %base.display(), error = %e, "candle log writer failed");
                    None
                }
            }
        };
        info!(trading_day, "candle log writers rotated");
        Writers {
            trading_day,
            min1: open("1m", WRITER_CAPACITY_1M),
            hour1: open("1h", WRITER_CAPACITY_1H),
            day1: open("1d", WRITER_CAPACITY_1D),
        }
    }

    fn publish(&self, bus: &EventBus, bar: CandleRecord) {
        debug!(
            ticker = bar.ticker_str(),
            start = bar.start_time,
            interval = ?bar.interval(),
            close = bar.close,
            volume = bar.volume,
            "candle closed"
        );
        self.persist(&bar);
        bus.publish(&mut Event::Candle(bar));
    }
}

/// The candle builder module.
pub struct CandleModule {
    state: Option<Arc<CandleState>>,
}

impl Default for CandleModule {
    fn default() -> Self {
        Self::new()
    }
}

impl CandleModule {
    /// Creates an unwired candle builder.
    #[must_use]
    pub fn new() -> Self {
        Self { state: None }
    }
}

impl Module for CandleModule {
    fn name(&self) -> &'static str {
        "candle"
    }

    fn init(&mut self, ctx: &ModuleContext) -> Result<(), EngineError> {
        let output_path = PathBuf::from(ctx.param_or("output_path", "./data"));
        let persist_enabled = !matches!(ctx.param("persist"), Some("false" | "0"));
        let state = Arc::new(CandleState {
            contexts: Mutex::new(HashMap::new()),
            writers: Mutex::new(None),
            output_path: output_path.clone(),
            persist_enabled,
        });
        self.state = Some(Arc::clone(&state));
        info!(output = %output_path.display(), persist_enabled, "candle builder initialised");

        let (candles, bus) = (Arc::clone(&state), Arc::clone(&ctx.bus));
        ctx.bus.subscribe(Topic::MarketData, move |event| {
            if let Event::MarketData(tick) = event {
                if let Some(closed) = candles.on_tick(tick) {
                    candles.publish(&bus, closed);
                }
            }
        });

        // Cascade closed 1m bars into 1h, and closed 1h bars into 1d.
        let (candles, bus) = (state, Arc::clone(&ctx.bus));
        ctx.bus.subscribe(Topic::Candle, move |event| {
            if let Event::Candle(bar) = event {
                let next = match bar.interval() {
                    Some(CandleInterval::Min1) => Some(CandleInterval::Hour1),
                    Some(CandleInterval::Hour1) => Some(CandleInterval::Day1),
                    _ => None,
                };
                if let Some(target) = next {
                    let bar = *bar;
                    if let Some(closed) = candles.cascade(&bar, target) {
                        candles.publish(&bus, closed);
                    }
                }
            }
        });

        Ok(())
    }
}
