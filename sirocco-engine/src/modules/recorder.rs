//! Tick recorder.
//!
//! Subscribes to the market-data topic, pushes each tick into an SPSC
//! ring on the publishing (feed) thread, and drains the ring on a
//! dedicated persistence thread into a per-trading-day mmap log. The
//! persistence thread sleeps one millisecond when the ring is empty and
//! drains whatever is left when the engine stops; a full ring drops the
//! tick and counts it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{error, info, warn};

use sirocco_core::bus::{Event, Topic};
use sirocco_core::data::TickRecord;
use sirocco_core::error::EngineError;
use sirocco_ipc::log::LogWriter;
use sirocco_ipc::spsc::{Consumer, Producer, SpscRing};

use crate::module::{Module, ModuleContext};

const DEFAULT_RING_SIZE: u64 = 65536;
const DEFAULT_LOG_CAPACITY: u64 = 5_000_000;
const EMPTY_SLEEP: Duration = Duration::from_millis(1);

struct WriterState {
    output_path: String,
    capacity: u64,
    trading_day: u32,
    writer: Option<LogWriter<TickRecord>>,
}

impl WriterState {
    fn save(&mut self, tick: &TickRecord) {
        if self.writer.is_none() || self.trading_day != tick.trading_day {
            self.trading_day = tick.trading_day;
            let base = format!("{}/market_data_{}", self.output_path, tick.trading_day);
            info!(base = %base, "switching tick log");
            match LogWriter::create(&base, self.capacity) {
                Ok(writer) => self.writer = Some(writer),
                Err(e) => {
                    error!(base = %base, error = %e, "cannot open tick log");
                    self.writer = None;
                }
            }
        }
        if let Some(writer) = &mut self.writer {
            writer.append(tick);
        }
    }
}

/// The tick recorder module.
pub struct RecorderModule {
    output_path: String,
    log_capacity: u64,
    producer: Option<Arc<Mutex<Producer<TickRecord>>>>,
    consumer: Option<Consumer<TickRecord>>,
    dropped: Arc<AtomicU64>,
    running: Option<Arc<AtomicBool>>,
    thread: Option<JoinHandle<()>>,
}

impl Default for RecorderModule {
    fn default() -> Self {
        Self::new()
    }
}

impl RecorderModule {
    /// Creates an unwired recorder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            output_path: String::new(),
            log_capacity: DEFAULT_LOG_CAPACITY,
            producer: None,
            consumer: None,
            dropped: Arc::new(AtomicU64::new(0)),
            running: None,
            thread: None,
        }
    }

    /// Ticks dropped because the ring was full.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Module for RecorderModule {
    fn name(&self) -> &'static str {
        "recorder"
    }

    fn init(&mut self, ctx: &ModuleContext) -> Result<(), EngineError> {
        self.output_path = ctx.param_or("output_path", "./data");
        self.log_capacity = ctx.param_u64("log_capacity", DEFAULT_LOG_CAPACITY);
        let ring_size = ctx.param_u64("ring_size", DEFAULT_RING_SIZE) as usize;
        self.running = Some(Arc::clone(&ctx.running));

        let (producer, consumer) = SpscRing::with_capacity::<TickRecord>(ring_size);
        let producer = Arc::new(Mutex::new(producer));
        self.producer = Some(Arc::clone(&producer));
        self.consumer = Some(consumer);

        let dropped = Arc::clone(&self.dropped);
        ctx.bus.subscribe(Topic::MarketData, move |event| {
            if let Event::MarketData(tick) = event {
                if !producer.lock().push(*tick) {
                    let seen = dropped.fetch_add(1, Ordering::Relaxed);
                    if seen == 0 {
                        warn!("recorder ring full; dropping ticks");
                    }
                }
            }
        });

        info!(output = %self.output_path, ring = ring_size, "recorder initialised");
        Ok(())
    }

    fn start(&mut self) -> Result<(), EngineError> {
        let (Some(mut consumer), Some(running)) = (self.consumer.take(), self.running.clone())
        else {
            return Ok(());
        };

        let mut writer = WriterState {
            output_path: self.output_path.clone(),
            capacity: self.log_capacity,
            trading_day: 0,
            writer: None,
        };

        self.thread = Some(std::thread::spawn(move || {
            loop {
                match consumer.pop() {
                    Some(tick) => writer.save(&tick),
                    None => {
                        if !running.load(Ordering::Acquire) {
                            break;
                        }
                        std::thread::sleep(EMPTY_SLEEP);
                    }
                }
            }
            // Drain whatever arrived between the flag and the last pop.
            while let Some(tick) = consumer.pop() {
                writer.save(&tick);
            }
            // Dropping the writer truncates the log to the written prefix.
        }));
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("recorder thread panicked");
            }
        }
        let dropped = self.dropped();
        if dropped > 0 {
            warn!(dropped, "recorder dropped ticks this session");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sirocco_core::bus::EventBus;
    use sirocco_ipc::log::LogReader;
    use std::collections::BTreeMap;

    use crate::timer::TimerService;

    fn tick(day: u32, price: f64) -> TickRecord {
        let mut tick = TickRecord {
            instrument_id: 7,
            trading_day: day,
            last_price: price,
            ..TickRecord::default()
        };
        tick.set_ticker("rb2501");
        tick
    }

    #[test]
    fn test_records_ticks_to_per_day_log() {
        let output = std::env::temp_dir().join(format!("sirocco_rec_{}", std::process::id()));
        std::fs::create_dir_all(&output).unwrap();

        let bus = Arc::new(EventBus::new());
        let running = Arc::new(AtomicBool::new(true));
        let ctx = ModuleContext {
            bus: Arc::clone(&bus),
            timer: TimerService::new(),
            running: Arc::clone(&running),
            params: BTreeMap::from([
                ("output_path".to_string(), output.display().to_string()),
                ("log_capacity".to_string(), "1024".to_string()),
                ("ring_size".to_string(), "256".to_string()),
            ]),
            raw_config: None,
        };

        let mut module = RecorderModule::new();
        module.init(&ctx).unwrap();
        module.start().unwrap();

        for i in 0..50 {
            bus.publish(&mut Event::MarketData(tick(20260115, f64::from(i))));
        }

        running.store(false, Ordering::Release);
        module.stop();
        assert_eq!(module.dropped(), 0);

        let base = output.join("market_data_20260115");
        let mut reader = LogReader::<TickRecord>::open(&base).unwrap();
        assert_eq!(reader.total_count(), 50);
        let mut count = 0;
        while let Some(record) = reader.read() {
            assert_eq!(record.last_price, f64::from(count));
            assert_eq!(record.ticker_str(), "rb2501");
            count += 1;
        }
        assert_eq!(count, 50);

        std::fs::remove_dir_all(&output).ok();
    }

    #[test]
    fn test_day_rollover_switches_files() {
        let output = std::env::temp_dir().join(format!("sirocco_rec_roll_{}", std::process::id()));
        std::fs::create_dir_all(&output).unwrap();

        let bus = Arc::new(EventBus::new());
        let running = Arc::new(AtomicBool::new(true));
        let ctx = ModuleContext {
            bus: Arc::clone(&bus),
            timer: TimerService::new(),
            running: Arc::clone(&running),
            params: BTreeMap::from([
                ("output_path".to_string(), output.display().to_string()),
                ("log_capacity".to_string(), "64".to_string()),
            ]),
            raw_config: None,
        };

        let mut module = RecorderModule::new();
        module.init(&ctx).unwrap();
        module.start().unwrap();

        bus.publish(&mut Event::MarketData(tick(20260115, 1.0)));
        bus.publish(&mut Event::MarketData(tick(20260116, 2.0)));

        running.store(false, Ordering::Release);
        module.stop();

        for day in [20260115u32, 20260116] {
            let base = output.join(format!("market_data_{day}"));
            let reader = LogReader::<TickRecord>::open(&base).unwrap();
            assert_eq!(reader.total_count(), 1, "day {day}");
        }
        std::fs::remove_dir_all(&output).ok();
    }
}
