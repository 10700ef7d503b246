//! Snapshot replay feed.
//!
//! Tails a tick log on its own thread, updating the global market
//! snapshot and publishing every record on the market-data topic. When
//! the log files do not exist yet (the recorder has not created them),
//! the open is retried once per second while the engine is running —
//! read-side open failures are recoverable by contract.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use sirocco_core::bus::{Event, EventBus};
use sirocco_core::data::TickRecord;
use sirocco_core::error::EngineError;
use sirocco_ipc::log::LogReader;
use sirocco_ipc::snapshot;

use crate::module::{Module, ModuleContext};

const BATCH: usize = 16;
const OPEN_RETRY: Duration = Duration::from_secs(1);

/// The replay feed module.
pub struct ReplayModule {
    data_file: String,
    max_records: u64,
    bus: Option<Arc<EventBus>>,
    running: Option<Arc<AtomicBool>>,
    thread: Option<JoinHandle<()>>,
}

impl Default for ReplayModule {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplayModule {
    /// Creates an unwired replay feed.
    #[must_use]
    pub fn new() -> Self {
        Self {
            data_file: String::new(),
            max_records: 0,
            bus: None,
            running: None,
            thread: None,
        }
    }

    fn run(data_file: String, max_records: u64, bus: &EventBus, running: &AtomicBool) {
        while running.load(Ordering::Acquire) {
            let mut reader =
                match LogReader::<TickRecord>::open_with_capacity(&data_file, max_records) {
                    Ok(reader) => reader,
                    Err(e) => {
                        // The writer may not have created the files yet.
                        info!(base = %data_file, error = %e, "waiting for tick log");
                        std::thread::sleep(OPEN_RETRY);
                        continue;
                    }
                };

            info!(base = %data_file, total = reader.total_count(), "replay connected");
            let started = Instant::now();
            let mut published = 0u64;
            let mut drained_logged = false;

            while running.load(Ordering::Acquire) {
                let batch = reader.read_batch(BATCH);
                if batch.is_empty() {
                    if published > 0 && !drained_logged {
                        debug!(
                            ticks = published,
                            elapsed_us = started.elapsed().as_micros() as u64,
                            "replay drained to tail"
                        );
                        drained_logged = true;
                    }
                    std::hint::spin_loop();
                    continue;
                }
                drained_logged = false;

                for tick in batch {
                    if let Some(snapshot) = snapshot::global() {
                        snapshot.update(tick);
                    }
                    bus.publish(&mut Event::MarketData(*tick));
                }
                published += batch.len() as u64;
            }
            return;
        }
    }
}

impl Module for ReplayModule {
    fn name(&self) -> &'static str {
        "replay"
    }

    fn init(&mut self, ctx: &ModuleContext) -> Result<(), EngineError> {
        self.data_file = ctx.require("replay", "data_file")?.to_string();
        self.max_records = ctx.param_u64("max_records", 0);
        self.bus = Some(Arc::clone(&ctx.bus));
        self.running = Some(Arc::clone(&ctx.running));
        info!(base = %self.data_file, "replay initialised");
        Ok(())
    }

    fn start(&mut self) -> Result<(), EngineError> {
        let (Some(bus), Some(running)) = (self.bus.clone(), self.running.clone()) else {
            return Ok(());
        };
        let data_file = self.data_file.clone();
        let max_records = self.max_records;

        self.thread = Some(std::thread::spawn(move || {
            Self::run(data_file, max_records, &bus, &running);
        }));
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("replay thread panicked");
            }
        }
        if let Some(snapshot) = snapshot::global() {
            snapshot.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use sirocco_core::bus::Topic;
    use sirocco_ipc::log::LogWriter;
    use std::collections::BTreeMap;

    use crate::timer::TimerService;

    fn tick(id: u64, price: f64) -> TickRecord {
        let mut tick = TickRecord {
            instrument_id: id,
            trading_day: 20260115,
            last_price: price,
            ..TickRecord::default()
        };
        tick.set_ticker("au2606");
        tick
    }

    #[test]
    fn test_replays_log_onto_bus() {
        let base = std::env::temp_dir().join(format!("sirocco_replay_{}", std::process::id()));
        {
            let mut writer = LogWriter::<TickRecord>::create(&base, 64).unwrap();
            for i in 0..40 {
                writer.append(&tick(42, 100.0 + f64::from(i)));
            }
        }

        let bus = Arc::new(EventBus::new());
        let running = Arc::new(AtomicBool::new(true));
        let ctx = ModuleContext {
            bus: Arc::clone(&bus),
            timer: TimerService::new(),
            running: Arc::clone(&running),
            params: BTreeMap::from([(
                "data_file".to_string(),
                base.display().to_string(),
            )]),
            raw_config: None,
        };

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.subscribe(Topic::MarketData, move |event| {
            if let Event::MarketData(tick) = event {
                sink.lock().push(tick.last_price);
            }
        });

        let mut module = ReplayModule::new();
        module.init(&ctx).unwrap();
        module.start().unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while seen.lock().len() < 40 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        running.store(false, Ordering::Release);
        module.stop();

        let seen = seen.lock();
        assert_eq!(seen.len(), 40);
        // Feed order is preserved.
        assert_eq!(seen[0], 100.0);
        assert_eq!(seen[39], 139.0);

        std::fs::remove_file(format!("{}.dat", base.display())).ok();
        std::fs::remove_file(format!("{}.meta", base.display())).ok();
    }

    #[test]
    fn test_missing_data_file_param_is_fatal() {
        let ctx = ModuleContext {
            bus: Arc::new(EventBus::new()),
            timer: TimerService::new(),
            running: Arc::new(AtomicBool::new(true)),
            params: BTreeMap::new(),
            raw_config: None,
        };
        let mut module = ReplayModule::new();
        assert!(matches!(
            module.init(&ctx),
            Err(EngineError::MissingParam { .. })
        ));
    }
}
