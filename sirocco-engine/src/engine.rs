//! Plugin host and main loop.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Local;
use signal_hook::consts::{SIGINT, SIGTERM};
use tracing::{info, warn};

use sirocco_core::bus::EventBus;
use sirocco_core::config::{self, EngineConfig, SnapshotKind};
use sirocco_core::error::{EngineError, Result};
use sirocco_core::symbols::{self, SymbolRegistry};
use sirocco_ipc::snapshot::{self, LocalSnapshot, MarketSnapshot, ShmSnapshot};

use crate::module::{Module, ModuleContext, ModuleRegistry};
use crate::timer::TimerService;

/// How often the idle loop wakes to drive the 1 Hz wheel and re-check the
/// shutdown flag.
const IDLE_POLL: Duration = Duration::from_millis(100);

struct LoadedModule {
    name: String,
    module: Box<dyn Module>,
}

/// The plugin host: loads configuration, instantiates modules, drives the
/// timer wheel, and supervises shutdown.
pub struct Engine {
    config: EngineConfig,
    bus: Arc<EventBus>,
    timer: TimerService,
    running: Arc<AtomicBool>,
    modules: Vec<LoadedModule>,
    started: bool,
}

impl Engine {
    /// Loads a config file and boots an engine from it.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the file cannot be loaded, and
    /// any error surfaced by module construction or initialisation.
    pub fn from_config_file<P: AsRef<Path>>(path: P, registry: &ModuleRegistry) -> Result<Self> {
        let config: EngineConfig = config::load_file(path)?;
        Self::new(config, registry)
    }

    /// Boots an engine: publishes the symbol registry, installs the
    /// snapshot backing, and instantiates + initialises every enabled
    /// module in declaration order.
    ///
    /// # Errors
    ///
    /// An unknown module name or a failed module init is fatal.
    pub fn new(config: EngineConfig, registry: &ModuleRegistry) -> Result<Self> {
        info!("engine booting");

        match SymbolRegistry::load(&config.symbols_file) {
            Ok(loaded) => {
                symbols::install(loaded);
            }
            Err(e) => warn!(
                path = %config.symbols_file.display(),
                error = %e,
                "symbol map not loaded; ids will resolve to 0"
            ),
        }

        snapshot::install(Self::build_snapshot(&config));

        let bus = Arc::new(EventBus::new());
        let timer = TimerService::new();
        let running = Arc::new(AtomicBool::new(true));

        let mut modules = Vec::new();
        for plugin in &config.plugins {
            if !plugin.enabled {
                info!(module = %plugin.name, "skipping disabled module");
                continue;
            }

            let mut module = registry.create(&plugin.name)?;
            let ctx = ModuleContext {
                bus: Arc::clone(&bus),
                timer: timer.clone(),
                running: Arc::clone(&running),
                params: plugin.flat_params(),
                raw_config: plugin.raw_config(),
            };
            module.init(&ctx)?;
            info!(module = %plugin.name, "module initialised");
            modules.push(LoadedModule {
                name: plugin.name.clone(),
                module,
            });
        }

        Ok(Self {
            config,
            bus,
            timer,
            running,
            modules,
            started: false,
        })
    }

    fn build_snapshot(config: &EngineConfig) -> MarketSnapshot {
        let Some(snap) = &config.snapshot else {
            return MarketSnapshot::Local(LocalSnapshot::new());
        };
        match snap.kind {
            SnapshotKind::Local => MarketSnapshot::Local(LocalSnapshot::new()),
            SnapshotKind::Shm => {
                let name = snap.path.as_deref().unwrap_or("/hft_snapshot");
                let result = if snap.is_writer {
                    ShmSnapshot::create(name)
                } else {
                    ShmSnapshot::open(name)
                };
                match result {
                    Ok(shm) => {
                        info!(region = name, writer = snap.is_writer, "shared snapshot attached");
                        MarketSnapshot::Shm(shm)
                    }
                    Err(e) => {
                        warn!(region = name, error = %e, "shm snapshot failed; falling back to local");
                        MarketSnapshot::Local(LocalSnapshot::new())
                    }
                }
            }
        }
    }

    /// The engine's event bus.
    #[must_use]
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// The engine's timer service.
    #[must_use]
    pub fn timer(&self) -> &TimerService {
        &self.timer
    }

    /// The engine-wide running flag.
    #[must_use]
    pub fn running(&self) -> &Arc<AtomicBool> {
        &self.running
    }

    /// Starts every module in declaration order.
    ///
    /// # Errors
    ///
    /// Propagates the first module start failure.
    pub fn start(&mut self) -> Result<()> {
        if self.started {
            return Ok(());
        }
        for loaded in &mut self.modules {
            loaded.module.start().map_err(|e| {
                warn!(module = %loaded.name, error = %e, "module start failed");
                e
            })?;
            info!(module = %loaded.name, "module started");
        }
        self.started = true;
        Ok(())
    }

    /// Runs the main loop until SIGINT/SIGTERM or the configured
    /// end-of-day cutoff, then stops the engine.
    ///
    /// The loop wakes every 100 ms, drives the timer wheel at 1 Hz, and
    /// never blocks on shared state.
    ///
    /// # Errors
    ///
    /// Propagates start failures and signal-handler installation errors.
    pub fn run(&mut self) -> Result<()> {
        self.start()?;

        let term = Arc::new(AtomicBool::new(false));
        signal_hook::flag::register(SIGINT, Arc::clone(&term)).map_err(EngineError::Signal)?;
        signal_hook::flag::register(SIGTERM, Arc::clone(&term)).map_err(EngineError::Signal)?;

        let end_time = self
            .config
            .trading_hours
            .as_ref()
            .and_then(|hours| hours.end.clone());

        info!("engine running; waiting for signal or end time");
        let mut last_tick = Instant::now();

        while !term.load(Ordering::Relaxed) {
            if last_tick.elapsed() >= Duration::from_secs(1) {
                last_tick += Duration::from_secs(1);
                self.timer.tick();
            }

            if let Some(end) = &end_time {
                let now = Local::now().format("%H:%M:%S").to_string();
                if now.as_str() >= end.as_str() {
                    info!(end = %end, "reached end time; stopping");
                    break;
                }
            }

            std::thread::sleep(IDLE_POLL);
        }

        self.stop();
        Ok(())
    }

    /// Stops the engine: clears the running flag, stops modules in
    /// reverse declaration order, drops every bus handler, and only then
    /// destroys module instances.
    ///
    /// The ordering is mandatory. A handler outliving its module would
    /// let a late publish call into a dropped instance.
    pub fn stop(&mut self) {
        if !self.started && self.modules.is_empty() {
            return;
        }
        info!("engine shutting down");

        self.running.store(false, Ordering::Release);

        for loaded in self.modules.iter_mut().rev() {
            loaded.module.stop();
            info!(module = %loaded.name, "module stopped");
        }

        self.bus.clear();
        self.modules.clear();
        self.started = false;
        info!("shutdown complete");
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use sirocco_core::bus::{Event, Topic};
    use sirocco_core::config::PluginConfig;
    use sirocco_core::data::TickRecord;
    use sirocco_core::error::SiroccoError;

    /// Module that registers a market-data handler bumping a shared
    /// counter, to observe the shutdown ordering from outside.
    struct ProbeModule {
        hits: Arc<AtomicUsize>,
        stopped: Arc<AtomicUsize>,
    }

    impl Module for ProbeModule {
        fn name(&self) -> &'static str {
            "probe"
        }

        fn init(&mut self, ctx: &ModuleContext) -> std::result::Result<(), EngineError> {
            let hits = Arc::clone(&self.hits);
            ctx.bus.subscribe(Topic::MarketData, move |_| {
                hits.fetch_add(1, Ordering::Relaxed);
            });
            Ok(())
        }

        fn stop(&mut self) {
            self.stopped.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn probe_config(count: usize) -> EngineConfig {
        EngineConfig {
            symbols_file: "/nonexistent/symbols.txt".into(),
            plugins: (0..count)
                .map(|_| PluginConfig {
                    name: "probe".to_string(),
                    enabled: true,
                    ..PluginConfig::default()
                })
                .collect(),
            ..EngineConfig::default()
        }
    }

    fn probe_registry(hits: &Arc<AtomicUsize>, stopped: &Arc<AtomicUsize>) -> ModuleRegistry {
        let mut registry = ModuleRegistry::new();
        let hits = Arc::clone(hits);
        let stopped = Arc::clone(stopped);
        registry.register("probe", move || {
            Box::new(ProbeModule {
                hits: Arc::clone(&hits),
                stopped: Arc::clone(&stopped),
            })
        });
        registry
    }

    #[test]
    fn test_unknown_module_is_fatal() {
        let config = EngineConfig {
            plugins: vec![PluginConfig {
                name: "missing".to_string(),
                enabled: true,
                ..PluginConfig::default()
            }],
            ..probe_config(0)
        };
        let registry = ModuleRegistry::new();
        let result = Engine::new(config, &registry);
        assert!(matches!(
            result,
            Err(SiroccoError::Engine(EngineError::UnknownModule { .. }))
        ));
    }

    #[test]
    fn test_disabled_modules_skipped() {
        let mut config = probe_config(2);
        config.plugins[1].enabled = false;

        let hits = Arc::new(AtomicUsize::new(0));
        let stopped = Arc::new(AtomicUsize::new(0));
        let registry = probe_registry(&hits, &stopped);

        let engine = Engine::new(config, &registry).unwrap();
        assert_eq!(engine.bus().handler_count(Topic::MarketData), 1);
    }

    /// After stop, a probe publish reaches zero handlers: the bus was
    /// cleared before module instances were dropped.
    #[test]
    fn test_shutdown_clears_bus_before_teardown() {
        let hits = Arc::new(AtomicUsize::new(0));
        let stopped = Arc::new(AtomicUsize::new(0));
        let registry = probe_registry(&hits, &stopped);

        let mut engine = Engine::new(probe_config(3), &registry).unwrap();
        engine.start().unwrap();

        let bus = Arc::clone(engine.bus());
        bus.publish(&mut Event::MarketData(TickRecord::default()));
        assert_eq!(hits.load(Ordering::Relaxed), 3);

        engine.stop();
        assert_eq!(stopped.load(Ordering::Relaxed), 3);
        assert!(!engine.running().load(Ordering::Acquire));

        bus.publish(&mut Event::MarketData(TickRecord::default()));
        assert_eq!(hits.load(Ordering::Relaxed), 3, "handler ran after clear");
    }

    #[test]
    fn test_stop_is_idempotent() {
        let hits = Arc::new(AtomicUsize::new(0));
        let stopped = Arc::new(AtomicUsize::new(0));
        let registry = probe_registry(&hits, &stopped);

        let mut engine = Engine::new(probe_config(1), &registry).unwrap();
        engine.start().unwrap();
        engine.stop();
        engine.stop();
        assert_eq!(stopped.load(Ordering::Relaxed), 1);
    }
}
