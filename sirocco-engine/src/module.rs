//! Module trait and static factory registry.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use sirocco_core::bus::EventBus;
use sirocco_core::error::EngineError;

use crate::timer::TimerService;

/// Everything a module receives at initialisation.
pub struct ModuleContext {
    /// The engine's event bus.
    pub bus: Arc<EventBus>,
    /// The engine's timer service; modules register periodic callbacks.
    pub timer: TimerService,
    /// Engine-wide running flag; module threads poll it and exit when it
    /// goes false.
    pub running: Arc<AtomicBool>,
    /// Flattened scalar parameters from the module's config block.
    pub params: BTreeMap<String, String>,
    /// The full nested config block serialized back to YAML, for modules
    /// with hierarchical parameters.
    pub raw_config: Option<String>,
}

impl ModuleContext {
    /// Returns a parameter value.
    #[must_use]
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Returns a parameter value or a default.
    #[must_use]
    pub fn param_or(&self, key: &str, default: &str) -> String {
        self.param(key).unwrap_or(default).to_string()
    }

    /// Returns a boolean parameter ("true"/"1" are true), defaulting to
    /// false.
    #[must_use]
    pub fn param_bool(&self, key: &str) -> bool {
        matches!(self.param(key), Some("true" | "1"))
    }

    /// Returns an integer parameter, falling back to `default` when absent
    /// or unparseable.
    #[must_use]
    pub fn param_u64(&self, key: &str, default: u64) -> u64 {
        self.param(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    /// Returns a mandatory parameter or [`EngineError::MissingParam`].
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::MissingParam`] naming the module and key.
    pub fn require(&self, module: &str, key: &str) -> Result<&str, EngineError> {
        self.param(key).ok_or_else(|| EngineError::MissingParam {
            module: module.to_string(),
            param: key.to_string(),
        })
    }
}

/// A pluggable engine module.
///
/// Lifecycle: `init` (wire bus subscriptions and timers) in declaration
/// order, `start` in declaration order, `stop` in reverse order. Modules
/// must not publish after `stop` returns.
pub trait Module: Send {
    /// Stable module name (the registry key).
    fn name(&self) -> &'static str;

    /// Wires the module to the bus and timer.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] on missing parameters or failed resource
    /// acquisition; init errors are fatal at boot.
    fn init(&mut self, ctx: &ModuleContext) -> Result<(), EngineError>;

    /// Starts background work (threads, connections).
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when the module cannot start.
    fn start(&mut self) -> Result<(), EngineError> {
        Ok(())
    }

    /// Stops background work; must join any threads the module spawned.
    fn stop(&mut self) {}
}

type ModuleFactory = Box<dyn Fn() -> Box<dyn Module> + Send + Sync>;

/// Static name → factory registry.
///
/// Built-in modules are registered by [`ModuleRegistry::with_builtins`];
/// embedders add their own factories with [`ModuleRegistry::register`]
/// before handing the registry to the engine.
#[derive(Default)]
pub struct ModuleRegistry {
    factories: HashMap<String, ModuleFactory>,
}

impl ModuleRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with every built-in module registered.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("order_hub", || {
            Box::new(crate::modules::order_hub::OrderHubModule::new())
        });
        registry.register("position", || {
            Box::new(crate::modules::position::PositionModule::new())
        });
        registry.register("candle", || {
            Box::new(crate::modules::candle::CandleModule::new())
        });
        registry.register("replay", || {
            Box::new(crate::modules::replay::ReplayModule::new())
        });
        registry.register("recorder", || {
            Box::new(crate::modules::recorder::RecorderModule::new())
        });
        registry
    }

    /// Registers a factory under a name, replacing any previous one.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> Box<dyn Module> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_string(), Box::new(factory));
    }

    /// Instantiates a module by name.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnknownModule`] when no factory matches.
    pub fn create(&self, name: &str) -> Result<Box<dyn Module>, EngineError> {
        self.factories
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| EngineError::UnknownModule {
                name: name.to_string(),
            })
    }

    /// Registered module names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sirocco_core::bus::EventBus;

    fn empty_ctx() -> ModuleContext {
        ModuleContext {
            bus: Arc::new(EventBus::new()),
            timer: TimerService::new(),
            running: Arc::new(AtomicBool::new(true)),
            params: BTreeMap::new(),
            raw_config: None,
        }
    }

    #[test]
    fn test_param_helpers() {
        let mut ctx = empty_ctx();
        ctx.params.insert("debug".to_string(), "true".to_string());
        ctx.params.insert("node_id".to_string(), "7".to_string());
        ctx.params.insert("bad".to_string(), "x".to_string());

        assert!(ctx.param_bool("debug"));
        assert!(!ctx.param_bool("missing"));
        assert_eq!(ctx.param_u64("node_id", 0), 7);
        assert_eq!(ctx.param_u64("bad", 3), 3);
        assert_eq!(ctx.param_or("missing", "d"), "d");
        assert!(ctx.require("m", "missing").is_err());
    }

    #[test]
    fn test_registry_builtins() {
        let registry = ModuleRegistry::with_builtins();
        let names = registry.names();
        for expected in ["candle", "order_hub", "position", "recorder", "replay"] {
            assert!(names.iter().any(|n| n == expected), "missing {expected}");
        }
        assert!(registry.create("order_hub").is_ok());
        assert!(matches!(
            registry.create("nope"),
            Err(EngineError::UnknownModule { .. })
        ));
    }
}
