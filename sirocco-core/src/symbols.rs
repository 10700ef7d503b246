//! Process-wide instrument registry.
//!
//! The registry is bulk-loaded once at startup from a text file of
//! `id:ticker[:multiplier]` lines and then frozen; readers access it
//! without synchronization through [`global`]. Reinitialisation after
//! publication is refused.

use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;

use tracing::{info, warn};

/// Ticker returned for ids the registry does not know.
pub const UNKNOWN_TICKER: &str = "UNKNOWN";

/// Immutable id ↔ ticker ↔ multiplier mapping.
#[derive(Debug, Default)]
pub struct SymbolRegistry {
    id_to_ticker: HashMap<u64, String>,
    ticker_to_id: HashMap<String, u64>,
    multipliers: HashMap<u64, f64>,
}

impl SymbolRegistry {
    /// Loads the registry from a symbol map file.
    ///
    /// Lines are `id:ticker[:multiplier]`; `#` comments and blank lines
    /// are skipped, and malformed lines are skipped with a warning, never
    /// fatal.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error when the file cannot be read at
    /// all; the caller decides whether an empty registry is acceptable.
    pub fn load<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;

        let mut registry = Self::default();
        for (lineno, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let mut parts = line.splitn(3, ':');
            let id = parts.next().and_then(|s| s.trim().parse::<u64>().ok());
            let ticker = parts.next().map(str::trim).filter(|t| !t.is_empty());

            let (Some(id), Some(ticker)) = (id, ticker) else {
                warn!(line = lineno + 1, "skipping malformed symbol line");
                continue;
            };
            if ticker.len() >= 32 {
                warn!(line = lineno + 1, ticker, "skipping over-long ticker");
                continue;
            }

            if let Some(mult) = parts.next() {
                match mult.trim().parse::<f64>() {
                    Ok(m) if m > 0.0 => {
                        registry.multipliers.insert(id, m);
                    }
                    _ => warn!(line = lineno + 1, "skipping bad multiplier"),
                }
            }

            registry.id_to_ticker.insert(id, ticker.to_string());
            registry.ticker_to_id.insert(ticker.to_string(), id);
        }

        info!(
            symbols = registry.ticker_to_id.len(),
            path = %path.display(),
            "symbol registry loaded"
        );
        Ok(registry)
    }

    /// Returns the id for a ticker, or 0 when unknown.
    #[must_use]
    pub fn get_id(&self, ticker: &str) -> u64 {
        self.ticker_to_id.get(ticker).copied().unwrap_or(0)
    }

    /// Returns the ticker for an id, or [`UNKNOWN_TICKER`].
    #[must_use]
    pub fn get_ticker(&self, id: u64) -> &str {
        self.id_to_ticker
            .get(&id)
            .map_or(UNKNOWN_TICKER, String::as_str)
    }

    /// Returns the contract multiplier for an id, or 1.0 when unconfigured.
    #[must_use]
    pub fn get_multiplier(&self, id: u64) -> f64 {
        self.multipliers.get(&id).copied().unwrap_or(1.0)
    }

    /// Number of loaded symbols.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ticker_to_id.len()
    }

    /// Returns true if no symbols are loaded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ticker_to_id.is_empty()
    }
}

static GLOBAL: OnceLock<SymbolRegistry> = OnceLock::new();

/// Publishes the process-wide registry. Returns false (and leaves the
/// existing registry in place) if one was already installed.
pub fn install(registry: SymbolRegistry) -> bool {
    GLOBAL.set(registry).is_ok()
}

/// Returns the process-wide registry; an empty registry before [`install`].
#[must_use]
pub fn global() -> &'static SymbolRegistry {
    GLOBAL.get_or_init(SymbolRegistry::default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(name: &str, content: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_load_and_lookup() {
        let path = write_temp(
            "sirocco_symbols_basic.txt",
            "# futures\n10000001:au2606:1000\n10000002:rb2501\n\n10000003:i2501:100\n",
        );
        let registry = SymbolRegistry::load(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(registry.len(), 3);
        assert_eq!(registry.get_id("au2606"), 10000001);
        assert_eq!(registry.get_ticker(10000002), "rb2501");
        assert_eq!(registry.get_multiplier(10000001), 1000.0);
        assert_eq!(registry.get_multiplier(10000002), 1.0);
    }

    #[test]
    fn test_unknowns() {
        let registry = SymbolRegistry::default();
        assert_eq!(registry.get_id("nope"), 0);
        assert_eq!(registry.get_ticker(123), UNKNOWN_TICKER);
        assert_eq!(registry.get_multiplier(123), 1.0);
    }

    #[test]
    fn test_malformed_lines_skipped() {
        let path = write_temp(
            "sirocco_symbols_malformed.txt",
            "not_a_line\n:missing_id\n10000009:\nabc:xyz\n10000010:ok\n",
        );
        let registry = SymbolRegistry::load(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get_id("ok"), 10000010);
    }

    #[test]
    fn test_missing_file_is_err() {
        assert!(SymbolRegistry::load("/nonexistent/symbols.txt").is_err());
    }
}
