//! Control-plane message types: connection status, cache resets, queries,
//! signals, and log events.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Adapter connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Transport down.
    #[default]
    Disconnected,
    /// Transport up, not yet authenticated.
    Connected,
    /// Authenticated, not yet logged in.
    Authenticated,
    /// Logged in and ready for commands.
    LoggedIn,
    /// Authentication rejected.
    AuthFailed,
    /// Login rejected.
    LoginFailed,
    /// Adapter stopped deliberately.
    Stopped,
}

impl ConnectionState {
    /// Returns true when the adapter can accept commands.
    #[must_use]
    pub const fn is_ready(self) -> bool {
        matches!(self, Self::LoggedIn)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connected => "connected",
            Self::Authenticated => "authenticated",
            Self::LoggedIn => "logged_in",
            Self::AuthFailed => "auth_failed",
            Self::LoginFailed => "login_failed",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Connection status report published by adapters.
///
/// On a successful trader login the message carries `MaxOrderRef:N`, which
/// the order hub uses to advance its ref counter past refs already consumed
/// in earlier sessions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    /// Account the connection belongs to.
    pub account_id: String,
    /// Source tag, e.g. [`ConnectionStatus::SOURCE_TRADER`].
    pub source: String,
    /// Connection state.
    pub state: ConnectionState,
    /// Free-form message.
    pub message: String,
}

impl ConnectionStatus {
    /// Source tag used by trader (order-routing) adapters.
    pub const SOURCE_TRADER: &'static str = "trader";
    /// Source tag used by market-data adapters.
    pub const SOURCE_MARKET_DATA: &'static str = "md";
}

/// Bit in [`CacheReset::reset_type`] selecting the position cache.
pub const RESET_POSITIONS: u32 = 1;

/// Directive to purge cached state at a session boundary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheReset {
    /// Account to purge (empty = all accounts).
    pub account_id: String,
    /// Trading day the reset belongs to, `YYYYMMDD`.
    pub trading_day: u32,
    /// Bit-mask of caches to reset (bit 0 = positions).
    pub reset_type: u32,
    /// Reason, for the log.
    pub reason: String,
}

impl CacheReset {
    /// Returns true if the reset covers positions.
    #[must_use]
    pub const fn resets_positions(&self) -> bool {
        self.reset_type & RESET_POSITIONS != 0
    }
}

/// Query request for positions or account funds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    /// Account to query (empty = all accounts).
    pub account_id: String,
}

/// A factor value emitted by a strategy node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalRecord {
    /// Emitting node id.
    pub source: String,
    /// Instrument ticker.
    pub ticker: String,
    /// Factor name.
    pub factor: String,
    /// Factor value.
    pub value: f64,
    /// Emission timestamp, unix milliseconds.
    pub timestamp_ms: i64,
}

/// A log event routed over the bus for out-of-process observability.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogEvent {
    /// Emitting component.
    pub source: String,
    /// Message text.
    pub message: String,
}
