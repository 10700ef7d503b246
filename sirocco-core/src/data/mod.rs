//! Protocol records and order-flow message types.
//!
//! Two families live here:
//!
//! - **Fixed-layout records** ([`TickRecord`], [`CandleRecord`]) — `#[repr(C)]`
//!   plain-data structs shared byte-for-byte with the mmap log and the
//!   shared-memory snapshot. Ticker strings are fixed 32-byte NUL-padded
//!   fields.
//! - **Order-flow messages** (requests, returns, positions, accounts,
//!   control) — ordinary owned structs that travel only on the in-process
//!   bus and the JSON dump surface.

mod candle;
mod control;
mod order;
mod position;
mod tick;

pub use candle::{CandleInterval, CandleRecord};
pub use control::{CacheReset, ConnectionState, ConnectionStatus, LogEvent, QueryRequest, SignalRecord, RESET_POSITIONS};
pub use order::{
    CancelRequest, Direction, OffsetFlag, OrderRequest, OrderReturn, OrderStatus, TradeReturn,
};
pub use position::{AccountDetail, PositionDate, PositionDetail, PositionSide};
pub use tick::{TickRecord, TICKER_LEN};

/// Exchanges that distinguish close-today from close-yesterday offsets.
pub const CLOSE_TODAY_EXCHANGES: [&str; 2] = ["SHFE", "INE"];

/// Returns true if the exchange requires explicit close-today orders.
#[must_use]
pub fn uses_close_today(exchange_id: &str) -> bool {
    CLOSE_TODAY_EXCHANGES.contains(&exchange_id)
}

/// Decodes a NUL-padded fixed byte field as a string slice.
pub(crate) fn fixed_str(bytes: &[u8]) -> &str {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    std::str::from_utf8(&bytes[..end]).unwrap_or("")
}

/// Copies a string into a NUL-padded fixed byte field, truncating to
/// `bytes.len() - 1` so the field stays NUL-terminated.
pub(crate) fn set_fixed_str(bytes: &mut [u8], value: &str) {
    bytes.fill(0);
    let n = value.len().min(bytes.len() - 1);
    bytes[..n].copy_from_slice(&value.as_bytes()[..n]);
}
