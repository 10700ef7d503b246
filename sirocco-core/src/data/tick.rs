//! Full-depth tick record.

use super::{fixed_str, set_fixed_str};

/// Length of the fixed ticker field (31 bytes of payload plus NUL).
pub const TICKER_LEN: usize = 32;

/// One market-data update: last trade, session statistics, and the
/// top-five book.
///
/// The record is `#[repr(C)]` and cache-line aligned because it is shared
/// byte-for-byte between the event bus, the seqlock snapshot slots, and the
/// on-disk mmap log. Cumulative fields (`volume`, `turnover`) are
/// monotonically non-decreasing within a trading day per instrument;
/// downstream consumers difference them per interval.
#[repr(C, align(64))]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TickRecord {
    /// Instrument ticker, NUL-padded.
    pub ticker: [u8; TICKER_LEN],
    /// Numeric instrument id from the symbol registry (0 = unknown).
    pub instrument_id: u64,
    /// Trading day as `YYYYMMDD`.
    pub trading_day: u32,
    /// Update time packed as `HHMMSSmmm`.
    pub update_time: u64,

    /// Last traded price.
    pub last_price: f64,
    /// Cumulative session volume.
    pub volume: i32,
    /// Cumulative session turnover.
    pub turnover: f64,
    /// Open interest at this update.
    pub open_interest: f64,

    /// Upper limit price for the session.
    pub upper_limit: f64,
    /// Lower limit price for the session.
    pub lower_limit: f64,
    /// Session open price.
    pub open_price: f64,
    /// Session high.
    pub highest_price: f64,
    /// Session low.
    pub lowest_price: f64,
    /// Previous session close.
    pub pre_close_price: f64,

    /// Bid prices, best first.
    pub bid_price: [f64; 5],
    /// Bid volumes, best first.
    pub bid_volume: [i32; 5],
    /// Ask prices, best first.
    pub ask_price: [f64; 5],
    /// Ask volumes, best first.
    pub ask_volume: [i32; 5],
}

impl TickRecord {
    /// Returns the ticker as a string slice.
    #[must_use]
    pub fn ticker_str(&self) -> &str {
        fixed_str(&self.ticker)
    }

    /// Sets the ticker field, truncating to 31 bytes.
    pub fn set_ticker(&mut self, ticker: &str) {
        set_fixed_str(&mut self.ticker, ticker);
    }

    /// Returns the best bid price, or `None` if the book side is empty.
    #[must_use]
    pub fn best_bid(&self) -> Option<f64> {
        (self.bid_volume[0] > 0).then_some(self.bid_price[0])
    }

    /// Returns the best ask price, or `None` if the book side is empty.
    #[must_use]
    pub fn best_ask(&self) -> Option<f64> {
        (self.ask_volume[0] > 0).then_some(self.ask_price[0])
    }

    /// Returns the mid price when both sides of the book are present.
    #[must_use]
    pub fn mid_price(&self) -> Option<f64> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid + ask) / 2.0),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tick() -> TickRecord {
        let mut tick = TickRecord {
            instrument_id: 42,
            trading_day: 20260115,
            update_time: 93005_500,
            last_price: 500.0,
            volume: 1200,
            turnover: 600_000.0,
            open_interest: 8_000.0,
            ..TickRecord::default()
        };
        tick.set_ticker("au2606");
        tick.bid_price[0] = 499.5;
        tick.bid_volume[0] = 10;
        tick.ask_price[0] = 500.5;
        tick.ask_volume[0] = 7;
        tick
    }

    #[test]
    fn test_tick_is_cache_line_aligned() {
        assert_eq!(std::mem::align_of::<TickRecord>(), 64);
    }

    #[test]
    fn test_ticker_roundtrip() {
        let tick = sample_tick();
        assert_eq!(tick.ticker_str(), "au2606");
    }

    #[test]
    fn test_best_bid_ask() {
        let tick = sample_tick();
        assert_eq!(tick.best_bid(), Some(499.5));
        assert_eq!(tick.best_ask(), Some(500.5));
        assert_eq!(tick.mid_price(), Some(500.0));
    }

    #[test]
    fn test_empty_book_side() {
        let mut tick = sample_tick();
        tick.bid_volume[0] = 0;
        assert_eq!(tick.best_bid(), None);
        assert_eq!(tick.mid_price(), None);
    }
}
