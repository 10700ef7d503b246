//! Aggregated candle (OHLCV bar) record.

use std::fmt;

use super::{fixed_str, set_fixed_str, TICKER_LEN};

/// Candle aggregation interval.
///
/// The numeric tag is the interval length in minutes and is what is stored
/// inside [`CandleRecord`] on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CandleInterval {
    /// One minute.
    Min1,
    /// Five minutes.
    Min5,
    /// Fifteen minutes.
    Min15,
    /// One hour.
    Hour1,
    /// One trading day.
    Day1,
}

impl CandleInterval {
    /// Returns the on-disk tag (interval length in minutes).
    #[must_use]
    pub const fn tag(self) -> u32 {
        match self {
            Self::Min1 => 1,
            Self::Min5 => 5,
            Self::Min15 => 15,
            Self::Hour1 => 60,
            Self::Day1 => 1440,
        }
    }

    /// Decodes an on-disk tag.
    #[must_use]
    pub const fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            1 => Some(Self::Min1),
            5 => Some(Self::Min5),
            15 => Some(Self::Min15),
            60 => Some(Self::Hour1),
            1440 => Some(Self::Day1),
            _ => None,
        }
    }

    /// Returns the short label ("1m", "5m", "15m", "1h", "1d").
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Min1 => "1m",
            Self::Min5 => "5m",
            Self::Min15 => "15m",
            Self::Hour1 => "1h",
            Self::Day1 => "1d",
        }
    }
}

impl fmt::Display for CandleInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One aggregated bar.
///
/// `volume` and `turnover` are interval *deltas* (non-negative), not
/// cumulative session totals; `open_interest` is the value at the end of
/// the interval. Invariant: `low <= open, close <= high`.
///
/// `#[repr(C)]` because closed bars are persisted to the mmap log. The
/// interval is stored as its raw tag so any bit pattern read back from disk
/// stays representable; use [`CandleRecord::interval`] to decode it.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CandleRecord {
    /// Instrument ticker, NUL-padded.
    pub ticker: [u8; TICKER_LEN],
    /// Numeric instrument id (0 = unknown).
    pub instrument_id: u64,
    /// Trading day as `YYYYMMDD`.
    pub trading_day: u32,
    /// Interval start time packed as `HHMMSSmmm`.
    pub start_time: u64,
    /// Open price.
    pub open: f64,
    /// High price.
    pub high: f64,
    /// Low price.
    pub low: f64,
    /// Close price.
    pub close: f64,
    /// Interval volume delta.
    pub volume: i32,
    /// Interval turnover delta.
    pub turnover: f64,
    /// Open interest at interval end.
    pub open_interest: f64,
    /// Raw interval tag, see [`CandleInterval`].
    pub interval_tag: u32,
}

impl CandleRecord {
    /// Returns the ticker as a string slice.
    #[must_use]
    pub fn ticker_str(&self) -> &str {
        fixed_str(&self.ticker)
    }

    /// Sets the ticker field, truncating to 31 bytes.
    pub fn set_ticker(&mut self, ticker: &str) {
        set_fixed_str(&mut self.ticker, ticker);
    }

    /// Decodes the interval tag.
    #[must_use]
    pub fn interval(&self) -> Option<CandleInterval> {
        CandleInterval::from_tag(self.interval_tag)
    }

    /// Sets the interval tag.
    pub fn set_interval(&mut self, interval: CandleInterval) {
        self.interval_tag = interval.tag();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_tag_roundtrip() {
        for interval in [
            CandleInterval::Min1,
            CandleInterval::Min5,
            CandleInterval::Min15,
            CandleInterval::Hour1,
            CandleInterval::Day1,
        ] {
            assert_eq!(CandleInterval::from_tag(interval.tag()), Some(interval));
        }
        assert_eq!(CandleInterval::from_tag(7), None);
    }

    #[test]
    fn test_interval_display() {
        assert_eq!(CandleInterval::Min1.to_string(), "1m");
        assert_eq!(CandleInterval::Day1.to_string(), "1d");
    }

    #[test]
    fn test_candle_interval_accessor() {
        let mut candle = CandleRecord::default();
        assert_eq!(candle.interval(), None);
        candle.set_interval(CandleInterval::Hour1);
        assert_eq!(candle.interval(), Some(CandleInterval::Hour1));
    }
}
