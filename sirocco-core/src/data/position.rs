//! Position and account state types.

use serde::{Deserialize, Serialize};

/// Raw position direction as reported by an exchange query reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PositionSide {
    /// Long leg.
    Long,
    /// Short leg.
    Short,
    /// Net position (treated as long by the reconciler).
    #[default]
    Net,
}

/// Position-date tag carried by exchange query replies.
///
/// SHFE and INE report today and yesterday buckets as separate records;
/// all other exchanges report a single record covering both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PositionDate {
    /// Reply covers the today bucket only.
    Today,
    /// Reply covers the yesterday bucket only.
    Yesterday,
    /// Reply covers the whole side.
    #[default]
    Both,
}

/// Per-(account, instrument) position detail.
///
/// Long and short legs each split into today/yesterday lots. All four lot
/// counts stay non-negative; the reconciler clamps instead of going
/// negative when upstream state is inconsistent.
///
/// The same struct doubles as the query-reply payload, where `direction`
/// and `position_date` tag which side/bucket the reply covers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PositionDetail {
    /// Owning account.
    pub account_id: String,
    /// Instrument ticker.
    pub ticker: String,
    /// Numeric instrument id.
    pub instrument_id: u64,
    /// Exchange code (decides close-today semantics).
    pub exchange_id: String,

    /// Long lots opened today.
    pub long_today: i32,
    /// Long lots carried from yesterday.
    pub long_yesterday: i32,
    /// Long leg average price.
    pub long_avg_price: f64,
    /// Long leg P&L.
    pub long_pnl: f64,

    /// Short lots opened today.
    pub short_today: i32,
    /// Short lots carried from yesterday.
    pub short_yesterday: i32,
    /// Short leg average price.
    pub short_avg_price: f64,
    /// Short leg P&L.
    pub short_pnl: f64,

    /// Net P&L (long + short legs).
    pub net_pnl: f64,

    /// Query replies only: which side this reply covers.
    #[serde(default, skip_serializing_if = "is_default_side")]
    pub direction: PositionSide,
    /// Query replies only: which bucket this reply covers.
    #[serde(default, skip_serializing_if = "is_default_date")]
    pub position_date: PositionDate,
}

fn is_default_side(side: &PositionSide) -> bool {
    *side == PositionSide::Net
}

fn is_default_date(date: &PositionDate) -> bool {
    *date == PositionDate::Both
}

impl PositionDetail {
    /// Total long lots.
    #[must_use]
    pub fn long_total(&self) -> i32 {
        self.long_today + self.long_yesterday
    }

    /// Total short lots.
    #[must_use]
    pub fn short_total(&self) -> i32 {
        self.short_today + self.short_yesterday
    }

    /// Returns true when both legs are flat.
    #[must_use]
    pub fn is_flat(&self) -> bool {
        self.long_total() == 0 && self.short_total() == 0
    }
}

/// Per-account funds detail, passed through from the trader adapter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountDetail {
    /// Broker id.
    pub broker_id: String,
    /// Account id.
    pub account_id: String,
    /// Account balance.
    pub balance: f64,
    /// Available funds.
    pub available: f64,
    /// Margin in use.
    pub margin: f64,
    /// Realized (close) P&L.
    pub close_pnl: f64,
    /// Floating (position) P&L.
    pub position_pnl: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_totals_and_flat() {
        let mut pos = PositionDetail {
            long_today: 2,
            long_yesterday: 3,
            ..PositionDetail::default()
        };
        assert_eq!(pos.long_total(), 5);
        assert!(!pos.is_flat());

        pos.long_today = 0;
        pos.long_yesterday = 0;
        assert!(pos.is_flat());
    }

    #[test]
    fn test_serde_skips_reply_tags_at_default() {
        let pos = PositionDetail::default();
        let json = serde_json::to_string(&pos).unwrap();
        assert!(!json.contains("position_date"));

        let tagged = PositionDetail {
            direction: PositionSide::Short,
            position_date: PositionDate::Today,
            ..PositionDetail::default()
        };
        let json = serde_json::to_string(&tagged).unwrap();
        assert!(json.contains("Today"));
    }
}
