//! Order-flow message types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Order direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Buy.
    Buy,
    /// Sell.
    Sell,
}

impl Direction {
    /// Returns the single-character wire code (`B`/`S`).
    #[must_use]
    pub const fn as_char(self) -> char {
        match self {
            Self::Buy => 'B',
            Self::Sell => 'S',
        }
    }

    /// Decodes the single-character wire code.
    #[must_use]
    pub const fn from_char(c: char) -> Option<Self> {
        match c {
            'B' => Some(Self::Buy),
            'S' => Some(Self::Sell),
            _ => None,
        }
    }
}

impl Default for Direction {
    fn default() -> Self {
        Self::Buy
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// Position offset flag.
///
/// `CloseToday` exists for the exchanges that price close-of-today-position
/// orders separately from close-of-yesterday (SHFE, INE).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OffsetFlag {
    /// Open a new position.
    Open,
    /// Close an existing position (yesterday-first on most exchanges).
    Close,
    /// Close today's position explicitly (SHFE/INE).
    CloseToday,
}

impl OffsetFlag {
    /// Returns the single-character wire code (`O`/`C`/`T`).
    #[must_use]
    pub const fn as_char(self) -> char {
        match self {
            Self::Open => 'O',
            Self::Close => 'C',
            Self::CloseToday => 'T',
        }
    }

    /// Decodes the single-character wire code.
    #[must_use]
    pub const fn from_char(c: char) -> Option<Self> {
        match c {
            'O' => Some(Self::Open),
            'C' => Some(Self::Close),
            'T' => Some(Self::CloseToday),
            _ => None,
        }
    }

    /// Returns true for either close variant.
    #[must_use]
    pub const fn is_close(self) -> bool {
        matches!(self, Self::Close | Self::CloseToday)
    }
}

impl Default for OffsetFlag {
    fn default() -> Self {
        Self::Open
    }
}

impl fmt::Display for OffsetFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// Exchange order status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Fully filled.
    AllFilled,
    /// Partially filled, remainder resting.
    PartialFilled,
    /// Accepted and resting, no fills.
    #[default]
    Resting,
    /// Cancelled (includes rejected-by-counter cancels).
    Cancelled,
    /// Rejected outright.
    Rejected,
    /// Any other counter-specific status.
    Other,
}

impl OrderStatus {
    /// Returns the single-character wire code used by the counter.
    #[must_use]
    pub const fn as_char(self) -> char {
        match self {
            Self::AllFilled => '0',
            Self::PartialFilled => '1',
            Self::Resting => '3',
            Self::Cancelled => '5',
            Self::Rejected => '6',
            Self::Other => 'a',
        }
    }

    /// Decodes the single-character wire code; unknown codes map to `Other`.
    #[must_use]
    pub const fn from_char(c: char) -> Self {
        match c {
            '0' => Self::AllFilled,
            '1' => Self::PartialFilled,
            '3' => Self::Resting,
            '5' => Self::Cancelled,
            '6' => Self::Rejected,
            _ => Self::Other,
        }
    }

    /// Returns true for statuses after which no further returns arrive.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::AllFilled | Self::Cancelled | Self::Rejected)
    }
}

/// An order request as emitted by a strategy and decorated by the hub.
///
/// Strategies publish with `client_id == 0` and an empty `order_ref`; the
/// hub mints both and writes them back into the caller's struct before
/// republishing the decorated request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    /// Internal client id (0 until the hub assigns one).
    pub client_id: u64,
    /// Counter-visible order reference (12 decimal digits once minted).
    pub order_ref: String,
    /// Target account (empty = any).
    pub account_id: String,
    /// Instrument ticker.
    pub ticker: String,
    /// Numeric instrument id.
    pub instrument_id: u64,
    /// Buy or sell.
    pub direction: Direction,
    /// Open / close / close-today.
    pub offset: OffsetFlag,
    /// Limit price.
    pub price: f64,
    /// Order volume in lots.
    pub volume: i32,
}

/// A cancel request, decorated by the hub with the counter identifiers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CancelRequest {
    /// Internal client id of the order to cancel.
    pub client_id: u64,
    /// Target account (empty = any).
    pub account_id: String,
    /// Instrument ticker.
    pub ticker: String,
    /// Counter order reference, filled by the hub.
    pub order_ref: String,
    /// Exchange system id, filled by the hub when known.
    pub order_sys_id: String,
}

/// An order state return from the trader adapter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderReturn {
    /// Internal client id, stamped by the hub before republication.
    pub client_id: u64,
    /// Counter order reference.
    pub order_ref: String,
    /// Exchange-assigned system id (empty until the exchange accepts).
    pub order_sys_id: String,
    /// Exchange code (e.g. "SHFE").
    pub exchange_id: String,
    /// Owning account.
    pub account_id: String,
    /// Instrument ticker.
    pub ticker: String,
    /// Numeric instrument id.
    pub instrument_id: u64,
    /// Buy or sell.
    pub direction: Direction,
    /// Open / close / close-today.
    pub offset: OffsetFlag,
    /// Limit price of the order.
    pub limit_price: f64,
    /// Total order volume.
    pub volume_total: i32,
    /// Volume filled so far.
    pub volume_traded: i32,
    /// Current order status.
    pub status: OrderStatus,
    /// Counter status message.
    pub status_msg: String,
}

/// A trade (execution) return from the trader adapter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TradeReturn {
    /// Internal client id, stamped by the hub before republication.
    pub client_id: u64,
    /// Counter order reference.
    pub order_ref: String,
    /// Exchange-assigned system id.
    pub order_sys_id: String,
    /// Exchange trade id.
    pub trade_id: String,
    /// Exchange code.
    pub exchange_id: String,
    /// Owning account.
    pub account_id: String,
    /// Instrument ticker.
    pub ticker: String,
    /// Numeric instrument id.
    pub instrument_id: u64,
    /// Buy or sell.
    pub direction: Direction,
    /// Open / close / close-today.
    pub offset: OffsetFlag,
    /// Executed price.
    pub price: f64,
    /// Executed volume.
    pub volume: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_chars() {
        assert_eq!(Direction::Buy.as_char(), 'B');
        assert_eq!(Direction::from_char('S'), Some(Direction::Sell));
        assert_eq!(Direction::from_char('X'), None);
    }

    #[test]
    fn test_offset_chars() {
        assert_eq!(OffsetFlag::CloseToday.as_char(), 'T');
        assert_eq!(OffsetFlag::from_char('C'), Some(OffsetFlag::Close));
        assert!(OffsetFlag::CloseToday.is_close());
        assert!(!OffsetFlag::Open.is_close());
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(OrderStatus::from_char('0'), OrderStatus::AllFilled);
        assert_eq!(OrderStatus::from_char('5'), OrderStatus::Cancelled);
        assert_eq!(OrderStatus::from_char('z'), OrderStatus::Other);
        assert!(OrderStatus::AllFilled.is_terminal());
        assert!(!OrderStatus::PartialFilled.is_terminal());
    }

    #[test]
    fn test_order_request_default_is_undecorated() {
        let req = OrderRequest::default();
        assert_eq!(req.client_id, 0);
        assert!(req.order_ref.is_empty());
    }
}
