//! Fixed-topic synchronous event bus.
//!
//! The bus is a dense array indexed by [`Topic`], one ordered handler list
//! per slot. `publish` invokes every handler synchronously, in registration
//! order, on the publishing thread; there is no queueing and no filtering.
//! Handlers receive `&mut Event` so decorating subscribers (the order hub)
//! can write minted identifiers back into the caller's payload.
//!
//! Handlers must not panic across the bus; a failing handler publishes a
//! [`LogEvent`](crate::data::LogEvent) and returns.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::data::{
    AccountDetail, CacheReset, CancelRequest, CandleRecord, ConnectionStatus, LogEvent,
    OrderRequest, OrderReturn, PositionDetail, QueryRequest, SignalRecord, TickRecord, TradeReturn,
};

/// Dense event topic enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum Topic {
    /// A tick from a feed or replay source.
    MarketData = 0,
    /// A closed candle.
    Candle,
    /// A strategy factor value.
    Signal,
    /// Strategy order intent (undecorated).
    OrderRequest,
    /// Decorated order, ready for the trader adapter.
    OrderSend,
    /// Strategy cancel intent (undecorated).
    CancelRequest,
    /// Decorated cancel, ready for the trader adapter.
    CancelSend,
    /// Order return straight from the adapter (counter identifiers only).
    RawOrderReturn,
    /// Order return re-keyed to the internal client id.
    OrderReturn,
    /// Trade return straight from the adapter.
    RawTradeReturn,
    /// Trade return re-keyed to the internal client id.
    TradeReturn,
    /// Merged position state after any change.
    PositionUpdate,
    /// Account funds passthrough.
    AccountUpdate,
    /// Raw position query reply from the adapter.
    PositionReply,
    /// Ask the trader adapter to query positions.
    QueryPositions,
    /// Ask the trader adapter to query account funds.
    QueryAccount,
    /// Adapter connection state change.
    ConnectionStatus,
    /// Session-boundary cache purge directive.
    CacheReset,
    /// Log event for out-of-process observability.
    Log,
}

impl Topic {
    /// Number of topics; sizes the dispatch array.
    pub const COUNT: usize = 19;

    /// Returns the dense index of this topic.
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// A bus event. Payloads are values: the bus never retains a reference
/// after `publish` returns.
#[derive(Debug, Clone)]
pub enum Event {
    /// See [`Topic::MarketData`].
    MarketData(TickRecord),
    /// See [`Topic::Candle`].
    Candle(CandleRecord),
    /// See [`Topic::Signal`].
    Signal(SignalRecord),
    /// See [`Topic::OrderRequest`].
    OrderRequest(OrderRequest),
    /// See [`Topic::OrderSend`].
    OrderSend(OrderRequest),
    /// See [`Topic::CancelRequest`].
    CancelRequest(CancelRequest),
    /// See [`Topic::CancelSend`].
    CancelSend(CancelRequest),
    /// See [`Topic::RawOrderReturn`].
    RawOrderReturn(OrderReturn),
    /// See [`Topic::OrderReturn`].
    OrderReturn(OrderReturn),
    /// See [`Topic::RawTradeReturn`].
    RawTradeReturn(TradeReturn),
    /// See [`Topic::TradeReturn`].
    TradeReturn(TradeReturn),
    /// See [`Topic::PositionUpdate`].
    PositionUpdate(PositionDetail),
    /// See [`Topic::AccountUpdate`].
    AccountUpdate(AccountDetail),
    /// See [`Topic::PositionReply`].
    PositionReply(PositionDetail),
    /// See [`Topic::QueryPositions`].
    QueryPositions(QueryRequest),
    /// See [`Topic::QueryAccount`].
    QueryAccount(QueryRequest),
    /// See [`Topic::ConnectionStatus`].
    ConnectionStatus(ConnectionStatus),
    /// See [`Topic::CacheReset`].
    CacheReset(CacheReset),
    /// See [`Topic::Log`].
    Log(LogEvent),
}

impl Event {
    /// Returns the topic this event is dispatched on.
    #[must_use]
    pub const fn topic(&self) -> Topic {
        match self {
            Self::MarketData(_) => Topic::MarketData,
            Self::Candle(_) => Topic::Candle,
            Self::Signal(_) => Topic::Signal,
            Self::OrderRequest(_) => Topic::OrderRequest,
            Self::OrderSend(_) => Topic::OrderSend,
            Self::CancelRequest(_) => Topic::CancelRequest,
            Self::CancelSend(_) => Topic::CancelSend,
            Self::RawOrderReturn(_) => Topic::RawOrderReturn,
            Self::OrderReturn(_) => Topic::OrderReturn,
            Self::RawTradeReturn(_) => Topic::RawTradeReturn,
            Self::TradeReturn(_) => Topic::TradeReturn,
            Self::PositionUpdate(_) => Topic::PositionUpdate,
            Self::AccountUpdate(_) => Topic::AccountUpdate,
            Self::PositionReply(_) => Topic::PositionReply,
            Self::QueryPositions(_) => Topic::QueryPositions,
            Self::QueryAccount(_) => Topic::QueryAccount,
            Self::ConnectionStatus(_) => Topic::ConnectionStatus,
            Self::CacheReset(_) => Topic::CacheReset,
            Self::Log(_) => Topic::Log,
        }
    }
}

type Handler = Arc<dyn Fn(&mut Event) + Send + Sync>;

/// Fixed-topic synchronous event bus.
pub struct EventBus {
    topics: [RwLock<Vec<Handler>>; Topic::COUNT],
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Creates an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self {
            topics: std::array::from_fn(|_| RwLock::new(Vec::new())),
        }
    }

    /// Appends a handler to the topic's ordered list.
    pub fn subscribe<F>(&self, topic: Topic, handler: F)
    where
        F: Fn(&mut Event) + Send + Sync + 'static,
    {
        self.topics[topic.index()].write().push(Arc::new(handler));
    }

    /// Invokes every handler for the event's topic, in registration order,
    /// on the calling thread.
    ///
    /// Handlers may publish further events from within a callback;
    /// `read_recursive` keeps a nested publish on the same topic from
    /// deadlocking behind a queued writer (writers only run at subscribe
    /// and clear time, outside steady state).
    pub fn publish(&self, event: &mut Event) {
        let handlers = self.topics[event.topic().index()].read_recursive();
        for handler in handlers.iter() {
            handler(event);
        }
    }

    /// Returns the number of handlers registered on a topic.
    #[must_use]
    pub fn handler_count(&self, topic: Topic) -> usize {
        self.topics[topic.index()].read().len()
    }

    /// Drops every handler on every topic.
    ///
    /// Must run after module `stop` and before module instances are
    /// destroyed: a publish through a handler that points at a dropped
    /// module is the exact hazard this ordering removes.
    pub fn clear(&self) {
        for slot in &self.topics {
            slot.write().clear();
        }
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: Vec<usize> = self.topics.iter().map(|t| t.read().len()).collect();
        f.debug_struct("EventBus").field("handlers", &counts).finish()
    }
}
