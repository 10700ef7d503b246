//! Order lifecycle hub.
//!
//! The hub sits between strategies and the trader adapter. It mints the
//! internal client id and the counter-visible order ref for every request,
//! keeps the `ref → id` and `sysid → id` side indices, decorates cancel
//! requests, and re-keys raw returns to internal ids before republishing
//! them. Raw order returns whose ref matches nothing are *captured* as
//! externally originated orders (e.g. a manual order placed in another
//! terminal) instead of being discarded; trade returns without any
//! matching identifier are unreconcilable and dropped.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use sirocco_core::bus::{Event, EventBus, Topic};
use sirocco_core::data::{
    CancelRequest, ConnectionState, ConnectionStatus, OrderRequest, OrderReturn, OrderStatus,
    TradeReturn,
};
use sirocco_core::error::EngineError;
use sirocco_core::ids::OrderIdGenerator;

use crate::module::{Module, ModuleContext};

/// Full lifecycle record of one order.
#[derive(Debug, Clone)]
pub struct OrderContext {
    /// The (decorated) request.
    pub request: OrderRequest,
    /// Counter order ref minted for this order.
    pub order_ref: String,
    /// Exchange system id, empty until the exchange accepts.
    pub order_sys_id: String,
    /// Volume filled so far.
    pub filled_volume: i32,
    /// Latest status.
    pub status: OrderStatus,
}

#[derive(Default)]
struct HubMaps {
    orders: HashMap<u64, OrderContext>,
    ref_to_id: HashMap<String, u64>,
    sysid_to_id: HashMap<String, u64>,
}

/// Shared hub state: the id generator plus the three maps, linearized
/// under one lock so a raw return is observed and republished atomically
/// with respect to concurrent requests.
pub struct HubState {
    ids: OrderIdGenerator,
    maps: RwLock<HubMaps>,
}

impl HubState {
    fn new(node_id: u32) -> Self {
        Self {
            ids: OrderIdGenerator::new(node_id),
            maps: RwLock::new(HubMaps::default()),
        }
    }

    /// Looks up the lifecycle record for a client id.
    #[must_use]
    pub fn context(&self, client_id: u64) -> Option<OrderContext> {
        self.maps.read().orders.get(&client_id).cloned()
    }

    /// Number of tracked orders.
    #[must_use]
    pub fn order_count(&self) -> usize {
        self.maps.read().orders.len()
    }

    fn on_order_request(&self, bus: &EventBus, req: &mut OrderRequest) {
        req.client_id = self.ids.next_id();
        req.order_ref = self.ids.next_order_ref();

        {
            let mut maps = self.maps.write();
            maps.orders.insert(
                req.client_id,
                OrderContext {
                    request: req.clone(),
                    order_ref: req.order_ref.clone(),
                    order_sys_id: String::new(),
                    filled_volume: 0,
                    status: OrderStatus::Resting,
                },
            );
            maps.ref_to_id.insert(req.order_ref.clone(), req.client_id);
        }

        debug!(
            client_id = req.client_id,
            order_ref = %req.order_ref,
            ticker = %req.ticker,
            "order decorated"
        );
        bus.publish(&mut Event::OrderSend(req.clone()));
    }

    fn on_cancel_request(&self, bus: &EventBus, req: &CancelRequest) {
        let decorated = {
            let maps = self.maps.read();
            maps.orders.get(&req.client_id).map(|ctx| CancelRequest {
                order_ref: ctx.order_ref.clone(),
                order_sys_id: ctx.order_sys_id.clone(),
                ..req.clone()
            })
        };

        match decorated {
            Some(decorated) => {
                debug!(
                    client_id = req.client_id,
                    order_ref = %decorated.order_ref,
                    "cancel decorated"
                );
                bus.publish(&mut Event::CancelSend(decorated));
            }
            None => warn!(client_id = req.client_id, "cancel for unknown order dropped"),
        }
    }

    fn on_raw_order(&self, bus: &EventBus, rtn: &mut OrderReturn) {
        {
            let mut maps = self.maps.write();
            let client_id = match maps.ref_to_id.get(&rtn.order_ref).copied() {
                Some(id) => id,
                None => {
                    // Externally originated order: capture it so later
                    // returns and trades reconcile.
                    let id = self.ids.next_id();
                    let request = OrderRequest {
                        client_id: id,
                        order_ref: rtn.order_ref.clone(),
                        account_id: rtn.account_id.clone(),
                        ticker: rtn.ticker.clone(),
                        instrument_id: rtn.instrument_id,
                        direction: rtn.direction,
                        offset: rtn.offset,
                        price: rtn.limit_price,
                        volume: rtn.volume_total,
                    };
                    maps.orders.insert(
                        id,
                        OrderContext {
                            request,
                            order_ref: rtn.order_ref.clone(),
                            order_sys_id: String::new(),
                            filled_volume: 0,
                            status: OrderStatus::Resting,
                        },
                    );
                    maps.ref_to_id.insert(rtn.order_ref.clone(), id);
                    info!(
                        client_id = id,
                        order_ref = %rtn.order_ref,
                        ticker = %rtn.ticker,
                        "captured external order"
                    );
                    id
                }
            };

            rtn.client_id = client_id;
            if !rtn.order_sys_id.is_empty() {
                maps.sysid_to_id.insert(rtn.order_sys_id.clone(), client_id);
            }
            if let Some(ctx) = maps.orders.get_mut(&client_id) {
                ctx.status = rtn.status;
                ctx.filled_volume = rtn.volume_traded;
                if !rtn.order_sys_id.is_empty() {
                    ctx.order_sys_id = rtn.order_sys_id.clone();
                }
            }
        }

        bus.publish(&mut Event::OrderReturn(rtn.clone()));
    }

    fn on_raw_trade(&self, bus: &EventBus, trade: &mut TradeReturn) {
        let client_id = {
            let maps = self.maps.read();
            let by_sysid = (!trade.order_sys_id.is_empty())
                .then(|| maps.sysid_to_id.get(&trade.order_sys_id).copied())
                .flatten();
            by_sysid.or_else(|| maps.ref_to_id.get(&trade.order_ref).copied())
        };

        match client_id {
            Some(id) => {
                trade.client_id = id;
                bus.publish(&mut Event::TradeReturn(trade.clone()));
            }
            None => warn!(
                order_ref = %trade.order_ref,
                order_sys_id = %trade.order_sys_id,
                "unreconcilable trade return dropped"
            ),
        }
    }

    fn on_connection_status(&self, status: &ConnectionStatus) {
        if status.source != ConnectionStatus::SOURCE_TRADER
            || status.state != ConnectionState::LoggedIn
        {
            return;
        }
        let Some(pos) = status.message.find("MaxOrderRef:") else {
            return;
        };
        let digits: String = status.message[pos + "MaxOrderRef:".len()..]
            .chars()
            .take_while(char::is_ascii_digit)
            .collect();
        if let Ok(max_ref) = digits.parse::<u32>() {
            self.ids.advance_ref_floor(max_ref + 1);
            debug!(max_ref, "order ref counter synced from counter login");
        }
    }
}

/// The order hub module.
pub struct OrderHubModule {
    state: Option<Arc<HubState>>,
}

impl Default for OrderHubModule {
    fn default() -> Self {
        Self::new()
    }
}

impl OrderHubModule {
    /// Creates an unwired hub.
    #[must_use]
    pub fn new() -> Self {
        Self { state: None }
    }

    /// The hub's shared state, available after `init`.
    #[must_use]
    pub fn state(&self) -> Option<&Arc<HubState>> {
        self.state.as_ref()
    }
}

impl Module for OrderHubModule {
    fn name(&self) -> &'static str {
        "order_hub"
    }

    fn init(&mut self, ctx: &ModuleContext) -> Result<(), EngineError> {
        let node_id = ctx.param_u64("node_id", 0) as u32;
        let state = Arc::new(HubState::new(node_id));
        self.state = Some(Arc::clone(&state));
        info!(node_id, "order hub initialised");

        let (hub, bus) = (Arc::clone(&state), Arc::clone(&ctx.bus));
        ctx.bus.subscribe(Topic::OrderRequest, move |event| {
            if let Event::OrderRequest(req) = event {
                hub.on_order_request(&bus, req);
            }
        });

        let (hub, bus) = (Arc::clone(&state), Arc::clone(&ctx.bus));
        ctx.bus.subscribe(Topic::CancelRequest, move |event| {
            if let Event::CancelRequest(req) = event {
                hub.on_cancel_request(&bus, req);
            }
        });

        let (hub, bus) = (Arc::clone(&state), Arc::clone(&ctx.bus));
        ctx.bus.subscribe(Topic::RawOrderReturn, move |event| {
            if let Event::RawOrderReturn(rtn) = event {
                hub.on_raw_order(&bus, rtn);
            }
        });

        let (hub, bus) = (Arc::clone(&state), Arc::clone(&ctx.bus));
        ctx.bus.subscribe(Topic::RawTradeReturn, move |event| {
            if let Event::RawTradeReturn(trade) = event {
                hub.on_raw_trade(&bus, trade);
            }
        });

        let hub = state;
        ctx.bus.subscribe(Topic::ConnectionStatus, move |event| {
            if let Event::ConnectionStatus(status) = event {
                hub.on_connection_status(status);
            }
        });

        Ok(())
    }
}
