//! Position reconciler.
//!
//! Folds trade returns and periodic exchange query replies into
//! per-account, per-instrument position state, honouring the SHFE/INE
//! close-today semantics, and republishes the merged detail after every
//! change. A 1 Hz timer task dumps the whole map to a JSON file for
//! out-of-process observability (plus one final dump on stop), and the
//! same timer wheel drives the periodic position/account queries with a
//! phase offset so the exchange's one-query-per-second cap is respected.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Local, Utc};
use parking_lot::Mutex;
use serde_json::json;
use tracing::{debug, info, warn};

use sirocco_core::bus::{Event, Topic};
use sirocco_core::data::{
    uses_close_today, CacheReset, Direction, OffsetFlag, PositionDate, PositionDetail,
    PositionSide, QueryRequest, TradeReturn,
};
use sirocco_core::error::EngineError;
use sirocco_core::symbols;

use crate::module::{Module, ModuleContext};

/// Default phase gap between the position query and the account query.
const ACCOUNT_QUERY_OFFSET: u64 = 3;

type PositionMap = HashMap<String, HashMap<u64, PositionDetail>>;

/// Shared reconciler state.
pub struct PositionState {
    positions: Mutex<PositionMap>,
    dump_path: PathBuf,
}

impl PositionState {
    fn new(dump_path: PathBuf) -> Self {
        Self {
            positions: Mutex::new(HashMap::new()),
            dump_path,
        }
    }

    /// Returns a copy of the detail for an (account, instrument) pair.
    #[must_use]
    pub fn position(&self, account: &str, instrument_id: u64) -> Option<PositionDetail> {
        self.positions
            .lock()
            .get(account)
            .and_then(|by_instrument| by_instrument.get(&instrument_id))
            .cloned()
    }

    /// Seeds a detail directly (tests and recovery tooling).
    pub fn seed(&self, detail: PositionDetail) {
        self.positions
            .lock()
            .entry(detail.account_id.clone())
            .or_default()
            .insert(detail.instrument_id, detail);
    }

    fn on_trade(&self, trade: &TradeReturn) -> Option<PositionDetail> {
        let mut instrument_id = trade.instrument_id;
        if instrument_id == 0 {
            instrument_id = symbols::global().get_id(&trade.ticker);
        }

        let mut positions = self.positions.lock();
        let detail = positions
            .entry(trade.account_id.clone())
            .or_default()
            .entry(instrument_id)
            .or_insert_with(|| PositionDetail {
                account_id: trade.account_id.clone(),
                ticker: trade.ticker.clone(),
                instrument_id,
                exchange_id: trade.exchange_id.clone(),
                ..PositionDetail::default()
            });
        if detail.exchange_id.is_empty() {
            detail.exchange_id = trade.exchange_id.clone();
        }

        apply_trade(detail, trade);
        Some(detail.clone())
    }

    fn on_query_reply(&self, reply: &PositionDetail) -> Option<PositionDetail> {
        if reply.instrument_id == 0 && reply.ticker.is_empty() {
            return None;
        }

        let mut positions = self.positions.lock();
        let detail = positions
            .entry(reply.account_id.clone())
            .or_default()
            .entry(reply.instrument_id)
            .or_insert_with(|| PositionDetail {
                account_id: reply.account_id.clone(),
                ticker: reply.ticker.clone(),
                instrument_id: reply.instrument_id,
                exchange_id: reply.exchange_id.clone(),
                ..PositionDetail::default()
            });
        if detail.exchange_id.is_empty() {
            detail.exchange_id = reply.exchange_id.clone();
        }

        // SHFE/INE report today and yesterday as separate two-phase
        // replies; everywhere else one reply replaces the whole side.
        let date = if uses_close_today(&reply.exchange_id) {
            reply.position_date
        } else {
            PositionDate::Both
        };

        match reply.direction {
            PositionSide::Long | PositionSide::Net => {
                match date {
                    PositionDate::Today => detail.long_today = reply.long_today,
                    PositionDate::Yesterday => detail.long_yesterday = reply.long_yesterday,
                    PositionDate::Both => {
                        detail.long_today = reply.long_today;
                        detail.long_yesterday = reply.long_yesterday;
                    }
                }
                detail.long_avg_price = reply.long_avg_price;
                detail.long_pnl = reply.long_pnl;
            }
            PositionSide::Short => {
                match date {
                    PositionDate::Today => detail.short_today = reply.short_today,
                    PositionDate::Yesterday => detail.short_yesterday = reply.short_yesterday,
                    PositionDate::Both => {
                        detail.short_today = reply.short_today;
                        detail.short_yesterday = reply.short_yesterday;
                    }
                }
                detail.short_avg_price = reply.short_avg_price;
                detail.short_pnl = reply.short_pnl;
            }
        }
        detail.net_pnl = detail.long_pnl + detail.short_pnl;

        Some(detail.clone())
    }

    fn on_cache_reset(&self, reset: &CacheReset) {
        if !reset.resets_positions() {
            return;
        }
        let mut positions = self.positions.lock();
        if reset.account_id.is_empty() {
            positions.clear();
        } else {
            positions.remove(&reset.account_id);
        }
        info!(
            account = %reset.account_id,
            trading_day = reset.trading_day,
            reason = %reset.reason,
            "position cache reset"
        );
    }

    /// Writes the whole position map to the dump file (temp + rename).
    pub fn dump(&self) {
        let accounts: Vec<serde_json::Value> = {
            let positions = self.positions.lock();
            let mut account_ids: Vec<&String> = positions.keys().collect();
            account_ids.sort();
            account_ids
                .into_iter()
                .map(|account| {
                    let by_instrument = &positions[account];
                    let mut details: Vec<&PositionDetail> = by_instrument.values().collect();
                    details.sort_by_key(|d| d.instrument_id);
                    json!({
                        "account_id": account,
                        "positions": details,
                    })
                })
                .collect()
        };

        let payload = json!({
            "accounts": accounts,
            "timestamp": Utc::now().timestamp(),
            "update_time": Local::now().format("%H:%M:%S").to_string(),
        });

        let tmp = self.dump_path.with_extension("json.tmp");
        let rendered = match serde_json::to_string_pretty(&payload) {
            Ok(rendered) => rendered,
            Err(e) => {
                warn!(error = %e, "position dump serialization failed");
                return;
            }
        };
        if let Err(e) =
            std::fs::write(&tmp, rendered).and_then(|()| std::fs::rename(&tmp, &self.dump_path))
        {
            warn!(path = %self.dump_path.display(), error = %e, "position dump failed");
        }
    }
}

/// Applies one trade to a detail under the exchange's close semantics.
fn apply_trade(detail: &mut PositionDetail, trade: &TradeReturn) {
    let close_today_exchange = uses_close_today(&detail.exchange_id);
    let volume = trade.volume;

    match (trade.direction, trade.offset) {
        (Direction::Buy, OffsetFlag::Open) => detail.long_today += volume,
        (Direction::Sell, OffsetFlag::Open) => detail.short_today += volume,

        // Sell closes the long side.
        (Direction::Sell, OffsetFlag::CloseToday) => detail.long_today -= volume,
        (Direction::Sell, OffsetFlag::Close) => {
            if close_today_exchange {
                // Close means close-yesterday, exactly.
                detail.long_yesterday -= volume;
            } else {
                let from_yesterday = detail.long_yesterday.min(volume);
                detail.long_yesterday -= from_yesterday;
                detail.long_today -= volume - from_yesterday;
            }
        }

        // Buy closes the short side.
        (Direction::Buy, OffsetFlag::CloseToday) => detail.short_today -= volume,
        (Direction::Buy, OffsetFlag::Close) => {
            if close_today_exchange {
                detail.short_yesterday -= volume;
            } else {
                let from_yesterday = detail.short_yesterday.min(volume);
                detail.short_yesterday -= from_yesterday;
                detail.short_today -= volume - from_yesterday;
            }
        }
    }

    // A leg driven negative means upstream state was inconsistent; clamp
    // and keep going.
    for leg in [
        &mut detail.long_today,
        &mut detail.long_yesterday,
        &mut detail.short_today,
        &mut detail.short_yesterday,
    ] {
        if *leg < 0 {
            warn!(
                ticker = %detail.ticker,
                account = %detail.account_id,
                "position leg clamped to zero"
            );
            *leg = 0;
        }
    }

    debug!(
        ticker = %detail.ticker,
        long_td = detail.long_today,
        long_yd = detail.long_yesterday,
        short_td = detail.short_today,
        short_yd = detail.short_yesterday,
        "position updated"
    );
}

/// The position reconciler module.
pub struct PositionModule {
    state: Option<Arc<PositionState>>,
}

impl Default for PositionModule {
    fn default() -> Self {
        Self::new()
    }
}

impl PositionModule {
    /// Creates an unwired reconciler.
    #[must_use]
    pub fn new() -> Self {
        Self { state: None }
    }

    /// The reconciler's shared state, available after `init`.
    #[must_use]
    pub fn state(&self) -> Option<&Arc<PositionState>> {
        self.state.as_ref()
    }
}

impl Module for PositionModule {
    fn name(&self) -> &'static str {
        "position"
    }

    fn init(&mut self, ctx: &ModuleContext) -> Result<(), EngineError> {
        let dump_path = PathBuf::from(ctx.param_or("dump_path", "./data/pos.json"));
        if let Some(parent) = dump_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).ok();
            }
        }
        let state = Arc::new(PositionState::new(dump_path.clone()));
        self.state = Some(Arc::clone(&state));
        info!(dump = %dump_path.display(), "position reconciler initialised");

        let (positions, bus) = (Arc::clone(&state), Arc::clone(&ctx.bus));
        ctx.bus.subscribe(Topic::TradeReturn, move |event| {
            if let Event::TradeReturn(trade) = event {
                if let Some(detail) = positions.on_trade(trade) {
                    bus.publish(&mut Event::PositionUpdate(detail));
                }
            }
        });

        let (positions, bus) = (Arc::clone(&state), Arc::clone(&ctx.bus));
        ctx.bus.subscribe(Topic::PositionReply, move |event| {
            if let Event::PositionReply(reply) = event {
                if let Some(detail) = positions.on_query_reply(reply) {
                    bus.publish(&mut Event::PositionUpdate(detail));
                }
            }
        });

        let positions = Arc::clone(&state);
        ctx.bus.subscribe(Topic::CacheReset, move |event| {
            if let Event::CacheReset(reset) = event {
                positions.on_cache_reset(reset);
            }
        });

        // 1 Hz dump for out-of-process observability.
        let positions = Arc::clone(&state);
        ctx.timer.add_timer(1, 0, move || positions.dump());

        // Periodic queries, phase-staggered so the position and account
        // requests never land on the same second.
        let query_interval = ctx.param_u64("query_interval", 0);
        if query_interval > 0 {
            let query_phase = ctx.param_u64("query_phase", 0);
            let account = ctx.param_or("account", "");

            let (bus, request_account) = (Arc::clone(&ctx.bus), account.clone());
            ctx.timer.add_timer(query_interval, query_phase, move || {
                bus.publish(&mut Event::QueryPositions(QueryRequest {
                    account_id: request_account.clone(),
                }));
            });

            let bus = Arc::clone(&ctx.bus);
            ctx.timer.add_timer(
                query_interval,
                query_phase + ACCOUNT_QUERY_OFFSET,
                move || {
                    bus.publish(&mut Event::QueryAccount(QueryRequest {
                        account_id: account.clone(),
                    }));
                },
            );
        }

        Ok(())
    }

    fn stop(&mut self) {
        if let Some(state) = &self.state {
            state.dump();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sirocco_core::bus::EventBus;
    use std::collections::BTreeMap;
    use std::sync::atomic::AtomicBool;

    use crate::timer::TimerService;

    fn wire(dump_name: &str) -> (Arc<EventBus>, Arc<PositionState>, TimerService) {
        let bus = Arc::new(EventBus::new());
        let timer = TimerService::new();
        let ctx = ModuleContext {
            bus: Arc::clone(&bus),
            timer: timer.clone(),
            running: Arc::new(AtomicBool::new(true)),
            params: BTreeMap::from([(
                "dump_path".to_string(),
                std::env::temp_dir()
                    .join(format!("sirocco_pos_{dump_name}_{}.json", std::process::id()))
                    .display()
                    .to_string(),
            )]),
            raw_config: None,
        };
        let mut module = PositionModule::new();
        module.init(&ctx).unwrap();
        let state = Arc::clone(module.state().unwrap());
        (bus, state, timer)
    }

    fn trade(
        exchange: &str,
        ticker: &str,
        direction: Direction,
        offset: OffsetFlag,
        volume: i32,
    ) -> TradeReturn {
        TradeReturn {
            account_id: "A".to_string(),
            ticker: ticker.to_string(),
            instrument_id: 1,
            exchange_id: exchange.to_string(),
            direction,
            offset,
            price: 100.0,
            volume,
            ..TradeReturn::default()
        }
    }

    fn seed(state: &PositionState, exchange: &str, ticker: &str, long_td: i32, long_yd: i32) {
        state.seed(PositionDetail {
            account_id: "A".to_string(),
            ticker: ticker.to_string(),
            instrument_id: 1,
            exchange_id: exchange.to_string(),
            long_today: long_td,
            long_yesterday: long_yd,
            ..PositionDetail::default()
        });
    }

    #[test]
    fn test_open_adds_to_today() {
        let (bus, state, _timer) = wire("open");
        bus.publish(&mut Event::TradeReturn(trade(
            "SHFE",
            "rb2501",
            Direction::Buy,
            OffsetFlag::Open,
            2,
        )));
        let pos = state.position("A", 1).unwrap();
        assert_eq!(pos.long_today, 2);
        assert_eq!(pos.long_yesterday, 0);

        bus.publish(&mut Event::TradeReturn(trade(
            "SHFE",
            "rb2501",
            Direction::Sell,
            OffsetFlag::Open,
            1,
        )));
        let pos = state.position("A", 1).unwrap();
        assert_eq!(pos.short_today, 1);
    }

    /// SHFE close-yesterday is exact; DCE close drains yesterday first
    /// and overflows into today.
    #[test]
    fn test_shfe_vs_dce_close_semantics() {
        let (bus, state, _timer) = wire("close");

        seed(&state, "SHFE", "rb2501", 2, 3);
        bus.publish(&mut Event::TradeReturn(trade(
            "SHFE",
            "rb2501",
            Direction::Sell,
            OffsetFlag::Close,
            2,
        )));
        let pos = state.position("A", 1).unwrap();
        assert_eq!(pos.long_today, 2);
        assert_eq!(pos.long_yesterday, 1);

        seed(&state, "DCE", "i2501", 2, 3);
        bus.publish(&mut Event::TradeReturn(trade(
            "DCE",
            "i2501",
            Direction::Sell,
            OffsetFlag::Close,
            4,
        )));
        let pos = state.position("A", 1).unwrap();
        assert_eq!(pos.long_today, 1);
        assert_eq!(pos.long_yesterday, 0);
    }

    #[test]
    fn test_close_today_subtracts_today_exactly() {
        let (bus, state, _timer) = wire("close_today");
        seed(&state, "SHFE", "rb2501", 5, 3);
        bus.publish(&mut Event::TradeReturn(trade(
            "SHFE",
            "rb2501",
            Direction::Sell,
            OffsetFlag::CloseToday,
            4,
        )));
        let pos = state.position("A", 1).unwrap();
        assert_eq!(pos.long_today, 1);
        assert_eq!(pos.long_yesterday, 3);
    }

    #[test]
    fn test_negative_legs_clamped() {
        let (bus, state, _timer) = wire("clamp");
        seed(&state, "SHFE", "rb2501", 1, 0);
        bus.publish(&mut Event::TradeReturn(trade(
            "SHFE",
            "rb2501",
            Direction::Sell,
            OffsetFlag::CloseToday,
            5,
        )));
        let pos = state.position("A", 1).unwrap();
        assert_eq!(pos.long_today, 0);
        assert_eq!(pos.long_yesterday, 0);
    }

    #[test]
    fn test_buy_close_reduces_short_side() {
        let (bus, state, _timer) = wire("short_close");
        state.seed(PositionDetail {
            account_id: "A".to_string(),
            ticker: "i2501".to_string(),
            instrument_id: 1,
            exchange_id: "DCE".to_string(),
            short_today: 2,
            short_yesterday: 3,
            ..PositionDetail::default()
        });
        bus.publish(&mut Event::TradeReturn(trade(
            "DCE",
            "i2501",
            Direction::Buy,
            OffsetFlag::Close,
            4,
        )));
        let pos = state.position("A", 1).unwrap();
        assert_eq!(pos.short_today, 1);
        assert_eq!(pos.short_yesterday, 0);
    }

    fn reply(
        exchange: &str,
        side: PositionSide,
        date: PositionDate,
        today: i32,
        yesterday: i32,
        pnl: f64,
    ) -> PositionDetail {
        let mut detail = PositionDetail {
            account_id: "A".to_string(),
            ticker: "rb2501".to_string(),
            instrument_id: 1,
            exchange_id: exchange.to_string(),
            direction: side,
            position_date: date,
            ..PositionDetail::default()
        };
        match side {
            PositionSide::Long | PositionSide::Net => {
                detail.long_today = today;
                detail.long_yesterday = yesterday;
                detail.long_pnl = pnl;
            }
            PositionSide::Short => {
                detail.short_today = today;
                detail.short_yesterday = yesterday;
                detail.short_pnl = pnl;
            }
        }
        detail
    }

    /// SHFE replies land bucket by bucket; each phase replaces only its
    /// bucket, and replaying a reply is idempotent.
    #[test]
    fn test_query_merge_two_phase_and_idempotent() {
        let (bus, state, _timer) = wire("query");

        bus.publish(&mut Event::PositionReply(reply(
            "SHFE",
            PositionSide::Long,
            PositionDate::Today,
            4,
            0,
            10.0,
        )));
        bus.publish(&mut Event::PositionReply(reply(
            "SHFE",
            PositionSide::Long,
            PositionDate::Yesterday,
            0,
            6,
            12.0,
        )));

        let pos = state.position("A", 1).unwrap();
        assert_eq!(pos.long_today, 4);
        assert_eq!(pos.long_yesterday, 6);
        assert_eq!(pos.long_pnl, 12.0);
        assert_eq!(pos.net_pnl, 12.0);

        // Applying the same reply twice changes nothing.
        bus.publish(&mut Event::PositionReply(reply(
            "SHFE",
            PositionSide::Long,
            PositionDate::Yesterday,
            0,
            6,
            12.0,
        )));
        let replayed = state.position("A", 1).unwrap();
        assert_eq!(replayed, pos);
    }

    #[test]
    fn test_query_merge_full_side_replace() {
        let (bus, state, _timer) = wire("query_full");
        seed(&state, "DCE", "i2501", 9, 9);

        // Non-SHFE: one reply replaces the side regardless of the tag.
        bus.publish(&mut Event::PositionReply(reply(
            "DCE",
            PositionSide::Long,
            PositionDate::Today,
            2,
            3,
            5.0,
        )));
        let pos = state.position("A", 1).unwrap();
        assert_eq!(pos.long_today, 2);
        assert_eq!(pos.long_yesterday, 3);

        bus.publish(&mut Event::PositionReply(reply(
            "DCE",
            PositionSide::Short,
            PositionDate::Both,
            1,
            0,
            -2.0,
        )));
        let pos = state.position("A", 1).unwrap();
        assert_eq!(pos.short_today, 1);
        assert_eq!(pos.net_pnl, 3.0);
    }

    #[test]
    fn test_cache_reset_scopes() {
        let (bus, state, _timer) = wire("reset");
        seed(&state, "SHFE", "rb2501", 1, 1);
        state.seed(PositionDetail {
            account_id: "B".to_string(),
            instrument_id: 2,
            ..PositionDetail::default()
        });

        // Reset type without the positions bit: no-op.
        bus.publish(&mut Event::CacheReset(CacheReset {
            account_id: String::new(),
            reset_type: 0b10,
            ..CacheReset::default()
        }));
        assert!(state.position("A", 1).is_some());

        // Account-scoped purge.
        bus.publish(&mut Event::CacheReset(CacheReset {
            account_id: "A".to_string(),
            reset_type: 1,
            ..CacheReset::default()
        }));
        assert!(state.position("A", 1).is_none());
        assert!(state.position("B", 2).is_some());

        // Empty account purges everything.
        bus.publish(&mut Event::CacheReset(CacheReset {
            reset_type: 1,
            ..CacheReset::default()
        }));
        assert!(state.position("B", 2).is_none());
    }

    #[test]
    fn test_updates_republished() {
        let (bus, state, _timer) = wire("republish");
        let updates = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&updates);
        bus.subscribe(Topic::PositionUpdate, move |event| {
            if let Event::PositionUpdate(detail) = event {
                sink.lock().push(detail.clone());
            }
        });

        bus.publish(&mut Event::TradeReturn(trade(
            "SHFE",
            "rb2501",
            Direction::Buy,
            OffsetFlag::Open,
            2,
        )));
        let seen = updates.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].long_today, 2);
        drop(seen);
        let _ = state;
    }

    #[test]
    fn test_dump_writes_json() {
        let (bus, state, timer) = wire("dump");
        bus.publish(&mut Event::TradeReturn(trade(
            "SHFE",
            "rb2501",
            Direction::Buy,
            OffsetFlag::Open,
            2,
        )));
        timer.tick();

        let content = std::fs::read_to_string(&state.dump_path).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(parsed["accounts"][0]["account_id"], "A");
        assert_eq!(parsed["accounts"][0]["positions"][0]["long_today"], 2);
        assert!(parsed["timestamp"].as_i64().unwrap() > 0);
        std::fs::remove_file(&state.dump_path).ok();
    }

    #[test]
    fn test_query_timers_staggered() {
        let bus = Arc::new(EventBus::new());
        let timer = TimerService::new();
        let ctx = ModuleContext {
            bus: Arc::clone(&bus),
            timer: timer.clone(),
            running: Arc::new(AtomicBool::new(true)),
            params: BTreeMap::from([
                ("query_interval".to_string(), "10".to_string()),
                (
                    "dump_path".to_string(),
                    std::env::temp_dir()
                        .join(format!("sirocco_pos_stagger_{}.json", std::process::id()))
                        .display()
                        .to_string(),
                ),
            ]),
            raw_config: None,
        };
        let mut module = PositionModule::new();
        module.init(&ctx).unwrap();

        let fired = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&fired);
        let clock = timer.clone();
        bus.subscribe(Topic::QueryPositions, move |_| {
            sink.lock().push(("pos", clock.total_seconds()));
        });
        let sink = Arc::clone(&fired);
        let clock = timer.clone();
        bus.subscribe(Topic::QueryAccount, move |_| {
            sink.lock().push(("acc", clock.total_seconds()));
        });

        for _ in 0..13 {
            timer.tick();
        }
        let fired = fired.lock();
        assert!(fired.contains(&("pos", 10)));
        assert!(fired.contains(&("acc", 3)));
        assert!(fired.contains(&("acc", 13)));
        std::fs::remove_file(std::env::temp_dir().join(format!(
            "sirocco_pos_stagger_{}.json",
            std::process::id()
        )))
        .ok();
    }
}
