//! A scripted venue and a seeded in-memory store for the engine tests.
#![allow(dead_code)]

use api_client::error::ApiError;
use api_client::{Balance, FuturesOrder, OptionsOrder, SwapResult, Ticker, VenueClient, VenueConnector};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use configuration::SchedulerConfig;
use core_types::{
    FuturesScope, Id, InstrumentType, MarketData, Network, NewScheduledSwap, NewScheduledTrade, NewSwap,
    NewSwapExecution, NewTrade, OrderParams, OrderSide, OrderType, RemoteFlags, RemoteTrade, ScheduledSwap,
    ScheduledSwapStatus, ScheduledTrade, Swap, SwapDirection, SwapExecution, SwapTrigger, Trade, TradeTrigger,
    User, VenueCredentials,
};
use database::{DbError, MemoryRepository, Repository};
use engine::Scheduler;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const SYMBOL: &str = "BTCUSD";

/// How the next venue call that can fail should behave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    Accept,
    Reject,
    RateLimit,
    /// The venue acts but answers with something the client cannot use.
    Unreadable,
}

impl Script {
    fn outcome(self) -> Result<(), ApiError> {
        match self {
            Script::Accept => Ok(()),
            Script::Reject => Err(ApiError::Rejected { status: 400, message: "not enough margin".into() }),
            Script::RateLimit => Err(ApiError::RateLimited("slow down".into())),
            Script::Unreadable => Err(ApiError::AcceptedUnreadable(
                "Invalid data format from API: swap returned BTC -> USD, expected USD -> BTC".into(),
            )),
        }
    }
}

pub struct MockVenue {
    pub orders: AtomicUsize,
    pub swaps: AtomicUsize,
    pub order_script: Mutex<Script>,
    pub swap_script: Mutex<Script>,
    pub positions: Mutex<Vec<RemoteTrade>>,
    pub balance: Decimal,
    pub last_price: Decimal,
    /// How long orders and swaps take to come back.
    pub latency: Mutex<std::time::Duration>,
    /// Whether a placed order shows up in the position list before the
    /// placement call returns.
    pub visible_early: AtomicBool,
    pub ticker_down: AtomicBool,
}

impl Default for MockVenue {
    fn default() -> Self {
        Self {
            orders: AtomicUsize::new(0),
            swaps: AtomicUsize::new(0),
            order_script: Mutex::new(Script::Accept),
            swap_script: Mutex::new(Script::Accept),
            positions: Mutex::new(Vec::new()),
            balance: dec!(250000),
            last_price: dec!(60000),
            latency: Mutex::new(std::time::Duration::ZERO),
            visible_early: AtomicBool::new(false),
            ticker_down: AtomicBool::new(false),
        }
    }
}

impl MockVenue {
    pub fn script_orders(&self, script: Script) {
        *self.order_script.lock().unwrap() = script;
    }

    pub fn script_swaps(&self, script: Script) {
        *self.swap_script.lock().unwrap() = script;
    }

    pub fn slow_down(&self, latency: std::time::Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    pub fn show_orders_early(&self) {
        self.visible_early.store(true, Ordering::SeqCst);
    }

    async fn respond(&self) {
        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    pub fn orders_placed(&self) -> usize {
        self.orders.load(Ordering::SeqCst)
    }

    pub fn swaps_executed(&self) -> usize {
        self.swaps.load(Ordering::SeqCst)
    }
}

pub fn running_position(venue_id: &str, pnl: Decimal) -> RemoteTrade {
    RemoteTrade {
        venue_id: venue_id.to_string(),
        instrument: InstrumentType::Futures,
        side: OrderSide::Buy,
        order_type: OrderType::Market,
        flags: RemoteFlags { running: true, ..Default::default() },
        entry_price: Some(dec!(60000)),
        exit_price: None,
        margin: dec!(10000),
        leverage: dec!(10),
        quantity: dec!(6),
        take_profit: None,
        stop_loss: None,
        pnl,
        fee: dec!(3),
        liquidation_price: Some(dec!(54500)),
        instrument_name: None,
        settlement: None,
    }
}

#[async_trait]
impl VenueClient for MockVenue {
    async fn place_futures_order(&self, order: &FuturesOrder) -> Result<RemoteTrade, ApiError> {
        let script = *self.order_script.lock().unwrap();
        let n = self.orders.fetch_add(1, Ordering::SeqCst) + 1;
        let mut position = running_position(&format!("order-{}", n), Decimal::ZERO);
        position.margin = order.margin.unwrap_or_default();
        if script != Script::Reject && script != Script::RateLimit && self.visible_early.load(Ordering::SeqCst) {
            self.positions.lock().unwrap().push(position.clone());
        }
        self.respond().await;
        script.outcome()?;
        Ok(position)
    }

    async fn place_options_order(&self, _order: &OptionsOrder) -> Result<RemoteTrade, ApiError> {
        Err(ApiError::Rejected { status: 400, message: "options are not scripted".into() })
    }

    async fn close_position(&self, _venue_id: &str) -> Result<RemoteTrade, ApiError> {
        Err(ApiError::Rejected { status: 404, message: "unknown position".into() })
    }

    async fn cancel_order(&self, _venue_id: &str) -> Result<RemoteTrade, ApiError> {
        Err(ApiError::Rejected { status: 404, message: "unknown order".into() })
    }

    async fn fetch_futures_positions(&self, scope: FuturesScope) -> Result<Vec<RemoteTrade>, ApiError> {
        let positions = self.positions.lock().unwrap().clone();
        Ok(match scope {
            FuturesScope::Running => positions,
            _ => Vec::new(),
        })
    }

    async fn fetch_options_positions(&self) -> Result<Vec<RemoteTrade>, ApiError> {
        Ok(Vec::new())
    }

    async fn fetch_ticker(&self) -> Result<Ticker, ApiError> {
        if self.ticker_down.load(Ordering::SeqCst) {
            return Err(ApiError::Network("ticker unavailable".into()));
        }
        Ok(Ticker {
            index: self.last_price,
            last_price: self.last_price,
            bid_price: self.last_price - dec!(5),
            ask_price: self.last_price + dec!(5),
            carry_fee_rate: dec!(0.0001),
        })
    }

    async fn fetch_balance(&self) -> Result<Balance, ApiError> {
        Ok(Balance { balance: self.balance, synthetic_usd_balance: Decimal::ZERO })
    }

    async fn execute_swap(&self, direction: SwapDirection, amount: Decimal) -> Result<SwapResult, ApiError> {
        let script = *self.swap_script.lock().unwrap();
        let n = self.swaps.fetch_add(1, Ordering::SeqCst) + 1;
        self.respond().await;
        script.outcome()?;
        let (in_asset, out_asset) = direction.assets();
        Ok(SwapResult {
            id: Some(format!("swap-{}", n)),
            in_asset: in_asset.to_string(),
            out_asset: out_asset.to_string(),
            in_amount: amount,
            out_amount: amount * dec!(1000),
        })
    }
}

/// Hands every user the same scripted venue. Users named in `broken` get a
/// network error instead.
pub struct MockConnector {
    pub venue: Arc<MockVenue>,
    pub broken: HashSet<String>,
}

impl VenueConnector for MockConnector {
    fn client_for(&self, user: &User) -> Result<Arc<dyn VenueClient>, ApiError> {
        if !user.has_credentials() {
            return Err(ApiError::MissingCredentials);
        }
        if self.broken.contains(&user.username) {
            return Err(ApiError::Network("connection reset".into()));
        }
        Ok(self.venue.clone())
    }

    fn public_client(&self) -> Result<Arc<dyn VenueClient>, ApiError> {
        Ok(self.venue.clone())
    }
}

pub struct Harness {
    pub repo: Arc<MemoryRepository>,
    pub venue: Arc<MockVenue>,
    pub scheduler: Arc<Scheduler>,
}

pub fn settings() -> SchedulerConfig {
    SchedulerConfig {
        duplicate_guard: std::time::Duration::from_secs(300),
        recurring_window: std::time::Duration::from_secs(300),
        ..SchedulerConfig::default()
    }
}

pub fn harness() -> Harness {
    harness_with(settings(), &[])
}

pub fn harness_with(settings: SchedulerConfig, broken: &[&str]) -> Harness {
    let repo = Arc::new(MemoryRepository::new());
    build(repo.clone(), repo, settings, broken)
}

/// A harness whose scheduler cannot store trades for `venue_id`.
pub fn harness_refusing(venue_id: &str) -> Harness {
    let repo = Arc::new(MemoryRepository::new());
    let faulty = Arc::new(FaultyRepository {
        inner: repo.clone(),
        refused_venue_id: Some(venue_id.to_string()),
        market_data_stall: None,
    });
    build(repo, faulty, settings(), &[])
}

/// A harness whose scheduler sees market data reads hang for `stall`.
pub fn harness_stalling_market_data(settings: SchedulerConfig, stall: std::time::Duration) -> Harness {
    let repo = Arc::new(MemoryRepository::new());
    let faulty = Arc::new(FaultyRepository {
        inner: repo.clone(),
        refused_venue_id: None,
        market_data_stall: Some(stall),
    });
    build(repo, faulty, settings, &[])
}

fn build(repo: Arc<MemoryRepository>, store: Arc<dyn Repository>, settings: SchedulerConfig, broken: &[&str]) -> Harness {
    let venue = Arc::new(MockVenue::default());
    let connector = Arc::new(MockConnector {
        venue: venue.clone(),
        broken: broken.iter().map(|name| name.to_string()).collect(),
    });
    let scheduler = Arc::new(Scheduler::new(store, connector, settings, SYMBOL));
    Harness { repo, venue, scheduler }
}

pub fn credentials() -> VenueCredentials {
    VenueCredentials {
        api_key: "key".into(),
        api_secret: "secret".into(),
        api_passphrase: "passphrase".into(),
    }
}

impl Harness {
    pub async fn user(&self, name: &str) -> User {
        self.repo.add_user(name, Network::Testnet, Some(credentials())).await
    }

    pub async fn market(&self, last_price: Decimal) {
        self.repo
            .save_market_data(&MarketData {
                symbol: SYMBOL.to_string(),
                last_price,
                mark_price: last_price,
                index_price: last_price,
                funding_rate: Decimal::ZERO,
                updated_at: Utc::now(),
            })
            .await
            .unwrap();
    }

    pub async fn scheduled_trade(&self, user: &User, trigger: TradeTrigger) -> ScheduledTrade {
        let schedule = NewScheduledTrade { user_id: user.id, trigger, order: market_buy() };
        self.repo.insert_scheduled_trade(&schedule, Utc::now()).await.unwrap()
    }

    pub async fn scheduled_swap(&self, user: &User, trigger: SwapTrigger) -> ScheduledSwap {
        let schedule = NewScheduledSwap {
            user_id: user.id,
            name: "stack sats".into(),
            description: None,
            direction: SwapDirection::UsdToBtc,
            amount: dec!(100),
            trigger,
        };
        self.repo.insert_scheduled_swap(&schedule, Utc::now()).await.unwrap()
    }
}

pub fn market_buy() -> OrderParams {
    OrderParams {
        instrument: InstrumentType::Futures,
        side: OrderSide::Buy,
        order_type: OrderType::Market,
        margin: Some(dec!(10000)),
        leverage: Some(dec!(10)),
        quantity: None,
        limit_price: None,
        take_profit: None,
        stop_loss: None,
        instrument_name: None,
        settlement: None,
    }
}

pub fn an_hour_ago() -> TradeTrigger {
    TradeTrigger::Date { scheduled_time: Utc::now() - Duration::hours(1) }
}

/// Delegates to the in-memory store with injected faults: inserts of a trade
/// with `refused_venue_id` fail like a row the database refuses, and market
/// data reads hang for `market_data_stall`.
pub struct FaultyRepository {
    pub inner: Arc<MemoryRepository>,
    pub refused_venue_id: Option<String>,
    pub market_data_stall: Option<std::time::Duration>,
}

#[async_trait]
impl Repository for FaultyRepository {
    async fn get_user(&self, id: Id) -> Result<Option<User>, DbError> {
        self.inner.get_user(id).await
    }
    async fn list_users_with_credentials(&self) -> Result<Vec<User>, DbError> {
        self.inner.list_users_with_credentials().await
    }
    async fn update_user_balance(
        &self,
        user_id: Id,
        balance: Decimal,
        balance_usd: Decimal,
        now: DateTime<Utc>,
    ) -> Result<(), DbError> {
        self.inner.update_user_balance(user_id, balance, balance_usd, now).await
    }
    async fn get_market_data(&self, symbol: &str) -> Result<Option<MarketData>, DbError> {
        if let Some(stall) = self.market_data_stall {
            tokio::time::sleep(stall).await;
        }
        self.inner.get_market_data(symbol).await
    }
    async fn save_market_data(&self, data: &MarketData) -> Result<(), DbError> {
        self.inner.save_market_data(data).await
    }
    async fn insert_trade(&self, trade: &NewTrade, now: DateTime<Utc>) -> Result<Trade, DbError> {
        if trade.venue_id.is_some() && trade.venue_id == self.refused_venue_id {
            return Err(DbError::InvalidData(core_types::CoreError::InvalidInput(
                "margin".into(),
                "numeric field overflow".into(),
            )));
        }
        self.inner.insert_trade(trade, now).await
    }
    async fn update_trade(&self, trade: &Trade) -> Result<(), DbError> {
        self.inner.update_trade(trade).await
    }
    async fn get_trade(&self, id: Id) -> Result<Option<Trade>, DbError> {
        self.inner.get_trade(id).await
    }
    async fn find_trade_by_venue_id(&self, user_id: Id, venue_id: &str) -> Result<Option<Trade>, DbError> {
        self.inner.find_trade_by_venue_id(user_id, venue_id).await
    }
    async fn list_trades(&self, user_id: Id) -> Result<Vec<Trade>, DbError> {
        self.inner.list_trades(user_id).await
    }
    async fn insert_scheduled_trade(
        &self,
        schedule: &NewScheduledTrade,
        now: DateTime<Utc>,
    ) -> Result<ScheduledTrade, DbError> {
        self.inner.insert_scheduled_trade(schedule, now).await
    }
    async fn get_scheduled_trade(&self, id: Id) -> Result<Option<ScheduledTrade>, DbError> {
        self.inner.get_scheduled_trade(id).await
    }
    async fn update_scheduled_trade(&self, schedule: &ScheduledTrade) -> Result<bool, DbError> {
        self.inner.update_scheduled_trade(schedule).await
    }
    async fn settle_scheduled_trade(&self, schedule: &ScheduledTrade) -> Result<bool, DbError> {
        self.inner.settle_scheduled_trade(schedule).await
    }
    async fn list_pending_scheduled_trades(&self) -> Result<Vec<ScheduledTrade>, DbError> {
        self.inner.list_pending_scheduled_trades().await
    }
    async fn list_scheduled_trades(&self, user_id: Id) -> Result<Vec<ScheduledTrade>, DbError> {
        self.inner.list_scheduled_trades(user_id).await
    }
    async fn claim_scheduled_trade(&self, id: Id, now: DateTime<Utc>, guard: Duration) -> Result<bool, DbError> {
        self.inner.claim_scheduled_trade(id, now, guard).await
    }
    async fn insert_scheduled_swap(
        &self,
        schedule: &NewScheduledSwap,
        now: DateTime<Utc>,
    ) -> Result<ScheduledSwap, DbError> {
        self.inner.insert_scheduled_swap(schedule, now).await
    }
    async fn get_scheduled_swap(&self, id: Id) -> Result<Option<ScheduledSwap>, DbError> {
        self.inner.get_scheduled_swap(id).await
    }
    async fn update_scheduled_swap(
        &self,
        schedule: &ScheduledSwap,
        expected: ScheduledSwapStatus,
    ) -> Result<bool, DbError> {
        self.inner.update_scheduled_swap(schedule, expected).await
    }
    async fn record_scheduled_swap_execution(
        &self,
        id: Id,
        executed_at: DateTime<Utc>,
        complete: bool,
    ) -> Result<ScheduledSwapStatus, DbError> {
        self.inner.record_scheduled_swap_execution(id, executed_at, complete).await
    }
    async fn list_active_scheduled_swaps(&self) -> Result<Vec<ScheduledSwap>, DbError> {
        self.inner.list_active_scheduled_swaps().await
    }
    async fn list_scheduled_swaps(&self, user_id: Id) -> Result<Vec<ScheduledSwap>, DbError> {
        self.inner.list_scheduled_swaps(user_id).await
    }
    async fn claim_scheduled_swap(&self, id: Id, now: DateTime<Utc>, guard: Duration) -> Result<bool, DbError> {
        self.inner.claim_scheduled_swap(id, now, guard).await
    }
    async fn insert_swap(&self, swap: &NewSwap, now: DateTime<Utc>) -> Result<Swap, DbError> {
        self.inner.insert_swap(swap, now).await
    }
    async fn insert_swap_execution(&self, execution: &NewSwapExecution) -> Result<SwapExecution, DbError> {
        self.inner.insert_swap_execution(execution).await
    }
    async fn list_swap_executions(&self, scheduled_swap_id: Id) -> Result<Vec<SwapExecution>, DbError> {
        self.inner.list_swap_executions(scheduled_swap_id).await
    }
}
