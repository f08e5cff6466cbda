use crate::error::DbError;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use core_types::{
    Id, MarketData, NewScheduledSwap, NewScheduledTrade, NewSwap, NewSwapExecution, NewTrade, ScheduledSwap,
    ScheduledSwapStatus, ScheduledTrade, Swap, SwapExecution, Trade, User,
};
use rust_decimal::Decimal;

/// The storage capability the scheduler works against.
///
/// Implementations must be safe to share between tick workers. Work is
/// partitioned by schedule id through the `claim_*` methods, so no two
/// workers execute the same schedule concurrently. Owners editing a schedule
/// still race with the worker executing it.
///
/// Schedule writes are conditional on the status the caller read and return
/// `false` when a concurrent write got there first. They never move
/// `last_checked_at` (only a claim does) or a swap's `last_executed_at`
/// (only `record_scheduled_swap_execution` does).
#[async_trait]
pub trait Repository: Send + Sync {
    // --- Users ---
    async fn get_user(&self, id: Id) -> Result<Option<User>, DbError>;
    /// Users with a non-empty API key and secret.
    async fn list_users_with_credentials(&self) -> Result<Vec<User>, DbError>;
    async fn update_user_balance(
        &self,
        user_id: Id,
        balance: Decimal,
        balance_usd: Decimal,
        now: DateTime<Utc>,
    ) -> Result<(), DbError>;

    // --- Market data ---
    async fn get_market_data(&self, symbol: &str) -> Result<Option<MarketData>, DbError>;
    async fn save_market_data(&self, data: &MarketData) -> Result<(), DbError>;

    // --- Trades ---
    async fn insert_trade(&self, trade: &NewTrade, now: DateTime<Utc>) -> Result<Trade, DbError>;
    async fn update_trade(&self, trade: &Trade) -> Result<(), DbError>;
    async fn get_trade(&self, id: Id) -> Result<Option<Trade>, DbError>;
    async fn find_trade_by_venue_id(&self, user_id: Id, venue_id: &str) -> Result<Option<Trade>, DbError>;
    async fn list_trades(&self, user_id: Id) -> Result<Vec<Trade>, DbError>;

    // --- Scheduled trades ---
    async fn insert_scheduled_trade(
        &self,
        schedule: &NewScheduledTrade,
        now: DateTime<Utc>,
    ) -> Result<ScheduledTrade, DbError>;
    async fn get_scheduled_trade(&self, id: Id) -> Result<Option<ScheduledTrade>, DbError>;
    /// Rewrites the trigger, order and outcome columns of a schedule that is
    /// still `pending`.
    async fn update_scheduled_trade(&self, schedule: &ScheduledTrade) -> Result<bool, DbError>;
    /// Writes only the outcome columns (status, executed trade, error,
    /// executed_at) of a schedule that is still `pending`.
    async fn settle_scheduled_trade(&self, schedule: &ScheduledTrade) -> Result<bool, DbError>;
    async fn list_pending_scheduled_trades(&self) -> Result<Vec<ScheduledTrade>, DbError>;
    async fn list_scheduled_trades(&self, user_id: Id) -> Result<Vec<ScheduledTrade>, DbError>;
    /// Atomically stamps `last_checked_at = now` if the schedule is still
    /// `pending` and was not claimed within `guard`. Returns whether the
    /// caller now owns the execution attempt.
    async fn claim_scheduled_trade(&self, id: Id, now: DateTime<Utc>, guard: Duration) -> Result<bool, DbError>;

    // --- Scheduled swaps ---
    async fn insert_scheduled_swap(
        &self,
        schedule: &NewScheduledSwap,
        now: DateTime<Utc>,
    ) -> Result<ScheduledSwap, DbError>;
    async fn get_scheduled_swap(&self, id: Id) -> Result<Option<ScheduledSwap>, DbError>;
    /// Rewrites the editable columns and status of a swap whose stored status
    /// is still `expected`.
    async fn update_scheduled_swap(&self, schedule: &ScheduledSwap, expected: ScheduledSwapStatus)
    -> Result<bool, DbError>;
    /// Stamps `last_executed_at` after a venue swap. With `complete`, an
    /// `active` or `paused` schedule also becomes `completed`; a cancelled one
    /// keeps its status. Returns the stored status afterwards.
    async fn record_scheduled_swap_execution(
        &self,
        id: Id,
        executed_at: DateTime<Utc>,
        complete: bool,
    ) -> Result<ScheduledSwapStatus, DbError>;
    async fn list_active_scheduled_swaps(&self) -> Result<Vec<ScheduledSwap>, DbError>;
    async fn list_scheduled_swaps(&self, user_id: Id) -> Result<Vec<ScheduledSwap>, DbError>;
    /// Same contract as `claim_scheduled_trade`, for `active` swaps.
    async fn claim_scheduled_swap(&self, id: Id, now: DateTime<Utc>, guard: Duration) -> Result<bool, DbError>;

    // --- Swaps and their audit trail ---
    async fn insert_swap(&self, swap: &NewSwap, now: DateTime<Utc>) -> Result<Swap, DbError>;
    async fn insert_swap_execution(&self, execution: &NewSwapExecution) -> Result<SwapExecution, DbError>;
    /// Newest first.
    async fn list_swap_executions(&self, scheduled_swap_id: Id) -> Result<Vec<SwapExecution>, DbError>;
}
