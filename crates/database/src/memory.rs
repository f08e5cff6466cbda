use crate::error::DbError;
use crate::repository::Repository;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use core_types::{
    Id, MarketData, Network, NewScheduledSwap, NewScheduledTrade, NewSwap, NewSwapExecution, NewTrade,
    ScheduledSwap, ScheduledSwapStatus, ScheduledTrade, ScheduledTradeStatus, Swap, SwapExecution, Trade, User,
    VenueCredentials,
};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;

#[derive(Debug, Default)]
struct State {
    next_id: Id,
    users: BTreeMap<Id, User>,
    market_data: HashMap<String, MarketData>,
    trades: BTreeMap<Id, Trade>,
    scheduled_trades: BTreeMap<Id, ScheduledTrade>,
    scheduled_swaps: BTreeMap<Id, ScheduledSwap>,
    swaps: BTreeMap<Id, Swap>,
    swap_executions: BTreeMap<Id, SwapExecution>,
}

impl State {
    fn next_id(&mut self) -> Id {
        self.next_id += 1;
        self.next_id
    }
}

/// `Repository` kept entirely in process memory. Every operation takes the
/// one lock, which makes the claim methods atomic just like the SQL version.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    state: Mutex<State>,
}

fn is_claimable(last_checked_at: Option<DateTime<Utc>>, now: DateTime<Utc>, guard: Duration) -> bool {
    last_checked_at.is_none_or(|checked| checked <= now - guard)
}

/// Mirrors the `trades_user_venue_id` unique index.
fn duplicate_venue_id(venue_id: &str) -> DbError {
    DbError::InvalidData(core_types::CoreError::InvalidInput(
        "venue_id".into(),
        format!("trade {} already exists", venue_id),
    ))
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a user. Users are owned by the account layer, so the
    /// `Repository` trait has no insert for them.
    pub async fn add_user(&self, username: &str, network: Network, credentials: Option<VenueCredentials>) -> User {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let user = User {
            id: state.next_id(),
            username: username.to_string(),
            network,
            credentials,
            balance: Decimal::ZERO,
            balance_usd: Decimal::ZERO,
            created_at: now,
            updated_at: now,
        };
        state.users.insert(user.id, user.clone());
        user
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn get_user(&self, id: Id) -> Result<Option<User>, DbError> {
        Ok(self.state.lock().await.users.get(&id).cloned())
    }

    async fn list_users_with_credentials(&self) -> Result<Vec<User>, DbError> {
        let state = self.state.lock().await;
        Ok(state.users.values().filter(|u| u.has_credentials()).cloned().collect())
    }

    async fn update_user_balance(
        &self,
        user_id: Id,
        balance: Decimal,
        balance_usd: Decimal,
        now: DateTime<Utc>,
    ) -> Result<(), DbError> {
        let mut state = self.state.lock().await;
        let user = state.users.get_mut(&user_id).ok_or(DbError::NotFound("user"))?;
        user.balance = balance;
        user.balance_usd = balance_usd;
        user.updated_at = now;
        Ok(())
    }

    async fn get_market_data(&self, symbol: &str) -> Result<Option<MarketData>, DbError> {
        Ok(self.state.lock().await.market_data.get(symbol).cloned())
    }

    async fn save_market_data(&self, data: &MarketData) -> Result<(), DbError> {
        let mut state = self.state.lock().await;
        state.market_data.insert(data.symbol.clone(), data.clone());
        Ok(())
    }

    async fn insert_trade(&self, trade: &NewTrade, now: DateTime<Utc>) -> Result<Trade, DbError> {
        let mut state = self.state.lock().await;
        if let Some(venue_id) = &trade.venue_id {
            let taken = state
                .trades
                .values()
                .any(|t| t.user_id == trade.user_id && t.venue_id.as_ref() == Some(venue_id));
            if taken {
                return Err(duplicate_venue_id(venue_id));
            }
        }
        let id = state.next_id();
        let stored = Trade {
            id,
            user_id: trade.user_id,
            venue_id: trade.venue_id.clone(),
            instrument: trade.instrument,
            side: trade.side,
            order_type: trade.order_type,
            status: trade.status,
            entry_price: trade.entry_price,
            exit_price: trade.exit_price,
            margin: trade.margin,
            leverage: trade.leverage,
            quantity: trade.quantity,
            take_profit: trade.take_profit,
            stop_loss: trade.stop_loss,
            pnl: trade.pnl,
            fee: trade.fee,
            liquidation_price: trade.liquidation_price,
            instrument_name: trade.instrument_name.clone(),
            settlement: trade.settlement.clone(),
            created_at: now,
            updated_at: now,
        };
        state.trades.insert(id, stored.clone());
        Ok(stored)
    }

    async fn update_trade(&self, trade: &Trade) -> Result<(), DbError> {
        let mut state = self.state.lock().await;
        if let Some(venue_id) = &trade.venue_id {
            let taken = state
                .trades
                .values()
                .any(|t| t.id != trade.id && t.user_id == trade.user_id && t.venue_id.as_ref() == Some(venue_id));
            if taken {
                return Err(duplicate_venue_id(venue_id));
            }
        }
        let stored = state.trades.get_mut(&trade.id).ok_or(DbError::NotFound("trade"))?;
        *stored = trade.clone();
        Ok(())
    }

    async fn get_trade(&self, id: Id) -> Result<Option<Trade>, DbError> {
        Ok(self.state.lock().await.trades.get(&id).cloned())
    }

    async fn find_trade_by_venue_id(&self, user_id: Id, venue_id: &str) -> Result<Option<Trade>, DbError> {
        let state = self.state.lock().await;
        Ok(state
            .trades
            .values()
            .find(|t| t.user_id == user_id && t.venue_id.as_deref() == Some(venue_id))
            .cloned())
    }

    async fn list_trades(&self, user_id: Id) -> Result<Vec<Trade>, DbError> {
        let state = self.state.lock().await;
        Ok(state.trades.values().rev().filter(|t| t.user_id == user_id).cloned().collect())
    }

    async fn insert_scheduled_trade(
        &self,
        schedule: &NewScheduledTrade,
        now: DateTime<Utc>,
    ) -> Result<ScheduledTrade, DbError> {
        let mut state = self.state.lock().await;
        let id = state.next_id();
        let stored = ScheduledTrade {
            id,
            user_id: schedule.user_id,
            trigger: schedule.trigger.clone(),
            order: schedule.order.clone(),
            status: ScheduledTradeStatus::Pending,
            executed_trade_id: None,
            error_message: None,
            last_checked_at: None,
            executed_at: None,
            created_at: now,
            updated_at: now,
        };
        state.scheduled_trades.insert(id, stored.clone());
        Ok(stored)
    }

    async fn get_scheduled_trade(&self, id: Id) -> Result<Option<ScheduledTrade>, DbError> {
        Ok(self.state.lock().await.scheduled_trades.get(&id).cloned())
    }

    async fn update_scheduled_trade(&self, schedule: &ScheduledTrade) -> Result<bool, DbError> {
        let mut state = self.state.lock().await;
        match state.scheduled_trades.get_mut(&schedule.id) {
            Some(stored) if stored.status == ScheduledTradeStatus::Pending => {
                *stored = ScheduledTrade {
                    last_checked_at: stored.last_checked_at,
                    created_at: stored.created_at,
                    ..schedule.clone()
                };
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn settle_scheduled_trade(&self, schedule: &ScheduledTrade) -> Result<bool, DbError> {
        let mut state = self.state.lock().await;
        match state.scheduled_trades.get_mut(&schedule.id) {
            Some(stored) if stored.status == ScheduledTradeStatus::Pending => {
                stored.status = schedule.status;
                stored.executed_trade_id = schedule.executed_trade_id;
                stored.error_message = schedule.error_message.clone();
                stored.executed_at = schedule.executed_at;
                stored.updated_at = schedule.updated_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_pending_scheduled_trades(&self) -> Result<Vec<ScheduledTrade>, DbError> {
        let state = self.state.lock().await;
        Ok(state
            .scheduled_trades
            .values()
            .filter(|s| s.status == ScheduledTradeStatus::Pending)
            .cloned()
            .collect())
    }

    async fn list_scheduled_trades(&self, user_id: Id) -> Result<Vec<ScheduledTrade>, DbError> {
        let state = self.state.lock().await;
        Ok(state
            .scheduled_trades
            .values()
            .rev()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn claim_scheduled_trade(&self, id: Id, now: DateTime<Utc>, guard: Duration) -> Result<bool, DbError> {
        let mut state = self.state.lock().await;
        match state.scheduled_trades.get_mut(&id) {
            Some(s) if s.status == ScheduledTradeStatus::Pending && is_claimable(s.last_checked_at, now, guard) => {
                s.last_checked_at = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn insert_scheduled_swap(
        &self,
        schedule: &NewScheduledSwap,
        now: DateTime<Utc>,
    ) -> Result<ScheduledSwap, DbError> {
        let mut state = self.state.lock().await;
        let id = state.next_id();
        let stored = ScheduledSwap {
            id,
            user_id: schedule.user_id,
            name: schedule.name.clone(),
            description: schedule.description.clone(),
            direction: schedule.direction,
            amount: schedule.amount,
            trigger: schedule.trigger.clone(),
            status: ScheduledSwapStatus::Active,
            last_checked_at: None,
            last_executed_at: None,
            created_at: now,
            updated_at: now,
        };
        state.scheduled_swaps.insert(id, stored.clone());
        Ok(stored)
    }

    async fn get_scheduled_swap(&self, id: Id) -> Result<Option<ScheduledSwap>, DbError> {
        Ok(self.state.lock().await.scheduled_swaps.get(&id).cloned())
    }

    async fn update_scheduled_swap(
        &self,
        schedule: &ScheduledSwap,
        expected: ScheduledSwapStatus,
    ) -> Result<bool, DbError> {
        let mut state = self.state.lock().await;
        match state.scheduled_swaps.get_mut(&schedule.id) {
            Some(stored) if stored.status == expected => {
                *stored = ScheduledSwap {
                    last_checked_at: stored.last_checked_at,
                    last_executed_at: stored.last_executed_at,
                    created_at: stored.created_at,
                    ..schedule.clone()
                };
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn record_scheduled_swap_execution(
        &self,
        id: Id,
        executed_at: DateTime<Utc>,
        complete: bool,
    ) -> Result<ScheduledSwapStatus, DbError> {
        let mut state = self.state.lock().await;
        let stored = state
            .scheduled_swaps
            .get_mut(&id)
            .ok_or(DbError::NotFound("scheduled swap"))?;
        stored.last_executed_at = Some(executed_at);
        stored.updated_at = executed_at;
        if complete && matches!(stored.status, ScheduledSwapStatus::Active | ScheduledSwapStatus::Paused) {
            stored.status = ScheduledSwapStatus::Completed;
        }
        Ok(stored.status)
    }

    async fn list_active_scheduled_swaps(&self) -> Result<Vec<ScheduledSwap>, DbError> {
        let state = self.state.lock().await;
        Ok(state
            .scheduled_swaps
            .values()
            .filter(|s| s.status == ScheduledSwapStatus::Active)
            .cloned()
            .collect())
    }

    async fn list_scheduled_swaps(&self, user_id: Id) -> Result<Vec<ScheduledSwap>, DbError> {
        let state = self.state.lock().await;
        Ok(state
            .scheduled_swaps
            .values()
            .rev()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn claim_scheduled_swap(&self, id: Id, now: DateTime<Utc>, guard: Duration) -> Result<bool, DbError> {
        let mut state = self.state.lock().await;
        match state.scheduled_swaps.get_mut(&id) {
            Some(s) if s.status == ScheduledSwapStatus::Active && is_claimable(s.last_checked_at, now, guard) => {
                s.last_checked_at = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn insert_swap(&self, swap: &NewSwap, now: DateTime<Utc>) -> Result<Swap, DbError> {
        let mut state = self.state.lock().await;
        let id = state.next_id();
        let stored = Swap {
            id,
            user_id: swap.user_id,
            venue_id: swap.venue_id.clone(),
            direction: swap.direction,
            from_amount: swap.from_amount,
            to_amount: swap.to_amount,
            exchange_rate: swap.exchange_rate,
            created_at: now,
        };
        state.swaps.insert(id, stored.clone());
        Ok(stored)
    }

    async fn insert_swap_execution(&self, execution: &NewSwapExecution) -> Result<SwapExecution, DbError> {
        let mut state = self.state.lock().await;
        let id = state.next_id();
        let stored = SwapExecution {
            id,
            scheduled_swap_id: execution.scheduled_swap_id,
            swap_id: execution.swap_id,
            execution_time: execution.execution_time,
            status: execution.status,
            failure_reason: execution.failure_reason.clone(),
        };
        state.swap_executions.insert(id, stored.clone());
        Ok(stored)
    }

    async fn list_swap_executions(&self, scheduled_swap_id: Id) -> Result<Vec<SwapExecution>, DbError> {
        let state = self.state.lock().await;
        let mut executions: Vec<SwapExecution> = state
            .swap_executions
            .values()
            .filter(|e| e.scheduled_swap_id == scheduled_swap_id)
            .cloned()
            .collect();
        executions.sort_by(|a, b| b.execution_time.cmp(&a.execution_time).then(b.id.cmp(&a.id)));
        Ok(executions)
    }
}
