use crate::error::DbError;
use crate::repository::Repository;
use crate::rows::{
    MarketDataRow, ScheduledSwapRow, ScheduledTradeRow, SwapExecutionRow, SwapRow, TradeRow, UserRow,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use core_types::{
    Id, MarketData, NewScheduledSwap, NewScheduledTrade, NewSwap, NewSwapExecution, NewTrade, ScheduledSwap,
    ScheduledSwapStatus, ScheduledTrade, ScheduledTradeStatus, Swap, SwapExecution, Trade, User,
};
use rust_decimal::Decimal;
use sqlx::postgres::PgPool;

const USER_COLUMNS: &str = "id, username, network, api_key, api_secret, api_passphrase, balance, balance_usd, \
     created_at, updated_at";

const TRADE_COLUMNS: &str = "id, user_id, venue_id, instrument, side, order_type, status, entry_price, exit_price, \
     margin, leverage, quantity, take_profit, stop_loss, pnl, fee, liquidation_price, instrument_name, settlement, \
     created_at, updated_at";

const SCHEDULED_TRADE_COLUMNS: &str = "id, user_id, trigger_type, scheduled_time, target_price_low, \
     target_price_high, base_price_snapshot, price_percentage, instrument, side, order_type, margin, leverage, \
     quantity, limit_price, take_profit, stop_loss, instrument_name, settlement, status, executed_trade_id, \
     error_message, last_checked_at, executed_at, created_at, updated_at";

const SCHEDULED_SWAP_COLUMNS: &str = "id, user_id, name, description, schedule_type, direction, amount, \
     trigger_config, status, last_checked_at, last_executed_at, created_at, updated_at";

const SWAP_EXECUTION_COLUMNS: &str = "id, scheduled_swap_id, swap_id, execution_time, status, failure_reason";

/// The `DbRepository` provides the `Repository` capability on top of
/// PostgreSQL. It encapsulates all SQL and row decoding.
#[derive(Debug, Clone)]
pub struct DbRepository {
    pool: PgPool,
}

impl DbRepository {
    /// Creates a new `DbRepository` with a shared database connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_scheduled_trades(&self, sql: &str, user_id: Option<Id>) -> Result<Vec<ScheduledTrade>, DbError> {
        let mut query = sqlx::query_as::<_, ScheduledTradeRow>(sql);
        if let Some(user_id) = user_id {
            query = query.bind(user_id);
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.into_iter().map(ScheduledTrade::try_from).collect()
    }

    async fn fetch_scheduled_swaps(&self, sql: &str, user_id: Option<Id>) -> Result<Vec<ScheduledSwap>, DbError> {
        let mut query = sqlx::query_as::<_, ScheduledSwapRow>(sql);
        if let Some(user_id) = user_id {
            query = query.bind(user_id);
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.into_iter().map(ScheduledSwap::try_from).collect()
    }
}

#[async_trait]
impl Repository for DbRepository {
    async fn get_user(&self, id: Id) -> Result<Option<User>, DbError> {
        let sql = format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS);
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(User::try_from).transpose()
    }

    async fn list_users_with_credentials(&self) -> Result<Vec<User>, DbError> {
        let sql = format!(
            "SELECT {} FROM users WHERE COALESCE(api_key, '') <> '' AND COALESCE(api_secret, '') <> '' ORDER BY id",
            USER_COLUMNS
        );
        let rows = sqlx::query_as::<_, UserRow>(&sql).fetch_all(&self.pool).await?;
        rows.into_iter().map(User::try_from).collect()
    }

    async fn update_user_balance(
        &self,
        user_id: Id,
        balance: Decimal,
        balance_usd: Decimal,
        now: DateTime<Utc>,
    ) -> Result<(), DbError> {
        let result = sqlx::query("UPDATE users SET balance = $1, balance_usd = $2, updated_at = $3 WHERE id = $4")
            .bind(balance)
            .bind(balance_usd)
            .bind(now)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound("user"));
        }
        Ok(())
    }

    async fn get_market_data(&self, symbol: &str) -> Result<Option<MarketData>, DbError> {
        let row = sqlx::query_as::<_, MarketDataRow>(
            "SELECT symbol, last_price, mark_price, index_price, funding_rate, updated_at FROM market_data WHERE symbol = $1",
        )
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(MarketData::from))
    }

    /// Upserts the single snapshot row for the symbol.
    async fn save_market_data(&self, data: &MarketData) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO market_data (symbol, last_price, mark_price, index_price, funding_rate, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (symbol) DO UPDATE SET
                last_price = EXCLUDED.last_price,
                mark_price = EXCLUDED.mark_price,
                index_price = EXCLUDED.index_price,
                funding_rate = EXCLUDED.funding_rate,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&data.symbol)
        .bind(data.last_price)
        .bind(data.mark_price)
        .bind(data.index_price)
        .bind(data.funding_rate)
        .bind(data.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_trade(&self, trade: &NewTrade, now: DateTime<Utc>) -> Result<Trade, DbError> {
        let sql = format!(
            r#"
            INSERT INTO trades (
                user_id, venue_id, instrument, side, order_type, status, entry_price, exit_price,
                margin, leverage, quantity, take_profit, stop_loss, pnl, fee, liquidation_price,
                instrument_name, settlement, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $19)
            RETURNING {}
            "#,
            TRADE_COLUMNS
        );
        let row = sqlx::query_as::<_, TradeRow>(&sql)
            .bind(trade.user_id)
            .bind(&trade.venue_id)
            .bind(trade.instrument.as_str())
            .bind(trade.side.as_str())
            .bind(trade.order_type.as_str())
            .bind(trade.status.as_str())
            .bind(trade.entry_price)
            .bind(trade.exit_price)
            .bind(trade.margin)
            .bind(trade.leverage)
            .bind(trade.quantity)
            .bind(trade.take_profit)
            .bind(trade.stop_loss)
            .bind(trade.pnl)
            .bind(trade.fee)
            .bind(trade.liquidation_price)
            .bind(&trade.instrument_name)
            .bind(&trade.settlement)
            .bind(now)
            .fetch_one(&self.pool)
            .await?;
        Trade::try_from(row)
    }

    async fn update_trade(&self, trade: &Trade) -> Result<(), DbError> {
        let result = sqlx::query(
            r#"
            UPDATE trades SET
                venue_id = $1, status = $2, entry_price = $3, exit_price = $4, margin = $5, leverage = $6,
                quantity = $7, take_profit = $8, stop_loss = $9, pnl = $10, fee = $11, liquidation_price = $12,
                updated_at = $13
            WHERE id = $14
            "#,
        )
        .bind(&trade.venue_id)
        .bind(trade.status.as_str())
        .bind(trade.entry_price)
        .bind(trade.exit_price)
        .bind(trade.margin)
        .bind(trade.leverage)
        .bind(trade.quantity)
        .bind(trade.take_profit)
        .bind(trade.stop_loss)
        .bind(trade.pnl)
        .bind(trade.fee)
        .bind(trade.liquidation_price)
        .bind(trade.updated_at)
        .bind(trade.id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound("trade"));
        }
        Ok(())
    }

    async fn get_trade(&self, id: Id) -> Result<Option<Trade>, DbError> {
        let sql = format!("SELECT {} FROM trades WHERE id = $1", TRADE_COLUMNS);
        let row = sqlx::query_as::<_, TradeRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Trade::try_from).transpose()
    }

    async fn find_trade_by_venue_id(&self, user_id: Id, venue_id: &str) -> Result<Option<Trade>, DbError> {
        let sql = format!("SELECT {} FROM trades WHERE user_id = $1 AND venue_id = $2", TRADE_COLUMNS);
        let row = sqlx::query_as::<_, TradeRow>(&sql)
            .bind(user_id)
            .bind(venue_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Trade::try_from).transpose()
    }

    async fn list_trades(&self, user_id: Id) -> Result<Vec<Trade>, DbError> {
        let sql = format!("SELECT {} FROM trades WHERE user_id = $1 ORDER BY created_at DESC", TRADE_COLUMNS);
        let rows = sqlx::query_as::<_, TradeRow>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Trade::try_from).collect()
    }

    async fn insert_scheduled_trade(
        &self,
        schedule: &NewScheduledTrade,
        now: DateTime<Utc>,
    ) -> Result<ScheduledTrade, DbError> {
        let columns = schedule.trigger.to_columns();
        let order = &schedule.order;
        let sql = format!(
            r#"
            INSERT INTO scheduled_trades (
                user_id, trigger_type, scheduled_time, target_price_low, target_price_high,
                base_price_snapshot, price_percentage, instrument, side, order_type, margin, leverage,
                quantity, limit_price, take_profit, stop_loss, instrument_name, settlement, status,
                created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $20)
            RETURNING {}
            "#,
            SCHEDULED_TRADE_COLUMNS
        );
        let row = sqlx::query_as::<_, ScheduledTradeRow>(&sql)
            .bind(schedule.user_id)
            .bind(schedule.trigger.trigger_type().as_str())
            .bind(columns.scheduled_time)
            .bind(columns.target_price_low)
            .bind(columns.target_price_high)
            .bind(columns.base_price_snapshot)
            .bind(columns.price_percentage)
            .bind(order.instrument.as_str())
            .bind(order.side.as_str())
            .bind(order.order_type.as_str())
            .bind(order.margin)
            .bind(order.leverage)
            .bind(order.quantity)
            .bind(order.limit_price)
            .bind(order.take_profit)
            .bind(order.stop_loss)
            .bind(&order.instrument_name)
            .bind(&order.settlement)
            .bind(ScheduledTradeStatus::Pending.as_str())
            .bind(now)
            .fetch_one(&self.pool)
            .await?;
        ScheduledTrade::try_from(row)
    }

    async fn get_scheduled_trade(&self, id: Id) -> Result<Option<ScheduledTrade>, DbError> {
        let sql = format!("SELECT {} FROM scheduled_trades WHERE id = $1", SCHEDULED_TRADE_COLUMNS);
        let row = sqlx::query_as::<_, ScheduledTradeRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(ScheduledTrade::try_from).transpose()
    }

    async fn update_scheduled_trade(&self, schedule: &ScheduledTrade) -> Result<bool, DbError> {
        let columns = schedule.trigger.to_columns();
        let order = &schedule.order;
        let result = sqlx::query(
            r#"
            UPDATE scheduled_trades SET
                trigger_type = $1, scheduled_time = $2, target_price_low = $3, target_price_high = $4,
                base_price_snapshot = $5, price_percentage = $6, instrument = $7, side = $8, order_type = $9,
                margin = $10, leverage = $11, quantity = $12, limit_price = $13, take_profit = $14,
                stop_loss = $15, instrument_name = $16, settlement = $17, status = $18,
                executed_trade_id = $19, error_message = $20, executed_at = $21, updated_at = $22
            WHERE id = $23 AND status = 'pending'
            "#,
        )
        .bind(schedule.trigger.trigger_type().as_str())
        .bind(columns.scheduled_time)
        .bind(columns.target_price_low)
        .bind(columns.target_price_high)
        .bind(columns.base_price_snapshot)
        .bind(columns.price_percentage)
        .bind(order.instrument.as_str())
        .bind(order.side.as_str())
        .bind(order.order_type.as_str())
        .bind(order.margin)
        .bind(order.leverage)
        .bind(order.quantity)
        .bind(order.limit_price)
        .bind(order.take_profit)
        .bind(order.stop_loss)
        .bind(&order.instrument_name)
        .bind(&order.settlement)
        .bind(schedule.status.as_str())
        .bind(schedule.executed_trade_id)
        .bind(&schedule.error_message)
        .bind(schedule.executed_at)
        .bind(schedule.updated_at)
        .bind(schedule.id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn settle_scheduled_trade(&self, schedule: &ScheduledTrade) -> Result<bool, DbError> {
        let result = sqlx::query(
            r#"
            UPDATE scheduled_trades SET
                status = $1, executed_trade_id = $2, error_message = $3, executed_at = $4, updated_at = $5
            WHERE id = $6 AND status = 'pending'
            "#,
        )
        .bind(schedule.status.as_str())
        .bind(schedule.executed_trade_id)
        .bind(&schedule.error_message)
        .bind(schedule.executed_at)
        .bind(schedule.updated_at)
        .bind(schedule.id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn list_pending_scheduled_trades(&self) -> Result<Vec<ScheduledTrade>, DbError> {
        let sql = format!(
            "SELECT {} FROM scheduled_trades WHERE status = 'pending' ORDER BY id",
            SCHEDULED_TRADE_COLUMNS
        );
        self.fetch_scheduled_trades(&sql, None).await
    }

    async fn list_scheduled_trades(&self, user_id: Id) -> Result<Vec<ScheduledTrade>, DbError> {
        let sql = format!(
            "SELECT {} FROM scheduled_trades WHERE user_id = $1 ORDER BY created_at DESC",
            SCHEDULED_TRADE_COLUMNS
        );
        self.fetch_scheduled_trades(&sql, Some(user_id)).await
    }

    async fn claim_scheduled_trade(&self, id: Id, now: DateTime<Utc>, guard: Duration) -> Result<bool, DbError> {
        let result = sqlx::query(
            r#"
            UPDATE scheduled_trades SET last_checked_at = $1
            WHERE id = $2 AND status = 'pending' AND (last_checked_at IS NULL OR last_checked_at <= $3)
            "#,
        )
        .bind(now)
        .bind(id)
        .bind(now - guard)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn insert_scheduled_swap(
        &self,
        schedule: &NewScheduledSwap,
        now: DateTime<Utc>,
    ) -> Result<ScheduledSwap, DbError> {
        let config = schedule.trigger.config_json()?;
        let sql = format!(
            r#"
            INSERT INTO scheduled_swaps (
                user_id, name, description, schedule_type, direction, amount, trigger_config, status,
                created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9)
            RETURNING {}
            "#,
            SCHEDULED_SWAP_COLUMNS
        );
        let row = sqlx::query_as::<_, ScheduledSwapRow>(&sql)
            .bind(schedule.user_id)
            .bind(&schedule.name)
            .bind(&schedule.description)
            .bind(schedule.trigger.schedule_type().as_str())
            .bind(schedule.direction.as_str())
            .bind(schedule.amount)
            .bind(config)
            .bind(ScheduledSwapStatus::Active.as_str())
            .bind(now)
            .fetch_one(&self.pool)
            .await?;
        ScheduledSwap::try_from(row)
    }

    async fn get_scheduled_swap(&self, id: Id) -> Result<Option<ScheduledSwap>, DbError> {
        let sql = format!("SELECT {} FROM scheduled_swaps WHERE id = $1", SCHEDULED_SWAP_COLUMNS);
        let row = sqlx::query_as::<_, ScheduledSwapRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(ScheduledSwap::try_from).transpose()
    }

    async fn update_scheduled_swap(
        &self,
        schedule: &ScheduledSwap,
        expected: ScheduledSwapStatus,
    ) -> Result<bool, DbError> {
        let config = schedule.trigger.config_json()?;
        let result = sqlx::query(
            r#"
            UPDATE scheduled_swaps SET
                name = $1, description = $2, schedule_type = $3, direction = $4, amount = $5,
                trigger_config = $6, status = $7, updated_at = $8
            WHERE id = $9 AND status = $10
            "#,
        )
        .bind(&schedule.name)
        .bind(&schedule.description)
        .bind(schedule.trigger.schedule_type().as_str())
        .bind(schedule.direction.as_str())
        .bind(schedule.amount)
        .bind(config)
        .bind(schedule.status.as_str())
        .bind(schedule.updated_at)
        .bind(schedule.id)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn record_scheduled_swap_execution(
        &self,
        id: Id,
        executed_at: DateTime<Utc>,
        complete: bool,
    ) -> Result<ScheduledSwapStatus, DbError> {
        let status: Option<String> = sqlx::query_scalar(
            r#"
            UPDATE scheduled_swaps SET
                last_executed_at = $1, updated_at = $1,
                status = CASE WHEN $2 AND status IN ('active', 'paused') THEN 'completed' ELSE status END
            WHERE id = $3
            RETURNING status
            "#,
        )
        .bind(executed_at)
        .bind(complete)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        let status = status.ok_or(DbError::NotFound("scheduled swap"))?;
        Ok(status.parse()?)
    }

    async fn list_active_scheduled_swaps(&self) -> Result<Vec<ScheduledSwap>, DbError> {
        let sql = format!(
            "SELECT {} FROM scheduled_swaps WHERE status = 'active' ORDER BY id",
            SCHEDULED_SWAP_COLUMNS
        );
        self.fetch_scheduled_swaps(&sql, None).await
    }

    async fn list_scheduled_swaps(&self, user_id: Id) -> Result<Vec<ScheduledSwap>, DbError> {
        let sql = format!(
            "SELECT {} FROM scheduled_swaps WHERE user_id = $1 ORDER BY created_at DESC",
            SCHEDULED_SWAP_COLUMNS
        );
        self.fetch_scheduled_swaps(&sql, Some(user_id)).await
    }

    async fn claim_scheduled_swap(&self, id: Id, now: DateTime<Utc>, guard: Duration) -> Result<bool, DbError> {
        let result = sqlx::query(
            r#"
            UPDATE scheduled_swaps SET last_checked_at = $1
            WHERE id = $2 AND status = 'active' AND (last_checked_at IS NULL OR last_checked_at <= $3)
            "#,
        )
        .bind(now)
        .bind(id)
        .bind(now - guard)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn insert_swap(&self, swap: &NewSwap, now: DateTime<Utc>) -> Result<Swap, DbError> {
        let row = sqlx::query_as::<_, SwapRow>(
            r#"
            INSERT INTO swaps (user_id, venue_id, direction, from_amount, to_amount, exchange_rate, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, user_id, venue_id, direction, from_amount, to_amount, exchange_rate, created_at
            "#,
        )
        .bind(swap.user_id)
        .bind(&swap.venue_id)
        .bind(swap.direction.as_str())
        .bind(swap.from_amount)
        .bind(swap.to_amount)
        .bind(swap.exchange_rate)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Swap::try_from(row)
    }

    async fn insert_swap_execution(&self, execution: &NewSwapExecution) -> Result<SwapExecution, DbError> {
        let sql = format!(
            r#"
            INSERT INTO swap_executions (scheduled_swap_id, swap_id, execution_time, status, failure_reason)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {}
            "#,
            SWAP_EXECUTION_COLUMNS
        );
        let row = sqlx::query_as::<_, SwapExecutionRow>(&sql)
            .bind(execution.scheduled_swap_id)
            .bind(execution.swap_id)
            .bind(execution.execution_time)
            .bind(execution.status.as_str())
            .bind(&execution.failure_reason)
            .fetch_one(&self.pool)
            .await?;
        SwapExecution::try_from(row)
    }

    async fn list_swap_executions(&self, scheduled_swap_id: Id) -> Result<Vec<SwapExecution>, DbError> {
        let sql = format!(
            "SELECT {} FROM swap_executions WHERE scheduled_swap_id = $1 ORDER BY execution_time DESC, id DESC",
            SWAP_EXECUTION_COLUMNS
        );
        let rows = sqlx::query_as::<_, SwapExecutionRow>(&sql)
            .bind(scheduled_swap_id)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(SwapExecution::try_from).collect()
    }
}
