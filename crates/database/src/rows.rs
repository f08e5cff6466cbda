//! Row structs mirroring the tables, converted into domain types at the
//! repository boundary. Text enum columns and the trigger columns are decoded
//! here exactly once.

use crate::error::DbError;
use chrono::{DateTime, Utc};
use core_types::{
    CoreError, Id, MarketData, OrderParams, ScheduleType, ScheduledSwap, ScheduledTrade, Swap, SwapExecution,
    SwapTrigger, Trade, TradeTrigger, User, VenueCredentials,
};
use core_types::trigger::TradeTriggerColumns;
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use sqlx::FromRow;
use std::str::FromStr;

fn parse<T>(table: &'static str, id: Id, value: &str) -> Result<T, DbError>
where
    T: FromStr<Err = CoreError>,
{
    value.parse().map_err(|e: CoreError| corrupt(table, id, e))
}

fn corrupt(table: &'static str, id: Id, e: CoreError) -> DbError {
    DbError::Corrupt {
        table,
        id,
        reason: e.to_string(),
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub network: String,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub api_passphrase: Option<String>,
    pub balance: Decimal,
    pub balance_usd: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = DbError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let credentials = match (row.api_key, row.api_secret) {
            (Some(api_key), Some(api_secret)) => Some(VenueCredentials {
                api_key,
                api_secret,
                api_passphrase: row.api_passphrase.unwrap_or_default(),
            }),
            _ => None,
        };
        Ok(User {
            id: row.id,
            username: row.username,
            network: parse("users", row.id, &row.network)?,
            credentials,
            balance: row.balance,
            balance_usd: row.balance_usd,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct MarketDataRow {
    pub symbol: String,
    pub last_price: Decimal,
    pub mark_price: Decimal,
    pub index_price: Decimal,
    pub funding_rate: Decimal,
    pub updated_at: DateTime<Utc>,
}

impl From<MarketDataRow> for MarketData {
    fn from(row: MarketDataRow) -> Self {
        MarketData {
            symbol: row.symbol,
            last_price: row.last_price,
            mark_price: row.mark_price,
            index_price: row.index_price,
            funding_rate: row.funding_rate,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct TradeRow {
    pub id: i64,
    pub user_id: i64,
    pub venue_id: Option<String>,
    pub instrument: String,
    pub side: String,
    pub order_type: String,
    pub status: String,
    pub entry_price: Option<Decimal>,
    pub exit_price: Option<Decimal>,
    pub margin: Decimal,
    pub leverage: Decimal,
    pub quantity: Decimal,
    pub take_profit: Option<Decimal>,
    pub stop_loss: Option<Decimal>,
    pub pnl: Decimal,
    pub fee: Decimal,
    pub liquidation_price: Option<Decimal>,
    pub instrument_name: Option<String>,
    pub settlement: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<TradeRow> for Trade {
    type Error = DbError;

    fn try_from(row: TradeRow) -> Result<Self, Self::Error> {
        Ok(Trade {
            id: row.id,
            user_id: row.user_id,
            venue_id: row.venue_id,
            instrument: parse("trades", row.id, &row.instrument)?,
            side: parse("trades", row.id, &row.side)?,
            order_type: parse("trades", row.id, &row.order_type)?,
            status: parse("trades", row.id, &row.status)?,
            entry_price: row.entry_price,
            exit_price: row.exit_price,
            margin: row.margin,
            leverage: row.leverage,
            quantity: row.quantity,
            take_profit: row.take_profit,
            stop_loss: row.stop_loss,
            pnl: row.pnl,
            fee: row.fee,
            liquidation_price: row.liquidation_price,
            instrument_name: row.instrument_name,
            settlement: row.settlement,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct ScheduledTradeRow {
    pub id: i64,
    pub user_id: i64,
    pub trigger_type: String,
    pub scheduled_time: Option<DateTime<Utc>>,
    pub target_price_low: Option<Decimal>,
    pub target_price_high: Option<Decimal>,
    pub base_price_snapshot: Option<Decimal>,
    pub price_percentage: Option<Decimal>,
    pub instrument: String,
    pub side: String,
    pub order_type: String,
    pub margin: Option<Decimal>,
    pub leverage: Option<Decimal>,
    pub quantity: Option<Decimal>,
    pub limit_price: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub stop_loss: Option<Decimal>,
    pub instrument_name: Option<String>,
    pub settlement: Option<String>,
    pub status: String,
    pub executed_trade_id: Option<i64>,
    pub error_message: Option<String>,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub executed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<ScheduledTradeRow> for ScheduledTrade {
    type Error = DbError;

    fn try_from(row: ScheduledTradeRow) -> Result<Self, Self::Error> {
        const TABLE: &str = "scheduled_trades";
        let columns = TradeTriggerColumns {
            scheduled_time: row.scheduled_time,
            target_price_low: row.target_price_low,
            target_price_high: row.target_price_high,
            base_price_snapshot: row.base_price_snapshot,
            price_percentage: row.price_percentage,
        };
        let trigger = TradeTrigger::from_columns(parse(TABLE, row.id, &row.trigger_type)?, &columns)
            .map_err(|e| corrupt(TABLE, row.id, e))?;

        Ok(ScheduledTrade {
            id: row.id,
            user_id: row.user_id,
            trigger,
            order: OrderParams {
                instrument: parse(TABLE, row.id, &row.instrument)?,
                side: parse(TABLE, row.id, &row.side)?,
                order_type: parse(TABLE, row.id, &row.order_type)?,
                margin: row.margin,
                leverage: row.leverage,
                quantity: row.quantity,
                limit_price: row.limit_price,
                take_profit: row.take_profit,
                stop_loss: row.stop_loss,
                instrument_name: row.instrument_name,
                settlement: row.settlement,
            },
            status: parse(TABLE, row.id, &row.status)?,
            executed_trade_id: row.executed_trade_id,
            error_message: row.error_message,
            last_checked_at: row.last_checked_at,
            executed_at: row.executed_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct ScheduledSwapRow {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub schedule_type: String,
    pub direction: String,
    pub amount: Decimal,
    pub trigger_config: JsonValue,
    pub status: String,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub last_executed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<ScheduledSwapRow> for ScheduledSwap {
    type Error = DbError;

    fn try_from(row: ScheduledSwapRow) -> Result<Self, Self::Error> {
        const TABLE: &str = "scheduled_swaps";
        let schedule_type: ScheduleType = parse(TABLE, row.id, &row.schedule_type)?;
        let trigger = SwapTrigger::decode(schedule_type, row.trigger_config).map_err(|e| corrupt(TABLE, row.id, e))?;

        Ok(ScheduledSwap {
            id: row.id,
            user_id: row.user_id,
            name: row.name,
            description: row.description,
            direction: parse(TABLE, row.id, &row.direction)?,
            amount: row.amount,
            trigger,
            status: parse(TABLE, row.id, &row.status)?,
            last_checked_at: row.last_checked_at,
            last_executed_at: row.last_executed_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct SwapRow {
    pub id: i64,
    pub user_id: i64,
    pub venue_id: Option<String>,
    pub direction: String,
    pub from_amount: Decimal,
    pub to_amount: Decimal,
    pub exchange_rate: Decimal,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<SwapRow> for Swap {
    type Error = DbError;

    fn try_from(row: SwapRow) -> Result<Self, Self::Error> {
        Ok(Swap {
            id: row.id,
            user_id: row.user_id,
            venue_id: row.venue_id,
            direction: parse("swaps", row.id, &row.direction)?,
            from_amount: row.from_amount,
            to_amount: row.to_amount,
            exchange_rate: row.exchange_rate,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct SwapExecutionRow {
    pub id: i64,
    pub scheduled_swap_id: i64,
    pub swap_id: Option<i64>,
    pub execution_time: DateTime<Utc>,
    pub status: String,
    pub failure_reason: Option<String>,
}

impl TryFrom<SwapExecutionRow> for SwapExecution {
    type Error = DbError;

    fn try_from(row: SwapExecutionRow) -> Result<Self, Self::Error> {
        Ok(SwapExecution {
            id: row.id,
            scheduled_swap_id: row.scheduled_swap_id,
            swap_id: row.swap_id,
            execution_time: row.execution_time,
            status: parse("swap_executions", row.id, &row.status)?,
            failure_reason: row.failure_reason,
        })
    }
}
