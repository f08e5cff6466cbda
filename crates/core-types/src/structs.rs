use crate::enums::{
    InstrumentType, Network, OrderSide, OrderType, ScheduledSwapStatus, ScheduledTradeStatus, SwapDirection,
    SwapExecutionStatus, TradeStatus,
};
use crate::error::CoreError;
use crate::status::RemoteFlags;
use crate::trigger::{SwapTrigger, TradeTrigger};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub type Id = i64;

/// A dashboard user and the venue credentials the scheduler acts with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Id,
    pub username: String,
    pub network: Network,
    #[serde(skip_serializing)]
    pub credentials: Option<VenueCredentials>,
    /// Raw venue units (satoshis).
    pub balance: Decimal,
    pub balance_usd: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VenueCredentials {
    pub api_key: String,
    pub api_secret: String,
    pub api_passphrase: String,
}

impl User {
    pub fn has_credentials(&self) -> bool {
        self.credentials
            .as_ref()
            .is_some_and(|c| !c.api_key.is_empty() && !c.api_secret.is_empty())
    }
}

/// Last known ticker for the traded symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketData {
    pub symbol: String,
    pub last_price: Decimal,
    pub mark_price: Decimal,
    pub index_price: Decimal,
    pub funding_rate: Decimal,
    pub updated_at: DateTime<Utc>,
}

/// Local mirror of a venue position or order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: Id,
    pub user_id: Id,
    pub venue_id: Option<String>,
    pub instrument: InstrumentType,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub status: TradeStatus,
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

impl Trade {
    /// The one place a trade's status changes.
    pub fn transition_to(&mut self, next: TradeStatus, now: DateTime<Utc>) -> Result<(), CoreError> {
        self.status = self.status.transition_to(next)?;
        self.updated_at = now;
        Ok(())
    }

    /// Copies the venue's view onto this row. The status only moves when the
    /// transition is legal; the returned error tells the caller it was kept.
    pub fn apply_remote(&mut self, remote: &RemoteTrade, now: DateTime<Utc>) -> Result<(), CoreError> {
        self.venue_id = Some(remote.venue_id.clone());
        self.entry_price = remote.entry_price.or(self.entry_price);
        self.exit_price = remote.exit_price;
        self.margin = remote.margin;
        self.leverage = remote.leverage;
        self.quantity = remote.quantity;
        self.take_profit = remote.take_profit;
        self.stop_loss = remote.stop_loss;
        self.pnl = remote.pnl;
        self.fee = remote.fee;
        self.liquidation_price = remote.liquidation_price;
        self.updated_at = now;
        self.transition_to(remote.status(), now)
    }
}

/// Fields needed to insert a new trade row.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTrade {
    pub user_id: Id,
    pub venue_id: Option<String>,
    pub instrument: InstrumentType,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub status: TradeStatus,
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
}

impl NewTrade {
    /// A `pending` row for an order that has not reached the venue yet.
    pub fn pending(user_id: Id, order: &OrderParams) -> Self {
        Self {
            user_id,
            venue_id: None,
            instrument: order.instrument,
            side: order.side,
            order_type: order.order_type,
            status: TradeStatus::Pending,
            entry_price: order.limit_price,
            exit_price: None,
            margin: order.margin.unwrap_or_default(),
            leverage: order.leverage.unwrap_or(Decimal::ONE),
            quantity: order.quantity.unwrap_or_default(),
            take_profit: order.take_profit,
            stop_loss: order.stop_loss,
            pnl: Decimal::ZERO,
            fee: Decimal::ZERO,
            liquidation_price: None,
            instrument_name: order.instrument_name.clone(),
            settlement: order.settlement.clone(),
        }
    }

    /// A row originated by the venue (for positions opened outside this app).
    pub fn from_remote(user_id: Id, remote: &RemoteTrade) -> Self {
        Self {
            user_id,
            venue_id: Some(remote.venue_id.clone()),
            instrument: remote.instrument,
            side: remote.side,
            order_type: remote.order_type,
            status: remote.status(),
            entry_price: remote.entry_price,
            exit_price: remote.exit_price,
            margin: remote.margin,
            leverage: remote.leverage,
            quantity: remote.quantity,
            take_profit: remote.take_profit,
            stop_loss: remote.stop_loss,
            pnl: remote.pnl,
            fee: remote.fee,
            liquidation_price: remote.liquidation_price,
            instrument_name: remote.instrument_name.clone(),
            settlement: remote.settlement.clone(),
        }
    }
}

/// A venue position normalised across futures and options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteTrade {
    pub venue_id: String,
    pub instrument: InstrumentType,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub flags: RemoteFlags,
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
}

impl RemoteTrade {
    pub fn status(&self) -> TradeStatus {
        TradeStatus::from(self.flags)
    }
}

/// Order parameters carried by a scheduled trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderParams {
    pub instrument: InstrumentType,
    pub side: OrderSide,
    pub order_type: OrderType,
    #[serde(default)]
    pub margin: Option<Decimal>,
    #[serde(default)]
    pub leverage: Option<Decimal>,
    #[serde(default)]
    pub quantity: Option<Decimal>,
    #[serde(default)]
    pub limit_price: Option<Decimal>,
    #[serde(default)]
    pub take_profit: Option<Decimal>,
    #[serde(default)]
    pub stop_loss: Option<Decimal>,
    #[serde(default)]
    pub instrument_name: Option<String>,
    #[serde(default)]
    pub settlement: Option<String>,
}

impl OrderParams {
    /// Rejects parameter sets the venue would refuse outright.
    pub fn validate(&self) -> Result<(), CoreError> {
        let invalid = |field: &str, reason: &str| Err(CoreError::InvalidInput(field.to_string(), reason.to_string()));
        match self.instrument {
            InstrumentType::Futures => {
                if self.margin.is_none() && self.quantity.is_none() {
                    return invalid("margin", "futures orders need a margin or a quantity");
                }
                if let Some(leverage) = self.leverage {
                    if leverage < Decimal::ONE {
                        return invalid("leverage", "must be at least 1");
                    }
                }
                if self.order_type == OrderType::Limit && self.limit_price.is_none() {
                    return invalid("limitPrice", "limit orders need a price");
                }
            }
            InstrumentType::Options => {
                if self.quantity.is_none_or(|q| q <= Decimal::ZERO) {
                    return invalid("quantity", "options orders need a positive quantity");
                }
                if self.instrument_name.is_none() {
                    return invalid("instrumentName", "options orders need an instrument");
                }
                if self.settlement.is_none() {
                    return invalid("settlement", "options orders need a settlement mode");
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledTrade {
    pub id: Id,
    pub user_id: Id,
    pub trigger: TradeTrigger,
    pub order: OrderParams,
    pub status: ScheduledTradeStatus,
    pub executed_trade_id: Option<Id>,
    pub error_message: Option<String>,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub executed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScheduledTrade {
    pub fn mark_triggered(&mut self, trade_id: Id, now: DateTime<Utc>) -> Result<(), CoreError> {
        self.status = self.status.transition_to(ScheduledTradeStatus::Triggered)?;
        self.executed_trade_id = Some(trade_id);
        self.executed_at = Some(now);
        self.error_message = None;
        self.updated_at = now;
        Ok(())
    }

    pub fn mark_failed(&mut self, message: impl Into<String>, now: DateTime<Utc>) -> Result<(), CoreError> {
        self.status = self.status.transition_to(ScheduledTradeStatus::Failed)?;
        self.error_message = Some(message.into());
        self.updated_at = now;
        Ok(())
    }

    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<(), CoreError> {
        self.status = self.status.transition_to(ScheduledTradeStatus::Cancelled)?;
        self.updated_at = now;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewScheduledTrade {
    pub user_id: Id,
    pub trigger: TradeTrigger,
    pub order: OrderParams,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledSwap {
    pub id: Id,
    pub user_id: Id,
    pub name: String,
    pub description: Option<String>,
    pub direction: SwapDirection,
    pub amount: Decimal,
    pub trigger: SwapTrigger,
    pub status: ScheduledSwapStatus,
    pub last_checked_at: Option<DateTime<Utc>>,
    /// Time of the last successful execution; recurring slots use it to
    /// avoid firing twice in the same window.
    pub last_executed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScheduledSwap {
    pub fn set_status(&mut self, next: ScheduledSwapStatus, now: DateTime<Utc>) -> Result<(), CoreError> {
        self.status = self.status.transition_to(next)?;
        self.updated_at = now;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewScheduledSwap {
    pub user_id: Id,
    pub name: String,
    pub description: Option<String>,
    pub direction: SwapDirection,
    pub amount: Decimal,
    pub trigger: SwapTrigger,
}

/// A completed conversion between BTC and the synthetic USD balance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Swap {
    pub id: Id,
    pub user_id: Id,
    pub venue_id: Option<String>,
    pub direction: SwapDirection,
    pub from_amount: Decimal,
    pub to_amount: Decimal,
    pub exchange_rate: Decimal,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewSwap {
    pub user_id: Id,
    pub venue_id: Option<String>,
    pub direction: SwapDirection,
    pub from_amount: Decimal,
    pub to_amount: Decimal,
    pub exchange_rate: Decimal,
}

/// Immutable audit row for one attempt to fire a scheduled swap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapExecution {
    pub id: Id,
    pub scheduled_swap_id: Id,
    pub swap_id: Option<Id>,
    pub execution_time: DateTime<Utc>,
    pub status: SwapExecutionStatus,
    pub failure_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewSwapExecution {
    pub scheduled_swap_id: Id,
    pub swap_id: Option<Id>,
    pub execution_time: DateTime<Utc>,
    pub status: SwapExecutionStatus,
    pub failure_reason: Option<String>,
}

impl NewSwapExecution {
    pub fn success(scheduled_swap_id: Id, swap_id: Id, execution_time: DateTime<Utc>) -> Self {
        Self {
            scheduled_swap_id,
            swap_id: Some(swap_id),
            execution_time,
            status: SwapExecutionStatus::Success,
            failure_reason: None,
        }
    }

    pub fn failed(scheduled_swap_id: Id, reason: impl Into<String>, execution_time: DateTime<Utc>) -> Self {
        Self {
            scheduled_swap_id,
            swap_id: None,
            execution_time,
            status: SwapExecutionStatus::Failed,
            failure_reason: Some(reason.into()),
        }
    }

    /// The venue performed the swap but its answer could not be read, so
    /// there is no swap row. `note` says why.
    pub fn unrecorded(scheduled_swap_id: Id, note: impl Into<String>, execution_time: DateTime<Utc>) -> Self {
        Self {
            scheduled_swap_id,
            swap_id: None,
            execution_time,
            status: SwapExecutionStatus::Success,
            failure_reason: Some(note.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn futures_order() -> OrderParams {
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

    fn remote(flags: RemoteFlags) -> RemoteTrade {
        RemoteTrade {
            venue_id: "abc".into(),
            instrument: InstrumentType::Futures,
            side: OrderSide::Buy,
            order_type: OrderType::Market,
            flags,
            entry_price: Some(dec!(65000)),
            exit_price: None,
            margin: dec!(10000),
            leverage: dec!(10),
            quantity: dec!(65),
            take_profit: None,
            stop_loss: Some(dec!(60000)),
            pnl: dec!(120),
            fee: dec!(7),
            liquidation_price: Some(dec!(59100)),
            instrument_name: None,
            settlement: None,
        }
    }

    #[test]
    fn limit_futures_order_needs_price() {
        let mut order = futures_order();
        order.order_type = OrderType::Limit;
        assert!(order.validate().is_err());
        order.limit_price = Some(dec!(64000));
        assert!(order.validate().is_ok());
    }

    #[test]
    fn remote_update_keeps_terminal_status() {
        let now = Utc::now();
        let mut trade = Trade {
            id: 1,
            user_id: 1,
            venue_id: Some("abc".into()),
            instrument: InstrumentType::Futures,
            side: OrderSide::Buy,
            order_type: OrderType::Market,
            status: TradeStatus::Closed,
            entry_price: Some(dec!(65000)),
            exit_price: Some(dec!(66000)),
            margin: dec!(10000),
            leverage: dec!(10),
            quantity: dec!(65),
            take_profit: None,
            stop_loss: None,
            pnl: dec!(0),
            fee: dec!(0),
            liquidation_price: None,
            instrument_name: None,
            settlement: None,
            created_at: now,
            updated_at: now,
        };
        let stale = remote(RemoteFlags { running: true, ..Default::default() });
        assert!(trade.apply_remote(&stale, now).is_err());
        assert_eq!(trade.status, TradeStatus::Closed);
        assert_eq!(trade.pnl, dec!(120));
    }

    #[test]
    fn new_trade_from_remote_uses_status_mapping() {
        let running = remote(RemoteFlags { open: true, running: true, ..Default::default() });
        let row = NewTrade::from_remote(7, &running);
        assert_eq!(row.status, TradeStatus::Running);
        assert_eq!(row.venue_id.as_deref(), Some("abc"));
    }

    #[test]
    fn pending_trade_copies_order_parameters() {
        let row = NewTrade::pending(3, &futures_order());
        assert_eq!(row.status, TradeStatus::Pending);
        assert_eq!(row.margin, dec!(10000));
        assert!(row.venue_id.is_none());
    }
}
