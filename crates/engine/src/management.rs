//! The schedule management surface consumed by the HTTP layer.
//!
//! Every mutation checks that the schedule belongs to the calling user and
//! validates the trigger condition before anything is stored.

use crate::error::EngineError;
use crate::timed;
use chrono::{DateTime, Utc};
use configuration::SchedulerConfig;
use core_types::{
    CoreError, Id, NewScheduledSwap, NewScheduledTrade, OrderParams, ScheduledSwap, ScheduledSwapStatus,
    ScheduledTrade, ScheduledTradeStatus, SwapDirection, SwapExecution, SwapTrigger, TradeTrigger,
};
use database::Repository;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

/// The trigger condition as submitted by a user. A percentage condition may
/// omit its base price, in which case the current market price is used.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "triggerType", rename_all = "snake_case")]
pub enum TradeCondition {
    Date {
        #[serde(rename = "scheduledTime")]
        scheduled_time: DateTime<Utc>,
    },
    PriceRange {
        #[serde(rename = "targetPriceLow")]
        low: Decimal,
        #[serde(rename = "targetPriceHigh")]
        high: Decimal,
    },
    PricePercentage {
        #[serde(rename = "pricePercentage")]
        percentage: Decimal,
        #[serde(rename = "basePriceSnapshot", default)]
        base_price: Option<Decimal>,
    },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledTradeRequest {
    #[serde(flatten)]
    pub condition: TradeCondition,
    pub order: OrderParams,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledSwapRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub swap_direction: SwapDirection,
    pub amount: Decimal,
    #[serde(flatten)]
    pub trigger: SwapTrigger,
}

/// Create/update/cancel for scheduled trades and swaps.
pub struct ScheduleManager {
    repo: Arc<dyn Repository>,
    settings: SchedulerConfig,
    symbol: String,
}

impl ScheduleManager {
    pub fn new(repo: Arc<dyn Repository>, settings: SchedulerConfig, symbol: impl Into<String>) -> Self {
        Self {
            repo,
            settings,
            symbol: symbol.into(),
        }
    }

    async fn resolve_trigger(&self, condition: &TradeCondition) -> Result<TradeTrigger, EngineError> {
        let trigger = match *condition {
            TradeCondition::Date { scheduled_time } => TradeTrigger::Date { scheduled_time },
            TradeCondition::PriceRange { low, high } => TradeTrigger::PriceRange { low, high },
            TradeCondition::PricePercentage { percentage, base_price: Some(base_price) } => {
                TradeTrigger::PricePercentage { base_price, percentage }
            }
            TradeCondition::PricePercentage { percentage, base_price: None } => {
                let market = timed(
                    self.settings.repository_timeout,
                    "read market data",
                    self.repo.get_market_data(&self.symbol),
                )
                .await?
                .ok_or_else(|| EngineError::NoMarketData(self.symbol.clone()))?;
                TradeTrigger::PricePercentage { base_price: market.last_price, percentage }
            }
        };
        trigger.validate()?;
        Ok(trigger)
    }

    async fn owned_trade(&self, user_id: Id, id: Id) -> Result<ScheduledTrade, EngineError> {
        let schedule = timed(
            self.settings.repository_timeout,
            "load scheduled trade",
            self.repo.get_scheduled_trade(id),
        )
        .await?
        .ok_or(EngineError::NotFound { entity: "scheduled trade", id })?;
        if schedule.user_id != user_id {
            return Err(EngineError::Forbidden { entity: "scheduled trade", id });
        }
        Ok(schedule)
    }

    async fn owned_swap(&self, user_id: Id, id: Id) -> Result<ScheduledSwap, EngineError> {
        let schedule = timed(
            self.settings.repository_timeout,
            "load scheduled swap",
            self.repo.get_scheduled_swap(id),
        )
        .await?
        .ok_or(EngineError::NotFound { entity: "scheduled swap", id })?;
        if schedule.user_id != user_id {
            return Err(EngineError::Forbidden { entity: "scheduled swap", id });
        }
        Ok(schedule)
    }

    pub async fn create_scheduled_trade(
        &self,
        user_id: Id,
        request: ScheduledTradeRequest,
    ) -> Result<ScheduledTrade, EngineError> {
        request.order.validate()?;
        let trigger = self.resolve_trigger(&request.condition).await?;
        let schedule = NewScheduledTrade {
            user_id,
            trigger,
            order: request.order,
        };
        let created = timed(
            self.settings.repository_timeout,
            "insert scheduled trade",
            self.repo.insert_scheduled_trade(&schedule, Utc::now()),
        )
        .await?;
        info!(user_id, schedule_id = created.id, trigger = %created.trigger.trigger_type(), "Scheduled trade created.");
        Ok(created)
    }

    /// Replaces the condition and order of a schedule that has not fired yet.
    pub async fn update_scheduled_trade(
        &self,
        user_id: Id,
        id: Id,
        request: ScheduledTradeRequest,
    ) -> Result<ScheduledTrade, EngineError> {
        let mut schedule = self.owned_trade(user_id, id).await?;
        if schedule.status != ScheduledTradeStatus::Pending {
            return Err(not_editable("scheduled trade", schedule.status.as_str()));
        }
        request.order.validate()?;
        schedule.trigger = self.resolve_trigger(&request.condition).await?;
        schedule.order = request.order;
        schedule.error_message = None;
        schedule.updated_at = Utc::now();
        self.store_trade(&schedule).await?;
        Ok(schedule)
    }

    /// Cancels a pending schedule. Loses to an execution that settles first.
    pub async fn cancel_scheduled_trade(&self, user_id: Id, id: Id) -> Result<ScheduledTrade, EngineError> {
        let mut schedule = self.owned_trade(user_id, id).await?;
        schedule.cancel(Utc::now())?;
        self.store_trade(&schedule).await?;
        info!(user_id, schedule_id = id, "Scheduled trade cancelled.");
        Ok(schedule)
    }

    async fn store_trade(&self, schedule: &ScheduledTrade) -> Result<(), EngineError> {
        let stored = timed(
            self.settings.repository_timeout,
            "update scheduled trade",
            self.repo.update_scheduled_trade(schedule),
        )
        .await?;
        if !stored {
            return Err(EngineError::Conflict { entity: "scheduled trade", id: schedule.id });
        }
        Ok(())
    }

    pub async fn create_scheduled_swap(
        &self,
        user_id: Id,
        request: ScheduledSwapRequest,
    ) -> Result<ScheduledSwap, EngineError> {
        validate_swap_request(&request)?;
        let schedule = NewScheduledSwap {
            user_id,
            name: request.name,
            description: request.description,
            direction: request.swap_direction,
            amount: request.amount,
            trigger: request.trigger,
        };
        let created = timed(
            self.settings.repository_timeout,
            "insert scheduled swap",
            self.repo.insert_scheduled_swap(&schedule, Utc::now()),
        )
        .await?;
        info!(user_id, schedule_id = created.id, schedule_type = %created.trigger.schedule_type(), "Scheduled swap created.");
        Ok(created)
    }

    /// Edits a swap that is still `active` or `paused`.
    pub async fn update_scheduled_swap(
        &self,
        user_id: Id,
        id: Id,
        request: ScheduledSwapRequest,
    ) -> Result<ScheduledSwap, EngineError> {
        let mut schedule = self.owned_swap(user_id, id).await?;
        if schedule.status.is_terminal() {
            return Err(not_editable("scheduled swap", schedule.status.as_str()));
        }
        validate_swap_request(&request)?;
        schedule.name = request.name;
        schedule.description = request.description;
        schedule.direction = request.swap_direction;
        schedule.amount = request.amount;
        schedule.trigger = request.trigger;
        schedule.updated_at = Utc::now();
        self.store_swap(&schedule, schedule.status).await?;
        Ok(schedule)
    }

    pub async fn cancel_scheduled_swap(&self, user_id: Id, id: Id) -> Result<ScheduledSwap, EngineError> {
        self.move_swap(user_id, id, ScheduledSwapStatus::Cancelled).await
    }

    pub async fn pause_scheduled_swap(&self, user_id: Id, id: Id) -> Result<ScheduledSwap, EngineError> {
        self.move_swap(user_id, id, ScheduledSwapStatus::Paused).await
    }

    pub async fn resume_scheduled_swap(&self, user_id: Id, id: Id) -> Result<ScheduledSwap, EngineError> {
        self.move_swap(user_id, id, ScheduledSwapStatus::Active).await
    }

    async fn move_swap(&self, user_id: Id, id: Id, next: ScheduledSwapStatus) -> Result<ScheduledSwap, EngineError> {
        let mut schedule = self.owned_swap(user_id, id).await?;
        let expected = schedule.status;
        schedule.set_status(next, Utc::now())?;
        self.store_swap(&schedule, expected).await?;
        info!(user_id, schedule_id = id, status = %next, "Scheduled swap status changed.");
        Ok(schedule)
    }

    async fn store_swap(&self, schedule: &ScheduledSwap, expected: ScheduledSwapStatus) -> Result<(), EngineError> {
        let stored = timed(
            self.settings.repository_timeout,
            "update scheduled swap",
            self.repo.update_scheduled_swap(schedule, expected),
        )
        .await?;
        if !stored {
            return Err(EngineError::Conflict { entity: "scheduled swap", id: schedule.id });
        }
        Ok(())
    }

    /// The user's scheduled trades and swaps, newest first.
    pub async fn list_schedules(&self, user_id: Id) -> Result<(Vec<ScheduledTrade>, Vec<ScheduledSwap>), EngineError> {
        let limit = self.settings.repository_timeout;
        tokio::try_join!(
            timed(limit, "list scheduled trades", self.repo.list_scheduled_trades(user_id)),
            timed(limit, "list scheduled swaps", self.repo.list_scheduled_swaps(user_id)),
        )
    }

    /// Execution audit trail of one of the user's swaps, newest first.
    pub async fn swap_history(&self, user_id: Id, id: Id) -> Result<Vec<SwapExecution>, EngineError> {
        self.owned_swap(user_id, id).await?;
        timed(
            self.settings.repository_timeout,
            "list swap executions",
            self.repo.list_swap_executions(id),
        )
        .await
    }
}

fn validate_swap_request(request: &ScheduledSwapRequest) -> Result<(), CoreError> {
    if request.name.trim().is_empty() {
        return Err(CoreError::InvalidInput("name".into(), "must not be empty".into()));
    }
    if request.amount <= Decimal::ZERO {
        return Err(CoreError::InvalidInput("amount".into(), "must be positive".into()));
    }
    request.trigger.validate()
}

fn not_editable(entity: &'static str, status: &str) -> EngineError {
    EngineError::Domain(CoreError::InvalidTransition {
        entity,
        from: status.to_string(),
        to: "edited".to_string(),
    })
}
