//! Trigger conditions attached to schedules.
//!
//! Scheduled trades persist their condition as nullable columns and scheduled
//! swaps persist it as a JSON document keyed by `scheduleType`. Both are
//! decoded exactly once into the sum types below.

use crate::enums::{ScheduleType, TriggerType};
use crate::error::CoreError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Condition of a scheduled trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "triggerType", rename_all = "snake_case")]
pub enum TradeTrigger {
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
        #[serde(rename = "basePriceSnapshot")]
        base_price: Decimal,
        #[serde(rename = "pricePercentage")]
        percentage: Decimal,
    },
}

/// The nullable column set a `TradeTrigger` is stored in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TradeTriggerColumns {
    pub scheduled_time: Option<DateTime<Utc>>,
    pub target_price_low: Option<Decimal>,
    pub target_price_high: Option<Decimal>,
    pub base_price_snapshot: Option<Decimal>,
    pub price_percentage: Option<Decimal>,
}

impl TradeTrigger {
    pub fn trigger_type(&self) -> TriggerType {
        match self {
            TradeTrigger::Date { .. } => TriggerType::Date,
            TradeTrigger::PriceRange { .. } => TriggerType::PriceRange,
            TradeTrigger::PricePercentage { .. } => TriggerType::PricePercentage,
        }
    }

    pub fn is_price_dependent(&self) -> bool {
        !matches!(self, TradeTrigger::Date { .. })
    }

    /// Rebuilds the trigger from its columns. Exactly the field set matching
    /// `trigger_type` must be populated.
    pub fn from_columns(trigger_type: TriggerType, c: &TradeTriggerColumns) -> Result<Self, CoreError> {
        let has_date = c.scheduled_time.is_some();
        let has_range = c.target_price_low.is_some() || c.target_price_high.is_some();
        let has_pct = c.base_price_snapshot.is_some() || c.price_percentage.is_some();

        let trigger = match trigger_type {
            TriggerType::Date if !has_range && !has_pct => c.scheduled_time.map(|scheduled_time| TradeTrigger::Date { scheduled_time }),
            TriggerType::PriceRange if !has_date && !has_pct => c
                .target_price_low
                .zip(c.target_price_high)
                .map(|(low, high)| TradeTrigger::PriceRange { low, high }),
            TriggerType::PricePercentage if !has_date && !has_range => c
                .base_price_snapshot
                .zip(c.price_percentage)
                .map(|(base_price, percentage)| TradeTrigger::PricePercentage { base_price, percentage }),
            _ => None,
        };

        trigger.ok_or_else(|| {
            CoreError::InvalidCondition(format!("fields do not match trigger type '{}'", trigger_type))
        })
    }

    pub fn to_columns(&self) -> TradeTriggerColumns {
        match *self {
            TradeTrigger::Date { scheduled_time } => TradeTriggerColumns {
                scheduled_time: Some(scheduled_time),
                ..Default::default()
            },
            TradeTrigger::PriceRange { low, high } => TradeTriggerColumns {
                target_price_low: Some(low),
                target_price_high: Some(high),
                ..Default::default()
            },
            TradeTrigger::PricePercentage { base_price, percentage } => TradeTriggerColumns {
                base_price_snapshot: Some(base_price),
                price_percentage: Some(percentage),
                ..Default::default()
            },
        }
    }

    /// Checks the semantic constraints that column decoding cannot express.
    pub fn validate(&self) -> Result<(), CoreError> {
        match self {
            TradeTrigger::Date { .. } => Ok(()),
            TradeTrigger::PriceRange { low, high } => {
                if low.is_sign_negative() || low > high {
                    return Err(CoreError::InvalidCondition(format!("price range [{}, {}] is empty or negative", low, high)));
                }
                Ok(())
            }
            TradeTrigger::PricePercentage { base_price, percentage } => {
                if *base_price <= Decimal::ZERO {
                    return Err(CoreError::InvalidCondition("base price snapshot must be positive".into()));
                }
                percentage_target(*base_price, *percentage).map(|_| ())
            }
        }
    }
}

/// Price target `base * (1 + pct/100)` shared by every relative condition.
/// Fails instead of overflowing when the target is not representable.
pub fn percentage_target(base_price: Decimal, percentage: Decimal) -> Result<Decimal, CoreError> {
    percentage
        .checked_div(Decimal::ONE_HUNDRED)
        .and_then(|fraction| Decimal::ONE.checked_add(fraction))
        .and_then(|factor| base_price.checked_mul(factor))
        .ok_or_else(|| {
            CoreError::InvalidCondition(format!("{}% of {} is out of range", percentage, base_price))
        })
}

/// Condition of a scheduled swap, tagged by its schedule type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "scheduleType", content = "triggerConfig", rename_all = "snake_case")]
pub enum SwapTrigger {
    Calendar(CalendarTrigger),
    Recurring(RecurringTrigger),
    MarketCondition(MarketCondition),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarTrigger {
    pub date_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecurringInterval {
    Daily,
    Weekly,
    Monthly,
}

/// A daily/weekly/monthly slot at `hour:minute` UTC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecurringTrigger {
    pub interval: RecurringInterval,
    pub hour: u32,
    pub minute: u32,
    /// 0 = Sunday .. 6 = Saturday. Required for weekly schedules.
    #[serde(default)]
    pub day_of_week: Option<u32>,
    /// 1..=31. Required for monthly schedules.
    #[serde(default)]
    pub day_of_month: Option<u32>,
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
}

impl RecurringTrigger {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.hour > 23 || self.minute > 59 {
            return Err(CoreError::InvalidCondition(format!("invalid time of day {:02}:{:02}", self.hour, self.minute)));
        }
        match self.interval {
            RecurringInterval::Daily => {}
            RecurringInterval::Weekly => match self.day_of_week {
                Some(d) if d <= 6 => {}
                _ => return Err(CoreError::InvalidCondition("weekly schedule needs dayOfWeek 0-6".into())),
            },
            RecurringInterval::Monthly => match self.day_of_month {
                Some(d) if (1..=31).contains(&d) => {}
                _ => return Err(CoreError::InvalidCondition("monthly schedule needs dayOfMonth 1-31".into())),
            },
        }
        if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
            if start > end {
                return Err(CoreError::InvalidCondition("startDate is after endDate".into()));
            }
        }
        Ok(())
    }
}

/// Market condition of a swap schedule. The relative form wins whenever the
/// payload carries both `percentage` and `basePrice`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "MarketConditionPayload", into = "MarketConditionPayload")]
pub enum MarketCondition {
    Relative { percentage: Decimal, base_price: Decimal },
    Above { target_price: Decimal },
    Below { target_price: Decimal },
    Between { min_price: Decimal, max_price: Decimal },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceComparison {
    Above,
    Below,
    Between,
}

/// The loose wire shape of a market condition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketConditionPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<PriceComparison>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_price: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_price: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_price: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percentage: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_price: Option<Decimal>,
}

impl TryFrom<MarketConditionPayload> for MarketCondition {
    type Error = CoreError;

    fn try_from(p: MarketConditionPayload) -> Result<Self, Self::Error> {
        if let (Some(percentage), Some(base_price)) = (p.percentage, p.base_price) {
            return Ok(MarketCondition::Relative { percentage, base_price });
        }
        let missing = |field: &str| CoreError::InvalidCondition(format!("market condition is missing {}", field));
        match p.condition {
            Some(PriceComparison::Above) => Ok(MarketCondition::Above {
                target_price: p.target_price.ok_or_else(|| missing("targetPrice"))?,
            }),
            Some(PriceComparison::Below) => Ok(MarketCondition::Below {
                target_price: p.target_price.ok_or_else(|| missing("targetPrice"))?,
            }),
            Some(PriceComparison::Between) => Ok(MarketCondition::Between {
                min_price: p.min_price.ok_or_else(|| missing("minPrice"))?,
                max_price: p.max_price.ok_or_else(|| missing("maxPrice"))?,
            }),
            None => Err(missing("a condition or percentage+basePrice")),
        }
    }
}

impl From<MarketCondition> for MarketConditionPayload {
    fn from(c: MarketCondition) -> Self {
        match c {
            MarketCondition::Relative { percentage, base_price } => MarketConditionPayload {
                percentage: Some(percentage),
                base_price: Some(base_price),
                ..Default::default()
            },
            MarketCondition::Above { target_price } => MarketConditionPayload {
                condition: Some(PriceComparison::Above),
                target_price: Some(target_price),
                ..Default::default()
            },
            MarketCondition::Below { target_price } => MarketConditionPayload {
                condition: Some(PriceComparison::Below),
                target_price: Some(target_price),
                ..Default::default()
            },
            MarketCondition::Between { min_price, max_price } => MarketConditionPayload {
                condition: Some(PriceComparison::Between),
                min_price: Some(min_price),
                max_price: Some(max_price),
                ..Default::default()
            },
        }
    }
}

impl MarketCondition {
    pub fn validate(&self) -> Result<(), CoreError> {
        match self {
            MarketCondition::Relative { base_price, .. } if *base_price <= Decimal::ZERO => {
                Err(CoreError::InvalidCondition("basePrice must be positive".into()))
            }
            MarketCondition::Between { min_price, max_price } if min_price > max_price => {
                Err(CoreError::InvalidCondition(format!("minPrice {} exceeds maxPrice {}", min_price, max_price)))
            }
            MarketCondition::Relative { base_price, percentage } => percentage_target(*base_price, *percentage).map(|_| ()),
            _ => Ok(()),
        }
    }
}

impl SwapTrigger {
    pub fn schedule_type(&self) -> ScheduleType {
        match self {
            SwapTrigger::Calendar(_) => ScheduleType::Calendar,
            SwapTrigger::Recurring(_) => ScheduleType::Recurring,
            SwapTrigger::MarketCondition(_) => ScheduleType::MarketCondition,
        }
    }

    /// Decodes the stored JSON document for the given schedule type.
    pub fn decode(schedule_type: ScheduleType, config: JsonValue) -> Result<Self, CoreError> {
        let invalid = |e: serde_json::Error| CoreError::InvalidCondition(format!("{} trigger config: {}", schedule_type, e));
        Ok(match schedule_type {
            ScheduleType::Calendar => SwapTrigger::Calendar(serde_json::from_value(config).map_err(invalid)?),
            ScheduleType::Recurring => SwapTrigger::Recurring(serde_json::from_value(config).map_err(invalid)?),
            ScheduleType::MarketCondition => SwapTrigger::MarketCondition(serde_json::from_value(config).map_err(invalid)?),
        })
    }

    /// The JSON document stored next to the `schedule_type` column.
    pub fn config_json(&self) -> Result<JsonValue, CoreError> {
        let encoded = match self {
            SwapTrigger::Calendar(c) => serde_json::to_value(c),
            SwapTrigger::Recurring(r) => serde_json::to_value(r),
            SwapTrigger::MarketCondition(m) => serde_json::to_value(m),
        };
        encoded.map_err(|e| CoreError::InvalidCondition(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        match self {
            SwapTrigger::Calendar(_) => Ok(()),
            SwapTrigger::Recurring(r) => r.validate(),
            SwapTrigger::MarketCondition(m) => m.validate(),
        }
    }
}
