//! The Trigger Evaluator: pure decisions over a schedule's condition, the
//! clock and the current price. Nothing here touches the venue or the store.
//!
//! Every error fails closed. The caller treats it as "do not trigger this
//! tick" and evaluates again on the next one.

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use core_types::{
    CoreError, MarketCondition, RecurringInterval, RecurringTrigger, ScheduledSwap, SwapTrigger, TradeTrigger,
    percentage_target,
};
use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TriggerError {
    #[error("no market data available")]
    NoMarketData,

    #[error("invalid condition: {0}")]
    InvalidCondition(String),
}

impl From<CoreError> for TriggerError {
    fn from(e: CoreError) -> Self {
        TriggerError::InvalidCondition(e.to_string())
    }
}

fn require_price(price: Option<Decimal>) -> Result<Decimal, TriggerError> {
    price.ok_or(TriggerError::NoMarketData)
}

/// Rising-through for a non-negative percentage, falling-through otherwise.
/// A zero percentage targets the base price itself.
fn crossed_percentage(base_price: Decimal, percentage: Decimal, price: Decimal) -> Result<bool, TriggerError> {
    let target = percentage_target(base_price, percentage)?;
    Ok(if percentage.is_sign_negative() && !percentage.is_zero() {
        price <= target
    } else {
        price >= target
    })
}

/// Decides whether a scheduled trade's condition holds.
pub fn evaluate_trade(
    trigger: &TradeTrigger,
    now: DateTime<Utc>,
    price: Option<Decimal>,
) -> Result<bool, TriggerError> {
    match *trigger {
        TradeTrigger::Date { scheduled_time } => Ok(now >= scheduled_time),
        TradeTrigger::PriceRange { low, high } => {
            let price = require_price(price)?;
            if low > high {
                return Err(TriggerError::InvalidCondition(format!("empty price range [{}, {}]", low, high)));
            }
            Ok(low <= price && price <= high)
        }
        TradeTrigger::PricePercentage { base_price, percentage } => {
            let price = require_price(price)?;
            crossed_percentage(base_price, percentage, price)
        }
    }
}

/// Decides whether a scheduled swap's condition holds.
///
/// `window` is the half-width of the match window around a recurring slot.
/// A recurring slot whose window already contains `last_executed_at` does
/// not match again.
pub fn evaluate_swap(
    schedule: &ScheduledSwap,
    now: DateTime<Utc>,
    price: Option<Decimal>,
    window: Duration,
) -> Result<bool, TriggerError> {
    match &schedule.trigger {
        SwapTrigger::Calendar(calendar) => Ok(now >= calendar.date_time),
        SwapTrigger::Recurring(recurring) => {
            recurring.validate()?;
            Ok(matching_slot(recurring, now, window)
                .is_some_and(|slot| !fired_in_window(schedule.last_executed_at, slot, window)))
        }
        SwapTrigger::MarketCondition(condition) => {
            let price = require_price(price)?;
            evaluate_market_condition(condition, price)
        }
    }
}

pub fn evaluate_market_condition(condition: &MarketCondition, price: Decimal) -> Result<bool, TriggerError> {
    condition.validate()?;
    match *condition {
        MarketCondition::Relative { percentage, base_price } => crossed_percentage(base_price, percentage, price),
        MarketCondition::Above { target_price } => Ok(price >= target_price),
        MarketCondition::Below { target_price } => Ok(price <= target_price),
        MarketCondition::Between { min_price, max_price } => Ok(min_price <= price && price <= max_price),
    }
}

/// The slot whose window contains `now`, if any. Slots on the previous and
/// next calendar day are considered so windows straddling midnight match.
pub fn matching_slot(recurring: &RecurringTrigger, now: DateTime<Utc>, window: Duration) -> Option<DateTime<Utc>> {
    if recurring.start_date.is_some_and(|start| now < start) || recurring.end_date.is_some_and(|end| now > end) {
        return None;
    }
    let today = now.date_naive();
    [today.pred_opt(), Some(today), today.succ_opt()]
        .into_iter()
        .flatten()
        .filter(|day| day_matches(recurring, *day))
        .filter_map(|day| slot_on(day, recurring.hour, recurring.minute))
        .find(|slot| (now - *slot).abs() <= window)
}

fn day_matches(recurring: &RecurringTrigger, day: NaiveDate) -> bool {
    match recurring.interval {
        RecurringInterval::Daily => true,
        RecurringInterval::Weekly => recurring.day_of_week == Some(day.weekday().num_days_from_sunday()),
        RecurringInterval::Monthly => recurring.day_of_month == Some(day.day()),
    }
}

fn slot_on(day: NaiveDate, hour: u32, minute: u32) -> Option<DateTime<Utc>> {
    day.and_hms_opt(hour, minute, 0).map(|naive| Utc.from_utc_datetime(&naive))
}

fn fired_in_window(last_executed_at: Option<DateTime<Utc>>, slot: DateTime<Utc>, window: Duration) -> bool {
    last_executed_at.is_some_and(|at| (at - slot).abs() <= window)
}
