use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Implements the text representation shared by the database columns, the
/// JSON management surface and log output.
macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = CoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(CoreError::UnknownVariant {
                        kind: stringify!($name),
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSide {
    Buy,
    Sell,
}

text_enum!(OrderSide { Buy => "buy", Sell => "sell" });

impl OrderSide {
    /// The single-letter code the venue uses on the wire.
    pub fn venue_code(&self) -> &'static str {
        match self {
            OrderSide::Buy => "b",
            OrderSide::Sell => "s",
        }
    }

    pub fn from_venue_code(code: &str) -> Result<Self, CoreError> {
        match code {
            "b" | "buy" => Ok(OrderSide::Buy),
            "s" | "sell" => Ok(OrderSide::Sell),
            other => Err(CoreError::UnknownVariant { kind: "OrderSide", value: other.to_string() }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Market,
    Limit,
}

text_enum!(OrderType { Market => "market", Limit => "limit" });

impl OrderType {
    pub fn venue_code(&self) -> &'static str {
        match self {
            OrderType::Market => "m",
            OrderType::Limit => "l",
        }
    }

    pub fn from_venue_code(code: &str) -> Result<Self, CoreError> {
        match code {
            "m" | "market" => Ok(OrderType::Market),
            "l" | "limit" => Ok(OrderType::Limit),
            other => Err(CoreError::UnknownVariant { kind: "OrderType", value: other.to_string() }),
        }
    }
}

/// The kind of derivative a trade is placed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentType {
    Futures,
    Options,
}

text_enum!(InstrumentType { Futures => "futures", Options => "options" });

/// Lifecycle of the local mirror of a venue position.
///
/// `pending` rows have no venue id yet, `open` rows were accepted but are not
/// running (unfilled limit order), `running` rows are live positions.
/// `closed` and `cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeStatus {
    Pending,
    Open,
    Running,
    Closed,
    Cancelled,
}

text_enum!(TradeStatus {
    Pending => "pending",
    Open => "open",
    Running => "running",
    Closed => "closed",
    Cancelled => "cancelled",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduledTradeStatus {
    Pending,
    Triggered,
    Failed,
    Cancelled,
}

text_enum!(ScheduledTradeStatus {
    Pending => "pending",
    Triggered => "triggered",
    Failed => "failed",
    Cancelled => "cancelled",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduledSwapStatus {
    Active,
    Paused,
    Completed,
    Cancelled,
}

text_enum!(ScheduledSwapStatus {
    Active => "active",
    Paused => "paused",
    Completed => "completed",
    Cancelled => "cancelled",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapDirection {
    BtcToUsd,
    UsdToBtc,
}

text_enum!(SwapDirection { BtcToUsd => "btc_to_usd", UsdToBtc => "usd_to_btc" });

impl SwapDirection {
    /// Asset pair as the venue names it: (asset sent, asset received).
    pub fn assets(&self) -> (&'static str, &'static str) {
        match self {
            SwapDirection::BtcToUsd => ("BTC", "USD"),
            SwapDirection::UsdToBtc => ("USD", "BTC"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapExecutionStatus {
    Success,
    Failed,
    Cancelled,
}

text_enum!(SwapExecutionStatus {
    Success => "success",
    Failed => "failed",
    Cancelled => "cancelled",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Date,
    PriceRange,
    PricePercentage,
}

text_enum!(TriggerType {
    Date => "date",
    PriceRange => "price_range",
    PricePercentage => "price_percentage",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleType {
    Calendar,
    Recurring,
    MarketCondition,
}

text_enum!(ScheduleType {
    Calendar => "calendar",
    Recurring => "recurring",
    MarketCondition => "market_condition",
});

impl ScheduleType {
    /// One-shot schedules complete after their first successful execution.
    pub fn is_one_shot(&self) -> bool {
        !matches!(self, ScheduleType::Recurring)
    }
}

/// Which venue environment a user's credentials belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Network {
    #[default]
    Mainnet,
    Testnet,
}

text_enum!(Network { Mainnet => "mainnet", Testnet => "testnet" });

/// Narrows a reconciliation pass to one futures status, or everything
/// (all futures statuses plus options).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncScope {
    Open,
    Running,
    Closed,
    #[default]
    All,
}

text_enum!(SyncScope {
    Open => "open",
    Running => "running",
    Closed => "closed",
    All => "all",
});

/// The futures position filter understood by the venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FuturesScope {
    Open,
    Running,
    Closed,
}

text_enum!(FuturesScope { Open => "open", Running => "running", Closed => "closed" });

impl SyncScope {
    pub fn futures_scopes(&self) -> &'static [FuturesScope] {
        match self {
            SyncScope::Open => &[FuturesScope::Open],
            SyncScope::Running => &[FuturesScope::Running],
            SyncScope::Closed => &[FuturesScope::Closed],
            SyncScope::All => &[FuturesScope::Open, FuturesScope::Running, FuturesScope::Closed],
        }
    }

    pub fn includes_options(&self) -> bool {
        matches!(self, SyncScope::All)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_representation_round_trips_through_from_str() {
        assert_eq!("price_percentage".parse::<TriggerType>().unwrap(), TriggerType::PricePercentage);
        assert_eq!(ScheduleType::MarketCondition.as_str(), "market_condition");
        assert_eq!(SwapDirection::BtcToUsd.to_string(), "btc_to_usd");
    }

    #[test]
    fn unknown_text_is_rejected() {
        let err = "sideways".parse::<OrderSide>().unwrap_err();
        assert!(matches!(err, CoreError::UnknownVariant { kind: "OrderSide", .. }));
    }

    #[test]
    fn venue_codes_accept_short_and_long_forms() {
        assert_eq!(OrderSide::from_venue_code("b").unwrap(), OrderSide::Buy);
        assert_eq!(OrderSide::from_venue_code("sell").unwrap(), OrderSide::Sell);
        assert_eq!(OrderType::from_venue_code("l").unwrap(), OrderType::Limit);
    }

    #[test]
    fn all_scope_covers_every_futures_filter_and_options() {
        assert_eq!(SyncScope::All.futures_scopes().len(), 3);
        assert!(SyncScope::All.includes_options());
        assert!(!SyncScope::Running.includes_options());
    }

    #[test]
    fn only_recurring_schedules_rearm() {
        assert!(ScheduleType::Calendar.is_one_shot());
        assert!(ScheduleType::MarketCondition.is_one_shot());
        assert!(!ScheduleType::Recurring.is_one_shot());
    }
}
