use crate::error::ApiError;
use core_types::{InstrumentType, OrderParams, OrderType};
use rust_decimal::Decimal;
use serde::Serialize;

/// Body of `POST /v2/futures`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FuturesOrder {
    pub side: &'static str,
    #[serde(rename = "type")]
    pub order_type: &'static str,
    pub leverage: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub margin: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantity: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub takeprofit: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stoploss: Option<Decimal>,
}

impl TryFrom<&OrderParams> for FuturesOrder {
    type Error = ApiError;

    fn try_from(params: &OrderParams) -> Result<Self, Self::Error> {
        if params.instrument != InstrumentType::Futures {
            return Err(ApiError::InvalidData("not a futures order".into()));
        }
        let price = match params.order_type {
            OrderType::Limit => Some(
                params
                    .limit_price
                    .ok_or_else(|| ApiError::InvalidData("limit order without price".into()))?,
            ),
            OrderType::Market => None,
        };
        Ok(FuturesOrder {
            side: params.side.venue_code(),
            order_type: params.order_type.venue_code(),
            leverage: params.leverage.unwrap_or(Decimal::ONE),
            // The venue sizes by quantity when both are given; send only one.
            margin: params.quantity.is_none().then_some(params.margin).flatten(),
            quantity: params.quantity,
            price,
            takeprofit: params.take_profit,
            stoploss: params.stop_loss,
        })
    }
}

/// Body of `POST /v2/options`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptionsOrder {
    pub side: &'static str,
    pub quantity: Decimal,
    pub settlement: String,
    pub instrument_name: String,
}

impl TryFrom<&OrderParams> for OptionsOrder {
    type Error = ApiError;

    fn try_from(params: &OrderParams) -> Result<Self, Self::Error> {
        let missing = |field: &str| ApiError::InvalidData(format!("options order without {}", field));
        if params.instrument != InstrumentType::Options {
            return Err(ApiError::InvalidData("not an options order".into()));
        }
        Ok(OptionsOrder {
            side: params.side.venue_code(),
            quantity: params.quantity.ok_or_else(|| missing("quantity"))?,
            settlement: params.settlement.clone().ok_or_else(|| missing("settlement"))?,
            instrument_name: params.instrument_name.clone().ok_or_else(|| missing("instrument_name"))?,
        })
    }
}

/// Body of `POST /v2/swap`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SwapRequest {
    pub in_asset: &'static str,
    pub out_asset: &'static str,
    pub in_amount: Decimal,
}
