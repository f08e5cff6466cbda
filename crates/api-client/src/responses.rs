use crate::error::ApiError;
use chrono::{DateTime, Utc};
use core_types::{InstrumentType, MarketData, OrderSide, OrderType, RemoteFlags, RemoteTrade, SwapDirection};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// The venue speaks snake_case for positions and camelCase for the ticker.

/// A futures position or order from `GET /v2/futures` and the order endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct FuturesPositionResponse {
    pub id: String,
    #[serde(rename = "type")]
    pub order_type: String,
    pub side: String,
    pub margin: Decimal,
    pub quantity: Decimal,
    pub leverage: Decimal,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub entry_price: Option<Decimal>,
    #[serde(default)]
    pub exit_price: Option<Decimal>,
    #[serde(default)]
    pub liquidation: Option<Decimal>,
    #[serde(default)]
    pub stoploss: Option<Decimal>,
    #[serde(default)]
    pub takeprofit: Option<Decimal>,
    #[serde(default)]
    pub pl: Decimal,
    #[serde(default)]
    pub opening_fee: Decimal,
    #[serde(default)]
    pub closing_fee: Decimal,
    #[serde(default)]
    pub sum_carry_fees: Decimal,
    #[serde(default)]
    pub open: bool,
    #[serde(default)]
    pub running: bool,
    #[serde(default)]
    pub closed: bool,
    #[serde(default)]
    pub canceled: bool,
}

/// An options position from `GET /v2/options`.
#[derive(Debug, Clone, Deserialize)]
pub struct OptionsPositionResponse {
    pub id: String,
    pub side: String,
    pub quantity: Decimal,
    pub margin: Decimal,
    #[serde(default)]
    pub strike: Option<Decimal>,
    #[serde(default)]
    pub settlement: Option<String>,
    #[serde(default)]
    pub instrument_name: Option<String>,
    #[serde(default)]
    pub pl: Decimal,
    #[serde(default)]
    pub opening_fee: Decimal,
    #[serde(default)]
    pub closing_fee: Decimal,
    #[serde(default)]
    pub running: bool,
    #[serde(default)]
    pub closed: bool,
    #[serde(default)]
    pub canceled: bool,
}

/// The venue reports "no stop" as 0.
fn non_zero(value: Option<Decimal>) -> Option<Decimal> {
    value.filter(|v| !v.is_zero())
}

impl TryFrom<FuturesPositionResponse> for RemoteTrade {
    type Error = ApiError;

    fn try_from(p: FuturesPositionResponse) -> Result<Self, Self::Error> {
        let side = OrderSide::from_venue_code(&p.side).map_err(|e| ApiError::InvalidData(e.to_string()))?;
        let order_type = OrderType::from_venue_code(&p.order_type).map_err(|e| ApiError::InvalidData(e.to_string()))?;
        Ok(RemoteTrade {
            venue_id: p.id,
            instrument: InstrumentType::Futures,
            side,
            order_type,
            flags: RemoteFlags {
                open: p.open,
                running: p.running,
                closed: p.closed,
                canceled: p.canceled,
            },
            entry_price: non_zero(p.entry_price.or(p.price)),
            exit_price: non_zero(p.exit_price),
            margin: p.margin,
            leverage: p.leverage,
            quantity: p.quantity,
            take_profit: non_zero(p.takeprofit),
            stop_loss: non_zero(p.stoploss),
            pnl: p.pl,
            fee: p.opening_fee + p.closing_fee + p.sum_carry_fees,
            liquidation_price: non_zero(p.liquidation),
            instrument_name: None,
            settlement: None,
        })
    }
}

impl TryFrom<OptionsPositionResponse> for RemoteTrade {
    type Error = ApiError;

    fn try_from(p: OptionsPositionResponse) -> Result<Self, Self::Error> {
        let side = OrderSide::from_venue_code(&p.side).map_err(|e| ApiError::InvalidData(e.to_string()))?;
        Ok(RemoteTrade {
            venue_id: p.id,
            instrument: InstrumentType::Options,
            side,
            order_type: OrderType::Market,
            // Options never rest on a book: they are either live or done.
            flags: RemoteFlags {
                open: false,
                running: p.running,
                closed: p.closed,
                canceled: p.canceled,
            },
            entry_price: non_zero(p.strike),
            exit_price: None,
            margin: p.margin,
            leverage: Decimal::ONE,
            quantity: p.quantity,
            take_profit: None,
            stop_loss: None,
            pnl: p.pl,
            fee: p.opening_fee + p.closing_fee,
            liquidation_price: None,
            instrument_name: p.instrument_name,
            settlement: p.settlement,
        })
    }
}

/// The public futures ticker from `GET /v2/futures/ticker`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticker {
    pub index: Decimal,
    pub last_price: Decimal,
    pub bid_price: Decimal,
    pub ask_price: Decimal,
    #[serde(default)]
    pub carry_fee_rate: Decimal,
}

impl Ticker {
    pub fn mark_price(&self) -> Decimal {
        (self.bid_price + self.ask_price) / Decimal::TWO
    }

    pub fn into_market_data(self, symbol: &str, now: DateTime<Utc>) -> MarketData {
        MarketData {
            symbol: symbol.to_string(),
            mark_price: self.mark_price(),
            last_price: self.last_price,
            index_price: self.index,
            funding_rate: self.carry_fee_rate,
            updated_at: now,
        }
    }
}

/// The balance fields of `GET /v2/user`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Balance {
    /// Satoshis.
    pub balance: Decimal,
    #[serde(default)]
    pub synthetic_usd_balance: Decimal,
}

/// The response from `POST /v2/swap`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SwapResult {
    #[serde(default)]
    pub id: Option<String>,
    pub in_asset: String,
    pub out_asset: String,
    pub in_amount: Decimal,
    pub out_amount: Decimal,
}

impl SwapResult {
    /// Confirms the venue swapped in the direction that was asked for.
    pub fn check_direction(&self, direction: SwapDirection) -> Result<(), ApiError> {
        let (from, to) = direction.assets();
        if self.in_asset.eq_ignore_ascii_case(from) && self.out_asset.eq_ignore_ascii_case(to) {
            Ok(())
        } else {
            Err(ApiError::InvalidData(format!(
                "swap returned {} -> {}, expected {} -> {}",
                self.in_asset, self.out_asset, from, to
            )))
        }
    }
}

/// Represents an error response from the venue API.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorResponse {
    #[serde(default)]
    pub code: Option<String>,
    pub message: String,
}
