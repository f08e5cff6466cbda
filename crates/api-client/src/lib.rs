use crate::auth::sign_request;
use crate::error::{ApiError, after_acceptance};
use async_trait::async_trait;
use chrono::Utc;
use configuration::VenueConfig;
use core_types::{FuturesScope, Network, RemoteTrade, SwapDirection, User, VenueCredentials};
use reqwest::{Method, RequestBuilder};
use rust_decimal::Decimal;
use serde::{Serialize, de::DeserializeOwned};
use std::collections::BTreeMap;
use std::sync::Arc;

mod auth;
pub mod error;
pub mod requests;
pub mod responses;
// --- Public API ---
pub use requests::{FuturesOrder, OptionsOrder, SwapRequest};
pub use responses::{ApiErrorResponse, Balance, FuturesPositionResponse, OptionsPositionResponse, SwapResult, Ticker};

/// The capability interface to the trading venue.
/// This trait is the contract the scheduler uses, allowing the
/// underlying implementation (live or mock) to be swapped out.
#[async_trait]
pub trait VenueClient: Send + Sync {
    /// Opens a futures position or places a limit order. (Authenticated)
    async fn place_futures_order(&self, order: &FuturesOrder) -> Result<RemoteTrade, ApiError>;

    /// Buys or sells an options contract. (Authenticated)
    async fn place_options_order(&self, order: &OptionsOrder) -> Result<RemoteTrade, ApiError>;

    /// Closes a running futures position at market. (Authenticated)
    async fn close_position(&self, venue_id: &str) -> Result<RemoteTrade, ApiError>;

    /// Cancels an open (unfilled) futures order. (Authenticated)
    async fn cancel_order(&self, venue_id: &str) -> Result<RemoteTrade, ApiError>;

    /// Lists futures positions in the given state. (Authenticated)
    async fn fetch_futures_positions(&self, scope: FuturesScope) -> Result<Vec<RemoteTrade>, ApiError>;

    /// Lists options positions. (Authenticated)
    async fn fetch_options_positions(&self) -> Result<Vec<RemoteTrade>, ApiError>;

    /// Fetches the public futures ticker.
    async fn fetch_ticker(&self) -> Result<Ticker, ApiError>;

    /// Fetches the account balance. (Authenticated)
    async fn fetch_balance(&self) -> Result<Balance, ApiError>;

    /// Converts between BTC and the synthetic USD balance. (Authenticated)
    async fn execute_swap(&self, direction: SwapDirection, amount: Decimal) -> Result<SwapResult, ApiError>;
}

/// Hands out venue clients bound to a user's credentials.
pub trait VenueConnector: Send + Sync {
    fn client_for(&self, user: &User) -> Result<Arc<dyn VenueClient>, ApiError>;

    /// A client for unauthenticated endpoints such as the ticker.
    fn public_client(&self) -> Result<Arc<dyn VenueClient>, ApiError>;
}

/// A concrete implementation of the `VenueClient` for LN Markets.
#[derive(Clone)]
pub struct LnMarketsClient {
    client: reqwest::Client,
    base_url: String,
    credentials: Option<VenueCredentials>,
}

impl LnMarketsClient {
    pub fn new(
        network: Network,
        venue_config: &VenueConfig,
        credentials: Option<VenueCredentials>,
    ) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(venue_config.request_timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: venue_config.base_url(network).trim_end_matches('/').to_string(),
            credentials,
        })
    }

    /// Attaches the `LNM-ACCESS-*` headers for a signed call.
    fn signed(&self, method: Method, path: &str, params: &str) -> Result<RequestBuilder, ApiError> {
        let keys = self.credentials.as_ref().ok_or(ApiError::MissingCredentials)?;
        let timestamp = Utc::now().timestamp_millis().to_string();
        let signature = sign_request(&keys.api_secret, &timestamp, method.as_str(), path, params);

        let url = if params.is_empty() || method == Method::POST || method == Method::PUT {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}{}?{}", self.base_url, path, params)
        };

        Ok(self
            .client
            .request(method, url)
            .header("LNM-ACCESS-KEY", &keys.api_key)
            .header("LNM-ACCESS-PASSPHRASE", &keys.api_passphrase)
            .header("LNM-ACCESS-TIMESTAMP", timestamp)
            .header("LNM-ACCESS-SIGNATURE", signature))
    }

    async fn _get_signed<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &BTreeMap<&str, String>,
    ) -> Result<T, ApiError> {
        let query_string = serde_qs::to_string(params).map_err(|e| ApiError::InvalidData(e.to_string()))?;
        let request = self.signed(Method::GET, path, &query_string)?;
        read_response(request.send().await?).await
    }

    async fn _delete_signed<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &BTreeMap<&str, String>,
    ) -> Result<T, ApiError> {
        let query_string = serde_qs::to_string(params).map_err(|e| ApiError::InvalidData(e.to_string()))?;
        let request = self.signed(Method::DELETE, path, &query_string)?;
        read_response(request.send().await?).await
    }

    async fn _post_signed<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T, ApiError> {
        let payload = serde_json::to_string(body).map_err(|e| ApiError::InvalidData(e.to_string()))?;
        let request = self
            .signed(Method::POST, path, &payload)?
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(payload);
        let response = request.send().await?;
        let accepted = response.status().is_success();
        read_response(response).await.map_err(|e| after_acceptance(accepted, e))
    }
}

/// Maps the HTTP outcome onto the error taxonomy the scheduler relies on.
async fn read_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ApiError> {
    let status = response.status();
    let text = response.text().await?;

    if status.is_success() {
        return serde_json::from_str::<T>(&text).map_err(|e| ApiError::Deserialization(e.to_string()));
    }

    let message = serde_json::from_str::<ApiErrorResponse>(&text)
        .map(|e| e.message)
        .unwrap_or(text);
    tracing::debug!(status = status.as_u16(), %message, "Venue returned an error response.");

    Err(match status.as_u16() {
        401 | 403 => ApiError::Authentication(message),
        429 => ApiError::RateLimited(message),
        code => ApiError::Rejected { status: code, message },
    })
}

#[async_trait]
impl VenueClient for LnMarketsClient {
    async fn place_futures_order(&self, order: &FuturesOrder) -> Result<RemoteTrade, ApiError> {
        let position: FuturesPositionResponse = self._post_signed("/v2/futures", order).await?;
        RemoteTrade::try_from(position).map_err(|e| after_acceptance(true, e))
    }

    async fn place_options_order(&self, order: &OptionsOrder) -> Result<RemoteTrade, ApiError> {
        let position: OptionsPositionResponse = self._post_signed("/v2/options", order).await?;
        RemoteTrade::try_from(position).map_err(|e| after_acceptance(true, e))
    }

    async fn close_position(&self, venue_id: &str) -> Result<RemoteTrade, ApiError> {
        let mut params = BTreeMap::new();
        params.insert("id", venue_id.to_string());
        let position: FuturesPositionResponse = self._delete_signed("/v2/futures", &params).await?;
        position.try_into()
    }

    async fn cancel_order(&self, venue_id: &str) -> Result<RemoteTrade, ApiError> {
        #[derive(Serialize)]
        struct CancelBody<'a> {
            id: &'a str,
        }
        let position: FuturesPositionResponse =
            self._post_signed("/v2/futures/cancel", &CancelBody { id: venue_id }).await?;
        position.try_into()
    }

    async fn fetch_futures_positions(&self, scope: FuturesScope) -> Result<Vec<RemoteTrade>, ApiError> {
        let mut params = BTreeMap::new();
        params.insert("type", scope.to_string());
        let positions: Vec<FuturesPositionResponse> = self._get_signed("/v2/futures", &params).await?;
        positions.into_iter().map(RemoteTrade::try_from).collect()
    }

    async fn fetch_options_positions(&self) -> Result<Vec<RemoteTrade>, ApiError> {
        let positions: Vec<OptionsPositionResponse> = self._get_signed("/v2/options", &BTreeMap::new()).await?;
        positions.into_iter().map(RemoteTrade::try_from).collect()
    }

    async fn fetch_ticker(&self) -> Result<Ticker, ApiError> {
        let url = format!("{}/v2/futures/ticker", self.base_url);
        read_response(self.client.get(&url).send().await?).await
    }

    async fn fetch_balance(&self) -> Result<Balance, ApiError> {
        self._get_signed("/v2/user", &BTreeMap::new()).await
    }

    async fn execute_swap(&self, direction: SwapDirection, amount: Decimal) -> Result<SwapResult, ApiError> {
        let (in_asset, out_asset) = direction.assets();
        let request = SwapRequest { in_asset, out_asset, in_amount: amount };
        let result: SwapResult = self._post_signed("/v2/swap", &request).await?;
        result.check_direction(direction).map_err(|e| after_acceptance(true, e))?;
        Ok(result)
    }
}

/// Builds `LnMarketsClient`s from the shared venue configuration.
#[derive(Debug, Clone)]
pub struct LnMarketsConnector {
    venue_config: VenueConfig,
}

impl LnMarketsConnector {
    pub fn new(venue_config: VenueConfig) -> Self {
        Self { venue_config }
    }
}

impl VenueConnector for LnMarketsConnector {
    fn client_for(&self, user: &User) -> Result<Arc<dyn VenueClient>, ApiError> {
        if !user.has_credentials() {
            return Err(ApiError::MissingCredentials);
        }
        let client = LnMarketsClient::new(user.network, &self.venue_config, user.credentials.clone())?;
        Ok(Arc::new(client))
    }

    fn public_client(&self) -> Result<Arc<dyn VenueClient>, ApiError> {
        let client = LnMarketsClient::new(self.venue_config.network, &self.venue_config, None)?;
        Ok(Arc::new(client))
    }
}
