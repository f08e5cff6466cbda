use crate::error::EngineError;
use crate::timed;
use api_client::{VenueClient, VenueConnector};
use chrono::Utc;
use configuration::SchedulerConfig;
use core_types::{Id, NewTrade, RemoteTrade, SyncScope, Trade, User};
use database::Repository;
use futures::stream::{self, StreamExt};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Satoshis per bitcoin; the venue reports balances in sats.
const SATS_PER_BTC: Decimal = Decimal::from_parts(100_000_000, 0, 0, false, 0);

/// What one user's trade sync changed locally. `failed` counts positions
/// that could not be merged and were skipped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub created: usize,
    pub updated: usize,
    pub failed: usize,
}

/// Totals of one reconciliation tick across all users.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconciliationReport {
    pub users: usize,
    pub failed_users: usize,
    pub created: usize,
    pub updated: usize,
    pub failed_positions: usize,
}

/// The "Source of Truth Auditor" for local trade and balance records.
///
/// The venue is authoritative: remote positions are merged into the local
/// `trades` table (create-if-absent, update-if-present) and the venue balance
/// overwrites the user's stored balance.
pub struct StateReconciler {
    repo: Arc<dyn Repository>,
    venues: Arc<dyn VenueConnector>,
    settings: SchedulerConfig,
    symbol: String,
}

impl StateReconciler {
    pub fn new(
        repo: Arc<dyn Repository>,
        venues: Arc<dyn VenueConnector>,
        settings: SchedulerConfig,
        symbol: impl Into<String>,
    ) -> Self {
        Self {
            repo,
            venues,
            settings,
            symbol: symbol.into(),
        }
    }

    /// Pulls the user's positions for `scope` and merges them into local trades.
    pub async fn sync_user(&self, user: &User, scope: SyncScope) -> Result<SyncSummary, EngineError> {
        let client = self.venues.client_for(user)?;
        let mut remote = Vec::new();
        for futures_scope in scope.futures_scopes() {
            let positions = timed(
                self.settings.venue_timeout,
                "fetch futures positions",
                client.fetch_futures_positions(*futures_scope),
            )
            .await?;
            remote.extend(positions);
        }
        if scope.includes_options() {
            let positions = timed(
                self.settings.venue_timeout,
                "fetch options positions",
                client.fetch_options_positions(),
            )
            .await?;
            remote.extend(positions);
        }

        let mut summary = SyncSummary::default();
        for position in &remote {
            match self.merge_position(user, position).await {
                Ok(Merge::Created) => summary.created += 1,
                Ok(Merge::Updated) => summary.updated += 1,
                Ok(Merge::Unchanged) => {}
                Err(e) => {
                    summary.failed += 1;
                    warn!(user_id = user.id, venue_id = %position.venue_id, error = %e, "Position could not be merged; skipping it.");
                }
            }
        }
        debug!(user_id = user.id, %scope, remote = remote.len(), ?summary, "Trade sync complete.");
        Ok(summary)
    }

    async fn merge_position(&self, user: &User, remote: &RemoteTrade) -> Result<Merge, EngineError> {
        let timeout = self.settings.repository_timeout;
        let now = Utc::now();
        let existing = timed(
            timeout,
            "find trade",
            self.repo.find_trade_by_venue_id(user.id, &remote.venue_id),
        )
        .await?;

        let Some(mut trade) = existing else {
            let new_trade = NewTrade::from_remote(user.id, remote);
            let created = timed(timeout, "insert trade", self.repo.insert_trade(&new_trade, now)).await?;
            info!(
                user_id = user.id,
                trade_id = created.id,
                venue_id = %remote.venue_id,
                status = %created.status,
                "Adopted trade opened outside the app."
            );
            return Ok(Merge::Created);
        };

        let before = trade.clone();
        if let Err(e) = trade.apply_remote(remote, now) {
            warn!(user_id = user.id, trade_id = trade.id, error = %e, "Venue reported an impossible status change; keeping the local status.");
        }
        if same_content(&before, &trade) {
            return Ok(Merge::Unchanged);
        }
        timed(timeout, "update trade", self.repo.update_trade(&trade)).await?;
        Ok(Merge::Updated)
    }

    /// Refreshes the user's stored balance from the venue.
    ///
    /// The USD value uses the last market snapshot and is `0.00` until one
    /// exists.
    pub async fn sync_balance(&self, user: &User) -> Result<(Decimal, Decimal), EngineError> {
        let client = self.venues.client_for(user)?;
        self.sync_balance_with(user, client.as_ref()).await
    }

    pub(crate) async fn sync_balance_with(
        &self,
        user: &User,
        client: &dyn VenueClient,
    ) -> Result<(Decimal, Decimal), EngineError> {
        let balance = timed(self.settings.venue_timeout, "fetch balance", client.fetch_balance()).await?;
        let market = timed(
            self.settings.repository_timeout,
            "read market data",
            self.repo.get_market_data(&self.symbol),
        )
        .await?;
        let balance_usd = balance_in_usd(balance.balance, market.map(|m| m.last_price));

        timed(
            self.settings.repository_timeout,
            "update balance",
            self.repo.update_user_balance(user.id, balance.balance, balance_usd, Utc::now()),
        )
        .await?;
        debug!(user_id = user.id, balance = %balance.balance, %balance_usd, "Balance synced.");
        Ok((balance.balance, balance_usd))
    }

    /// Trade sync and balance sync for every user with credentials. Users
    /// run concurrently up to `max_concurrency`. A failed trade sync does not
    /// skip the balance sync, and one user's failure does not stop the others.
    pub async fn sync_all(&self, scope: SyncScope) -> Result<ReconciliationReport, EngineError> {
        let users = timed(
            self.settings.repository_timeout,
            "list users",
            self.repo.list_users_with_credentials(),
        )
        .await?;

        let results: Vec<(Id, Result<SyncSummary, EngineError>, Result<(Decimal, Decimal), EngineError>)> =
            stream::iter(users.iter())
                .map(|user| async move {
                    let trades = self.sync_user(user, scope).await;
                    let balance = self.sync_balance(user).await;
                    (user.id, trades, balance)
                })
                .buffer_unordered(self.settings.max_concurrency.max(1))
                .boxed()
                .collect()
                .await;

        let mut report = ReconciliationReport {
            users: users.len(),
            ..Default::default()
        };
        for (user_id, trades, balance) in results {
            let mut failed = false;
            match trades {
                Ok(summary) => {
                    report.created += summary.created;
                    report.updated += summary.updated;
                    report.failed_positions += summary.failed;
                }
                Err(e) => {
                    failed = true;
                    warn!(user_id, error = %e, "Trade sync failed for user; skipping.");
                }
            }
            if let Err(e) = balance {
                failed = true;
                warn!(user_id, error = %e, "Balance sync failed for user; skipping.");
            }
            if failed {
                report.failed_users += 1;
            }
        }
        Ok(report)
    }
}

enum Merge {
    Created,
    Updated,
    Unchanged,
}

/// Equality that ignores `updated_at`.
fn same_content(a: &Trade, b: &Trade) -> bool {
    a == &Trade {
        updated_at: a.updated_at,
        ..b.clone()
    }
}

/// `sats / 1e8 * price`, rounded to cents; `0.00` without a price.
pub fn balance_in_usd(balance_sats: Decimal, last_price: Option<Decimal>) -> Decimal {
    match last_price {
        Some(price) => (balance_sats / SATS_PER_BTC * price).round_dp(2),
        None => Decimal::new(0, 2),
    }
}
