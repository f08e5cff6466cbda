use crate::error::EngineError;
use crate::reconciler::StateReconciler;
use crate::{timed, to_chrono};
use api_client::{FuturesOrder, OptionsOrder, VenueClient, VenueConnector};
use chrono::{DateTime, Utc};
use configuration::SchedulerConfig;
use core_types::{
    InstrumentType, NewSwap, NewSwapExecution, NewTrade, OrderParams, RemoteTrade, ScheduledSwap,
    ScheduledSwapStatus, ScheduledTrade, ScheduledTradeStatus, Swap, Trade, TradeStatus, User,
};
use database::{DbError, Repository};
use rust_decimal::Decimal;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Attempts for a write that must land because the venue already acted.
const PERSIST_ATTEMPTS: u32 = 3;
const PERSIST_BACKOFF: Duration = Duration::from_millis(200);

/// Result of one attempt to execute a triggered schedule.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome<T> {
    /// The venue accepted the order or swap.
    Executed(T),
    /// The venue accepted the order or swap but its answer was unusable. The
    /// schedule is settled as executed and reconciliation repairs the records.
    Unrecorded(String),
    /// Another attempt holds the guard window, or the schedule is no longer
    /// armed; nothing was sent.
    AlreadyClaimed,
    /// The venue (or the order itself) was refused. Terminal for trades.
    Rejected(String),
    /// A transient failure; the schedule stays armed for a later tick.
    Deferred(String),
}

impl<T> ExecutionOutcome<T> {
    pub fn label(&self) -> &'static str {
        match self {
            ExecutionOutcome::Executed(_) => "executed",
            ExecutionOutcome::Unrecorded(_) => "unrecorded",
            ExecutionOutcome::AlreadyClaimed => "already_claimed",
            ExecutionOutcome::Rejected(_) => "rejected",
            ExecutionOutcome::Deferred(_) => "deferred",
        }
    }
}

/// Drives a triggered schedule through the venue and records the result.
///
/// Every attempt starts with a repository claim that stamps
/// `last_checked_at` before anything reaches the venue. A second call inside
/// the guard window returns `AlreadyClaimed` without side effects.
///
/// The schedule is re-read after the claim, so the order sent is the one
/// stored at that moment. Outcomes are written conditionally: if the owner
/// cancelled or paused the schedule while the venue call was in flight,
/// their change stands and the lost write is logged.
pub struct ExecutionOrchestrator {
    repo: Arc<dyn Repository>,
    venues: Arc<dyn VenueConnector>,
    reconciler: Arc<StateReconciler>,
    settings: SchedulerConfig,
    symbol: String,
}

impl ExecutionOrchestrator {
    pub fn new(
        repo: Arc<dyn Repository>,
        venues: Arc<dyn VenueConnector>,
        reconciler: Arc<StateReconciler>,
        settings: SchedulerConfig,
        symbol: impl Into<String>,
    ) -> Self {
        Self {
            repo,
            venues,
            reconciler,
            settings,
            symbol: symbol.into(),
        }
    }

    fn guard(&self) -> chrono::Duration {
        to_chrono(self.settings.duplicate_guard)
    }

    async fn load_user(&self, user_id: core_types::Id) -> Result<User, EngineError> {
        timed(self.settings.repository_timeout, "load user", self.repo.get_user(user_id))
            .await?
            .ok_or(EngineError::NotFound { entity: "user", id: user_id })
    }

    /// Retries a repository write after the venue has accepted, backing off
    /// between transient failures.
    async fn persist<T, F, Fut>(&self, operation: &'static str, mut write: F) -> Result<T, EngineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, DbError>>,
    {
        let mut attempt = 1;
        loop {
            match timed(self.settings.repository_timeout, operation, write()).await {
                Err(e) if e.is_transient() && attempt < PERSIST_ATTEMPTS => {
                    warn!(operation, attempt, error = %e, "Write after venue acceptance failed; retrying.");
                    tokio::time::sleep(PERSIST_BACKOFF * attempt).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    /// Places the order of a triggered scheduled trade.
    pub async fn execute_trade(&self, listed: &ScheduledTrade) -> Result<ExecutionOutcome<Trade>, EngineError> {
        let repo_timeout = self.settings.repository_timeout;
        let now = Utc::now();

        let claimed = timed(
            repo_timeout,
            "claim scheduled trade",
            self.repo.claim_scheduled_trade(listed.id, now, self.guard()),
        )
        .await?;
        if !claimed {
            return Ok(ExecutionOutcome::AlreadyClaimed);
        }

        let stored = timed(repo_timeout, "load scheduled trade", self.repo.get_scheduled_trade(listed.id)).await?;
        let Some(mut schedule) = stored.filter(|s| s.status == ScheduledTradeStatus::Pending) else {
            return Ok(ExecutionOutcome::AlreadyClaimed);
        };
        let user = self.load_user(schedule.user_id).await?;

        // Problems found before anything is sent fail the schedule without a trade row.
        let client = match self.prepare(&schedule.order, &user) {
            Ok(client) => client,
            Err(e) => return self.settle_trade_failure(&mut schedule, None, e, now).await,
        };

        let trade = timed(
            repo_timeout,
            "insert pending trade",
            self.repo.insert_trade(&NewTrade::pending(user.id, &schedule.order), now),
        )
        .await?;

        let placed = self.place_order(client.as_ref(), &schedule.order).await;
        let remote = match placed {
            Ok(remote) => remote,
            Err(e) if e.is_unrecorded() => {
                let outcome = self.settle_unrecorded_trade(&mut schedule, trade, e).await?;
                self.resync_balance(&user, client.as_ref()).await;
                return Ok(outcome);
            }
            Err(e) => return self.settle_trade_failure(&mut schedule, Some(trade), e, now).await,
        };

        // From here on the order exists at the venue, so the schedule must
        // not stay pending whatever happens to the local trade row.
        let now = Utc::now();
        let trade = self.record_placement(&user, trade, &remote, now).await;
        schedule.mark_triggered(trade.id, now)?;
        if self.settle_trade(&schedule).await? {
            info!(
                user_id = user.id,
                schedule_id = schedule.id,
                trade_id = trade.id,
                venue_id = %remote.venue_id,
                status = %trade.status,
                "Scheduled trade executed."
            );
        }

        self.resync_balance(&user, client.as_ref()).await;
        Ok(ExecutionOutcome::Executed(trade))
    }

    fn prepare(&self, order: &OrderParams, user: &User) -> Result<Arc<dyn VenueClient>, EngineError> {
        order.validate()?;
        Ok(self.venues.client_for(user)?)
    }

    async fn place_order(&self, client: &dyn VenueClient, order: &OrderParams) -> Result<RemoteTrade, EngineError> {
        let limit = self.settings.venue_timeout;
        match order.instrument {
            InstrumentType::Futures => {
                let request = FuturesOrder::try_from(order)?;
                timed(limit, "place futures order", client.place_futures_order(&request)).await
            }
            InstrumentType::Options => {
                let request = OptionsOrder::try_from(order)?;
                timed(limit, "place options order", client.place_options_order(&request)).await
            }
        }
    }

    /// Writes the venue's answer onto the pending trade row.
    ///
    /// A reconciliation tick may have adopted the position first, in which
    /// case the unique venue id refuses the write. The adopted row is then
    /// returned and the placeholder cancelled. Any other failure is logged
    /// and the placeholder returned; the next reconciliation adopts the
    /// position.
    async fn record_placement(&self, user: &User, placeholder: Trade, remote: &RemoteTrade, now: DateTime<Utc>) -> Trade {
        let mut trade = placeholder.clone();
        if let Err(e) = trade.apply_remote(remote, now) {
            warn!(trade_id = trade.id, error = %e, "Unexpected status from a fresh order.");
        }
        let update_error = match self.persist("update trade", || self.repo.update_trade(&trade)).await {
            Ok(()) => return trade,
            Err(e) => e,
        };

        let adopted = timed(
            self.settings.repository_timeout,
            "find trade",
            self.repo.find_trade_by_venue_id(user.id, &remote.venue_id),
        )
        .await;
        match adopted {
            Ok(Some(adopted)) if adopted.id != placeholder.id => {
                info!(
                    trade_id = adopted.id,
                    placeholder_id = placeholder.id,
                    venue_id = %remote.venue_id,
                    "Order was already adopted by reconciliation; linking that trade."
                );
                if let Err(e) = self.cancel_placeholder(placeholder, now).await {
                    warn!(venue_id = %remote.venue_id, error = %e, "Placeholder trade could not be cancelled.");
                }
                adopted
            }
            _ => {
                error!(
                    trade_id = placeholder.id,
                    venue_id = %remote.venue_id,
                    error = %update_error,
                    "Order placed but not recorded locally; reconciliation will adopt it."
                );
                placeholder
            }
        }
    }

    async fn cancel_placeholder(&self, mut trade: Trade, now: DateTime<Utc>) -> Result<(), EngineError> {
        trade.transition_to(TradeStatus::Cancelled, now)?;
        timed(self.settings.repository_timeout, "cancel pending trade", self.repo.update_trade(&trade)).await
    }

    /// Stores the schedule's outcome if it is still `pending`. Returns
    /// `false`, after logging, when the owner changed it in the meantime.
    async fn settle_trade(&self, schedule: &ScheduledTrade) -> Result<bool, EngineError> {
        let settled = self
            .persist("settle scheduled trade", || self.repo.settle_scheduled_trade(schedule))
            .await?;
        if !settled {
            warn!(
                schedule_id = schedule.id,
                outcome = %schedule.status,
                "Scheduled trade changed while the order was in flight; keeping the stored state."
            );
        }
        Ok(settled)
    }

    /// Cancels the local trade (if one was created) and records the failure
    /// on the schedule. Transient failures leave the schedule `pending`.
    async fn settle_trade_failure(
        &self,
        schedule: &mut ScheduledTrade,
        trade: Option<Trade>,
        cause: EngineError,
        now: DateTime<Utc>,
    ) -> Result<ExecutionOutcome<Trade>, EngineError> {
        let message = cause.to_string();

        if let Some(trade) = trade {
            self.cancel_placeholder(trade, now).await?;
        }

        let outcome = if cause.is_transient() {
            schedule.error_message = Some(message.clone());
            schedule.updated_at = now;
            warn!(schedule_id = schedule.id, error = %message, "Scheduled trade deferred after a transient failure.");
            ExecutionOutcome::Deferred(message)
        } else {
            schedule.mark_failed(message.clone(), now)?;
            error!(schedule_id = schedule.id, error = %message, "Scheduled trade failed.");
            ExecutionOutcome::Rejected(message)
        };
        self.settle_trade(schedule).await?;
        Ok(outcome)
    }

    /// The order went through but its details are unknown. The schedule is
    /// triggered against the pending trade row so it never fires again.
    async fn settle_unrecorded_trade(
        &self,
        schedule: &mut ScheduledTrade,
        trade: Trade,
        cause: EngineError,
    ) -> Result<ExecutionOutcome<Trade>, EngineError> {
        let message = cause.to_string();
        let now = Utc::now();
        schedule.mark_triggered(trade.id, now)?;
        schedule.error_message = Some(message.clone());
        error!(
            schedule_id = schedule.id,
            trade_id = trade.id,
            error = %message,
            "Order accepted but its response was unusable; reconciliation will adopt the position."
        );
        self.settle_trade(schedule).await?;
        Ok(ExecutionOutcome::Unrecorded(message))
    }

    /// Executes a triggered scheduled swap and writes its audit row.
    pub async fn execute_swap(&self, listed: &ScheduledSwap) -> Result<ExecutionOutcome<Swap>, EngineError> {
        let repo_timeout = self.settings.repository_timeout;
        let now = Utc::now();

        let claimed = timed(
            repo_timeout,
            "claim scheduled swap",
            self.repo.claim_scheduled_swap(listed.id, now, self.guard()),
        )
        .await?;
        if !claimed {
            return Ok(ExecutionOutcome::AlreadyClaimed);
        }

        let stored = timed(repo_timeout, "load scheduled swap", self.repo.get_scheduled_swap(listed.id)).await?;
        let Some(schedule) = stored.filter(|s| s.status == ScheduledSwapStatus::Active) else {
            return Ok(ExecutionOutcome::AlreadyClaimed);
        };
        let user = self.load_user(schedule.user_id).await?;
        let client = match self.venues.client_for(&user) {
            Ok(client) => client,
            Err(e) => return self.settle_swap_failure(&schedule, e.into(), now).await,
        };

        let swapped = timed(
            self.settings.venue_timeout,
            "execute swap",
            client.execute_swap(schedule.direction, schedule.amount),
        )
        .await;
        let result = match swapped {
            Ok(result) => result,
            Err(e) if e.is_unrecorded() => {
                let outcome = self.settle_unrecorded_swap(&schedule, e).await?;
                self.resync_balance(&user, client.as_ref()).await;
                return Ok(outcome);
            }
            Err(e) => return self.settle_swap_failure(&schedule, e, now).await,
        };

        // Stamp the schedule before anything else so it cannot fire twice.
        let now = Utc::now();
        let status = self.stamp_swap(&schedule, now).await?;

        let exchange_rate = self.exchange_rate(client.as_ref()).await;
        let swap = timed(
            repo_timeout,
            "insert swap",
            self.repo.insert_swap(
                &NewSwap {
                    user_id: user.id,
                    venue_id: result.id.clone(),
                    direction: schedule.direction,
                    from_amount: result.in_amount,
                    to_amount: result.out_amount,
                    exchange_rate,
                },
                now,
            ),
        )
        .await?;
        timed(
            repo_timeout,
            "insert swap execution",
            self.repo.insert_swap_execution(&NewSwapExecution::success(schedule.id, swap.id, now)),
        )
        .await?;
        info!(
            user_id = user.id,
            schedule_id = schedule.id,
            swap_id = swap.id,
            from = %swap.from_amount,
            to = %swap.to_amount,
            %status,
            "Scheduled swap executed."
        );

        self.resync_balance(&user, client.as_ref()).await;
        Ok(ExecutionOutcome::Executed(swap))
    }

    /// Records that the venue swapped: `last_executed_at` always moves and a
    /// one-shot schedule completes unless its owner cancelled it meanwhile.
    async fn stamp_swap(&self, schedule: &ScheduledSwap, executed_at: DateTime<Utc>) -> Result<ScheduledSwapStatus, EngineError> {
        let complete = schedule.trigger.schedule_type().is_one_shot();
        let status = self
            .persist("record swap execution", || {
                self.repo.record_scheduled_swap_execution(schedule.id, executed_at, complete)
            })
            .await?;
        if status != schedule.status && status != ScheduledSwapStatus::Completed {
            warn!(
                schedule_id = schedule.id,
                %status,
                "Scheduled swap changed while the swap was in flight; keeping the stored status."
            );
        }
        Ok(status)
    }

    /// Records a failed attempt. The schedule's status is left alone, so
    /// recurring and one-shot swaps alike get another chance later.
    async fn settle_swap_failure(
        &self,
        schedule: &ScheduledSwap,
        cause: EngineError,
        now: DateTime<Utc>,
    ) -> Result<ExecutionOutcome<Swap>, EngineError> {
        let message = cause.to_string();
        timed(
            self.settings.repository_timeout,
            "insert swap execution",
            self.repo
                .insert_swap_execution(&NewSwapExecution::failed(schedule.id, message.clone(), now)),
        )
        .await?;

        if cause.is_transient() {
            warn!(schedule_id = schedule.id, error = %message, "Scheduled swap deferred after a transient failure.");
            Ok(ExecutionOutcome::Deferred(message))
        } else {
            error!(schedule_id = schedule.id, error = %message, "Scheduled swap attempt failed.");
            Ok(ExecutionOutcome::Rejected(message))
        }
    }

    /// The swap went through but its result is unknown: stamp the schedule
    /// as executed and audit it without a swap row.
    async fn settle_unrecorded_swap(
        &self,
        schedule: &ScheduledSwap,
        cause: EngineError,
    ) -> Result<ExecutionOutcome<Swap>, EngineError> {
        let message = cause.to_string();
        let now = Utc::now();
        error!(
            schedule_id = schedule.id,
            error = %message,
            "Swap accepted but its response was unusable; recording it as executed."
        );
        self.stamp_swap(schedule, now).await?;
        timed(
            self.settings.repository_timeout,
            "insert swap execution",
            self.repo
                .insert_swap_execution(&NewSwapExecution::unrecorded(schedule.id, message.clone(), now)),
        )
        .await?;
        Ok(ExecutionOutcome::Unrecorded(message))
    }

    /// Live ticker price, falling back to the stored snapshot.
    async fn exchange_rate(&self, client: &dyn VenueClient) -> Decimal {
        match timed(self.settings.venue_timeout, "fetch ticker", client.fetch_ticker()).await {
            Ok(ticker) => return ticker.last_price,
            Err(e) => warn!(error = %e, "Ticker unavailable for the swap rate; using the market snapshot."),
        }
        let snapshot = timed(
            self.settings.repository_timeout,
            "read market data",
            self.repo.get_market_data(&self.symbol),
        )
        .await;
        match snapshot {
            Ok(Some(market)) => market.last_price,
            Ok(None) => Decimal::ZERO,
            Err(e) => {
                warn!(error = %e, "Market snapshot unavailable; recording a zero swap rate.");
                Decimal::ZERO
            }
        }
    }

    /// Balance refresh after a successful execution. Failures only log; the
    /// next reconciliation tick repairs the balance.
    async fn resync_balance(&self, user: &User, client: &dyn VenueClient) {
        if let Err(e) = self.reconciler.sync_balance_with(user, client).await {
            warn!(user_id = user.id, error = %e, "Post-execution balance sync failed.");
        }
    }
}
