use crate::error::EngineError;
use crate::orchestrator::{ExecutionOrchestrator, ExecutionOutcome};
use crate::reconciler::{ReconciliationReport, StateReconciler};
use crate::trigger::{TriggerError, evaluate_swap, evaluate_trade};
use crate::{timed, to_chrono};
use api_client::VenueConnector;
use chrono::{DateTime, Utc};
use configuration::SchedulerConfig;
use core_types::{MarketData, ScheduledSwap, ScheduledTrade, SyncScope};
use database::Repository;
use futures::FutureExt;
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use rust_decimal::Decimal;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

/// Counters for one trigger tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub evaluated: usize,
    pub not_due: usize,
    pub condition_errors: usize,
    pub executed: usize,
    pub unrecorded: usize,
    pub already_claimed: usize,
    pub deferred: usize,
    pub rejected: usize,
    pub failed: usize,
}

impl TickReport {
    fn record(&mut self, verdict: Verdict) {
        self.evaluated += 1;
        match verdict {
            Verdict::NotDue => self.not_due += 1,
            Verdict::ConditionError => self.condition_errors += 1,
            Verdict::Executed => self.executed += 1,
            Verdict::Unrecorded => self.unrecorded += 1,
            Verdict::AlreadyClaimed => self.already_claimed += 1,
            Verdict::Deferred => self.deferred += 1,
            Verdict::Rejected => self.rejected += 1,
            Verdict::Failed => self.failed += 1,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Verdict {
    NotDue,
    ConditionError,
    Executed,
    Unrecorded,
    AlreadyClaimed,
    Deferred,
    Rejected,
    Failed,
}

impl<T> From<&ExecutionOutcome<T>> for Verdict {
    fn from(outcome: &ExecutionOutcome<T>) -> Self {
        match outcome {
            ExecutionOutcome::Executed(_) => Verdict::Executed,
            ExecutionOutcome::Unrecorded(_) => Verdict::Unrecorded,
            ExecutionOutcome::AlreadyClaimed => Verdict::AlreadyClaimed,
            ExecutionOutcome::Deferred(_) => Verdict::Deferred,
            ExecutionOutcome::Rejected(_) => Verdict::Rejected,
        }
    }
}

enum Work {
    Trade(ScheduledTrade),
    Swap(ScheduledSwap),
}

/// The process-wide background driver.
///
/// Each tick re-reads everything it needs from the repository, so the
/// scheduler holds no state between ticks and is safe to restart. The loops
/// started by [`Scheduler::start`] can also be bypassed entirely by calling
/// a `run_*_tick` method directly.
pub struct Scheduler {
    repo: Arc<dyn Repository>,
    venues: Arc<dyn VenueConnector>,
    orchestrator: ExecutionOrchestrator,
    reconciler: Arc<StateReconciler>,
    settings: SchedulerConfig,
    symbol: String,
}

impl Scheduler {
    pub fn new(
        repo: Arc<dyn Repository>,
        venues: Arc<dyn VenueConnector>,
        settings: SchedulerConfig,
        symbol: impl Into<String>,
    ) -> Self {
        let symbol = symbol.into();
        let reconciler = Arc::new(StateReconciler::new(
            repo.clone(),
            venues.clone(),
            settings.clone(),
            symbol.clone(),
        ));
        let orchestrator = ExecutionOrchestrator::new(
            repo.clone(),
            venues.clone(),
            reconciler.clone(),
            settings.clone(),
            symbol.clone(),
        );
        Self {
            repo,
            venues,
            orchestrator,
            reconciler,
            settings,
            symbol,
        }
    }

    pub fn orchestrator(&self) -> &ExecutionOrchestrator {
        &self.orchestrator
    }

    pub fn reconciler(&self) -> &StateReconciler {
        &self.reconciler
    }

    /// Evaluates every pending scheduled trade and active scheduled swap and
    /// executes the ones whose condition holds.
    pub async fn run_trigger_tick(&self) -> TickReport {
        let span = info_span!("trigger_tick", tick_id = %Uuid::new_v4());
        self.trigger_tick().instrument(span).await
    }

    async fn trigger_tick(&self) -> TickReport {
        let mut report = TickReport::default();
        let limit = self.settings.repository_timeout;

        let listed = tokio::try_join!(
            timed(limit, "list pending scheduled trades", self.repo.list_pending_scheduled_trades()),
            timed(limit, "list active scheduled swaps", self.repo.list_active_scheduled_swaps()),
        );
        let (trades, swaps) = match listed {
            Ok(listed) => listed,
            Err(e) => {
                error!(error = %e, "Trigger tick skipped: schedules could not be read.");
                return report;
            }
        };

        let price = match timed(limit, "read market data", self.repo.get_market_data(&self.symbol)).await {
            Ok(market) => market.map(|m| m.last_price),
            Err(e) => {
                warn!(error = %e, "Market data unavailable; price conditions will not fire this tick.");
                None
            }
        };

        let now = Utc::now();
        let work = trades
            .into_iter()
            .map(Work::Trade)
            .chain(swaps.into_iter().map(Work::Swap));
        let verdicts: Vec<Verdict> = stream::iter(work)
            .map(|item| self.process(item, now, price))
            .buffer_unordered(self.settings.max_concurrency.max(1))
            .collect()
            .await;

        for verdict in verdicts {
            report.record(verdict);
        }
        if report.evaluated > report.not_due {
            info!(?report, "Trigger tick complete.");
        } else {
            debug!(?report, "Trigger tick complete.");
        }
        report
    }

    async fn process(&self, item: Work, now: DateTime<Utc>, price: Option<Decimal>) -> Verdict {
        match item {
            Work::Trade(schedule) => {
                match evaluate_trade(&schedule.trigger, now, price) {
                    Ok(true) => {}
                    Ok(false) => return Verdict::NotDue,
                    Err(e) => return condition_error(schedule.id, e),
                }
                match self.orchestrator.execute_trade(&schedule).await {
                    Ok(outcome) => Verdict::from(&outcome),
                    Err(e) => {
                        error!(schedule_id = schedule.id, error = %e, "Scheduled trade execution errored.");
                        Verdict::Failed
                    }
                }
            }
            Work::Swap(schedule) => {
                let window = to_chrono(self.settings.recurring_window);
                match evaluate_swap(&schedule, now, price, window) {
                    Ok(true) => {}
                    Ok(false) => return Verdict::NotDue,
                    Err(e) => return condition_error(schedule.id, e),
                }
                match self.orchestrator.execute_swap(&schedule).await {
                    Ok(outcome) => Verdict::from(&outcome),
                    Err(e) => {
                        error!(schedule_id = schedule.id, error = %e, "Scheduled swap execution errored.");
                        Verdict::Failed
                    }
                }
            }
        }
    }

    /// Reconciles every user with credentials against the venue.
    pub async fn run_reconciliation_tick(&self, scope: SyncScope) -> Result<ReconciliationReport, EngineError> {
        let span = info_span!("reconciliation_tick", tick_id = %Uuid::new_v4(), %scope);
        async {
            let report = self.reconciler.sync_all(scope).await?;
            info!(?report, "Reconciliation tick complete.");
            Ok(report)
        }
        .instrument(span)
        .await
    }

    /// Refreshes the market data snapshot from the public ticker.
    pub async fn run_market_tick(&self) -> Result<MarketData, EngineError> {
        let span = info_span!("market_tick", tick_id = %Uuid::new_v4());
        async {
            let client = self.venues.public_client()?;
            let ticker = timed(self.settings.venue_timeout, "fetch ticker", client.fetch_ticker()).await?;
            let market = ticker.into_market_data(&self.symbol, Utc::now());
            timed(
                self.settings.repository_timeout,
                "save market data",
                self.repo.save_market_data(&market),
            )
            .await?;
            debug!(last_price = %market.last_price, "Market data refreshed.");
            Ok(market)
        }
        .instrument(span)
        .await
    }

    /// Spawns the market, trigger and reconciliation loops. Each fires
    /// immediately and then on its own interval until the handle is shut down.
    pub fn start(self: Arc<Self>) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let settings = self.settings.clone();

        let market = {
            let scheduler = self.clone();
            spawn_loop("market", settings.market_interval, shutdown_rx.clone(), move || {
                let scheduler = scheduler.clone();
                async move {
                    if let Err(e) = scheduler.run_market_tick().await {
                        warn!(error = %e, "Market data refresh failed.");
                    }
                }
            })
        };
        let trigger = {
            let scheduler = self.clone();
            spawn_loop("trigger", settings.trigger_interval, shutdown_rx.clone(), move || {
                let scheduler = scheduler.clone();
                async move {
                    scheduler.run_trigger_tick().await;
                }
            })
        };
        let reconciliation = {
            let scheduler = self;
            spawn_loop("reconciliation", settings.reconciliation_interval, shutdown_rx, move || {
                let scheduler = scheduler.clone();
                async move {
                    if let Err(e) = scheduler.run_reconciliation_tick(SyncScope::All).await {
                        error!(error = %e, "Reconciliation tick failed.");
                    }
                }
            })
        };

        SchedulerHandle {
            shutdown_tx,
            tasks: vec![market, trigger, reconciliation],
            grace: settings.shutdown_grace,
        }
    }
}

fn condition_error(schedule_id: core_types::Id, e: TriggerError) -> Verdict {
    match e {
        TriggerError::NoMarketData => debug!(schedule_id, "No market data yet; condition not evaluated."),
        TriggerError::InvalidCondition(_) => warn!(schedule_id, error = %e, "Schedule has an invalid condition."),
    }
    Verdict::ConditionError
}

/// Runs `tick` on a fixed period until shutdown is signalled. A tick that
/// has started always runs to completion, and a tick that panics is logged
/// without ending the loop.
fn spawn_loop<F, Fut>(name: &'static str, period: Duration, mut shutdown: watch::Receiver<bool>, mut tick: F) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        info!(task = name, ?period, "Starting periodic task.");
        let mut timer = interval(period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = timer.tick() => {
                    if AssertUnwindSafe(tick()).catch_unwind().await.is_err() {
                        error!(task = name, "Tick panicked; waiting for the next one.");
                    }
                }
            }
        }
        info!(task = name, "Periodic task stopped.");
    })
}

/// Owns the background loops started by [`Scheduler::start`].
pub struct SchedulerHandle {
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    grace: Duration,
}

impl SchedulerHandle {
    /// Signals every loop to stop and waits up to the configured grace
    /// period for in-flight ticks. Returns `false` if the wait timed out.
    pub async fn shutdown(self) -> bool {
        // Receivers are owned by the tasks; a send error means they already exited.
        let _ = self.shutdown_tx.send(true);
        match tokio::time::timeout(self.grace, join_all(self.tasks)).await {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result {
                        error!(error = %e, "A scheduler task panicked.");
                    }
                }
                info!("Scheduler stopped.");
                true
            }
            Err(_) => {
                warn!(grace = ?self.grace, "Scheduler did not stop within the grace period.");
                false
            }
        }
    }
}
