//! Trigger evaluation, execution and reconciliation for scheduled trades
//! and swaps.
//!
//! [`Scheduler`] owns the background loops. Each loop tick can also be run
//! directly, which is how the CLI's one-shot commands and the tests drive it.

use crate::error::EngineError;
use std::future::Future;
use std::time::Duration;

pub mod error;
pub mod management;
pub mod orchestrator;
pub mod reconciler;
pub mod scheduler;
pub mod trigger;

pub use management::{ScheduleManager, ScheduledSwapRequest, ScheduledTradeRequest, TradeCondition};
pub use orchestrator::{ExecutionOrchestrator, ExecutionOutcome};
pub use reconciler::{ReconciliationReport, StateReconciler, SyncSummary, balance_in_usd};
pub use scheduler::{Scheduler, SchedulerHandle, TickReport};
pub use trigger::TriggerError;

/// Bounds an external call. An elapsed limit becomes a transient
/// `EngineError::Timeout` naming the operation.
pub(crate) async fn timed<T, E>(
    limit: Duration,
    operation: &'static str,
    fut: impl Future<Output = Result<T, E>>,
) -> Result<T, EngineError>
where
    EngineError: From<E>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.map_err(EngineError::from),
        Err(_) => Err(EngineError::Timeout {
            operation,
            seconds: limit.as_secs(),
        }),
    }
}

/// Converts a configured duration, saturating at a year.
pub(crate) fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d)
        .unwrap_or(chrono::Duration::weeks(52))
        .min(chrono::Duration::weeks(52))
}
