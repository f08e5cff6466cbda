use crate::trigger::TriggerError;
use api_client::error::ApiError;
use database::DbError;
use core_types::Id;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("API client error: {0}")]
    ApiClient(#[from] ApiError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Domain rule violated: {0}")]
    Domain(#[from] core_types::CoreError),

    #[error("Trigger evaluation failed: {0}")]
    Trigger(#[from] TriggerError),

    #[error("'{operation}' did not complete within {seconds}s")]
    Timeout { operation: &'static str, seconds: u64 },

    #[error("{entity} #{id} not found")]
    NotFound { entity: &'static str, id: Id },

    #[error("{entity} #{id} belongs to another user")]
    Forbidden { entity: &'static str, id: Id },

    #[error("No market data available for {0}")]
    NoMarketData(String),

    #[error("{entity} #{id} changed while it was being saved; reload and retry")]
    Conflict { entity: &'static str, id: Id },
}

impl EngineError {
    /// Whether the failure says nothing about the order itself, so the
    /// schedule should stay armed and be retried on a later tick.
    pub fn is_transient(&self) -> bool {
        match self {
            EngineError::ApiClient(e) => e.is_transient(),
            EngineError::Timeout { .. } => true,
            EngineError::Database(e) => {
                !matches!(e, DbError::InvalidData(_) | DbError::Corrupt { .. } | DbError::NotFound(_))
            }
            _ => false,
        }
    }

    /// The venue accepted the request but its answer could not be used, so
    /// the execution happened without a local record of it.
    pub fn is_unrecorded(&self) -> bool {
        matches!(self, EngineError::ApiClient(ApiError::AcceptedUnreadable(_)))
    }
}
