use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error talking to the venue: {0}")]
    Network(String),

    #[error("The venue rejected the credentials: {0}")]
    Authentication(String),

    #[error("Rate limited by the venue: {0}")]
    RateLimited(String),

    #[error("The venue rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("No API credentials configured for this client")]
    MissingCredentials,

    #[error("Failed to deserialize the API response: {0}")]
    Deserialization(String),

    #[error("Invalid data format from API: {0}")]
    InvalidData(String),

    /// The venue answered 2xx, so the order or swap went through, but the
    /// answer could not be used.
    #[error("The venue accepted the request but its response was unusable: {0}")]
    AcceptedUnreadable(String),
}

impl ApiError {
    /// Whether retrying the same request later may succeed. Rejections and
    /// credential problems are final.
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Timeout(_) | ApiError::Network(_) | ApiError::RateLimited(_) => true,
            ApiError::Rejected { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Once the venue has accepted a state-changing request, any failure to use
/// its answer means the change happened without us being able to record it.
pub(crate) fn after_acceptance(accepted: bool, error: ApiError) -> ApiError {
    match error {
        ApiError::AcceptedUnreadable(_) => error,
        other if accepted => ApiError::AcceptedUnreadable(other.to_string()),
        other => other,
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ApiError::Timeout(e.to_string())
        } else if e.is_decode() {
            ApiError::Deserialization(e.to_string())
        } else {
            ApiError::Network(e.to_string())
        }
    }
}
