use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    #[error("Invalid input for {0}: {1}")]
    InvalidInput(String, String),

    #[error("Invalid trigger condition: {0}")]
    InvalidCondition(String),

    #[error("Unknown {kind} value '{value}'")]
    UnknownVariant { kind: &'static str, value: String },

    #[error("Illegal {entity} status transition from {from} to {to}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },
}
