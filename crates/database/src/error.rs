use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Failed to load environment variables for database connection: {0}")]
    ConnectionConfigError(String),

    #[error("Database query failed: {0}")]
    QueryError(#[from] sqlx::Error),

    #[error("Database migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("An error occurred during JSON serialization/deserialization: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Refusing to store invalid data: {0}")]
    InvalidData(#[from] core_types::CoreError),

    #[error("Stored row {table}#{id} is malformed: {reason}")]
    Corrupt {
        table: &'static str,
        id: i64,
        reason: String,
    },

    #[error("The requested {0} was not found in the database.")]
    NotFound(&'static str),
}
