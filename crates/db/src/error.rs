use lumora_core::error::CoreError;

/// Failures surfaced by the `PgStore` trait implementations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A row held a value the domain types cannot represent.
    #[error("Corrupt row: {0}")]
    CorruptRow(String),
}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Database(sqlx::Error::RowNotFound) => {
                CoreError::Internal("expected row was not found".to_string())
            }
            other => CoreError::Internal(other.to_string()),
        }
    }
}
