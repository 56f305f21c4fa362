use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    /// Configured table name is not a plain SQL identifier.
    #[error("invalid table name '{0}'")]
    InvalidTableName(String),
    /// A stored value has the wrong type or cannot be parsed.
    #[error("table '{table}', record '{record_id}': unexpected {column} value {value}")]
    Value {
        table: String,
        record_id: String,
        column: String,
        value: String,
    },
}
