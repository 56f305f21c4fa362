use thiserror::Error;

use crate::model::DonorId;

#[derive(Debug, Error)]
pub enum ResolveError {
    /// TOML parse / deserialization error.
    #[error("config parse error: {0}")]
    ConfigParse(String),
    /// Config validation error (empty name, bad payment list, blank paths).
    #[error("config validation error: {0}")]
    ConfigValidation(String),
    /// Missing required column in an input table.
    #[error("table '{table}': missing column '{column}'")]
    MissingColumn { table: String, column: String },
    /// Column name appears more than once in a table header.
    #[error("table '{table}': duplicate column '{column}'")]
    DuplicateColumn { table: String, column: String },
    /// A cell could not be parsed into its column type.
    #[error("table '{table}', record '{record_id}': cannot parse {column} '{value}'")]
    ValueParse {
        table: String,
        record_id: String,
        column: String,
        value: String,
    },
    /// Primary key repeated in a corrected table.
    #[error("table '{table}': duplicate id {id}")]
    DuplicateId { table: String, id: i64 },
    /// Row owned by a donor that is not in the corrected donor set.
    #[error("table '{table}', record {record_id}: donor {donor_id} does not exist")]
    DanglingReference {
        table: String,
        record_id: i64,
        donor_id: DonorId,
    },
    /// Donor left without any donation after merging.
    #[error("donor {donor_id} has no donations after merging")]
    DonorWithoutDonations { donor_id: DonorId },
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ResolveError {
    /// True for errors that mean the corrected identity graph is inconsistent.
    pub fn is_integrity_violation(&self) -> bool {
        matches!(
            self,
            Self::DuplicateId { .. }
                | Self::DuplicateColumn { .. }
                | Self::DanglingReference { .. }
                | Self::DonorWithoutDonations { .. }
        )
    }
}
