//! CLI Exit Code Registry
//!
//! This is the single source of truth for all `ggrid` exit codes.
//! Exit codes are part of the shell contract; scheduled jobs rely on them.
//!
//! | Code | Meaning                                                    |
//! |------|------------------------------------------------------------|
//! | 0    | Success                                                    |
//! | 1    | General error (unspecified)                                |
//! | 2    | CLI usage error (bad args, bad timestamp)                  |
//! | 3    | Invalid run config (parse or validation)                   |
//! | 4    | Input failure (unreadable file, missing column, bad value) |
//! | 5    | Integrity violation in the corrected dataset               |
//! | 6    | Output could not be written                                |
//!
//! No output file is written unless the run exits 0.

use givegrid_resolve::ResolveError;
use givegrid_store::StoreError;

/// Success - command completed without errors.
pub const EXIT_SUCCESS: u8 = 0;

/// General error - unspecified failure.
/// Avoid using this; prefer a specific error code.
pub const EXIT_ERROR: u8 = 1;

/// Usage error - bad arguments, unparseable `--at` / `--reference`.
pub const EXIT_USAGE: u8 = 2;

/// Config file failed to parse or validate.
pub const EXIT_INVALID_CONFIG: u8 = 3;

/// Source data could not be read: missing file, missing column, bad value,
/// database error.
pub const EXIT_INPUT: u8 = 4;

/// Final consistency gate failed (duplicate ids, dangling references,
/// donor left without donations).
pub const EXIT_INTEGRITY: u8 = 5;

/// Corrected tables or JSON could not be written.
pub const EXIT_OUTPUT: u8 = 6;

/// Map an engine error raised while loading or running to its exit code.
pub fn resolve_exit_code(err: &ResolveError) -> u8 {
    if err.is_integrity_violation() {
        return EXIT_INTEGRITY;
    }
    match err {
        ResolveError::ConfigParse(_) | ResolveError::ConfigValidation(_) => EXIT_INVALID_CONFIG,
        ResolveError::MissingColumn { .. }
        | ResolveError::ValueParse { .. }
        | ResolveError::Csv(_)
        | ResolveError::Io(_) => EXIT_INPUT,
        _ => EXIT_ERROR,
    }
}

pub fn store_exit_code(err: &StoreError) -> u8 {
    match err {
        StoreError::Database(_) | StoreError::Value { .. } => EXIT_INPUT,
        StoreError::InvalidTableName(_) => EXIT_INVALID_CONFIG,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_errors_map_to_codes() {
        assert_eq!(resolve_exit_code(&ResolveError::ConfigParse("x".into())), EXIT_INVALID_CONFIG);
        assert_eq!(
            resolve_exit_code(&ResolveError::MissingColumn {
                table: "donors".into(),
                column: "donor_id".into(),
            }),
            EXIT_INPUT
        );
        assert_eq!(
            resolve_exit_code(&ResolveError::DuplicateColumn {
                table: "donors".into(),
                column: "donor_id".into(),
            }),
            EXIT_INTEGRITY
        );
        assert_eq!(
            resolve_exit_code(&ResolveError::DonorWithoutDonations { donor_id: 4 }),
            EXIT_INTEGRITY
        );
    }

    #[test]
    fn store_errors_map_to_codes() {
        assert_eq!(store_exit_code(&StoreError::InvalidTableName("a b".into())), EXIT_INVALID_CONFIG);
        assert_eq!(
            store_exit_code(&StoreError::Value {
                table: "donations".into(),
                record_id: "1".into(),
                column: "sum_confirmed".into(),
                value: "'abc'".into(),
            }),
            EXIT_INPUT
        );
    }
}
