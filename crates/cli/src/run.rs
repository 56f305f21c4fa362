//! `ggrid run`, `ggrid validate`, `ggrid classify`: config-driven resolution runs.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use serde::Serialize;
use tracing::{debug, info};

use givegrid_resolve::config::{RunConfig, SourceConfig};
use givegrid_resolve::export::{write_json, write_result};
use givegrid_resolve::model::{serialize_timestamp, DonorId, ResolveResult, Snapshot};
use givegrid_resolve::recurring::{classify, DonationEvent};
use givegrid_resolve::{load, run_with_reference, ResolveError};
use givegrid_store::{SqliteStore, StoreError};

use crate::exit_codes::{
    resolve_exit_code, store_exit_code, EXIT_ERROR, EXIT_INPUT, EXIT_OUTPUT, EXIT_USAGE,
};
use crate::CliError;

fn run_err(code: u8, msg: impl Into<String>) -> CliError {
    CliError { code, message: msg.into(), hint: None }
}

impl From<ResolveError> for CliError {
    fn from(err: ResolveError) -> Self {
        run_err(resolve_exit_code(&err), err.to_string())
    }
}

impl From<StoreError> for CliError {
    fn from(err: StoreError) -> Self {
        run_err(store_exit_code(&err), err.to_string())
    }
}

// ---------------------------------------------------------------------------
// Shared loading
// ---------------------------------------------------------------------------

/// Config file plus the directory its relative paths resolve against.
struct LoadedConfig {
    config: RunConfig,
    base_dir: PathBuf,
}

impl LoadedConfig {
    fn read(path: &Path) -> Result<Self, CliError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            run_err(EXIT_USAGE, format!("cannot read config {}: {e}", path.display()))
                .with_hint("pass the path to a run .toml file")
        })?;
        let config = RunConfig::from_toml(&text)?;
        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Ok(Self { config, base_dir })
    }

    fn resolve_path(&self, relative: &str) -> PathBuf {
        self.base_dir.join(relative)
    }

    fn load_snapshot(&self) -> Result<Snapshot, CliError> {
        match &self.config.source {
            SourceConfig::Csv {
                donors,
                donations,
                tax_units,
                distributions,
            } => {
                let donors = self.read_source(donors)?;
                let donations = self.read_source(donations)?;
                let tax_units = self.read_source(tax_units)?;
                let distributions = distributions
                    .as_deref()
                    .map(|file| self.read_source(file))
                    .transpose()?;
                Ok(load::load_snapshot(
                    &donors,
                    &donations,
                    &tax_units,
                    distributions.as_deref(),
                )?)
            }
            SourceConfig::Sqlite { path, tables } => {
                let path = self.resolve_path(path);
                if !path.exists() {
                    return Err(run_err(EXIT_INPUT, format!("database not found: {}", path.display())));
                }
                let store = SqliteStore::open(&path, tables.clone())?;
                Ok(store.load_snapshot()?)
            }
        }
    }

    fn read_source(&self, file: &str) -> Result<String, CliError> {
        let path = self.resolve_path(file);
        debug!(path = %path.display(), "reading source table");
        std::fs::read_to_string(&path)
            .map_err(|e| run_err(EXIT_INPUT, format!("cannot read {}: {e}", path.display())))
    }

    fn execute(&self, reference: Option<NaiveDateTime>) -> Result<ResolveResult, CliError> {
        let snapshot = self.load_snapshot()?;
        let reference = reference
            .or(self.config.reference_instant)
            .unwrap_or_else(|| chrono::Local::now().naive_local());
        Ok(run_with_reference(&self.config.name, snapshot, &self.config.recurring, reference)?)
    }
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

pub fn cmd_run(
    config_path: PathBuf,
    output_dir: Option<PathBuf>,
    json_output: bool,
    output_file: Option<PathBuf>,
    reference: Option<NaiveDateTime>,
) -> Result<(), CliError> {
    let loaded = LoadedConfig::read(&config_path)?;
    let result = loaded.execute(reference)?;

    // CLI flags are relative to the working directory, config paths to the
    // config file.
    let output_dir = output_dir.or_else(|| loaded.config.output.dir.as_deref().map(|d| loaded.resolve_path(d)));
    let output_file =
        output_file.or_else(|| loaded.config.output.json.as_deref().map(|f| loaded.resolve_path(f)));

    if let Some(dir) = &output_dir {
        let written = write_result(dir, &result)
            .map_err(|e| run_err(EXIT_OUTPUT, format!("cannot write {}: {e}", dir.display())))?;
        for path in written {
            eprintln!("wrote {}", path.display());
        }
    }

    if let Some(path) = &output_file {
        write_json(path, &result)
            .map_err(|e| run_err(EXIT_OUTPUT, format!("cannot write output: {e}")))?;
        eprintln!("wrote {}", path.display());
    }

    if json_output {
        let json_str = serde_json::to_string_pretty(&result)
            .map_err(|e| run_err(EXIT_ERROR, format!("JSON serialization error: {e}")))?;
        println!("{json_str}");
    }

    let s = &result.summary;
    eprintln!(
        "{}: {} donors → {} ({} merged by name, {} by ssn), {} donations, {} tax units, {} recurring ({} with agreement)",
        result.meta.run_name,
        s.raw_donors,
        s.donors,
        s.merged_by_name,
        s.merged_by_ssn,
        s.donations,
        s.tax_units,
        s.recurring,
        s.with_agreement,
    );
    if s.skipped_groups > 0 {
        eprintln!("  {} duplicate group(s) skipped (no donations)", s.skipped_groups);
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// validate
// ---------------------------------------------------------------------------

pub fn cmd_validate(config_path: PathBuf) -> Result<(), CliError> {
    let loaded = LoadedConfig::read(&config_path)?;
    let config = &loaded.config;
    eprintln!(
        "valid: \"{}\" ({} source, agreement payment ids {:?})",
        config.name,
        config.source.kind(),
        config.recurring.agreement_payment_ids,
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// classify
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ClassifyRow {
    donor_id: DonorId,
    resolved_donor_id: DonorId,
    is_recurring: bool,
    has_agreement: bool,
}

#[derive(Debug, Serialize)]
struct ClassifyOutput {
    #[serde(serialize_with = "serialize_timestamp")]
    reference_instant: NaiveDateTime,
    recurring: usize,
    with_agreement: usize,
    donors: Vec<ClassifyRow>,
}

/// Resolve the dataset, then rerun the recurring classifier at `at`.
/// Donor ids merged away are followed to the donor that absorbed them.
pub fn cmd_classify(
    config_path: PathBuf,
    at: NaiveDateTime,
    donors: Vec<DonorId>,
    json_output: bool,
) -> Result<(), CliError> {
    let loaded = LoadedConfig::read(&config_path)?;
    let result = loaded.execute(None)?;

    let requested: Vec<(DonorId, DonorId)> = if donors.is_empty() {
        result.donors.iter().map(|d| (d.donor_id, d.donor_id)).collect()
    } else {
        donors
            .iter()
            .map(|&id| (id, result.donor_map.resolve(id)))
            .collect()
    };

    let known: HashSet<DonorId> = result.donors.iter().map(|d| d.donor_id).collect();
    if let Some(id) = first_unknown(&requested, &known) {
        return Err(run_err(EXIT_USAGE, format!("donor {id} is not in the corrected dataset"))
            .with_hint("donors without donations are excluded before resolution"));
    }

    let events: Vec<DonationEvent> = result.donations.iter().map(DonationEvent::from).collect();
    let ids: Vec<DonorId> = requested.iter().map(|&(_, resolved)| resolved).collect();
    let status = classify(&ids, &events, at, &loaded.config.recurring);

    let rows: Vec<ClassifyRow> = requested
        .iter()
        .map(|&(donor_id, resolved)| {
            let s = status.get(&resolved).copied().unwrap_or_default();
            ClassifyRow {
                donor_id,
                resolved_donor_id: resolved,
                is_recurring: s.is_recurring,
                has_agreement: s.has_agreement,
            }
        })
        .collect();
    let output = ClassifyOutput {
        reference_instant: at,
        recurring: rows.iter().filter(|r| r.is_recurring).count(),
        with_agreement: rows.iter().filter(|r| r.has_agreement).count(),
        donors: rows,
    };
    info!(at = %at, donors = output.donors.len(), recurring = output.recurring, "reclassified");

    if json_output {
        let json_str = serde_json::to_string_pretty(&output)
            .map_err(|e| run_err(EXIT_ERROR, format!("JSON serialization error: {e}")))?;
        println!("{json_str}");
        return Ok(());
    }

    println!("{:>10}  {:>10}  {:<9}  {:<9}", "donor", "resolved", "recurring", "agreement");
    for row in &output.donors {
        println!(
            "{:>10}  {:>10}  {:<9}  {:<9}",
            row.donor_id,
            row.resolved_donor_id,
            yes_no(row.is_recurring),
            yes_no(row.has_agreement),
        );
    }
    eprintln!(
        "{} of {} donor(s) recurring at {} ({} with agreement)",
        output.recurring,
        output.donors.len(),
        at,
        output.with_agreement,
    );
    Ok(())
}

/// First requested id whose resolved donor is not in `known`.
fn first_unknown(requested: &[(DonorId, DonorId)], known: &HashSet<DonorId>) -> Option<DonorId> {
    requested
        .iter()
        .find(|(_, resolved)| !known.contains(resolved))
        .map(|&(id, _)| id)
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}

/// clap value parser for timestamp arguments.
pub fn parse_timestamp_arg(value: &str) -> Result<NaiveDateTime, String> {
    load::parse_timestamp(value)
        .ok_or_else(|| format!("invalid timestamp '{value}' (expected YYYY-MM-DD[ HH:MM:SS])"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_arguments() {
        assert_eq!(
            parse_timestamp_arg("2026-05-26").unwrap().to_string(),
            "2026-05-26 00:00:00"
        );
        assert!(parse_timestamp_arg("2026-05-26T08:30:00").is_ok());
        assert!(parse_timestamp_arg("soon").is_err());
    }

    #[test]
    fn unknown_donor_reports_requested_id() {
        let known: HashSet<DonorId> = [2, 4, 7].into_iter().collect();
        assert_eq!(first_unknown(&[(1, 2), (7, 7)], &known), None);
        assert_eq!(first_unknown(&[(1, 2), (8, 8), (9, 9)], &known), Some(8));
        assert_eq!(first_unknown(&[], &known), None);
    }

    #[test]
    fn engine_error_keeps_exit_code() {
        let err: CliError = ResolveError::ConfigValidation("name must not be empty".into()).into();
        assert_eq!(err.code, crate::exit_codes::EXIT_INVALID_CONFIG);
        assert!(err.message.contains("name must not be empty"));
    }
}
