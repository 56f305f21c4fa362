//! CSV and JSON export of a corrected run.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::info;

use crate::check::{DONATION_COLUMNS, DONOR_COLUMNS, DONOR_MAP_COLUMNS, TAX_UNIT_COLUMNS};
use crate::error::ResolveError;
use crate::model::ResolveResult;

pub const DONORS_FILE: &str = "donors.csv";
pub const DONATIONS_FILE: &str = "donations.csv";
pub const TAX_UNITS_FILE: &str = "tax_units.csv";
pub const DONOR_MAP_FILE: &str = "donor_map.csv";

/// Write `rows` as CSV under an explicit header. The header is written even
/// when there are no rows.
pub fn write_csv<W, T>(writer: W, header: &[&str], rows: &[T]) -> Result<(), ResolveError>
where
    W: Write,
    T: Serialize,
{
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(writer);
    wtr.write_record(header)?;
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn to_csv_string<T: Serialize>(header: &[&str], rows: &[T]) -> Result<String, ResolveError> {
    let mut buf = Vec::new();
    write_csv(&mut buf, header, rows)?;
    String::from_utf8(buf).map_err(|e| ResolveError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))
}

/// Write the four corrected tables into `dir`, creating it if needed.
/// Returns the written paths.
///
/// Every table is first staged as a hidden temp file in `dir`; the tables
/// replace existing files only once all four are staged. A failed write
/// removes the staged files and leaves `dir` as it was.
pub fn write_result(dir: &Path, result: &ResolveResult) -> Result<Vec<PathBuf>, ResolveError> {
    fs::create_dir_all(dir)?;

    let tables = [
        (DONORS_FILE, to_csv_string(DONOR_COLUMNS, &result.donors)?),
        (DONATIONS_FILE, to_csv_string(DONATION_COLUMNS, &result.donations)?),
        (TAX_UNITS_FILE, to_csv_string(TAX_UNIT_COLUMNS, &result.tax_units)?),
        (DONOR_MAP_FILE, to_csv_string(DONOR_MAP_COLUMNS, result.donor_map.entries())?),
    ];

    let mut staged: Vec<(PathBuf, PathBuf)> = Vec::with_capacity(tables.len());
    for (file, csv) in &tables {
        let tmp = staging_path(dir, file);
        if let Err(e) = fs::write(&tmp, csv) {
            discard(&staged);
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        staged.push((tmp, dir.join(file)));
    }

    let mut written = Vec::with_capacity(staged.len());
    for (i, (tmp, path)) in staged.iter().enumerate() {
        if let Err(e) = fs::rename(tmp, path) {
            discard(&staged[i..]);
            return Err(e.into());
        }
        written.push(path.clone());
    }

    info!(dir = %dir.display(), files = written.len(), "corrected tables written");
    Ok(written)
}

fn staging_path(dir: &Path, file: &str) -> PathBuf {
    dir.join(format!(".{file}.tmp"))
}

fn discard(staged: &[(PathBuf, PathBuf)]) {
    for (tmp, _) in staged {
        let _ = fs::remove_file(tmp);
    }
}

pub fn to_json_string(result: &ResolveResult) -> Result<String, ResolveError> {
    serde_json::to_string_pretty(result).map_err(|e| ResolveError::Io(e.into()))
}

pub fn write_json(path: &Path, result: &ResolveResult) -> Result<(), ResolveError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, to_json_string(result)?)?;
    info!(path = %path.display(), "result JSON written");
    Ok(())
}
