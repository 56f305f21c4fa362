//! CSV snapshot loading.
//!
//! Every table is read by header name, so column order in the extract does not
//! matter. Extra columns are ignored.

use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime};
use csv::StringRecord;

use crate::check::check_columns;
use crate::error::ResolveError;
use crate::model::{DistributionLink, Donation, Donor, Snapshot, TaxUnit};

const TIMESTAMP_LAYOUTS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

// ---------------------------------------------------------------------------
// Value parsing
// ---------------------------------------------------------------------------

/// Parse `YYYY-MM-DD HH:MM:SS[.f]`, the `T`-separated form, or a bare date
/// (midnight).
pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    TIMESTAMP_LAYOUTS
        .iter()
        .find_map(|layout| NaiveDateTime::parse_from_str(value, layout).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// `1/0`, `true/false`, `yes/no` in any case. Empty is false.
pub fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "" | "0" | "false" | "no" => Some(false),
        "1" | "true" | "yes" => Some(true),
        _ => None,
    }
}

/// Decimal amount to integer cents. Digits beyond the second decimal must be
/// zero; anything that would lose precision is rejected.
pub fn parse_amount_cents(value: &str) -> Option<i64> {
    let value = value.trim();
    let (negative, digits) = match value.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, value.strip_prefix('+').unwrap_or(value)),
    };
    let (whole, frac) = match digits.split_once('.') {
        Some((whole, frac)) => (whole, frac),
        None => (digits, ""),
    };
    if whole.is_empty() || !whole.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if !frac.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if frac.len() > 2 && !frac[2..].bytes().all(|b| b == b'0') {
        return None;
    }

    let mut cents_part = 0i64;
    for (i, b) in frac.bytes().take(2).enumerate() {
        let digit = i64::from(b - b'0');
        cents_part += if i == 0 { digit * 10 } else { digit };
    }

    let cents = whole
        .parse::<i64>()
        .ok()?
        .checked_mul(100)?
        .checked_add(cents_part)?;
    Some(if negative { -cents } else { cents })
}

// ---------------------------------------------------------------------------
// Row access
// ---------------------------------------------------------------------------

/// Typed cell access for one CSV record, reporting failures with the table
/// and record id.
struct RowReader<'a> {
    table: &'a str,
    record: &'a StringRecord,
    record_id: String,
}

impl<'a> RowReader<'a> {
    fn new(table: &'a str, record: &'a StringRecord, id_idx: usize) -> Self {
        Self {
            table,
            record,
            record_id: record.get(id_idx).unwrap_or("").trim().to_string(),
        }
    }

    fn raw(&self, idx: usize) -> &'a str {
        self.record.get(idx).unwrap_or("").trim()
    }

    fn error(&self, column: &str, value: &str) -> ResolveError {
        ResolveError::ValueParse {
            table: self.table.into(),
            record_id: self.record_id.clone(),
            column: column.into(),
            value: value.into(),
        }
    }

    fn required<T>(
        &self,
        idx: usize,
        column: &str,
        parse: impl Fn(&str) -> Option<T>,
    ) -> Result<T, ResolveError> {
        let value = self.raw(idx);
        parse(value).ok_or_else(|| self.error(column, value))
    }

    /// Empty cells are `None`.
    fn optional<T>(
        &self,
        idx: usize,
        column: &str,
        parse: impl Fn(&str) -> Option<T>,
    ) -> Result<Option<T>, ResolveError> {
        let value = self.raw(idx);
        if value.is_empty() {
            return Ok(None);
        }
        parse(value).map(Some).ok_or_else(|| self.error(column, value))
    }

    fn id(&self, idx: usize, column: &str) -> Result<i64, ResolveError> {
        self.required(idx, column, parse_number)
    }

    fn flag(&self, idx: usize, column: &str) -> Result<bool, ResolveError> {
        self.required(idx, column, parse_flag)
    }

    fn text(&self, idx: usize) -> Option<String> {
        let value = self.raw(idx);
        (!value.is_empty()).then(|| value.to_string())
    }
}

fn parse_number<T: FromStr>(value: &str) -> Option<T> {
    value.parse().ok()
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .or_else(|| parse_timestamp(value).map(|ts| ts.date()))
}

/// Open a CSV table and resolve the required columns to indices.
fn open_table<'a, const N: usize>(
    table: &str,
    csv_data: &'a str,
    columns: [&str; N],
) -> Result<(csv::Reader<&'a [u8]>, [usize; N]), ResolveError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::Headers)
        .from_reader(csv_data.as_bytes());

    let headers: Vec<String> = reader.headers()?.iter().map(|h| h.to_string()).collect();
    check_columns(table, &headers)?;

    let idx = |name: &str| -> Result<usize, ResolveError> {
        headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| ResolveError::MissingColumn {
                table: table.into(),
                column: name.into(),
            })
    };

    let mut indices = [0usize; N];
    for (slot, column) in indices.iter_mut().zip(columns) {
        *slot = idx(column)?;
    }
    Ok((reader, indices))
}

// ---------------------------------------------------------------------------
// Tables
// ---------------------------------------------------------------------------

pub fn load_donors(csv_data: &str) -> Result<Vec<Donor>, ResolveError> {
    const TABLE: &str = "donors";
    let (mut reader, [id, registered, name_group, password, person, anonymous, owner, newsletter]) =
        open_table(
            TABLE,
            csv_data,
            [
                "donor_id",
                "date_registered",
                "name_group",
                "has_password",
                "is_person",
                "is_anonymous",
                "meta_owner_id",
                "newsletter",
            ],
        )?;

    let mut donors = Vec::new();
    for record in reader.records() {
        let record = record?;
        let row = RowReader::new(TABLE, &record, id);
        donors.push(Donor {
            id: row.id(id, "donor_id")?,
            date_registered: row.required(registered, "date_registered", parse_timestamp)?,
            name_group: row.optional(name_group, "name_group", parse_number)?,
            has_password: row.flag(password, "has_password")?,
            is_person: row.flag(person, "is_person")?,
            is_anonymous: row.flag(anonymous, "is_anonymous")?,
            meta_owner_id: row.optional(owner, "meta_owner_id", parse_number)?,
            newsletter: row.flag(newsletter, "newsletter")?,
        });
    }
    Ok(donors)
}

pub fn load_donations(csv_data: &str) -> Result<Vec<Donation>, ResolveError> {
    const TABLE: &str = "donations";
    let (mut reader, [id, donor_id, confirmed, sum, payment, key]) = open_table(
        TABLE,
        csv_data,
        [
            "id",
            "donor_id",
            "timestamp_confirmed",
            "sum_confirmed",
            "payment_id",
            "distribution_key",
        ],
    )?;

    let mut donations = Vec::new();
    for record in reader.records() {
        let record = record?;
        let row = RowReader::new(TABLE, &record, id);
        donations.push(Donation {
            id: row.id(id, "id")?,
            donor_id: row.id(donor_id, "donor_id")?,
            timestamp_confirmed: row.required(confirmed, "timestamp_confirmed", parse_timestamp)?,
            amount_cents: row.required(sum, "sum_confirmed", parse_amount_cents)?,
            payment_id: row.id(payment, "payment_id")?,
            distribution_key: row.text(key),
        });
    }
    Ok(donations)
}

pub fn load_tax_units(csv_data: &str) -> Result<Vec<TaxUnit>, ResolveError> {
    const TABLE: &str = "tax_units";
    let (mut reader, [id, donor_id, business, ssn, gender, birthdate]) = open_table(
        TABLE,
        csv_data,
        ["id", "donor_id", "is_business", "ssn", "gender", "birthdate"],
    )?;

    let mut tax_units = Vec::new();
    for record in reader.records() {
        let record = record?;
        let row = RowReader::new(TABLE, &record, id);
        tax_units.push(TaxUnit {
            id: row.id(id, "id")?,
            donor_id: row.id(donor_id, "donor_id")?,
            is_business: row.flag(business, "is_business")?,
            ssn: row.raw(ssn).to_string(),
            gender: row.text(gender),
            birthdate: row.optional(birthdate, "birthdate", parse_date)?,
        });
    }
    Ok(tax_units)
}

pub fn load_distribution_links(csv_data: &str) -> Result<Vec<DistributionLink>, ResolveError> {
    const TABLE: &str = "distributions";
    let (mut reader, [key, tax_unit_id]) =
        open_table(TABLE, csv_data, ["distribution_key", "tax_unit_id"])?;

    let mut links = Vec::new();
    for record in reader.records() {
        let record = record?;
        let row = RowReader::new(TABLE, &record, key);
        let Some(distribution_key) = row.text(key) else {
            continue;
        };
        let link = DistributionLink {
            distribution_key,
            tax_unit_id: row.id(tax_unit_id, "tax_unit_id")?,
        };
        if !links.contains(&link) {
            links.push(link);
        }
    }
    Ok(links)
}

/// Load a full snapshot from CSV text. Without a distributions extract no
/// donation can be attributed to a business.
pub fn load_snapshot(
    donors: &str,
    donations: &str,
    tax_units: &str,
    distributions: Option<&str>,
) -> Result<Snapshot, ResolveError> {
    Ok(Snapshot {
        donors: load_donors(donors)?,
        donations: load_donations(donations)?,
        tax_units: load_tax_units(tax_units)?,
        distribution_links: match distributions {
            Some(data) => load_distribution_links(data)?,
            None => Vec::new(),
        },
    })
}
