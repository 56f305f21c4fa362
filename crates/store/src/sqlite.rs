use std::path::Path;

use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::types::Value;
use rusqlite::{Connection, OpenFlags};
use tracing::{info, warn};

use givegrid_resolve::config::TableNames;
use givegrid_resolve::load::{parse_amount_cents, parse_flag, parse_timestamp};
use givegrid_resolve::model::{DistributionLink, Donation, Donor, Snapshot, TaxUnit};

use crate::error::StoreError;

/// Read-only view over the four source tables.
pub struct SqliteStore {
    conn: Connection,
    tables: TableNames,
}

impl SqliteStore {
    /// Open an existing database read-only.
    pub fn open(path: &Path, tables: TableNames) -> Result<Self, StoreError> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Self::from_connection(conn, tables)
    }

    pub fn from_connection(conn: Connection, tables: TableNames) -> Result<Self, StoreError> {
        for name in [
            &tables.donors,
            &tables.donations,
            &tables.tax_units,
            &tables.distributions,
        ] {
            validate_identifier(name)?;
        }
        Ok(Self { conn, tables })
    }

    pub fn load_snapshot(&self) -> Result<Snapshot, StoreError> {
        let snapshot = Snapshot {
            donors: self.load_donors()?,
            donations: self.load_donations()?,
            tax_units: self.load_tax_units()?,
            distribution_links: self.load_distribution_links()?,
        };
        info!(
            donors = snapshot.donors.len(),
            donations = snapshot.donations.len(),
            tax_units = snapshot.tax_units.len(),
            links = snapshot.distribution_links.len(),
            "snapshot read from sqlite"
        );
        Ok(snapshot)
    }

    fn load_donors(&self) -> Result<Vec<Donor>, StoreError> {
        let t = &self.tables;
        let sql = format!(
            "SELECT d.donor_id, d.date_registered, d.name_group, d.has_password, d.is_person, \
                    d.is_anonymous, d.meta_owner_id, d.newsletter \
             FROM \"{donors}\" d \
             WHERE EXISTS (SELECT 1 FROM \"{donations}\" ds WHERE ds.donor_id = d.donor_id) \
             ORDER BY d.donor_id",
            donors = t.donors,
            donations = t.donations,
        );
        self.select(&sql, 8)?
            .into_iter()
            .map(|values| -> Result<Donor, StoreError> {
                let row = StoredRow::new(&t.donors, values);
                Ok(Donor {
                    id: row.int(0, "donor_id")?,
                    date_registered: row.timestamp(1, "date_registered")?,
                    name_group: row.opt_int(2, "name_group")?,
                    has_password: row.flag(3, "has_password")?,
                    is_person: row.flag(4, "is_person")?,
                    is_anonymous: row.flag(5, "is_anonymous")?,
                    meta_owner_id: row.opt_int(6, "meta_owner_id")?,
                    newsletter: row.flag(7, "newsletter")?,
                })
            })
            .collect()
    }

    fn load_donations(&self) -> Result<Vec<Donation>, StoreError> {
        let t = &self.tables;
        let sql = format!(
            "SELECT ds.id, ds.donor_id, ds.timestamp_confirmed, ds.sum_confirmed, ds.payment_id, \
                    ds.distribution_key \
             FROM \"{donations}\" ds \
             INNER JOIN \"{donors}\" d ON d.donor_id = ds.donor_id \
             ORDER BY ds.id",
            donors = t.donors,
            donations = t.donations,
        );
        self.select(&sql, 6)?
            .into_iter()
            .map(|values| -> Result<Donation, StoreError> {
                let row = StoredRow::new(&t.donations, values);
                Ok(Donation {
                    id: row.int(0, "id")?,
                    donor_id: row.int(1, "donor_id")?,
                    timestamp_confirmed: row.timestamp(2, "timestamp_confirmed")?,
                    amount_cents: row.cents(3, "sum_confirmed")?,
                    payment_id: row.int(4, "payment_id")?,
                    distribution_key: row.opt_text(5),
                })
            })
            .collect()
    }

    fn load_tax_units(&self) -> Result<Vec<TaxUnit>, StoreError> {
        let t = &self.tables;
        let sql = format!(
            "SELECT tu.id, tu.donor_id, tu.is_business, tu.ssn, tu.gender, tu.birthdate \
             FROM \"{tax_units}\" tu \
             INNER JOIN \"{donors}\" d ON d.donor_id = tu.donor_id \
             WHERE EXISTS (SELECT 1 FROM \"{donations}\" ds WHERE ds.donor_id = tu.donor_id) \
             ORDER BY tu.id",
            tax_units = t.tax_units,
            donors = t.donors,
            donations = t.donations,
        );
        self.select(&sql, 6)?
            .into_iter()
            .map(|values| -> Result<TaxUnit, StoreError> {
                let row = StoredRow::new(&t.tax_units, values);
                Ok(TaxUnit {
                    id: row.int(0, "id")?,
                    donor_id: row.int(1, "donor_id")?,
                    is_business: row.flag(2, "is_business")?,
                    ssn: row.text(3),
                    gender: row.opt_text(4),
                    birthdate: row.opt_date(5, "birthdate")?,
                })
            })
            .collect()
    }

    /// A store without a distributions table attributes no donation to a
    /// business.
    fn load_distribution_links(&self) -> Result<Vec<DistributionLink>, StoreError> {
        let t = &self.tables;
        if !self.table_exists(&t.distributions)? {
            warn!(table = %t.distributions, "distributions table not found, no donation will be marked as business");
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT DISTINCT distribution_key, tax_unit_id \
             FROM \"{links}\" \
             WHERE distribution_key IS NOT NULL AND distribution_key <> '' \
             ORDER BY distribution_key, tax_unit_id",
            links = t.distributions,
        );
        self.select(&sql, 2)?
            .into_iter()
            .map(|values| -> Result<DistributionLink, StoreError> {
                let row = StoredRow::new(&t.distributions, values);
                Ok(DistributionLink {
                    distribution_key: row.text(0),
                    tax_unit_id: row.int(1, "tax_unit_id")?,
                })
            })
            .collect()
    }

    fn table_exists(&self, name: &str) -> Result<bool, StoreError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type IN ('table', 'view') AND name = ?1",
            [name],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn select(&self, sql: &str, width: usize) -> Result<Vec<Vec<Value>>, StoreError> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map([], |row| {
            (0..width)
                .map(|i| row.get::<_, Value>(i))
                .collect::<Result<Vec<_>, _>>()
        })?;
        let values = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(values)
    }
}

/// Table names are interpolated into SQL, so only plain identifiers pass.
fn validate_identifier(name: &str) -> Result<(), StoreError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidTableName(name.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Value conversion
// ---------------------------------------------------------------------------

/// One selected row. Column 0 is the record id used in error messages.
struct StoredRow<'a> {
    table: &'a str,
    values: Vec<Value>,
}

impl<'a> StoredRow<'a> {
    fn new(table: &'a str, values: Vec<Value>) -> Self {
        Self { table, values }
    }

    fn value(&self, idx: usize) -> &Value {
        self.values.get(idx).unwrap_or(&Value::Null)
    }

    fn error(&self, idx: usize, column: &str) -> StoreError {
        let record_id = match self.value(0) {
            Value::Integer(n) => n.to_string(),
            Value::Text(s) => s.clone(),
            other => format!("{other:?}"),
        };
        StoreError::Value {
            table: self.table.to_string(),
            record_id,
            column: column.to_string(),
            value: format!("{:?}", self.value(idx)),
        }
    }

    fn int(&self, idx: usize, column: &str) -> Result<i64, StoreError> {
        match self.value(idx) {
            Value::Integer(n) => Ok(*n),
            Value::Real(f) if f.fract() == 0.0 => Ok(*f as i64),
            Value::Text(s) => s.trim().parse().map_err(|_| self.error(idx, column)),
            _ => Err(self.error(idx, column)),
        }
    }

    fn opt_int(&self, idx: usize, column: &str) -> Result<Option<i64>, StoreError> {
        match self.value(idx) {
            Value::Null => Ok(None),
            Value::Text(s) if s.trim().is_empty() => Ok(None),
            _ => self.int(idx, column).map(Some),
        }
    }

    fn flag(&self, idx: usize, column: &str) -> Result<bool, StoreError> {
        match self.value(idx) {
            Value::Null => Ok(false),
            Value::Integer(n) => Ok(*n != 0),
            Value::Text(s) => parse_flag(s).ok_or_else(|| self.error(idx, column)),
            _ => Err(self.error(idx, column)),
        }
    }

    fn timestamp(&self, idx: usize, column: &str) -> Result<NaiveDateTime, StoreError> {
        match self.value(idx) {
            Value::Text(s) => parse_timestamp(s).ok_or_else(|| self.error(idx, column)),
            _ => Err(self.error(idx, column)),
        }
    }

    fn opt_date(&self, idx: usize, column: &str) -> Result<Option<NaiveDate>, StoreError> {
        match self.value(idx) {
            Value::Null => Ok(None),
            Value::Text(s) if s.trim().is_empty() => Ok(None),
            Value::Text(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                .ok()
                .or_else(|| parse_timestamp(s).map(|ts| ts.date()))
                .map(Some)
                .ok_or_else(|| self.error(idx, column)),
            _ => Err(self.error(idx, column)),
        }
    }

    /// Amounts stored as integers are whole currency units.
    fn cents(&self, idx: usize, column: &str) -> Result<i64, StoreError> {
        match self.value(idx) {
            Value::Integer(n) => n.checked_mul(100).ok_or_else(|| self.error(idx, column)),
            Value::Real(f) if f.is_finite() => Ok((f * 100.0).round() as i64),
            Value::Text(s) => parse_amount_cents(s).ok_or_else(|| self.error(idx, column)),
            _ => Err(self.error(idx, column)),
        }
    }

    fn text(&self, idx: usize) -> String {
        match self.value(idx) {
            Value::Text(s) => s.trim().to_string(),
            Value::Integer(n) => n.to_string(),
            _ => String::new(),
        }
    }

    fn opt_text(&self, idx: usize) -> Option<String> {
        let text = self.text(idx);
        (!text.is_empty()).then_some(text)
    }
}
