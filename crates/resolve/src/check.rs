//! Final consistency gate over the corrected tables.

use std::collections::HashSet;

use tracing::info;

use crate::error::ResolveError;
use crate::model::{DonorId, ResolvedDonation, ResolvedDonor, TaxUnit};

pub const DONOR_COLUMNS: &[&str] = &[
    "donor_id",
    "date_registered",
    "has_password",
    "is_person",
    "is_anonymous",
    "meta_owner_id",
    "newsletter",
    "has_business_tax_unit",
    "multiple_personal_tax_units",
    "is_recurring",
    "has_agreement",
    "female",
];

pub const DONATION_COLUMNS: &[&str] = &[
    "id",
    "donor_id",
    "timestamp_confirmed",
    "sum_confirmed",
    "payment_id",
    "distribution_key",
    "from_business",
];

pub const TAX_UNIT_COLUMNS: &[&str] = &["id", "donor_id", "is_business", "ssn", "gender", "birthdate"];

pub const DONOR_MAP_COLUMNS: &[&str] = &["old_donor_id", "new_donor_id", "key"];

/// Reject a column schema that names the same column twice.
pub fn check_columns<I, S>(table: &str, columns: I) -> Result<(), ResolveError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    for column in columns {
        let column = column.as_ref();
        if !seen.insert(column.to_string()) {
            return Err(ResolveError::DuplicateColumn {
                table: table.into(),
                column: column.into(),
            });
        }
    }
    Ok(())
}

/// Verify the corrected dataset before it is handed out.
///
/// Fails on repeated primary keys, repeated output columns, and any donation
/// or tax unit owned by a donor that is not in `donors`.
pub fn check_consistency(
    donors: &[ResolvedDonor],
    donations: &[ResolvedDonation],
    tax_units: &[TaxUnit],
) -> Result<(), ResolveError> {
    check_columns("donors", DONOR_COLUMNS)?;
    check_columns("donations", DONATION_COLUMNS)?;
    check_columns("tax_units", TAX_UNIT_COLUMNS)?;
    check_columns("donor_map", DONOR_MAP_COLUMNS)?;

    check_unique_ids("donors", donors.iter().map(|d| d.donor_id))?;
    check_unique_ids("donations", donations.iter().map(|ds| ds.id))?;
    check_unique_ids("tax_units", tax_units.iter().map(|tu| tu.id))?;

    let known: HashSet<DonorId> = donors.iter().map(|d| d.donor_id).collect();
    for ds in donations {
        if !known.contains(&ds.donor_id) {
            return Err(ResolveError::DanglingReference {
                table: "donations".into(),
                record_id: ds.id,
                donor_id: ds.donor_id,
            });
        }
    }
    for tu in tax_units {
        if !known.contains(&tu.donor_id) {
            return Err(ResolveError::DanglingReference {
                table: "tax_units".into(),
                record_id: tu.id,
                donor_id: tu.donor_id,
            });
        }
    }

    info!(
        donors = donors.len(),
        donations = donations.len(),
        tax_units = tax_units.len(),
        "consistency check passed"
    );
    Ok(())
}

fn check_unique_ids(table: &str, ids: impl Iterator<Item = i64>) -> Result<(), ResolveError> {
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(id) {
            return Err(ResolveError::DuplicateId {
                table: table.into(),
                id,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TIMESTAMP_FORMAT;
    use chrono::NaiveDateTime;

    fn ts() -> NaiveDateTime {
        NaiveDateTime::parse_from_str("2026-02-01 09:30:00", TIMESTAMP_FORMAT).unwrap()
    }

    fn donor(id: DonorId) -> ResolvedDonor {
        ResolvedDonor {
            donor_id: id,
            date_registered: ts(),
            has_password: true,
            is_person: true,
            is_anonymous: false,
            meta_owner_id: None,
            newsletter: false,
            has_business_tax_unit: false,
            multiple_personal_tax_units: false,
            is_recurring: false,
            has_agreement: false,
            female: None,
        }
    }

    fn donation(id: i64, donor_id: DonorId) -> ResolvedDonation {
        ResolvedDonation {
            id,
            donor_id,
            timestamp_confirmed: ts(),
            amount_cents: 100,
            payment_id: 1,
            distribution_key: None,
            from_business: false,
        }
    }

    fn tu(id: i64, donor_id: DonorId) -> TaxUnit {
        TaxUnit {
            id,
            donor_id,
            is_business: false,
            ssn: "1".into(),
            gender: None,
            birthdate: None,
        }
    }

    #[test]
    fn consistent_dataset_passes() {
        let donors = vec![donor(1), donor(2)];
        let donations = vec![donation(10, 1), donation(11, 2)];
        let tax_units = vec![tu(20, 2)];
        check_consistency(&donors, &donations, &tax_units).unwrap();
    }

    #[test]
    fn duplicate_donor_id_fails() {
        let err = check_consistency(&[donor(1), donor(1)], &[donation(10, 1)], &[]).unwrap_err();
        assert!(matches!(err, ResolveError::DuplicateId { ref table, id: 1 } if table == "donors"));
    }

    #[test]
    fn duplicate_donation_id_fails() {
        let err = check_consistency(&[donor(1)], &[donation(10, 1), donation(10, 1)], &[]).unwrap_err();
        assert!(matches!(err, ResolveError::DuplicateId { ref table, id: 10 } if table == "donations"));
    }

    #[test]
    fn dangling_donation_fails() {
        let err = check_consistency(&[donor(1)], &[donation(10, 1), donation(11, 2)], &[]).unwrap_err();
        match err {
            ResolveError::DanglingReference { table, record_id, donor_id } => {
                assert_eq!(table, "donations");
                assert_eq!(record_id, 11);
                assert_eq!(donor_id, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn dangling_tax_unit_fails() {
        let err = check_consistency(&[donor(1)], &[donation(10, 1)], &[tu(20, 5)]).unwrap_err();
        assert!(err.is_integrity_violation());
        assert!(err.to_string().contains("tax_units"));
    }

    #[test]
    fn repeated_column_is_rejected() {
        let err = check_columns("donors", ["donor_id", "newsletter", "donor_id"]).unwrap_err();
        assert!(matches!(err, ResolveError::DuplicateColumn { ref column, .. } if column == "donor_id"));
        check_columns("donors", DONOR_COLUMNS).unwrap();
    }

    #[test]
    fn column_constants_match_serialized_fields() {
        let value = serde_json::to_value(donor(1)).unwrap();
        let keys: Vec<&str> = value.as_object().unwrap().keys().map(String::as_str).collect();
        let mut expected = DONOR_COLUMNS.to_vec();
        expected.sort_unstable();
        let mut keys = keys;
        keys.sort_unstable();
        assert_eq!(keys, expected);

        let value = serde_json::to_value(donation(1, 1)).unwrap();
        let mut keys: Vec<&str> = value.as_object().unwrap().keys().map(String::as_str).collect();
        keys.sort_unstable();
        let mut expected = DONATION_COLUMNS.to_vec();
        expected.sort_unstable();
        assert_eq!(keys, expected);
    }
}
