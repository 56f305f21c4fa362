//! Key numbers over the corrected dataset.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::model::{DonorId, ResolvedDonation, ResolvedDonor};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct KeyNumbers {
    pub unique_donors: usize,
    pub donation_count: usize,
    pub total_amount_cents: i64,
}

pub fn key_numbers<'a>(donations: impl IntoIterator<Item = &'a ResolvedDonation>) -> KeyNumbers {
    let mut donors: HashSet<DonorId> = HashSet::new();
    let mut numbers = KeyNumbers::default();
    for ds in donations {
        donors.insert(ds.donor_id);
        numbers.donation_count += 1;
        numbers.total_amount_cents += ds.amount_cents;
    }
    numbers.unique_donors = donors.len();
    numbers
}

/// Donations whose donor is known and not anonymous.
pub fn non_anonymous_donations<'a>(
    donations: &'a [ResolvedDonation],
    donors: &[ResolvedDonor],
) -> Vec<&'a ResolvedDonation> {
    let anonymous: HashMap<DonorId, bool> = donors.iter().map(|d| (d.donor_id, d.is_anonymous)).collect();
    donations
        .iter()
        .filter(|ds| anonymous.get(&ds.donor_id) == Some(&false))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn donor(id: DonorId, is_anonymous: bool) -> ResolvedDonor {
        ResolvedDonor {
            donor_id: id,
            date_registered: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap(),
            has_password: false,
            is_person: true,
            is_anonymous,
            meta_owner_id: None,
            newsletter: false,
            has_business_tax_unit: false,
            multiple_personal_tax_units: false,
            is_recurring: false,
            has_agreement: false,
            female: None,
        }
    }

    fn donation(id: i64, donor_id: DonorId, cents: i64) -> ResolvedDonation {
        ResolvedDonation {
            id,
            donor_id,
            timestamp_confirmed: NaiveDate::from_ymd_opt(2026, 2, 1).unwrap().and_hms_opt(0, 0, 0).unwrap(),
            amount_cents: cents,
            payment_id: 1,
            distribution_key: None,
            from_business: false,
        }
    }

    #[test]
    fn counts_and_totals() {
        let donations = vec![donation(1, 1, 1000), donation(2, 1, 250), donation(3, 2, 50)];
        let numbers = key_numbers(&donations);
        assert_eq!(
            numbers,
            KeyNumbers {
                unique_donors: 2,
                donation_count: 3,
                total_amount_cents: 1300,
            }
        );
    }

    #[test]
    fn empty_input() {
        assert_eq!(key_numbers(&[]), KeyNumbers::default());
    }

    #[test]
    fn anonymous_and_unknown_donors_are_excluded() {
        let donors = vec![donor(1, false), donor(2, true)];
        let donations = vec![donation(1, 1, 100), donation(2, 2, 200), donation(3, 3, 400)];
        let kept = non_anonymous_donations(&donations, &donors);
        let ids: Vec<i64> = kept.iter().map(|ds| ds.id).collect();
        assert_eq!(ids, vec![1]);
        assert_eq!(key_numbers(kept).total_amount_cents, 100);
    }
}
