//! Registration date normalization.

use std::collections::HashMap;

use chrono::NaiveDateTime;
use tracing::debug;

use crate::error::ResolveError;
use crate::model::{Donation, Donor, DonorId};

/// Replace each donor's registration timestamp with their earliest confirmed
/// donation. A donor without donations is an integrity error.
pub fn normalize_registration(
    donors: Vec<Donor>,
    donations: &[Donation],
) -> Result<Vec<Donor>, ResolveError> {
    let mut first: HashMap<DonorId, NaiveDateTime> = HashMap::new();
    for ds in donations {
        first
            .entry(ds.donor_id)
            .and_modify(|ts| *ts = (*ts).min(ds.timestamp_confirmed))
            .or_insert(ds.timestamp_confirmed);
    }

    let mut changed = 0usize;
    let donors = donors
        .into_iter()
        .map(|mut donor| -> Result<Donor, ResolveError> {
            let ts = *first
                .get(&donor.id)
                .ok_or(ResolveError::DonorWithoutDonations { donor_id: donor.id })?;
            if donor.date_registered != ts {
                changed += 1;
                donor.date_registered = ts;
            }
            Ok(donor)
        })
        .collect::<Result<Vec<_>, _>>()?;

    debug!(changed, "registration dates normalized");
    Ok(donors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts(month: u32, day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, month, day)
            .unwrap()
            .and_hms_opt(8, 30, 0)
            .unwrap()
    }

    fn donor(id: DonorId, registered: NaiveDateTime) -> Donor {
        Donor {
            id,
            date_registered: registered,
            name_group: None,
            has_password: true,
            is_person: true,
            is_anonymous: false,
            meta_owner_id: None,
            newsletter: false,
        }
    }

    fn donation(id: i64, donor_id: DonorId, at: NaiveDateTime) -> Donation {
        Donation {
            id,
            donor_id,
            timestamp_confirmed: at,
            amount_cents: 100,
            payment_id: 1,
            distribution_key: None,
        }
    }

    #[test]
    fn uses_earliest_donation() {
        let donors = vec![donor(1, ts(1, 1)), donor(2, ts(5, 5))];
        let donations = vec![
            donation(10, 1, ts(3, 1)),
            donation(11, 1, ts(2, 14)),
            donation(12, 2, ts(5, 5)),
        ];
        let out = normalize_registration(donors, &donations).unwrap();
        assert_eq!(out[0].date_registered, ts(2, 14));
        assert_eq!(out[1].date_registered, ts(5, 5));
    }

    #[test]
    fn donor_without_donations_is_an_error() {
        let donors = vec![donor(1, ts(1, 1)), donor(2, ts(1, 1))];
        let donations = vec![donation(10, 1, ts(3, 1))];
        let err = normalize_registration(donors, &donations).unwrap_err();
        assert!(matches!(err, ResolveError::DonorWithoutDonations { donor_id: 2 }));
    }
}
