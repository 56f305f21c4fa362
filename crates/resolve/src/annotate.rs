//! Derived donor and donation attributes.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::NaiveDateTime;

use crate::model::{
    DistributionLink, Donation, Donor, DonorId, RecurringStatus, ResolvedDonation, ResolvedDonor,
    TaxUnit,
};
use crate::recurring::{classify, DonationEvent, RecurringRules};

#[derive(Default)]
struct TaxProfile<'a> {
    has_business: bool,
    personal: Vec<&'a TaxUnit>,
}

/// Attach tax-unit flags, recurring status at `reference`, and ssn gender.
pub fn annotate_donors(
    donors: Vec<Donor>,
    donations: &[Donation],
    tax_units: &[TaxUnit],
    reference: NaiveDateTime,
    rules: &RecurringRules,
) -> Vec<ResolvedDonor> {
    let mut profiles: HashMap<DonorId, TaxProfile<'_>> = HashMap::new();
    for tu in tax_units {
        let profile = profiles.entry(tu.donor_id).or_default();
        if tu.is_business {
            profile.has_business = true;
        } else if !profile.personal.iter().any(|p| p.id == tu.id) {
            profile.personal.push(tu);
        }
    }

    let donor_ids: Vec<DonorId> = donors.iter().map(|d| d.id).collect();
    let events: Vec<DonationEvent> = donations.iter().map(DonationEvent::from).collect();
    let recurring: BTreeMap<DonorId, RecurringStatus> =
        classify(&donor_ids, &events, reference, rules);

    donors
        .into_iter()
        .map(|donor| {
            let profile = profiles.get(&donor.id);
            let has_business_tax_unit = profile.is_some_and(|p| p.has_business);
            let multiple_personal_tax_units = profile.is_some_and(|p| p.personal.len() > 1);
            let female = if donor.is_person && !multiple_personal_tax_units {
                profile.and_then(personal_gender)
            } else {
                None
            };
            let status = recurring.get(&donor.id).copied().unwrap_or_default();

            ResolvedDonor {
                donor_id: donor.id,
                date_registered: donor.date_registered,
                has_password: donor.has_password,
                is_person: donor.is_person,
                is_anonymous: donor.is_anonymous,
                meta_owner_id: donor.meta_owner_id,
                newsletter: donor.newsletter,
                has_business_tax_unit,
                multiple_personal_tax_units,
                is_recurring: status.is_recurring,
                has_agreement: status.has_agreement,
                female,
            }
        })
        .collect()
}

/// Gender recorded on the donor's personal tax unit, if any.
fn personal_gender(profile: &TaxProfile<'_>) -> Option<bool> {
    profile
        .personal
        .iter()
        .filter_map(|tu| tu.gender.as_deref().map(str::trim))
        .find(|g| !g.is_empty())
        .map(|g| g.eq_ignore_ascii_case("F"))
}

/// Flag donations whose distribution resolves to a business tax unit.
/// Unmapped donations and links to dropped tax units resolve to false.
pub fn annotate_donations(
    donations: Vec<Donation>,
    links: &[DistributionLink],
    tax_units: &[TaxUnit],
) -> Vec<ResolvedDonation> {
    let business_units: HashSet<i64> = tax_units
        .iter()
        .filter(|tu| tu.is_business)
        .map(|tu| tu.id)
        .collect();
    let business_keys: HashSet<&str> = links
        .iter()
        .filter(|link| business_units.contains(&link.tax_unit_id))
        .map(|link| link.distribution_key.as_str())
        .collect();

    donations
        .into_iter()
        .map(|ds| {
            let from_business = ds
                .distribution_key
                .as_deref()
                .is_some_and(|key| business_keys.contains(key));
            ResolvedDonation {
                id: ds.id,
                donor_id: ds.donor_id,
                timestamp_confirmed: ds.timestamp_confirmed,
                amount_cents: ds.amount_cents,
                payment_id: ds.payment_id,
                distribution_key: ds.distribution_key,
                from_business,
            }
        })
        .collect()
}
