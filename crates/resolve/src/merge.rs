//! Donor merging - collapses each duplicate cluster into its most recent donor.

use std::collections::HashMap;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::group::DuplicateGroup;
use crate::model::{Donation, Donor, DonorId, DonorMap, MergeKey, TaxUnit};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeStats {
    pub groups: usize,
    pub skipped_groups: usize,
    pub donors_merged: usize,
    pub tax_units_dropped: usize,
}

#[derive(Debug, Clone)]
pub struct MergeOutput {
    pub donors: Vec<Donor>,
    pub donations: Vec<Donation>,
    pub tax_units: Vec<TaxUnit>,
    pub donor_map: DonorMap,
    pub stats: MergeStats,
}

/// Merge every duplicate group into its canonical donor.
///
/// The canonical donor owns the group's latest confirmed donation; ties on the
/// timestamp go to the donation with the highest ID. Donations of the other
/// donors are re-pointed to it. Donor and tax-unit rows of every donor in
/// `donor_map` (including those merged by earlier passes) are dropped.
///
/// A group without donations is skipped.
pub fn merge(
    key: MergeKey,
    groups: &[DuplicateGroup],
    donors: Vec<Donor>,
    donations: Vec<Donation>,
    tax_units: Vec<TaxUnit>,
    mut donor_map: DonorMap,
) -> MergeOutput {
    let mut stats = MergeStats {
        groups: groups.len(),
        ..MergeStats::default()
    };

    let redirect = {
        let mut by_donor: HashMap<DonorId, Vec<&Donation>> = HashMap::new();
        for ds in &donations {
            by_donor.entry(ds.donor_id).or_default().push(ds);
        }

        let mut redirect: HashMap<DonorId, DonorId> = HashMap::new();
        for group in groups {
            let Some(canonical) = select_canonical(group, &by_donor) else {
                warn!(%key, group = %group.key, "duplicate group has no donations, skipping");
                stats.skipped_groups += 1;
                continue;
            };
            for &old in &group.donor_ids {
                if old == canonical {
                    continue;
                }
                redirect.insert(old, canonical);
                donor_map.record(old, canonical, key);
            }
            debug!(%key, group = %group.key, canonical, size = group.donor_ids.len(), "merged group");
        }
        redirect
    };
    stats.donors_merged = redirect.len();

    let donations: Vec<Donation> = donations
        .into_iter()
        .map(|mut ds| {
            if let Some(&canonical) = redirect.get(&ds.donor_id) {
                ds.donor_id = canonical;
            }
            ds
        })
        .collect();

    let before = tax_units.len();
    let tax_units: Vec<TaxUnit> = tax_units
        .into_iter()
        .filter(|tu| !donor_map.contains_old(tu.donor_id))
        .collect();
    stats.tax_units_dropped = before - tax_units.len();

    let donors: Vec<Donor> = donors
        .into_iter()
        .filter(|d| !donor_map.contains_old(d.id))
        .collect();

    info!(
        %key,
        groups = stats.groups,
        skipped = stats.skipped_groups,
        merged = stats.donors_merged,
        tax_units_dropped = stats.tax_units_dropped,
        "merge pass complete"
    );

    MergeOutput {
        donors,
        donations,
        tax_units,
        donor_map,
        stats,
    }
}

/// Owner of the group's most recent donation, ties broken by donation ID.
fn select_canonical(
    group: &DuplicateGroup,
    by_donor: &HashMap<DonorId, Vec<&Donation>>,
) -> Option<DonorId> {
    group
        .donor_ids
        .iter()
        .filter_map(|id| by_donor.get(id))
        .flatten()
        .max_by(|a, b| {
            a.timestamp_confirmed
                .cmp(&b.timestamp_confirmed)
                .then_with(|| a.id.cmp(&b.id))
        })
        .map(|ds| ds.donor_id)
}
