//! Duplicate grouping - finds donor accounts that belong to the same person.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::model::{Donor, DonorId, MergeKey, TaxUnit};

/// Name key shared by every anonymous donor.
pub const ANONYMOUS_NAME_KEY: &str = "anonymous";

/// Donors sharing one key value. Always holds more than one donor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateGroup {
    pub key: String,
    pub donor_ids: BTreeSet<DonorId>,
}

/// Find duplicate clusters for a merge pass.
///
/// Groups that share a donor are coalesced, so every donor ends up in at most
/// one returned group.
pub fn find_duplicate_groups(
    key: MergeKey,
    donors: &[Donor],
    tax_units: &[TaxUnit],
) -> Vec<DuplicateGroup> {
    let groups = match key {
        MergeKey::Name => group_by_name(donors),
        MergeKey::Ssn => group_by_ssn(donors, tax_units),
    };
    coalesce_overlapping(groups)
}

/// Group donors by name group. All anonymous donors share [`ANONYMOUS_NAME_KEY`];
/// donors without a name group are never grouped.
pub fn group_by_name(donors: &[Donor]) -> Vec<DuplicateGroup> {
    let mut groups: BTreeMap<String, BTreeSet<DonorId>> = BTreeMap::new();
    for donor in donors {
        let key = if donor.is_anonymous {
            ANONYMOUS_NAME_KEY.to_string()
        } else {
            match donor.name_group {
                Some(group) => group.to_string(),
                None => continue,
            }
        };
        groups.entry(key).or_default().insert(donor.id);
    }
    retain_duplicates(groups)
}

/// Group donors by eligible ssn on their tax units. Tax units of donors not in
/// `donors` are ignored.
pub fn group_by_ssn(donors: &[Donor], tax_units: &[TaxUnit]) -> Vec<DuplicateGroup> {
    let present: HashSet<DonorId> = donors.iter().map(|d| d.id).collect();
    let mut groups: BTreeMap<String, BTreeSet<DonorId>> = BTreeMap::new();
    for tu in tax_units {
        if !present.contains(&tu.donor_id) || !is_eligible_ssn(&tu.ssn) {
            continue;
        }
        groups
            .entry(tu.ssn.trim().to_string())
            .or_default()
            .insert(tu.donor_id);
    }
    retain_duplicates(groups)
}

/// Only non-empty, all-digit ssn values take part in matching.
pub fn is_eligible_ssn(ssn: &str) -> bool {
    let ssn = ssn.trim();
    !ssn.is_empty() && ssn.chars().all(|c| c.is_ascii_digit())
}

/// Resolve tax units where one donor holds several rows with the same eligible
/// ssn: keep the most recently created row (highest ID) and drop the others.
///
/// Returns the kept tax units and the IDs of the dropped ones.
pub fn dedupe_in_donor_ssn(tax_units: Vec<TaxUnit>) -> (Vec<TaxUnit>, Vec<i64>) {
    let mut newest: HashMap<(DonorId, String), i64> = HashMap::new();
    for tu in &tax_units {
        if !is_eligible_ssn(&tu.ssn) {
            continue;
        }
        let id = newest
            .entry((tu.donor_id, tu.ssn.trim().to_string()))
            .or_insert(tu.id);
        *id = (*id).max(tu.id);
    }

    let (kept, dropped): (Vec<TaxUnit>, Vec<TaxUnit>) = tax_units.into_iter().partition(|tu| {
        !is_eligible_ssn(&tu.ssn) || newest[&(tu.donor_id, tu.ssn.trim().to_string())] == tu.id
    });
    (kept, dropped.into_iter().map(|tu| tu.id).collect())
}

fn retain_duplicates(groups: BTreeMap<String, BTreeSet<DonorId>>) -> Vec<DuplicateGroup> {
    groups
        .into_iter()
        .filter(|(_, ids)| ids.len() > 1)
        .map(|(key, donor_ids)| DuplicateGroup { key, donor_ids })
        .collect()
}

/// Merge groups that share at least one donor into connected components.
pub fn coalesce_overlapping(groups: Vec<DuplicateGroup>) -> Vec<DuplicateGroup> {
    let mut by_donor: HashMap<DonorId, Vec<usize>> = HashMap::new();
    for (i, group) in groups.iter().enumerate() {
        for &donor_id in &group.donor_ids {
            by_donor.entry(donor_id).or_default().push(i);
        }
    }

    let mut visited = vec![false; groups.len()];
    let mut components = Vec::new();

    for start in 0..groups.len() {
        if visited[start] {
            continue;
        }
        visited[start] = true;

        let mut stack = vec![start];
        let mut keys: Vec<&str> = Vec::new();
        let mut donor_ids = BTreeSet::new();

        while let Some(i) = stack.pop() {
            keys.push(&groups[i].key);
            for donor_id in &groups[i].donor_ids {
                donor_ids.insert(*donor_id);
                for &j in &by_donor[donor_id] {
                    if !visited[j] {
                        visited[j] = true;
                        stack.push(j);
                    }
                }
            }
        }

        keys.sort_unstable();
        components.push(DuplicateGroup {
            key: keys.join("+"),
            donor_ids,
        });
    }

    components
}
