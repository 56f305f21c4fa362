use chrono::NaiveDateTime;
use tracing::info;

use crate::analysis::{key_numbers, non_anonymous_donations};
use crate::annotate::{annotate_donations, annotate_donors};
use crate::check::check_consistency;
use crate::config::RunConfig;
use crate::error::ResolveError;
use crate::group::{dedupe_in_donor_ssn, find_duplicate_groups};
use crate::merge::{merge, MergeStats};
use crate::model::{
    Donation, Donor, DonorMap, MergeKey, ResolveResult, RunMeta, RunSummary, Snapshot, TaxUnit,
};
use crate::recurring::RecurringRules;
use crate::registration::normalize_registration;

/// Tables after both merge passes.
#[derive(Debug, Clone)]
pub struct MergedTables {
    pub donors: Vec<Donor>,
    pub donations: Vec<Donation>,
    pub tax_units: Vec<TaxUnit>,
    pub donor_map: DonorMap,
    pub name: MergeStats,
    pub ssn: MergeStats,
    /// Tax units dropped because their donor held the same ssn more than once.
    pub in_donor_ssn_dropped: Vec<i64>,
}

/// Run the pipeline per config. The reference instant falls back to local now.
pub fn run(config: &RunConfig, snapshot: Snapshot) -> Result<ResolveResult, ResolveError> {
    let reference = config
        .reference_instant
        .unwrap_or_else(|| chrono::Local::now().naive_local());
    run_with_reference(&config.name, snapshot, &config.recurring, reference)
}

/// Run the pipeline at a fixed reference instant.
pub fn run_with_reference(
    name: &str,
    snapshot: Snapshot,
    rules: &RecurringRules,
    reference: NaiveDateTime,
) -> Result<ResolveResult, ResolveError> {
    let snapshot = snapshot.restrict_to_active_donors();
    let raw_donors = snapshot.donors.len();
    let raw_donations = snapshot.donations.len();
    let raw_tax_units = snapshot.tax_units.len();
    let input_amount_cents = snapshot.total_amount_cents();
    info!(
        run = name,
        donors = raw_donors,
        donations = raw_donations,
        tax_units = raw_tax_units,
        %reference,
        "snapshot loaded"
    );

    let Snapshot {
        donors,
        donations,
        tax_units,
        distribution_links,
    } = snapshot;
    let merged = merge_passes(donors, donations, tax_units);

    let donors = normalize_registration(merged.donors, &merged.donations)?;
    let donors = annotate_donors(donors, &merged.donations, &merged.tax_units, reference, rules);
    let donations = annotate_donations(merged.donations, &distribution_links, &merged.tax_units);
    let tax_units = merged.tax_units;

    check_consistency(&donors, &donations, &tax_units)?;

    let recurring = donors.iter().filter(|d| d.is_recurring).count();
    let with_agreement = donors.iter().filter(|d| d.has_agreement).count();
    info!(recurring, with_agreement, donors = donors.len(), "recurring classification complete");

    let summary = RunSummary {
        raw_donors,
        raw_donations,
        raw_tax_units,
        donors: donors.len(),
        donations: donations.len(),
        tax_units: tax_units.len(),
        merged_by_name: merged.name.donors_merged,
        merged_by_ssn: merged.ssn.donors_merged,
        skipped_groups: merged.name.skipped_groups + merged.ssn.skipped_groups,
        in_donor_ssn_dropped: merged.in_donor_ssn_dropped.len(),
        recurring,
        with_agreement,
        input_amount_cents,
        key_numbers: key_numbers(&donations),
        non_anonymous: key_numbers(non_anonymous_donations(&donations, &donors)),
    };

    Ok(ResolveResult {
        meta: RunMeta {
            run_name: name.to_string(),
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
            run_at: chrono::Utc::now().to_rfc3339(),
            reference_instant: reference,
        },
        summary,
        donors,
        donations,
        tax_units,
        donor_map: merged.donor_map,
    })
}

/// Name pass, in-donor ssn dedupe, then ssn pass.
///
/// Expects the restricted snapshot tables. Running it again over its own
/// output merges nothing.
pub fn merge_passes(donors: Vec<Donor>, donations: Vec<Donation>, tax_units: Vec<TaxUnit>) -> MergedTables {
    let groups = find_duplicate_groups(MergeKey::Name, &donors, &tax_units);
    let by_name = merge(MergeKey::Name, &groups, donors, donations, tax_units, DonorMap::new());

    let (tax_units, in_donor_ssn_dropped) = dedupe_in_donor_ssn(by_name.tax_units);
    info!(dropped = in_donor_ssn_dropped.len(), "in-donor ssn duplicates resolved");

    let groups = find_duplicate_groups(MergeKey::Ssn, &by_name.donors, &tax_units);
    let by_ssn = merge(
        MergeKey::Ssn,
        &groups,
        by_name.donors,
        by_name.donations,
        tax_units,
        by_name.donor_map,
    );

    MergedTables {
        donors: by_ssn.donors,
        donations: by_ssn.donations,
        tax_units: by_ssn.tax_units,
        donor_map: by_ssn.donor_map,
        name: by_name.stats,
        ssn: by_ssn.stats,
        in_donor_ssn_dropped,
    }
}
