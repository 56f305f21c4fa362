use std::collections::{HashMap, HashSet};

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Serialize, Serializer};

use crate::analysis::KeyNumbers;

pub type DonorId = i64;

/// Timestamp layout used for every exported timestamp column.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// ---------------------------------------------------------------------------
// Input snapshot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Donor {
    pub id: DonorId,
    pub date_registered: NaiveDateTime,
    /// Shared by donor accounts registered with the same first and last name.
    /// `None` for accounts whose name cannot be matched.
    pub name_group: Option<i64>,
    pub has_password: bool,
    pub is_person: bool,
    pub is_anonymous: bool,
    pub meta_owner_id: Option<i64>,
    pub newsletter: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Donation {
    pub id: i64,
    pub donor_id: DonorId,
    pub timestamp_confirmed: NaiveDateTime,
    pub amount_cents: i64,
    pub payment_id: i64,
    pub distribution_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaxUnit {
    pub id: i64,
    pub donor_id: DonorId,
    pub is_business: bool,
    pub ssn: String,
    pub gender: Option<String>,
    pub birthdate: Option<NaiveDate>,
}

/// One row of the donation → distribution lookup.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DistributionLink {
    pub distribution_key: String,
    pub tax_unit_id: i64,
}

/// Immutable tables read once from the record store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub donors: Vec<Donor>,
    pub donations: Vec<Donation>,
    pub tax_units: Vec<TaxUnit>,
    pub distribution_links: Vec<DistributionLink>,
}

impl Snapshot {
    /// Keep donors with at least one donation, and only the donations and
    /// tax units that belong to a kept donor.
    pub fn restrict_to_active_donors(self) -> Self {
        let known: HashSet<DonorId> = self.donors.iter().map(|d| d.id).collect();
        let donations: Vec<Donation> = self
            .donations
            .into_iter()
            .filter(|ds| known.contains(&ds.donor_id))
            .collect();
        let active: HashSet<DonorId> = donations.iter().map(|ds| ds.donor_id).collect();

        Self {
            donors: self.donors.into_iter().filter(|d| active.contains(&d.id)).collect(),
            donations,
            tax_units: self
                .tax_units
                .into_iter()
                .filter(|tu| active.contains(&tu.donor_id))
                .collect(),
            distribution_links: self.distribution_links,
        }
    }

    pub fn total_amount_cents(&self) -> i64 {
        self.donations.iter().map(|ds| ds.amount_cents).sum()
    }
}

// ---------------------------------------------------------------------------
// Merging
// ---------------------------------------------------------------------------

/// Attribute a duplicate pass groups donors by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeKey {
    Name,
    Ssn,
}

impl std::fmt::Display for MergeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Name => write!(f, "name"),
            Self::Ssn => write!(f, "ssn"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DonorMapEntry {
    pub old_donor_id: DonorId,
    pub new_donor_id: DonorId,
    pub key: MergeKey,
}

/// Append-only audit trail of merged donors, in the order they were merged.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct DonorMap {
    entries: Vec<DonorMapEntry>,
    #[serde(skip)]
    index: HashMap<DonorId, usize>,
}

impl DonorMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `old → new`. An existing mapping for `old` is never replaced;
    /// returns false in that case.
    pub fn record(&mut self, old_donor_id: DonorId, new_donor_id: DonorId, key: MergeKey) -> bool {
        if self.index.contains_key(&old_donor_id) {
            return false;
        }
        self.index.insert(old_donor_id, self.entries.len());
        self.entries.push(DonorMapEntry {
            old_donor_id,
            new_donor_id,
            key,
        });
        true
    }

    pub fn contains_old(&self, donor_id: DonorId) -> bool {
        self.index.contains_key(&donor_id)
    }

    pub fn get(&self, old_donor_id: DonorId) -> Option<&DonorMapEntry> {
        self.index.get(&old_donor_id).map(|&i| &self.entries[i])
    }

    /// Follow the chain of mappings to the donor that finally absorbed `donor_id`.
    pub fn resolve(&self, donor_id: DonorId) -> DonorId {
        let mut current = donor_id;
        // A chain can never be longer than the map itself.
        for _ in 0..=self.entries.len() {
            match self.get(current) {
                Some(entry) => current = entry.new_donor_id,
                None => break,
            }
        }
        current
    }

    pub fn entries(&self) -> &[DonorMapEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Corrected output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecurringStatus {
    pub is_recurring: bool,
    pub has_agreement: bool,
}

impl RecurringStatus {
    pub const NONE: Self = Self {
        is_recurring: false,
        has_agreement: false,
    };
    pub const AGREEMENT: Self = Self {
        is_recurring: true,
        has_agreement: true,
    };
    pub const PATTERN: Self = Self {
        is_recurring: true,
        has_agreement: false,
    };
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedDonor {
    pub donor_id: DonorId,
    #[serde(serialize_with = "serialize_timestamp")]
    pub date_registered: NaiveDateTime,
    pub has_password: bool,
    pub is_person: bool,
    pub is_anonymous: bool,
    pub meta_owner_id: Option<i64>,
    pub newsletter: bool,
    pub has_business_tax_unit: bool,
    pub multiple_personal_tax_units: bool,
    pub is_recurring: bool,
    pub has_agreement: bool,
    pub female: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedDonation {
    pub id: i64,
    pub donor_id: DonorId,
    #[serde(serialize_with = "serialize_timestamp")]
    pub timestamp_confirmed: NaiveDateTime,
    #[serde(rename = "sum_confirmed", serialize_with = "serialize_amount")]
    pub amount_cents: i64,
    pub payment_id: i64,
    pub distribution_key: Option<String>,
    pub from_business: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolveResult {
    pub meta: RunMeta,
    pub summary: RunSummary,
    pub donors: Vec<ResolvedDonor>,
    pub donations: Vec<ResolvedDonation>,
    pub tax_units: Vec<TaxUnit>,
    pub donor_map: DonorMap,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunMeta {
    pub run_name: String,
    pub engine_version: String,
    pub run_at: String,
    #[serde(serialize_with = "serialize_timestamp")]
    pub reference_instant: NaiveDateTime,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub raw_donors: usize,
    pub raw_donations: usize,
    pub raw_tax_units: usize,
    pub donors: usize,
    pub donations: usize,
    pub tax_units: usize,
    pub merged_by_name: usize,
    pub merged_by_ssn: usize,
    pub skipped_groups: usize,
    pub in_donor_ssn_dropped: usize,
    pub recurring: usize,
    pub with_agreement: usize,
    /// Donation total after the upstream filter, before merging.
    pub input_amount_cents: i64,
    pub key_numbers: KeyNumbers,
    pub non_anonymous: KeyNumbers,
}

// ---------------------------------------------------------------------------
// Formatting
// ---------------------------------------------------------------------------

/// Format minor units as a decimal string, e.g. `-1205` → `"-12.05"`.
pub fn format_amount_cents(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{sign}{}.{:02}", abs / 100, abs % 100)
}

pub fn serialize_timestamp<S: Serializer>(ts: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(&ts.format(TIMESTAMP_FORMAT))
}

fn serialize_amount<S: Serializer>(cents: &i64, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&format_amount_cents(*cents))
}
