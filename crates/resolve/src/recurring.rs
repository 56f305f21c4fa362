//! Recurring-donor classification.
//!
//! A donor is recurring at a reference instant when they gave within the
//! recent window and either
//! - used an agreement payment method (direct debit, recurring wallet,
//!   recurring card processor) for a recent gift, or
//! - have three gifts at least [`MIN_GAP_DAYS`] apart spanning no more than
//!   [`MAX_SPAN_DAYS`] (the triplet test).
//!
//! The third gift in a streak also certifies the first two at their own
//! historical instants, so the triplet search looks both backward and
//! forward from the latest gift before the reference instant. That is why
//! the evaluation window reaches [`WINDOW_FORWARD_DAYS`] past the reference.
//!
//! Status is recomputed per reference instant; it is never persisted.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::model::{Donation, DonorId, RecurringStatus, ResolvedDonation};

/// Donations older than this (relative to the reference instant) are ignored.
pub const WINDOW_BACK_DAYS: i64 = 101;
/// Donations later than this (relative to the reference instant) are ignored.
pub const WINDOW_FORWARD_DAYS: i64 = 65;
/// A donor must have given within this many days up to the reference instant.
pub const RECENT_DAYS: i64 = 35;
/// Minimum distance between consecutive gifts of a triplet.
pub const MIN_GAP_DAYS: i64 = 20;
/// Maximum distance between the first and last gift of a triplet.
pub const MAX_SPAN_DAYS: i64 = 65;

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RecurringRules {
    /// Payment methods that imply a standing recurring agreement.
    #[serde(default = "default_agreement_payment_ids")]
    pub agreement_payment_ids: Vec<i64>,
}

fn default_agreement_payment_ids() -> Vec<i64> {
    vec![3, 7, 8]
}

impl Default for RecurringRules {
    fn default() -> Self {
        Self {
            agreement_payment_ids: default_agreement_payment_ids(),
        }
    }
}

impl RecurringRules {
    pub fn is_agreement_method(&self, payment_id: i64) -> bool {
        self.agreement_payment_ids.contains(&payment_id)
    }
}

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

/// The three donation fields the classifier looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DonationEvent {
    pub donor_id: DonorId,
    pub timestamp: NaiveDateTime,
    pub payment_id: i64,
}

impl From<&Donation> for DonationEvent {
    fn from(ds: &Donation) -> Self {
        Self {
            donor_id: ds.donor_id,
            timestamp: ds.timestamp_confirmed,
            payment_id: ds.payment_id,
        }
    }
}

impl From<&ResolvedDonation> for DonationEvent {
    fn from(ds: &ResolvedDonation) -> Self {
        Self {
            donor_id: ds.donor_id,
            timestamp: ds.timestamp_confirmed,
            payment_id: ds.payment_id,
        }
    }
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Timeline {
    stamps: Vec<NaiveDateTime>,
    recent: bool,
    agreement: bool,
}

/// Classify every donor in `donor_ids` at `reference`.
///
/// Donors without any donation in `events` are non-recurring. The returned
/// map holds exactly the requested donors.
pub fn classify(
    donor_ids: &[DonorId],
    events: &[DonationEvent],
    reference: NaiveDateTime,
    rules: &RecurringRules,
) -> BTreeMap<DonorId, RecurringStatus> {
    let (window_start, window_end) = evaluation_window(reference);
    let recent_start = reference - Duration::days(RECENT_DAYS);
    let wanted: HashSet<DonorId> = donor_ids.iter().copied().collect();

    let mut timelines: HashMap<DonorId, Timeline> = HashMap::new();
    for ev in events {
        if !wanted.contains(&ev.donor_id) || ev.timestamp < window_start || ev.timestamp > window_end {
            continue;
        }
        let timeline = timelines.entry(ev.donor_id).or_default();
        timeline.stamps.push(ev.timestamp);
        if ev.timestamp >= recent_start && ev.timestamp <= reference {
            timeline.recent = true;
            timeline.agreement |= rules.is_agreement_method(ev.payment_id);
        }
    }

    donor_ids
        .iter()
        .map(|&id| {
            let status = match timelines.get_mut(&id) {
                None => RecurringStatus::NONE,
                Some(t) if !t.recent => RecurringStatus::NONE,
                Some(t) if t.agreement => RecurringStatus::AGREEMENT,
                Some(t) => {
                    t.stamps.sort_unstable();
                    if classify_timeline(&t.stamps, reference) {
                        RecurringStatus::PATTERN
                    } else {
                        RecurringStatus::NONE
                    }
                }
            };
            (id, status)
        })
        .collect()
}

/// Triplet test over one donor's sorted donation timestamps.
///
/// Timestamps outside the evaluation window are ignored. A is the latest
/// gift at or before `reference`; the test tries a backward chain (C ≤ B ≤ A),
/// then a forward chain (A ≤ B ≤ C), then a triplet straddling A.
pub fn classify_timeline(stamps: &[NaiveDateTime], reference: NaiveDateTime) -> bool {
    debug_assert!(stamps.windows(2).all(|w| w[0] <= w[1]), "timeline must be sorted");

    let (window_start, window_end) = evaluation_window(reference);
    let stamps = &stamps[stamps.partition_point(|&t| t < window_start)..];
    let stamps = &stamps[..stamps.partition_point(|&t| t <= window_end)];

    let Some(&a) = stamps[..stamps.partition_point(|&t| t <= reference)].last() else {
        return false;
    };

    let gap = Duration::days(MIN_GAP_DAYS);
    let backward = &stamps[..stamps.partition_point(|&t| t <= a - gap)];
    let forward = &stamps[stamps.partition_point(|&t| t < a + gap)..];

    if let Some(&b) = backward.last() {
        let before_b = &backward[..backward.partition_point(|&t| t <= b - gap)];
        if let Some(&c) = before_b.last() {
            if span_days(c, a) <= MAX_SPAN_DAYS {
                return true;
            }
        }
    }

    if let Some(&b) = forward.first() {
        let after_b = &forward[forward.partition_point(|&t| t < b + gap)..];
        if let Some(&c) = after_b.first() {
            if span_days(a, c) <= MAX_SPAN_DAYS {
                return true;
            }
        }
    }

    match (backward.last(), forward.first()) {
        (Some(&c), Some(&b)) => span_days(c, b) <= MAX_SPAN_DAYS,
        _ => false,
    }
}

fn evaluation_window(reference: NaiveDateTime) -> (NaiveDateTime, NaiveDateTime) {
    (
        reference - Duration::days(WINDOW_BACK_DAYS),
        reference + Duration::days(WINDOW_FORWARD_DAYS),
    )
}

/// Whole days from `from` to `to`.
fn span_days(from: NaiveDateTime, to: NaiveDateTime) -> i64 {
    (to - from).num_days()
}
