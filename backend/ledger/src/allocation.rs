//! # Cost allocation
//!
//! Splits activity prices evenly among a trip's members and reconciles payments.
//!
//! - `headcount = max(1, |members ∪ owner|)`
//! - `share = round2(price / headcount)`, rounded independently for every activity
//! - `paid_by(member) = Σ share` over the activities the member marked as paid
//! - `balance = due - paid`, negative when rounding let someone overpay
use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::{
    model::{Activity, ActivityId, Payment},
    money::round2,
};

/// Even split over a fixed headcount.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Allocation {
    headcount: u32,
}

impl Allocation {
    /// `members` is the deduplicated member count, owner included. Never drops below one.
    pub fn new(members: usize) -> Self {
        let headcount = u32::try_from(members).unwrap_or(u32::MAX).max(1);

        Self { headcount }
    }

    pub fn headcount(&self) -> u32 {
        self.headcount
    }

    pub fn share(&self, price: f64) -> f64 {
        round2(price / f64::from(self.headcount))
    }

    pub fn progress(&self, price: f64, paid_count: u32) -> ActivityProgress {
        let per_person_share = self.share(price);
        let collected = f64::from(paid_count) * per_person_share;

        let percent_paid = if price > 0.0 {
            round2((collected / price * 100.0).clamp(0.0, 100.0))
        } else {
            0.0
        };

        ActivityProgress {
            per_person_share,
            paid_count,
            remaining: round2(price - collected).max(0.0),
            percent_paid,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct ActivityProgress {
    pub per_person_share: f64,
    pub paid_count: u32,
    pub remaining: f64,
    pub percent_paid: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MemberBalance {
    pub address: String,
    pub due: f64,
    pub paid: f64,
    pub balance: f64,
}

/// Per-member due, paid and balance for one trip.
///
/// `members` must already be the lowercase union of members and owner. Returns nothing when the
/// trip has no members or no activities.
pub fn reconcile(
    members: &[String],
    activities: &[Activity],
    payments: &[Payment],
) -> Vec<MemberBalance> {
    if members.is_empty() || activities.is_empty() {
        return Vec::new();
    }

    let allocation = Allocation::new(members.len());

    let shares: HashMap<ActivityId, f64> = activities
        .iter()
        .map(|activity| (activity.id, allocation.share(activity.price)))
        .collect();
    let due = round2(shares.values().sum());

    let mut paid: HashMap<String, f64> = HashMap::new();
    let mut counted: HashSet<(ActivityId, String)> = HashSet::new();

    for payment in payments.iter().filter(|payment| payment.paid) {
        let address = payment.address.to_lowercase();
        let Some(share) = shares.get(&payment.activity_id) else {
            continue;
        };

        if !counted.insert((payment.activity_id, address.clone())) {
            continue;
        }

        let entry = paid.entry(address).or_default();
        *entry = round2(*entry + share);
    }

    members
        .iter()
        .map(|address| {
            let paid = paid.get(address).copied().unwrap_or(0.0);

            MemberBalance {
                address: address.clone(),
                due,
                paid,
                balance: round2(due - paid),
            }
        })
        .collect()
}
