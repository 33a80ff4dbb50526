//! # Ledger
//!
//! Shared records and the money math behind a trip.
//!
//! ## Records
//! - Trip: name, join code, inclusive date range, optional budget, one-shot alert flag, owner
//! - Member: (trip, address) set
//! - Activity: priced and dated, belongs to one trip
//! - Vote: (activity, address) -> bool, last write wins
//! - Payment: (activity, address) -> paid flag + timestamp, last write wins
//!
//! ## Reconciliation
//! Every activity is split evenly among the trip's members. Shares are rounded to cents **per activity**
//! before anything is summed, so a member's total due is the sum of rounded shares. This keeps each
//! activity's displayed share identical to what is counted towards the balance, at the cost of a few
//! cents of drift against rounding the aggregate once.
//!
//! No I/O lives here. Both the service and the reminder job call into this crate so the same
//! numbers come out of every code path.

pub mod allocation;
pub mod model;
pub mod money;

pub use allocation::{ActivityProgress, Allocation, MemberBalance, reconcile};
pub use model::{
    Activity, ActivityDraft, ActivityId, NewTrip, Payment, Trip, TripId, Vote, VoteTally,
};
pub use money::round2;
