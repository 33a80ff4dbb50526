//! # Trip workflows
//!
//! Every workflow runs in three phases:
//!
//! 1. **Validation**: input, identity and lookups. Failing here changes nothing.
//! 2. **Required writes**: store mutations. A store failure is returned as
//!    [`AppError::Persistence`].
//! 3. **Best effort**: subscription upkeep, budget alert and notifications. Failures are logged
//!    and reported as [`Delivery`] values in the result, never as errors.
//!
//! Callers are identified by an [`Address`] handed over from the auth layer. Reads tolerate an
//! anonymous caller; anything that establishes membership requires one.
use std::collections::{BTreeMap, BTreeSet};

use chrono::{NaiveDate, Utc};
use ledger::{
    Activity, ActivityDraft, ActivityId, ActivityProgress, Allocation, MemberBalance, NewTrip,
    Payment, Trip, TripId, Vote, VoteTally, reconcile, round2,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::{
    alerts::{AlertOutcome, check_budget_alert},
    error::{AppError, StoreError},
    identity::Address,
    messages,
    notify::{Delivery, publish_broadcast, publish_personal},
    state::State,
    subscriptions::ensure_interest,
    topics::meta_for,
    utils::{join_code, parse_date_only, within_range},
};

/// Join code insert attempts before giving up on collisions.
pub const CODE_ATTEMPTS: usize = 6;

/// Voter recorded when the caller is anonymous.
pub const ANONYMOUS_VOTER: &str = "anon";

#[derive(Clone, Debug, Default, Deserialize)]
pub struct TripDraft {
    #[serde(default)]
    pub name: String,
    pub starts_on: Option<String>,
    pub ends_on: Option<String>,
    pub budget: Option<f64>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ActivityInput {
    #[serde(default)]
    pub name: String,
    pub price: Option<f64>,
    pub starts_on: Option<String>,
    pub ends_on: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CreatedTrip {
    pub id: TripId,
    pub code: String,
    pub starts_on: NaiveDate,
    pub ends_on: NaiveDate,
    pub budget: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct JoinedTrip {
    pub trip_id: TripId,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ActivityCreated {
    pub id: ActivityId,
    /// `None` when the alert check itself could not run.
    pub alert: Option<AlertOutcome>,
    pub announcement: Delivery,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ActivityView {
    #[serde(flatten)]
    pub activity: Activity,
    pub tally: VoteTally,
    #[serde(flatten)]
    pub progress: ActivityProgress,
    pub paid_by_me: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ActivityBoard {
    pub activities: Vec<ActivityView>,
    pub votes: Vec<Vote>,
    pub payments: Vec<Payment>,
    pub total_members: u32,
    pub budget: Option<f64>,
    pub activities_total: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct VoteCast {
    pub activity_id: ActivityId,
    pub tally: VoteTally,
    pub announcement: Delivery,
}

/// Where a member stands on an activity right after someone paid it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Standing {
    /// The member who just paid: gets a confirmation.
    Payer,
    /// Has not paid yet: gets a reminder.
    Pending,
    /// Paid earlier: nothing to say.
    Settled,
}

impl Standing {
    pub fn classify(member: &str, payer: &str, paid: &BTreeSet<String>) -> Self {
        if member == payer {
            Standing::Payer
        } else if paid.contains(member) {
            Standing::Settled
        } else {
            Standing::Pending
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MemberNotice {
    pub address: String,
    pub standing: Standing,
    pub delivery: Delivery,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PaymentReceipt {
    pub activity_id: ActivityId,
    pub price: f64,
    pub total_members: u32,
    #[serde(flatten)]
    pub progress: ActivityProgress,
    pub broadcast: Delivery,
    pub notices: Vec<MemberNotice>,
}

fn required_date(raw: Option<&str>, what: &str) -> Result<NaiveDate, AppError> {
    raw.and_then(parse_date_only)
        .ok_or_else(|| AppError::Validation(format!("{what} required (YYYY-MM-DD)")))
}

fn caller_or_unauthorized(caller: Option<&Address>) -> Result<&Address, AppError> {
    caller.ok_or_else(|| AppError::Unauthorized("login required".to_string()))
}

async fn establish_interest(state: &State, trip_id: TripId, address: &Address) {
    if let Err(e) = ensure_interest(state, trip_id, address.as_str()).await {
        warn!(
            "Could not set up notifications for {address} on trip {trip_id}: {} ({e})",
            e.as_label()
        );
    }
}

async fn trip_name(state: &State, trip_id: TripId) -> String {
    let trip = match state.store.trip(trip_id).await {
        Ok(trip) => trip,
        Err(e) => {
            warn!("Could not read trip {trip_id} for a notification: {}", e.as_label());
            None
        }
    };

    meta_for(trip_id, trip.as_ref()).0
}

#[instrument(skip(state, draft), fields(caller = caller.map(Address::as_str)))]
pub async fn create_trip(
    state: &State,
    caller: Option<&Address>,
    draft: TripDraft,
) -> Result<CreatedTrip, AppError> {
    let name = draft.name.trim().to_string();
    if name.is_empty() {
        return Err(AppError::Validation("name required".to_string()));
    }

    let starts_on = required_date(draft.starts_on.as_deref(), "starts_on")?;
    let ends_on = required_date(draft.ends_on.as_deref(), "ends_on")?;
    if starts_on > ends_on {
        return Err(AppError::Validation("starts_on must be <= ends_on".to_string()));
    }

    if draft
        .budget
        .is_some_and(|budget| !(budget.is_finite() && budget >= 0.0))
    {
        return Err(AppError::Validation("invalid budget".to_string()));
    }

    let owner = caller.map(|address| address.as_str().to_string());

    for attempt in 1..=CODE_ATTEMPTS {
        let trip = NewTrip {
            name: name.clone(),
            code: join_code(),
            owner: owner.clone(),
            starts_on,
            ends_on,
            budget: draft.budget,
        };

        let id = match state.store.insert_trip(&trip).await {
            Ok(id) => id,
            Err(StoreError::Duplicate) => {
                warn!("Join code collision on attempt {attempt}/{CODE_ATTEMPTS}");
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(owner) = caller {
            state.store.add_member(id, owner.as_str()).await?;
            establish_interest(state, id, owner).await;
        }

        info!("Created trip {id} with code {}", trip.code);

        return Ok(CreatedTrip {
            id,
            code: trip.code,
            starts_on,
            ends_on,
            budget: draft.budget.unwrap_or_default(),
        });
    }

    Err(AppError::Internal("could not generate a unique join code".to_string()))
}

#[instrument(skip(state), fields(caller = caller.map(Address::as_str)))]
pub async fn delete_trip(
    state: &State,
    caller: Option<&Address>,
    trip_id: TripId,
) -> Result<(), AppError> {
    let trip = state
        .store
        .trip(trip_id)
        .await?
        .ok_or_else(|| AppError::NotFound("trip not found".to_string()))?;

    let is_owner = caller.is_some_and(|caller| trip.is_owned_by(caller.as_str()));
    if !is_owner {
        return Err(AppError::Unauthorized("not the trip owner".to_string()));
    }

    state.store.delete_trip(trip_id).await?;
    info!("Deleted trip {trip_id}");

    Ok(())
}

#[instrument(skip(state), fields(caller = caller.map(Address::as_str)))]
pub async fn join_trip(
    state: &State,
    caller: Option<&Address>,
    code: &str,
) -> Result<JoinedTrip, AppError> {
    let code = code.trim().to_uppercase();
    if code.is_empty() {
        return Err(AppError::Validation("code required".to_string()));
    }

    let caller = caller
        .ok_or_else(|| AppError::Unauthorized("login required to join a trip".to_string()))?;

    let trip = state
        .store
        .trip_by_code(&code)
        .await?
        .ok_or_else(|| AppError::NotFound("invalid code".to_string()))?;

    state.store.add_member(trip.id, caller.as_str()).await?;
    establish_interest(state, trip.id, caller).await;

    Ok(JoinedTrip {
        trip_id: trip.id,
        name: trip.name,
    })
}

pub async fn list_trips(state: &State, caller: Option<&Address>) -> Result<Vec<Trip>, AppError> {
    let Some(caller) = caller else {
        return Ok(Vec::new());
    };

    Ok(state.store.trips_for(caller.as_str()).await?)
}

#[instrument(skip(state, input), fields(caller = caller.map(Address::as_str)))]
pub async fn create_activity(
    state: &State,
    caller: Option<&Address>,
    trip_id: TripId,
    input: ActivityInput,
) -> Result<ActivityCreated, AppError> {
    let name = input.name.trim().to_string();
    if name.is_empty() {
        return Err(AppError::Validation("name required".to_string()));
    }

    let price = input.price.unwrap_or(0.0);
    if !(price.is_finite() && price >= 0.0) {
        return Err(AppError::Validation("invalid price".to_string()));
    }

    let starts_on = required_date(input.starts_on.as_deref(), "activity starts_on")?;
    let ends_on = required_date(input.ends_on.as_deref(), "activity ends_on")?;
    if starts_on > ends_on {
        return Err(AppError::Validation(
            "activity starts_on must be <= ends_on".to_string(),
        ));
    }

    let trip = state
        .store
        .trip(trip_id)
        .await?
        .ok_or_else(|| AppError::NotFound("trip not found".to_string()))?;

    let (trip_start, trip_end) = trip
        .date_range()
        .ok_or_else(|| AppError::Validation("the trip has no dates".to_string()))?;

    if !within_range(starts_on, ends_on, trip_start, trip_end) {
        return Err(AppError::Validation(format!(
            "the activity must fall between {trip_start} and {trip_end}"
        )));
    }

    let draft = ActivityDraft {
        name,
        price,
        starts_on,
        ends_on,
    };
    let created_by = caller.map(Address::as_str);
    let id = state.store.insert_activity(trip_id, &draft, created_by).await?;
    info!("Created activity {id} in trip {trip_id}");

    let alert = match check_budget_alert(state, trip_id).await {
        Ok(outcome) => Some(outcome),
        Err(e) => {
            warn!("Budget alert check failed for trip {trip_id}: {} ({e})", e.as_label());
            None
        }
    };

    let notice = messages::new_activity(
        &trip.name,
        &draft.name,
        starts_on,
        ends_on,
        price,
        created_by,
    );
    let announcement = publish_broadcast(state, trip_id, &notice.subject, &notice.body).await;

    Ok(ActivityCreated {
        id,
        alert,
        announcement,
    })
}

#[instrument(skip(state))]
pub async fn delete_activity(
    state: &State,
    trip_id: TripId,
    activity_id: ActivityId,
) -> Result<(), AppError> {
    if !state.store.delete_activity(trip_id, activity_id).await? {
        return Err(AppError::NotFound("activity not found".to_string()));
    }

    Ok(())
}

pub async fn list_activities(
    state: &State,
    caller: Option<&Address>,
    trip_id: TripId,
) -> Result<ActivityBoard, AppError> {
    let members = state.store.members(trip_id).await?;
    let allocation = Allocation::new(members.len());

    let budget = state.store.trip(trip_id).await?.and_then(|trip| trip.budget);
    let activities = state.store.activities(trip_id).await?;
    let votes = state.store.votes(trip_id).await?;
    let payments = state.store.payments(trip_id).await?;

    let mut paid_counts: BTreeMap<ActivityId, u32> = BTreeMap::new();
    let mut paid_by_me: BTreeSet<ActivityId> = BTreeSet::new();
    for payment in payments.iter().filter(|payment| payment.paid) {
        *paid_counts.entry(payment.activity_id).or_default() += 1;

        if caller.is_some_and(|caller| payment.address.eq_ignore_ascii_case(caller.as_str())) {
            paid_by_me.insert(payment.activity_id);
        }
    }

    let activities_total = round2(activities.iter().map(|activity| activity.price).sum());

    let views = activities
        .into_iter()
        .map(|activity| {
            let paid_count = paid_counts.get(&activity.id).copied().unwrap_or(0);
            let tally = VoteTally::count(votes.iter().filter(|vote| vote.activity_id == activity.id));

            ActivityView {
                tally,
                progress: allocation.progress(activity.price, paid_count),
                paid_by_me: paid_by_me.contains(&activity.id),
                activity,
            }
        })
        .collect();

    Ok(ActivityBoard {
        activities: views,
        votes,
        payments,
        total_members: allocation.headcount(),
        budget,
        activities_total,
    })
}

#[instrument(skip(state), fields(caller = caller.map(Address::as_str)))]
pub async fn cast_vote(
    state: &State,
    caller: Option<&Address>,
    activity_id: ActivityId,
    vote: i64,
) -> Result<VoteCast, AppError> {
    let in_favor = match vote {
        1 => true,
        0 => false,
        _ => return Err(AppError::Validation("vote must be 1 or 0".to_string())),
    };

    let activity = state
        .store
        .activity(activity_id)
        .await?
        .ok_or_else(|| AppError::NotFound("activity not found".to_string()))?;

    let voter = caller.map_or(ANONYMOUS_VOTER, Address::as_str);
    state.store.upsert_vote(activity_id, voter, in_favor).await?;

    let tally = VoteTally::count(&state.store.activity_votes(activity_id).await?);

    let trip = trip_name(state, activity.trip_id).await;
    let notice = messages::new_vote(&trip, &activity.name, &tally);
    let announcement =
        publish_broadcast(state, activity.trip_id, &notice.subject, &notice.body).await;

    Ok(VoteCast {
        activity_id,
        tally,
        announcement,
    })
}

#[instrument(skip(state), fields(caller = caller.map(Address::as_str)))]
pub async fn mark_payment(
    state: &State,
    caller: Option<&Address>,
    trip_id: TripId,
    activity_id: ActivityId,
) -> Result<PaymentReceipt, AppError> {
    let payer = caller_or_unauthorized(caller)?;

    let activity = state
        .store
        .activity(activity_id)
        .await?
        .filter(|activity| activity.trip_id == trip_id)
        .ok_or_else(|| AppError::NotFound("activity not found".to_string()))?;

    state.store.add_member(trip_id, payer.as_str()).await?;
    establish_interest(state, trip_id, payer).await;

    state
        .store
        .mark_paid(activity_id, payer.as_str(), Utc::now())
        .await?;

    let recorded = state.store.payment(activity_id, payer.as_str()).await?;
    if !recorded.is_some_and(|payment| payment.paid) {
        return Err(AppError::Internal("the payment was not recorded".to_string()));
    }

    let members = state.store.members(trip_id).await?;
    let allocation = Allocation::new(members.len());

    let paid: BTreeSet<String> = state
        .store
        .activity_payments(activity_id)
        .await?
        .into_iter()
        .filter(|payment| payment.paid)
        .map(|payment| payment.address.to_lowercase())
        .collect();
    let paid_count = paid.len() as u32;

    let progress = allocation.progress(activity.price, paid_count);
    let total_members = allocation.headcount();
    info!(
        "Payment of {payer} on activity {activity_id}: {paid_count}/{total_members} paid, {} remaining",
        progress.remaining
    );

    let trip = trip_name(state, trip_id).await;
    let share = progress.per_person_share;

    let notice = messages::payment_recorded(
        &trip,
        &activity.name,
        payer.as_str(),
        share,
        paid_count,
        total_members,
    );
    let broadcast = publish_broadcast(state, trip_id, &notice.subject, &notice.body).await;

    let mut notices = Vec::new();
    for member in &members {
        let standing = Standing::classify(member, payer.as_str(), &paid);

        let notice = match standing {
            Standing::Settled => continue,
            Standing::Payer => messages::payment_confirmed(&trip, &activity.name, member, share),
            Standing::Pending => {
                messages::payment_pending(&trip, &activity.name, payer.as_str(), member, share)
            }
        };

        let delivery = match ensure_interest(state, trip_id, member).await {
            Ok(_) => publish_personal(state, trip_id, member, &notice.subject, &notice.body).await,
            Err(e) => {
                warn!("Could not reach {member} on trip {trip_id}: {}", e.as_label());
                Delivery::Failed(e.to_string())
            }
        };

        notices.push(MemberNotice {
            address: member.clone(),
            standing,
            delivery,
        });
    }

    Ok(PaymentReceipt {
        activity_id,
        price: activity.price,
        total_members,
        progress,
        broadcast,
        notices,
    })
}

pub async fn trip_summary(state: &State, trip_id: TripId) -> Result<Vec<MemberBalance>, AppError> {
    let members = state.store.members(trip_id).await?;
    let activities = state.store.activities(trip_id).await?;
    let payments = state.store.payments(trip_id).await?;

    Ok(reconcile(&members, &activities, &payments))
}
