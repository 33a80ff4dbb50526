//! # Budget alert
//!
//! One broadcast per trip when the activities add up to 70% of the budget.
//!
//! ```text
//! NOT_SENT --(ratio >= 0.70, publish ok)--> SENT
//! ```
//!
//! `SENT` is terminal. The flag is persisted only after the broker took the message, so a failed
//! publish leaves the trip in `NOT_SENT` and the next activity created retries the alert. Two
//! activities created at the same moment may both observe `NOT_SENT` and both alert.
use ledger::{Trip, TripId, round2};
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::{error::AppError, messages, notify::publish_broadcast, state::State};

pub const BUDGET_ALERT_RATIO: f64 = 0.70;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertState {
    NotSent,
    Sent,
}

impl From<&Trip> for AlertState {
    fn from(trip: &Trip) -> Self {
        if trip.budget_alert_sent {
            AlertState::Sent
        } else {
            AlertState::NotSent
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AlertOutcome {
    /// No usable budget: absent, zero or not finite.
    NoBudget,
    AlreadySent,
    BelowThreshold { ratio: f64 },
    Sent { ratio: f64 },
    /// Publish failed, the trip stays `NOT_SENT`.
    Failed { ratio: f64, reason: String },
}

/// Pure transition check. `Ok(ratio)` means the alert is due.
pub fn evaluate(budget: Option<f64>, state: AlertState, total: f64) -> Result<f64, AlertOutcome> {
    let Some(budget) = budget.filter(|budget| budget.is_finite() && *budget > 0.0) else {
        return Err(AlertOutcome::NoBudget);
    };

    if !total.is_finite() {
        return Err(AlertOutcome::NoBudget);
    }

    if state == AlertState::Sent {
        return Err(AlertOutcome::AlreadySent);
    }

    let ratio = total / budget;
    if ratio < BUDGET_ALERT_RATIO {
        return Err(AlertOutcome::BelowThreshold { ratio });
    }

    Ok(ratio)
}

#[instrument(skip(state))]
pub async fn check_budget_alert(state: &State, trip_id: TripId) -> Result<AlertOutcome, AppError> {
    let trip = state
        .store
        .trip(trip_id)
        .await?
        .ok_or_else(|| AppError::NotFound("trip not found".to_string()))?;

    let total = round2(
        state
            .store
            .activities(trip_id)
            .await?
            .iter()
            .map(|activity| activity.price)
            .sum(),
    );

    let ratio = match evaluate(trip.budget, AlertState::from(&trip), total) {
        Ok(ratio) => ratio,
        Err(outcome) => {
            debug!("No budget alert for trip {trip_id}: {outcome:?}");
            return Ok(outcome);
        }
    };

    let notice = messages::budget_alert(&trip.name, ratio, trip.budget.unwrap_or_default(), total);
    let delivery = publish_broadcast(state, trip_id, &notice.subject, &notice.body).await;

    if !delivery.is_delivered() {
        return Ok(AlertOutcome::Failed {
            ratio,
            reason: format!("{delivery:?}"),
        });
    }

    state.store.mark_budget_alert_sent(trip_id).await?;
    info!("Budget alert sent for trip {trip_id} at {:.0}%", ratio * 100.0);

    Ok(AlertOutcome::Sent { ratio })
}
