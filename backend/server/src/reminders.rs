//! # Daily payment reminder
//!
//! Once a day every trip with an activity starting tomorrow (UTC) gets a broadcast naming the
//! activity, its date, the per-person share and how many members already paid. Personal
//! reminders are left to the payment flow.
//!
//! [`run_daily_reminders`] is a single pass for a given reference time and is what the
//! `reminders` binary calls. [`run_scheduler`] is the in-process loop the service spawns.
use std::{collections::HashMap, sync::Arc, time::Duration};

use chrono::{DateTime, NaiveDate, NaiveTime, TimeDelta, Utc};
use ledger::{ActivityId, Allocation, TripId};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

use crate::{error::AppError, messages, notify::Delivery, notify::publish_broadcast, state::State};

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Reminder {
    pub activity_id: ActivityId,
    pub trip_id: TripId,
    pub activity: String,
    pub per_person_share: f64,
    pub paid_count: u32,
    pub total_members: u32,
    pub delivery: Delivery,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ReminderReport {
    pub date: NaiveDate,
    pub reminders: Vec<Reminder>,
}

/// Calendar day after `reference`, in UTC.
pub fn tomorrow(reference: DateTime<Utc>) -> NaiveDate {
    reference
        .date_naive()
        .succ_opt()
        .unwrap_or(NaiveDate::MAX)
}

/// Next `hour:00` UTC strictly after `now`.
pub fn next_run(now: DateTime<Utc>, hour: u32) -> DateTime<Utc> {
    let at = NaiveTime::from_hms_opt(hour.min(23), 0, 0).unwrap_or(NaiveTime::MIN);
    let today = now.date_naive().and_time(at).and_utc();

    if today > now {
        today
    } else {
        today + TimeDelta::days(1)
    }
}

#[instrument(skip(state))]
pub async fn run_daily_reminders(
    state: &State,
    reference: DateTime<Utc>,
) -> Result<ReminderReport, AppError> {
    let date = tomorrow(reference);
    let activities = state.store.activities_starting_on(date).await?;
    info!("Found {} activities starting on {date}", activities.len());

    let mut headcounts: HashMap<TripId, u32> = HashMap::new();
    let mut reminders = Vec::with_capacity(activities.len());

    for activity in activities {
        let total_members = match headcounts.get(&activity.trip_id) {
            Some(count) => *count,
            None => {
                let members = state.store.members(activity.trip_id).await?;
                let count = Allocation::new(members.len()).headcount();
                headcounts.insert(activity.trip_id, count);
                count
            }
        };

        let allocation = Allocation::new(total_members as usize);
        let paid_count = state
            .store
            .activity_payments(activity.id)
            .await?
            .iter()
            .filter(|payment| payment.paid)
            .count() as u32;
        let per_person_share = allocation.share(activity.price);

        let notice = messages::activity_tomorrow(
            &activity.name,
            date,
            per_person_share,
            paid_count,
            total_members,
        );
        let delivery = publish_broadcast(state, activity.trip_id, &notice.subject, &notice.body).await;

        reminders.push(Reminder {
            activity_id: activity.id,
            trip_id: activity.trip_id,
            activity: activity.name,
            per_person_share,
            paid_count,
            total_members,
            delivery,
        });
    }

    Ok(ReminderReport { date, reminders })
}

pub async fn run_scheduler(state: Arc<State>, token: CancellationToken) {
    loop {
        let now = Utc::now();
        let at = next_run(now, state.config.reminder_hour_utc);
        let wait = (at - now).to_std().unwrap_or(Duration::ZERO);
        info!("Next payment reminders at {at}");

        tokio::select! {
            biased;
            _ = token.cancelled() => {
                info!("Reminder scheduler stopped");
                return;
            }
            _ = tokio::time::sleep(wait) => {}
        }

        match run_daily_reminders(&state, Utc::now()).await {
            Ok(report) => info!(
                "Sent {} payment reminders for {}",
                report.reminders.iter().filter(|r| r.delivery.is_delivered()).count(),
                report.date
            ),
            Err(e) => error!("Payment reminders failed: {} ({e})", e.as_label()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{memory, subscriptions::ensure_interest};
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn test_tomorrow() {
        assert_eq!(tomorrow(at(2025, 6, 10, 0, 0)), NaiveDate::from_ymd_opt(2025, 6, 11).unwrap());
        assert_eq!(tomorrow(at(2025, 6, 10, 23, 59)), NaiveDate::from_ymd_opt(2025, 6, 11).unwrap());
        assert_eq!(tomorrow(at(2025, 12, 31, 12, 0)), NaiveDate::from_ymd_opt(2026, 1, 1).unwrap());
    }

    #[test]
    fn test_next_run() {
        assert_eq!(next_run(at(2025, 6, 10, 8, 30), 9), at(2025, 6, 10, 9, 0));
        assert_eq!(next_run(at(2025, 6, 10, 9, 0), 9), at(2025, 6, 11, 9, 0));
        assert_eq!(next_run(at(2025, 6, 10, 22, 0), 9), at(2025, 6, 11, 9, 0));
    }

    #[tokio::test]
    async fn test_only_tomorrow() {
        let (state, store, transport) = memory::state();
        let salta = store.seed_trip("Salta", None, &["ana@x.com", "bob@x.com", "cai@x.com"]);
        let jujuy = store.seed_trip("Jujuy", None, &["dan@x.com"]);
        for member in ["ana@x.com", "bob@x.com", "cai@x.com"] {
            ensure_interest(&state, salta, member).await.unwrap();
        }
        ensure_interest(&state, jujuy, "dan@x.com").await.unwrap();

        let kayak = store.seed_activity(salta, "Kayak", 100.0, "2025-06-11");
        store.seed_activity(salta, "Bus", 30.0, "2025-06-10");
        store.seed_activity(jujuy, "Hike", 10.0, "2025-06-12");
        store.seed_payment(kayak, "bob@x.com");

        let report = run_daily_reminders(&state, at(2025, 6, 10, 9, 0)).await.unwrap();

        assert_eq!(report.date, NaiveDate::from_ymd_opt(2025, 6, 11).unwrap());
        assert_eq!(report.reminders.len(), 1);

        let reminder = &report.reminders[0];
        assert_eq!(reminder.activity_id, kayak);
        assert_eq!(reminder.per_person_share, 33.33);
        assert_eq!((reminder.paid_count, reminder.total_members), (1, 3));
        assert!(reminder.delivery.is_delivered());

        assert_eq!(transport.published_count(), 1);
        assert_eq!(transport.inbox("ana@x.com").len(), 1);
        assert!(transport.inbox("dan@x.com").is_empty());
    }

    #[tokio::test]
    async fn test_nothing_tomorrow() {
        let (state, store, transport) = memory::state();
        let trip_id = store.seed_trip("Salta", None, &["ana@x.com"]);
        store.seed_activity(trip_id, "Bus", 30.0, "2025-06-15");

        let report = run_daily_reminders(&state, at(2025, 6, 10, 9, 0)).await.unwrap();

        assert!(report.reminders.is_empty());
        assert_eq!(transport.published_count(), 0);
    }

    #[tokio::test]
    async fn test_scheduler_stops_on_cancel() {
        let (state, _, _) = memory::state();
        let token = CancellationToken::new();
        token.cancel();

        run_scheduler(state, token).await;
    }
}
