//! # Payment reminders, one pass
//!
//! Same pass the service runs every morning, for when it has to be sent (or re-sent) by hand.
//! Reminders go out for activities starting the day after the reference date.
//!
//! ## Exit status
//! Non-zero when the state cannot be built or the store fails. A broadcast that could not be
//! delivered is printed as `failed` and does not change the exit status.
use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use ledger::money::cents;
use server::{
    reminders::{Reminder, ReminderReport, run_daily_reminders},
    state::State,
};
use tracing::info;

/// Midnight UTC of `date`, or now.
pub fn reference_time(date: Option<NaiveDate>) -> DateTime<Utc> {
    match date {
        Some(date) => date.and_time(chrono::NaiveTime::MIN).and_utc(),
        None => Utc::now(),
    }
}

pub fn summary_line(reminder: &Reminder) -> String {
    let status = if reminder.delivery.is_delivered() {
        "sent"
    } else if reminder.delivery.is_failed() {
        "failed"
    } else {
        "skipped"
    };

    format!(
        "trip {} activity {} \"{}\": {} per person, {}/{} paid, {status}",
        reminder.trip_id,
        reminder.activity_id,
        reminder.activity,
        cents(reminder.per_person_share),
        reminder.paid_count,
        reminder.total_members,
    )
}

pub async fn send_reminders(date: Option<NaiveDate>) -> anyhow::Result<ReminderReport> {
    let state = State::new().await.context("failed to initialize state")?;

    let reference = reference_time(date);
    info!("Sending payment reminders with reference {reference}");

    let report = run_daily_reminders(&state, reference)
        .await
        .context("payment reminder pass failed")?;

    Ok(report)
}
