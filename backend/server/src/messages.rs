//! Notification texts.
use chrono::NaiveDate;
use ledger::{VoteTally, money::cents};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notice {
    pub subject: String,
    pub body: String,
}

pub fn new_activity(
    trip: &str,
    activity: &str,
    starts_on: NaiveDate,
    ends_on: NaiveDate,
    price: f64,
    created_by: Option<&str>,
) -> Notice {
    Notice {
        subject: format!("New activity in \"{trip}\""),
        body: format!(
            "A new activity was added to your trip \"{trip}\":\n\
             - {activity} ({starts_on} -> {ends_on})\n\
             - Price: {}\n\
             - Added by: {}",
            cents(price),
            created_by.unwrap_or("anonymous"),
        ),
    }
}

pub fn new_vote(trip: &str, activity: &str, tally: &VoteTally) -> Notice {
    Notice {
        subject: format!("New vote in \"{trip}\""),
        body: format!(
            "There is a new vote on an activity of your trip \"{trip}\":\n\
             - Activity: {activity}\n\
             - Current result: {} in favour / {} against",
            tally.in_favor, tally.against,
        ),
    }
}

pub fn budget_alert(trip: &str, ratio: f64, budget: f64, total: f64) -> Notice {
    Notice {
        subject: format!("Alert: 70% of the budget reached in \"{trip}\""),
        body: format!(
            "Budget alert for your trip \"{trip}\"\n\n\
             The activities added so far amount to roughly {}% of the trip's total budget.\n\n\
             - Total budget: {}\n\
             - Activities total: {}\n\n\
             Consider adjusting the budget or the activities to stay within it.",
            (ratio * 100.0).round(),
            cents(budget),
            cents(total),
        ),
    }
}

pub fn payment_recorded(
    trip: &str,
    activity: &str,
    payer: &str,
    share: f64,
    paid_count: u32,
    total_members: u32,
) -> Notice {
    Notice {
        subject: format!("New payment recorded in \"{trip}\""),
        body: format!(
            "{payer} just marked their payment for \"{activity}\" in the trip \"{trip}\".\n\n\
             Estimated amount per person: {}\n\
             Paid so far: {paid_count} of {total_members} people.",
            cents(share),
        ),
    }
}

pub fn payment_confirmed(trip: &str, activity: &str, payer: &str, share: f64) -> Notice {
    Notice {
        subject: format!("Your payment in \"{trip}\" is confirmed"),
        body: format!(
            "Hi {payer},\n\n\
             We recorded your payment for \"{activity}\" in the trip \"{trip}\".\n\n\
             Estimated amount per person: {}\n\n\
             Thanks for settling up!",
            cents(share),
        ),
    }
}

pub fn payment_pending(trip: &str, activity: &str, payer: &str, member: &str, share: f64) -> Notice {
    Notice {
        subject: format!("Reminder: payment pending in \"{trip}\""),
        body: format!(
            "Hi {member},\n\n\
             {payer} already paid their part of \"{activity}\" in the trip \"{trip}\".\n\n\
             Your payment for this activity is still pending.\n\n\
             Estimated amount per person: {}\n\
             Once you mark your payment these reminders stop.",
            cents(share),
        ),
    }
}

pub fn activity_tomorrow(
    activity: &str,
    starts_on: NaiveDate,
    share: f64,
    paid_count: u32,
    total_members: u32,
) -> Notice {
    Notice {
        subject: "Reminder: your activity is tomorrow".to_string(),
        body: format!(
            "Tomorrow ({starts_on}) is the activity \"{activity}\" of your trip.\n\n\
             Estimated amount per person: {}\n\
             Paid so far: {paid_count} of {total_members} people.\n\n\
             If you have not done it yet, remember to mark your payment in TripMate.",
            cents(share),
        ),
    }
}
