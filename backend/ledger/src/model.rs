use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

pub type TripId = u64;
pub type ActivityId = u64;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Trip {
    pub id: TripId,
    pub name: String,
    /// Join code handed out to members. Legacy rows may not have one.
    pub code: Option<String>,
    pub owner: Option<String>,
    /// Legacy rows may miss their range; activities cannot be added to those.
    pub starts_on: Option<NaiveDate>,
    pub ends_on: Option<NaiveDate>,
    pub budget: Option<f64>,
    pub budget_alert_sent: bool,
    pub created_at: Option<DateTime<Utc>>,
}

impl Trip {
    pub fn is_owned_by(&self, address: &str) -> bool {
        self.owner.as_deref() == Some(address)
    }

    pub fn date_range(&self) -> Option<(NaiveDate, NaiveDate)> {
        Some((self.starts_on?, self.ends_on?))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct NewTrip {
    pub name: String,
    pub code: String,
    pub owner: Option<String>,
    pub starts_on: NaiveDate,
    pub ends_on: NaiveDate,
    pub budget: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub id: ActivityId,
    pub trip_id: TripId,
    pub name: String,
    pub price: f64,
    pub starts_on: Option<NaiveDate>,
    pub ends_on: Option<NaiveDate>,
    pub created_by: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

/// Validated input for a new activity.
#[derive(Clone, Debug, PartialEq)]
pub struct ActivityDraft {
    pub name: String,
    pub price: f64,
    pub starts_on: NaiveDate,
    pub ends_on: NaiveDate,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    pub activity_id: ActivityId,
    pub address: String,
    pub in_favor: bool,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub activity_id: ActivityId,
    pub address: String,
    pub paid: bool,
    pub paid_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteTally {
    pub in_favor: u32,
    pub against: u32,
    pub total: u32,
}

impl VoteTally {
    pub fn count<'a>(votes: impl IntoIterator<Item = &'a Vote>) -> Self {
        votes.into_iter().fold(Self::default(), |mut tally, vote| {
            if vote.in_favor {
                tally.in_favor += 1;
            } else {
                tally.against += 1;
            }
            tally.total += 1;
            tally
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vote(activity_id: ActivityId, address: &str, in_favor: bool) -> Vote {
        Vote {
            activity_id,
            address: address.to_string(),
            in_favor,
            updated_at: None,
        }
    }

    #[test]
    fn test_tally() {
        let votes = [vote(1, "a@x.com", true), vote(1, "b@x.com", false), vote(1, "c@x.com", true)];
        let tally = VoteTally::count(&votes);

        assert_eq!(tally, VoteTally { in_favor: 2, against: 1, total: 3 });
        assert_eq!(VoteTally::count(&Vec::<Vote>::new()), VoteTally::default());
    }

    #[test]
    fn test_date_range_requires_both_ends() {
        let mut trip = Trip {
            id: 1,
            name: "Bariloche".to_string(),
            code: None,
            owner: Some("a@x.com".to_string()),
            starts_on: NaiveDate::from_ymd_opt(2025, 6, 1),
            ends_on: None,
            budget: None,
            budget_alert_sent: false,
            created_at: None,
        };

        assert!(trip.date_range().is_none());
        trip.ends_on = NaiveDate::from_ymd_opt(2025, 6, 9);
        assert!(trip.date_range().is_some());
        assert!(trip.is_owned_by("a@x.com"));
        assert!(!trip.is_owned_by("b@x.com"));
    }
}
