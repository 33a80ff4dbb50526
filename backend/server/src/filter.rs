//! # Subscription filter policies
//!
//! JSON shape stored on every subscription:
//! - broadcast: `{"kind":["broadcast"]}`
//! - personal: `{"kind":["personal"],"user":["ana@example.com"]}`
//!
//! A message passes a policy when every key of the policy is present among the message
//! attributes with one of the listed values. Attributes the policy does not mention are ignored.
//!
//! Policies come back from the broker as raw text. [`FilterState::parse`] keeps "no policy"
//! apart from "unreadable policy": the first is a legacy subscription to repair, the second is
//! left alone and never counts towards either class.
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::transport::{Classification, KIND_ATTRIBUTE, MessageAttributes, USER_ATTRIBUTE};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterPolicy {
    #[serde(default)]
    pub kind: BTreeSet<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<BTreeSet<String>>,
}

impl FilterPolicy {
    pub fn broadcast() -> Self {
        Self {
            kind: BTreeSet::from([Classification::BROADCAST.to_string()]),
            user: None,
        }
    }

    pub fn personal(address: &str) -> Self {
        Self {
            kind: BTreeSet::from([Classification::PERSONAL.to_string()]),
            user: Some(BTreeSet::from([address.to_lowercase()])),
        }
    }

    pub fn accepts_kind(&self, kind: &str) -> bool {
        self.kind.contains(kind)
    }

    /// Address predicate check, case-insensitive.
    pub fn includes_user(&self, address: &str) -> bool {
        self.user
            .as_ref()
            .is_some_and(|users| users.iter().any(|user| user.eq_ignore_ascii_case(address)))
    }

    /// Receives every broadcast.
    pub fn is_broadcast(&self) -> bool {
        self.accepts_kind(Classification::BROADCAST)
    }

    /// Receives personal messages addressed to `address`.
    pub fn is_personal_for(&self, address: &str) -> bool {
        self.accepts_kind(Classification::PERSONAL) && self.includes_user(address)
    }

    /// Broker-side match of a message against this policy.
    pub fn accepts(&self, attributes: &MessageAttributes) -> bool {
        let kind_ok = attributes
            .get(KIND_ATTRIBUTE)
            .is_some_and(|kind| self.kind.contains(kind));

        let user_ok = match &self.user {
            None => true,
            Some(users) => attributes
                .get(USER_ATTRIBUTE)
                .is_some_and(|user| users.iter().any(|u| u.eq_ignore_ascii_case(user))),
        };

        kind_ok && user_ok
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FilterState {
    /// No policy attached. Delivers everything, predates filtering.
    Absent,
    /// Policy text that is not a policy.
    Malformed(String),
    Present(FilterPolicy),
}

impl FilterState {
    pub fn parse(raw: Option<&str>) -> Self {
        let Some(raw) = raw.map(str::trim).filter(|raw| !raw.is_empty()) else {
            return FilterState::Absent;
        };

        match serde_json::from_str::<FilterPolicy>(raw) {
            Ok(policy) => FilterState::Present(policy),
            Err(e) => FilterState::Malformed(e.to_string()),
        }
    }

    pub fn is_broadcast(&self) -> bool {
        matches!(self, FilterState::Present(policy) if policy.is_broadcast())
    }

    pub fn is_personal_for(&self, address: &str) -> bool {
        matches!(self, FilterState::Present(policy) if policy.is_personal_for(address))
    }
}
