//! # Pub/sub transport
//!
//! Contract of the message broker behind trip notifications. One topic per trip carries both
//! classes of traffic; subscriptions decide what they receive through their filter policy.
//!
//! ## Operations
//! - `create_topic`: create-if-absent, returns the existing handle for a known name
//! - `list_subscriptions`: every subscription on a topic, any endpoint
//! - `subscription_filter` / `set_subscription_filter`: raw policy text of one subscription
//! - `subscribe`: new subscription with a policy attached from the start
//! - `publish`: message + classification attributes, filtered broker-side
//!
//! ## Message attributes
//! - `kind`: `broadcast` or `personal`
//! - `user`: lowercase address, only on `personal`
use std::{collections::BTreeMap, fmt};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{error::TransportError, filter::FilterPolicy};

pub const EMAIL_PROTOCOL: &str = "email";

pub const KIND_ATTRIBUTE: &str = "kind";
pub const USER_ATTRIBUTE: &str = "user";

pub type MessageAttributes = BTreeMap<String, String>;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TopicHandle(pub String);

impl fmt::Display for TopicHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionId(pub String);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub topic: TopicHandle,
    pub protocol: String,
    pub endpoint: String,
}

impl Subscription {
    /// Email subscription of `address`, endpoint compared case-insensitively.
    pub fn delivers_to(&self, address: &str) -> bool {
        self.protocol == EMAIL_PROTOCOL && self.endpoint.eq_ignore_ascii_case(address)
    }
}

/// Who a message is meant for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Classification {
    Broadcast,
    Personal { user: String },
}

impl Classification {
    pub const BROADCAST: &'static str = "broadcast";
    pub const PERSONAL: &'static str = "personal";

    pub fn personal(address: &str) -> Self {
        Classification::Personal {
            user: address.to_lowercase(),
        }
    }

    pub fn attributes(&self) -> MessageAttributes {
        let mut attributes = MessageAttributes::new();

        match self {
            Classification::Broadcast => {
                attributes.insert(KIND_ATTRIBUTE.to_string(), Self::BROADCAST.to_string());
            }
            Classification::Personal { user } => {
                attributes.insert(KIND_ATTRIBUTE.to_string(), Self::PERSONAL.to_string());
                attributes.insert(USER_ATTRIBUTE.to_string(), user.clone());
            }
        }

        attributes
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub subject: String,
    pub body: String,
    pub attributes: MessageAttributes,
}

impl Message {
    pub fn new(classification: &Classification, subject: &str, body: &str) -> Self {
        Self {
            subject: subject.to_string(),
            body: body.to_string(),
            attributes: classification.attributes(),
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn create_topic(&self, name: &str) -> Result<TopicHandle, TransportError>;

    async fn list_subscriptions(
        &self,
        topic: &TopicHandle,
    ) -> Result<Vec<Subscription>, TransportError>;

    /// Raw filter policy text, `None` when the subscription has none.
    async fn subscription_filter(
        &self,
        subscription: &SubscriptionId,
    ) -> Result<Option<String>, TransportError>;

    async fn set_subscription_filter(
        &self,
        subscription: &SubscriptionId,
        filter: &FilterPolicy,
    ) -> Result<(), TransportError>;

    async fn subscribe(
        &self,
        topic: &TopicHandle,
        protocol: &str,
        endpoint: &str,
        filter: &FilterPolicy,
    ) -> Result<SubscriptionId, TransportError>;

    async fn publish(
        &self,
        topic: &TopicHandle,
        message: &Message,
    ) -> Result<MessageId, TransportError>;
}
