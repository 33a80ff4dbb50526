//! Publishing to a trip's topic.
//!
//! Both entry points swallow failures: the caller gets a [`Delivery`] to inspect or report, never
//! an error, and a failed publish is logged once here.
use ledger::TripId;
use serde::Serialize;
use tracing::{info, warn};

use crate::{
    error::NotifyError,
    state::State,
    topics::resolve_topic,
    transport::{Classification, Message, MessageId},
};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum Delivery {
    Delivered(MessageId),
    /// Nothing to send, e.g. no recipient.
    Skipped,
    Failed(String),
}

impl Delivery {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Delivery::Delivered(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Delivery::Failed(_))
    }

    fn from_result(result: Result<MessageId, NotifyError>, trip_id: TripId, what: &str) -> Self {
        match result {
            Ok(message_id) => {
                info!("Sent {what} {message_id} for trip {trip_id}");
                Delivery::Delivered(message_id)
            }
            Err(e) => {
                warn!("Failed to send {what} for trip {trip_id}: {} ({e})", e.as_label());
                Delivery::Failed(e.to_string())
            }
        }
    }
}

async fn publish(
    state: &State,
    trip_id: TripId,
    classification: &Classification,
    subject: &str,
    body: &str,
) -> Result<MessageId, NotifyError> {
    let topic = resolve_topic(state, trip_id).await?;
    let message = Message::new(classification, subject, body);

    Ok(state.transport.publish(&topic, &message).await?)
}

pub async fn publish_broadcast(state: &State, trip_id: TripId, subject: &str, body: &str) -> Delivery {
    let result = publish(state, trip_id, &Classification::Broadcast, subject, body).await;

    Delivery::from_result(result, trip_id, "broadcast")
}

pub async fn publish_personal(
    state: &State,
    trip_id: TripId,
    address: &str,
    subject: &str,
    body: &str,
) -> Delivery {
    let address = address.trim();
    if address.is_empty() {
        return Delivery::Skipped;
    }

    let classification = Classification::personal(address);
    let result = publish(state, trip_id, &classification, subject, body).await;

    Delivery::from_result(result, trip_id, "personal message")
}
