//! # Subscription upkeep
//!
//! Every address with an interest in a trip holds two email subscriptions on the trip's topic:
//!
//! - broadcast: `{"kind":["broadcast"]}`, receives everything sent to the whole trip
//! - personal: `{"kind":["personal"],"user":[<address>]}`, receives only what is addressed to it
//!
//! [`ensure_interest`] converges an address towards that pair and is safe to call on every
//! join, create and payment. Subscriptions made before filters existed carry no policy and would
//! receive every personal message on the topic; they are repaired in place with the broadcast
//! policy instead of being replaced, which also makes them count as the broadcast subscription.
//!
//! Nothing here takes locks. Two concurrent calls for the same address may both subscribe; the
//! next call then sees both classes and does nothing.
use ledger::TripId;
use tracing::{debug, info, warn};

use crate::{
    error::NotifyError,
    filter::{FilterPolicy, FilterState},
    state::State,
    topics::resolve_topic,
    transport::{EMAIL_PROTOCOL, TopicHandle},
};

pub async fn ensure_interest(
    state: &State,
    trip_id: TripId,
    address: &str,
) -> Result<TopicHandle, NotifyError> {
    let topic = resolve_topic(state, trip_id).await?;

    let address = address.trim().to_lowercase();
    if address.is_empty() {
        return Ok(topic);
    }

    let existing: Vec<_> = state
        .transport
        .list_subscriptions(&topic)
        .await?
        .into_iter()
        .filter(|subscription| subscription.delivers_to(&address))
        .collect();

    let mut has_broadcast = false;
    let mut has_personal = false;

    for subscription in &existing {
        let raw = match state.transport.subscription_filter(&subscription.id).await {
            Ok(raw) => raw,
            Err(e) => {
                debug!(
                    "Could not read filter of {}, treating it as unfiltered: {}",
                    subscription.id,
                    e.as_label()
                );
                None
            }
        };

        match FilterState::parse(raw.as_deref()) {
            FilterState::Absent => {
                state
                    .transport
                    .set_subscription_filter(&subscription.id, &FilterPolicy::broadcast())
                    .await?;
                info!("Repaired unfiltered subscription {} for {address}", subscription.id);
                has_broadcast = true;
            }
            FilterState::Malformed(reason) => {
                warn!("Leaving subscription {} with unreadable filter: {reason}", subscription.id);
            }
            filter => {
                has_broadcast |= filter.is_broadcast();
                has_personal |= filter.is_personal_for(&address);
            }
        }
    }

    if !has_broadcast {
        let id = state
            .transport
            .subscribe(&topic, EMAIL_PROTOCOL, &address, &FilterPolicy::broadcast())
            .await?;
        debug!("Subscribed {address} to broadcasts on {topic} as {id}");
    }

    if !has_personal {
        let id = state
            .transport
            .subscribe(&topic, EMAIL_PROTOCOL, &address, &FilterPolicy::personal(&address))
            .await?;
        debug!("Subscribed {address} to personal messages on {topic} as {id}");
    }

    Ok(topic)
}
