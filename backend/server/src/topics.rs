//! One topic per trip, named `<prefix><code>-viaje-<slug>`.
//!
//! Names are deterministic, so the broker's idempotent create doubles as the lookup. A trip that
//! cannot be found still gets a topic, named after its raw id.
use ledger::{Trip, TripId};
use tracing::debug;

use crate::{error::NotifyError, state::State, transport::TopicHandle, utils::slugify};

/// Longest name the broker accepts for a topic.
pub const MAX_TOPIC_NAME_LEN: usize = 256;

pub fn topic_name(prefix: &str, code: &str, name: &str) -> String {
    let base = format!("{prefix}{code}-viaje-");
    let room = MAX_TOPIC_NAME_LEN.saturating_sub(base.len()).max(1);

    let slug: String = slugify(name).chars().take(room).collect();

    format!("{base}{slug}")
}

/// Name and code of `trip`, or the synthetic pair derived from `trip_id` when it is gone.
///
/// Only empty values fall back. A blank name still slugs to `viaje`, which is the name existing
/// topics of such trips already carry.
pub fn meta_for(trip_id: TripId, trip: Option<&Trip>) -> (String, String) {
    let name = trip
        .map(|trip| trip.name.clone())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| format!("viaje-{trip_id}"));
    let code = trip
        .and_then(|trip| trip.code.clone())
        .filter(|code| !code.is_empty())
        .unwrap_or_else(|| format!("VIAJE-{trip_id}"));

    (name, code)
}

pub async fn resolve_topic(state: &State, trip_id: TripId) -> Result<TopicHandle, NotifyError> {
    let trip = state.store.trip(trip_id).await?;
    let (name, code) = meta_for(trip_id, trip.as_ref());

    let topic = topic_name(&state.config.topic_prefix, &code, &name);
    debug!("Resolved trip {trip_id} to topic {topic}");

    Ok(state.transport.create_topic(&topic).await?)
}
