//! # Redis broker
//!
//! Topic and subscription bookkeeping for trip notifications, plus delivery into per-endpoint
//! outboxes drained by the mail relay.
//!
//! ## Keys
//!
//! - `topics`: hash, topic name -> handle. Written with `HSETNX` so concurrent creates converge
//! - `<handle>:subscriptions`: set of subscription ids on a topic
//! - `subscription:<id>`: hash with `topic`, `protocol`, `endpoint` and an optional `filter`
//! - `subscription:seq` / `message:seq`: id counters
//! - `outbox:<protocol>:<endpoint>`: list of delivered envelopes, oldest first
//!
//! ## Delivery
//!
//! Filtering happens here, at publish time. A subscription without a policy receives
//! everything; a policy that does not parse receives nothing. Every published envelope is also
//! sent on the topic's channel for live listeners.
use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use redis::{
    AsyncCommands, Client,
    aio::{ConnectionManager, ConnectionManagerConfig},
};
use serde::Serialize;
use tracing::debug;

use crate::{
    error::TransportError,
    filter::{FilterPolicy, FilterState},
    transport::{Message, MessageAttributes, MessageId, Subscription, SubscriptionId, TopicHandle, Transport},
};

const TOPICS_KEY: &str = "topics";
const SUBSCRIPTION_SEQ_KEY: &str = "subscription:seq";
const MESSAGE_SEQ_KEY: &str = "message:seq";

const FIELD_TOPIC: &str = "topic";
const FIELD_PROTOCOL: &str = "protocol";
const FIELD_ENDPOINT: &str = "endpoint";
const FIELD_FILTER: &str = "filter";

pub async fn init_redis(redis_url: &str) -> Result<ConnectionManager, TransportError> {
    let config = ConnectionManagerConfig::new()
        .set_number_of_retries(1)
        .set_connection_timeout(Duration::from_millis(100));

    let client = Client::open(redis_url)?;
    let connection_manager = client.get_connection_manager_with_config(config).await?;

    Ok(connection_manager)
}

#[derive(Serialize)]
struct Envelope<'a> {
    message_id: &'a str,
    topic: &'a str,
    subject: &'a str,
    body: &'a str,
    attributes: &'a MessageAttributes,
}

#[derive(Clone)]
pub struct RedisBroker {
    connection: ConnectionManager,
}

impl RedisBroker {
    pub fn new(connection: ConnectionManager) -> Self {
        Self { connection }
    }

    fn subscriptions_key(topic: &TopicHandle) -> String {
        format!("{topic}:subscriptions")
    }

    fn subscription_key(subscription: &SubscriptionId) -> String {
        format!("subscription:{subscription}")
    }

    fn outbox_key(protocol: &str, endpoint: &str) -> String {
        format!("outbox:{protocol}:{}", endpoint.to_lowercase())
    }

    async fn record(
        &self,
        subscription: &SubscriptionId,
    ) -> Result<HashMap<String, String>, TransportError> {
        let mut connection = self.connection.clone();
        let record: HashMap<String, String> = connection
            .hgetall(Self::subscription_key(subscription))
            .await?;

        if record.is_empty() {
            return Err(TransportError::UnknownSubscription(subscription.to_string()));
        }

        Ok(record)
    }

    async fn subscription_ids(
        &self,
        topic: &TopicHandle,
    ) -> Result<Vec<SubscriptionId>, TransportError> {
        let mut connection = self.connection.clone();
        let mut ids: Vec<String> = connection.smembers(Self::subscriptions_key(topic)).await?;
        ids.sort();

        Ok(ids.into_iter().map(SubscriptionId).collect())
    }
}

#[async_trait]
impl Transport for RedisBroker {
    async fn create_topic(&self, name: &str) -> Result<TopicHandle, TransportError> {
        let mut connection = self.connection.clone();
        let handle = format!("topic:{name}");

        let created: bool = connection.hset_nx(TOPICS_KEY, name, &handle).await?;
        if created {
            debug!("Created topic {handle}");
            return Ok(TopicHandle(handle));
        }

        let existing: Option<String> = connection.hget(TOPICS_KEY, name).await?;
        Ok(TopicHandle(existing.unwrap_or(handle)))
    }

    async fn list_subscriptions(
        &self,
        topic: &TopicHandle,
    ) -> Result<Vec<Subscription>, TransportError> {
        let mut subscriptions = Vec::new();

        for id in self.subscription_ids(topic).await? {
            let record = match self.record(&id).await {
                Ok(record) => record,
                Err(TransportError::UnknownSubscription(_)) => continue,
                Err(e) => return Err(e),
            };

            subscriptions.push(Subscription {
                id,
                topic: topic.clone(),
                protocol: record.get(FIELD_PROTOCOL).cloned().unwrap_or_default(),
                endpoint: record.get(FIELD_ENDPOINT).cloned().unwrap_or_default(),
            });
        }

        Ok(subscriptions)
    }

    async fn subscription_filter(
        &self,
        subscription: &SubscriptionId,
    ) -> Result<Option<String>, TransportError> {
        let record = self.record(subscription).await?;

        Ok(record.get(FIELD_FILTER).cloned())
    }

    async fn set_subscription_filter(
        &self,
        subscription: &SubscriptionId,
        filter: &FilterPolicy,
    ) -> Result<(), TransportError> {
        self.record(subscription).await?;

        let mut connection = self.connection.clone();
        let _: () = connection
            .hset(Self::subscription_key(subscription), FIELD_FILTER, filter.to_json()?)
            .await?;

        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &TopicHandle,
        protocol: &str,
        endpoint: &str,
        filter: &FilterPolicy,
    ) -> Result<SubscriptionId, TransportError> {
        let mut connection = self.connection.clone();

        let seq: u64 = connection.incr(SUBSCRIPTION_SEQ_KEY, 1).await?;
        let id = SubscriptionId(format!("{topic}:{seq}"));

        let fields = [
            (FIELD_TOPIC, topic.0.clone()),
            (FIELD_PROTOCOL, protocol.to_string()),
            (FIELD_ENDPOINT, endpoint.to_lowercase()),
            (FIELD_FILTER, filter.to_json()?),
        ];

        let _: () = connection
            .hset_multiple(Self::subscription_key(&id), &fields[..])
            .await?;
        let _: () = connection
            .sadd(Self::subscriptions_key(topic), &id.0)
            .await?;

        Ok(id)
    }

    async fn publish(
        &self,
        topic: &TopicHandle,
        message: &Message,
    ) -> Result<MessageId, TransportError> {
        let mut connection = self.connection.clone();

        let seq: u64 = connection.incr(MESSAGE_SEQ_KEY, 1).await?;
        let message_id = format!("message-{seq}");

        let envelope = serde_json::to_string(&Envelope {
            message_id: &message_id,
            topic: &topic.0,
            subject: &message.subject,
            body: &message.body,
            attributes: &message.attributes,
        })?;

        for id in self.subscription_ids(topic).await? {
            let record = match self.record(&id).await {
                Ok(record) => record,
                Err(TransportError::UnknownSubscription(_)) => continue,
                Err(e) => return Err(e),
            };

            let accepted = match FilterState::parse(record.get(FIELD_FILTER).map(String::as_str)) {
                FilterState::Absent => true,
                FilterState::Malformed(_) => false,
                FilterState::Present(policy) => policy.accepts(&message.attributes),
            };

            if !accepted {
                continue;
            }

            let (Some(protocol), Some(endpoint)) =
                (record.get(FIELD_PROTOCOL), record.get(FIELD_ENDPOINT))
            else {
                continue;
            };

            let _: () = connection
                .rpush(Self::outbox_key(protocol, endpoint), &envelope)
                .await?;
            debug!("Delivered {message_id} to {id}");
        }

        let _: () = connection.publish(&topic.0, &envelope).await?;

        Ok(MessageId(message_id))
    }
}
