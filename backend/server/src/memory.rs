//! In-process [`Store`] and [`Transport`] for tests.
//!
//! The transport filters at publish time the same way the Redis broker does, and keeps every
//! delivered message per endpoint so tests can look at inboxes.
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use ledger::{Activity, ActivityDraft, ActivityId, NewTrip, Payment, Trip, TripId, Vote};

use crate::{
    config::{Config, DEFAULT_TOPIC_PREFIX},
    database::Store,
    error::{StoreError, TransportError},
    filter::{FilterPolicy, FilterState},
    state::{Readiness, State},
    transport::{EMAIL_PROTOCOL, Message, MessageId, Subscription, SubscriptionId, TopicHandle, Transport},
};

pub fn config() -> Config {
    Config {
        port: 0,
        database_url: "mysql://test".to_string(),
        redis_url: "redis://test".to_string(),
        topic_prefix: DEFAULT_TOPIC_PREFIX.to_string(),
        reminder_hour_utc: 9,
        cors_origin: "*".to_string(),
    }
}

pub fn state() -> (Arc<State>, Arc<MemoryStore>, Arc<MemoryTransport>) {
    let store = Arc::new(MemoryStore::default());
    let transport = Arc::new(MemoryTransport::default());

    let state = State::with_backends(config(), store.clone(), transport.clone(), Readiness::Ready);

    (state, store, transport)
}

fn date(raw: &str) -> NaiveDate {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").unwrap()
}

#[derive(Default)]
struct Tables {
    trips: BTreeMap<TripId, Trip>,
    members: BTreeMap<TripId, BTreeSet<String>>,
    activities: BTreeMap<ActivityId, Activity>,
    votes: BTreeMap<(ActivityId, String), Vote>,
    payments: BTreeMap<(ActivityId, String), Payment>,
    last_id: u64,
}

impl Tables {
    fn next_id(&mut self) -> u64 {
        self.last_id += 1;
        self.last_id
    }

    fn activity_ids(&self, trip_id: TripId) -> BTreeSet<ActivityId> {
        self.activities
            .values()
            .filter(|activity| activity.trip_id == trip_id)
            .map(|activity| activity.id)
            .collect()
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    rejected_codes: AtomicUsize,
}

impl MemoryStore {
    /// Trip dated June 2025, owned by the first member.
    pub fn seed_trip(&self, name: &str, budget: Option<f64>, members: &[&str]) -> TripId {
        let mut tables = self.tables.lock().unwrap();
        let id = tables.next_id();

        tables.trips.insert(
            id,
            Trip {
                id,
                name: name.to_string(),
                code: Some(format!("CODE{id:02}")),
                owner: members.first().map(|owner| owner.to_string()),
                starts_on: Some(date("2025-06-01")),
                ends_on: Some(date("2025-06-30")),
                budget,
                budget_alert_sent: false,
                created_at: Some(Utc::now()),
            },
        );
        tables
            .members
            .insert(id, members.iter().map(|member| member.to_string()).collect());

        id
    }

    pub fn seed_undated_trip(&self, name: &str) -> TripId {
        let id = self.seed_trip(name, None, &[]);

        let mut tables = self.tables.lock().unwrap();
        if let Some(trip) = tables.trips.get_mut(&id) {
            trip.starts_on = None;
            trip.ends_on = None;
        }

        id
    }

    pub fn seed_activity(&self, trip_id: TripId, name: &str, price: f64, day: &str) -> ActivityId {
        let mut tables = self.tables.lock().unwrap();
        let id = tables.next_id();

        tables.activities.insert(
            id,
            Activity {
                id,
                trip_id,
                name: name.to_string(),
                price,
                starts_on: Some(date(day)),
                ends_on: Some(date(day)),
                created_by: None,
                created_at: Some(Utc::now()),
            },
        );

        id
    }

    pub fn seed_payment(&self, activity_id: ActivityId, address: &str) {
        self.tables.lock().unwrap().payments.insert(
            (activity_id, address.to_string()),
            Payment {
                activity_id,
                address: address.to_string(),
                paid: true,
                paid_at: Some(Utc::now()),
            },
        );
    }

    /// Makes the next `count` trip inserts fail on the join code.
    pub fn reject_codes(&self, count: usize) {
        self.rejected_codes.store(count, Ordering::SeqCst);
    }

    pub fn trip_now(&self, trip_id: TripId) -> Trip {
        self.tables.lock().unwrap().trips[&trip_id].clone()
    }

    pub fn trip_count(&self) -> usize {
        self.tables.lock().unwrap().trips.len()
    }

    pub fn activity_count(&self) -> usize {
        self.tables.lock().unwrap().activities.len()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn trip(&self, trip_id: TripId) -> Result<Option<Trip>, StoreError> {
        Ok(self.tables.lock().unwrap().trips.get(&trip_id).cloned())
    }

    async fn trip_by_code(&self, code: &str) -> Result<Option<Trip>, StoreError> {
        let tables = self.tables.lock().unwrap();

        Ok(tables
            .trips
            .values()
            .find(|trip| trip.code.as_deref() == Some(code))
            .cloned())
    }

    async fn trips_for(&self, address: &str) -> Result<Vec<Trip>, StoreError> {
        let tables = self.tables.lock().unwrap();

        Ok(tables
            .trips
            .values()
            .rev()
            .filter(|trip| {
                trip.is_owned_by(address)
                    || tables
                        .members
                        .get(&trip.id)
                        .is_some_and(|members| members.contains(address))
            })
            .cloned()
            .collect())
    }

    async fn insert_trip(&self, trip: &NewTrip) -> Result<TripId, StoreError> {
        let rejected = self
            .rejected_codes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1));
        if rejected.is_ok() {
            return Err(StoreError::Duplicate);
        }

        let mut tables = self.tables.lock().unwrap();
        if tables
            .trips
            .values()
            .any(|existing| existing.code.as_deref() == Some(trip.code.as_str()))
        {
            return Err(StoreError::Duplicate);
        }

        let id = tables.next_id();
        tables.trips.insert(
            id,
            Trip {
                id,
                name: trip.name.clone(),
                code: Some(trip.code.clone()),
                owner: trip.owner.clone(),
                starts_on: Some(trip.starts_on),
                ends_on: Some(trip.ends_on),
                budget: trip.budget,
                budget_alert_sent: false,
                created_at: Some(Utc::now()),
            },
        );

        Ok(id)
    }

    async fn delete_trip(&self, trip_id: TripId) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().unwrap();
        let activity_ids = tables.activity_ids(trip_id);

        tables.trips.remove(&trip_id);
        tables.members.remove(&trip_id);
        tables.activities.retain(|id, _| !activity_ids.contains(id));
        tables.votes.retain(|(id, _), _| !activity_ids.contains(id));
        tables.payments.retain(|(id, _), _| !activity_ids.contains(id));

        Ok(())
    }

    async fn add_member(&self, trip_id: TripId, address: &str) -> Result<(), StoreError> {
        self.tables
            .lock()
            .unwrap()
            .members
            .entry(trip_id)
            .or_default()
            .insert(address.to_lowercase());

        Ok(())
    }

    async fn members(&self, trip_id: TripId) -> Result<Vec<String>, StoreError> {
        let tables = self.tables.lock().unwrap();

        let mut members: BTreeSet<String> = tables
            .members
            .get(&trip_id)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .map(|member| member.to_lowercase())
            .collect();
        if let Some(owner) = tables.trips.get(&trip_id).and_then(|trip| trip.owner.clone()) {
            members.insert(owner.to_lowercase());
        }

        Ok(members.into_iter().collect())
    }

    async fn activity(&self, activity_id: ActivityId) -> Result<Option<Activity>, StoreError> {
        Ok(self.tables.lock().unwrap().activities.get(&activity_id).cloned())
    }

    async fn activities(&self, trip_id: TripId) -> Result<Vec<Activity>, StoreError> {
        let tables = self.tables.lock().unwrap();

        Ok(tables
            .activities
            .values()
            .rev()
            .filter(|activity| activity.trip_id == trip_id)
            .cloned()
            .collect())
    }

    async fn activities_starting_on(&self, date: NaiveDate) -> Result<Vec<Activity>, StoreError> {
        let tables = self.tables.lock().unwrap();

        Ok(tables
            .activities
            .values()
            .filter(|activity| activity.starts_on == Some(date))
            .cloned()
            .collect())
    }

    async fn insert_activity(
        &self,
        trip_id: TripId,
        draft: &ActivityDraft,
        created_by: Option<&str>,
    ) -> Result<ActivityId, StoreError> {
        let mut tables = self.tables.lock().unwrap();
        let id = tables.next_id();

        tables.activities.insert(
            id,
            Activity {
                id,
                trip_id,
                name: draft.name.clone(),
                price: draft.price,
                starts_on: Some(draft.starts_on),
                ends_on: Some(draft.ends_on),
                created_by: created_by.map(str::to_string),
                created_at: Some(Utc::now()),
            },
        );

        Ok(id)
    }

    async fn delete_activity(
        &self,
        trip_id: TripId,
        activity_id: ActivityId,
    ) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock().unwrap();

        let owned = tables
            .activities
            .get(&activity_id)
            .is_some_and(|activity| activity.trip_id == trip_id);
        if owned {
            tables.activities.remove(&activity_id);
        }

        Ok(owned)
    }

    async fn upsert_vote(
        &self,
        activity_id: ActivityId,
        address: &str,
        in_favor: bool,
    ) -> Result<(), StoreError> {
        self.tables.lock().unwrap().votes.insert(
            (activity_id, address.to_string()),
            Vote {
                activity_id,
                address: address.to_string(),
                in_favor,
                updated_at: Some(Utc::now()),
            },
        );

        Ok(())
    }

    async fn votes(&self, trip_id: TripId) -> Result<Vec<Vote>, StoreError> {
        let tables = self.tables.lock().unwrap();
        let activity_ids = tables.activity_ids(trip_id);

        Ok(tables
            .votes
            .values()
            .filter(|vote| activity_ids.contains(&vote.activity_id))
            .cloned()
            .collect())
    }

    async fn activity_votes(&self, activity_id: ActivityId) -> Result<Vec<Vote>, StoreError> {
        let tables = self.tables.lock().unwrap();

        Ok(tables
            .votes
            .values()
            .filter(|vote| vote.activity_id == activity_id)
            .cloned()
            .collect())
    }

    async fn mark_paid(
        &self,
        activity_id: ActivityId,
        address: &str,
        paid_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.tables.lock().unwrap().payments.insert(
            (activity_id, address.to_string()),
            Payment {
                activity_id,
                address: address.to_string(),
                paid: true,
                paid_at: Some(paid_at),
            },
        );

        Ok(())
    }

    async fn payment(
        &self,
        activity_id: ActivityId,
        address: &str,
    ) -> Result<Option<Payment>, StoreError> {
        let tables = self.tables.lock().unwrap();

        Ok(tables.payments.get(&(activity_id, address.to_string())).cloned())
    }

    async fn payments(&self, trip_id: TripId) -> Result<Vec<Payment>, StoreError> {
        let tables = self.tables.lock().unwrap();
        let activity_ids = tables.activity_ids(trip_id);

        Ok(tables
            .payments
            .values()
            .filter(|payment| activity_ids.contains(&payment.activity_id))
            .cloned()
            .collect())
    }

    async fn activity_payments(&self, activity_id: ActivityId) -> Result<Vec<Payment>, StoreError> {
        let tables = self.tables.lock().unwrap();

        Ok(tables
            .payments
            .values()
            .filter(|payment| payment.activity_id == activity_id)
            .cloned()
            .collect())
    }

    async fn mark_budget_alert_sent(&self, trip_id: TripId) -> Result<(), StoreError> {
        if let Some(trip) = self.tables.lock().unwrap().trips.get_mut(&trip_id) {
            trip.budget_alert_sent = true;
        }

        Ok(())
    }
}

struct Entry {
    subscription: Subscription,
    filter: Option<String>,
}

#[derive(Default)]
struct Broker {
    topics: BTreeSet<String>,
    subscriptions: BTreeMap<u64, Entry>,
    inboxes: BTreeMap<String, Vec<Message>>,
    published: usize,
    last_id: u64,
}

impl Broker {
    fn add(&mut self, topic: &TopicHandle, endpoint: &str, filter: Option<String>) -> SubscriptionId {
        self.last_id += 1;
        let id = SubscriptionId(format!("{topic}:{}", self.last_id));

        self.subscriptions.insert(
            self.last_id,
            Entry {
                subscription: Subscription {
                    id: id.clone(),
                    topic: topic.clone(),
                    protocol: EMAIL_PROTOCOL.to_string(),
                    endpoint: endpoint.to_lowercase(),
                },
                filter,
            },
        );

        id
    }

    fn entry_mut(&mut self, id: &SubscriptionId) -> Result<&mut Entry, TransportError> {
        self.subscriptions
            .values_mut()
            .find(|entry| &entry.subscription.id == id)
            .ok_or_else(|| TransportError::UnknownSubscription(id.to_string()))
    }
}

#[derive(Default)]
pub struct MemoryTransport {
    broker: Mutex<Broker>,
    failing_publishes: AtomicBool,
    failing_filter_reads: AtomicBool,
    failing_subscriptions: AtomicBool,
}

impl MemoryTransport {
    pub fn fail_publishes(&self, fail: bool) {
        self.failing_publishes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_filter_reads(&self, fail: bool) {
        self.failing_filter_reads.store(fail, Ordering::SeqCst);
    }

    /// Refuses listing and creating subscriptions.
    pub fn fail_subscriptions(&self, fail: bool) {
        self.failing_subscriptions.store(fail, Ordering::SeqCst);
    }

    fn subscriptions_refused(&self) -> Result<(), TransportError> {
        if self.failing_subscriptions.load(Ordering::SeqCst) {
            return Err(TransportError::Backend("subscriptions refused".to_string()));
        }

        Ok(())
    }

    /// Subscription made before filters existed.
    pub fn seed_unfiltered(&self, topic: &TopicHandle, endpoint: &str) -> SubscriptionId {
        self.broker.lock().unwrap().add(topic, endpoint, None)
    }

    pub fn seed_with_filter(&self, topic: &TopicHandle, endpoint: &str, raw: &str) -> SubscriptionId {
        self.broker
            .lock()
            .unwrap()
            .add(topic, endpoint, Some(raw.to_string()))
    }

    pub fn topic_count(&self) -> usize {
        self.broker.lock().unwrap().topics.len()
    }

    pub fn subscription_count(&self) -> usize {
        self.broker.lock().unwrap().subscriptions.len()
    }

    pub fn subscriptions_of(&self, endpoint: &str) -> Vec<(Subscription, Option<String>)> {
        self.broker
            .lock()
            .unwrap()
            .subscriptions
            .values()
            .filter(|entry| entry.subscription.delivers_to(endpoint))
            .map(|entry| (entry.subscription.clone(), entry.filter.clone()))
            .collect()
    }

    pub fn inbox(&self, endpoint: &str) -> Vec<Message> {
        self.broker
            .lock()
            .unwrap()
            .inboxes
            .get(&endpoint.to_lowercase())
            .cloned()
            .unwrap_or_default()
    }

    pub fn published_count(&self) -> usize {
        self.broker.lock().unwrap().published
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn create_topic(&self, name: &str) -> Result<TopicHandle, TransportError> {
        self.broker.lock().unwrap().topics.insert(name.to_string());

        Ok(TopicHandle(format!("topic:{name}")))
    }

    async fn list_subscriptions(
        &self,
        topic: &TopicHandle,
    ) -> Result<Vec<Subscription>, TransportError> {
        self.subscriptions_refused()?;

        Ok(self
            .broker
            .lock()
            .unwrap()
            .subscriptions
            .values()
            .filter(|entry| &entry.subscription.topic == topic)
            .map(|entry| entry.subscription.clone())
            .collect())
    }

    async fn subscription_filter(
        &self,
        subscription: &SubscriptionId,
    ) -> Result<Option<String>, TransportError> {
        if self.failing_filter_reads.load(Ordering::SeqCst) {
            return Err(TransportError::Backend("filter read refused".to_string()));
        }

        let mut broker = self.broker.lock().unwrap();

        Ok(broker.entry_mut(subscription)?.filter.clone())
    }

    async fn set_subscription_filter(
        &self,
        subscription: &SubscriptionId,
        filter: &FilterPolicy,
    ) -> Result<(), TransportError> {
        let mut broker = self.broker.lock().unwrap();
        broker.entry_mut(subscription)?.filter = Some(filter.to_json()?);

        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &TopicHandle,
        _protocol: &str,
        endpoint: &str,
        filter: &FilterPolicy,
    ) -> Result<SubscriptionId, TransportError> {
        self.subscriptions_refused()?;
        let raw = filter.to_json()?;

        Ok(self.broker.lock().unwrap().add(topic, endpoint, Some(raw)))
    }

    async fn publish(
        &self,
        topic: &TopicHandle,
        message: &Message,
    ) -> Result<MessageId, TransportError> {
        if self.failing_publishes.load(Ordering::SeqCst) {
            return Err(TransportError::Backend("publish refused".to_string()));
        }

        let mut broker = self.broker.lock().unwrap();
        broker.published += 1;
        let message_id = MessageId(format!("message-{}", broker.published));

        let recipients: Vec<String> = broker
            .subscriptions
            .values()
            .filter(|entry| &entry.subscription.topic == topic)
            .filter(|entry| match FilterState::parse(entry.filter.as_deref()) {
                FilterState::Absent => true,
                FilterState::Malformed(_) => false,
                FilterState::Present(policy) => policy.accepts(&message.attributes),
            })
            .map(|entry| entry.subscription.endpoint.clone())
            .collect();

        for endpoint in recipients {
            broker.inboxes.entry(endpoint).or_default().push(message.clone());
        }

        Ok(message_id)
    }
}
