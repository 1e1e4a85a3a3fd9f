//! In-process publish/subscribe.
//!
//! Handlers run one after another in registration order, with no bus lock
//! held, so a handler may freely call back into the bus or the cache.

use std::any::Any;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, Weak};

use futures::FutureExt;
use futures::future::BoxFuture;
use metrics::counter;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cache::{ConfigurationError, mutex_lock};

use super::topic::{EventTopic, PortalEvent};

const SOURCE: &str = "events::bus";

const METRIC_EVENTS_EMITTED: &str = "opsdesk_events_emitted_total";
const METRIC_HANDLER_FAILURES: &str = "opsdesk_event_handler_failures_total";

const DEFAULT_MAX_HISTORY_SIZE: usize = 100;

/// Event bus settings, read from the `[events]` table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct EventBusConfig {
    /// Number of recent emits kept for diagnostics. Must be greater than zero.
    pub max_history_size: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            max_history_size: DEFAULT_MAX_HISTORY_SIZE,
        }
    }
}

impl EventBusConfig {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.max_history_size == 0 {
            return Err(ConfigurationError::ZeroHistory);
        }
        Ok(())
    }
}

/// Identity of one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Why a handler did not complete.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    #[error("{0}")]
    Failed(String),
    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl HandlerError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Future returned by a subscribed handler.
pub type HandlerFuture = BoxFuture<'static, Result<(), HandlerError>>;

type Handler = Arc<dyn Fn(PortalEvent) -> HandlerFuture + Send + Sync>;

struct Subscription {
    id: SubscriptionId,
    handler: Handler,
    once: bool,
}

/// One emit, kept for diagnostics only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventRecord {
    pub topic: EventTopic,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// A handler that failed during a dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerFailure {
    pub subscription_id: SubscriptionId,
    pub error: HandlerError,
}

/// What happened during one `emit`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub topic: EventTopic,
    /// Handlers that completed successfully.
    pub delivered: usize,
    pub failures: Vec<HandlerFailure>,
}

impl DispatchReport {
    fn new(topic: EventTopic) -> Self {
        Self {
            topic,
            delivered: 0,
            failures: Vec::new(),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Subscription counts and recent emits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BusStats {
    pub total_subscriptions: usize,
    pub per_topic: BTreeMap<EventTopic, usize>,
    /// Oldest first.
    pub recent_events: Vec<EventRecord>,
}

#[derive(Default)]
struct BusState {
    /// Per topic, in registration order. Topics with no subscriptions have no
    /// slot.
    subscriptions: BTreeMap<EventTopic, Vec<Subscription>>,
    history: VecDeque<EventRecord>,
}

impl BusState {
    fn add(&mut self, topic: EventTopic, subscription: Subscription) {
        self.subscriptions
            .entry(topic)
            .or_default()
            .push(subscription);
    }

    fn remove(&mut self, topic: EventTopic, id: SubscriptionId) -> bool {
        let Some(subscriptions) = self.subscriptions.get_mut(&topic) else {
            return false;
        };
        let before = subscriptions.len();
        subscriptions.retain(|subscription| subscription.id != id);
        let removed = subscriptions.len() != before;
        if subscriptions.is_empty() {
            self.subscriptions.remove(&topic);
        }
        removed
    }

    /// Snapshot the handlers for one dispatch, taking `once` subscriptions out
    /// of the table so no other dispatch can fire them again.
    fn take_dispatch(&mut self, topic: EventTopic) -> Vec<(SubscriptionId, Handler)> {
        let Some(subscriptions) = self.subscriptions.get_mut(&topic) else {
            return Vec::new();
        };
        let snapshot = subscriptions
            .iter()
            .map(|subscription| (subscription.id, Arc::clone(&subscription.handler)))
            .collect();
        subscriptions.retain(|subscription| !subscription.once);
        if subscriptions.is_empty() {
            self.subscriptions.remove(&topic);
        }
        snapshot
    }

    fn record(&mut self, record: EventRecord, max_history: usize) {
        self.history.push_back(record);
        while self.history.len() > max_history {
            self.history.pop_front();
        }
    }
}

struct BusInner {
    state: Mutex<BusState>,
    max_history: usize,
}

/// In-process event bus. Cloning yields another handle to the same bus.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("max_history", &self.inner.max_history)
            .finish_non_exhaustive()
    }
}

/// Handle returned by [`EventBus::on`] and [`EventBus::once`].
///
/// Dropping the handle leaves the subscription in place; call
/// [`unsubscribe`](Self::unsubscribe) to remove it.
#[derive(Debug)]
#[must_use = "keep the handle to be able to unsubscribe"]
pub struct Unsubscribe {
    bus: Weak<BusInner>,
    topic: EventTopic,
    id: SubscriptionId,
}

impl Unsubscribe {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn topic(&self) -> EventTopic {
        self.topic
    }

    /// Remove the subscription. Returns `false` if it was already gone (fired
    /// `once`, removed with `off`, cleared, or the bus was dropped).
    pub fn unsubscribe(self) -> bool {
        match self.bus.upgrade() {
            Some(inner) => {
                mutex_lock(&inner.state, SOURCE, "unsubscribe").remove(self.topic, self.id)
            }
            None => false,
        }
    }
}

impl EventBus {
    pub fn new(config: EventBusConfig) -> Result<Self, ConfigurationError> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(BusInner {
                state: Mutex::new(BusState::default()),
                max_history: config.max_history_size,
            }),
        })
    }

    /// Subscribe `handler` to every future emit on `topic`.
    pub fn on<F, Fut>(&self, topic: EventTopic, handler: F) -> Unsubscribe
    where
        F: Fn(PortalEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.subscribe(topic, handler, false)
    }

    /// Subscribe `handler` to the next emit on `topic` only.
    pub fn once<F, Fut>(&self, topic: EventTopic, handler: F) -> Unsubscribe
    where
        F: Fn(PortalEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.subscribe(topic, handler, true)
    }

    fn subscribe<F, Fut>(&self, topic: EventTopic, handler: F, once: bool) -> Unsubscribe
    where
        F: Fn(PortalEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        let id = SubscriptionId::new();
        let handler: Handler = Arc::new(move |event| handler(event).boxed());
        mutex_lock(&self.inner.state, SOURCE, "subscribe").add(
            topic,
            Subscription {
                id,
                handler,
                once,
            },
        );
        debug!(topic = %topic, subscription_id = %id, once, "subscription added");

        Unsubscribe {
            bus: Arc::downgrade(&self.inner),
            topic,
            id,
        }
    }

    /// Remove a subscription by identity. Returns whether it existed.
    pub fn off(&self, topic: EventTopic, id: SubscriptionId) -> bool {
        mutex_lock(&self.inner.state, SOURCE, "off").remove(topic, id)
    }

    /// Deliver `event` to every subscription on its topic.
    ///
    /// Handlers run in registration order and each is awaited before the
    /// next starts. A failing or panicking handler is logged and reported but
    /// does not stop the rest, and never makes `emit` itself fail.
    pub async fn emit(&self, event: PortalEvent) -> DispatchReport {
        let topic = event.topic();
        let handlers = {
            let mut state = mutex_lock(&self.inner.state, SOURCE, "emit");
            state.record(
                EventRecord {
                    topic,
                    timestamp: OffsetDateTime::now_utc(),
                },
                self.inner.max_history,
            );
            state.take_dispatch(topic)
        };

        counter!(METRIC_EVENTS_EMITTED, "topic" => topic.as_str()).increment(1);
        debug!(topic = %topic, subscribers = handlers.len(), "event emitted");

        let mut report = DispatchReport::new(topic);
        for (subscription_id, handler) in handlers {
            let dispatch = AssertUnwindSafe(async { handler(event.clone()).await });
            let error = match dispatch.catch_unwind().await {
                Ok(Ok(())) => {
                    report.delivered += 1;
                    continue;
                }
                Ok(Err(error)) => error,
                Err(panic) => HandlerError::Panicked(panic_message(panic.as_ref())),
            };

            counter!(METRIC_HANDLER_FAILURES, "topic" => topic.as_str()).increment(1);
            warn!(
                topic = %topic,
                subscription_id = %subscription_id,
                error = %error,
                "event handler failed"
            );
            report.failures.push(HandlerFailure {
                subscription_id,
                error,
            });
        }

        report
    }

    /// Drop subscriptions for one topic, or for every topic when `None`.
    /// History is kept.
    pub fn clear(&self, topic: Option<EventTopic>) {
        let mut state = mutex_lock(&self.inner.state, SOURCE, "clear");
        match topic {
            Some(topic) => {
                state.subscriptions.remove(&topic);
            }
            None => state.subscriptions.clear(),
        }
    }

    pub fn clear_history(&self) {
        mutex_lock(&self.inner.state, SOURCE, "clear_history")
            .history
            .clear();
    }

    pub fn listener_count(&self, topic: EventTopic) -> usize {
        mutex_lock(&self.inner.state, SOURCE, "listener_count")
            .subscriptions
            .get(&topic)
            .map_or(0, Vec::len)
    }

    pub fn get_stats(&self) -> BusStats {
        let state = mutex_lock(&self.inner.state, SOURCE, "get_stats");
        let per_topic: BTreeMap<EventTopic, usize> = state
            .subscriptions
            .iter()
            .map(|(topic, subscriptions)| (*topic, subscriptions.len()))
            .collect();
        BusStats {
            total_subscriptions: per_topic.values().sum(),
            per_topic,
            recent_events: state.history.iter().cloned().collect(),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn bus() -> EventBus {
        EventBus::new(EventBusConfig::default()).expect("valid bus config")
    }

    fn recorder(
        log: &Arc<StdMutex<Vec<&'static str>>>,
        name: &'static str,
    ) -> impl Fn(PortalEvent) -> HandlerFuture + Send + Sync + 'static {
        let log = Arc::clone(log);
        move |_event| {
            let log = Arc::clone(&log);
            async move {
                log.lock().expect("log lock").push(name);
                Ok(())
            }
            .boxed()
        }
    }

    #[tokio::test]
    async fn on_fires_every_time_and_once_fires_once_in_order() {
        let bus = bus();
        let log = Arc::new(StdMutex::new(Vec::new()));

        let _h1 = bus.on(EventTopic::SettingsUpdated, recorder(&log, "H1"));
        let _h2 = bus.once(EventTopic::SettingsUpdated, recorder(&log, "H2"));

        let first = bus.emit(PortalEvent::SettingsUpdated).await;
        let second = bus.emit(PortalEvent::SettingsUpdated).await;

        assert_eq!(first.delivered, 2);
        assert_eq!(second.delivered, 1);
        assert_eq!(*log.lock().expect("log lock"), vec!["H1", "H2", "H1"]);
        assert_eq!(bus.listener_count(EventTopic::SettingsUpdated), 1);
    }

    #[tokio::test]
    async fn failing_handler_does_not_block_siblings() {
        let bus = bus();
        let delivered = Arc::new(AtomicUsize::new(0));

        let failing = bus.on(EventTopic::LeadCaptured, |_event| async {
            Err(HandlerError::failed("smtp unavailable"))
        });
        let counter = Arc::clone(&delivered);
        let _ok = bus.on(EventTopic::LeadCaptured, move |_event| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        let report = bus
            .emit(PortalEvent::LeadCaptured {
                lead_id: Uuid::new_v4(),
            })
            .await;

        assert_eq!(delivered.load(Ordering::SeqCst), 1);
        assert_eq!(report.delivered, 1);
        assert_eq!(
            report.failures,
            vec![HandlerFailure {
                subscription_id: failing.id(),
                error: HandlerError::failed("smtp unavailable"),
            }]
        );
    }

    #[tokio::test]
    async fn panicking_handler_is_reported() {
        let bus = bus();
        let log = Arc::new(StdMutex::new(Vec::new()));

        let _panics = bus.on(EventTopic::OkrUpdated, |event| async move {
            assert!(event == PortalEvent::SettingsUpdated, "bad key result");
            Ok(())
        });
        let _after = bus.on(EventTopic::OkrUpdated, recorder(&log, "after"));

        let report = bus
            .emit(PortalEvent::OkrUpdated {
                okr_id: Uuid::new_v4(),
            })
            .await;

        assert_eq!(report.delivered, 1);
        assert_eq!(
            report.failures[0].error,
            HandlerError::Panicked("bad key result".to_string())
        );
        assert_eq!(*log.lock().expect("log lock"), vec!["after"]);
    }

    #[tokio::test]
    async fn unsubscribe_and_off_remove_subscriptions() {
        let bus = bus();
        let log = Arc::new(StdMutex::new(Vec::new()));

        let first = bus.on(EventTopic::SwotUpdated, recorder(&log, "first"));
        let second = bus.on(EventTopic::SwotUpdated, recorder(&log, "second"));

        assert!(first.unsubscribe());
        assert!(bus.off(EventTopic::SwotUpdated, second.id()));
        assert!(!bus.off(EventTopic::SwotUpdated, second.id()));
        assert!(!second.unsubscribe());

        let report = bus
            .emit(PortalEvent::SwotUpdated {
                analysis_id: Uuid::nil(),
            })
            .await;
        assert_eq!(report.delivered, 0);
        assert!(log.lock().expect("log lock").is_empty());
        assert_eq!(bus.get_stats().total_subscriptions, 0);
    }

    #[tokio::test]
    async fn fired_once_handle_reports_already_removed() {
        let bus = bus();
        let handle = bus.once(EventTopic::SettingsUpdated, |_event| async { Ok(()) });

        bus.emit(PortalEvent::SettingsUpdated).await;

        assert!(!handle.unsubscribe());
    }

    #[tokio::test]
    async fn once_handler_is_removed_even_when_it_fails() {
        let bus = bus();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let _handle = bus.once(EventTopic::SettingsUpdated, move |_event| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(HandlerError::failed("nope")) }
        });

        bus.emit(PortalEvent::SettingsUpdated).await;
        bus.emit(PortalEvent::SettingsUpdated).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn handler_may_reenter_the_bus() {
        let bus = bus();
        let inner_bus = bus.clone();
        let log = Arc::new(StdMutex::new(Vec::new()));
        let _follow_up = bus.on(EventTopic::SettingsUpdated, recorder(&log, "follow-up"));

        let _chain = bus.on(EventTopic::LeadCaptured, move |_event| {
            let bus = inner_bus.clone();
            async move {
                bus.emit(PortalEvent::SettingsUpdated).await;
                bus.on(EventTopic::SwotUpdated, |_event| async { Ok(()) })
                    .unsubscribe();
                Ok(())
            }
        });

        let report = bus
            .emit(PortalEvent::LeadCaptured {
                lead_id: Uuid::nil(),
            })
            .await;

        assert!(report.is_clean());
        assert_eq!(*log.lock().expect("log lock"), vec!["follow-up"]);
    }

    #[tokio::test]
    async fn history_is_bounded_and_oldest_first() {
        let bus = EventBus::new(EventBusConfig {
            max_history_size: 2,
        })
        .expect("valid bus config");

        bus.emit(PortalEvent::SettingsUpdated).await;
        bus.emit(PortalEvent::LeadCaptured {
            lead_id: Uuid::nil(),
        })
        .await;
        bus.emit(PortalEvent::OkrUpdated {
            okr_id: Uuid::nil(),
        })
        .await;

        let topics: Vec<EventTopic> = bus
            .get_stats()
            .recent_events
            .iter()
            .map(|record| record.topic)
            .collect();
        assert_eq!(topics, vec![EventTopic::LeadCaptured, EventTopic::OkrUpdated]);

        bus.clear_history();
        assert!(bus.get_stats().recent_events.is_empty());
    }

    #[tokio::test]
    async fn clear_by_topic_and_all() {
        let bus = bus();
        let _a = bus.on(EventTopic::SettingsUpdated, |_event| async { Ok(()) });
        let _b = bus.on(EventTopic::SettingsUpdated, |_event| async { Ok(()) });
        let _c = bus.on(EventTopic::LeadCaptured, |_event| async { Ok(()) });

        let stats = bus.get_stats();
        assert_eq!(stats.total_subscriptions, 3);
        assert_eq!(stats.per_topic.get(&EventTopic::SettingsUpdated), Some(&2));

        bus.clear(Some(EventTopic::SettingsUpdated));
        assert_eq!(bus.listener_count(EventTopic::SettingsUpdated), 0);
        assert_eq!(bus.listener_count(EventTopic::LeadCaptured), 1);

        bus.clear(None);
        assert_eq!(bus.get_stats().total_subscriptions, 0);
    }

    #[test]
    fn zero_history_is_rejected() {
        let result = EventBus::new(EventBusConfig {
            max_history_size: 0,
        });
        assert!(matches!(result, Err(ConfigurationError::ZeroHistory)));
    }

    #[test]
    fn unsubscribe_after_bus_dropped_is_a_no_op() {
        let bus = bus();
        let handle = bus.on(EventTopic::SettingsUpdated, |_event| async { Ok(()) });
        drop(bus);
        assert!(!handle.unsubscribe());
    }
}
