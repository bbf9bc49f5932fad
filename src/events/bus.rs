// src/events/bus.rs

//! Publish/subscribe dispatcher with typed, wildcard and one-shot
//! subscriptions plus a bounded replay history.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde_json::Value;
use tracing::{debug, error, trace, warn};

use super::sink::EventSink;
use super::{EmitOptions, Event, EventKind};

/// Default number of events retained for replay.
pub const DEFAULT_HISTORY_CAPACITY: usize = 1000;

/// Default `limit` for [`EventBus::recent_history`].
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// Source stamped on events whose emitter did not name one.
pub const DEFAULT_EVENT_SOURCE: &str = "agentflow";

pub type HandlerFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'static>>;

/// Shared, type-erased async event handler.
///
/// `off` / `off_any` match handlers by `Arc` identity, so keep a clone of the
/// `Handler` you registered if you intend to remove it that way.
pub type Handler = Arc<dyn Fn(Arc<Event>) -> HandlerFuture + Send + Sync>;

/// Wrap an async closure as a [`Handler`].
pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |event: Arc<Event>| Box::pin(f(event)) as HandlerFuture)
}

fn same_handler(a: &Handler, b: &Handler) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

#[derive(Clone)]
struct Subscription {
    id: SubscriptionId,
    handler: Handler,
    once: bool,
}

#[derive(Default)]
struct BusState {
    typed: HashMap<EventKind, Vec<Subscription>>,
    wildcard: Vec<Subscription>,
    history: VecDeque<Arc<Event>>,
}

/// Bus-wide settings.
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    pub history_capacity: usize,
    pub default_source: String,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            default_source: DEFAULT_EVENT_SOURCE.to_string(),
        }
    }
}

struct BusInner {
    config: EventBusConfig,
    state: Mutex<BusState>,
    sink: Option<Arc<dyn EventSink>>,
    next_id: AtomicU64,
}

impl BusInner {
    /// Subscription maps and history are only touched under this lock, and
    /// the lock is never held across an `.await`.
    fn state(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remove(&self, target: &Target, id: SubscriptionId) -> bool {
        let mut state = self.state();
        let list = match target {
            Target::Kind(kind) => match state.typed.get_mut(kind) {
                Some(list) => list,
                None => return false,
            },
            Target::Wildcard => &mut state.wildcard,
        };
        let before = list.len();
        list.retain(|s| s.id != id);
        let removed = list.len() != before;

        if let Target::Kind(kind) = target
            && state.typed.get(kind).is_some_and(Vec::is_empty)
        {
            state.typed.remove(kind);
        }
        removed
    }
}

#[derive(Debug, Clone)]
enum Target {
    Kind(EventKind),
    Wildcard,
}

/// Returned by every subscribe call; removes that one subscription.
///
/// Dropping it does *not* unsubscribe.
#[derive(Debug)]
pub struct Unsubscribe {
    bus: Weak<BusInner>,
    target: Target,
    id: SubscriptionId,
}

impl Unsubscribe {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Remove the subscription. Returns `false` if it was already gone
    /// (removed by `off`, consumed as a `once`, or the bus was dropped).
    pub fn unsubscribe(self) -> bool {
        match self.bus.upgrade() {
            Some(inner) => inner.remove(&self.target, self.id),
            None => false,
        }
    }
}

impl fmt::Debug for BusInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusInner")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Explicitly constructed event bus. Clones share subscriptions and history.
#[derive(Debug, Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EventBusConfig::default())
    }
}

impl EventBus {
    pub fn new(config: EventBusConfig) -> Self {
        Self::build(config, None)
    }

    /// Bus that also forwards every event to `sink`.
    pub fn with_sink(config: EventBusConfig, sink: Arc<dyn EventSink>) -> Self {
        Self::build(config, Some(sink))
    }

    fn build(mut config: EventBusConfig, sink: Option<Arc<dyn EventSink>>) -> Self {
        config.history_capacity = config.history_capacity.max(1);
        Self {
            inner: Arc::new(BusInner {
                config,
                state: Mutex::new(BusState::default()),
                sink,
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn config(&self) -> &EventBusConfig {
        &self.inner.config
    }

    fn subscribe(&self, target: Target, handler: Handler, once: bool) -> Unsubscribe {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let sub = Subscription { id, handler, once };
        {
            let mut state = self.inner.state();
            match &target {
                Target::Kind(kind) => state.typed.entry(kind.clone()).or_default().push(sub),
                Target::Wildcard => state.wildcard.push(sub),
            }
        }
        trace!(subscription = %id, ?target, once, "subscribed");

        Unsubscribe {
            bus: Arc::downgrade(&self.inner),
            target,
            id,
        }
    }

    /// Subscribe to one event type.
    pub fn on(&self, kind: impl Into<EventKind>, handler: Handler) -> Unsubscribe {
        self.subscribe(Target::Kind(kind.into()), handler, false)
    }

    /// Subscribe to the next event of one type only.
    pub fn once(&self, kind: impl Into<EventKind>, handler: Handler) -> Unsubscribe {
        self.subscribe(Target::Kind(kind.into()), handler, true)
    }

    /// Subscribe to every event type.
    pub fn on_any(&self, handler: Handler) -> Unsubscribe {
        self.subscribe(Target::Wildcard, handler, false)
    }

    /// Remove every subscription of `kind` registered with this exact handler.
    pub fn off(&self, kind: impl Into<EventKind>, handler: &Handler) -> bool {
        let kind = kind.into();
        let mut state = self.inner.state();
        let Some(list) = state.typed.get_mut(&kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|s| !same_handler(&s.handler, handler));
        let removed = list.len() != before;
        if list.is_empty() {
            state.typed.remove(&kind);
        }
        removed
    }

    /// Remove every wildcard subscription registered with this exact handler.
    pub fn off_any(&self, handler: &Handler) -> bool {
        let mut state = self.inner.state();
        let before = state.wildcard.len();
        state.wildcard.retain(|s| !same_handler(&s.handler, handler));
        state.wildcard.len() != before
    }

    /// Record an event and deliver it to every matching handler.
    ///
    /// Handlers run concurrently, each in its own tokio task. The returned
    /// future resolves once all of them have settled. A handler that returns
    /// an error or panics is logged and never affects its siblings or the
    /// caller.
    pub async fn emit(
        &self,
        kind: impl Into<EventKind>,
        payload: Value,
        options: EmitOptions,
    ) -> Arc<Event> {
        let source = options
            .source
            .unwrap_or_else(|| self.inner.config.default_source.clone());
        let event = Arc::new(Event::new(
            kind.into(),
            payload,
            source,
            options.correlation_id,
        ));

        let claimed = self.record_and_claim(&event);

        if let Some(sink) = &self.inner.sink
            && let Err(err) = sink.forward(Arc::clone(&event))
        {
            warn!(event_id = %event.id, kind = %event.kind, error = %err, "event sink rejected event");
        }

        debug!(
            event_id = %event.id,
            kind = %event.kind,
            handlers = claimed.len(),
            "emitting event"
        );

        let mut running = Vec::with_capacity(claimed.len());
        for sub in claimed {
            let ev = Arc::clone(&event);
            let h = Arc::clone(&sub.handler);
            running.push((sub.id, tokio::spawn(async move { h(ev).await })));
        }

        for (id, join) in running {
            match join.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    warn!(
                        event_id = %event.id,
                        kind = %event.kind,
                        subscription = %id,
                        error = %err,
                        "event handler failed"
                    );
                }
                Err(err) if err.is_panic() => {
                    error!(
                        event_id = %event.id,
                        kind = %event.kind,
                        subscription = %id,
                        "event handler panicked"
                    );
                }
                Err(err) => {
                    warn!(
                        event_id = %event.id,
                        subscription = %id,
                        error = %err,
                        "event handler task was cancelled"
                    );
                }
            }
        }

        event
    }

    /// Append to history and collect the subscriptions to invoke.
    ///
    /// One-shot subscriptions are detached here, under the same lock that
    /// selects them, so two concurrent emissions can never both deliver to
    /// the same `once` handler.
    fn record_and_claim(&self, event: &Arc<Event>) -> Vec<Subscription> {
        let mut state = self.inner.state();

        state.history.push_back(Arc::clone(event));
        while state.history.len() > self.inner.config.history_capacity {
            state.history.pop_front();
        }

        let mut claimed = Vec::new();
        let mut drained_kind = false;
        if let Some(list) = state.typed.get_mut(&event.kind) {
            claimed.extend(list.iter().cloned());
            list.retain(|s| !s.once);
            drained_kind = list.is_empty();
        }
        if drained_kind {
            state.typed.remove(&event.kind);
        }

        claimed.extend(state.wildcard.iter().cloned());
        state.wildcard.retain(|s| !s.once);

        claimed
    }

    /// The most recent `limit` events, oldest first.
    pub fn history(&self, limit: usize) -> Vec<Arc<Event>> {
        let state = self.inner.state();
        let skip = state.history.len().saturating_sub(limit);
        state.history.iter().skip(skip).cloned().collect()
    }

    /// The most recent [`DEFAULT_HISTORY_LIMIT`] events.
    pub fn recent_history(&self) -> Vec<Arc<Event>> {
        self.history(DEFAULT_HISTORY_LIMIT)
    }

    pub fn history_len(&self) -> usize {
        self.inner.state().history.len()
    }

    pub fn clear_history(&self) {
        self.inner.state().history.clear();
    }

    /// Typed subscriptions registered for `kind`.
    pub fn subscription_count(&self, kind: impl Into<EventKind>) -> usize {
        let kind = kind.into();
        self.inner.state().typed.get(&kind).map_or(0, Vec::len)
    }

    pub fn wildcard_count(&self) -> usize {
        self.inner.state().wildcard.len()
    }

    /// Typed plus wildcard subscriptions across all types.
    pub fn total_subscription_count(&self) -> usize {
        let state = self.inner.state();
        state.typed.values().map(Vec::len).sum::<usize>() + state.wildcard.len()
    }

    /// Handlers that an emission of `kind` would reach right now.
    pub fn listener_count(&self, kind: impl Into<EventKind>) -> usize {
        let kind = kind.into();
        let state = self.inner.state();
        state.typed.get(&kind).map_or(0, Vec::len) + state.wildcard.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use serde_json::json;

    fn counter(count: &Arc<AtomicUsize>) -> Handler {
        let count = Arc::clone(count);
        handler(move |_event| {
            let count = Arc::clone(&count);
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
    }

    #[tokio::test]
    async fn typed_and_wildcard_handlers_all_run() {
        let bus = EventBus::default();
        let typed = Arc::new(AtomicUsize::new(0));
        let any = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let _ = bus.on("build.done", counter(&typed));
        }
        for _ in 0..2 {
            let _ = bus.on_any(counter(&any));
        }
        let _ = bus.on("other", counter(&typed));

        bus.emit("build.done", json!({}), EmitOptions::default()).await;

        assert_eq!(typed.load(Ordering::SeqCst), 3);
        assert_eq!(any.load(Ordering::SeqCst), 2);
        assert_eq!(bus.listener_count("build.done"), 5);
        assert_eq!(bus.total_subscription_count(), 6);
    }

    #[tokio::test]
    async fn failing_and_panicking_handlers_are_isolated() {
        let bus = EventBus::default();
        let ok = Arc::new(AtomicUsize::new(0));

        let _ = bus.on("x", handler(|_| async { anyhow::bail!("boom") }));
        let _ = bus.on(
            "x",
            handler(|_| async {
                if true {
                    panic!("handler exploded");
                }
                Ok(())
            }),
        );
        let _ = bus.on("x", counter(&ok));
        let _ = bus.on_any(counter(&ok));

        let event = bus.emit("x", json!({ "n": 1 }), EmitOptions::default()).await;

        assert_eq!(ok.load(Ordering::SeqCst), 2);
        assert_eq!(event.payload["n"], 1);
    }

    #[tokio::test]
    async fn once_fires_exactly_once() {
        let bus = EventBus::default();
        let count = Arc::new(AtomicUsize::new(0));
        let _ = bus.once(EventKind::TaskCompleted, counter(&count));

        bus.emit(EventKind::TaskCompleted, json!({}), EmitOptions::default())
            .await;
        bus.emit(EventKind::TaskCompleted, json!({}), EmitOptions::default())
            .await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(bus.subscription_count(EventKind::TaskCompleted), 0);
    }

    #[tokio::test]
    async fn unsubscribe_and_off_remove_handlers() {
        let bus = EventBus::default();
        let count = Arc::new(AtomicUsize::new(0));

        let shared = counter(&count);
        let _ = bus.on("a", Arc::clone(&shared));
        let _ = bus.on("a", Arc::clone(&shared));
        let other = bus.on("a", counter(&count));
        let _ = bus.on_any(Arc::clone(&shared));

        assert!(bus.off("a", &shared));
        assert_eq!(bus.subscription_count("a"), 1);
        assert!(bus.off_any(&shared));
        assert_eq!(bus.wildcard_count(), 0);

        assert!(other.unsubscribe());
        assert_eq!(bus.total_subscription_count(), 0);

        bus.emit("a", json!({}), EmitOptions::default()).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unsubscribe_after_once_consumed_reports_false() {
        let bus = EventBus::default();
        let handle = bus.once("a", handler(|_| async { Ok(()) }));
        bus.emit("a", json!({}), EmitOptions::default()).await;
        assert!(!handle.unsubscribe());
    }

    #[tokio::test]
    async fn history_is_bounded_and_ordered() {
        let bus = EventBus::new(EventBusConfig {
            history_capacity: 3,
            ..EventBusConfig::default()
        });

        for i in 0..5 {
            bus.emit("tick", json!({ "i": i }), EmitOptions::default())
                .await;
        }

        assert_eq!(bus.history_len(), 3);
        let seen: Vec<i64> = bus
            .history(10)
            .iter()
            .map(|e| e.payload["i"].as_i64().unwrap())
            .collect();
        assert_eq!(seen, vec![2, 3, 4]);

        let last_two: Vec<i64> = bus
            .history(2)
            .iter()
            .map(|e| e.payload["i"].as_i64().unwrap())
            .collect();
        assert_eq!(last_two, vec![3, 4]);

        bus.clear_history();
        assert!(bus.recent_history().is_empty());
    }

    #[tokio::test]
    async fn recent_history_returns_the_last_hundred() {
        let bus = EventBus::new(EventBusConfig {
            history_capacity: 150,
            ..EventBusConfig::default()
        });

        for i in 0..120 {
            bus.emit("tick", json!({ "i": i }), EmitOptions::default())
                .await;
        }

        assert_eq!(bus.history_len(), 120);
        let seen: Vec<i64> = bus
            .recent_history()
            .iter()
            .map(|e| e.payload["i"].as_i64().unwrap())
            .collect();
        assert_eq!(seen.len(), DEFAULT_HISTORY_LIMIT);
        assert_eq!(seen, (20..120).collect::<Vec<i64>>());
    }

    #[tokio::test]
    async fn custom_builtin_name_reaches_typed_subscribers() {
        let bus = EventBus::default();
        let completed = Arc::new(AtomicUsize::new(0));
        let _ = bus.on(EventKind::TaskCompleted, counter(&completed));

        bus.emit(
            EventKind::custom("task.completed"),
            json!({ "taskId": "a" }),
            EmitOptions::default(),
        )
        .await;

        assert_eq!(completed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn source_and_correlation_are_stamped() {
        let bus = EventBus::default();
        let default = bus.emit("a", json!(null), EmitOptions::default()).await;
        assert_eq!(default.source, DEFAULT_EVENT_SOURCE);
        assert!(default.correlation_id.is_none());

        let custom = bus
            .emit(
                "a",
                json!(null),
                EmitOptions::default()
                    .with_source("planner")
                    .with_correlation_id("run-7"),
            )
            .await;
        assert_eq!(custom.source, "planner");
        assert_eq!(custom.correlation_id.as_deref(), Some("run-7"));
        assert_ne!(default.id, custom.id);
    }

    #[tokio::test]
    async fn handlers_may_emit_reentrantly() {
        let bus = EventBus::default();
        let nested = Arc::new(AtomicUsize::new(0));

        let inner_bus = bus.clone();
        let _ = bus.on(
            "outer",
            handler(move |event| {
                let bus = inner_bus.clone();
                async move {
                    let options = EmitOptions::default()
                        .with_correlation_id(event.id.to_string());
                    bus.emit("inner", json!({}), options).await;
                    Ok(())
                }
            }),
        );
        let _ = bus.on("inner", counter(&nested));

        bus.emit("outer", json!({}), EmitOptions::default()).await;

        assert_eq!(nested.load(Ordering::SeqCst), 1);
        let kinds: Vec<String> = bus
            .history(10)
            .iter()
            .map(|e| e.kind.to_string())
            .collect();
        assert_eq!(kinds, vec!["outer", "inner"]);
    }

    #[tokio::test]
    async fn sink_receives_every_event() {
        let (sink, mut rx) = super::super::ChannelSink::new(8);
        let bus = EventBus::with_sink(EventBusConfig::default(), Arc::new(sink));

        bus.emit("a", json!({}), EmitOptions::default()).await;
        bus.emit("b", json!({}), EmitOptions::default()).await;

        assert_eq!(rx.recv().await.unwrap().kind.as_str(), "a");
        assert_eq!(rx.recv().await.unwrap().kind.as_str(), "b");
    }
}
