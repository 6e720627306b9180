//! Event fan-out fabric.
//!
//! The hub is the sole owner of the subscriber set. Each subscriber gets a
//! bounded buffer; delivery is best-effort. A subscriber that cannot accept
//! an event within the accept timeout is marked lagging, and one that stays
//! lagging past the lag limit is dropped with a final `error` event when
//! its buffer has room for it.

#![warn(missing_docs, clippy::pedantic)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use vigil_primitives::{AgentAddress, MonitorEvent};

/// What a subscriber wants to receive.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SubscriptionScope {
    /// Every event for every agent.
    All,
    /// Events for a single agent.
    Agent(AgentAddress),
}

impl SubscriptionScope {
    fn matches(self, address: AgentAddress) -> bool {
        match self {
            Self::All => true,
            Self::Agent(scoped) => scoped == address,
        }
    }
}

/// Configuration for the event hub.
#[derive(Debug, Clone, Copy)]
pub struct HubConfig {
    buffer: usize,
    accept_timeout: Duration,
    lag_limit: Duration,
}

impl HubConfig {
    /// Creates a configuration.
    #[must_use]
    pub const fn new(buffer: usize, accept_timeout: Duration, lag_limit: Duration) -> Self {
        Self {
            buffer,
            accept_timeout,
            lag_limit,
        }
    }

    /// Per-subscriber buffer capacity.
    #[must_use]
    pub const fn buffer(self) -> usize {
        self.buffer
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            buffer: 64,
            accept_timeout: Duration::from_secs(1),
            lag_limit: Duration::from_secs(10),
        }
    }
}

struct SubscriberEntry {
    id: Uuid,
    scope: SubscriptionScope,
    tx: mpsc::Sender<MonitorEvent>,
    lagging_since: Option<Instant>,
}

#[derive(Default)]
struct HubInner {
    subscribers: Vec<SubscriberEntry>,
    last_timestamp: HashMap<AgentAddress, u64>,
}

/// Receiving side of a hub subscription.
pub struct Subscription {
    id: Uuid,
    rx: mpsc::Receiver<MonitorEvent>,
}

impl Subscription {
    /// Returns the subscription's identifier.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Receives the next event. Returns `None` once the hub has dropped
    /// this subscriber.
    pub async fn recv(&mut self) -> Option<MonitorEvent> {
        self.rx.recv().await
    }

    /// Non-blocking receive, for draining in tests.
    pub fn try_recv(&mut self) -> Option<MonitorEvent> {
        self.rx.try_recv().ok()
    }
}

/// The pub/sub fabric.
pub struct EventHub {
    config: HubConfig,
    inner: Mutex<HubInner>,
    dropped: AtomicU64,
}

impl EventHub {
    /// Creates a hub with the supplied configuration.
    #[must_use]
    pub fn new(config: HubConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(HubInner::default()),
            dropped: AtomicU64::new(0),
        }
    }

    /// Registers a subscriber, returning its receiving end.
    pub async fn subscribe(&self, scope: SubscriptionScope) -> Subscription {
        self.subscribe_with_buffer(scope, self.config.buffer).await
    }

    /// Registers a subscriber with an explicit buffer capacity, used by
    /// broadcast sessions that carry their own backpressure budget.
    pub async fn subscribe_with_buffer(
        &self,
        scope: SubscriptionScope,
        buffer: usize,
    ) -> Subscription {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let id = Uuid::new_v4();
        let mut guard = self.inner.lock().await;
        guard.subscribers.push(SubscriberEntry {
            id,
            scope,
            tx,
            lagging_since: None,
        });
        debug!(subscriber = %id, ?scope, "subscriber registered");
        Subscription { id, rx }
    }

    /// Removes a subscriber. Removing an unknown id is a no-op.
    pub async fn unsubscribe(&self, id: Uuid) {
        let mut guard = self.inner.lock().await;
        guard.subscribers.retain(|entry| entry.id != id);
    }

    /// Publishes an event to every matching subscriber.
    ///
    /// The hub clamps the event timestamp so that per-agent timestamps are
    /// strictly increasing regardless of producer clocks.
    pub async fn publish(&self, mut event: MonitorEvent) {
        let address = event.agent_address();
        let mut guard = self.inner.lock().await;

        let last = guard.last_timestamp.get(&address).copied().unwrap_or(0);
        let timestamp = event.timestamp().max(last + 1);
        event.set_timestamp(timestamp);
        guard.last_timestamp.insert(address, timestamp);

        let accept_timeout = self.config.accept_timeout;
        let lag_limit = self.config.lag_limit;
        let mut evicted: Vec<Uuid> = Vec::new();

        for entry in &mut guard.subscribers {
            if !entry.scope.matches(address) {
                continue;
            }
            match entry.tx.try_send(event.clone()) {
                Ok(()) => {
                    entry.lagging_since = None;
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    evicted.push(entry.id);
                }
                Err(mpsc::error::TrySendError::Full(queued)) => {
                    match entry.tx.send_timeout(queued, accept_timeout).await {
                        Ok(()) => {
                            entry.lagging_since = None;
                        }
                        Err(mpsc::error::SendTimeoutError::Closed(_)) => {
                            evicted.push(entry.id);
                        }
                        Err(mpsc::error::SendTimeoutError::Timeout(_)) => {
                            let since = entry.lagging_since.get_or_insert_with(Instant::now);
                            if since.elapsed() >= lag_limit {
                                let farewell = MonitorEvent::Error {
                                    agent_address: address,
                                    message: "subscriber lagging; dropped".to_owned(),
                                    alert: None,
                                    timestamp,
                                };
                                // Best effort; the buffer is likely still full.
                                let _ = entry.tx.try_send(farewell);
                                evicted.push(entry.id);
                            }
                        }
                    }
                }
            }
        }

        if !evicted.is_empty() {
            self.dropped
                .fetch_add(evicted.len() as u64, Ordering::Relaxed);
            for id in &evicted {
                warn!(subscriber = %id, "dropping lagging subscriber");
            }
            guard.subscribers.retain(|entry| !evicted.contains(&entry.id));
        }
    }

    /// Number of currently registered subscribers.
    pub async fn subscriber_count(&self) -> usize {
        self.inner.lock().await.subscribers.len()
    }

    /// Total subscribers dropped for lagging or disconnecting.
    #[must_use]
    pub fn dropped_subscribers(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(HubConfig::default())
    }
}
