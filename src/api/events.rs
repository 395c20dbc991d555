//! Session events and the subscriber broadcaster
//!
//! Every observer connected over SSE is a subscriber with its own sink. The
//! broadcaster fans events out to a snapshot of the registry, drops
//! subscribers whose sink fails, and runs a periodic liveness sweep for as
//! long as at least one subscriber is registered.

use crate::config::BroadcasterConfig;
use crate::error::{RelayError, Result};
use crate::session::RunSnapshot;
use crate::types::{Message, RunStatus};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Subscriber identifier
pub type SubscriberId = Uuid;

/// Snapshot delivered to a subscriber before anything else
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitPayload {
    pub messages: Vec<Message>,
    #[serde(flatten)]
    pub state: RunSnapshot,
}

/// Payload of `status_change`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusPayload {
    pub status: RunStatus,
    pub pending_question_tool_use_id: Option<String>,
    pub pending_plan_tool_use_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeartbeatPayload {
    pub timestamp: DateTime<Utc>,
}

/// Event delivered to observers, serialized as `{"event": name, "data": payload}`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Full ledger and run state, sent once on connect
    Init(InitPayload),
    /// A ledger append
    MessageUpdate(Message),
    /// Run status or pending interaction changed
    StatusChange(StatusPayload),
    /// Periodic liveness check
    Heartbeat(HeartbeatPayload),
}

impl SessionEvent {
    pub fn heartbeat() -> Self {
        SessionEvent::Heartbeat(HeartbeatPayload {
            timestamp: Utc::now(),
        })
    }

    /// Event name used on the SSE `event:` line
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::Init(_) => "init",
            SessionEvent::MessageUpdate(_) => "message_update",
            SessionEvent::StatusChange(_) => "status_change",
            SessionEvent::Heartbeat(_) => "heartbeat",
        }
    }

    /// JSON of the payload alone, for the SSE `data:` line
    pub fn data_json(&self) -> Result<String> {
        let data = match self {
            SessionEvent::Init(payload) => serde_json::to_string(payload)?,
            SessionEvent::MessageUpdate(message) => serde_json::to_string(message)?,
            SessionEvent::StatusChange(payload) => serde_json::to_string(payload)?,
            SessionEvent::Heartbeat(payload) => serde_json::to_string(payload)?,
        };
        Ok(data)
    }
}

/// Send/close capability of one subscriber
#[cfg_attr(test, mockall::automock)]
pub trait SubscriberSink: Send + Sync {
    /// Deliver an event without blocking
    fn send(&self, event: &SessionEvent) -> Result<()>;

    /// Whether the transport behind this sink has gone away
    fn is_closed(&self) -> bool;
}

/// Sink feeding a bounded channel; the receiving half backs an SSE response
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<SessionEvent>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl SubscriberSink for ChannelSink {
    fn send(&self, event: &SessionEvent) -> Result<()> {
        self.tx.try_send(event.clone()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                RelayError::SubscriberGone("event buffer full".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => {
                RelayError::SubscriberGone("receiver dropped".to_string())
            }
        })
    }

    fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

struct Subscriber {
    sink: Arc<dyn SubscriberSink>,
    last_activity: Instant,
}

#[derive(Default)]
struct Registry {
    subscribers: HashMap<SubscriberId, Subscriber>,
    sweeper: Option<JoinHandle<()>>,
}

struct BroadcasterInner {
    registry: RwLock<Registry>,
    sweep_interval: Duration,
    stale_timeout: Duration,
}

/// Fan-out of session events to live subscribers
#[derive(Clone)]
pub struct Broadcaster {
    inner: Arc<BroadcasterInner>,
}

impl Broadcaster {
    pub fn new(config: &BroadcasterConfig) -> Self {
        Self::with_timing(
            Duration::from_secs(config.sweep_interval_secs),
            Duration::from_secs(config.stale_timeout_secs),
        )
    }

    /// Broadcaster with explicit sweep timing
    pub fn with_timing(sweep_interval: Duration, stale_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(BroadcasterInner {
                registry: RwLock::new(Registry::default()),
                sweep_interval,
                stale_timeout,
            }),
        }
    }

    /// Register a subscriber
    pub async fn subscribe(&self, sink: Arc<dyn SubscriberSink>) -> SubscriberId {
        let mut registry = self.inner.registry.write().await;
        self.register(&mut registry, sink)
    }

    /// Register a subscriber after delivering `init` to it
    ///
    /// The registry stays write-locked from the `init` send until the
    /// subscriber is inserted, so no broadcast can overtake the snapshot.
    pub async fn subscribe_with_init(
        &self,
        sink: Arc<dyn SubscriberSink>,
        init: SessionEvent,
    ) -> Result<SubscriberId> {
        let mut registry = self.inner.registry.write().await;
        sink.send(&init)?;
        Ok(self.register(&mut registry, sink))
    }

    fn register(&self, registry: &mut Registry, sink: Arc<dyn SubscriberSink>) -> SubscriberId {
        let id = Uuid::new_v4();
        registry.subscribers.insert(
            id,
            Subscriber {
                sink,
                last_activity: Instant::now(),
            },
        );

        if registry.sweeper.is_none() {
            registry.sweeper = Some(spawn_sweeper(
                Arc::downgrade(&self.inner),
                self.inner.sweep_interval,
            ));
            debug!("Liveness sweep started");
        }

        info!(
            "Subscriber {} connected ({} total)",
            id,
            registry.subscribers.len()
        );
        id
    }

    /// Remove a subscriber; returns whether it was registered
    pub async fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut registry = self.inner.registry.write().await;
        let removed = registry.subscribers.remove(&id).is_some();
        if removed {
            info!(
                "Subscriber {} removed ({} remaining)",
                id,
                registry.subscribers.len()
            );
        }

        if registry.subscribers.is_empty() {
            if let Some(sweeper) = registry.sweeper.take() {
                sweeper.abort();
                debug!("Liveness sweep stopped");
            }
        }
        removed
    }

    /// Deliver `event` to every current subscriber
    ///
    /// Returns the number of successful deliveries. A failing subscriber is
    /// removed without affecting delivery to the others.
    pub async fn broadcast(&self, event: SessionEvent) -> usize {
        let snapshot: Vec<(SubscriberId, Arc<dyn SubscriberSink>)> = {
            let registry = self.inner.registry.read().await;
            registry
                .subscribers
                .iter()
                .map(|(id, subscriber)| (*id, Arc::clone(&subscriber.sink)))
                .collect()
        };

        let mut delivered = Vec::with_capacity(snapshot.len());
        let mut failed = Vec::new();
        for (id, sink) in snapshot {
            match sink.send(&event) {
                Ok(()) => delivered.push(id),
                Err(e) => {
                    warn!("Dropping subscriber {} after failed {}: {}", id, event.name(), e);
                    failed.push(id);
                }
            }
        }

        if !delivered.is_empty() {
            let now = Instant::now();
            let mut registry = self.inner.registry.write().await;
            for id in &delivered {
                if let Some(subscriber) = registry.subscribers.get_mut(id) {
                    subscriber.last_activity = now;
                }
            }
        }

        for id in failed {
            self.unsubscribe(id).await;
        }

        delivered.len()
    }

    /// Evict closed and stale subscribers, then heartbeat the rest
    ///
    /// Returns the number of evicted subscribers.
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<SubscriberId> = {
            let registry = self.inner.registry.read().await;
            registry
                .subscribers
                .iter()
                .filter(|(_, subscriber)| {
                    subscriber.sink.is_closed()
                        || now.duration_since(subscriber.last_activity) > self.inner.stale_timeout
                })
                .map(|(id, _)| *id)
                .collect()
        };

        for id in &expired {
            debug!("Evicting inactive subscriber {}", id);
            self.unsubscribe(*id).await;
        }

        if self.subscriber_count().await > 0 {
            self.broadcast(SessionEvent::heartbeat()).await;
        }

        expired.len()
    }

    /// Get subscriber count
    pub async fn subscriber_count(&self) -> usize {
        self.inner.registry.read().await.subscribers.len()
    }

    /// Whether the liveness sweep task is scheduled
    pub async fn is_sweeping(&self) -> bool {
        self.inner.registry.read().await.sweeper.is_some()
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new(&BroadcasterConfig::default())
    }
}

fn spawn_sweeper(inner: Weak<BroadcasterInner>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // the first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let Some(inner) = inner.upgrade() else {
                break;
            };
            let evicted = Broadcaster { inner }.sweep().await;
            if evicted > 0 {
                info!("Liveness sweep evicted {} subscriber(s)", evicted);
            }
        }
    })
}
