// Copyright (c) 2026 Meridian Labs
// SPDX-License-Identifier: AGPL-3.0

//! In-process named-topic publish/subscribe dispatcher.
//!
//! Built on a tokio broadcast channel carrying [`BusEvent`]; subscribers
//! receive a filtered view of the stream keyed by [`Topic`]. `emit` is
//! fire-and-forget: it returns before any subscriber has run, and callers
//! must not assume the side effects of an emitted event are visible
//! immediately afterwards.
//!
//! This is a soft real-time signaling mechanism, not a durable queue: no
//! delivery guarantee, no replay. Durability is the job of the task-log
//! store.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::domain::events::{AgentError, BusEvent, Topic};

/// Event bus for publishing and subscribing to orchestration events.
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<BusEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given channel capacity. Capacity
    /// determines how many events can be buffered before slow subscribers
    /// start lagging.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Create an event bus with default capacity (1000).
    pub fn with_default_capacity() -> Self {
        Self::new(1000)
    }

    /// Publish an event to every subscriber of its topic. Returns
    /// immediately; subscriber handlers run on their own tasks.
    pub fn emit(&self, event: BusEvent) {
        debug!(topic = %event.topic(), "emitting event");
        let receiver_count = self.sender.send(event).unwrap_or(0);
        if receiver_count == 0 {
            debug!("no subscribers listening to event");
        }
    }

    /// Subscribe to a single topic.
    pub fn subscribe(&self, topic: Topic) -> TopicReceiver {
        self.subscribe_any(vec![topic])
    }

    /// Subscribe to a set of topics through one receiver.
    pub fn subscribe_any(&self, topics: Vec<Topic>) -> TopicReceiver {
        TopicReceiver {
            receiver: self.sender.subscribe(),
            topics,
        }
    }

    /// Register a handler for a topic. The handler runs on its own task;
    /// a handler error is caught, logged, and republished as an
    /// `agent-error` event so that one subscriber's failure never reaches
    /// the bus or its peers. Dropping the returned [`Subscription`] (or
    /// calling [`Subscription::unregister`]) stops delivery.
    pub fn register<F, Fut>(&self, topic: Topic, handler: F) -> Subscription
    where
        F: Fn(BusEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let mut receiver = self.subscribe(topic.clone());
        let bus = self.clone();
        let handle = tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => {
                        if let Err(err) = handler(event).await {
                            warn!(topic = %topic, error = %err, "subscriber handler failed");
                            // An agent-error handler that fails must not
                            // feed itself.
                            if topic != Topic::AgentError {
                                bus.emit(BusEvent::AgentError(AgentError::new(
                                    topic.wire_name(),
                                    err.to_string(),
                                )));
                            }
                        }
                    }
                    Err(EventBusError::Lagged(n)) => {
                        warn!(topic = %topic, lagged = n, "subscriber lagged; events were dropped");
                    }
                    Err(_) => break,
                }
            }
        });
        Subscription { handle }
    }

    /// Number of active receivers across all topics.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

/// Handle for a registered handler; aborts the handler loop on drop.
pub struct Subscription {
    handle: JoinHandle<()>,
}

impl Subscription {
    pub fn unregister(self) {
        self.handle.abort();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Receiver yielding only events whose topic is in its subscribed set.
pub struct TopicReceiver {
    receiver: broadcast::Receiver<BusEvent>,
    topics: Vec<Topic>,
}

impl TopicReceiver {
    /// Receive the next matching event (blocks until one is available).
    pub async fn recv(&mut self) -> Result<BusEvent, EventBusError> {
        loop {
            let event = self.receiver.recv().await.map_err(|e| match e {
                broadcast::error::RecvError::Closed => EventBusError::Closed,
                broadcast::error::RecvError::Lagged(n) => EventBusError::Lagged(n),
            })?;
            if self.matches(&event) {
                return Ok(event);
            }
        }
    }

    /// Try to receive a matching event without blocking.
    pub fn try_recv(&mut self) -> Result<BusEvent, EventBusError> {
        loop {
            let event = self.receiver.try_recv().map_err(|e| match e {
                broadcast::error::TryRecvError::Empty => EventBusError::Empty,
                broadcast::error::TryRecvError::Closed => EventBusError::Closed,
                broadcast::error::TryRecvError::Lagged(n) => EventBusError::Lagged(n),
            })?;
            if self.matches(&event) {
                return Ok(event);
            }
        }
    }

    fn matches(&self, event: &BusEvent) -> bool {
        let topic = event.topic();
        self.topics.iter().any(|t| *t == topic)
    }
}

/// Errors that can occur when receiving events.
#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("event bus is closed")]
    Closed,

    #[error("no events available")]
    Empty,

    #[error("receiver lagged by {0} events (events were dropped)")]
    Lagged(u64),
}
