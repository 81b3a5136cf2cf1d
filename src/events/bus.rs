//! # Topic bus: per-subscriber buffered channels keyed by topic.
//!
//! [`EventBus`] hands every subscriber its own bounded [`tokio::sync::mpsc`]
//! channel and delivers each published message to every channel of a topic.
//!
//! ## Architecture
//! ```text
//! Publishers (many):                       Subscribers (many per topic):
//!   publish("t", msgs) ──┐    ┌─ "t" ─► [chan 1] ─► Subscription
//!                        ├──► │        [chan 2] ─► Subscription
//!   publish_async(..)  ──┘    └─ "u" ─► [chan 3] ─► Subscription
//!                         (RwLock<topic → Vec<slot>>)
//! ```
//!
//! ## Rules
//! - **Snapshot then send**: publishers copy a topic's senders under the read
//!   lock and send without holding it, so a slow subscriber never blocks
//!   `subscribe`/`unsubscribe` on other topics.
//! - **Backpressure**: a full channel makes `publish` wait for the reader.
//!   `publish_async` bounds that wait with a timeout and a cancellation token.
//! - **Order**: per subscriber, messages of one call arrive in call order;
//!   subscribers of a topic are served in subscription order.
//! - **Close once**: `close` drops every sender exactly once. Readers drain
//!   their buffers and then observe `None`. Closing twice is a no-op.
//! - **Unsubscribe detaches**: the slot (and its sender) is removed; the
//!   reader drains what was buffered and then observes `None`.
//! - **Empty topics vanish**: the last unsubscribe removes the topic entry.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::BusError;
use crate::events::subscription::Subscription;
use crate::events::topics::{TopicInfo, TopicsReport};
use crate::timers::{TimerPool, TimerRef};

struct Slot<T> {
    id: u64,
    tx: Option<mpsc::Sender<T>>,
}

struct Registry<T> {
    topics: HashMap<String, Vec<Slot<T>>>,
    closed: bool,
}

/// Topic-keyed bus of buffered per-subscriber channels.
///
/// `T` is cloned once per subscriber for every delivered message.
pub struct EventBus<T> {
    registry: RwLock<Registry<T>>,
    buffer: usize,
    next_id: AtomicU64,
    live: watch::Sender<usize>,
    timers: TimerRef,
}

impl<T> EventBus<T>
where
    T: Clone + Send + 'static,
{
    /// Creates a bus whose channels hold `buffer` messages (rounded up to the default floor).
    pub fn new(buffer: usize) -> Self {
        Self::from_config(&Config {
            bus_buffer: buffer,
            ..Config::default()
        })
    }

    /// Creates a bus sized from [`Config::bus_buffer_clamped`], with its own timer pool.
    pub fn from_config(cfg: &Config) -> Self {
        Self::with_timers(cfg, std::sync::Arc::new(TimerPool::from_config(cfg)))
    }

    /// Creates a bus drawing `publish_async` timers from `timers`.
    pub fn with_timers(cfg: &Config, timers: TimerRef) -> Self {
        let (live, _) = watch::channel(0);
        Self {
            registry: RwLock::new(Registry {
                topics: HashMap::new(),
                closed: false,
            }),
            buffer: cfg.bus_buffer_clamped(),
            next_id: AtomicU64::new(1),
            live,
            timers,
        }
    }

    /// Per-subscriber channel capacity.
    pub fn buffer(&self) -> usize {
        self.buffer
    }

    /// Registers a new channel under `topic`.
    ///
    /// Returns `None` if the bus is closed or the topic is empty.
    pub fn subscribe(&self, topic: &str) -> Option<Subscription<T>> {
        if topic.is_empty() {
            return None;
        }

        let (tx, rx) = mpsc::channel(self.buffer);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut reg = self.registry.write();
            if reg.closed {
                return None;
            }
            reg.topics
                .entry(topic.to_string())
                .or_default()
                .push(Slot { id, tx: Some(tx) });
            self.live.send_modify(|n| *n += 1);
        }

        tracing::debug!(topic, subscription = id, "subscribed");
        Some(Subscription::new(id, topic, rx))
    }

    /// Removes `sub` from `topic`.
    ///
    /// The topic entry disappears with its last subscription. The bus never
    /// closes the channel here, but removing the slot drops the bus's sender:
    /// `sub` still yields what was buffered and then reports `None`, the same
    /// end-of-stream a reader sees after [`EventBus::close`].
    pub fn unsubscribe(&self, topic: &str, sub: &Subscription<T>) -> Result<(), BusError> {
        if topic.is_empty() {
            return Err(BusError::TopicEmpty);
        }

        {
            let mut reg = self.registry.write();
            let slots = reg
                .topics
                .get_mut(topic)
                .ok_or(BusError::TopicOrChannelNotFound)?;
            let pos = slots
                .iter()
                .position(|s| s.id == sub.id)
                .ok_or(BusError::TopicOrChannelNotFound)?;
            slots.remove(pos);
            if slots.is_empty() {
                reg.topics.remove(topic);
            }
            self.live.send_modify(|n| *n = n.saturating_sub(1));
        }

        tracing::debug!(topic, subscription = sub.id, "unsubscribed");
        Ok(())
    }

    /// Delivers `msgs` to every subscriber of `topic`, waiting on full channels.
    ///
    /// Returns `false` when the bus is closed, `msgs` is empty, or the topic
    /// has no subscribers. Receivers that went away are skipped.
    pub async fn publish(&self, topic: &str, msgs: impl IntoIterator<Item = T>) -> bool {
        let msgs: Vec<T> = msgs.into_iter().collect();
        if msgs.is_empty() {
            return false;
        }
        let Ok(targets) = self.senders(topic) else {
            return false;
        };
        if targets.is_empty() {
            return false;
        }

        for tx in &targets {
            for msg in &msgs {
                if tx.send(msg.clone()).await.is_err() {
                    tracing::trace!(topic, "receiver gone, skipping");
                    break;
                }
            }
        }
        true
    }

    /// Delivers `msgs` like [`EventBus::publish`], bounded by `timeout` and `cancel`.
    ///
    /// One pooled timer covers the whole call. Delivery stops at the first of:
    /// cancellation ([`BusError::Canceled`]) or timeout ([`BusError::AsyncTimeout`]).
    /// An empty `msgs` or a topic without subscribers is `Ok(())`.
    pub async fn publish_async(
        &self,
        cancel: &CancellationToken,
        timeout: Duration,
        topic: &str,
        msgs: impl IntoIterator<Item = T>,
    ) -> Result<(), BusError> {
        if topic.is_empty() {
            return Err(BusError::TopicEmpty);
        }
        let msgs: Vec<T> = msgs.into_iter().collect();
        if msgs.is_empty() {
            return Ok(());
        }
        let targets = self.senders(topic)?;
        if targets.is_empty() {
            return Ok(());
        }

        let mut timer = self.timers.get(timeout);
        let mut outcome = Ok(());
        'targets: for tx in &targets {
            for msg in &msgs {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        outcome = Err(BusError::Canceled);
                        break 'targets;
                    }
                    _ = timer.as_mut() => {
                        outcome = Err(BusError::AsyncTimeout);
                        break 'targets;
                    }
                    sent = tx.send(msg.clone()) => {
                        if sent.is_err() {
                            tracing::trace!(topic, "receiver gone, skipping");
                            break;
                        }
                    }
                }
            }
        }
        self.timers.put(timer);

        if let Err(e) = &outcome {
            tracing::debug!(topic, reason = e.as_label(), "async publish interrupted");
        }
        outcome
    }

    /// Snapshot of every topic with its subscriber list's capacity and length.
    ///
    /// Topics are sorted by name.
    pub fn topic_snapshot(&self) -> Vec<TopicInfo> {
        let reg = self.registry.read();
        let mut out: Vec<TopicInfo> = reg
            .topics
            .iter()
            .map(|(topic, slots)| TopicInfo {
                topic: topic.clone(),
                cap: slots.capacity(),
                len: slots.len(),
            })
            .collect();
        out.sort_by(|a, b| a.topic.cmp(&b.topic));
        out
    }

    /// JSON report of [`EventBus::topic_snapshot`]: `{"Topics":[{"topic":..,"cap":..,"len":..}]}`.
    pub fn topics(&self) -> String {
        let report = TopicsReport {
            topics: self.topic_snapshot(),
        };
        serde_json::to_string(&report).unwrap_or_default()
    }

    /// Number of subscriptions on `topic`, or `None` if the topic is absent.
    pub fn subscriber_count(&self, topic: &str) -> Option<usize> {
        self.registry.read().topics.get(topic).map(Vec::len)
    }

    /// Total number of live subscriptions.
    pub fn live(&self) -> usize {
        *self.live.borrow()
    }

    /// `true` once [`EventBus::close`] has run.
    pub fn is_closed(&self) -> bool {
        self.registry.read().closed
    }

    /// Closes every channel once; later calls are no-ops.
    ///
    /// Subscriptions stay registered until their owners unsubscribe.
    pub fn close(&self) {
        let mut reg = self.registry.write();
        if reg.closed {
            return;
        }
        reg.closed = true;
        for slot in reg.topics.values_mut().flatten() {
            slot.tx = None;
        }
        drop(reg);
        tracing::debug!("bus closed");
    }

    /// Waits until every subscription has been removed.
    pub async fn wait_async(&self) {
        let mut rx = self.live.subscribe();
        // The sender lives in `self`, so this only ends when the count hits zero.
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    fn senders(&self, topic: &str) -> Result<Vec<mpsc::Sender<T>>, BusError> {
        let reg = self.registry.read();
        if reg.closed {
            return Err(BusError::BusClosed);
        }
        Ok(reg
            .topics
            .get(topic)
            .map(|slots| slots.iter().filter_map(|s| s.tx.clone()).collect())
            .unwrap_or_default())
    }
}

impl<T> Default for EventBus<T>
where
    T: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl<T> fmt::Debug for EventBus<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reg = self.registry.read();
        f.debug_struct("EventBus")
            .field("topics", &reg.topics.len())
            .field("buffer", &self.buffer)
            .field("closed", &reg.closed)
            .finish()
    }
}
