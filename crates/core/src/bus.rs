// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Keyed event bus adapter.
//!
//! Two implementations behind one tagged enum: an in-process bus (default,
//! used by tests and single-node deployments) and a NATS-backed bus where
//! queue groups play the consumer-group role. Delivery is at-least-once and
//! per-key FIFO; consumers must be idempotent.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use crate::error::{Error, ErrorCode, Result};
use crate::time::epoch_ms;

/// Driver telemetry fan-in, keyed by tenant.
pub const TOPIC_LOCATION_UPDATES: &str = "location-updates";
/// Ride lifecycle events, keyed by tenant.
pub const TOPIC_RIDE_EVENTS: &str = "ride-events";
/// Per-user push notifications, keyed by user id.
pub const TOPIC_NOTIFICATIONS: &str = "notifications";

/// One keyed record on a topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    pub topic: String,
    pub key: String,
    pub payload: serde_json::Value,
    pub timestamp: u64,
}

/// A consumer-group subscription; each record reaches exactly one member of
/// the group per delivery attempt.
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<Record>,
}

impl Subscription {
    /// Next record, or `None` once the bus side is gone.
    pub async fn recv(&mut self) -> Option<Record> {
        self.rx.recv().await
    }
}

/// Bus selection, decided once at startup from configuration.
pub enum EventBus {
    Memory(MemoryBus),
    Nats(NatsBus),
}

impl EventBus {
    pub fn memory() -> Self {
        Self::Memory(MemoryBus::new())
    }

    pub async fn nats(url: &str, prefix: &str) -> Result<Self> {
        Ok(Self::Nats(NatsBus::connect(url, prefix).await?))
    }

    /// Publish one keyed record. Callers on side-effect paths log and
    /// swallow the error; the authoritative store write has already
    /// committed.
    pub async fn publish(&self, topic: &str, key: &str, payload: serde_json::Value) -> Result<()> {
        let record = Record {
            topic: topic.to_owned(),
            key: key.to_owned(),
            payload,
            timestamp: epoch_ms(),
        };
        match self {
            Self::Memory(bus) => bus.publish(record).await,
            Self::Nats(bus) => bus.publish(record).await,
        }
    }

    /// Join `group` on `topic`.
    pub async fn subscribe(&self, topic: &str, group: &str) -> Result<Subscription> {
        match self {
            Self::Memory(bus) => Ok(bus.subscribe(topic, group).await),
            Self::Nats(bus) => bus.subscribe(topic, group).await,
        }
    }
}

// -- In-process bus -----------------------------------------------------------

struct GroupState {
    members: Vec<mpsc::UnboundedSender<Record>>,
    next: usize,
}

#[derive(Default)]
struct TopicState {
    groups: HashMap<String, GroupState>,
}

/// Single-process bus: per-topic publish order is preserved, which implies
/// per-key FIFO. Records published before any group exists are dropped;
/// consumers are wired up before traffic at startup.
pub struct MemoryBus {
    topics: RwLock<HashMap<String, TopicState>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self { topics: RwLock::new(HashMap::new()) }
    }

    async fn publish(&self, record: Record) -> Result<()> {
        let mut topics = self.topics.write().await;
        let Some(topic) = topics.get_mut(&record.topic) else {
            return Ok(());
        };
        for group in topic.groups.values_mut() {
            // Round-robin across live members, pruning closed ones.
            group.members.retain(|tx| !tx.is_closed());
            if group.members.is_empty() {
                continue;
            }
            let n = group.members.len();
            let start = group.next % n;
            group.next = group.next.wrapping_add(1);
            let _ = group.members[start].send(record.clone());
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str, group: &str) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut topics = self.topics.write().await;
        let state = topics.entry(topic.to_owned()).or_default();
        state
            .groups
            .entry(group.to_owned())
            .or_insert_with(|| GroupState { members: Vec::new(), next: 0 })
            .members
            .push(tx);
        Subscription { rx }
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

// -- NATS bus -----------------------------------------------------------------

/// NATS-backed bus. Subjects are `{prefix}.{topic}`; consumer groups map to
/// NATS queue groups.
pub struct NatsBus {
    client: async_nats::Client,
    prefix: String,
}

impl NatsBus {
    /// Connect, retrying the initial dial.
    pub async fn connect(url: &str, prefix: &str) -> Result<Self> {
        let opts = async_nats::ConnectOptions::new().retry_on_initial_connect();
        info!(url = %url, prefix = %prefix, "connecting event bus");
        let client = opts
            .connect(url)
            .await
            .map_err(|e| Error::new(ErrorCode::ServiceUnavailable, format!("bus connect: {e}")))?;
        info!("event bus connected");
        Ok(Self { client, prefix: prefix.to_owned() })
    }

    fn subject(&self, topic: &str) -> String {
        format!("{}.{}", self.prefix, topic)
    }

    async fn publish(&self, record: Record) -> Result<()> {
        let subject = self.subject(&record.topic);
        let json = serde_json::to_vec(&record)
            .map_err(|e| Error::internal(format!("bus record encode: {e}")))?;
        self.client
            .publish(subject, json.into())
            .await
            .map_err(|e| Error::new(ErrorCode::ServiceUnavailable, format!("bus publish: {e}")))
    }

    async fn subscribe(&self, topic: &str, group: &str) -> Result<Subscription> {
        use futures_util::StreamExt;

        let subject = self.subject(topic);
        let mut sub = self
            .client
            .queue_subscribe(subject.clone(), group.to_owned())
            .await
            .map_err(|e| Error::new(ErrorCode::ServiceUnavailable, format!("bus subscribe: {e}")))?;

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(msg) = sub.next().await {
                match serde_json::from_slice::<Record>(&msg.payload) {
                    Ok(record) => {
                        if tx.send(record).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(subject = %subject, err = %e, "dropping undecodable bus record"),
                }
            }
            debug!(subject = %subject, "bus subscription closed");
        });
        Ok(Subscription { rx })
    }
}

#[cfg(test)]
#[path = "bus_tests.rs"]
mod tests;
