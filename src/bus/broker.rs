//! Broker-backed event bus backend.
//!
//! Events travel as JSON over one external pub/sub channel per meeting
//! (`meeting:sse:<id>`), so the runner and the streaming surface can live in
//! different processes. Each subscriber owns a listener task that
//! deserializes broker payloads into its local bounded queue; a payload that
//! does not parse is dropped.
//!
//! The transport itself is behind the small [`Broker`] trait; a concrete
//! client (e.g. a Redis connection selected by `REDIS_URL`) plugs in there.
//! [`LoopbackBroker`] is the in-process reference transport used in tests
//! and as the fallback when no external broker is wired up.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{EventBus, MeetingEvent, Subscription, QUEUE_CAPACITY};

/// Channel name prefix for meeting event streams.
pub const CHANNEL_PREFIX: &str = "meeting:sse:";

/// Minimal external pub/sub transport.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Publish a payload to a channel. Failures are the transport's problem;
    /// the bus treats publish as fire-and-forget.
    async fn publish(&self, channel: &str, payload: String);

    /// Open a subscription to a channel; payloads arrive on the returned
    /// receiver until the subscription is dropped.
    async fn subscribe(&self, channel: &str) -> mpsc::Receiver<String>;

    /// Best-effort clear of any replayable state for the channel.
    async fn clear_channel(&self, channel: &str);
}

struct ListenerSlot {
    id: u64,
    task: JoinHandle<()>,
}

/// Bus backend running over an external [`Broker`].
pub struct BrokerBus {
    broker: Arc<dyn Broker>,
    listeners: Mutex<HashMap<String, Vec<ListenerSlot>>>,
    next_id: AtomicU64,
}

impl BrokerBus {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self {
            broker,
            listeners: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    fn channel_for(meeting_id: &str) -> String {
        format!("{CHANNEL_PREFIX}{meeting_id}")
    }
}

impl Drop for BrokerBus {
    fn drop(&mut self) {
        for (_, slots) in self.listeners.lock().drain() {
            for slot in slots {
                slot.task.abort();
            }
        }
    }
}

#[async_trait]
impl EventBus for BrokerBus {
    async fn subscribe(&self, meeting_id: &str) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (local_tx, local_rx) = mpsc::channel(QUEUE_CAPACITY);
        let mut broker_rx = self.broker.subscribe(&Self::channel_for(meeting_id)).await;

        let topic = meeting_id.to_string();
        let task = tokio::spawn(async move {
            while let Some(payload) = broker_rx.recv().await {
                let event: MeetingEvent = match serde_json::from_str(&payload) {
                    Ok(e) => e,
                    Err(_) => continue,
                };
                match local_tx.try_send(event) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        log::debug!("event bus: queue full for meeting {topic}, dropping event");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => break,
                }
            }
        });

        self.listeners
            .lock()
            .entry(meeting_id.to_string())
            .or_default()
            .push(ListenerSlot { id, task });

        Subscription::new(id, local_rx)
    }

    async fn unsubscribe(&self, meeting_id: &str, subscription_id: u64) {
        let mut map = self.listeners.lock();
        if let Some(slots) = map.get_mut(meeting_id) {
            if let Some(pos) = slots.iter().position(|s| s.id == subscription_id) {
                let slot = slots.remove(pos);
                slot.task.abort();
            }
            if slots.is_empty() {
                map.remove(meeting_id);
            }
        }
    }

    async fn publish(&self, meeting_id: &str, event: MeetingEvent) {
        let payload = match serde_json::to_string(&event) {
            Ok(p) => p,
            Err(e) => {
                log::warn!("event bus: failed to encode event for meeting {meeting_id}: {e}");
                return;
            }
        };
        self.broker.publish(&Self::channel_for(meeting_id), payload).await;
    }

    async fn clear_replay_buffer(&self, meeting_id: &str) {
        self.broker.clear_channel(&Self::channel_for(meeting_id)).await;
    }
}

/// In-process transport implementing [`Broker`] with plain channels. Used by
/// tests and as the single-process fallback.
#[derive(Default)]
pub struct LoopbackBroker {
    channels: Mutex<HashMap<String, Vec<mpsc::Sender<String>>>>,
}

impl LoopbackBroker {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Broker for LoopbackBroker {
    async fn publish(&self, channel: &str, payload: String) {
        let senders: Vec<mpsc::Sender<String>> = {
            let map = self.channels.lock();
            match map.get(channel) {
                Some(subs) => subs.clone(),
                None => return,
            }
        };
        for sender in senders {
            let _ = sender.try_send(payload.clone());
        }
        // Prune closed endpoints.
        self.channels
            .lock()
            .entry(channel.to_string())
            .or_default()
            .retain(|s| !s.is_closed());
    }

    async fn subscribe(&self, channel: &str) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        self.channels
            .lock()
            .entry(channel.to_string())
            .or_default()
            .push(tx);
        rx
    }

    async fn clear_channel(&self, channel: &str) {
        self.channels.lock().remove(channel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Duration;

    fn round_done(round: u32) -> MeetingEvent {
        MeetingEvent::RoundComplete { round, total_rounds: 3 }
    }

    #[tokio::test]
    async fn events_cross_the_broker() {
        let bus = BrokerBus::new(Arc::new(LoopbackBroker::new()));
        let mut sub = bus.subscribe("m1").await;

        bus.publish("m1", round_done(1)).await;
        bus.publish("m1", round_done(2)).await;

        assert_eq!(sub.recv_timeout(Duration::from_secs(1)).await, Some(round_done(1)));
        assert_eq!(sub.recv_timeout(Duration::from_secs(1)).await, Some(round_done(2)));
    }

    #[tokio::test]
    async fn malformed_payloads_are_skipped() {
        let broker = Arc::new(LoopbackBroker::new());
        let bus = BrokerBus::new(broker.clone() as Arc<dyn Broker>);
        let mut sub = bus.subscribe("m1").await;

        broker
            .publish(&format!("{CHANNEL_PREFIX}m1"), "not json".to_string())
            .await;
        bus.publish("m1", round_done(1)).await;

        assert_eq!(sub.recv_timeout(Duration::from_secs(1)).await, Some(round_done(1)));
    }

    #[tokio::test]
    async fn unsubscribe_stops_the_listener() {
        let bus = BrokerBus::new(Arc::new(LoopbackBroker::new()));
        let mut sub = bus.subscribe("m1").await;
        bus.unsubscribe("m1", sub.id()).await;

        bus.publish("m1", round_done(1)).await;
        assert_eq!(sub.recv_timeout(Duration::from_millis(100)).await, None);
    }

    #[tokio::test]
    async fn subscribers_on_different_meetings_do_not_cross() {
        let bus = BrokerBus::new(Arc::new(LoopbackBroker::new()));
        let mut sub1 = bus.subscribe("m1").await;
        let mut sub2 = bus.subscribe("m2").await;

        bus.publish("m1", round_done(7)).await;
        assert_eq!(sub1.recv_timeout(Duration::from_secs(1)).await, Some(round_done(7)));
        assert_eq!(sub2.recv_timeout(Duration::from_millis(100)).await, None);
    }
}
