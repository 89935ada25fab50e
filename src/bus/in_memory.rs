//! In-process event bus backend.
//!
//! A mutex-guarded map of meeting id → subscriber queues. The lock covers
//! only subscribe/unsubscribe/publish bookkeeping, never an await point.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{EventBus, MeetingEvent, Subscription, QUEUE_CAPACITY};

struct SubscriberSlot {
    id: u64,
    sender: mpsc::Sender<MeetingEvent>,
}

/// Single-process bus: the default when no broker is configured.
#[derive(Default)]
pub struct InMemoryBus {
    subscribers: Mutex<HashMap<String, Vec<SubscriberSlot>>>,
    next_id: AtomicU64,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live subscribers for a meeting (test hook).
    pub fn subscriber_count(&self, meeting_id: &str) -> usize {
        self.subscribers
            .lock()
            .get(meeting_id)
            .map(|subs| subs.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl EventBus for InMemoryBus {
    async fn subscribe(&self, meeting_id: &str) -> Subscription {
        let (sender, receiver) = mpsc::channel(QUEUE_CAPACITY);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .lock()
            .entry(meeting_id.to_string())
            .or_default()
            .push(SubscriberSlot { id, sender });
        Subscription::new(id, receiver)
    }

    async fn unsubscribe(&self, meeting_id: &str, subscription_id: u64) {
        let mut map = self.subscribers.lock();
        if let Some(subs) = map.get_mut(meeting_id) {
            subs.retain(|s| s.id != subscription_id);
            if subs.is_empty() {
                map.remove(meeting_id);
            }
        }
    }

    async fn publish(&self, meeting_id: &str, event: MeetingEvent) {
        let senders: Vec<(u64, mpsc::Sender<MeetingEvent>)> = {
            let map = self.subscribers.lock();
            match map.get(meeting_id) {
                Some(subs) => subs.iter().map(|s| (s.id, s.sender.clone())).collect(),
                None => return,
            }
        };

        let mut closed = Vec::new();
        for (id, sender) in senders {
            match sender.try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    log::debug!("event bus: queue full for meeting {meeting_id}, dropping event");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => closed.push(id),
            }
        }

        if !closed.is_empty() {
            let mut map = self.subscribers.lock();
            if let Some(subs) = map.get_mut(meeting_id) {
                subs.retain(|s| !closed.contains(&s.id));
                if subs.is_empty() {
                    map.remove(meeting_id);
                }
            }
        }
    }

    async fn clear_replay_buffer(&self, _meeting_id: &str) {
        // Queues are live-only; there is nothing buffered to replay.
    }
}
