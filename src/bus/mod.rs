//! Pub/sub event bus for streaming meeting progress.
//!
//! Topics are meeting ids. Each subscriber owns a bounded FIFO queue;
//! publishers never block — when a subscriber's queue is full the event is
//! dropped for that subscriber and a debug line logged. Two backends satisfy
//! the interface: [`in_memory::InMemoryBus`] for single-process deployments
//! and [`broker::BrokerBus`] for fan-out over an external pub/sub. The
//! backend is chosen once at process start.

pub mod broker;
pub mod in_memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

/// Bounded capacity of each subscriber queue.
pub const QUEUE_CAPACITY: usize = 256;

/// Events published by the engine and runner while a meeting executes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MeetingEvent {
    /// An agent's turn started; the LLM call is in flight.
    AgentSpeaking {
        agent_name: String,
        agent_id: Option<String>,
    },
    /// An agent's response was persisted.
    Message {
        id: String,
        agent_id: Option<String>,
        agent_name: Option<String>,
        role: String,
        content: String,
        round_number: u32,
    },
    /// A round was fully committed.
    RoundComplete { round: u32, total_rounds: u32 },
    /// The meeting reached a terminal state naturally.
    MeetingComplete { status: String },
    /// The run failed; `provider` is set for provider-attributable errors.
    Error {
        detail: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        provider: Option<String>,
    },
}

impl MeetingEvent {
    /// The wire name of the event, used for SSE `event:` fields and webhook
    /// subscription matching.
    pub fn event_type(&self) -> &'static str {
        match self {
            MeetingEvent::AgentSpeaking { .. } => "agent_speaking",
            MeetingEvent::Message { .. } => "message",
            MeetingEvent::RoundComplete { .. } => "round_complete",
            MeetingEvent::MeetingComplete { .. } => "meeting_complete",
            MeetingEvent::Error { .. } => "error",
        }
    }
}

/// A subscriber's bounded event queue. Dropping the subscription ends it;
/// publishers prune closed queues on the next publish.
pub struct Subscription {
    id: u64,
    receiver: mpsc::Receiver<MeetingEvent>,
}

impl Subscription {
    pub(crate) fn new(id: u64, receiver: mpsc::Receiver<MeetingEvent>) -> Self {
        Self { id, receiver }
    }

    /// Identifier for explicit unsubscription.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the next event; `None` once the queue is closed and drained.
    pub async fn recv(&mut self) -> Option<MeetingEvent> {
        self.receiver.recv().await
    }

    /// Wait for the next event up to a deadline. `None` on timeout or close.
    pub async fn recv_timeout(&mut self, deadline: Duration) -> Option<MeetingEvent> {
        timeout(deadline, self.receiver.recv()).await.ok().flatten()
    }

    /// Non-blocking poll used by tests and drain loops.
    pub fn try_recv(&mut self) -> Option<MeetingEvent> {
        self.receiver.try_recv().ok()
    }
}

/// The bus interface shared by the in-memory and broker-backed backends.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Create a new subscriber queue for a meeting.
    async fn subscribe(&self, meeting_id: &str) -> Subscription;

    /// Remove a subscriber queue.
    async fn unsubscribe(&self, meeting_id: &str, subscription_id: u64);

    /// Broadcast an event to all current subscribers of the meeting. Never
    /// blocks on a slow subscriber.
    async fn publish(&self, meeting_id: &str, event: MeetingEvent);

    /// Best-effort clear of any replay facility the backend offers, so a new
    /// run does not leak events from a previous one.
    async fn clear_replay_buffer(&self, meeting_id: &str);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_json_shapes() {
        let e = MeetingEvent::AgentSpeaking {
            agent_name: "Dr. X".to_string(),
            agent_id: Some("a1".to_string()),
        };
        let v: serde_json::Value = serde_json::to_value(&e).unwrap();
        assert_eq!(v["type"], "agent_speaking");
        assert_eq!(v["agent_name"], "Dr. X");

        let e = MeetingEvent::RoundComplete { round: 1, total_rounds: 5 };
        let v: serde_json::Value = serde_json::to_value(&e).unwrap();
        assert_eq!(v["type"], "round_complete");
        assert_eq!(v["round"], 1);
        assert_eq!(v["total_rounds"], 5);

        let e = MeetingEvent::Error { detail: "boom".to_string(), provider: None };
        let v: serde_json::Value = serde_json::to_value(&e).unwrap();
        assert_eq!(v["type"], "error");
        assert!(v.get("provider").is_none());
    }

    #[test]
    fn event_round_trips() {
        let e = MeetingEvent::Message {
            id: "m1".to_string(),
            agent_id: Some("a1".to_string()),
            agent_name: Some("Dr. X".to_string()),
            role: "assistant".to_string(),
            content: "hello".to_string(),
            round_number: 2,
        };
        let json = serde_json::to_string(&e).unwrap();
        let back: MeetingEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, e);
    }
}
