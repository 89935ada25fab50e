//! # virtlab
//!
//! Multi-agent meeting orchestration: teams of LLM-backed agents run
//! bounded, phase-aware meetings with real-time streaming, per-round
//! persistence, background execution, meeting chaining, and code artifact
//! extraction.
//!
//! The crate is organized around a small set of components:
//!
//! - [`engine`] — the phase-aware turn scheduler and prompt composer
//! - [`runner`] — single-flight background execution with per-round commits
//! - [`bus`] — per-meeting pub/sub with bounded subscriber queues
//! - [`llm`] — one client over OpenAI-, Anthropic-, and DeepSeek-style APIs
//! - [`store`] — typed persistence of teams, agents, meetings, messages,
//!   and artifacts
//! - [`server`] — the REST/SSE/WebSocket surface

pub mod bus;
pub mod config;
pub mod engine;
pub mod error;
pub mod lang;
pub mod llm;
pub mod models;
pub mod runner;
pub mod server;
pub mod store;
pub mod webhooks;

pub use bus::{EventBus, MeetingEvent};
pub use config::Settings;
pub use engine::{MeetingEngine, MeetingSpec};
pub use error::EngineError;
pub use llm::{LlmCall, LlmClient, LlmError};
pub use models::{Agent, Meeting, MeetingMessage, MeetingStatus, Team};
pub use runner::{BackgroundRunner, RunOptions};
pub use store::MeetingStore;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
