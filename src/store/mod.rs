//! Repository gateway: typed read/write access to teams, agents, meetings,
//! messages, artifacts, and webhooks, abstracted over the concrete store.
//!
//! The engine and runner only ever see [`MeetingStore`]; the SQLite backend
//! in [`sqlite`] is the default implementation.

pub mod sqlite;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{
    Agent, CodeArtifact, Meeting, MeetingMessage, MeetingStatus, Team, WebhookConfig,
};

/// Errors from the persistent store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("store task failed: {0}")]
    Task(String),
}

/// A not-yet-persisted artifact produced by the code extractor.
#[derive(Debug, Clone)]
pub struct NewArtifact {
    pub filename: String,
    pub language: String,
    pub content: String,
    pub description: String,
}

/// Typed persistence operations used by the engine, runner, and surface.
#[async_trait]
pub trait MeetingStore: Send + Sync {
    // -- teams --------------------------------------------------------------
    async fn create_team(&self, team: &Team) -> Result<(), StoreError>;
    async fn get_team(&self, id: &str) -> Result<Option<Team>, StoreError>;

    // -- agents -------------------------------------------------------------
    async fn create_agent(&self, agent: &Agent) -> Result<(), StoreError>;
    async fn update_agent(&self, agent: &Agent) -> Result<(), StoreError>;
    async fn get_agent(&self, id: &str) -> Result<Option<Agent>, StoreError>;
    /// Agents of a team in creation order. `include_mirrors = false` filters
    /// mirror agents out (the default speaker pool).
    async fn list_team_agents(
        &self,
        team_id: &str,
        include_mirrors: bool,
    ) -> Result<Vec<Agent>, StoreError>;
    /// Deletes the agent. Referencing messages keep their text but lose the
    /// agent id; mirrors of this agent get their back-reference nulled.
    async fn delete_agent(&self, id: &str) -> Result<(), StoreError>;

    // -- meetings -----------------------------------------------------------
    async fn create_meeting(&self, meeting: &Meeting) -> Result<(), StoreError>;
    async fn get_meeting(&self, id: &str) -> Result<Option<Meeting>, StoreError>;
    async fn update_meeting_status(&self, id: &str, status: MeetingStatus) -> Result<(), StoreError>;
    /// Commit a finished round: bump `current_round` in the same transaction
    /// as the status write.
    async fn complete_round(
        &self,
        id: &str,
        current_round: u32,
        status: MeetingStatus,
    ) -> Result<(), StoreError>;
    /// Append an operator-visible note to the meeting description.
    async fn append_description_note(&self, id: &str, note: &str) -> Result<(), StoreError>;
    /// Replace the agenda fields (used by the `ai_auto` agenda strategy).
    async fn update_meeting_agenda(
        &self,
        id: &str,
        agenda: &str,
        questions: &[String],
        rules: &[String],
        max_rounds: u32,
    ) -> Result<(), StoreError>;
    async fn delete_meeting(&self, id: &str) -> Result<(), StoreError>;
    async fn list_meetings_by_status(
        &self,
        status: MeetingStatus,
    ) -> Result<Vec<Meeting>, StoreError>;

    // -- messages -----------------------------------------------------------
    async fn insert_message(&self, message: &MeetingMessage) -> Result<(), StoreError>;
    /// All messages of a meeting ordered by `(round_number, created_at)`.
    async fn list_messages(&self, meeting_id: &str) -> Result<Vec<MeetingMessage>, StoreError>;
    /// Assistant messages only, same ordering.
    async fn list_assistant_messages(
        &self,
        meeting_id: &str,
    ) -> Result<Vec<MeetingMessage>, StoreError>;
    async fn count_messages(&self, meeting_id: &str) -> Result<u64, StoreError>;

    // -- artifacts ----------------------------------------------------------
    /// Persist extracted artifacts in one transaction. An existing artifact
    /// with the same filename keeps its row; its version is bumped only when
    /// the content changed.
    async fn upsert_artifacts(
        &self,
        meeting_id: &str,
        artifacts: Vec<NewArtifact>,
    ) -> Result<(), StoreError>;
    async fn list_artifacts(&self, meeting_id: &str) -> Result<Vec<CodeArtifact>, StoreError>;

    // -- webhooks -----------------------------------------------------------
    async fn create_webhook(&self, webhook: &WebhookConfig) -> Result<(), StoreError>;
    async fn list_active_webhooks(&self) -> Result<Vec<WebhookConfig>, StoreError>;
}
