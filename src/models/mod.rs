//! Domain entities: teams, agents, meetings, messages, artifacts, webhooks.
//!
//! Ownership follows the store schema: a team owns its agents and meetings,
//! a meeting owns its messages and artifacts (cascade delete). The mirror
//! link between agents is a weak id reference, nulled out when the primary
//! is deleted rather than cascaded.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::engine::prompts;
use crate::error::EngineError;

/// Meeting lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeetingStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl MeetingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MeetingStatus::Pending => "pending",
            MeetingStatus::Running => "running",
            MeetingStatus::Completed => "completed",
            MeetingStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(MeetingStatus::Pending),
            "running" => Some(MeetingStatus::Running),
            "completed" => Some(MeetingStatus::Completed),
            "failed" => Some(MeetingStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for MeetingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the meeting is expected to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputType {
    #[default]
    Code,
    Report,
    Paper,
}

impl OutputType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputType::Code => "code",
            OutputType::Report => "report",
            OutputType::Paper => "paper",
        }
    }

    /// Unknown strings fall back to `code`.
    pub fn parse(s: &str) -> Self {
        match s {
            "report" => OutputType::Report,
            "paper" => OutputType::Paper,
            _ => OutputType::Code,
        }
    }
}

/// Orchestration strategy variant for a meeting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MeetingType {
    #[default]
    Team,
    Individual,
    Merge,
}

impl MeetingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MeetingType::Team => "team",
            MeetingType::Individual => "individual",
            MeetingType::Merge => "merge",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "individual" => MeetingType::Individual,
            "merge" => MeetingType::Merge,
            _ => MeetingType::Team,
        }
    }
}

/// How the agenda was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgendaStrategy {
    #[default]
    Manual,
    AiAuto,
    AgentVoting,
    Chain,
}

impl AgendaStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgendaStrategy::Manual => "manual",
            AgendaStrategy::AiAuto => "ai_auto",
            AgendaStrategy::AgentVoting => "agent_voting",
            AgendaStrategy::Chain => "chain",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "ai_auto" => AgendaStrategy::AiAuto,
            "agent_voting" => AgendaStrategy::AgentVoting,
            "chain" => AgendaStrategy::Chain,
            _ => AgendaStrategy::Manual,
        }
    }
}

/// Role of a chat message in provider wire formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        }
    }
}

/// One message in the prompt payload sent to an LLM provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: ChatRole::Assistant, content: content.into() }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self { role: ChatRole::System, content: content.into() }
    }
}

/// A container for agents and meetings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Team {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Default reply language for meetings of this team.
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub is_public: bool,
    #[serde(default)]
    pub owner_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Team {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            description: None,
            language: None,
            is_public: false,
            owner_id: None,
            created_at: Utc::now(),
        }
    }
}

/// An LLM-backed persona on a team.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub team_id: String,
    pub name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub expertise: String,
    #[serde(default)]
    pub goal: String,
    #[serde(default)]
    pub role: String,
    /// Model identifier as chosen by the user (e.g. `gpt-4o`, `claude-sonnet-4-5`).
    pub model: String,
    /// Free-form provider parameters merged into each call.
    #[serde(default)]
    pub model_params: serde_json::Map<String, Value>,
    /// Derived from the profile fields; regenerated whenever one changes.
    pub system_prompt: String,
    #[serde(default)]
    pub is_mirror: bool,
    /// Weak back-reference from a mirror to its primary agent.
    #[serde(default)]
    pub primary_agent_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Agent {
    pub fn new(
        team_id: impl Into<String>,
        name: impl Into<String>,
        title: impl Into<String>,
        expertise: impl Into<String>,
        goal: impl Into<String>,
        role: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        let mut agent = Self {
            id: Uuid::new_v4().to_string(),
            team_id: team_id.into(),
            name: name.into(),
            title: title.into(),
            expertise: expertise.into(),
            goal: goal.into(),
            role: role.into(),
            model: model.into(),
            model_params: serde_json::Map::new(),
            system_prompt: String::new(),
            is_mirror: false,
            primary_agent_id: None,
            created_at: Utc::now(),
        };
        agent.refresh_system_prompt();
        agent
    }

    /// Rebuild `system_prompt` from the profile fields. Must be called after
    /// any of name/title/expertise/goal/role changes, before persisting.
    pub fn refresh_system_prompt(&mut self) {
        self.system_prompt = prompts::agent_system_prompt(
            &self.name,
            &self.title,
            &self.expertise,
            &self.goal,
            &self.role,
        );
    }
}

/// A per-round goal injected into the lead prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundPlan {
    pub round: u32,
    #[serde(default)]
    pub goal: Option<String>,
}

/// A bounded multi-round conversation among agents about an agenda.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Meeting {
    pub id: String,
    pub team_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub agenda: String,
    #[serde(default)]
    pub agenda_questions: Vec<String>,
    #[serde(default)]
    pub agenda_rules: Vec<String>,
    #[serde(default)]
    pub output_type: OutputType,
    #[serde(default)]
    pub meeting_type: MeetingType,
    pub status: MeetingStatus,
    pub max_rounds: u32,
    pub current_round: u32,
    /// Empty means every non-mirror agent on the team participates.
    #[serde(default)]
    pub participant_agent_ids: Vec<String>,
    #[serde(default)]
    pub individual_agent_id: Option<String>,
    /// Meetings being synthesized (merge meetings).
    #[serde(default)]
    pub source_meeting_ids: Vec<String>,
    /// Prior meetings whose transcripts seed this one (chain meetings).
    #[serde(default)]
    pub context_meeting_ids: Vec<String>,
    #[serde(default)]
    pub parent_meeting_id: Option<String>,
    #[serde(default)]
    pub rewrite_feedback: Option<String>,
    #[serde(default)]
    pub agenda_strategy: AgendaStrategy,
    #[serde(default)]
    pub round_plans: Vec<RoundPlan>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Meeting {
    pub fn new(team_id: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            team_id: team_id.into(),
            title: title.into(),
            description: String::new(),
            agenda: String::new(),
            agenda_questions: Vec::new(),
            agenda_rules: Vec::new(),
            output_type: OutputType::Code,
            meeting_type: MeetingType::Team,
            status: MeetingStatus::Pending,
            max_rounds: 5,
            current_round: 0,
            participant_agent_ids: Vec::new(),
            individual_agent_id: None,
            source_meeting_ids: Vec::new(),
            context_meeting_ids: Vec::new(),
            parent_meeting_id: None,
            rewrite_feedback: None,
            agenda_strategy: AgendaStrategy::Manual,
            round_plans: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Structural invariants checked before a meeting is persisted or run.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.max_rounds < 1 || self.max_rounds > 20 {
            return Err(EngineError::validation("max_rounds must be between 1 and 20"));
        }
        if self.current_round > self.max_rounds {
            return Err(EngineError::validation("current_round exceeds max_rounds"));
        }
        if self.meeting_type == MeetingType::Individual && self.individual_agent_id.is_none() {
            return Err(EngineError::validation(
                "individual meetings require individual_agent_id",
            ));
        }
        if self.meeting_type == MeetingType::Merge && self.source_meeting_ids.is_empty() {
            return Err(EngineError::validation(
                "merge meetings require at least one source meeting",
            ));
        }
        Ok(())
    }

    pub fn remaining_rounds(&self) -> u32 {
        self.max_rounds.saturating_sub(self.current_round)
    }
}

/// One persisted transcript entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeetingMessage {
    pub id: String,
    pub meeting_id: String,
    /// None for human user and system messages.
    pub agent_id: Option<String>,
    pub agent_name: Option<String>,
    pub role: ChatRole,
    pub content: String,
    /// 0 marks pre-round injections.
    pub round_number: u32,
    pub created_at: DateTime<Utc>,
}

impl MeetingMessage {
    pub fn assistant(
        meeting_id: impl Into<String>,
        agent_id: impl Into<String>,
        agent_name: impl Into<String>,
        content: impl Into<String>,
        round_number: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            meeting_id: meeting_id.into(),
            agent_id: Some(agent_id.into()),
            agent_name: Some(agent_name.into()),
            role: ChatRole::Assistant,
            content: content.into(),
            round_number,
            created_at: Utc::now(),
        }
    }

    /// A human-authored message; carries no agent attribution.
    pub fn from_user(
        meeting_id: impl Into<String>,
        content: impl Into<String>,
        round_number: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            meeting_id: meeting_id.into(),
            agent_id: None,
            agent_name: None,
            role: ChatRole::User,
            content: content.into(),
            round_number,
            created_at: Utc::now(),
        }
    }
}

/// A file-shaped output extracted from meeting messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeArtifact {
    pub id: String,
    pub meeting_id: String,
    /// Relative path with extension.
    pub filename: String,
    pub language: String,
    pub content: String,
    #[serde(default)]
    pub description: String,
    /// Monotonic, bumped whenever the content changes.
    pub version: u32,
    pub created_at: DateTime<Utc>,
}

/// An outbound event subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub id: String,
    pub url: String,
    /// Event types this hook receives (e.g. `meeting_complete`, `error`).
    pub events: Vec<String>,
    pub active: bool,
    /// Shared secret for the HMAC-SHA256 signature header.
    #[serde(default)]
    pub secret: Option<String>,
}

impl WebhookConfig {
    pub fn new(url: impl Into<String>, events: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            url: url.into(),
            events,
            active: true,
            secret: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meeting_validation_bounds() {
        let mut m = Meeting::new("t1", "Test");
        assert!(m.validate().is_ok());

        m.max_rounds = 0;
        assert!(m.validate().is_err());
        m.max_rounds = 21;
        assert!(m.validate().is_err());
        m.max_rounds = 20;
        assert!(m.validate().is_ok());

        m.current_round = 21;
        assert!(m.validate().is_err());
    }

    #[test]
    fn individual_requires_agent() {
        let mut m = Meeting::new("t1", "Solo");
        m.meeting_type = MeetingType::Individual;
        assert!(m.validate().is_err());
        m.individual_agent_id = Some("a1".to_string());
        assert!(m.validate().is_ok());
    }

    #[test]
    fn merge_requires_sources() {
        let mut m = Meeting::new("t1", "Merge");
        m.meeting_type = MeetingType::Merge;
        assert!(m.validate().is_err());
        m.source_meeting_ids = vec!["m1".to_string()];
        assert!(m.validate().is_ok());
    }

    #[test]
    fn agent_system_prompt_tracks_profile() {
        let mut a = Agent::new("t1", "Dr. Ada", "Lead", "compilers", "ship it", "lead", "gpt-4o");
        assert!(a.system_prompt.contains("Dr. Ada"));
        assert!(a.system_prompt.contains("compilers"));

        a.expertise = "distributed systems".to_string();
        a.refresh_system_prompt();
        assert!(a.system_prompt.contains("distributed systems"));
        assert!(!a.system_prompt.contains("compilers"));
    }

    #[test]
    fn status_round_trips_through_strings() {
        for s in [
            MeetingStatus::Pending,
            MeetingStatus::Running,
            MeetingStatus::Completed,
            MeetingStatus::Failed,
        ] {
            assert_eq!(MeetingStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(MeetingStatus::parse("bogus"), None);
    }
}
