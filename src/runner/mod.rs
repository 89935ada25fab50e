//! Background meeting runner: single-flight execution of meetings in worker
//! tasks, decoupled from any client connection.
//!
//! A process-wide registry maps meeting id → active run; acquiring the entry
//! is the single-flight lock that guards the `pending → running` transition.
//! Every round is committed before the next begins, so a crash between
//! rounds leaves the meeting restartable. The startup sweep fails meetings
//! left `running` by an unclean shutdown.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::watch;

use crate::bus::{EventBus, MeetingEvent};
use crate::engine::context::{
    extract_keywords_from_agenda, extract_relevant_context, ContextSummary, DEFAULT_CONTEXT_BUDGET,
};
use crate::engine::{artifacts, prompts, MeetingEngine, MeetingSpec, TurnHooks, TurnMessage};
use crate::error::EngineError;
use crate::lang::meeting_preferred_lang;
use crate::llm::{LlmCall, LlmError};
use crate::models::{
    Agent, ChatMessage, ChatRole, Meeting, MeetingMessage, MeetingStatus, MeetingType,
};
use crate::store::{MeetingStore, NewArtifact, StoreError};
use crate::webhooks::WebhookDispatcher;

/// User-actionable message emitted when a provider signals quota exhaustion.
pub const QUOTA_MESSAGE: &str =
    "API quota exhausted. Please check your API key billing or switch provider.";

/// Options for one run request.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub rounds: u32,
    pub topic: Option<String>,
    pub locale: Option<String>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self { rounds: 1, topic: None, locale: None }
    }
}

struct ActiveRun {
    cancel: watch::Sender<bool>,
}

/// Holds the registry entry for a running meeting; dropping it releases the
/// single-flight lock.
struct RunGuard {
    meeting_id: String,
    registry: Arc<DashMap<String, ActiveRun>>,
    cancel: watch::Receiver<bool>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.registry.remove(&self.meeting_id);
    }
}

/// Drives meetings to completion in background tasks, one per meeting.
#[derive(Clone)]
pub struct BackgroundRunner {
    store: Arc<dyn MeetingStore>,
    bus: Arc<dyn EventBus>,
    llm: Arc<dyn LlmCall>,
    registry: Arc<DashMap<String, ActiveRun>>,
    webhooks: Option<Arc<WebhookDispatcher>>,
}

impl BackgroundRunner {
    pub fn new(store: Arc<dyn MeetingStore>, bus: Arc<dyn EventBus>, llm: Arc<dyn LlmCall>) -> Self {
        Self {
            store,
            bus,
            llm,
            registry: Arc::new(DashMap::new()),
            webhooks: None,
        }
    }

    /// Attach a webhook dispatcher for terminal events.
    pub fn with_webhooks(mut self, webhooks: Arc<WebhookDispatcher>) -> Self {
        self.webhooks = Some(webhooks);
        self
    }

    /// Whether a worker is currently executing this meeting.
    pub fn is_running(&self, meeting_id: &str) -> bool {
        self.registry.contains_key(meeting_id)
    }

    /// Signal the meeting's worker to stop at the next turn boundary.
    /// Returns false when no worker is running.
    pub fn request_cancel(&self, meeting_id: &str) -> bool {
        match self.registry.get(meeting_id) {
            Some(run) => run.cancel.send(true).is_ok(),
            None => false,
        }
    }

    fn try_acquire(&self, meeting_id: &str) -> Option<RunGuard> {
        use dashmap::mapref::entry::Entry;
        match self.registry.entry(meeting_id.to_string()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                let (tx, rx) = watch::channel(false);
                slot.insert(ActiveRun { cancel: tx });
                Some(RunGuard {
                    meeting_id: meeting_id.to_string(),
                    registry: self.registry.clone(),
                    cancel: rx,
                })
            }
        }
    }

    /// Start a background run. `Ok(false)` means a worker is already
    /// executing this meeting; validation failures are returned as errors
    /// without state change.
    pub async fn start_background(
        &self,
        meeting_id: &str,
        options: RunOptions,
    ) -> Result<bool, EngineError> {
        let meeting = self
            .store
            .get_meeting(meeting_id)
            .await?
            .ok_or_else(|| EngineError::not_found(format!("meeting {meeting_id}")))?;
        validate_runnable(&meeting, &options)?;

        let Some(guard) = self.try_acquire(meeting_id) else {
            return Ok(false);
        };

        let runner = self.clone();
        let meeting_id = meeting_id.to_string();
        tokio::spawn(async move {
            let cancel = guard.cancel.clone();
            if let Err(e) = runner.run_and_finalize(&meeting_id, &options, cancel).await {
                log::error!("background run failed for meeting {meeting_id}: {e}");
            }
            drop(guard);
        });
        Ok(true)
    }

    /// Run synchronously to completion (the blocking surface adapter).
    /// Fails with [`EngineError::Conflict`] when a background worker holds
    /// the meeting.
    pub async fn run_to_completion(
        &self,
        meeting_id: &str,
        options: RunOptions,
    ) -> Result<(), EngineError> {
        let meeting = self
            .store
            .get_meeting(meeting_id)
            .await?
            .ok_or_else(|| EngineError::not_found(format!("meeting {meeting_id}")))?;
        validate_runnable(&meeting, &options)?;

        let guard = self
            .try_acquire(meeting_id)
            .ok_or_else(|| EngineError::Conflict(meeting_id.to_string()))?;
        let cancel = guard.cancel.clone();
        let result = self.run_and_finalize(meeting_id, &options, cancel).await;
        drop(guard);
        result
    }

    /// Reset meetings stuck in `running` with no live worker (unclean
    /// shutdown). Returns how many were failed.
    pub async fn cleanup_stuck_meetings(&self) -> usize {
        let stuck = match self.store.list_meetings_by_status(MeetingStatus::Running).await {
            Ok(meetings) => meetings,
            Err(e) => {
                log::warn!("startup sweep skipped, could not list running meetings: {e}");
                return 0;
            }
        };

        let mut count = 0;
        for meeting in stuck {
            if self.is_running(&meeting.id) {
                continue;
            }
            match self
                .store
                .update_meeting_status(&meeting.id, MeetingStatus::Failed)
                .await
            {
                Ok(()) => count += 1,
                Err(e) => {
                    log::warn!("startup sweep could not fail meeting {}: {e}", meeting.id);
                }
            }
        }
        if count > 0 {
            log::info!("startup sweep failed {count} stuck meeting(s)");
        }
        count
    }

    async fn run_and_finalize(
        &self,
        meeting_id: &str,
        options: &RunOptions,
        cancel: watch::Receiver<bool>,
    ) -> Result<(), EngineError> {
        let result = self.execute_run(meeting_id, options, cancel).await;
        if let Err(ref error) = result {
            self.record_failure(meeting_id, error).await;
        }
        result
    }

    /// The worker body: load state, run rounds with per-round commits,
    /// finish with artifact extraction on completion.
    async fn execute_run(
        &self,
        meeting_id: &str,
        options: &RunOptions,
        cancel: watch::Receiver<bool>,
    ) -> Result<(), EngineError> {
        let meeting = self
            .store
            .get_meeting(meeting_id)
            .await?
            .ok_or_else(|| EngineError::not_found(format!("meeting {meeting_id}")))?;
        validate_runnable(&meeting, options)?;

        let agents = self.speaker_pool(&meeting).await?;
        if agents.is_empty() {
            return Err(EngineError::validation("no agents available for this meeting"));
        }

        let rounds_to_run = options.rounds.min(meeting.remaining_rounds());

        self.store
            .update_meeting_status(meeting_id, MeetingStatus::Running)
            .await?;

        // A fresh run must not leak events from a previous one.
        self.bus.clear_replay_buffer(meeting_id).await;

        let existing = self.store.list_messages(meeting_id).await?;
        let mut history = transcript_to_history(&existing);

        let team = self.store.get_team(&meeting.team_id).await?;
        let preferred_lang = meeting_preferred_lang(
            &existing,
            options.topic.as_deref(),
            options.locale.as_deref(),
            team.as_ref().and_then(|t| t.language.as_deref()),
        );

        // Rewrite meetings seed the discussion with the parent's output and
        // the feedback to address.
        if meeting.current_round == 0 {
            if let (Some(parent_id), Some(feedback)) =
                (&meeting.parent_meeting_id, &meeting.rewrite_feedback)
            {
                let parent_output = self
                    .store
                    .list_assistant_messages(parent_id)
                    .await?
                    .last()
                    .map(|m| m.content.clone())
                    .unwrap_or_default();
                history.insert(
                    0,
                    ChatMessage::user(prompts::rewrite_meeting_prompt(feedback, &parent_output)),
                );
            }
        }

        let context_summaries = self.load_context(&meeting).await?;
        let spec = MeetingSpec {
            agenda: meeting.agenda.clone(),
            agenda_questions: meeting.agenda_questions.clone(),
            agenda_rules: meeting.agenda_rules.clone(),
            output_type: meeting.output_type,
            preferred_lang,
            round_plans: meeting.round_plans.clone(),
        };

        let individual_agent = match meeting.meeting_type {
            MeetingType::Individual => Some(self.resolve_individual_agent(&meeting, &agents)),
            _ => None,
        };

        let engine = MeetingEngine::new(self.llm.clone());
        let use_structured = !meeting.agenda.is_empty() || individual_agent.is_some();

        let mut current_round = meeting.current_round;
        let mut cancelled = false;

        for i in 0..rounds_to_run {
            if *cancel.borrow() {
                cancelled = true;
                break;
            }
            let round_num = current_round + 1;
            let hooks = RunnerHooks {
                store: self.store.clone(),
                bus: self.bus.clone(),
                meeting_id: meeting_id.to_string(),
                round: round_num,
            };
            let ctx = context_summaries.as_deref();

            let outcome = if let Some(ref agent) = individual_agent {
                engine
                    .run_individual_round(
                        agent,
                        &mut history,
                        round_num,
                        meeting.max_rounds,
                        &spec,
                        ctx,
                        &hooks,
                        Some(&cancel),
                    )
                    .await?
            } else if meeting.meeting_type == MeetingType::Merge {
                engine
                    .run_merge_round(
                        &agents,
                        &mut history,
                        round_num,
                        meeting.max_rounds,
                        &spec,
                        context_summaries.as_deref().unwrap_or(&[]),
                        &hooks,
                        Some(&cancel),
                    )
                    .await?
            } else if use_structured {
                engine
                    .run_structured_round(
                        &agents,
                        &mut history,
                        round_num,
                        meeting.max_rounds,
                        &spec,
                        ctx,
                        &hooks,
                        Some(&cancel),
                    )
                    .await?
            } else {
                let topic = if i == 0 { options.topic.as_deref() } else { None };
                engine
                    .run_round(
                        &agents,
                        &mut history,
                        topic,
                        spec.preferred_lang.as_deref(),
                        &hooks,
                        Some(&cancel),
                    )
                    .await?
            };

            if outcome.cancelled {
                // Turns produced before the signal are already persisted;
                // the round itself is not committed.
                cancelled = true;
                break;
            }

            current_round = round_num;
            self.store
                .complete_round(meeting_id, current_round, MeetingStatus::Running)
                .await?;
            self.bus
                .publish(
                    meeting_id,
                    MeetingEvent::RoundComplete {
                        round: current_round,
                        total_rounds: meeting.max_rounds,
                    },
                )
                .await;
        }

        let final_status = if !cancelled && current_round >= meeting.max_rounds {
            MeetingStatus::Completed
        } else {
            MeetingStatus::Pending
        };
        self.store
            .complete_round(meeting_id, current_round, final_status)
            .await?;

        if cancelled {
            // No terminal event: clients learn the pending state by polling.
            return Ok(());
        }

        let complete = MeetingEvent::MeetingComplete { status: final_status.as_str().to_string() };
        self.bus.publish(meeting_id, complete.clone()).await;
        self.notify_webhooks(meeting_id, complete);

        if final_status == MeetingStatus::Completed {
            self.auto_extract_artifacts(meeting_id).await;
        }
        Ok(())
    }

    /// The meeting's speaker pool: non-mirror team agents, optionally
    /// restricted to the configured participants.
    async fn speaker_pool(&self, meeting: &Meeting) -> Result<Vec<Agent>, EngineError> {
        let mut agents = self.store.list_team_agents(&meeting.team_id, false).await?;
        if !meeting.participant_agent_ids.is_empty() {
            agents.retain(|a| {
                meeting.participant_agent_ids.contains(&a.id)
                    || meeting.individual_agent_id.as_deref() == Some(a.id.as_str())
            });
        }
        Ok(agents)
    }

    fn resolve_individual_agent(&self, meeting: &Meeting, agents: &[Agent]) -> Agent {
        meeting
            .individual_agent_id
            .as_deref()
            .and_then(|id| agents.iter().find(|a| a.id == id))
            .unwrap_or(&agents[0])
            .clone()
    }

    /// Context summaries for chain and merge meetings.
    async fn load_context(
        &self,
        meeting: &Meeting,
    ) -> Result<Option<Vec<ContextSummary>>, EngineError> {
        if meeting.meeting_type == MeetingType::Merge {
            let summaries = extract_relevant_context(
                self.store.as_ref(),
                &meeting.source_meeting_ids,
                None,
                DEFAULT_CONTEXT_BUDGET,
            )
            .await?;
            return Ok(Some(summaries));
        }
        if meeting.context_meeting_ids.is_empty() {
            return Ok(None);
        }
        let keywords = extract_keywords_from_agenda(&meeting.agenda, &meeting.agenda_questions);
        let summaries = extract_relevant_context(
            self.store.as_ref(),
            &meeting.context_meeting_ids,
            Some(&keywords),
            DEFAULT_CONTEXT_BUDGET,
        )
        .await?;
        Ok(Some(summaries))
    }

    /// Map a run failure onto meeting state and the event stream. Validation
    /// and conflict errors never mutate state.
    async fn record_failure(&self, meeting_id: &str, error: &EngineError) {
        let event = match error {
            EngineError::Validation(_) | EngineError::Conflict(_) | EngineError::NotFound(_) => {
                return;
            }
            EngineError::Llm(LlmError::Quota { provider }) => {
                if let Err(e) = self
                    .store
                    .append_description_note(meeting_id, &format!("[ERROR] {QUOTA_MESSAGE}"))
                    .await
                {
                    log::warn!("could not record quota note on meeting {meeting_id}: {e}");
                }
                MeetingEvent::Error {
                    detail: QUOTA_MESSAGE.to_string(),
                    provider: Some(provider.clone()),
                }
            }
            EngineError::Llm(LlmError::Auth { provider, .. }) => MeetingEvent::Error {
                detail: "LLM authentication failed. Check the configured API key.".to_string(),
                provider: Some(provider.clone()),
            },
            EngineError::Llm(e) => MeetingEvent::Error {
                detail: "Meeting execution failed".to_string(),
                provider: e.provider().map(str::to_string),
            },
            EngineError::Store(e) => {
                log::error!("store failure during meeting {meeting_id}: {e}");
                MeetingEvent::Error { detail: "Meeting execution failed".to_string(), provider: None }
            }
        };

        if let Err(e) = self
            .store
            .update_meeting_status(meeting_id, MeetingStatus::Failed)
            .await
        {
            log::error!("could not mark meeting {meeting_id} failed: {e}");
        }
        self.bus.publish(meeting_id, event.clone()).await;
        self.notify_webhooks(meeting_id, event);
    }

    fn notify_webhooks(&self, meeting_id: &str, event: MeetingEvent) {
        if let Some(webhooks) = self.webhooks.clone() {
            let meeting_id = meeting_id.to_string();
            tokio::spawn(async move {
                webhooks.dispatch(&meeting_id, &event).await;
            });
        }
    }

    /// Run the deterministic extractor over the completed transcript and
    /// persist the artifacts. Failures are logged, never fatal.
    pub async fn auto_extract_artifacts(&self, meeting_id: &str) {
        if let Err(e) = self.extract_artifacts(meeting_id).await {
            log::error!("artifact extraction failed for meeting {meeting_id}: {e}");
        }
    }

    async fn extract_artifacts(&self, meeting_id: &str) -> Result<(), EngineError> {
        let messages = self.store.list_assistant_messages(meeting_id).await?;
        let blocks = artifacts::extract_from_meeting_messages(&messages);
        if blocks.is_empty() {
            return Ok(());
        }

        let requirements = artifacts::generate_requirements(&blocks);
        let mut new_artifacts: Vec<NewArtifact> = blocks
            .into_iter()
            .map(|b| NewArtifact {
                filename: b.suggested_filename,
                language: b.language,
                content: b.content,
                description: format!(
                    "Auto-extracted from {} response",
                    b.source_agent.as_deref().unwrap_or("agent")
                ),
            })
            .collect();
        if !requirements.is_empty() {
            new_artifacts.push(NewArtifact {
                filename: "requirements.txt".to_string(),
                language: "text".to_string(),
                content: requirements,
                description: "Python dependencies detected in extracted code".to_string(),
            });
        }

        self.store.upsert_artifacts(meeting_id, new_artifacts).await?;
        Ok(())
    }
}

/// Reject runs that cannot make progress. Never mutates state.
fn validate_runnable(meeting: &Meeting, options: &RunOptions) -> Result<(), EngineError> {
    meeting.validate()?;
    if options.rounds == 0 {
        return Err(EngineError::validation("rounds must be at least 1"));
    }
    if meeting.status == MeetingStatus::Completed {
        return Err(EngineError::validation("meeting already completed"));
    }
    if meeting.remaining_rounds() == 0 {
        return Err(EngineError::validation("no remaining rounds"));
    }
    Ok(())
}

/// Rebuild the engine's transcript view from persisted messages: agent turns
/// become labeled user entries, human messages get the feedback prefix.
pub fn transcript_to_history(messages: &[MeetingMessage]) -> Vec<ChatMessage> {
    messages
        .iter()
        .map(|msg| {
            if msg.role == ChatRole::User {
                ChatMessage::user(prompts::content_for_user_message(
                    msg.agent_id.as_deref(),
                    msg.agent_name.as_deref(),
                    &msg.content,
                ))
            } else {
                let label = msg.agent_name.as_deref().unwrap_or("Assistant");
                ChatMessage::user(format!("[{label}]: {}", msg.content))
            }
        })
        .collect()
}

struct RunnerHooks {
    store: Arc<dyn MeetingStore>,
    bus: Arc<dyn EventBus>,
    meeting_id: String,
    round: u32,
}

#[async_trait]
impl TurnHooks for RunnerHooks {
    async fn on_agent_start(&self, agent: &Agent) {
        self.bus
            .publish(
                &self.meeting_id,
                MeetingEvent::AgentSpeaking {
                    agent_name: agent.name.clone(),
                    agent_id: Some(agent.id.clone()),
                },
            )
            .await;
    }

    async fn on_agent_done(&self, turn: &TurnMessage) -> Result<(), EngineError> {
        let message = MeetingMessage {
            id: uuid::Uuid::new_v4().to_string(),
            meeting_id: self.meeting_id.clone(),
            agent_id: turn.agent_id.clone(),
            agent_name: Some(turn.agent_name.clone()),
            role: turn.role,
            content: turn.content.clone(),
            round_number: self.round,
            created_at: chrono::Utc::now(),
        };
        self.store
            .insert_message(&message)
            .await
            .map_err(|e: StoreError| EngineError::Store(e))?;
        self.bus
            .publish(
                &self.meeting_id,
                MeetingEvent::Message {
                    id: message.id.clone(),
                    agent_id: message.agent_id.clone(),
                    agent_name: message.agent_name.clone(),
                    role: message.role.as_str().to_string(),
                    content: message.content.clone(),
                    round_number: message.round_number,
                },
            )
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::in_memory::InMemoryBus;
    use crate::llm::testing::ScriptedLlm;
    use crate::models::{OutputType, Team};
    use crate::store::sqlite::SqliteStore;
    use tokio::time::{sleep, Duration};

    struct Fixture {
        _dir: tempfile::TempDir,
        store: Arc<SqliteStore>,
        bus: Arc<InMemoryBus>,
        team: Team,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteStore::open(dir.path().join("runner.db")).unwrap());
        let bus = Arc::new(InMemoryBus::new());
        let team = Team::new("Lab");
        store.create_team(&team).await.unwrap();
        Fixture { _dir: dir, store, bus, team }
    }

    impl Fixture {
        fn runner(&self, llm: Arc<dyn LlmCall>) -> BackgroundRunner {
            BackgroundRunner::new(self.store.clone(), self.bus.clone(), llm)
        }

        async fn add_agent(&self, name: &str, title: &str) -> Agent {
            let agent = Agent::new(&self.team.id, name, title, "", "", "", "gpt-4o");
            self.store.create_agent(&agent).await.unwrap();
            agent
        }

        async fn add_meeting(&self, configure: impl FnOnce(&mut Meeting)) -> Meeting {
            let mut meeting = Meeting::new(&self.team.id, "Meeting");
            configure(&mut meeting);
            self.store.create_meeting(&meeting).await.unwrap();
            meeting
        }
    }

    async fn wait_until_idle(runner: &BackgroundRunner, meeting_id: &str) {
        for _ in 0..200 {
            if !runner.is_running(meeting_id) {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("run did not finish");
    }

    #[tokio::test]
    async fn single_round_code_meeting_event_order() {
        let fx = fixture().await;
        fx.add_agent("Lead", "Team Lead").await;
        fx.add_agent("Engineer", "Software Engineer").await;
        let meeting = fx
            .add_meeting(|m| {
                m.agenda = "Build a parser".to_string();
                m.output_type = OutputType::Code;
                m.max_rounds = 1;
            })
            .await;

        let runner = fx.runner(ScriptedLlm::counting());
        let mut sub = fx.bus.subscribe(&meeting.id).await;
        assert!(runner.start_background(&meeting.id, RunOptions::default()).await.unwrap());
        wait_until_idle(&runner, &meeting.id).await;

        let loaded = fx.store.get_meeting(&meeting.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, MeetingStatus::Completed);
        assert_eq!(loaded.current_round, 1);

        let messages = fx.store.list_assistant_messages(&meeting.id).await.unwrap();
        let speakers: Vec<_> = messages.iter().map(|m| m.agent_name.clone().unwrap()).collect();
        assert_eq!(speakers, vec!["Lead", "Engineer"]);

        let mut types = Vec::new();
        while let Some(event) = sub.try_recv() {
            match &event {
                MeetingEvent::AgentSpeaking { agent_name, .. } => {
                    types.push(format!("agent_speaking({agent_name})"))
                }
                MeetingEvent::Message { agent_name, .. } => {
                    types.push(format!("message({})", agent_name.clone().unwrap()))
                }
                MeetingEvent::RoundComplete { round, total_rounds } => {
                    types.push(format!("round_complete({round},{total_rounds})"))
                }
                MeetingEvent::MeetingComplete { status } => {
                    types.push(format!("meeting_complete({status})"))
                }
                MeetingEvent::Error { .. } => types.push("error".to_string()),
            }
        }
        assert_eq!(
            types,
            vec![
                "agent_speaking(Lead)",
                "message(Lead)",
                "agent_speaking(Engineer)",
                "message(Engineer)",
                "round_complete(1,1)",
                "meeting_complete(completed)",
            ]
        );
    }

    #[tokio::test]
    async fn second_start_returns_false_while_running() {
        let fx = fixture().await;
        fx.add_agent("Lead", "Team Lead").await;
        let meeting = fx
            .add_meeting(|m| {
                m.agenda = "Slow work".to_string();
                m.max_rounds = 3;
            })
            .await;

        // A slow LLM keeps the first worker alive while we race the second.
        let llm = ScriptedLlm::with_script(|i| {
            std::thread::sleep(std::time::Duration::from_millis(50));
            Ok(format!("response {i}"))
        });
        let runner = fx.runner(llm);

        assert!(runner
            .start_background(&meeting.id, RunOptions { rounds: 3, ..Default::default() })
            .await
            .unwrap());
        assert!(!runner
            .start_background(&meeting.id, RunOptions::default())
            .await
            .unwrap());
        assert!(runner.is_running(&meeting.id));
        wait_until_idle(&runner, &meeting.id).await;

        // Finished worker releases the lock; the meeting completed, so a new
        // start is rejected by validation instead.
        let err = runner
            .start_background(&meeting.id, RunOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn partial_run_leaves_pending_and_resumes() {
        let fx = fixture().await;
        fx.add_agent("Lead", "Team Lead").await;
        let meeting = fx
            .add_meeting(|m| {
                m.agenda = "Long agenda".to_string();
                m.max_rounds = 5;
                m.current_round = 2;
            })
            .await;

        let runner = fx.runner(ScriptedLlm::counting());
        runner
            .run_to_completion(&meeting.id, RunOptions { rounds: 2, ..Default::default() })
            .await
            .unwrap();

        let loaded = fx.store.get_meeting(&meeting.id).await.unwrap().unwrap();
        assert_eq!(loaded.current_round, 4);
        assert_eq!(loaded.status, MeetingStatus::Pending);

        // Requested rounds are capped at the remaining budget.
        runner
            .run_to_completion(&meeting.id, RunOptions { rounds: 10, ..Default::default() })
            .await
            .unwrap();
        let loaded = fx.store.get_meeting(&meeting.id).await.unwrap().unwrap();
        assert_eq!(loaded.current_round, 5);
        assert_eq!(loaded.status, MeetingStatus::Completed);
    }

    #[tokio::test]
    async fn completed_meeting_is_rejected_without_state_change() {
        let fx = fixture().await;
        fx.add_agent("Lead", "Team Lead").await;
        let meeting = fx
            .add_meeting(|m| {
                m.status = MeetingStatus::Completed;
                m.max_rounds = 2;
                m.current_round = 2;
            })
            .await;

        let runner = fx.runner(ScriptedLlm::counting());
        let err = runner
            .start_background(&meeting.id, RunOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        let loaded = fx.store.get_meeting(&meeting.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, MeetingStatus::Completed);
        assert_eq!(fx.store.count_messages(&meeting.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn quota_error_fails_meeting_with_actionable_message() {
        let fx = fixture().await;
        fx.add_agent("Lead", "Team Lead").await;
        let meeting = fx
            .add_meeting(|m| {
                m.agenda = "Doomed".to_string();
                m.max_rounds = 1;
            })
            .await;

        let runner = fx.runner(ScriptedLlm::quota());
        let mut sub = fx.bus.subscribe(&meeting.id).await;
        assert!(runner.start_background(&meeting.id, RunOptions::default()).await.unwrap());
        wait_until_idle(&runner, &meeting.id).await;

        let loaded = fx.store.get_meeting(&meeting.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, MeetingStatus::Failed);
        assert!(loaded.description.contains(QUOTA_MESSAGE));

        let mut saw_error = false;
        while let Some(event) = sub.try_recv() {
            if let MeetingEvent::Error { detail, provider } = event {
                assert_eq!(detail, QUOTA_MESSAGE);
                assert_eq!(provider.as_deref(), Some("openai"));
                saw_error = true;
            }
        }
        assert!(saw_error);
    }

    #[tokio::test]
    async fn fatal_llm_error_fails_meeting_generically() {
        let fx = fixture().await;
        fx.add_agent("Lead", "Team Lead").await;
        let meeting = fx
            .add_meeting(|m| {
                m.agenda = "Doomed".to_string();
                m.max_rounds = 1;
            })
            .await;

        let runner = fx.runner(ScriptedLlm::failing());
        let err = runner
            .run_to_completion(&meeting.id, RunOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Llm(_)));

        let loaded = fx.store.get_meeting(&meeting.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, MeetingStatus::Failed);
    }

    #[tokio::test]
    async fn startup_sweep_fails_orphaned_running_meetings() {
        let fx = fixture().await;
        fx.add_agent("Lead", "Team Lead").await;
        let meeting = fx
            .add_meeting(|m| {
                m.agenda = "Interrupted".to_string();
                m.status = MeetingStatus::Running;
                m.max_rounds = 5;
                m.current_round = 2;
            })
            .await;

        let runner = fx.runner(ScriptedLlm::counting());
        assert_eq!(runner.cleanup_stuck_meetings().await, 1);

        let loaded = fx.store.get_meeting(&meeting.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, MeetingStatus::Failed);

        // A fresh run picks up from round 3 and finishes 3..5.
        runner
            .run_to_completion(&meeting.id, RunOptions { rounds: 3, ..Default::default() })
            .await
            .unwrap();
        let loaded = fx.store.get_meeting(&meeting.id).await.unwrap().unwrap();
        assert_eq!(loaded.current_round, 5);
        assert_eq!(loaded.status, MeetingStatus::Completed);
    }

    #[tokio::test]
    async fn cancellation_leaves_pending_without_terminal_event() {
        let fx = fixture().await;
        fx.add_agent("Lead", "Team Lead").await;
        fx.add_agent("Bea", "Biologist").await;
        let meeting = fx
            .add_meeting(|m| {
                m.agenda = "Slow".to_string();
                m.max_rounds = 4;
            })
            .await;

        let llm = ScriptedLlm::with_script(|i| {
            std::thread::sleep(std::time::Duration::from_millis(40));
            Ok(format!("response {i}"))
        });
        let runner = fx.runner(llm);
        let mut sub = fx.bus.subscribe(&meeting.id).await;

        assert!(runner
            .start_background(&meeting.id, RunOptions { rounds: 4, ..Default::default() })
            .await
            .unwrap());
        sleep(Duration::from_millis(20)).await;
        assert!(runner.request_cancel(&meeting.id));
        wait_until_idle(&runner, &meeting.id).await;

        let loaded = fx.store.get_meeting(&meeting.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, MeetingStatus::Pending);
        assert!(loaded.current_round < 4);

        while let Some(event) = sub.try_recv() {
            assert!(!matches!(event, MeetingEvent::MeetingComplete { .. }));
        }
    }

    #[tokio::test]
    async fn participant_restriction_filters_the_pool() {
        let fx = fixture().await;
        let lead = fx.add_agent("Lead", "Team Lead").await;
        fx.add_agent("Excluded", "Biologist").await;
        let included = fx.add_agent("Included", "Chemist").await;
        let meeting = fx
            .add_meeting(|m| {
                m.agenda = "Restricted".to_string();
                m.max_rounds = 1;
                m.participant_agent_ids = vec![lead.id.clone(), included.id.clone()];
            })
            .await;

        let runner = fx.runner(ScriptedLlm::counting());
        runner.run_to_completion(&meeting.id, RunOptions::default()).await.unwrap();

        let messages = fx.store.list_assistant_messages(&meeting.id).await.unwrap();
        let speakers: Vec<_> = messages.iter().map(|m| m.agent_name.clone().unwrap()).collect();
        assert_eq!(speakers, vec!["Lead", "Included"]);
    }

    #[tokio::test]
    async fn mirrors_are_excluded_from_the_default_pool() {
        let fx = fixture().await;
        let lead = fx.add_agent("Lead", "Team Lead").await;
        let mut mirror = Agent::new(&fx.team.id, "Shadow", "", "", "", "", "claude-sonnet-4-5");
        mirror.is_mirror = true;
        mirror.primary_agent_id = Some(lead.id.clone());
        fx.store.create_agent(&mirror).await.unwrap();
        let meeting = fx
            .add_meeting(|m| {
                m.agenda = "No mirrors".to_string();
                m.max_rounds = 1;
            })
            .await;

        let runner = fx.runner(ScriptedLlm::counting());
        runner.run_to_completion(&meeting.id, RunOptions::default()).await.unwrap();

        let messages = fx.store.list_assistant_messages(&meeting.id).await.unwrap();
        assert!(messages.iter().all(|m| m.agent_name.as_deref() != Some("Shadow")));
    }

    #[tokio::test]
    async fn individual_meeting_runs_agent_and_critic() {
        let fx = fixture().await;
        let dr_x = fx.add_agent("Dr. X", "Geneticist").await;
        let meeting = fx
            .add_meeting(|m| {
                m.agenda = "Solo investigation".to_string();
                m.meeting_type = MeetingType::Individual;
                m.individual_agent_id = Some(dr_x.id.clone());
                m.max_rounds = 3;
            })
            .await;

        let runner = fx.runner(ScriptedLlm::counting());
        runner
            .run_to_completion(&meeting.id, RunOptions { rounds: 3, ..Default::default() })
            .await
            .unwrap();

        let messages = fx.store.list_assistant_messages(&meeting.id).await.unwrap();
        let speakers: Vec<_> = messages.iter().map(|m| m.agent_name.clone().unwrap()).collect();
        assert_eq!(
            speakers,
            vec!["Dr. X", "Scientific Critic", "Dr. X", "Scientific Critic", "Dr. X"]
        );
    }

    #[tokio::test]
    async fn merge_meeting_injects_source_outputs() {
        let fx = fixture().await;
        fx.add_agent("Lead", "Team Lead").await;

        let mut source_ids = Vec::new();
        for content in ["A", "B"] {
            let source = fx
                .add_meeting(|m| {
                    m.status = MeetingStatus::Completed;
                    m.max_rounds = 1;
                    m.current_round = 1;
                })
                .await;
            fx.store
                .insert_message(&MeetingMessage::assistant(&source.id, "a", "Lead", content, 1))
                .await
                .unwrap();
            source_ids.push(source.id);
        }

        let merge = fx
            .add_meeting(|m| {
                m.agenda = "Merge the runs".to_string();
                m.meeting_type = MeetingType::Merge;
                m.source_meeting_ids = source_ids;
                m.max_rounds = 1;
            })
            .await;

        let llm = ScriptedLlm::counting();
        let runner = fx.runner(llm.clone());
        runner.run_to_completion(&merge.id, RunOptions::default()).await.unwrap();

        let lead_call = llm.calls().into_iter().next().unwrap();
        let context = lead_call
            .messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        assert!(context.contains("[begin summary 1]"));
        assert!(context.contains('A'));
        assert!(context.contains("[end summary 1]"));
        assert!(context.contains("[begin summary 2]"));
        assert!(context.contains('B'));
        assert!(context.contains("[end summary 2]"));
    }

    #[tokio::test]
    async fn human_feedback_is_prefixed_in_later_prompts() {
        let fx = fixture().await;
        fx.add_agent("Lead", "Team Lead").await;
        let meeting = fx
            .add_meeting(|m| {
                m.agenda = "Iterate".to_string();
                m.max_rounds = 2;
            })
            .await;

        let llm = ScriptedLlm::counting();
        let runner = fx.runner(llm.clone());
        runner.run_to_completion(&meeting.id, RunOptions::default()).await.unwrap();

        fx.store
            .insert_message(&MeetingMessage::from_user(&meeting.id, "focus on memory safety", 1))
            .await
            .unwrap();

        runner.run_to_completion(&meeting.id, RunOptions::default()).await.unwrap();

        let second_run_call = llm.calls().into_iter().last().unwrap();
        assert!(second_run_call.messages.iter().any(|m| m
            .content
            .contains(&format!("{}focus on memory safety", prompts::HUMAN_FEEDBACK_PREFIX))));
    }

    #[tokio::test]
    async fn artifacts_extracted_on_completion() {
        let fx = fixture().await;
        fx.add_agent("Lead", "Team Lead").await;
        let meeting = fx
            .add_meeting(|m| {
                m.agenda = "Produce code".to_string();
                m.output_type = OutputType::Code;
                m.max_rounds = 1;
            })
            .await;

        let llm = ScriptedLlm::with_script(|_| {
            Ok("# filename: src/app.py\n```python\nimport numpy\nprint('hi')\n```".to_string())
        });
        let runner = fx.runner(llm);
        runner.run_to_completion(&meeting.id, RunOptions::default()).await.unwrap();

        let artifacts = fx.store.list_artifacts(&meeting.id).await.unwrap();
        let names: Vec<_> = artifacts.iter().map(|a| a.filename.as_str()).collect();
        assert!(names.contains(&"src/app.py"));
        assert!(names.contains(&"requirements.txt"));
        let reqs = artifacts.iter().find(|a| a.filename == "requirements.txt").unwrap();
        assert_eq!(reqs.content, "numpy");

        let app = artifacts.iter().find(|a| a.filename == "src/app.py").unwrap();
        assert_eq!(app.language, "python");
        assert!(app.description.contains("Lead"));
    }

    #[tokio::test]
    async fn stdlib_only_code_produces_no_requirements_artifact() {
        let fx = fixture().await;
        fx.add_agent("Lead", "Team Lead").await;
        let meeting = fx
            .add_meeting(|m| {
                m.agenda = "Produce code".to_string();
                m.output_type = OutputType::Code;
                m.max_rounds = 1;
            })
            .await;

        let llm = ScriptedLlm::with_script(|_| {
            Ok("# filename: app.py\n```python\nimport os\nprint(os.getcwd())\n```".to_string())
        });
        let runner = fx.runner(llm);
        runner.run_to_completion(&meeting.id, RunOptions::default()).await.unwrap();

        let artifacts = fx.store.list_artifacts(&meeting.id).await.unwrap();
        let names: Vec<_> = artifacts.iter().map(|a| a.filename.as_str()).collect();
        assert_eq!(names, vec!["app.py"]);
    }

    #[tokio::test]
    async fn no_agents_is_a_validation_error() {
        let fx = fixture().await;
        let meeting = fx
            .add_meeting(|m| {
                m.agenda = "Empty team".to_string();
                m.max_rounds = 1;
            })
            .await;

        let runner = fx.runner(ScriptedLlm::counting());
        let err = runner
            .run_to_completion(&meeting.id, RunOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }
}
