//! Meeting execution engine.
//!
//! Runs a meeting as a finite sequence of rounds. Two modes:
//!
//! - **Structured** (agenda present): the Team Lead drives the discussion
//!   with phase-aware prompts — initial proposal, mid-meeting synthesis,
//!   final structured output. Members respond each non-final round; a critic,
//!   when present, reviews at the end of each non-final round; in code
//!   meetings the integrator consolidates before the lead's final output.
//! - **Legacy** (no agenda): plain round-robin, every agent speaks each round.
//!
//! Individual meetings pair one agent with a synthetic critic; merge
//! meetings synthesize the outputs of prior meetings injected as bracketed
//! summaries.
//!
//! The engine never touches the store or the bus: per-turn side effects go
//! through the injected [`TurnHooks`], which keeps the same engine usable by
//! the synchronous surface and the background runner alike.

pub mod agenda;
pub mod artifacts;
pub mod context;
pub mod prompts;
pub mod roles;
pub mod summary;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::error::EngineError;
use crate::llm::LlmCall;
use crate::models::{Agent, ChatMessage, ChatRole, OutputType, RoundPlan};

use context::ContextSummary;

/// One agent turn's output, before persistence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnMessage {
    pub agent_id: Option<String>,
    pub agent_name: String,
    pub role: ChatRole,
    pub content: String,
}

/// The agenda-derived parameters of a structured meeting.
#[derive(Debug, Clone, Default)]
pub struct MeetingSpec {
    pub agenda: String,
    pub agenda_questions: Vec<String>,
    pub agenda_rules: Vec<String>,
    pub output_type: OutputType,
    pub preferred_lang: Option<String>,
    pub round_plans: Vec<RoundPlan>,
}

impl MeetingSpec {
    /// Rules in effect: the user's, or the output type's defaults when the
    /// user supplied none.
    pub fn effective_rules(&self) -> Vec<String> {
        if self.agenda_rules.is_empty() {
            prompts::default_rules(self.output_type)
        } else {
            self.agenda_rules.clone()
        }
    }

    fn round_goal(&self, round: u32) -> Option<&str> {
        self.round_plans
            .iter()
            .find(|p| p.round == round)
            .and_then(|p| p.goal.as_deref())
    }
}

/// Result of one engine round.
#[derive(Debug, Default)]
pub struct RoundOutcome {
    pub messages: Vec<TurnMessage>,
    /// Set when a cancellation signal stopped the round at a turn boundary;
    /// messages produced before the signal are still included (and were
    /// already passed to the hooks).
    pub cancelled: bool,
}

/// Per-turn side effects, injected by the caller. The background runner uses
/// these to persist and publish; the engine itself stays store- and
/// bus-agnostic.
#[async_trait]
pub trait TurnHooks: Send + Sync {
    /// Called before the speaker's LLM call is dispatched.
    async fn on_agent_start(&self, _agent: &Agent) {}

    /// Called with the finished turn. An error here aborts the round (the
    /// turn could not be persisted).
    async fn on_agent_done(&self, _message: &TurnMessage) -> Result<(), EngineError> {
        Ok(())
    }
}

/// Hooks that do nothing; used by callers that collect the returned messages
/// themselves.
pub struct NoHooks;

#[async_trait]
impl TurnHooks for NoHooks {}

fn is_cancelled(cancel: Option<&watch::Receiver<bool>>) -> bool {
    cancel.map(|c| *c.borrow()).unwrap_or(false)
}

/// Append a finished turn to the shared transcript so later speakers see it.
fn push_turn_to_history(history: &mut Vec<ChatMessage>, turn: &TurnMessage) {
    history.push(ChatMessage::user(format!("[{}]: {}", turn.agent_name, turn.content)));
}

/// The synthetic critic paired with an agent in individual meetings. Its id
/// is stable per team so messages across rounds share one attribution.
pub fn synthetic_critic(team_id: &str, model: &str) -> Agent {
    let mut critic = Agent::new(
        team_id,
        "Scientific Critic",
        "Scientific Critic",
        "critical evaluation of scientific and technical work",
        "hold every claim to a high standard of evidence",
        "critic",
        model,
    );
    critic.id = format!("{team_id}:scientific-critic");
    critic
}

/// How round 1 of a phase-driven meeting is opened.
enum StartKind<'a> {
    Team,
    Individual,
    Merge { source_summaries: &'a [ContextSummary] },
}

/// Orchestrates multi-agent meeting conversations against an injected LLM
/// capability.
pub struct MeetingEngine {
    llm: Arc<dyn LlmCall>,
}

impl MeetingEngine {
    pub fn new(llm: Arc<dyn LlmCall>) -> Self {
        Self { llm }
    }

    /// Execute one speaker turn: hook, LLM call, hook, shared-history update.
    async fn take_turn(
        &self,
        agent: &Agent,
        history: &mut Vec<ChatMessage>,
        turn_prompt: String,
        system_prompt: &str,
        temperature: f64,
        hooks: &dyn TurnHooks,
    ) -> Result<TurnMessage, EngineError> {
        hooks.on_agent_start(agent).await;

        let mut call_messages = history.clone();
        call_messages.push(ChatMessage::user(turn_prompt));

        let content = self
            .llm
            .call(system_prompt, &call_messages, &agent.model, temperature)
            .await?;

        let turn = TurnMessage {
            agent_id: Some(agent.id.clone()),
            agent_name: agent.name.clone(),
            role: ChatRole::Assistant,
            content,
        };
        hooks.on_agent_done(&turn).await?;
        push_turn_to_history(history, &turn);
        Ok(turn)
    }

    // ------------------------------------------------------------------
    // Legacy mode (no agenda): round-robin
    // ------------------------------------------------------------------

    /// One legacy round: every agent speaks once, in the given order.
    pub async fn run_round(
        &self,
        agents: &[Agent],
        history: &mut Vec<ChatMessage>,
        topic: Option<&str>,
        preferred_lang: Option<&str>,
        hooks: &dyn TurnHooks,
        cancel: Option<&watch::Receiver<bool>>,
    ) -> Result<RoundOutcome, EngineError> {
        let mut outcome = RoundOutcome::default();

        if history.is_empty() {
            if let Some(topic) = topic {
                let mut opener = format!("Discussion topic: {topic}");
                if let Some(lang) = preferred_lang {
                    opener.push_str(&format!("\nRespond in {lang}."));
                }
                history.push(ChatMessage::user(opener));
            }
        }

        for agent in agents {
            if is_cancelled(cancel) {
                outcome.cancelled = true;
                return Ok(outcome);
            }
            let turn = self
                .take_turn(
                    agent,
                    history,
                    format!(
                        "{}, share your perspective on the discussion so far.",
                        agent.name
                    ),
                    &agent.system_prompt,
                    prompts::phase_temperature(1, 1),
                    hooks,
                )
                .await?;
            outcome.messages.push(turn);
        }

        Ok(outcome)
    }

    /// Multiple legacy rounds; the topic is injected only once.
    pub async fn run_meeting(
        &self,
        agents: &[Agent],
        history: &mut Vec<ChatMessage>,
        rounds: u32,
        topic: Option<&str>,
        preferred_lang: Option<&str>,
        hooks: &dyn TurnHooks,
        cancel: Option<&watch::Receiver<bool>>,
    ) -> Result<Vec<RoundOutcome>, EngineError> {
        let mut all_rounds = Vec::new();
        for i in 0..rounds {
            let topic = if i == 0 { topic } else { None };
            let lang = if i == 0 { preferred_lang } else { None };
            let outcome = self
                .run_round(agents, history, topic, lang, hooks, cancel)
                .await?;
            let cancelled = outcome.cancelled;
            all_rounds.push(outcome);
            if cancelled {
                break;
            }
        }
        Ok(all_rounds)
    }

    // ------------------------------------------------------------------
    // Structured mode
    // ------------------------------------------------------------------

    /// One structured round with phase-aware prompts.
    ///
    /// Round 1: lead proposes, members respond, critic reviews. Middle
    /// rounds: lead synthesizes, members respond, critic reviews. Final
    /// round: integrator consolidation (code meetings) then lead only.
    #[allow(clippy::too_many_arguments)]
    pub async fn run_structured_round(
        &self,
        agents: &[Agent],
        history: &mut Vec<ChatMessage>,
        round_num: u32,
        num_rounds: u32,
        spec: &MeetingSpec,
        context_summaries: Option<&[ContextSummary]>,
        hooks: &dyn TurnHooks,
        cancel: Option<&watch::Receiver<bool>>,
    ) -> Result<RoundOutcome, EngineError> {
        let Some((lead, members, critic)) = roles::sort_agents_for_meeting(agents) else {
            return Ok(RoundOutcome::default());
        };
        self.run_phase_round(
            &lead,
            &members,
            critic.as_ref(),
            history,
            round_num,
            num_rounds,
            spec,
            context_summaries,
            StartKind::Team,
            hooks,
            cancel,
        )
        .await
    }

    /// A full structured meeting from `start_round`, `rounds` rounds long.
    /// Context summaries are injected only at the first executed round.
    #[allow(clippy::too_many_arguments)]
    pub async fn run_structured_meeting(
        &self,
        agents: &[Agent],
        history: &mut Vec<ChatMessage>,
        rounds: u32,
        start_round: u32,
        spec: &MeetingSpec,
        context_summaries: Option<&[ContextSummary]>,
        hooks: &dyn TurnHooks,
        cancel: Option<&watch::Receiver<bool>>,
    ) -> Result<Vec<RoundOutcome>, EngineError> {
        let total_rounds = start_round + rounds - 1;
        let mut all_rounds = Vec::new();
        for i in 0..rounds {
            let current = start_round + i;
            let ctx = if i == 0 { context_summaries } else { None };
            let outcome = self
                .run_structured_round(
                    agents, history, current, total_rounds, spec, ctx, hooks, cancel,
                )
                .await?;
            let cancelled = outcome.cancelled;
            all_rounds.push(outcome);
            if cancelled {
                break;
            }
        }
        Ok(all_rounds)
    }

    /// One round of an individual meeting: the chosen agent in dialogue with
    /// a synthetic critic. Non-final rounds are (agent, critic); the final
    /// round is the agent alone.
    #[allow(clippy::too_many_arguments)]
    pub async fn run_individual_round(
        &self,
        agent: &Agent,
        history: &mut Vec<ChatMessage>,
        round_num: u32,
        num_rounds: u32,
        spec: &MeetingSpec,
        context_summaries: Option<&[ContextSummary]>,
        hooks: &dyn TurnHooks,
        cancel: Option<&watch::Receiver<bool>>,
    ) -> Result<RoundOutcome, EngineError> {
        let critic = synthetic_critic(&agent.team_id, &agent.model);
        self.run_phase_round(
            agent,
            &[],
            Some(&critic),
            history,
            round_num,
            num_rounds,
            spec,
            context_summaries,
            StartKind::Individual,
            hooks,
            cancel,
        )
        .await
    }

    /// A full individual meeting from `start_round`.
    #[allow(clippy::too_many_arguments)]
    pub async fn run_individual_meeting(
        &self,
        agent: &Agent,
        history: &mut Vec<ChatMessage>,
        rounds: u32,
        start_round: u32,
        spec: &MeetingSpec,
        context_summaries: Option<&[ContextSummary]>,
        hooks: &dyn TurnHooks,
        cancel: Option<&watch::Receiver<bool>>,
    ) -> Result<Vec<RoundOutcome>, EngineError> {
        let total_rounds = start_round + rounds - 1;
        let mut all_rounds = Vec::new();
        for i in 0..rounds {
            let current = start_round + i;
            let ctx = if i == 0 { context_summaries } else { None };
            let outcome = self
                .run_individual_round(
                    agent, history, current, total_rounds, spec, ctx, hooks, cancel,
                )
                .await?;
            let cancelled = outcome.cancelled;
            all_rounds.push(outcome);
            if cancelled {
                break;
            }
        }
        Ok(all_rounds)
    }

    /// One round of a merge meeting: the lead synthesizes the source
    /// meetings' outputs, injected as bracketed summaries; members may
    /// comment in non-final rounds.
    #[allow(clippy::too_many_arguments)]
    pub async fn run_merge_round(
        &self,
        agents: &[Agent],
        history: &mut Vec<ChatMessage>,
        round_num: u32,
        num_rounds: u32,
        spec: &MeetingSpec,
        source_summaries: &[ContextSummary],
        hooks: &dyn TurnHooks,
        cancel: Option<&watch::Receiver<bool>>,
    ) -> Result<RoundOutcome, EngineError> {
        let Some((lead, members, critic)) = roles::sort_agents_for_meeting(agents) else {
            return Ok(RoundOutcome::default());
        };
        self.run_phase_round(
            &lead,
            &members,
            critic.as_ref(),
            history,
            round_num,
            num_rounds,
            spec,
            None,
            StartKind::Merge { source_summaries },
            hooks,
            cancel,
        )
        .await
    }

    /// A full merge meeting from `start_round`.
    #[allow(clippy::too_many_arguments)]
    pub async fn run_merge_meeting(
        &self,
        agents: &[Agent],
        history: &mut Vec<ChatMessage>,
        rounds: u32,
        start_round: u32,
        spec: &MeetingSpec,
        source_summaries: &[ContextSummary],
        hooks: &dyn TurnHooks,
        cancel: Option<&watch::Receiver<bool>>,
    ) -> Result<Vec<RoundOutcome>, EngineError> {
        let total_rounds = start_round + rounds - 1;
        let mut all_rounds = Vec::new();
        for i in 0..rounds {
            let current = start_round + i;
            let outcome = self
                .run_merge_round(
                    agents,
                    history,
                    current,
                    total_rounds,
                    spec,
                    source_summaries,
                    hooks,
                    cancel,
                )
                .await?;
            let cancelled = outcome.cancelled;
            all_rounds.push(outcome);
            if cancelled {
                break;
            }
        }
        Ok(all_rounds)
    }

    /// Shared round body for structured, individual, and merge meetings.
    #[allow(clippy::too_many_arguments)]
    async fn run_phase_round(
        &self,
        lead: &Agent,
        members: &[Agent],
        critic: Option<&Agent>,
        history: &mut Vec<ChatMessage>,
        round_num: u32,
        num_rounds: u32,
        spec: &MeetingSpec,
        context_summaries: Option<&[ContextSummary]>,
        start: StartKind<'_>,
        hooks: &dyn TurnHooks,
        cancel: Option<&watch::Receiver<bool>>,
    ) -> Result<RoundOutcome, EngineError> {
        let rules = spec.effective_rules();
        let mut outcome = RoundOutcome::default();

        // Round 1 injections: prior-meeting context, then the start prompt.
        if round_num == 1 {
            let summaries = match &start {
                StartKind::Merge { source_summaries } => Some(*source_summaries),
                _ => context_summaries,
            };
            if let Some(summaries) = summaries {
                if let Some(ctx_prompt) = prompts::previous_context_prompt(summaries) {
                    history.push(ChatMessage::user(ctx_prompt));
                }
            }

            let member_names: Vec<String> = members.iter().map(|m| m.name.clone()).collect();
            let start_prompt = match &start {
                StartKind::Individual => prompts::individual_meeting_start_prompt(
                    &lead.name,
                    critic.map(|c| c.name.as_str()).unwrap_or("the critic"),
                    &spec.agenda,
                    &spec.agenda_questions,
                    &rules,
                    num_rounds,
                    spec.preferred_lang.as_deref(),
                ),
                _ => prompts::meeting_start_prompt(
                    &lead.name,
                    &member_names,
                    &spec.agenda,
                    &spec.agenda_questions,
                    &rules,
                    num_rounds,
                    spec.preferred_lang.as_deref(),
                    critic.map(|c| c.name.as_str()),
                ),
            };
            history.push(ChatMessage::user(start_prompt));
        }

        let lead_system = prompts::system_prompt_for(lead, spec.output_type);

        // Final round (multi-round meetings): consolidation, then lead only.
        if round_num >= num_rounds && num_rounds > 1 {
            if spec.output_type == OutputType::Code {
                let integrator = roles::detect_integrator(lead, members, critic);
                if integrator.id != lead.id {
                    if is_cancelled(cancel) {
                        outcome.cancelled = true;
                        return Ok(outcome);
                    }
                    let turn = self
                        .take_turn(
                            integrator,
                            history,
                            prompts::integrator_prompt(&integrator.name),
                            &prompts::system_prompt_for(integrator, spec.output_type),
                            prompts::phase_temperature(round_num, num_rounds),
                            hooks,
                        )
                        .await?;
                    outcome.messages.push(turn);
                }
            }

            if is_cancelled(cancel) {
                outcome.cancelled = true;
                return Ok(outcome);
            }
            let final_prompt = prompts::team_lead_final_prompt(
                &lead.name,
                &spec.agenda,
                &spec.agenda_questions,
                &rules,
                spec.output_type,
            );
            let turn = self
                .take_turn(
                    lead,
                    history,
                    final_prompt,
                    &lead_system,
                    prompts::phase_temperature(round_num, num_rounds),
                    hooks,
                )
                .await?;
            outcome.messages.push(turn);
            return Ok(outcome);
        }

        // Non-final rounds: lead, members, critic.
        if is_cancelled(cancel) {
            outcome.cancelled = true;
            return Ok(outcome);
        }

        let mut lead_prompt = match &start {
            StartKind::Merge { source_summaries } if round_num == 1 => {
                prompts::merge_meeting_prompt(&lead.name, source_summaries.len())
            }
            _ if round_num == 1 => prompts::team_lead_initial_prompt(&lead.name),
            _ => prompts::team_lead_synthesis_prompt(&lead.name, round_num, num_rounds),
        };
        if let Some(goal) = spec.round_goal(round_num) {
            lead_prompt.push_str(&format!("\nThis round's goal: {goal}"));
        }

        let turn = self
            .take_turn(
                lead,
                history,
                lead_prompt,
                &lead_system,
                prompts::phase_temperature(round_num, num_rounds),
                hooks,
            )
            .await?;
        outcome.messages.push(turn);

        for member in members {
            if is_cancelled(cancel) {
                outcome.cancelled = true;
                return Ok(outcome);
            }
            let turn = self
                .take_turn(
                    member,
                    history,
                    prompts::team_member_prompt(&member.name, round_num, num_rounds),
                    &prompts::system_prompt_for(member, spec.output_type),
                    prompts::phase_temperature(round_num, num_rounds),
                    hooks,
                )
                .await?;
            outcome.messages.push(turn);
        }

        if let Some(critic) = critic {
            if is_cancelled(cancel) {
                outcome.cancelled = true;
                return Ok(outcome);
            }
            let turn = self
                .take_turn(
                    critic,
                    history,
                    prompts::critic_prompt(&critic.name, round_num, num_rounds),
                    &prompts::system_prompt_for(critic, spec.output_type),
                    prompts::phase_temperature(round_num, num_rounds),
                    hooks,
                )
                .await?;
            outcome.messages.push(turn);
        }

        Ok(outcome)
    }
}
