//! LLM-assisted agenda drafting for the `ai_auto` strategy.
//!
//! The model is asked for a strict JSON object; decoding is schema-driven
//! with documented fallbacks — a missing `suggested_rounds` defaults to 3
//! and any value is clamped into 1..=10.

use std::sync::Arc;

use serde::Deserialize;

use crate::error::EngineError;
use crate::llm::LlmCall;
use crate::models::{Agent, ChatMessage};

/// Default round count when the model omits or mangles `suggested_rounds`.
pub const DEFAULT_SUGGESTED_ROUNDS: u32 = 3;

/// Bounds applied to `suggested_rounds`.
pub const SUGGESTED_ROUNDS_RANGE: (u32, u32) = (1, 10);

/// A drafted agenda ready to apply to a meeting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgendaProposal {
    pub agenda: String,
    pub questions: Vec<String>,
    pub rules: Vec<String>,
    pub suggested_rounds: u32,
}

#[derive(Debug, Deserialize)]
struct RawProposal {
    agenda: String,
    #[serde(default)]
    questions: Vec<String>,
    #[serde(default)]
    rules: Vec<String>,
    #[serde(default)]
    suggested_rounds: Option<i64>,
}

fn clamp_rounds(value: Option<i64>) -> u32 {
    let (lo, hi) = SUGGESTED_ROUNDS_RANGE;
    match value {
        Some(v) if v >= lo as i64 => (v as u64).min(hi as u64) as u32,
        Some(_) => lo,
        None => DEFAULT_SUGGESTED_ROUNDS,
    }
}

/// Pull the first JSON object out of a model response that may wrap it in a
/// fenced block or surrounding prose.
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end > start {
        Some(&text[start..=end])
    } else {
        None
    }
}

/// Parse a model response into a proposal.
pub fn parse_agenda_response(text: &str) -> Result<AgendaProposal, EngineError> {
    let json = extract_json_object(text)
        .ok_or_else(|| EngineError::validation("agenda response contained no JSON object"))?;
    let raw: RawProposal = serde_json::from_str(json)
        .map_err(|e| EngineError::validation(format!("malformed agenda JSON: {e}")))?;
    if raw.agenda.trim().is_empty() {
        return Err(EngineError::validation("agenda response had an empty agenda"));
    }
    Ok(AgendaProposal {
        agenda: raw.agenda.trim().to_string(),
        questions: raw.questions,
        rules: raw.rules,
        suggested_rounds: clamp_rounds(raw.suggested_rounds),
    })
}

/// Ask the LLM to draft an agenda for a topic, grounded in the team roster.
pub async fn propose_agenda(
    llm: Arc<dyn LlmCall>,
    agents: &[Agent],
    topic: &str,
    model: &str,
) -> Result<AgendaProposal, EngineError> {
    let roster = agents
        .iter()
        .map(|a| {
            if a.title.is_empty() {
                a.name.clone()
            } else {
                format!("{} ({})", a.name, a.title)
            }
        })
        .collect::<Vec<_>>()
        .join(", ");

    let system = "You design meeting agendas for teams of AI agents. Respond with a single \
                  JSON object and nothing else: {\"agenda\": string, \"questions\": [string], \
                  \"rules\": [string], \"suggested_rounds\": integer}.";
    let user = format!("Team: {roster}\n\nDraft a meeting agenda for this topic: {topic}");

    let response = llm
        .call(system, &[ChatMessage::user(user)], model, 0.4)
        .await?;
    parse_agenda_response(&response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_json() {
        let proposal = parse_agenda_response(
            r#"{"agenda": "Plan the study", "questions": ["Q1"], "rules": ["R1"], "suggested_rounds": 4}"#,
        )
        .unwrap();
        assert_eq!(proposal.agenda, "Plan the study");
        assert_eq!(proposal.questions, vec!["Q1"]);
        assert_eq!(proposal.rules, vec!["R1"]);
        assert_eq!(proposal.suggested_rounds, 4);
    }

    #[test]
    fn parses_fenced_json_with_prose() {
        let text = "Here you go:\n```json\n{\"agenda\": \"Do the thing\"}\n```\nHope that helps.";
        let proposal = parse_agenda_response(text).unwrap();
        assert_eq!(proposal.agenda, "Do the thing");
        assert!(proposal.questions.is_empty());
        assert_eq!(proposal.suggested_rounds, DEFAULT_SUGGESTED_ROUNDS);
    }

    #[test]
    fn clamps_suggested_rounds() {
        let low = parse_agenda_response(r#"{"agenda": "a", "suggested_rounds": 0}"#).unwrap();
        assert_eq!(low.suggested_rounds, 1);
        let high = parse_agenda_response(r#"{"agenda": "a", "suggested_rounds": 50}"#).unwrap();
        assert_eq!(high.suggested_rounds, 10);
        let negative = parse_agenda_response(r#"{"agenda": "a", "suggested_rounds": -2}"#).unwrap();
        assert_eq!(negative.suggested_rounds, 1);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_agenda_response("no json here").is_err());
        assert!(parse_agenda_response(r#"{"agenda": ""}"#).is_err());
        assert!(parse_agenda_response(r#"{"questions": []}"#).is_err());
    }
}
