//! Meeting summaries: heuristic key points plus optional LLM summarization.
//!
//! The LLM path asks for two labeled sections (`SUMMARY:` then
//! `KEY_POINTS:`) and parses them leniently; when no LLM is available the
//! heuristic key points stand alone. Merge meetings and the summary endpoint
//! both go through here.

use std::collections::HashSet;
use std::sync::Arc;

use crate::llm::LlmCall;
use crate::models::{ChatMessage, ChatRole, Meeting, MeetingMessage};

/// Transcript excerpts longer than this are truncated before summarization.
const MAX_TRANSCRIPT_CHARS: usize = 12_000;

/// A generated meeting summary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MeetingSummary {
    pub summary_text: Option<String>,
    pub key_points: Vec<String>,
}

/// Parse an LLM response containing `SUMMARY:` and `KEY_POINTS:` sections.
/// Either section may be missing; bullets may or may not carry a leading `-`.
pub fn parse_summary_response(text: &str) -> (Option<String>, Vec<String>) {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return (None, Vec::new());
    }

    let upper = trimmed.to_uppercase();
    let summary_start = upper.find("SUMMARY:");
    let kp_start = upper.find("KEY_POINTS:");

    let summary_text = summary_start.map(|start| {
        let body_start = start + "SUMMARY:".len();
        let end = kp_start.filter(|&kp| kp > body_start).unwrap_or(trimmed.len());
        trimmed[body_start..end].trim().to_string()
    });

    let mut key_points = Vec::new();
    if let Some(start) = kp_start {
        let block = &trimmed[start + "KEY_POINTS:".len()..];
        for line in block.lines() {
            let line = line.trim().trim_start_matches('-').trim();
            if !line.is_empty() {
                key_points.push(line.to_string());
            }
        }
    }

    (summary_text.filter(|s| !s.is_empty()), key_points)
}

/// Heuristic key points: the first sentence of each assistant message,
/// skipping code and headings, deduplicated, length-bounded, attributed to
/// the speaking agent.
pub fn key_points_from_messages(messages: &[MeetingMessage]) -> Vec<String> {
    let mut key_points = Vec::new();
    let mut seen = HashSet::new();

    for m in messages {
        if m.role != ChatRole::Assistant || m.content.is_empty() {
            continue;
        }
        let first_line = m.content.trim().lines().next().unwrap_or("").trim();
        let first_sentence = m.content.split('.').next().unwrap_or("").trim();
        if first_sentence.starts_with("```")
            || first_sentence.starts_with('#')
            || first_line.starts_with("```")
            || first_line.starts_with('#')
        {
            continue;
        }
        if first_sentence.len() < 15 || first_sentence.len() > 300 {
            continue;
        }
        if !seen.insert(first_sentence.to_string()) {
            continue;
        }
        let agent = m.agent_name.as_deref().unwrap_or("Agent");
        key_points.push(format!("[{agent}] {first_sentence}"));
    }

    key_points
}

/// Generate a summary for a meeting: heuristic key points always, LLM
/// summary when a client is available. LLM failures degrade to the
/// heuristic result rather than erroring.
pub async fn generate_summary(
    meeting: &Meeting,
    messages: &[MeetingMessage],
    llm: Option<Arc<dyn LlmCall>>,
) -> MeetingSummary {
    let mut summary = MeetingSummary {
        summary_text: None,
        key_points: key_points_from_messages(messages),
    };

    let Some(llm) = llm else {
        return summary;
    };
    if messages.is_empty() {
        return summary;
    }

    let mut transcript = messages
        .iter()
        .map(|m| {
            format!(
                "[Round {}] {}: {}",
                m.round_number,
                m.agent_name.as_deref().unwrap_or(m.role.as_str()),
                m.content
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");
    if transcript.len() > MAX_TRANSCRIPT_CHARS {
        let cut = transcript
            .char_indices()
            .take_while(|(i, _)| *i < MAX_TRANSCRIPT_CHARS)
            .last()
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or(0);
        transcript.truncate(cut);
        transcript.push_str("\n\n[... truncated for summary ...]");
    }

    let system = "You are a meeting summarizer. Output exactly two sections: SUMMARY: \
                  (one short paragraph, 2-4 sentences), then KEY_POINTS: (3-7 bullet \
                  items, each on a new line starting with '- '). Use the same language \
                  as the meeting content when possible.";
    let user = format!(
        "Meeting title: {}\n\nTranscript:\n{transcript}\n\nProvide SUMMARY: and KEY_POINTS: as described.",
        meeting.title
    );

    match llm
        .call(system, &[ChatMessage::user(user)], "gpt-4o-mini", 0.2)
        .await
    {
        Ok(response) => {
            let (summary_text, key_points) = parse_summary_response(&response);
            if summary_text.is_some() {
                summary.summary_text = summary_text;
            }
            if !key_points.is_empty() {
                summary.key_points = key_points;
            }
        }
        Err(e) => {
            log::debug!("summary generation fell back to heuristics: {e}");
        }
    }

    summary
}
