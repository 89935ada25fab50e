//! Lightweight context retrieval for meeting chains.
//!
//! Extracts a keyword set from the agenda, then keeps the paragraphs of
//! prior-meeting transcripts that mention at least one keyword. When nothing
//! matches, the last assistant message of that meeting stands in for it.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::store::{MeetingStore, StoreError};

/// Default global character budget across all extracted summaries.
pub const DEFAULT_CONTEXT_BUDGET: usize = 3000;

/// One prior meeting's contribution to the new meeting's context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextSummary {
    pub title: String,
    pub summary: String,
}

static TOKEN_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[a-zA-Z0-9_-]+").expect("token regex"));

static PARAGRAPH_SPLIT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{2,}").expect("paragraph regex"));

/// Closed English stop-word list excluded from keyword extraction.
static STOP_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "a", "an", "the", "is", "are", "was", "were", "be", "been", "being", "have", "has",
        "had", "do", "does", "did", "will", "would", "could", "should", "may", "might", "shall",
        "can", "need", "dare", "ought", "used", "to", "of", "in", "for", "on", "with", "at",
        "by", "from", "as", "into", "through", "during", "before", "after", "above", "below",
        "between", "out", "off", "over", "under", "again", "further", "then", "once", "here",
        "there", "when", "where", "why", "how", "all", "each", "every", "both", "few", "more",
        "most", "other", "some", "such", "no", "not", "only", "own", "same", "so", "than",
        "too", "very", "just", "because", "but", "and", "or", "if", "while", "about", "up",
        "what", "which", "who", "whom", "this", "that", "these", "those", "am", "i", "me",
        "my", "we", "our", "you", "your", "he", "him", "his", "she", "her", "it", "its",
        "they", "them", "their", "also", "use", "using",
    ]
    .into_iter()
    .collect()
});

/// Extract domain keywords from agenda text plus questions: alphanumeric
/// tokens longer than two characters, lowercased, stop words removed,
/// deduplicated preserving first-seen order.
pub fn extract_keywords_from_agenda(agenda: &str, questions: &[String]) -> Vec<String> {
    let mut text = agenda.to_string();
    for q in questions {
        text.push(' ');
        text.push_str(q);
    }
    let lower = text.to_lowercase();

    let mut keywords = Vec::new();
    let mut seen = HashSet::new();
    for m in TOKEN_PATTERN.find_iter(&lower) {
        let token = m.as_str();
        if token.len() > 2 && !STOP_WORDS.contains(token) && seen.insert(token.to_string()) {
            keywords.push(token.to_string());
        }
    }
    keywords
}

fn split_paragraphs(text: &str) -> Vec<&str> {
    PARAGRAPH_SPLIT
        .split(text.trim())
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect()
}

fn paragraph_matches(paragraph: &str, keywords: &[String]) -> bool {
    let lower = paragraph.to_lowercase();
    keywords.iter().any(|kw| lower.contains(kw.as_str()))
}

/// Pull relevant excerpts from prior meetings under a global character
/// budget. Meetings are visited in the given order; the budget is spent
/// first-come, and the summary that crosses it is truncated with `...`.
pub async fn extract_relevant_context(
    store: &dyn MeetingStore,
    meeting_ids: &[String],
    keywords: Option<&[String]>,
    max_chars: usize,
) -> Result<Vec<ContextSummary>, StoreError> {
    let mut results = Vec::new();
    let mut chars_used = 0usize;

    for mid in meeting_ids {
        if chars_used >= max_chars {
            break;
        }

        let Some(meeting) = store.get_meeting(mid).await? else {
            continue;
        };
        let messages = store.list_assistant_messages(mid).await?;
        if messages.is_empty() {
            continue;
        }

        let summary = match keywords {
            Some(kws) if !kws.is_empty() => {
                let mut matched: Vec<&str> = Vec::new();
                for msg in &messages {
                    for para in split_paragraphs(&msg.content) {
                        if paragraph_matches(para, kws) {
                            matched.push(para);
                        }
                    }
                }
                if matched.is_empty() {
                    // Nothing relevant found: fall back to the meeting's
                    // final assistant message.
                    messages.last().map(|m| m.content.clone()).unwrap_or_default()
                } else {
                    matched.join("\n\n")
                }
            }
            _ => messages.last().map(|m| m.content.clone()).unwrap_or_default(),
        };

        let remaining = max_chars - chars_used;
        let summary = if summary.chars().count() > remaining {
            let truncated: String = summary.chars().take(remaining).collect();
            format!("{truncated}...")
        } else {
            summary
        };

        chars_used += summary.chars().count();
        results.push(ContextSummary { title: meeting.title, summary });
    }

    Ok(results)
}
