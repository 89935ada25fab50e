//! Reply-language preference for a meeting.
//!
//! Signals, in priority order: the language detected in prior human
//! messages, then the run's `locale` parameter, then the team's default
//! language. Detection is script-based and only fires for languages whose
//! script is unambiguous; Latin-script text yields no preference (models
//! default to English).

use crate::models::{ChatRole, MeetingMessage};

/// Map a locale code like `ja` or `ja-JP` to a language name usable in a
/// prompt. Unknown codes pass through as-is.
pub fn language_for_locale(locale: &str) -> Option<String> {
    let code = locale.split(['-', '_']).next()?.to_lowercase();
    if code.is_empty() {
        return None;
    }
    let name = match code.as_str() {
        "en" => "English",
        "ja" => "Japanese",
        "zh" => "Chinese",
        "ko" => "Korean",
        "ru" => "Russian",
        "de" => "German",
        "fr" => "French",
        "es" => "Spanish",
        "pt" => "Portuguese",
        "it" => "Italian",
        _ => return Some(locale.to_string()),
    };
    Some(name.to_string())
}

/// Detect the language of a text by script. Returns `None` for Latin-script
/// text, where no override is needed.
pub fn detect_language(text: &str) -> Option<&'static str> {
    let mut hiragana_katakana = 0usize;
    let mut hangul = 0usize;
    let mut cjk = 0usize;
    let mut cyrillic = 0usize;

    for ch in text.chars() {
        let code = ch as u32;
        match code {
            0x3040..=0x30FF => hiragana_katakana += 1,
            0xAC00..=0xD7AF => hangul += 1,
            0x4E00..=0x9FFF => cjk += 1,
            0x0400..=0x04FF => cyrillic += 1,
            _ => {}
        }
    }

    // Kana implies Japanese even though kanji share the CJK block.
    if hiragana_katakana > 0 {
        return Some("Japanese");
    }
    if hangul > 0 {
        return Some("Korean");
    }
    if cjk > 0 {
        return Some("Chinese");
    }
    if cyrillic > 0 {
        return Some("Russian");
    }
    None
}

/// Resolve the preferred reply language for a meeting run.
///
/// Priority: language detected in human user messages (latest first), then
/// the run topic, then the explicit `locale`, then the team default.
pub fn meeting_preferred_lang(
    messages: &[MeetingMessage],
    topic: Option<&str>,
    locale: Option<&str>,
    team_language: Option<&str>,
) -> Option<String> {
    for msg in messages.iter().rev() {
        if msg.role == ChatRole::User && msg.agent_id.is_none() {
            if let Some(lang) = detect_language(&msg.content) {
                return Some(lang.to_string());
            }
        }
    }
    if let Some(topic) = topic {
        if let Some(lang) = detect_language(topic) {
            return Some(lang.to_string());
        }
    }
    if let Some(locale) = locale {
        if let Some(lang) = language_for_locale(locale) {
            return Some(lang);
        }
    }
    team_language
        .filter(|l| !l.trim().is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MeetingMessage;

    #[test]
    fn script_detection() {
        assert_eq!(detect_language("こんにちは、実験を続けましょう"), Some("Japanese"));
        assert_eq!(detect_language("안녕하세요"), Some("Korean"));
        assert_eq!(detect_language("继续蛋白质实验"), Some("Chinese"));
        assert_eq!(detect_language("продолжим эксперимент"), Some("Russian"));
        assert_eq!(detect_language("continue the experiment"), None);
    }

    #[test]
    fn locale_mapping() {
        assert_eq!(language_for_locale("ja").as_deref(), Some("Japanese"));
        assert_eq!(language_for_locale("ja-JP").as_deref(), Some("Japanese"));
        assert_eq!(language_for_locale("pt_BR").as_deref(), Some("Portuguese"));
        assert_eq!(language_for_locale("xx-YY").as_deref(), Some("xx-YY"));
    }

    #[test]
    fn message_beats_locale_beats_team_default() {
        let human = MeetingMessage::from_user("m1", "続けてください", 0);
        let lang = meeting_preferred_lang(&[human], None, Some("ru"), Some("German"));
        assert_eq!(lang.as_deref(), Some("Japanese"));

        let lang = meeting_preferred_lang(&[], None, Some("ru"), Some("German"));
        assert_eq!(lang.as_deref(), Some("Russian"));

        let lang = meeting_preferred_lang(&[], None, None, Some("German"));
        assert_eq!(lang.as_deref(), Some("German"));

        let lang = meeting_preferred_lang(&[], None, None, None);
        assert_eq!(lang, None);
    }

    #[test]
    fn agent_messages_do_not_set_language() {
        let agent_msg = MeetingMessage::assistant("m1", "a1", "Dr. X", "こんにちは", 1);
        let lang = meeting_preferred_lang(&[agent_msg], None, None, None);
        assert_eq!(lang, None);
    }
}
