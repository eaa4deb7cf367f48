//! Line-wise trim / keep transforms on envelope text. (spec §4.7)

use crate::envelope::MessageEnvelope;

/// The two mutually-exclusive parser shapes a destination rule may carry.
/// A rule using both `TrimLines` fields and `KeepFirst` at once is a
/// configuration error, rejected by `config::RawParserSpec::validate`
/// before a value of this type ever exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParserSpec {
    TrimLines { trim_front: i64, trim_back: i64 },
    KeepFirst { keep_first: i64 },
}

impl ParserSpec {
    /// Applies the transform, returning a new envelope. The source
    /// envelope is never mutated so other destinations still see the
    /// pre-parse text.
    pub fn apply(&self, env: &MessageEnvelope) -> MessageEnvelope {
        match self {
            ParserSpec::TrimLines { trim_front, trim_back } => {
                if *trim_front < 0 || *trim_back < 0 {
                    tracing::warn!(trim_front, trim_back, "negative trim values, leaving text unchanged");
                    return env.clone();
                }
                let lines: Vec<&str> = env.text.split('\n').collect();
                let front = (*trim_front as usize).min(lines.len());
                let back = (*trim_back as usize).min(lines.len() - front);
                let kept = &lines[front..lines.len() - back];
                let text = if kept.is_empty() {
                    "[message empty after trimming]".to_string()
                } else {
                    kept.join("\n")
                };
                env.with_text(text)
            }
            ParserSpec::KeepFirst { keep_first } => {
                if *keep_first <= 0 {
                    tracing::warn!(keep_first, "non-positive keep_first, leaving text unchanged");
                    return env.clone();
                }
                let lines: Vec<&str> = env.text.split('\n').collect();
                let k = (*keep_first as usize).min(lines.len());
                let omitted = lines.len() - k;
                let mut kept: Vec<&str> = lines[..k].to_vec();
                let trailer;
                if omitted > 0 {
                    trailer = format!("… ({omitted} more line{} omitted)", if omitted == 1 { "" } else { "s" });
                    kept.push(&trailer);
                }
                env.with_text(kept.join("\n"))
            }
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{MediaKind, OriginalHandle, SourceKind};
    use chrono::Utc;
    use std::collections::HashMap;

    fn env_with_text(text: &str) -> MessageEnvelope {
        MessageEnvelope {
            source_kind: SourceKind::Chat,
            channel_id: "c1".into(),
            channel_name: "chan".into(),
            author: "bob".into(),
            timestamp: Utc::now(),
            text: text.to_string(),
            has_media: false,
            media_kind: MediaKind::None,
            media_path: None,
            ocr_enabled: false,
            ocr_text: None,
            reply_context: None,
            original: OriginalHandle::default(),
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn trim_lines_drops_front_and_back() {
        let env = env_with_text("a\nb\nc\nd\ne");
        let spec = ParserSpec::TrimLines { trim_front: 1, trim_back: 1 };
        let parsed = spec.apply(&env);
        assert_eq!(parsed.text, "b\nc\nd");
        assert_eq!(env.text, "a\nb\nc\nd\ne");
    }

    #[test]
    fn trim_lines_empty_result_gets_placeholder() {
        let env = env_with_text("a\nb");
        let spec = ParserSpec::TrimLines { trim_front: 1, trim_back: 1 };
        let parsed = spec.apply(&env);
        assert_eq!(parsed.text, "[message empty after trimming]");
    }

    #[test]
    fn trim_lines_negative_values_leave_text_unchanged() {
        let env = env_with_text("a\nb\nc");
        let spec = ParserSpec::TrimLines { trim_front: -1, trim_back: 0 };
        let parsed = spec.apply(&env);
        assert_eq!(parsed.text, env.text);
    }

    #[test]
    fn keep_first_appends_trailer_when_truncated() {
        let env = env_with_text("a\nb\nc\nd");
        let spec = ParserSpec::KeepFirst { keep_first: 2 };
        let parsed = spec.apply(&env);
        assert_eq!(parsed.text, "a\nb\n… (2 more lines omitted)");
    }

    #[test]
    fn keep_first_no_trailer_when_not_truncated() {
        let env = env_with_text("a\nb");
        let spec = ParserSpec::KeepFirst { keep_first: 5 };
        let parsed = spec.apply(&env);
        assert_eq!(parsed.text, "a\nb");
    }

    #[test]
    fn keep_first_non_positive_leaves_unchanged() {
        let env = env_with_text("a\nb");
        let spec = ParserSpec::KeepFirst { keep_first: 0 };
        let parsed = spec.apply(&env);
        assert_eq!(parsed.text, env.text);
    }
}
