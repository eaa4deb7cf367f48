//! Per-destination output rendering: markup variants, URL defanging, and
//! chat message URL construction. (spec §4.8)

use crate::config::ChannelRule;
use crate::envelope::{MediaKind, MessageEnvelope};

/// Replaces the scheme `https`/`http` and the dot before `me` in
/// `t.me`/`telegram.me` so the URL can be shared without being clickable.
/// Pure and idempotent: `defang(defang(u)) == defang(u)`.
pub fn defang(url: &str) -> String {
    let out = if let Some(rest) = url.strip_prefix("https") {
        format!("hxxps{rest}")
    } else if let Some(rest) = url.strip_prefix("http") {
        format!("hxxp{rest}")
    } else {
        url.to_string()
    };
    out.replace("t.me", "t[.]me").replace("telegram.me", "telegram[.]me")
}

/// Builds the public/private chat message URL per spec §4.8.
pub fn chat_message_url(channel_id: &str, handle: Option<&str>, message_id: i64) -> String {
    if let Some(handle) = handle {
        return format!("https://t.me/{handle}/{message_id}");
    }
    if let Some(stripped) = channel_id.strip_prefix("-100") {
        return format!("https://t.me/c/{stripped}/{message_id}");
    }
    format!("https://t.me/c/{channel_id}/{message_id}")
}

pub trait Formatter {
    fn format(&self, env: &MessageEnvelope, rule: Option<&ChannelRule>, matched_keywords: &[String]) -> String;
}

fn media_filtered_note(env: &MessageEnvelope, media_allowed: bool) -> Option<&'static str> {
    if env.has_media && !media_allowed {
        Some("[Media filtered]")
    } else {
        None
    }
}

/// Markdown (Telegram-MarkdownV2-adjacent) formatter. Must not introduce
/// characters that would alter formatting when the text is untrusted;
/// this implementation avoids doing any markdown escaping of user text
/// by never wrapping untrusted spans in markdown control characters.
pub struct MarkdownFormatter {
    pub media_allowed: bool,
}

impl Formatter for MarkdownFormatter {
    fn format(&self, env: &MessageEnvelope, rule: Option<&ChannelRule>, matched_keywords: &[String]) -> String {
        let mut out = String::new();
        out.push_str(&format!("*{}*\n", env.channel_name));
        out.push_str(&format!("From: {}\n", env.author));
        out.push_str(&format!("At: {}\n", env.timestamp.to_rfc3339()));
        if let Some(url) = env.metadata.get("defanged_source_url") {
            out.push_str(&format!("Source: {url}\n"));
        }
        out.push_str(&format!("Media: {}\n", env.media_kind.label()));
        if !matched_keywords.is_empty() {
            let kws: Vec<String> = matched_keywords.iter().map(|k| format!("`{k}`")).collect();
            out.push_str(&format!("Keywords: {}\n", kws.join(" ")));
        }
        if let Some(reply) = &env.reply_context {
            out.push_str(&format!(
                "\n> In reply to {} ({}, media: {}):\n> {}\n",
                reply.author,
                reply.timestamp.to_rfc3339(),
                reply.media_kind.label(),
                reply.text
            ));
        }
        let _ = rule;
        out.push('\n');
        if let Some(note) = media_filtered_note(env, self.media_allowed) {
            out.push_str(note);
            out.push('\n');
        }
        out.push_str(&env.text);
        if let Some(ocr) = &env.ocr_text {
            out.push_str(&format!("\n\n> OCR: {ocr}"));
        }
        out
    }
}

/// HTML-subset formatter. All interpolated user text is escaped.
pub struct HtmlFormatter {
    pub media_allowed: bool,
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

impl Formatter for HtmlFormatter {
    fn format(&self, env: &MessageEnvelope, rule: Option<&ChannelRule>, matched_keywords: &[String]) -> String {
        let mut out = String::new();
        out.push_str(&format!("<b>{}</b>\n", escape_html(&env.channel_name)));
        out.push_str(&format!("From: {}\n", escape_html(&env.author)));
        out.push_str(&format!("At: {}\n", env.timestamp.to_rfc3339()));
        if let Some(url) = env.metadata.get("defanged_source_url") {
            out.push_str(&format!("Source: {}\n", escape_html(url)));
        }
        out.push_str(&format!("Media: {}\n", env.media_kind.label()));
        if !matched_keywords.is_empty() {
            let kws: Vec<String> = matched_keywords.iter().map(|k| format!("<code>{}</code>", escape_html(k))).collect();
            out.push_str(&format!("Keywords: {}\n", kws.join(" ")));
        }
        if let Some(reply) = &env.reply_context {
            out.push_str(&format!(
                "\n<i>In reply to {} ({}, media: {}):</i>\n{}\n",
                escape_html(&reply.author),
                reply.timestamp.to_rfc3339(),
                reply.media_kind.label(),
                escape_html(&reply.text)
            ));
        }
        let _ = rule;
        out.push('\n');
        if let Some(note) = media_filtered_note(env, self.media_allowed) {
            out.push_str(note);
            out.push('\n');
        }
        out.push_str(&escape_html(&env.text));
        if let Some(ocr) = &env.ocr_text {
            out.push_str(&format!("\n\n<blockquote>OCR: {}</blockquote>", escape_html(ocr)));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{OriginalHandle, SourceKind};
    use chrono::Utc;
    use std::collections::HashMap;

    fn base_env() -> MessageEnvelope {
        MessageEnvelope {
            source_kind: SourceKind::Chat,
            channel_id: "1".into(),
            channel_name: "Chan".into(),
            author: "alice".into(),
            timestamp: Utc::now(),
            text: "hello <world> & friends".into(),
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
    fn defang_is_idempotent() {
        let url = "https://t.me/somechannel/123";
        let once = defang(url);
        let twice = defang(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn defang_rewrites_scheme_and_dot() {
        let out = defang("https://t.me/chan/5");
        assert_eq!(out, "hxxps://t[.]me/chan/5");
        let out2 = defang("http://telegram.me/chan/5");
        assert_eq!(out2, "hxxp://telegram[.]me/chan/5");
    }

    #[test]
    fn public_channel_url_uses_handle() {
        assert_eq!(chat_message_url("123", Some("mychan"), 55), "https://t.me/mychan/55");
    }

    #[test]
    fn private_channel_url_strips_100_prefix() {
        assert_eq!(chat_message_url("-1001234567890", None, 9), "https://t.me/c/1234567890/9");
    }

    #[test]
    fn html_formatter_escapes_user_text() {
        let env = base_env();
        let fmt = HtmlFormatter { media_allowed: true };
        let out = fmt.format(&env, None, &[]);
        assert!(out.contains("&lt;world&gt;"));
        assert!(!out.contains("<world>"));
    }

    #[test]
    fn filtered_note_appears_only_when_media_present_and_disallowed() {
        let mut env = base_env();
        env.has_media = true;
        env.media_kind = MediaKind::Document;
        let fmt = MarkdownFormatter { media_allowed: false };
        let out = fmt.format(&env, None, &[]);
        assert!(out.contains("[Media filtered]"));

        let fmt_allowed = MarkdownFormatter { media_allowed: true };
        let out2 = fmt_allowed.format(&env, None, &[]);
        assert!(!out2.contains("[Media filtered]"));

        let mut env_no_media = base_env();
        env_no_media.has_media = false;
        let fmt_restricted = MarkdownFormatter { media_allowed: false };
        let out3 = fmt_restricted.format(&env_no_media, None, &[]);
        assert!(!out3.contains("[Media filtered]"));
    }
}
