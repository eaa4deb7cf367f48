//! The source-agnostic record that flows through the pipeline.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Chat,
    Feed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    None,
    Image,
    Document,
    Other,
}

impl Default for MediaKind {
    fn default() -> Self {
        MediaKind::None
    }
}

impl MediaKind {
    pub fn label(&self) -> &'static str {
        match self {
            MediaKind::None => "none",
            MediaKind::Image => "image",
            MediaKind::Document => "document",
            MediaKind::Other => "other",
        }
    }
}

/// Snapshot of the message an envelope replied to, truncated per spec.
#[derive(Debug, Clone)]
pub struct ReplyContext {
    pub author: String,
    pub timestamp: DateTime<Utc>,
    pub text: String,
    pub media_kind: MediaKind,
    pub has_media: bool,
}

impl ReplyContext {
    const TEXT_CAP: usize = 200;

    pub fn new(author: String, timestamp: DateTime<Utc>, text: &str, media_kind: MediaKind, has_media: bool) -> Self {
        let text = truncate_chars(text, Self::TEXT_CAP);
        Self { author, timestamp, text, media_kind, has_media }
    }
}

fn truncate_chars(s: &str, cap: usize) -> String {
    if s.chars().count() <= cap {
        s.to_string()
    } else {
        s.chars().take(cap).collect()
    }
}

/// Opaque handle back to the source-native object. Only used to trigger
/// a media download; never inspected by downstream pipeline stages.
#[derive(Debug, Clone, Default)]
pub struct OriginalHandle {
    pub chat_message_id: Option<i64>,
    pub chat_id: Option<i64>,
    /// Chat-library file identifier needed to download the attached
    /// media; `None` for feed-sourced envelopes (feeds never carry
    /// downloadable media in this system).
    pub file_id: Option<String>,
}

/// The unit of work passed from a source, through preprocessing and
/// routing, to a destination sender.
///
/// Logically immutable once built except for the preprocessing-populated
/// fields (`media_path`, `ocr_text`, `metadata`), which the Orchestrator
/// owns. Parsers never mutate an envelope; they produce new ones.
#[derive(Debug, Clone)]
pub struct MessageEnvelope {
    pub source_kind: SourceKind,
    pub channel_id: String,
    pub channel_name: String,
    pub author: String,
    pub timestamp: DateTime<Utc>,
    pub text: String,
    pub has_media: bool,
    pub media_kind: MediaKind,
    pub media_path: Option<String>,
    pub ocr_enabled: bool,
    pub ocr_text: Option<String>,
    pub reply_context: Option<ReplyContext>,
    pub original: OriginalHandle,
    pub metadata: HashMap<String, String>,
}

impl MessageEnvelope {
    pub fn unresolved_channel_name(id: &str) -> String {
        format!("Unresolved:{id}")
    }

    /// Build a new envelope with `text` replaced; every other field is
    /// copied verbatim. Used by `Parser` so the original envelope (and
    /// other destinations still routing against it) is untouched.
    pub fn with_text(&self, text: String) -> Self {
        Self { text, ..self.clone() }
    }
}
