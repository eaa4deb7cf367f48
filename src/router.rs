//! Per-envelope destination selection via channel + keyword match. (spec §4.6)

use std::collections::HashSet;

use crate::attachment::AttachmentTextReader;
use crate::config::{ChannelRule, DestinationId, FeedRule, RouteTable};
use crate::envelope::{MessageEnvelope, SourceKind};

/// A destination matched for one envelope, carrying the rule that
/// matched it (so the caller can apply its parser and formatting).
pub struct Matched<'a> {
    pub destination_id: DestinationId,
    pub channel_rule: Option<&'a ChannelRule>,
    pub feed_rule: Option<&'a FeedRule>,
}

/// Exact match, or integer match after stripping an optional leading
/// `-100` supergroup prefix from either side. Shared with `main.rs`'s
/// live dispatcher, which must resolve the same `@handle`/numeric/
/// `-100`-prefixed forms spec §3 allows in config against the bare
/// numeric chat ids the Bot API hands back.
pub fn channel_ids_match(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    let strip = |s: &str| s.strip_prefix("-100").unwrap_or(s);
    match (a.parse::<i64>(), b.parse::<i64>()) {
        (Ok(_), Ok(_)) => strip(a) == strip(b),
        _ => false,
    }
}

pub struct Router<'a> {
    table: &'a RouteTable,
}

impl<'a> Router<'a> {
    pub fn new(table: &'a RouteTable) -> Self {
        Self { table }
    }

    async fn build_search_text(
        &self,
        env: &MessageEnvelope,
        allow_ocr: bool,
        allow_attachments: bool,
        attachment_cache: &mut Option<Option<String>>,
    ) -> String {
        let mut text = env.text.clone();
        if allow_ocr {
            if let Some(ocr) = &env.ocr_text {
                text.push('\n');
                text.push_str(ocr);
            }
        }
        if allow_attachments && env.has_media {
            if attachment_cache.is_none() {
                let extracted = match &env.media_path {
                    Some(path) => {
                        let filename = env.metadata.get("attachment_filename").map(String::as_str);
                        let mime = env.metadata.get("attachment_mime").map(String::as_str);
                        AttachmentTextReader::read(path, filename, mime).await
                    }
                    None => None,
                };
                *attachment_cache = Some(extracted);
            }
            if let Some(Some(attachment_text)) = attachment_cache {
                text.push('\n');
                text.push_str(attachment_text);
            }
        }
        text
    }

    fn keyword_match(keywords: &[String], search_text: &str) -> bool {
        if keywords.is_empty() {
            return true;
        }
        let haystack = search_text.to_lowercase();
        keywords.iter().any(|k| haystack.contains(&k.to_lowercase()))
    }

    /// Returns the destinations matched for this envelope. Duplicates
    /// (same destination matched by more than one rule) are suppressed
    /// by destination identity.
    pub async fn route(&self, env: &MessageEnvelope) -> Vec<Matched<'a>> {
        let mut out = Vec::new();
        let mut seen: HashSet<DestinationId> = HashSet::new();
        let mut attachment_cache: Option<Option<String>> = None;

        match env.source_kind {
            SourceKind::Chat => {
                for (rule_channel_id, rules) in &self.table.channel_routes {
                    if !channel_ids_match(rule_channel_id, &env.channel_id) {
                        continue;
                    }
                    for (dest_id, rule) in rules {
                        if seen.contains(dest_id) {
                            continue;
                        }
                        let search_text = self
                            .build_search_text(env, rule.ocr_enabled, rule.check_attachments, &mut attachment_cache)
                            .await;
                        if Self::keyword_match(&rule.keywords, &search_text) {
                            seen.insert(*dest_id);
                            out.push(Matched { destination_id: *dest_id, channel_rule: Some(rule), feed_rule: None });
                        }
                    }
                }
            }
            SourceKind::Feed => {
                if let Some(rules) = self.table.feed_routes.get(&env.channel_id) {
                    for (dest_id, rule) in rules {
                        if seen.contains(dest_id) {
                            continue;
                        }
                        if Self::keyword_match(&rule.keywords, &env.text) {
                            seen.insert(*dest_id);
                            out.push(Matched { destination_id: *dest_id, channel_rule: None, feed_rule: Some(rule) });
                        }
                    }
                }
            }
        }
        out
    }

    fn channel_rules_for(&self, channel_id: &str) -> impl Iterator<Item = &'a ChannelRule> {
        self.table
            .channel_routes
            .iter()
            .filter(move |(k, _)| channel_ids_match(k, channel_id))
            .flat_map(|(_, rules)| rules.iter().map(|(_, rule)| rule))
    }

    pub fn needs_ocr(&self, channel_id: &str) -> bool {
        self.channel_rules_for(channel_id).any(|r| r.ocr_enabled)
    }

    pub fn needs_attachment_scan(&self, channel_id: &str) -> bool {
        self.channel_rules_for(channel_id).any(|r| r.check_attachments)
    }

    pub fn is_restricted(&self, channel_id: &str) -> bool {
        self.channel_rules_for(channel_id).any(|r| r.restricted_mode)
    }
}
