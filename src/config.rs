//! Configuration document loading and `RouteTable` construction. (spec §3, §6)
//!
//! `ConfigLoader` is named in spec §1 as an out-of-core collaborator
//! ("loading the on-disk configuration document and keyword files"); it
//! is implemented here because the `discover` subcommand (spec §6) and
//! the Orchestrator both depend on its output shape, the immutable
//! `RouteTable`.

use std::collections::HashMap;
use std::env;
use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::parser::ParserSpec;

pub type DestinationId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestinationKind {
    Webhook,
    Chat,
}

#[derive(Debug, Clone)]
pub struct DestinationConfig {
    pub name: String,
    pub kind: DestinationKind,
    /// Resolved webhook URL or chat id; sourced from environment, never
    /// stored in plaintext config.
    pub endpoint: String,
}

#[derive(Debug, Clone)]
pub struct ChannelRule {
    pub keywords: Vec<String>,
    pub parser: Option<ParserSpec>,
    pub ocr_enabled: bool,
    pub restricted_mode: bool,
    pub check_attachments: bool,
}

#[derive(Debug, Clone)]
pub struct FeedRule {
    pub keywords: Vec<String>,
    pub parser: Option<ParserSpec>,
}

/// One poller per unique feed URL (spec §3 invariant); `feed_display_names`
/// carries the name to use as `envelope.author` regardless of how many
/// destinations subscribe to that URL.
#[derive(Debug, Default)]
pub struct RouteTable {
    pub destinations: Vec<DestinationConfig>,
    pub channel_routes: HashMap<String, Vec<(DestinationId, ChannelRule)>>,
    pub feed_routes: HashMap<String, Vec<(DestinationId, FeedRule)>>,
    pub feed_display_names: HashMap<String, String>,
}

impl RouteTable {
    pub fn feed_urls(&self) -> Vec<String> {
        self.feed_routes.keys().cloned().collect()
    }

    pub fn destination(&self, id: DestinationId) -> &DestinationConfig {
        &self.destinations[id]
    }
}

// ---------- raw JSON document shape (spec §6) ----------

#[derive(Debug, Deserialize)]
struct RawConfigDocument {
    destinations: Vec<RawDestination>,
}

#[derive(Debug, Deserialize)]
struct RawDestination {
    name: String,
    #[serde(rename = "type")]
    kind: String,
    env_key: String,
    #[serde(default)]
    channels: Vec<RawChannelRule>,
    #[serde(default)]
    rss: Vec<RawFeedRule>,
}

#[derive(Debug, Deserialize)]
struct RawChannelRule {
    id: String,
    #[serde(default)]
    keywords: Option<RawKeywords>,
    #[serde(default)]
    restricted_mode: bool,
    #[serde(default)]
    ocr: bool,
    #[serde(default = "default_true")]
    check_attachments: bool,
    #[serde(default)]
    parser: Option<RawParserSpec>,
}

#[derive(Debug, Deserialize)]
struct RawFeedRule {
    url: String,
    name: String,
    #[serde(default)]
    keywords: Option<RawKeywords>,
    #[serde(default)]
    parser: Option<RawParserSpec>,
}

#[derive(Debug, Deserialize)]
struct RawKeywords {
    #[serde(default)]
    files: Vec<String>,
    #[serde(default)]
    inline: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawParserSpec {
    trim_front: Option<i64>,
    trim_back: Option<i64>,
    keep_first: Option<i64>,
}

fn default_true() -> bool {
    true
}

impl RawParserSpec {
    fn validate(&self, destination_name: &str) -> Result<Option<ParserSpec>, ConfigError> {
        let has_trim = self.trim_front.is_some() || self.trim_back.is_some();
        let has_keep = self.keep_first.is_some();
        if has_trim && has_keep {
            return Err(ConfigError::ConflictingParser { name: destination_name.to_string() });
        }
        if has_trim {
            let (Some(front), Some(back)) = (self.trim_front, self.trim_back) else {
                return Err(ConfigError::IncompleteParser { name: destination_name.to_string() });
            };
            return Ok(Some(ParserSpec::TrimLines { trim_front: front, trim_back: back }));
        }
        if has_keep {
            return Ok(Some(ParserSpec::KeepFirst { keep_first: self.keep_first.unwrap() }));
        }
        Ok(None)
    }
}

fn load_keywords(raw: Option<&RawKeywords>) -> Result<Vec<String>, ConfigError> {
    let Some(raw) = raw else { return Ok(Vec::new()) };
    let mut out = raw.inline.clone();
    for path in &raw.files {
        let contents = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::KeywordFile { path: path.clone(), source })?;
        out.extend(
            contents
                .lines()
                .map(|l| l.trim().to_string())
                .filter(|l| !l.is_empty()),
        );
    }
    Ok(out)
}

/// Loads the JSON config document at `path`, resolves endpoints from
/// environment, and builds the immutable `RouteTable`. Destinations
/// whose `env_key` is unset are warned about and skipped (spec §6); a
/// `ConfigError` here is always fatal at startup.
pub fn load(path: &Path) -> Result<RouteTable, ConfigError> {
    let raw = std::fs::read(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let doc: RawConfigDocument = serde_json::from_slice(&raw)?;
    build(doc)
}

fn build(doc: RawConfigDocument) -> Result<RouteTable, ConfigError> {
    let mut table = RouteTable::default();
    let mut seen_names: HashMap<String, usize> = HashMap::new();

    for raw_dest in doc.destinations {
        *seen_names.entry(raw_dest.name.clone()).or_insert(0) += 1;
        if seen_names[&raw_dest.name] > 1 {
            tracing::warn!(name = %raw_dest.name, "duplicate destination name in config");
        }

        let Ok(endpoint) = env::var(&raw_dest.env_key) else {
            tracing::warn!(destination = %raw_dest.name, env_key = %raw_dest.env_key, "destination env var unset, skipping destination");
            continue;
        };

        let kind = match raw_dest.kind.as_str() {
            "webhook" => DestinationKind::Webhook,
            "chat" => DestinationKind::Chat,
            other => {
                tracing::warn!(destination = %raw_dest.name, kind = other, "unknown destination type, skipping destination");
                continue;
            }
        };

        let dest_id = table.destinations.len();
        table.destinations.push(DestinationConfig { name: raw_dest.name.clone(), kind, endpoint });

        for ch in raw_dest.channels {
            let parser = match &ch.parser {
                Some(p) => p.validate(&raw_dest.name)?,
                None => None,
            };
            let keywords = load_keywords(ch.keywords.as_ref())?;
            let rule = ChannelRule {
                keywords,
                parser,
                ocr_enabled: ch.ocr,
                restricted_mode: ch.restricted_mode,
                check_attachments: ch.check_attachments,
            };
            table.channel_routes.entry(ch.id.clone()).or_default().push((dest_id, rule));
        }

        for feed in raw_dest.rss {
            let parser = match &feed.parser {
                Some(p) => p.validate(&raw_dest.name)?,
                None => None,
            };
            let keywords = load_keywords(feed.keywords.as_ref())?;
            let rule = FeedRule { keywords, parser };
            table.feed_display_names.entry(feed.url.clone()).or_insert_with(|| feed.name.clone());
            table.feed_routes.entry(feed.url.clone()).or_default().push((dest_id, rule));
        }
    }

    Ok(table)
}
