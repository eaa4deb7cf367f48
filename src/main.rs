//! CLI entry point: `monitor` runs the live pipeline, `discover` lists
//! or diffs reachable chat entities against the loaded config.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use teloxide::net::Download;
use teloxide::requests::Requester;
use teloxide::types::{AllowedUpdate, Message, UpdateKind};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::Duration;

use sentinel_router::discover::{self, DiscoveredEntity, EntityLister, Mode};
use sentinel_router::envelope::{MediaKind, OriginalHandle};
use sentinel_router::metrics::MetricsCollector;
use sentinel_router::ocr::OcrAdapter;
use sentinel_router::orchestrator::{self, DownloadedMedia, MediaDownloader, NullMediaDownloader, Orchestrator};
use sentinel_router::rate_limiter::RateLimiter;
use sentinel_router::retry::RetryQueue;
use sentinel_router::router::channel_ids_match;
use sentinel_router::sender::chat::ChatSender;
use sentinel_router::sender::webhook::WebhookSender;
use sentinel_router::source::chat::{ChatClient, ChatMessageMeta, ChatReplyMeta, ChatSource};
use sentinel_router::source::feed::FeedSource;
use sentinel_router::config;

const METRICS_SNAPSHOT_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "sentinel-router", about = "Routes chat and feed intel to webhook/chat destinations")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the live pipeline until interrupted.
    Monitor {
        #[arg(long, value_enum, default_value = "all")]
        sources: SourcesArg,
        #[arg(long, default_value = "config.json")]
        config: PathBuf,
    },
    /// Enumerate chat entities the bot can currently see.
    Discover {
        #[arg(long)]
        diff: bool,
        #[arg(long)]
        generate: bool,
        #[arg(long, default_value = "config.json")]
        config: PathBuf,
    },
}

#[derive(ValueEnum, Clone, Copy, PartialEq, Eq)]
enum SourcesArg {
    All,
    Chat,
    Feed,
}

impl SourcesArg {
    fn wants_chat(self) -> bool {
        matches!(self, SourcesArg::All | SourcesArg::Chat)
    }

    fn wants_feed(self) -> bool {
        matches!(self, SourcesArg::All | SourcesArg::Feed)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Monitor { sources, config } => run_monitor(sources, &config).await,
        Command::Discover { diff, generate, config } => run_discover(diff, generate, &config).await,
    }
}

async fn run_monitor(sources: SourcesArg, config_path: &Path) -> anyhow::Result<()> {
    let table = Arc::new(config::load(config_path).context("loading config")?);

    let http_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(15))
        .tcp_keepalive(Duration::from_secs(30))
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("building HTTP client")?;

    let bot = if sources.wants_chat() && !table.channel_routes.is_empty() {
        let token = std::env::var("TELEGRAM_BOT_TOKEN").context("TELEGRAM_BOT_TOKEN env var is required for chat sources")?;
        Some(teloxide::Bot::new(token))
    } else {
        None
    };

    let rate_limiter = Arc::new(RateLimiter::new());
    let metrics = Arc::new(MetricsCollector::new());
    let retry_queue = Arc::new(RetryQueue::new());
    let ocr = Arc::new(OcrAdapter::disabled());
    let webhook_sender = Arc::new(WebhookSender::new(http_client.clone()));
    let chat_sender = Arc::new(ChatSender::new(bot.clone().unwrap_or_else(|| teloxide::Bot::new("unset"))));

    let media_downloader: Arc<dyn MediaDownloader> = match &bot {
        Some(bot) => Arc::new(TeloxideMediaDownloader { bot: bot.clone() }),
        None => Arc::new(NullMediaDownloader),
    };

    let attachments_dir = PathBuf::from("tmp/attachments");
    let orchestrator = Arc::new(Orchestrator {
        route_table: table.clone(),
        rate_limiter: rate_limiter.clone(),
        metrics: metrics.clone(),
        retry_queue: retry_queue.clone(),
        ocr,
        webhook_sender: webhook_sender.clone(),
        chat_sender: chat_sender.clone(),
        media_downloader,
        attachments_dir,
    });
    orchestrator.purge_attachments_dir().await;

    let (envelope_tx, envelope_rx) = mpsc::channel(256);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let orchestrator_handle = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.run(envelope_rx).await })
    };

    let mut source_handles = Vec::new();

    if sources.wants_feed() {
        for feed_url in table.feed_urls() {
            let display_name = table.feed_display_names.get(&feed_url).cloned().unwrap_or_else(|| feed_url.clone());
            let source = FeedSource::new(http_client.clone(), PathBuf::from("tmp/feed_cursors"));
            let envelope_tx = envelope_tx.clone();
            let metrics = metrics.clone();
            let shutdown_rx = shutdown_rx.clone();
            source_handles.push(tokio::spawn(async move {
                source.run_feed(feed_url, display_name, envelope_tx, metrics, shutdown_rx).await
            }));
        }
    }

    if let Some(bot) = &bot {
        if sources.wants_chat() {
            let chat_client: Arc<dyn ChatClient> = Arc::new(TeloxideChatClient { bot: bot.clone() });
            let event_txs: Arc<Mutex<HashMap<String, mpsc::Sender<ChatMessageMeta>>>> = Arc::new(Mutex::new(HashMap::new()));

            for channel_id in table.channel_routes.keys() {
                let (event_tx, event_rx) = mpsc::channel(64);
                event_txs.lock().await.insert(channel_id.clone(), event_tx);

                let source = ChatSource::new(chat_client.clone(), PathBuf::from("tmp/chat_cursors"));
                let channel_id = channel_id.clone();
                let envelope_tx = envelope_tx.clone();
                let metrics = metrics.clone();
                let shutdown_rx = shutdown_rx.clone();
                source_handles.push(tokio::spawn(async move {
                    source.run_channel(channel_id, event_rx, envelope_tx, metrics, shutdown_rx).await
                }));
            }

            let bot = bot.clone();
            let shutdown_rx = shutdown_rx.clone();
            source_handles.push(tokio::spawn(async move { run_chat_dispatcher(bot, event_txs, shutdown_rx).await }));
        }
    }

    let retry_handle = {
        let retry_queue = retry_queue.clone();
        let webhook_sender = webhook_sender.clone();
        let chat_sender = chat_sender.clone();
        let rate_limiter = rate_limiter.clone();
        let metrics = metrics.clone();
        let shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move { retry_queue.run(webhook_sender, chat_sender, rate_limiter, metrics, shutdown_rx).await })
    };

    let metrics_handle = {
        let metrics = metrics.clone();
        let mut shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(METRICS_SNAPSHOT_INTERVAL);
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        metrics.write_snapshot(Path::new("tmp/metrics.json")).await;
                    }
                }
            }
        })
    };

    tracing::info!("sentinel-router started");
    tokio::signal::ctrl_c().await.context("listening for ctrl-c")?;
    tracing::info!("shutdown signal received, draining sources");

    shutdown_tx.send(true).ok();
    for handle in source_handles {
        let _ = handle.await;
    }
    drop(envelope_tx);
    let _ = orchestrator_handle.await;
    let _ = retry_handle.await;
    let _ = metrics_handle.await;
    metrics.write_snapshot(Path::new("tmp/metrics.json")).await;

    Ok(())
}

async fn run_discover(diff: bool, generate: bool, config_path: &Path) -> anyhow::Result<()> {
    let token = std::env::var("TELEGRAM_BOT_TOKEN").context("TELEGRAM_BOT_TOKEN env var is required")?;
    let bot = teloxide::Bot::new(token);

    let seed_ids: Vec<i64> = std::env::var("DISCOVER_SEED_CHAT_IDS")
        .unwrap_or_default()
        .split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect();
    let lister = TeloxideEntityLister { bot, seed_ids };

    let mode = if generate {
        Mode::Generate
    } else if diff {
        Mode::Diff
    } else {
        Mode::List
    };
    discover::run(&lister, config_path, mode).await
}

/// The Bot API has no "list all dialogs" call (that needs a session-based
/// client). This lister resolves a fixed seed of chat ids from
/// `DISCOVER_SEED_CHAT_IDS` instead of enumerating arbitrary chats.
struct TeloxideEntityLister {
    bot: teloxide::Bot,
    seed_ids: Vec<i64>,
}

#[async_trait::async_trait]
impl EntityLister for TeloxideEntityLister {
    async fn list(&self) -> anyhow::Result<Vec<DiscoveredEntity>> {
        let mut entities = Vec::new();
        for id in &self.seed_ids {
            let chat = self.bot.get_chat(teloxide::types::ChatId(*id)).send().await?;
            let fallback = id.to_string();
            let display_name = chat.title().or_else(|| chat.username()).unwrap_or(&fallback).to_string();
            entities.push(DiscoveredEntity { id: id.to_string(), display_name });
        }
        Ok(entities)
    }
}

/// Startup proof and gap recovery need message history by id, which the
/// Bot API cannot page; those methods return best-effort/empty results
/// and rely on the live update stream for everything else.
struct TeloxideChatClient {
    bot: teloxide::Bot,
}

fn parse_chat_id(channel_id: &str) -> teloxide::types::ChatId {
    teloxide::types::ChatId(channel_id.parse().unwrap_or(0))
}

#[async_trait::async_trait]
impl ChatClient for TeloxideChatClient {
    async fn latest_message(&self, channel_id: &str) -> anyhow::Result<Option<ChatMessageMeta>> {
        let chat = self.bot.get_chat(parse_chat_id(channel_id)).send().await?;
        Ok(Some(ChatMessageMeta {
            id: 0,
            channel_id: channel_id.to_string(),
            channel_handle: chat.username().map(|s| s.to_string()),
            channel_name: chat.title().unwrap_or(channel_id).to_string(),
            author: "system".to_string(),
            timestamp: chrono::Utc::now(),
            text: String::new(),
            has_media: false,
            media_kind: MediaKind::None,
            attachment_filename: None,
            attachment_mime: None,
            file_id: None,
            reply: None,
        }))
    }

    async fn history_since(&self, _channel_id: &str, _since_id: i64) -> anyhow::Result<Vec<ChatMessageMeta>> {
        Ok(Vec::new())
    }
}

struct TeloxideMediaDownloader {
    bot: teloxide::Bot,
}

#[async_trait::async_trait]
impl MediaDownloader for TeloxideMediaDownloader {
    async fn download(&self, original: &OriginalHandle, tmp_dir: &Path) -> anyhow::Result<Option<DownloadedMedia>> {
        let Some(file_id) = &original.file_id else { return Ok(None) };
        let file = self.bot.get_file(file_id).send().await?;
        tokio::fs::create_dir_all(tmp_dir).await?;
        let dest = orchestrator::temp_attachment_path(tmp_dir, "bin");
        let mut dst = tokio::fs::File::create(&dest).await?;
        self.bot.download_file(&file.path, &mut dst).await?;
        Ok(Some(DownloadedMedia { path: dest.to_string_lossy().into_owned(), filename: None, mime: None }))
    }
}

fn classify_from_mime(mime: Option<&str>) -> MediaKind {
    match mime {
        Some(m) if m.starts_with("image/") => MediaKind::Image,
        Some(m) if m.starts_with("video/") || m.starts_with("application/") || m.starts_with("text/") => MediaKind::Document,
        Some(_) => MediaKind::Other,
        None => MediaKind::None,
    }
}

fn message_to_meta(msg: &Message) -> ChatMessageMeta {
    let channel_id = msg.chat.id.0.to_string();
    let channel_handle = msg.chat.username().map(|s| s.to_string());
    let channel_name = msg.chat.title().map(|s| s.to_string()).unwrap_or_else(|| channel_id.clone());
    let author = msg.from().map(|u| u.full_name()).unwrap_or_else(|| "unknown".to_string());
    let text = msg.text().or_else(|| msg.caption()).unwrap_or("").to_string();

    let (has_media, media_kind, attachment_filename, attachment_mime, file_id) = if let Some(sizes) = msg.photo() {
        let file_id = sizes.last().map(|p| p.file.id.clone());
        (true, MediaKind::Image, None, Some("image/jpeg".to_string()), file_id)
    } else if let Some(doc) = msg.document() {
        let mime = doc.mime_type.as_ref().map(|m| m.to_string());
        (true, classify_from_mime(mime.as_deref()), doc.file_name.clone(), mime, Some(doc.file.id.clone()))
    } else {
        (false, MediaKind::None, None, None, None)
    };

    let reply = msg.reply_to_message().map(|r| ChatReplyMeta {
        author: r.from().map(|u| u.full_name()).unwrap_or_else(|| "unknown".to_string()),
        timestamp: r.date,
        text: r.text().or_else(|| r.caption()).unwrap_or("").to_string(),
        media_kind: if r.photo().is_some() {
            MediaKind::Image
        } else if r.document().is_some() {
            MediaKind::Document
        } else {
            MediaKind::None
        },
        has_media: r.photo().is_some() || r.document().is_some(),
    });

    ChatMessageMeta {
        id: msg.id.0 as i64,
        channel_id,
        channel_handle,
        channel_name,
        author,
        timestamp: msg.date,
        text,
        has_media,
        media_kind,
        attachment_filename,
        attachment_mime,
        file_id,
        reply,
    }
}

/// Long-polls for updates and forwards them to the per-channel event
/// channel that `ChatSource::run_channel` is listening on. Plain
/// `get_updates` is used in place of a dptree `Dispatcher` so shutdown
/// composes with the rest of the process through the same watch channel.
async fn run_chat_dispatcher(
    bot: teloxide::Bot,
    event_txs: Arc<Mutex<HashMap<String, mpsc::Sender<ChatMessageMeta>>>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut offset: i32 = 0;
    loop {
        if *shutdown.borrow() {
            break;
        }
        let updates = tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
                continue;
            }
            result = bot.get_updates().offset(offset).timeout(10).allowed_updates(vec![AllowedUpdate::Message]).send() => result,
        };

        match updates {
            Ok(updates) => {
                for update in updates {
                    offset = update.id + 1;
                    if let UpdateKind::Message(msg) = update.kind {
                        let meta = message_to_meta(&msg);
                        let txs = event_txs.lock().await;
                        // `meta.channel_id` is always Telegram's raw numeric id, but
                        // config keys may be an `@handle` or a `-100`-unprefixed form
                        // (spec §3), so this can't be an exact-key lookup.
                        let mut target: Option<&mpsc::Sender<ChatMessageMeta>> = None;
                        for (configured_id, tx) in txs.iter() {
                            if channel_ids_match(configured_id.as_str(), meta.channel_id.as_str()) {
                                target = Some(tx);
                                break;
                            }
                        }
                        if let Some(tx) = target {
                            let _ = tx.send(meta).await;
                        }
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "get_updates failed, backing off");
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        }
    }
}
