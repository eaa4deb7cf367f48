//! Restricted mode pre-filter (spec boundary scenario 3): a chat-sourced
//! envelope carries a document named `malware.exe` claiming MIME
//! `text/csv`. The destination is restricted, so `AttachmentClassifier`
//! is consulted before delivery; since `.exe` never sits on the safe
//! extension list, the document must be dropped, the formatter must
//! append `[Media filtered]`, and the text must still go out.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use sentinel_router::config::{ChannelRule, DestinationConfig, DestinationKind, RouteTable};
use sentinel_router::envelope::{MediaKind, MessageEnvelope, OriginalHandle, SourceKind};
use sentinel_router::metrics::MetricsCollector;
use sentinel_router::ocr::OcrAdapter;
use sentinel_router::orchestrator::{DownloadedMedia, MediaDownloader, Orchestrator};
use sentinel_router::rate_limiter::RateLimiter;
use sentinel_router::retry::RetryQueue;
use sentinel_router::sender::{chat::ChatSender, webhook::WebhookSender};
use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

/// Hands back a fixed path claiming to be `malware.exe` with MIME
/// `text/csv`, regardless of what's asked for.
struct FakeMediaDownloader {
    path: PathBuf,
}

#[async_trait::async_trait]
impl MediaDownloader for FakeMediaDownloader {
    async fn download(&self, _original: &OriginalHandle, _tmp_dir: &Path) -> anyhow::Result<Option<DownloadedMedia>> {
        Ok(Some(DownloadedMedia {
            path: self.path.to_string_lossy().into_owned(),
            filename: Some("malware.exe".to_string()),
            mime: Some("text/csv".to_string()),
        }))
    }
}

#[tokio::test]
async fn unsafe_document_is_dropped_but_text_still_delivered() {
    let mock_server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
        .mount(&mock_server)
        .await;

    let tmp_dir = tempfile::tempdir().unwrap();
    let media_path = tmp_dir.path().join("downloaded.bin");
    tokio::fs::write(&media_path, b"MZ\x90\x00fake-pe-header").await.unwrap();

    let mut table = RouteTable::default();
    table.destinations.push(DestinationConfig {
        name: "restricted-hook".into(),
        kind: DestinationKind::Webhook,
        endpoint: format!("{}/hook", mock_server.uri()),
    });
    table.channel_routes.insert(
        "1".to_string(),
        vec![(
            0,
            ChannelRule {
                keywords: vec![],
                parser: None,
                ocr_enabled: false,
                restricted_mode: true,
                check_attachments: false,
            },
        )],
    );

    let orch = Orchestrator {
        route_table: Arc::new(table),
        rate_limiter: Arc::new(RateLimiter::new()),
        metrics: Arc::new(MetricsCollector::new()),
        retry_queue: Arc::new(RetryQueue::new()),
        ocr: Arc::new(OcrAdapter::disabled()),
        webhook_sender: Arc::new(WebhookSender::new(reqwest::Client::new())),
        chat_sender: Arc::new(ChatSender::new(teloxide::Bot::new("dummy-token"))),
        media_downloader: Arc::new(FakeMediaDownloader { path: media_path.clone() }),
        attachments_dir: tmp_dir.path().join("attachments"),
    };

    let env = MessageEnvelope {
        source_kind: SourceKind::Chat,
        channel_id: "1".to_string(),
        channel_name: "Intel Channel".into(),
        author: "source".into(),
        timestamp: Utc::now(),
        text: "Dropping a payload here.".into(),
        has_media: true,
        media_kind: MediaKind::Document,
        media_path: None,
        ocr_enabled: false,
        ocr_text: None,
        reply_context: None,
        original: OriginalHandle { chat_message_id: Some(1), chat_id: Some(1), file_id: Some("file123".into()) },
        metadata: HashMap::new(),
    };

    let ok = orch.handle_envelope(env).await;
    assert!(ok, "the text leg of the delivery should still succeed");
    assert_eq!(orch.metrics.snapshot().routed_success, 1);

    let requests = mock_server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1, "exactly one POST should have gone out: the filtered text, no media");

    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    let content = body["content"].as_str().unwrap();
    assert!(content.contains("[Media filtered]"), "formatter must annotate the dropped media");
    assert!(content.contains("Dropping a payload here."), "text must still be delivered");

    let content_type = requests[0]
        .headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    assert!(!content_type.contains("multipart"), "no attachment should have been uploaded");

    assert!(!media_path.exists(), "downloaded media must be cleaned up after handling");
}
