//! Generic webhook delivery: one HTTPS POST per chunk, chunked at 2000
//! chars, media attached to the first chunk only. (spec §4.9)

use std::time::Duration;

use reqwest::{Client, StatusCode};

use super::{DestinationSender, Outcome};
use crate::chunker;

pub const MAX_LEN: usize = 2000;

pub struct WebhookSender {
    client: Client,
}

impl WebhookSender {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn post_chunk(&self, endpoint: &str, chunk: &str, media_path: Option<&str>) -> Outcome {
        let request = if let Some(path) = media_path {
            match tokio::fs::read(path).await {
                Ok(bytes) => {
                    let filename = std::path::Path::new(path)
                        .file_name()
                        .and_then(|n| n.to_str())
                        .unwrap_or("attachment")
                        .to_string();
                    let part = reqwest::multipart::Part::bytes(bytes).file_name(filename);
                    let form = reqwest::multipart::Form::new()
                        .text("content", chunk.to_string())
                        .part("file", part);
                    self.client.post(endpoint).multipart(form)
                }
                Err(e) => {
                    tracing::warn!(path, error = %e, "failed to read media for webhook send, sending text only");
                    self.client.post(endpoint).json(&serde_json::json!({ "content": chunk }))
                }
            }
        } else {
            self.client.post(endpoint).json(&serde_json::json!({ "content": chunk }))
        };

        match request.send().await {
            Ok(resp) => {
                let status = resp.status();
                if status == StatusCode::TOO_MANY_REQUESTS {
                    let retry_after = parse_retry_after(&resp).await;
                    return Outcome::RateLimited(retry_after);
                }
                if status.is_success() {
                    Outcome::Ok
                } else {
                    Outcome::Error(format!("HTTP {status}"))
                }
            }
            Err(e) => Outcome::Error(e.to_string()),
        }
    }
}

async fn parse_retry_after(resp: &reqwest::Response) -> Duration {
    if let Some(header) = resp.headers().get("retry-after") {
        if let Ok(s) = header.to_str() {
            if let Ok(secs) = s.parse::<f64>() {
                return Duration::from_secs_f64(secs.max(0.0));
            }
        }
    }
    Duration::from_secs(1)
}

#[async_trait::async_trait]
impl DestinationSender for WebhookSender {
    async fn send(&self, endpoint: &str, body: &str, media_path: Option<&str>) -> Outcome {
        let chunks = chunker::chunk(body, MAX_LEN);
        for (i, c) in chunks.iter().enumerate() {
            let media = if i == 0 { media_path } else { None };
            match self.post_chunk(endpoint, c, media).await {
                Outcome::Ok => continue,
                other => return other,
            }
        }
        Outcome::Ok
    }

    fn rate_limit_key(&self, endpoint: &str) -> String {
        format!("webhook:{endpoint}")
    }
}
