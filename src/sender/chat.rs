//! Chat-platform delivery: body/caption chunk limits and the
//! caption-overflow policy (captionless media first, then chunked text).
//! (spec §4.9)

use teloxide::payloads::{SendDocumentSetters, SendMessageSetters, SendPhotoSetters};
use teloxide::prelude::*;
use teloxide::requests::Requester;
use teloxide::types::{InputFile, Recipient};
use teloxide::RequestError;

use super::{DestinationSender, Outcome};
use crate::chunker;

pub const BODY_MAX: usize = 4096;
pub const CAPTION_MAX: usize = 1024;

pub struct ChatSender {
    bot: teloxide::Bot,
}

impl ChatSender {
    pub fn new(bot: teloxide::Bot) -> Self {
        Self { bot }
    }

    fn recipient(endpoint: &str) -> Recipient {
        if let Some(handle) = endpoint.strip_prefix('@') {
            Recipient::ChannelUsername(format!("@{handle}"))
        } else if let Ok(id) = endpoint.parse::<i64>() {
            Recipient::Id(ChatId(id))
        } else {
            Recipient::ChannelUsername(endpoint.to_string())
        }
    }

    fn is_image(path: &str) -> bool {
        let lower = path.to_ascii_lowercase();
        ["jpg", "jpeg", "png", "gif", "webp"].iter().any(|ext| lower.ends_with(ext))
    }

    async fn send_text(&self, recipient: Recipient, text: &str) -> Outcome {
        match self.bot.send_message(recipient, text).send().await {
            Ok(_) => Outcome::Ok,
            Err(RequestError::RetryAfter(d)) => Outcome::RateLimited(d),
            Err(e) => Outcome::Error(e.to_string()),
        }
    }

    async fn send_media(&self, recipient: Recipient, path: &str, caption: Option<&str>) -> Outcome {
        let file = InputFile::file(path);
        let result = if Self::is_image(path) {
            let mut req = self.bot.send_photo(recipient, file);
            if let Some(caption) = caption {
                req = req.caption(caption);
            }
            req.send().await.map(|_| ())
        } else {
            let mut req = self.bot.send_document(recipient, file);
            if let Some(caption) = caption {
                req = req.caption(caption);
            }
            req.send().await.map(|_| ())
        };
        match result {
            Ok(()) => Outcome::Ok,
            Err(RequestError::RetryAfter(d)) => Outcome::RateLimited(d),
            Err(e) => Outcome::Error(e.to_string()),
        }
    }
}

#[async_trait::async_trait]
impl DestinationSender for ChatSender {
    async fn send(&self, endpoint: &str, body: &str, media_path: Option<&str>) -> Outcome {
        let recipient = Self::recipient(endpoint);

        let Some(path) = media_path else {
            for chunk in chunker::chunk(body, BODY_MAX) {
                match self.send_text(recipient.clone(), &chunk).await {
                    Outcome::Ok => continue,
                    other => return other,
                }
            }
            return Outcome::Ok;
        };

        if body.len() <= CAPTION_MAX {
            return self.send_media(recipient, path, Some(body)).await;
        }

        // Caption overflow: send media captionless first, then the body
        // chunked, to avoid dropping content that wouldn't fit as a caption.
        match self.send_media(recipient.clone(), path, None).await {
            Outcome::Ok => {}
            other => return other,
        }
        for chunk in chunker::chunk(body, BODY_MAX) {
            match self.send_text(recipient.clone(), &chunk).await {
                Outcome::Ok => continue,
                other => return other,
            }
        }
        Outcome::Ok
    }

    fn rate_limit_key(&self, endpoint: &str) -> String {
        format!("chat:{endpoint}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_key_is_kind_qualified() {
        let bot = teloxide::Bot::new("dummy-token");
        let sender = ChatSender::new(bot);
        assert_eq!(sender.rate_limit_key("12345"), "chat:12345");
    }

    #[test]
    fn recipient_parses_handle_and_numeric_id() {
        match ChatSender::recipient("@mychan") {
            Recipient::ChannelUsername(s) => assert_eq!(s, "@mychan"),
            _ => panic!("expected username"),
        }
        match ChatSender::recipient("-1001234") {
            Recipient::Id(ChatId(id)) => assert_eq!(id, -1001234),
            _ => panic!("expected id"),
        }
    }

    #[test]
    fn caption_overflow_thresholds_match_spec() {
        assert_eq!(BODY_MAX, 4096);
        assert_eq!(CAPTION_MAX, 1024);
    }
}
