use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{InputFile, MessageId};
use tracing::{info, warn};

use crate::platform::{ContentKind, InboundMessage, MediaKind, OutboundPayload, Pusher};
use crate::relay::RelayEngine;

/// Telegram's limit is 4096; leave room for entities.
const MAX_MESSAGE_LEN: usize = 4000;

const PHOTO_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp"];

struct TelegramContext {
    engine: Arc<RelayEngine>,
    platform: String,
}

/// Split long messages for Telegram's 4096 char limit
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < text.len() {
        let mut end = (start + max_len).min(text.len());
        // Walk back to a valid UTF-8 char boundary so slicing doesn't panic
        while end > start && !text.is_char_boundary(end) {
            end -= 1;
        }
        let actual_end = if end < text.len() {
            text[start..end]
                .rfind('\n')
                .map(|pos| start + pos + 1)
                .unwrap_or(end)
        } else {
            end
        };

        chunks.push(text[start..actual_end].to_string());
        start = actual_end;
    }

    chunks
}

/// Telegram message ids are only unique per chat, so key them by chat too.
fn message_key(chat_id: ChatId, message_id: MessageId) -> String {
    format!("{}:{}", chat_id.0, message_id.0)
}

/// Normalize a Telegram update into the relay's inbound shape.
fn to_inbound(msg: &Message, platform: &str) -> Option<InboundMessage> {
    let user = msg.from.as_ref()?;

    let media_kind = if msg.photo().is_some() {
        Some(MediaKind::Image)
    } else if msg.voice().is_some() || msg.audio().is_some() {
        Some(MediaKind::Voice)
    } else if msg.video().is_some() {
        Some(MediaKind::Video)
    } else if msg.document().is_some() {
        Some(MediaKind::File)
    } else {
        None
    };

    let body = msg.text().or_else(|| msg.caption()).unwrap_or_default();
    if body.is_empty() && media_kind.is_none() {
        return None;
    }

    let private = msg.chat.is_private();
    Some(InboundMessage {
        platform: platform.to_string(),
        user_id: user.id.0.to_string(),
        group_id: (!private).then(|| msg.chat.id.0.to_string()),
        user_name: user
            .username
            .clone()
            .unwrap_or_else(|| user.first_name.clone()),
        group_name: msg.chat.title().unwrap_or_default().to_string(),
        body: body.to_string(),
        message_id: message_key(msg.chat.id, msg.id),
        media_kind: if body.is_empty() { media_kind } else { None },
        file_url: None,
    })
}

/// Run the Telegram listener, feeding every message to the relay engine.
pub async fn run(engine: Arc<RelayEngine>, bot: Bot, platform: String) -> Result<()> {
    info!("Starting Telegram listener as platform '{}'...", platform);

    let ctx = Arc::new(TelegramContext { engine, platform });
    let handler = Update::filter_message().endpoint(handle_message);

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![ctx])
        .default_handler(|upd| async move {
            warn!("Unhandled update: {:?}", upd.id);
        })
        .error_handler(LoggingErrorHandler::with_custom_text("telegram"))
        .build()
        .dispatch()
        .await;

    Ok(())
}

async fn handle_message(msg: Message, ctx: Arc<TelegramContext>) -> ResponseResult<()> {
    if let Some(inbound) = to_inbound(&msg, &ctx.platform) {
        ctx.engine.handle(&inbound).await;
    }
    Ok(())
}

/// Outbound half of the Telegram adapter.
pub struct TelegramPusher {
    bot: Bot,
}

impl TelegramPusher {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    async fn send_file(&self, chat_id: ChatId, path: &str, caption: &str) -> Result<()> {
        let file = if path.starts_with("http://") || path.starts_with("https://") {
            InputFile::url(
                reqwest::Url::parse(path).with_context(|| format!("Invalid media url: {}", path))?,
            )
        } else {
            InputFile::file(PathBuf::from(path))
        };

        let extension = path
            .rsplit('.')
            .next()
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        if PHOTO_EXTENSIONS.contains(&extension.as_str()) {
            let mut request = self.bot.send_photo(chat_id, file);
            if !caption.is_empty() {
                request = request.caption(caption);
            }
            request.await.context("Telegram sendPhoto failed")?;
        } else {
            let mut request = self.bot.send_document(chat_id, file);
            if !caption.is_empty() {
                request = request.caption(caption);
            }
            request.await.context("Telegram sendDocument failed")?;
        }
        Ok(())
    }
}

#[async_trait]
impl Pusher for TelegramPusher {
    async fn push(&self, payload: &OutboundPayload) -> Result<()> {
        let chat_id = ChatId(
            payload
                .target_id
                .parse::<i64>()
                .with_context(|| format!("Invalid Telegram chat id: {}", payload.target_id))?,
        );

        match (&payload.kind, payload.path.as_deref()) {
            (ContentKind::File, Some(path)) => self.send_file(chat_id, path, &payload.text).await,
            _ => {
                for chunk in split_message(&payload.text, MAX_MESSAGE_LEN) {
                    self.bot
                        .send_message(chat_id, chunk)
                        .await
                        .context("Telegram sendMessage failed")?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_key_includes_chat() {
        let a = message_key(ChatId(-1001), MessageId(5));
        let b = message_key(ChatId(-1002), MessageId(5));
        assert_eq!(a, "-1001:5");
        assert_ne!(a, b);
    }

    #[test]
    fn test_short_message_not_split() {
        assert_eq!(split_message("hello", 10), vec!["hello"]);
    }

    #[test]
    fn test_split_prefers_newlines() {
        let chunks = split_message("aaaa\nbbbb\ncccc", 10);
        assert_eq!(chunks, vec!["aaaa\nbbbb\n", "cccc"]);
    }

    #[test]
    fn test_split_respects_char_boundaries() {
        let text = "转发".repeat(10);
        let chunks = split_message(&text, 7);
        assert_eq!(chunks.concat(), text);
        assert!(chunks.iter().all(|c| c.len() <= 7));
    }
}
