pub mod telegram;
pub mod webhook;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Kind of media an inbound message carries out-of-band, or that was
/// extracted from its body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    #[serde(alias = "record", alias = "audio")]
    Voice,
    Video,
    File,
}

impl MediaKind {
    /// Placeholder the chat hosts themselves use for this media kind.
    pub fn native_label(self) -> &'static str {
        match self {
            MediaKind::Image => "[图片]",
            MediaKind::Voice => "[语音]",
            MediaKind::Video => "[视频]",
            MediaKind::File => "[文件]",
        }
    }

    pub fn noun(self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Voice => "voice",
            MediaKind::Video => "video",
            MediaKind::File => "file",
        }
    }

    pub fn emoji(self) -> &'static str {
        match self {
            MediaKind::Image => "🖼️",
            MediaKind::Voice => "🎤",
            MediaKind::Video => "🎬",
            MediaKind::File => "📎",
        }
    }
}

/// Whether a listen filter or destination addresses a user or a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
pub enum TargetKind {
    #[serde(rename = "userId", alias = "user")]
    User,
    #[default]
    #[serde(rename = "groupId", alias = "group")]
    Group,
}

impl TargetKind {
    pub fn label(self) -> &'static str {
        match self {
            TargetKind::User => "用户",
            TargetKind::Group => "群",
        }
    }
}

/// A normalized message received from any platform adapter.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    /// Platform identifier (e.g., "qq", "tgBot", "wxXyo")
    #[serde(alias = "from")]
    pub platform: String,
    #[serde(default)]
    pub user_id: String,
    /// Absent, empty or "0" means a private message
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub group_name: String,
    /// Raw body; may embed media markers, CQ codes or an XML envelope
    #[serde(default, alias = "msg")]
    pub body: String,
    #[serde(default, alias = "msgId")]
    pub message_id: String,
    /// Set by adapters that deliver media out-of-band with an empty body
    #[serde(default)]
    pub media_kind: Option<MediaKind>,
    #[serde(default)]
    pub file_url: Option<String>,
}

impl InboundMessage {
    /// The group id when this is a group message.
    pub fn group(&self) -> Option<&str> {
        self.group_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty() && *id != "0")
    }

    pub fn target_kind(&self) -> TargetKind {
        if self.group().is_some() {
            TargetKind::Group
        } else {
            TargetKind::User
        }
    }

    /// Group id for group messages, user id otherwise.
    pub fn target_id(&self) -> &str {
        self.group().unwrap_or(&self.user_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    #[default]
    Text,
    File,
}

/// One fully rendered message handed to the outbound push primitive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundPayload {
    pub platform: String,
    pub target_kind: TargetKind,
    pub target_id: String,
    pub kind: ContentKind,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl OutboundPayload {
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.path.as_deref().map_or(true, str::is_empty)
    }
}

/// How much of the payload grammar a platform's bodies can contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserStrategy {
    /// Media markers, CQ codes, out-of-band media and XML envelopes
    Full,
    /// Bodies are taken verbatim as text
    TextOnly,
}

/// What a platform can receive when the relay targets it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderStrategy {
    /// Native attachments are forwarded on same-platform relays
    NativeMedia,
    /// Everything is rendered to text
    TextOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformProfile<'a> {
    pub id: &'a str,
    pub display_name: &'a str,
    pub parser: ParserStrategy,
    pub renderer: RenderStrategy,
}

const PROFILES: &[(&str, &str, ParserStrategy, RenderStrategy)] = &[
    ("qq", "QQ", ParserStrategy::Full, RenderStrategy::NativeMedia),
    ("tgBot", "Telegram", ParserStrategy::Full, RenderStrategy::NativeMedia),
    ("HumanTG", "Telegram", ParserStrategy::Full, RenderStrategy::NativeMedia),
    ("wxQianxun", "WeChat", ParserStrategy::Full, RenderStrategy::NativeMedia),
    ("wxXyo", "WeChat", ParserStrategy::Full, RenderStrategy::NativeMedia),
    ("wechaty", "WeChat", ParserStrategy::Full, RenderStrategy::NativeMedia),
    ("wecomapp", "WeCom", ParserStrategy::Full, RenderStrategy::NativeMedia),
    ("ssh", "SSH", ParserStrategy::TextOnly, RenderStrategy::TextOnly),
];

/// Look up the profile for a platform id. Unknown platforms get the full
/// parser, native media rendering, and their id as display name.
pub fn profile(platform: &str) -> PlatformProfile<'_> {
    PROFILES
        .iter()
        .find(|(id, ..)| id.eq_ignore_ascii_case(platform))
        .map(|&(_, display_name, parser, renderer)| PlatformProfile {
            id: platform,
            display_name,
            parser,
            renderer,
        })
        .unwrap_or(PlatformProfile {
            id: platform,
            display_name: platform,
            parser: ParserStrategy::Full,
            renderer: RenderStrategy::NativeMedia,
        })
}

/// The host's outbound push primitive. An `Err` counts as a delivery failure.
#[async_trait]
pub trait Pusher: Send + Sync {
    async fn push(&self, payload: &OutboundPayload) -> Result<()>;
}

/// Routes each payload to the adapter registered for its platform.
#[derive(Clone, Default)]
pub struct PushRouter {
    adapters: HashMap<String, Arc<dyn Pusher>>,
}

impl PushRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, platform: &str, pusher: Arc<dyn Pusher>) {
        self.adapters.insert(platform.to_string(), pusher);
    }

    pub fn platforms(&self) -> Vec<&str> {
        let mut platforms: Vec<&str> = self.adapters.keys().map(String::as_str).collect();
        platforms.sort_unstable();
        platforms
    }
}

#[async_trait]
impl Pusher for PushRouter {
    async fn push(&self, payload: &OutboundPayload) -> Result<()> {
        match self.adapters.get(&payload.platform) {
            Some(adapter) => adapter.push(payload).await,
            None => bail!("No adapter registered for platform '{}'", payload.platform),
        }
    }
}
