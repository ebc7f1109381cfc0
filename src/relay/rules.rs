use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

use crate::platform::{MediaKind, TargetKind};

/// Keyword that matches every message, including empty bodies.
pub const ANY_KEYWORD: &str = "ANY";
/// Legacy spelling of [`ANY_KEYWORD`] found in older host configs.
const ANY_KEYWORD_LEGACY: &str = "任意";

pub fn is_any_keyword(keyword: &str) -> bool {
    keyword == ANY_KEYWORD || keyword == ANY_KEYWORD_LEGACY
}

/// Category used by the message-type gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageCategory {
    Text,
    Image,
    Voice,
    Video,
    File,
}

impl From<MediaKind> for MessageCategory {
    fn from(kind: MediaKind) -> Self {
        match kind {
            MediaKind::Image => MessageCategory::Image,
            MediaKind::Voice => MessageCategory::Voice,
            MediaKind::Video => MessageCategory::Video,
            MediaKind::File => MessageCategory::File,
        }
    }
}

/// Per-rule allow-list of message categories.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct MessageTypeFilter {
    pub text: bool,
    pub image: bool,
    pub voice: bool,
    pub video: bool,
    pub file: bool,
}

impl Default for MessageTypeFilter {
    fn default() -> Self {
        Self {
            text: true,
            image: true,
            voice: false,
            video: false,
            file: true,
        }
    }
}

impl MessageTypeFilter {
    pub fn allows(&self, category: MessageCategory) -> bool {
        match category {
            MessageCategory::Text => self.text,
            MessageCategory::Image => self.image,
            MessageCategory::Voice => self.voice,
            MessageCategory::Video => self.video,
            MessageCategory::File => self.file,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ListenFilter {
    #[serde(alias = "from")]
    pub platform: String,
    #[serde(rename = "type", default)]
    pub kind: TargetKind,
    #[serde(default, alias = "id")]
    pub ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Destination {
    #[serde(default, alias = "from")]
    pub platform: String,
    #[serde(rename = "type", default)]
    pub kind: TargetKind,
    #[serde(default)]
    pub id: String,
}

impl Destination {
    /// A destination needs both a platform and a target id.
    pub fn is_valid(&self) -> bool {
        !self.platform.trim().is_empty() && !self.id.trim().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ReplaceRule {
    #[serde(alias = "old")]
    pub pattern: String,
    #[serde(default, alias = "new")]
    pub replacement: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RetryPolicy {
    #[serde(rename = "retry_on_fail", alias = "retryOnFail", default)]
    pub enabled: bool,
    #[serde(
        rename = "max_retries",
        alias = "maxRetries",
        default = "default_max_attempts"
    )]
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            max_attempts: default_max_attempts(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_true() -> bool {
    true
}

fn default_keywords() -> Vec<String> {
    vec![ANY_KEYWORD.to_string()]
}

/// One relay policy: which sources to listen to, what to filter on, and
/// where to send the transformed message.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RelayRule {
    #[serde(default = "default_true", alias = "enable")]
    pub enabled: bool,
    #[serde(default = "default_true", alias = "showSource")]
    pub show_source: bool,
    #[serde(default = "default_true", alias = "showTime")]
    pub show_time: bool,
    #[serde(default, alias = "msgTypes")]
    pub message_types: MessageTypeFilter,
    #[serde(default)]
    pub listen: Vec<ListenFilter>,
    #[serde(default = "default_keywords", alias = "rule")]
    pub keywords: Vec<String>,
    #[serde(default, alias = "toSender")]
    pub destinations: Vec<Destination>,
    #[serde(default)]
    pub replace: Vec<ReplaceRule>,
    /// Appended after the body; a literal `\n` becomes a newline
    #[serde(default, alias = "addText")]
    pub add_text: String,
    #[serde(flatten)]
    pub retry: RetryPolicy,
}

impl Default for RelayRule {
    fn default() -> Self {
        Self {
            enabled: true,
            show_source: true,
            show_time: true,
            message_types: MessageTypeFilter::default(),
            listen: Vec::new(),
            keywords: default_keywords(),
            destinations: Vec::new(),
            replace: Vec::new(),
            add_text: String::new(),
            retry: RetryPolicy::default(),
        }
    }
}

impl RelayRule {
    pub fn trailing_text(&self) -> String {
        self.add_text.replace("\\n", "\n")
    }
}

/// Ordered rule list. Each invocation works on an immutable snapshot taken
/// at its start; reloads swap the whole list.
pub struct RuleStore {
    rules: RwLock<Arc<Vec<RelayRule>>>,
}

impl RuleStore {
    pub fn new(rules: Vec<RelayRule>) -> Self {
        Self {
            rules: RwLock::new(Arc::new(rules)),
        }
    }

    pub async fn snapshot(&self) -> Arc<Vec<RelayRule>> {
        Arc::clone(&*self.rules.read().await)
    }

    pub async fn replace(&self, rules: Vec<RelayRule>) {
        let enabled = rules.iter().filter(|r| r.enabled).count();
        *self.rules.write().await = Arc::new(rules);
        info!("Rule store updated: {} enabled rule(s)", enabled);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_rule_defaults() {
        let rule: RelayRule = toml::from_str(
            r#"
            [[listen]]
            platform = "qq"
            ids = ["100"]
            "#,
        )
        .unwrap();

        assert!(rule.enabled);
        assert!(rule.show_source && rule.show_time);
        assert_eq!(rule.keywords, vec!["ANY"]);
        assert_eq!(rule.listen[0].kind, TargetKind::Group);
        assert_eq!(rule.message_types, MessageTypeFilter::default());
        assert!(!rule.retry.enabled);
        assert_eq!(rule.retry.max_attempts, 3);
    }

    #[test]
    fn test_legacy_field_names() {
        let json = r#"{
            "enable": true,
            "listen": [{"from": "qq", "type": "userId", "id": ["42"]}],
            "rule": ["任意"],
            "toSender": [{"from": "tgBot", "type": "groupId", "id": "300"}],
            "replace": [{"old": "foo", "new": "bar"}],
            "addText": "\\n-- relayed",
            "retryOnFail": true,
            "maxRetries": 5
        }"#;
        let rule: RelayRule = serde_json::from_str(json).unwrap();

        assert_eq!(rule.listen[0].kind, TargetKind::User);
        assert_eq!(rule.listen[0].ids, vec!["42"]);
        assert!(is_any_keyword(&rule.keywords[0]));
        assert_eq!(rule.destinations[0].id, "300");
        assert_eq!(rule.replace[0].replacement, "bar");
        assert_eq!(rule.trailing_text(), "\n-- relayed");
        assert!(rule.retry.enabled);
        assert_eq!(rule.retry.max_attempts, 5);
    }

    #[test]
    fn test_type_filter_defaults() {
        let filter = MessageTypeFilter::default();
        assert!(filter.allows(MessageCategory::Text));
        assert!(filter.allows(MessageCategory::Image));
        assert!(filter.allows(MessageCategory::File));
        assert!(!filter.allows(MessageCategory::Voice));
        assert!(!filter.allows(MessageCategory::Video));
    }

    #[test]
    fn test_destination_validity() {
        let mut dest = Destination {
            platform: "qq".to_string(),
            kind: TargetKind::Group,
            id: "1".to_string(),
        };
        assert!(dest.is_valid());
        dest.id = " ".to_string();
        assert!(!dest.is_valid());
    }

    #[tokio::test]
    async fn test_snapshot_survives_replace() {
        let store = RuleStore::new(vec![RelayRule::default()]);
        let before = store.snapshot().await;

        store.replace(Vec::new()).await;

        assert_eq!(before.len(), 1);
        assert!(store.snapshot().await.is_empty());
    }
}
