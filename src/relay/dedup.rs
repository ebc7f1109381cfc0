use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::debug;

use crate::platform::InboundMessage;

pub const DEFAULT_RETENTION: Duration = Duration::from_secs(5 * 60);

/// Key identifying one logical message. Distinct messages sharing
/// platform, id and body collapse to the same key and are deduplicated.
pub fn fingerprint(msg: &InboundMessage) -> String {
    format!("{}{}{}", msg.platform, msg.message_id, msg.body)
}

/// Time-bounded map from message fingerprint to the instant it was last seen.
///
/// Eviction is opportunistic: [`DedupCache::cleanup`] runs once per inbound
/// message and from the background sweep. An entry whose age equals the
/// retention window is already expired.
pub struct DedupCache {
    window: Duration,
    seen: Mutex<HashMap<String, Instant>>,
}

impl DedupCache {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Returns true if the message was seen within the window. Records it
    /// either way; check and insert happen under one lock.
    pub async fn is_duplicate(&self, msg: &InboundMessage) -> bool {
        self.is_duplicate_at(msg, Instant::now()).await
    }

    pub async fn is_duplicate_at(&self, msg: &InboundMessage, now: Instant) -> bool {
        let key = fingerprint(msg);
        let mut seen = self.seen.lock().await;
        let duplicate = seen
            .get(&key)
            .is_some_and(|last| now.saturating_duration_since(*last) < self.window);
        seen.insert(key, now);
        duplicate
    }

    /// Drop every entry older than the window. Returns how many were removed.
    pub async fn cleanup(&self) -> usize {
        self.cleanup_at(Instant::now()).await
    }

    pub async fn cleanup_at(&self, now: Instant) -> usize {
        let mut seen = self.seen.lock().await;
        let before = seen.len();
        seen.retain(|_, last| now.saturating_duration_since(*last) < self.window);
        let removed = before - seen.len();
        if removed > 0 {
            debug!("Dedup cache evicted {} entries, {} left", removed, seen.len());
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.seen.lock().await.len()
    }
}

impl Default for DedupCache {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(id: &str, body: &str) -> InboundMessage {
        InboundMessage {
            platform: "qq".to_string(),
            user_id: "1".to_string(),
            group_id: Some("100".to_string()),
            body: body.to_string(),
            message_id: id.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_second_delivery_is_duplicate() {
        let cache = DedupCache::default();
        let t0 = Instant::now();

        assert!(!cache.is_duplicate_at(&msg("1", "hi"), t0).await);
        assert!(
            cache
                .is_duplicate_at(&msg("1", "hi"), t0 + Duration::from_secs(10))
                .await
        );
    }

    #[tokio::test]
    async fn test_different_body_or_id_is_not_duplicate() {
        let cache = DedupCache::default();
        let t0 = Instant::now();

        assert!(!cache.is_duplicate_at(&msg("1", "hi"), t0).await);
        assert!(!cache.is_duplicate_at(&msg("2", "hi"), t0).await);
        assert!(!cache.is_duplicate_at(&msg("1", "hello"), t0).await);
        assert_eq!(cache.len().await, 3);
    }

    #[tokio::test]
    async fn test_entry_at_window_boundary_is_expired() {
        let cache = DedupCache::default();
        let t0 = Instant::now();

        assert!(!cache.is_duplicate_at(&msg("1", "hi"), t0).await);
        assert!(
            !cache
                .is_duplicate_at(&msg("1", "hi"), t0 + DEFAULT_RETENTION)
                .await
        );
    }

    #[tokio::test]
    async fn test_cleanup_evicts_old_entries() {
        let cache = DedupCache::new(Duration::from_secs(60));
        let t0 = Instant::now();

        cache.is_duplicate_at(&msg("old", ""), t0).await;
        cache
            .is_duplicate_at(&msg("new", ""), t0 + Duration::from_secs(30))
            .await;

        let removed = cache.cleanup_at(t0 + Duration::from_secs(60)).await;
        assert_eq!(removed, 1);
        assert_eq!(cache.len().await, 1);
    }
}
