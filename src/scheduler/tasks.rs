use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use crate::config::{Config, RelayConfig};
use crate::relay::dedup::DedupCache;
use crate::relay::rules::RuleStore;
use crate::scheduler::Scheduler;

/// Evict stale dedup entries even when no messages arrive.
pub async fn sweep_dedup(dedup: &DedupCache) -> usize {
    let removed = dedup.cleanup().await;
    if removed > 0 {
        info!("Dedup sweep removed {} stale entries", removed);
    }
    removed
}

/// Swap in the rule list from `path`; a broken file keeps the current rules.
pub async fn reload_rules(rules: &RuleStore, path: &Path) -> bool {
    match Config::load_rules(path) {
        Ok(fresh) => {
            rules.replace(fresh).await;
            true
        }
        Err(e) => {
            warn!("Rule reload failed, keeping current rules: {:#}", e);
            false
        }
    }
}

/// Register the relay's background jobs.
pub async fn register_relay_tasks(
    scheduler: &Scheduler,
    relay: &RelayConfig,
    dedup: Arc<DedupCache>,
    rules: Arc<RuleStore>,
    config_path: PathBuf,
) -> Result<()> {
    scheduler
        .add_cron_job(&relay.sweep_cron, "dedup-sweep", move || {
            let dedup = Arc::clone(&dedup);
            Box::pin(async move {
                sweep_dedup(&dedup).await;
            })
        })
        .await?;

    if let Some(cron) = &relay.reload_cron {
        scheduler
            .add_cron_job(cron, "rule-reload", move || {
                let rules = Arc::clone(&rules);
                let path = config_path.clone();
                Box::pin(async move {
                    reload_rules(&rules, &path).await;
                })
            })
            .await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::InboundMessage;
    use crate::relay::rules::RelayRule;
    use std::time::{Duration, Instant};

    #[tokio::test]
    async fn test_sweep_removes_expired_entries() {
        let dedup = DedupCache::new(Duration::from_millis(1));
        let msg = InboundMessage {
            platform: "qq".to_string(),
            message_id: "1".to_string(),
            ..Default::default()
        };
        dedup
            .is_duplicate_at(&msg, Instant::now() - Duration::from_secs(1))
            .await;

        assert_eq!(sweep_dedup(&dedup).await, 1);
        assert_eq!(dedup.len().await, 0);
    }

    #[tokio::test]
    async fn test_reload_rules_from_file() {
        let path = std::env::temp_dir().join(format!("relaybot-reload-{}.toml", std::process::id()));
        std::fs::write(
            &path,
            "[[rules]]\nkeywords = [\"hi\"]\n[[rules]]\nenabled = false\n",
        )
        .unwrap();

        let store = RuleStore::new(vec![RelayRule::default()]);
        assert!(reload_rules(&store, &path).await);
        let rules = store.snapshot().await;
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].keywords, vec!["hi"]);

        std::fs::write(&path, "[[rules]\nbroken").unwrap();
        assert!(!reload_rules(&store, &path).await);
        assert_eq!(store.snapshot().await.len(), 2);

        std::fs::remove_file(&path).ok();
    }
}
