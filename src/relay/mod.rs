pub mod dedup;
pub mod dispatch;
pub mod matcher;
pub mod parser;
pub mod rules;
pub mod transform;

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::Config;
use crate::platform::{InboundMessage, Pusher};
use crate::relay::dedup::DedupCache;
use crate::relay::dispatch::{DispatchState, Dispatcher};
use crate::relay::matcher::Verdict;
use crate::relay::rules::RuleStore;

/// Advisory signal returned to the host after each message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Continuation {
    /// Keep offering the message to further handlers
    Next,
}

/// What one inbound message led to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayReport {
    pub duplicate: bool,
    pub matched_rules: usize,
    pub delivered: usize,
    pub failed: usize,
    /// Misconfigured destinations and empty payloads
    pub skipped: usize,
}

/// The relay pipeline: dedup, match, parse, transform, dispatch.
pub struct RelayEngine {
    enabled: bool,
    rules: Arc<RuleStore>,
    dedup: Arc<DedupCache>,
    dispatcher: Dispatcher,
}

impl RelayEngine {
    pub fn new(
        enabled: bool,
        rules: Arc<RuleStore>,
        dedup: Arc<DedupCache>,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            enabled,
            rules,
            dedup,
            dispatcher,
        }
    }

    pub fn from_config(config: &Config, pusher: Arc<dyn Pusher>) -> Self {
        let relay = &config.relay;
        Self::new(
            relay.enabled,
            Arc::new(RuleStore::new(config.rules.clone())),
            Arc::new(DedupCache::new(Duration::from_secs(relay.dedup_window_secs))),
            Dispatcher::new(pusher, Duration::from_millis(relay.retry_base_delay_ms)),
        )
    }

    pub fn rules(&self) -> &Arc<RuleStore> {
        &self.rules
    }

    pub fn dedup(&self) -> &Arc<DedupCache> {
        &self.dedup
    }

    /// Host entry point. Relay failures are logged, never returned.
    pub async fn handle(&self, msg: &InboundMessage) -> Continuation {
        self.process(msg).await;
        Continuation::Next
    }

    pub async fn process(&self, msg: &InboundMessage) -> RelayReport {
        let mut report = RelayReport::default();
        if !self.enabled {
            return report;
        }
        let rules = self.rules.snapshot().await;
        if rules.is_empty() {
            debug!("No relay rules configured, ignoring message");
            return report;
        }

        info!(
            "[relay] platform:{} group:{} user:{} body:{}",
            msg.platform,
            msg.group().unwrap_or("-"),
            msg.user_id,
            msg.body
        );

        self.dedup.cleanup().await;
        if self.dedup.is_duplicate(msg).await {
            debug!(
                "Dropping duplicate message {} from {}",
                msg.message_id, msg.platform
            );
            report.duplicate = true;
            return report;
        }

        let parsed = parser::parse(msg);
        debug!("Parsed message {} as {:?}", msg.message_id, parsed.kind);

        for (index, rule) in rules.iter().enumerate().filter(|(_, r)| r.enabled) {
            let verdict = matcher::evaluate(rule, msg, &parsed);
            if verdict != Verdict::Matched {
                debug!("Rule #{} skipped: {:?}", index, verdict);
                continue;
            }
            report.matched_rules += 1;
            if rule.destinations.is_empty() {
                debug!("Rule #{} matched but has no destinations", index);
                continue;
            }

            for destination in &rule.destinations {
                if !destination.is_valid() {
                    warn!(
                        "Rule #{}: skipping destination with missing platform or id: {:?}",
                        index, destination
                    );
                    report.skipped += 1;
                    continue;
                }

                let payload = transform::transform(msg, &parsed, rule, destination);
                let outcome = self.dispatcher.dispatch(&payload, &rule.retry).await;
                debug!(
                    "Rule #{} -> {} {}: {:?} after {} attempt(s)",
                    index, destination.platform, destination.id, outcome.state, outcome.attempts
                );
                match outcome.state {
                    DispatchState::Delivered => report.delivered += 1,
                    DispatchState::Rejected => report.skipped += 1,
                    _ => report.failed += 1,
                }
            }
        }

        if report.matched_rules > 0 {
            info!(
                "Message {} from {}: {} rule(s) matched, {} delivered, {} failed, {} skipped",
                msg.message_id,
                msg.platform,
                report.matched_rules,
                report.delivered,
                report.failed,
                report.skipped
            );
        }
        report
    }
}
