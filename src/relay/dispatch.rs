use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::platform::{OutboundPayload, Pusher};
use crate::relay::rules::RetryPolicy;

pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);

/// Lifecycle of one (rule, destination) delivery.
///
/// `Pending -> Sending -> Delivered`, or `Sending -> Retrying -> Sending`
/// until the attempt budget runs out and it ends in `Failed`. An empty
/// payload never leaves `Pending` and ends as `Rejected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Pending,
    Sending,
    Retrying,
    Delivered,
    Failed,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub state: DispatchState,
    pub attempts: u32,
    /// Every state visited, in order
    pub history: Vec<DispatchState>,
}

impl DispatchReport {
    fn new() -> Self {
        Self {
            state: DispatchState::Pending,
            attempts: 0,
            history: vec![DispatchState::Pending],
        }
    }

    fn enter(&mut self, state: DispatchState) {
        self.state = state;
        self.history.push(state);
    }

    pub fn delivered(&self) -> bool {
        self.state == DispatchState::Delivered
    }
}

/// Hands rendered payloads to the push primitive with linear backoff retry.
#[derive(Clone)]
pub struct Dispatcher {
    pusher: Arc<dyn Pusher>,
    base_delay: Duration,
}

impl Dispatcher {
    pub fn new(pusher: Arc<dyn Pusher>, base_delay: Duration) -> Self {
        Self { pusher, base_delay }
    }

    /// Delay before the retry that follows failed attempt number `attempt`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay.checked_mul(attempt).unwrap_or(Duration::MAX)
    }

    pub async fn dispatch(&self, payload: &OutboundPayload, policy: &RetryPolicy) -> DispatchReport {
        let mut report = DispatchReport::new();
        if payload.is_empty() {
            warn!(
                "Refusing to send empty payload to {} {}",
                payload.platform, payload.target_id
            );
            report.enter(DispatchState::Rejected);
            return report;
        }

        let max_attempts = if policy.enabled {
            policy.max_attempts.max(1)
        } else {
            1
        };

        loop {
            report.attempts += 1;
            report.enter(DispatchState::Sending);
            debug!(
                "Sending to {} {} (attempt {}/{})",
                payload.platform, payload.target_id, report.attempts, max_attempts
            );

            match self.pusher.push(payload).await {
                Ok(()) => {
                    info!(
                        "Relayed to {} {}:{}",
                        payload.platform,
                        payload.target_kind.label(),
                        payload.target_id
                    );
                    report.enter(DispatchState::Delivered);
                    return report;
                }
                Err(e) if report.attempts < max_attempts => {
                    let delay = self.backoff(report.attempts);
                    warn!(
                        "Send to {} {} failed: {:#}; retrying in {:?}",
                        payload.platform, payload.target_id, e, delay
                    );
                    report.enter(DispatchState::Retrying);
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    warn!(
                        "Giving up on {} {} after {} attempt(s): {:#}",
                        payload.platform, payload.target_id, report.attempts, e
                    );
                    report.enter(DispatchState::Failed);
                    return report;
                }
            }
        }
    }
}
