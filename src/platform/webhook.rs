//! Generic HTTP bridge for platforms whose adapters live outside this process.
//!
//! Inbound: an adapter POSTs the normalized message as JSON to
//! `/api/relay/inbound`. Outbound: each payload is POSTed as JSON to the
//! platform's configured URL.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::WebhookConfig;
use crate::platform::{InboundMessage, OutboundPayload, Pusher};
use crate::relay::RelayEngine;

#[derive(Serialize)]
struct PushRequest<'a> {
    #[serde(flatten)]
    payload: &'a OutboundPayload,
    #[serde(skip_serializing_if = "Option::is_none")]
    token: Option<&'a str>,
}

#[derive(Serialize)]
struct InboundAck {
    status: u16,
    msg: &'static str,
}

pub struct WebhookPusher {
    client: reqwest::Client,
    config: WebhookConfig,
}

impl WebhookPusher {
    pub fn new(config: WebhookConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }
}

#[async_trait]
impl Pusher for WebhookPusher {
    async fn push(&self, payload: &OutboundPayload) -> Result<()> {
        let body = PushRequest {
            payload,
            token: self.config.token.as_deref(),
        };

        debug!("POST {} for {}", self.config.url, self.config.platform);
        self.client
            .post(&self.config.url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Failed to reach webhook for {}", self.config.platform))?
            .error_for_status()
            .with_context(|| format!("Webhook for {} rejected the push", self.config.platform))?;
        Ok(())
    }
}

pub fn router(engine: Arc<RelayEngine>) -> Router {
    Router::new()
        .route("/api/relay/inbound", get(probe).post(receive))
        .route("/health", get(|| async { "ok" }))
        .with_state(engine)
}

async fn probe() -> &'static str {
    "relay inbound endpoint; POST a normalized message as JSON"
}

/// Acknowledge right away; relaying (and any retry backoff) runs detached.
async fn receive(
    State(engine): State<Arc<RelayEngine>>,
    Json(msg): Json<InboundMessage>,
) -> Json<InboundAck> {
    tokio::spawn(async move {
        engine.handle(&msg).await;
    });
    Json(InboundAck {
        status: 200,
        msg: "ok",
    })
}

pub async fn serve(engine: Arc<RelayEngine>, bind: &str) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind to {bind}"))?;

    info!("Inbound webhook listening on http://{bind}/api/relay/inbound");

    axum::serve(listener, router(engine))
        .await
        .context("Webhook server error")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{ContentKind, TargetKind};

    fn payload() -> OutboundPayload {
        OutboundPayload {
            platform: "wxXyo".to_string(),
            target_kind: TargetKind::User,
            target_id: "wxid_abc".to_string(),
            kind: ContentKind::Text,
            text: "hello".to_string(),
            path: None,
        }
    }

    #[test]
    fn test_push_request_flattens_payload() {
        let payload = payload();
        let body = serde_json::to_value(PushRequest {
            payload: &payload,
            token: Some("secret"),
        })
        .unwrap();

        assert_eq!(body["platform"], "wxXyo");
        assert_eq!(body["targetKind"], "userId");
        assert_eq!(body["kind"], "text");
        assert_eq!(body["token"], "secret");
        assert!(body.get("path").is_none());
    }

    #[test]
    fn test_push_request_omits_missing_token() {
        let payload = payload();
        let body = serde_json::to_value(PushRequest {
            payload: &payload,
            token: None,
        })
        .unwrap();
        assert!(body.get("token").is_none());
    }

    #[tokio::test]
    async fn test_unreachable_webhook_is_an_error() {
        let pusher = WebhookPusher::new(WebhookConfig {
            platform: "wxXyo".to_string(),
            url: "http://127.0.0.1:1/send".to_string(),
            token: None,
        });
        let err = pusher.push(&payload()).await.unwrap_err();
        assert!(err.to_string().contains("wxXyo"));
    }
}
