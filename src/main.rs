mod config;
mod platform;
mod relay;
mod scheduler;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::platform::telegram::TelegramPusher;
use crate::platform::webhook::WebhookPusher;
use crate::platform::PushRouter;
use crate::relay::RelayEngine;
use crate::scheduler::Scheduler;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,relaybot=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!("Configuration loaded successfully");
    info!("  Relay enabled: {}", config.relay.enabled);
    info!(
        "  Rules: {} ({} enabled)",
        config.rules.len(),
        config.enabled_rule_count()
    );
    info!("  Dedup window: {}s", config.relay.dedup_window_secs);
    info!("  Webhook bridges: {}", config.webhooks.len());
    if config.rules.is_empty() {
        warn!("No relay rules configured; messages will pass through untouched");
    }

    // Outbound adapters
    let mut router = PushRouter::new();
    let telegram_bot = config
        .telegram
        .as_ref()
        .map(|tg| (teloxide::Bot::new(&tg.bot_token), tg.platform.clone()));
    if let Some((bot, platform_id)) = &telegram_bot {
        router.register(platform_id, Arc::new(TelegramPusher::new(bot.clone())));
    }
    for hook in &config.webhooks {
        router.register(&hook.platform, Arc::new(WebhookPusher::new(hook.clone())));
    }
    info!("  Outbound platforms: {:?}", router.platforms());

    let engine = Arc::new(RelayEngine::from_config(&config, Arc::new(router)));

    // Background maintenance
    let mut scheduler = Scheduler::new().await?;
    scheduler::tasks::register_relay_tasks(
        &scheduler,
        &config.relay,
        Arc::clone(engine.dedup()),
        Arc::clone(engine.rules()),
        config_path.clone(),
    )
    .await?;
    scheduler.start().await?;

    // Inbound adapters
    let mut listeners = JoinSet::new();
    if let Some(server) = &config.server {
        let engine = Arc::clone(&engine);
        let bind = server.bind.clone();
        listeners.spawn(async move { platform::webhook::serve(engine, &bind).await });
    }
    if let Some((bot, platform_id)) = telegram_bot {
        let engine = Arc::clone(&engine);
        listeners.spawn(async move { platform::telegram::run(engine, bot, platform_id).await });
    }
    if listeners.is_empty() {
        warn!("No inbound adapters configured ([telegram] or [server]); exiting");
        scheduler.shutdown().await?;
        return Ok(());
    }

    info!("Relay is running...");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown requested");
        }
        _ = async {
            while let Some(result) = listeners.join_next().await {
                match result {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => error!("Inbound adapter stopped: {:#}", e),
                    Err(e) => error!("Inbound adapter panicked: {}", e),
                }
            }
        } => {
            warn!("All inbound adapters stopped");
        }
    }

    scheduler.shutdown().await?;
    Ok(())
}
