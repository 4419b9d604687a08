use std::time::Duration;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use relay::bot::{self, POLL_TIMEOUT_SECS};
use relay::config::RelayConfig;
use relay::telegram::TelegramClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,relay=debug")),
        )
        .init();

    let config = RelayConfig::from_env();
    let token = config
        .telegram_bot_token
        .as_deref()
        .context("TELEGRAM_BOT_TOKEN is not set")?;

    // The long poll must outlive the client's request timeout.
    let client = TelegramClient::new(
        &config.telegram_api_base,
        token,
        Duration::from_secs(POLL_TIMEOUT_SECS + config.telegram_timeout_secs),
    )?;

    info!("Chat id bot running, waiting for messages");

    tokio::select! {
        () = bot::run(client) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
