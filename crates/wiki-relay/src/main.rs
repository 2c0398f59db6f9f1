use anyhow::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use wiki_relay::config::Settings;
use wiki_relay::slack::SlackChannelClient;
use wiki_relay::wikipedia::WikipediaClient;
use wiki_relay::Relay;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,wiki_relay=debug")),
        )
        .with_target(true)
        .with_thread_ids(true)
        .json()
        .init();

    let settings = Settings::load()?;
    if let Err(e) = settings.validate() {
        error!("{}. Check your .env file", e);
        return Err(e);
    }
    info!("Token loaded: {}...", settings.slack.token_preview());

    let mut relay = Relay::new(
        Arc::new(SlackChannelClient::new(&settings.slack)?),
        Arc::new(WikipediaClient::new(&settings.wikipedia)),
        settings.relay.clone(),
        settings.messages.clone(),
    );

    relay.startup().await;

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        info!("Received Ctrl+C, stopping");
        signal_token.cancel();
    });

    relay.run(shutdown).await;
    Ok(())
}
