use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use teloxide::Bot;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use postlinker::config::{BindingMode, Config};
use postlinker::processor::{BindingResolver, PostProcessor};
use postlinker::resolver::{ChannelResolver, GlobalResolver};
use postlinker::store::Store;
use postlinker::telegram::{self, TelegramGateway};
use postlinker::webhook::{self, WebhookState};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,postlinker=debug".into()),
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
    info!("  Binding mode: {}", config.binding.mode);
    info!("  Database: {}", config.database.path.display());
    info!("  Edit timeout: {}s", config.gateway.edit_timeout_secs);

    let store = Store::open(&config.database.path)?;

    let resolver: Arc<dyn BindingResolver> = match config.binding.mode {
        BindingMode::Multi => Arc::new(ChannelResolver::new(store.clone())),
        BindingMode::Single => Arc::new(GlobalResolver::new(store.clone())),
    };

    let bot = Bot::new(&config.telegram.bot_token);
    let gateway = Arc::new(TelegramGateway::new(
        bot.clone(),
        config.telegram.parse_mode,
    ));

    let processor = Arc::new(PostProcessor::new(
        resolver,
        gateway,
        Arc::new(store),
        config.gateway.edit_timeout(),
    ));

    match &config.telegram.webhook {
        Some(webhook_config) => {
            telegram::register_webhook(&bot, webhook_config).await?;
            let state = WebhookState::new(processor, webhook_config.secret.clone());
            webhook::serve(webhook_config.listen_addr()?, state).await?;
        }
        None => telegram::run_polling(bot, processor).await?,
    }

    Ok(())
}
