// This is the entry point of the spam moderation bot.
//
// **Architecture Overview:**
// - `core/` = Decision logic (platform-agnostic)
// - `infra/` = Implementations of core traits (trust stores, classifier vendors)
// - `discord/` = Discord-specific adapters (commands, events, actions)
//
// This file's job is to:
// 1. Load configuration
// 2. Initialize services (dependency injection)
// 3. Set up the Discord framework
// 4. Run until SIGINT/SIGTERM, then shut down in order

// These attrs point each module declaration at a more descriptive root file
// so we don't end up with half a dozen mod.rs files that all look the same.
#[path = "core/core_layer.rs"]
mod core;
#[path = "discord/discord_layer.rs"]
mod discord;
#[path = "infra/infra_layer.rs"]
mod infra;

mod config;

use crate::config::AppConfig;
use crate::core::classifier::ClassifierService;
use crate::core::moderation::history_importer::{import_if_empty, ImportOutcome};
use crate::core::moderation::{DecisionEngine, ModerationRunner};
use crate::discord::moderation::{incoming_message, DiscordActionSink};
use crate::discord::{BotRunner, Data, Error};
use crate::infra::ai::provider_from_settings;
use crate::infra::moderation::connect_trust_store;
use anyhow::Context as _;
use poise::serenity_prelude as serenity;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// How long a suppressed user stays timed out.
const SUPPRESS_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Event handler for non-command Discord events.
/// Every human message goes to the moderation runner.
async fn event_handler(
    _ctx: &serenity::Context,
    event: &serenity::FullEvent,
    _framework: poise::FrameworkContext<'_, Data, Error>,
    data: &Data,
) -> Result<(), Error> {
    if let serenity::FullEvent::Message { new_message } = event {
        // Ignore bot messages (including our own)
        if new_message.author.bot {
            return Ok(());
        }

        if let Err(e) = data.moderation.submit(incoming_message(new_message)) {
            tracing::debug!(message_id = new_message.id.get(), "Message not submitted: {}", e);
        }
    }

    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {:?}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {:?}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

fn init_tracing() {
    // RUST_LOG wins, then LOG_LEVEL, then info
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        EnvFilter::try_new(&level).unwrap_or_else(|_| EnvFilter::new("info"))
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("Invalid configuration")?;

    let store = connect_trust_store(&config.trust_store_url)
        .await
        .with_context(|| format!("Failed to open trust store {}", config.trust_store_url))?;

    // A failed import is logged and the bot starts with whatever is in the store
    if let Some(path) = &config.history_file {
        match import_if_empty(&store, path, config.moderation.user_scope).await {
            Ok(ImportOutcome::Imported { records, users }) => {
                tracing::info!(records, users, "Seeded trust store from history");
            }
            Ok(ImportOutcome::SkippedNonEmpty) => {}
            Err(e) => tracing::error!("History import failed: {}", e),
        }
    }

    let provider = provider_from_settings(
        config.provider,
        config.api_key.clone(),
        config.model.clone(),
    );
    let classifier =
        ClassifierService::new(provider, config.rate_limit.clone(), config.retry.clone());

    tracing::info!(
        provider = %config.provider,
        model = %config.model,
        spam_threshold = config.moderation.spam_threshold,
        new_user_threshold = config.moderation.new_user_threshold,
        whitelisted_channels = config.moderation.channel_policy.len(),
        "Moderation configured"
    );

    let engine = DecisionEngine::new(store, classifier, config.moderation.clone());
    let runner: Arc<BotRunner> = Arc::new(ModerationRunner::new(engine, config.shutdown_grace));

    let data = Data {
        moderation: Arc::clone(&runner),
    };

    let intents = serenity::GatewayIntents::GUILD_MESSAGES
        | serenity::GatewayIntents::MESSAGE_CONTENT // Required to read message content
        | serenity::GatewayIntents::GUILDS;

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: vec![discord::moderation::moderation()],
            event_handler: |ctx, event, framework, data| {
                Box::pin(event_handler(ctx, event, framework, data))
            },
            ..Default::default()
        })
        .setup(|ctx, _ready, framework| {
            Box::pin(async move {
                poise::builtins::register_globally(ctx, &framework.options().commands).await?;
                tracing::info!("Commands registered");

                let sink = Arc::new(DiscordActionSink::new(ctx.http.clone(), SUPPRESS_TIMEOUT));
                data.moderation.start(sink)?;

                Ok(data)
            })
        })
        .build();

    let mut client = serenity::ClientBuilder::new(&config.discord_token, intents)
        .framework(framework)
        .await
        .context("Error creating client")?;

    let shard_manager = client.shard_manager.clone();
    let shutdown_runner = Arc::clone(&runner);
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("Shutdown signal received");
        match shutdown_runner.stop().await {
            Ok(report) => tracing::info!(
                in_flight = report.in_flight,
                forced = report.forced,
                "Moderation drained"
            ),
            Err(e) => tracing::warn!("Moderation runner was not running: {}", e),
        }
        shard_manager.shutdown_all().await;
    });

    client.start().await.context("Error running bot")?;

    // The gateway can exit without a signal; make sure the store is released
    if runner.is_running() {
        if let Err(e) = runner.stop().await {
            tracing::warn!("Failed to stop moderation runner: {}", e);
        }
    }

    tracing::info!("Bot stopped");
    Ok(())
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    init_tracing();

    if let Err(e) = run().await {
        tracing::error!("{:#}", e);
        std::process::exit(1);
    }
}
