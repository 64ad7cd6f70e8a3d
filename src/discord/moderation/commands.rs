// Moderation slash commands - read-only views of policy, counters and trust.

use crate::core::moderation::{ClassifyPolicy, UserScope};
use crate::discord::{Data, Error};
use poise::serenity_prelude as serenity;

type Context<'a> = poise::Context<'a, Data, Error>;

/// Spam moderation commands.
#[poise::command(
    slash_command,
    subcommands("status", "trust"),
    required_permissions = "MANAGE_MESSAGES",
    guild_only
)]
pub async fn moderation(_ctx: Context<'_>) -> Result<(), Error> {
    // Parent command - shows help
    Ok(())
}

/// Show the active moderation policy and decision counters.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_MESSAGES")]
pub async fn status(ctx: Context<'_>) -> Result<(), Error> {
    let runner = &ctx.data().moderation;
    let engine = runner.engine();
    let config = engine.config();
    let classifier = engine.classifier();
    let stats = engine.stats();

    let policy = format!(
        "Spam threshold: **{:.2}**\nSuppress threshold: **{}**\nNew user: **≤ {}** messages\nClassify: **{}**\nScope: **{}**",
        config.spam_threshold,
        config
            .suppress_threshold
            .map(|t| format!("{:.2}", t))
            .unwrap_or_else(|| "off".to_string()),
        config.new_user_threshold,
        match config.classify_policy {
            ClassifyPolicy::NewUsersOnly => "new users only",
            ClassifyPolicy::AllUsers => "all users",
        },
        match config.user_scope {
            UserScope::Global => "global",
            UserScope::PerChannel => "per channel",
        },
    );

    let failures = format!(
        "Classifier: **{}**\nStore: **{}**",
        config.classifier_failure_policy, config.store_failure_policy
    );

    let counters = format!(
        "Allowed: {}\nFlagged: {}\nSuppressed: {}\nWhitelisted: {}\nClassifier calls: {} ({} failed)\nStore failures: {}\nAbandoned: {}",
        stats.allowed,
        stats.flagged,
        stats.suppressed,
        stats.whitelisted,
        stats.classifier_calls,
        stats.classifier_failures,
        stats.store_failures,
        stats.abandoned,
    );

    let limits = classifier.rate_limit();
    let rate = if limits.rate_per_sec <= 0.0 {
        "unlimited".to_string()
    } else {
        format!("{}/s, burst {}", limits.rate_per_sec, limits.burst)
    };

    let whitelist = if config.channel_policy.is_empty() {
        "none".to_string()
    } else {
        config
            .channel_policy
            .channels()
            .iter()
            .map(|id| format!("<#{}>", id))
            .collect::<Vec<_>>()
            .join(" ")
    };

    let embed = serenity::CreateEmbed::new()
        .title("🛡️ Spam Moderation Status")
        .color(if runner.is_running() { 0x00FF00 } else { 0xFF0000 })
        .field(
            "Classifier",
            format!(
                "{} / `{}`\nRate: {}\nAttempts per message: {}",
                classifier.provider_name(),
                classifier.model(),
                rate,
                classifier.retry_policy().max_attempts
            ),
            false,
        )
        .field("Policy", policy, true)
        .field("On failure", failures, true)
        .field("Counters", counters, false)
        .field("Whitelisted channels", whitelist, false);

    ctx.send(poise::CreateReply::default().embed(embed).ephemeral(true))
        .await?;
    Ok(())
}

/// Look up what the bot knows about a user.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_MESSAGES")]
pub async fn trust(
    ctx: Context<'_>,
    #[description = "User to look up"] user: serenity::User,
) -> Result<(), Error> {
    let engine = ctx.data().moderation.engine();
    let config = engine.config();
    let key = config
        .user_scope
        .key_for(user.id.get() as i64, Some(ctx.channel_id().get() as i64));

    let record = engine
        .user_record(&key)
        .await
        .map_err(|e| Error::from(e.to_string()))?;

    let reply = match record {
        None => format!("<@{}> has no recorded messages yet.", user.id),
        Some(record) => {
            let standing = if record.interaction_count > config.new_user_threshold {
                "established"
            } else {
                "new"
            };
            let trusted = match record.trusted {
                Some(false) => "flagged before",
                Some(true) => "trusted",
                None => "no verdict",
            };
            format!(
                "<@{}>: **{}** messages ({}), {}, last seen <t:{}:R>",
                user.id,
                record.interaction_count,
                standing,
                trusted,
                record.last_seen.timestamp()
            )
        }
    };

    ctx.send(poise::CreateReply::default().content(reply).ephemeral(true))
        .await?;
    Ok(())
}
