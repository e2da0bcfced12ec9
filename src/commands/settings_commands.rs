use poise::serenity_prelude as serenity;
use tracing::instrument;

use super::checks::is_moderator;
use super::CommandsContainer;
use crate::database::models::SettingKey;
use crate::database::SettingsStore;
use crate::utils::shorthand::BotContextExt;
use crate::{BotContext, BotData, BotError};

/// CommandsContainer for the guild configuration commands
pub struct SettingsCommands;

impl CommandsContainer for SettingsCommands {
    type Data = BotData;
    type Error = BotError;

    fn get_all() -> Vec<poise::Command<Self::Data, Self::Error>> {
        vec![
            set_mod_role(),
            set_register_channel(),
            set_registered_role(),
            set_updates_channel(),
            set_results_channel(),
        ]
    }
}

async fn set_role(
    ctx: BotContext<'_>,
    key: SettingKey,
    role: &serenity::Role,
) -> Result<(), BotError> {
    let guild_id = ctx.guild_id_string()?;
    ctx.data()
        .database
        .set_setting(&guild_id, &key.to_string(), &role.id.to_string())
        .await?;
    ctx.reply_ephemeral(format!("Set to {}.", role.name)).await?;
    Ok(())
}

async fn set_channel(
    ctx: BotContext<'_>,
    key: SettingKey,
    channel: &serenity::Channel,
) -> Result<(), BotError> {
    let guild_id = ctx.guild_id_string()?;
    ctx.data()
        .database
        .set_setting(&guild_id, &key.to_string(), &channel.id().to_string())
        .await?;
    ctx.reply_ephemeral(format!("Set to <#{}>.", channel.id()))
        .await?;
    Ok(())
}

/// Set the role allowed to run moderator commands.
#[poise::command(slash_command, guild_only, check = "is_moderator")]
#[instrument(skip(ctx))]
async fn set_mod_role(ctx: BotContext<'_>, role: serenity::Role) -> Result<(), BotError> {
    set_role(ctx, SettingKey::ModRole, &role).await
}

/// Restrict /register to one channel.
#[poise::command(slash_command, guild_only, check = "is_moderator")]
#[instrument(skip(ctx))]
async fn set_register_channel(
    ctx: BotContext<'_>,
    channel: serenity::Channel,
) -> Result<(), BotError> {
    set_channel(ctx, SettingKey::RegisterChannel, &channel).await
}

/// Set the role granted to players on registration.
#[poise::command(slash_command, guild_only, check = "is_moderator")]
#[instrument(skip(ctx))]
async fn set_registered_role(ctx: BotContext<'_>, role: serenity::Role) -> Result<(), BotError> {
    set_role(ctx, SettingKey::RegisteredRole, &role).await
}

/// Set the channel rank promotions and demotions are announced in.
#[poise::command(slash_command, guild_only, check = "is_moderator")]
#[instrument(skip(ctx))]
async fn set_updates_channel(
    ctx: BotContext<'_>,
    channel: serenity::Channel,
) -> Result<(), BotError> {
    set_channel(ctx, SettingKey::UpdatesChannel, &channel).await
}

/// Set the channel match results are posted in.
#[poise::command(slash_command, guild_only, check = "is_moderator")]
#[instrument(skip(ctx))]
async fn set_results_channel(
    ctx: BotContext<'_>,
    channel: serenity::Channel,
) -> Result<(), BotError> {
    set_channel(ctx, SettingKey::ResultsChannel, &channel).await
}
