use poise::serenity_prelude::{self as serenity, Color, CreateEmbed};
use poise::CreateReply;
use tracing::{info, instrument, warn};

use super::CommandsContainer;
use crate::database::models::{Player, SettingKey};
use crate::database::{MapStore, PlayerStore, QueueStore, RankStore, SettingsStore};
use crate::matchmaking::rank::{rank_for, sync_rank_role_best_effort};
use crate::matchmaking::GuildSync;
use crate::utils::discord::{leaderboard_buttons, leaderboard_content, DiscordSync};
use crate::utils::shorthand::BotContextExt;
use crate::{BotContext, BotData, BotError};

/// CommandsContainer for the User commands
pub struct UserCommands;

impl CommandsContainer for UserCommands {
    type Data = BotData;
    type Error = BotError;

    fn get_all() -> Vec<poise::Command<Self::Data, Self::Error>> {
        vec![
            register(),
            rename(),
            stats(),
            leaderboard(),
            ranks(),
            maps(),
            queues(),
        ]
    }
}

/// Register yourself as a player to join queues.
#[poise::command(slash_command, guild_only)]
#[instrument(skip(ctx))]
async fn register(ctx: BotContext<'_>, name: Option<String>) -> Result<(), BotError> {
    let guild_id = ctx.guild_id_string()?;
    let user_id = ctx.author().id.to_string();
    let db = &ctx.data().database;

    if let Some(register_channel) = db
        .get_setting(&guild_id, &SettingKey::RegisterChannel.to_string())
        .await?
    {
        if ctx.channel_id().to_string() != register_channel {
            ctx.reply_ephemeral(format!(
                "Please register in <#{}>.",
                register_channel
            ))
            .await?;
            return Ok(());
        }
    }

    let name = name.unwrap_or_else(|| {
        ctx.author()
            .global_name
            .clone()
            .unwrap_or_else(|| ctx.author().name.clone())
    });

    let sync = DiscordSync::new(ctx.serenity_context());
    let guild_ranks = db.get_ranks(&guild_id).await?;

    let player = Player::new(&guild_id, &user_id, &name);
    if !db.create_player(&player).await? {
        // Re-registration keeps the existing record but restores the
        // roles and nickname in case they were stripped.
        if let Some(existing) = db.get_player(&guild_id, &user_id).await? {
            if let Err(e) = sync
                .set_nickname(&guild_id, &user_id, &existing.display_label())
                .await
            {
                warn!("Failed to restore nickname for {}: {}", user_id, e);
            }
            sync_rank_role_best_effort(&sync, &guild_id, &user_id, existing.rating, &guild_ranks)
                .await;
        }
        ctx.reply_ephemeral("You are already registered.").await?;
        return Ok(());
    }
    info!("Registered player {} ({}) in guild {}", name, user_id, guild_id);

    if let Some(registered_role) = db
        .get_setting(&guild_id, &SettingKey::RegisteredRole.to_string())
        .await?
    {
        if let Err(e) = sync.add_role(&guild_id, &user_id, &registered_role).await {
            warn!("Failed to grant registered role to {}: {}", user_id, e);
        }
    }

    if let Err(e) = sync
        .set_nickname(&guild_id, &user_id, &player.display_label())
        .await
    {
        warn!("Failed to set nickname for {}: {}", user_id, e);
    }

    sync_rank_role_best_effort(&sync, &guild_id, &user_id, 0, &guild_ranks).await;

    ctx.reply_ephemeral(format!("Welcome, **{}**! You start at rating 0.", name))
        .await?;
    Ok(())
}

/// Change your registered name.
#[poise::command(slash_command, guild_only)]
#[instrument(skip(ctx))]
async fn rename(ctx: BotContext<'_>, name: String) -> Result<(), BotError> {
    let guild_id = ctx.guild_id_string()?;
    let user_id = ctx.author().id.to_string();
    let db = &ctx.data().database;

    let Some(player) = db.get_player(&guild_id, &user_id).await? else {
        ctx.reply_ephemeral("You are not registered. Use /register first.")
            .await?;
        return Ok(());
    };

    db.set_player_name(&guild_id, &user_id, &name).await?;

    let sync = DiscordSync::new(ctx.serenity_context());
    if let Err(e) = sync
        .set_nickname(&guild_id, &user_id, &format!("{} | {}", player.rating, name))
        .await
    {
        warn!("Failed to set nickname for {}: {}", user_id, e);
    }

    ctx.reply_ephemeral(format!("Your name is now **{}**.", name))
        .await?;
    Ok(())
}

/// Show a player's rating, rank and match record.
#[poise::command(slash_command, guild_only)]
#[instrument(skip(ctx))]
async fn stats(ctx: BotContext<'_>, user: Option<serenity::User>) -> Result<(), BotError> {
    let guild_id = ctx.guild_id_string()?;
    let user = user.as_ref().unwrap_or_else(|| ctx.author());
    let db = &ctx.data().database;

    let Some(player) = db.get_player(&guild_id, &user.id.to_string()).await? else {
        ctx.reply_ephemeral(format!("{} is not registered.", user.name))
            .await?;
        return Ok(());
    };

    let guild_ranks = db.get_ranks(&guild_id).await?;
    let rank_label = match rank_for(player.rating, &guild_ranks) {
        Some(rank) => format!("<@&{}>", rank.role_id),
        None => "Unranked".to_string(),
    };

    ctx.send(
        CreateReply::default()
            .embed(
                CreateEmbed::new()
                    .title(format!("Stats for {}", player.name))
                    .fields(vec![
                        ("Rating", player.rating.to_string(), true),
                        ("Rank", rank_label, true),
                        ("Matches", player.matches_played().to_string(), true),
                        ("Wins", player.wins.to_string(), true),
                        ("Losses", player.losses.to_string(), true),
                        ("MVPs", player.mvps.to_string(), true),
                    ])
                    .color(Color::BLURPLE),
            )
            .ephemeral(true),
    )
    .await?;
    Ok(())
}

/// Show the guild's players by rating, ten per page.
#[poise::command(slash_command, guild_only)]
#[instrument(skip(ctx))]
async fn leaderboard(ctx: BotContext<'_>) -> Result<(), BotError> {
    let guild_id = ctx.guild_id_string()?;
    let players = ctx.data().database.list_players(&guild_id).await?;

    if players.is_empty() {
        ctx.reply_ephemeral("No players are registered yet.").await?;
        return Ok(());
    }

    ctx.send(
        CreateReply::default()
            .content(leaderboard_content(&players, 0))
            .components(vec![leaderboard_buttons(0, players.len())])
            .ephemeral(true),
    )
    .await?;
    Ok(())
}

/// List the guild's rank tiers and their rating deltas.
#[poise::command(slash_command, guild_only)]
#[instrument(skip(ctx))]
async fn ranks(ctx: BotContext<'_>) -> Result<(), BotError> {
    let guild_id = ctx.guild_id_string()?;
    let guild_ranks = ctx.data().database.get_ranks(&guild_id).await?;

    if guild_ranks.is_empty() {
        ctx.reply_ephemeral("No ranks are configured yet.").await?;
        return Ok(());
    }

    let lines = guild_ranks
        .iter()
        .map(|rank| {
            format!(
                "<@&{}> — from {} (win +{}, loss -{}, MVP +{})",
                rank.role_id, rank.start_rating, rank.win_delta, rank.loss_delta, rank.mvp_delta
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    ctx.send(
        CreateReply::default()
            .embed(
                CreateEmbed::new()
                    .title("Ranks")
                    .description(lines)
                    .color(Color::BLURPLE),
            )
            .ephemeral(true),
    )
    .await?;
    Ok(())
}

/// List the guild's map pool.
#[poise::command(slash_command, guild_only)]
#[instrument(skip(ctx))]
async fn maps(ctx: BotContext<'_>) -> Result<(), BotError> {
    let guild_id = ctx.guild_id_string()?;
    let guild_maps = ctx.data().database.list_maps(&guild_id).await?;

    if guild_maps.is_empty() {
        ctx.reply_ephemeral("No maps are configured; matches will use the default map.")
            .await?;
        return Ok(());
    }

    ctx.reply_ephemeral(format!("Map pool:\n{}", guild_maps.join("\n")))
        .await?;
    Ok(())
}

/// List the guild's queue channels and how full they are.
#[poise::command(slash_command, guild_only)]
#[instrument(skip(ctx))]
async fn queues(ctx: BotContext<'_>) -> Result<(), BotError> {
    let guild_id = ctx.guild_id_string()?;
    let db = &ctx.data().database;
    let guild_queues = db.get_queues(&guild_id).await?;

    if guild_queues.is_empty() {
        ctx.reply_ephemeral("No queues are configured yet.").await?;
        return Ok(());
    }

    let mut lines = Vec::with_capacity(guild_queues.len());
    for queue in &guild_queues {
        let roster = db.roster(&guild_id, &queue.channel_id).await?;
        let bonus = if queue.bonus_rating > 0 {
            format!(", +{} bonus", queue.bonus_rating)
        } else {
            String::new()
        };
        lines.push(format!(
            "<#{}> — {}/10 players{}",
            queue.channel_id,
            roster.len(),
            bonus
        ));
    }

    ctx.reply_ephemeral(lines.join("\n")).await?;
    Ok(())
}
