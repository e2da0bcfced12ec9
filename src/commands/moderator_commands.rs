use poise::serenity_prelude::{self as serenity, Color, CreateActionRow, CreateButton, CreateEmbed};
use poise::CreateReply;
use tracing::{info, instrument, warn};

use super::checks::is_moderator;
use super::CommandsContainer;
use crate::database::models::{queue_message_key, Player, Queue, Rank, SettingKey};
use crate::database::{
    MapStore, MatchStore, PlayerStore, QueueStore, RankStore, SettingsStore,
};
use crate::log::{post_match_result, rating_change_table};
use crate::matchmaking::rank::sync_rank_role_best_effort;
use crate::matchmaking::scoring;
use crate::matchmaking::GuildSync;
use crate::utils::discord::{refresh_queue_message, DiscordSync};
use crate::utils::error::MatchmakingError;
use crate::utils::shorthand::BotContextExt;
use crate::{BotContext, BotData, BotError};

/// CommandsContainer for the Moderator commands
pub struct ModeratorCommands;

impl CommandsContainer for ModeratorCommands {
    type Data = BotData;
    type Error = BotError;

    fn get_all() -> Vec<poise::Command<Self::Data, Self::Error>> {
        vec![
            score(),
            undo(),
            sub(),
            add_rank(),
            remove_rank(),
            add_map(),
            remove_map(),
            add_queue(),
            remove_queue(),
            clear_queue(),
            force_register(),
            force_rename(),
            unregister(),
            reset_season(),
        ]
    }
}

/// Replies with the precondition failure if the error is one, propagates
/// everything else to the framework's error handler.
async fn reply_or_bubble<T>(
    ctx: BotContext<'_>,
    result: Result<T, BotError>,
) -> Result<Option<T>, BotError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) => match e.downcast_ref::<MatchmakingError>() {
            Some(precondition) => {
                ctx.reply_ephemeral(precondition.to_string()).await?;
                Ok(None)
            }
            None => Err(e),
        },
    }
}

/// Score a match: record the winner and optional MVPs and apply rating
/// changes to every participant.
#[poise::command(slash_command, guild_only, check = "is_moderator")]
#[instrument(skip(ctx))]
async fn score(
    ctx: BotContext<'_>,
    #[description = "The number of the match to score"] match_number: i32,
    #[description = "The team that won, 1 or 2"] winner_team: i32,
    #[description = "First MVP, if any"] mvp1: Option<serenity::User>,
    #[description = "Second MVP, if any"] mvp2: Option<serenity::User>,
) -> Result<(), BotError> {
    let guild_id = ctx.guild_id_string()?;
    let db = &ctx.data().database;
    let sync = DiscordSync::new(ctx.serenity_context());
    let score_ctx = ctx.score_context().await?;

    ctx.defer_ephemeral().await?;

    let mvp1 = mvp1.map(|u| u.id.to_string());
    let mvp2 = mvp2.map(|u| u.id.to_string());
    let result = scoring::score(
        db,
        &sync,
        &score_ctx,
        &guild_id,
        match_number,
        winner_team,
        mvp1.as_deref(),
        mvp2.as_deref(),
    )
    .await;

    let Some(changes) = reply_or_bubble(ctx, result).await? else {
        return Ok(());
    };

    ctx.send(
        CreateReply::default()
            .content(format!(
                "Match #{} scored.\n```\n{}\n```",
                match_number,
                rating_change_table(&changes)
            ))
            .ephemeral(true),
    )
    .await?;

    if let Some(game) = db.get_match(&guild_id, match_number).await? {
        post_match_result(ctx.serenity_context(), db, &guild_id, &game, &changes).await;
    }

    Ok(())
}

/// Undo a scored match, restoring every participant's rating and record.
#[poise::command(slash_command, guild_only, check = "is_moderator")]
#[instrument(skip(ctx))]
async fn undo(ctx: BotContext<'_>, match_number: i32) -> Result<(), BotError> {
    let guild_id = ctx.guild_id_string()?;
    let db = &ctx.data().database;
    let sync = DiscordSync::new(ctx.serenity_context());

    ctx.defer_ephemeral().await?;

    let result = scoring::undo(db, &sync, &guild_id, match_number).await;
    let Some(changes) = reply_or_bubble(ctx, result).await? else {
        return Ok(());
    };

    ctx.send(
        CreateReply::default()
            .content(format!(
                "Match #{} has been unscored.\n```\n{}\n```",
                match_number,
                rating_change_table(&changes)
            ))
            .ephemeral(true),
    )
    .await?;
    Ok(())
}

/// Substitute one player of an unscored match with another user.
#[poise::command(slash_command, guild_only, check = "is_moderator")]
#[instrument(skip(ctx))]
async fn sub(
    ctx: BotContext<'_>,
    match_number: i32,
    leaving: serenity::User,
    joining: serenity::User,
) -> Result<(), BotError> {
    let guild_id = ctx.guild_id_string()?;

    let result = scoring::substitute(
        &ctx.data().database,
        &guild_id,
        match_number,
        &leaving.id.to_string(),
        &joining.id.to_string(),
    )
    .await;

    if reply_or_bubble(ctx, result).await?.is_some() {
        ctx.reply_ephemeral(format!(
            "Substituted {} for {} in match #{}.",
            joining.name, leaving.name, match_number
        ))
        .await?;
    }
    Ok(())
}

/// Create or update a rank tier bound to a role.
#[poise::command(slash_command, guild_only, check = "is_moderator")]
#[instrument(skip(ctx))]
async fn add_rank(
    ctx: BotContext<'_>,
    #[description = "Role representing this rank"] role: serenity::Role,
    #[description = "Lowest rating that qualifies for this rank"] start_rating: i64,
    #[description = "Rating gained per win at this rank"] win_delta: i64,
    #[description = "Rating lost per loss at this rank"] loss_delta: i64,
    #[description = "Extra rating for being MVP at this rank"] mvp_delta: i64,
) -> Result<(), BotError> {
    let guild_id = ctx.guild_id_string()?;

    ctx.data()
        .database
        .upsert_rank(&Rank {
            guild_id,
            role_id: role.id.to_string(),
            start_rating,
            win_delta,
            loss_delta,
            mvp_delta,
        })
        .await?;

    ctx.reply_ephemeral(format!(
        "Rank {} starts at {} (win +{}, loss -{}, MVP +{}).",
        role.name, start_rating, win_delta, loss_delta, mvp_delta
    ))
    .await?;
    Ok(())
}

/// Remove the rank tier bound to a role.
#[poise::command(slash_command, guild_only, check = "is_moderator")]
#[instrument(skip(ctx))]
async fn remove_rank(ctx: BotContext<'_>, role: serenity::Role) -> Result<(), BotError> {
    let guild_id = ctx.guild_id_string()?;

    if ctx
        .data()
        .database
        .delete_rank_by_role(&guild_id, &role.id.to_string())
        .await?
    {
        ctx.reply_ephemeral(format!("Rank {} removed.", role.name))
            .await?;
    } else {
        ctx.reply_ephemeral(format!("{} is not bound to a rank.", role.name))
            .await?;
    }
    Ok(())
}

/// Add a map to the pool matches pick from.
#[poise::command(slash_command, guild_only, check = "is_moderator")]
#[instrument(skip(ctx))]
async fn add_map(ctx: BotContext<'_>, name: String) -> Result<(), BotError> {
    let guild_id = ctx.guild_id_string()?;

    if ctx.data().database.add_map(&guild_id, &name).await? {
        ctx.reply_ephemeral(format!("Added map **{}**.", name)).await?;
    } else {
        ctx.reply_ephemeral(format!("**{}** is already in the pool.", name))
            .await?;
    }
    Ok(())
}

/// Remove a map from the pool.
#[poise::command(slash_command, guild_only, check = "is_moderator")]
#[instrument(skip(ctx))]
async fn remove_map(ctx: BotContext<'_>, name: String) -> Result<(), BotError> {
    let guild_id = ctx.guild_id_string()?;

    if ctx.data().database.remove_map(&guild_id, &name).await? {
        ctx.reply_ephemeral(format!("Removed map **{}**.", name))
            .await?;
    } else {
        ctx.reply_ephemeral(format!("**{}** is not in the pool.", name))
            .await?;
    }
    Ok(())
}

/// Turn the current channel into a matchmaking queue.
#[poise::command(slash_command, guild_only, check = "is_moderator")]
#[instrument(skip(ctx))]
async fn add_queue(
    ctx: BotContext<'_>,
    #[description = "Title shown on the queue embed"] title: Option<String>,
    #[description = "Voice channel associated with this queue"] voice_channel: Option<
        serenity::Channel,
    >,
    #[description = "Role whose members are queued automatically"] role: Option<serenity::Role>,
    #[description = "Flat rating bonus for winners of this queue"] bonus_rating: Option<i64>,
) -> Result<(), BotError> {
    let guild_id = ctx.guild_id_string()?;
    let channel_id = ctx.channel_id().to_string();
    let db = &ctx.data().database;

    let queue = Queue {
        guild_id: guild_id.clone(),
        channel_id,
        title: title.unwrap_or_else(|| "Matchmaking Queue".to_string()),
        voice_channel_id: voice_channel.map(|c| c.id().to_string()),
        role_id: role.map(|r| r.id.to_string()),
        bonus_rating: bonus_rating.unwrap_or(0),
    };
    db.upsert_queue(&queue).await?;
    info!("Queue configured in channel {} of guild {}", queue.channel_id, guild_id);

    let roster = db.roster(&guild_id, &queue.channel_id).await?;
    refresh_queue_message(ctx.serenity_context(), db, &queue, &roster).await?;

    ctx.reply_ephemeral("This channel is now a matchmaking queue.")
        .await?;
    Ok(())
}

/// Remove the queue from the current channel.
#[poise::command(slash_command, guild_only, check = "is_moderator")]
#[instrument(skip(ctx))]
async fn remove_queue(ctx: BotContext<'_>) -> Result<(), BotError> {
    let guild_id = ctx.guild_id_string()?;
    let channel_id = ctx.channel_id().to_string();
    let db = &ctx.data().database;

    ctx.data()
        .matchmaker
        .discard_proposal(&guild_id, &channel_id)
        .await;
    db.delete_setting(&guild_id, &queue_message_key(&channel_id))
        .await?;

    if db.delete_queue(&guild_id, &channel_id).await? {
        db.clear_roster(&guild_id, &channel_id).await?;
        ctx.reply_ephemeral("Queue removed.").await?;
    } else {
        ctx.reply_ephemeral("This channel is not a queue.").await?;
    }
    Ok(())
}

/// Empty the current channel's queue roster.
#[poise::command(slash_command, guild_only, check = "is_moderator")]
#[instrument(skip(ctx))]
async fn clear_queue(ctx: BotContext<'_>) -> Result<(), BotError> {
    let guild_id = ctx.guild_id_string()?;
    let channel_id = ctx.channel_id().to_string();
    let db = &ctx.data().database;

    let Some(queue) = db.get_queue(&guild_id, &channel_id).await? else {
        ctx.reply_ephemeral("This channel is not a queue.").await?;
        return Ok(());
    };

    ctx.data()
        .matchmaker
        .clear_queue(db, &guild_id, &channel_id)
        .await?;
    refresh_queue_message(ctx.serenity_context(), db, &queue, &[]).await?;

    ctx.reply_ephemeral("Queue cleared.").await?;
    Ok(())
}

/// Register another user as a player.
#[poise::command(slash_command, guild_only, check = "is_moderator")]
#[instrument(skip(ctx))]
async fn force_register(
    ctx: BotContext<'_>,
    user: serenity::User,
    name: Option<String>,
) -> Result<(), BotError> {
    let guild_id = ctx.guild_id_string()?;
    let user_id = user.id.to_string();
    let db = &ctx.data().database;

    let name = name
        .or_else(|| user.global_name.clone())
        .unwrap_or_else(|| user.name.clone());

    let player = Player::new(&guild_id, &user_id, &name);
    if !db.create_player(&player).await? {
        ctx.reply_ephemeral(format!("{} is already registered.", user.name))
            .await?;
        return Ok(());
    }

    let sync = DiscordSync::new(ctx.serenity_context());
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

    ctx.reply_ephemeral(format!("Registered **{}**.", name)).await?;
    Ok(())
}

/// Change another player's registered name.
#[poise::command(slash_command, guild_only, check = "is_moderator")]
#[instrument(skip(ctx))]
async fn force_rename(
    ctx: BotContext<'_>,
    user: serenity::User,
    name: String,
) -> Result<(), BotError> {
    let guild_id = ctx.guild_id_string()?;
    let user_id = user.id.to_string();
    let db = &ctx.data().database;

    let Some(player) = db.get_player(&guild_id, &user_id).await? else {
        ctx.reply_ephemeral(format!("{} is not registered.", user.name))
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

    ctx.reply_ephemeral(format!("{} is now named **{}**.", user.name, name))
        .await?;
    Ok(())
}

/// Remove a player's record entirely.
#[poise::command(slash_command, guild_only, check = "is_moderator")]
#[instrument(skip(ctx))]
async fn unregister(ctx: BotContext<'_>, user: serenity::User) -> Result<(), BotError> {
    let guild_id = ctx.guild_id_string()?;
    let user_id = user.id.to_string();
    let db = &ctx.data().database;

    if !db.delete_player(&guild_id, &user_id).await? {
        ctx.reply_ephemeral(format!("{} is not registered.", user.name))
            .await?;
        return Ok(());
    }

    // Drop them from any queue they were sitting in.
    for queue in db.get_queues(&guild_id).await? {
        db.remove_from_roster(&guild_id, &queue.channel_id, &user_id)
            .await?;
    }

    let sync = DiscordSync::new(ctx.serenity_context());
    if let Some(registered_role) = db
        .get_setting(&guild_id, &SettingKey::RegisteredRole.to_string())
        .await?
    {
        if let Err(e) = sync.remove_role(&guild_id, &user_id, &registered_role).await {
            warn!("Failed to remove registered role from {}: {}", user_id, e);
        }
    }
    // A rating below every threshold strips all rank roles they hold.
    let guild_ranks = db.get_ranks(&guild_id).await?;
    sync_rank_role_best_effort(&sync, &guild_id, &user_id, i64::MIN, &guild_ranks).await;

    ctx.reply_ephemeral(format!("Unregistered {}.", user.name))
        .await?;
    Ok(())
}

/// Reset the season: zero every rating and delete all match history.
#[poise::command(slash_command, guild_only, check = "is_moderator")]
#[instrument(skip(ctx))]
async fn reset_season(ctx: BotContext<'_>) -> Result<(), BotError> {
    ctx.send(
        CreateReply::default()
            .embed(
                CreateEmbed::new()
                    .title("Reset the season?")
                    .description(
                        "Every player's rating and record will be zeroed and all \
                         match history deleted. This cannot be undone.",
                    )
                    .color(Color::RED),
            )
            .components(vec![CreateActionRow::Buttons(vec![
                CreateButton::new("season_reset_yes")
                    .label("Reset")
                    .style(serenity::ButtonStyle::Danger),
                CreateButton::new("season_reset_no")
                    .label("Cancel")
                    .style(serenity::ButtonStyle::Secondary),
            ])])
            .ephemeral(true),
    )
    .await?;
    Ok(())
}
