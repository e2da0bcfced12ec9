use std::str::FromStr;

use anyhow::anyhow;
use poise::serenity_prelude::{
    self as serenity, ComponentInteraction, CreateInteractionResponse,
    CreateInteractionResponseMessage,
};
use tracing::{info, warn};

use crate::commands::checks::member_is_moderator;
use crate::database::models::{Player, Queue};
use crate::database::{MatchStore, PgDatabase, PlayerStore, QueueStore, RankStore};
use crate::matchmaking::rank::sync_rank_role_best_effort;
use crate::matchmaking::roster::{JoinOutcome, LeaveOutcome, RoleSyncChange};
use crate::matchmaking::GuildSync;
use crate::utils::discord::{
    leaderboard_buttons, leaderboard_content, leaderboard_page_count, match_embed,
    proposal_buttons, proposal_embed, queue_buttons, queue_embed, refresh_queue_message,
    DiscordSync,
};
use crate::{BotData, BotError};

pub async fn event_handler(
    ctx: &serenity::Context,
    event: &serenity::FullEvent,
    _framework: poise::FrameworkContext<'_, BotData, BotError>,
    data: &BotData,
) -> Result<(), BotError> {
    match event {
        serenity::FullEvent::InteractionCreate {
            interaction: serenity::Interaction::Component(component),
        } => match component.data.custom_id.as_str() {
            "queue_join" => handle_queue_join(ctx, data, component).await?,
            "queue_leave" => handle_queue_leave(ctx, data, component).await?,
            "match_next" => handle_match_confirm(ctx, data, component).await?,
            "match_teams" => handle_match_reroll(ctx, data, component, false).await?,
            "match_maps" => handle_match_reroll(ctx, data, component, true).await?,
            "season_reset_yes" => handle_season_reset(ctx, data, component).await?,
            "season_reset_no" => {
                respond_update(
                    ctx,
                    component,
                    CreateInteractionResponseMessage::new()
                        .content("Season reset cancelled.")
                        .embeds(vec![])
                        .components(vec![]),
                )
                .await?;
            }
            id => {
                if let Some(page) = id.strip_prefix("leaderboard_page_") {
                    handle_leaderboard_page(ctx, data, component, page).await?;
                }
            }
        },
        serenity::FullEvent::GuildMemberUpdate { event, .. } => {
            handle_member_roles_changed(ctx, data, event).await?;
        }
        _ => {}
    }
    Ok(())
}

async fn respond_ephemeral(
    ctx: &serenity::Context,
    component: &ComponentInteraction,
    content: impl Into<String>,
) -> Result<(), BotError> {
    component
        .create_response(
            ctx,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new()
                    .content(content)
                    .ephemeral(true),
            ),
        )
        .await?;
    Ok(())
}

async fn respond_update(
    ctx: &serenity::Context,
    component: &ComponentInteraction,
    message: CreateInteractionResponseMessage,
) -> Result<(), BotError> {
    component
        .create_response(ctx, CreateInteractionResponse::UpdateMessage(message))
        .await?;
    Ok(())
}

fn component_scope(component: &ComponentInteraction) -> Result<(String, String), BotError> {
    let guild_id = component
        .guild_id
        .ok_or(anyhow!("Component used outside of a guild"))?
        .to_string();
    Ok((guild_id, component.channel_id.to_string()))
}

/// Rejects the interaction with an ephemeral message unless the presser is a
/// moderator.
async fn require_moderator(
    ctx: &serenity::Context,
    data: &BotData,
    component: &ComponentInteraction,
    guild_id: &str,
) -> Result<bool, BotError> {
    let allowed = match &component.member {
        Some(member) => member_is_moderator(&data.database, guild_id, member).await?,
        None => false,
    };
    if !allowed {
        respond_ephemeral(ctx, component, "Only moderators can use this button.").await?;
    }
    Ok(allowed)
}

async fn handle_queue_join(
    ctx: &serenity::Context,
    data: &BotData,
    component: &ComponentInteraction,
) -> Result<(), BotError> {
    let (guild_id, channel_id) = component_scope(component)?;
    let user_id = component.user.id.to_string();
    let db = &data.database;

    let outcome = data
        .matchmaker
        .join_queue(db, &guild_id, &channel_id, &user_id)
        .await?;

    match outcome {
        JoinOutcome::NotRegistered => {
            respond_ephemeral(ctx, component, "You need to /register before joining a queue.")
                .await?;
        }
        JoinOutcome::AlreadyQueued => {
            respond_ephemeral(ctx, component, "You are already in this queue.").await?;
        }
        JoinOutcome::Full => {
            respond_ephemeral(
                ctx,
                component,
                "This queue has a match waiting for confirmation. Try again shortly.",
            )
            .await?;
        }
        JoinOutcome::Joined(roster) => {
            if let Some(queue) = db.get_queue(&guild_id, &channel_id).await? {
                respond_update(
                    ctx,
                    component,
                    CreateInteractionResponseMessage::new()
                        .embed(queue_embed(&queue, &roster))
                        .components(vec![queue_buttons()]),
                )
                .await?;
            }
        }
        JoinOutcome::Filled(proposal) => {
            if let Some(queue) = db.get_queue(&guild_id, &channel_id).await? {
                respond_update(
                    ctx,
                    component,
                    CreateInteractionResponseMessage::new()
                        .embed(queue_embed(&queue, &[]))
                        .components(vec![queue_buttons()]),
                )
                .await?;
            }
            component
                .channel_id
                .send_message(
                    ctx,
                    serenity::CreateMessage::new()
                        .embed(proposal_embed(&proposal))
                        .components(vec![proposal_buttons()]),
                )
                .await?;
        }
    }
    Ok(())
}

async fn handle_queue_leave(
    ctx: &serenity::Context,
    data: &BotData,
    component: &ComponentInteraction,
) -> Result<(), BotError> {
    let (guild_id, channel_id) = component_scope(component)?;
    let user_id = component.user.id.to_string();
    let db = &data.database;

    let outcome = data
        .matchmaker
        .leave_queue(db, &guild_id, &channel_id, &user_id)
        .await?;

    match outcome {
        LeaveOutcome::NotQueued => {
            respond_ephemeral(ctx, component, "You are not in this queue.").await?;
        }
        LeaveOutcome::Left(roster) => {
            if let Some(queue) = db.get_queue(&guild_id, &channel_id).await? {
                respond_update(
                    ctx,
                    component,
                    CreateInteractionResponseMessage::new()
                        .embed(queue_embed(&queue, &roster))
                        .components(vec![queue_buttons()]),
                )
                .await?;
            }
        }
    }
    Ok(())
}

async fn handle_match_confirm(
    ctx: &serenity::Context,
    data: &BotData,
    component: &ComponentInteraction,
) -> Result<(), BotError> {
    let (guild_id, channel_id) = component_scope(component)?;
    if !require_moderator(ctx, data, component, &guild_id).await? {
        return Ok(());
    }

    let game = match data
        .matchmaker
        .finalize_match(&data.database, &guild_id, &channel_id)
        .await
    {
        Ok(game) => game,
        Err(e) => {
            respond_ephemeral(ctx, component, e.to_string()).await?;
            return Ok(());
        }
    };

    respond_update(
        ctx,
        component,
        CreateInteractionResponseMessage::new()
            .embed(match_embed(&game))
            .components(vec![]),
    )
    .await?;
    Ok(())
}

async fn handle_match_reroll(
    ctx: &serenity::Context,
    data: &BotData,
    component: &ComponentInteraction,
    reroll_map: bool,
) -> Result<(), BotError> {
    let (guild_id, channel_id) = component_scope(component)?;
    if !require_moderator(ctx, data, component, &guild_id).await? {
        return Ok(());
    }

    let result = if reroll_map {
        data.matchmaker
            .reshuffle_map(&data.database, &guild_id, &channel_id)
            .await
    } else {
        data.matchmaker.reshuffle_teams(&guild_id, &channel_id).await
    };

    match result {
        Ok(proposal) => {
            respond_update(
                ctx,
                component,
                CreateInteractionResponseMessage::new()
                    .embed(proposal_embed(&proposal))
                    .components(vec![proposal_buttons()]),
            )
            .await?;
        }
        Err(e) => respond_ephemeral(ctx, component, e.to_string()).await?,
    }
    Ok(())
}

async fn handle_season_reset(
    ctx: &serenity::Context,
    data: &BotData,
    component: &ComponentInteraction,
) -> Result<(), BotError> {
    let (guild_id, _) = component_scope(component)?;
    if !require_moderator(ctx, data, component, &guild_id).await? {
        return Ok(());
    }

    let db = &data.database;
    let players = db.list_players(&guild_id).await?;
    db.reset_players(&guild_id).await?;
    db.delete_matches(&guild_id).await?;
    info!("Season reset in guild {}", guild_id);

    respond_update(
        ctx,
        component,
        CreateInteractionResponseMessage::new()
            .content("Season reset. All ratings and match history cleared.")
            .embeds(vec![])
            .components(vec![]),
    )
    .await?;

    // Bring roles and nicknames back in line with the zeroed ratings.
    let sync = DiscordSync::new(ctx);
    let ranks = db.get_ranks(&guild_id).await?;
    for player in players {
        sync_rank_role_best_effort(&sync, &guild_id, &player.user_id, 0, &ranks).await;
        if let Err(e) = sync
            .set_nickname(&guild_id, &player.user_id, &format!("0 | {}", player.name))
            .await
        {
            warn!("Failed to reset nickname for {}: {}", player.user_id, e);
        }
    }

    Ok(())
}

async fn handle_leaderboard_page(
    ctx: &serenity::Context,
    data: &BotData,
    component: &ComponentInteraction,
    page: &str,
) -> Result<(), BotError> {
    let Ok(page) = page.parse::<usize>() else {
        return Ok(());
    };
    let (guild_id, _) = component_scope(component)?;

    let players = data.database.list_players(&guild_id).await?;
    let page = page.min(leaderboard_page_count(players.len()) - 1);

    respond_update(
        ctx,
        component,
        CreateInteractionResponseMessage::new()
            .content(leaderboard_content(&players, page))
            .components(vec![leaderboard_buttons(page, players.len())]),
    )
    .await?;
    Ok(())
}

/// Folds queue-role grants and revocations into the same roster operations
/// as the buttons: gaining a queue's membership role joins its roster,
/// losing it leaves. Reconciles against the member's full role set, so it
/// also works when the previous member state was not cached.
async fn handle_member_roles_changed(
    ctx: &serenity::Context,
    data: &BotData,
    event: &serenity::GuildMemberUpdateEvent,
) -> Result<(), BotError> {
    let guild_id = event.guild_id.to_string();
    let user_id = event.user.id.to_string();
    let held: Vec<String> = event.roles.iter().map(|role| role.to_string()).collect();
    let db = &data.database;

    let changes = data
        .matchmaker
        .reconcile_role_queues(db, &guild_id, &user_id, &held)
        .await?;

    for change in changes {
        match change {
            RoleSyncChange::Joined(queue, roster) => {
                info!(
                    "Queued {} in {} after a role grant",
                    user_id, queue.channel_id
                );
                refresh_queue(ctx, db, &queue, &roster).await;
            }
            RoleSyncChange::Left(queue, roster) => {
                info!(
                    "Removed {} from queue {} after a role loss",
                    user_id, queue.channel_id
                );
                refresh_queue(ctx, db, &queue, &roster).await;
            }
            RoleSyncChange::Filled(queue, proposal) => {
                refresh_queue(ctx, db, &queue, &[]).await;
                if let Ok(channel) = serenity::ChannelId::from_str(&queue.channel_id) {
                    if let Err(e) = channel
                        .send_message(
                            ctx,
                            serenity::CreateMessage::new()
                                .embed(proposal_embed(&proposal))
                                .components(vec![proposal_buttons()]),
                        )
                        .await
                    {
                        warn!(
                            "Failed to announce proposed match #{}: {}",
                            proposal.match_number, e
                        );
                    }
                }
            }
        }
    }
    Ok(())
}

async fn refresh_queue(ctx: &serenity::Context, db: &PgDatabase, queue: &Queue, roster: &[Player]) {
    if let Err(e) = refresh_queue_message(ctx, db, queue, roster).await {
        warn!(
            "Failed to refresh queue message in channel {}: {}",
            queue.channel_id, e
        );
    }
}
