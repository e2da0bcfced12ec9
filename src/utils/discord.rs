use std::str::FromStr;

use poise::serenity_prelude::{
    self as serenity, ButtonStyle, ChannelId, Color, CreateActionRow, CreateButton, CreateEmbed,
    CreateEmbedFooter, CreateMessage, EditMember, GuildId, Mentionable, MessageId, RoleId, UserId,
};
use prettytable::{row, Table};
use tracing::warn;

use crate::database::models::{queue_message_key, Match, Player, Queue};
use crate::database::SettingsStore;
use crate::matchmaking::formation::{MatchProposal, QUEUE_CAPACITY};
use crate::matchmaking::{GuildSync, RankChangeNotice};
use crate::BotError;

/// Discord nicknames are capped at 32 characters.
const NICKNAME_LIMIT: usize = 32;

/// The [`GuildSync`] implementation backed by the Discord API.
pub struct DiscordSync<'a> {
    pub ctx: &'a serenity::Context,
}

impl<'a> DiscordSync<'a> {
    pub fn new(ctx: &'a serenity::Context) -> Self {
        Self { ctx }
    }
}

impl GuildSync for DiscordSync<'_> {
    async fn held_rank_roles(
        &self,
        guild_id: &str,
        user_id: &str,
        rank_role_ids: &[String],
    ) -> Result<Vec<String>, BotError> {
        let guild = GuildId::from_str(guild_id)?;
        let user = UserId::from_str(user_id)?;
        let member = guild.member(self.ctx, user).await?;

        Ok(rank_role_ids
            .iter()
            .filter(|role_id| {
                RoleId::from_str(role_id)
                    .map(|id| member.roles.contains(&id))
                    .unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    async fn add_role(
        &self,
        guild_id: &str,
        user_id: &str,
        role_id: &str,
    ) -> Result<(), BotError> {
        self.ctx
            .http
            .add_member_role(
                GuildId::from_str(guild_id)?,
                UserId::from_str(user_id)?,
                RoleId::from_str(role_id)?,
                Some("Rank sync"),
            )
            .await?;
        Ok(())
    }

    async fn remove_role(
        &self,
        guild_id: &str,
        user_id: &str,
        role_id: &str,
    ) -> Result<(), BotError> {
        self.ctx
            .http
            .remove_member_role(
                GuildId::from_str(guild_id)?,
                UserId::from_str(user_id)?,
                RoleId::from_str(role_id)?,
                Some("Rank sync"),
            )
            .await?;
        Ok(())
    }

    async fn set_nickname(
        &self,
        guild_id: &str,
        user_id: &str,
        label: &str,
    ) -> Result<(), BotError> {
        let nickname: String = label.chars().take(NICKNAME_LIMIT).collect();
        GuildId::from_str(guild_id)?
            .edit_member(
                self.ctx,
                UserId::from_str(user_id)?,
                EditMember::new().nickname(nickname),
            )
            .await?;
        Ok(())
    }

    async fn announce_rank_change(
        &self,
        _guild_id: &str,
        channel_id: &str,
        notice: &RankChangeNotice,
    ) -> Result<(), BotError> {
        let (title, color) = if notice.promoted {
            ("Rank Up!", Color::DARK_GREEN)
        } else {
            ("Rank Down", Color::RED)
        };

        ChannelId::from_str(channel_id)?
            .send_message(
                self.ctx,
                CreateMessage::new().embed(
                    CreateEmbed::new()
                        .title(title)
                        .description(format!(
                            "<@{}> is now <@&{}>!",
                            notice.user_id, notice.role_id
                        ))
                        .color(color),
                ),
            )
            .await?;
        Ok(())
    }
}

/// The embed shown in a queue channel, listing the current roster.
pub fn queue_embed(queue: &Queue, roster: &[Player]) -> CreateEmbed {
    let description = if roster.is_empty() {
        "Waiting for players to join...".to_string()
    } else {
        roster
            .iter()
            .enumerate()
            .map(|(i, player)| format!("{}. {} ({})", i + 1, player.name, player.rating))
            .collect::<Vec<_>>()
            .join("\n")
    };

    CreateEmbed::new()
        .title(&queue.title)
        .description(description)
        .footer(CreateEmbedFooter::new(format!(
            "{}/{} players",
            roster.len(),
            QUEUE_CAPACITY
        )))
        .color(Color::BLURPLE)
}

pub fn queue_buttons() -> CreateActionRow {
    CreateActionRow::Buttons(vec![
        CreateButton::new("queue_join")
            .label("Join")
            .style(ButtonStyle::Success),
        CreateButton::new("queue_leave")
            .label("Leave")
            .style(ButtonStyle::Danger),
    ])
}

fn team_list(user_ids: &[String]) -> String {
    user_ids
        .iter()
        .map(|id| format!("<@{}>", id))
        .collect::<Vec<_>>()
        .join("\n")
}

/// The embed shown for a formed match awaiting confirmation.
pub fn proposal_embed(proposal: &MatchProposal) -> CreateEmbed {
    CreateEmbed::new()
        .title(format!("Match #{}", proposal.match_number))
        .fields(vec![
            ("Team 1", team_list(&proposal.team_one), true),
            ("Team 2", team_list(&proposal.team_two), true),
            ("Map", proposal.map.clone(), false),
        ])
        .footer(CreateEmbedFooter::new(
            "Confirm the match or reroll the teams/map.",
        ))
        .color(Color::GOLD)
}

pub fn proposal_buttons() -> CreateActionRow {
    CreateActionRow::Buttons(vec![
        CreateButton::new("match_next")
            .label("Confirm")
            .style(ButtonStyle::Success),
        CreateButton::new("match_teams")
            .label("Reroll Teams")
            .style(ButtonStyle::Secondary),
        CreateButton::new("match_maps")
            .label("Reroll Map")
            .style(ButtonStyle::Secondary),
    ])
}

/// Players shown per leaderboard page.
pub const LEADERBOARD_PAGE_SIZE: usize = 10;

pub fn leaderboard_page_count(total_players: usize) -> usize {
    total_players.div_ceil(LEADERBOARD_PAGE_SIZE).max(1)
}

/// One page of the leaderboard as a code-block table, positions numbered
/// across the whole board. Expects players sorted by rating descending.
pub fn leaderboard_content(players: &[Player], page: usize) -> String {
    let pages = leaderboard_page_count(players.len());

    let mut table = Table::new();
    table.set_titles(row!["#", "Player", "Rating", "W", "L", "MVP"]);
    for (i, player) in players
        .iter()
        .enumerate()
        .skip(page * LEADERBOARD_PAGE_SIZE)
        .take(LEADERBOARD_PAGE_SIZE)
    {
        table.add_row(row![
            i + 1,
            player.name,
            player.rating,
            player.wins,
            player.losses,
            player.mvps,
        ]);
    }

    format!("Leaderboard (page {}/{})\n```\n{}\n```", page + 1, pages, table)
}

/// Prev/Next buttons for the leaderboard, each carrying its target page in
/// the custom id.
pub fn leaderboard_buttons(page: usize, total_players: usize) -> CreateActionRow {
    let pages = leaderboard_page_count(total_players);
    CreateActionRow::Buttons(vec![
        CreateButton::new(format!("leaderboard_page_{}", page.saturating_sub(1)))
            .label("Previous")
            .style(ButtonStyle::Secondary)
            .disabled(page == 0),
        CreateButton::new(format!("leaderboard_page_{}", page + 1))
            .label("Next")
            .style(ButtonStyle::Secondary)
            .disabled(page + 1 >= pages),
    ])
}

/// The embed posted once a match is confirmed and persisted.
pub fn match_embed(game: &Match) -> CreateEmbed {
    CreateEmbed::new()
        .title(format!("Match #{} is live!", game.match_number))
        .fields(vec![
            ("Team 1", team_list(&game.team_one), true),
            ("Team 2", team_list(&game.team_two), true),
            ("Map", game.map.clone(), false),
        ])
        .footer(CreateEmbedFooter::new(format!(
            "Score it with /score match_number:{}",
            game.match_number
        )))
        .color(Color::DARK_GREEN)
}

/// Replaces the queue message of a channel: deletes the previous one (if it
/// still exists) and posts a fresh embed with join/leave buttons, storing
/// the new message id.
pub async fn refresh_queue_message<DB: SettingsStore>(
    ctx: &serenity::Context,
    db: &DB,
    queue: &Queue,
    roster: &[Player],
) -> Result<(), BotError> {
    let channel = ChannelId::from_str(&queue.channel_id)?;
    let key = queue_message_key(&queue.channel_id);

    if let Some(old_id) = db.get_setting(&queue.guild_id, &key).await? {
        if let Ok(message_id) = MessageId::from_str(&old_id) {
            if let Err(e) = channel.delete_message(ctx, message_id).await {
                warn!("Failed to delete old queue message {}: {}", old_id, e);
            }
        }
    }

    let message = channel
        .send_message(
            ctx,
            CreateMessage::new()
                .embed(queue_embed(queue, roster))
                .components(vec![queue_buttons()]),
        )
        .await?;

    db.set_setting(&queue.guild_id, &key, &message.id.to_string())
        .await?;

    Ok(())
}

/// Mention helper for users stored as string ids.
pub fn mention_user(user_id: &str) -> String {
    UserId::from_str(user_id)
        .map(|id| id.mention().to_string())
        .unwrap_or_else(|_| user_id.to_string())
}
