use std::str::FromStr;

use poise::serenity_prelude::{
    self as serenity, ChannelId, Color, CreateEmbed, CreateMessage,
};
use prettytable::{row, Table};
use tracing::warn;

use crate::database::models::{Match, SettingKey};
use crate::database::SettingsStore;
use crate::matchmaking::scoring::RatingChange;
use crate::utils::discord::mention_user;
use crate::BotError;

/// Renders rating movements as a monospace table for embedding in messages.
pub fn rating_change_table(changes: &[RatingChange]) -> String {
    let mut table = Table::new();
    table.set_titles(row!["Player", "Old", "New", "Change"]);
    for change in changes {
        let delta = change.new_rating - change.old_rating;
        table.add_row(row![
            change.name,
            change.old_rating,
            change.new_rating,
            format!("{:+}", delta),
        ]);
    }
    table.to_string()
}

/// Posts a scored match's result to the guild's results channel, if one is
/// configured. Failures are logged and swallowed; the score already stands.
pub async fn post_match_result<DB: SettingsStore>(
    ctx: &serenity::Context,
    db: &DB,
    guild_id: &str,
    game: &Match,
    changes: &[RatingChange],
) {
    let channel = match db
        .get_setting(guild_id, &SettingKey::ResultsChannel.to_string())
        .await
    {
        Ok(Some(id)) => id,
        Ok(None) => return,
        Err(e) => {
            warn!("Failed to read results channel for guild {}: {}", guild_id, e);
            return;
        }
    };

    let winner = match game.winner_team {
        Some(1) => "Team 1",
        Some(2) => "Team 2",
        _ => "Unknown",
    };
    let mvps = [game.mvp1.as_deref(), game.mvp2.as_deref()]
        .into_iter()
        .flatten()
        .map(mention_user)
        .collect::<Vec<_>>()
        .join(", ");

    let mut embed = CreateEmbed::new()
        .title(format!("Match #{} results", game.match_number))
        .description(format!(
            "**Winner:** {}\n**Map:** {}\n```\n{}\n```",
            winner,
            game.map,
            rating_change_table(changes)
        ))
        .color(Color::DARK_GREEN);
    if !mvps.is_empty() {
        embed = embed.field("MVP", mvps, false);
    }

    let send = async {
        ChannelId::from_str(&channel)?
            .send_message(ctx, CreateMessage::new().embed(embed))
            .await?;
        Ok::<(), BotError>(())
    };
    if let Err(e) = send.await {
        warn!(
            "Failed to post results of match #{} in guild {}: {}",
            game.match_number, guild_id, e
        );
    }
}
