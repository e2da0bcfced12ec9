use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use strum::Display;

/// A registered player within the database.
///
/// A player is unique per (guild, user) pair and starts at rating 0.
/// The rating and the win/loss/MVP counters are only ever mutated by the
/// scoring engine; the name only by rename operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Player {
    pub user_id: String,
    pub guild_id: String,
    pub name: String,
    pub rating: i64,
    pub wins: i64,
    pub losses: i64,
    pub mvps: i64,
}

impl Player {
    pub fn new(guild_id: &str, user_id: &str, name: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            guild_id: guild_id.to_string(),
            name: name.to_string(),
            rating: 0,
            wins: 0,
            losses: 0,
            mvps: 0,
        }
    }

    /// The nickname shown in the guild, e.g. "250 | hazard".
    pub fn display_label(&self) -> String {
        format!("{} | {}", self.rating, self.name)
    }

    pub fn matches_played(&self) -> i64 {
        self.wins + self.losses
    }
}

/// A rating tier within the database.
///
/// A player's effective rank is the rank with the greatest start_rating not
/// exceeding their rating. Ranks are unique per (guild, start_rating).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Rank {
    pub guild_id: String,
    pub role_id: String,
    pub start_rating: i64,
    pub win_delta: i64,
    pub loss_delta: i64,
    pub mvp_delta: i64,
}

/// A matchmaking queue bound to a text channel.
///
/// The roster itself lives in the queue_players table; this row only holds
/// the queue's configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Queue {
    pub guild_id: String,
    pub channel_id: String,
    pub title: String,
    pub voice_channel_id: Option<String>,
    pub role_id: Option<String>,
    pub bonus_rating: i64,
}

/// The net rating delta applied to one player when a match was scored.
///
/// Stored on the match record so that undo can subtract exactly what was
/// added, independent of any rank table edits made in between.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatingDelta {
    pub user_id: String,
    pub applied: i64,
    pub won: bool,
    pub mvp: bool,
}

/// A formed 5v5 match within the database.
///
/// Created in the unscored state when a proposal is finalized, carrying the
/// queue's bonus at that moment; scoring fills in the winner, MVPs and
/// per-player deltas, and undo clears them again.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Match {
    pub guild_id: String,
    pub match_number: i32,
    pub team_one: Vec<String>,
    pub team_two: Vec<String>,
    pub map: String,
    pub scored: bool,
    pub winner_team: Option<i32>,
    pub mvp1: Option<String>,
    pub mvp2: Option<String>,
    pub bonus: i64,
    pub rating_changes: Json<Vec<RatingDelta>>,
}

impl Match {
    pub fn contains(&self, user_id: &str) -> bool {
        self.team_one.iter().any(|id| id == user_id) || self.team_two.iter().any(|id| id == user_id)
    }
}

/// Well-known keys of the per-guild settings store.
///
/// Per-queue message pointers are derived keys, see [`queue_message_key`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum SettingKey {
    #[strum(to_string = "mod_role")]
    ModRole,
    #[strum(to_string = "register_channel")]
    RegisterChannel,
    #[strum(to_string = "registered_role")]
    RegisteredRole,
    #[strum(to_string = "updates_channel")]
    UpdatesChannel,
    #[strum(to_string = "results_channel")]
    ResultsChannel,
}

/// The settings key holding the id of the current queue message for a
/// queue channel.
pub fn queue_message_key(channel_id: &str) -> String {
    format!("queue_message_{}", channel_id)
}
