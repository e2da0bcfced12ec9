//! In-memory doubles for the storage and guild-sync seams, so the core can
//! be exercised without Postgres or Discord.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::database::models::{Match, Player, Queue, Rank, RatingDelta};
use crate::database::{
    MapStore, MatchStore, PlayerStore, QueueStore, RankStore, SettingsStore,
};
use crate::BotError;

use super::{GuildSync, RankChangeNotice};

#[derive(Debug, Default)]
struct MemoryState {
    players: HashMap<(String, String), Player>,
    ranks: HashMap<(String, i64), Rank>,
    matches: HashMap<(String, i32), Match>,
    queues: HashMap<(String, String), Queue>,
    rosters: HashMap<(String, String), Vec<String>>,
    maps: HashMap<String, Vec<String>>,
    settings: HashMap<(String, String), String>,
}

/// A HashMap-backed implementor of the storage traits with the same
/// conflict and ordering semantics as the Postgres queries.
#[derive(Debug, Default)]
pub(crate) struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PlayerStore for MemoryStore {
    async fn get_player(&self, guild_id: &str, user_id: &str) -> Result<Option<Player>, BotError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .players
            .get(&(guild_id.to_string(), user_id.to_string()))
            .cloned())
    }

    async fn create_player(&self, player: &Player) -> Result<bool, BotError> {
        let mut state = self.state.lock().unwrap();
        let key = (player.guild_id.clone(), player.user_id.clone());
        if state.players.contains_key(&key) {
            return Ok(false);
        }
        state.players.insert(key, player.clone());
        Ok(true)
    }

    async fn set_player_name(
        &self,
        guild_id: &str,
        user_id: &str,
        name: &str,
    ) -> Result<(), BotError> {
        let mut state = self.state.lock().unwrap();
        if let Some(player) = state
            .players
            .get_mut(&(guild_id.to_string(), user_id.to_string()))
        {
            player.name = name.to_string();
        }
        Ok(())
    }

    async fn apply_rating_update(
        &self,
        guild_id: &str,
        user_id: &str,
        rating: i64,
        wins: i64,
        losses: i64,
        mvps: i64,
    ) -> Result<(), BotError> {
        let mut state = self.state.lock().unwrap();
        if let Some(player) = state
            .players
            .get_mut(&(guild_id.to_string(), user_id.to_string()))
        {
            player.rating = rating;
            player.wins = (player.wins + wins).max(0);
            player.losses = (player.losses + losses).max(0);
            player.mvps = (player.mvps + mvps).max(0);
        }
        Ok(())
    }

    async fn delete_player(&self, guild_id: &str, user_id: &str) -> Result<bool, BotError> {
        let mut state = self.state.lock().unwrap();
        Ok(state
            .players
            .remove(&(guild_id.to_string(), user_id.to_string()))
            .is_some())
    }

    async fn list_players(&self, guild_id: &str) -> Result<Vec<Player>, BotError> {
        let state = self.state.lock().unwrap();
        let mut players: Vec<_> = state
            .players
            .values()
            .filter(|p| p.guild_id == guild_id)
            .cloned()
            .collect();
        players.sort_by(|a, b| b.rating.cmp(&a.rating).then(a.name.cmp(&b.name)));
        Ok(players)
    }

    async fn reset_players(&self, guild_id: &str) -> Result<(), BotError> {
        let mut state = self.state.lock().unwrap();
        for player in state.players.values_mut() {
            if player.guild_id == guild_id {
                player.rating = 0;
                player.wins = 0;
                player.losses = 0;
                player.mvps = 0;
            }
        }
        Ok(())
    }
}

impl RankStore for MemoryStore {
    async fn upsert_rank(&self, rank: &Rank) -> Result<(), BotError> {
        let mut state = self.state.lock().unwrap();
        state
            .ranks
            .insert((rank.guild_id.clone(), rank.start_rating), rank.clone());
        Ok(())
    }

    async fn delete_rank_by_role(&self, guild_id: &str, role_id: &str) -> Result<bool, BotError> {
        let mut state = self.state.lock().unwrap();
        let before = state.ranks.len();
        state
            .ranks
            .retain(|(guild, _), rank| !(guild == guild_id && rank.role_id == role_id));
        Ok(state.ranks.len() < before)
    }

    async fn get_ranks(&self, guild_id: &str) -> Result<Vec<Rank>, BotError> {
        let state = self.state.lock().unwrap();
        let mut ranks: Vec<_> = state
            .ranks
            .values()
            .filter(|r| r.guild_id == guild_id)
            .cloned()
            .collect();
        ranks.sort_by(|a, b| b.start_rating.cmp(&a.start_rating));
        Ok(ranks)
    }
}

impl MatchStore for MemoryStore {
    async fn next_match_number(&self, guild_id: &str) -> Result<i32, BotError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .matches
            .keys()
            .filter(|(guild, _)| guild == guild_id)
            .map(|(_, number)| *number)
            .max()
            .unwrap_or(0)
            + 1)
    }

    async fn insert_match(&self, game: &Match) -> Result<(), BotError> {
        let mut state = self.state.lock().unwrap();
        let key = (game.guild_id.clone(), game.match_number);
        if state.matches.contains_key(&key) {
            return Err(BotError::msg("duplicate match number"));
        }
        state.matches.insert(key, game.clone());
        Ok(())
    }

    async fn get_match(
        &self,
        guild_id: &str,
        match_number: i32,
    ) -> Result<Option<Match>, BotError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .matches
            .get(&(guild_id.to_string(), match_number))
            .cloned())
    }

    async fn update_teams(
        &self,
        guild_id: &str,
        match_number: i32,
        team_one: &[String],
        team_two: &[String],
    ) -> Result<(), BotError> {
        let mut state = self.state.lock().unwrap();
        if let Some(game) = state.matches.get_mut(&(guild_id.to_string(), match_number)) {
            game.team_one = team_one.to_vec();
            game.team_two = team_two.to_vec();
        }
        Ok(())
    }

    async fn mark_scored(
        &self,
        guild_id: &str,
        match_number: i32,
        winner_team: i32,
        mvp1: Option<&str>,
        mvp2: Option<&str>,
        changes: &[RatingDelta],
    ) -> Result<(), BotError> {
        let mut state = self.state.lock().unwrap();
        if let Some(game) = state.matches.get_mut(&(guild_id.to_string(), match_number)) {
            game.scored = true;
            game.winner_team = Some(winner_team);
            game.mvp1 = mvp1.map(str::to_string);
            game.mvp2 = mvp2.map(str::to_string);
            game.rating_changes.0 = changes.to_vec();
        }
        Ok(())
    }

    async fn clear_score(&self, guild_id: &str, match_number: i32) -> Result<(), BotError> {
        let mut state = self.state.lock().unwrap();
        if let Some(game) = state.matches.get_mut(&(guild_id.to_string(), match_number)) {
            game.scored = false;
            game.winner_team = None;
            game.mvp1 = None;
            game.mvp2 = None;
            game.rating_changes.0.clear();
        }
        Ok(())
    }

    async fn delete_matches(&self, guild_id: &str) -> Result<(), BotError> {
        let mut state = self.state.lock().unwrap();
        state.matches.retain(|(guild, _), _| guild != guild_id);
        Ok(())
    }
}

impl QueueStore for MemoryStore {
    async fn upsert_queue(&self, queue: &Queue) -> Result<(), BotError> {
        let mut state = self.state.lock().unwrap();
        state.queues.insert(
            (queue.guild_id.clone(), queue.channel_id.clone()),
            queue.clone(),
        );
        Ok(())
    }

    async fn delete_queue(&self, guild_id: &str, channel_id: &str) -> Result<bool, BotError> {
        let mut state = self.state.lock().unwrap();
        let key = (guild_id.to_string(), channel_id.to_string());
        state.rosters.remove(&key);
        Ok(state.queues.remove(&key).is_some())
    }

    async fn get_queue(
        &self,
        guild_id: &str,
        channel_id: &str,
    ) -> Result<Option<Queue>, BotError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .queues
            .get(&(guild_id.to_string(), channel_id.to_string()))
            .cloned())
    }

    async fn get_queues(&self, guild_id: &str) -> Result<Vec<Queue>, BotError> {
        let state = self.state.lock().unwrap();
        let mut queues: Vec<_> = state
            .queues
            .values()
            .filter(|q| q.guild_id == guild_id)
            .cloned()
            .collect();
        queues.sort_by(|a, b| a.channel_id.cmp(&b.channel_id));
        Ok(queues)
    }

    async fn roster(&self, guild_id: &str, channel_id: &str) -> Result<Vec<Player>, BotError> {
        let state = self.state.lock().unwrap();
        let Some(user_ids) = state
            .rosters
            .get(&(guild_id.to_string(), channel_id.to_string()))
        else {
            return Ok(Vec::new());
        };
        Ok(user_ids
            .iter()
            .filter_map(|user_id| {
                state
                    .players
                    .get(&(guild_id.to_string(), user_id.clone()))
                    .cloned()
            })
            .collect())
    }

    async fn add_to_roster(
        &self,
        guild_id: &str,
        channel_id: &str,
        user_id: &str,
    ) -> Result<bool, BotError> {
        let mut state = self.state.lock().unwrap();
        let roster = state
            .rosters
            .entry((guild_id.to_string(), channel_id.to_string()))
            .or_default();
        if roster.iter().any(|id| id == user_id) {
            return Ok(false);
        }
        roster.push(user_id.to_string());
        Ok(true)
    }

    async fn remove_from_roster(
        &self,
        guild_id: &str,
        channel_id: &str,
        user_id: &str,
    ) -> Result<bool, BotError> {
        let mut state = self.state.lock().unwrap();
        let Some(roster) = state
            .rosters
            .get_mut(&(guild_id.to_string(), channel_id.to_string()))
        else {
            return Ok(false);
        };
        let before = roster.len();
        roster.retain(|id| id != user_id);
        Ok(roster.len() < before)
    }

    async fn clear_roster(&self, guild_id: &str, channel_id: &str) -> Result<(), BotError> {
        let mut state = self.state.lock().unwrap();
        state
            .rosters
            .remove(&(guild_id.to_string(), channel_id.to_string()));
        Ok(())
    }
}

impl MapStore for MemoryStore {
    async fn add_map(&self, guild_id: &str, map_name: &str) -> Result<bool, BotError> {
        let mut state = self.state.lock().unwrap();
        let maps = state.maps.entry(guild_id.to_string()).or_default();
        if maps.iter().any(|m| m == map_name) {
            return Ok(false);
        }
        maps.push(map_name.to_string());
        maps.sort();
        Ok(true)
    }

    async fn remove_map(&self, guild_id: &str, map_name: &str) -> Result<bool, BotError> {
        let mut state = self.state.lock().unwrap();
        let Some(maps) = state.maps.get_mut(guild_id) else {
            return Ok(false);
        };
        let before = maps.len();
        maps.retain(|m| m != map_name);
        Ok(maps.len() < before)
    }

    async fn list_maps(&self, guild_id: &str) -> Result<Vec<String>, BotError> {
        let state = self.state.lock().unwrap();
        Ok(state.maps.get(guild_id).cloned().unwrap_or_default())
    }
}

impl SettingsStore for MemoryStore {
    async fn set_setting(&self, guild_id: &str, key: &str, value: &str) -> Result<(), BotError> {
        let mut state = self.state.lock().unwrap();
        state
            .settings
            .insert((guild_id.to_string(), key.to_string()), value.to_string());
        Ok(())
    }

    async fn get_setting(&self, guild_id: &str, key: &str) -> Result<Option<String>, BotError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .settings
            .get(&(guild_id.to_string(), key.to_string()))
            .cloned())
    }

    async fn delete_setting(&self, guild_id: &str, key: &str) -> Result<(), BotError> {
        let mut state = self.state.lock().unwrap();
        state
            .settings
            .remove(&(guild_id.to_string(), key.to_string()));
        Ok(())
    }
}

/// A role add or removal, in the order it happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RoleOp {
    Added(String, String),
    Removed(String, String),
}

#[derive(Debug, Default)]
struct SyncState {
    roles: HashMap<(String, String), Vec<String>>,
    ops: Vec<RoleOp>,
    nicknames: Vec<(String, String)>,
    announcements: Vec<(String, RankChangeNotice)>,
}

/// A [`GuildSync`] double that tracks role membership and records every
/// operation for assertions.
#[derive(Debug, Default)]
pub(crate) struct RecordingSync {
    state: tokio::sync::Mutex<SyncState>,
}

impl RecordingSync {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-seeds a held role without recording an op.
    pub async fn grant(&self, guild_id: &str, user_id: &str, role_id: &str) {
        let mut state = self.state.lock().await;
        state
            .roles
            .entry((guild_id.to_string(), user_id.to_string()))
            .or_default()
            .push(role_id.to_string());
    }

    pub async fn ops(&self) -> Vec<RoleOp> {
        self.state.lock().await.ops.clone()
    }

    pub async fn roles_of(&self, guild_id: &str, user_id: &str) -> Vec<String> {
        self.state
            .lock()
            .await
            .roles
            .get(&(guild_id.to_string(), user_id.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    pub async fn nicknames(&self) -> Vec<(String, String)> {
        self.state.lock().await.nicknames.clone()
    }

    pub async fn announcements(&self) -> Vec<(String, RankChangeNotice)> {
        self.state.lock().await.announcements.clone()
    }
}

impl GuildSync for RecordingSync {
    async fn held_rank_roles(
        &self,
        guild_id: &str,
        user_id: &str,
        rank_role_ids: &[String],
    ) -> Result<Vec<String>, BotError> {
        let state = self.state.lock().await;
        let held = state
            .roles
            .get(&(guild_id.to_string(), user_id.to_string()))
            .cloned()
            .unwrap_or_default();
        Ok(held
            .into_iter()
            .filter(|role| rank_role_ids.contains(role))
            .collect())
    }

    async fn add_role(
        &self,
        guild_id: &str,
        user_id: &str,
        role_id: &str,
    ) -> Result<(), BotError> {
        let mut state = self.state.lock().await;
        state
            .roles
            .entry((guild_id.to_string(), user_id.to_string()))
            .or_default()
            .push(role_id.to_string());
        state
            .ops
            .push(RoleOp::Added(user_id.to_string(), role_id.to_string()));
        Ok(())
    }

    async fn remove_role(
        &self,
        guild_id: &str,
        user_id: &str,
        role_id: &str,
    ) -> Result<(), BotError> {
        let mut state = self.state.lock().await;
        if let Some(roles) = state
            .roles
            .get_mut(&(guild_id.to_string(), user_id.to_string()))
        {
            roles.retain(|role| role != role_id);
        }
        state
            .ops
            .push(RoleOp::Removed(user_id.to_string(), role_id.to_string()));
        Ok(())
    }

    async fn set_nickname(
        &self,
        guild_id: &str,
        user_id: &str,
        label: &str,
    ) -> Result<(), BotError> {
        let _ = guild_id;
        let mut state = self.state.lock().await;
        state
            .nicknames
            .push((user_id.to_string(), label.to_string()));
        Ok(())
    }

    async fn announce_rank_change(
        &self,
        guild_id: &str,
        channel_id: &str,
        notice: &RankChangeNotice,
    ) -> Result<(), BotError> {
        let _ = guild_id;
        let mut state = self.state.lock().await;
        state
            .announcements
            .push((channel_id.to_string(), notice.clone()));
        Ok(())
    }
}
