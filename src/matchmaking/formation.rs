use rand::seq::SliceRandom;
use sqlx::types::Json;
use tracing::info;

use crate::database::models::{Match, Queue};
use crate::database::{MapStore, MatchStore};
use crate::utils::error::MatchmakingError;
use crate::BotError;

use super::Matchmaker;

/// Fixed queue capacity; a queue forms a match the moment it holds this
/// many players.
pub const QUEUE_CAPACITY: usize = 10;
/// Players per team.
pub const TEAM_SIZE: usize = 5;
/// Placeholder used when a guild has no maps configured. Formation and
/// scoring proceed with it rather than failing.
pub const DEFAULT_MAP: &str = "Default Map";

/// A formed match awaiting moderator confirmation.
///
/// Proposals live only in memory; the match record is persisted when a
/// moderator finalizes it. Teams and map may be rerolled any number of
/// times before that without changing the match number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchProposal {
    pub guild_id: String,
    pub channel_id: String,
    pub match_number: i32,
    pub team_one: Vec<String>,
    pub team_two: Vec<String>,
    pub map: String,
    pub bonus: i64,
}

/// Shuffles a full roster uniformly and splits it into two teams of
/// [`TEAM_SIZE`].
pub fn split_teams(mut user_ids: Vec<String>) -> (Vec<String>, Vec<String>) {
    user_ids.shuffle(&mut rand::thread_rng());
    let team_two = user_ids.split_off(TEAM_SIZE.min(user_ids.len()));
    (user_ids, team_two)
}

/// Picks a map uniformly at random from the guild's pool, falling back to
/// [`DEFAULT_MAP`] when the pool is empty.
pub async fn pick_map<DB: MapStore>(db: &DB, guild_id: &str) -> Result<String, BotError> {
    let maps = db.list_maps(guild_id).await?;
    Ok(maps
        .choose(&mut rand::thread_rng())
        .cloned()
        .unwrap_or_else(|| DEFAULT_MAP.to_string()))
}

/// Forms a match proposal from a full roster: random team split, random
/// map, next per-guild match number, and the queue's bonus rating.
pub async fn propose<DB>(
    db: &DB,
    queue: &Queue,
    roster_ids: Vec<String>,
) -> Result<MatchProposal, BotError>
where
    DB: MatchStore + MapStore,
{
    let match_number = db.next_match_number(&queue.guild_id).await?;
    let (team_one, team_two) = split_teams(roster_ids);
    let map = pick_map(db, &queue.guild_id).await?;

    info!(
        "Formed match #{} for guild {} in channel {}",
        match_number, queue.guild_id, queue.channel_id
    );

    Ok(MatchProposal {
        guild_id: queue.guild_id.clone(),
        channel_id: queue.channel_id.clone(),
        match_number,
        team_one,
        team_two,
        map,
        bonus: queue.bonus_rating,
    })
}

impl Matchmaker {
    /// Rerolls the team split of the pending proposal in a channel.
    pub async fn reshuffle_teams(
        &self,
        guild_id: &str,
        channel_id: &str,
    ) -> Result<MatchProposal, BotError> {
        let mut proposals = self.proposals.lock().await;
        let proposal = proposals
            .get_mut(&(guild_id.to_string(), channel_id.to_string()))
            .ok_or_else(|| MatchmakingError::NoPendingMatch(channel_id.to_string()))?;

        let mut all = proposal.team_one.clone();
        all.extend(proposal.team_two.iter().cloned());
        let (team_one, team_two) = split_teams(all);
        proposal.team_one = team_one;
        proposal.team_two = team_two;

        Ok(proposal.clone())
    }

    /// Rerolls the map of the pending proposal in a channel.
    pub async fn reshuffle_map<DB: MapStore>(
        &self,
        db: &DB,
        guild_id: &str,
        channel_id: &str,
    ) -> Result<MatchProposal, BotError> {
        let map = pick_map(db, guild_id).await?;

        let mut proposals = self.proposals.lock().await;
        let proposal = proposals
            .get_mut(&(guild_id.to_string(), channel_id.to_string()))
            .ok_or_else(|| MatchmakingError::NoPendingMatch(channel_id.to_string()))?;
        proposal.map = map;

        Ok(proposal.clone())
    }

    /// Persists the pending proposal of a channel as an unscored match.
    ///
    /// The proposal is consumed; the queue is free to fill again.
    pub async fn finalize_match<DB: MatchStore>(
        &self,
        db: &DB,
        guild_id: &str,
        channel_id: &str,
    ) -> Result<Match, BotError> {
        let proposal = self
            .take_proposal(guild_id, channel_id)
            .await
            .ok_or_else(|| MatchmakingError::NoPendingMatch(channel_id.to_string()))?;

        let game = Match {
            guild_id: proposal.guild_id,
            match_number: proposal.match_number,
            team_one: proposal.team_one,
            team_two: proposal.team_two,
            map: proposal.map,
            scored: false,
            winner_team: None,
            mvp1: None,
            mvp2: None,
            bonus: proposal.bonus,
            rating_changes: Json(Vec::new()),
        };

        if let Err(e) = db.insert_match(&game).await {
            // Put the proposal back so the moderator can retry.
            self.store_proposal(MatchProposal {
                guild_id: game.guild_id.clone(),
                channel_id: channel_id.to_string(),
                match_number: game.match_number,
                team_one: game.team_one.clone(),
                team_two: game.team_two.clone(),
                map: game.map.clone(),
                bonus: game.bonus,
            })
            .await;
            return Err(e);
        }

        info!(
            "Finalized match #{} for guild {}",
            game.match_number, game.guild_id
        );

        Ok(game)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matchmaking::testutil::MemoryStore;
    use std::collections::BTreeSet;

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("u{}", i)).collect()
    }

    fn queue(store_guild: &str) -> Queue {
        Queue {
            guild_id: store_guild.to_string(),
            channel_id: "c1".to_string(),
            title: "Queue".to_string(),
            voice_channel_id: None,
            role_id: None,
            bonus_rating: 5,
        }
    }

    #[test]
    fn split_produces_two_disjoint_teams_of_five() {
        let roster = ids(10);
        let (one, two) = split_teams(roster.clone());

        assert_eq!(one.len(), TEAM_SIZE);
        assert_eq!(two.len(), TEAM_SIZE);

        let union: BTreeSet<_> = one.iter().chain(two.iter()).collect();
        let input: BTreeSet<_> = roster.iter().collect();
        assert_eq!(union, input);
    }

    #[tokio::test]
    async fn empty_map_pool_falls_back_to_placeholder() {
        let db = MemoryStore::new();
        assert_eq!(pick_map(&db, "g").await.unwrap(), DEFAULT_MAP);
    }

    #[tokio::test]
    async fn picked_map_comes_from_the_pool() {
        let db = MemoryStore::new();
        db.add_map("g", "Dust II").await.unwrap();
        assert_eq!(pick_map(&db, "g").await.unwrap(), "Dust II");
    }

    #[tokio::test]
    async fn match_numbers_are_sequential_per_guild() {
        let db = MemoryStore::new();
        let q = queue("g");

        let first = propose(&db, &q, ids(10)).await.unwrap();
        assert_eq!(first.match_number, 1);

        let mm = Matchmaker::new();
        mm.store_proposal(first).await;
        mm.finalize_match(&db, "g", "c1").await.unwrap();

        let second = propose(&db, &q, ids(10)).await.unwrap();
        assert_eq!(second.match_number, 2);
    }

    #[tokio::test]
    async fn reshuffle_keeps_players_and_number() {
        let db = MemoryStore::new();
        let mm = Matchmaker::new();
        let q = queue("g");

        let proposal = propose(&db, &q, ids(10)).await.unwrap();
        let number = proposal.match_number;
        let before: BTreeSet<_> = proposal
            .team_one
            .iter()
            .chain(proposal.team_two.iter())
            .cloned()
            .collect();
        mm.store_proposal(proposal).await;

        let rerolled = mm.reshuffle_teams("g", "c1").await.unwrap();
        let after: BTreeSet<_> = rerolled
            .team_one
            .iter()
            .chain(rerolled.team_two.iter())
            .cloned()
            .collect();

        assert_eq!(rerolled.match_number, number);
        assert_eq!(before, after);
        assert_eq!(rerolled.team_one.len(), TEAM_SIZE);
        assert_eq!(rerolled.team_two.len(), TEAM_SIZE);
    }

    #[tokio::test]
    async fn reshuffle_without_proposal_is_rejected() {
        let mm = Matchmaker::new();
        let err = mm.reshuffle_teams("g", "c1").await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<crate::utils::error::MatchmakingError>(),
            Some(&crate::utils::error::MatchmakingError::NoPendingMatch(
                "c1".to_string()
            ))
        );
    }

    #[tokio::test]
    async fn finalize_persists_an_unscored_match_and_consumes_the_proposal() {
        let db = MemoryStore::new();
        let mm = Matchmaker::new();
        let q = queue("g");

        let proposal = propose(&db, &q, ids(10)).await.unwrap();
        mm.store_proposal(proposal).await;

        let game = mm.finalize_match(&db, "g", "c1").await.unwrap();
        assert!(!game.scored);
        assert_eq!(game.bonus, 5);

        let stored = db.get_match("g", game.match_number).await.unwrap().unwrap();
        assert_eq!(stored.team_one, game.team_one);
        assert!(mm.pending("g", "c1").await.is_none());
    }
}
