use tracing::{info, warn};

use crate::database::models::{Match, RatingDelta};
use crate::database::{MatchStore, PlayerStore, RankStore};
use crate::utils::error::MatchmakingError;
use crate::BotError;

use super::rank::{rank_for, sync_rank_role_best_effort};
use super::{GuildSync, RankChangeNotice};

/// Channel bindings the scoring engine announces into. Both are optional;
/// unset channels simply skip the announcement.
#[derive(Debug, Clone, Default)]
pub struct ScoreContext {
    pub updates_channel_id: Option<String>,
}

/// One player's rating movement from a score or undo, for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RatingChange {
    pub user_id: String,
    pub name: String,
    pub old_rating: i64,
    pub new_rating: i64,
}

fn winner_members(game: &Match, winner_team: i32) -> (&[String], &[String]) {
    if winner_team == 1 {
        (&game.team_one, &game.team_two)
    } else {
        (&game.team_two, &game.team_one)
    }
}

/// Scores a match: applies per-rank rating deltas, the MVP bonus and the
/// queue bonus to every participant, then records the exact applied deltas
/// on the match so it can be undone later.
///
/// Preconditions are checked before any write; a returned error means no
/// rating moved. Role, nickname and announcement sync are best-effort and
/// never abort the scoring.
#[allow(clippy::too_many_arguments)]
pub async fn score<DB, S>(
    db: &DB,
    sync: &S,
    ctx: &ScoreContext,
    guild_id: &str,
    match_number: i32,
    winner_team: i32,
    mvp1: Option<&str>,
    mvp2: Option<&str>,
) -> Result<Vec<RatingChange>, BotError>
where
    DB: MatchStore + PlayerStore + RankStore,
    S: GuildSync,
{
    let game = db
        .get_match(guild_id, match_number)
        .await?
        .ok_or(MatchmakingError::MatchNotFound(match_number))?;

    if game.scored {
        return Err(MatchmakingError::AlreadyScored(match_number).into());
    }
    if winner_team != 1 && winner_team != 2 {
        return Err(MatchmakingError::InvalidWinnerTeam(winner_team).into());
    }
    for mvp in [mvp1, mvp2].into_iter().flatten() {
        if !game.contains(mvp) {
            return Err(MatchmakingError::PlayerNotInMatch(mvp.to_string()).into());
        }
    }
    if let (Some(a), Some(b)) = (mvp1, mvp2) {
        if a == b {
            return Err(MatchmakingError::DuplicateMvp(a.to_string()).into());
        }
    }

    let ranks = db.get_ranks(guild_id).await?;
    let (winners, losers) = winner_members(&game, winner_team);
    let is_mvp = |id: &str| mvp1 == Some(id) || mvp2 == Some(id);

    let mut changes = Vec::with_capacity(winners.len() + losers.len());
    let mut deltas = Vec::with_capacity(winners.len() + losers.len());

    for (user_id, won) in winners
        .iter()
        .map(|id| (id, true))
        .chain(losers.iter().map(|id| (id, false)))
    {
        let Some(player) = db.get_player(guild_id, user_id).await? else {
            // Unregistered mid-match; nothing to update for them.
            warn!(
                "Skipping unregistered participant {} of match #{}",
                user_id, match_number
            );
            continue;
        };

        let rank = rank_for(player.rating, &ranks);
        let mvp = is_mvp(user_id);

        let mut new_rating = if won {
            (player.rating + rank.map_or(0, |r| r.win_delta)).max(0)
        } else {
            (player.rating - rank.map_or(0, |r| r.loss_delta)).max(0)
        };
        if mvp {
            new_rating += rank.map_or(0, |r| r.mvp_delta);
        }
        if won {
            new_rating += game.bonus;
        }

        db.apply_rating_update(
            guild_id,
            user_id,
            new_rating,
            won as i64,
            !won as i64,
            mvp as i64,
        )
        .await?;

        deltas.push(RatingDelta {
            user_id: user_id.clone(),
            applied: new_rating - player.rating,
            won,
            mvp,
        });
        changes.push(RatingChange {
            user_id: user_id.clone(),
            name: player.name.clone(),
            old_rating: player.rating,
            new_rating,
        });

        sync_rank_role_best_effort(sync, guild_id, user_id, new_rating, &ranks).await;
        if let Err(e) = sync
            .set_nickname(
                guild_id,
                user_id,
                &format!("{} | {}", new_rating, player.name),
            )
            .await
        {
            warn!("Failed to update nickname for {}: {}", user_id, e);
        }

        let old_rank = rank_for(player.rating, &ranks);
        let new_rank = rank_for(new_rating, &ranks);
        if let Some(new_rank) = new_rank {
            let changed = old_rank.map(|r| r.role_id.as_str()) != Some(new_rank.role_id.as_str());
            if changed {
                if let Some(channel) = ctx.updates_channel_id.as_deref() {
                    let notice = RankChangeNotice {
                        user_id: user_id.clone(),
                        name: player.name.clone(),
                        role_id: new_rank.role_id.clone(),
                        promoted: old_rank.map_or(true, |r| new_rank.start_rating > r.start_rating),
                    };
                    if let Err(e) = sync.announce_rank_change(guild_id, channel, &notice).await {
                        warn!("Failed to announce rank change for {}: {}", user_id, e);
                    }
                }
            }
        }
    }

    db.mark_scored(guild_id, match_number, winner_team, mvp1, mvp2, &deltas)
        .await?;

    info!(
        "Scored match #{} in guild {} (winner team {})",
        match_number, guild_id, winner_team
    );

    Ok(changes)
}

/// Undoes a scored match: subtracts exactly the deltas that were applied at
/// score time and reverses the win/loss/MVP counters, then returns the match
/// to the unscored state.
///
/// Because the applied deltas are stored on the match record, the undo is
/// exact even if the rank table changed in between.
pub async fn undo<DB, S>(
    db: &DB,
    sync: &S,
    guild_id: &str,
    match_number: i32,
) -> Result<Vec<RatingChange>, BotError>
where
    DB: MatchStore + PlayerStore + RankStore,
    S: GuildSync,
{
    let game = db
        .get_match(guild_id, match_number)
        .await?
        .ok_or(MatchmakingError::MatchNotFound(match_number))?;

    if !game.scored {
        return Err(MatchmakingError::NotScored(match_number).into());
    }

    let ranks = db.get_ranks(guild_id).await?;
    let mut changes = Vec::with_capacity(game.rating_changes.0.len());

    for delta in &game.rating_changes.0 {
        let Some(player) = db.get_player(guild_id, &delta.user_id).await? else {
            warn!(
                "Skipping unregistered participant {} while undoing match #{}",
                delta.user_id, match_number
            );
            continue;
        };

        let new_rating = (player.rating - delta.applied).max(0);
        db.apply_rating_update(
            guild_id,
            &delta.user_id,
            new_rating,
            -(delta.won as i64),
            -(!delta.won as i64),
            -(delta.mvp as i64),
        )
        .await?;

        changes.push(RatingChange {
            user_id: delta.user_id.clone(),
            name: player.name.clone(),
            old_rating: player.rating,
            new_rating,
        });

        sync_rank_role_best_effort(sync, guild_id, &delta.user_id, new_rating, &ranks).await;
        if let Err(e) = sync
            .set_nickname(
                guild_id,
                &delta.user_id,
                &format!("{} | {}", new_rating, player.name),
            )
            .await
        {
            warn!("Failed to update nickname for {}: {}", delta.user_id, e);
        }
    }

    db.clear_score(guild_id, match_number).await?;

    info!("Undid match #{} in guild {}", match_number, guild_id);

    Ok(changes)
}

/// Replaces one participant of an unscored match with another user.
pub async fn substitute<DB>(
    db: &DB,
    guild_id: &str,
    match_number: i32,
    leaving: &str,
    joining: &str,
) -> Result<Match, BotError>
where
    DB: MatchStore,
{
    let mut game = db
        .get_match(guild_id, match_number)
        .await?
        .ok_or(MatchmakingError::MatchNotFound(match_number))?;

    if game.scored {
        return Err(MatchmakingError::AlreadyScored(match_number).into());
    }
    if !game.contains(leaving) {
        return Err(MatchmakingError::PlayerNotInMatch(leaving.to_string()).into());
    }
    if game.contains(joining) {
        return Err(MatchmakingError::PlayerAlreadyInMatch(joining.to_string()).into());
    }

    for id in game.team_one.iter_mut().chain(game.team_two.iter_mut()) {
        if id == leaving {
            *id = joining.to_string();
        }
    }

    db.update_teams(guild_id, match_number, &game.team_one, &game.team_two)
        .await?;

    info!(
        "Substituted {} for {} in match #{} of guild {}",
        joining, leaving, match_number, guild_id
    );

    Ok(game)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::{Player, Rank};
    use crate::matchmaking::testutil::{MemoryStore, RecordingSync};
    use sqlx::types::Json;

    fn rank(role_id: &str, start: i64, win: i64, loss: i64, mvp: i64) -> Rank {
        Rank {
            guild_id: "g".to_string(),
            role_id: role_id.to_string(),
            start_rating: start,
            win_delta: win,
            loss_delta: loss,
            mvp_delta: mvp,
        }
    }

    fn unscored(match_number: i32, bonus: i64) -> Match {
        Match {
            guild_id: "g".to_string(),
            match_number,
            team_one: vec!["w1".to_string(), "w2".to_string()],
            team_two: vec!["l1".to_string(), "l2".to_string()],
            map: "Default Map".to_string(),
            scored: false,
            winner_team: None,
            mvp1: None,
            mvp2: None,
            bonus,
            rating_changes: Json(Vec::new()),
        }
    }

    async fn seed(db: &MemoryStore, ratings: &[(&str, i64)]) {
        for (user, rating) in ratings {
            let mut player = Player::new("g", user, user);
            player.rating = *rating;
            db.create_player(&player).await.unwrap();
        }
        db.upsert_rank(&rank("bronze", 0, 60, 30, 10)).await.unwrap();
        db.upsert_rank(&rank("silver", 1000, 40, 20, 10))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn scoring_applies_rank_deltas_mvp_and_bonus() {
        let db = MemoryStore::new();
        let sync = RecordingSync::new();
        seed(&db, &[("w1", 100), ("w2", 1200), ("l1", 100), ("l2", 10)]).await;
        db.insert_match(&unscored(1, 5)).await.unwrap();

        let changes = score(
            &db,
            &sync,
            &ScoreContext::default(),
            "g",
            1,
            1,
            Some("w1"),
            Some("l1"),
        )
        .await
        .unwrap();

        let by_user = |id: &str| changes.iter().find(|c| c.user_id == id).unwrap().new_rating;
        // Bronze winner with MVP: 100 + 60 + 10 + 5.
        assert_eq!(by_user("w1"), 175);
        // Silver winner: 1200 + 40 + 5.
        assert_eq!(by_user("w2"), 1245);
        // Bronze loser with MVP: 100 - 30 + 10.
        assert_eq!(by_user("l1"), 80);

        let w1 = db.get_player("g", "w1").await.unwrap().unwrap();
        assert_eq!((w1.rating, w1.wins, w1.losses, w1.mvps), (175, 1, 0, 1));
        let l2 = db.get_player("g", "l2").await.unwrap().unwrap();
        assert_eq!((l2.wins, l2.losses), (0, 1));

        let game = db.get_match("g", 1).await.unwrap().unwrap();
        assert!(game.scored);
        assert_eq!(game.winner_team, Some(1));
        assert_eq!(game.rating_changes.0.len(), 4);
    }

    #[tokio::test]
    async fn loser_rating_is_clamped_at_zero() {
        let db = MemoryStore::new();
        let sync = RecordingSync::new();
        seed(&db, &[("w1", 100), ("w2", 100), ("l1", 100), ("l2", 10)]).await;
        db.insert_match(&unscored(1, 0)).await.unwrap();

        score(&db, &sync, &ScoreContext::default(), "g", 1, 1, None, None)
            .await
            .unwrap();

        // 10 - 30 clamps to 0; the stored delta is the net -10.
        let l2 = db.get_player("g", "l2").await.unwrap().unwrap();
        assert_eq!(l2.rating, 0);
        let game = db.get_match("g", 1).await.unwrap().unwrap();
        let delta = game
            .rating_changes
            .0
            .iter()
            .find(|d| d.user_id == "l2")
            .unwrap();
        assert_eq!(delta.applied, -10);
    }

    #[tokio::test]
    async fn scoring_twice_is_rejected() {
        let db = MemoryStore::new();
        let sync = RecordingSync::new();
        seed(&db, &[("w1", 0), ("w2", 0), ("l1", 0), ("l2", 0)]).await;
        db.insert_match(&unscored(1, 0)).await.unwrap();

        score(&db, &sync, &ScoreContext::default(), "g", 1, 1, None, None)
            .await
            .unwrap();
        let err = score(&db, &sync, &ScoreContext::default(), "g", 1, 2, None, None)
            .await
            .unwrap_err();

        assert_eq!(
            err.downcast_ref::<MatchmakingError>(),
            Some(&MatchmakingError::AlreadyScored(1))
        );
        // The first result stands.
        let game = db.get_match("g", 1).await.unwrap().unwrap();
        assert_eq!(game.winner_team, Some(1));
    }

    #[tokio::test]
    async fn invalid_inputs_leave_ratings_untouched() {
        let db = MemoryStore::new();
        let sync = RecordingSync::new();
        seed(&db, &[("w1", 500), ("w2", 500), ("l1", 500), ("l2", 500)]).await;
        db.insert_match(&unscored(1, 0)).await.unwrap();

        let cases: Vec<BotError> = vec![
            score(&db, &sync, &ScoreContext::default(), "g", 9, 1, None, None)
                .await
                .unwrap_err(),
            score(&db, &sync, &ScoreContext::default(), "g", 1, 3, None, None)
                .await
                .unwrap_err(),
            score(
                &db,
                &sync,
                &ScoreContext::default(),
                "g",
                1,
                1,
                Some("ghost"),
                None,
            )
            .await
            .unwrap_err(),
            score(
                &db,
                &sync,
                &ScoreContext::default(),
                "g",
                1,
                1,
                Some("w1"),
                Some("w1"),
            )
            .await
            .unwrap_err(),
        ];
        assert_eq!(cases.len(), 4);

        let w1 = db.get_player("g", "w1").await.unwrap().unwrap();
        assert_eq!((w1.rating, w1.wins), (500, 0));
    }

    #[tokio::test]
    async fn undo_restores_exact_ratings_despite_rank_edits() {
        let db = MemoryStore::new();
        let sync = RecordingSync::new();
        seed(&db, &[("w1", 100), ("w2", 1200), ("l1", 100), ("l2", 10)]).await;
        db.insert_match(&unscored(1, 5)).await.unwrap();

        score(
            &db,
            &sync,
            &ScoreContext::default(),
            "g",
            1,
            1,
            Some("w1"),
            None,
        )
        .await
        .unwrap();

        // Rewriting the rank table must not affect the undo.
        db.upsert_rank(&rank("bronze", 0, 999, 999, 999))
            .await
            .unwrap();

        undo(&db, &sync, "g", 1).await.unwrap();

        for (user, rating) in [("w1", 100), ("w2", 1200), ("l1", 100), ("l2", 10)] {
            let player = db.get_player("g", user).await.unwrap().unwrap();
            assert_eq!(player.rating, rating, "rating of {}", user);
            assert_eq!(
                (player.wins, player.losses, player.mvps),
                (0, 0, 0),
                "counters of {}",
                user
            );
        }

        let game = db.get_match("g", 1).await.unwrap().unwrap();
        assert!(!game.scored);
        assert_eq!(game.winner_team, None);
        assert!(game.rating_changes.0.is_empty());
    }

    #[tokio::test]
    async fn rescoring_after_undo_applies_the_queue_bonus_again() {
        let db = MemoryStore::new();
        let sync = RecordingSync::new();
        seed(&db, &[("w1", 100), ("w2", 100), ("l1", 100), ("l2", 100)]).await;
        db.insert_match(&unscored(1, 5)).await.unwrap();

        score(&db, &sync, &ScoreContext::default(), "g", 1, 1, None, None)
            .await
            .unwrap();
        undo(&db, &sync, "g", 1).await.unwrap();

        // The bonus was fixed when the match was formed; undo must not
        // erase it.
        let game = db.get_match("g", 1).await.unwrap().unwrap();
        assert_eq!(game.bonus, 5);

        score(&db, &sync, &ScoreContext::default(), "g", 1, 1, None, None)
            .await
            .unwrap();

        // Bronze winner: 100 + 60 + 5, identical to the first scoring.
        let w1 = db.get_player("g", "w1").await.unwrap().unwrap();
        assert_eq!((w1.rating, w1.wins), (165, 1));
    }

    #[tokio::test]
    async fn undo_of_an_unscored_match_is_rejected() {
        let db = MemoryStore::new();
        let sync = RecordingSync::new();
        db.insert_match(&unscored(1, 0)).await.unwrap();

        let err = undo(&db, &sync, "g", 1).await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<MatchmakingError>(),
            Some(&MatchmakingError::NotScored(1))
        );
    }

    #[tokio::test]
    async fn promotion_is_announced_once_with_the_new_role() {
        let db = MemoryStore::new();
        let sync = RecordingSync::new();
        seed(&db, &[("w1", 950), ("w2", 0), ("l1", 0), ("l2", 0)]).await;
        db.insert_match(&unscored(1, 0)).await.unwrap();

        let ctx = ScoreContext {
            updates_channel_id: Some("updates".to_string()),
        };
        // 950 + 60 crosses the silver threshold at 1000.
        score(&db, &sync, &ctx, "g", 1, 1, None, None).await.unwrap();

        let announced = sync.announcements().await;
        assert_eq!(announced.len(), 1);
        let (channel, notice) = &announced[0];
        assert_eq!(channel, "updates");
        assert_eq!(notice.user_id, "w1");
        assert_eq!(notice.role_id, "silver");
        assert!(notice.promoted);

        assert_eq!(sync.roles_of("g", "w1").await, vec!["silver".to_string()]);
    }

    #[tokio::test]
    async fn nicknames_follow_the_new_rating() {
        let db = MemoryStore::new();
        let sync = RecordingSync::new();
        seed(&db, &[("w1", 100), ("w2", 0), ("l1", 0), ("l2", 0)]).await;
        db.insert_match(&unscored(1, 0)).await.unwrap();

        score(&db, &sync, &ScoreContext::default(), "g", 1, 1, None, None)
            .await
            .unwrap();

        assert!(sync
            .nicknames()
            .await
            .contains(&("w1".to_string(), "160 | w1".to_string())));
    }

    #[tokio::test]
    async fn substitute_swaps_exactly_one_player() {
        let db = MemoryStore::new();
        db.insert_match(&unscored(1, 0)).await.unwrap();

        let game = substitute(&db, "g", 1, "l1", "sub").await.unwrap();
        assert!(game.contains("sub"));
        assert!(!game.contains("l1"));
        assert_eq!(game.team_one, vec!["w1", "w2"]);

        let stored = db.get_match("g", 1).await.unwrap().unwrap();
        assert_eq!(stored.team_two, vec!["sub", "l2"]);
    }

    #[tokio::test]
    async fn substitute_preconditions_are_enforced() {
        let db = MemoryStore::new();
        let sync = RecordingSync::new();
        seed(&db, &[("w1", 0), ("w2", 0), ("l1", 0), ("l2", 0)]).await;
        db.insert_match(&unscored(1, 0)).await.unwrap();

        let err = substitute(&db, "g", 1, "ghost", "sub").await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<MatchmakingError>(),
            Some(&MatchmakingError::PlayerNotInMatch("ghost".to_string()))
        );

        let err = substitute(&db, "g", 1, "l1", "w1").await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<MatchmakingError>(),
            Some(&MatchmakingError::PlayerAlreadyInMatch("w1".to_string()))
        );

        score(&db, &sync, &ScoreContext::default(), "g", 1, 1, None, None)
            .await
            .unwrap();
        let err = substitute(&db, "g", 1, "l1", "sub").await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<MatchmakingError>(),
            Some(&MatchmakingError::AlreadyScored(1))
        );
    }
}
