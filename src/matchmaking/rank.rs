use tracing::warn;

use crate::database::models::Rank;
use crate::BotError;

use super::GuildSync;

/// Resolves the effective rank for a rating: the rank with the greatest
/// start_rating not exceeding the rating. Returns None when the rating is
/// below every threshold (unranked).
pub fn rank_for<'a>(rating: i64, ranks: &'a [Rank]) -> Option<&'a Rank> {
    ranks
        .iter()
        .filter(|rank| rank.start_rating <= rating)
        .max_by_key(|rank| rank.start_rating)
}

/// Brings a member's rank roles in line with their rating.
///
/// After this call the member holds exactly the role of the resolved rank
/// and no other rank role; unranked members hold none. Only the roles that
/// actually differ are touched, so repeated calls with the same rating are
/// no-ops.
pub async fn sync_rank_role<S: GuildSync>(
    sync: &S,
    guild_id: &str,
    user_id: &str,
    rating: i64,
    ranks: &[Rank],
) -> Result<(), BotError> {
    let target = rank_for(rating, ranks).map(|rank| rank.role_id.as_str());
    let all_roles: Vec<String> = ranks.iter().map(|rank| rank.role_id.clone()).collect();

    let held = sync.held_rank_roles(guild_id, user_id, &all_roles).await?;

    for role_id in &held {
        if Some(role_id.as_str()) != target {
            sync.remove_role(guild_id, user_id, role_id).await?;
        }
    }

    if let Some(target) = target {
        if !held.iter().any(|role_id| role_id == target) {
            sync.add_role(guild_id, user_id, target).await?;
        }
    }

    Ok(())
}

/// Same as [`sync_rank_role`] but downgrades failures to a warning, for the
/// paths where role sync accompanies a rating mutation that must not be
/// rolled back.
pub async fn sync_rank_role_best_effort<S: GuildSync>(
    sync: &S,
    guild_id: &str,
    user_id: &str,
    rating: i64,
    ranks: &[Rank],
) {
    if let Err(e) = sync_rank_role(sync, guild_id, user_id, rating, ranks).await {
        warn!(
            "Failed to sync rank role for user {} in guild {}: {}",
            user_id, guild_id, e
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matchmaking::testutil::{RecordingSync, RoleOp};

    fn rank(role_id: &str, start_rating: i64) -> Rank {
        Rank {
            guild_id: "g".to_string(),
            role_id: role_id.to_string(),
            start_rating,
            win_delta: 60,
            loss_delta: 30,
            mvp_delta: 10,
        }
    }

    #[test]
    fn highest_qualifying_threshold_wins() {
        let ranks = vec![rank("gold", 2000), rank("silver", 1000), rank("bronze", 0)];

        assert_eq!(rank_for(2500, &ranks).unwrap().role_id, "gold");
        assert_eq!(rank_for(2000, &ranks).unwrap().role_id, "gold");
        assert_eq!(rank_for(1999, &ranks).unwrap().role_id, "silver");
        assert_eq!(rank_for(0, &ranks).unwrap().role_id, "bronze");
    }

    #[test]
    fn below_all_thresholds_is_unranked() {
        let ranks = vec![rank("silver", 1000), rank("gold", 2000)];
        assert!(rank_for(999, &ranks).is_none());
        assert!(rank_for(0, &ranks).is_none());
    }

    #[test]
    fn resolution_ignores_table_order() {
        let ranks = vec![rank("bronze", 0), rank("gold", 2000), rank("silver", 1000)];
        assert_eq!(rank_for(1500, &ranks).unwrap().role_id, "silver");
    }

    #[test]
    fn empty_table_resolves_to_none() {
        assert!(rank_for(5000, &[]).is_none());
    }

    #[tokio::test]
    async fn sync_moves_member_to_exactly_one_rank_role() {
        let sync = RecordingSync::new();
        sync.grant("g", "u1", "bronze").await;

        let ranks = vec![rank("silver", 1000), rank("bronze", 0)];
        sync_rank_role(&sync, "g", "u1", 1200, &ranks).await.unwrap();

        assert_eq!(
            sync.ops().await,
            vec![
                RoleOp::Removed("u1".to_string(), "bronze".to_string()),
                RoleOp::Added("u1".to_string(), "silver".to_string()),
            ]
        );
        assert_eq!(sync.roles_of("g", "u1").await, vec!["silver".to_string()]);
    }

    #[tokio::test]
    async fn sync_is_idempotent() {
        let sync = RecordingSync::new();
        let ranks = vec![rank("silver", 1000), rank("bronze", 0)];

        sync_rank_role(&sync, "g", "u1", 500, &ranks).await.unwrap();
        let after_first = sync.ops().await.len();

        sync_rank_role(&sync, "g", "u1", 500, &ranks).await.unwrap();
        assert_eq!(sync.ops().await.len(), after_first);
    }

    #[tokio::test]
    async fn unranked_member_loses_all_rank_roles() {
        let sync = RecordingSync::new();
        sync.grant("g", "u1", "silver").await;
        sync.grant("g", "u1", "bronze").await;

        let ranks = vec![rank("silver", 1000), rank("bronze", 500)];
        sync_rank_role(&sync, "g", "u1", 100, &ranks).await.unwrap();

        assert!(sync.roles_of("g", "u1").await.is_empty());
    }
}
