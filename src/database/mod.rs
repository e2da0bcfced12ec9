use sqlx::types::Json;
use sqlx::PgPool;
use tracing::info;

use crate::BotError;

use self::models::{Match, Player, Queue, Rank, RatingDelta};

/// Models for the database.
///
/// These models are specific to the current database design and schema.
/// Most if not all are directly mapped to a table in the database.
pub mod models;

/// The Postgres database used by the matchmaking bot.
///
/// The capability traits below describe everything the core needs from
/// storage; swapping the implementor only changes which database is used.
#[derive(Debug, Clone)]
pub struct PgDatabase {
    pub pool: PgPool,
}

impl PgDatabase {
    pub async fn connect() -> Result<Self, BotError> {
        #[cfg(debug_assertions)]
        dotenv::dotenv().ok();

        let db_url = match std::env::var("DATABASE_URL") {
            Ok(url) => url,
            Err(_) => {
                return Err(BotError::msg("DATABASE_URL environment variable not found"));
            }
        };
        let pool = PgPool::connect(db_url.as_str()).await?;
        info!("Successfully connected to the database.");

        Ok(PgDatabase { pool })
    }

    pub async fn migrate(&self) -> Result<(), BotError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

/// The player directory: one persistent rating record per (guild, user).
#[allow(async_fn_in_trait)]
pub trait PlayerStore {
    /// Retrieves a registered player, or None if the user never registered.
    async fn get_player(&self, guild_id: &str, user_id: &str) -> Result<Option<Player>, BotError>;

    /// Inserts a new player record. Returns false if the player already
    /// existed (the existing record is left untouched).
    async fn create_player(&self, player: &Player) -> Result<bool, BotError>;

    /// Changes a player's registered name.
    async fn set_player_name(
        &self,
        guild_id: &str,
        user_id: &str,
        name: &str,
    ) -> Result<(), BotError>;

    /// Writes a new rating and adjusts the win/loss/MVP counters by the
    /// given deltas. Counters are clamped at zero.
    async fn apply_rating_update(
        &self,
        guild_id: &str,
        user_id: &str,
        rating: i64,
        wins: i64,
        losses: i64,
        mvps: i64,
    ) -> Result<(), BotError>;

    /// Removes a player record entirely.
    async fn delete_player(&self, guild_id: &str, user_id: &str) -> Result<bool, BotError>;

    /// All players of a guild, highest rating first.
    async fn list_players(&self, guild_id: &str) -> Result<Vec<Player>, BotError>;

    /// Resets every player of a guild to rating 0 and zeroed counters.
    async fn reset_players(&self, guild_id: &str) -> Result<(), BotError>;
}

/// The rank directory: ordered rating thresholds per guild.
#[allow(async_fn_in_trait)]
pub trait RankStore {
    /// Inserts or replaces the rank with the same (guild, start_rating).
    async fn upsert_rank(&self, rank: &Rank) -> Result<(), BotError>;

    /// Deletes the rank bound to the given role. Returns false if no such
    /// rank existed.
    async fn delete_rank_by_role(&self, guild_id: &str, role_id: &str) -> Result<bool, BotError>;

    /// All ranks of a guild ordered by start_rating descending, so the
    /// first qualifying entry is the effective rank.
    async fn get_ranks(&self, guild_id: &str) -> Result<Vec<Rank>, BotError>;
}

/// The match directory.
#[allow(async_fn_in_trait)]
pub trait MatchStore {
    /// The next free per-guild match number (max + 1, starting at 1).
    async fn next_match_number(&self, guild_id: &str) -> Result<i32, BotError>;

    async fn insert_match(&self, game: &Match) -> Result<(), BotError>;

    async fn get_match(
        &self,
        guild_id: &str,
        match_number: i32,
    ) -> Result<Option<Match>, BotError>;

    /// Replaces both team rosters of an unscored match (substitution).
    async fn update_teams(
        &self,
        guild_id: &str,
        match_number: i32,
        team_one: &[String],
        team_two: &[String],
    ) -> Result<(), BotError>;

    /// Marks a match scored, recording the winner, MVPs and the exact
    /// per-player deltas.
    async fn mark_scored(
        &self,
        guild_id: &str,
        match_number: i32,
        winner_team: i32,
        mvp1: Option<&str>,
        mvp2: Option<&str>,
        changes: &[RatingDelta],
    ) -> Result<(), BotError>;

    /// Reverts a match to the unscored state, clearing winner, MVPs and the
    /// stored deltas. The bonus is a formation-time snapshot of the queue's
    /// configuration and stays put, so re-scoring applies it again.
    async fn clear_score(&self, guild_id: &str, match_number: i32) -> Result<(), BotError>;

    /// Deletes all matches of a guild (season reset).
    async fn delete_matches(&self, guild_id: &str) -> Result<(), BotError>;
}

/// The queue directory and its persisted rosters.
#[allow(async_fn_in_trait)]
pub trait QueueStore {
    async fn upsert_queue(&self, queue: &Queue) -> Result<(), BotError>;

    async fn delete_queue(&self, guild_id: &str, channel_id: &str) -> Result<bool, BotError>;

    async fn get_queue(&self, guild_id: &str, channel_id: &str)
        -> Result<Option<Queue>, BotError>;

    async fn get_queues(&self, guild_id: &str) -> Result<Vec<Queue>, BotError>;

    /// The current roster, in join order, resolved to player records.
    async fn roster(&self, guild_id: &str, channel_id: &str) -> Result<Vec<Player>, BotError>;

    /// Adds a player to the roster. Returns false if already present.
    async fn add_to_roster(
        &self,
        guild_id: &str,
        channel_id: &str,
        user_id: &str,
    ) -> Result<bool, BotError>;

    /// Removes a player from the roster. Returns false if absent.
    async fn remove_from_roster(
        &self,
        guild_id: &str,
        channel_id: &str,
        user_id: &str,
    ) -> Result<bool, BotError>;

    async fn clear_roster(&self, guild_id: &str, channel_id: &str) -> Result<(), BotError>;
}

/// The per-guild map pool.
#[allow(async_fn_in_trait)]
pub trait MapStore {
    /// Adds a map to the pool. Returns false if it already existed.
    async fn add_map(&self, guild_id: &str, map_name: &str) -> Result<bool, BotError>;

    /// Removes a map from the pool. Returns false if it did not exist.
    async fn remove_map(&self, guild_id: &str, map_name: &str) -> Result<bool, BotError>;

    async fn list_maps(&self, guild_id: &str) -> Result<Vec<String>, BotError>;
}

/// The generic per-guild key/value settings store used for channel and role
/// bindings.
#[allow(async_fn_in_trait)]
pub trait SettingsStore {
    async fn set_setting(&self, guild_id: &str, key: &str, value: &str) -> Result<(), BotError>;

    async fn get_setting(&self, guild_id: &str, key: &str) -> Result<Option<String>, BotError>;

    async fn delete_setting(&self, guild_id: &str, key: &str) -> Result<(), BotError>;
}

impl PlayerStore for PgDatabase {
    async fn get_player(&self, guild_id: &str, user_id: &str) -> Result<Option<Player>, BotError> {
        let player = sqlx::query_as::<_, Player>(
            r#"
            SELECT user_id, guild_id, name, rating, wins, losses, mvps
            FROM players WHERE guild_id = $1 AND user_id = $2
            LIMIT 1
            "#,
        )
        .bind(guild_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(player)
    }

    async fn create_player(&self, player: &Player) -> Result<bool, BotError> {
        let result = sqlx::query(
            r#"
            INSERT INTO players (user_id, guild_id, name, rating, wins, losses, mvps)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (guild_id, user_id) DO NOTHING
            "#,
        )
        .bind(&player.user_id)
        .bind(&player.guild_id)
        .bind(&player.name)
        .bind(player.rating)
        .bind(player.wins)
        .bind(player.losses)
        .bind(player.mvps)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_player_name(
        &self,
        guild_id: &str,
        user_id: &str,
        name: &str,
    ) -> Result<(), BotError> {
        sqlx::query(
            r#"
            UPDATE players SET name = $3 WHERE guild_id = $1 AND user_id = $2
            "#,
        )
        .bind(guild_id)
        .bind(user_id)
        .bind(name)
        .execute(&self.pool)
        .await?;

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
        sqlx::query(
            r#"
            UPDATE players
            SET rating = $3,
                wins = GREATEST(wins + $4, 0),
                losses = GREATEST(losses + $5, 0),
                mvps = GREATEST(mvps + $6, 0)
            WHERE guild_id = $1 AND user_id = $2
            "#,
        )
        .bind(guild_id)
        .bind(user_id)
        .bind(rating)
        .bind(wins)
        .bind(losses)
        .bind(mvps)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_player(&self, guild_id: &str, user_id: &str) -> Result<bool, BotError> {
        let result = sqlx::query(
            r#"
            DELETE FROM players WHERE guild_id = $1 AND user_id = $2
            "#,
        )
        .bind(guild_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_players(&self, guild_id: &str) -> Result<Vec<Player>, BotError> {
        let players = sqlx::query_as::<_, Player>(
            r#"
            SELECT user_id, guild_id, name, rating, wins, losses, mvps
            FROM players WHERE guild_id = $1
            ORDER BY rating DESC, name
            "#,
        )
        .bind(guild_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(players)
    }

    async fn reset_players(&self, guild_id: &str) -> Result<(), BotError> {
        sqlx::query(
            r#"
            UPDATE players SET rating = 0, wins = 0, losses = 0, mvps = 0
            WHERE guild_id = $1
            "#,
        )
        .bind(guild_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

impl RankStore for PgDatabase {
    async fn upsert_rank(&self, rank: &Rank) -> Result<(), BotError> {
        sqlx::query(
            r#"
            INSERT INTO ranks (guild_id, role_id, start_rating, win_delta, loss_delta, mvp_delta)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (guild_id, start_rating)
            DO UPDATE SET
                role_id = $2,
                win_delta = $4,
                loss_delta = $5,
                mvp_delta = $6
            "#,
        )
        .bind(&rank.guild_id)
        .bind(&rank.role_id)
        .bind(rank.start_rating)
        .bind(rank.win_delta)
        .bind(rank.loss_delta)
        .bind(rank.mvp_delta)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_rank_by_role(&self, guild_id: &str, role_id: &str) -> Result<bool, BotError> {
        let result = sqlx::query(
            r#"
            DELETE FROM ranks WHERE guild_id = $1 AND role_id = $2
            "#,
        )
        .bind(guild_id)
        .bind(role_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_ranks(&self, guild_id: &str) -> Result<Vec<Rank>, BotError> {
        let ranks = sqlx::query_as::<_, Rank>(
            r#"
            SELECT guild_id, role_id, start_rating, win_delta, loss_delta, mvp_delta
            FROM ranks WHERE guild_id = $1
            ORDER BY start_rating DESC
            "#,
        )
        .bind(guild_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(ranks)
    }
}

impl MatchStore for PgDatabase {
    async fn next_match_number(&self, guild_id: &str) -> Result<i32, BotError> {
        let next = sqlx::query_scalar::<_, i32>(
            r#"
            SELECT COALESCE(MAX(match_number), 0) + 1 FROM matches WHERE guild_id = $1
            "#,
        )
        .bind(guild_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(next)
    }

    async fn insert_match(&self, game: &Match) -> Result<(), BotError> {
        sqlx::query(
            r#"
            INSERT INTO matches
                (guild_id, match_number, team_one, team_two, map, scored,
                 winner_team, mvp1, mvp2, bonus, rating_changes)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(&game.guild_id)
        .bind(game.match_number)
        .bind(&game.team_one)
        .bind(&game.team_two)
        .bind(&game.map)
        .bind(game.scored)
        .bind(game.winner_team)
        .bind(&game.mvp1)
        .bind(&game.mvp2)
        .bind(game.bonus)
        .bind(&game.rating_changes)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_match(
        &self,
        guild_id: &str,
        match_number: i32,
    ) -> Result<Option<Match>, BotError> {
        let game = sqlx::query_as::<_, Match>(
            r#"
            SELECT guild_id, match_number, team_one, team_two, map, scored,
                   winner_team, mvp1, mvp2, bonus, rating_changes
            FROM matches WHERE guild_id = $1 AND match_number = $2
            LIMIT 1
            "#,
        )
        .bind(guild_id)
        .bind(match_number)
        .fetch_optional(&self.pool)
        .await?;

        Ok(game)
    }

    async fn update_teams(
        &self,
        guild_id: &str,
        match_number: i32,
        team_one: &[String],
        team_two: &[String],
    ) -> Result<(), BotError> {
        sqlx::query(
            r#"
            UPDATE matches SET team_one = $3, team_two = $4
            WHERE guild_id = $1 AND match_number = $2
            "#,
        )
        .bind(guild_id)
        .bind(match_number)
        .bind(team_one)
        .bind(team_two)
        .execute(&self.pool)
        .await?;

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
        sqlx::query(
            r#"
            UPDATE matches
            SET scored = TRUE, winner_team = $3, mvp1 = $4, mvp2 = $5,
                rating_changes = $6
            WHERE guild_id = $1 AND match_number = $2
            "#,
        )
        .bind(guild_id)
        .bind(match_number)
        .bind(winner_team)
        .bind(mvp1)
        .bind(mvp2)
        .bind(Json(changes))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn clear_score(&self, guild_id: &str, match_number: i32) -> Result<(), BotError> {
        sqlx::query(
            r#"
            UPDATE matches
            SET scored = FALSE, winner_team = NULL, mvp1 = NULL, mvp2 = NULL,
                rating_changes = '[]'
            WHERE guild_id = $1 AND match_number = $2
            "#,
        )
        .bind(guild_id)
        .bind(match_number)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_matches(&self, guild_id: &str) -> Result<(), BotError> {
        sqlx::query(
            r#"
            DELETE FROM matches WHERE guild_id = $1
            "#,
        )
        .bind(guild_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

impl QueueStore for PgDatabase {
    async fn upsert_queue(&self, queue: &Queue) -> Result<(), BotError> {
        sqlx::query(
            r#"
            INSERT INTO queues (guild_id, channel_id, title, voice_channel_id, role_id, bonus_rating)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (guild_id, channel_id)
            DO UPDATE SET
                title = $3,
                voice_channel_id = $4,
                role_id = $5,
                bonus_rating = $6
            "#,
        )
        .bind(&queue.guild_id)
        .bind(&queue.channel_id)
        .bind(&queue.title)
        .bind(&queue.voice_channel_id)
        .bind(&queue.role_id)
        .bind(queue.bonus_rating)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_queue(&self, guild_id: &str, channel_id: &str) -> Result<bool, BotError> {
        let result = sqlx::query(
            r#"
            DELETE FROM queues WHERE guild_id = $1 AND channel_id = $2
            "#,
        )
        .bind(guild_id)
        .bind(channel_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_queue(
        &self,
        guild_id: &str,
        channel_id: &str,
    ) -> Result<Option<Queue>, BotError> {
        let queue = sqlx::query_as::<_, Queue>(
            r#"
            SELECT guild_id, channel_id, title, voice_channel_id, role_id, bonus_rating
            FROM queues WHERE guild_id = $1 AND channel_id = $2
            LIMIT 1
            "#,
        )
        .bind(guild_id)
        .bind(channel_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(queue)
    }

    async fn get_queues(&self, guild_id: &str) -> Result<Vec<Queue>, BotError> {
        let queues = sqlx::query_as::<_, Queue>(
            r#"
            SELECT guild_id, channel_id, title, voice_channel_id, role_id, bonus_rating
            FROM queues WHERE guild_id = $1
            ORDER BY channel_id
            "#,
        )
        .bind(guild_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(queues)
    }

    async fn roster(&self, guild_id: &str, channel_id: &str) -> Result<Vec<Player>, BotError> {
        let players = sqlx::query_as::<_, Player>(
            r#"
            SELECT p.user_id, p.guild_id, p.name, p.rating, p.wins, p.losses, p.mvps
            FROM queue_players q
            JOIN players p ON p.guild_id = q.guild_id AND p.user_id = q.user_id
            WHERE q.guild_id = $1 AND q.channel_id = $2
            ORDER BY q.joined_at
            "#,
        )
        .bind(guild_id)
        .bind(channel_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(players)
    }

    async fn add_to_roster(
        &self,
        guild_id: &str,
        channel_id: &str,
        user_id: &str,
    ) -> Result<bool, BotError> {
        let result = sqlx::query(
            r#"
            INSERT INTO queue_players (guild_id, channel_id, user_id, joined_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (guild_id, channel_id, user_id) DO NOTHING
            "#,
        )
        .bind(guild_id)
        .bind(channel_id)
        .bind(user_id)
        .bind(chrono::Utc::now().timestamp_micros())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn remove_from_roster(
        &self,
        guild_id: &str,
        channel_id: &str,
        user_id: &str,
    ) -> Result<bool, BotError> {
        let result = sqlx::query(
            r#"
            DELETE FROM queue_players
            WHERE guild_id = $1 AND channel_id = $2 AND user_id = $3
            "#,
        )
        .bind(guild_id)
        .bind(channel_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn clear_roster(&self, guild_id: &str, channel_id: &str) -> Result<(), BotError> {
        sqlx::query(
            r#"
            DELETE FROM queue_players WHERE guild_id = $1 AND channel_id = $2
            "#,
        )
        .bind(guild_id)
        .bind(channel_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

impl MapStore for PgDatabase {
    async fn add_map(&self, guild_id: &str, map_name: &str) -> Result<bool, BotError> {
        let result = sqlx::query(
            r#"
            INSERT INTO maps (guild_id, map_name)
            VALUES ($1, $2)
            ON CONFLICT (guild_id, map_name) DO NOTHING
            "#,
        )
        .bind(guild_id)
        .bind(map_name)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn remove_map(&self, guild_id: &str, map_name: &str) -> Result<bool, BotError> {
        let result = sqlx::query(
            r#"
            DELETE FROM maps WHERE guild_id = $1 AND map_name = $2
            "#,
        )
        .bind(guild_id)
        .bind(map_name)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_maps(&self, guild_id: &str) -> Result<Vec<String>, BotError> {
        let maps = sqlx::query_scalar::<_, String>(
            r#"
            SELECT map_name FROM maps WHERE guild_id = $1
            ORDER BY map_name
            "#,
        )
        .bind(guild_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(maps)
    }
}

impl SettingsStore for PgDatabase {
    async fn set_setting(&self, guild_id: &str, key: &str, value: &str) -> Result<(), BotError> {
        sqlx::query(
            r#"
            INSERT INTO settings (guild_id, key, value)
            VALUES ($1, $2, $3)
            ON CONFLICT (guild_id, key)
            DO UPDATE SET
                value = $3
            "#,
        )
        .bind(guild_id)
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_setting(&self, guild_id: &str, key: &str) -> Result<Option<String>, BotError> {
        let value = sqlx::query_scalar::<_, String>(
            r#"
            SELECT value FROM settings WHERE guild_id = $1 AND key = $2
            LIMIT 1
            "#,
        )
        .bind(guild_id)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(value)
    }

    async fn delete_setting(&self, guild_id: &str, key: &str) -> Result<(), BotError> {
        sqlx::query(
            r#"
            DELETE FROM settings WHERE guild_id = $1 AND key = $2
            "#,
        )
        .bind(guild_id)
        .bind(key)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
