use tracing::info;

use crate::database::models::{Player, Queue};
use crate::database::{MapStore, MatchStore, PlayerStore, QueueStore};
use crate::utils::error::MatchmakingError;
use crate::BotError;

use super::formation::{self, MatchProposal, QUEUE_CAPACITY};
use super::Matchmaker;

/// Result of a join attempt. Only `Joined` and `Filled` mean the roster
/// actually changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    /// The user has no player record; joining requires registration first.
    NotRegistered,
    /// The user was already on the roster; nothing changed.
    AlreadyQueued,
    /// The queue already holds a full roster awaiting a proposal, or the
    /// channel has a pending match proposal.
    Full,
    /// The user joined; the roster now looks like this.
    Joined(Vec<Player>),
    /// The user's join completed the roster. The roster has been cleared and
    /// turned into a match proposal awaiting moderator confirmation.
    Filled(MatchProposal),
}

/// Result of a leave attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaveOutcome {
    /// The user was not on the roster; nothing changed.
    NotQueued,
    /// The user left; the roster now looks like this.
    Left(Vec<Player>),
}

/// A roster change produced by reconciling a member's roles against the
/// guild's role-bound queues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleSyncChange {
    Joined(Queue, Vec<Player>),
    Left(Queue, Vec<Player>),
    Filled(Queue, MatchProposal),
}

impl Matchmaker {
    /// Adds a player to a queue's roster, forming a match when the roster
    /// reaches capacity.
    ///
    /// All roster mutation happens under the per-queue lock, so two
    /// concurrent joins into the last slot produce exactly one proposal.
    pub async fn join_queue<DB>(
        &self,
        db: &DB,
        guild_id: &str,
        channel_id: &str,
        user_id: &str,
    ) -> Result<JoinOutcome, BotError>
    where
        DB: QueueStore + PlayerStore + MatchStore + MapStore,
    {
        let _guard = self.guard(guild_id, channel_id).await;

        let queue = db
            .get_queue(guild_id, channel_id)
            .await?
            .ok_or_else(|| MatchmakingError::QueueNotFound(channel_id.to_string()))?;

        if db.get_player(guild_id, user_id).await?.is_none() {
            return Ok(JoinOutcome::NotRegistered);
        }

        if self.pending(guild_id, channel_id).await.is_some() {
            return Ok(JoinOutcome::Full);
        }

        let roster = db.roster(guild_id, channel_id).await?;
        if roster.len() >= QUEUE_CAPACITY {
            return Ok(JoinOutcome::Full);
        }

        if !db.add_to_roster(guild_id, channel_id, user_id).await? {
            return Ok(JoinOutcome::AlreadyQueued);
        }

        let roster = db.roster(guild_id, channel_id).await?;
        if roster.len() < QUEUE_CAPACITY {
            return Ok(JoinOutcome::Joined(roster));
        }

        // Tenth join: consume the roster into a proposal before the lock is
        // released so the queue is immediately open again.
        let roster_ids = roster.into_iter().map(|p| p.user_id).collect();
        let proposal = formation::propose(db, &queue, roster_ids).await?;
        db.clear_roster(guild_id, channel_id).await?;
        self.store_proposal(proposal.clone()).await;

        info!(
            "Queue in channel {} of guild {} filled; proposed match #{}",
            channel_id, guild_id, proposal.match_number
        );

        Ok(JoinOutcome::Filled(proposal))
    }

    /// Removes a player from a queue's roster.
    pub async fn leave_queue<DB>(
        &self,
        db: &DB,
        guild_id: &str,
        channel_id: &str,
        user_id: &str,
    ) -> Result<LeaveOutcome, BotError>
    where
        DB: QueueStore,
    {
        let _guard = self.guard(guild_id, channel_id).await;

        if db.get_queue(guild_id, channel_id).await?.is_none() {
            return Err(MatchmakingError::QueueNotFound(channel_id.to_string()).into());
        }

        if !db.remove_from_roster(guild_id, channel_id, user_id).await? {
            return Ok(LeaveOutcome::NotQueued);
        }

        Ok(LeaveOutcome::Left(db.roster(guild_id, channel_id).await?))
    }

    /// Brings a member's queue memberships in line with the roles they
    /// currently hold: joins the roster of every role-bound queue whose
    /// role the member has, and leaves those whose role they lack.
    ///
    /// Works from the full role set rather than a diff, so it stays correct
    /// when the member's previous state is unknown.
    pub async fn reconcile_role_queues<DB>(
        &self,
        db: &DB,
        guild_id: &str,
        user_id: &str,
        held_roles: &[String],
    ) -> Result<Vec<RoleSyncChange>, BotError>
    where
        DB: QueueStore + PlayerStore + MatchStore + MapStore,
    {
        let mut changes = Vec::new();
        for queue in db.get_queues(guild_id).await? {
            let Some(role_id) = queue.role_id.clone() else {
                continue;
            };
            if held_roles.contains(&role_id) {
                match self
                    .join_queue(db, guild_id, &queue.channel_id, user_id)
                    .await?
                {
                    JoinOutcome::Joined(roster) => {
                        changes.push(RoleSyncChange::Joined(queue, roster));
                    }
                    JoinOutcome::Filled(proposal) => {
                        changes.push(RoleSyncChange::Filled(queue, proposal));
                    }
                    // Unregistered, already queued or full: nothing to do.
                    _ => {}
                }
            } else if let LeaveOutcome::Left(roster) = self
                .leave_queue(db, guild_id, &queue.channel_id, user_id)
                .await?
            {
                changes.push(RoleSyncChange::Left(queue, roster));
            }
        }
        Ok(changes)
    }

    /// Empties a queue's roster outright (moderator action or queue
    /// removal).
    pub async fn clear_queue<DB>(
        &self,
        db: &DB,
        guild_id: &str,
        channel_id: &str,
    ) -> Result<(), BotError>
    where
        DB: QueueStore,
    {
        let _guard = self.guard(guild_id, channel_id).await;
        db.clear_roster(guild_id, channel_id).await?;
        Ok(())
    }
}
