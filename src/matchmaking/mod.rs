use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::BotError;

use self::formation::MatchProposal;

/// Match formation: random team split and map selection for a full roster.
pub mod formation;
/// Pure rank resolution and the rank/role synchronisation routine.
pub mod rank;
/// The per-channel queue state machine.
pub mod roster;
/// The scoring engine: applying, storing and undoing rating changes.
pub mod scoring;

#[cfg(test)]
pub(crate) mod testutil;

/// A queue is identified by its (guild, channel) pair.
pub type QueueKey = (String, String);

/// A rank transition to be announced in the configured updates channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankChangeNotice {
    pub user_id: String,
    pub name: String,
    pub role_id: String,
    pub promoted: bool,
}

/// Everything the core needs from the platform side: role membership,
/// display names and rank-change announcements.
///
/// All of these are best-effort; callers log failures and move on without
/// rolling back the rating mutation they accompany.
#[allow(async_fn_in_trait)]
pub trait GuildSync {
    /// The subset of the given rank roles the user currently holds.
    async fn held_rank_roles(
        &self,
        guild_id: &str,
        user_id: &str,
        rank_role_ids: &[String],
    ) -> Result<Vec<String>, BotError>;

    async fn add_role(&self, guild_id: &str, user_id: &str, role_id: &str)
        -> Result<(), BotError>;

    async fn remove_role(
        &self,
        guild_id: &str,
        user_id: &str,
        role_id: &str,
    ) -> Result<(), BotError>;

    async fn set_nickname(
        &self,
        guild_id: &str,
        user_id: &str,
        label: &str,
    ) -> Result<(), BotError>;

    async fn announce_rank_change(
        &self,
        guild_id: &str,
        channel_id: &str,
        notice: &RankChangeNotice,
    ) -> Result<(), BotError>;
}

/// The in-process half of the matchmaking state.
///
/// Holds one lock per queue so that concurrent join/leave events (buttons
/// and role updates alike) are serialized per channel, and the match
/// proposals that have been formed but not yet finalized by a moderator.
#[derive(Debug, Default)]
pub struct Matchmaker {
    locks: Mutex<HashMap<QueueKey, Arc<Mutex<()>>>>,
    proposals: Mutex<HashMap<QueueKey, MatchProposal>>,
}

impl Matchmaker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the mutation lock for one queue. Roster reads and writes
    /// must happen while the returned guard is held.
    pub(crate) async fn guard(&self, guild_id: &str, channel_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks
                .entry((guild_id.to_string(), channel_id.to_string()))
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// The pending proposal for a queue, if a formed match is awaiting
    /// moderator confirmation.
    pub async fn pending(&self, guild_id: &str, channel_id: &str) -> Option<MatchProposal> {
        self.proposals
            .lock()
            .await
            .get(&(guild_id.to_string(), channel_id.to_string()))
            .cloned()
    }

    pub(crate) async fn store_proposal(&self, proposal: MatchProposal) {
        self.proposals.lock().await.insert(
            (proposal.guild_id.clone(), proposal.channel_id.clone()),
            proposal,
        );
    }

    pub(crate) async fn take_proposal(
        &self,
        guild_id: &str,
        channel_id: &str,
    ) -> Option<MatchProposal> {
        self.proposals
            .lock()
            .await
            .remove(&(guild_id.to_string(), channel_id.to_string()))
    }

    /// Drops a pending proposal without finalizing it, e.g. when the queue
    /// itself is removed.
    pub async fn discard_proposal(&self, guild_id: &str, channel_id: &str) {
        self.take_proposal(guild_id, channel_id).await;
    }
}
