use anyhow::anyhow;
use poise::CreateReply;

use crate::database::models::SettingKey;
use crate::database::SettingsStore;
use crate::matchmaking::scoring::ScoreContext;
use crate::{BotContext, BotError};

#[allow(async_fn_in_trait)]
pub trait BotContextExt {
    /// The id of the guild this command was invoked in, as stored in the
    /// database.
    fn guild_id_string(&self) -> Result<String, BotError>;

    /// Sends an ephemeral text reply to the invoker.
    async fn reply_ephemeral(&self, content: impl Into<String> + Send) -> Result<(), BotError>;

    /// The announcement bindings the scoring engine needs, read from the
    /// guild's settings.
    async fn score_context(&self) -> Result<ScoreContext, BotError>;
}

impl BotContextExt for BotContext<'_> {
    fn guild_id_string(&self) -> Result<String, BotError> {
        Ok(self
            .guild_id()
            .ok_or(anyhow!("Not running this in a guild"))?
            .to_string())
    }

    async fn reply_ephemeral(&self, content: impl Into<String> + Send) -> Result<(), BotError> {
        self.send(CreateReply::default().content(content).ephemeral(true))
            .await?;
        Ok(())
    }

    async fn score_context(&self) -> Result<ScoreContext, BotError> {
        let guild_id = self.guild_id_string()?;
        let updates_channel_id = self
            .data()
            .database
            .get_setting(&guild_id, &SettingKey::UpdatesChannel.to_string())
            .await?;
        Ok(ScoreContext { updates_channel_id })
    }
}
