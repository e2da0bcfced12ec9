use std::str::FromStr;

use anyhow::anyhow;
use poise::serenity_prelude::{self as serenity, RoleId};

use crate::database::models::SettingKey;
use crate::database::SettingsStore;
use crate::utils::shorthand::BotContextExt;
use crate::{BotContext, BotError};

/// Check gating moderator commands: the invoker must hold the configured
/// moderator role or have Administrator/Manage Guild permissions.
pub async fn is_moderator(ctx: BotContext<'_>) -> Result<bool, BotError> {
    let guild_id = ctx.guild_id_string()?;
    let member = ctx
        .author_member()
        .await
        .ok_or(anyhow!("Could not resolve the invoking member"))?;

    if member_is_moderator(&ctx.data().database, &guild_id, &member).await? {
        return Ok(true);
    }

    Err(anyhow!(
        "You need the moderator role to use this command."
    ))
}

/// The underlying moderator test, shared with the component handlers.
pub async fn member_is_moderator<DB: SettingsStore>(
    db: &DB,
    guild_id: &str,
    member: &serenity::Member,
) -> Result<bool, BotError> {
    if member
        .permissions
        .is_some_and(|p| p.administrator() || p.manage_guild())
    {
        return Ok(true);
    }

    let Some(mod_role) = db
        .get_setting(guild_id, &SettingKey::ModRole.to_string())
        .await?
    else {
        return Ok(false);
    };

    Ok(member.roles.contains(&RoleId::from_str(&mod_role)?))
}
