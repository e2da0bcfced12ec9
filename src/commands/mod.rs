/// Checks used to gate commands behind moderator permissions.
pub mod checks;
/// Commands for moderators: scoring, substitutions and configuration of
/// ranks, maps and queues.
pub mod moderator_commands;
/// Commands for binding the guild's channels and roles.
pub mod settings_commands;
/// Commands available to every registered (or registering) user.
pub mod user_commands;

/// A way to group commands together.
///
/// Implementors of this trait can return a list of their commands within
/// their own module, typically grouped by required permissions. Only the
/// implementor needs to be `pub`, not the commands themselves.
pub trait CommandsContainer {
    type Data;
    type Error;

    fn get_all() -> Vec<poise::Command<Self::Data, Self::Error>>;
}
