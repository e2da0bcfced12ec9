/// Discord-side implementations: the guild sync used by the scoring engine
/// and the embed/button builders.
pub mod discord;
/// Error types raised by the matchmaking core.
pub mod error;
/// Convenience extensions on the bot context.
pub mod shorthand;
