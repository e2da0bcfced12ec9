/// Errors raised by the matchmaking core when an operation's preconditions
/// do not hold.
///
/// These are checked before any mutation, so a returned error means nothing
/// was written. External-sync failures are not represented here; they are
/// logged and skipped without aborting the rating mutation they accompany.
#[derive(Debug, PartialEq, Eq)]
pub enum MatchmakingError {
    MatchNotFound(i32),
    AlreadyScored(i32),
    NotScored(i32),
    QueueNotFound(String),
    PlayerNotRegistered(String),
    PlayerNotInMatch(String),
    PlayerAlreadyInMatch(String),
    InvalidWinnerTeam(i32),
    DuplicateMvp(String),
    NoPendingMatch(String),
}

impl std::fmt::Display for MatchmakingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use MatchmakingError::*;
        match self {
            MatchNotFound(n) => write!(f, "Match #{} not found.", n),
            AlreadyScored(n) => write!(f, "Match #{} has already been scored.", n),
            NotScored(n) => write!(f, "Match #{} has not been scored.", n),
            QueueNotFound(id) => write!(f, "Channel {} is not a queue channel.", id),
            PlayerNotRegistered(id) => write!(f, "User {} is not registered.", id),
            PlayerNotInMatch(id) => write!(f, "User {} is not in this match.", id),
            PlayerAlreadyInMatch(id) => write!(f, "User {} is already in this match.", id),
            InvalidWinnerTeam(team) => write!(f, "Winner team must be 1 or 2, got {}.", team),
            DuplicateMvp(id) => write!(f, "User {} was given as MVP twice.", id),
            NoPendingMatch(id) => write!(f, "There is no pending match proposal in channel {}.", id),
        }
    }
}

impl std::error::Error for MatchmakingError {}
