//! Error types for race-arena

use crate::types::RoomStatus;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArenaError {
    #[error("Room not found")]
    RoomNotFound,

    #[error("Room is full")]
    RoomFull,

    #[error("Race already started")]
    AlreadyStarted,

    #[error("Not a member of this room")]
    NotAMember,

    #[error("Not authorized: {0}")]
    NotAuthorized(String),

    #[error("Invalid status transition: {from:?} -> {to:?}")]
    InvalidTransition { from: RoomStatus, to: RoomStatus },

    #[error("At least {required} racers are required, found {found}")]
    NotEnoughRacers { required: usize, found: usize },

    #[error("Teams are unbalanced: A has {a}, B has {b}")]
    UnbalancedTeams { a: usize, b: usize },

    #[error("Not every participant is ready")]
    NotAllReady,

    #[error("Racer {0} is already taken")]
    RacerTaken(u32),

    #[error("Operation not available in this game mode")]
    WrongMode,

    #[error("Room has no racers to simulate")]
    NoRacers,

    #[error("Removed from room: {0}")]
    Kicked(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Room service error: {0}")]
    Service(String),

    #[error("Operation timed out")]
    Timeout,

    #[error("Session closed")]
    SessionClosed,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ArenaError {
    /// Membership failures: shown to the user, never retried, back to menu.
    pub fn is_membership(&self) -> bool {
        matches!(
            self,
            ArenaError::RoomFull
                | ArenaError::RoomNotFound
                | ArenaError::AlreadyStarted
                | ArenaError::NotAMember
        )
    }

    /// Failures that the next poll or write supersedes.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ArenaError::Transport(_) | ArenaError::Timeout | ArenaError::Service(_)
        )
    }

    /// Failures that end the session for this participant.
    pub fn is_forced_removal(&self) -> bool {
        matches!(
            self,
            ArenaError::Kicked(_) | ArenaError::NotAMember | ArenaError::RoomNotFound
        )
    }
}

pub type Result<T> = std::result::Result<T, ArenaError>;
