//! Feed merge rules
//!
//! The session sees one logical stream of room snapshots fed by an
//! unreliable push channel and a reliable poll loop. Last snapshot wins,
//! with two exceptions handled here: racing snapshots are stale while the
//! local side is simulating, and a poll that no longer lists the local
//! participant means it was removed.

use crate::error::ArenaError;
use crate::types::{GameMode, Room, RoomStatus};
use std::time::Duration;

/// Where a snapshot came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedSource {
    Push,
    Poll,
    /// The session's own write echoed back by the service.
    Local,
}

/// Why the local participant left the room involuntarily.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemovalReason {
    Kicked(String),
    NotAMember,
    RoomDeleted,
}

impl RemovalReason {
    /// Notice shown to the user.
    pub fn message(&self) -> String {
        match self {
            RemovalReason::Kicked(message) if !message.is_empty() => message.clone(),
            RemovalReason::Kicked(_) => "You were removed from the room by the host".into(),
            RemovalReason::NotAMember => "You are no longer a member of this room".into(),
            RemovalReason::RoomDeleted => "The room no longer exists".into(),
        }
    }

    /// The removal a service error implies, if any.
    pub fn from_error(error: &ArenaError) -> Option<Self> {
        match error {
            ArenaError::Kicked(message) => Some(RemovalReason::Kicked(message.clone())),
            ArenaError::NotAMember => Some(RemovalReason::NotAMember),
            ArenaError::RoomNotFound => Some(RemovalReason::RoomDeleted),
            _ => None,
        }
    }
}

/// What to do with an incoming snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Merge {
    Apply,
    DropStale,
    Remove(RemovalReason),
}

pub fn merge(incoming: &Room, source: FeedSource, local_id: &str, host_simulating: bool) -> Merge {
    if source == FeedSource::Poll && !incoming.is_member(local_id) {
        return Merge::Remove(RemovalReason::NotAMember);
    }
    if host_simulating && incoming.status == RoomStatus::Racing {
        return Merge::DropStale;
    }
    Merge::Apply
}

fn stage(status: RoomStatus) -> u8 {
    match status {
        RoomStatus::Waiting | RoomStatus::Selecting => 0,
        RoomStatus::Countdown => 1,
        RoomStatus::Racing => 2,
        RoomStatus::Finished => 3,
    }
}

/// An out-of-order snapshot: older than what is already known, or moving
/// the room back through the race at the same timestamp. Going from
/// finished back to the lobby is a rematch, never stale.
pub fn is_stale(previous: &Room, incoming: &Room) -> bool {
    if incoming.updated_at < previous.updated_at {
        return true;
    }
    if previous.status == RoomStatus::Finished && incoming.status.is_lobby() {
        return false;
    }
    incoming.updated_at == previous.updated_at && stage(incoming.status) < stage(previous.status)
}

/// Keep relay finish times the local side already knows when a later
/// `finished` snapshot arrives without them.
pub fn keep_known_results(previous: &Room, incoming: &mut Room) {
    if incoming.status != RoomStatus::Finished || incoming.mode != GameMode::Relay {
        return;
    }
    let (Some(known), Some(relay)) = (previous.relay.as_ref(), incoming.relay.as_mut()) else {
        return;
    };
    if relay.team_a.finish_time.is_none() {
        relay.team_a.finish_time = known.team_a.finish_time;
    }
    if relay.team_b.finish_time.is_none() {
        relay.team_b.finish_time = known.team_b.finish_time;
    }
}

/// Poll cadence by phase
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollCadence {
    /// Waiting and selecting (default: 3s)
    pub lobby: Duration,
    /// Countdown (default: 500ms)
    pub countdown: Duration,
    /// Racing as a relay guest (default: 300ms)
    pub racing_relay: Duration,
    /// Racing as a free-for-all guest (default: 500ms)
    pub racing_free_for_all: Duration,
    /// Finished, watching for a rematch (default: 1s)
    pub finished: Duration,
    /// Racing while the local side simulates; only membership and host
    /// changes matter (default: 1s)
    pub hosting: Duration,
}

impl Default for PollCadence {
    fn default() -> Self {
        Self {
            lobby: Duration::from_secs(3),
            countdown: Duration::from_millis(500),
            racing_relay: Duration::from_millis(300),
            racing_free_for_all: Duration::from_millis(500),
            finished: Duration::from_secs(1),
            hosting: Duration::from_secs(1),
        }
    }
}

impl PollCadence {
    pub fn interval(&self, status: RoomStatus, mode: GameMode) -> Duration {
        match (status, mode) {
            (RoomStatus::Waiting | RoomStatus::Selecting, _) => self.lobby,
            (RoomStatus::Countdown, _) => self.countdown,
            (RoomStatus::Racing, GameMode::Relay) => self.racing_relay,
            (RoomStatus::Racing, GameMode::FreeForAll) => self.racing_free_for_all,
            (RoomStatus::Finished, _) => self.finished,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ffa_room, relay_room};

    #[test]
    fn racing_snapshots_are_stale_while_simulating() {
        let room = ffa_room(2);
        assert_eq!(merge(&room, FeedSource::Push, "p0", true), Merge::DropStale);
        assert_eq!(merge(&room, FeedSource::Push, "p0", false), Merge::Apply);

        let mut finished = room.clone();
        finished.status = RoomStatus::Finished;
        assert_eq!(merge(&finished, FeedSource::Poll, "p0", true), Merge::Apply);
    }

    #[test]
    fn poll_without_local_member_is_removal() {
        let room = ffa_room(2);
        assert_eq!(
            merge(&room, FeedSource::Poll, "ghost", false),
            Merge::Remove(RemovalReason::NotAMember)
        );
        assert_eq!(merge(&room, FeedSource::Push, "ghost", false), Merge::Apply);
    }

    #[test]
    fn late_racing_snapshot_after_finish_is_stale() {
        let mut finished = ffa_room(2);
        finished.status = RoomStatus::Finished;
        finished.updated_at = 5_000;

        let mut late = ffa_room(2);
        late.updated_at = 4_900;
        assert!(is_stale(&finished, &late));
        late.updated_at = 5_000;
        assert!(is_stale(&finished, &late));

        late.updated_at = 6_000;
        assert!(!is_stale(&finished, &late));

        let mut rematch = ffa_room(2);
        rematch.status = RoomStatus::Waiting;
        rematch.updated_at = 5_000;
        assert!(!is_stale(&finished, &rematch));
    }

    #[test]
    fn removal_errors_map_to_reasons() {
        assert_eq!(
            RemovalReason::from_error(&ArenaError::RoomNotFound),
            Some(RemovalReason::RoomDeleted)
        );
        assert_eq!(
            RemovalReason::from_error(&ArenaError::Kicked("bye".into())),
            Some(RemovalReason::Kicked("bye".into()))
        );
        assert_eq!(
            RemovalReason::from_error(&ArenaError::NotAuthorized("host only".into())),
            None
        );
        assert_eq!(
            RemovalReason::from_error(&ArenaError::Transport("reset".into())),
            None
        );
    }

    #[test]
    fn finished_snapshot_keeps_known_relay_times() {
        let mut previous = relay_room(2, 2);
        if let Some(relay) = previous.relay.as_mut() {
            relay.team_a.finish_time = Some(7_000);
        }
        let mut incoming = relay_room(2, 2);
        incoming.status = RoomStatus::Finished;
        if let Some(relay) = incoming.relay.as_mut() {
            relay.team_b.finish_time = Some(7_400);
        }

        keep_known_results(&previous, &mut incoming);
        let relay = incoming.relay.unwrap();
        assert_eq!(relay.team_a.finish_time, Some(7_000));
        assert_eq!(relay.team_b.finish_time, Some(7_400));
    }

    #[test]
    fn cadence_by_phase() {
        let cadence = PollCadence::default();
        assert_eq!(
            cadence.interval(RoomStatus::Selecting, GameMode::Relay),
            Duration::from_secs(3)
        );
        assert_eq!(
            cadence.interval(RoomStatus::Racing, GameMode::Relay),
            Duration::from_millis(300)
        );
        assert_eq!(
            cadence.interval(RoomStatus::Finished, GameMode::FreeForAll),
            Duration::from_secs(1)
        );
        assert_eq!(cadence.hosting, Duration::from_secs(1));
    }
}
