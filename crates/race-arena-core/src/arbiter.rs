//! Authority Arbiter
//!
//! Decides whether the local participant is the host. Two paths can reveal
//! a change: an explicit host-change push, and any room update whose
//! `hostId` differs from the cached one. Both feed the same transition so a
//! lost push is covered by the next poll.

use crate::engine::ResumePlan;
use crate::types::{Room, RoomStatus};
use tracing::info;

/// Outcome of feeding one host observation to the arbiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorityChange {
    Unchanged,
    /// The local participant just became host. `takeover` is set when the
    /// room was mid-countdown or mid-race, meaning the local side must pick
    /// up whatever the previous host was driving.
    Acquired { takeover: bool },
    Lost,
}

#[derive(Debug, Clone)]
pub struct AuthorityArbiter {
    local_id: String,
    cached_host: Option<String>,
    is_host: bool,
}

impl AuthorityArbiter {
    pub fn new(local_id: impl Into<String>) -> Self {
        Self {
            local_id: local_id.into(),
            cached_host: None,
            is_host: false,
        }
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    pub fn is_host(&self) -> bool {
        self.is_host
    }

    pub fn cached_host(&self) -> Option<&str> {
        self.cached_host.as_deref()
    }

    /// Incidental path: any room snapshot.
    pub fn observe(&mut self, room: &Room) -> AuthorityChange {
        self.transition(&room.host_id, room.status)
    }

    /// Explicit path: a host-change notification with its snapshot.
    pub fn host_changed(&mut self, new_host_id: &str, room: &Room) -> AuthorityChange {
        self.transition(new_host_id, room.status)
    }

    fn transition(&mut self, host_id: &str, status: RoomStatus) -> AuthorityChange {
        if self.cached_host.as_deref() != Some(host_id) {
            self.cached_host = Some(host_id.to_string());
        }
        let was_host = self.is_host;
        self.is_host = host_id == self.local_id;

        match (was_host, self.is_host) {
            (false, true) => {
                let takeover = status.is_live();
                info!("Became host (takeover: {})", takeover);
                AuthorityChange::Acquired { takeover }
            }
            (true, false) => {
                info!("Host moved to {}", host_id);
                AuthorityChange::Lost
            }
            _ => AuthorityChange::Unchanged,
        }
    }
}

/// Where a newly appointed host resumes a race already in flight.
///
/// Elapsed time is measured from the persisted `raceStartTime`. Past the
/// grace window the snapshot's positions are kept; inside it the race is
/// treated as a fresh start on the same time origin.
pub fn resume_plan(room: &Room, now_ms: u64, grace_ms: u64) -> ResumePlan {
    let elapsed_ms = room
        .race_start_time
        .map(|start| now_ms.saturating_sub(start))
        .unwrap_or(0);
    ResumePlan {
        elapsed_ms,
        preserve_positions: elapsed_ms > grace_ms,
    }
}
