//! Room Service boundary
//!
//! The room service owns every room document. A [`RoomService`] handle is
//! bound to one participant identity and exposes the operations a client
//! needs, plus a push subscription for low-latency change notifications.

use crate::spawn::TaskGuard;
use async_trait::async_trait;
use race_arena_core::{GameMode, Result, Room, RoomPatch, RunnerAssignment, Team};
use tokio::sync::mpsc;

/// One notification on the push channel.
#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    /// The room changed.
    Update(Room),
    /// Host reassigned, with the snapshot that carries the change.
    HostChanged { new_host_id: String, room: Room },
    /// A participant was removed. `None` means the notification was
    /// addressed to this subscriber alone.
    Removed {
        participant_id: Option<String>,
        message: String,
    },
    /// Stream-level problem; the poll loop covers for it.
    Error(String),
}

/// An open push stream. Closing is idempotent and also happens on drop.
#[derive(Debug)]
pub struct Subscription {
    events: mpsc::Receiver<PushEvent>,
    reader: Option<TaskGuard>,
    closed: bool,
}

impl Subscription {
    /// Wrap a receiver. `reader` is the guard of the task feeding it, if any.
    pub fn new(events: mpsc::Receiver<PushEvent>, reader: Option<TaskGuard>) -> Self {
        Self {
            events,
            reader,
            closed: false,
        }
    }

    /// Next event; `None` once the stream has ended or was closed.
    pub async fn recv(&mut self) -> Option<PushEvent> {
        if self.closed {
            return None;
        }
        self.events.recv().await
    }

    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Some(reader) = self.reader.take() {
            reader.stop();
        }
        self.events.close();
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}

#[async_trait]
pub trait RoomService: Send + Sync {
    /// Identity every call is made as.
    fn participant_id(&self) -> &str;

    async fn create_room(&self, name: &str, max_participants: usize, mode: GameMode)
    -> Result<Room>;

    async fn join_room(&self, code: &str, name: &str) -> Result<Room>;

    async fn leave_room(&self, code: &str) -> Result<()>;

    /// Host only.
    async fn kick_player(&self, code: &str, participant_id: &str) -> Result<Room>;

    /// Toggle: choosing one's own racer again clears the choice.
    async fn select_racer(&self, code: &str, racer_id: u32) -> Result<Room>;

    /// Relay only, lobby only.
    async fn select_team(&self, code: &str, team: Team) -> Result<Room>;

    async fn toggle_ready(&self, code: &str) -> Result<Room>;

    /// Host only, relay only, once at start.
    async fn assign_runner_orders(
        &self,
        code: &str,
        assignments: &[RunnerAssignment],
    ) -> Result<Room>;

    /// Host only; the start preconditions must hold.
    async fn start_game(&self, code: &str) -> Result<Room>;

    /// Host only; last write wins.
    async fn update_game_state(&self, code: &str, patch: &RoomPatch) -> Result<Room>;

    async fn get_room_state(&self, code: &str) -> Result<Room>;

    async fn subscribe(&self, code: &str) -> Result<Subscription>;

    async fn send_heartbeat(&self, code: &str) -> Result<()>;
}
