//! In-process room service
//!
//! A [`LocalBackend`] holds every room in memory and enforces the same rules
//! a hosted room service does: membership errors, exclusive racer choice,
//! host reassignment, kicks, heartbeat pruning and status transitions.
//! Each participant talks to it through its own [`LocalRoomService`].
//!
//! The push channel can be made lossy and polls can be made to fail, which
//! is how tests exercise the feed's recovery paths.

use crate::service::{PushEvent, RoomService, Subscription};
use crate::time::RuntimeClock;
use async_trait::async_trait;
use race_arena_core::lifecycle::{
    apply_racer_choice, apply_ready_toggle, apply_runner_orders, apply_team_choice, check_start,
    ensure_transition,
};
use race_arena_core::{
    ArenaError, Clock, GameMode, Participant, Result, Room, RoomPatch, RoomStatus,
    RunnerAssignment, Team, generate_room_code,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info};

const SUBSCRIBER_CAPACITY: usize = 256;

struct Subscriber {
    participant_id: String,
    tx: mpsc::Sender<PushEvent>,
}

struct LocalRoom {
    room: Room,
    last_seen: HashMap<String, u64>,
    subscribers: Vec<Subscriber>,
}

struct BackendState {
    rooms: HashMap<String, LocalRoom>,
    push_loss: f64,
    failing_polls: u32,
    rng: StdRng,
}

impl BackendState {
    fn room_mut(&mut self, code: &str) -> Result<&mut LocalRoom> {
        self.rooms.get_mut(code).ok_or(ArenaError::RoomNotFound)
    }

    /// Deliver to every live subscriber of `code`, subject to push loss.
    fn broadcast(&mut self, code: &str, event: PushEvent) {
        let loss = self.push_loss;
        let Some(local) = self.rooms.get_mut(code) else {
            return;
        };
        let rng = &mut self.rng;
        local.subscribers.retain(|sub| {
            if loss > 0.0 && rng.gen_bool(loss.min(1.0)) {
                return !sub.tx.is_closed();
            }
            !matches!(
                sub.tx.try_send(event.clone()),
                Err(mpsc::error::TrySendError::Closed(_))
            )
        });
    }

    fn update(&mut self, code: &str) {
        if let Some(room) = self.rooms.get(code).map(|l| l.room.clone()) {
            self.broadcast(code, PushEvent::Update(room));
        }
    }

    /// Drop a participant; reassign the host or delete the room as needed.
    fn remove_participant(&mut self, code: &str, participant_id: &str, now: u64) {
        let Some(local) = self.rooms.get_mut(code) else {
            return;
        };
        local.room.participants.retain(|p| p.id != participant_id);
        local.last_seen.remove(participant_id);
        local
            .subscribers
            .retain(|sub| sub.participant_id != participant_id);

        if local.room.participants.is_empty() {
            info!("Room {} is empty, deleting", code);
            self.rooms.remove(code);
            return;
        }

        local.room.updated_at = now;
        if local.room.host_id == participant_id {
            let next = local
                .room
                .participants
                .iter()
                .min_by_key(|p| p.joined_at)
                .map(|p| p.id.clone())
                .unwrap_or_default();
            info!("Room {}: host {} left, {} takes over", code, participant_id, next);
            local.room.host_id = next.clone();
            let room = local.room.clone();
            self.broadcast(
                code,
                PushEvent::HostChanged {
                    new_host_id: next,
                    room,
                },
            );
        } else {
            self.update(code);
        }
    }
}

/// Shared in-memory room store
#[derive(Clone)]
pub struct LocalBackend {
    state: Arc<RwLock<BackendState>>,
    clock: Arc<dyn Clock>,
    prune_grace: Duration,
}

impl Default for LocalBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalBackend {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(RuntimeClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(RwLock::new(BackendState {
                rooms: HashMap::new(),
                push_loss: 0.0,
                failing_polls: 0,
                rng: StdRng::from_entropy(),
            })),
            clock,
            prune_grace: Duration::from_secs(15),
        }
    }

    /// Participants silent for longer than this are removed (default: 15s).
    pub fn prune_grace(mut self, grace: Duration) -> Self {
        self.prune_grace = grace;
        self
    }

    /// A handle acting as `participant_id`.
    pub fn service(&self, participant_id: impl Into<String>) -> LocalRoomService {
        LocalRoomService {
            backend: self.clone(),
            participant_id: participant_id.into(),
        }
    }

    /// Probability that any single push notification is silently dropped.
    pub async fn set_push_loss(&self, probability: f64) {
        self.state.write().await.push_loss = probability.clamp(0.0, 1.0);
    }

    /// Make the next `count` room-state reads fail with a transport error.
    pub async fn fail_polls(&self, count: u32) {
        self.state.write().await.failing_polls = count;
    }

    pub async fn room(&self, code: &str) -> Option<Room> {
        self.state.read().await.rooms.get(code).map(|l| l.room.clone())
    }

    /// Remove a room outright, notifying its subscribers.
    pub async fn delete_room(&self, code: &str) {
        let mut state = self.state.write().await;
        state.broadcast(
            code,
            PushEvent::Removed {
                participant_id: None,
                message: "The room was closed".into(),
            },
        );
        state.rooms.remove(code);
        info!("Deleted room {}", code);
    }

    /// Remove participants whose last heartbeat is older than the grace window.
    pub async fn prune(&self) {
        let now = self.clock.now_ms();
        let grace = self.prune_grace.as_millis() as u64;
        let mut state = self.state.write().await;
        prune_locked(&mut state, now, grace);
    }

    async fn locked(&self) -> (tokio::sync::RwLockWriteGuard<'_, BackendState>, u64) {
        let now = self.clock.now_ms();
        let mut state = self.state.write().await;
        prune_locked(&mut state, now, self.prune_grace.as_millis() as u64);
        (state, now)
    }
}

fn prune_locked(state: &mut BackendState, now: u64, grace: u64) {
    let stale: Vec<(String, String)> = state
        .rooms
        .iter()
        .flat_map(|(code, local)| {
            local
                .last_seen
                .iter()
                .filter(|(_, seen)| now.saturating_sub(**seen) > grace)
                .map(|(id, _)| (code.clone(), id.clone()))
                .collect::<Vec<_>>()
        })
        .collect();

    for (code, id) in stale {
        info!("Room {}: pruning silent participant {}", code, id);
        state.broadcast(
            &code,
            PushEvent::Removed {
                participant_id: Some(id.clone()),
                message: "Disconnected".into(),
            },
        );
        state.remove_participant(&code, &id, now);
    }
}

/// One participant's view of a [`LocalBackend`]
#[derive(Clone)]
pub struct LocalRoomService {
    backend: LocalBackend,
    participant_id: String,
}

impl LocalRoomService {
    pub fn backend(&self) -> &LocalBackend {
        &self.backend
    }

    /// Run a lobby mutation as this participant and broadcast the result.
    async fn mutate<F>(&self, code: &str, f: F) -> Result<Room>
    where
        F: FnOnce(&mut Room, &str) -> Result<()> + Send,
    {
        let (mut state, now) = self.backend.locked().await;
        let local = state.room_mut(code)?;
        f(&mut local.room, &self.participant_id)?;
        local.room.updated_at = now;
        local.last_seen.insert(self.participant_id.clone(), now);
        let room = local.room.clone();
        state.update(code);
        Ok(room)
    }
}

#[async_trait]
impl RoomService for LocalRoomService {
    fn participant_id(&self) -> &str {
        &self.participant_id
    }

    async fn create_room(
        &self,
        name: &str,
        max_participants: usize,
        mode: GameMode,
    ) -> Result<Room> {
        let (mut state, now) = self.backend.locked().await;
        let mut code = generate_room_code();
        while state.rooms.contains_key(&code) {
            code = generate_room_code();
        }

        let room = Room {
            code: code.clone(),
            host_id: self.participant_id.clone(),
            mode,
            status: RoomStatus::Waiting,
            max_participants: max_participants.max(1),
            countdown: 0,
            race_start_time: None,
            race_end_time: None,
            participants: vec![Participant::new(&self.participant_id, name, now)],
            racers: Vec::new(),
            relay: None,
            created_at: now,
            updated_at: now,
        };
        state.rooms.insert(
            code.clone(),
            LocalRoom {
                room: room.clone(),
                last_seen: HashMap::from([(self.participant_id.clone(), now)]),
                subscribers: Vec::new(),
            },
        );
        info!("Created room: {}", code);
        Ok(room)
    }

    async fn join_room(&self, code: &str, name: &str) -> Result<Room> {
        let (mut state, now) = self.backend.locked().await;
        let local = state.room_mut(code)?;
        if !local.room.is_member(&self.participant_id) {
            if !local.room.status.is_lobby() {
                return Err(ArenaError::AlreadyStarted);
            }
            if local.room.participants.len() >= local.room.max_participants {
                return Err(ArenaError::RoomFull);
            }
            // Join order must stay strictly increasing for host succession.
            let joined_at = local
                .room
                .participants
                .iter()
                .map(|p| p.joined_at + 1)
                .max()
                .unwrap_or(now)
                .max(now);
            local
                .room
                .participants
                .push(Participant::new(&self.participant_id, name, joined_at));
            local.room.updated_at = now;
        }
        local.last_seen.insert(self.participant_id.clone(), now);
        let room = local.room.clone();
        state.update(code);
        info!("{} joined room {}", self.participant_id, code);
        Ok(room)
    }

    async fn leave_room(&self, code: &str) -> Result<()> {
        let (mut state, now) = self.backend.locked().await;
        if !state.room_mut(code)?.room.is_member(&self.participant_id) {
            return Err(ArenaError::NotAMember);
        }
        state.remove_participant(code, &self.participant_id, now);
        info!("{} left room {}", self.participant_id, code);
        Ok(())
    }

    async fn kick_player(&self, code: &str, participant_id: &str) -> Result<Room> {
        let (mut state, now) = self.backend.locked().await;
        let local = state.room_mut(code)?;
        if !local.room.is_host(&self.participant_id) {
            return Err(ArenaError::NotAuthorized(
                "only the host can kick participants".into(),
            ));
        }
        if participant_id == self.participant_id {
            return Err(ArenaError::NotAuthorized("the host cannot kick itself".into()));
        }
        if !local.room.is_member(participant_id) {
            return Err(ArenaError::NotAMember);
        }

        state.broadcast(
            code,
            PushEvent::Removed {
                participant_id: Some(participant_id.to_string()),
                message: "You were removed from the room by the host".into(),
            },
        );
        state.remove_participant(code, participant_id, now);
        info!("Room {}: kicked {}", code, participant_id);
        state
            .rooms
            .get(code)
            .map(|l| l.room.clone())
            .ok_or(ArenaError::RoomNotFound)
    }

    async fn select_racer(&self, code: &str, racer_id: u32) -> Result<Room> {
        self.mutate(code, |room, me| apply_racer_choice(room, me, racer_id))
            .await
    }

    async fn select_team(&self, code: &str, team: Team) -> Result<Room> {
        self.mutate(code, |room, me| apply_team_choice(room, me, team))
            .await
    }

    async fn toggle_ready(&self, code: &str) -> Result<Room> {
        self.mutate(code, apply_ready_toggle).await
    }

    async fn assign_runner_orders(
        &self,
        code: &str,
        assignments: &[RunnerAssignment],
    ) -> Result<Room> {
        let assignments = assignments.to_vec();
        self.mutate(code, move |room, me| {
            apply_runner_orders(room, me, &assignments)
        })
        .await
    }

    async fn start_game(&self, code: &str) -> Result<Room> {
        self.mutate(code, |room, me| {
            check_start(room, me)?;
            room.status = RoomStatus::Countdown;
            Ok(())
        })
        .await
    }

    async fn update_game_state(&self, code: &str, patch: &RoomPatch) -> Result<Room> {
        let (mut state, now) = self.backend.locked().await;
        let local = state.room_mut(code)?;
        if !local.room.is_host(&self.participant_id) {
            return Err(ArenaError::NotAuthorized(
                "only the host can write game state".into(),
            ));
        }
        if let Some(status) = patch.status {
            ensure_transition(local.room.status, status)?;
        }
        local.room.apply_patch(patch);
        local.room.updated_at = now;
        local.last_seen.insert(self.participant_id.clone(), now);
        let room = local.room.clone();
        state.update(code);
        Ok(room)
    }

    async fn get_room_state(&self, code: &str) -> Result<Room> {
        let (mut state, _) = self.backend.locked().await;
        if state.failing_polls > 0 {
            state.failing_polls -= 1;
            return Err(ArenaError::Transport("injected poll failure".into()));
        }
        state
            .rooms
            .get(code)
            .map(|l| l.room.clone())
            .ok_or(ArenaError::RoomNotFound)
    }

    async fn subscribe(&self, code: &str) -> Result<Subscription> {
        let (mut state, _) = self.backend.locked().await;
        let local = state.room_mut(code)?;
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CAPACITY);
        local.subscribers.push(Subscriber {
            participant_id: self.participant_id.clone(),
            tx,
        });
        debug!("{} subscribed to room {}", self.participant_id, code);
        Ok(Subscription::new(rx, None))
    }

    async fn send_heartbeat(&self, code: &str) -> Result<()> {
        let (mut state, now) = self.backend.locked().await;
        let local = state.room_mut(code)?;
        if !local.room.is_member(&self.participant_id) {
            return Err(ArenaError::NotAMember);
        }
        local.last_seen.insert(self.participant_id.clone(), now);
        Ok(())
    }
}
