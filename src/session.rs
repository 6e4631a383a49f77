//! Race Session - one participant's live view of a room
//!
//! A [`RaceSession`] owns every resource the participant holds while in a
//! room: the push subscription, the poll loop, the presence heartbeat, and a
//! driver task that merges the feed, tracks host authority, and runs
//! whichever phase task the room status calls for (countdown writer,
//! simulation, or guest interpolation).

use crate::bridge::{FeedInput, start_poller, start_push_forwarder};
use crate::heartbeat::start_heartbeat;
use crate::service::RoomService;
use crate::spawn::{ActiveFlag, StopSignal, TaskGuard, spawn};
use crate::time::{Duration, RuntimeClock, interval, sleep};
use crate::types::SessionConfig;
use race_arena_core::feed::{is_stale, keep_known_results, merge};
use race_arena_core::lifecycle::{
    apply_racer_choice, apply_ready_toggle, apply_team_choice, check_rematch, check_start,
    countdown_patch, countdown_step, race_start_patch, rematch_patch, shuffle_runner_orders,
    start_patch,
};
use race_arena_core::{
    ArenaError, AuthorityArbiter, AuthorityChange, Clock, CountdownStep, FeedSource, GameMode,
    GuestPredictor, Merge, RaceEngine, RacerView, RelayState, RematchKind, RemovalReason, Result,
    Room, RoomStatus, Team, generate_seed, resume_plan,
};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{RwLock, mpsc, watch};
use tracing::{debug, info, warn};

/// Final race state is written this many times before giving up.
const FINAL_WRITE_ATTEMPTS: u32 = 5;
const FINAL_WRITE_RETRY: Duration = Duration::from_millis(200);
const COUNTDOWN_STEP: Duration = Duration::from_secs(1);

/// Session events emitted to the application
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Room snapshot changed
    RoomUpdated(Room),
    /// Room status changed
    StatusChanged { from: RoomStatus, to: RoomStatus },
    /// The local participant became host
    BecameHost { takeover: bool },
    /// Host authority moved elsewhere
    LostHost,
    /// A race in flight was picked up after a host change
    TakeoverResumed { elapsed_ms: u64, preserved: bool },
    /// Countdown value changed
    CountdownTick(u32),
    /// Race started at this wall-clock time
    RaceStarted { race_start_time: u64 },
    /// Positions to render
    Frame {
        elapsed_ms: u64,
        racers: Vec<RacerView>,
    },
    /// Race over
    RaceFinished(RaceResults),
    /// The local participant is out of the room; the session is closed
    Removed(String),
    /// Error occurred
    Error(String),
}

/// Final outcome of a race
#[derive(Debug, Clone, PartialEq)]
pub struct RaceResults {
    /// Free-for-all racers ordered by rank; empty for relay
    pub standings: Vec<RacerView>,
    /// Relay winner; `None` for free-for-all or a draw
    pub winner: Option<Team>,
    pub relay: Option<RelayState>,
    pub race_end_time: Option<u64>,
}

impl RaceResults {
    pub fn from_room(room: &Room) -> Self {
        Self {
            standings: room.standings(),
            winner: room.relay.as_ref().and_then(RelayState::winner),
            relay: room.relay.clone(),
            race_end_time: room.race_end_time,
        }
    }
}

struct Shared {
    service: Arc<dyn RoomService>,
    config: SessionConfig,
    clock: Arc<dyn Clock>,
    code: String,
    local_id: String,
    room: RwLock<Room>,
    active: ActiveFlag,
    simulating: ActiveFlag,
    events: mpsc::Sender<SessionEvent>,
    feed: mpsc::UnboundedSender<FeedInput>,
}

impl Shared {
    fn emit(&self, event: SessionEvent) {
        if let Err(mpsc::error::TrySendError::Full(_)) = self.events.try_send(event) {
            debug!("Event channel full, dropping event");
        }
    }

    /// Frames are droppable and never take the last quarter of the channel,
    /// which stays free for lifecycle events.
    fn emit_frame(&self, elapsed_ms: u64, racers: Vec<RacerView>) {
        if self.events.capacity() * 4 <= self.events.max_capacity() {
            return;
        }
        self.emit(SessionEvent::Frame { elapsed_ms, racers });
    }

    fn feed_local(&self, room: Room) {
        let _ = self.feed.send(FeedInput::Snapshot {
            room,
            source: FeedSource::Local,
        });
    }
}

/// Race Session - a participant's membership in one room
pub struct RaceSession {
    shared: Arc<Shared>,
    event_rx: Arc<RwLock<mpsc::Receiver<SessionEvent>>>,
    driver: TaskGuard,
}

impl RaceSession {
    /// Create a room and enter it as host.
    pub async fn create(
        service: Arc<dyn RoomService>,
        config: SessionConfig,
        name: &str,
        max_participants: usize,
        mode: GameMode,
    ) -> Result<Self> {
        let room = service.create_room(name, max_participants, mode).await?;
        info!("Created room: {}", room.code);
        Self::start(service, config, room).await
    }

    /// Join an existing room.
    pub async fn join(
        service: Arc<dyn RoomService>,
        config: SessionConfig,
        code: &str,
        name: &str,
    ) -> Result<Self> {
        let room = service.join_room(code, name).await?;
        info!("Joined room: {}", room.code);
        Self::start(service, config, room).await
    }

    async fn start(service: Arc<dyn RoomService>, config: SessionConfig, room: Room) -> Result<Self> {
        let code = room.code.clone();
        let local_id = service.participant_id().to_string();
        let (event_tx, event_rx) = mpsc::channel(config.event_capacity);
        let (feed_tx, feed_rx) = mpsc::unbounded_channel();
        let (cadence_tx, cadence_rx) =
            watch::channel(Some(config.poll.interval(room.status, room.mode)));

        let tasks = TaskGuard::new().0;
        match service.subscribe(&code).await {
            Ok(subscription) => start_push_forwarder(
                subscription,
                local_id.clone(),
                feed_tx.clone(),
                tasks.signal(),
            ),
            Err(e) => warn!("Push subscription for room {} failed, polling only: {}", code, e),
        }
        start_poller(
            service.clone(),
            code.clone(),
            cadence_rx,
            feed_tx.clone(),
            tasks.signal(),
        );
        start_heartbeat(
            service.clone(),
            code.clone(),
            config.heartbeat_interval,
            tasks.signal(),
        );

        let shared = Arc::new(Shared {
            service,
            config,
            clock: Arc::new(RuntimeClock),
            code,
            local_id: local_id.clone(),
            room: RwLock::new(room.clone()),
            active: ActiveFlag::new(true),
            simulating: ActiveFlag::new(false),
            events: event_tx,
            feed: feed_tx,
        });

        let (driver, stop) = TaskGuard::new();
        let state = Driver {
            shared: shared.clone(),
            arbiter: AuthorityArbiter::new(local_id),
            cadence: cadence_tx,
            _tasks: tasks,
            countdown: None,
            engine: None,
            frames: None,
            pending_takeover: false,
            shown_countdown: None,
            shown_start: None,
            shown_finish: false,
        };
        spawn(state.run(feed_rx, stop));
        shared.feed_local(room);

        Ok(Self {
            shared,
            event_rx: Arc::new(RwLock::new(event_rx)),
            driver,
        })
    }

    pub fn code(&self) -> &str {
        &self.shared.code
    }

    pub fn participant_id(&self) -> &str {
        &self.shared.local_id
    }

    /// Latest merged room snapshot
    pub async fn room(&self) -> Room {
        self.shared.room.read().await.clone()
    }

    pub async fn is_host(&self) -> bool {
        self.shared.room.read().await.is_host(&self.shared.local_id)
    }

    /// False after leaving or being removed.
    pub fn is_active(&self) -> bool {
        self.shared.active.is_active()
    }

    /// Receive next event (non-blocking)
    pub async fn try_recv(&self) -> Option<SessionEvent> {
        self.event_rx.write().await.try_recv().ok()
    }

    /// Receive next event (blocking)
    pub async fn recv(&self) -> Option<SessionEvent> {
        self.event_rx.write().await.recv().await
    }

    // =========================================================================
    // Lobby
    // =========================================================================

    /// Choose a racer; choosing the same one again clears the choice.
    pub async fn select_racer(&self, racer_id: u32) -> Result<Room> {
        self.precheck(|room, me| apply_racer_choice(room, me, racer_id))
            .await?;
        self.track(self.shared.service.select_racer(&self.shared.code, racer_id))
            .await
    }

    pub async fn select_team(&self, team: Team) -> Result<Room> {
        self.precheck(|room, me| apply_team_choice(room, me, team))
            .await?;
        self.track(self.shared.service.select_team(&self.shared.code, team))
            .await
    }

    pub async fn toggle_ready(&self) -> Result<Room> {
        self.precheck(apply_ready_toggle).await?;
        self.track(self.shared.service.toggle_ready(&self.shared.code))
            .await
    }

    /// Start the countdown (host only).
    ///
    /// Relay runner orders are shuffled and assigned first; the initial racer
    /// states are written together with the countdown value.
    pub async fn start_game(&self) -> Result<Room> {
        self.ensure_active()?;
        let room = self.room().await;
        check_start(&room, &self.shared.local_id)?;

        let service = &self.shared.service;
        let code = &self.shared.code;
        if room.mode == GameMode::Relay {
            let assignments = {
                let mut rng = match self.shared.config.seed {
                    Some(seed) => StdRng::seed_from_u64(seed),
                    None => StdRng::from_entropy(),
                };
                shuffle_runner_orders(&room, &mut rng)
            };
            self.track(service.assign_runner_orders(code, &assignments))
                .await?;
        }

        let started = self.track(service.start_game(code)).await?;
        let patch = start_patch(&started, self.shared.config.countdown_seconds);
        let room = self.track(service.update_game_state(code, &patch)).await?;
        info!("Race starting in room {}", code);
        Ok(room)
    }

    /// Back to the lobby after a finished race (host only).
    pub async fn rematch(&self, kind: RematchKind) -> Result<Room> {
        self.ensure_active()?;
        let room = self.room().await;
        check_rematch(&room, &self.shared.local_id)?;
        let patch = rematch_patch(&room, kind);
        self.track(self.shared.service.update_game_state(&self.shared.code, &patch))
            .await
    }

    /// Remove another participant (host only).
    pub async fn kick(&self, participant_id: &str) -> Result<Room> {
        self.ensure_active()?;
        if !self.is_host().await {
            return Err(ArenaError::NotAuthorized(
                "only the host can kick participants".into(),
            ));
        }
        let room = self
            .shared
            .service
            .kick_player(&self.shared.code, participant_id)
            .await?;
        self.shared.feed_local(room.clone());
        Ok(room)
    }

    /// Fetch a fresh snapshot now instead of waiting for the next poll.
    pub async fn refresh(&self) -> Result<Room> {
        self.ensure_active()?;
        match self.shared.service.get_room_state(&self.shared.code).await {
            Ok(room) => {
                let _ = self.shared.feed.send(FeedInput::Snapshot {
                    room: room.clone(),
                    source: FeedSource::Poll,
                });
                Ok(room)
            }
            Err(e) => {
                self.observe_error(&e);
                Err(e)
            }
        }
    }

    /// Leave the room and release every session resource. Idempotent.
    pub async fn leave(&self) -> Result<()> {
        if !self.shared.active.deactivate() {
            return Ok(());
        }
        self.driver.stop();
        self.shared.simulating.set(false);
        match self.shared.service.leave_room(&self.shared.code).await {
            Ok(()) => {
                info!("Left room: {}", self.shared.code);
                Ok(())
            }
            Err(e) if e.is_membership() => Ok(()),
            Err(e) => Err(e),
        }
    }

    // =========================================================================
    // Private
    // =========================================================================

    fn ensure_active(&self) -> Result<()> {
        if self.shared.active.is_active() {
            Ok(())
        } else {
            Err(ArenaError::SessionClosed)
        }
    }

    /// Run a lobby rule against the cached room so a doomed call fails locally.
    async fn precheck<F>(&self, rule: F) -> Result<()>
    where
        F: FnOnce(&mut Room, &str) -> Result<()>,
    {
        self.ensure_active()?;
        let mut room = self.room().await;
        rule(&mut room, &self.shared.local_id)
    }

    /// Await a service call; its room goes onto the feed, its forced-removal
    /// errors end the session.
    async fn track(&self, call: impl Future<Output = Result<Room>>) -> Result<Room> {
        self.ensure_active()?;
        match call.await {
            Ok(room) => {
                self.shared.feed_local(room.clone());
                Ok(room)
            }
            Err(e) => {
                self.observe_error(&e);
                Err(e)
            }
        }
    }

    fn observe_error(&self, error: &ArenaError) {
        if let Some(reason) = RemovalReason::from_error(error) {
            let _ = self.shared.feed.send(FeedInput::Removed(reason));
        }
    }
}

impl Drop for RaceSession {
    fn drop(&mut self) {
        self.shared.active.set(false);
        self.driver.stop();
    }
}

// =============================================================================
// Driver
// =============================================================================

struct Driver {
    shared: Arc<Shared>,
    arbiter: AuthorityArbiter,
    cadence: watch::Sender<Option<Duration>>,
    /// Push forwarder, poller and heartbeat stop with the driver.
    _tasks: TaskGuard,
    countdown: Option<TaskGuard>,
    engine: Option<TaskGuard>,
    frames: Option<(TaskGuard, watch::Sender<Room>)>,
    pending_takeover: bool,
    shown_countdown: Option<u32>,
    shown_start: Option<u64>,
    shown_finish: bool,
}

impl Driver {
    async fn run(mut self, mut feed: mpsc::UnboundedReceiver<FeedInput>, mut stop: StopSignal) {
        loop {
            let input = tokio::select! {
                _ = stop.stopped() => break,
                input = feed.recv() => input,
            };
            let Some(input) = input else {
                break;
            };
            if !self.handle(input).await {
                break;
            }
        }
        self.stop_phase_tasks();
        debug!("Session driver for room {} stopped", self.shared.code);
    }

    /// Returns false once the session is over.
    async fn handle(&mut self, input: FeedInput) -> bool {
        match input {
            FeedInput::Removed(reason) => {
                self.remove(reason);
                false
            }
            FeedInput::HostChanged { new_host_id, room } => {
                let change = self.arbiter.host_changed(&new_host_id, &room);
                self.apply(room, FeedSource::Push, change).await
            }
            FeedInput::Snapshot { room, source } => {
                // Out-of-order snapshots carry an outdated host too.
                if is_stale(&*self.shared.room.read().await, &room) {
                    debug!(
                        "Dropping out-of-order {:?} snapshot from {:?}",
                        room.status, source
                    );
                    return true;
                }
                let change = self.arbiter.observe(&room);
                self.apply(room, source, change).await
            }
        }
    }

    async fn apply(&mut self, mut incoming: Room, source: FeedSource, change: AuthorityChange) -> bool {
        match change {
            AuthorityChange::Acquired { takeover } => {
                self.pending_takeover = takeover;
                self.shared.emit(SessionEvent::BecameHost { takeover });
            }
            AuthorityChange::Lost => {
                self.stop_host_tasks();
                self.shared.emit(SessionEvent::LostHost);
            }
            AuthorityChange::Unchanged => {}
        }

        let simulating = self.shared.simulating.is_active();
        match merge(&incoming, source, &self.shared.local_id, simulating) {
            Merge::Remove(reason) => {
                self.remove(reason);
                return false;
            }
            Merge::DropStale => {
                debug!("Dropping racing snapshot from {:?} while simulating", source);
                let mut room = self.shared.room.write().await;
                room.host_id = incoming.host_id;
                room.participants = incoming.participants;
                return true;
            }
            Merge::Apply => {}
        }

        let previous = self.shared.room.read().await.clone();
        if is_stale(&previous, &incoming) {
            debug!(
                "Dropping out-of-order {:?} snapshot from {:?}",
                incoming.status, source
            );
            return true;
        }
        keep_known_results(&previous, &mut incoming);
        *self.shared.room.write().await = incoming.clone();

        if previous.status != incoming.status {
            debug!(
                "Room {}: {:?} -> {:?}",
                incoming.code, previous.status, incoming.status
            );
            self.shared.emit(SessionEvent::StatusChanged {
                from: previous.status,
                to: incoming.status,
            });
        }
        if previous != incoming {
            self.shared.emit(SessionEvent::RoomUpdated(incoming.clone()));
        }

        self.reconcile(&incoming);
        self.update_cadence(&incoming);
        true
    }

    /// Start or stop phase tasks to match the room.
    fn reconcile(&mut self, room: &Room) {
        let is_host = self.arbiter.is_host();

        if room.status != RoomStatus::Countdown {
            self.countdown = None;
            self.shown_countdown = None;
        }
        if room.status != RoomStatus::Racing {
            self.stop_engine();
            self.frames = None;
        }
        if room.status != RoomStatus::Finished {
            self.shown_finish = false;
        }

        match room.status {
            RoomStatus::Waiting | RoomStatus::Selecting => {
                self.shown_start = None;
                self.pending_takeover = false;
            }
            RoomStatus::Countdown => {
                if room.countdown > 0 && self.shown_countdown != Some(room.countdown) {
                    self.shown_countdown = Some(room.countdown);
                    self.shared.emit(SessionEvent::CountdownTick(room.countdown));
                }
                self.pending_takeover = false;
                if !is_host {
                    self.countdown = None;
                } else if self.countdown.is_none() {
                    let (guard, stop) = TaskGuard::new();
                    run_countdown(self.shared.clone(), stop);
                    self.countdown = Some(guard);
                }
            }
            RoomStatus::Racing => {
                if room.race_start_time != self.shown_start {
                    self.shown_start = room.race_start_time;
                    if let Some(race_start_time) = room.race_start_time {
                        self.shared
                            .emit(SessionEvent::RaceStarted { race_start_time });
                    }
                }
                if is_host {
                    self.frames = None;
                    if self.engine.is_none() {
                        self.start_engine(room);
                    }
                } else if let Some((_, targets)) = &self.frames {
                    targets.send_replace(room.clone());
                } else {
                    let (guard, stop) = TaskGuard::new();
                    let targets = run_frames(self.shared.clone(), room, stop);
                    self.frames = Some((guard, targets));
                }
            }
            RoomStatus::Finished => {
                if !self.shown_finish {
                    self.shown_finish = true;
                    info!("Race in room {} finished", room.code);
                    self.shared
                        .emit(SessionEvent::RaceFinished(RaceResults::from_room(room)));
                }
            }
        }
    }

    fn start_engine(&mut self, room: &Room) {
        let config = &self.shared.config;
        let plan = resume_plan(room, self.shared.clock.now_ms(), config.takeover_grace_ms);
        let seed = config.seed.unwrap_or_else(generate_seed);
        let engine = match RaceEngine::new(room, plan, config.tuning.clone(), seed) {
            Ok(engine) => engine,
            Err(e) => {
                warn!("Cannot start simulation in room {}: {}", room.code, e);
                self.shared.emit(SessionEvent::Error(e.to_string()));
                return;
            }
        };

        if std::mem::take(&mut self.pending_takeover) {
            info!(
                "Taking over race in room {} at {}ms (positions preserved: {})",
                room.code, plan.elapsed_ms, plan.preserve_positions
            );
            self.shared.emit(SessionEvent::TakeoverResumed {
                elapsed_ms: plan.elapsed_ms,
                preserved: plan.preserve_positions,
            });
        }

        self.shared.simulating.set(true);
        let (guard, stop) = TaskGuard::new();
        run_engine(self.shared.clone(), engine, room, stop);
        self.engine = Some(guard);
    }

    fn stop_engine(&mut self) {
        self.engine = None;
        self.shared.simulating.set(false);
    }

    fn stop_host_tasks(&mut self) {
        self.countdown = None;
        self.stop_engine();
    }

    fn stop_phase_tasks(&mut self) {
        self.stop_host_tasks();
        self.frames = None;
    }

    fn update_cadence(&self, room: &Room) {
        let poll = &self.shared.config.poll;
        let next = Some(if self.shared.simulating.is_active() {
            poll.hosting
        } else {
            poll.interval(room.status, room.mode)
        });
        self.cadence.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }

    fn remove(&mut self, reason: RemovalReason) {
        self.stop_phase_tasks();
        if self.shared.active.deactivate() {
            let message = reason.message();
            warn!("Removed from room {}: {}", self.shared.code, message);
            self.shared.emit(SessionEvent::Removed(message));
        }
    }
}

// =============================================================================
// Phase tasks
// =============================================================================

/// Host: step the persisted countdown once a second, then stamp the start.
fn run_countdown(shared: Arc<Shared>, mut stop: StopSignal) {
    spawn(async move {
        loop {
            tokio::select! {
                _ = stop.stopped() => return,
                _ = sleep(COUNTDOWN_STEP) => {}
            }
            if stop.is_stopped() || !shared.active.is_active() {
                return;
            }

            let current = shared.room.read().await.countdown;
            let patch = match countdown_step(current) {
                CountdownStep::Tick(remaining) => countdown_patch(remaining),
                CountdownStep::Go => race_start_patch(shared.clock.now_ms()),
            };
            match shared.service.update_game_state(&shared.code, &patch).await {
                Ok(room) => {
                    let started = room.status == RoomStatus::Racing;
                    shared.feed_local(room);
                    if started {
                        return;
                    }
                }
                // Retried on the next step.
                Err(e) => warn!("Failed to write countdown: {}", e),
            }
        }
    });
}

/// Host: run the simulation at the tick rate, writing state on the push
/// cadence and the final state when every racer is done.
fn run_engine(shared: Arc<Shared>, mut engine: RaceEngine, room: &Room, mut stop: StopSignal) {
    let start = room
        .race_start_time
        .unwrap_or_else(|| shared.clock.now_ms());
    let tick = Duration::from_secs_f64(shared.config.tuning.tick_ms() / 1000.0);

    spawn(async move {
        let mut ticker = interval(tick);
        loop {
            tokio::select! {
                _ = stop.stopped() => return,
                _ = ticker.tick() => {}
            }
            if stop.is_stopped() || !shared.active.is_active() {
                return;
            }

            let now = shared.clock.now_ms();
            let elapsed_ms = now.saturating_sub(start);
            let report = engine.tick(elapsed_ms);
            shared.emit_frame(elapsed_ms, engine.views());
            if report.finished {
                break;
            }
            if report.push {
                if let Err(e) = shared
                    .service
                    .update_game_state(&shared.code, &engine.patch(now))
                    .await
                {
                    if write_refused(&shared, &e).await {
                        return;
                    }
                    warn!("Failed to push race state: {}", e);
                }
            }
        }

        let patch = engine.patch(shared.clock.now_ms());
        let mut attempt = 1;
        let finished = loop {
            if stop.is_stopped() || !shared.active.is_active() {
                return;
            }
            let e = match shared.service.update_game_state(&shared.code, &patch).await {
                Ok(updated) => break updated,
                Err(e) => e,
            };
            if write_refused(&shared, &e).await {
                return;
            }
            if e.is_transient() && attempt < FINAL_WRITE_ATTEMPTS {
                warn!(
                    "Failed to write final race state (attempt {}): {}",
                    attempt, e
                );
                attempt += 1;
                sleep(FINAL_WRITE_RETRY).await;
                continue;
            }
            warn!("Giving up on final race state: {}", e);
            let mut room = shared.room.read().await.clone();
            room.apply_patch(&patch);
            room.updated_at = room.updated_at.max(shared.clock.now_ms());
            break room;
        };
        shared.simulating.set(false);
        shared.feed_local(finished);
    });
}

/// A write the service will never accept from this participant. Forced
/// removals end the session; a lost host role stops the simulation and
/// lets the next snapshot hand authority over. Returns true if the engine
/// must stop.
async fn write_refused(shared: &Shared, error: &ArenaError) -> bool {
    if let Some(reason) = RemovalReason::from_error(error) {
        shared.simulating.set(false);
        let _ = shared.feed.send(FeedInput::Removed(reason));
        return true;
    }
    if !matches!(error, ArenaError::NotAuthorized(_)) {
        return false;
    }

    warn!("No longer allowed to write room {}: {}", shared.code, error);
    shared.simulating.set(false);
    match shared.service.get_room_state(&shared.code).await {
        Ok(room) => {
            let _ = shared.feed.send(FeedInput::Snapshot {
                room,
                source: FeedSource::Poll,
            });
        }
        Err(e) => debug!("Refresh of room {} failed: {}", shared.code, e),
    }
    true
}

/// Guest: ease displayed positions toward the latest confirmed snapshot.
fn run_frames(shared: Arc<Shared>, room: &Room, mut stop: StopSignal) -> watch::Sender<Room> {
    let (targets_tx, mut targets) = watch::channel(room.clone());
    let mut predictor = GuestPredictor::new(shared.config.smoothing);
    predictor.reset(room);

    spawn(async move {
        let mut ticker = interval(shared.config.frame_interval);
        loop {
            tokio::select! {
                _ = stop.stopped() => break,
                changed = targets.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let room = targets.borrow_and_update().clone();
                    predictor.set_targets(&room);
                    continue;
                }
                _ = ticker.tick() => {}
            }
            let elapsed_ms = predictor
                .elapsed_ms(shared.clock.now_ms())
                .unwrap_or_default();
            let racers = predictor.advance().to_vec();
            shared.emit_frame(elapsed_ms, racers);
        }
    });
    targets_tx
}
