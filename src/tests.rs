//! Session scenarios against the in-process room service

use crate::local::{LocalBackend, LocalRoomService};
use crate::service::{PushEvent, RoomService, Subscription};
use crate::session::{RaceSession, SessionEvent};
use crate::spawn::{TaskGuard, spawn};
use crate::types::SessionConfig;
use async_trait::async_trait;
use race_arena_core::{
    ArenaError, GameMode, RematchKind, Result, Room, RoomPatch, RoomStatus, RunnerAssignment,
    SimTuning, Team,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

const WAIT: Duration = Duration::from_secs(120);

pub(crate) fn config() -> SessionConfig {
    SessionConfig::new()
        .seed(7)
        .tuning(SimTuning::default().ffa_course_ms(3_000))
}

/// Let pending pushes and driver work run.
pub(crate) async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

pub(crate) async fn join(backend: &LocalBackend, code: &str, id: &str) -> RaceSession {
    RaceSession::join(Arc::new(backend.service(id)), config(), code, id)
        .await
        .unwrap()
}

/// Free-for-all lobby: host on racer 0, ready guest on racer 1.
pub(crate) async fn ready_ffa_lobby() -> (LocalBackend, RaceSession, RaceSession) {
    let backend = LocalBackend::new();
    let host = RaceSession::create(
        Arc::new(backend.service("host")),
        config(),
        "Host",
        4,
        GameMode::FreeForAll,
    )
    .await
    .unwrap();
    let guest = join(&backend, host.code(), "guest").await;
    settle().await;

    host.select_racer(0).await.unwrap();
    settle().await;
    guest.select_racer(1).await.unwrap();
    guest.toggle_ready().await.unwrap();
    settle().await;
    (backend, host, guest)
}

async fn wait_status(session: &RaceSession, status: RoomStatus) {
    tokio::time::timeout(WAIT, async {
        while session.room().await.status != status {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("timed out waiting for status");
}

async fn wait_for<F>(session: &RaceSession, mut matches: F) -> SessionEvent
where
    F: FnMut(&SessionEvent) -> bool,
{
    tokio::time::timeout(WAIT, async {
        loop {
            match session.recv().await {
                Some(event) if matches(&event) => return event,
                Some(_) => {}
                None => panic!("event stream closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

async fn drain(session: &RaceSession) {
    while session.try_recv().await.is_some() {}
}

/// Local service that counts the calls made through it, can refuse or drop
/// state writes, and remembers the push streams it handed out.
struct CountingService {
    inner: LocalRoomService,
    calls: AtomicUsize,
    writes: AtomicUsize,
    refuse_writes: AtomicBool,
    drop_writes: AtomicBool,
    pushes: Mutex<Vec<mpsc::Sender<PushEvent>>>,
}

impl CountingService {
    fn new(inner: LocalRoomService) -> Self {
        Self {
            inner,
            calls: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
            refuse_writes: AtomicBool::new(false),
            drop_writes: AtomicBool::new(false),
            pushes: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn refuse_writes(&self) {
        self.refuse_writes.store(true, Ordering::SeqCst);
    }

    fn drop_writes(&self) {
        self.drop_writes.store(true, Ordering::SeqCst);
    }

    /// Every push stream handed out has been dropped or closed by its reader.
    fn pushes_closed(&self) -> bool {
        let pushes = self.pushes.lock().unwrap();
        !pushes.is_empty() && pushes.iter().all(|tx| tx.is_closed())
    }

    fn count(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl RoomService for CountingService {
    fn participant_id(&self) -> &str {
        self.inner.participant_id()
    }

    async fn create_room(&self, name: &str, max: usize, mode: GameMode) -> Result<Room> {
        self.count();
        self.inner.create_room(name, max, mode).await
    }

    async fn join_room(&self, code: &str, name: &str) -> Result<Room> {
        self.count();
        self.inner.join_room(code, name).await
    }

    async fn leave_room(&self, code: &str) -> Result<()> {
        self.count();
        self.inner.leave_room(code).await
    }

    async fn kick_player(&self, code: &str, participant_id: &str) -> Result<Room> {
        self.count();
        self.inner.kick_player(code, participant_id).await
    }

    async fn select_racer(&self, code: &str, racer_id: u32) -> Result<Room> {
        self.count();
        self.inner.select_racer(code, racer_id).await
    }

    async fn select_team(&self, code: &str, team: Team) -> Result<Room> {
        self.count();
        self.inner.select_team(code, team).await
    }

    async fn toggle_ready(&self, code: &str) -> Result<Room> {
        self.count();
        self.inner.toggle_ready(code).await
    }

    async fn assign_runner_orders(
        &self,
        code: &str,
        assignments: &[RunnerAssignment],
    ) -> Result<Room> {
        self.count();
        self.inner.assign_runner_orders(code, assignments).await
    }

    async fn start_game(&self, code: &str) -> Result<Room> {
        self.count();
        self.inner.start_game(code).await
    }

    async fn update_game_state(&self, code: &str, patch: &RoomPatch) -> Result<Room> {
        self.count();
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.refuse_writes.load(Ordering::SeqCst) {
            return Err(ArenaError::NotAuthorized("not the host".into()));
        }
        if self.drop_writes.load(Ordering::SeqCst) {
            return Err(ArenaError::Transport("connection reset".into()));
        }
        self.inner.update_game_state(code, patch).await
    }

    async fn get_room_state(&self, code: &str) -> Result<Room> {
        self.count();
        self.inner.get_room_state(code).await
    }

    async fn subscribe(&self, code: &str) -> Result<Subscription> {
        self.count();
        let mut upstream = self.inner.subscribe(code).await?;
        let (tx, rx) = mpsc::channel(64);
        self.pushes.lock().unwrap().push(tx.clone());

        let (guard, mut stop) = TaskGuard::new();
        spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = stop.stopped() => break,
                    event = upstream.recv() => event,
                };
                let Some(event) = event else {
                    break;
                };
                if tx.send(event).await.is_err() {
                    break;
                }
            }
        });
        Ok(Subscription::new(rx, Some(guard)))
    }

    async fn send_heartbeat(&self, code: &str) -> Result<()> {
        self.count();
        self.inner.send_heartbeat(code).await
    }
}

#[tokio::test(start_paused = true)]
async fn test_lobby_state_reaches_everyone() {
    let (_backend, host, guest) = ready_ffa_lobby().await;
    let seen_by_host = host.room().await;
    let seen_by_guest = guest.room().await;

    assert!(host.is_host().await);
    assert!(!guest.is_host().await);
    assert_eq!(seen_by_host.participants.len(), 2);
    assert_eq!(
        seen_by_host.participant("guest").unwrap().chosen_racer_id,
        Some(1)
    );
    assert!(seen_by_host.participant("guest").unwrap().is_ready);
    assert_eq!(
        seen_by_guest.participant("host").unwrap().chosen_racer_id,
        Some(0)
    );
}

#[tokio::test(start_paused = true)]
async fn test_ffa_race_runs_to_completion() {
    let (_backend, host, guest) = ready_ffa_lobby().await;
    host.start_game().await.unwrap();

    let mut countdown = Vec::new();
    let mut started = false;
    let mut frames = 0;
    let results = loop {
        match wait_for(&host, |_| true).await {
            SessionEvent::CountdownTick(n) => countdown.push(n),
            SessionEvent::RaceStarted { .. } => started = true,
            SessionEvent::Frame { .. } => frames += 1,
            SessionEvent::RaceFinished(results) => break results,
            _ => {}
        }
    };

    assert_eq!(countdown, vec![3, 2, 1]);
    assert!(started);
    assert!(frames > 0);
    let ranks: Vec<Option<u32>> = results.standings.iter().map(|v| v.rank).collect();
    assert_eq!(ranks, vec![Some(1), Some(2)]);
    assert!(results.race_end_time.is_some());

    wait_status(&guest, RoomStatus::Finished).await;
    assert_eq!(guest.room().await.standings(), results.standings);
}

#[tokio::test(start_paused = true)]
async fn test_guest_renders_interpolated_frames() {
    let (_backend, host, guest) = ready_ffa_lobby().await;
    host.start_game().await.unwrap();
    wait_status(&guest, RoomStatus::Racing).await;
    drain(&guest).await;

    let mut last = 0.0;
    let mut advanced = 0;
    while advanced < 5 {
        if let SessionEvent::Frame { racers, .. } =
            wait_for(&guest, |e| matches!(e, SessionEvent::Frame { .. })).await
        {
            let position = racers.iter().find(|r| r.id == 1).unwrap().position;
            assert!(position >= last);
            if position > last {
                advanced += 1;
            }
            last = position;
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_lost_pushes_are_covered_by_polling() {
    let (backend, host, guest) = ready_ffa_lobby().await;
    backend.set_push_loss(1.0).await;
    host.start_game().await.unwrap();

    wait_status(&host, RoomStatus::Finished).await;
    wait_status(&guest, RoomStatus::Finished).await;
    assert_eq!(
        guest.room().await.standings(),
        host.room().await.standings()
    );
}

#[tokio::test(start_paused = true)]
async fn test_transient_poll_failures_are_skipped() {
    let (backend, host, guest) = ready_ffa_lobby().await;
    backend.set_push_loss(1.0).await;
    backend.fail_polls(3).await;
    host.start_game().await.unwrap();

    wait_status(&guest, RoomStatus::Racing).await;
    assert!(guest.is_active());
}

#[tokio::test(start_paused = true)]
async fn test_kicked_guest_is_removed() {
    let (_backend, host, guest) = ready_ffa_lobby().await;
    drain(&guest).await;
    host.kick("guest").await.unwrap();

    let event = wait_for(&guest, |e| matches!(e, SessionEvent::Removed(_))).await;
    assert_eq!(
        event,
        SessionEvent::Removed("You were removed from the room by the host".into())
    );
    assert!(!guest.is_active());
    assert!(guest.toggle_ready().await.is_err());
    settle().await;
    assert!(!host.room().await.is_member("guest"));
}

#[tokio::test(start_paused = true)]
async fn test_kicked_guest_goes_quiet() {
    let backend = LocalBackend::new();
    let host = RaceSession::create(
        Arc::new(backend.service("host")),
        config(),
        "Host",
        4,
        GameMode::FreeForAll,
    )
    .await
    .unwrap();
    let service = Arc::new(CountingService::new(backend.service("guest")));
    let guest = RaceSession::join(service.clone(), config(), host.code(), "guest")
        .await
        .unwrap();
    settle().await;

    host.kick("guest").await.unwrap();
    wait_for(&guest, |e| matches!(e, SessionEvent::Removed(_))).await;
    settle().await;
    assert!(service.pushes_closed());

    let after_kick = service.calls();
    assert!(guest.toggle_ready().await.is_err());
    assert!(guest.refresh().await.is_err());
    // Several heartbeat and poll periods.
    tokio::time::sleep(Duration::from_secs(35)).await;
    assert_eq!(service.calls(), after_kick);
}

#[tokio::test(start_paused = true)]
async fn test_kick_is_detected_without_push() {
    let (backend, host, guest) = ready_ffa_lobby().await;
    drain(&guest).await;
    backend.set_push_loss(1.0).await;
    host.kick("guest").await.unwrap();

    let event = wait_for(&guest, |e| matches!(e, SessionEvent::Removed(_))).await;
    assert_eq!(
        event,
        SessionEvent::Removed("You are no longer a member of this room".into())
    );
    assert!(!guest.is_active());
}

#[tokio::test(start_paused = true)]
async fn test_deleted_room_ends_sessions() {
    let (backend, host, guest) = ready_ffa_lobby().await;
    drain(&host).await;
    drain(&guest).await;
    backend.delete_room(host.code()).await;

    wait_for(&host, |e| matches!(e, SessionEvent::Removed(_))).await;
    wait_for(&guest, |e| matches!(e, SessionEvent::Removed(_))).await;
    assert!(!host.is_active());
    assert!(!guest.is_active());
}

#[tokio::test(start_paused = true)]
async fn test_host_removed_mid_race_finds_out() {
    let (backend, host, _guest) = ready_ffa_lobby().await;
    host.start_game().await.unwrap();
    wait_status(&host, RoomStatus::Racing).await;
    backend.set_push_loss(1.0).await;
    backend.delete_room(host.code()).await;

    let event = wait_for(&host, |e| matches!(e, SessionEvent::Removed(_))).await;
    assert_eq!(
        event,
        SessionEvent::Removed("The room no longer exists".into())
    );
    assert!(!host.is_active());
}

#[tokio::test(start_paused = true)]
async fn test_host_stops_writing_once_refused() {
    let backend = LocalBackend::new();
    let service = Arc::new(CountingService::new(backend.service("host")));
    let host = RaceSession::create(service.clone(), config(), "Host", 4, GameMode::FreeForAll)
        .await
        .unwrap();
    let guest = join(&backend, host.code(), "guest").await;
    settle().await;
    host.select_racer(0).await.unwrap();
    guest.select_racer(1).await.unwrap();
    guest.toggle_ready().await.unwrap();
    settle().await;

    host.start_game().await.unwrap();
    wait_status(&host, RoomStatus::Racing).await;
    service.refuse_writes();
    tokio::time::sleep(Duration::from_secs(2)).await;

    let refused = service.writes();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(service.writes(), refused);
    assert!(host.is_active());
}

#[tokio::test(start_paused = true)]
async fn test_unwritable_finish_is_reported_from_current_room() {
    let backend = LocalBackend::new();
    let service = Arc::new(CountingService::new(backend.service("host")));
    let host = RaceSession::create(service.clone(), config(), "Host", 4, GameMode::FreeForAll)
        .await
        .unwrap();
    let guest = join(&backend, host.code(), "guest").await;
    settle().await;
    host.select_racer(0).await.unwrap();
    guest.select_racer(1).await.unwrap();
    guest.toggle_ready().await.unwrap();
    settle().await;

    host.start_game().await.unwrap();
    wait_status(&host, RoomStatus::Racing).await;
    service.drop_writes();
    guest.leave().await.unwrap();

    let SessionEvent::RaceFinished(results) =
        wait_for(&host, |e| matches!(e, SessionEvent::RaceFinished(_))).await
    else {
        unreachable!()
    };
    assert_eq!(results.standings.len(), 2);

    tokio::time::sleep(Duration::from_secs(3)).await;
    let room = host.room().await;
    assert_eq!(room.status, RoomStatus::Finished);
    assert!(!room.is_member("guest"));
}

#[tokio::test(start_paused = true)]
async fn test_guest_takes_over_when_host_leaves_mid_race() {
    let (backend, host, guest) = ready_ffa_lobby().await;
    let code = host.code().to_string();
    host.start_game().await.unwrap();
    wait_status(&guest, RoomStatus::Racing).await;
    tokio::time::sleep(Duration::from_millis(800)).await;
    drain(&guest).await;

    let before = backend.room(&code).await.unwrap();
    assert_eq!(before.status, RoomStatus::Racing);
    let progress = before.racer(1).unwrap().position();
    host.leave().await.unwrap();

    let event = wait_for(&guest, |e| {
        matches!(e, SessionEvent::TakeoverResumed { .. })
    })
    .await;
    let SessionEvent::TakeoverResumed {
        elapsed_ms,
        preserved,
    } = event
    else {
        unreachable!()
    };
    assert!(preserved);
    assert!(elapsed_ms >= 600);
    assert!(guest.is_host().await);

    wait_status(&guest, RoomStatus::Finished).await;
    let room = guest.room().await;
    assert!(progress > 0.0);
    assert_eq!(room.racer(1).unwrap().view().rank, Some(1));
    assert_eq!(backend.room(&code).await.unwrap().status, RoomStatus::Finished);
}

#[tokio::test(start_paused = true)]
async fn test_quick_rematch_keeps_choices() {
    let (_backend, host, guest) = ready_ffa_lobby().await;
    host.start_game().await.unwrap();
    wait_status(&host, RoomStatus::Finished).await;
    wait_status(&guest, RoomStatus::Finished).await;
    assert!(guest.rematch(RematchKind::Quick).await.is_err());

    let room = host.rematch(RematchKind::Quick).await.unwrap();
    assert_eq!(room.status, RoomStatus::Waiting);
    assert_eq!(room.participant("guest").unwrap().chosen_racer_id, Some(1));
    assert!(room.racers.iter().all(|r| r.position() == 0.0));

    wait_status(&guest, RoomStatus::Waiting).await;
    host.start_game().await.unwrap();
    wait_status(&guest, RoomStatus::Racing).await;
}

#[tokio::test(start_paused = true)]
async fn test_full_rematch_clears_choices() {
    let (_backend, host, guest) = ready_ffa_lobby().await;
    host.start_game().await.unwrap();
    wait_status(&host, RoomStatus::Finished).await;

    let room = host.rematch(RematchKind::Full).await.unwrap();
    assert!(room.racers.is_empty());
    assert!(
        room.participants
            .iter()
            .all(|p| p.chosen_racer_id.is_none() && !p.is_ready)
    );
    wait_status(&guest, RoomStatus::Waiting).await;
    assert!(host.start_game().await.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_silent_guest_is_pruned() {
    let (_backend, host, guest) = ready_ffa_lobby().await;
    drop(guest);

    tokio::time::timeout(WAIT, async {
        while host.room().await.is_member("guest") {
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    })
    .await
    .expect("guest was never pruned");
    assert!(host.is_active());
}

#[tokio::test(start_paused = true)]
async fn test_relay_race_produces_results() {
    let backend = LocalBackend::new();
    let host = RaceSession::create(
        Arc::new(backend.service("a1")),
        config(),
        "a1",
        4,
        GameMode::Relay,
    )
    .await
    .unwrap();
    let code = host.code().to_string();
    let mut guests = Vec::new();
    for id in ["a2", "b1", "b2"] {
        guests.push(join(&backend, &code, id).await);
    }
    settle().await;

    host.select_racer(0).await.unwrap();
    host.select_team(Team::A).await.unwrap();
    for (i, (guest, team)) in guests
        .iter()
        .zip([Team::A, Team::B, Team::B])
        .enumerate()
    {
        settle().await;
        guest.select_racer(i as u32 + 1).await.unwrap();
        guest.select_team(team).await.unwrap();
        guest.toggle_ready().await.unwrap();
    }
    settle().await;

    let started = host.start_game().await.unwrap();
    assert!(started.participants.iter().all(|p| p.runner_order.is_some()));
    assert_eq!(started.racers.len(), 4);

    let SessionEvent::RaceFinished(results) =
        wait_for(&host, |e| matches!(e, SessionEvent::RaceFinished(_))).await
    else {
        unreachable!()
    };
    let relay = results.relay.unwrap();
    assert_eq!(relay.team_a.completed_runners, 2);
    assert_eq!(relay.team_b.completed_runners, 2);
    assert!(relay.team_a.finish_time.is_some() && relay.team_b.finish_time.is_some());
    assert_eq!(results.winner, relay.winner());

    for guest in &guests {
        wait_status(guest, RoomStatus::Finished).await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_unbalanced_relay_cannot_start() {
    let backend = LocalBackend::new();
    let host = RaceSession::create(
        Arc::new(backend.service("a1")),
        config(),
        "a1",
        4,
        GameMode::Relay,
    )
    .await
    .unwrap();
    let guest = join(&backend, host.code(), "b1").await;
    let extra = join(&backend, host.code(), "b2").await;
    settle().await;

    host.select_racer(0).await.unwrap();
    host.select_team(Team::A).await.unwrap();
    settle().await;
    for (session, racer) in [(&guest, 1), (&extra, 2)] {
        session.select_racer(racer).await.unwrap();
        session.select_team(Team::B).await.unwrap();
        session.toggle_ready().await.unwrap();
        settle().await;
    }

    assert!(matches!(
        host.start_game().await,
        Err(race_arena_core::ArenaError::UnbalancedTeams { a: 1, b: 2 })
    ));
}

#[test]
fn test_session_config_builder() {
    let config = SessionConfig::new()
        .heartbeat_interval(Duration::from_secs(5))
        .takeover_grace_ms(750)
        .countdown_seconds(5)
        .event_capacity(0)
        .seed(42);

    assert_eq!(config.heartbeat_interval, Duration::from_secs(5));
    assert_eq!(config.takeover_grace_ms, 750);
    assert_eq!(config.countdown_seconds, 5);
    assert_eq!(config.event_capacity, 1);
    assert_eq!(config.seed, Some(42));
    assert_eq!(config.poll.lobby, Duration::from_secs(3));
}

#[test]
fn test_http_config_urls() {
    let config = crate::types::HttpConfig::new("https://example.com/");
    assert_eq!(
        config.url("/ABC123/join"),
        "https://example.com/api/game/rooms/ABC123/join"
    );
}
