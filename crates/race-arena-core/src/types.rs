//! Type definitions for race-arena

use serde::{Deserialize, Serialize};

/// Course length in position units.
pub const COURSE_END: f64 = 100.0;

/// Room lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomStatus {
    #[default]
    Waiting,
    Selecting,
    Countdown,
    Racing,
    Finished,
}

impl RoomStatus {
    /// Pre-game statuses in which choices and readiness can change.
    pub fn is_lobby(self) -> bool {
        matches!(self, RoomStatus::Waiting | RoomStatus::Selecting)
    }

    /// Statuses during which exactly one participant drives the room.
    pub fn is_live(self) -> bool {
        matches!(self, RoomStatus::Countdown | RoomStatus::Racing)
    }
}

/// Race variant played in a room
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GameMode {
    #[default]
    FreeForAll,
    Relay,
}

/// Relay team
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Team {
    A,
    B,
}

impl Team {
    pub const ALL: [Team; 2] = [Team::A, Team::B];
}

/// Temporary per-racer speed modifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StatusEffect {
    #[default]
    Normal,
    Boost,
    SuperBoost,
    Turbo,
    Slip,
    Tired,
}

impl StatusEffect {
    /// Effects that speed a racer up.
    pub fn is_positive(self) -> bool {
        matches!(
            self,
            StatusEffect::Boost | StatusEffect::SuperBoost | StatusEffect::Turbo
        )
    }
}

/// Travel direction of a racer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Forward,
    Backward,
    Waiting,
    Finished,
}

impl Direction {
    pub fn is_moving(self) -> bool {
        matches!(self, Direction::Forward | Direction::Backward)
    }
}

/// A member of a room. No chosen racer means spectator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub chosen_racer_id: Option<u32>,
    #[serde(default)]
    pub is_ready: bool,
    #[serde(default)]
    pub team: Option<Team>,
    #[serde(default)]
    pub runner_order: Option<u32>,
    #[serde(default)]
    pub joined_at: u64,
}

impl Participant {
    pub fn new(id: impl Into<String>, name: impl Into<String>, joined_at: u64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            chosen_racer_id: None,
            is_ready: false,
            team: None,
            runner_order: None,
            joined_at,
        }
    }

    pub fn is_spectator(&self) -> bool {
        self.chosen_racer_id.is_none()
    }
}

/// Free-for-all racer state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RacerState {
    pub id: u32,
    pub position: f64,
    #[serde(default)]
    pub speed: f64,
    #[serde(default)]
    pub status: StatusEffect,
    #[serde(default)]
    pub finish_time: Option<u64>,
    #[serde(default)]
    pub rank: Option<u32>,
}

impl RacerState {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            position: 0.0,
            speed: 0.0,
            status: StatusEffect::Normal,
            finish_time: None,
            rank: None,
        }
    }
}

/// One runner slot of a relay team
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayLegState {
    pub id: u32,
    pub participant_id: String,
    pub team: Team,
    pub runner_order: u32,
    pub position: f64,
    #[serde(default)]
    pub speed: f64,
    #[serde(default)]
    pub status: StatusEffect,
    pub direction: Direction,
    #[serde(default)]
    pub finish_time: Option<u64>,
}

/// Racer payload, tagged by variant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Racer {
    FreeForAll(RacerState),
    RelayLeg(RelayLegState),
}

impl Racer {
    pub fn id(&self) -> u32 {
        match self {
            Racer::FreeForAll(r) => r.id,
            Racer::RelayLeg(r) => r.id,
        }
    }

    pub fn position(&self) -> f64 {
        match self {
            Racer::FreeForAll(r) => r.position,
            Racer::RelayLeg(r) => r.position,
        }
    }

    pub fn status(&self) -> StatusEffect {
        match self {
            Racer::FreeForAll(r) => r.status,
            Racer::RelayLeg(r) => r.status,
        }
    }

    pub fn finish_time(&self) -> Option<u64> {
        match self {
            Racer::FreeForAll(r) => r.finish_time,
            Racer::RelayLeg(r) => r.finish_time,
        }
    }

    pub fn direction(&self) -> Direction {
        match self {
            Racer::FreeForAll(r) if r.finish_time.is_some() => Direction::Finished,
            Racer::FreeForAll(_) => Direction::Forward,
            Racer::RelayLeg(r) => r.direction,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finish_time().is_some()
    }

    /// Back to the starting line with effects and results cleared.
    pub fn reset(&mut self) {
        match self {
            Racer::FreeForAll(r) => *r = RacerState::new(r.id),
            Racer::RelayLeg(r) => {
                r.position = 0.0;
                r.speed = 0.0;
                r.status = StatusEffect::Normal;
                r.finish_time = None;
                r.direction = if r.runner_order == 1 {
                    Direction::Forward
                } else {
                    Direction::Waiting
                };
            }
        }
    }

    pub fn view(&self) -> RacerView {
        let (team, rank) = match self {
            Racer::FreeForAll(r) => (None, r.rank),
            Racer::RelayLeg(r) => (Some(r.team), None),
        };
        RacerView {
            id: self.id(),
            position: self.position(),
            status: self.status(),
            direction: self.direction(),
            finish_time: self.finish_time(),
            rank,
            team,
        }
    }
}

/// Render-ready racer snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RacerView {
    pub id: u32,
    pub position: f64,
    pub status: StatusEffect,
    pub direction: Direction,
    pub finish_time: Option<u64>,
    pub rank: Option<u32>,
    pub team: Option<Team>,
}

/// Per-team relay progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayTeamState {
    pub current_runner_order: u32,
    pub completed_runners: u32,
    pub total_runners: u32,
    #[serde(default)]
    pub finish_time: Option<u64>,
}

impl RelayTeamState {
    pub fn new(total_runners: u32) -> Self {
        Self {
            current_runner_order: 1,
            completed_runners: 0,
            total_runners,
            finish_time: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finish_time.is_some()
    }
}

/// Relay progress for both teams
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayState {
    pub team_a: RelayTeamState,
    pub team_b: RelayTeamState,
}

impl RelayState {
    pub fn team(&self, team: Team) -> &RelayTeamState {
        match team {
            Team::A => &self.team_a,
            Team::B => &self.team_b,
        }
    }

    pub fn team_mut(&mut self, team: Team) -> &mut RelayTeamState {
        match team {
            Team::A => &mut self.team_a,
            Team::B => &mut self.team_b,
        }
    }

    /// Rebuild team progress from the legs alone.
    pub fn from_racers(racers: &[Racer]) -> Self {
        let team_state = |team: Team| {
            let legs: Vec<&RelayLegState> = racers
                .iter()
                .filter_map(|r| match r {
                    Racer::RelayLeg(leg) if leg.team == team => Some(leg),
                    _ => None,
                })
                .collect();
            let completed = legs
                .iter()
                .filter(|l| l.direction == Direction::Finished)
                .count() as u32;
            let total = legs.len() as u32;
            let finish_time = if total > 0 && completed >= total {
                legs.iter().filter_map(|l| l.finish_time).max()
            } else {
                None
            };
            RelayTeamState {
                current_runner_order: (completed + 1).min(total.max(1)),
                completed_runners: completed,
                total_runners: total,
                finish_time,
            }
        };
        Self {
            team_a: team_state(Team::A),
            team_b: team_state(Team::B),
        }
    }

    /// Team with the earlier finish time; `None` while running or on a draw.
    pub fn winner(&self) -> Option<Team> {
        match (self.team_a.finish_time, self.team_b.finish_time) {
            (Some(a), Some(b)) if a < b => Some(Team::A),
            (Some(a), Some(b)) if b < a => Some(Team::B),
            (Some(_), None) => Some(Team::A),
            (None, Some(_)) => Some(Team::B),
            _ => None,
        }
    }
}

/// Runner order assignment for one relay participant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunnerAssignment {
    pub participant_id: String,
    pub order: u32,
}

/// How much state a rematch clears
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RematchKind {
    /// Clears racer choices and ready flags as well.
    Full,
    /// Keeps choices; clears only positions and status.
    Quick,
}

/// Room state as owned by the room service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub code: String,
    pub host_id: String,
    #[serde(default)]
    pub mode: GameMode,
    pub status: RoomStatus,
    pub max_participants: usize,
    #[serde(default)]
    pub countdown: u32,
    #[serde(default)]
    pub race_start_time: Option<u64>,
    #[serde(default)]
    pub race_end_time: Option<u64>,
    #[serde(default)]
    pub participants: Vec<Participant>,
    #[serde(default)]
    pub racers: Vec<Racer>,
    #[serde(default)]
    pub relay: Option<RelayState>,
    #[serde(default)]
    pub created_at: u64,
    #[serde(default)]
    pub updated_at: u64,
}

impl Room {
    pub fn participant(&self, id: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id == id)
    }

    pub fn participant_mut(&mut self, id: &str) -> Option<&mut Participant> {
        self.participants.iter_mut().find(|p| p.id == id)
    }

    pub fn is_member(&self, id: &str) -> bool {
        self.participant(id).is_some()
    }

    pub fn is_host(&self, id: &str) -> bool {
        self.host_id == id
    }

    /// Participants holding a racer choice.
    pub fn contenders(&self) -> impl Iterator<Item = &Participant> {
        self.participants.iter().filter(|p| !p.is_spectator())
    }

    /// Non-spectators signed up for `team`.
    pub fn team_members(&self, team: Team) -> impl Iterator<Item = &Participant> {
        self.contenders().filter(move |p| p.team == Some(team))
    }

    pub fn owner_of(&self, racer_id: u32) -> Option<&Participant> {
        self.participants
            .iter()
            .find(|p| p.chosen_racer_id == Some(racer_id))
    }

    pub fn racer(&self, id: u32) -> Option<&Racer> {
        self.racers.iter().find(|r| r.id() == id)
    }

    /// Free-for-all results ordered by rank.
    pub fn standings(&self) -> Vec<RacerView> {
        let mut ranked: Vec<RacerView> = self
            .racers
            .iter()
            .map(Racer::view)
            .filter(|v| v.rank.is_some())
            .collect();
        ranked.sort_by_key(|v| v.rank);
        ranked
    }

    /// Merge a partial update into this room.
    pub fn apply_patch(&mut self, patch: &RoomPatch) {
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(countdown) = patch.countdown {
            self.countdown = countdown;
        }
        if let Some(start) = patch.race_start_time {
            self.race_start_time = start;
        }
        if let Some(end) = patch.race_end_time {
            self.race_end_time = end;
        }
        if let Some(racers) = &patch.racers {
            self.racers = racers.clone();
        }
        if let Some(relay) = &patch.relay {
            self.relay = relay.clone();
        }
        if patch.reset_participants {
            for p in &mut self.participants {
                p.chosen_racer_id = None;
                p.is_ready = false;
                p.team = None;
                p.runner_order = None;
            }
        }
    }
}

/// Partial room update written by the host.
///
/// Nullable room fields use a nested `Option`: the outer one says whether the
/// field is written at all, the inner one is the written value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<RoomStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub countdown: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub race_start_time: Option<Option<u64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub race_end_time: Option<Option<u64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub racers: Option<Vec<Racer>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relay: Option<Option<RelayState>>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub reset_participants: bool,
}

impl RoomPatch {
    pub fn status(mut self, status: RoomStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn countdown(mut self, countdown: u32) -> Self {
        self.countdown = Some(countdown);
        self
    }

    pub fn race_start_time(mut self, at: Option<u64>) -> Self {
        self.race_start_time = Some(at);
        self
    }

    pub fn race_end_time(mut self, at: Option<u64>) -> Self {
        self.race_end_time = Some(at);
        self
    }

    pub fn racers(mut self, racers: Vec<Racer>) -> Self {
        self.racers = Some(racers);
        self
    }

    pub fn relay(mut self, relay: Option<RelayState>) -> Self {
        self.relay = Some(relay);
        self
    }

    pub fn reset_participants(mut self) -> Self {
        self.reset_participants = true;
        self
    }
}

/// Generate a random seed
pub fn generate_seed() -> u64 {
    use rand::Rng;
    rand::thread_rng().r#gen()
}

/// Generate a room code (6 chars)
pub fn generate_room_code() -> String {
    use rand::Rng;
    const CHARS: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
    let mut rng = rand::thread_rng();
    (0..6)
        .map(|_| CHARS[rng.gen_range(0..CHARS.len())] as char)
        .collect()
}

/// Generate a participant id
pub fn generate_participant_id() -> String {
    use rand::Rng;
    let suffix: u64 = rand::thread_rng().r#gen();
    format!("player_{}_{suffix:016x}", crate::clock::now_ms())
}
