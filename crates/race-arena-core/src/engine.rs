//! Race Simulation Engine
//!
//! Runs only on the host. Each call to [`RaceEngine::tick`] advances every
//! live racer by one fixed tick; the caller supplies the elapsed race time,
//! measured from the room's persisted `raceStartTime`, so an engine started
//! mid-race by a new host continues on the same time origin.

use crate::effects::{EffectTable, standing_bias};
use crate::error::{ArenaError, Result};
use crate::lifecycle::initial_racers;
use crate::types::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Simulation calibration
#[derive(Debug, Clone)]
pub struct SimTuning {
    /// Ticks per second (default: 60)
    pub tick_rate_hz: u32,
    /// Time for an unmodified free-for-all racer to cover the course, in ms (default: 20000)
    pub ffa_course_ms: u64,
    /// Time for an unmodified relay runner to cover one course length, in ms (default: 1400)
    pub relay_course_ms: u64,
    /// Per-tick speed variation band, free-for-all (default: 0.85..=1.15)
    pub ffa_variation: (f64, f64),
    /// Per-tick speed variation band, relay (default: 0.95..=1.05)
    pub relay_variation: (f64, f64),
    /// Host write cadence, free-for-all, in ms of race time (default: 500)
    pub ffa_push_interval_ms: u64,
    /// Host write cadence, relay, in ms of race time (default: 200)
    pub relay_push_interval_ms: u64,
    /// Rank-bias strength for free-for-all effect rolls (default: 0.5)
    pub rank_bias: f64,
    pub ffa_effects: EffectTable,
    pub relay_effects: EffectTable,
}

impl Default for SimTuning {
    fn default() -> Self {
        Self {
            tick_rate_hz: 60,
            ffa_course_ms: 20_000,
            relay_course_ms: 1_400,
            ffa_variation: (0.85, 1.15),
            relay_variation: (0.95, 1.05),
            ffa_push_interval_ms: 500,
            relay_push_interval_ms: 200,
            rank_bias: 0.5,
            ffa_effects: EffectTable::free_for_all(),
            relay_effects: EffectTable::relay(),
        }
    }
}

impl SimTuning {
    pub fn tick_rate_hz(mut self, hz: u32) -> Self {
        self.tick_rate_hz = hz.max(1);
        self
    }

    pub fn ffa_course_ms(mut self, ms: u64) -> Self {
        self.ffa_course_ms = ms;
        self
    }

    pub fn relay_course_ms(mut self, ms: u64) -> Self {
        self.relay_course_ms = ms;
        self
    }

    pub fn rank_bias(mut self, strength: f64) -> Self {
        self.rank_bias = strength;
        self
    }

    /// Keep multipliers, never trigger an effect.
    pub fn without_effects(mut self) -> Self {
        self.ffa_effects = self.ffa_effects.disabled();
        self.relay_effects = self.relay_effects.disabled();
        self
    }

    /// Remove the per-tick speed jitter.
    pub fn without_variation(mut self) -> Self {
        self.ffa_variation = (1.0, 1.0);
        self.relay_variation = (1.0, 1.0);
        self
    }

    pub fn tick_ms(&self) -> f64 {
        1000.0 / self.tick_rate_hz.max(1) as f64
    }

    /// Distance per tick for an unmodified racer.
    pub fn base_speed(&self, mode: GameMode) -> f64 {
        let course_ms = match mode {
            GameMode::FreeForAll => self.ffa_course_ms,
            GameMode::Relay => self.relay_course_ms,
        };
        COURSE_END / (course_ms.max(1) as f64 / self.tick_ms())
    }

    pub fn push_interval_ms(&self, mode: GameMode) -> u64 {
        match mode {
            GameMode::FreeForAll => self.ffa_push_interval_ms,
            GameMode::Relay => self.relay_push_interval_ms,
        }
    }

    pub fn effects(&self, mode: GameMode) -> &EffectTable {
        match mode {
            GameMode::FreeForAll => &self.ffa_effects,
            GameMode::Relay => &self.relay_effects,
        }
    }

    pub fn variation(&self, mode: GameMode) -> (f64, f64) {
        match mode {
            GameMode::FreeForAll => self.ffa_variation,
            GameMode::Relay => self.relay_variation,
        }
    }
}

/// Where a freshly started engine picks up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResumePlan {
    /// Race time already elapsed at engine start.
    pub elapsed_ms: u64,
    /// Keep the snapshot's racer state instead of resetting it.
    pub preserve_positions: bool,
}

impl ResumePlan {
    pub fn fresh() -> Self {
        Self {
            elapsed_ms: 0,
            preserve_positions: false,
        }
    }
}

/// Result of one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickReport {
    /// Time to write accumulated state to the room service.
    pub push: bool,
    /// Every required racer or team has finished; the engine is done.
    pub finished: bool,
}

pub struct RaceEngine {
    mode: GameMode,
    tuning: SimTuning,
    seed: u64,
    rng: StdRng,
    racers: Vec<Racer>,
    relay: Option<RelayState>,
    live: HashSet<u32>,
    remaining: HashMap<u32, u32>,
    last_push_ms: Option<u64>,
    ticks: u64,
    finished: bool,
}

impl RaceEngine {
    /// Build an engine from a room snapshot.
    pub fn new(room: &Room, plan: ResumePlan, tuning: SimTuning, seed: u64) -> Result<Self> {
        let (mut racers, fallback_relay) = if room.racers.is_empty() {
            initial_racers(room)
        } else {
            (room.racers.clone(), None)
        };
        if racers.is_empty() {
            return Err(ArenaError::NoRacers);
        }

        let mut relay = match room.mode {
            GameMode::FreeForAll => None,
            GameMode::Relay => Some(
                room.relay
                    .clone()
                    .or(fallback_relay)
                    .unwrap_or_else(|| RelayState::from_racers(&racers)),
            ),
        };

        if !plan.preserve_positions {
            racers.iter_mut().for_each(Racer::reset);
            if let Some(relay) = relay.as_mut() {
                relay.team_a = RelayTeamState::new(relay.team_a.total_runners);
                relay.team_b = RelayTeamState::new(relay.team_b.total_runners);
            }
        }

        let present: HashSet<u32> = racers.iter().map(Racer::id).collect();
        let mut live: HashSet<u32> = match room.mode {
            GameMode::FreeForAll => room
                .contenders()
                .filter_map(|p| p.chosen_racer_id)
                .filter(|id| present.contains(id))
                .collect(),
            GameMode::Relay => present.clone(),
        };
        if live.is_empty() {
            live = present;
        }

        debug!(
            "Engine ready: {} racers, {} live, elapsed {}ms, preserve {}",
            racers.len(),
            live.len(),
            plan.elapsed_ms,
            plan.preserve_positions
        );

        let mut engine = Self {
            mode: room.mode,
            tuning,
            seed,
            rng: StdRng::seed_from_u64(seed),
            racers,
            relay,
            live,
            remaining: HashMap::new(),
            last_push_ms: None,
            ticks: 0,
            finished: false,
        };
        engine.finished = engine.all_finished();
        Ok(engine)
    }

    pub fn mode(&self) -> GameMode {
        self.mode
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn racers(&self) -> &[Racer] {
        &self.racers
    }

    pub fn relay(&self) -> Option<&RelayState> {
        self.relay.as_ref()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn views(&self) -> Vec<RacerView> {
        self.racers.iter().map(Racer::view).collect()
    }

    /// Advance the race by one tick at `elapsed_ms` of race time.
    pub fn tick(&mut self, elapsed_ms: u64) -> TickReport {
        if self.finished {
            return TickReport {
                push: false,
                finished: true,
            };
        }

        self.ticks += 1;
        match self.mode {
            GameMode::FreeForAll => self.step_free_for_all(elapsed_ms),
            GameMode::Relay => self.step_relay(elapsed_ms),
        }

        let finished = self.all_finished();
        let due = self
            .last_push_ms
            .is_none_or(|last| elapsed_ms >= last + self.tuning.push_interval_ms(self.mode));
        let push = finished || due;
        if push {
            self.last_push_ms = Some(elapsed_ms);
        }
        self.finished = finished;
        TickReport { push, finished }
    }

    /// State to write to the room service.
    pub fn patch(&self, now_ms: u64) -> RoomPatch {
        let status = if self.finished {
            RoomStatus::Finished
        } else {
            RoomStatus::Racing
        };
        let mut patch = RoomPatch::default()
            .status(status)
            .racers(self.racers.clone());
        if self.mode == GameMode::Relay {
            patch = patch.relay(self.relay.clone());
        }
        if self.finished {
            patch = patch.race_end_time(Some(now_ms));
        }
        patch
    }

    fn all_finished(&self) -> bool {
        match self.mode {
            GameMode::FreeForAll => self
                .racers
                .iter()
                .filter(|r| self.live.contains(&r.id()))
                .all(Racer::is_finished),
            GameMode::Relay => self.relay.as_ref().is_some_and(|relay| {
                Team::ALL.iter().all(|&team| {
                    let state = relay.team(team);
                    state.total_runners == 0 || state.is_finished()
                })
            }),
        }
    }

    fn step_free_for_all(&mut self, elapsed_ms: u64) {
        let base = self.tuning.base_speed(GameMode::FreeForAll);
        let (low, high) = self.tuning.ffa_variation;
        let strength = self.tuning.rank_bias;

        // Standings among racers still running, leader first.
        let mut running: Vec<(u32, f64)> = self
            .racers
            .iter()
            .filter(|r| self.live.contains(&r.id()) && !r.is_finished())
            .map(|r| (r.id(), r.position()))
            .collect();
        running.sort_by(|a, b| b.1.total_cmp(&a.1));
        let field = running.len();
        let standing: HashMap<u32, usize> = running
            .iter()
            .enumerate()
            .map(|(i, (id, _))| (*id, i))
            .collect();

        let mut finished_count = self.racers.iter().filter(|r| r.is_finished()).count() as u32;

        for racer in &mut self.racers {
            let Racer::FreeForAll(state) = racer else {
                continue;
            };
            if state.finish_time.is_some() || !self.live.contains(&state.id) {
                continue;
            }

            let bias = standing_bias(
                standing.get(&state.id).copied().unwrap_or(0),
                field,
                strength,
            );
            let status = next_status(
                &mut self.remaining,
                &mut self.rng,
                &self.tuning.ffa_effects,
                state.id,
                state.status,
                bias,
            );
            let speed = base
                * self.tuning.ffa_effects.multiplier(status)
                * self.rng.gen_range(low..=high);
            let position = (state.position + speed).min(COURSE_END);

            if position >= COURSE_END {
                finished_count += 1;
                state.position = COURSE_END;
                state.speed = 0.0;
                state.status = StatusEffect::Normal;
                state.finish_time = Some(elapsed_ms);
                state.rank = Some(finished_count);
                self.remaining.remove(&state.id);
            } else {
                state.position = position;
                state.speed = speed;
                state.status = status;
            }
        }
    }

    fn step_relay(&mut self, elapsed_ms: u64) {
        let base = self.tuning.base_speed(GameMode::Relay);
        let (low, high) = self.tuning.relay_variation;
        let Some(relay) = self.relay.as_mut() else {
            return;
        };

        for team in Team::ALL {
            let team_state = relay.team_mut(team);
            if team_state.is_finished() || team_state.total_runners == 0 {
                continue;
            }
            let Some(idx) = seek_leg(&self.racers, team, team_state, elapsed_ms) else {
                continue;
            };
            let Racer::RelayLeg(leg) = &mut self.racers[idx] else {
                continue;
            };
            let leg_id = leg.id;
            if leg.direction == Direction::Waiting {
                leg.direction = Direction::Forward;
            }
            if !leg.direction.is_moving() {
                continue;
            }

            let status = next_status(
                &mut self.remaining,
                &mut self.rng,
                &self.tuning.relay_effects,
                leg.id,
                leg.status,
                0.0,
            );
            let speed = base
                * self.tuning.relay_effects.multiplier(status)
                * self.rng.gen_range(low..=high);
            leg.speed = speed;
            leg.status = status;

            let mut leg_done = false;
            match leg.direction {
                Direction::Forward => {
                    leg.position = (leg.position + speed).min(COURSE_END);
                    if leg.position >= COURSE_END {
                        leg.position = COURSE_END;
                        leg.direction = Direction::Backward;
                    }
                }
                Direction::Backward => {
                    leg.position = (leg.position - speed).max(0.0);
                    if leg.position <= 0.0 {
                        leg.position = 0.0;
                        leg.speed = 0.0;
                        leg.status = StatusEffect::Normal;
                        leg.direction = Direction::Finished;
                        leg.finish_time = Some(elapsed_ms);
                        leg_done = true;
                    }
                }
                Direction::Waiting | Direction::Finished => {}
            }
            if !leg_done {
                continue;
            }

            self.remaining.remove(&leg_id);
            team_state.completed_runners += 1;
            if team_state.completed_runners < team_state.total_runners {
                team_state.current_runner_order += 1;
            }
            let next = seek_leg(&self.racers, team, team_state, elapsed_ms);
            if let Some(Racer::RelayLeg(next_leg)) = next.map(|i| &mut self.racers[i]) {
                next_leg.direction = Direction::Forward;
            }
        }
    }
}

fn find_leg(racers: &[Racer], team: Team, order: u32) -> Option<usize> {
    racers.iter().position(|r| {
        matches!(r, Racer::RelayLeg(leg) if leg.team == team && leg.runner_order == order)
    })
}

/// The leg running for `state`'s current order. Orders with no leg in the
/// snapshot count as run; the team finishes once none are left.
fn seek_leg(
    racers: &[Racer],
    team: Team,
    state: &mut RelayTeamState,
    elapsed_ms: u64,
) -> Option<usize> {
    while state.completed_runners < state.total_runners {
        if let Some(idx) = find_leg(racers, team, state.current_runner_order) {
            return Some(idx);
        }
        debug!(
            "Team {:?} has no runner {}, passing the baton on",
            team, state.current_runner_order
        );
        state.completed_runners += 1;
        if state.completed_runners < state.total_runners {
            state.current_runner_order += 1;
        }
    }
    if state.finish_time.is_none() {
        state.finish_time = Some(elapsed_ms);
        debug!("Team {:?} finished at {}ms", team, elapsed_ms);
    }
    None
}

/// Count down the active effect, revert at zero, and roll if normal.
fn next_status(
    remaining: &mut HashMap<u32, u32>,
    rng: &mut StdRng,
    table: &EffectTable,
    id: u32,
    current: StatusEffect,
    bias: f64,
) -> StatusEffect {
    let mut left = remaining.get(&id).copied().unwrap_or(0).saturating_sub(1);
    let mut status = current;
    if left == 0 && status != StatusEffect::Normal {
        status = StatusEffect::Normal;
    }
    if status == StatusEffect::Normal {
        if let Some(roll) = table.roll(rng, bias) {
            status = roll.effect;
            left = roll.ticks;
        }
    }
    remaining.insert(id, left);
    status
}
