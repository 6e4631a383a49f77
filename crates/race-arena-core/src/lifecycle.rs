//! Race Session State Machine
//!
//! Status transitions, start preconditions, and the room mutations that the
//! lobby operations perform. The room service applies these rules; the
//! session applies the same ones before sending a request so that a doomed
//! call fails locally.

use crate::error::{ArenaError, Result};
use crate::types::*;
use rand::Rng;
use rand::seq::SliceRandom;
use std::collections::BTreeSet;

/// Whether `from -> to` is a legal status change.
pub fn can_transition(from: RoomStatus, to: RoomStatus) -> bool {
    use RoomStatus::*;
    from == to
        || matches!(
            (from, to),
            (Waiting, Selecting)
                | (Selecting, Waiting)
                | (Waiting, Countdown)
                | (Selecting, Countdown)
                | (Countdown, Racing)
                | (Racing, Finished)
                | (Finished, Waiting)
        )
}

pub fn ensure_transition(from: RoomStatus, to: RoomStatus) -> Result<()> {
    if can_transition(from, to) {
        Ok(())
    } else {
        Err(ArenaError::InvalidTransition { from, to })
    }
}

/// Preconditions for leaving the lobby.
pub fn check_start(room: &Room, requester: &str) -> Result<()> {
    if !room.is_host(requester) {
        return Err(ArenaError::NotAuthorized(
            "only the host can start the race".into(),
        ));
    }
    ensure_transition(room.status, RoomStatus::Countdown)?;
    if room.status == RoomStatus::Countdown {
        return Err(ArenaError::AlreadyStarted);
    }

    match room.mode {
        GameMode::FreeForAll => {
            let distinct: BTreeSet<u32> =
                room.contenders().filter_map(|p| p.chosen_racer_id).collect();
            if distinct.len() < 2 {
                return Err(ArenaError::NotEnoughRacers {
                    required: 2,
                    found: distinct.len(),
                });
            }
        }
        GameMode::Relay => {
            let a = room.team_members(Team::A).count();
            let b = room.team_members(Team::B).count();
            if a == 0 || b == 0 {
                return Err(ArenaError::NotEnoughRacers {
                    required: 2,
                    found: a + b,
                });
            }
            if a != b {
                return Err(ArenaError::UnbalancedTeams { a, b });
            }
        }
    }

    if room
        .participants
        .iter()
        .any(|p| !p.is_ready && !room.is_host(&p.id))
    {
        return Err(ArenaError::NotAllReady);
    }
    Ok(())
}

/// Preconditions for a rematch.
pub fn check_rematch(room: &Room, requester: &str) -> Result<()> {
    if !room.is_host(requester) {
        return Err(ArenaError::NotAuthorized(
            "only the host can start a rematch".into(),
        ));
    }
    if room.status != RoomStatus::Finished {
        return Err(ArenaError::InvalidTransition {
            from: room.status,
            to: RoomStatus::Waiting,
        });
    }
    Ok(())
}

fn lobby_member<'a>(room: &'a mut Room, participant_id: &str) -> Result<&'a mut Participant> {
    if !room.status.is_lobby() {
        return Err(ArenaError::AlreadyStarted);
    }
    room.participant_mut(participant_id)
        .ok_or(ArenaError::NotAMember)
}

/// Toggle a racer choice. Re-selecting one's own racer clears it.
pub fn apply_racer_choice(room: &mut Room, participant_id: &str, racer_id: u32) -> Result<()> {
    if room
        .owner_of(racer_id)
        .is_some_and(|owner| owner.id != participant_id)
    {
        return Err(ArenaError::RacerTaken(racer_id));
    }
    let participant = lobby_member(room, participant_id)?;
    participant.chosen_racer_id = if participant.chosen_racer_id == Some(racer_id) {
        None
    } else {
        Some(racer_id)
    };
    if participant.chosen_racer_id.is_none() {
        participant.is_ready = false;
    }
    Ok(())
}

pub fn apply_team_choice(room: &mut Room, participant_id: &str, team: Team) -> Result<()> {
    if room.mode != GameMode::Relay {
        return Err(ArenaError::WrongMode);
    }
    let participant = lobby_member(room, participant_id)?;
    participant.team = Some(team);
    participant.runner_order = None;
    Ok(())
}

pub fn apply_ready_toggle(room: &mut Room, participant_id: &str) -> Result<()> {
    let participant = lobby_member(room, participant_id)?;
    participant.is_ready = !participant.is_ready;
    Ok(())
}

pub fn apply_runner_orders(
    room: &mut Room,
    requester: &str,
    assignments: &[RunnerAssignment],
) -> Result<()> {
    if room.mode != GameMode::Relay {
        return Err(ArenaError::WrongMode);
    }
    if !room.is_host(requester) {
        return Err(ArenaError::NotAuthorized(
            "only the host can assign runner orders".into(),
        ));
    }
    if !room.status.is_lobby() {
        return Err(ArenaError::AlreadyStarted);
    }
    for assignment in assignments {
        let participant = room
            .participant_mut(&assignment.participant_id)
            .ok_or(ArenaError::NotAMember)?;
        participant.runner_order = Some(assignment.order);
    }
    Ok(())
}

/// Random running order per relay team, numbered from 1.
pub fn shuffle_runner_orders<R: Rng + ?Sized>(room: &Room, rng: &mut R) -> Vec<RunnerAssignment> {
    let mut assignments = Vec::new();
    for team in Team::ALL {
        let mut members: Vec<&str> = room.team_members(team).map(|p| p.id.as_str()).collect();
        members.shuffle(rng);
        assignments.extend(members.into_iter().enumerate().map(|(i, id)| {
            RunnerAssignment {
                participant_id: id.to_string(),
                order: i as u32 + 1,
            }
        }));
    }
    assignments
}

/// Fresh racers for the room's current choices.
///
/// Free-for-all gets one racer per distinct chosen id. Relay gets one leg per
/// team member, ordered by assigned runner order (join order breaks ties and
/// fills gaps), plus fresh team progress.
pub fn initial_racers(room: &Room) -> (Vec<Racer>, Option<RelayState>) {
    match room.mode {
        GameMode::FreeForAll => {
            let ids: BTreeSet<u32> = room.contenders().filter_map(|p| p.chosen_racer_id).collect();
            let racers = ids
                .into_iter()
                .map(|id| Racer::FreeForAll(RacerState::new(id)))
                .collect();
            (racers, None)
        }
        GameMode::Relay => {
            let mut racers = Vec::new();
            let mut totals = [0u32; 2];
            for (slot, team) in Team::ALL.into_iter().enumerate() {
                let mut members: Vec<&Participant> = room.team_members(team).collect();
                members.sort_by_key(|p| (p.runner_order.unwrap_or(u32::MAX), p.joined_at));
                totals[slot] = members.len() as u32;
                for (i, member) in members.into_iter().enumerate() {
                    let mut leg = Racer::RelayLeg(RelayLegState {
                        id: racers.len() as u32,
                        participant_id: member.id.clone(),
                        team,
                        runner_order: i as u32 + 1,
                        position: 0.0,
                        speed: 0.0,
                        status: StatusEffect::Normal,
                        direction: Direction::Waiting,
                        finish_time: None,
                    });
                    leg.reset();
                    racers.push(leg);
                }
            }
            let relay = RelayState {
                team_a: RelayTeamState::new(totals[0]),
                team_b: RelayTeamState::new(totals[1]),
            };
            (racers, Some(relay))
        }
    }
}

/// First write after `startGame`: countdown value plus fresh racers.
pub fn start_patch(room: &Room, countdown_seconds: u32) -> RoomPatch {
    let (racers, relay) = initial_racers(room);
    RoomPatch::default()
        .status(RoomStatus::Countdown)
        .countdown(countdown_seconds)
        .race_start_time(None)
        .race_end_time(None)
        .racers(racers)
        .relay(relay)
}

/// One step of the shared countdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownStep {
    /// Persist this remaining value.
    Tick(u32),
    /// Counter reached zero: stamp `raceStartTime` and go.
    Go,
}

pub fn countdown_step(current: u32) -> CountdownStep {
    match current.saturating_sub(1) {
        0 => CountdownStep::Go,
        n => CountdownStep::Tick(n),
    }
}

pub fn countdown_patch(remaining: u32) -> RoomPatch {
    RoomPatch::default().countdown(remaining)
}

pub fn race_start_patch(now_ms: u64) -> RoomPatch {
    RoomPatch::default()
        .status(RoomStatus::Racing)
        .countdown(0)
        .race_start_time(Some(now_ms))
}

/// Back to the lobby.
///
/// A quick rematch keeps choices and readiness; racers go back to the line.
/// A full reset also clears every participant's choices.
pub fn rematch_patch(room: &Room, kind: RematchKind) -> RoomPatch {
    let patch = RoomPatch::default()
        .status(RoomStatus::Waiting)
        .countdown(0)
        .race_start_time(None)
        .race_end_time(None)
        .relay(None);
    match kind {
        RematchKind::Quick => {
            let mut racers = room.racers.clone();
            racers.iter_mut().for_each(Racer::reset);
            patch.racers(racers)
        }
        RematchKind::Full => patch.racers(Vec::new()).reset_participants(),
    }
}
