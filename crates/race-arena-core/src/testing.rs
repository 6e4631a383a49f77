//! Room fixtures for unit tests

use crate::lifecycle::initial_racers;
use crate::types::*;

/// Empty lobby hosted by `host`.
pub fn lobby_room(mode: GameMode) -> Room {
    Room {
        code: "TEST42".into(),
        host_id: "host".into(),
        mode,
        status: RoomStatus::Waiting,
        max_participants: 8,
        countdown: 0,
        race_start_time: None,
        race_end_time: None,
        participants: vec![Participant::new("host", "Host", 0)],
        racers: Vec::new(),
        relay: None,
        created_at: 0,
        updated_at: 0,
    }
}

/// Add ready participants as `(id, racer choice, team)`.
pub fn with_members(room: &mut Room, members: &[(&str, Option<u32>, Option<Team>)]) {
    for (id, racer, team) in members {
        let joined_at = room.participants.len() as u64;
        let mut participant = Participant::new(*id, id.to_uppercase(), joined_at);
        participant.chosen_racer_id = *racer;
        participant.team = *team;
        participant.is_ready = true;
        room.participants.push(participant);
    }
}

fn racing(mut room: Room) -> Room {
    let (racers, relay) = initial_racers(&room);
    room.racers = racers;
    room.relay = relay;
    room.status = RoomStatus::Racing;
    room.race_start_time = Some(1_000);
    room
}

/// Free-for-all race in progress with `n` racers, ids `0..n`.
pub fn ffa_room(n: u32) -> Room {
    let mut room = lobby_room(GameMode::FreeForAll);
    room.participants.clear();
    for i in 0..n {
        let mut participant = Participant::new(format!("p{i}"), format!("P{i}"), i as u64);
        participant.chosen_racer_id = Some(i);
        participant.is_ready = true;
        room.participants.push(participant);
    }
    room.host_id = "p0".into();
    racing(room)
}

/// Relay race in progress with `a` runners on team A and `b` on team B.
pub fn relay_room(a: u32, b: u32) -> Room {
    let mut room = lobby_room(GameMode::Relay);
    room.participants.clear();
    for (team, count, prefix, offset) in [(Team::A, a, "a", 0), (Team::B, b, "b", 100)] {
        for i in 0..count {
            let mut participant =
                Participant::new(format!("{prefix}{i}"), format!("{prefix}{i}"), i as u64);
            participant.chosen_racer_id = Some(offset + i);
            participant.team = Some(team);
            participant.runner_order = Some(i + 1);
            participant.is_ready = true;
            room.participants.push(participant);
        }
    }
    room.host_id = "a0".into();
    racing(room)
}
