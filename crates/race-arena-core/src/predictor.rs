//! Guest Predictor
//!
//! Guests never simulate. They render displayed positions that ease toward
//! the latest host-confirmed targets by a fixed fraction every frame.
//! Finished racers snap to their confirmed final state and stay there.

use crate::types::{Racer, RacerView, Room};

#[derive(Debug, Clone)]
pub struct GuestPredictor {
    smoothing: f64,
    displayed: Vec<RacerView>,
    targets: Vec<RacerView>,
    race_start_time: Option<u64>,
}

impl GuestPredictor {
    /// `smoothing` is the fraction of the remaining gap closed per frame.
    pub fn new(smoothing: f64) -> Self {
        Self {
            smoothing: smoothing.clamp(0.0, 1.0),
            displayed: Vec::new(),
            targets: Vec::new(),
            race_start_time: None,
        }
    }

    /// Snap the display to the room's racers; used at race start and after a
    /// rematch.
    pub fn reset(&mut self, room: &Room) {
        self.targets = room.racers.iter().map(Racer::view).collect();
        self.displayed = self.targets.clone();
        self.race_start_time = room.race_start_time;
    }

    /// Take the racers of a confirmed snapshot as new targets.
    pub fn set_targets(&mut self, room: &Room) {
        self.targets = room.racers.iter().map(Racer::view).collect();
        if room.race_start_time.is_some() {
            self.race_start_time = room.race_start_time;
        }
        for target in &self.targets {
            if !self.displayed.iter().any(|d| d.id == target.id) {
                self.displayed.push(target.clone());
            }
        }
        self.displayed
            .retain(|d| self.targets.iter().any(|t| t.id == d.id));
    }

    /// Advance one frame and return the positions to render.
    pub fn advance(&mut self) -> &[RacerView] {
        for shown in &mut self.displayed {
            let Some(target) = self.targets.iter().find(|t| t.id == shown.id) else {
                continue;
            };
            if shown.finish_time.is_some() {
                continue;
            }
            if target.finish_time.is_some() {
                *shown = target.clone();
                continue;
            }
            shown.position += (target.position - shown.position) * self.smoothing;
            shown.status = target.status;
            shown.direction = target.direction;
            shown.rank = target.rank;
            shown.team = target.team;
        }
        &self.displayed
    }

    pub fn displayed(&self) -> &[RacerView] {
        &self.displayed
    }

    /// Race clock for display, from the persisted start time.
    pub fn elapsed_ms(&self, now_ms: u64) -> Option<u64> {
        self.race_start_time
            .map(|start| now_ms.saturating_sub(start))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ffa_room;
    use crate::types::Racer;

    fn set_position(room: &mut Room, id: u32, position: f64, finish_time: Option<u64>) {
        for racer in &mut room.racers {
            if let Racer::FreeForAll(state) = racer {
                if state.id == id {
                    state.position = position;
                    state.finish_time = finish_time;
                }
            }
        }
    }

    #[test]
    fn eases_toward_target() {
        let mut room = ffa_room(2);
        let mut predictor = GuestPredictor::new(0.12);
        predictor.reset(&room);

        set_position(&mut room, 0, 50.0, None);
        predictor.set_targets(&room);
        let first = predictor.advance()[0].position;
        assert!((first - 6.0).abs() < 1e-9);

        let mut last = first;
        for _ in 0..200 {
            let now = predictor.advance()[0].position;
            assert!(now >= last && now <= 50.0);
            last = now;
        }
        assert!((50.0 - last).abs() < 1e-6);
    }

    #[test]
    fn finished_racers_snap_and_hold() {
        let mut room = ffa_room(2);
        let mut predictor = GuestPredictor::new(0.12);
        predictor.reset(&room);

        set_position(&mut room, 1, 100.0, Some(20_000));
        predictor.set_targets(&room);
        let shown = predictor.advance()[1].clone();
        assert_eq!(shown.position, 100.0);
        assert_eq!(shown.finish_time, Some(20_000));

        set_position(&mut room, 1, 10.0, None);
        predictor.set_targets(&room);
        assert_eq!(predictor.advance()[1].position, 100.0);
    }

    #[test]
    fn elapsed_uses_persisted_start() {
        let room = ffa_room(2);
        let mut predictor = GuestPredictor::new(0.12);
        assert_eq!(predictor.elapsed_ms(5_000), None);
        predictor.reset(&room);
        assert_eq!(predictor.elapsed_ms(5_000), Some(4_000));
    }
}
