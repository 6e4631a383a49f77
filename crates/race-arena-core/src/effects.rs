//! Status-effect tables
//!
//! A racer in `normal` status rolls once per tick against an ordered,
//! exclusive cumulative-probability ladder. The numbers are calibration, not
//! contract.

use crate::types::StatusEffect;
use rand::Rng;

/// One rung of the ladder.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectSpec {
    pub effect: StatusEffect,
    pub probability: f64,
    pub min_ticks: u32,
    pub max_ticks: u32,
    pub multiplier: f64,
}

impl EffectSpec {
    const fn new(
        effect: StatusEffect,
        probability: f64,
        min_ticks: u32,
        max_ticks: u32,
        multiplier: f64,
    ) -> Self {
        Self {
            effect,
            probability,
            min_ticks,
            max_ticks,
            multiplier,
        }
    }
}

/// An effect picked by a roll, with its duration in ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Roll {
    pub effect: StatusEffect,
    pub ticks: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EffectTable {
    ladder: Vec<EffectSpec>,
}

impl EffectTable {
    pub fn new(ladder: Vec<EffectSpec>) -> Self {
        Self { ladder }
    }

    /// Free-for-all: long effects with big swings.
    pub fn free_for_all() -> Self {
        Self::new(vec![
            EffectSpec::new(StatusEffect::Turbo, 0.03, 15, 60, 4.0),
            EffectSpec::new(StatusEffect::SuperBoost, 0.05, 20, 80, 2.5),
            EffectSpec::new(StatusEffect::Boost, 0.07, 15, 65, 1.8),
            EffectSpec::new(StatusEffect::Tired, 0.05, 20, 90, 0.2),
            EffectSpec::new(StatusEffect::Slip, 0.05, 15, 60, 0.05),
        ])
    }

    /// Relay: shorter, punchier effects so the lead changes more often.
    pub fn relay() -> Self {
        Self::new(vec![
            EffectSpec::new(StatusEffect::Turbo, 0.05, 10, 20, 2.5),
            EffectSpec::new(StatusEffect::SuperBoost, 0.07, 12, 24, 2.0),
            EffectSpec::new(StatusEffect::Boost, 0.07, 10, 20, 1.5),
            EffectSpec::new(StatusEffect::Tired, 0.06, 12, 24, 0.6),
            EffectSpec::new(StatusEffect::Slip, 0.05, 8, 16, 0.4),
        ])
    }

    /// Same multipliers, never triggered.
    pub fn disabled(&self) -> Self {
        Self::new(
            self.ladder
                .iter()
                .cloned()
                .map(|spec| EffectSpec {
                    probability: 0.0,
                    ..spec
                })
                .collect(),
        )
    }

    pub fn specs(&self) -> &[EffectSpec] {
        &self.ladder
    }

    pub fn multiplier(&self, effect: StatusEffect) -> f64 {
        self.ladder
            .iter()
            .find(|spec| spec.effect == effect)
            .map(|spec| spec.multiplier)
            .unwrap_or(1.0)
    }

    /// Draw one uniform value and walk the ladder.
    ///
    /// `bias` in `[-1, 1]` scales positive effects by `1 + bias` and negative
    /// ones by `1 - bias`.
    pub fn roll<R: Rng + ?Sized>(&self, rng: &mut R, bias: f64) -> Option<Roll> {
        let draw: f64 = rng.gen_range(0.0..1.0);
        let bias = bias.clamp(-1.0, 1.0);
        let mut cumulative = 0.0;
        for spec in &self.ladder {
            let weight = if spec.effect.is_positive() {
                1.0 + bias
            } else {
                1.0 - bias
            };
            cumulative += spec.probability * weight;
            if draw < cumulative {
                let ticks = rng.gen_range(spec.min_ticks..=spec.max_ticks.max(spec.min_ticks));
                return Some(Roll {
                    effect: spec.effect,
                    ticks,
                });
            }
        }
        None
    }
}

/// Rank bias for a racer at `standing` (0 = leader) among `field` racers.
///
/// Ranges from `-strength` for the leader to `+strength` for the last racer.
pub fn standing_bias(standing: usize, field: usize, strength: f64) -> f64 {
    if field <= 1 {
        return 0.0;
    }
    let spread = standing as f64 / (field - 1) as f64;
    (spread * 2.0 - 1.0) * strength
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn tally(table: &EffectTable, bias: f64, draws: usize) -> (usize, usize) {
        let mut rng = StdRng::seed_from_u64(7);
        let mut positive = 0;
        let mut negative = 0;
        for _ in 0..draws {
            if let Some(roll) = table.roll(&mut rng, bias) {
                if roll.effect.is_positive() {
                    positive += 1;
                } else {
                    negative += 1;
                }
            }
        }
        (positive, negative)
    }

    #[test]
    fn disabled_table_never_rolls() {
        let table = EffectTable::free_for_all().disabled();
        let mut rng = StdRng::seed_from_u64(1);
        assert!((0..10_000).all(|_| table.roll(&mut rng, 0.5).is_none()));
        assert_eq!(table.multiplier(StatusEffect::Turbo), 4.0);
    }

    #[test]
    fn roll_durations_stay_in_range() {
        let table = EffectTable::relay();
        let mut rng = StdRng::seed_from_u64(99);
        for _ in 0..20_000 {
            if let Some(roll) = table.roll(&mut rng, 0.0) {
                let spec = table
                    .specs()
                    .iter()
                    .find(|s| s.effect == roll.effect)
                    .unwrap();
                assert!(roll.ticks >= spec.min_ticks && roll.ticks <= spec.max_ticks);
            }
        }
    }

    #[test]
    fn overall_trigger_rate_matches_ladder() {
        let table = EffectTable::free_for_all();
        let (pos, neg) = tally(&table, 0.0, 100_000);
        let rate = (pos + neg) as f64 / 100_000.0;
        assert!((rate - 0.25).abs() < 0.01, "rate was {rate}");
    }

    #[test]
    fn trailing_racers_get_better_odds() {
        let table = EffectTable::free_for_all();
        let (lead_pos, lead_neg) = tally(&table, standing_bias(0, 4, 0.5), 50_000);
        let (last_pos, last_neg) = tally(&table, standing_bias(3, 4, 0.5), 50_000);
        assert!(last_pos > lead_pos);
        assert!(last_neg < lead_neg);
    }

    #[test]
    fn standing_bias_bounds() {
        assert_eq!(standing_bias(0, 1, 0.5), 0.0);
        assert_eq!(standing_bias(0, 3, 0.5), -0.5);
        assert_eq!(standing_bias(1, 3, 0.5), 0.0);
        assert_eq!(standing_bias(2, 3, 0.5), 0.5);
    }
}
