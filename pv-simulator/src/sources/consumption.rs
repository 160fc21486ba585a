use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::config::MeterConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumptionBounds {
    pub min_kw: i64,
    pub max_kw: i64,
}

/// Draw the next value between `last_kw` and `candidate_kw`, after clamping
/// the candidate into `bounds`. The range is inclusive and order-independent.
pub fn draw_towards<R: Rng + ?Sized>(
    rng: &mut R,
    last_kw: i64,
    candidate_kw: i64,
    bounds: ConsumptionBounds,
) -> i64 {
    let limit = candidate_kw.clamp(bounds.min_kw, bounds.max_kw);
    let (lo, hi) = if last_kw <= limit {
        (last_kw, limit)
    } else {
        (limit, last_kw)
    };
    rng.random_range(lo..=hi)
}

/// One step of the bounded random walk: pick `last ± step` with equal odds
/// and draw towards it.
pub fn next_consumption<R: Rng + ?Sized>(
    rng: &mut R,
    last_kw: i64,
    step_kw: i64,
    bounds: ConsumptionBounds,
) -> i64 {
    let last_kw = last_kw.clamp(bounds.min_kw, bounds.max_kw);
    let candidate = if rng.random_bool(0.5) {
        last_kw.saturating_add(step_kw)
    } else {
        last_kw.saturating_sub(step_kw)
    };
    draw_towards(rng, last_kw, candidate, bounds)
}

/// Meter consumption as a bounded random walk. State lives only in memory;
/// a new generator starts from a uniform draw within the bounds.
#[derive(Debug, Clone)]
pub struct ConsumptionGenerator {
    bounds: ConsumptionBounds,
    step_kw: i64,
    last_kw: i64,
    rng: StdRng,
}

impl ConsumptionGenerator {
    pub fn new(bounds: ConsumptionBounds, step_kw: i64, mut rng: StdRng) -> Self {
        let last_kw = rng.random_range(bounds.min_kw..=bounds.max_kw);
        Self {
            bounds,
            step_kw,
            last_kw,
            rng,
        }
    }

    pub fn from_config(cfg: &MeterConfig) -> Self {
        let rng = match cfg.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let bounds = ConsumptionBounds {
            min_kw: cfg.min_consumption_kw,
            max_kw: cfg.max_consumption_kw,
        };
        Self::new(bounds, cfg.step_kw, rng)
    }

    pub fn last_kw(&self) -> i64 {
        self.last_kw
    }

    pub fn next_kw(&mut self) -> i64 {
        self.last_kw = next_consumption(&mut self.rng, self.last_kw, self.step_kw, self.bounds);
        self.last_kw
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOUNDS: ConsumptionBounds = ConsumptionBounds {
        min_kw: 0,
        max_kw: 9_000,
    };

    #[test]
    fn initial_value_is_within_bounds() {
        for seed in 0..50 {
            let g = ConsumptionGenerator::new(BOUNDS, 500, StdRng::seed_from_u64(seed));
            assert!((0..=9_000).contains(&g.last_kw()));
        }
    }

    #[test]
    fn every_step_stays_in_bounds_and_moves_at_most_one_step() {
        let mut rng = StdRng::seed_from_u64(7);
        for last in (0..=9_000).step_by(250) {
            for _ in 0..20 {
                let next = next_consumption(&mut rng, last, 500, BOUNDS);
                assert!((0..=9_000).contains(&next), "{last} -> {next}");
                assert!((next - last).abs() <= 500, "{last} -> {next}");
            }
        }
    }

    #[test]
    fn long_walk_never_escapes_bounds() {
        let mut g = ConsumptionGenerator::new(BOUNDS, 500, StdRng::seed_from_u64(42));
        let mut prev = g.last_kw();
        for _ in 0..10_000 {
            let next = g.next_kw();
            assert!((0..=9_000).contains(&next));
            assert!((next - prev).abs() <= 500);
            prev = next;
        }
    }

    #[test]
    fn downward_step_from_floor_is_clamped_to_min() {
        // last = 0, chosen step -500: candidate clamps to MIN, range is [MIN, 0].
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..100 {
            assert_eq!(draw_towards(&mut rng, 0, -500, BOUNDS), 0);
        }

        let shifted = ConsumptionBounds {
            min_kw: -200,
            max_kw: 9_000,
        };
        for _ in 0..100 {
            let v = draw_towards(&mut rng, 0, -500, shifted);
            assert!((-200..=0).contains(&v), "{v}");
        }
    }

    #[test]
    fn range_is_normalized_regardless_of_direction() {
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..100 {
            let down = draw_towards(&mut rng, 4_000, 3_500, BOUNDS);
            assert!((3_500..=4_000).contains(&down));
            let up = draw_towards(&mut rng, 8_800, 9_300, BOUNDS);
            assert!((8_800..=9_000).contains(&up));
        }
    }

    #[test]
    fn same_seed_same_walk() {
        let mut a = ConsumptionGenerator::new(BOUNDS, 500, StdRng::seed_from_u64(5));
        let mut b = ConsumptionGenerator::new(BOUNDS, 500, StdRng::seed_from_u64(5));
        for _ in 0..100 {
            assert_eq!(a.next_kw(), b.next_kw());
        }
    }
}
