//! Hit sources for driving the pipeline without an upstream simulation.
use crate::core::{Hit, HitSource, Link, Point3};
use crate::data::partition::{GROUP_SIZE, SENSORS_PER_STATION, STATIONS};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;

/// Branch name used in links created by the bundled sources.
pub const POINT_BRANCH: &str = "PixelPoints";

/// Replays prepared batches, one per unit.
///
/// Once all batches are consumed every further unit gets no hits.
#[derive(Debug, Default)]
pub struct VecHitSource {
    batches: VecDeque<Vec<Hit>>,
}

impl VecHitSource {
    /// Source handing out `batches` front to back.
    pub fn new(batches: Vec<Vec<Hit>>) -> Self {
        Self {
            batches: batches.into(),
        }
    }

    /// Units still queued.
    pub fn remaining(&self) -> usize {
        self.batches.len()
    }
}

impl HitSource for VecHitSource {
    fn name(&self) -> &str {
        "replay"
    }

    fn hits_for_unit(&mut self, _unit_sequence_no: u64, _event_time: f64) -> Vec<Hit> {
        self.batches.pop_front().unwrap_or_default()
    }
}

/// Generates random hits spread over every station and sensor.
///
/// Hit positions fall inside a `pad_range` square, times of flight inside
/// `0..max_time_of_flight`. This is a load generator, not a physics model.
pub struct MockHitSource {
    rng: StdRng,
    hits_per_unit: usize,
    pad_range: f64,
    max_time_of_flight: f64,
}

impl MockHitSource {
    /// `hits_per_unit` hits per unit, seeded from `seed` or from entropy.
    pub fn new(hits_per_unit: usize, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            rng,
            hits_per_unit,
            pad_range: 64.0,
            max_time_of_flight: 50.0,
        }
    }

    /// Side of the square hit positions fall in; at least 1.
    pub fn with_pad_range(mut self, pad_range: f64) -> Self {
        self.pad_range = pad_range.max(1.0);
        self
    }

    /// Exclusive upper bound of generated times of flight; 0 gives prompt hits.
    pub fn with_max_time_of_flight(mut self, max_time_of_flight: f64) -> Self {
        self.max_time_of_flight = max_time_of_flight.max(0.0);
        self
    }

    fn random_hit(&mut self, index: usize) -> Hit {
        let station = self.rng.gen_range(1..=STATIONS as i32);
        let sensor = self.rng.gen_range(1..=SENSORS_PER_STATION as i32);
        let x = self.rng.gen_range(0.0..self.pad_range);
        let y = self.rng.gen_range(0.0..self.pad_range);
        let z = f64::from(station);
        let time = if self.max_time_of_flight > 0.0 {
            self.rng.gen_range(0.0..self.max_time_of_flight)
        } else {
            0.0
        };
        Hit {
            detector_id: station * GROUP_SIZE + sensor,
            pos_in: Point3::new(x, y, z),
            pos_out: Point3::new(x + self.rng.gen_range(0.0..1.0), y, z),
            time,
            energy_loss: self.rng.gen_range(0.0..1.0e-4),
            link: Link::new(POINT_BRANCH, index),
        }
    }
}

impl HitSource for MockHitSource {
    fn name(&self) -> &str {
        "mock"
    }

    fn hits_for_unit(&mut self, _unit_sequence_no: u64, _event_time: f64) -> Vec<Hit> {
        (0..self.hits_per_unit).map(|i| self.random_hit(i)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::partition::DivideLevel;

    #[test]
    fn test_replay_source_drains_then_stays_empty() {
        let hit = Hit {
            detector_id: 257,
            pos_in: Point3::default(),
            pos_out: Point3::default(),
            time: 0.0,
            energy_loss: 0.0,
            link: Link::new(POINT_BRANCH, 0),
        };
        let mut source = VecHitSource::new(vec![vec![hit.clone()], vec![]]);
        assert_eq!(source.hits_for_unit(0, 0.0), vec![hit]);
        assert!(source.hits_for_unit(1, 0.0).is_empty());
        assert!(source.hits_for_unit(2, 0.0).is_empty());
        assert_eq!(source.remaining(), 0);
    }

    #[test]
    fn test_mock_hits_are_routable_at_every_level() {
        let mut source = MockHitSource::new(200, Some(7));
        let hits = source.hits_for_unit(0, 0.0);
        assert_eq!(hits.len(), 200);
        for hit in &hits {
            for level in [DivideLevel::Single, DivideLevel::Station, DivideLevel::Sensor] {
                assert!(level.route(hit.detector_id).is_some());
            }
            assert!(hit.time >= 0.0 && hit.time < 50.0);
        }
    }

    #[test]
    fn test_mock_source_is_reproducible_with_seed() {
        let a = MockHitSource::new(5, Some(1)).hits_for_unit(0, 0.0);
        let b = MockHitSource::new(5, Some(1)).hits_for_unit(0, 0.0);
        assert_eq!(a, b);
    }

    #[test]
    fn test_mock_source_honours_pad_range_and_time_of_flight() {
        let mut source = MockHitSource::new(100, Some(3))
            .with_pad_range(4.0)
            .with_max_time_of_flight(0.0);
        for hit in source.hits_for_unit(0, 0.0) {
            assert!(hit.pos_in.x >= 0.0 && hit.pos_in.x < 4.0);
            assert!(hit.pos_in.y >= 0.0 && hit.pos_in.y < 4.0);
            assert_eq!(hit.time, 0.0);
        }
    }
}
