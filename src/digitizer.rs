//! Hit to digi conversion with a detection-time jitter model.
//!
//! Each hit becomes one digi. Pads are the truncated midpoint of the entry and exit
//! positions on each axis. The timestamp is event time plus time of flight plus a
//! gaussian detection jitter with sigma equal to the configured time resolution.
//! The digi is final `writeout_window` ns after its timestamp, which is the validity
//! time handed to the writeout buffer.

use crate::config::DigitizerConfig;
use crate::core::Hit;
use crate::digi::{Digi, ValidityInterval};
use crate::error::{AppResult, DigiError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use tracing::warn;

/// A digi ready for the writeout buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct DigiCandidate {
    /// The digitized hit
    pub digi: Digi,
    /// Arrival and validity times for the writeout buffer
    pub interval: ValidityInterval,
}

/// Result of digitizing one unit's hits.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DigitizedHits {
    /// Candidates in hit order
    pub candidates: Vec<DigiCandidate>,
    /// Hits skipped because no valid interval could be built for them
    pub rejected: usize,
}

/// Pad index on one axis.
pub fn calc_pad(pos_in: f64, pos_out: f64) -> i32 {
    ((pos_in + pos_out) as i32) / 2
}

/// Converts hits into digi candidates.
pub struct TimeDigitizer<R: Rng = StdRng> {
    time_resolution: f64,
    writeout_window: f64,
    jitter: Option<Normal<f64>>,
    rng: R,
}

impl TimeDigitizer<StdRng> {
    /// Builds a digitizer, seeding from `config.seed` or from entropy.
    pub fn from_config(config: &DigitizerConfig) -> AppResult<Self> {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self::new(config, rng)
    }
}

impl<R: Rng> TimeDigitizer<R> {
    /// Builds a digitizer drawing jitter from `rng`.
    pub fn new(config: &DigitizerConfig, rng: R) -> AppResult<Self> {
        let jitter = if config.time_resolution > 0.0 {
            Some(Normal::new(0.0, config.time_resolution).map_err(|e| {
                DigiError::Configuration(format!(
                    "Invalid time_resolution {}: {}",
                    config.time_resolution, e
                ))
            })?)
        } else {
            None
        };
        Ok(Self {
            time_resolution: config.time_resolution,
            writeout_window: config.writeout_window,
            jitter,
            rng,
        })
    }

    /// Uncertainty attached to every timestamp.
    pub fn timestamp_error(&self) -> f64 {
        if self.time_resolution > 0.0 {
            self.time_resolution / self.time_resolution.sqrt()
        } else {
            0.0
        }
    }

    /// Event time + time of flight + jitter, clamped at zero.
    pub fn calc_timestamp(&mut self, time_of_flight: f64, event_time: f64) -> f64 {
        let detection_time = match &self.jitter {
            Some(normal) => normal.sample(&mut self.rng),
            None => 0.0,
        };
        (event_time + time_of_flight + detection_time).max(0.0)
    }

    /// Digitizes one hit.
    pub fn digitize(&mut self, hit: &Hit, event_time: f64) -> AppResult<DigiCandidate> {
        let timestamp = self.calc_timestamp(hit.time, event_time);
        let digi = Digi::new(
            hit.detector_id,
            calc_pad(hit.pos_in.z, hit.pos_out.z),
            calc_pad(hit.pos_in.x, hit.pos_out.x),
            calc_pad(hit.pos_in.y, hit.pos_out.y),
        )
        .with_timestamp(timestamp, self.timestamp_error())
        .with_charge(hit.energy_loss)
        .with_link(hit.link.clone());

        let arrival = hit.time + event_time;
        // negative jitter can put the timestamp before the arrival
        let validity = (digi.timestamp + self.writeout_window).max(arrival);
        let interval = ValidityInterval::new(arrival, validity)?;
        Ok(DigiCandidate { digi, interval })
    }

    /// Digitizes a unit's hits in order.
    ///
    /// A hit that cannot be digitized (NaN time) is logged and skipped; the
    /// rest of the unit still goes through.
    pub fn digitize_all(&mut self, hits: &[Hit], event_time: f64) -> DigitizedHits {
        let mut out = DigitizedHits {
            candidates: Vec::with_capacity(hits.len()),
            rejected: 0,
        };
        for hit in hits {
            match self.digitize(hit, event_time) {
                Ok(candidate) => out.candidates.push(candidate),
                Err(e) => {
                    out.rejected += 1;
                    warn!(
                        detector_id = hit.detector_id,
                        link = %hit.link,
                        error = %e,
                        "skipping hit that cannot be digitized"
                    );
                }
            }
        }
        out
    }
}
