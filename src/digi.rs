//! Digi data model.
//!
//! A [`Digi`] is the detector-native signal derived from one or more hits. Its
//! identity inside the writeout buffer is the [`DigiKey`]; two digis with the same
//! key are merged rather than both written. The on-disk form is the fixed-width
//! [`DigiRecord`], see [`crate::data::format`].

use crate::core::Link;
use crate::data::format::DigiRecord;
use crate::error::{AppResult, DigiError};
use serde::{Deserialize, Serialize};

/// Identity of a digi: detector plus channel coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DigiKey {
    /// Detector id
    pub detector_id: i32,
    /// Front-end id
    pub fe_id: i32,
    /// Pad column
    pub col: i32,
    /// Pad row
    pub row: i32,
}

/// Digitized detector signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Digi {
    /// Hierarchical detector id (station / sensor)
    pub detector_id: i32,
    /// Front-end (secondary) identifier
    pub fe_id: i32,
    /// Pad column
    pub col: i32,
    /// Pad row
    pub row: i32,
    /// Detection time in ns, never negative
    pub timestamp: f64,
    /// Uncertainty of `timestamp`
    pub timestamp_error: f64,
    /// Accumulated signal
    pub charge: f64,
    /// Hits this digi was built from
    pub links: Vec<Link>,
}

impl Digi {
    /// Digi with no timing, charge or links yet.
    pub fn new(detector_id: i32, fe_id: i32, col: i32, row: i32) -> Self {
        Self {
            detector_id,
            fe_id,
            col,
            row,
            timestamp: 0.0,
            timestamp_error: 0.0,
            charge: 0.0,
            links: Vec::new(),
        }
    }

    /// Sets the timestamp, clamping negative values to zero.
    pub fn with_timestamp(mut self, timestamp: f64, error: f64) -> Self {
        self.timestamp = timestamp.max(0.0);
        self.timestamp_error = error;
        self
    }

    /// Sets the deposited charge.
    pub fn with_charge(mut self, charge: f64) -> Self {
        self.charge = charge;
        self
    }

    /// Adds a link to the contributing hit.
    pub fn with_link(mut self, link: Link) -> Self {
        self.links.push(link);
        self
    }

    /// Identity used to merge digis in the writeout buffer.
    pub fn key(&self) -> DigiKey {
        DigiKey {
            detector_id: self.detector_id,
            fe_id: self.fe_id,
            col: self.col,
            row: self.row,
        }
    }

    /// Accumulates `other` into `self`.
    ///
    /// Charge is summed and links are appended. The earlier timestamp wins along
    /// with its uncertainty.
    pub fn merge(&mut self, other: Digi) {
        debug_assert_eq!(self.key(), other.key());
        self.charge += other.charge;
        if other.timestamp < self.timestamp {
            self.timestamp = other.timestamp;
            self.timestamp_error = other.timestamp_error;
        }
        self.links.extend(other.links);
    }

    /// Fixed-width output record. Fields wider than 16 bits are truncated.
    pub fn record(&self) -> DigiRecord {
        DigiRecord {
            detector_id: self.detector_id as i16,
            secondary_id: self.fe_id as i16,
            coord_a: self.col as i16,
            coord_b: self.row as i16,
        }
    }
}

/// Arrival and validity time of a buffered digi.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValidityInterval {
    arrival: f64,
    validity: f64,
}

impl ValidityInterval {
    /// Fails unless `validity >= arrival` and both are numbers.
    pub fn new(arrival: f64, validity: f64) -> AppResult<Self> {
        if arrival.is_nan() || validity.is_nan() || validity < arrival {
            return Err(DigiError::InvalidInterval { arrival, validity });
        }
        Ok(Self { arrival, validity })
    }

    /// Time the digi entered the buffer.
    pub fn arrival(&self) -> f64 {
        self.arrival
    }

    /// Time after which the digi can no longer change.
    pub fn validity(&self) -> f64 {
        self.validity
    }

    /// Smallest interval covering both.
    pub fn union(&self, other: &ValidityInterval) -> ValidityInterval {
        ValidityInterval {
            arrival: self.arrival.min(other.arrival),
            validity: self.validity.max(other.validity),
        }
    }
}
