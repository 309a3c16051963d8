//! Core traits and data types consumed from upstream simulation.
use serde::{Deserialize, Serialize};
use std::fmt;

/// A position in detector coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point3 {
    /// Horizontal coordinate, pad columns
    pub x: f64,
    /// Vertical coordinate, pad rows
    pub y: f64,
    /// Beam axis
    pub z: f64,
}

impl Point3 {
    /// Point at `(x, y, z)`.
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// Non-owning reference to the entity a digi was derived from.
///
/// `branch` names the collection (e.g. `"PixelPoints"`), `index` is the
/// position inside that collection for the unit being processed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Link {
    /// Collection name
    pub branch: String,
    /// Position inside the collection
    pub index: usize,
}

impl Link {
    /// Link to entry `index` of `branch`.
    pub fn new(branch: impl Into<String>, index: usize) -> Self {
        Self {
            branch: branch.into(),
            index,
        }
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.branch, self.index)
    }
}

/// A single detector-volume crossing produced by upstream simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    /// Hierarchical detector id: `station * 256 + sensor`, both 1-based
    pub detector_id: i32,
    /// Entry position
    pub pos_in: Point3,
    /// Exit position
    pub pos_out: Point3,
    /// Time of flight relative to the event start, in ns
    pub time: f64,
    /// Deposited energy
    pub energy_loss: f64,
    /// Originating simulation entity
    pub link: Link,
}

/// Trait for anything that supplies hits to the pipeline.
///
/// The pipeline treats each unit's hits as a read-only batch. Sources are
/// owned by the pipeline after `setup`, so implementations only need `Send`.
pub trait HitSource: Send {
    /// Human-readable name for logging.
    fn name(&self) -> &str;

    /// Hits for the unit with the given sequence number and event time.
    ///
    /// An exhausted source returns an empty batch.
    fn hits_for_unit(&mut self, unit_sequence_no: u64, event_time: f64) -> Vec<Hit>;
}
