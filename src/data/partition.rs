//! Partition routing.
//!
//! Detector ids are hierarchical: `station * GROUP_SIZE + sensor`, with both parts
//! starting at 1. The divide level picks how finely digis are split across output
//! files. Routing and partition counts are pure functions so the counting pass and the
//! writing pass of [`crate::data::binary_writer`] can never disagree.

use crate::error::DigiError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Detector ids per station block.
pub const GROUP_SIZE: i32 = 256;

/// Sensors per station.
pub const SENSORS_PER_STATION: usize = 4;

/// Stations in the detector.
pub const STATIONS: usize = 3;

/// Output routing granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DivideLevel {
    /// Everything in one file
    Single,
    /// One file per station
    Station,
    /// One file per sensor
    Sensor,
}

impl TryFrom<i64> for DivideLevel {
    type Error = DigiError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(DivideLevel::Single),
            1 => Ok(DivideLevel::Station),
            2 => Ok(DivideLevel::Sensor),
            other => Err(DigiError::InvalidDivideLevel(other)),
        }
    }
}

impl From<DivideLevel> for i64 {
    fn from(level: DivideLevel) -> Self {
        match level {
            DivideLevel::Single => 0,
            DivideLevel::Station => 1,
            DivideLevel::Sensor => 2,
        }
    }
}

impl fmt::Display for DivideLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DivideLevel::Single => "single",
            DivideLevel::Station => "station",
            DivideLevel::Sensor => "sensor",
        };
        write!(f, "{} ({})", name, i64::from(*self))
    }
}

impl DivideLevel {
    /// Number of output streams at this level.
    pub const fn partition_count(self) -> usize {
        match self {
            DivideLevel::Single => 1,
            DivideLevel::Station => STATIONS,
            DivideLevel::Sensor => STATIONS * SENSORS_PER_STATION,
        }
    }

    /// Partition index for a detector id.
    ///
    /// The id is truncated to 16 bits first, the width it has on disk. Ids that do
    /// not land inside `0..partition_count()` are unroutable and yield `None`.
    pub fn route(self, detector_id: i32) -> Option<usize> {
        let id = i32::from(detector_id as i16);
        let index = match self {
            DivideLevel::Single => 0,
            DivideLevel::Station => id / GROUP_SIZE - 1,
            DivideLevel::Sensor => {
                let sensor = id % GROUP_SIZE - 1;
                if !(0..SENSORS_PER_STATION as i32).contains(&sensor) {
                    return None;
                }
                (id / GROUP_SIZE - 1) * SENSORS_PER_STATION as i32 + sensor
            }
        };
        usize::try_from(index)
            .ok()
            .filter(|&i| i < self.partition_count())
    }

    /// Output path of one partition.
    ///
    /// The single-file level uses `base` unchanged. Otherwise the last `.` of the
    /// file name is replaced by `.p{index}.` (`test.dat` becomes `test.p0.dat`);
    /// names without an extension get `.p{index}` appended.
    pub fn partition_path(self, base: &Path, index: usize) -> PathBuf {
        if self == DivideLevel::Single {
            return base.to_path_buf();
        }
        let file_name = base
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tagged = match file_name.rfind('.') {
            Some(dot) => format!("{}.p{}.{}", &file_name[..dot], index, &file_name[dot + 1..]),
            None => format!("{}.p{}", file_name, index),
        };
        base.with_file_name(tagged)
    }

    /// All partition paths, in index order.
    pub fn partition_paths(self, base: &Path) -> Vec<PathBuf> {
        (0..self.partition_count())
            .map(|i| self.partition_path(base, i))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_counts() {
        assert_eq!(DivideLevel::Single.partition_count(), 1);
        assert_eq!(DivideLevel::Station.partition_count(), 3);
        assert_eq!(DivideLevel::Sensor.partition_count(), 12);
    }

    #[test]
    fn test_divide_level_from_integer() {
        assert_eq!(DivideLevel::try_from(0).unwrap(), DivideLevel::Single);
        assert_eq!(DivideLevel::try_from(1).unwrap(), DivideLevel::Station);
        assert_eq!(DivideLevel::try_from(2).unwrap(), DivideLevel::Sensor);
        assert!(matches!(
            DivideLevel::try_from(3),
            Err(DigiError::InvalidDivideLevel(3))
        ));
        assert!(matches!(
            DivideLevel::try_from(-1),
            Err(DigiError::InvalidDivideLevel(-1))
        ));
    }

    #[test]
    fn test_station_routing() {
        assert_eq!(DivideLevel::Station.route(257), Some(0));
        assert_eq!(DivideLevel::Station.route(513), Some(1));
        assert_eq!(DivideLevel::Station.route(769), Some(2));
        assert_eq!(DivideLevel::Station.route(772), Some(2));
        assert_eq!(DivideLevel::Station.route(100), None);
        assert_eq!(DivideLevel::Station.route(1025), None);
    }

    #[test]
    fn test_sensor_routing() {
        assert_eq!(DivideLevel::Sensor.route(257), Some(0));
        assert_eq!(DivideLevel::Sensor.route(260), Some(3));
        assert_eq!(DivideLevel::Sensor.route(513), Some(4));
        assert_eq!(DivideLevel::Sensor.route(772), Some(11));
        // sensor 0 and sensor 5 do not exist
        assert_eq!(DivideLevel::Sensor.route(256), None);
        assert_eq!(DivideLevel::Sensor.route(261), None);
    }

    #[test]
    fn test_single_routes_everything_to_zero() {
        for id in [0, 257, 513, 769, 40_000, -5] {
            assert_eq!(DivideLevel::Single.route(id), Some(0));
        }
    }

    #[test]
    fn test_routing_is_deterministic() {
        for level in [DivideLevel::Single, DivideLevel::Station, DivideLevel::Sensor] {
            for id in 0..1100 {
                assert_eq!(level.route(id), level.route(id));
            }
        }
    }

    #[test]
    fn test_routing_uses_truncated_id() {
        // 0x1_0101 truncates to 0x0101 = 257
        assert_eq!(DivideLevel::Station.route(0x1_0101), Some(0));
    }

    #[test]
    fn test_every_valid_sensor_has_a_distinct_partition() {
        let mut seen = std::collections::HashSet::new();
        for station in 1..=STATIONS as i32 {
            for sensor in 1..=SENSORS_PER_STATION as i32 {
                let index = DivideLevel::Sensor
                    .route(station * GROUP_SIZE + sensor)
                    .unwrap();
                assert!(seen.insert(index));
            }
        }
        assert_eq!(seen.len(), 12);
    }

    #[test]
    fn test_partition_file_names() {
        let base = Path::new("out/test.dat");
        assert_eq!(DivideLevel::Single.partition_path(base, 0), PathBuf::from("out/test.dat"));
        assert_eq!(
            DivideLevel::Station.partition_path(base, 2),
            PathBuf::from("out/test.p2.dat")
        );
        assert_eq!(
            DivideLevel::Sensor.partition_path(Path::new("run.v2.bin"), 11),
            PathBuf::from("run.v2.p11.bin")
        );
        assert_eq!(
            DivideLevel::Station.partition_path(Path::new("digis"), 1),
            PathBuf::from("digis.p1")
        );
        assert_eq!(DivideLevel::Sensor.partition_paths(base).len(), 12);
    }
}
