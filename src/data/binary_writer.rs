//! Partitioned binary digi writer.
//!
//! Routes finalized digis to one of 1, 3 or 12 output files and frames each processing
//! unit as one header per partition followed by that partition's records.
//!
//! # Unit protocol
//!
//! ```text
//! begin_unit(run, seq, digis)   route once, count per partition, write every header
//! write(digi) x N               route again, append record, check against header
//! end_unit()                    every partition received exactly its declared count
//! ```
//!
//! The header count has to be on disk before the first record, so a unit is always
//! processed in two passes. Both passes go through [`DivideLevel::route`] and
//! `write`/`end_unit` refuse to let a partition exceed or fall short of its header.
//!
//! # Example
//! ```no_run
//! use rust_digi::data::binary_writer::PartitionedBinaryWriter;
//! use rust_digi::data::partition::DivideLevel;
//! use rust_digi::digi::Digi;
//! use std::path::Path;
//!
//! let mut writer = PartitionedBinaryWriter::open(Path::new("test.dat"), DivideLevel::Station)?;
//! let digis = vec![Digi::new(257, 0, 1, 1), Digi::new(513, 0, 2, 2)];
//! writer.write_unit(0, 0, &digis)?;
//! writer.close()?;
//! # Ok::<(), rust_digi::error::DigiError>(())
//! ```

use crate::data::format::UnitHeader;
use crate::data::partition::DivideLevel;
use crate::digi::Digi;
use crate::error::{AppResult, DigiError};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Counters exposed for monitoring and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WriterStats {
    /// Units framed so far
    pub units: u64,
    /// Records written per partition over the whole run
    pub records: Vec<u64>,
    /// Digis skipped because their detector id routes to no partition
    pub unroutable: u64,
}

/// Bookkeeping for the unit currently being written.
#[derive(Debug)]
struct OpenUnit {
    sequence_no: i32,
    declared: Vec<i32>,
    written: Vec<i32>,
}

/// Writer owning one output stream per partition.
pub struct PartitionedBinaryWriter {
    level: DivideLevel,
    paths: Vec<PathBuf>,
    streams: Vec<BufWriter<File>>,
    unit: Option<OpenUnit>,
    stats: WriterStats,
    closed: bool,
}

impl PartitionedBinaryWriter {
    /// Creates (truncating) every partition file for `level`.
    pub fn open(base_path: &Path, level: DivideLevel) -> AppResult<Self> {
        let paths = level.partition_paths(base_path);
        let mut streams = Vec::with_capacity(paths.len());
        for path in &paths {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            streams.push(BufWriter::new(File::create(path)?));
        }
        info!(
            level = %level,
            partitions = paths.len(),
            base = %base_path.display(),
            "opened partitioned digi output"
        );
        Ok(Self {
            level,
            stats: WriterStats {
                records: vec![0; paths.len()],
                ..WriterStats::default()
            },
            paths,
            streams,
            unit: None,
            closed: false,
        })
    }

    /// Like [`open`](Self::open) but takes the raw configuration value.
    ///
    /// Levels outside `0..=2` fail with [`DigiError::InvalidDivideLevel`].
    pub fn open_with_level(base_path: &Path, divide_level: i64) -> AppResult<Self> {
        Self::open(base_path, DivideLevel::try_from(divide_level)?)
    }

    /// Partitioning the files were opened with.
    pub fn divide_level(&self) -> DivideLevel {
        self.level
    }

    /// Number of output files.
    pub fn partition_count(&self) -> usize {
        self.paths.len()
    }

    /// Output file of each partition, in index order.
    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Run-wide counters.
    pub fn stats(&self) -> &WriterStats {
        &self.stats
    }

    /// True once [`close`](Self::close) has run.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Per-partition record counts for a set of digis (the counting pass).
    pub fn count_records(&self, digis: &[Digi]) -> Vec<i32> {
        let mut counts = vec![0i32; self.partition_count()];
        for digi in digis {
            if let Some(partition) = self.level.route(digi.detector_id) {
                counts[partition] += 1;
            }
        }
        counts
    }

    /// Opens a unit for `digis` and writes one header per partition.
    ///
    /// Every partition gets a header, including partitions with no records.
    pub fn begin_unit(&mut self, run_id: i32, unit_sequence_no: i32, digis: &[Digi]) -> AppResult<()> {
        self.ensure_open()?;
        if let Some(unit) = &self.unit {
            return Err(DigiError::UnitAlreadyOpen(unit.sequence_no));
        }

        let declared = self.count_records(digis);
        for (index, stream) in self.streams.iter_mut().enumerate() {
            UnitHeader {
                run_id,
                unit_sequence_no,
                partition_index: index as i32,
                record_count: declared[index],
            }
            .write_to(stream)?;
        }
        debug!(
            run_id,
            unit = unit_sequence_no,
            ?declared,
            "unit headers written"
        );

        self.unit = Some(OpenUnit {
            sequence_no: unit_sequence_no,
            written: vec![0; declared.len()],
            declared,
        });
        Ok(())
    }

    /// Appends one record to the digi's partition.
    ///
    /// Returns the partition index, or `None` for an unroutable digi, which is
    /// skipped exactly as the counting pass skipped it.
    pub fn write(&mut self, digi: &Digi) -> AppResult<Option<usize>> {
        self.ensure_open()?;
        let unit = self.unit.as_mut().ok_or(DigiError::UnitNotOpen)?;

        let Some(partition) = self.level.route(digi.detector_id) else {
            self.stats.unroutable += 1;
            warn!(
                detector_id = digi.detector_id,
                level = %self.level,
                "skipping digi with unroutable detector id"
            );
            return Ok(None);
        };

        if unit.written[partition] >= unit.declared[partition] {
            return Err(DigiError::HeaderMismatch {
                unit: unit.sequence_no,
                partition,
                declared: unit.declared[partition],
                written: unit.written[partition] + 1,
            });
        }

        digi.record().write_to(&mut self.streams[partition])?;
        unit.written[partition] += 1;
        self.stats.records[partition] += 1;
        Ok(Some(partition))
    }

    /// Closes the current unit after checking every header count was honoured.
    pub fn end_unit(&mut self) -> AppResult<()> {
        self.ensure_open()?;
        let unit = self.unit.take().ok_or(DigiError::UnitNotOpen)?;
        for (partition, (&declared, &written)) in
            unit.declared.iter().zip(unit.written.iter()).enumerate()
        {
            if declared != written {
                return Err(DigiError::HeaderMismatch {
                    unit: unit.sequence_no,
                    partition,
                    declared,
                    written,
                });
            }
        }
        self.stats.units += 1;
        Ok(())
    }

    /// Writes a complete unit: headers, then every digi in order.
    pub fn write_unit(&mut self, run_id: i32, unit_sequence_no: i32, digis: &[Digi]) -> AppResult<Vec<i32>> {
        self.begin_unit(run_id, unit_sequence_no, digis)?;
        for digi in digis {
            self.write(digi)?;
        }
        let counts = self
            .unit
            .as_ref()
            .map(|u| u.written.clone())
            .unwrap_or_default();
        self.end_unit()?;
        Ok(counts)
    }

    /// Flushes and closes every partition stream. Safe to call more than once.
    pub fn close(&mut self) -> AppResult<()> {
        if self.closed {
            return Ok(());
        }
        if let Some(unit) = self.unit.take() {
            warn!(
                unit = unit.sequence_no,
                "closing writer with an unfinished unit"
            );
        }
        self.closed = true;
        let mut first_error = None;
        for mut stream in self.streams.drain(..) {
            if let Err(e) = stream.flush() {
                first_error.get_or_insert(e);
            }
        }
        info!(
            units = self.stats.units,
            records = self.stats.records.iter().sum::<u64>(),
            unroutable = self.stats.unroutable,
            "closed partitioned digi output"
        );
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    fn ensure_open(&self) -> AppResult<()> {
        if self.closed {
            Err(DigiError::WriterClosed)
        } else {
            Ok(())
        }
    }
}

impl Drop for PartitionedBinaryWriter {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "failed to close partitioned digi output");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::format::{read_units, HEADER_SIZE, RECORD_SIZE};
    use tempfile::TempDir;

    fn digi(detector_id: i32) -> Digi {
        Digi::new(detector_id, 1, 2, 3)
    }

    #[test]
    fn test_opens_one_file_per_partition() {
        let dir = TempDir::new().unwrap();
        let base = dir.path().join("test.dat");
        for (level, count) in [(0, 1), (1, 3), (2, 12)] {
            let writer = PartitionedBinaryWriter::open_with_level(&base, level).unwrap();
            assert_eq!(writer.partition_count(), count);
            for path in writer.paths() {
                assert!(path.exists(), "{} missing", path.display());
            }
        }
    }

    #[test]
    fn test_rejects_unknown_divide_level() {
        let dir = TempDir::new().unwrap();
        let base = dir.path().join("test.dat");
        assert!(matches!(
            PartitionedBinaryWriter::open_with_level(&base, 3),
            Err(DigiError::InvalidDivideLevel(3))
        ));
    }

    #[test]
    fn test_empty_unit_still_gets_headers() {
        let dir = TempDir::new().unwrap();
        let base = dir.path().join("test.dat");
        let mut writer = PartitionedBinaryWriter::open(&base, DivideLevel::Station).unwrap();
        writer.write_unit(9, 0, &[]).unwrap();
        writer.close().unwrap();

        for (index, path) in writer.paths().iter().enumerate() {
            let bytes = std::fs::read(path).unwrap();
            assert_eq!(bytes.len(), HEADER_SIZE);
            let units = read_units(bytes.as_slice()).unwrap();
            assert_eq!(units[0].header.partition_index, index as i32);
            assert_eq!(units[0].header.record_count, 0);
        }
    }

    #[test]
    fn test_writing_beyond_declared_count_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut writer =
            PartitionedBinaryWriter::open(&dir.path().join("test.dat"), DivideLevel::Station).unwrap();
        writer.begin_unit(1, 0, &[digi(257)]).unwrap();
        assert_eq!(writer.write(&digi(257)).unwrap(), Some(0));
        assert!(matches!(
            writer.write(&digi(257)),
            Err(DigiError::HeaderMismatch { partition: 0, declared: 1, written: 2, .. })
        ));
    }

    #[test]
    fn test_ending_short_unit_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut writer =
            PartitionedBinaryWriter::open(&dir.path().join("test.dat"), DivideLevel::Station).unwrap();
        writer.begin_unit(1, 0, &[digi(257), digi(513)]).unwrap();
        writer.write(&digi(257)).unwrap();
        assert!(matches!(
            writer.end_unit(),
            Err(DigiError::HeaderMismatch { partition: 1, declared: 1, written: 0, .. })
        ));
    }

    #[test]
    fn test_unit_protocol_misuse() {
        let dir = TempDir::new().unwrap();
        let mut writer =
            PartitionedBinaryWriter::open(&dir.path().join("test.dat"), DivideLevel::Single).unwrap();
        assert!(matches!(writer.write(&digi(257)), Err(DigiError::UnitNotOpen)));
        assert!(matches!(writer.end_unit(), Err(DigiError::UnitNotOpen)));
        writer.begin_unit(1, 4, &[]).unwrap();
        assert!(matches!(
            writer.begin_unit(1, 5, &[]),
            Err(DigiError::UnitAlreadyOpen(4))
        ));
    }

    #[test]
    fn test_unroutable_digis_are_skipped_in_both_passes() {
        let dir = TempDir::new().unwrap();
        let mut writer =
            PartitionedBinaryWriter::open(&dir.path().join("test.dat"), DivideLevel::Station).unwrap();
        let digis = vec![digi(257), digi(5000), digi(769)];
        assert_eq!(writer.count_records(&digis), vec![1, 0, 1]);
        let written = writer.write_unit(1, 0, &digis).unwrap();
        assert_eq!(written, vec![1, 0, 1]);
        assert_eq!(writer.stats().unroutable, 1);
    }

    #[test]
    fn test_close_is_idempotent_and_final() {
        let dir = TempDir::new().unwrap();
        let base = dir.path().join("test.dat");
        let mut writer = PartitionedBinaryWriter::open(&base, DivideLevel::Single).unwrap();
        writer.write_unit(1, 0, &[digi(257), digi(258)]).unwrap();
        writer.close().unwrap();
        writer.close().unwrap();
        assert!(writer.is_closed());
        assert!(matches!(
            writer.write_unit(1, 1, &[]),
            Err(DigiError::WriterClosed)
        ));
        let bytes = std::fs::read(&base).unwrap();
        assert_eq!(bytes.len(), HEADER_SIZE + 2 * RECORD_SIZE);
    }
}
