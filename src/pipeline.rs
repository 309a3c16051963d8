//! Digitization pipeline driver.
//!
//! Ties the stages together for one run:
//!
//! ```text
//! HitSource -> TimeDigitizer -> WriteoutBuffer -> DigiRegistry ("PixelDigis")
//!                                             \-> PartitionedBinaryWriter
//! ```
//!
//! The caller owns the event loop: `setup` once, `process_unit` per event with the
//! event time, `teardown` at end of run. Nothing here spawns threads or blocks
//! beyond the file writes.

use crate::config::PipelineConfig;
use crate::core::HitSource;
use crate::data::binary_writer::{PartitionedBinaryWriter, WriterStats};
use crate::data::writeout_buffer::{BufferStats, Insertion, WriteoutBuffer};
use crate::digi::Digi;
use crate::digitizer::TimeDigitizer;
use crate::error::{AppResult, DigiError};
use crate::registry::DigiRegistry;
use serde::Serialize;
use tracing::{debug, debug_span, info, warn};

/// Registry name of the digis released by each unit.
pub const DIGI_BRANCH: &str = "PixelDigis";

/// Run-wide values supplied by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunContext {
    /// Written into every unit header of the run
    pub run_id: i32,
}

/// Per-unit values supplied by the driver.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnitInput {
    /// Simulated event time of this unit, in ns
    pub event_time: f64,
}

/// What one unit did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UnitReport {
    /// Sequence number written into the unit headers
    pub unit_sequence_no: i32,
    /// Event time the watermark was advanced to
    pub event_time: f64,
    /// Hits pulled from the source
    pub hits: usize,
    /// Digis produced by the digitizer
    pub produced: usize,
    /// Hits skipped by the digitizer
    pub rejected: usize,
    /// Digis merged into an already buffered digi
    pub merged: u64,
    /// Late digis discarded by the buffer
    pub dropped: u64,
    /// Digis written in this unit
    pub released: usize,
    /// Record count per partition, in partition order
    pub records_per_partition: Vec<i32>,
}

/// End-of-run totals.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    /// Run id of the finished run
    pub run_id: i32,
    /// Units written, the final flush unit included
    pub units: u64,
    /// Buffer counters at end of run
    pub buffer: BufferStats,
    /// Writer counters at end of run
    pub writer: WriterStats,
    /// Unit written from the buffer flush, if anything was still held
    pub final_unit: Option<UnitReport>,
}

struct RunState {
    run_id: i32,
    source: Option<Box<dyn HitSource>>,
    digitizer: TimeDigitizer,
    buffer: WriteoutBuffer,
    writer: PartitionedBinaryWriter,
    next_unit: u64,
}

/// Single concrete pipeline: setup / process_unit / teardown.
pub struct DigiPipeline {
    config: PipelineConfig,
    registry: DigiRegistry,
    run: Option<RunState>,
}

impl DigiPipeline {
    /// Idle pipeline; nothing is opened until [`setup`](Self::setup).
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            registry: DigiRegistry::new(),
            run: None,
        }
    }

    /// Configuration the pipeline was built with.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Published collections of the latest unit.
    pub fn registry(&self) -> &DigiRegistry {
        &self.registry
    }

    /// True between `setup` and `teardown`.
    pub fn is_running(&self) -> bool {
        self.run.is_some()
    }

    /// Validates the configuration and opens the output.
    ///
    /// An invalid divide level or output path fails here, before any unit runs. A
    /// missing hit source is only a warning; every unit then produces no digis.
    pub fn setup(&mut self, context: RunContext, source: Option<Box<dyn HitSource>>) -> AppResult<()> {
        if self.run.is_some() {
            warn!("setup called on a running pipeline, tearing down the previous run");
            self.teardown()?;
        }

        self.config.validate()?;
        let level = self.config.divide_level()?;

        match &source {
            Some(source) => info!(source = source.name(), "hit source attached"),
            None => warn!("no input hit source, units will produce no digis"),
        }

        let digitizer = TimeDigitizer::from_config(&self.config.digitizer)?;
        let mut buffer = WriteoutBuffer::new();
        buffer.configure(self.config.buffer.time_ordered);
        let writer = PartitionedBinaryWriter::open(&self.config.output.path, level)?;

        info!(
            run_id = context.run_id,
            level = %level,
            time_ordered = self.config.buffer.time_ordered,
            time_resolution = self.config.digitizer.time_resolution,
            "pipeline initialized"
        );

        self.registry.clear();
        self.run = Some(RunState {
            run_id: context.run_id,
            source,
            digitizer,
            buffer,
            writer,
            next_unit: 0,
        });
        Ok(())
    }

    /// Starts a new run on the already open output.
    ///
    /// The run id is replaced and unit numbering restarts at zero. Buffered digis
    /// are kept.
    pub fn reinit(&mut self, context: RunContext) -> AppResult<()> {
        let run = self.run.as_mut().ok_or(DigiError::NotInitialized)?;
        info!(old = run.run_id, new = context.run_id, "run re-initialized");
        run.run_id = context.run_id;
        run.next_unit = 0;
        Ok(())
    }

    /// Runs one unit: digitize, buffer, release, publish, write.
    pub fn process_unit(&mut self, input: UnitInput) -> AppResult<UnitReport> {
        let run = self.run.as_mut().ok_or(DigiError::NotInitialized)?;
        // header field is 32 bits
        let unit_sequence_no = run.next_unit as i32;
        let _span = debug_span!("unit", run_id = run.run_id, unit = unit_sequence_no).entered();

        let hits = match run.source.as_mut() {
            Some(source) => source.hits_for_unit(run.next_unit, input.event_time),
            None => Vec::new(),
        };
        let digitized = run.digitizer.digitize_all(&hits, input.event_time);
        let produced = digitized.candidates.len();

        let before = run.buffer.stats();
        let mut released: Vec<Digi> = Vec::new();
        for candidate in digitized.candidates {
            if let Insertion::Released(digi) = run.buffer.insert(candidate.digi, candidate.interval) {
                released.push(digi);
            }
        }
        released.extend(run.buffer.advance_watermark(input.event_time));
        let after = run.buffer.stats();

        let records_per_partition =
            run.writer
                .write_unit(run.run_id, unit_sequence_no, &released)?;
        run.next_unit += 1;

        let report = UnitReport {
            unit_sequence_no,
            event_time: input.event_time,
            hits: hits.len(),
            produced,
            rejected: digitized.rejected,
            merged: after.merged - before.merged,
            dropped: after.dropped - before.dropped,
            released: released.len(),
            records_per_partition,
        };
        debug!(
            hits = report.hits,
            rejected = report.rejected,
            released = report.released,
            dropped = report.dropped,
            buffered = run.buffer.len(),
            "unit processed"
        );
        self.registry.publish(DIGI_BRANCH, released);
        Ok(report)
    }

    /// Flushes the buffer into a final unit and closes the output.
    ///
    /// Returns `None` when there is no run to finish, so repeated calls are harmless.
    pub fn teardown(&mut self) -> AppResult<Option<RunSummary>> {
        let Some(mut run) = self.run.take() else {
            return Ok(None);
        };

        let remaining = run.buffer.flush_all();
        let final_unit = if remaining.is_empty() {
            None
        } else {
            let unit_sequence_no = run.next_unit as i32;
            let records_per_partition =
                run.writer
                    .write_unit(run.run_id, unit_sequence_no, &remaining)?;
            run.next_unit += 1;
            let report = UnitReport {
                unit_sequence_no,
                event_time: run.buffer.watermark(),
                released: remaining.len(),
                records_per_partition,
                ..UnitReport::default()
            };
            self.registry.publish(DIGI_BRANCH, remaining);
            Some(report)
        };
        run.writer.close()?;

        let summary = RunSummary {
            run_id: run.run_id,
            units: run.next_unit,
            buffer: run.buffer.stats(),
            writer: run.writer.stats().clone(),
            final_unit,
        };
        info!(
            run_id = summary.run_id,
            units = summary.units,
            dropped = summary.buffer.dropped,
            "pipeline finished"
        );
        Ok(Some(summary))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Hit, Link, Point3};
    use crate::source::VecHitSource;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.output.path = dir.path().join("test.dat");
        config.digitizer.time_resolution = 0.0;
        config.digitizer.seed = Some(1);
        config
    }

    fn hit(detector_id: i32, x: f64) -> Hit {
        Hit {
            detector_id,
            pos_in: Point3::new(x, 0.0, 0.0),
            pos_out: Point3::new(x, 0.0, 0.0),
            time: 1.0,
            energy_loss: 0.1,
            link: Link::new("PixelPoints", 0),
        }
    }

    #[test]
    fn test_process_before_setup_fails() {
        let dir = TempDir::new().unwrap();
        let mut pipeline = DigiPipeline::new(config(&dir));
        assert!(matches!(
            pipeline.process_unit(UnitInput { event_time: 0.0 }),
            Err(DigiError::NotInitialized)
        ));
    }

    #[test]
    fn test_invalid_divide_level_fails_setup() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir);
        config.output.divide_level = 7;
        let mut pipeline = DigiPipeline::new(config);
        assert!(matches!(
            pipeline.setup(RunContext { run_id: 1 }, None),
            Err(DigiError::InvalidDivideLevel(7))
        ));
        assert!(!pipeline.is_running());
    }

    #[test]
    fn test_missing_source_produces_empty_units() {
        let dir = TempDir::new().unwrap();
        let mut pipeline = DigiPipeline::new(config(&dir));
        pipeline.setup(RunContext { run_id: 1 }, None).unwrap();
        let report = pipeline.process_unit(UnitInput { event_time: 0.0 }).unwrap();
        assert_eq!(report.hits, 0);
        assert_eq!(report.records_per_partition, vec![0]);
        assert_eq!(pipeline.registry().get(DIGI_BRANCH).map(<[Digi]>::len), Some(0));
    }

    #[test]
    fn test_publishes_released_digis() {
        let dir = TempDir::new().unwrap();
        let source = VecHitSource::new(vec![vec![hit(257, 2.0), hit(513, 4.0)]]);
        let mut pipeline = DigiPipeline::new(config(&dir));
        pipeline
            .setup(RunContext { run_id: 3 }, Some(Box::new(source)))
            .unwrap();
        let report = pipeline.process_unit(UnitInput { event_time: 0.0 }).unwrap();
        assert_eq!(report.released, 2);
        let digis = pipeline.registry().get(DIGI_BRANCH).unwrap();
        assert_eq!(digis[0].col, 2);
        assert_eq!(digis[1].detector_id, 513);
    }

    #[test]
    fn test_nan_hit_does_not_fail_the_unit() {
        let dir = TempDir::new().unwrap();
        let mut bad = hit(513, 4.0);
        bad.time = f64::NAN;
        let source = VecHitSource::new(vec![vec![hit(257, 2.0), bad]]);
        let mut pipeline = DigiPipeline::new(config(&dir));
        pipeline
            .setup(RunContext { run_id: 1 }, Some(Box::new(source)))
            .unwrap();
        let report = pipeline.process_unit(UnitInput { event_time: 0.0 }).unwrap();
        assert_eq!(report.hits, 2);
        assert_eq!(report.produced, 1);
        assert_eq!(report.rejected, 1);
        assert_eq!(report.records_per_partition, vec![1]);
        let digis = pipeline.registry().get(DIGI_BRANCH).unwrap();
        assert_eq!(digis.len(), 1);
        assert_eq!(digis[0].detector_id, 257);
    }

    #[test]
    fn test_teardown_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let mut pipeline = DigiPipeline::new(config(&dir));
        pipeline.setup(RunContext { run_id: 1 }, None).unwrap();
        pipeline.process_unit(UnitInput { event_time: 0.0 }).unwrap();
        let summary = pipeline.teardown().unwrap().unwrap();
        assert_eq!(summary.units, 1);
        assert!(summary.final_unit.is_none());
        assert!(pipeline.teardown().unwrap().is_none());
    }

    #[test]
    fn test_reinit_restarts_unit_numbering() {
        let dir = TempDir::new().unwrap();
        let mut pipeline = DigiPipeline::new(config(&dir));
        pipeline.setup(RunContext { run_id: 1 }, None).unwrap();
        pipeline.process_unit(UnitInput { event_time: 0.0 }).unwrap();
        pipeline.process_unit(UnitInput { event_time: 10.0 }).unwrap();
        pipeline.reinit(RunContext { run_id: 2 }).unwrap();
        let report = pipeline.process_unit(UnitInput { event_time: 20.0 }).unwrap();
        assert_eq!(report.unit_sequence_no, 0);
    }
}
