//! CLI Entry Point for rust-digi
//!
//! Provides command-line interface for:
//! - Running the digitization pipeline over generated hits
//! - Dumping the units of a partition file
//! - Printing the effective configuration
//!
//! # Usage
//!
//! ```bash
//! rust-digi run --events 100 --divide-level 1 --time-ordered
//! rust-digi inspect test.p0.dat
//! rust-digi config
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rust_digi::config::{PipelineConfig, DEFAULT_CONFIG_PATH};
use rust_digi::data::format::read_units;
use rust_digi::logging;
use rust_digi::pipeline::{DigiPipeline, RunContext, UnitInput};
use rust_digi::source::MockHitSource;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "rust-digi")]
#[command(about = "Time-ordered digitization and partitioned binary digi output", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Digitize generated hits for a number of events
    Run {
        /// Run identifier written into every header
        #[arg(long, default_value = "1")]
        run_id: i32,

        /// Number of events (processing units)
        #[arg(long, default_value = "10")]
        events: u64,

        /// Event time increment in ns
        #[arg(long, default_value = "100.0")]
        event_spacing: f64,

        /// Hits generated per event
        #[arg(long, default_value = "20")]
        hits_per_event: usize,

        /// Seed for hit generation; the time jitter uses seed + 1
        #[arg(long)]
        seed: Option<u64>,

        /// Side of the square generated hit positions fall in
        #[arg(long, default_value = "64.0")]
        pad_range: f64,

        /// Upper bound of generated times of flight in ns
        #[arg(long, default_value = "50.0")]
        max_time_of_flight: f64,

        /// Override output.divide_level
        #[arg(long)]
        divide_level: Option<i64>,

        /// Override output.path
        #[arg(long)]
        output: Option<PathBuf>,

        /// Override buffer.time_ordered
        #[arg(long)]
        time_ordered: bool,
    },

    /// Dump the units of a digi file
    Inspect {
        /// Partition file to read
        file: PathBuf,

        /// Print records, not only headers
        #[arg(long)]
        records: bool,
    },

    /// Print the effective configuration
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = PipelineConfig::load_from(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    logging::init_from_config(&config)?;

    match cli.command {
        Commands::Run {
            run_id,
            events,
            event_spacing,
            hits_per_event,
            seed,
            pad_range,
            max_time_of_flight,
            divide_level,
            output,
            time_ordered,
        } => {
            let mut config = config;
            if let Some(level) = divide_level {
                config.output.divide_level = level;
            }
            if let Some(path) = output {
                config.output.path = path;
            }
            if time_ordered {
                config.buffer.time_ordered = true;
            }
            if let Some(seed) = seed {
                config.digitizer.seed = Some(jitter_seed(seed));
            }
            let source = MockHitSource::new(hits_per_event, seed)
                .with_pad_range(pad_range)
                .with_max_time_of_flight(max_time_of_flight);
            run(config, run_id, events, event_spacing, source)
        }
        Commands::Inspect { file, records } => inspect(file, records),
        Commands::Config => {
            println!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

/// Seed for the digitizer jitter, distinct from the hit generator's.
fn jitter_seed(seed: u64) -> u64 {
    seed.wrapping_add(1)
}

fn run(
    config: PipelineConfig,
    run_id: i32,
    events: u64,
    event_spacing: f64,
    source: MockHitSource,
) -> Result<()> {
    let mut pipeline = DigiPipeline::new(config);
    pipeline
        .setup(RunContext { run_id }, Some(Box::new(source)))
        .context("Pipeline initialization failed")?;

    for event in 0..events {
        let event_time = event as f64 * event_spacing;
        match pipeline.process_unit(UnitInput { event_time }) {
            Ok(report) => info!(
                unit = report.unit_sequence_no,
                released = report.released,
                dropped = report.dropped,
                rejected = report.rejected,
                "event done"
            ),
            Err(e) if !e.is_fatal() => warn!(event, error = %e, "event skipped"),
            Err(e) => {
                error!(event, error = %e, "aborting run");
                if let Err(close_err) = pipeline.teardown() {
                    warn!(error = %close_err, "teardown after failure also failed");
                }
                return Err(e).context("Digitization failed");
            }
        }
    }

    info!(branches = ?pipeline.registry().names(), "published collections");
    if let Some(summary) = pipeline.teardown()? {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }
    Ok(())
}

fn inspect(file: PathBuf, records: bool) -> Result<()> {
    let reader = BufReader::new(
        File::open(&file).with_context(|| format!("Cannot open {}", file.display()))?,
    );
    let units = read_units(reader)?;
    for unit in &units {
        let h = unit.header;
        println!(
            "run {:>6}  unit {:>6}  partition {:>2}  records {:>6}",
            h.run_id, h.unit_sequence_no, h.partition_index, h.record_count
        );
        if records {
            for r in &unit.records {
                println!(
                    "    det {:>6}  fe {:>4}  col {:>5}  row {:>5}",
                    r.detector_id, r.secondary_id, r.coord_a, r.coord_b
                );
            }
        }
    }
    println!(
        "{} units, {} records",
        units.len(),
        units.iter().map(|u| u.records.len()).sum::<usize>()
    );
    Ok(())
}
