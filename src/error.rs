//! Custom error types for the digitization pipeline.
//!
//! This module defines the primary error type, `DigiError`, shared by the buffer, the
//! partitioned writer and the pipeline driver. Using the `thiserror` crate it gives one
//! consistent way to report failures, from configuration problems to output-format
//! integrity violations.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: Wraps errors from `figment`, typically TOML parse failures or type
//!   mismatches while extracting the configuration.
//! - **`Configuration`**: Semantic configuration errors, values that parse but are
//!   logically wrong (negative time resolution, empty output path).
//! - **`InvalidDivideLevel`**: The routing granularity is outside `0..=2`. Fatal at setup.
//! - **`NotInitialized`**: A unit was processed before `setup` succeeded.
//! - **`Io`**: Wraps `std::io::Error` from the partition streams.
//! - **`HeaderMismatch`**: The number of records appended to a partition does not match
//!   the count declared in that unit's header.
//! - **`WriterClosed`** / **`UnitNotOpen`** / **`UnitAlreadyOpen`**: Writer protocol misuse.
//!
//! Late arrivals and unroutable digis are not errors. They are counted and logged by
//! the component that discards them.

use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, DigiError>;

/// Errors raised by the digitization pipeline and its output.
#[derive(Error, Debug)]
pub enum DigiError {
    /// Configuration could not be loaded or extracted
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration loaded but holds an unusable value
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Routing granularity outside `0..=2`
    #[error("Divide level {0} unknown, it has to be in the range <0,2>")]
    InvalidDivideLevel(i64),

    /// Unit processed before a successful `setup`
    #[error("Pipeline has no initialization context, call setup() first")]
    NotInitialized,

    /// Partition file could not be created or written
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Validity time before arrival time, or either is NaN
    #[error("Invalid validity interval: validity time {validity} precedes arrival time {arrival}")]
    InvalidInterval {
        /// Time the digi entered the buffer
        arrival: f64,
        /// Time the digi becomes final
        validity: f64,
    },

    /// Records written to a partition disagree with its unit header
    #[error(
        "Partition {partition} header declared {declared} records for unit {unit} but {written} were written"
    )]
    HeaderMismatch {
        /// Unit sequence number
        unit: i32,
        /// Partition index
        partition: usize,
        /// Count in the header
        declared: i32,
        /// Records appended so far
        written: i32,
    },

    /// `write` or `end_unit` without `begin_unit`
    #[error("No output unit is open")]
    UnitNotOpen,

    /// `begin_unit` while another unit is open
    #[error("Output unit {0} is still open")]
    UnitAlreadyOpen(i32),

    /// Operation on a closed writer
    #[error("Partitioned writer is closed")]
    WriterClosed,

    /// Digi file does not follow the header/record layout
    #[error("Malformed digi file: {0}")]
    Malformed(String),
}

impl From<figment::Error> for DigiError {
    fn from(value: figment::Error) -> Self {
        DigiError::Config(Box::new(value))
    }
}

impl DigiError {
    /// Whether the error must stop the run.
    ///
    /// Everything except protocol misuse on a single unit is fatal.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, DigiError::UnitAlreadyOpen(_) | DigiError::UnitNotOpen)
    }
}
