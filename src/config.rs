//! Pipeline configuration using Figment
//!
//! Configuration is loaded from:
//! 1. a TOML file (`config/default.toml` unless another path is given)
//! 2. Environment variables (prefixed with `RUST_DIGI_`, sections separated by `__`)
//!
//! Every field has a default, so an empty or missing file yields the stock setup:
//! a single `test.dat` output, 100 ns time resolution and pass-through buffering.
//!
//! # Example
//! ```no_run
//! use rust_digi::config::PipelineConfig;
//!
//! let config = PipelineConfig::load()?;
//! println!("Output: {}", config.output.path.display());
//! # Ok::<(), rust_digi::error::DigiError>(())
//! ```

use crate::data::partition::DivideLevel;
use crate::error::{AppResult, DigiError};
use crate::validation;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "RUST_DIGI_";

/// Top-level pipeline configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Binary output settings
    pub output: OutputConfig,
    /// Hit to digi conversion settings
    pub digitizer: DigitizerConfig,
    /// Writeout buffer settings
    pub buffer: BufferConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

/// Partitioned binary output configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Base output path. Partition tags are inserted before its extension.
    pub path: PathBuf,
    /// Routing granularity: 0 single file, 1 per station, 2 per sensor
    pub divide_level: i64,
}

/// Digitizer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DigitizerConfig {
    /// Detection time resolution in ns (sigma of the gaussian jitter)
    pub time_resolution: f64,
    /// Hold time after the digi timestamp before the digi is final
    pub writeout_window: f64,
    /// RNG seed for reproducible jitter; entropy-seeded when absent
    pub seed: Option<u64>,
}

/// Writeout buffer configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Release digis in validity-time order instead of immediately
    pub time_ordered: bool,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("test.dat"),
            divide_level: 0,
        }
    }
}

impl Default for DigitizerConfig {
    fn default() -> Self {
        Self {
            time_resolution: 100.0,
            writeout_window: 10.0,
            seed: None,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from `config/default.toml` and environment variables
    ///
    /// Environment variables override the file, e.g.
    /// `RUST_DIGI_OUTPUT__DIVIDE_LEVEL=2`.
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config = Self::figment(path.as_ref()).extract()?;
        Ok(config)
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(PipelineConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        validation::is_valid_log_level(&self.application.log_level).map_err(|e| {
            DigiError::Configuration(format!(
                "Invalid log_level '{}': {}",
                self.application.log_level, e
            ))
        })?;

        let path = self.output.path.to_string_lossy();
        validation::is_valid_path(&path).map_err(|e| {
            DigiError::Configuration(format!("Invalid output path '{}': {}", path, e))
        })?;

        self.divide_level()?;

        validation::is_non_negative_time(self.digitizer.time_resolution).map_err(|e| {
            DigiError::Configuration(format!(
                "Invalid time_resolution {}: {}",
                self.digitizer.time_resolution, e
            ))
        })?;

        validation::is_non_negative_time(self.digitizer.writeout_window).map_err(|e| {
            DigiError::Configuration(format!(
                "Invalid writeout_window {}: {}",
                self.digitizer.writeout_window, e
            ))
        })?;

        Ok(())
    }

    /// Typed routing granularity.
    pub fn divide_level(&self) -> AppResult<DivideLevel> {
        DivideLevel::try_from(self.output.divide_level)
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml_string(&self) -> AppResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| DigiError::Configuration(format!("Cannot render configuration: {}", e)))
    }
}
