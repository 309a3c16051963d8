//! # Rust Digi Core Library
//!
//! Turns detector hits into digis, holds them until their time window is closed, and
//! writes them to a partitioned fixed-layout binary format that downstream readers
//! parse byte for byte.
//!
//! ## Crate Structure
//!
//! - **`config`**: Figment-backed `PipelineConfig` (TOML file + `RUST_DIGI_` environment).
//! - **`core`**: Upstream-facing types: `Hit`, `Link` and the `HitSource` trait.
//! - **`data`**: The writeout buffer, partition routing, binary format and the
//!   partitioned writer.
//! - **`digi`**: The `Digi` model, its identity key and validity intervals.
//! - **`digitizer`**: Hit to digi conversion with the detection-time jitter model.
//! - **`error`**: The crate-wide `DigiError` enum.
//! - **`logging`**: `tracing-subscriber` initialisation for binaries and tests.
//! - **`pipeline`**: `DigiPipeline`, the setup / process_unit / teardown driver.
//! - **`registry`**: Named store the released digis of each unit are published to.
//! - **`source`**: Replay and random hit sources for running without a simulation.
//! - **`validation`**: Small validators used by the configuration layer.

pub mod config;
pub mod core;
pub mod data;
pub mod digi;
pub mod digitizer;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod registry;
pub mod source;
pub mod validation;
