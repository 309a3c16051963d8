//! Digi buffering, routing and binary storage.
pub mod binary_writer;
pub mod format;
pub mod partition;
pub mod writeout_buffer;
