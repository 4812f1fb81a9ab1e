//! Command handlers
//!
//! The control surface the UI layer calls into.

pub mod recording;

pub use recording::{default_output_path, Recorder};
