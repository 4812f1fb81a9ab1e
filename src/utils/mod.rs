//! Shared utilities

pub mod error;

pub use error::{ErrorResponse, ProvisionStage, RecorderError, RecorderResult};
