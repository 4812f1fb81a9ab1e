//! Capture source boundary
//!
//! The screen mirror, device audio stream and authorization broker are provided
//! by the platform; this module defines how the pipeline talks to them.

pub mod traits;

#[cfg(feature = "system-audio")]
pub mod system_audio;

pub use traits::{AudioCaptureStream, AuthorizationBroker, AuthorizationOutcome, CaptureSource, DisplayMirror};

#[cfg(feature = "system-audio")]
pub use system_audio::SystemAudioCapture;
