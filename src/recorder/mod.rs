//! Recording system module
//!
//! - `RecordingPipeline` lifecycle state machine over one recording run
//! - Encode/feed loops, timestamp synchronizer and muxer gate
//! - Single-instance session registry

pub mod clock;
pub mod loops;
pub mod muxer;
pub mod pipeline;
pub mod registry;
pub mod state;

#[cfg(test)]
pub(crate) mod fakes;

pub use clock::PipelineClock;
pub use loops::ForwardOutcome;
pub use muxer::MuxerGate;
pub use pipeline::{RecordingEvent, RecordingPipeline, StartRequest};
pub use registry::{SessionLease, SessionRegistry, SlotStatus};
pub use state::{RecordStatus, RecordingConfig, RecordingState, RecordingSummary, TrackKind, TrackState};
