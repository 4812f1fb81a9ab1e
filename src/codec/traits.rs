//! Hardware codec and container writer traits
//!
//! The platform exposes poll-based encoders and a container writer; the
//! pipeline only ever talks to them through these traits.

use super::format::{BufferFlags, BufferInfo, MediaFormat, SampleInfo};
use crate::utils::error::RecorderResult;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Identifier of a buffer owned by an encoder queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(pub usize);

/// An input buffer offered by an encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputSlot {
    pub id: BufferId,
    /// Bytes the buffer can accept
    pub capacity: usize,
}

/// Result of polling an encoder's output queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputEvent {
    /// The output format is now known (see [`HardwareEncoder::output_format`])
    FormatChanged,
    /// Nothing became available within the timeout
    TryAgainLater,
    /// An encoded buffer is ready and must be released after use
    Buffer { id: BufferId, info: BufferInfo },
}

/// A hardware encoder with non-blocking input and output queues
///
/// Input and output sides may be driven from different tasks concurrently.
pub trait HardwareEncoder: Send + Sync {
    fn configure(&self, format: &MediaFormat) -> RecorderResult<()>;

    fn start(&self) -> RecorderResult<()>;

    fn dequeue_input_buffer(&self, timeout: Duration) -> RecorderResult<Option<InputSlot>>;

    /// Copy `data` into a dequeued input buffer and submit it
    fn queue_input_buffer(
        &self,
        id: BufferId,
        data: &[u8],
        presentation_time_us: i64,
        flags: BufferFlags,
    ) -> RecorderResult<()>;

    fn dequeue_output_buffer(&self, timeout: Duration) -> RecorderResult<OutputEvent>;

    fn output_format(&self) -> RecorderResult<MediaFormat>;

    /// Borrow the payload of a dequeued output buffer for the duration of `reader`
    fn read_output_buffer(&self, id: BufferId, reader: &mut dyn FnMut(&[u8])) -> RecorderResult<()>;

    fn release_output_buffer(&self, id: BufferId) -> RecorderResult<()>;

    fn signal_end_of_input_stream(&self) -> RecorderResult<()>;

    fn stop(&self) -> RecorderResult<()>;

    fn release(&self);
}

/// A container file writer (e.g. MPEG-4)
pub trait ContainerWriter: Send {
    fn add_track(&mut self, format: &MediaFormat) -> RecorderResult<usize>;

    fn start(&mut self) -> RecorderResult<()>;

    fn write_sample_data(&mut self, track_index: usize, data: &[u8], info: &SampleInfo) -> RecorderResult<()>;

    /// Finalize the file; only valid after `start`
    fn stop(&mut self) -> RecorderResult<()>;

    fn release(&mut self);
}

/// Factory for platform encoders and container writers
pub trait MediaBackend: Send + Sync {
    /// Create an (unconfigured) encoder for `mime`
    fn create_encoder(&self, mime: &str) -> RecorderResult<Arc<dyn HardwareEncoder>>;

    fn create_container_writer(&self, path: &Path) -> RecorderResult<Box<dyn ContainerWriter>>;
}
