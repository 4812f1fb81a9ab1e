//! Hardware codec boundary
//!
//! - `HardwareEncoder` / `ContainerWriter` / `MediaBackend` traits for platform codecs
//! - Media formats and buffer metadata
//! - `OutputUnit`, the borrow-and-return handle for encoder output buffers

pub mod format;
pub mod traits;
pub mod unit;

pub use format::{BufferFlags, BufferInfo, MediaFormat, SampleInfo};
pub use traits::{BufferId, ContainerWriter, HardwareEncoder, InputSlot, MediaBackend, OutputEvent};
pub use unit::OutputUnit;
