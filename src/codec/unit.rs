//! Scoped borrow of an encoder output buffer

use super::format::BufferInfo;
use super::traits::{BufferId, HardwareEncoder};
use crate::recorder::state::TrackKind;
use crate::utils::error::RecorderResult;

/// One encoded unit borrowed from an encoder's output queue
///
/// The payload stays owned by the encoder. The unit must go back to its queue
/// before the next dequeue; `release` does that explicitly and dropping an
/// unreleased unit does it implicitly, so discard and cancellation paths can't
/// starve the buffer pool.
pub struct OutputUnit<'a> {
    encoder: &'a dyn HardwareEncoder,
    kind: TrackKind,
    id: BufferId,
    info: BufferInfo,
    released: bool,
}

impl<'a> OutputUnit<'a> {
    pub fn new(encoder: &'a dyn HardwareEncoder, kind: TrackKind, id: BufferId, info: BufferInfo) -> Self {
        Self {
            encoder,
            kind,
            id,
            info,
            released: false,
        }
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn info(&self) -> &BufferInfo {
        &self.info
    }

    pub fn presentation_time_raw(&self) -> i64 {
        self.info.presentation_time_us
    }

    /// Run `f` over the valid payload bytes
    pub fn with_payload<R>(&self, f: impl FnOnce(&[u8]) -> R) -> RecorderResult<Option<R>> {
        let mut f = Some(f);
        let mut out = None;
        let (offset, size) = (self.info.offset, self.info.size);
        self.encoder.read_output_buffer(self.id, &mut |bytes: &[u8]| {
            if let Some(f) = f.take() {
                let end = offset.saturating_add(size).min(bytes.len());
                let start = offset.min(end);
                out = Some(f(&bytes[start..end]));
            }
        })?;
        Ok(out)
    }

    /// Hand the buffer back to the encoder
    pub fn release(mut self) -> RecorderResult<()> {
        self.released = true;
        self.encoder.release_output_buffer(self.id)
    }
}

impl Drop for OutputUnit<'_> {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = self.encoder.release_output_buffer(self.id) {
                tracing::warn!("Failed to release {} output buffer {:?}: {}", self.kind, self.id, e);
            }
        }
    }
}
