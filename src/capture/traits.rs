//! Capture trait definitions
//!
//! Platform-agnostic boundary to the screen/audio capture source and the
//! authorization broker that grants access to it.

use crate::codec::HardwareEncoder;
use crate::utils::error::RecorderResult;
use async_trait::async_trait;
use std::sync::Arc;

/// Screen mirroring into an encoder's input surface
///
/// Frames flow as soon as the mirror exists; releasing it stops the flow.
pub trait DisplayMirror: Send {
    fn release(&mut self);
}

/// Device audio capture stream delivering PCM 16-bit samples
pub trait AudioCaptureStream: Send {
    /// Copy available bytes into `buf` without blocking; 0 means nothing ready
    fn read(&mut self, buf: &mut [u8]) -> RecorderResult<usize>;

    fn stop(&mut self);

    fn release(&mut self);
}

/// An authorized capture source
///
/// Obtained from [`AuthorizationBroker::request_authorization`]. Stopping it
/// ends the authorization session; a new grant is needed afterwards.
pub trait CaptureSource: Send + Sync {
    /// Mirror the screen into `encoder`'s input surface at the given size
    fn create_encoder_input_surface(
        &self,
        encoder: &dyn HardwareEncoder,
        width: u32,
        height: u32,
    ) -> RecorderResult<Box<dyn DisplayMirror>>;

    /// Open and start a device audio capture stream
    fn open_audio_capture_stream(
        &self,
        sample_rate: u32,
        channels: u16,
        buffer_bytes: usize,
    ) -> RecorderResult<Box<dyn AudioCaptureStream>>;

    fn stop(&self);
}

/// Answer of the capture authorization broker
#[derive(Clone)]
pub enum AuthorizationOutcome {
    Granted(Arc<dyn CaptureSource>),
    Denied,
    PermanentlyDenied,
}

impl std::fmt::Debug for AuthorizationOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthorizationOutcome::Granted(_) => write!(f, "Granted"),
            AuthorizationOutcome::Denied => write!(f, "Denied"),
            AuthorizationOutcome::PermanentlyDenied => write!(f, "PermanentlyDenied"),
        }
    }
}

/// External broker obtaining user consent for screen/audio capture
///
/// Returns exactly one outcome per request.
#[async_trait]
pub trait AuthorizationBroker: Send + Sync {
    async fn request_authorization(&self) -> AuthorizationOutcome;
}
