//! Highlight Recorder - screen and audio capture into a single MP4.
//!
//! Captures the screen through a hardware video encoder and device audio
//! through a hardware audio encoder, aligns both streams on a common
//! timeline and multiplexes them into one container file.

pub mod capture;
pub mod codec;
pub mod commands;
pub mod recorder;
pub mod session;
pub mod utils;

pub use commands::{default_output_path, Recorder};
pub use recorder::{RecordStatus, RecordingConfig, RecordingSummary};
pub use utils::error::{ErrorResponse, RecorderError, RecorderResult};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing/logging
///
/// Honors `RUST_LOG`; calling it again is a no-op.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "highlight_recorder=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();

    tracing::debug!("Highlight Recorder v{}", env!("CARGO_PKG_VERSION"));
}
