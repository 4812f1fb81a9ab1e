//! Encode and feed loops
//!
//! Three loops run while the pipeline is `Running`, all under one cancellation
//! token:
//! - video encode loop: drains the video encoder's output queue
//! - audio feed loop: moves captured PCM into the audio encoder's input queue
//! - audio encode loop: drains the audio encoder's output queue
//!
//! Codec polls block for their timeout, so every loop runs on a blocking
//! thread and checks the token between polls. After cancellation the pipeline
//! drains both output queues with [`drain_encoder`].

use super::clock::PipelineClock;
use super::muxer::MuxerGate;
use super::pipeline::RecordingEvent;
use super::state::TrackKind;
use crate::capture::AudioCaptureStream;
use crate::codec::{BufferFlags, HardwareEncoder, OutputEvent, OutputUnit};
use crate::utils::error::RecorderResult;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Output queue poll while recording
pub const OUTPUT_TIMEOUT_WHEN_RECORDING: Duration = Duration::from_millis(10);

/// Output queue poll while draining after end-of-stream
pub const DRAIN_TIMEOUT_AFTER_STOP: Duration = Duration::from_millis(300);

/// Wait for a free audio encoder input buffer
pub const INPUT_BUFFER_TIMEOUT: Duration = Duration::from_millis(300);

/// Back-off when the audio capture stream had nothing to read
pub const AUDIO_IDLE_BACKOFF: Duration = Duration::from_millis(5);

/// Size requested for the device audio capture buffer
pub const AUDIO_CAPTURE_BUFFER_BYTES: usize = 2 * 1024 * 1024;

/// Intermediate buffer between the capture stream and encoder input buffers
pub const AUDIO_FEED_BUFFER_BYTES: usize = 2048;

/// What happened to one encoded unit handed to the muxer gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardOutcome {
    Written,
    /// The other track's format is not known yet; the unit is discarded
    MuxerNotStarted,
    /// Keyframe before the calibrated origin; cannot be placed in the container
    DroppedNegativeKeyframe,
    /// No calibrated origin exists to rebase against
    NoOrigin,
}

/// Counters shared by the loops of one session
#[derive(Debug, Default)]
pub struct LoopStats {
    dropped_negative_keyframes: AtomicU64,
    discarded_before_start: AtomicU64,
}

impl LoopStats {
    pub fn note(&self, outcome: ForwardOutcome) {
        match outcome {
            ForwardOutcome::DroppedNegativeKeyframe => {
                self.dropped_negative_keyframes.fetch_add(1, Ordering::Relaxed);
            }
            ForwardOutcome::MuxerNotStarted | ForwardOutcome::NoOrigin => {
                self.discarded_before_start.fetch_add(1, Ordering::Relaxed);
            }
            ForwardOutcome::Written => {}
        }
    }

    pub fn dropped_negative_keyframes(&self) -> u64 {
        self.dropped_negative_keyframes.load(Ordering::Relaxed)
    }

    pub fn discarded_before_start(&self) -> u64 {
        self.discarded_before_start.load(Ordering::Relaxed)
    }
}

/// Everything a loop needs from its session
#[derive(Clone)]
pub struct LoopContext {
    pub session_id: Uuid,
    pub gate: Arc<MuxerGate>,
    pub clock: Arc<PipelineClock>,
    pub stats: Arc<LoopStats>,
    pub cancel: CancellationToken,
    pub events: broadcast::Sender<RecordingEvent>,
    /// Runtime the loops block on while waiting for the origin
    pub runtime: Handle,
}

impl LoopContext {
    /// Turn a steady-state error into a hard stop of the session
    fn fault(&self, source: &str, error: impl std::fmt::Display) {
        let message = format!("{}: {}", source, error);
        tracing::error!("[{}] Encoder fault in {}", self.session_id, message);
        self.cancel.cancel();
        let _ = self.events.send(RecordingEvent::Fault {
            session_id: self.session_id,
            message,
        });
    }
}

/// Rebase a unit, hand it to the gate and release it back to its encoder
///
/// The unit is released on every path, including errors.
pub fn forward_unit(unit: OutputUnit<'_>, gate: &MuxerGate, clock: &PipelineClock) -> RecorderResult<ForwardOutcome> {
    let kind = unit.kind();
    let info = *unit.info();

    if !gate.is_started() {
        unit.release()?;
        return Ok(ForwardOutcome::MuxerNotStarted);
    }

    let Some(presentation_time_us) = clock.rebase(info.presentation_time_us) else {
        unit.release()?;
        return Ok(ForwardOutcome::NoOrigin);
    };

    if info.flags.is_key_frame() && presentation_time_us < 0 {
        tracing::error!(
            "Negative timestamp: {}; track: {}; buffer flags: {:#x}",
            presentation_time_us,
            kind,
            info.flags.bits()
        );
        unit.release()?;
        return Ok(ForwardOutcome::DroppedNegativeKeyframe);
    }

    let written = unit.with_payload(|payload| gate.write_sample(kind, presentation_time_us, info.flags, payload));
    unit.release()?;
    let written = written?.transpose()?.unwrap_or(false);

    if written {
        clock.mark_sample_written();
        Ok(ForwardOutcome::Written)
    } else {
        Ok(ForwardOutcome::MuxerNotStarted)
    }
}

/// Video or audio encode loop; blocks until the token is cancelled
pub fn run_encode_loop(kind: TrackKind, encoder: Arc<dyn HardwareEncoder>, ctx: LoopContext) {
    tracing::debug!("[{}] {} encode loop started", ctx.session_id, kind);
    if let Err(e) = encode_loop(kind, encoder.as_ref(), &ctx) {
        ctx.fault(&format!("{} encode loop", kind), e);
    }
    tracing::debug!("[{}] {} encode loop finished", ctx.session_id, kind);
}

fn encode_loop(kind: TrackKind, encoder: &dyn HardwareEncoder, ctx: &LoopContext) -> RecorderResult<()> {
    while !ctx.cancel.is_cancelled() {
        match encoder.dequeue_output_buffer(OUTPUT_TIMEOUT_WHEN_RECORDING)? {
            OutputEvent::FormatChanged => {
                let format = encoder.output_format()?;
                ctx.gate.register_format(kind, &format)?;
                ctx.gate.try_start()?;
            }
            OutputEvent::TryAgainLater => {}
            OutputEvent::Buffer { id, info } => {
                let unit = OutputUnit::new(encoder, kind, id, info);
                if info.flags.is_codec_config() {
                    // Config data already travels in the output format
                    unit.release()?;
                    continue;
                }

                if ctx.clock.record_first_frame(kind, info.presentation_time_us) {
                    ctx.gate.note_first_frame(kind, info.presentation_time_us);
                    if ctx.runtime.block_on(ctx.clock.wait_for_origin(&ctx.cancel)).is_none() {
                        // Cancelled while waiting; dropping the unit releases it
                        break;
                    }
                }

                let outcome = forward_unit(unit, &ctx.gate, &ctx.clock)?;
                ctx.stats.note(outcome);
            }
        }
    }
    Ok(())
}

/// Audio feed loop; blocks until the token is cancelled
pub fn run_audio_feed_loop(
    encoder: Arc<dyn HardwareEncoder>,
    capture: Arc<Mutex<Box<dyn AudioCaptureStream>>>,
    ctx: LoopContext,
) {
    tracing::debug!("[{}] audio feed loop started", ctx.session_id);
    if let Err(e) = audio_feed_loop(encoder.as_ref(), &capture, &ctx) {
        ctx.fault("audio feed loop", e);
    }
    tracing::debug!("[{}] audio feed loop finished", ctx.session_id);
}

fn audio_feed_loop(
    encoder: &dyn HardwareEncoder,
    capture: &Mutex<Box<dyn AudioCaptureStream>>,
    ctx: &LoopContext,
) -> RecorderResult<()> {
    let mut buffer = vec![0u8; AUDIO_FEED_BUFFER_BYTES];
    let mut filled = 0usize;

    while !ctx.cancel.is_cancelled() {
        let read = capture.lock().read(&mut buffer[filled..])?;
        if read == 0 {
            filled = 0;
            std::thread::sleep(AUDIO_IDLE_BACKOFF);
            continue;
        }
        filled += read;

        // Split into whatever input buffers the encoder offers
        let mut consumed = 0usize;
        while consumed < filled && !ctx.cancel.is_cancelled() {
            match encoder.dequeue_input_buffer(INPUT_BUFFER_TIMEOUT)? {
                Some(slot) => {
                    let chunk = (filled - consumed).min(slot.capacity);
                    encoder.queue_input_buffer(
                        slot.id,
                        &buffer[consumed..consumed + chunk],
                        ctx.clock.input_timestamp_us(),
                        BufferFlags::NONE,
                    )?;
                    consumed += chunk;
                    if chunk == 0 {
                        std::thread::yield_now();
                    }
                }
                // The dequeue already waited out its timeout
                None => {}
            }
        }

        // Keep whatever was not consumed for the next read
        buffer.copy_within(consumed..filled, 0);
        filled -= consumed;
    }
    Ok(())
}

/// Drain an encoder's output queue until it reports no more data
///
/// Runs after the loops were cancelled. Never waits for the other track;
/// units that cannot be placed on the timeline are released and counted.
pub fn drain_encoder(
    kind: TrackKind,
    encoder: &dyn HardwareEncoder,
    gate: &MuxerGate,
    clock: &PipelineClock,
    stats: &LoopStats,
) -> u64 {
    let mut written = 0u64;
    loop {
        let (id, info) = match encoder.dequeue_output_buffer(DRAIN_TIMEOUT_AFTER_STOP) {
            Ok(OutputEvent::TryAgainLater) => break,
            Ok(OutputEvent::FormatChanged) => {
                tracing::debug!("Ignoring {} format change while draining", kind);
                continue;
            }
            Ok(OutputEvent::Buffer { id, info }) => (id, info),
            Err(e) => {
                tracing::error!("Failed to drain {} encoder: {}", kind, e);
                break;
            }
        };

        let unit = OutputUnit::new(encoder, kind, id, info);
        let end_of_stream = info.flags.is_end_of_stream();

        if info.flags.is_codec_config() || info.size == 0 {
            if let Err(e) = unit.release() {
                tracing::warn!("Failed to release {} buffer: {}", kind, e);
            }
        } else {
            if clock.record_first_frame(kind, info.presentation_time_us) {
                gate.note_first_frame(kind, info.presentation_time_us);
                clock.resolve_origin();
            }
            match forward_unit(unit, gate, clock) {
                Ok(outcome) => {
                    stats.note(outcome);
                    if outcome == ForwardOutcome::Written {
                        written += 1;
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to write drained {} unit: {}", kind, e);
                    break;
                }
            }
        }

        if end_of_stream {
            break;
        }
    }
    tracing::debug!("Drained {} {} units", written, kind);
    written
}
