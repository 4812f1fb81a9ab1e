//! Recording pipeline
//!
//! Owns one recording run end to end: provisions the encoders, capture inputs
//! and container writer, launches the encode and feed loops, and tears
//! everything down in a fixed order on stop.

use super::clock::PipelineClock;
use super::loops::{
    drain_encoder, run_audio_feed_loop, run_encode_loop, LoopContext, LoopStats, AUDIO_CAPTURE_BUFFER_BYTES,
};
use super::muxer::MuxerGate;
use super::state::{RecordingConfig, RecordingState, RecordingSummary, TrackKind};
use crate::capture::{AudioCaptureStream, CaptureSource, DisplayMirror};
use crate::codec::format::{AUDIO_CHANNEL_COUNT, AUDIO_MIME_TYPE, VIDEO_MIME_TYPE};
use crate::codec::{ContainerWriter, HardwareEncoder, MediaBackend, MediaFormat};
use crate::utils::error::{ProvisionStage, RecorderError, RecorderResult};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::runtime::Handle;
use tokio::task::JoinSet;
use tokio_util::sync::{CancellationToken, DropGuard};
use uuid::Uuid;

/// Events emitted during recording
#[derive(Debug, Clone)]
pub enum RecordingEvent {
    /// All three loops are running
    Started { session_id: Uuid },
    /// Teardown finished
    Stopped { session_id: Uuid },
    /// A loop hit a steady-state error; the loops are already cancelled
    Fault { session_id: Uuid, message: String },
}

/// Parameters of one start request
#[derive(Debug, Clone)]
pub struct StartRequest {
    pub target_path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub config: RecordingConfig,
}

/// Resources acquired so far while starting; released in reverse on drop
#[derive(Default)]
struct Provisioning {
    video_encoder: Option<Arc<dyn HardwareEncoder>>,
    video_started: bool,
    mirror: Option<Box<dyn DisplayMirror>>,
    audio_encoder: Option<Arc<dyn HardwareEncoder>>,
    audio_started: bool,
    audio_capture: Option<Box<dyn AudioCaptureStream>>,
    writer: Option<Box<dyn ContainerWriter>>,
}

impl Drop for Provisioning {
    fn drop(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            writer.release();
        }
        if let Some(mut capture) = self.audio_capture.take() {
            capture.stop();
            capture.release();
        }
        if let Some(encoder) = self.audio_encoder.take() {
            if self.audio_started {
                let _ = encoder.stop();
            }
            encoder.release();
        }
        if let Some(mut mirror) = self.mirror.take() {
            mirror.release();
        }
        if let Some(encoder) = self.video_encoder.take() {
            if self.video_started {
                let _ = encoder.stop();
            }
            encoder.release();
        }
    }
}

/// A running pipeline's resources
struct ActiveRecording {
    session_id: Uuid,
    output_path: PathBuf,
    source: Arc<dyn CaptureSource>,
    video_encoder: Arc<dyn HardwareEncoder>,
    audio_encoder: Arc<dyn HardwareEncoder>,
    mirror: Box<dyn DisplayMirror>,
    audio_capture: Arc<Mutex<Box<dyn AudioCaptureStream>>>,
    gate: Arc<MuxerGate>,
    clock: Arc<PipelineClock>,
    stats: Arc<LoopStats>,
    cancel: CancellationToken,
    /// Blocking loop threads outlive an aborted join; stop them if the run is dropped
    _cancel_on_drop: DropGuard,
    tasks: JoinSet<()>,
}

/// Recording lifecycle state machine
///
/// `Idle -> Starting -> Running -> Stopping -> Idle`. A failed start goes
/// straight back to `Idle` with every partially acquired resource released.
pub struct RecordingPipeline {
    backend: Arc<dyn MediaBackend>,

    /// Current recording state
    state: Arc<RwLock<RecordingState>>,

    active: Option<ActiveRecording>,

    /// Event broadcaster
    event_tx: broadcast::Sender<RecordingEvent>,
}

impl RecordingPipeline {
    pub fn new(backend: Arc<dyn MediaBackend>) -> Self {
        let (event_tx, _) = broadcast::channel(100);
        Self {
            backend,
            state: Arc::new(RwLock::new(RecordingState::Idle)),
            active: None,
            event_tx,
        }
    }

    pub fn state(&self) -> RecordingState {
        *self.state.read()
    }

    /// Shared handle for observers that must not wait on the pipeline itself
    pub fn state_handle(&self) -> Arc<RwLock<RecordingState>> {
        self.state.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RecordingEvent> {
        self.event_tx.subscribe()
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.active.as_ref().map(|a| a.session_id)
    }

    /// Provision everything and launch the loops
    pub async fn start(&mut self, request: StartRequest, source: Arc<dyn CaptureSource>) -> RecorderResult<()> {
        {
            let mut state = self.state.write();
            if *state != RecordingState::Idle {
                return Err(RecorderError::AlreadyRunning);
            }
            *state = RecordingState::Starting;
        }

        let requested_at = Instant::now();
        let session_id = Uuid::new_v4();
        tracing::info!(
            "[{}] Starting recording to {} ({}x{}, {:?})",
            session_id,
            request.target_path.display(),
            request.width,
            request.height,
            request.config
        );

        let resources = match request
            .config
            .validate()
            .and_then(|_| self.provision(session_id, &request, source.as_ref()))
        {
            Ok(resources) => resources,
            Err(e) => {
                tracing::error!("[{}] Failed to start recording: {}", session_id, e);
                *self.state.write() = RecordingState::Idle;
                return Err(e);
            }
        };

        let clock = Arc::new(PipelineClock::new(requested_at));
        let gate = Arc::new(MuxerGate::new(resources.writer));
        let stats = Arc::new(LoopStats::default());
        let cancel = CancellationToken::new();
        let audio_capture = Arc::new(Mutex::new(resources.audio_capture));

        let ctx = LoopContext {
            session_id,
            gate: gate.clone(),
            clock: clock.clone(),
            stats: stats.clone(),
            cancel: cancel.clone(),
            events: self.event_tx.clone(),
            runtime: Handle::current(),
        };

        clock.mark_running();
        let mut tasks = JoinSet::new();
        {
            let (encoder, ctx) = (resources.video_encoder.clone(), ctx.clone());
            tasks.spawn_blocking(move || run_encode_loop(TrackKind::Video, encoder, ctx));
        }
        {
            let (encoder, capture, ctx) = (resources.audio_encoder.clone(), audio_capture.clone(), ctx.clone());
            tasks.spawn_blocking(move || run_audio_feed_loop(encoder, capture, ctx));
        }
        {
            let encoder = resources.audio_encoder.clone();
            tasks.spawn_blocking(move || run_encode_loop(TrackKind::Audio, encoder, ctx));
        }

        self.active = Some(ActiveRecording {
            session_id,
            output_path: request.target_path,
            source,
            video_encoder: resources.video_encoder,
            audio_encoder: resources.audio_encoder,
            mirror: resources.mirror,
            audio_capture,
            gate,
            clock,
            stats,
            _cancel_on_drop: cancel.clone().drop_guard(),
            cancel,
            tasks,
        });

        *self.state.write() = RecordingState::Running;
        let _ = self.event_tx.send(RecordingEvent::Started { session_id });
        tracing::info!("[{}] Encoding loops launched", session_id);
        Ok(())
    }

    fn provision(
        &self,
        session_id: Uuid,
        request: &StartRequest,
        source: &dyn CaptureSource,
    ) -> RecorderResult<Provisioned> {
        let config = &request.config;
        let mut acquired = Provisioning::default();

        // Video: encoder, mirror into its input surface, start
        let video_format = MediaFormat::video(config, request.width, request.height);
        let video_encoder = self
            .backend
            .create_encoder(VIDEO_MIME_TYPE)
            .map_err(|e| RecorderError::provisioning(ProvisionStage::VideoEncoder, e))?;
        acquired.video_encoder = Some(video_encoder.clone());
        video_encoder
            .configure(&video_format)
            .map_err(|e| RecorderError::provisioning(ProvisionStage::VideoEncoder, e))?;

        let mirror = source
            .create_encoder_input_surface(video_encoder.as_ref(), request.width, request.height)
            .map_err(|e| RecorderError::provisioning(ProvisionStage::InputSurface, e))?;
        acquired.mirror = Some(mirror);

        video_encoder
            .start()
            .map_err(|e| RecorderError::provisioning(ProvisionStage::VideoEncoder, e))?;
        acquired.video_started = true;
        tracing::debug!("[{}] Video encoder started: {:?}", session_id, video_format);

        // Audio: encoder, start, device capture
        let audio_format = MediaFormat::audio(config);
        let audio_encoder = self
            .backend
            .create_encoder(AUDIO_MIME_TYPE)
            .map_err(|e| RecorderError::provisioning(ProvisionStage::AudioEncoder, e))?;
        acquired.audio_encoder = Some(audio_encoder.clone());
        audio_encoder
            .configure(&audio_format)
            .and_then(|_| audio_encoder.start())
            .map_err(|e| RecorderError::provisioning(ProvisionStage::AudioEncoder, e))?;
        acquired.audio_started = true;
        tracing::debug!("[{}] Audio encoder started: {:?}", session_id, audio_format);

        let audio_capture = source
            .open_audio_capture_stream(config.audio_sample_rate, AUDIO_CHANNEL_COUNT, AUDIO_CAPTURE_BUFFER_BYTES)
            .map_err(|e| RecorderError::provisioning(ProvisionStage::AudioCapture, e))?;
        acquired.audio_capture = Some(audio_capture);
        tracing::debug!("[{}] Audio capture started", session_id);

        let writer = self
            .backend
            .create_container_writer(&request.target_path)
            .map_err(|e| RecorderError::provisioning(ProvisionStage::ContainerWriter, e))?;
        acquired.writer = Some(writer);
        tracing::debug!("[{}] Container writer created", session_id);

        Provisioned::take(&mut acquired).ok_or_else(|| {
            RecorderError::Configuration("pipeline resources incomplete after provisioning".to_string())
        })
    }

    /// Stop the pipeline and finalize the container
    ///
    /// Returns `None` without side effects unless the pipeline is `Running`.
    pub async fn stop(&mut self) -> Option<RecordingSummary> {
        {
            let mut state = self.state.write();
            if *state != RecordingState::Running {
                tracing::debug!("Stop ignored in state {:?}", *state);
                return None;
            }
            *state = RecordingState::Stopping;
        }
        let Some(mut active) = self.active.take() else {
            *self.state.write() = RecordingState::Idle;
            return None;
        };

        let session_id = active.session_id;
        let stop_requested = Instant::now();
        tracing::info!("[{}] Stopping recording", session_id);

        active.cancel.cancel();
        while let Some(result) = active.tasks.join_next().await {
            if let Err(e) = result {
                tracing::error!("[{}] Recording loop ended abnormally: {}", session_id, e);
            }
        }

        active.mirror.release();
        active.source.stop();
        active.audio_capture.lock().stop();

        if let Err(e) = active.video_encoder.signal_end_of_input_stream() {
            tracing::warn!("[{}] Failed to signal video end of stream: {}", session_id, e);
        }

        let drained = {
            let (video, audio) = (active.video_encoder.clone(), active.audio_encoder.clone());
            let (gate, clock, stats) = (active.gate.clone(), active.clock.clone(), active.stats.clone());
            tokio::task::spawn_blocking(move || {
                drain_encoder(TrackKind::Video, video.as_ref(), &gate, &clock, &stats)
                    + drain_encoder(TrackKind::Audio, audio.as_ref(), &gate, &clock, &stats)
            })
            .await
        };
        if let Err(e) = drained {
            tracing::error!("[{}] Drain task failed: {}", session_id, e);
        }
        let drained_at = Instant::now();

        let stop_latency = active
            .clock
            .last_sample_at()
            .filter(|at| *at >= stop_requested)
            .unwrap_or(drained_at)
            .duration_since(stop_requested);
        tracing::info!("[{}] Stopping consumes time: {}ms", session_id, stop_latency.as_millis());

        active.audio_capture.lock().release();
        let muxer_started = active.gate.finish();

        for (kind, encoder) in [
            (TrackKind::Video, &active.video_encoder),
            (TrackKind::Audio, &active.audio_encoder),
        ] {
            if let Err(e) = encoder.stop() {
                tracing::warn!("[{}] Failed to stop {} encoder: {}", session_id, kind, e);
            }
            encoder.release();
        }

        let summary = RecordingSummary {
            session_id,
            output_path: active.output_path,
            started_at: active.clock.started_at().unwrap_or_else(Utc::now),
            stopped_at: Utc::now(),
            start_latency_ms: active.clock.start_latency().map(millis),
            stop_latency_ms: Some(millis(stop_latency)),
            video_samples: active.gate.samples_written(TrackKind::Video),
            audio_samples: active.gate.samples_written(TrackKind::Audio),
            dropped_negative_keyframes: active.stats.dropped_negative_keyframes(),
            muxer_started,
        };

        *self.state.write() = RecordingState::Idle;
        let _ = self.event_tx.send(RecordingEvent::Stopped { session_id });
        tracing::info!(
            "[{}] Recording stopped. video samples: {}; audio samples: {}",
            session_id,
            summary.video_samples,
            summary.audio_samples
        );
        Some(summary)
    }

    pub fn output_path(&self) -> Option<&Path> {
        self.active.as_ref().map(|a| a.output_path.as_path())
    }
}

fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

/// Fully provisioned resources handed over to the running pipeline
struct Provisioned {
    video_encoder: Arc<dyn HardwareEncoder>,
    mirror: Box<dyn DisplayMirror>,
    audio_encoder: Arc<dyn HardwareEncoder>,
    audio_capture: Box<dyn AudioCaptureStream>,
    writer: Box<dyn ContainerWriter>,
}

impl Provisioned {
    /// Move everything out of `acquired` if every resource is present
    fn take(acquired: &mut Provisioning) -> Option<Self> {
        let complete = acquired.video_encoder.is_some()
            && acquired.mirror.is_some()
            && acquired.audio_encoder.is_some()
            && acquired.audio_capture.is_some()
            && acquired.writer.is_some();
        if !complete {
            return None;
        }
        Some(Self {
            video_encoder: acquired.video_encoder.take()?,
            mirror: acquired.mirror.take()?,
            audio_encoder: acquired.audio_encoder.take()?,
            audio_capture: acquired.audio_capture.take()?,
            writer: acquired.writer.take()?,
        })
    }
}
