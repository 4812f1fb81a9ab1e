//! Scripted stand-ins for the platform collaborators, used by unit tests

use crate::capture::{AudioCaptureStream, AuthorizationBroker, AuthorizationOutcome, CaptureSource, DisplayMirror};
use crate::codec::{
    BufferFlags, BufferId, BufferInfo, ContainerWriter, HardwareEncoder, InputSlot, MediaBackend, MediaFormat,
    OutputEvent, SampleInfo,
};
use crate::codec::format::{AUDIO_MIME_TYPE, VIDEO_MIME_TYPE};
use crate::recorder::state::TrackKind;
use crate::utils::error::{RecorderError, RecorderResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One scripted answer of an encoder's output queue
#[derive(Debug, Clone)]
pub enum Step {
    Format,
    Unit { pts: i64, flags: BufferFlags },
    TryAgain,
    Fail(String),
}

impl Step {
    pub fn unit(pts: i64) -> Self {
        Step::Unit { pts, flags: BufferFlags::NONE }
    }

    pub fn key(pts: i64) -> Self {
        Step::Unit { pts, flags: BufferFlags::KEY_FRAME }
    }

    pub fn config() -> Self {
        Step::Unit { pts: 0, flags: BufferFlags::CODEC_CONFIG }
    }
}

#[derive(Debug, Default)]
pub struct EncoderLog {
    pub configured: Option<MediaFormat>,
    pub start_calls: u32,
    pub stop_calls: u32,
    pub release_calls: u32,
    pub eos_signaled: bool,
    pub released_buffers: Vec<usize>,
    /// Dequeues issued while an earlier output buffer was still borrowed
    pub dequeues_while_borrowed: u32,
    /// (length, presentation time) of every queued input buffer
    pub input_chunks: Vec<(usize, i64)>,
}

struct EncoderInner {
    script: VecDeque<Step>,
    after_eos: VecDeque<Step>,
    outstanding: HashMap<usize, Vec<u8>>,
    next_id: usize,
    input_capacity: Option<usize>,
    fail_start: bool,
    /// Wait out the whole timeout on an empty queue, like a real codec
    full_timeouts: bool,
    log: EncoderLog,
}

pub struct FakeEncoder {
    kind: TrackKind,
    inner: Mutex<EncoderInner>,
}

impl FakeEncoder {
    pub fn new(kind: TrackKind, script: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            kind,
            inner: Mutex::new(EncoderInner {
                script: script.into(),
                after_eos: VecDeque::new(),
                outstanding: HashMap::new(),
                next_id: 0,
                input_capacity: Some(1024),
                fail_start: false,
                full_timeouts: false,
                log: EncoderLog::default(),
            }),
        })
    }

    /// Steps that only become visible once end-of-stream was signaled
    pub fn with_after_eos(self: Arc<Self>, steps: Vec<Step>) -> Arc<Self> {
        self.inner.lock().after_eos = steps.into();
        self
    }

    pub fn with_input_capacity(self: Arc<Self>, capacity: Option<usize>) -> Arc<Self> {
        self.inner.lock().input_capacity = capacity;
        self
    }

    pub fn failing_start(self: Arc<Self>) -> Arc<Self> {
        self.inner.lock().fail_start = true;
        self
    }

    pub fn with_full_timeouts(self: Arc<Self>) -> Arc<Self> {
        self.inner.lock().full_timeouts = true;
        self
    }

    fn idle(&self, timeout: Duration) {
        let full = self.inner.lock().full_timeouts;
        std::thread::sleep(if full { timeout } else { timeout.min(Duration::from_millis(1)) });
    }

    pub fn push(&self, step: Step) {
        self.inner.lock().script.push_back(step);
    }

    pub fn log<R>(&self, f: impl FnOnce(&EncoderLog) -> R) -> R {
        f(&self.inner.lock().log)
    }

    pub fn outstanding(&self) -> usize {
        self.inner.lock().outstanding.len()
    }
}

impl HardwareEncoder for FakeEncoder {
    fn configure(&self, format: &MediaFormat) -> RecorderResult<()> {
        self.inner.lock().log.configured = Some(format.clone());
        Ok(())
    }

    fn start(&self) -> RecorderResult<()> {
        let mut inner = self.inner.lock();
        if inner.fail_start {
            return Err(RecorderError::Encoder(format!("{} encoder failed to start", self.kind)));
        }
        inner.log.start_calls += 1;
        Ok(())
    }

    fn dequeue_input_buffer(&self, timeout: Duration) -> RecorderResult<Option<InputSlot>> {
        let capacity = self.inner.lock().input_capacity;
        match capacity {
            Some(capacity) => Ok(Some(InputSlot { id: BufferId(0), capacity })),
            None => {
                self.idle(timeout);
                Ok(None)
            }
        }
    }

    fn queue_input_buffer(
        &self,
        _id: BufferId,
        data: &[u8],
        presentation_time_us: i64,
        _flags: BufferFlags,
    ) -> RecorderResult<()> {
        self.inner.lock().log.input_chunks.push((data.len(), presentation_time_us));
        Ok(())
    }

    fn dequeue_output_buffer(&self, timeout: Duration) -> RecorderResult<OutputEvent> {
        let step = {
            let mut inner = self.inner.lock();
            if !inner.outstanding.is_empty() {
                inner.log.dequeues_while_borrowed += 1;
            }
            let step = inner.script.pop_front();
            if step.is_none() && inner.log.eos_signaled {
                inner.after_eos.pop_front()
            } else {
                step
            }
        };

        match step {
            None => {
                self.idle(timeout);
                Ok(OutputEvent::TryAgainLater)
            }
            Some(Step::TryAgain) => Ok(OutputEvent::TryAgainLater),
            Some(Step::Format) => Ok(OutputEvent::FormatChanged),
            Some(Step::Fail(message)) => Err(RecorderError::Encoder(message)),
            Some(Step::Unit { pts, flags }) => {
                let mut inner = self.inner.lock();
                let id = inner.next_id;
                inner.next_id += 1;
                let payload = pts.to_le_bytes().to_vec();
                let size = payload.len();
                inner.outstanding.insert(id, payload);
                Ok(OutputEvent::Buffer {
                    id: BufferId(id),
                    info: BufferInfo {
                        offset: 0,
                        size,
                        presentation_time_us: pts,
                        flags,
                    },
                })
            }
        }
    }

    fn output_format(&self) -> RecorderResult<MediaFormat> {
        let mut format = self
            .inner
            .lock()
            .log
            .configured
            .clone()
            .ok_or_else(|| RecorderError::Encoder("not configured".into()))?;
        format.codec_specific_data = vec![vec![self.kind as u8]];
        Ok(format)
    }

    fn read_output_buffer(&self, id: BufferId, reader: &mut dyn FnMut(&[u8])) -> RecorderResult<()> {
        let inner = self.inner.lock();
        let payload = inner
            .outstanding
            .get(&id.0)
            .ok_or_else(|| RecorderError::Encoder(format!("buffer {} not dequeued", id.0)))?;
        reader(payload);
        Ok(())
    }

    fn release_output_buffer(&self, id: BufferId) -> RecorderResult<()> {
        let mut inner = self.inner.lock();
        if inner.outstanding.remove(&id.0).is_none() {
            return Err(RecorderError::Encoder(format!("buffer {} released twice", id.0)));
        }
        inner.log.released_buffers.push(id.0);
        Ok(())
    }

    fn signal_end_of_input_stream(&self) -> RecorderResult<()> {
        self.inner.lock().log.eos_signaled = true;
        Ok(())
    }

    fn stop(&self) -> RecorderResult<()> {
        self.inner.lock().log.stop_calls += 1;
        Ok(())
    }

    fn release(&self) {
        self.inner.lock().log.release_calls += 1;
    }
}

#[derive(Debug, Clone)]
pub struct WrittenSample {
    pub track_index: usize,
    pub presentation_time_us: i64,
    pub flags: BufferFlags,
    pub payload: Vec<u8>,
}

#[derive(Debug, Default)]
pub struct WriterLog {
    pub path: Option<PathBuf>,
    pub tracks: Vec<MediaFormat>,
    pub start_calls: u32,
    pub samples: Vec<WrittenSample>,
    pub writes_before_start: u32,
    pub stop_calls: u32,
    pub release_calls: u32,
}

impl WriterLog {
    /// Presentation times written to the track registered for `kind`
    pub fn timestamps(&self, kind: TrackKind) -> Vec<i64> {
        let Some(index) = self.tracks.iter().position(|f| f.kind() == kind) else {
            return Vec::new();
        };
        self.samples
            .iter()
            .filter(|s| s.track_index == index)
            .map(|s| s.presentation_time_us)
            .collect()
    }
}

pub struct FakeWriter {
    log: Arc<Mutex<WriterLog>>,
    started: bool,
    fail_writes: bool,
}

impl FakeWriter {
    pub fn new(log: Arc<Mutex<WriterLog>>) -> Self {
        Self {
            log,
            started: false,
            fail_writes: false,
        }
    }
}

impl ContainerWriter for FakeWriter {
    fn add_track(&mut self, format: &MediaFormat) -> RecorderResult<usize> {
        let mut log = self.log.lock();
        log.tracks.push(format.clone());
        Ok(log.tracks.len() - 1)
    }

    fn start(&mut self) -> RecorderResult<()> {
        self.started = true;
        self.log.lock().start_calls += 1;
        Ok(())
    }

    fn write_sample_data(&mut self, track_index: usize, data: &[u8], info: &SampleInfo) -> RecorderResult<()> {
        let mut log = self.log.lock();
        if !self.started {
            log.writes_before_start += 1;
            return Err(RecorderError::Muxer("write before start".into()));
        }
        if self.fail_writes {
            return Err(RecorderError::Muxer("disk full".into()));
        }
        log.samples.push(WrittenSample {
            track_index,
            presentation_time_us: info.presentation_time_us,
            flags: info.flags,
            payload: data.to_vec(),
        });
        Ok(())
    }

    fn stop(&mut self) -> RecorderResult<()> {
        self.log.lock().stop_calls += 1;
        Ok(())
    }

    fn release(&mut self) {
        self.log.lock().release_calls += 1;
    }
}

#[derive(Debug, Default)]
pub struct CaptureLog {
    pub surfaces_created: u32,
    pub surfaces_released: u32,
    pub audio_streams_opened: u32,
    pub audio_stops: u32,
    pub audio_releases: u32,
    pub stop_calls: u32,
}

struct FakeMirror {
    log: Arc<Mutex<CaptureLog>>,
}

impl DisplayMirror for FakeMirror {
    fn release(&mut self) {
        self.log.lock().surfaces_released += 1;
    }
}

/// Produces `chunk` bytes per read until `budget` bytes were handed out
struct FakeAudioStream {
    log: Arc<Mutex<CaptureLog>>,
    chunk: usize,
    budget: usize,
}

impl AudioCaptureStream for FakeAudioStream {
    fn read(&mut self, buf: &mut [u8]) -> RecorderResult<usize> {
        let n = self.chunk.min(self.budget).min(buf.len());
        buf[..n].fill(0x11);
        self.budget -= n;
        Ok(n)
    }

    fn stop(&mut self) {
        self.log.lock().audio_stops += 1;
    }

    fn release(&mut self) {
        self.log.lock().audio_releases += 1;
    }
}

pub struct FakeCapture {
    pub log: Arc<Mutex<CaptureLog>>,
    audio_chunk: usize,
    audio_budget: usize,
    fail_audio: bool,
}

impl FakeCapture {
    pub fn new() -> Arc<Self> {
        Self::with_audio(0, 0)
    }

    pub fn with_audio(chunk: usize, budget: usize) -> Arc<Self> {
        Arc::new(Self {
            log: Arc::new(Mutex::new(CaptureLog::default())),
            audio_chunk: chunk,
            audio_budget: budget,
            fail_audio: false,
        })
    }

    pub fn failing_audio() -> Arc<Self> {
        Arc::new(Self {
            log: Arc::new(Mutex::new(CaptureLog::default())),
            audio_chunk: 0,
            audio_budget: 0,
            fail_audio: true,
        })
    }
}

impl CaptureSource for FakeCapture {
    fn create_encoder_input_surface(
        &self,
        _encoder: &dyn HardwareEncoder,
        _width: u32,
        _height: u32,
    ) -> RecorderResult<Box<dyn DisplayMirror>> {
        self.log.lock().surfaces_created += 1;
        Ok(Box::new(FakeMirror { log: self.log.clone() }))
    }

    fn open_audio_capture_stream(
        &self,
        _sample_rate: u32,
        _channels: u16,
        _buffer_bytes: usize,
    ) -> RecorderResult<Box<dyn AudioCaptureStream>> {
        if self.fail_audio {
            return Err(RecorderError::Capture("playback capture unavailable".into()));
        }
        self.log.lock().audio_streams_opened += 1;
        Ok(Box::new(FakeAudioStream {
            log: self.log.clone(),
            chunk: self.audio_chunk,
            budget: self.audio_budget,
        }))
    }

    fn stop(&self) {
        self.log.lock().stop_calls += 1;
    }
}

pub struct FakeBackend {
    pub video: Arc<FakeEncoder>,
    pub audio: Arc<FakeEncoder>,
    pub writer: Arc<Mutex<WriterLog>>,
    pub encoders_created: Mutex<u32>,
    pub fail_writer: bool,
    pub fail_writes: bool,
}

impl FakeBackend {
    pub fn new(video: Arc<FakeEncoder>, audio: Arc<FakeEncoder>) -> Arc<Self> {
        Self::build(video, audio, false, false)
    }

    pub fn build(video: Arc<FakeEncoder>, audio: Arc<FakeEncoder>, fail_writer: bool, fail_writes: bool) -> Arc<Self> {
        Arc::new(Self {
            video,
            audio,
            writer: Arc::new(Mutex::new(WriterLog::default())),
            encoders_created: Mutex::new(0),
            fail_writer,
            fail_writes,
        })
    }
}

impl MediaBackend for FakeBackend {
    fn create_encoder(&self, mime: &str) -> RecorderResult<Arc<dyn HardwareEncoder>> {
        *self.encoders_created.lock() += 1;
        match mime {
            VIDEO_MIME_TYPE => Ok(self.video.clone()),
            AUDIO_MIME_TYPE => Ok(self.audio.clone()),
            other => Err(RecorderError::Encoder(format!("no encoder for {}", other))),
        }
    }

    fn create_container_writer(&self, path: &Path) -> RecorderResult<Box<dyn ContainerWriter>> {
        if self.fail_writer {
            return Err(RecorderError::Muxer("cannot open output".into()));
        }
        self.writer.lock().path = Some(path.to_path_buf());
        let mut writer = FakeWriter::new(self.writer.clone());
        writer.fail_writes = self.fail_writes;
        Ok(Box::new(writer))
    }
}

/// Broker answering from a script; `None` never answers
pub struct FakeBroker {
    script: Mutex<VecDeque<Option<AuthorizationOutcome>>>,
    pub requests: Mutex<u32>,
}

impl FakeBroker {
    pub fn new(script: Vec<Option<AuthorizationOutcome>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(0),
        })
    }
}

#[async_trait]
impl AuthorizationBroker for FakeBroker {
    async fn request_authorization(&self) -> AuthorizationOutcome {
        *self.requests.lock() += 1;
        let next = self.script.lock().pop_front().flatten();
        match next {
            Some(outcome) => outcome,
            None => std::future::pending().await,
        }
    }
}

/// Poll `condition` until it holds or `timeout` elapses
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    condition()
}
