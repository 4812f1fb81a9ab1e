//! Muxer gate
//!
//! Holds the container writer back until both track formats are known, then
//! accepts samples from either encode loop in arrival order.

use super::state::{TrackKind, TrackState};
use crate::codec::{BufferFlags, ContainerWriter, MediaFormat, SampleInfo};
use crate::utils::error::{RecorderError, RecorderResult};
use parking_lot::Mutex;

struct GateState {
    writer: Box<dyn ContainerWriter>,
    video: TrackState,
    audio: TrackState,
    started: bool,
    finished: bool,
    video_samples: u64,
    audio_samples: u64,
}

impl GateState {
    fn track(&self, kind: TrackKind) -> &TrackState {
        match kind {
            TrackKind::Video => &self.video,
            TrackKind::Audio => &self.audio,
        }
    }

    fn track_mut(&mut self, kind: TrackKind) -> &mut TrackState {
        match kind {
            TrackKind::Video => &mut self.video,
            TrackKind::Audio => &mut self.audio,
        }
    }
}

/// Gatekeeper in front of the container writer
///
/// All writer calls happen under one lock, so the start-the-muxer race between
/// the two encode loops has exactly one winner.
pub struct MuxerGate {
    state: Mutex<GateState>,
}

impl MuxerGate {
    pub fn new(writer: Box<dyn ContainerWriter>) -> Self {
        Self {
            state: Mutex::new(GateState {
                writer,
                video: TrackState::default(),
                audio: TrackState::default(),
                started: false,
                finished: false,
                video_samples: 0,
                audio_samples: 0,
            }),
        }
    }

    /// Add the track for `kind`; a second registration returns the first index
    pub fn register_format(&self, kind: TrackKind, format: &MediaFormat) -> RecorderResult<usize> {
        let mut state = self.state.lock();
        if let Some(index) = state.track(kind).muxer_track_index {
            tracing::warn!("{} format already registered as track {}", kind, index);
            return Ok(index);
        }
        if state.started || state.finished {
            return Err(RecorderError::Muxer(format!(
                "cannot add {} track after the muxer started",
                kind
            )));
        }

        let index = state.writer.add_track(format)?;
        let track = state.track_mut(kind);
        track.format_registered = true;
        track.muxer_track_index = Some(index);
        tracing::debug!("{} output format registered. track index: {}; format: {:?}", kind, index, format);
        Ok(index)
    }

    /// Start the writer once both formats are registered
    ///
    /// Safe to call redundantly from either loop. Returns true only for the
    /// call that actually started it.
    pub fn try_start(&self) -> RecorderResult<bool> {
        let mut state = self.state.lock();
        if state.started || state.finished {
            return Ok(false);
        }
        if !(state.video.format_registered && state.audio.format_registered) {
            return Ok(false);
        }
        state.writer.start()?;
        state.started = true;
        tracing::info!("Muxer started");
        Ok(true)
    }

    /// Write one sample; returns false (and writes nothing) before the writer started
    pub fn write_sample(
        &self,
        kind: TrackKind,
        presentation_time_us: i64,
        flags: BufferFlags,
        payload: &[u8],
    ) -> RecorderResult<bool> {
        let mut state = self.state.lock();
        if !state.started || state.finished {
            return Ok(false);
        }
        let Some(index) = state.track(kind).muxer_track_index else {
            return Ok(false);
        };

        let info = SampleInfo {
            size: payload.len(),
            presentation_time_us,
            flags,
        };
        state.writer.write_sample_data(index, payload, &info)?;
        match kind {
            TrackKind::Video => state.video_samples += 1,
            TrackKind::Audio => state.audio_samples += 1,
        }
        Ok(true)
    }

    /// Keep the raw first-frame time alongside the track's muxer state
    pub fn note_first_frame(&self, kind: TrackKind, raw: i64) {
        let mut state = self.state.lock();
        let track = state.track_mut(kind);
        if track.first_frame_time_raw.is_none() {
            track.first_frame_time_raw = Some(raw);
        }
    }

    pub fn is_started(&self) -> bool {
        self.state.lock().started
    }

    pub fn track_state(&self, kind: TrackKind) -> TrackState {
        self.state.lock().track(kind).clone()
    }

    pub fn samples_written(&self, kind: TrackKind) -> u64 {
        let state = self.state.lock();
        match kind {
            TrackKind::Video => state.video_samples,
            TrackKind::Audio => state.audio_samples,
        }
    }

    /// Finalize the file if it was started and release the writer
    ///
    /// Idempotent. Returns whether the writer had been started.
    pub fn finish(&self) -> bool {
        let mut state = self.state.lock();
        if state.finished {
            return state.started;
        }
        state.finished = true;
        if state.started {
            if let Err(e) = state.writer.stop() {
                tracing::error!("Failed to finalize container: {}", e);
            }
        }
        state.writer.release();
        state.started
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::fakes::{FakeWriter, WriterLog};
    use crate::recorder::state::RecordingConfig;
    use std::sync::Arc;

    fn gate() -> (MuxerGate, Arc<parking_lot::Mutex<WriterLog>>) {
        let log = Arc::new(parking_lot::Mutex::new(WriterLog::default()));
        (MuxerGate::new(Box::new(FakeWriter::new(log.clone()))), log)
    }

    fn formats() -> (MediaFormat, MediaFormat) {
        let config = RecordingConfig::default();
        (MediaFormat::video(&config, 1280, 720), MediaFormat::audio(&config))
    }

    #[test]
    fn test_start_requires_both_formats() {
        let (gate, log) = gate();
        let (video, audio) = formats();

        gate.register_format(TrackKind::Audio, &audio).unwrap();
        assert!(!gate.try_start().unwrap());
        assert!(!gate.try_start().unwrap());

        gate.register_format(TrackKind::Video, &video).unwrap();
        assert!(gate.try_start().unwrap());
        assert!(!gate.try_start().unwrap());

        assert_eq!(log.lock().start_calls, 1);
        assert!(gate.is_started());
    }

    #[test]
    fn test_double_registration_keeps_first_index() {
        let (gate, log) = gate();
        let (video, _) = formats();

        let first = gate.register_format(TrackKind::Video, &video).unwrap();
        let second = gate.register_format(TrackKind::Video, &video).unwrap();
        assert_eq!(first, second);
        assert_eq!(log.lock().tracks.len(), 1);
        assert!(gate.track_state(TrackKind::Video).format_registered);
        assert!(!gate.track_state(TrackKind::Audio).format_registered);
    }

    #[test]
    fn test_samples_before_start_are_discarded() {
        let (gate, log) = gate();
        let (video, audio) = formats();

        gate.register_format(TrackKind::Video, &video).unwrap();
        assert!(!gate.write_sample(TrackKind::Video, 0, BufferFlags::KEY_FRAME, b"early").unwrap());

        gate.register_format(TrackKind::Audio, &audio).unwrap();
        gate.try_start().unwrap();
        assert!(gate.write_sample(TrackKind::Video, 10, BufferFlags::NONE, b"late").unwrap());

        let log = log.lock();
        assert_eq!(log.writes_before_start, 0);
        assert_eq!(log.samples.len(), 1);
        assert_eq!(log.samples[0].payload, b"late");
        assert_eq!(gate.samples_written(TrackKind::Video), 1);
    }

    #[test]
    fn test_concurrent_try_start_has_single_winner() {
        let (gate, log) = gate();
        let (video, audio) = formats();
        let gate = Arc::new(gate);

        let handles: Vec<_> = [(TrackKind::Video, video), (TrackKind::Audio, audio)]
            .into_iter()
            .map(|(kind, format)| {
                let gate = gate.clone();
                std::thread::spawn(move || {
                    gate.register_format(kind, &format).unwrap();
                    (0..50).filter(|_| gate.try_start().unwrap()).count()
                })
            })
            .collect();

        let wins: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(wins, 1);
        assert_eq!(log.lock().start_calls, 1);
    }

    #[test]
    fn test_first_frame_time_is_kept_once() {
        let (gate, _log) = gate();
        gate.note_first_frame(TrackKind::Audio, 1500);
        gate.note_first_frame(TrackKind::Audio, 2500);
        assert_eq!(gate.track_state(TrackKind::Audio).first_frame_time_raw, Some(1500));
        assert_eq!(gate.track_state(TrackKind::Video).first_frame_time_raw, None);
    }

    #[test]
    fn test_finish_only_finalizes_started_writer() {
        let (gate, log) = gate();
        assert!(!gate.finish());
        assert!(!gate.finish());
        {
            let log = log.lock();
            assert_eq!(log.stop_calls, 0);
            assert_eq!(log.release_calls, 1);
        }

        let (gate, log) = self::gate();
        let (video, audio) = formats();
        gate.register_format(TrackKind::Video, &video).unwrap();
        gate.register_format(TrackKind::Audio, &audio).unwrap();
        gate.try_start().unwrap();
        assert!(gate.finish());
        assert!(!gate.write_sample(TrackKind::Audio, 0, BufferFlags::NONE, b"x").unwrap());
        let log = log.lock();
        assert_eq!(log.stop_calls, 1);
        assert_eq!(log.release_calls, 1);
    }
}
