//! Pipeline clock and timestamp synchronizer
//!
//! Each hardware encoder numbers its output from whenever its own pipeline
//! began producing data. The first real unit of each track is recorded here;
//! once both are known the calibrated origin is fixed at the earlier of the
//! two and every written timestamp is rebased against it.

use super::state::TrackKind;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
struct ClockState {
    video_first: Option<i64>,
    audio_first: Option<i64>,
    origin: Option<i64>,
    origin_writes: u32,
    origin_resolved_at: Option<Instant>,
    running_since: Option<Instant>,
    running_since_utc: Option<DateTime<Utc>>,
    last_sample_at: Option<Instant>,
}

/// Shared time base of one recording session
#[derive(Debug)]
pub struct PipelineClock {
    state: Mutex<ClockState>,
    first_frames: Notify,
    requested_at: Instant,
}

impl PipelineClock {
    /// Create a clock for a start request made at `requested_at`
    pub fn new(requested_at: Instant) -> Self {
        Self {
            state: Mutex::new(ClockState::default()),
            first_frames: Notify::new(),
            requested_at,
        }
    }

    /// Mark the moment the pipeline entered `Running`
    pub fn mark_running(&self) {
        let mut state = self.state.lock();
        state.running_since = Some(Instant::now());
        state.running_since_utc = Some(Utc::now());
    }

    /// Record the raw timestamp of a track's first real unit
    ///
    /// Returns false if the track already had one.
    pub fn record_first_frame(&self, kind: TrackKind, raw: i64) -> bool {
        let recorded = {
            let mut state = self.state.lock();
            let slot = match kind {
                TrackKind::Video => &mut state.video_first,
                TrackKind::Audio => &mut state.audio_first,
            };
            if slot.is_some() {
                false
            } else {
                *slot = Some(raw);
                true
            }
        };
        if recorded {
            tracing::debug!("First {} frame at {}us", kind, raw);
            self.first_frames.notify_waiters();
        }
        recorded
    }

    pub fn first_frame(&self, kind: TrackKind) -> Option<i64> {
        let state = self.state.lock();
        match kind {
            TrackKind::Video => state.video_first,
            TrackKind::Audio => state.audio_first,
        }
    }

    /// Fix the origin if both first frames are known; first writer wins
    pub fn resolve_origin(&self) -> Option<i64> {
        let mut state = self.state.lock();
        if state.origin.is_some() {
            return state.origin;
        }
        let (video, audio) = (state.video_first?, state.audio_first?);
        let origin = video.min(audio);
        let now = Instant::now();
        state.origin = Some(origin);
        state.origin_writes += 1;
        state.origin_resolved_at = Some(now);
        tracing::debug!(
            "First frame timestamp {}us, video first {}us, audio first {}us",
            origin,
            video,
            audio
        );
        tracing::info!(
            "Starting consumes time: {}ms",
            now.duration_since(self.requested_at).as_millis()
        );
        Some(origin)
    }

    /// Wait until both tracks have a first frame and return the origin
    ///
    /// Holds no lock while waiting. Returns `None` if `cancel` fires first.
    pub async fn wait_for_origin(&self, cancel: &CancellationToken) -> Option<i64> {
        loop {
            let notified = self.first_frames.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(origin) = self.resolve_origin() {
                return Some(origin);
            }

            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = &mut notified => {}
            }
        }
    }

    pub fn origin(&self) -> Option<i64> {
        self.state.lock().origin
    }

    /// Rebase a raw encoder timestamp onto the calibrated timeline
    pub fn rebase(&self, raw: i64) -> Option<i64> {
        self.origin().map(|origin| raw - origin)
    }

    /// Wall-clock microseconds since `Running` began, used to stamp encoder input
    pub fn input_timestamp_us(&self) -> i64 {
        let since = self.state.lock().running_since.unwrap_or(self.requested_at);
        since.elapsed().as_micros() as i64
    }

    pub fn mark_sample_written(&self) {
        self.state.lock().last_sample_at = Some(Instant::now());
    }

    pub fn last_sample_at(&self) -> Option<Instant> {
        self.state.lock().last_sample_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.state.lock().running_since_utc
    }

    /// Time from the start request until the origin was fixed
    pub fn start_latency(&self) -> Option<Duration> {
        self.state
            .lock()
            .origin_resolved_at
            .map(|at| at.duration_since(self.requested_at))
    }

    #[cfg(test)]
    fn origin_writes(&self) -> u32 {
        self.state.lock().origin_writes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_record_first_frame_only_once() {
        let clock = PipelineClock::new(Instant::now());
        assert!(clock.record_first_frame(TrackKind::Video, 1000));
        assert!(!clock.record_first_frame(TrackKind::Video, 2000));
        assert_eq!(clock.first_frame(TrackKind::Video), Some(1000));
        assert_eq!(clock.first_frame(TrackKind::Audio), None);
        assert_eq!(clock.rebase(5000), None);
    }

    #[tokio::test]
    async fn test_origin_is_minimum_of_first_frames() {
        for (video, audio) in [(1000, 1500), (1500, 1000), (-20, 7), (42, 42)] {
            let clock = PipelineClock::new(Instant::now());
            clock.record_first_frame(TrackKind::Video, video);
            clock.record_first_frame(TrackKind::Audio, audio);

            let cancel = CancellationToken::new();
            assert_eq!(clock.wait_for_origin(&cancel).await, Some(video.min(audio)));
            assert_eq!(clock.rebase(video.max(audio)), Some((video - audio).abs()));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_waiters_write_origin_once() {
        let clock = Arc::new(PipelineClock::new(Instant::now()));
        let cancel = CancellationToken::new();

        let video = {
            let clock = clock.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                clock.record_first_frame(TrackKind::Video, 1000);
                clock.wait_for_origin(&cancel).await
            })
        };
        let audio = {
            let clock = clock.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                clock.record_first_frame(TrackKind::Audio, 1500);
                clock.wait_for_origin(&cancel).await
            })
        };

        assert_eq!(video.await.unwrap(), Some(1000));
        assert_eq!(audio.await.unwrap(), Some(1000));
        assert_eq!(clock.origin_writes(), 1);
        assert!(clock.start_latency().is_some());
    }

    #[tokio::test]
    async fn test_wait_returns_none_on_cancel() {
        let clock = PipelineClock::new(Instant::now());
        clock.record_first_frame(TrackKind::Video, 1000);

        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(clock.wait_for_origin(&cancel).await, None);
        assert_eq!(clock.origin(), None);
    }
}
