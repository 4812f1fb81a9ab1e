//! Recording state management
//!
//! Defines the lifecycle state machine states, per-track bookkeeping and the
//! per-session recording configuration.

use crate::utils::error::{RecorderError, RecorderResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Current state of the recording pipeline
///
/// A stopped pipeline collapses back to `Idle`; there is no separate stopped state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingState {
    /// No recording in progress
    Idle,
    /// Provisioning encoders, capture inputs and the container writer
    Starting,
    /// Encode and feed loops are running
    Running,
    /// Loops cancelled, encoders draining
    Stopping,
}

impl Default for RecordingState {
    fn default() -> Self {
        Self::Idle
    }
}

/// Media kind of a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Video,
    Audio,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKind::Video => write!(f, "video"),
            TrackKind::Audio => write!(f, "audio"),
        }
    }
}

/// Per-track bookkeeping shared between an encode loop and the muxer gate
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackState {
    /// Whether the encoder's output format was added to the container
    pub format_registered: bool,

    /// Track index handed out by the container writer
    pub muxer_track_index: Option<usize>,

    /// Raw presentation time of the first real (non-config) unit
    pub first_frame_time_raw: Option<i64>,
}

fn default_video_bit_rate() -> u32 {
    20_000_000
}

fn default_video_frame_rate() -> u32 {
    60
}

fn default_audio_sample_rate() -> u32 {
    44_100
}

fn default_audio_bit_rate() -> u32 {
    128_000
}

/// Encoding parameters for one recording session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingConfig {
    /// Video bit rate in bits per second
    #[serde(default = "default_video_bit_rate")]
    pub video_bit_rate: u32,

    /// Video frame rate in frames per second
    #[serde(default = "default_video_frame_rate")]
    pub video_frame_rate: u32,

    /// Audio sample rate in Hz
    #[serde(default = "default_audio_sample_rate")]
    pub audio_sample_rate: u32,

    /// Audio bit rate in bits per second
    #[serde(default = "default_audio_bit_rate")]
    pub audio_bit_rate: u32,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            video_bit_rate: default_video_bit_rate(),
            video_frame_rate: default_video_frame_rate(),
            audio_sample_rate: default_audio_sample_rate(),
            audio_bit_rate: default_audio_bit_rate(),
        }
    }
}

impl RecordingConfig {
    /// Load a config from a JSON file; missing fields take their defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> RecorderResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: RecordingConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values no encoder can be configured with
    pub fn validate(&self) -> RecorderResult<()> {
        let checks = [
            ("videoBitRate", self.video_bit_rate),
            ("videoFrameRate", self.video_frame_rate),
            ("audioSampleRate", self.audio_sample_rate),
            ("audioBitRate", self.audio_bit_rate),
        ];
        for (name, value) in checks {
            if value == 0 {
                return Err(RecorderError::Configuration(format!(
                    "{} must be greater than zero",
                    name
                )));
            }
        }
        Ok(())
    }
}

/// Result of a completed recording
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingSummary {
    /// Identifier of the pipeline run
    pub session_id: Uuid,

    /// Path of the container file
    pub output_path: PathBuf,

    /// When the pipeline entered `Running`
    pub started_at: DateTime<Utc>,

    /// When teardown finished
    pub stopped_at: DateTime<Utc>,

    /// Time from the start request until the calibrated origin was known
    pub start_latency_ms: Option<f64>,

    /// Time from the stop request until the last sample was written
    pub stop_latency_ms: Option<f64>,

    pub video_samples: u64,
    pub audio_samples: u64,
    pub dropped_negative_keyframes: u64,

    /// Whether the container writer was ever started (and so finalized)
    pub muxer_started: bool,
}

/// Status shown to the user by the control surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RecordStatus {
    NotStarted,
    Recording,
    Denied,
    PermanentlyDenied,
    Completed,
}

impl Default for RecordStatus {
    fn default() -> Self {
        Self::NotStarted
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordStatus::NotStarted => write!(f, "not started"),
            RecordStatus::Recording => write!(f, "recording"),
            RecordStatus::Denied => write!(f, "permission denied"),
            RecordStatus::PermanentlyDenied => write!(f, "permission permanently denied"),
            RecordStatus::Completed => write!(f, "completed"),
        }
    }
}
