//! Media formats and buffer metadata exchanged with hardware codecs

use crate::recorder::state::{RecordingConfig, TrackKind};
use serde::{Deserialize, Serialize};
use std::ops::{BitOr, BitOrAssign};

/// H.264 elementary stream
pub const VIDEO_MIME_TYPE: &str = "video/avc";

/// AAC elementary stream
pub const AUDIO_MIME_TYPE: &str = "audio/mp4a-latm";

/// Seconds between forced keyframes
pub const VIDEO_I_FRAME_INTERVAL_SECS: u32 = 2;

/// Screen audio is captured and encoded mono
pub const AUDIO_CHANNEL_COUNT: u16 = 1;

/// Flags attached to an encoded buffer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BufferFlags(u32);

impl BufferFlags {
    pub const NONE: BufferFlags = BufferFlags(0);
    pub const KEY_FRAME: BufferFlags = BufferFlags(1);
    pub const CODEC_CONFIG: BufferFlags = BufferFlags(1 << 1);
    pub const END_OF_STREAM: BufferFlags = BufferFlags(1 << 2);

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: BufferFlags) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    pub fn is_key_frame(self) -> bool {
        self.contains(Self::KEY_FRAME)
    }

    pub fn is_codec_config(self) -> bool {
        self.contains(Self::CODEC_CONFIG)
    }

    pub fn is_end_of_stream(self) -> bool {
        self.contains(Self::END_OF_STREAM)
    }
}

impl BitOr for BufferFlags {
    type Output = BufferFlags;

    fn bitor(self, rhs: BufferFlags) -> BufferFlags {
        BufferFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for BufferFlags {
    fn bitor_assign(&mut self, rhs: BufferFlags) {
        self.0 |= rhs.0;
    }
}

/// Metadata of a dequeued output buffer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferInfo {
    pub offset: usize,
    pub size: usize,
    pub presentation_time_us: i64,
    pub flags: BufferFlags,
}

/// Sample metadata handed to the container writer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleInfo {
    pub size: usize,
    /// Presentation time relative to the calibrated origin
    pub presentation_time_us: i64,
    pub flags: BufferFlags,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ColorFormat {
    /// Frames arrive through an encoder-owned drawing surface
    Surface,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AacProfile {
    Lc,
}

/// Kind-specific encoder parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum FormatParams {
    Video {
        width: u32,
        height: u32,
        bit_rate: u32,
        frame_rate: u32,
        i_frame_interval: u32,
        color_format: ColorFormat,
    },
    Audio {
        sample_rate: u32,
        channel_count: u16,
        bit_rate: u32,
        aac_profile: AacProfile,
    },
}

/// Format description used to configure an encoder or add a container track
///
/// Encoders report their output format (with codec specific data filled in)
/// once it is known; that is the format registered with the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaFormat {
    pub mime: String,
    pub params: FormatParams,
    #[serde(default)]
    pub codec_specific_data: Vec<Vec<u8>>,
}

impl MediaFormat {
    pub fn video(config: &RecordingConfig, width: u32, height: u32) -> Self {
        Self {
            mime: VIDEO_MIME_TYPE.to_string(),
            params: FormatParams::Video {
                width,
                height,
                bit_rate: config.video_bit_rate,
                frame_rate: config.video_frame_rate,
                i_frame_interval: VIDEO_I_FRAME_INTERVAL_SECS,
                color_format: ColorFormat::Surface,
            },
            codec_specific_data: Vec::new(),
        }
    }

    pub fn audio(config: &RecordingConfig) -> Self {
        Self {
            mime: AUDIO_MIME_TYPE.to_string(),
            params: FormatParams::Audio {
                sample_rate: config.audio_sample_rate,
                channel_count: AUDIO_CHANNEL_COUNT,
                bit_rate: config.audio_bit_rate,
                aac_profile: AacProfile::Lc,
            },
            codec_specific_data: Vec::new(),
        }
    }

    pub fn kind(&self) -> TrackKind {
        match self.params {
            FormatParams::Video { .. } => TrackKind::Video,
            FormatParams::Audio { .. } => TrackKind::Audio,
        }
    }
}
