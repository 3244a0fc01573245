use std::fmt;
use std::sync::Arc;

/// Base64 text of a raw PCM voice note, as delivered by the speech service.
///
/// Cloning shares the underlying text.
#[derive(Clone, PartialEq, Eq)]
pub struct EncodedAudioPayload(Arc<str>);

impl EncodedAudioPayload {
    pub fn new(text: impl Into<Arc<str>>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when both handles refer to the same payload.
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.0 == other.0
    }
}

impl From<String> for EncodedAudioPayload {
    fn from(text: String) -> Self {
        Self::new(text)
    }
}

impl From<&str> for EncodedAudioPayload {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl fmt::Debug for EncodedAudioPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Payloads run to hundreds of kilobytes.
        write!(f, "EncodedAudioPayload({} chars)", self.0.len())
    }
}

/// Out-of-band description of a headerless 16-bit PCM payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl PcmFormat {
    /// Format produced by the speech service: 24 kHz mono.
    pub const VOICE_NOTE: Self = Self::new(24_000, 1);

    pub const fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    /// Bytes occupied by one frame (one 16-bit sample per channel).
    pub fn bytes_per_frame(&self) -> usize {
        2 * self.channels as usize
    }
}

impl Default for PcmFormat {
    fn default() -> Self {
        Self::VOICE_NOTE
    }
}

/// Decoded audio held entirely in memory, one sample array per channel.
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedAudioBuffer {
    /// Samples normalized to [-1.0, 1.0], indexed `[channel][frame]`.
    channels: Vec<Vec<f32>>,
    pub sample_rate: u32,
    /// Duration in seconds.
    pub duration: f64,
}

impl DecodedAudioBuffer {
    pub fn new(channels: Vec<Vec<f32>>, sample_rate: u32) -> Self {
        let frames = channels.first().map_or(0, Vec::len);
        debug_assert!(channels.iter().all(|c| c.len() == frames));
        let duration = if sample_rate == 0 {
            0.0
        } else {
            frames as f64 / sample_rate as f64
        };
        Self {
            channels,
            sample_rate,
            duration,
        }
    }

    pub fn channel_count(&self) -> u16 {
        self.channels.len() as u16
    }

    /// Total number of frames (samples per channel).
    pub fn num_frames(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    pub fn channel(&self, index: usize) -> &[f32] {
        &self.channels[index]
    }
}

/// Observable playback progress.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ProgressState {
    /// Elapsed share of the buffer, 0.0 to 1.0.
    pub elapsed_fraction: f64,
    pub is_playing: bool,
}

impl ProgressState {
    pub fn playing(elapsed_fraction: f64) -> Self {
        Self {
            elapsed_fraction,
            is_playing: true,
        }
    }

    pub fn finished() -> Self {
        Self {
            elapsed_fraction: 1.0,
            is_playing: false,
        }
    }
}

/// Current engine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackStatus {
    Idle,
    Decoding,
    Playing,
    Stopped,
    Disposed,
}

/// Handle of one scheduled playback on an audio output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceId(pub u64);
