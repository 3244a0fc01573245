//! Error types for decoding and playing voice notes.

use thiserror::Error;

/// Errors raised while turning a base64 payload into samples.
#[derive(Error, Debug)]
pub enum DecodeError {
    /// The payload is not valid base64.
    #[error("Invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    /// The decoded byte count does not split into whole 16-bit frames.
    #[error("Payload of {len} bytes is not a whole number of {frame_bytes}-byte frames")]
    Misaligned { len: usize, frame_bytes: usize },

    /// The payload decoded to zero bytes.
    #[error("Payload contains no audio")]
    Empty,

    /// The configured format cannot describe any audio.
    #[error("Invalid PCM format: {sample_rate} Hz, {channels} channel(s)")]
    InvalidFormat { sample_rate: u32, channels: u16 },
}

/// Errors raised by transport operations.
#[derive(Error, Debug)]
pub enum PlaybackError {
    #[error("Failed to decode voice note: {0}")]
    Decode(#[from] DecodeError),

    /// `play` was called before any payload was attached.
    #[error("No voice note loaded")]
    NoPayload,

    /// `play` was called after `dispose`.
    #[error("Playback engine has been disposed")]
    Disposed,

    #[error("No audio output device found")]
    NoDevice,

    #[error("Unsupported sample format: {0}")]
    UnsupportedFormat(String),

    /// The output refused to resume, start or stay open.
    #[error("Audio output error: {0}")]
    Output(String),
}
