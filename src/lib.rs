//! Voice-note player: decodes base64 raw PCM replies from a speech service
//! and plays them with live progress.

pub mod audio;
pub mod config;
pub mod error;
pub mod ui;

pub use audio::engine::PlaybackEngine;
pub use audio::output::{AudioOutput, CpalOutput, SimulatedOutput};
pub use audio::types::{
    DecodedAudioBuffer, EncodedAudioPayload, PcmFormat, PlaybackStatus, ProgressState,
};
pub use config::EngineConfig;
pub use error::{DecodeError, PlaybackError};
