use std::sync::Arc;

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine as _;
use symphonia::core::conv::IntoSample;
use tracing::debug;

use super::types::{DecodedAudioBuffer, EncodedAudioPayload, PcmFormat};
use crate::error::DecodeError;

/// Standard alphabet, padding optional, lenient about trailing bits.
const PAYLOAD_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// Decode a base64 payload of raw little-endian 16-bit PCM.
///
/// Interleaved frames are split into one array per channel and every sample
/// is scaled by 1/32768, so -32768 maps to exactly -1.0.
pub fn decode_payload(
    payload: &EncodedAudioPayload,
    format: PcmFormat,
) -> Result<DecodedAudioBuffer, DecodeError> {
    if format.channels == 0 || format.sample_rate == 0 {
        return Err(DecodeError::InvalidFormat {
            sample_rate: format.sample_rate,
            channels: format.channels,
        });
    }

    let bytes = decode_base64(payload.as_str())?;
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }

    let frame_bytes = format.bytes_per_frame();
    if bytes.len() % frame_bytes != 0 {
        return Err(DecodeError::Misaligned {
            len: bytes.len(),
            frame_bytes,
        });
    }

    let channel_count = format.channels as usize;
    let num_frames = bytes.len() / frame_bytes;
    let mut channels: Vec<Vec<f32>> = vec![Vec::with_capacity(num_frames); channel_count];

    for frame in bytes.chunks_exact(frame_bytes) {
        for (channel, sample) in channels.iter_mut().zip(frame.chunks_exact(2)) {
            let value = i16::from_le_bytes([sample[0], sample[1]]);
            channel.push(value.into_sample());
        }
    }

    let buffer = DecodedAudioBuffer::new(channels, format.sample_rate);
    debug!(
        frames = num_frames,
        channels = channel_count,
        duration = buffer.duration,
        "Decoded voice note"
    );
    Ok(buffer)
}

/// Browsers skip ASCII whitespace inside base64, so payloads pasted from
/// logs or wrapped files still decode.
fn decode_base64(text: &str) -> Result<Vec<u8>, DecodeError> {
    if text.bytes().any(|b| b.is_ascii_whitespace()) {
        let compact: String = text.chars().filter(|c| !c.is_ascii_whitespace()).collect();
        Ok(PAYLOAD_ENGINE.decode(compact)?)
    } else {
        Ok(PAYLOAD_ENGINE.decode(text)?)
    }
}

/// Memo of the last decoded payload.
///
/// Holds a single entry: an engine plays one voice note, so a new payload
/// simply replaces the old buffer.
#[derive(Debug, Default)]
pub struct DecodeCache {
    entry: Option<(EncodedAudioPayload, Arc<DecodedAudioBuffer>)>,
}

impl DecodeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, payload: &EncodedAudioPayload) -> Option<Arc<DecodedAudioBuffer>> {
        self.entry
            .as_ref()
            .filter(|(cached, _)| cached.same_as(payload))
            .map(|(_, buffer)| Arc::clone(buffer))
    }

    pub fn insert(
        &mut self,
        payload: EncodedAudioPayload,
        buffer: DecodedAudioBuffer,
    ) -> Arc<DecodedAudioBuffer> {
        let buffer = Arc::new(buffer);
        self.entry = Some((payload, Arc::clone(&buffer)));
        buffer
    }
}
