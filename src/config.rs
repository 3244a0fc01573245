use std::time::Duration;

use crate::audio::types::PcmFormat;

/// Interval between progress recomputations, roughly one display frame.
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_millis(16);

/// Settings shared by every playback engine.
#[derive(Clone, Debug, PartialEq)]
pub struct EngineConfig {
    /// Layout of incoming payloads. Payloads carry no header, so this is
    /// the only source of sample rate and channel count.
    pub format: PcmFormat,
    pub progress_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            format: PcmFormat::VOICE_NOTE,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }
}

impl EngineConfig {
    pub fn with_format(mut self, format: PcmFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_voice_note_format() {
        let config = EngineConfig::default();
        assert_eq!(config.format.sample_rate, 24_000);
        assert_eq!(config.format.channels, 1);
        assert_eq!(config.progress_interval, Duration::from_millis(16));
    }

    #[test]
    fn builders_override_fields() {
        let config = EngineConfig::default()
            .with_format(PcmFormat::new(48_000, 2))
            .with_progress_interval(Duration::from_millis(5));
        assert_eq!(config.format, PcmFormat::new(48_000, 2));
        assert_eq!(config.progress_interval, Duration::from_millis(5));
    }
}
