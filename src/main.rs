//! Voice note player - plays base64 raw PCM replies from a speech service.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use voicenote::{EngineConfig, PcmFormat};

mod app;

/// Command-line arguments for voicenote
#[derive(Parser, Debug)]
#[command(name = "voicenote")]
#[command(about = "Play base64-encoded raw PCM voice notes")]
#[command(version)]
struct Args {
    /// File holding the base64 payload to open at startup
    #[arg(env = "VOICENOTE_PAYLOAD")]
    payload: Option<PathBuf>,

    /// Sample rate of the raw PCM payload
    #[arg(long, default_value_t = 24_000, env = "VOICENOTE_SAMPLE_RATE",
          value_parser = clap::value_parser!(u32).range(1..))]
    sample_rate: u32,

    /// Interleaved channels in the payload
    #[arg(long, default_value_t = 1, env = "VOICENOTE_CHANNELS",
          value_parser = clap::value_parser!(u16).range(1..))]
    channels: u16,

    /// Milliseconds between progress updates
    #[arg(long, default_value_t = 16, env = "VOICENOTE_PROGRESS_INTERVAL_MS",
          value_parser = clap::value_parser!(u64).range(1..))]
    progress_interval_ms: u64,

    /// Play through a simulated clock instead of an audio device
    #[arg(long, env = "VOICENOTE_HEADLESS")]
    headless: bool,
}

fn main() -> iced::Result {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voicenote=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let config = EngineConfig::default()
        .with_format(PcmFormat::new(args.sample_rate, args.channels))
        .with_progress_interval(Duration::from_millis(args.progress_interval_ms));

    tracing::info!(
        sample_rate = args.sample_rate,
        channels = args.channels,
        "Starting voice note player"
    );

    app::run(app::Settings {
        config,
        payload_path: args.payload,
        headless: args.headless,
    })
}
