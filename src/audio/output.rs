use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{select, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, info};

use super::types::{DecodedAudioBuffer, SourceId};
use crate::error::PlaybackError;

/// The platform audio subsystem as seen by the playback engine.
///
/// An output owns a monotonic clock that runs independently of whoever
/// polls it, and plays scheduled buffers against that clock.
pub trait AudioOutput: Send + Sync {
    /// Un-suspend the clock. Idempotent.
    fn resume(&self) -> Result<(), PlaybackError>;

    /// Audio clock in seconds. Never decreases.
    fn current_time(&self) -> f64;

    /// Play `buffer` from its first frame right away.
    ///
    /// When the buffer runs out the source id is sent once on `ended`.
    /// A source halted through [`AudioOutput::stop`], or replaced by a later
    /// `start` on an output that plays one source at a time, drops `ended`
    /// unsent.
    fn start(
        &self,
        buffer: Arc<DecodedAudioBuffer>,
        ended: Sender<SourceId>,
    ) -> Result<SourceId, PlaybackError>;

    /// Halt a source. Unknown or finished ids are ignored.
    fn stop(&self, id: SourceId);
}

/// Commands sent to the audio callback.
enum OutputCommand {
    Start {
        id: SourceId,
        buffer: Arc<DecodedAudioBuffer>,
        ended: Sender<SourceId>,
    },
    Stop(SourceId),
}

struct Voice {
    id: SourceId,
    buffer: Arc<DecodedAudioBuffer>,
    position: f64, // fractional source frame
    step: f64,     // source frames per output frame
    ended: Sender<SourceId>,
}

/// Fills device buffers from the current voice.
///
/// Plays at most one voice; starting another replaces it.
struct Renderer {
    sample_rate: u32,
    channels: u16,
    voice: Option<Voice>,
}

impl Renderer {
    fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
            voice: None,
        }
    }

    fn handle_command(&mut self, cmd: OutputCommand) {
        match cmd {
            OutputCommand::Start { id, buffer, ended } => {
                let step = buffer.sample_rate as f64 / self.sample_rate as f64;
                self.voice = Some(Voice {
                    id,
                    buffer,
                    position: 0.0,
                    step,
                    ended,
                });
            }
            OutputCommand::Stop(id) => {
                if self.voice.as_ref().is_some_and(|v| v.id == id) {
                    self.voice = None;
                }
            }
        }
    }

    /// Fill an interleaved output buffer, resampling linearly to the device rate.
    fn render(&mut self, output: &mut [f32]) {
        output.fill(0.0);

        let Some(voice) = self.voice.as_mut() else {
            return;
        };

        let out_channels = self.channels as usize;
        let src_channels = voice.buffer.channel_count() as usize;
        let total_frames = voice.buffer.num_frames();

        for frame in output.chunks_exact_mut(out_channels) {
            if voice.position >= total_frames as f64 {
                break;
            }
            let index = voice.position as usize;
            let next = (index + 1).min(total_frames - 1);
            let t = (voice.position - index as f64) as f32;

            for (c, out) in frame.iter_mut().enumerate() {
                let samples = voice.buffer.channel(c % src_channels);
                *out = samples[index] + (samples[next] - samples[index]) * t;
            }
            voice.position += voice.step;
        }

        if voice.position >= total_frames as f64 {
            let _ = voice.ended.try_send(voice.id);
            self.voice = None;
        }
    }
}

enum StreamControl {
    Resume(Sender<Result<(), PlaybackError>>),
}

/// Default output device through cpal.
///
/// The stream lives on its own thread and starts suspended. The clock counts
/// frames handed to the device.
pub struct CpalOutput {
    commands: Sender<OutputCommand>,
    control: Sender<StreamControl>,
    frames_rendered: Arc<AtomicU64>,
    sample_rate: u32,
    next_id: AtomicU64,
}

impl CpalOutput {
    pub fn open() -> Result<Self, PlaybackError> {
        let (cmd_tx, cmd_rx) = crossbeam_channel::bounded::<OutputCommand>(64);
        let (control_tx, control_rx) = crossbeam_channel::bounded::<StreamControl>(4);
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);

        let frames_rendered = Arc::new(AtomicU64::new(0));
        let clock = Arc::clone(&frames_rendered);

        // The stream is built on the thread that keeps it, since cpal streams
        // are not Send on every host. The thread ends when CpalOutput drops.
        std::thread::Builder::new()
            .name("audio-output".into())
            .spawn(move || {
                let stream = match build_stream(cmd_rx, clock) {
                    Ok((stream, sample_rate)) => {
                        let _ = ready_tx.send(Ok(sample_rate));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                for control in control_rx {
                    match control {
                        StreamControl::Resume(reply) => {
                            let result = stream.play().map_err(|e| {
                                PlaybackError::Output(format!("Failed to start stream: {e}"))
                            });
                            let _ = reply.send(result);
                        }
                    }
                }
                debug!("Audio output closed");
            })
            .map_err(|e| PlaybackError::Output(format!("Failed to spawn audio thread: {e}")))?;

        let sample_rate = ready_rx.recv().map_err(|_| output_closed())??;
        info!(sample_rate, "Opened audio output");

        Ok(Self {
            commands: cmd_tx,
            control: control_tx,
            frames_rendered,
            sample_rate,
            next_id: AtomicU64::new(1),
        })
    }
}

fn output_closed() -> PlaybackError {
    PlaybackError::Output("Audio output thread is gone".into())
}

fn build_stream(
    commands: Receiver<OutputCommand>,
    frames_rendered: Arc<AtomicU64>,
) -> Result<(cpal::Stream, u32), PlaybackError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or(PlaybackError::NoDevice)?;

    let config = device
        .default_output_config()
        .map_err(|e| PlaybackError::Output(format!("Failed to get output config: {e}")))?;

    let sample_rate = config.sample_rate();
    let channels = config.channels();
    let sample_format = config.sample_format();

    let mut renderer = Renderer::new(sample_rate, channels);

    let stream = match sample_format {
        cpal::SampleFormat::F32 => device
            .build_output_stream(
                &config.into(),
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    while let Ok(cmd) = commands.try_recv() {
                        renderer.handle_command(cmd);
                    }
                    renderer.render(data);
                    let frames = data.len() / channels as usize;
                    frames_rendered.fetch_add(frames as u64, Ordering::Relaxed);
                },
                |err| {
                    error!("Audio stream error: {err}");
                },
                None,
            )
            .map_err(|e| PlaybackError::Output(format!("Failed to build output stream: {e}")))?,
        other => return Err(PlaybackError::UnsupportedFormat(format!("{other:?}"))),
    };

    // Some hosts start streams on creation. Keep the clock still until resume.
    if let Err(e) = stream.pause() {
        debug!("Output stream cannot be paused: {e}");
    }

    Ok((stream, sample_rate))
}

impl AudioOutput for CpalOutput {
    fn resume(&self) -> Result<(), PlaybackError> {
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        self.control
            .send(StreamControl::Resume(reply_tx))
            .map_err(|_| output_closed())?;
        reply_rx.recv().map_err(|_| output_closed())?
    }

    fn current_time(&self) -> f64 {
        self.frames_rendered.load(Ordering::Relaxed) as f64 / self.sample_rate as f64
    }

    fn start(
        &self,
        buffer: Arc<DecodedAudioBuffer>,
        ended: Sender<SourceId>,
    ) -> Result<SourceId, PlaybackError> {
        let id = SourceId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.commands
            .send(OutputCommand::Start { id, buffer, ended })
            .map_err(|_| output_closed())?;
        Ok(id)
    }

    fn stop(&self, id: SourceId) {
        let _ = self.commands.send(OutputCommand::Stop(id));
    }
}

#[derive(Default)]
struct SimulatedClock {
    elapsed: Duration,
    resumed_at: Option<Instant>,
}

impl SimulatedClock {
    fn now(&self) -> Duration {
        self.elapsed + self.resumed_at.map_or(Duration::ZERO, |t| t.elapsed())
    }
}

#[derive(Default)]
struct SimulatedShared {
    clock: Mutex<SimulatedClock>,
    voices: Mutex<HashMap<SourceId, Sender<()>>>,
    next_id: AtomicU64,
    offline: AtomicBool,
}

/// Output without a device: the clock follows wall time once resumed and
/// each source ends after its buffer's duration.
///
/// Used by `--headless` runs and the test suite.
#[derive(Clone, Default)]
pub struct SimulatedOutput {
    shared: Arc<SimulatedShared>,
}

impl SimulatedOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// While offline, `resume` and `start` fail.
    pub fn set_offline(&self, offline: bool) {
        self.shared.offline.store(offline, Ordering::SeqCst);
    }

    pub fn is_suspended(&self) -> bool {
        self.shared.clock.lock().resumed_at.is_none()
    }

    /// Number of sources currently sounding.
    pub fn active_sources(&self) -> usize {
        self.shared.voices.lock().len()
    }

    fn check_online(&self) -> Result<(), PlaybackError> {
        if self.shared.offline.load(Ordering::SeqCst) {
            return Err(PlaybackError::Output("Simulated output is offline".into()));
        }
        Ok(())
    }
}

impl AudioOutput for SimulatedOutput {
    fn resume(&self) -> Result<(), PlaybackError> {
        self.check_online()?;
        let mut clock = self.shared.clock.lock();
        clock.resumed_at.get_or_insert_with(Instant::now);
        Ok(())
    }

    fn current_time(&self) -> f64 {
        self.shared.clock.lock().now().as_secs_f64()
    }

    fn start(
        &self,
        buffer: Arc<DecodedAudioBuffer>,
        ended: Sender<SourceId>,
    ) -> Result<SourceId, PlaybackError> {
        self.check_online()?;

        let id = SourceId(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(0);
        let length = Duration::from_secs_f64(buffer.duration);
        self.shared.voices.lock().insert(id, stop_tx);

        let shared = Arc::clone(&self.shared);
        let spawned = std::thread::Builder::new()
            .name("simulated-voice".into())
            .spawn(move || {
                select! {
                    recv(stop_rx) -> _ => {}
                    recv(crossbeam_channel::after(length)) -> _ => {
                        if shared.voices.lock().remove(&id).is_some() {
                            let _ = ended.send(id);
                        }
                    }
                }
            });

        if let Err(e) = spawned {
            self.shared.voices.lock().remove(&id);
            return Err(PlaybackError::Output(format!("Failed to spawn voice thread: {e}")));
        }
        Ok(id)
    }

    fn stop(&self, id: SourceId) {
        // Dropping the sender wakes the voice thread.
        self.shared.voices.lock().remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::TryRecvError;

    fn buffer(samples: &[f32], sample_rate: u32) -> Arc<DecodedAudioBuffer> {
        Arc::new(DecodedAudioBuffer::new(vec![samples.to_vec()], sample_rate))
    }

    fn start(renderer: &mut Renderer, id: u64, buffer: Arc<DecodedAudioBuffer>) -> Receiver<SourceId> {
        let (ended_tx, ended_rx) = crossbeam_channel::bounded(1);
        renderer.handle_command(OutputCommand::Start {
            id: SourceId(id),
            buffer,
            ended: ended_tx,
        });
        ended_rx
    }

    #[test]
    fn renders_frames_then_silence() {
        let mut renderer = Renderer::new(24_000, 1);
        let ended = start(&mut renderer, 1, buffer(&[0.1, 0.2, 0.3, 0.4], 24_000));

        let mut out = [9.0f32; 8];
        renderer.render(&mut out);

        assert_eq!(out, [0.1, 0.2, 0.3, 0.4, 0.0, 0.0, 0.0, 0.0]);
        assert_eq!(ended.try_recv(), Ok(SourceId(1)));
        assert!(renderer.voice.is_none());
    }

    #[test]
    fn ended_fires_once_across_callbacks() {
        let mut renderer = Renderer::new(24_000, 1);
        let ended = start(&mut renderer, 3, buffer(&[0.5; 6], 24_000));

        let mut out = [0.0f32; 4];
        renderer.render(&mut out);
        assert_eq!(ended.try_recv(), Err(TryRecvError::Empty));

        renderer.render(&mut out);
        assert_eq!(out, [0.5, 0.5, 0.0, 0.0]);
        assert_eq!(ended.try_recv(), Ok(SourceId(3)));

        renderer.render(&mut out);
        assert_eq!(out, [0.0; 4]);
        assert_eq!(ended.try_recv(), Err(TryRecvError::Disconnected));
    }

    #[test]
    fn upsamples_to_device_rate() {
        let mut renderer = Renderer::new(48_000, 1);
        let ended = start(&mut renderer, 1, buffer(&[0.1, 0.2, 0.3, 0.4], 24_000));

        let mut out = [0.0f32; 10];
        renderer.render(&mut out);

        assert!((out[0] - 0.1).abs() < 1e-6);
        assert!((out[1] - 0.15).abs() < 1e-6);
        assert!((out[2] - 0.2).abs() < 1e-6);
        assert!((out[7] - 0.4).abs() < 1e-6);
        assert_eq!(&out[8..], &[0.0, 0.0]);
        assert_eq!(ended.try_recv(), Ok(SourceId(1)));
    }

    #[test]
    fn mono_source_fills_every_output_channel() {
        let mut renderer = Renderer::new(24_000, 2);
        let _ended = start(&mut renderer, 1, buffer(&[0.25], 24_000));

        let mut out = [0.0f32; 4];
        renderer.render(&mut out);
        assert_eq!(out, [0.25, 0.25, 0.0, 0.0]);
    }

    #[test]
    fn stop_ignores_other_ids() {
        let mut renderer = Renderer::new(24_000, 1);
        let ended = start(&mut renderer, 1, buffer(&[0.5; 16], 24_000));

        renderer.handle_command(OutputCommand::Stop(SourceId(7)));
        assert!(renderer.voice.is_some());

        renderer.handle_command(OutputCommand::Stop(SourceId(1)));
        renderer.handle_command(OutputCommand::Stop(SourceId(1)));
        let mut out = [1.0f32; 4];
        renderer.render(&mut out);
        assert_eq!(out, [0.0; 4]);
        assert_eq!(ended.try_recv(), Err(TryRecvError::Disconnected));
    }

    #[test]
    fn start_replaces_current_voice() {
        let mut renderer = Renderer::new(24_000, 1);
        let first = start(&mut renderer, 1, buffer(&[0.5; 16], 24_000));
        let _second = start(&mut renderer, 2, buffer(&[-0.5; 16], 24_000));

        let mut out = [0.0f32; 2];
        renderer.render(&mut out);
        assert_eq!(out, [-0.5, -0.5]);
        assert_eq!(first.try_recv(), Err(TryRecvError::Disconnected));
    }

    #[test]
    fn simulated_clock_waits_for_resume() {
        let output = SimulatedOutput::new();
        assert!(output.is_suspended());
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(output.current_time(), 0.0);

        output.resume().unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert!(!output.is_suspended());
        assert!(output.current_time() > 0.0);
    }

    #[test]
    fn simulated_source_reports_end() {
        let output = SimulatedOutput::new();
        output.resume().unwrap();
        let (ended_tx, ended_rx) = crossbeam_channel::bounded(1);

        let id = output.start(buffer(&[0.0; 1_200], 24_000), ended_tx).unwrap();
        assert_eq!(output.active_sources(), 1);
        assert_eq!(ended_rx.recv_timeout(Duration::from_secs(1)), Ok(id));
        assert_eq!(output.active_sources(), 0);
    }

    #[test]
    fn simulated_stop_drops_end_notification() {
        let output = SimulatedOutput::new();
        output.resume().unwrap();
        let (ended_tx, ended_rx) = crossbeam_channel::bounded(1);

        let id = output.start(buffer(&[0.0; 2_400], 24_000), ended_tx).unwrap();
        output.stop(id);
        output.stop(id);
        assert_eq!(output.active_sources(), 0);
        assert!(ended_rx.recv_timeout(Duration::from_millis(300)).is_err());
    }

    #[test]
    fn offline_simulated_output_refuses_to_resume() {
        let output = SimulatedOutput::new();
        output.set_offline(true);
        assert!(matches!(output.resume(), Err(PlaybackError::Output(_))));
        assert!(output.is_suspended());
    }
}
