//! Voice-note transport: lazy decode, a single playback session at a time,
//! and progress derived from the output's audio clock.

use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{select, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::decoder::DecodeCache;
use super::output::AudioOutput;
use super::types::{
    DecodedAudioBuffer, EncodedAudioPayload, PlaybackStatus, ProgressState, SourceId,
};
use crate::config::EngineConfig;
use crate::error::{DecodeError, PlaybackError};

/// Receives every progress update the engine emits.
///
/// Runs on the progress thread with the engine state locked, so it must not
/// call back into the engine.
pub type ProgressListener = Box<dyn FnMut(ProgressState) + Send>;

#[derive(Debug, Clone, Copy)]
struct Session {
    id: SourceId,
    started_at: f64, // audio clock seconds
    duration: f64,
}

#[derive(Debug)]
enum Phase {
    Idle,
    Decoding,
    Playing(Session),
    Stopped,
    Disposed,
}

impl Phase {
    fn status(&self) -> PlaybackStatus {
        match self {
            Phase::Idle => PlaybackStatus::Idle,
            Phase::Decoding => PlaybackStatus::Decoding,
            Phase::Playing(_) => PlaybackStatus::Playing,
            Phase::Stopped => PlaybackStatus::Stopped,
            Phase::Disposed => PlaybackStatus::Disposed,
        }
    }

    fn session(&self) -> Option<Session> {
        match self {
            Phase::Playing(session) => Some(*session),
            _ => None,
        }
    }
}

struct EngineState {
    phase: Phase,
    progress: ProgressState,
    payload: Option<EncodedAudioPayload>,
    cache: DecodeCache,
    listener: Option<ProgressListener>,
}

impl EngineState {
    fn is_current(&self, id: SourceId) -> bool {
        self.phase.session().is_some_and(|s| s.id == id)
    }

    fn emit(&mut self) {
        let progress = self.progress;
        if let Some(listener) = self.listener.as_mut() {
            listener(progress);
        }
    }

    fn finish(&mut self) {
        self.phase = Phase::Stopped;
        self.progress = ProgressState::finished();
        self.emit();
    }
}

struct Shared {
    state: Mutex<EngineState>,
    output: Arc<dyn AudioOutput>,
    config: EngineConfig,
}

impl Shared {
    /// Recompute progress from the audio clock.
    fn on_tick(&self, id: SourceId) {
        let mut state = self.state.lock();
        let Some(session) = state.phase.session().filter(|s| s.id == id) else {
            return;
        };

        let elapsed = self.output.current_time() - session.started_at;
        let fraction = (elapsed / session.duration).clamp(0.0, 1.0);

        if fraction >= 1.0 {
            debug!(source = id.0, "Voice note reached its end");
            state.finish();
        } else {
            let fraction = fraction.max(state.progress.elapsed_fraction);
            state.progress = ProgressState::playing(fraction);
            state.emit();
        }
    }

    fn on_ended(&self, id: SourceId) {
        let mut state = self.state.lock();
        if state.is_current(id) {
            debug!(source = id.0, "Voice note ended");
            state.finish();
        }
    }

    /// The output dropped the source without finishing it.
    fn on_interrupted(&self, id: SourceId) {
        let mut state = self.state.lock();
        if state.is_current(id) {
            debug!(source = id.0, "Voice note cut off by the output");
            state.phase = Phase::Stopped;
            state.progress.is_playing = false;
            state.emit();
        }
    }

    fn is_current(&self, id: SourceId) -> bool {
        self.state.lock().is_current(id)
    }

    fn run_progress(&self, id: SourceId, ended: Receiver<SourceId>, cancelled: Receiver<()>) {
        let ticks = crossbeam_channel::tick(self.config.progress_interval);
        while self.is_current(id) {
            select! {
                recv(cancelled) -> _ => break,
                recv(ended) -> msg => match msg {
                    Ok(_) => self.on_ended(id),
                    Err(_) => self.on_interrupted(id),
                },
                recv(ticks) -> _ => self.on_tick(id),
            }
        }
    }
}

/// Handle to the progress thread of one session.
struct ProgressTask {
    cancel: Sender<()>,
    handle: JoinHandle<()>,
}

impl ProgressTask {
    fn spawn(
        shared: Arc<Shared>,
        id: SourceId,
        ended: Receiver<SourceId>,
    ) -> std::io::Result<Self> {
        let (cancel, cancelled) = crossbeam_channel::bounded(0);
        let handle = std::thread::Builder::new()
            .name("voicenote-progress".into())
            .spawn(move || shared.run_progress(id, ended, cancelled))?;
        Ok(Self { cancel, handle })
    }

    /// Returns once the thread has exited.
    fn cancel(self) {
        drop(self.cancel);
        if self.handle.join().is_err() {
            warn!("Progress thread panicked");
        }
    }
}

/// Plays one voice note on an [`AudioOutput`].
///
/// The payload is decoded on the first `play` and reused afterwards. Calling
/// `play` while already playing restarts from the beginning; there is never
/// more than one source sounding. After [`PlaybackEngine::dispose`] every
/// operation is a no-op except `play`, which returns
/// [`PlaybackError::Disposed`].
pub struct PlaybackEngine {
    shared: Arc<Shared>,
    // Serializes transport operations and owns the running progress task.
    transport: Mutex<Option<ProgressTask>>,
    // Held across a decode so a payload is decoded once.
    decoding: Mutex<()>,
}

impl PlaybackEngine {
    pub fn new(output: Arc<dyn AudioOutput>, config: EngineConfig) -> Self {
        let state = EngineState {
            phase: Phase::Idle,
            progress: ProgressState::default(),
            payload: None,
            cache: DecodeCache::new(),
            listener: None,
        };
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                output,
                config,
            }),
            transport: Mutex::new(None),
            decoding: Mutex::new(()),
        }
    }

    pub fn with_payload(
        output: Arc<dyn AudioOutput>,
        config: EngineConfig,
        payload: EncodedAudioPayload,
    ) -> Self {
        let engine = Self::new(output, config);
        engine.load(payload);
        engine
    }

    /// Attach the voice note to play. Stops the current session if the
    /// payload differs.
    pub fn load(&self, payload: EncodedAudioPayload) {
        let mut transport = self.transport.lock();
        let unchanged = {
            let state = self.shared.state.lock();
            matches!(state.phase, Phase::Disposed)
                || state.payload.as_ref().is_some_and(|p| p.same_as(&payload))
        };
        if unchanged {
            return;
        }

        self.stop_session(&mut transport);
        let mut state = self.shared.state.lock();
        state.payload = Some(payload);
        state.progress = ProgressState::default();
        if matches!(state.phase, Phase::Stopped) {
            state.phase = Phase::Idle;
        }
    }

    /// Decode `payload`, reusing the cached buffer when it was decoded before.
    pub fn decode(
        &self,
        payload: &EncodedAudioPayload,
    ) -> Result<Arc<DecodedAudioBuffer>, DecodeError> {
        let _decoding = self.decoding.lock();
        let previous = {
            let mut state = self.shared.state.lock();
            if let Some(buffer) = state.cache.get(payload) {
                return Ok(buffer);
            }
            if matches!(state.phase, Phase::Idle | Phase::Stopped) {
                Some(std::mem::replace(&mut state.phase, Phase::Decoding))
            } else {
                None
            }
        };

        let decoded = super::decoder::decode_payload(payload, self.shared.config.format);

        let mut state = self.shared.state.lock();
        if let Some(previous) = previous {
            if matches!(state.phase, Phase::Decoding) {
                state.phase = previous;
            }
        }
        Ok(state.cache.insert(payload.clone(), decoded?))
    }

    /// Start the voice note from the beginning.
    pub fn play(&self) -> Result<(), PlaybackError> {
        let mut transport = self.transport.lock();
        if self.status() == PlaybackStatus::Disposed {
            return Err(PlaybackError::Disposed);
        }

        let payload = self
            .shared
            .state
            .lock()
            .payload
            .clone()
            .ok_or(PlaybackError::NoPayload)?;
        let buffer = self.decode(&payload)?;

        let output = &self.shared.output;
        output.resume()?;

        // Nothing above touches the running session, so a failure there
        // leaves it playing.
        self.stop_session(&mut transport);

        let (ended_tx, ended_rx) = crossbeam_channel::bounded(1);
        let started_at = output.current_time();
        let id = output.start(Arc::clone(&buffer), ended_tx)?;

        {
            let mut state = self.shared.state.lock();
            state.phase = Phase::Playing(Session {
                id,
                started_at,
                duration: buffer.duration,
            });
            state.progress = ProgressState::playing(0.0);
            state.emit();
        }

        match ProgressTask::spawn(Arc::clone(&self.shared), id, ended_rx) {
            Ok(task) => *transport = Some(task),
            Err(e) => {
                output.stop(id);
                let mut state = self.shared.state.lock();
                state.phase = Phase::Stopped;
                state.progress = ProgressState::default();
                return Err(PlaybackError::Output(format!(
                    "Failed to spawn progress thread: {e}"
                )));
            }
        }

        info!(
            source = id.0,
            duration = buffer.duration,
            "Playing voice note"
        );
        Ok(())
    }

    /// Halt playback, keeping the last progress value.
    pub fn stop(&self) {
        let mut transport = self.transport.lock();
        self.stop_session(&mut transport);
    }

    /// Stop when playing, play otherwise.
    pub fn toggle(&self) -> Result<(), PlaybackError> {
        if self.status() == PlaybackStatus::Playing {
            self.stop();
            Ok(())
        } else {
            self.play()
        }
    }

    pub fn progress(&self) -> ProgressState {
        self.shared.state.lock().progress
    }

    pub fn status(&self) -> PlaybackStatus {
        self.shared.state.lock().phase.status()
    }

    /// Duration in seconds, once the loaded payload has been decoded.
    pub fn duration(&self) -> Option<f64> {
        let state = self.shared.state.lock();
        let payload = state.payload.as_ref()?;
        state.cache.get(payload).map(|buffer| buffer.duration)
    }

    pub fn set_progress_listener(&self, listener: impl FnMut(ProgressState) + Send + 'static) {
        let mut state = self.shared.state.lock();
        if !matches!(state.phase, Phase::Disposed) {
            state.listener = Some(Box::new(listener));
        }
    }

    /// Tear down: stop playback, cancel progress updates, drop the listener.
    ///
    /// Safe to call repeatedly. No listener call happens after it returns.
    pub fn dispose(&self) {
        let mut transport = self.transport.lock();
        self.stop_session(&mut transport);

        let mut state = self.shared.state.lock();
        if !matches!(state.phase, Phase::Disposed) {
            debug!("Disposing playback engine");
            state.phase = Phase::Disposed;
            state.listener = None;
        }
    }

    fn stop_session(&self, transport: &mut Option<ProgressTask>) {
        let stopped = {
            let mut state = self.shared.state.lock();
            let session = state.phase.session();
            if session.is_some() {
                state.phase = Phase::Stopped;
                state.progress.is_playing = false;
            }
            session
        };

        if let Some(session) = stopped {
            self.shared.output.stop(session.id);
            debug!(source = session.id.0, "Stopped voice note");
        }
        if let Some(task) = transport.take() {
            task.cancel();
        }
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        self.dispose();
    }
}
