use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use iced::keyboard;
use iced::widget::{center, column, container, text};
use iced::{Element, Length, Subscription, Task, Theme};
use tracing::{info, warn};

use voicenote::ui::controls::{self, ControlMessage};
use voicenote::{
    AudioOutput, CpalOutput, EncodedAudioPayload, EngineConfig, PlaybackEngine, ProgressState,
    SimulatedOutput,
};

/// Startup options collected from the command line.
#[derive(Debug, Clone)]
pub struct Settings {
    pub config: EngineConfig,
    pub payload_path: Option<PathBuf>,
    pub headless: bool,
}

/// Shared audio output, opened once at startup.
#[derive(Clone)]
pub struct OutputHandle(Arc<dyn AudioOutput>);

impl fmt::Debug for OutputHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("OutputHandle")
    }
}

pub struct App {
    settings: Settings,
    output: Option<OutputHandle>,
    engine: Option<PlaybackEngine>,
    payload: Option<EncodedAudioPayload>,

    // Snapshot refreshed on every tick
    progress: ProgressState,
    duration: Option<f64>,

    filename: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Clone)]
pub enum Message {
    OutputReady(Result<OutputHandle, String>),
    PayloadLoaded(Result<(String, String), String>),
    Control(ControlMessage),
    Tick,
    KeyEvent(keyboard::Event),
    FileDialogResult(Option<PathBuf>),
}

impl App {
    /// Hand the current payload to the engine once both it and the output exist.
    fn attach_payload(&mut self) {
        let (Some(output), Some(payload)) = (&self.output, &self.payload) else {
            return;
        };
        match &self.engine {
            Some(engine) => engine.load(payload.clone()),
            None => {
                self.engine = Some(PlaybackEngine::with_payload(
                    Arc::clone(&output.0),
                    self.settings.config.clone(),
                    payload.clone(),
                ));
            }
        }
        self.progress = ProgressState::default();
        self.duration = None;
    }
}

fn open_output(headless: bool) -> Result<OutputHandle, String> {
    if headless {
        info!("Using simulated audio output");
        return Ok(OutputHandle(Arc::new(SimulatedOutput::new())));
    }
    CpalOutput::open()
        .map(|output| OutputHandle(Arc::new(output)))
        .map_err(|e| e.to_string())
}

fn load_payload(path: PathBuf) -> Task<Message> {
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    Task::perform(
        async move {
            tokio::task::spawn_blocking(move || {
                std::fs::read_to_string(&path)
                    .map(|text| (text.trim().to_string(), filename))
                    .map_err(|e| format!("Failed to read {}: {e}", path.display()))
            })
            .await
            .unwrap_or_else(|e| Err(format!("Loader task failed: {e}")))
        },
        Message::PayloadLoaded,
    )
}

fn boot(settings: Settings) -> (App, Task<Message>) {
    let headless = settings.headless;
    let initial_path = settings.payload_path.clone();

    let app = App {
        settings,
        output: None,
        engine: None,
        payload: None,
        progress: ProgressState::default(),
        duration: None,
        filename: None,
        error: None,
    };

    let open = Task::perform(
        async move {
            tokio::task::spawn_blocking(move || open_output(headless))
                .await
                .unwrap_or_else(|e| Err(format!("Output task failed: {e}")))
        },
        Message::OutputReady,
    );

    let task = match initial_path {
        Some(path) => Task::batch([open, load_payload(path)]),
        None => open,
    };

    (app, task)
}

fn title(app: &App) -> String {
    match &app.filename {
        Some(name) => format!("Voice Note - {name}"),
        None => "Voice Note".to_string(),
    }
}

fn update(app: &mut App, message: Message) -> Task<Message> {
    match message {
        Message::OutputReady(result) => {
            match result {
                Ok(output) => {
                    app.output = Some(output);
                    app.attach_payload();
                }
                Err(e) => {
                    warn!("Audio output unavailable: {e}");
                    app.error = Some(format!("Audio output error: {e}"));
                }
            }
            Task::none()
        }
        Message::Control(ctrl) => match ctrl {
            ControlMessage::OpenFile => Task::perform(
                async {
                    let handle = rfd::AsyncFileDialog::new()
                        .add_filter("Base64 voice note", &["b64", "txt", "pcm64"])
                        .pick_file()
                        .await;
                    handle.map(|h| h.path().to_path_buf())
                },
                Message::FileDialogResult,
            ),
            ControlMessage::PlayPause => {
                if let Some(engine) = &app.engine {
                    match engine.toggle() {
                        Ok(()) => app.error = None,
                        Err(e) => {
                            warn!("Playback failed: {e}");
                            app.error = Some(e.to_string());
                        }
                    }
                    app.progress = engine.progress();
                    app.duration = engine.duration();
                }
                Task::none()
            }
            ControlMessage::Stop => {
                if let Some(engine) = &app.engine {
                    engine.stop();
                    app.progress = engine.progress();
                }
                Task::none()
            }
        },
        Message::FileDialogResult(path) => match path {
            Some(path) => load_payload(path),
            None => Task::none(),
        },
        Message::PayloadLoaded(result) => {
            match result {
                Ok((text, filename)) => {
                    info!(file = %filename, "Loaded voice note");
                    app.payload = Some(EncodedAudioPayload::from(text));
                    app.filename = Some(filename);
                    app.error = None;
                    app.attach_payload();
                }
                Err(e) => {
                    warn!("{e}");
                    app.error = Some(e);
                }
            }
            Task::none()
        }
        Message::Tick => {
            if let Some(engine) = &app.engine {
                app.progress = engine.progress();
                app.duration = engine.duration();
            }
            Task::none()
        }
        Message::KeyEvent(key_event) => match key_event {
            keyboard::Event::KeyPressed { key, .. } => match key.as_ref() {
                keyboard::Key::Named(keyboard::key::Named::Space) => {
                    update(app, Message::Control(ControlMessage::PlayPause))
                }
                keyboard::Key::Named(keyboard::key::Named::Escape) => {
                    update(app, Message::Control(ControlMessage::Stop))
                }
                _ => Task::none(),
            },
            _ => Task::none(),
        },
    }
}

fn view(app: &App) -> Element<'_, Message> {
    let toolbar = controls::view_toolbar(app.engine.is_some()).map(Message::Control);

    let player: Element<Message> = if app.payload.is_some() {
        controls::view_voice_note(app.progress, app.duration, app.engine.is_some())
            .map(Message::Control)
    } else {
        center(text("Open a voice note to begin").size(18))
            .width(Length::Fill)
            .height(Length::Fixed(120.0))
            .into()
    };

    let mut content = column![toolbar, player].spacing(5);

    if let Some(err) = &app.error {
        content = content.push(
            container(text(format!("Error: {err}")).color(iced::Color::from_rgb(1.0, 0.3, 0.3)))
                .padding(10),
        );
    }

    container(content)
        .width(Length::Fill)
        .height(Length::Fill)
        .into()
}

fn subscription(app: &App) -> Subscription<Message> {
    let tick = iced::time::every(app.settings.config.progress_interval).map(|_| Message::Tick);

    let keys = keyboard::listen().map(Message::KeyEvent);

    Subscription::batch([tick, keys])
}

fn theme(_app: &App) -> Theme {
    Theme::Dark
}

pub fn run(settings: Settings) -> iced::Result {
    iced::application(move || boot(settings.clone()), update, view)
        .title(title)
        .subscription(subscription)
        .theme(theme)
        .window_size((420.0, 240.0))
        .run()
}
