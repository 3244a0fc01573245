use iced::widget::{button, column, container, progress_bar, row, text, Row};
use iced::alignment::Horizontal;
use iced::{Alignment, Element, Length};

use crate::audio::types::ProgressState;

#[derive(Debug, Clone)]
pub enum ControlMessage {
    PlayPause,
    Stop,
    OpenFile,
}

/// Elapsed playback time as seconds with one decimal, e.g. `"1.4s"`.
pub fn format_elapsed(duration: Option<f64>, progress: ProgressState) -> String {
    match duration {
        Some(duration) if duration > 0.0 => {
            format!("{:.1}s", duration * progress.elapsed_fraction)
        }
        _ => "0.0s".to_string(),
    }
}

/// Build the voice-note player: play/pause, progress bar and elapsed label.
pub fn view_voice_note<'a>(
    progress: ProgressState,
    duration: Option<f64>,
    enabled: bool,
) -> Element<'a, ControlMessage> {
    let play_label = if progress.is_playing { "Pause" } else { "Play" };

    let mut play_btn = button(text(play_label));
    if enabled {
        play_btn = play_btn.on_press(ControlMessage::PlayPause);
    }

    let bar = progress_bar(0.0..=1.0, progress.elapsed_fraction as f32);

    let labels = row![
        text(format_elapsed(duration, progress)).size(12),
        container(text("Voice Note").size(12))
            .width(Length::Fill)
            .align_x(Horizontal::Right),
    ];

    let player = Row::new()
        .spacing(10)
        .align_y(Alignment::Center)
        .push(play_btn)
        .push(column![bar, labels].spacing(4).width(Length::Fixed(220.0)));

    container(player).padding(10).into()
}

/// Open and stop buttons around the player.
pub fn view_toolbar<'a>(has_payload: bool) -> Element<'a, ControlMessage> {
    let open_btn = button(text("Open Voice Note")).on_press(ControlMessage::OpenFile);
    let mut stop_btn = button(text("Stop"));
    if has_payload {
        stop_btn = stop_btn.on_press(ControlMessage::Stop);
    }

    container(row![open_btn, stop_btn].spacing(10))
        .padding(10)
        .into()
}
