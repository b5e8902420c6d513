//! Presentation contract: everything a UI needs to draw, derived purely from
//! a state snapshot.
//!
//! No hidden accumulators: deriving twice from the same snapshot yields the
//! same descriptor, so a shell can redraw idempotently after any external
//! event (window refocus, reconnect, missed broadcast).

use serde::{Deserialize, Serialize};

use crate::protocol::SessionState;
use crate::session::PlaybackPhase;
use crate::source::MediaSource;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum StatusTone {
    Off,
    Live,
    Warn,
    Flash,
    Done,
}

/// Which main panel the shell should show.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MediaPanel {
    Video,
    AudioVisualizer,
    Browser,
    Hidden,
}

/// What the primary control does right now.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PlayControl {
    Start,
    Stop,
    NewSong,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Presentation {
    pub status_label: &'static str,
    pub status_tone: StatusTone,
    /// Source pickers and the duration control lock while a session runs.
    pub locked: bool,
    pub play_control: PlayControl,
    pub show_warning_banner: bool,
    pub show_flash_banner: bool,
    pub show_flash_overlay: bool,
    /// Current flash pulse state; drives the on/off styling of the flash
    /// banner and overlay.
    pub flash_lit: bool,
    /// Remaining-time text for the warning/flash banners, e.g. "14s".
    pub countdown_text: String,
    pub elapsed_text: String,
    pub remaining_text: String,
    pub total_text: String,
    /// Ring progress, 0.0 ..= 1.0.
    pub ring_fraction: f64,
    pub media_panel: MediaPanel,
}

/// "m:ss" clock formatting.
pub fn format_clock(secs: u64) -> String {
    format!("{}:{:02}", secs / 60, secs % 60)
}

impl Presentation {
    pub fn derive(state: &SessionState) -> Self {
        let phase = state.phase;
        let active = state.is_active();
        let remaining = state.remaining_secs;

        let (status_label, status_tone) = match phase {
            PlaybackPhase::Idle => ("Ready", StatusTone::Off),
            PlaybackPhase::Playing => ("Live", StatusTone::Live),
            PlaybackPhase::Warning => ("Ending Soon", StatusTone::Warn),
            PlaybackPhase::Flashing => ("Ending!", StatusTone::Flash),
            PlaybackPhase::Completed => ("Completed", StatusTone::Done),
        };

        let play_control = match phase {
            PlaybackPhase::Idle => PlayControl::Start,
            PlaybackPhase::Completed => PlayControl::NewSong,
            _ => PlayControl::Stop,
        };

        let media_panel = if active {
            match &state.source {
                Some(MediaSource::LocalAudio { .. }) => MediaPanel::AudioVisualizer,
                Some(MediaSource::BrowserView { .. }) => MediaPanel::Browser,
                Some(_) => MediaPanel::Video,
                None => MediaPanel::Hidden,
            }
        } else {
            MediaPanel::Hidden
        };

        let ring_fraction = if state.effective_secs > 0 {
            (state.elapsed_secs as f64 / state.effective_secs as f64).clamp(0.0, 1.0)
        } else {
            0.0
        };

        Self {
            status_label,
            status_tone,
            locked: active,
            play_control,
            show_warning_banner: phase == PlaybackPhase::Warning,
            show_flash_banner: phase == PlaybackPhase::Flashing,
            show_flash_overlay: phase == PlaybackPhase::Flashing,
            flash_lit: state.flash_on,
            countdown_text: format!("{}s", remaining),
            elapsed_text: format_clock(state.elapsed_secs),
            remaining_text: format!("-{}", format_clock(remaining)),
            total_text: format_clock(state.effective_secs),
            ring_fraction,
            media_panel,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::PlaybackSession;
    use crate::source::MediaSource;
    use std::path::PathBuf;

    fn snapshot(session: &PlaybackSession) -> SessionState {
        SessionState::capture(session, 1, false, None)
    }

    #[test]
    fn derivation_is_idempotent() {
        let mut s = PlaybackSession::new(60);
        s.begin(MediaSource::LocalAudio {
            path: PathBuf::from("/music/a.mp3"),
        });
        let _ = s.seek(50); // Flashing
        s.toggle_flash();

        let snap = snapshot(&s);
        assert_eq!(Presentation::derive(&snap), Presentation::derive(&snap));
    }

    #[test]
    fn idle_presentation() {
        let s = PlaybackSession::new(180);
        let p = Presentation::derive(&snapshot(&s));
        assert_eq!(p.status_label, "Ready");
        assert_eq!(p.play_control, PlayControl::Start);
        assert!(!p.locked);
        assert_eq!(p.media_panel, MediaPanel::Hidden);
        assert_eq!(p.ring_fraction, 0.0);
    }

    #[test]
    fn flashing_presentation_tracks_pulse() {
        let mut s = PlaybackSession::new(60);
        s.begin(MediaSource::LocalVideo {
            path: PathBuf::from("/v.mp4"),
        });
        let _ = s.seek(50);

        let p = Presentation::derive(&snapshot(&s));
        assert_eq!(p.status_tone, StatusTone::Flash);
        assert!(p.show_flash_banner && p.show_flash_overlay);
        assert!(!p.show_warning_banner);
        assert!(p.flash_lit);
        assert_eq!(p.countdown_text, "10s");
        assert_eq!(p.media_panel, MediaPanel::Video);

        s.toggle_flash();
        let p = Presentation::derive(&snapshot(&s));
        assert!(!p.flash_lit);
    }

    #[test]
    fn clock_and_ring_math() {
        let mut s = PlaybackSession::new(200);
        s.begin(MediaSource::LocalVideo {
            path: PathBuf::from("/v.mp4"),
        });
        for _ in 0..50 {
            s.tick();
        }
        let p = Presentation::derive(&snapshot(&s));
        assert_eq!(p.elapsed_text, "0:50");
        assert_eq!(p.remaining_text, "-2:30");
        assert_eq!(p.total_text, "3:20");
        assert!((p.ring_fraction - 0.25).abs() < 1e-9);
    }

    #[test]
    fn browser_source_shows_browser_panel() {
        let mut s = PlaybackSession::new(60);
        s.begin(MediaSource::BrowserView {
            url: "https://youtu.be/x".into(),
        });
        let p = Presentation::derive(&snapshot(&s));
        assert_eq!(p.media_panel, MediaPanel::Browser);
        assert!(p.locked);
        assert_eq!(p.play_control, PlayControl::Stop);
    }
}
