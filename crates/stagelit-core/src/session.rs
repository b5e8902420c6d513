//! Playback session state machine.
//!
//! Owns elapsed time and the current phase; driven by a once-per-second tick
//! and by explicit seeks. All mutation goes through the methods here so the
//! engine loop can serialize tick and flash-cadence updates without locks.

use serde::{Deserialize, Serialize};

use crate::source::MediaSource;

/// Seconds remaining at which the session enters `Warning`.
pub const WARNING_WINDOW_SECS: u64 = 30;
/// Seconds remaining at which the session enters `Flashing`.
pub const FLASH_WINDOW_SECS: u64 = 15;
/// Toggle period of the flash pulse, in milliseconds. Runs only while
/// `Flashing`, independent of the 1-second tick.
pub const FLASH_CADENCE_MS: u64 = 500;

/// Where a session is in its countdown lifecycle.
///
/// Transitions under ticking:
///   Idle -> Playing -> Warning -> Flashing -> Completed
/// Ticking is a one-way ratchet: once `Flashing`, consecutive ticks never
/// fall back to `Warning` or `Playing`. A seek can move the phase in either
/// direction. `Completed` is terminal until an explicit stop returns to
/// `Idle`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum PlaybackPhase {
    #[default]
    Idle,
    Playing,
    Warning,
    Flashing,
    Completed,
}

impl PlaybackPhase {
    /// True while the countdown is running (ticks are being consumed).
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            PlaybackPhase::Playing | PlaybackPhase::Warning | PlaybackPhase::Flashing
        )
    }
}

/// Compute the countdown length for a session.
///
/// The browser view never has media-length ground truth, so it always runs
/// for the configured duration. Otherwise full-length mode plays the whole
/// detected media; normal mode plays the shorter of configured duration and
/// media length. A non-positive configured duration is a caller contract
/// violation and is not handled here.
pub fn effective_duration(
    configured_secs: u64,
    media_secs: Option<f64>,
    full_length: bool,
    browser_view: bool,
) -> u64 {
    let media = if browser_view {
        None
    } else {
        media_secs.filter(|d| d.is_finite() && *d > 0.0)
    };

    match media {
        Some(d) if full_length => d.floor() as u64,
        Some(d) => configured_secs.min(d.floor() as u64),
        None => configured_secs,
    }
}

/// What a tick asked the controller to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Tick arrived while the session was not active; nothing changed.
    Ignored,
    /// Countdown advanced, no phase change.
    Running,
    /// Crossed into the warning window.
    EnteredWarning,
    /// Crossed into the flash window: start the flash cadence.
    EnteredFlashing,
    /// Countdown finished: stop ticking, tear down, emit session-ended.
    Completed,
}

/// Flash-cadence adjustment required after a seek.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CadenceChange {
    Start,
    Stop,
    Unchanged,
}

/// The live session. Owned exclusively by the session controller; fields are
/// mutated only through the operations below.
#[derive(Debug, Clone)]
pub struct PlaybackSession {
    pub source: Option<MediaSource>,
    pub configured_secs: u64,
    pub media_secs: Option<f64>,
    pub full_length: bool,
    pub elapsed_secs: u64,
    pub phase: PlaybackPhase,
    pub flash_on: bool,
}

impl PlaybackSession {
    pub fn new(configured_secs: u64) -> Self {
        Self {
            source: None,
            configured_secs,
            media_secs: None,
            full_length: false,
            elapsed_secs: 0,
            phase: PlaybackPhase::Idle,
            flash_on: true,
        }
    }

    pub fn is_active(&self) -> bool {
        self.phase.is_active()
    }

    pub fn is_browser_view(&self) -> bool {
        matches!(self.source, Some(MediaSource::BrowserView { .. }))
    }

    pub fn effective_secs(&self) -> u64 {
        effective_duration(
            self.configured_secs,
            self.media_secs,
            self.full_length,
            self.is_browser_view(),
        )
    }

    pub fn remaining_secs(&self) -> u64 {
        self.effective_secs().saturating_sub(self.elapsed_secs)
    }

    /// Record the media length once metadata is known. Non-finite or
    /// non-positive values are treated as unknown.
    pub fn set_media_duration(&mut self, secs: Option<f64>) {
        self.media_secs = secs.filter(|d| d.is_finite() && *d > 0.0);
    }

    /// Start playback: Idle -> Playing with a fresh countdown.
    pub fn begin(&mut self, source: MediaSource) {
        self.source = Some(source);
        self.media_secs = None;
        self.elapsed_secs = 0;
        self.flash_on = true;
        self.phase = PlaybackPhase::Playing;
    }

    /// Stop: back to Idle with transient fields cleared. Full-length mode is
    /// a one-shot override and resets with the session.
    pub fn halt(&mut self) {
        self.source = None;
        self.media_secs = None;
        self.elapsed_secs = 0;
        self.flash_on = true;
        self.full_length = false;
        self.phase = PlaybackPhase::Idle;
    }

    /// Force completion from outside the tick path (browser window closed).
    /// Elapsed time is preserved for the completion summary.
    pub fn finish(&mut self) {
        self.flash_on = true;
        self.phase = PlaybackPhase::Completed;
    }

    /// Advance the countdown by one second and apply phase transitions.
    ///
    /// The completion check runs first and wins over every other phase check
    /// in the same tick, so `elapsed_secs` never exceeds the effective
    /// duration by more than the tick that completes it.
    pub fn tick(&mut self) -> TickOutcome {
        if !self.is_active() {
            return TickOutcome::Ignored;
        }

        self.elapsed_secs += 1;
        let total = self.effective_secs();

        if self.elapsed_secs >= total {
            self.phase = PlaybackPhase::Completed;
            return TickOutcome::Completed;
        }

        let remaining = total - self.elapsed_secs;
        if remaining <= FLASH_WINDOW_SECS && self.phase != PlaybackPhase::Flashing {
            self.phase = PlaybackPhase::Flashing;
            TickOutcome::EnteredFlashing
        } else if remaining <= WARNING_WINDOW_SECS && self.phase == PlaybackPhase::Playing {
            self.phase = PlaybackPhase::Warning;
            TickOutcome::EnteredWarning
        } else {
            TickOutcome::Running
        }
    }

    /// Toggle the flash pulse. Driven by the 500 ms cadence; meaningful only
    /// while `Flashing`.
    pub fn toggle_flash(&mut self) {
        if self.phase == PlaybackPhase::Flashing {
            self.flash_on = !self.flash_on;
        }
    }

    /// Scrub to an arbitrary elapsed time and re-derive the phase.
    ///
    /// Unlike ticking, a seek can move the phase backward (Flashing back to
    /// Playing). Returns `None` when seeking is not permitted: the session is
    /// inactive, or the source is a browser view (no scrubbable surface).
    pub fn seek(&mut self, target_secs: u64) -> Option<CadenceChange> {
        if !self.is_active() || self.is_browser_view() {
            return None;
        }

        self.elapsed_secs = target_secs;
        let remaining = self.remaining_secs();

        let change = if remaining <= FLASH_WINDOW_SECS {
            if self.phase == PlaybackPhase::Flashing {
                CadenceChange::Unchanged
            } else {
                self.phase = PlaybackPhase::Flashing;
                CadenceChange::Start
            }
        } else if remaining <= WARNING_WINDOW_SECS {
            self.phase = PlaybackPhase::Warning;
            CadenceChange::Stop
        } else {
            self.phase = PlaybackPhase::Playing;
            CadenceChange::Stop
        };

        if change == CadenceChange::Stop {
            self.flash_on = true;
        }
        Some(change)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MediaSource;
    use std::path::PathBuf;

    fn local_video() -> MediaSource {
        MediaSource::LocalVideo {
            path: PathBuf::from("/tmp/song.mp4"),
        }
    }

    #[test]
    fn resolver_uses_configured_when_media_unknown() {
        assert_eq!(effective_duration(180, None, false, false), 180);
        assert_eq!(effective_duration(180, None, true, false), 180);
    }

    #[test]
    fn resolver_takes_min_of_configured_and_media() {
        assert_eq!(effective_duration(180, Some(45.9), false, false), 45);
        assert_eq!(effective_duration(30, Some(45.9), false, false), 30);
    }

    #[test]
    fn resolver_full_length_uses_media() {
        assert_eq!(effective_duration(30, Some(245.7), true, false), 245);
    }

    #[test]
    fn resolver_browser_view_ignores_media() {
        assert_eq!(effective_duration(180, Some(45.0), false, true), 180);
        assert_eq!(effective_duration(180, Some(45.0), true, true), 180);
    }

    #[test]
    fn resolver_rejects_degenerate_media_lengths() {
        assert_eq!(effective_duration(180, Some(0.0), false, false), 180);
        assert_eq!(effective_duration(180, Some(f64::NAN), true, false), 180);
        assert_eq!(effective_duration(180, Some(f64::INFINITY), false, false), 180);
    }

    #[test]
    fn smart_duration_scenario() {
        // configured 180s, media 45s: the warning window opens at remaining
        // 30 (elapsed 15), the flash window at remaining 15 (elapsed 30),
        // completion at 45.
        let mut s = PlaybackSession::new(180);
        s.begin(local_video());
        s.set_media_duration(Some(45.0));
        assert_eq!(s.effective_secs(), 45);

        for _ in 1..=14 {
            assert_eq!(s.tick(), TickOutcome::Running);
        }
        assert_eq!(s.phase, PlaybackPhase::Playing);

        assert_eq!(s.tick(), TickOutcome::EnteredWarning); // elapsed 15, remaining 30
        assert_eq!(s.phase, PlaybackPhase::Warning);
        s.tick();
        assert_eq!(s.elapsed_secs, 16); // remaining 29, still Warning
        assert_eq!(s.phase, PlaybackPhase::Warning);

        for _ in 17..=29 {
            assert_eq!(s.tick(), TickOutcome::Running);
        }
        assert_eq!(s.tick(), TickOutcome::EnteredFlashing); // elapsed 30, remaining 15
        assert_eq!(s.phase, PlaybackPhase::Flashing);
        s.tick();
        assert_eq!(s.elapsed_secs, 31); // remaining 14, still Flashing
        assert_eq!(s.phase, PlaybackPhase::Flashing);

        for _ in 32..=44 {
            assert_eq!(s.tick(), TickOutcome::Running);
        }
        assert_eq!(s.tick(), TickOutcome::Completed);
        assert_eq!(s.elapsed_secs, 45);
        assert_eq!(s.phase, PlaybackPhase::Completed);
    }

    #[test]
    fn completion_boundary_is_exact() {
        let mut s = PlaybackSession::new(10);
        s.begin(local_video());

        for n in 1..10 {
            assert_ne!(s.tick(), TickOutcome::Completed, "tick {}", n);
        }
        assert_eq!(s.tick(), TickOutcome::Completed);
        assert_eq!(s.elapsed_secs, 10);

        // Terminal: a stray 11th tick is ignored and does not advance time.
        assert_eq!(s.tick(), TickOutcome::Ignored);
        assert_eq!(s.elapsed_secs, 10);
        assert_eq!(s.phase, PlaybackPhase::Completed);
    }

    #[test]
    fn ticking_never_demotes_flashing() {
        let mut s = PlaybackSession::new(60);
        s.begin(local_video());
        while s.phase != PlaybackPhase::Flashing {
            s.tick();
        }
        loop {
            match s.tick() {
                TickOutcome::Completed => break,
                _ => assert_eq!(s.phase, PlaybackPhase::Flashing),
            }
        }
    }

    #[test]
    fn seek_moves_phase_both_directions() {
        let mut s = PlaybackSession::new(120);
        s.begin(local_video());

        // Forward into the flash window.
        assert_eq!(s.seek(115), Some(CadenceChange::Start));
        assert_eq!(s.phase, PlaybackPhase::Flashing);

        // Back out to plenty of remaining time: Flashing -> Playing.
        assert_eq!(s.seek(20), Some(CadenceChange::Stop));
        assert_eq!(s.phase, PlaybackPhase::Playing);
        assert!(s.flash_on);

        // Into the warning window.
        assert_eq!(s.seek(95), Some(CadenceChange::Stop));
        assert_eq!(s.phase, PlaybackPhase::Warning);
    }

    #[test]
    fn seek_within_flash_window_keeps_cadence() {
        let mut s = PlaybackSession::new(120);
        s.begin(local_video());
        assert_eq!(s.seek(110), Some(CadenceChange::Start));
        assert_eq!(s.seek(112), Some(CadenceChange::Unchanged));
        assert_eq!(s.phase, PlaybackPhase::Flashing);
    }

    #[test]
    fn seek_rejected_when_inactive_or_browser() {
        let mut s = PlaybackSession::new(120);
        assert_eq!(s.seek(10), None);

        s.begin(MediaSource::BrowserView {
            url: "https://youtube.com/watch?v=abc".into(),
        });
        assert_eq!(s.seek(10), None);
    }

    #[test]
    fn flash_toggle_only_while_flashing() {
        let mut s = PlaybackSession::new(20);
        s.begin(local_video());
        s.toggle_flash();
        assert!(s.flash_on, "pulse must not toggle outside Flashing");

        let _ = s.seek(10); // remaining 10 -> Flashing
        s.toggle_flash();
        assert!(!s.flash_on);
        s.toggle_flash();
        assert!(s.flash_on);
    }

    #[test]
    fn halt_resets_transient_fields() {
        let mut s = PlaybackSession::new(60);
        s.full_length = true;
        s.begin(local_video());
        s.set_media_duration(Some(300.0));
        s.tick();
        s.halt();

        assert_eq!(s.phase, PlaybackPhase::Idle);
        assert_eq!(s.elapsed_secs, 0);
        assert!(s.source.is_none());
        assert!(s.media_secs.is_none());
        assert!(!s.full_length);
        assert!(s.flash_on);
    }

    #[test]
    fn begin_clears_stale_media_duration() {
        let mut s = PlaybackSession::new(60);
        s.begin(local_video());
        s.set_media_duration(Some(45.0));
        s.finish();

        s.begin(local_video());
        assert!(s.media_secs.is_none());
        assert_eq!(s.effective_secs(), 60);
    }
}
