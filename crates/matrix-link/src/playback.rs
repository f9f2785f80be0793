//! Display/playback mode state machine.
//!
//! Two inputs move it: reconciled device status (authoritative) and the
//! optimistic transition applied right after a mode command succeeds.  The
//! next reconciliation always overwrites an optimistic transition.
//!
//! Rendering: the active display control is active + disabled; the active
//! playback control is active, and disabled only while the display runs
//! `batch`.  An unknown display mode leaves every display control inactive.

use matrix_proto::protocol::{DisplayMode, PlaybackMode};
use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ControlState {
    pub active: bool,
    pub disabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlaybackView {
    pub display: Vec<(DisplayMode, ControlState)>,
    pub playback: Vec<(PlaybackMode, ControlState)>,
}

impl PlaybackView {
    pub fn display_control(&self, mode: DisplayMode) -> ControlState {
        self.display
            .iter()
            .find(|(m, _)| *m == mode)
            .map(|(_, c)| *c)
            .unwrap_or_default()
    }

    pub fn playback_control(&self, mode: PlaybackMode) -> ControlState {
        self.playback
            .iter()
            .find(|(m, _)| *m == mode)
            .map(|(_, c)| *c)
            .unwrap_or_default()
    }

    pub fn active_display(&self) -> Option<DisplayMode> {
        self.display.iter().find(|(_, c)| c.active).map(|(m, _)| *m)
    }

    pub fn active_playback(&self) -> Option<PlaybackMode> {
        self.playback.iter().find(|(_, c)| c.active).map(|(m, _)| *m)
    }
}

/// Local transition licensed by a successful command response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// A display program was activated.
    Display(DisplayMode),
    /// Batch playback was started with the given ordering.
    Batch(PlaybackMode),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaybackMachine {
    display: Option<DisplayMode>,
    playback: Option<PlaybackMode>,
}

impl PlaybackMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn display(&self) -> Option<DisplayMode> {
        self.display
    }

    pub fn playback(&self) -> Option<PlaybackMode> {
        self.playback
    }

    /// Adopt device-reported modes.  `display = None` (unknown or empty
    /// state) clears the active display marker; `playback = None` clears the
    /// playback marker.
    pub fn sync(&mut self, display: Option<DisplayMode>, playback: Option<PlaybackMode>) {
        self.display = display;
        self.playback = playback;
    }

    pub fn apply(&mut self, transition: Transition) {
        match transition {
            Transition::Display(mode) => self.display = Some(mode),
            Transition::Batch(mode) => {
                self.display = Some(DisplayMode::Batch);
                self.playback = Some(mode);
            }
        }
    }

    pub fn view(&self) -> PlaybackView {
        let running_batch = self.display == Some(DisplayMode::Batch);
        let display = DisplayMode::ALL
            .iter()
            .map(|&mode| {
                let active = self.display == Some(mode);
                (
                    mode,
                    ControlState {
                        active,
                        disabled: active,
                    },
                )
            })
            .collect();
        let playback = PlaybackMode::ALL
            .iter()
            .map(|&mode| {
                let active = self.playback == Some(mode);
                (
                    mode,
                    ControlState {
                        active,
                        disabled: active && running_batch,
                    },
                )
            })
            .collect();
        PlaybackView { display, playback }
    }
}
