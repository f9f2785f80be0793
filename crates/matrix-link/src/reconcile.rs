//! Status reconciliation.
//!
//! Folds inbound `StatusPayload`s into the canonical local state with sparse
//! update semantics: only fields present in a payload are written.  A payload
//! without the connected marker touches nothing but connectivity.
//!
//! Applying the same payload twice yields the same state; the only side
//! effect that differs is the one-shot control fill, which happens at most
//! once per session.

use matrix_proto::marquee::SpeedRange;
use matrix_proto::protocol::{DisplayMode, PlaybackMode, StatusPayload};
use serde::Serialize;
use tracing::debug;

use crate::controls::{ControlField, ControlsLatch, EditableControls};
use crate::playback::{PlaybackMachine, PlaybackView, Transition};
use crate::status::StatusMessage;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Connectivity {
    Connected,
    #[default]
    Error,
}

/// Local mirror of the device.  Owned by `Reconciler`; everybody else reads
/// snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CanonicalState {
    pub connectivity: Connectivity,
    pub ssid: Option<String>,
    pub ip: Option<String>,
    pub hostname: Option<String>,
    pub current: Option<String>,
    pub brightness: Option<u8>,
    pub display_mode: Option<DisplayMode>,
    pub playback_mode: Option<PlaybackMode>,
    pub marquee_text: Option<String>,
    pub marquee_delay_ms: Option<u32>,
    pub marquee_size: Option<u8>,
    pub marquee_color565: Option<u16>,
    pub timezone: Option<String>,
}

/// Everything one `apply` produced, for the caller to publish.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    pub state: CanonicalState,
    /// `None` when the payload was a disconnect and nothing was re-derived.
    pub view: Option<PlaybackView>,
    /// Fields written by the one-shot control fill, when it fired.
    pub controls_filled: Option<Vec<ControlField>>,
    pub status: StatusMessage,
}

#[derive(Debug)]
pub struct Reconciler {
    state: CanonicalState,
    latch: ControlsLatch,
    speed: SpeedRange,
}

impl Reconciler {
    pub fn new(speed: SpeedRange) -> Self {
        Self {
            state: CanonicalState::default(),
            latch: ControlsLatch::default(),
            speed,
        }
    }

    pub fn state(&self) -> &CanonicalState {
        &self.state
    }

    pub fn latch(&self) -> ControlsLatch {
        self.latch
    }

    pub fn apply(
        &mut self,
        payload: Option<&StatusPayload>,
        playback: &mut PlaybackMachine,
        controls: &mut EditableControls,
    ) -> Reconciliation {
        let payload = match payload {
            Some(p) if p.is_connected() => p,
            other => {
                debug!(
                    "reconcile: disconnected payload (status={:?})",
                    other.and_then(|p| p.status.as_deref())
                );
                self.state.connectivity = Connectivity::Error;
                return Reconciliation {
                    state: self.state.clone(),
                    view: None,
                    controls_filled: None,
                    status: StatusMessage::disconnected(),
                };
            }
        };

        let state = &mut self.state;
        state.connectivity = Connectivity::Connected;
        overwrite(&mut state.ssid, &payload.ssid);
        overwrite(&mut state.ip, &payload.ip);
        overwrite(&mut state.hostname, &payload.hostname);
        overwrite(&mut state.current, &payload.current);
        overwrite(&mut state.brightness, &payload.brightness);
        overwrite(&mut state.marquee_text, &payload.marquee_text);
        overwrite(&mut state.marquee_delay_ms, &payload.marquee_delay_ms);
        overwrite(&mut state.marquee_size, &payload.marquee_size);
        overwrite(&mut state.marquee_color565, &payload.marquee_color565);
        overwrite(&mut state.timezone, &payload.timezone);

        state.display_mode = effective_display_mode(payload);
        if let Some(raw) = &payload.playback_mode {
            state.playback_mode = PlaybackMode::parse(&raw.to_lowercase());
        }

        playback.sync(state.display_mode, state.playback_mode);

        let controls_filled = if payload.carries_controls() && self.latch.fire() {
            let filled = controls.fill_from(payload, self.speed);
            debug!("reconcile: initial control fill {:?}", filled);
            Some(filled)
        } else {
            None
        };

        Reconciliation {
            state: self.state.clone(),
            view: Some(playback.view()),
            controls_filled,
            status: StatusMessage::connected(),
        }
    }

    /// Record an optimistic mode change after a successful command.  The
    /// next reconciled payload supersedes it.
    pub fn apply_optimistic(
        &mut self,
        transition: Transition,
        playback: &mut PlaybackMachine,
    ) -> PlaybackView {
        playback.apply(transition);
        self.state.display_mode = playback.display();
        self.state.playback_mode = playback.playback();
        playback.view()
    }
}

fn overwrite<T: Clone>(slot: &mut Option<T>, incoming: &Option<T>) {
    if let Some(value) = incoming {
        *slot = Some(value.clone());
    }
}

/// Explicit `playback_state` wins; otherwise the legacy `playing` flag means
/// batch; otherwise the display is stopped.
fn effective_display_mode(payload: &StatusPayload) -> Option<DisplayMode> {
    match (&payload.playback_state, payload.playing) {
        (Some(raw), _) => DisplayMode::parse(raw),
        (None, Some(true)) => Some(DisplayMode::Batch),
        (None, _) => Some(DisplayMode::Stopped),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    struct Harness {
        reconciler: Reconciler,
        playback: PlaybackMachine,
        controls: EditableControls,
    }

    impl Harness {
        fn new() -> Self {
            let speed = SpeedRange::default();
            Self {
                reconciler: Reconciler::new(speed),
                playback: PlaybackMachine::new(),
                controls: EditableControls::new(speed),
            }
        }

        fn apply(&mut self, payload: &StatusPayload) -> Reconciliation {
            self.reconciler
                .apply(Some(payload), &mut self.playback, &mut self.controls)
        }
    }

    fn connected() -> StatusPayload {
        StatusPayload {
            status: Some("connected".into()),
            ..Default::default()
        }
    }

    fn maybe<T>(rng: &mut StdRng, value: impl FnOnce(&mut StdRng) -> T) -> Option<T> {
        if rng.gen_bool(0.5) {
            Some(value(rng))
        } else {
            None
        }
    }

    fn random_payload(rng: &mut StdRng) -> StatusPayload {
        const STATES: [&str; 9] = [
            "stopped", "batch", "single", "clock", "test", "life", "spectrum", "marquee", "bogus",
        ];
        const MODES: [&str; 5] = ["sequential", "RANDOM", "Folders", "", "shuffle"];
        let status = match rng.gen_range(0..6) {
            0 => None,
            1 => Some("disconnected".to_string()),
            _ => Some("connected".to_string()),
        };
        StatusPayload {
            status,
            ssid: maybe(rng, |r| format!("net-{}", r.gen_range(0..3))),
            ip: maybe(rng, |r| format!("10.0.0.{}", r.gen_range(1..255))),
            hostname: maybe(rng, |_| "matrix".to_string()),
            current: maybe(rng, |r| format!("img{}.bmp", r.gen_range(0..9))),
            brightness: maybe(rng, |r| r.gen()),
            playback_state: maybe(rng, |r| STATES[r.gen_range(0..STATES.len())].to_string()),
            playback_mode: maybe(rng, |r| MODES[r.gen_range(0..MODES.len())].to_string()),
            playing: maybe(rng, |r| r.gen_bool(0.5)),
            marquee_text: maybe(rng, |_| "scroll".to_string()),
            marquee_delay_ms: maybe(rng, |r| r.gen_range(0..400)),
            marquee_size: maybe(rng, |r| r.gen_range(1..4)),
            marquee_color565: maybe(rng, |r| r.gen()),
            timezone: maybe(rng, |_| "UTC".to_string()),
        }
    }

    #[test]
    fn test_apply_twice_is_idempotent() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        for _ in 0..500 {
            let mut h = Harness::new();
            // random prior history
            for _ in 0..rng.gen_range(0..4) {
                let p = random_payload(&mut rng);
                h.apply(&p);
            }
            let payload = random_payload(&mut rng);
            let first = h.apply(&payload);
            let controls_after_first = h.controls.clone();
            let second = h.apply(&payload);

            assert_eq!(first.state, second.state, "payload {payload:?}");
            assert_eq!(first.view, second.view);
            assert_eq!(first.status, second.status);
            assert_eq!(second.controls_filled, None);
            assert_eq!(h.controls, controls_after_first);
        }
    }

    #[test]
    fn test_missing_fields_keep_previous_values() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..500 {
            let mut h = Harness::new();
            let mut seed = random_payload(&mut rng);
            seed.status = Some("connected".into());
            h.apply(&seed);
            let before = h.reconciler.state().clone();

            let payload = random_payload(&mut rng);
            let after = h.apply(&payload).state;

            if payload.brightness.is_none() {
                assert_eq!(after.brightness, before.brightness);
            }
            if payload.ssid.is_none() {
                assert_eq!(after.ssid, before.ssid);
            }
            if payload.ip.is_none() {
                assert_eq!(after.ip, before.ip);
            }
            if payload.current.is_none() {
                assert_eq!(after.current, before.current);
            }
            if payload.marquee_text.is_none() {
                assert_eq!(after.marquee_text, before.marquee_text);
            }
            if payload.marquee_delay_ms.is_none() {
                assert_eq!(after.marquee_delay_ms, before.marquee_delay_ms);
            }
            if payload.marquee_color565.is_none() {
                assert_eq!(after.marquee_color565, before.marquee_color565);
            }
            if payload.timezone.is_none() {
                assert_eq!(after.timezone, before.timezone);
            }
            if payload.playback_mode.is_none() {
                assert_eq!(after.playback_mode, before.playback_mode);
            }
        }
    }

    #[test]
    fn test_disconnect_touches_only_connectivity() {
        let mut h = Harness::new();
        h.apply(&StatusPayload {
            brightness: Some(10),
            playback_state: Some("clock".into()),
            ..connected()
        });
        let before = h.reconciler.state().clone();

        let result = h.apply(&StatusPayload {
            status: Some("disconnected".into()),
            brightness: Some(99),
            playback_state: Some("life".into()),
            timezone: Some("UTC".into()),
            ..Default::default()
        });

        assert_eq!(result.state.connectivity, Connectivity::Error);
        assert_eq!(result.state.brightness, Some(10));
        assert_eq!(result.state.display_mode, Some(DisplayMode::Clock));
        assert_eq!(
            CanonicalState {
                connectivity: Connectivity::Connected,
                ..result.state
            },
            before
        );
        assert!(result.view.is_none());
        assert_eq!(result.status, StatusMessage::disconnected());
        assert_eq!(h.reconciler.latch(), ControlsLatch::NotApplied);
    }

    #[test]
    fn test_absent_payload_is_disconnect() {
        let mut h = Harness::new();
        let result = h
            .reconciler
            .apply(None, &mut h.playback, &mut h.controls);
        assert_eq!(result.state.connectivity, Connectivity::Error);
    }

    #[test]
    fn test_display_mode_derivation() {
        let mut h = Harness::new();
        let state = h
            .apply(&StatusPayload {
                playing: Some(true),
                ..connected()
            })
            .state;
        assert_eq!(state.display_mode, Some(DisplayMode::Batch));

        let state = h
            .apply(&StatusPayload {
                playback_state: Some("single".into()),
                playing: Some(false),
                ..connected()
            })
            .state;
        assert_eq!(state.display_mode, Some(DisplayMode::Batch));

        let state = h.apply(&connected()).state;
        assert_eq!(state.display_mode, Some(DisplayMode::Stopped));

        let result = h.apply(&StatusPayload {
            playback_state: Some("unknown".into()),
            ..connected()
        });
        assert_eq!(result.state.display_mode, None);
        assert_eq!(result.view.unwrap().active_display(), None);
    }

    #[test]
    fn test_playback_mode_is_lowercased() {
        let mut h = Harness::new();
        let state = h
            .apply(&StatusPayload {
                playback_mode: Some("RANDOM".into()),
                ..connected()
            })
            .state;
        assert_eq!(state.playback_mode, Some(PlaybackMode::Random));
    }

    #[test]
    fn test_controls_filled_once() {
        let mut h = Harness::new();
        let first = h.apply(&StatusPayload {
            marquee_text: Some("one".into()),
            ..connected()
        });
        assert_eq!(first.controls_filled, Some(vec![ControlField::MarqueeText]));
        assert_eq!(h.controls.marquee_text, "one");

        let second = h.apply(&StatusPayload {
            marquee_text: Some("two".into()),
            ..connected()
        });
        assert_eq!(second.controls_filled, None);
        assert_eq!(h.controls.marquee_text, "one");
        assert_eq!(second.state.marquee_text.as_deref(), Some("two"));
    }

    #[test]
    fn test_payload_without_controls_leaves_latch_armed() {
        let mut h = Harness::new();
        h.apply(&StatusPayload {
            brightness: Some(3),
            ..connected()
        });
        assert_eq!(h.reconciler.latch(), ControlsLatch::NotApplied);
    }

    #[test]
    fn test_optimistic_transition_superseded_by_status() {
        let mut h = Harness::new();
        h.apply(&StatusPayload {
            playback_state: Some("stopped".into()),
            playback_mode: Some("sequential".into()),
            ..connected()
        });

        let view = h
            .reconciler
            .apply_optimistic(Transition::Batch(PlaybackMode::Random), &mut h.playback);
        assert_eq!(view.active_display(), Some(DisplayMode::Batch));
        assert_eq!(view.active_playback(), Some(PlaybackMode::Random));
        assert_eq!(
            h.reconciler.state().playback_mode,
            Some(PlaybackMode::Random)
        );

        let result = h.apply(&StatusPayload {
            playback_state: Some("stopped".into()),
            playback_mode: Some("sequential".into()),
            ..connected()
        });
        assert_eq!(result.state.display_mode, Some(DisplayMode::Stopped));
        assert_eq!(result.state.playback_mode, Some(PlaybackMode::Sequential));
    }
}
