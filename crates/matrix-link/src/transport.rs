//! Status transport state machine.
//!
//! ```text
//!  Idle -> Streaming -> (Reconnecting -> Streaming)*
//!       \-> Polling          (push unsupported, or stream cannot be built)
//! ```
//!
//! The machine is pure: inputs go in, effects come out, and the event loop
//! in `core` carries the effects out (spawning the stream reader, arming
//! timers, aborting tasks).  Each `Start`/`Stop` bumps the generation; inputs
//! tagged with an older generation come from channels that are already gone
//! and are ignored.
//!
//! Invariants: at most one channel (stream or poll) is open, and at most one
//! reconnect timer is pending.

use std::time::Duration;

use matrix_proto::config::TransportConfig;
use serde::Serialize;
use tracing::{debug, info};

use crate::status::{Severity, StatusMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    None,
    Stream,
    Poll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Streaming,
    Reconnecting,
    Polling,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportInput {
    /// Start, or restart against a new target.
    Start,
    Stop,
    StreamOpened { generation: u64 },
    StreamFailed { generation: u64, reason: String },
    /// The stream request could not even be constructed.
    StreamUnavailable { generation: u64, reason: String },
    RetryElapsed { generation: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEffect {
    /// One-shot status request, independent of the channel.
    Fetch { generation: u64 },
    OpenStream { generation: u64 },
    CloseStream,
    ScheduleRetry { generation: u64, delay: Duration },
    CancelRetry,
    StartPolling { generation: u64, interval: Duration },
    StopPolling,
    Notify(StatusMessage),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TransportSnapshot {
    pub channel: Channel,
    pub backoff: Duration,
    pub retry_pending: bool,
    pub generation: u64,
}

#[derive(Debug)]
pub struct TransportMachine {
    phase: Phase,
    generation: u64,
    backoff: Duration,
    retry_pending: bool,
    push_supported: bool,
    floor: Duration,
    cap: Duration,
    poll_interval: Duration,
}

impl TransportMachine {
    pub fn new(config: &TransportConfig) -> Self {
        Self {
            phase: Phase::Idle,
            generation: 0,
            backoff: config.backoff_floor(),
            retry_pending: false,
            push_supported: config.push,
            floor: config.backoff_floor(),
            cap: config.backoff_cap(),
            poll_interval: config.poll_interval(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.phase != Phase::Idle && generation == self.generation
    }

    pub fn snapshot(&self) -> TransportSnapshot {
        TransportSnapshot {
            channel: match self.phase {
                Phase::Streaming => Channel::Stream,
                Phase::Polling => Channel::Poll,
                Phase::Idle | Phase::Reconnecting => Channel::None,
            },
            backoff: self.backoff,
            retry_pending: self.retry_pending,
            generation: self.generation,
        }
    }

    pub fn handle(&mut self, input: TransportInput) -> Vec<TransportEffect> {
        match input {
            TransportInput::Start => self.start(),
            TransportInput::Stop => self.stop(),
            TransportInput::StreamOpened { generation } => {
                if self.phase == Phase::Streaming && generation == self.generation {
                    debug!("transport: stream open, backoff reset");
                    self.backoff = self.floor;
                }
                Vec::new()
            }
            TransportInput::StreamFailed { generation, reason } => {
                if self.phase != Phase::Streaming || generation != self.generation {
                    debug!("transport: stale stream failure ignored ({})", reason);
                    return Vec::new();
                }
                let delay = self.backoff;
                self.backoff = (self.backoff * 2).min(self.cap);
                self.phase = Phase::Reconnecting;
                self.retry_pending = true;
                info!(
                    "transport: stream failed ({}), retrying in {}ms",
                    reason,
                    delay.as_millis()
                );
                vec![
                    TransportEffect::CloseStream,
                    TransportEffect::ScheduleRetry {
                        generation: self.generation,
                        delay,
                    },
                    TransportEffect::Notify(StatusMessage::transient(
                        format!("Disconnected, retrying in {}s", delay.as_secs()),
                        Severity::Warning,
                    )),
                ]
            }
            TransportInput::StreamUnavailable { generation, reason } => {
                if self.phase != Phase::Streaming || generation != self.generation {
                    return Vec::new();
                }
                info!("transport: push stream unavailable ({}), polling", reason);
                self.phase = Phase::Polling;
                vec![
                    TransportEffect::CloseStream,
                    TransportEffect::StartPolling {
                        generation: self.generation,
                        interval: self.poll_interval,
                    },
                ]
            }
            TransportInput::RetryElapsed { generation } => {
                if self.phase != Phase::Reconnecting
                    || !self.retry_pending
                    || generation != self.generation
                {
                    return Vec::new();
                }
                self.retry_pending = false;
                self.phase = Phase::Streaming;
                vec![TransportEffect::OpenStream {
                    generation: self.generation,
                }]
            }
        }
    }

    fn start(&mut self) -> Vec<TransportEffect> {
        let mut effects = self.stop();
        self.generation += 1;
        self.backoff = self.floor;

        effects.push(TransportEffect::Fetch {
            generation: self.generation,
        });
        if self.push_supported {
            self.phase = Phase::Streaming;
            effects.push(TransportEffect::OpenStream {
                generation: self.generation,
            });
        } else {
            self.phase = Phase::Polling;
            effects.push(TransportEffect::StartPolling {
                generation: self.generation,
                interval: self.poll_interval,
            });
        }
        info!(
            "transport: started generation {} ({:?})",
            self.generation, self.phase
        );
        effects
    }

    fn stop(&mut self) -> Vec<TransportEffect> {
        let mut effects = Vec::new();
        match self.phase {
            Phase::Idle => return effects,
            Phase::Streaming => effects.push(TransportEffect::CloseStream),
            Phase::Polling => effects.push(TransportEffect::StopPolling),
            Phase::Reconnecting => {}
        }
        if self.retry_pending {
            effects.push(TransportEffect::CancelRetry);
        }
        self.retry_pending = false;
        self.phase = Phase::Idle;
        self.generation += 1;
        debug!("transport: stopped");
        effects
    }
}
