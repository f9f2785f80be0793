//! Single-slot status line.
//!
//! A transient message occupies the slot for the transient window and then
//! gives way to the latest persistent message.  Publishing a persistent
//! message replaces that fallback without cutting a live transient short.

use std::time::{Duration, Instant};

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusMessage {
    pub text: String,
    pub severity: Severity,
    pub persistent: bool,
}

impl StatusMessage {
    pub fn persistent(text: impl Into<String>, severity: Severity) -> Self {
        Self {
            text: text.into(),
            severity,
            persistent: true,
        }
    }

    pub fn transient(text: impl Into<String>, severity: Severity) -> Self {
        Self {
            text: text.into(),
            severity,
            persistent: false,
        }
    }

    pub fn connected() -> Self {
        Self::persistent("Connected", Severity::Success)
    }

    pub fn disconnected() -> Self {
        Self::persistent("Disconnected", Severity::Error)
    }
}

#[derive(Debug)]
struct Transient {
    message: StatusMessage,
    until: Instant,
}

#[derive(Debug)]
pub struct StatusBoard {
    window: Duration,
    transient: Option<Transient>,
    fallback: Option<StatusMessage>,
}

impl StatusBoard {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            transient: None,
            fallback: None,
        }
    }

    pub fn publish(&mut self, message: StatusMessage, now: Instant) {
        if message.persistent {
            self.fallback = Some(message);
        } else {
            self.transient = Some(Transient {
                message,
                until: now + self.window,
            });
        }
    }

    /// What the slot shows at `now`.
    pub fn current(&self, now: Instant) -> Option<&StatusMessage> {
        match &self.transient {
            Some(t) if now < t.until => Some(&t.message),
            _ => self.fallback.as_ref(),
        }
    }

    /// Drop an expired transient.  Returns `true` when the visible message
    /// changed as a result.
    pub fn tick(&mut self, now: Instant) -> bool {
        match &self.transient {
            Some(t) if now >= t.until => {
                self.transient = None;
                true
            }
            _ => false,
        }
    }
}
