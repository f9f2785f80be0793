//! Editable inputs seeded once from the device.
//!
//! Device values land in these fields on the first reconciliation that
//! carries them; after that the local values are authoritative until the user
//! submits them.  A field the user is editing at that moment is skipped.

use matrix_proto::marquee::{decode565, SpeedRange, TextCounter};
use matrix_proto::protocol::StatusPayload;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ControlField {
    MarqueeText,
    MarqueeSpeed,
    MarqueeSize,
    MarqueeColor,
    Timezone,
}

/// One-shot latch guarding the initial fill.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ControlsLatch {
    #[default]
    NotApplied,
    Applied,
}

impl ControlsLatch {
    /// Fire the latch.  Returns `true` only on the first call.
    pub fn fire(&mut self) -> bool {
        match self {
            Self::NotApplied => {
                *self = Self::Applied;
                true
            }
            Self::Applied => false,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EditableControls {
    pub marquee_text: String,
    /// Slider position (bigger = faster).
    pub marquee_speed: u32,
    pub marquee_size: u8,
    /// `#rrggbb`
    pub marquee_color: String,
    pub timezone: String,
    #[serde(skip)]
    editing: Option<ControlField>,
}

impl EditableControls {
    pub fn new(speed: SpeedRange) -> Self {
        Self {
            marquee_text: String::new(),
            marquee_speed: speed.min(),
            marquee_size: 1,
            marquee_color: "#ffffff".to_string(),
            timezone: String::new(),
            editing: None,
        }
    }

    pub fn begin_edit(&mut self, field: ControlField) {
        self.editing = Some(field);
    }

    pub fn end_edit(&mut self) {
        self.editing = None;
    }

    pub fn is_editing(&self, field: ControlField) -> bool {
        self.editing == Some(field)
    }

    pub fn text_counter(&self) -> TextCounter {
        TextCounter::for_text(&self.marquee_text)
    }

    /// Copy every control value present in `payload`, skipping the field
    /// under edit.  Returns the fields that were written.
    pub fn fill_from(&mut self, payload: &StatusPayload, speed: SpeedRange) -> Vec<ControlField> {
        let mut filled = Vec::new();

        if let Some(text) = &payload.marquee_text {
            if self.take(ControlField::MarqueeText) {
                self.marquee_text = text.clone();
                filled.push(ControlField::MarqueeText);
            }
        }
        if let Some(delay) = payload.marquee_delay_ms {
            if self.take(ControlField::MarqueeSpeed) {
                self.marquee_speed = speed.slider_from_delay(delay);
                filled.push(ControlField::MarqueeSpeed);
            }
        }
        if let Some(size) = payload.marquee_size {
            if self.take(ControlField::MarqueeSize) {
                self.marquee_size = size;
                filled.push(ControlField::MarqueeSize);
            }
        }
        if let Some(color) = payload.marquee_color565 {
            if self.take(ControlField::MarqueeColor) {
                self.marquee_color = decode565(color);
                filled.push(ControlField::MarqueeColor);
            }
        }
        if let Some(tz) = &payload.timezone {
            if self.take(ControlField::Timezone) {
                self.timezone = tz.clone();
                filled.push(ControlField::Timezone);
            }
        }

        filled
    }

    fn take(&self, field: ControlField) -> bool {
        !self.is_editing(field)
    }
}
