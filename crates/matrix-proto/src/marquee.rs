//! Marquee parameter codec.
//!
//! The device stores scroll speed as a per-step delay (bigger = slower) and
//! colour as packed RGB565.  The UI works in "bigger = faster" slider units
//! and `#rrggbb` strings.  Everything here is pure and total.

/// Display limit for marquee text.  Longer text is counted, never truncated.
pub const MARQUEE_TEXT_MAX: usize = 2048;

/// Bounds of the speed slider.  The same bounds define the device delay range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpeedRange {
    min: u32,
    max: u32,
}

impl Default for SpeedRange {
    fn default() -> Self {
        Self { min: 10, max: 200 }
    }
}

impl SpeedRange {
    /// Bounds given in either order are accepted.
    pub fn new(a: u32, b: u32) -> Self {
        Self {
            min: a.min(b),
            max: a.max(b),
        }
    }

    pub fn min(&self) -> u32 {
        self.min
    }

    pub fn max(&self) -> u32 {
        self.max
    }

    /// Slider position -> device delay in milliseconds.
    pub fn delay_from_slider(&self, raw: u32) -> u32 {
        self.invert(raw)
    }

    /// Device delay -> slider position.  The mapping is its own inverse.
    pub fn slider_from_delay(&self, delay_ms: u32) -> u32 {
        self.invert(delay_ms)
    }

    fn invert(&self, value: u32) -> u32 {
        let value = value.clamp(self.min, self.max);
        // (min + max - value) without leaving u32 near the top of the range
        self.max - (value - self.min)
    }
}

/// Expand a packed RGB565 value to `#rrggbb`.
pub fn decode565(value: u16) -> String {
    let r = (value >> 11) & 0x1f;
    let g = (value >> 5) & 0x3f;
    let b = value & 0x1f;
    format!(
        "#{:02x}{:02x}{:02x}",
        scale_channel(r, 31, 255),
        scale_channel(g, 63, 255),
        scale_channel(b, 31, 255)
    )
}

/// Pack `#rrggbb` (leading `#` optional) into RGB565.  Returns `None` for
/// anything that is not six hex digits.
pub fn encode565(hex: &str) -> Option<u16> {
    let digits = hex.trim().trim_start_matches('#');
    if digits.len() != 6 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let channel = |i: usize| u8::from_str_radix(&digits[i..i + 2], 16).ok();
    let (r, g, b) = (channel(0)?, channel(2)?, channel(4)?);

    let r5 = scale_channel(u16::from(r), 255, 31);
    let g6 = scale_channel(u16::from(g), 255, 63);
    let b5 = scale_channel(u16::from(b), 255, 31);
    Some((r5 << 11) | (g6 << 5) | b5)
}

fn scale_channel(value: u16, from_max: u16, to_max: u16) -> u16 {
    let scaled = (f64::from(value) * f64::from(to_max) / f64::from(from_max)).round();
    scaled.clamp(0.0, f64::from(to_max)) as u16
}

/// `len / max` counter shown next to the marquee text input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextCounter {
    pub len: usize,
    pub max: usize,
}

impl TextCounter {
    pub fn for_text(text: &str) -> Self {
        Self {
            len: text.chars().count(),
            max: MARQUEE_TEXT_MAX,
        }
    }

    pub fn is_over(&self) -> bool {
        self.len > self.max
    }
}

impl std::fmt::Display for TextCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} / {}", self.len, self.max)
    }
}
