use serde::{Deserialize, Serialize};

/// Marker value of `StatusPayload::status` for a reachable device.
pub const STATUS_CONNECTED: &str = "connected";

/// Command endpoint paths, relative to the device origin.
pub mod paths {
    use super::DisplayMode;

    pub const BRIGHTNESS: &str = "/api/brightness";
    pub const WIFI_RESET: &str = "/api/wifi/reset";
    pub const RESTART: &str = "/api/restart";
    pub const PLAYBACK_MODE: &str = "/api/playback/mode";
    pub const MARQUEE_TEXT: &str = "/api/marquee/text";
    pub const MARQUEE_CONFIG: &str = "/api/marquee/config";
    pub const TIMEZONE: &str = "/api/timezone";

    /// Activation endpoint for one display mode, e.g. `/api/display/clock`.
    pub fn display(mode: DisplayMode) -> String {
        format!("/api/display/{}", mode.as_str())
    }
}

/// Which visual program the device renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayMode {
    Stopped,
    Batch,
    Clock,
    Test,
    Life,
    Spectrum,
    Marquee,
}

impl DisplayMode {
    pub const ALL: [DisplayMode; 7] = [
        DisplayMode::Stopped,
        DisplayMode::Batch,
        DisplayMode::Clock,
        DisplayMode::Test,
        DisplayMode::Life,
        DisplayMode::Spectrum,
        DisplayMode::Marquee,
    ];

    /// Parse a device-reported state.  `single` is the legacy name for
    /// `batch`.  Returns `None` for empty or unknown values.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "stopped" => Some(Self::Stopped),
            "batch" | "single" => Some(Self::Batch),
            "clock" => Some(Self::Clock),
            "test" => Some(Self::Test),
            "life" => Some(Self::Life),
            "spectrum" => Some(Self::Spectrum),
            "marquee" => Some(Self::Marquee),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Batch => "batch",
            Self::Clock => "clock",
            Self::Test => "test",
            Self::Life => "life",
            Self::Spectrum => "spectrum",
            Self::Marquee => "marquee",
        }
    }
}

impl std::fmt::Display for DisplayMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordering policy for image-sequence playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackMode {
    Sequential,
    Random,
    Folders,
}

impl PlaybackMode {
    pub const ALL: [PlaybackMode; 3] = [
        PlaybackMode::Sequential,
        PlaybackMode::Random,
        PlaybackMode::Folders,
    ];

    /// Case-insensitive parse; `None` for anything unrecognised.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "sequential" => Some(Self::Sequential),
            "random" => Some(Self::Random),
            "folders" => Some(Self::Folders),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sequential => "sequential",
            Self::Random => "random",
            Self::Folders => "folders",
        }
    }
}

impl std::fmt::Display for PlaybackMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status record pushed on the event stream and returned by the status path.
///
/// Every field is optional: `None` means "not reported in this payload", and
/// consumers must leave their copy of that field untouched.  A JSON `null` is
/// treated the same as an absent key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusPayload {
    /// `"connected"` when the device is up; anything else is a disconnect.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    /// Identifier of the image or program currently on screen.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brightness: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub playback_state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub playback_mode: Option<String>,
    /// Legacy firmware flag: batch playback running.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub playing: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub marquee_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub marquee_delay_ms: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub marquee_size: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub marquee_color565: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
}

impl StatusPayload {
    pub fn is_connected(&self) -> bool {
        self.status.as_deref() == Some(STATUS_CONNECTED)
    }

    /// True when the payload carries any value that seeds an editable control.
    pub fn carries_controls(&self) -> bool {
        self.marquee_text.is_some()
            || self.marquee_delay_ms.is_some()
            || self.marquee_size.is_some()
            || self.marquee_color565.is_some()
            || self.timezone.is_some()
    }
}

/// Outcome marker of a command response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Info,
    Error,
    #[serde(other)]
    Unknown,
}

/// Body returned by every command endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResponse {
    pub status: ResponseStatus,
    #[serde(default)]
    pub message: Option<String>,
    /// Mode-specific fields (e.g. the mode that was set).
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl CommandResponse {
    /// Only `success` and `info` allow the caller to apply an optimistic
    /// state change.
    pub fn is_ok(&self) -> bool {
        matches!(self.status, ResponseStatus::Success | ResponseStatus::Info)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrightnessRequest {
    pub value: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackModeRequest {
    pub mode: PlaybackMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarqueeTextRequest {
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarqueeConfigRequest {
    pub delay_ms: u32,
    pub size: u8,
    pub color565: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimezoneRequest {
    pub timezone: String,
}
