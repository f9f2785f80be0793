//! Device command callers.
//!
//! Each command is fire-once: no retries, no queueing.  Only a `success` or
//! `info` response counts as success; anything else is a `CommandError`.

use std::time::Duration;

use matrix_proto::marquee::{encode565, SpeedRange};
use matrix_proto::protocol::{
    paths, BrightnessRequest, CommandResponse, DisplayMode, MarqueeConfigRequest,
    MarqueeTextRequest, PlaybackMode, PlaybackModeRequest, TimezoneRequest,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::CommandError;
use crate::playback::Transition;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCommand {
    SetBrightness(u8),
    ResetWifi,
    Restart,
    /// Switch the display program.
    ActivateDisplay(DisplayMode),
    /// Set the playback ordering, then start batch playback.
    PlayBatch(PlaybackMode),
    SetMarqueeText(String),
    /// `speed` is a slider position, `color` a `#rrggbb` string.
    SetMarqueeConfig {
        speed: u32,
        size: u8,
        color: String,
    },
    SetTimezone(String),
}

impl DeviceCommand {
    /// Local transition a successful response licenses.
    pub fn transition(&self) -> Option<Transition> {
        match self {
            Self::ActivateDisplay(mode) => Some(Transition::Display(*mode)),
            Self::PlayBatch(mode) => Some(Transition::Batch(*mode)),
            _ => None,
        }
    }

    /// Message shown when the device acknowledges without one of its own.
    pub fn describe(&self) -> String {
        match self {
            Self::SetBrightness(value) => format!("Brightness set to {value}"),
            Self::ResetWifi => "WiFi settings reset".to_string(),
            Self::Restart => "Restarting device".to_string(),
            Self::ActivateDisplay(mode) => format!("Display set to {mode}"),
            Self::PlayBatch(mode) => format!("Playing {mode}"),
            Self::SetMarqueeText(_) => "Marquee text updated".to_string(),
            Self::SetMarqueeConfig { .. } => "Marquee settings updated".to_string(),
            Self::SetTimezone(tz) => format!("Timezone set to {tz}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommandDispatcher {
    http: reqwest::Client,
    base: String,
    timeout: Duration,
    speed: SpeedRange,
}

impl CommandDispatcher {
    pub fn new(http: reqwest::Client, base: &str, timeout: Duration, speed: SpeedRange) -> Self {
        Self {
            http,
            base: base.trim_end_matches('/').to_string(),
            timeout,
            speed,
        }
    }

    pub async fn execute(&self, command: &DeviceCommand) -> Result<CommandResponse, CommandError> {
        info!("dispatch: {:?}", command);
        match command {
            DeviceCommand::SetBrightness(value) => {
                self.post(paths::BRIGHTNESS, Some(&BrightnessRequest { value: *value }))
                    .await
            }
            DeviceCommand::ResetWifi => self.post::<()>(paths::WIFI_RESET, None).await,
            DeviceCommand::Restart => self.post::<()>(paths::RESTART, None).await,
            DeviceCommand::ActivateDisplay(mode) => self.activate(*mode).await,
            DeviceCommand::PlayBatch(mode) => self.play_batch(*mode).await,
            DeviceCommand::SetMarqueeText(text) => {
                self.post(
                    paths::MARQUEE_TEXT,
                    Some(&MarqueeTextRequest { text: text.clone() }),
                )
                .await
            }
            DeviceCommand::SetMarqueeConfig { speed, size, color } => {
                let color565 =
                    encode565(color).ok_or_else(|| CommandError::InvalidColor(color.clone()))?;
                let body = MarqueeConfigRequest {
                    delay_ms: self.speed.delay_from_slider(*speed),
                    size: *size,
                    color565,
                };
                self.post(paths::MARQUEE_CONFIG, Some(&body)).await
            }
            DeviceCommand::SetTimezone(timezone) => {
                self.post(
                    paths::TIMEZONE,
                    Some(&TimezoneRequest {
                        timezone: timezone.clone(),
                    }),
                )
                .await
            }
        }
    }

    async fn activate(&self, mode: DisplayMode) -> Result<CommandResponse, CommandError> {
        self.post::<()>(&paths::display(mode), None).await
    }

    /// Mode set and activation run strictly in sequence.  Activation is sent
    /// even when the mode set fails; either failure fails the command.
    async fn play_batch(&self, mode: PlaybackMode) -> Result<CommandResponse, CommandError> {
        let mode_set = self
            .post(paths::PLAYBACK_MODE, Some(&PlaybackModeRequest { mode }))
            .await;
        if let Err(e) = &mode_set {
            warn!("dispatch: playback mode {} not accepted: {}", mode, e);
        }
        let activated = self.activate(DisplayMode::Batch).await?;
        mode_set?;
        Ok(activated)
    }

    async fn post<B: Serialize>(
        &self,
        path: &str,
        body: Option<&B>,
    ) -> Result<CommandResponse, CommandError> {
        let url = format!("{}{}", self.base, path);
        let mut request = self.http.post(&url).timeout(self.timeout);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|source| CommandError::Network {
            path: path.to_string(),
            source,
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(CommandError::Http {
                path: path.to_string(),
                status,
            });
        }

        let parsed: CommandResponse =
            response.json().await.map_err(|source| CommandError::Decode {
                path: path.to_string(),
                source,
            })?;
        debug!("dispatch: {} -> {:?}", path, parsed.status);

        if parsed.is_ok() {
            Ok(parsed)
        } else {
            Err(CommandError::Rejected(parsed.message.unwrap_or_else(|| {
                format!("{path} returned {:?}", parsed.status)
            })))
        }
    }
}
