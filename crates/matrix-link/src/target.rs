//! Connection target resolution.
//!
//! Resolution order at startup:
//!   1. a persisted override
//!   2. same origin, when the host page is served by the device itself
//!   3. the host page's own origin, when it is HTTP(S)
//!   4. the configured fallback address
//!
//! The empty origin is the canonical "same origin as the host page" value.

use matrix_proto::state::TargetStore;
use reqwest::Url;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::ConfigError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionTarget {
    origin: String,
}

impl ConnectionTarget {
    pub fn same_origin() -> Self {
        Self::default()
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn is_same_origin(&self) -> bool {
        self.origin.is_empty()
    }
}

/// The page (or other HTTP context) hosting the controller.
#[derive(Debug, Clone, Default)]
pub struct HostPage {
    url: Option<Url>,
}

impl HostPage {
    /// Empty or unparsable input means "no host page".
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.is_empty() {
            return Self::default();
        }
        Self {
            url: Url::parse(raw).ok(),
        }
    }

    fn is_http(&self) -> bool {
        self.url
            .as_ref()
            .is_some_and(|u| matches!(u.scheme(), "http" | "https"))
    }

    /// Served straight from the device: HTTP(S), with a hostname that is
    /// neither empty nor loopback.
    pub fn is_served_by_device(&self) -> bool {
        let Some(host) = self.url.as_ref().and_then(|u| u.host_str()) else {
            return false;
        };
        self.is_http() && !host.is_empty() && !is_loopback(host)
    }

    pub fn origin(&self) -> Option<String> {
        if !self.is_http() {
            return None;
        }
        self.url.as_ref().map(|u| u.origin().ascii_serialization())
    }
}

fn is_loopback(host: &str) -> bool {
    matches!(host, "localhost" | "127.0.0.1" | "::1" | "[::1]")
}

pub struct TargetResolver {
    store: Box<dyn TargetStore>,
    host: HostPage,
    fallback: String,
}

impl TargetResolver {
    pub fn new(store: Box<dyn TargetStore>, host: HostPage, fallback: impl Into<String>) -> Self {
        Self {
            store,
            host,
            fallback: fallback.into(),
        }
    }

    pub fn resolve(&self) -> ConnectionTarget {
        if let Some(origin) = self.store.load() {
            debug!("target: persisted override {}", origin);
            return ConnectionTarget { origin };
        }
        if self.host.is_served_by_device() {
            return ConnectionTarget::same_origin();
        }
        if let Some(origin) = self.host.origin() {
            return ConnectionTarget { origin };
        }
        ConnectionTarget {
            origin: self.fallback.clone(),
        }
    }

    /// Normalize user input, persist it, and return the new target.  Empty
    /// input resets to same-origin where that is possible.
    pub fn set(&mut self, raw: &str) -> Result<ConnectionTarget, ConfigError> {
        let target = self.normalize(raw)?;
        self.persist(&target)?;
        info!(
            "target: set to {}",
            if target.is_same_origin() {
                "same origin"
            } else {
                target.origin()
            }
        );
        Ok(target)
    }

    pub fn persist(&mut self, target: &ConnectionTarget) -> Result<(), ConfigError> {
        let result = if target.is_same_origin() {
            self.store.clear()
        } else {
            self.store.save(target.origin())
        };
        result.map_err(|e| ConfigError::Storage(e.to_string()))
    }

    pub fn helper_text(&self, target: &ConnectionTarget) -> String {
        if target.is_same_origin() {
            match self.host.origin() {
                Some(origin) => format!("Using the device serving this page ({origin})"),
                None => "Using the device serving this page".to_string(),
            }
        } else {
            format!("Sending requests to {}", target.origin())
        }
    }

    /// Absolute base URL that request paths are appended to.
    pub fn base_url(&self, target: &ConnectionTarget) -> Result<String, ConfigError> {
        if target.is_same_origin() {
            self.host.origin().ok_or(ConfigError::NoHostOrigin)
        } else {
            Ok(target.origin().to_string())
        }
    }

    fn normalize(&self, raw: &str) -> Result<ConnectionTarget, ConfigError> {
        if raw.trim().is_empty() && self.host.is_served_by_device() {
            return Ok(ConnectionTarget::same_origin());
        }
        normalize_address(raw).map(|origin| ConnectionTarget { origin })
    }
}

/// Turn a user-entered address into an origin: default `http://` scheme,
/// trailing slashes stripped, host required.
pub fn normalize_address(raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::AddressRequired);
    }

    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    };
    let origin = with_scheme.trim_end_matches('/').to_string();

    match Url::parse(&origin) {
        Ok(url) if url.host_str().is_some_and(|h| !h.is_empty()) => Ok(origin),
        _ => Err(ConfigError::InvalidAddress(trimmed.to_string())),
    }
}
