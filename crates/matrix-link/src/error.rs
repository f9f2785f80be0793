//! Failure taxonomy.  None of these are fatal: each is absorbed where it
//! occurs and turned into a status message plus a log line.

use thiserror::Error;

/// Status stream or status fetch failed.  Recovered by reconnect/poll.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("cannot build request for {url}: {source}")]
    Build {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} answered HTTP {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },
    #[error("event stream closed: {0}")]
    StreamClosed(String),
    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// Inbound status body was not a valid payload.  Dropped.
#[derive(Debug, Error)]
#[error("malformed status payload: {source}")]
pub struct ParseError {
    #[from]
    source: serde_json::Error,
}

/// A device command did not succeed.  Reported; no state change.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("{path}: {source}")]
    Network {
        path: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{path}: HTTP {status}")]
    Http {
        path: String,
        status: reqwest::StatusCode,
    },
    #[error("{path}: unreadable response: {source}")]
    Decode {
        path: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{0}")]
    Rejected(String),
    #[error("invalid colour {0:?}, expected #rrggbb")]
    InvalidColor(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Connection-target input or environment is unusable.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("address required")]
    AddressRequired,
    #[error("invalid address {0:?}")]
    InvalidAddress(String),
    #[error("no host origin to resolve a same-origin target against")]
    NoHostOrigin,
    #[error("cannot persist target: {0}")]
    Storage(String),
}
