//! Network side of the status transport.
//!
//! Every task here is tagged with the transport generation it was spawned
//! for and reports back into the `SyncCore` loop; the core decides whether
//! the report is still current.  Tasks never touch shared state.

use std::io;
use std::time::Duration;

use futures_util::TryStreamExt;
use matrix_proto::config::DeviceConfig;
use matrix_proto::protocol::StatusPayload;
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::io::StreamReader;
use tracing::{debug, info, warn};

use crate::core::SyncEvent;
use crate::error::{ParseError, TransportError};
use crate::sse::SseDecoder;
use crate::transport::TransportInput;

/// Status endpoints of one connection target.
#[derive(Debug, Clone)]
pub struct StatusClient {
    http: reqwest::Client,
    status_url: String,
    events_url: String,
    timeout: Duration,
}

impl StatusClient {
    pub fn new(http: reqwest::Client, base: &str, device: &DeviceConfig, timeout: Duration) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            http,
            status_url: format!("{}{}", base, device.status_path),
            events_url: format!("{}{}", base, device.events_path),
            timeout,
        }
    }

    pub fn status_url(&self) -> &str {
        &self.status_url
    }

    pub async fn fetch(&self) -> Result<StatusPayload, TransportError> {
        let response = self
            .http
            .get(&self.status_url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|source| TransportError::Request {
                url: self.status_url.clone(),
                source,
            })?;
        if !response.status().is_success() {
            return Err(TransportError::Status {
                url: self.status_url.clone(),
                status: response.status(),
            });
        }
        let body = response
            .text()
            .await
            .map_err(|source| TransportError::Request {
                url: self.status_url.clone(),
                source,
            })?;
        Ok(parse_payload(&body)?)
    }

    /// Build the long-lived event-stream request.  No timeout: the stream is
    /// expected to stay open indefinitely.
    pub fn stream_request(&self) -> Result<reqwest::Request, TransportError> {
        self.http
            .get(&self.events_url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .build()
            .map_err(|source| TransportError::Build {
                url: self.events_url.clone(),
                source,
            })
    }
}

pub fn parse_payload(raw: &str) -> Result<StatusPayload, ParseError> {
    Ok(serde_json::from_str(raw)?)
}

/// Read the event stream until it ends, then report the failure.  The
/// stream never ends successfully: a clean EOF is a disconnect too.
pub async fn run_stream(
    http: reqwest::Client,
    request: reqwest::Request,
    generation: u64,
    tx: mpsc::Sender<SyncEvent>,
) {
    let reason = match read_stream(&http, request, generation, &tx).await {
        Ok(()) => "closed by device".to_string(),
        Err(e) => e.to_string(),
    };
    let _ = tx
        .send(SyncEvent::Transport(TransportInput::StreamFailed {
            generation,
            reason,
        }))
        .await;
}

async fn read_stream(
    http: &reqwest::Client,
    request: reqwest::Request,
    generation: u64,
    tx: &mpsc::Sender<SyncEvent>,
) -> Result<(), TransportError> {
    let url = request.url().to_string();
    let response = http
        .execute(request)
        .await
        .map_err(|source| TransportError::Request {
            url: url.clone(),
            source,
        })?;
    if !response.status().is_success() {
        return Err(TransportError::Status {
            url,
            status: response.status(),
        });
    }

    info!("link: event stream open ({})", url);
    if tx
        .send(SyncEvent::Transport(TransportInput::StreamOpened { generation }))
        .await
        .is_err()
    {
        return Ok(());
    }

    let body = Box::pin(
        response
            .bytes_stream()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e)),
    );
    let mut lines = StreamReader::new(body).lines();
    let mut decoder = SseDecoder::new();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| TransportError::StreamClosed(e.to_string()))?
    {
        let Some(event) = decoder.push_line(&line) else {
            continue;
        };
        match parse_payload(&event.data) {
            Ok(payload) => {
                if tx
                    .send(SyncEvent::Payload {
                        generation,
                        payload,
                    })
                    .await
                    .is_err()
                {
                    return Ok(());
                }
            }
            Err(e) => warn!("link: dropping stream event {:?}: {}", event.name, e),
        }
    }
    Ok(())
}

/// One status request, reported back as a payload or a failure.
pub async fn run_fetch(client: StatusClient, generation: u64, tx: mpsc::Sender<SyncEvent>) {
    let event = match client.fetch().await {
        Ok(payload) => SyncEvent::Payload {
            generation,
            payload,
        },
        Err(TransportError::Parse(e)) => {
            warn!("link: dropping status from {}: {}", client.status_url(), e);
            return;
        }
        Err(e) => {
            debug!("link: status fetch failed: {}", e);
            SyncEvent::FetchFailed {
                generation,
                error: e.to_string(),
            }
        }
    };
    let _ = tx.send(event).await;
}

/// Fixed-period polling.  The first tick is one interval out; the start-up
/// fetch covers the moment of entry.
pub async fn run_poller(
    client: StatusClient,
    interval: Duration,
    generation: u64,
    tx: mpsc::Sender<SyncEvent>,
) {
    info!("link: polling {} every {:?}", client.status_url(), interval);
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if tx.is_closed() {
            break;
        }
        run_fetch(client.clone(), generation, tx.clone()).await;
    }
}

pub async fn run_retry_timer(delay: Duration, generation: u64, tx: mpsc::Sender<SyncEvent>) {
    tokio::time::sleep(delay).await;
    let _ = tx
        .send(SyncEvent::Transport(TransportInput::RetryElapsed {
            generation,
        }))
        .await;
}
