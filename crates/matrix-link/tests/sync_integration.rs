//! End-to-end tests of the sync loop against an in-process mock device.
//!
//! The mock serves the status path, an SSE event stream and the command
//! endpoints on an ephemeral localhost port.

use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::{StatusCode, Uri};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use matrix_link::dispatch::DeviceCommand;
use matrix_link::playback::ControlState;
use matrix_link::reconcile::{CanonicalState, Connectivity};
use matrix_link::status::Severity;
use matrix_link::transport::Channel;
use matrix_link::{SyncHandle, UiEvent};
use matrix_proto::config::Config;
use matrix_proto::protocol::{DisplayMode, PlaybackMode};
use matrix_proto::state::{FileTargetStore, MemoryTargetStore, TargetStore};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

#[derive(Clone)]
struct MockDevice {
    status: Arc<Mutex<Value>>,
    push: broadcast::Sender<String>,
    /// `(path, body)` of every command received, in order.
    commands: Arc<Mutex<Vec<(String, String)>>>,
    status_hits: Arc<AtomicUsize>,
    stream_opens: Arc<AtomicUsize>,
    refuse_stream: Arc<AtomicBool>,
    refuse_status: Arc<AtomicBool>,
}

impl MockDevice {
    fn new(status: Value) -> Self {
        let (push, _) = broadcast::channel(16);
        Self {
            status: Arc::new(Mutex::new(status)),
            push,
            commands: Arc::new(Mutex::new(Vec::new())),
            status_hits: Arc::new(AtomicUsize::new(0)),
            stream_opens: Arc::new(AtomicUsize::new(0)),
            refuse_stream: Arc::new(AtomicBool::new(false)),
            refuse_status: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start serving; returns the base URL.
    async fn serve(&self) -> String {
        let app = Router::new()
            .route("/api/status", get(status))
            .route("/api/events", get(events))
            .route("/api/brightness", post(brightness))
            .route("/api/playback/mode", post(command))
            .route("/api/display/:mode", post(command))
            .with_state(self.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn commands(&self) -> Vec<(String, String)> {
        self.commands.lock().unwrap().clone()
    }

    async fn wait_for_stream(&self, opens: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.stream_opens.load(Ordering::SeqCst) < opens {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("event stream never opened");
    }
}

async fn status(State(device): State<MockDevice>) -> Response {
    device.status_hits.fetch_add(1, Ordering::SeqCst);
    if device.refuse_status.load(Ordering::SeqCst) {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    Json(device.status.lock().unwrap().clone()).into_response()
}

async fn events(State(device): State<MockDevice>) -> Response {
    let rx = device.push.subscribe();
    device.stream_opens.fetch_add(1, Ordering::SeqCst);
    if device.refuse_stream.load(Ordering::SeqCst) {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    let stream = futures_util::stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(data) => return Some((Ok::<_, Infallible>(Event::default().data(data)), rx)),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    });
    Sse::new(stream).into_response()
}

async fn command(State(device): State<MockDevice>, uri: Uri, body: String) -> Json<Value> {
    device
        .commands
        .lock()
        .unwrap()
        .push((uri.path().to_string(), body));
    Json(json!({ "status": "success" }))
}

async fn brightness(State(device): State<MockDevice>, body: String) -> Json<Value> {
    device
        .commands
        .lock()
        .unwrap()
        .push(("/api/brightness".to_string(), body));
    Json(json!({ "status": "error", "message": "brightness locked" }))
}

fn config(push: bool) -> Config {
    let mut config = Config::default();
    config.transport.push = push;
    config.transport.poll_interval_secs = 60;
    config.transport.request_timeout_secs = 2;
    config
}

fn start(config: Config, store: Box<dyn TargetStore>) -> (SyncHandle, broadcast::Receiver<UiEvent>) {
    let (ui_tx, ui_rx) = broadcast::channel(256);
    let handle = matrix_link::spawn(config, store, ui_tx).unwrap();
    (handle, ui_rx)
}

async fn wait_for<T>(
    rx: &mut broadcast::Receiver<UiEvent>,
    mut pick: impl FnMut(&UiEvent) -> Option<T>,
) -> T {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Ok(evt) => {
                    if let Some(found) = pick(&evt) {
                        return found;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("ui channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for ui event")
}

fn connected_state(evt: &UiEvent) -> Option<CanonicalState> {
    match evt {
        UiEvent::State(state) if state.connectivity == Connectivity::Connected => {
            Some(state.clone())
        }
        _ => None,
    }
}

#[tokio::test]
async fn test_pushed_clock_state_marks_clock_active() {
    let device = MockDevice::new(json!({ "status": "connected" }));
    let base = device.serve().await;
    let (handle, mut ui_rx) = start(config(true), Box::new(MemoryTargetStore::with_value(&base)));

    device.wait_for_stream(1).await;
    device
        .push
        .send(json!({ "status": "connected", "playback_state": "clock" }).to_string())
        .unwrap();

    let view = wait_for(&mut ui_rx, |evt| match evt {
        UiEvent::View(view) if view.active_display() == Some(DisplayMode::Clock) => {
            Some(view.clone())
        }
        _ => None,
    })
    .await;

    for mode in DisplayMode::ALL {
        let expected = if mode == DisplayMode::Clock {
            ControlState {
                active: true,
                disabled: true,
            }
        } else {
            ControlState::default()
        };
        assert_eq!(view.display_control(mode), expected, "{mode}");
    }
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_malformed_push_event_is_dropped() {
    let device = MockDevice::new(json!({ "status": "connected" }));
    let base = device.serve().await;
    let (handle, mut ui_rx) = start(config(true), Box::new(MemoryTargetStore::with_value(&base)));

    device.wait_for_stream(1).await;
    device.push.send("{not json".to_string()).unwrap();
    device
        .push
        .send(json!({ "status": "connected", "brightness": 42 }).to_string())
        .unwrap();

    let state = wait_for(&mut ui_rx, |evt| {
        connected_state(evt).filter(|s| s.brightness == Some(42))
    })
    .await;
    assert_eq!(state.connectivity, Connectivity::Connected);
    // the stream survived the bad event
    assert_eq!(device.stream_opens.load(Ordering::SeqCst), 1);
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_play_random_is_applied_before_next_status() {
    let device = MockDevice::new(json!({
        "status": "connected",
        "playback_state": "stopped",
        "playback_mode": "sequential",
    }));
    let base = device.serve().await;
    let (handle, mut ui_rx) = start(config(false), Box::new(MemoryTargetStore::with_value(&base)));

    wait_for(&mut ui_rx, connected_state).await;
    let response = handle
        .command(DeviceCommand::PlayBatch(PlaybackMode::Random))
        .await
        .unwrap();
    assert!(response.is_ok());

    // the optimistic view is queued ahead of the command reply
    let view = wait_for(&mut ui_rx, |evt| match evt {
        UiEvent::View(view) if view.active_display() == Some(DisplayMode::Batch) => {
            Some(view.clone())
        }
        _ => None,
    })
    .await;
    assert_eq!(view.active_playback(), Some(PlaybackMode::Random));
    assert!(view.playback_control(PlaybackMode::Random).disabled);

    let commands = device.commands();
    assert_eq!(commands.len(), 2);
    assert_eq!(commands[0].0, "/api/playback/mode");
    let body: Value = serde_json::from_str(&commands[0].1).unwrap();
    assert_eq!(body, json!({ "mode": "random" }));
    assert_eq!(commands[1].0, "/api/display/batch");

    // the follow-up refresh brings ground truth back
    let view = wait_for(&mut ui_rx, |evt| match evt {
        UiEvent::View(view) => Some(view.clone()),
        _ => None,
    })
    .await;
    assert_eq!(view.active_display(), Some(DisplayMode::Stopped));
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_rejected_command_reports_error_without_state_change() {
    let device = MockDevice::new(json!({ "status": "connected", "brightness": 10 }));
    let base = device.serve().await;
    let (handle, mut ui_rx) = start(config(false), Box::new(MemoryTargetStore::with_value(&base)));

    wait_for(&mut ui_rx, connected_state).await;
    let err = handle
        .command(DeviceCommand::SetBrightness(200))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("brightness locked"));

    let message = wait_for(&mut ui_rx, |evt| match evt {
        UiEvent::Status(m) if m.severity == Severity::Error => Some(m.clone()),
        _ => None,
    })
    .await;
    assert_eq!(message.text, "brightness locked");
    assert!(!message.persistent);
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_set_target_persists_and_restarts() {
    let alpha = MockDevice::new(json!({ "status": "connected", "ssid": "alpha" }));
    let beta = MockDevice::new(json!({ "status": "connected", "ssid": "beta" }));
    let alpha_base = alpha.serve().await;
    let beta_base = beta.serve().await;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("target.json");
    let mut store = FileTargetStore::new(&path);
    store.save(&alpha_base).unwrap();
    let (handle, mut ui_rx) = start(config(true), Box::new(store));

    let state = wait_for(&mut ui_rx, connected_state).await;
    assert_eq!(state.ssid.as_deref(), Some("alpha"));
    alpha.wait_for_stream(1).await;

    // bare host:port, as a user would type it
    let typed = beta_base.trim_start_matches("http://").to_string();
    let target = handle.set_target(&format!(" {typed}/ ")).await.unwrap();
    assert_eq!(target.origin(), beta_base);
    assert_eq!(FileTargetStore::new(&path).load().as_deref(), Some(beta_base.as_str()));

    let helper = wait_for(&mut ui_rx, |evt| match evt {
        UiEvent::Target { helper, .. } => Some(helper.clone()),
        _ => None,
    })
    .await;
    assert_eq!(helper, format!("Sending requests to {beta_base}"));

    let state = wait_for(&mut ui_rx, |evt| {
        connected_state(evt).filter(|s| s.ssid.as_deref() == Some("beta"))
    })
    .await;
    assert_eq!(state.ssid.as_deref(), Some("beta"));
    beta.wait_for_stream(1).await;
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_invalid_target_keeps_current_connection() {
    let device = MockDevice::new(json!({ "status": "connected" }));
    let base = device.serve().await;
    let (handle, mut ui_rx) = start(config(false), Box::new(MemoryTargetStore::with_value(&base)));
    wait_for(&mut ui_rx, connected_state).await;

    let err = handle.set_target("   ").await.unwrap_err();
    assert!(err.to_string().contains("address required"));

    let message = wait_for(&mut ui_rx, |evt| match evt {
        UiEvent::Status(m) if m.severity == Severity::Error => Some(m.clone()),
        UiEvent::Target { .. } => panic!("target changed on invalid input"),
        _ => None,
    })
    .await;
    assert_eq!(message.text, "address required");
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_polling_when_push_is_unsupported() {
    let device = MockDevice::new(json!({ "status": "connected" }));
    let base = device.serve().await;
    let mut config = config(false);
    config.transport.poll_interval_secs = 1;
    let (handle, mut ui_rx) = start(config, Box::new(MemoryTargetStore::with_value(&base)));

    wait_for(&mut ui_rx, |evt| match evt {
        UiEvent::Transport(snapshot) if snapshot.channel == Channel::Poll => Some(()),
        _ => None,
    })
    .await;

    // start-up fetch plus at least one scheduled poll
    tokio::time::timeout(Duration::from_secs(5), async {
        while device.status_hits.load(Ordering::SeqCst) < 2 {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("poller never fired");
    assert_eq!(device.stream_opens.load(Ordering::SeqCst), 0);
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_refused_stream_is_retried_with_backoff() {
    let device = MockDevice::new(json!({ "status": "connected" }));
    device.refuse_stream.store(true, Ordering::SeqCst);
    let base = device.serve().await;
    let mut config = config(true);
    config.transport.backoff_floor_ms = 50;
    config.transport.backoff_cap_ms = 200;
    let (handle, mut ui_rx) = start(config, Box::new(MemoryTargetStore::with_value(&base)));

    let mut retrying = None;
    let mut notice = None;
    wait_for(&mut ui_rx, |evt| {
        match evt {
            UiEvent::Transport(snapshot) if snapshot.retry_pending => retrying = Some(*snapshot),
            UiEvent::Status(m) if m.severity == Severity::Warning => notice = Some(m.clone()),
            _ => {}
        }
        (retrying.is_some() && notice.is_some()).then_some(())
    })
    .await;
    assert_eq!(retrying.map(|s| s.channel), Some(Channel::None));
    let notice = notice.unwrap();
    assert!(!notice.persistent);
    assert!(notice.text.starts_with("Disconnected, retrying"));

    device.wait_for_stream(3).await;

    // once the device accepts again the stream stays up and delivers
    device.refuse_stream.store(false, Ordering::SeqCst);
    let push = device.push.clone();
    let pusher = tokio::spawn(async move {
        loop {
            let _ = push.send(json!({ "status": "connected", "timezone": "UTC" }).to_string());
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    });
    let state = wait_for(&mut ui_rx, |evt| {
        connected_state(evt).filter(|s| s.timezone.is_some())
    })
    .await;
    pusher.abort();
    assert_eq!(state.timezone.as_deref(), Some("UTC"));
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_failed_polls_show_disconnected_and_keep_polling() {
    let device = MockDevice::new(json!({ "status": "connected", "brightness": 7 }));
    device.refuse_status.store(true, Ordering::SeqCst);
    let base = device.serve().await;
    let mut config = config(false);
    config.transport.poll_interval_secs = 1;
    let (handle, mut ui_rx) = start(config, Box::new(MemoryTargetStore::with_value(&base)));

    let message = wait_for(&mut ui_rx, |evt| match evt {
        UiEvent::Status(m) if m.persistent => Some(m.clone()),
        _ => None,
    })
    .await;
    assert_eq!(message.text, "Disconnected");
    assert_eq!(message.severity, Severity::Error);

    // start-up fetch plus a failed scheduled poll
    tokio::time::timeout(Duration::from_secs(5), async {
        while device.status_hits.load(Ordering::SeqCst) < 2 {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("poller stopped after a failure");

    device.refuse_status.store(false, Ordering::SeqCst);
    let state = wait_for(&mut ui_rx, connected_state).await;
    assert_eq!(state.brightness, Some(7));
    assert_eq!(device.stream_opens.load(Ordering::SeqCst), 0);
    handle.shutdown().await.unwrap();
}
