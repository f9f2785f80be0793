/// SyncCore: single-owner event loop for all synchronization state.
///
/// Every input (transport reports, inbound payloads, user commands, target
/// changes, the heartbeat) arrives as a `SyncEvent` on one mpsc channel.
/// SyncCore owns the resolver, the transport machine, the reconciler, the
/// playback machine, the editable controls and the status board exclusively;
/// network work runs in spawned tasks that only ever report back here.
///
/// Renderers subscribe to a `tokio::sync::broadcast` channel of `UiEvent`s.
/// The status slot is only re-broadcast when the visible message changes.
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use matrix_proto::config::Config;
use matrix_proto::protocol::{CommandResponse, ResponseStatus, StatusPayload};
use matrix_proto::state::TargetStore;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

use crate::controls::{ControlField, EditableControls};
use crate::dispatch::{CommandDispatcher, DeviceCommand};
use crate::error::{CommandError, ConfigError};
use crate::link::{self, StatusClient};
use crate::playback::{PlaybackMachine, PlaybackView};
use crate::reconcile::{CanonicalState, Reconciler};
use crate::status::{Severity, StatusBoard, StatusMessage};
use crate::target::{ConnectionTarget, HostPage, TargetResolver};
use crate::transport::{Phase, TransportEffect, TransportInput, TransportMachine, TransportSnapshot};

const HEARTBEAT: Duration = Duration::from_millis(500);

type CommandReply = oneshot::Sender<Result<CommandResponse, CommandError>>;
type TargetReply = oneshot::Sender<Result<ConnectionTarget, ConfigError>>;

// ── SyncEvent ─────────────────────────────────────────────────────────────────

/// All inputs into the SyncCore loop.
#[derive(Debug)]
pub enum SyncEvent {
    Transport(TransportInput),
    /// A status payload from the stream, the poller or a one-shot fetch.
    Payload { generation: u64, payload: StatusPayload },
    /// A status fetch could not reach the device.
    FetchFailed { generation: u64, error: String },
    Command {
        command: DeviceCommand,
        reply: Option<CommandReply>,
    },
    /// A dispatched command came back.  `epoch` is the target epoch it was
    /// sent under.
    CommandFinished {
        command: DeviceCommand,
        epoch: u64,
        result: Result<CommandResponse, CommandError>,
        reply: Option<CommandReply>,
    },
    SetTarget {
        raw: String,
        reply: Option<TargetReply>,
    },
    BeginEdit(ControlField),
    EndEdit,
    /// Issue one immediate status fetch.
    Refresh,
    HeartbeatTick,
    Shutdown,
}

// ── UiEvent ───────────────────────────────────────────────────────────────────

/// Everything a renderer needs, broadcast by SyncCore.
#[derive(Debug, Clone)]
pub enum UiEvent {
    Status(StatusMessage),
    State(CanonicalState),
    View(PlaybackView),
    Controls(EditableControls),
    Target {
        target: ConnectionTarget,
        helper: String,
    },
    Transport(TransportSnapshot),
    /// A WARN/ERROR log line.
    Log(String),
}

/// Endpoint clients for the current target.  Absent when the target cannot
/// be turned into an absolute URL.
struct Endpoints {
    status: StatusClient,
    dispatcher: CommandDispatcher,
}

#[derive(Default)]
struct Tasks {
    stream: Option<AbortHandle>,
    retry: Option<AbortHandle>,
    poll: Option<AbortHandle>,
}

impl Tasks {
    fn abort(slot: &mut Option<AbortHandle>) {
        if let Some(handle) = slot.take() {
            handle.abort();
        }
    }

    fn abort_all(&mut self) {
        Self::abort(&mut self.stream);
        Self::abort(&mut self.retry);
        Self::abort(&mut self.poll);
    }
}

// ── SyncCore ──────────────────────────────────────────────────────────────────

pub struct SyncCore {
    config: Config,
    http: reqwest::Client,
    resolver: TargetResolver,
    target: ConnectionTarget,
    /// Bumped on every target change; fences optimistic transitions from
    /// commands sent to the previous device.
    target_epoch: u64,
    endpoints: Option<Endpoints>,
    transport: TransportMachine,
    tasks: Tasks,
    reconciler: Reconciler,
    playback: PlaybackMachine,
    controls: EditableControls,
    board: StatusBoard,
    last_status: Option<StatusMessage>,
    ui_tx: broadcast::Sender<UiEvent>,
    event_tx: mpsc::Sender<SyncEvent>,
}

impl SyncCore {
    pub fn new(
        config: Config,
        store: Box<dyn TargetStore>,
        ui_tx: broadcast::Sender<UiEvent>,
        event_tx: mpsc::Sender<SyncEvent>,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().build()?;
        let resolver = TargetResolver::new(
            store,
            HostPage::parse(&config.device.host_origin),
            config.device.fallback_address.clone(),
        );
        let target = resolver.resolve();
        let speed = config.marquee.speed_range();

        Ok(Self {
            transport: TransportMachine::new(&config.transport),
            board: StatusBoard::new(config.status.transient_window()),
            reconciler: Reconciler::new(speed),
            playback: PlaybackMachine::new(),
            controls: EditableControls::new(speed),
            config,
            http,
            resolver,
            target,
            target_epoch: 0,
            endpoints: None,
            tasks: Tasks::default(),
            last_status: None,
            ui_tx,
            event_tx,
        })
    }

    /// Run the event loop until `Shutdown`.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<SyncEvent>) -> anyhow::Result<()> {
        info!("SyncCore: starting event loop");

        let heartbeat_tx = self.event_tx.clone();
        let heartbeat = tokio::spawn(async move {
            loop {
                tokio::time::sleep(HEARTBEAT).await;
                if heartbeat_tx.send(SyncEvent::HeartbeatTick).await.is_err() {
                    break;
                }
            }
        });

        self.connect();

        loop {
            let evt = event_rx.recv().await;
            match evt {
                None => {
                    info!("SyncCore: event channel closed, shutting down");
                    break;
                }

                Some(SyncEvent::Shutdown) => {
                    info!("SyncCore: shutdown requested");
                    break;
                }

                Some(SyncEvent::Transport(input)) => self.drive(input),

                Some(SyncEvent::Payload {
                    generation,
                    payload,
                }) => {
                    if self.transport.is_current(generation) {
                        self.reconcile(Some(&payload));
                    } else {
                        debug!("SyncCore: stale payload from generation {}", generation);
                    }
                }

                Some(SyncEvent::FetchFailed { generation, error }) => {
                    if self.transport.is_current(generation) {
                        info!("SyncCore: status unavailable: {}", error);
                        self.reconcile(None);
                    }
                }

                Some(SyncEvent::Command { command, reply }) => self.dispatch(command, reply),

                Some(SyncEvent::CommandFinished {
                    command,
                    epoch,
                    result,
                    reply,
                }) => self.command_finished(command, epoch, result, reply),

                Some(SyncEvent::SetTarget { raw, reply }) => {
                    let result = self.set_target(&raw);
                    if let Some(reply) = reply {
                        let _ = reply.send(result);
                    }
                }

                Some(SyncEvent::BeginEdit(field)) => self.controls.begin_edit(field),
                Some(SyncEvent::EndEdit) => self.controls.end_edit(),

                Some(SyncEvent::Refresh) => self.refresh(),

                Some(SyncEvent::HeartbeatTick) => {
                    self.board.tick(Instant::now());
                    self.sync_status();
                }
            }
        }

        heartbeat.abort();
        self.drive(TransportInput::Stop);
        self.tasks.abort_all();
        Ok(())
    }

    // ── target ────────────────────────────────────────────────────────────────

    /// Build clients for the current target and (re)start the transport.
    fn connect(&mut self) {
        let helper = self.resolver.helper_text(&self.target);
        let _ = self.ui_tx.send(UiEvent::Target {
            target: self.target.clone(),
            helper,
        });

        match self.resolver.base_url(&self.target) {
            Ok(base) => {
                let timeout = self.config.transport.request_timeout();
                self.endpoints = Some(Endpoints {
                    status: StatusClient::new(
                        self.http.clone(),
                        &base,
                        &self.config.device,
                        timeout,
                    ),
                    dispatcher: CommandDispatcher::new(
                        self.http.clone(),
                        &base,
                        timeout,
                        self.config.marquee.speed_range(),
                    ),
                });
                info!("SyncCore: target {}", base);
                self.drive(TransportInput::Start);
            }
            Err(e) => {
                error!("SyncCore: no usable target: {}", e);
                self.endpoints = None;
                self.drive(TransportInput::Stop);
                self.publish(StatusMessage::persistent(e.to_string(), Severity::Error));
            }
        }
    }

    fn set_target(&mut self, raw: &str) -> Result<ConnectionTarget, ConfigError> {
        match self.resolver.set(raw) {
            Ok(target) => {
                self.target = target.clone();
                self.target_epoch += 1;
                self.publish(StatusMessage::transient(
                    self.resolver.helper_text(&target),
                    Severity::Info,
                ));
                self.connect();
                Ok(target)
            }
            Err(e) => {
                warn!("SyncCore: target rejected: {}", e);
                self.publish(StatusMessage::transient(e.to_string(), Severity::Error));
                Err(e)
            }
        }
    }

    // ── transport ─────────────────────────────────────────────────────────────

    /// Feed one input to the transport machine and carry out its effects.
    /// Effects that fail synchronously feed follow-up inputs back in.
    fn drive(&mut self, input: TransportInput) {
        let mut queue = VecDeque::from([input]);
        while let Some(input) = queue.pop_front() {
            for effect in self.transport.handle(input) {
                if let Some(next) = self.execute(effect) {
                    queue.push_back(next);
                }
            }
        }
        let _ = self
            .ui_tx
            .send(UiEvent::Transport(self.transport.snapshot()));
    }

    fn execute(&mut self, effect: TransportEffect) -> Option<TransportInput> {
        debug!("SyncCore: effect {:?}", effect);
        match effect {
            TransportEffect::Fetch { generation } => {
                self.spawn_fetch(generation);
            }
            TransportEffect::OpenStream { generation } => {
                let endpoints = self.endpoints.as_ref()?;
                match endpoints.status.stream_request() {
                    Ok(request) => {
                        Tasks::abort(&mut self.tasks.stream);
                        let task = tokio::spawn(link::run_stream(
                            self.http.clone(),
                            request,
                            generation,
                            self.event_tx.clone(),
                        ));
                        self.tasks.stream = Some(task.abort_handle());
                    }
                    Err(e) => {
                        return Some(TransportInput::StreamUnavailable {
                            generation,
                            reason: e.to_string(),
                        })
                    }
                }
            }
            TransportEffect::CloseStream => Tasks::abort(&mut self.tasks.stream),
            TransportEffect::ScheduleRetry { generation, delay } => {
                Tasks::abort(&mut self.tasks.retry);
                let task = tokio::spawn(link::run_retry_timer(
                    delay,
                    generation,
                    self.event_tx.clone(),
                ));
                self.tasks.retry = Some(task.abort_handle());
            }
            TransportEffect::CancelRetry => Tasks::abort(&mut self.tasks.retry),
            TransportEffect::StartPolling {
                generation,
                interval,
            } => {
                let endpoints = self.endpoints.as_ref()?;
                Tasks::abort(&mut self.tasks.poll);
                let task = tokio::spawn(link::run_poller(
                    endpoints.status.clone(),
                    interval,
                    generation,
                    self.event_tx.clone(),
                ));
                self.tasks.poll = Some(task.abort_handle());
            }
            TransportEffect::StopPolling => Tasks::abort(&mut self.tasks.poll),
            TransportEffect::Notify(message) => self.publish(message),
        }
        None
    }

    fn spawn_fetch(&self, generation: u64) {
        if let Some(endpoints) = &self.endpoints {
            tokio::spawn(link::run_fetch(
                endpoints.status.clone(),
                generation,
                self.event_tx.clone(),
            ));
        }
    }

    fn refresh(&self) {
        if self.transport.phase() != Phase::Idle {
            self.spawn_fetch(self.transport.generation());
        }
    }

    // ── reconciliation ────────────────────────────────────────────────────────

    fn reconcile(&mut self, payload: Option<&StatusPayload>) {
        let outcome = self
            .reconciler
            .apply(payload, &mut self.playback, &mut self.controls);
        let _ = self.ui_tx.send(UiEvent::State(outcome.state));
        if let Some(view) = outcome.view {
            let _ = self.ui_tx.send(UiEvent::View(view));
        }
        if outcome.controls_filled.is_some() {
            let _ = self.ui_tx.send(UiEvent::Controls(self.controls.clone()));
        }
        self.publish(outcome.status);
    }

    // ── commands ──────────────────────────────────────────────────────────────

    fn dispatch(&mut self, command: DeviceCommand, reply: Option<CommandReply>) {
        let Some(dispatcher) = self.endpoints.as_ref().map(|e| e.dispatcher.clone()) else {
            let err = CommandError::Config(ConfigError::NoHostOrigin);
            self.publish(StatusMessage::transient(err.to_string(), Severity::Error));
            if let Some(reply) = reply {
                let _ = reply.send(Err(err));
            }
            return;
        };

        let epoch = self.target_epoch;
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            let result = dispatcher.execute(&command).await;
            let _ = tx
                .send(SyncEvent::CommandFinished {
                    command,
                    epoch,
                    result,
                    reply,
                })
                .await;
        });
    }

    fn command_finished(
        &mut self,
        command: DeviceCommand,
        epoch: u64,
        result: Result<CommandResponse, CommandError>,
        reply: Option<CommandReply>,
    ) {
        match &result {
            Ok(response) => {
                let severity = match response.status {
                    ResponseStatus::Info => Severity::Info,
                    _ => Severity::Success,
                };
                let text = response
                    .message
                    .clone()
                    .unwrap_or_else(|| command.describe());
                self.publish(StatusMessage::transient(text, severity));

                if let Some(transition) = command.transition() {
                    if epoch == self.target_epoch {
                        let view = self
                            .reconciler
                            .apply_optimistic(transition, &mut self.playback);
                        let _ = self.ui_tx.send(UiEvent::View(view));
                        let _ = self
                            .ui_tx
                            .send(UiEvent::State(self.reconciler.state().clone()));
                        self.refresh();
                    } else {
                        debug!("SyncCore: target changed, skipping optimistic transition");
                    }
                }
            }
            Err(e) => {
                warn!("SyncCore: command {:?} failed: {}", command, e);
                self.publish(StatusMessage::transient(e.to_string(), Severity::Error));
            }
        }
        if let Some(reply) = reply {
            let _ = reply.send(result);
        }
    }

    // ── status slot ───────────────────────────────────────────────────────────

    fn publish(&mut self, message: StatusMessage) {
        self.board.publish(message, Instant::now());
        self.sync_status();
    }

    fn sync_status(&mut self) {
        let current = self.board.current(Instant::now()).cloned();
        if current != self.last_status {
            self.last_status = current.clone();
            if let Some(message) = current {
                let _ = self.ui_tx.send(UiEvent::Status(message));
            }
        }
    }
}

// ── SyncHandle ────────────────────────────────────────────────────────────────

/// Cloneable front door to a running SyncCore.
#[derive(Clone)]
pub struct SyncHandle {
    event_tx: mpsc::Sender<SyncEvent>,
    ui_tx: broadcast::Sender<UiEvent>,
}

impl SyncHandle {
    pub fn new(event_tx: mpsc::Sender<SyncEvent>, ui_tx: broadcast::Sender<UiEvent>) -> Self {
        Self { event_tx, ui_tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UiEvent> {
        self.ui_tx.subscribe()
    }

    /// Dispatch a command and wait for the device's answer.
    pub async fn command(&self, command: DeviceCommand) -> anyhow::Result<CommandResponse> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(SyncEvent::Command {
            command,
            reply: Some(reply_tx),
        })
        .await?;
        Ok(reply_rx
            .await
            .map_err(|_| anyhow::anyhow!("SyncCore dropped command reply"))??)
    }

    pub async fn set_target(&self, raw: &str) -> anyhow::Result<ConnectionTarget> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(SyncEvent::SetTarget {
            raw: raw.to_string(),
            reply: Some(reply_tx),
        })
        .await?;
        Ok(reply_rx
            .await
            .map_err(|_| anyhow::anyhow!("SyncCore dropped target reply"))??)
    }

    pub async fn refresh(&self) -> anyhow::Result<()> {
        self.send(SyncEvent::Refresh).await
    }

    pub async fn begin_edit(&self, field: ControlField) -> anyhow::Result<()> {
        self.send(SyncEvent::BeginEdit(field)).await
    }

    pub async fn end_edit(&self) -> anyhow::Result<()> {
        self.send(SyncEvent::EndEdit).await
    }

    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.send(SyncEvent::Shutdown).await
    }

    async fn send(&self, event: SyncEvent) -> anyhow::Result<()> {
        self.event_tx
            .send(event)
            .await
            .map_err(|_| anyhow::anyhow!("SyncCore is not running"))
    }
}

/// Spawn a SyncCore on the current runtime.  Subscribe to `ui_tx` before
/// calling this to see every event.
pub fn spawn(
    config: Config,
    store: Box<dyn TargetStore>,
    ui_tx: broadcast::Sender<UiEvent>,
) -> anyhow::Result<SyncHandle> {
    let (event_tx, event_rx) = mpsc::channel::<SyncEvent>(256);
    let core = SyncCore::new(config, store, ui_tx.clone(), event_tx.clone())?;
    tokio::spawn(async move {
        if let Err(e) = core.run(event_rx).await {
            error!("SyncCore exited with error: {}", e);
        }
    });
    Ok(SyncHandle::new(event_tx, ui_tx))
}
