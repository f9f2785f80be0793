use std::time::Duration;

use clap::{Parser, Subcommand};
use matrix_link::dispatch::DeviceCommand;
use matrix_link::target::normalize_address;
use matrix_link::playback::{ControlState, PlaybackView};
use matrix_link::reconcile::{CanonicalState, Connectivity};
use matrix_link::transport::Channel;
use matrix_link::{SyncHandle, UiEvent};
use matrix_proto::config::Config;
use matrix_proto::protocol::{DisplayMode, PlaybackMode};
use matrix_proto::state::{FileTargetStore, MemoryTargetStore, TargetStore};
use tokio::io::AsyncBufReadExt;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser, Debug)]
#[command(name = "matrixctl", version, about = "Control and watch an LED-matrix display")]
struct Cli {
    /// Talk to this device for this run only, without persisting it.
    #[arg(long, global = true)]
    address: Option<String>,
    /// Skip the push stream and poll the status path instead.
    #[arg(long, global = true)]
    poll: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Follow device status live; device commands can be typed on stdin.
    Watch,
    /// Print the device status once.
    Status,
    /// Show, set or reset the persisted device address.
    Target {
        address: Option<String>,
        /// Forget the persisted address.
        #[arg(long, conflicts_with = "address")]
        reset: bool,
    },
    #[command(flatten)]
    Device(DeviceArgs),
}

#[derive(Subcommand, Debug)]
enum DeviceArgs {
    /// Set panel brightness (0-255).
    Brightness { value: u8 },
    /// Switch the display program.
    Display {
        #[arg(value_parser = parse_display)]
        mode: DisplayMode,
    },
    /// Start batch playback in the given order.
    Play {
        #[arg(value_parser = parse_playback)]
        mode: PlaybackMode,
    },
    Restart,
    /// Forget the device's WiFi credentials.
    WifiReset,
    MarqueeText {
        #[arg(trailing_var_arg = true, required = true)]
        text: Vec<String>,
    },
    MarqueeConfig {
        /// Slider position; higher scrolls faster.
        #[arg(long)]
        speed: u32,
        #[arg(long, default_value_t = 1)]
        size: u8,
        /// `#rrggbb`
        #[arg(long)]
        color: String,
    },
    Timezone { timezone: String },
}

impl From<DeviceArgs> for DeviceCommand {
    fn from(args: DeviceArgs) -> Self {
        match args {
            DeviceArgs::Brightness { value } => DeviceCommand::SetBrightness(value),
            DeviceArgs::Display { mode } => DeviceCommand::ActivateDisplay(mode),
            DeviceArgs::Play { mode } => DeviceCommand::PlayBatch(mode),
            DeviceArgs::Restart => DeviceCommand::Restart,
            DeviceArgs::WifiReset => DeviceCommand::ResetWifi,
            DeviceArgs::MarqueeText { text } => DeviceCommand::SetMarqueeText(text.join(" ")),
            DeviceArgs::MarqueeConfig { speed, size, color } => {
                DeviceCommand::SetMarqueeConfig { speed, size, color }
            }
            DeviceArgs::Timezone { timezone } => DeviceCommand::SetTimezone(timezone),
        }
    }
}

/// A line typed into `watch`.
#[derive(Parser, Debug)]
#[command(no_binary_name = true, disable_help_flag = true)]
struct ConsoleLine {
    #[command(subcommand)]
    command: ConsoleCommand,
}

#[derive(Subcommand, Debug)]
enum ConsoleCommand {
    /// Point at a different device ("" resets to the serving device).
    Target { address: Option<String> },
    /// Fetch status now.
    Refresh,
    Quit,
    #[command(flatten)]
    Device(DeviceArgs),
}

fn parse_display(raw: &str) -> Result<DisplayMode, String> {
    DisplayMode::parse(raw).ok_or_else(|| {
        let names: Vec<_> = DisplayMode::ALL.iter().map(|m| m.as_str()).collect();
        format!("expected one of {}", names.join(", "))
    })
}

fn parse_playback(raw: &str) -> Result<PlaybackMode, String> {
    PlaybackMode::parse(raw).ok_or_else(|| {
        let names: Vec<_> = PlaybackMode::ALL.iter().map(|m| m.as_str()).collect();
        format!("expected one of {}", names.join(", "))
    })
}

/// A custom tracing layer that forwards WARN/ERROR records to the UI channel.
struct BroadcastLayer {
    sender: broadcast::Sender<UiEvent>,
}

impl<S> tracing_subscriber::Layer<S> for BroadcastLayer
where
    S: tracing::Subscriber,
{
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let level = event.metadata().level();
        if !matches!(*level, tracing::Level::WARN | tracing::Level::ERROR) {
            return;
        }

        let mut message = format!("{} [{}] ", chrono::Local::now().format("%H:%M:%S"), level);
        let mut visitor = MessageVisitor(&mut message);
        event.record(&mut visitor);

        // no receivers is fine
        let _ = self.sender.send(UiEvent::Log(message));
    }
}

struct MessageVisitor<'a>(&'a mut String);

impl<'a> tracing::field::Visit for MessageVisitor<'a> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0.push_str(&format!("{:?}", value));
        } else {
            self.0.push_str(&format!(" {}={:?}", field.name(), value));
        }
    }
}

fn init_logging(ui_tx: &broadcast::Sender<UiEvent>) -> anyhow::Result<()> {
    let data_dir = matrix_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("matrixctl.log");
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(BroadcastLayer {
            sender: ui_tx.clone(),
        })
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(
                    "info,matrix_link=debug,hyper_util=warn,reqwest=warn,hyper=warn",
                )
            }),
        )
        .init();

    info!("Log file: {:?}", log_path);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let (ui_tx, ui_rx) = broadcast::channel::<UiEvent>(256);
    init_logging(&ui_tx)?;

    let mut config = Config::load()?;
    if cli.poll {
        config.transport.push = false;
    }

    let mut store: Box<dyn TargetStore> = match &cli.address {
        Some(address) => Box::new(MemoryTargetStore::with_value(&normalize_address(address)?)),
        None => Box::new(FileTargetStore::new(config.paths.target_file.clone())),
    };
    let wait = config.transport.request_timeout() + Duration::from_secs(1);

    if let Command::Target { reset: true, .. } = &cli.command {
        store.clear()?;
        println!("persisted address cleared");
    }

    let handle = matrix_link::spawn(config, store, ui_tx)?;
    let result = match cli.command {
        Command::Watch => watch(&handle, ui_rx).await,
        Command::Status => status(ui_rx, wait).await,
        Command::Target { address, .. } => target(&handle, ui_rx, address).await,
        Command::Device(args) => {
            let command = DeviceCommand::from(args);
            handle.command(command.clone()).await.map(|response| {
                println!(
                    "{}",
                    response.message.unwrap_or_else(|| command.describe())
                );
            })
        }
    };
    let _ = handle.shutdown().await;
    result
}

async fn status(mut ui_rx: broadcast::Receiver<UiEvent>, wait: Duration) -> anyhow::Result<()> {
    let state = tokio::time::timeout(wait, async {
        loop {
            match ui_rx.recv().await {
                Ok(UiEvent::State(state)) => return Some(state),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .await
    .ok()
    .flatten();

    match state {
        Some(state) if state.connectivity == Connectivity::Connected => {
            println!("{}", serde_json::to_string_pretty(&state)?);
            Ok(())
        }
        _ => anyhow::bail!("device unreachable"),
    }
}

async fn target(
    handle: &SyncHandle,
    mut ui_rx: broadcast::Receiver<UiEvent>,
    address: Option<String>,
) -> anyhow::Result<()> {
    if let Some(address) = address {
        let target = handle.set_target(&address).await?;
        println!("target set to {}", target.origin());
        return Ok(());
    }
    loop {
        match ui_rx.recv().await {
            Ok(UiEvent::Target { helper, .. }) => {
                println!("{helper}");
                return Ok(());
            }
            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
            Err(broadcast::error::RecvError::Closed) => anyhow::bail!("sync loop stopped"),
        }
    }
}

async fn watch(handle: &SyncHandle, mut ui_rx: broadcast::Receiver<UiEvent>) -> anyhow::Result<()> {
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    let mut channel = None;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            evt = ui_rx.recv() => match evt {
                Ok(UiEvent::Transport(snapshot)) => {
                    if channel != Some(snapshot.channel) {
                        channel = Some(snapshot.channel);
                        print_line("link", channel_name(snapshot.channel));
                    }
                }
                Ok(evt) => render(&evt),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    print_line("warn", &format!("{n} updates skipped"));
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            line = lines.next_line() => match line? {
                Some(line) => {
                    if !console(handle, &line).await {
                        break;
                    }
                }
                None => break,
            },
        }
    }
    Ok(())
}

/// Run one console line.  Returns `false` on quit.
async fn console(handle: &SyncHandle, line: &str) -> bool {
    let words: Vec<&str> = line.split_whitespace().collect();
    if words.is_empty() {
        return true;
    }
    let parsed = match ConsoleLine::try_parse_from(words) {
        Ok(parsed) => parsed,
        Err(e) => {
            eprintln!("{e}");
            return true;
        }
    };

    // Outcomes show up as status events; errors are already on the board.
    let outcome = match parsed.command {
        ConsoleCommand::Quit => return false,
        ConsoleCommand::Refresh => handle.refresh().await,
        ConsoleCommand::Target { address } => handle
            .set_target(address.as_deref().unwrap_or(""))
            .await
            .map(|_| ()),
        ConsoleCommand::Device(args) => handle.command(args.into()).await.map(|_| ()),
    };
    if let Err(e) = outcome {
        info!("console: {}", e);
    }
    true
}

fn print_line(tag: &str, text: &str) {
    println!("{} {:<8} {}", chrono::Local::now().format("%H:%M:%S"), tag, text);
}

fn channel_name(channel: Channel) -> &'static str {
    match channel {
        Channel::None => "offline",
        Channel::Stream => "event stream",
        Channel::Poll => "polling",
    }
}

fn render(evt: &UiEvent) {
    match evt {
        UiEvent::Status(message) => print_line(
            &format!("{:?}", message.severity).to_lowercase(),
            &message.text,
        ),
        UiEvent::State(state) => print_line("state", &describe_state(state)),
        UiEvent::View(view) => print_line("modes", &describe_view(view)),
        UiEvent::Controls(controls) => print_line(
            "controls",
            &format!(
                "text {:?} ({}) speed {} size {} color {} tz {}",
                controls.marquee_text,
                controls.text_counter(),
                controls.marquee_speed,
                controls.marquee_size,
                controls.marquee_color,
                controls.timezone
            ),
        ),
        UiEvent::Target { helper, .. } => print_line("target", helper),
        UiEvent::Transport(_) => {}
        UiEvent::Log(line) => eprintln!("{line}"),
    }
}

fn describe_state(state: &CanonicalState) -> String {
    let mut parts = vec![format!("{:?}", state.connectivity).to_lowercase()];
    if let Some(ssid) = &state.ssid {
        parts.push(format!("ssid {ssid}"));
    }
    if let Some(ip) = &state.ip {
        parts.push(format!("ip {ip}"));
    }
    if let Some(brightness) = state.brightness {
        parts.push(format!("brightness {brightness}"));
    }
    if let Some(current) = &state.current {
        parts.push(format!("showing {current}"));
    }
    parts.join(", ")
}

/// `[clock]` is active; a trailing `-` marks a disabled control.
fn describe_view(view: &PlaybackView) -> String {
    fn mark(name: &str, control: ControlState) -> String {
        let name = if control.active {
            format!("[{name}]")
        } else {
            name.to_string()
        };
        if control.disabled {
            format!("{name}-")
        } else {
            name
        }
    }

    let display: Vec<_> = view
        .display
        .iter()
        .map(|(mode, control)| mark(mode.as_str(), *control))
        .collect();
    let playback: Vec<_> = view
        .playback
        .iter()
        .map(|(mode, control)| mark(mode.as_str(), *control))
        .collect();
    format!("{} | {}", display.join(" "), playback.join(" "))
}
