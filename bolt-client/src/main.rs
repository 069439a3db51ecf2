use std::time::Duration;

use bolt_client::{
    device::{DevicePath, Policy},
    presentation::{DeviceDetails, Presentation},
    registry::{ActionKind, DeviceRegistry, RegistryEvent},
    session::SessionState,
    startup::{Application, Settings},
    telemetry::TelemetryConfig,
};
use clap::{
    builder::{styling::AnsiColor, Styles},
    Parser, Subcommand,
};
use color_eyre::eyre::{eyre, Result, WrapErr as _};
use tokio::{
    signal::unix::{self, SignalKind},
    sync::watch,
};
use tracing::{info, warn};

const SYSLOG_IDENTIFIER: &str = "bolt-client";

#[derive(Debug, Parser)]
#[clap(
    version = bolt_client::VERSION,
    about,
    styles = clap_v3_styles(),
)]
struct Cli {
    /// Address of the bus the daemon lives on. Defaults to the system bus.
    #[clap(long, env = "BOLT_DBUS_ADDRESS")]
    dbus_address: Option<String>,
    /// Upper bound for each call to the daemon, in milliseconds.
    #[clap(long, env = "BOLT_CALL_TIMEOUT_MS", default_value_t = 5000)]
    call_timeout_ms: u64,
    /// Policy passed along when authorizing or trusting a device.
    #[clap(long, env = "BOLT_POLICY", value_enum, default_value_t = Policy::Auto)]
    policy: Policy,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print every connected or trusted device.
    List,
    /// Print devices as they come, go and change state.
    Watch,
    /// Authorize a connected device.
    Authorize { uid: String },
    /// Trust a device so it gets authorized automatically from now on.
    Trust { uid: String },
    /// Stop trusting a device.
    Forget { uid: String },
}

impl Cli {
    fn settings(&self) -> Settings {
        Settings {
            dbus_address: self.dbus_address.clone(),
            call_timeout: Duration::from_millis(self.call_timeout_ms),
            policy: self.policy,
            ..Settings::default()
        }
    }
}

fn clap_v3_styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::Yellow.on_default())
        .usage(AnsiColor::Green.on_default())
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let tel_flusher = TelemetryConfig::new()
        .with_journald(SYSLOG_IDENTIFIER)
        .init();

    let cli = Cli::parse();
    let result = run(cli).await;

    tel_flusher.flush().await;

    result
}

async fn run(cli: Cli) -> Result<()> {
    let settings = cli.settings();
    let call_timeout = settings.call_timeout;
    let app = Application::build(settings)
        .await
        .wrap_err("failed to reach the bolt daemon")?;

    match cli.command {
        Command::List => {
            list(&app.registry);
            Ok(())
        }
        Command::Watch => watch_devices(app).await,
        Command::Authorize { uid } => {
            act(app, &uid, ActionKind::Authorize, call_timeout).await
        }
        Command::Trust { uid } => act(app, &uid, ActionKind::Trust, call_timeout).await,
        Command::Forget { uid } => {
            act(app, &uid, ActionKind::Forget, call_timeout).await
        }
    }
}

fn list(registry: &DeviceRegistry) {
    if registry.is_empty() {
        println!("no devices");
    }
    for session in registry.sessions() {
        print_device(session.path(), session.details(), session.state());
    }
}

fn print_device(path: &DevicePath, details: &DeviceDetails, state: SessionState) {
    println!("{} ({path})", details.title);
    print_state(state.presentation());
    for (label, value) in details.rows() {
        println!("    {label:<10} {value}");
    }
}

fn print_state(presentation: Presentation) {
    println!("    {:<10} {}", "Status", presentation.status_text);
}

async fn watch_devices(app: Application) -> Result<()> {
    list(&app.registry);
    let mut events = app.registry.subscribe();
    let (_handle, mut task) = app.run();

    let mut sigterm = unix::signal(SignalKind::terminate())?;
    let mut sigint = unix::signal(SignalKind::interrupt())?;

    loop {
        tokio::select! {
            _ = sigterm.recv() => { warn!("received SIGTERM"); break; }
            _ = sigint.recv() => { warn!("received SIGINT"); break; }
            result = &mut task => {
                return result
                    .wrap_err("registry task panicked")?
                    .wrap_err("registry task exited with error");
            }
            event = events.recv() => match event {
                Ok(RegistryEvent::Added { path, details, state }) => {
                    print_device(&path, &details, *state.borrow());
                    tokio::spawn(follow(path, state));
                }
                Ok(RegistryEvent::Removed { path }) => println!("removed {path}"),
                Err(err) => warn!("missed registry events: {err}"),
            },
        }
    }

    info!("exiting");
    task.abort();
    Ok(())
}

async fn follow(path: DevicePath, mut state: watch::Receiver<SessionState>) {
    while state.changed().await.is_ok() {
        let presentation = state.borrow_and_update().presentation();
        println!("{path}: {}", presentation.status_text);
    }
}

/// Dispatches `kind` and waits for the daemon to report the resulting state.
async fn act(
    app: Application,
    uid: &str,
    kind: ActionKind,
    call_timeout: Duration,
) -> Result<()> {
    let session = app
        .registry
        .find_by_uid(uid)
        .ok_or_else(|| eyre!("no connected or trusted device with uid `{uid}`"))?;
    let path = session.path().clone();
    let mut state = session.subscribe();
    if kind == ActionKind::Authorize && session.state().is_authorized_or_authorizing() {
        print_state(session.presentation());
        return Ok(());
    }

    let (handle, task) = app.run();
    handle
        .dispatch(path.clone(), kind)
        .await
        .wrap_err_with(|| format!("failed to {kind:?} `{uid}`"))?;

    match tokio::time::timeout(call_timeout, state.changed()).await {
        Ok(Ok(())) => print_state(state.borrow().presentation()),
        Ok(Err(_)) => println!("{path} went away"),
        Err(_) => warn!(%path, "daemon did not report a state change in time"),
    }
    task.abort();

    Ok(())
}
