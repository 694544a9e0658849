//! Harbor CLI
//!
//! Runs the daemon and drives it over IPC.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;

use harbor_core::{StartReport, StopReport};
use harbor_daemon::IpcConfig;
use harbor_ipc_client::{default_socket_path, IpcClient};
use harbor_settings::{Settings, SettingsStore};

/// Harbor - remote administration listener
#[derive(Parser)]
#[command(name = "harbor")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Socket path for daemon communication
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Settings file used by `harbor daemon`
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon in the foreground
    Daemon,

    /// Start listening
    ///
    /// Without flags the saved settings are used. Flags override them for
    /// this start only.
    Start(StartArgs),

    /// Stop listening
    Stop,

    /// Show listener status
    Status,

    /// Show saved settings
    Settings {
        /// Show the dynamic DNS password in clear
        #[arg(long)]
        reveal: bool,
    },

    /// Change and save settings
    Save(SaveArgs),

    /// Drop unsaved edits and show the saved settings
    Discard,
}

#[derive(Args, Debug, Default)]
struct StartArgs {
    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Listen on IPv6 (dual-stack)
    #[arg(long)]
    ipv6: bool,

    /// Forward the port on the UPnP gateway
    #[arg(long)]
    upnp: bool,

    /// Run the dynamic DNS updater
    #[arg(long)]
    ddns: bool,
}

impl StartArgs {
    fn is_empty(&self) -> bool {
        self.port.is_none() && !self.ipv6 && !self.upnp && !self.ddns
    }

    fn apply(&self, mut settings: Settings) -> Settings {
        if let Some(port) = self.port {
            settings.listener.port = port;
        }
        settings.listener.ipv6_support |= self.ipv6;
        settings.upnp.use_upnp |= self.upnp;
        settings.ddns.enabled |= self.ddns;
        settings
    }
}

#[derive(Args, Debug, Default)]
struct SaveArgs {
    #[arg(short, long)]
    port: Option<u16>,

    #[arg(long)]
    ipv6: Option<bool>,

    #[arg(long)]
    auto_listen: Option<bool>,

    #[arg(long)]
    upnp: Option<bool>,

    #[arg(long)]
    ddns: Option<bool>,

    #[arg(long)]
    ddns_host: Option<String>,

    #[arg(long)]
    ddns_user: Option<String>,

    #[arg(long)]
    ddns_password: Option<String>,

    #[arg(long)]
    show_popup: Option<bool>,

    #[arg(long)]
    show_tooltip: Option<bool>,
}

impl SaveArgs {
    fn apply(self, mut settings: Settings) -> Settings {
        if let Some(port) = self.port {
            settings.listener.port = port;
        }
        if let Some(ipv6) = self.ipv6 {
            settings.listener.ipv6_support = ipv6;
        }
        if let Some(auto_listen) = self.auto_listen {
            settings.listener.auto_listen = auto_listen;
        }
        if let Some(upnp) = self.upnp {
            settings.upnp.use_upnp = upnp;
        }
        if let Some(ddns) = self.ddns {
            settings.ddns.enabled = ddns;
        }
        if let Some(host) = self.ddns_host {
            settings.ddns.host = host;
        }
        if let Some(user) = self.ddns_user {
            settings.ddns.username = user;
        }
        if let Some(password) = self.ddns_password {
            settings.ddns.password = password.into();
        }
        if let Some(show_popup) = self.show_popup {
            settings.ui.show_popup = show_popup;
        }
        if let Some(show_tooltip) = self.show_tooltip {
            settings.ui.show_tooltip = show_tooltip;
        }
        settings
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    harbor_logging::init(harbor_logging::level_for(cli.verbose));

    let socket = cli.socket.unwrap_or_else(default_socket_path);

    match cli.command {
        Commands::Daemon => run_daemon(socket, cli.config).await?,
        Commands::Start(args) => start(&socket, args).await?,
        Commands::Stop => stop(&socket).await?,
        Commands::Status => status(&socket).await?,
        Commands::Settings { reveal } => show_settings(&socket, reveal).await?,
        Commands::Save(args) => save(&socket, args).await?,
        Commands::Discard => discard(&socket).await?,
    }

    Ok(())
}

// ============================================================================
// Daemon
// ============================================================================

async fn run_daemon(socket: PathBuf, config: Option<PathBuf>) -> Result<()> {
    let store = match config {
        Some(path) => SettingsStore::new(path),
        None => SettingsStore::open_default(),
    };
    info!(settings = %store.path().display(), "Using settings file");

    harbor_daemon::run(store, IpcConfig { socket_path: socket })
        .await
        .context("daemon failed")
}

// ============================================================================
// IPC Commands
// ============================================================================

async fn start(socket: &PathBuf, args: StartArgs) -> Result<()> {
    let client = IpcClient::new(socket.clone());

    let pending = if args.is_empty() {
        None
    } else {
        let saved = client.settings(true).await?;
        Some(args.apply(saved))
    };

    let report = client.start(pending).await?;
    print_start_report(&report);
    Ok(())
}

async fn stop(socket: &PathBuf) -> Result<()> {
    let client = IpcClient::new(socket.clone());
    let report = client.stop().await?;
    print_stop_report(&report);
    Ok(())
}

async fn status(socket: &PathBuf) -> Result<()> {
    let client = IpcClient::new(socket.clone());
    let result = client.status().await?;

    println!("Harbor Status");
    println!("=============");
    println!("State: {}", result.state);
    if let Some(config) = result.config {
        println!("Port: {}", config.port);
        println!("IPv6: {}", config.ipv6);
    }
    if let Some(mapping) = result.mapping {
        println!(
            "UPnP mapping: external {} -> local {}",
            mapping.actual_port, mapping.requested_port
        );
    }
    println!("Dynamic DNS: {}", result.ddns);

    Ok(())
}

async fn show_settings(socket: &PathBuf, reveal: bool) -> Result<()> {
    let client = IpcClient::new(socket.clone());
    let settings = client.settings(reveal).await?;
    println!("{}", serde_json::to_string_pretty(&settings)?);
    Ok(())
}

async fn save(socket: &PathBuf, args: SaveArgs) -> Result<()> {
    let client = IpcClient::new(socket.clone());
    let current = client.settings(true).await?;
    let saved = client.save(args.apply(current)).await?;

    println!("Settings saved");
    println!("{}", serde_json::to_string_pretty(&saved)?);
    Ok(())
}

async fn discard(socket: &PathBuf) -> Result<()> {
    let client = IpcClient::new(socket.clone());
    let settings = client.discard().await?;

    println!("Pending changes discarded; saved settings:");
    println!("{}", serde_json::to_string_pretty(&settings)?);
    Ok(())
}

fn print_start_report(report: &StartReport) {
    println!("Listening on port {}", report.config.port);
    if let Some(mapping) = report.mapping {
        println!("UPnP: external port {} forwarded", mapping.actual_port);
    }
    if report.ddns_running {
        println!("Dynamic DNS updater running");
    }
    for warning in &report.warnings {
        println!("Warning: {}", warning);
    }
}

fn print_stop_report(report: &StopReport) {
    println!("Listener stopped");
    if report.mapping_removed == Some(false) {
        println!("Warning: the UPnP mapping could not be removed");
    }
    if report.ddns_stopped {
        println!("Dynamic DNS updater stopped");
    }
}
