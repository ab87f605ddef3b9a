//! `tt` — the terminal-tunnel CLI: starts/stops/lists sessions against a
//! background daemon, manages the daemon itself, and can host a relay.
//!
//! Grounded on the heritage CLI's `clap::Subcommand` shape and its
//! `env_logger`-to-file setup, retargeted at this crate's daemon/session
//! commands instead of hub/worktree management.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use terminal_tunnel::daemon;

#[derive(Parser)]
#[command(name = "tt")]
#[command(version)]
#[command(about = "Peer-to-peer terminal sharing over an encrypted data channel")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the background daemon.
    Daemon {
        #[command(subcommand)]
        action: DaemonAction,
    },
    /// Starts a new shared session.
    Start {
        /// Session password (generated if omitted).
        #[arg(short = 'p', long)]
        password: Option<String>,
        /// Shell to run (defaults to $SHELL).
        #[arg(short = 's', long)]
        shell: Option<String>,
        /// Disable TURN relay fallback, STUN-only.
        #[arg(long)]
        no_turn: bool,
        /// Also provision a read-only viewer code/URL.
        #[arg(long)]
        public: bool,
        /// Record the session as an asciicast.
        #[arg(long)]
        record: bool,
    },
    /// Stops a session by id or short code.
    Stop {
        id_or_code: String,
    },
    /// Lists running sessions.
    List,
    /// Shows daemon status.
    Status,
    /// Runs the short-code rendezvous relay server.
    Relay {
        #[arg(long, default_value_t = 8765)]
        port: u16,
    },
}

#[derive(Subcommand)]
enum DaemonAction {
    /// Starts the daemon in the background.
    Start,
    /// Stops the running daemon.
    Stop,
    /// Runs the daemon in the foreground (used internally by `daemon start`).
    Foreground,
}

fn init_logging() {
    let log_path = std::env::var("TT_LOG_FILE")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| std::path::PathBuf::from("/tmp/tt.log"));
    if let Ok(log_file) = std::fs::File::create(&log_path) {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
            .target(env_logger::Target::Pipe(Box::new(log_file)))
            .format_timestamp_secs()
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    match cli.command {
        Commands::Daemon { action } => match action {
            DaemonAction::Start => start_daemon_background()?,
            DaemonAction::Stop => stop_daemon().await?,
            DaemonAction::Foreground => daemon::run().await?,
        },
        Commands::Start {
            password,
            shell,
            no_turn,
            public,
            record,
        } => start_session(password, shell, no_turn, public, record).await?,
        Commands::Stop { id_or_code } => stop_session(&id_or_code).await?,
        Commands::List => list_sessions().await?,
        Commands::Status => status().await?,
        Commands::Relay { port } => run_relay(port).await?,
    }

    Ok(())
}

/// Re-execs this binary as `tt daemon foreground`, detached from the
/// controlling terminal, so `tt daemon start` returns immediately.
fn start_daemon_background() -> Result<()> {
    use std::os::unix::process::CommandExt;

    if daemon::pid::is_daemon_running() {
        println!("daemon is already running");
        return Ok(());
    }

    let exe = std::env::current_exe().context("failed to resolve current executable")?;
    let mut cmd = std::process::Command::new(exe);
    cmd.args(["daemon", "foreground"])
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null());

    #[cfg(unix)]
    // SAFETY: setsid() takes no arguments and only affects the child
    // process's own session after fork, before exec.
    unsafe {
        cmd.pre_exec(|| {
            libc::setsid();
            Ok(())
        });
    }

    cmd.spawn().context("failed to spawn daemon process")?;
    println!("daemon starting");
    Ok(())
}

async fn stop_daemon() -> Result<()> {
    let stream = daemon::connect().await?;
    terminal_tunnel::daemon::ipc::call(stream, "daemon.shutdown", serde_json::json!({})).await?;
    println!("daemon stopping");
    Ok(())
}

async fn start_session(
    password: Option<String>,
    shell: Option<String>,
    no_turn: bool,
    public: bool,
    record: bool,
) -> Result<()> {
    let _ = no_turn; // TURN fallback is a daemon-wide config, not per-session.
    let stream = daemon::connect()
        .await
        .context("start the daemon first with `tt daemon start`")?;
    let result = terminal_tunnel::daemon::ipc::call(
        stream,
        "session.start",
        serde_json::json!({
            "password": password,
            "shell": shell,
            "public": public,
            "record": record,
        }),
    )
    .await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

async fn stop_session(id_or_code: &str) -> Result<()> {
    let stream = daemon::connect().await?;
    terminal_tunnel::daemon::ipc::call(
        stream,
        "session.stop",
        serde_json::json!({ "id": id_or_code }),
    )
    .await?;
    println!("stopped {id_or_code}");
    Ok(())
}

async fn list_sessions() -> Result<()> {
    let stream = daemon::connect().await?;
    let result =
        terminal_tunnel::daemon::ipc::call(stream, "session.list", serde_json::json!({})).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

async fn status() -> Result<()> {
    let stream = daemon::connect().await?;
    let result =
        terminal_tunnel::daemon::ipc::call(stream, "daemon.status", serde_json::json!({})).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

async fn run_relay(port: u16) -> Result<()> {
    let client_url_base =
        std::env::var("TT_CLIENT_URL").unwrap_or_else(|_| "https://app.terminal-tunnel.dev".to_string());
    let shared = terminal_tunnel::relay_server::SharedState::new(
        terminal_tunnel::relay_server::RelayState::new(client_url_base),
    );
    terminal_tunnel::relay_server::spawn_sweeper(shared.clone());
    let app = terminal_tunnel::relay_server::router(shared, Vec::new());
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!("relay listening on {addr}");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;
    Ok(())
}
