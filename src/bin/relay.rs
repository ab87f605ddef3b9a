//! Standalone short-code rendezvous relay binary (`tt-relay`).
//!
//! Grounded on the daemon-loop shape of `hub/daemon.rs`/`socket/server.rs`
//! for process lifecycle and logging setup, adapted to an `axum` HTTP
//! server instead of a Unix socket accept loop.

use clap::Parser;
use terminal_tunnel::relay_server::{self, RelayState, SharedState};

/// Short-code rendezvous relay for Terminal Tunnel sessions.
#[derive(Parser, Debug)]
#[command(name = "tt-relay", version, about)]
struct Cli {
    /// Port to listen on.
    #[arg(long, default_value_t = 8765)]
    port: u16,

    /// Base URL handed back to hosts in `client_url`, e.g. `https://tt.example`.
    #[arg(long, env = "TT_CLIENT_URL", default_value = "http://localhost:8765")]
    client_url: String,

    /// Allowed CORS origins; empty means permissive (any origin).
    #[arg(long = "allow-origin")]
    allow_origins: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let shared = SharedState::new(RelayState::new(cli.client_url.clone()));
    relay_server::spawn_sweeper(shared.clone());

    let app = relay_server::router(shared, cli.allow_origins);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], cli.port));
    log::info!("relay listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}
