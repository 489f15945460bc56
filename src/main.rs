//! Entry point: parses CLI args, installs logging and shutdown handling,
//! then runs either the server loop (owns the socket) or the worker loop
//! (connects to a parent-owned socket).

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use weave_compute_daemon::cli::Args;
use weave_compute_daemon::engine::StubEngine;
use weave_compute_daemon::server::{run_server, run_worker};
use weave_compute_daemon::shutdown::{self, ShutdownFlag};
use weave_compute_daemon::socket::{default_socket_path, SocketEndpoint};

fn main() {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    if let Err(e) = run(args) {
        tracing::error!(error = %e, "startup failed");
        eprintln!("weave-compute-daemon: {e:#}");
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let shutdown_flag = ShutdownFlag::new();
    shutdown::install_signal_handler(shutdown_flag.clone())?;

    let mut engine = StubEngine::default();

    match args.socket_path {
        None => {
            let socket_path = default_socket_path()?;
            tracing::info!(path = %socket_path.display(), "starting in server mode");
            let endpoint = SocketEndpoint::create(&socket_path)
                .with_context(|| format!("failed to create socket at {}", socket_path.display()))?;
            run_server(&endpoint, &mut engine, &shutdown_flag)?;
            endpoint.cleanup();
        }
        Some(path) => {
            tracing::info!(path = %path.display(), "starting in worker mode");
            let endpoint = SocketEndpoint::connect(&path)
                .with_context(|| format!("failed to connect to {}", path.display()))?;
            shutdown::spawn_stdin_monitor(shutdown_flag.clone());
            run_worker(&endpoint, &mut engine, &shutdown_flag)?;
        }
    }

    tracing::info!("shutting down");
    Ok(())
}
