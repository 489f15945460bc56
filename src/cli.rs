//! Command-line surface: no flags selects server mode; `--socket-path`
//! (or `-s`) selects worker mode, connecting to a parent-created socket.

use std::path::PathBuf;

use clap::Parser;

/// weave-compute-daemon: local-socket GPU compute daemon.
#[derive(Debug, Parser)]
#[command(name = "weave-compute-daemon")]
#[command(about = "Text-to-image generation daemon over a local Unix socket")]
#[command(version)]
pub struct Args {
    /// Connect to a parent-owned socket instead of creating one (worker
    /// mode). The parent retains ownership of the filesystem entry.
    #[arg(short = 's', long = "socket-path")]
    pub socket_path: Option<PathBuf>,

    /// Log level passed to the tracing `EnvFilter` (trace, debug, info,
    /// warn, error). Overridden by `RUST_LOG` if set.
    #[arg(long, default_value = "info")]
    pub log_level: String,
}
