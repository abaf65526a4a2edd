//! relayterm-server: hands out shells on PTYs to relayterm clients.
//!
//! Usage:
//!   relayterm-server                         # Listen on the per-user socket
//!   relayterm-server --listen 0.0.0.0:7022   # Listen on TCP
//!   relayterm-server --shell /bin/zsh -vv
//!
//! SIGINT or SIGTERM stops accepting, closes the open sessions and removes
//! the socket file.

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use clap::Parser;
use signal_hook::consts::{SIGINT, SIGTERM};
use tracing::info;

use relayterm::config::Config;
use relayterm::endpoint::Endpoint;
use relayterm::logging::{self, LogFormat};
use relayterm::server::{Listener, SessionRegistry, SharedRegistry};

#[derive(Debug, Parser)]
#[command(name = "relayterm-server", version, about = "Terminal session server for relayterm")]
struct Args {
    /// Endpoint to listen on (`unix:/path`, `/path`, `host:port`)
    #[arg(long)]
    listen: Option<Endpoint>,

    /// Shell to spawn for each session
    #[arg(long)]
    shell: Option<String>,

    /// Config file (defaults to the user config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Write logs to a file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: LogFormat,
}

fn main() -> Result<()> {
    let args = Args::parse();

    logging::init_logging(
        args.verbose.saturating_add(2),
        args.log_file.as_deref(),
        args.log_format,
    )
    .context("Failed to initialize logging")?;

    let mut config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(listen) = args.listen {
        config.server.listen = listen;
    }
    if let Some(shell) = args.shell {
        config.server.shell = shell;
    }
    config.server.validate();

    let listener = Listener::bind(&config.server.listen)?;
    let registry: SharedRegistry = Arc::new(Mutex::new(SessionRegistry::new(config.server)));
    let shutdown = Arc::new(AtomicBool::new(false));
    for signal in [SIGINT, SIGTERM] {
        signal_hook::flag::register(signal, Arc::clone(&shutdown))
            .context("Failed to install signal handler")?;
    }

    listener.serve(&registry, &shutdown)?;

    let mut registry = registry.lock().unwrap_or_else(PoisonError::into_inner);
    for session in registry.list_sessions() {
        info!(
            session_id = %session.session_id,
            pid = ?session.pid,
            cols = session.cols,
            rows = session.rows,
            alive = session.is_alive,
            "closing terminal session"
        );
        registry.close_session(&session.session_id);
    }
    Ok(())
}
