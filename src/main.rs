use std::io::{self, IsTerminal};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use crossterm::{
    event::{DisableBracketedPaste, EnableBracketedPaste},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};

use relayterm::app::{self, App};
use relayterm::config::Config;
use relayterm::endpoint::Endpoint;
use relayterm::logging::{self, LogFormat};
use relayterm::transport::SocketTransport;

/// Interactive client for a relayterm terminal server.
#[derive(Debug, Parser)]
#[command(name = "relayterm", version)]
struct Args {
    /// Server endpoint (`unix:/path`, `/path`, `host:port`)
    endpoint: Option<Endpoint>,

    /// Config file (defaults to the user config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Log file (defaults to the user cache directory)
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Write the effective configuration to the config file and exit
    #[arg(long)]
    write_config: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(endpoint) = args.endpoint {
        config.client.endpoint = endpoint;
    }

    if args.write_config {
        match &args.config {
            Some(path) => config.save_to(path)?,
            None => config.save()?,
        }
        return Ok(());
    }

    if !io::stdin().is_terminal() {
        anyhow::bail!("relayterm must be run in an interactive terminal");
    }

    // Logs go to a file; stderr would corrupt the alternate screen.
    if let Some(log_file) = args.log_file.or_else(logging::default_client_log) {
        logging::init_logging(args.verbose.saturating_add(1), Some(&log_file), LogFormat::Text)
            .with_context(|| format!("Failed to open log file: {}", log_file.display()))?;
    }

    enable_raw_mode().context("Failed to enable raw mode - are you in a terminal?")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableBracketedPaste)
        .context("Failed to setup terminal")?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("Failed to create terminal")?;

    let size = terminal.size().context("Failed to get terminal size")?;
    let mut app = App::new(
        SocketTransport::new(),
        config.client.endpoint.clone(),
        &config.client,
        (size.width, size.height),
    );

    let result = app::run(&mut terminal, &mut app);

    // Restore terminal (always try to restore even on error)
    let _ = disable_raw_mode();
    let _ = execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableBracketedPaste
    );
    let _ = terminal.show_cursor();

    result
}
