//! A login shell running on a PTY.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use anyhow::{Context, Result};
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtyPair, PtySize};
use tracing::{debug, trace};

use crate::config::ServerConfig;
use crate::protocol::SessionId;

/// Build the shell command with a sanitized environment.
pub fn shell_command(config: &ServerConfig) -> CommandBuilder {
    let mut cmd = CommandBuilder::new(&config.shell);
    cmd.args(&config.shell_args);

    if let Some(dir) = &config.working_dir {
        cmd.cwd(dir);
    } else if let Ok(dir) = std::env::current_dir() {
        cmd.cwd(dir);
    }

    for var in &config.scrub_env {
        cmd.env_remove(var);
    }
    cmd.env("TERM", &config.term);
    cmd.env("COLORTERM", "truecolor");
    cmd.env("PATH", &config.path);
    cmd.env("SHELL", &config.shell);
    cmd.env("COLUMNS", config.cols.to_string());
    cmd.env("LINES", config.rows.to_string());
    cmd
}

/// Summary of a session for listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub session_id: SessionId,
    pub pid: Option<u32>,
    pub rows: u16,
    pub cols: u16,
    pub is_alive: bool,
}

/// Input side of a PTY. Clones share the same writer, so a caller can write
/// without holding on to the session.
#[derive(Clone)]
pub struct PtyWriter {
    inner: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl PtyWriter {
    fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(writer)),
        }
    }

    /// Blocks while the PTY input buffer is full.
    pub fn write(&self, data: &[u8]) -> Result<()> {
        let mut writer = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        writer.write_all(data)?;
        writer.flush()?;
        Ok(())
    }
}

/// A shell process attached to a PTY.
pub struct ShellSession {
    session_id: SessionId,
    master: Box<dyn MasterPty + Send>,
    writer: PtyWriter,
    child: Box<dyn Child + Send + Sync>,
    /// PTY output, until a connection takes it.
    output_rx: Option<Receiver<Vec<u8>>>,
    _reader_thread: thread::JoinHandle<()>,
    /// Cleared when the reader hits EOF.
    alive: Arc<AtomicBool>,
    rows: u16,
    cols: u16,
}

impl ShellSession {
    /// Spawn the configured shell on a fresh PTY.
    pub fn spawn(session_id: SessionId, config: &ServerConfig) -> Result<Self> {
        let (rows, cols) = (config.rows, config.cols);
        let pty_system = native_pty_system();

        let PtyPair { master, slave } = pty_system
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .context("Failed to open PTY")?;

        let child = slave
            .spawn_command(shell_command(config))
            .with_context(|| format!("Failed to spawn {}", config.shell))?;
        // Our copy of the slave must close for the reader to see EOF.
        drop(slave);

        let writer = master.take_writer().context("Failed to take PTY writer")?;
        let mut reader = master
            .try_clone_reader()
            .context("Failed to clone PTY reader")?;

        let (output_tx, output_rx): (Sender<Vec<u8>>, Receiver<Vec<u8>>) = mpsc::channel();
        let alive = Arc::new(AtomicBool::new(true));
        let alive_clone = Arc::clone(&alive);
        let thread_id = session_id.clone();

        let reader_thread = thread::Builder::new()
            .name(format!("pty-{}", session_id.chars().take(8).collect::<String>()))
            .spawn(move || {
                let mut buf = [0u8; 4096];
                loop {
                    match reader.read(&mut buf) {
                        Ok(0) => break,
                        Ok(n) => {
                            if output_tx.send(buf[..n].to_vec()).is_err() {
                                break;
                            }
                        }
                        Err(_) => break,
                    }
                }
                trace!(session_id = %thread_id, "pty reader finished");
                alive_clone.store(false, Ordering::SeqCst);
            })
            .context("Failed to spawn PTY reader thread")?;

        debug!(%session_id, pid = ?child.process_id(), shell = %config.shell, "spawned shell");

        Ok(Self {
            session_id,
            master,
            writer: PtyWriter::new(writer),
            child,
            output_rx: Some(output_rx),
            _reader_thread: reader_thread,
            alive,
            rows,
            cols,
        })
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Hand the output stream to a connection. Only the first caller gets it.
    pub fn take_output(&mut self) -> Option<Receiver<Vec<u8>>> {
        self.output_rx.take()
    }

    /// Whether the PTY is still producing output.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Whether the shell process has exited.
    pub fn has_exited(&mut self) -> bool {
        !matches!(self.child.try_wait(), Ok(None))
    }

    pub fn write(&self, data: &[u8]) -> Result<()> {
        self.writer.write(data)
    }

    /// A handle for writing input once the session is no longer borrowed.
    pub fn writer(&self) -> PtyWriter {
        self.writer.clone()
    }

    pub fn resize(&mut self, cols: u16, rows: u16) -> Result<()> {
        self.master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .context("Failed to resize PTY")?;
        self.rows = rows;
        self.cols = cols;
        Ok(())
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            session_id: self.session_id.clone(),
            pid: self.child.process_id(),
            rows: self.rows,
            cols: self.cols,
            is_alive: self.is_alive(),
        }
    }

    /// Kill the shell if it is still running and reap it.
    pub fn terminate(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            if let Err(e) = self.child.kill() {
                debug!(session_id = %self.session_id, error = %e, "kill failed");
            }
        }
        let _ = self.child.wait();
    }
}

impl Drop for ShellSession {
    fn drop(&mut self) {
        self.terminate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::test_support::{cat_config, collect_until};

    #[test]
    fn command_scrubs_and_sets_environment() {
        let config = ServerConfig {
            scrub_env: vec!["SSH_AUTH_SOCK".to_string()],
            ..Default::default()
        };
        let cmd = shell_command(&config);

        assert_eq!(cmd.get_env("TERM").and_then(|v| v.to_str()), Some("xterm-256color"));
        assert_eq!(cmd.get_env("COLUMNS").and_then(|v| v.to_str()), Some("80"));
        assert_eq!(cmd.get_env("LINES").and_then(|v| v.to_str()), Some("24"));
        assert_eq!(
            cmd.get_env("PATH").and_then(|v| v.to_str()),
            Some("/usr/local/bin:/usr/bin:/bin")
        );
        assert!(cmd.get_env("SSH_AUTH_SOCK").is_none());
    }

    #[test]
    fn echoes_input_and_hands_output_out_once() {
        let mut session = ShellSession::spawn("test-echo".to_string(), &cat_config()).unwrap();
        let rx = session.take_output().unwrap();
        assert!(session.take_output().is_none());

        session.write(b"ping\r").unwrap();
        assert!(collect_until(&rx, "ping").contains("ping"));
        assert!(session.is_alive());
        assert!(!session.has_exited());
    }

    #[test]
    fn resize_updates_reported_size() {
        let mut session = ShellSession::spawn("test-resize".to_string(), &cat_config()).unwrap();
        session.resize(132, 43).unwrap();
        let info = session.info();
        assert_eq!((info.cols, info.rows), (132, 43));
    }

    #[test]
    fn terminate_ends_the_process() {
        let mut session = ShellSession::spawn("test-kill".to_string(), &cat_config()).unwrap();
        session.terminate();
        assert!(session.has_exited());
    }

    #[test]
    fn spawn_failure_is_reported() {
        let config = ServerConfig {
            shell: "/nonexistent/shell".to_string(),
            ..Default::default()
        };
        assert!(ShellSession::spawn("bad".to_string(), &config).is_err());
    }
}
