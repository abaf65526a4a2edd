//! Configuration management for relayterm.
//!
//! Client and server settings share one JSON file under the user's config
//! directory. Command-line flags override whatever is loaded here.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::endpoint::Endpoint;
use crate::renderer::SCROLLBACK_LINES;
use crate::session::ClientSettings;
use crate::transport::ConnectOptions;

/// Main configuration struct
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub client: ClientConfig,

    #[serde(default)]
    pub server: ServerConfig,
}

impl Config {
    /// Load configuration from disk, or return default if not found
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut config: Config = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.validate();

        Ok(config)
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    pub fn validate(&mut self) {
        self.client.validate();
        self.server.validate();
    }

    /// Get the path to the config file
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().context("Could not find config directory")?;

        Ok(config_dir.join("relayterm").join("config.json"))
    }
}

/// Client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub endpoint: Endpoint,

    /// How long to wait for the `connected` handshake before telling the user
    #[serde(default = "default_timeout_ms")]
    pub handshake_timeout_ms: u64,

    #[serde(default = "default_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_scrollback")]
    pub scrollback_lines: usize,
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_scrollback() -> usize {
    SCROLLBACK_LINES
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::default(),
            handshake_timeout_ms: default_timeout_ms(),
            connect_timeout_ms: default_timeout_ms(),
            scrollback_lines: default_scrollback(),
        }
    }
}

impl ClientConfig {
    /// Clamp timeouts to 100ms..10min and scrollback to at most 100k lines.
    pub fn validate(&mut self) {
        self.handshake_timeout_ms = self.handshake_timeout_ms.clamp(100, 600_000);
        self.connect_timeout_ms = self.connect_timeout_ms.clamp(100, 600_000);
        self.scrollback_lines = self.scrollback_lines.min(100_000);
    }

    pub fn settings(&self) -> ClientSettings {
        ClientSettings {
            connect: ConnectOptions {
                connect_timeout: Duration::from_millis(self.connect_timeout_ms),
                ..ConnectOptions::default()
            },
            handshake_timeout: Duration::from_millis(self.handshake_timeout_ms),
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub listen: Endpoint,

    #[serde(default = "default_shell")]
    pub shell: String,

    #[serde(default = "default_shell_args")]
    pub shell_args: Vec<String>,

    /// Starting directory for shells; the server's cwd when unset
    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    /// `PATH` given to shells
    #[serde(default = "default_path")]
    pub path: String,

    #[serde(default = "default_term")]
    pub term: String,

    #[serde(default = "default_rows")]
    pub rows: u16,

    #[serde(default = "default_cols")]
    pub cols: u16,

    /// Variables removed from the shell's environment
    #[serde(default = "default_scrub_env")]
    pub scrub_env: Vec<String>,
}

fn default_shell() -> String {
    "/bin/bash".to_string()
}

fn default_shell_args() -> Vec<String> {
    vec!["-i".to_string()]
}

fn default_path() -> String {
    "/usr/local/bin:/usr/bin:/bin".to_string()
}

fn default_term() -> String {
    "xterm-256color".to_string()
}

fn default_rows() -> u16 {
    crate::protocol::DEFAULT_ROWS
}

fn default_cols() -> u16 {
    crate::protocol::DEFAULT_COLS
}

fn default_scrub_env() -> Vec<String> {
    [
        "SUDO_USER",
        "SUDO_UID",
        "SUDO_GID",
        "SSH_AUTH_SOCK",
        "SSH_CONNECTION",
        "DOCKER_HOST",
        "KUBECONFIG",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: Endpoint::default(),
            shell: default_shell(),
            shell_args: default_shell_args(),
            working_dir: None,
            path: default_path(),
            term: default_term(),
            rows: default_rows(),
            cols: default_cols(),
            scrub_env: default_scrub_env(),
        }
    }
}

impl ServerConfig {
    /// Clamp the initial PTY size to 1..=1000 in each dimension.
    pub fn validate(&mut self) {
        self.rows = self.rows.clamp(1, 1000);
        self.cols = self.cols.clamp(1, 1000);
        if self.shell.trim().is_empty() {
            self.shell = default_shell();
        }
    }
}
