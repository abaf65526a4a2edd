//! All shell sessions owned by the server.

use std::collections::HashMap;

use anyhow::Result;
use tracing::info;

use super::shell::{SessionInfo, ShellSession};
use crate::config::ServerConfig;
use crate::protocol::SessionId;

/// Owns every live [`ShellSession`], keyed by UUID.
pub struct SessionRegistry {
    config: ServerConfig,
    sessions: HashMap<SessionId, ShellSession>,
}

impl SessionRegistry {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            sessions: HashMap::new(),
        }
    }

    /// Spawn a shell under a fresh session id.
    pub fn create_session(&mut self) -> Result<SessionId> {
        let session_id = uuid::Uuid::new_v4().to_string();
        let session = ShellSession::spawn(session_id.clone(), &self.config)?;
        self.sessions.insert(session_id.clone(), session);
        info!(%session_id, "created terminal session");
        Ok(session_id)
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    pub fn get_session_mut(&mut self, session_id: &str) -> Option<&mut ShellSession> {
        self.sessions.get_mut(session_id)
    }

    pub fn list_sessions(&self) -> Vec<SessionInfo> {
        self.sessions.values().map(ShellSession::info).collect()
    }

    /// Close a session, terminating its shell.
    pub fn close_session(&mut self, session_id: &str) -> bool {
        self.sessions.remove(session_id).is_some()
    }

    /// Remove sessions whose shell has exited.
    /// Returns the IDs of sessions that were removed.
    pub fn reap_dead(&mut self) -> Vec<SessionId> {
        let dead: Vec<SessionId> = self
            .sessions
            .iter_mut()
            .filter_map(|(id, s)| (!s.is_alive() || s.has_exited()).then(|| id.clone()))
            .collect();

        for id in &dead {
            self.sessions.remove(id);
        }

        dead
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
