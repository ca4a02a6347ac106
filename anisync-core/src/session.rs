//! Session and ban state.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{error, info, warn};

/// Where the client stands with the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionPhase {
    LoggedOut,
    Authenticating,
    LoggedIn,
    /// Terminal for the process.
    Banned,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionPhase::LoggedOut => "logged out",
            SessionPhase::Authenticating => "authenticating",
            SessionPhase::LoggedIn => "logged in",
            SessionPhase::Banned => "banned",
        };
        f.write_str(s)
    }
}

/// Session state machine.
///
/// Once banned, every transition is ignored.
#[derive(Debug, Clone)]
pub struct SessionState {
    phase: SessionPhase,
    session_id: Option<String>,
    ban_reason: Option<String>,
    credentials_rejected: bool,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            phase: SessionPhase::LoggedOut,
            session_id: None,
            ban_reason: None,
            credentials_rejected: false,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn is_logged_in(&self) -> bool {
        self.phase == SessionPhase::LoggedIn
    }

    pub fn is_authenticating(&self) -> bool {
        self.phase == SessionPhase::Authenticating
    }

    pub fn is_banned(&self) -> bool {
        self.phase == SessionPhase::Banned
    }

    pub fn ban_reason(&self) -> Option<&str> {
        self.ban_reason.as_deref()
    }

    /// The server refused the credentials; no automatic login until they
    /// change.
    pub fn credentials_rejected(&self) -> bool {
        self.credentials_rejected
    }

    pub fn begin_auth(&mut self) {
        if self.is_banned() {
            return;
        }
        self.phase = SessionPhase::Authenticating;
    }

    pub fn on_login(&mut self, session_id: impl Into<String>) {
        if self.is_banned() {
            return;
        }
        self.session_id = Some(session_id.into());
        self.credentials_rejected = false;
        self.phase = SessionPhase::LoggedIn;
        info!("Logged in");
    }

    pub fn on_logout(&mut self) {
        if self.is_banned() {
            return;
        }
        self.session_id = None;
        self.phase = SessionPhase::LoggedOut;
        info!("Logged out");
    }

    /// The server no longer accepts the session.
    pub fn invalidate(&mut self) {
        if self.is_banned() {
            return;
        }
        if self.session_id.is_some() {
            warn!("Session invalidated by server");
        }
        self.session_id = None;
        self.phase = SessionPhase::LoggedOut;
    }

    pub fn on_login_failed(&mut self) {
        if self.is_banned() {
            return;
        }
        self.session_id = None;
        self.credentials_rejected = true;
        self.phase = SessionPhase::LoggedOut;
        warn!("Login failed: credentials rejected");
    }

    /// New credentials were supplied; automatic login may resume.
    pub fn reset_credentials(&mut self) {
        self.credentials_rejected = false;
    }

    pub fn ban(&mut self, reason: impl Into<String>) {
        if self.is_banned() {
            return;
        }
        let reason = reason.into();
        error!("Client banned: {}", reason);
        self.session_id = None;
        self.ban_reason = Some(reason);
        self.phase = SessionPhase::Banned;
    }
}
