//! Session negotiation: greeting, EHLO/HELO, STARTTLS and AUTH LOGIN.
//!
//! The negotiator drives a freshly opened [`TransportSession`] up to the
//! point where a mail transaction may begin. Any failure closes the session
//! and leaves the negotiator in [`SessionState::Disconnected`].

use std::fmt;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::auth::auth_login;
use crate::config::{Encryption, SmtpConfig};
use crate::transport::TransportSession;
use crate::types::*;

// ─── Session State ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Disconnected,
    /// Socket open, greeting not read yet.
    Connected,
    /// `220` greeting accepted and EHLO/HELO answered.
    Greeted,
    /// STARTTLS done and EHLO re-issued.
    Secured,
    /// AUTH LOGIN accepted.
    Authenticated,
    /// Ready for `MAIL FROM`.
    Ready,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connected => "connected",
            Self::Greeted => "greeted",
            Self::Secured => "secured",
            Self::Authenticated => "authenticated",
            Self::Ready => "ready",
        };
        write!(f, "{}", s)
    }
}

// ─── ProtocolNegotiator ─────────────────────────────────────────────

pub struct ProtocolNegotiator<'a> {
    session: &'a mut TransportSession,
    config: &'a SmtpConfig,
    hello_name: String,
    state: SessionState,
}

impl<'a> ProtocolNegotiator<'a> {
    pub fn new(session: &'a mut TransportSession, config: &'a SmtpConfig) -> Self {
        let state = if session.is_connected() {
            SessionState::Connected
        } else {
            SessionState::Disconnected
        };
        Self {
            hello_name: config.hello_name(),
            session,
            config,
            state,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn hello_name(&self) -> &str {
        &self.hello_name
    }

    /// Run the whole negotiation. Nothing is retried; on error the session
    /// is closed.
    pub fn negotiate(&mut self) -> SmtpResult<()> {
        match self.run() {
            Ok(()) => {
                self.state = SessionState::Ready;
                info!("SMTP session ready ({})", self.config.host);
                Ok(())
            }
            Err(e) => {
                debug!("Negotiation failed in state {}: {}", self.state, e);
                self.state = SessionState::Disconnected;
                self.session.close();
                Err(e)
            }
        }
    }

    fn run(&mut self) -> SmtpResult<()> {
        if self.state != SessionState::Connected {
            return Err(SmtpError::GreetingFailed("not connected".into()));
        }

        self.read_greeting()?;
        self.hello().map_err(|e| match e {
            SmtpError::HandshakeFailed(_) => e,
            other => SmtpError::HandshakeFailed(other.to_string()),
        })?;
        self.state = SessionState::Greeted;

        if self.config.encryption == Encryption::Tls {
            self.starttls().map_err(|e| match e {
                SmtpError::TlsFailed(_) => e,
                SmtpError::HandshakeFailed(reply) => {
                    SmtpError::tls(format!("EHLO after STARTTLS rejected: {}", reply))
                }
                other => SmtpError::tls(other.to_string()),
            })?;
            self.state = SessionState::Secured;
        }

        if let Some((username, password)) = self.config.credentials() {
            auth_login(self.session, username, password)?;
            self.state = SessionState::Authenticated;
        } else {
            debug!("No credentials configured, skipping authentication");
        }
        Ok(())
    }

    fn read_greeting(&mut self) -> SmtpResult<()> {
        let greeting = self
            .session
            .read_response()
            .map_err(|e| SmtpError::GreetingFailed(e.to_string()))?;
        if !greeting.is(220) {
            return Err(SmtpError::GreetingFailed(greeting.to_string()));
        }
        debug!("Server greeting: {}", greeting.text());
        Ok(())
    }

    /// EHLO, falling back to HELO once.
    fn hello(&mut self) -> SmtpResult<()> {
        let reply = self.session.command(&format!("EHLO {}", self.hello_name))?;
        if reply.is(250) {
            return Ok(());
        }
        debug!("EHLO rejected ({}), trying HELO", reply);
        let reply = self.session.command(&format!("HELO {}", self.hello_name))?;
        if reply.is(250) {
            Ok(())
        } else {
            Err(SmtpError::HandshakeFailed(reply.to_string()))
        }
    }

    fn starttls(&mut self) -> SmtpResult<()> {
        let reply = self.session.command("STARTTLS")?;
        if !reply.is(220) {
            return Err(SmtpError::tls(format!("STARTTLS rejected: {}", reply)));
        }
        self.session.upgrade_to_tls()?;

        // Re-issue EHLO after STARTTLS (RFC 3207 §4.2)
        self.hello()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
