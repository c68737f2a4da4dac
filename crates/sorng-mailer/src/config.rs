//! Mail settings: SMTP server configuration and the default sender.
//!
//! Settings are plain serde structs. Every field has a default, so a partial
//! JSON document such as `{"smtp": {"host": "mx.example.com"}}` is enough.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::{EmailAddress, SmtpError, SmtpResult};

// ─── Encryption ─────────────────────────────────────────────────────

/// Transport security mode (`smtp.encryption`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encryption {
    /// Plain text for the whole session.
    None,
    /// Plain connect, then upgrade with STARTTLS (port 587 style).
    Tls,
    /// TLS from the first byte (port 465 style).
    Ssl,
}

impl Default for Encryption {
    fn default() -> Self {
        Self::Tls
    }
}

impl fmt::Display for Encryption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Tls => write!(f, "tls"),
            Self::Ssl => write!(f, "ssl"),
        }
    }
}

// ─── SmtpConfig ─────────────────────────────────────────────────────

/// SMTP server configuration.
///
/// Defaults: `localhost:587`, STARTTLS, 30 second timeout, no credentials,
/// HELO name taken from the local hostname, certificates verified.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SmtpConfig {
    /// Hostname or IP of the SMTP server.
    pub host: String,
    /// Port (25 / 465 / 587 / 2525).
    pub port: u16,
    /// Security mode.
    pub encryption: Encryption,
    /// Connect, read and write timeout in seconds, applied per operation.
    pub timeout: u64,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Name sent with EHLO/HELO. Falls back to the local hostname.
    pub helo_name: Option<String>,
    /// Whether to verify the server's TLS certificate.
    pub verify_certificates: bool,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 587,
            encryption: Encryption::Tls,
            timeout: 30,
            username: None,
            password: None,
            helo_name: None,
            verify_certificates: true,
        }
    }
}

impl SmtpConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    pub fn with_encryption(mut self, encryption: Encryption) -> Self {
        self.encryption = encryption;
        self
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = secs;
        self
    }

    pub fn with_helo_name(mut self, name: impl Into<String>) -> Self {
        self.helo_name = Some(name.into());
        self
    }

    pub fn with_verify_certificates(mut self, verify: bool) -> Self {
        self.verify_certificates = verify;
        self
    }

    /// Per-operation socket timeout. Zero is bumped to one second because
    /// the socket API rejects a zero timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout.max(1))
    }

    /// Credentials, only when both username and password are non-empty.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(u), Some(p)) if !u.is_empty() && !p.is_empty() => Some((u, p)),
            _ => None,
        }
    }

    /// Name to announce in EHLO/HELO.
    pub fn hello_name(&self) -> String {
        if let Some(name) = self.helo_name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
            return name.to_string();
        }
        hostname::get()
            .ok()
            .map(|h| h.to_string_lossy().trim().to_string())
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| "localhost".to_string())
    }
}

impl fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("encryption", &self.encryption)
            .field("timeout", &self.timeout)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "********"))
            .field("helo_name", &self.helo_name)
            .field("verify_certificates", &self.verify_certificates)
            .finish()
    }
}

// ─── Default sender ─────────────────────────────────────────────────

/// Default From address restored into the envelope on every reset.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FromConfig {
    pub address: String,
    pub name: Option<String>,
}

impl FromConfig {
    pub fn new(address: impl Into<String>, name: Option<&str>) -> Self {
        Self {
            address: address.into(),
            name: name.map(str::to_string),
        }
    }

    pub fn to_address(&self) -> EmailAddress {
        EmailAddress::with_name(self.address.as_str(), self.name.as_deref())
    }
}

// ─── MailSettings ───────────────────────────────────────────────────

/// Everything the mailer reads from configuration: `smtp.*` and `from.*`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MailSettings {
    pub smtp: SmtpConfig,
    pub from: FromConfig,
}

impl MailSettings {
    pub fn new(smtp: SmtpConfig, from: FromConfig) -> Self {
        Self { smtp, from }
    }

    /// Parse settings from a JSON document.
    pub fn from_json_str(json: &str) -> SmtpResult<Self> {
        serde_json::from_str(json).map_err(|e| SmtpError::config(e.to_string()))
    }

    /// Load settings from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> SmtpResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| SmtpError::config(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&raw)
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
