//! All data types and error handling for the mailer crate.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::mime::encode_header_value;

// ─── Error ──────────────────────────────────────────────────────────

/// Stage of the AUTH LOGIN exchange that was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthStage {
    /// The initial `AUTH LOGIN` command.
    Command,
    /// The base64 username line.
    Username,
    /// The base64 password line.
    Password,
}

impl fmt::Display for AuthStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Command => write!(f, "AUTH LOGIN"),
            Self::Username => write!(f, "username"),
            Self::Password => write!(f, "password"),
        }
    }
}

/// Top-level error type for the mailer crate.
#[derive(Debug, thiserror::Error)]
pub enum SmtpError {
    /// TCP connection could not be established.
    #[error("Could not connect to SMTP server {host}:{port}: {source}")]
    ConnectFailed {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },
    /// The server did not greet with 220.
    #[error("SMTP greeting failed: {0}")]
    GreetingFailed(String),
    /// Both EHLO and HELO were rejected.
    #[error("SMTP handshake failed (EHLO/HELO rejected): {0}")]
    HandshakeFailed(String),
    /// STARTTLS, the TLS handshake or the post-TLS EHLO failed.
    #[error("TLS negotiation failed: {0}")]
    TlsFailed(String),
    /// AUTH LOGIN was rejected at the given stage.
    #[error("SMTP authentication failed at {stage} stage: {response}")]
    AuthFailed { stage: AuthStage, response: String },
    /// MAIL FROM was rejected.
    #[error("Sender rejected by server: {0}")]
    SenderRejected(String),
    /// A RCPT TO was rejected; the whole send is aborted.
    #[error("Recipient {address} rejected by server: {response}")]
    RecipientRejected { address: String, response: String },
    /// DATA or the end-of-data marker was rejected.
    #[error("Message data rejected by server: {0}")]
    DataRejected(String),
    /// An attachment path is missing or unreadable.
    #[error("Attachment not found or not readable: {}", path.display())]
    AttachmentNotFound { path: PathBuf },
    /// A send precondition was not met.
    #[error("{message}")]
    ValidationFailed {
        field: &'static str,
        message: &'static str,
    },
    /// Socket failure in the middle of a session.
    #[error("SMTP connection error: {0}")]
    Io(#[from] std::io::Error),
    /// Settings could not be loaded.
    #[error("Invalid mail configuration: {0}")]
    Config(String),
}

impl SmtpError {
    pub fn validation(field: &'static str, message: &'static str) -> Self {
        Self::ValidationFailed { field, message }
    }

    pub fn tls(msg: impl Into<String>) -> Self {
        Self::TlsFailed(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

pub type SmtpResult<T> = Result<T, SmtpError>;

// ─── SMTP Reply ─────────────────────────────────────────────────────

/// A complete (possibly multi-line) SMTP reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtpReply {
    /// The 3-digit reply code, if the first line carried one.
    pub code: Option<u16>,
    /// Reply text lines without code and separator.
    pub lines: Vec<String>,
    /// The reply exactly as received.
    pub raw: String,
}

impl SmtpReply {
    /// Parse a raw reply. Never fails: a missing or malformed code yields
    /// `code == None`, which matches no expectation.
    pub fn parse(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let code = raw
            .get(..3)
            .filter(|prefix| prefix.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|prefix| prefix.parse().ok());
        let lines = raw
            .lines()
            .map(|line| line.get(4..).unwrap_or("").to_string())
            .collect();
        Self { code, lines, raw }
    }

    /// Whether the reply code equals `expected`.
    pub fn is(&self, expected: u16) -> bool {
        self.code == Some(expected)
    }

    /// Whether the reply code is one of `expected`.
    pub fn is_one_of(&self, expected: &[u16]) -> bool {
        self.code.map_or(false, |code| expected.contains(&code))
    }

    /// Whether this is a positive completion (2xx).
    pub fn is_positive(&self) -> bool {
        self.code.map_or(false, |c| (200..300).contains(&c))
    }

    /// Whether this reply indicates an error (4xx / 5xx).
    pub fn is_error(&self) -> bool {
        self.code.map_or(false, |c| c >= 400)
    }

    /// Reply text joined on one line.
    pub fn text(&self) -> String {
        self.lines.join(" ")
    }
}

impl fmt::Display for SmtpReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.raw.trim().is_empty() {
            return write!(f, "(no response)");
        }
        write!(f, "{}", self.raw.trim_end().replace("\r\n", " | "))
    }
}

// ─── Email Address ──────────────────────────────────────────────────

/// An email address with an optional display name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct EmailAddress {
    /// Display name (e.g. "John Doe").
    pub name: Option<String>,
    /// The email address (e.g. "john@example.com").
    pub address: String,
}

impl EmailAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            name: None,
            address: address.into().trim().to_string(),
        }
    }

    /// Build an address; an empty or blank name counts as no name.
    pub fn with_name(address: impl Into<String>, name: Option<&str>) -> Self {
        let name = name.map(str::trim).filter(|n| !n.is_empty());
        Self {
            name: name.map(str::to_string),
            address: address.into().trim().to_string(),
        }
    }

    /// Header form: `Name <address>` when a display name exists, else the
    /// bare address. Non-ASCII names are RFC 2047 encoded.
    pub fn to_mailbox(&self) -> String {
        match &self.name {
            Some(name) if !name.is_ascii() => {
                format!("{} <{}>", encode_header_value(name), self.address)
            }
            Some(name) if name.contains(|c: char| "()<>[]:;@\\,\"".contains(c)) => {
                format!("\"{}\" <{}>", name.replace('"', "\\\""), self.address)
            }
            Some(name) => format!("{} <{}>", name, self.address),
            None => self.address.clone(),
        }
    }

    /// Extract the domain part.
    pub fn domain(&self) -> Option<&str> {
        self.address
            .rfind('@')
            .map(|at| &self.address[at + 1..])
            .filter(|d| !d.is_empty())
    }
}

impl fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_mailbox())
    }
}

/// Anything accepted by `to` / `cc` / `bcc`: a single address or a list.
pub trait IntoAddressList {
    fn into_address_list(self) -> Vec<String>;
}

impl IntoAddressList for &str {
    fn into_address_list(self) -> Vec<String> {
        vec![self.to_string()]
    }
}

impl IntoAddressList for String {
    fn into_address_list(self) -> Vec<String> {
        vec![self]
    }
}

impl IntoAddressList for &String {
    fn into_address_list(self) -> Vec<String> {
        vec![self.clone()]
    }
}

impl<S: AsRef<str>> IntoAddressList for Vec<S> {
    fn into_address_list(self) -> Vec<String> {
        self.iter().map(|s| s.as_ref().to_string()).collect()
    }
}

impl<S: AsRef<str>> IntoAddressList for &[S] {
    fn into_address_list(self) -> Vec<String> {
        self.iter().map(|s| s.as_ref().to_string()).collect()
    }
}

impl<S: AsRef<str>, const N: usize> IntoAddressList for [S; N] {
    fn into_address_list(self) -> Vec<String> {
        self.iter().map(|s| s.as_ref().to_string()).collect()
    }
}

/// Trim every entry and drop the ones left empty. Order and duplicates are kept.
pub fn normalize_addresses(list: impl IntoAddressList) -> Vec<String> {
    list.into_address_list()
        .into_iter()
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty())
        .collect()
}

// ─── Envelope ───────────────────────────────────────────────────────

/// Sender, recipients and subject of one send.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Envelope {
    pub from: EmailAddress,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub subject: String,
    pub reply_to: Option<EmailAddress>,
}

impl Envelope {
    /// An empty envelope carrying the default sender.
    pub fn with_sender(from: EmailAddress) -> Self {
        Self {
            from,
            ..Default::default()
        }
    }

    /// All envelope recipients in RCPT order: To, then Cc, then Bcc.
    pub fn all_recipients(&self) -> impl Iterator<Item = &str> {
        self.to
            .iter()
            .chain(self.cc.iter())
            .chain(self.bcc.iter())
            .map(String::as_str)
    }

    pub fn has_recipients(&self) -> bool {
        !(self.to.is_empty() && self.cc.is_empty() && self.bcc.is_empty())
    }
}

// ─── Attachment ─────────────────────────────────────────────────────

/// A file attachment. Only the path is stored; content and MIME type are
/// read when the message is composed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attachment {
    pub path: PathBuf,
    /// File name presented to the recipient.
    pub name: String,
}

impl Attachment {
    /// Validate that `path` is a readable regular file. The display name
    /// defaults to the basename.
    pub fn from_path(path: impl AsRef<Path>, name: Option<&str>) -> SmtpResult<Self> {
        let path = path.as_ref();
        let not_found = || SmtpError::AttachmentNotFound {
            path: path.to_path_buf(),
        };

        let file = std::fs::File::open(path).map_err(|_| not_found())?;
        let meta = file.metadata().map_err(|_| not_found())?;
        if !meta.is_file() {
            return Err(not_found());
        }

        let name = match name.map(str::trim).filter(|n| !n.is_empty()) {
            Some(n) => n.to_string(),
            None => path
                .file_name()
                .map(|f| f.to_string_lossy().into_owned())
                .ok_or_else(not_found)?,
        };
        Ok(Self {
            path: path.to_path_buf(),
            name,
        })
    }

    /// Read the attachment content.
    pub fn read(&self) -> SmtpResult<Vec<u8>> {
        std::fs::read(&self.path).map_err(|_| SmtpError::AttachmentNotFound {
            path: self.path.clone(),
        })
    }
}

// ─── Message Body ───────────────────────────────────────────────────

/// HTML / text content and attachments of one send.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageBody {
    pub html: Option<String>,
    pub text: Option<String>,
    pub attachments: Vec<Attachment>,
}

impl MessageBody {
    /// Non-empty HTML content, if any.
    pub fn html(&self) -> Option<&str> {
        self.html.as_deref().filter(|h| !h.is_empty())
    }

    /// Non-empty text content, if any.
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref().filter(|t| !t.is_empty())
    }

    pub fn has_content(&self) -> bool {
        self.html().is_some() || self.text().is_some()
    }

    pub fn has_attachments(&self) -> bool {
        !self.attachments.is_empty()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
