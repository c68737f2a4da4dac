//! **sorng-mailer**: blocking outbound SMTP delivery engine.
//!
//! Speaks SMTP over a raw socket (greeting, EHLO/HELO, STARTTLS, AUTH LOGIN,
//! MAIL/RCPT/DATA) and composes MIME messages itself.
//!
//! # Modules
//!
//! | Module | Purpose |
//! |---|---|
//! | [`types`] | Errors, reply parsing, addresses, envelope and body data |
//! | [`config`] | SMTP server settings and the default sender |
//! | [`transport`] | Plain / TLS socket with the command-reply primitive |
//! | [`auth`] | AUTH LOGIN |
//! | [`negotiator`] | Greeting → EHLO/HELO → STARTTLS → AUTH |
//! | [`mime`] | Header words, quoted-printable, base64, MIME type lookup |
//! | [`message`] | MIME message composer |
//! | [`mailer`] | Fluent `Mailer` running one SMTP conversation per send |

pub mod types;
pub mod config;
pub mod transport;
pub mod auth;
pub mod negotiator;
pub mod mime;
pub mod message;
pub mod mailer;

pub use config::{Encryption, FromConfig, MailSettings, SmtpConfig};
pub use mailer::Mailer;
pub use message::{Boundaries, MessageComposer};
pub use negotiator::{ProtocolNegotiator, SessionState};
pub use transport::TransportSession;
pub use types::{
    Attachment, AuthStage, EmailAddress, Envelope, IntoAddressList, MessageBody, SmtpError,
    SmtpReply, SmtpResult,
};
