//! Delivery coordinator.
//!
//! [`Mailer`] collects the envelope and body through a fluent API and runs
//! one complete SMTP conversation per [`send`](Mailer::send): validate,
//! compose, connect, negotiate, `MAIL FROM`, `RCPT TO` for every recipient,
//! `DATA`, `QUIT`.

use std::path::Path;
use std::sync::Arc;

use log::{error, info};

use crate::config::MailSettings;
use crate::message::{dot_stuff, MessageComposer};
use crate::negotiator::ProtocolNegotiator;
use crate::transport::TransportSession;
use crate::types::*;

pub struct Mailer {
    settings: Arc<MailSettings>,
    envelope: Envelope,
    body: MessageBody,
    composer: MessageComposer,
    last_error: Option<String>,
}

impl Mailer {
    pub fn new(settings: MailSettings) -> Self {
        Self::with_shared_settings(Arc::new(settings))
    }

    /// Build a mailer over settings shared with other mailers.
    pub fn with_shared_settings(settings: Arc<MailSettings>) -> Self {
        let envelope = Envelope::with_sender(settings.from.to_address());
        Self {
            settings,
            envelope,
            body: MessageBody::default(),
            composer: MessageComposer::new(),
            last_error: None,
        }
    }

    /// Replace the composer, e.g. one with a pinned date and boundaries.
    pub fn with_composer(mut self, composer: MessageComposer) -> Self {
        self.composer = composer;
        self
    }

    pub fn settings(&self) -> &MailSettings {
        &self.settings
    }

    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    pub fn body_parts(&self) -> &MessageBody {
        &self.body
    }

    // ── Envelope ────────────────────────────────────────────────

    /// Append one or more To recipients.
    pub fn to(&mut self, addresses: impl IntoAddressList) -> &mut Self {
        self.envelope.to.extend(normalize_addresses(addresses));
        self
    }

    pub fn cc(&mut self, addresses: impl IntoAddressList) -> &mut Self {
        self.envelope.cc.extend(normalize_addresses(addresses));
        self
    }

    /// Bcc recipients get a `RCPT TO` but never appear in the headers.
    pub fn bcc(&mut self, addresses: impl IntoAddressList) -> &mut Self {
        self.envelope.bcc.extend(normalize_addresses(addresses));
        self
    }

    pub fn subject(&mut self, subject: impl Into<String>) -> &mut Self {
        self.envelope.subject = subject.into();
        self
    }

    /// Override the configured sender for this message.
    pub fn from(&mut self, address: &str, name: Option<&str>) -> &mut Self {
        self.envelope.from = EmailAddress::with_name(address, name);
        self
    }

    pub fn reply_to(&mut self, address: &str, name: Option<&str>) -> &mut Self {
        self.envelope.reply_to = Some(EmailAddress::with_name(address, name));
        self
    }

    // ── Body ────────────────────────────────────────────────────

    /// Attach a file. The path must be a readable regular file right now.
    pub fn attach(&mut self, path: impl AsRef<Path>, name: Option<&str>) -> SmtpResult<&mut Self> {
        let attachment = Attachment::from_path(path, name)?;
        self.body.attachments.push(attachment);
        Ok(self)
    }

    /// Set the HTML body.
    pub fn body(&mut self, html: impl Into<String>) -> &mut Self {
        self.body.html = Some(html.into());
        self
    }

    /// Set the plain-text body.
    pub fn text(&mut self, text: impl Into<String>) -> &mut Self {
        self.body.text = Some(text.into());
        self
    }

    /// Clear envelope and body, restore the configured sender and forget
    /// the last error.
    pub fn reset(&mut self) -> &mut Self {
        self.envelope = Envelope::with_sender(self.settings.from.to_address());
        self.body = MessageBody::default();
        self.last_error = None;
        self
    }

    /// Message of the last failed [`send`](Self::send).
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    // ── Delivery ────────────────────────────────────────────────

    /// Render the message the way `send` would transmit it, before
    /// dot-stuffing. Date, Message-ID and boundaries are drawn afresh on
    /// every call unless the composer passed to
    /// [`with_composer`](Self::with_composer) pins them.
    pub fn compose(&mut self) -> SmtpResult<Vec<u8>> {
        self.composer.compose(&self.envelope, &self.body)
    }

    /// Deliver the message. Returns `false` on any failure and records the
    /// reason in [`last_error`](Self::last_error).
    pub fn send(&mut self) -> bool {
        self.last_error = None;
        match self.try_send() {
            Ok(()) => {
                info!(
                    "Message \"{}\" delivered to {} recipient(s)",
                    self.envelope.subject,
                    self.envelope.all_recipients().count()
                );
                true
            }
            Err(e) => {
                error!("Failed to send email: {}", e);
                self.last_error = Some(e.to_string());
                false
            }
        }
    }

    /// Same as [`send`](Self::send) but returns the typed error.
    pub fn try_send(&mut self) -> SmtpResult<()> {
        self.validate()?;
        let message = self.compose()?;

        let config = &self.settings.smtp;
        let mut session = TransportSession::connect(config)?;
        ProtocolNegotiator::new(&mut session, config).negotiate()?;
        transmit(&mut session, &self.envelope, &message)?;
        session.close();
        Ok(())
    }

    fn validate(&self) -> SmtpResult<()> {
        if !self.envelope.has_recipients() {
            return Err(SmtpError::validation("recipients", "No recipients specified."));
        }
        if self.envelope.subject.trim().is_empty() {
            return Err(SmtpError::validation("subject", "No subject specified."));
        }
        if !self.body.has_content() {
            return Err(SmtpError::validation("body", "No message body specified."));
        }
        if self.envelope.from.address.is_empty() {
            return Err(SmtpError::validation("from", "No sender address specified."));
        }
        // Addresses are written verbatim into MAIL FROM / RCPT TO lines.
        let reply_to = self.envelope.reply_to.as_ref().map(|r| r.address.as_str());
        if std::iter::once(self.envelope.from.address.as_str())
            .chain(self.envelope.all_recipients())
            .chain(reply_to)
            .any(|address| address.contains(['\r', '\n']))
        {
            return Err(SmtpError::validation("address", "Addresses must not contain line breaks."));
        }
        Ok(())
    }
}

// ── Mail transaction ────────────────────────────────────────────────

/// `MAIL FROM`, one `RCPT TO` per recipient, then `DATA`. The first
/// rejected recipient aborts before any data is sent.
fn transmit(session: &mut TransportSession, envelope: &Envelope, message: &[u8]) -> SmtpResult<()> {
    let reply = session.command(&format!("MAIL FROM:<{}>", envelope.from.address))?;
    if !reply.is(250) {
        return Err(SmtpError::SenderRejected(reply.to_string()));
    }

    for address in envelope.all_recipients() {
        let reply = session.command(&format!("RCPT TO:<{}>", address))?;
        if !reply.is_one_of(&[250, 251]) {
            return Err(SmtpError::RecipientRejected {
                address: address.to_string(),
                response: reply.to_string(),
            });
        }
    }

    let reply = session.command("DATA")?;
    if !reply.is(354) {
        return Err(SmtpError::DataRejected(reply.to_string()));
    }
    session.write_raw(&dot_stuff(message))?;
    session.write_raw(b"\r\n.\r\n")?;
    let reply = session.read_response()?;
    if !reply.is(250) {
        return Err(SmtpError::DataRejected(reply.to_string()));
    }
    Ok(())
}

// ─── Tests ──────────────────────────────────────────────────────────
