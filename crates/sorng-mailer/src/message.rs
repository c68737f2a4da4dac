//! MIME message composer.
//!
//! Converts an [`Envelope`] and a [`MessageBody`] into the RFC 5322 / MIME
//! bytes sent after `DATA`. The end-of-data marker is not part of the
//! output.

use chrono::{DateTime, Utc};
use log::debug;

use crate::mime::{
    encode_base64_wrapped, encode_header_value, encode_quoted_printable, resolve_mime_type,
};
use crate::types::*;

const MULTIPART_PREAMBLE: &str = "This is a multi-part message in MIME format.";

/// Value of the `X-Mailer` header.
pub const X_MAILER: &str = concat!("sorng-mailer/", env!("CARGO_PKG_VERSION"));

// ─── Boundaries ─────────────────────────────────────────────────────

/// The pair of multipart boundaries used by one composition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Boundaries {
    pub mixed: String,
    pub alt: String,
}

impl Boundaries {
    /// Fresh random boundaries.
    pub fn generate() -> Self {
        Self {
            mixed: format!("----=_Part_{}", uuid::Uuid::new_v4().simple()),
            alt: format!("----=_Alt_{}", uuid::Uuid::new_v4().simple()),
        }
    }

    pub fn new(mixed: impl Into<String>, alt: impl Into<String>) -> Self {
        Self {
            mixed: mixed.into(),
            alt: alt.into(),
        }
    }
}

// ─── Composer ───────────────────────────────────────────────────────

/// Builds message bytes. Date, Message-ID token and boundaries are random
/// per call unless pinned with the `with_*` methods.
#[derive(Debug, Clone, Default)]
pub struct MessageComposer {
    date: Option<DateTime<Utc>>,
    message_token: Option<String>,
    pinned_boundaries: Option<Boundaries>,
    /// Boundaries of the composition in progress; `None` between calls.
    boundaries: Option<Boundaries>,
}

impl MessageComposer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_date(mut self, date: DateTime<Utc>) -> Self {
        self.date = Some(date);
        self
    }

    /// Pin the local part of the Message-ID.
    pub fn with_message_token(mut self, token: impl Into<String>) -> Self {
        self.message_token = Some(token.into());
        self
    }

    pub fn with_boundaries(mut self, boundaries: Boundaries) -> Self {
        self.pinned_boundaries = Some(boundaries);
        self
    }

    /// Boundaries of the composition in progress, if any.
    pub fn active_boundaries(&self) -> Option<&Boundaries> {
        self.boundaries.as_ref()
    }

    /// Compose the full message.
    ///
    /// Attachments are read here, so a file removed since `attach` surfaces
    /// as [`SmtpError::AttachmentNotFound`].
    pub fn compose(&mut self, envelope: &Envelope, body: &MessageBody) -> SmtpResult<Vec<u8>> {
        let boundaries = self
            .pinned_boundaries
            .clone()
            .unwrap_or_else(Boundaries::generate);
        self.boundaries = Some(boundaries.clone());
        let result = self.render(envelope, body, &boundaries);
        self.boundaries = None;
        result.map(String::into_bytes)
    }

    fn render(
        &self,
        envelope: &Envelope,
        body: &MessageBody,
        boundaries: &Boundaries,
    ) -> SmtpResult<String> {
        let mut out = String::with_capacity(1024);

        // ── Headers ────────────────────────────────────────────
        self.write_envelope_headers(&mut out, envelope);

        let has_attachments = body.has_attachments();
        let is_multipart_alt = body.html().is_some() && body.text().is_some();

        if has_attachments {
            write_header(
                &mut out,
                "Content-Type",
                &format!("multipart/mixed; boundary=\"{}\"", boundaries.mixed),
            );
            write_header(&mut out, "X-Mailer", X_MAILER);
            out.push_str("\r\n");
            out.push_str(MULTIPART_PREAMBLE);
            out.push_str("\r\n");

            out.push_str(&format!("\r\n--{}\r\n", boundaries.mixed));
            if is_multipart_alt {
                write_header(
                    &mut out,
                    "Content-Type",
                    &format!("multipart/alternative; boundary=\"{}\"", boundaries.alt),
                );
                out.push_str("\r\n");
                write_alternatives(&mut out, body, &boundaries.alt);
            } else {
                write_single_part(&mut out, body);
            }

            for attachment in &body.attachments {
                out.push_str(&format!("\r\n--{}\r\n", boundaries.mixed));
                write_attachment(&mut out, attachment)?;
            }
            out.push_str(&format!("\r\n--{}--\r\n", boundaries.mixed));
        } else if is_multipart_alt {
            write_header(
                &mut out,
                "Content-Type",
                &format!("multipart/alternative; boundary=\"{}\"", boundaries.alt),
            );
            write_header(&mut out, "X-Mailer", X_MAILER);
            out.push_str("\r\n");
            out.push_str(MULTIPART_PREAMBLE);
            out.push_str("\r\n");
            write_alternatives(&mut out, body, &boundaries.alt);
        } else {
            let (mime, content) = single_content(body);
            write_header(&mut out, "Content-Type", &format!("{}; charset=UTF-8", mime));
            write_header(&mut out, "Content-Transfer-Encoding", "quoted-printable");
            write_header(&mut out, "X-Mailer", X_MAILER);
            out.push_str("\r\n");
            out.push_str(&encode_quoted_printable(content));
        }

        debug!(
            "Composed message: {} bytes, {} attachment(s)",
            out.len(),
            body.attachments.len()
        );
        Ok(out)
    }

    fn write_envelope_headers(&self, out: &mut String, envelope: &Envelope) {
        let date = self.date.unwrap_or_else(Utc::now);
        write_header(out, "Date", &date.format("%a, %d %b %Y %H:%M:%S %z").to_string());
        write_header(out, "From", &envelope.from.to_mailbox());

        if envelope.to.is_empty() {
            write_header(out, "To", "undisclosed-recipients:;");
        } else {
            write_header(out, "To", &envelope.to.join(", "));
        }
        if !envelope.cc.is_empty() {
            write_header(out, "Cc", &envelope.cc.join(", "));
        }
        // Bcc stays in the SMTP envelope only
        write_header(out, "Subject", &encode_header_value(&envelope.subject));
        if let Some(ref reply_to) = envelope.reply_to {
            write_header(out, "Reply-To", &reply_to.to_mailbox());
        }

        let token = self
            .message_token
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());
        let domain = envelope.from.domain().unwrap_or("localhost");
        write_header(out, "Message-ID", &format!("<{}@{}>", token, domain));
        write_header(out, "MIME-Version", "1.0");
    }
}

// ── Body parts ──────────────────────────────────────────────────────

/// The only content of a non-alternative body: HTML wins over text.
fn single_content(body: &MessageBody) -> (&'static str, &str) {
    match (body.html(), body.text()) {
        (Some(html), _) => ("text/html", html),
        (None, Some(text)) => ("text/plain", text),
        (None, None) => ("text/plain", ""),
    }
}

/// A text part with its own headers, used inside `multipart/mixed`.
fn write_single_part(out: &mut String, body: &MessageBody) {
    let (mime, content) = single_content(body);
    write_text_part(out, mime, content);
}

/// Text then HTML, each behind an `alt` delimiter, then the close delimiter.
fn write_alternatives(out: &mut String, body: &MessageBody, boundary: &str) {
    out.push_str(&format!("\r\n--{}\r\n", boundary));
    write_text_part(out, "text/plain", body.text().unwrap_or(""));
    out.push_str(&format!("\r\n--{}\r\n", boundary));
    write_text_part(out, "text/html", body.html().unwrap_or(""));
    out.push_str(&format!("\r\n--{}--\r\n", boundary));
}

fn write_text_part(out: &mut String, mime: &str, content: &str) {
    write_header(out, "Content-Type", &format!("{}; charset=UTF-8", mime));
    write_header(out, "Content-Transfer-Encoding", "quoted-printable");
    out.push_str("\r\n");
    out.push_str(&encode_quoted_printable(content));
}

fn write_attachment(out: &mut String, attachment: &Attachment) -> SmtpResult<()> {
    let data = attachment.read()?;
    let mime = resolve_mime_type(&attachment.name, &data);
    let filename = encode_header_value(&attachment.name).replace('"', "\\\"");

    write_header(out, "Content-Type", &format!("{}; name=\"{}\"", mime, filename));
    write_header(
        out,
        "Content-Disposition",
        &format!("attachment; filename=\"{}\"", filename),
    );
    write_header(out, "Content-Transfer-Encoding", "base64");
    out.push_str("\r\n");
    out.push_str(&encode_base64_wrapped(&data));
    Ok(())
}

// ── Header / wire helpers ───────────────────────────────────────────

/// Write one header line. Line breaks inside `value` are folded into single
/// spaces so caller text can never start a header of its own.
fn write_header(out: &mut String, name: &str, value: &str) {
    out.push_str(name);
    out.push_str(": ");
    let mut pieces = value.split(['\r', '\n']).filter(|piece| !piece.is_empty());
    if let Some(first) = pieces.next() {
        out.push_str(first);
    }
    for piece in pieces {
        out.push(' ');
        out.push_str(piece);
    }
    out.push_str("\r\n");
}

/// Double a `.` at the start of every line so the end-of-data marker stays
/// unambiguous. Line endings are left untouched.
pub fn dot_stuff(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 16);
    let mut at_line_start = true;
    for &b in data {
        if at_line_start && b == b'.' {
            out.push(b'.');
        }
        out.push(b);
        at_line_start = b == b'\n';
    }
    out
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn pinned() -> MessageComposer {
        MessageComposer::new()
            .with_date(Utc.with_ymd_and_hms(2025, 1, 6, 9, 30, 0).unwrap())
            .with_message_token("0123456789abcdef0123456789abcdef")
            .with_boundaries(Boundaries::new("MIXED", "ALT"))
    }

    fn envelope() -> Envelope {
        Envelope {
            from: EmailAddress::with_name("sender@example.com", Some("Sender")),
            to: vec!["a@x.com".into(), "b@x.com".into()],
            subject: "Hi".into(),
            ..Default::default()
        }
    }

    fn text_body(text: &str) -> MessageBody {
        MessageBody {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    fn compose(body: &MessageBody) -> String {
        compose_with(&envelope(), body)
    }

    fn compose_with(envelope: &Envelope, body: &MessageBody) -> String {
        String::from_utf8(pinned().compose(envelope, body).unwrap()).unwrap()
    }

    #[test]
    fn text_only_golden() {
        let out = compose(&text_body("Hello"));
        let expected = format!(
            "Date: Mon, 06 Jan 2025 09:30:00 +0000\r\n\
             From: Sender <sender@example.com>\r\n\
             To: a@x.com, b@x.com\r\n\
             Subject: Hi\r\n\
             Message-ID: <0123456789abcdef0123456789abcdef@example.com>\r\n\
             MIME-Version: 1.0\r\n\
             Content-Type: text/plain; charset=UTF-8\r\n\
             Content-Transfer-Encoding: quoted-printable\r\n\
             X-Mailer: {}\r\n\
             \r\n\
             Hello",
            X_MAILER
        );
        assert_eq!(out, expected);
    }

    #[test]
    fn html_only_is_single_html_part() {
        let body = MessageBody {
            html: Some("<p>Hi</p>".into()),
            ..Default::default()
        };
        let out = compose(&body);
        assert!(out.contains("Content-Type: text/html; charset=UTF-8\r\n"));
        assert!(!out.contains("multipart"));
        assert!(out.ends_with("\r\n\r\n<p>Hi</p>"));
    }

    #[test]
    fn text_and_html_is_alternative_text_first() {
        let body = MessageBody {
            html: Some("<b>Hi</b>".into()),
            text: Some("Hi".into()),
            ..Default::default()
        };
        let out = compose(&body);
        assert!(out.contains("Content-Type: multipart/alternative; boundary=\"ALT\"\r\n"));
        assert!(!out.contains("Content-Transfer-Encoding: quoted-printable\r\nX-Mailer"));
        assert!(out.contains(MULTIPART_PREAMBLE));
        let text_at = out.find("text/plain").unwrap();
        let html_at = out.find("text/html").unwrap();
        assert!(text_at < html_at);
        assert_eq!(out.matches("\r\n--ALT\r\n").count(), 2);
        assert!(out.ends_with("\r\n--ALT--\r\n"));
    }

    #[test]
    fn attachment_makes_mixed_with_sniffed_type() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.pdf");
        std::fs::write(&path, b"%PDF-1.4 fake").unwrap();

        let mut body = text_body("See attached");
        body.attachments.push(Attachment::from_path(&path, None).unwrap());
        let out = compose(&body);

        assert!(out.contains("Content-Type: multipart/mixed; boundary=\"MIXED\"\r\n"));
        assert!(out.contains("Content-Type: application/pdf; name=\"report.pdf\"\r\n"));
        assert!(out.contains("Content-Disposition: attachment; filename=\"report.pdf\"\r\n"));
        assert!(out.contains("Content-Transfer-Encoding: base64\r\n"));
        assert!(out.contains("JVBERi0xLjQgZmFrZQ==\r\n"));
        assert_eq!(out.matches("\r\n--MIXED\r\n").count(), 2);
        assert!(out.ends_with("\r\n--MIXED--\r\n"));
        assert!(!out.contains("ALT"));
    }

    #[test]
    fn attachment_with_both_bodies_nests_alternative() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"plain notes").unwrap();

        let body = MessageBody {
            html: Some("<i>x</i>".into()),
            text: Some("x".into()),
            attachments: vec![Attachment::from_path(&path, Some("Notes.txt")).unwrap()],
        };
        let out = compose(&body);
        let alt_header = out.find("multipart/alternative; boundary=\"ALT\"").unwrap();
        let first_mixed = out.find("\r\n--MIXED\r\n").unwrap();
        assert!(first_mixed < alt_header);
        assert!(out.contains("\r\n--ALT--\r\n"));
        assert!(out.contains("Content-Type: text/plain; name=\"Notes.txt\"\r\n"));
    }

    #[test]
    fn missing_attachment_at_compose_time() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone.bin");
        std::fs::write(&path, b"x").unwrap();
        let mut body = text_body("x");
        body.attachments.push(Attachment::from_path(&path, None).unwrap());
        std::fs::remove_file(&path).unwrap();

        let mut composer = pinned();
        let err = composer.compose(&envelope(), &body).unwrap_err();
        assert!(matches!(err, SmtpError::AttachmentNotFound { .. }));
        assert!(composer.active_boundaries().is_none());
    }

    #[test]
    fn non_ascii_headers_are_encoded() {
        let mut env = envelope();
        env.subject = "Café ☕".into();
        env.from = EmailAddress::with_name("s@example.com", Some("Zoë"));
        env.reply_to = Some(EmailAddress::with_name("r@example.com", Some("Renée")));
        let out = String::from_utf8(pinned().compose(&env, &text_body("x")).unwrap()).unwrap();
        assert!(out.contains(&format!("Subject: {}\r\n", encode_header_value("Café ☕"))));
        assert!(out.contains("From: =?UTF-8?B?"));
        assert!(out.contains("Reply-To: =?UTF-8?B?"));
        assert!(out.is_ascii());
    }

    #[test]
    fn header_order() {
        let mut env = envelope();
        env.cc = vec!["c@x.com".into()];
        env.bcc = vec!["hidden@x.com".into()];
        env.reply_to = Some(EmailAddress::new("reply@x.com"));
        let out = String::from_utf8(pinned().compose(&env, &text_body("x")).unwrap()).unwrap();
        let order = [
            "Date:", "From:", "To:", "Cc:", "Subject:", "Reply-To:", "Message-ID:",
            "MIME-Version:", "Content-Type:", "Content-Transfer-Encoding:", "X-Mailer:",
        ];
        let positions: Vec<usize> = order.iter().map(|h| out.find(h).unwrap()).collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
        assert!(!out.contains("hidden@x.com"));
    }

    #[test]
    fn message_id_falls_back_to_localhost() {
        let mut env = envelope();
        env.from = EmailAddress::new("no-domain");
        let out = String::from_utf8(pinned().compose(&env, &text_body("x")).unwrap()).unwrap();
        assert!(out.contains("Message-ID: <0123456789abcdef0123456789abcdef@localhost>\r\n"));
    }

    #[test]
    fn line_breaks_in_header_values_are_folded() {
        let mut env = envelope();
        env.subject = "Hi\r\nBcc: evil@x.com".into();
        env.from = EmailAddress::with_name("sender@example.com", Some("Sender\nX-Spam: yes"));
        env.reply_to = Some(EmailAddress::with_name("r@x.com", Some("Reply\r\n\r\nbody")));
        let out = compose_with(&env, &text_body("x"));
        let (headers, _) = out.split_once("\r\n\r\n").unwrap();

        assert!(headers.contains("Subject: Hi Bcc: evil@x.com\r\n"));
        assert!(headers.contains("From: \"Sender X-Spam: yes\" <sender@example.com>\r\n"));
        assert!(headers.contains("Reply-To: Reply body <r@x.com>\r\n"));
        for line in headers.split("\r\n") {
            assert!(!line.starts_with("Bcc:"), "{line}");
            assert!(!line.starts_with("X-Spam:"), "{line}");
        }
        assert!(headers.split("\r\n").all(|line| !line.contains(['\r', '\n'])));
    }

    #[test]
    fn write_header_without_line_breaks_is_verbatim() {
        let mut out = String::new();
        write_header(&mut out, "Subject", " spaced  out ");
        assert_eq!(out, "Subject:  spaced  out \r\n");
        out.clear();
        write_header(&mut out, "Subject", "\r\n");
        assert_eq!(out, "Subject: \r\n");
    }

    #[test]
    fn random_boundaries_are_consistent_within_and_distinct_across_calls() {
        let body = MessageBody {
            html: Some("h".into()),
            text: Some("t".into()),
            ..Default::default()
        };
        let mut composer = MessageComposer::new();
        let first = String::from_utf8(composer.compose(&envelope(), &body).unwrap()).unwrap();
        let second = String::from_utf8(composer.compose(&envelope(), &body).unwrap()).unwrap();

        let boundary_of = |msg: &str| {
            let start = msg.find("boundary=\"").unwrap() + "boundary=\"".len();
            let end = start + msg[start..].find('"').unwrap();
            msg[start..end].to_string()
        };
        let b1 = boundary_of(&first);
        let b2 = boundary_of(&second);
        assert!(b1.starts_with("----=_Alt_"));
        assert_ne!(b1, b2);
        assert_eq!(first.matches(&format!("\r\n--{}\r\n", b1)).count(), 2);
        assert!(first.contains(&format!("\r\n--{}--\r\n", b1)));
    }

    #[test]
    fn random_message_id_is_32_hex() {
        let bytes = MessageComposer::new().compose(&envelope(), &text_body("x")).unwrap();
        let out = String::from_utf8(bytes).unwrap();
        let start = out.find("Message-ID: <").unwrap() + "Message-ID: <".len();
        let token = &out[start..start + 32];
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(&out[start + 32..start + 33], "@");
    }

    #[test]
    fn dot_stuffing() {
        assert_eq!(dot_stuff(b".hidden\r\nnormal\r\n..double"), b"..hidden\r\nnormal\r\n...double");
        assert_eq!(dot_stuff(b"a.b\r\n"), b"a.b\r\n");
        assert_eq!(dot_stuff(b"line\n.dot"), b"line\n..dot");
    }
}
