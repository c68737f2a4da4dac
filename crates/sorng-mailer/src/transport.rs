//! Blocking SMTP transport.
//!
//! Owns the TCP socket (plain or TLS), performs the STARTTLS upgrade in
//! place and implements the command / reply primitive. Every socket
//! operation is bounded by the configured timeout.

use std::io::{BufRead, BufReader, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, ClientConnection, DigitallySignedStruct, RootCertStore, StreamOwned};

use crate::config::{Encryption, SmtpConfig};
use crate::types::{SmtpError, SmtpReply, SmtpResult};

// ─── Stream Abstraction ─────────────────────────────────────────────

type TlsStream = StreamOwned<ClientConnection, TcpStream>;

/// Wrapper over plain-text or TLS socket so the rest of the engine is generic.
enum SmtpStream {
    Plain(BufReader<TcpStream>),
    Tls(BufReader<TlsStream>),
}

impl SmtpStream {
    fn read_line(&mut self, buf: &mut Vec<u8>) -> std::io::Result<usize> {
        match self {
            Self::Plain(r) => r.read_until(b'\n', buf),
            Self::Tls(r) => r.read_until(b'\n', buf),
        }
    }

    fn write_all(&mut self, data: &[u8]) -> std::io::Result<()> {
        match self {
            Self::Plain(r) => {
                let w = r.get_mut();
                w.write_all(data)?;
                w.flush()
            }
            Self::Tls(r) => {
                let w = r.get_mut();
                w.write_all(data)?;
                w.flush()
            }
        }
    }

    fn shutdown(self) {
        match self {
            Self::Plain(r) => {
                let _ = r.get_ref().shutdown(Shutdown::Both);
            }
            Self::Tls(r) => {
                let mut tls = r.into_inner();
                tls.conn.send_close_notify();
                let _ = tls.flush();
                let _ = tls.sock.shutdown(Shutdown::Both);
            }
        }
    }
}

// ─── TransportSession ───────────────────────────────────────────────

/// A live SMTP connection. The socket is closed on [`close`](Self::close)
/// and, at the latest, when the session is dropped.
pub struct TransportSession {
    stream: Option<SmtpStream>,
    host: String,
    timeout: Duration,
    verify_certificates: bool,
}

impl TransportSession {
    /// Open a session using host, port, encryption and timeout from `config`.
    pub fn connect(config: &SmtpConfig) -> SmtpResult<Self> {
        Self::open_with(
            &config.host,
            config.port,
            config.encryption == Encryption::Ssl,
            config.timeout(),
            config.verify_certificates,
        )
    }

    /// Open a stream socket to `host:port`. With `implicit_tls` the TLS
    /// handshake happens immediately (port 465 style).
    pub fn open(host: &str, port: u16, implicit_tls: bool, timeout: Duration) -> SmtpResult<Self> {
        Self::open_with(host, port, implicit_tls, timeout, true)
    }

    pub fn open_with(
        host: &str,
        port: u16,
        implicit_tls: bool,
        timeout: Duration,
        verify_certificates: bool,
    ) -> SmtpResult<Self> {
        debug!("Connecting to SMTP server {}:{}…", host, port);
        let connect_failed = |source: std::io::Error| SmtpError::ConnectFailed {
            host: host.to_string(),
            port,
            source,
        };

        let tcp = connect_tcp(host, port, timeout).map_err(connect_failed)?;
        tcp.set_read_timeout(Some(timeout)).map_err(connect_failed)?;
        tcp.set_write_timeout(Some(timeout)).map_err(connect_failed)?;

        let mut session = Self {
            stream: None,
            host: host.to_string(),
            timeout,
            verify_certificates,
        };
        session.stream = Some(if implicit_tls {
            SmtpStream::Tls(BufReader::new(session.tls_handshake(tcp)?))
        } else {
            SmtpStream::Plain(BufReader::new(tcp))
        });
        info!(
            "SMTP connected to {}:{}{}",
            host,
            port,
            if implicit_tls { " (implicit TLS)" } else { "" }
        );
        Ok(session)
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    pub fn is_tls(&self) -> bool {
        matches!(self.stream, Some(SmtpStream::Tls(_)))
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Upgrade the current plain-text connection to TLS in place.
    /// On failure the connection is gone; there is no plaintext fallback.
    pub fn upgrade_to_tls(&mut self) -> SmtpResult<()> {
        let tcp = match self.stream.take() {
            Some(SmtpStream::Plain(reader)) => {
                if !reader.buffer().is_empty() {
                    warn!("Discarding {} unread bytes before TLS upgrade", reader.buffer().len());
                }
                reader.into_inner()
            }
            Some(tls @ SmtpStream::Tls(_)) => {
                self.stream = Some(tls);
                return Err(SmtpError::tls("connection is already using TLS"));
            }
            None => return Err(SmtpError::tls("not connected")),
        };
        let tls = self.tls_handshake(tcp)?;
        self.stream = Some(SmtpStream::Tls(BufReader::new(tls)));
        info!("STARTTLS upgrade successful");
        Ok(())
    }

    // ── Request / response ──────────────────────────────────────

    /// Send a command line and read the reply.
    pub fn command(&mut self, cmd: &str) -> SmtpResult<SmtpReply> {
        debug!("C: {}", cmd);
        self.write_line(cmd)?;
        self.read_response()
    }

    /// Like [`command`](Self::command) but keeps the line out of the log.
    pub fn command_secret(&mut self, cmd: &str) -> SmtpResult<SmtpReply> {
        debug!("C: ********");
        self.write_line(cmd)?;
        self.read_response()
    }

    /// Read one complete SMTP reply, possibly multi-line.
    ///
    /// `NNN-text` announces more lines, anything else ends the reply. A line
    /// shorter than four bytes (including EOF) also ends it, so a dropped
    /// connection cannot loop forever.
    pub fn read_response(&mut self) -> SmtpResult<SmtpReply> {
        let stream = self.stream.as_mut().ok_or_else(not_connected)?;
        let mut raw = String::new();
        loop {
            let mut buf = Vec::new();
            stream.read_line(&mut buf)?;
            let line = String::from_utf8_lossy(&buf);
            raw.push_str(&line);
            if !line.is_empty() {
                debug!("S: {}", line.trim_end());
            }
            if line.len() < 4 || line.as_bytes()[3] != b'-' {
                break;
            }
        }
        Ok(SmtpReply::parse(raw))
    }

    /// Write raw bytes to the stream.
    pub fn write_raw(&mut self, data: &[u8]) -> SmtpResult<()> {
        let stream = self.stream.as_mut().ok_or_else(not_connected)?;
        stream.write_all(data)?;
        Ok(())
    }

    /// Best-effort `QUIT`, then close the socket. Safe to call repeatedly.
    pub fn close(&mut self) {
        let Some(mut stream) = self.stream.take() else {
            return;
        };
        debug!("C: QUIT");
        if stream.write_all(b"QUIT\r\n").is_ok() {
            let mut buf = Vec::new();
            if stream.read_line(&mut buf).is_ok() && !buf.is_empty() {
                debug!("S: {}", String::from_utf8_lossy(&buf).trim_end());
            }
        }
        stream.shutdown();
        info!("SMTP connection to {} closed", self.host);
    }

    fn write_line(&mut self, line: &str) -> SmtpResult<()> {
        self.write_raw(format!("{}\r\n", line).as_bytes())
    }

    // ── TLS helper ──────────────────────────────────────────────

    fn tls_handshake(&self, mut tcp: TcpStream) -> SmtpResult<TlsStream> {
        let config = build_tls_config(self.verify_certificates)?;
        let server_name = ServerName::try_from(self.host.clone())
            .map_err(|e| SmtpError::tls(format!("Invalid server name {}: {}", self.host, e)))?;
        let mut conn = ClientConnection::new(config, server_name)
            .map_err(|e| SmtpError::tls(format!("TLS setup failed: {}", e)))?;

        while conn.is_handshaking() {
            conn.complete_io(&mut tcp)
                .map_err(|e| SmtpError::tls(format!("TLS handshake failed: {}", e)))?;
        }
        debug!("TLS established ({:?})", conn.protocol_version());
        Ok(StreamOwned::new(conn, tcp))
    }
}

impl Drop for TransportSession {
    fn drop(&mut self) {
        self.close();
    }
}

fn not_connected() -> SmtpError {
    std::io::Error::new(std::io::ErrorKind::NotConnected, "not connected").into()
}

/// Try every resolved address in turn with a bounded connect.
fn connect_tcp(host: &str, port: u16, timeout: Duration) -> std::io::Result<TcpStream> {
    let mut last_err = None;
    for addr in (host, port).to_socket_addrs()? {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                debug!("Connect to {} failed: {}", addr, e);
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{} did not resolve to any address", host),
        )
    }))
}

/// TLS 1.2 minimum, TLS 1.3 preferred, webpki roots.
fn build_tls_config(verify_certificates: bool) -> SmtpResult<Arc<ClientConfig>> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());

    let mut root_store = RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let mut tls_config = ClientConfig::builder_with_provider(provider.clone())
        .with_protocol_versions(&[&rustls::version::TLS13, &rustls::version::TLS12])
        .map_err(|e| SmtpError::tls(format!("TLS configuration error: {}", e)))?
        .with_root_certificates(root_store)
        .with_no_client_auth();

    if !verify_certificates {
        warn!("TLS certificate verification disabled – insecure!");
        tls_config
            .dangerous()
            .set_certificate_verifier(Arc::new(NoCertVerifier(provider)));
    }
    Ok(Arc::new(tls_config))
}

// ─── NoCertVerifier (for self-signed certs) ─────────────────────────

/// Accepts any server certificate but still checks handshake signatures.
#[derive(Debug)]
struct NoCertVerifier(Arc<CryptoProvider>);

impl ServerCertVerifier for NoCertVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
