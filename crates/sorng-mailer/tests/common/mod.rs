//! Scripted SMTP server on 127.0.0.1 for end-to-end tests.

#![allow(dead_code)]

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

use sorng_mailer::{Encryption, FromConfig, MailSettings, SmtpConfig};

/// What the server saw during one session.
#[derive(Debug, Default)]
pub struct Transcript {
    /// Command lines, CRLF stripped, in arrival order.
    pub commands: Vec<String>,
    /// DATA payload up to (not including) the `\r\n.\r\n` marker.
    pub data: Option<Vec<u8>>,
}

impl Transcript {
    pub fn data_str(&self) -> String {
        String::from_utf8(self.data.clone().unwrap_or_default()).unwrap()
    }

    pub fn verbs(&self) -> Vec<String> {
        self.commands
            .iter()
            .map(|c| c.split([' ', ':']).next().unwrap_or("").to_string())
            .collect()
    }
}

/// Replies for one session. Anything not listed gets the usual positive
/// answer.
#[derive(Debug, Clone)]
pub struct Script {
    pub greeting: String,
    pub ehlo: String,
    pub helo: String,
    pub auth: [String; 3],
    pub mail_from: String,
    /// One reply per `RCPT TO`, falling back to `250 OK`.
    pub rcpt: Vec<String>,
    pub data: String,
    pub end_of_data: String,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            greeting: "220 fake.test ESMTP ready\r\n".into(),
            ehlo: "250-fake.test\r\n250-AUTH LOGIN\r\n250 HELP\r\n".into(),
            helo: "250 fake.test\r\n".into(),
            auth: [
                "334 VXNlcm5hbWU6\r\n".into(),
                "334 UGFzc3dvcmQ6\r\n".into(),
                "235 2.7.0 Authentication successful\r\n".into(),
            ],
            mail_from: "250 2.1.0 OK\r\n".into(),
            rcpt: Vec::new(),
            data: "354 End data with <CR><LF>.<CR><LF>\r\n".into(),
            end_of_data: "250 2.0.0 Queued as 1234\r\n".into(),
        }
    }
}

pub struct FakeSmtpServer {
    pub port: u16,
    handle: thread::JoinHandle<Transcript>,
}

impl FakeSmtpServer {
    pub fn start(script: Script) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = thread::spawn(move || {
            let (sock, _) = listener.accept().unwrap();
            serve(sock, script)
        });
        Self { port, handle }
    }

    /// Wait for the session to end and return what was received.
    pub fn finish(self) -> Transcript {
        self.handle.join().unwrap()
    }

    pub fn settings(&self) -> MailSettings {
        MailSettings::new(
            SmtpConfig::new("127.0.0.1", self.port)
                .with_encryption(Encryption::None)
                .with_timeout(3)
                .with_helo_name("client.test"),
            FromConfig::new("sender@example.com", Some("Sender")),
        )
    }
}

fn serve(sock: TcpStream, script: Script) -> Transcript {
    sock.set_read_timeout(Some(Duration::from_secs(3))).unwrap();
    let mut writer = sock.try_clone().unwrap();
    let mut reader = BufReader::new(sock);
    let mut transcript = Transcript::default();
    let mut rcpt = script.rcpt.iter();
    // Index of the next AUTH reply while a LOGIN exchange is in progress.
    let mut auth_step = 0;

    let _ = writer.write_all(script.greeting.as_bytes());

    loop {
        let mut line = String::new();
        match reader.read_line(&mut line) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        let line = line.trim_end_matches(['\r', '\n']).to_string();
        let verb = line.split([' ', ':']).next().unwrap_or("").to_ascii_uppercase();
        transcript.commands.push(line.clone());

        let reply = if auth_step > 0 {
            let reply = script.auth[auth_step].clone();
            auth_step = next_auth_step(auth_step, &reply);
            reply
        } else {
            match verb.as_str() {
                "EHLO" => script.ehlo.clone(),
                "HELO" => script.helo.clone(),
                "AUTH" => {
                    let reply = script.auth[0].clone();
                    auth_step = next_auth_step(0, &reply);
                    reply
                }
                "MAIL" => script.mail_from.clone(),
                "RCPT" => rcpt.next().cloned().unwrap_or_else(|| "250 OK\r\n".into()),
                "DATA" => {
                    let _ = writer.write_all(script.data.as_bytes());
                    if !script.data.starts_with("354") {
                        continue;
                    }
                    transcript.data = Some(read_data(&mut reader));
                    script.end_of_data.clone()
                }
                "QUIT" => {
                    let _ = writer.write_all(b"221 Bye\r\n");
                    break;
                }
                _ => "500 Command not recognized\r\n".into(),
            }
        };
        if writer.write_all(reply.as_bytes()).is_err() {
            break;
        }
    }
    transcript
}

/// A `334` continues the LOGIN exchange, anything else ends it.
fn next_auth_step(step: usize, reply: &str) -> usize {
    if reply.starts_with("334") && step < 2 {
        step + 1
    } else {
        0
    }
}

/// Read until the end-of-data marker, which is stripped.
fn read_data(reader: &mut BufReader<TcpStream>) -> Vec<u8> {
    let mut data = Vec::new();
    loop {
        let mut chunk = Vec::new();
        match reader.read_until(b'\n', &mut chunk) {
            Ok(0) | Err(_) => break,
            Ok(_) => data.extend_from_slice(&chunk),
        }
        if data.ends_with(b"\r\n.\r\n") {
            data.truncate(data.len() - 5);
            break;
        }
    }
    data
}
