//! SMTP authentication.
//!
//! Only AUTH LOGIN is spoken: the command, then the base64 username, then
//! the base64 password, each answered by the server before the next step.

use base64::Engine;
use log::debug;

use crate::transport::TransportSession;
use crate::types::*;

/// Base64 form of one AUTH LOGIN credential line.
pub fn encode_login_token(value: &str) -> String {
    base64::engine::general_purpose::STANDARD.encode(value.as_bytes())
}

// ── AUTH LOGIN ──────────────────────────────────────────────────────

/// AUTH LOGIN: `334` after the command, `334` after the username, `235`
/// after the password. The first mismatch fails with the stage it hit.
pub fn auth_login(
    session: &mut TransportSession,
    username: &str,
    password: &str,
) -> SmtpResult<()> {
    debug!("Authenticating as {} with AUTH LOGIN", username);

    // Server sends 334 VXNlcm5hbWU6 (base64 "Username:")
    let reply = session.command("AUTH LOGIN")?;
    expect_stage(&reply, 334, AuthStage::Command)?;

    // Server sends 334 UGFzc3dvcmQ6 (base64 "Password:")
    let reply = session.command_secret(&encode_login_token(username))?;
    expect_stage(&reply, 334, AuthStage::Username)?;

    let reply = session.command_secret(&encode_login_token(password))?;
    expect_stage(&reply, 235, AuthStage::Password)?;

    debug!("Authentication successful");
    Ok(())
}

fn expect_stage(reply: &SmtpReply, code: u16, stage: AuthStage) -> SmtpResult<()> {
    if reply.is(code) {
        Ok(())
    } else {
        Err(SmtpError::AuthFailed {
            stage,
            response: reply.to_string(),
        })
    }
}
