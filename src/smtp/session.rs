//! Drives the client half of a partial SMTP dialogue.
//!
//! The session walks GREETING → HELO → MAIL FROM → RCPT TO → QUIT without
//! ever branching on response codes: it records what the server said at each
//! phase and leaves judgement to [`super::interpreter`]. The dialogue is
//! always aborted before DATA.

use std::fmt;

use log::{debug, trace};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncWrite};

use super::transport::{SmtpTransport, TransportError};

/// Sentinel code recorded when the server sent nothing parseable.
pub const NO_RESPONSE_CODE: i32 = -1;

/// The phases of the verification dialogue, in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SmtpPhase {
    Greeting,
    Helo,
    MailFrom,
    RcptTo,
    Quit,
}

impl fmt::Display for SmtpPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SmtpPhase::Greeting => "GREETING",
            SmtpPhase::Helo => "HELO",
            SmtpPhase::MailFrom => "MAIL_FROM",
            SmtpPhase::RcptTo => "RCPT_TO",
            SmtpPhase::Quit => "QUIT",
        };
        f.write_str(name)
    }
}

/// One server response, tagged with the phase that elicited it.
///
/// `code` is the 3-digit reply code in `[100, 599]`, or [`NO_RESPONSE_CODE`]
/// when the server sent nothing or something unparseable. The sentinel is
/// neither positive, transient, nor permanent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtpResponse {
    pub code: i32,
    pub message: String,
    pub phase: SmtpPhase,
}

impl SmtpResponse {
    /// First digit of the reply code (`2` for 250), or `-1` for the sentinel.
    pub fn code_class(&self) -> i32 {
        if self.code < 0 {
            NO_RESPONSE_CODE
        } else {
            self.code / 100
        }
    }

    pub fn is_positive_completion(&self) -> bool {
        (200..300).contains(&self.code)
    }

    pub fn is_transient_failure(&self) -> bool {
        (400..500).contains(&self.code)
    }

    pub fn is_permanent_failure(&self) -> bool {
        (500..600).contains(&self.code)
    }
}

/// Parses a raw (already reassembled) response into an [`SmtpResponse`].
///
/// Leading/trailing whitespace is trimmed first. If the first three bytes
/// form a decimal integer inside the valid SMTP range, that is the code and
/// the remainder (trimmed) is the message; otherwise the whole trimmed text
/// is kept as the message under the `-1` sentinel. Empty input becomes
/// `NO_RESPONSE`.
pub(crate) fn parse_response(raw: &str, phase: SmtpPhase) -> SmtpResponse {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return SmtpResponse {
            code: NO_RESPONSE_CODE,
            message: "NO_RESPONSE".to_string(),
            phase,
        };
    }

    let bytes = trimmed.as_bytes();
    if bytes.len() >= 3 && bytes[..3].iter().all(|b| b.is_ascii_digit()) {
        // Three ASCII digits always parse; out-of-range codes (e.g. "099")
        // fall back to the sentinel so `code` stays inside [100, 599].
        if let Ok(code) = trimmed[..3].parse::<i32>() {
            if (100..=599).contains(&code) {
                return SmtpResponse {
                    code,
                    message: trimmed[3..].trim().to_string(),
                    phase,
                };
            }
        }
    }

    SmtpResponse {
        code: NO_RESPONSE_CODE,
        message: trimmed.to_string(),
        phase,
    }
}

/// Executes the verification dialogue on an already-connected transport.
///
/// `verify` consumes the session so the transport is released exactly once on
/// every exit path.
pub struct SmtpSession<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    transport: SmtpTransport<R, W>,
    helo_domain: String,
    mail_from: String,
}

impl<R, W> SmtpSession<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(transport: SmtpTransport<R, W>, helo_domain: &str, mail_from: &str) -> Self {
        SmtpSession {
            transport,
            helo_domain: helo_domain.to_string(),
            mail_from: mail_from.to_string(),
        }
    }

    /// Runs the full dialogue for `recipient` and returns the phase-tagged
    /// responses, one per phase reached plus the final QUIT entry.
    ///
    /// Transitions are unconditional; a 550 at RCPT TO still proceeds to
    /// QUIT. On a transport error the session stops advancing, still
    /// attempts QUIT, closes the transport, and surfaces the error.
    pub async fn verify(mut self, recipient: &str) -> Result<Vec<SmtpResponse>, TransportError> {
        debug!(
            "Starting SMTP dialogue with {} for <{}>",
            self.transport.endpoint(),
            recipient
        );

        let mut responses = Vec::with_capacity(5);
        let outcome = self.dialogue(recipient, &mut responses).await;

        // Guaranteed-release phase: QUIT is attempted no matter how the
        // dialogue ended, then the socket is closed exactly once.
        self.quit(&mut responses).await;
        self.transport.close().await;

        match outcome {
            Ok(()) => Ok(responses),
            Err(e) => {
                debug!("SMTP dialogue aborted: {}", e);
                Err(e)
            }
        }
    }

    /// GREETING through RCPT TO. Stops at the first transport error.
    async fn dialogue(
        &mut self,
        recipient: &str,
        responses: &mut Vec<SmtpResponse>,
    ) -> Result<(), TransportError> {
        // The greeting is read, not requested.
        let raw = self.transport.read_response().await?;
        responses.push(parse_response(&raw, SmtpPhase::Greeting));

        let helo = format!("HELO {}", self.helo_domain);
        responses.push(self.exchange(&helo, SmtpPhase::Helo).await?);

        let mail_from = format!("MAIL FROM:<{}>", self.mail_from);
        responses.push(self.exchange(&mail_from, SmtpPhase::MailFrom).await?);

        let rcpt_to = format!("RCPT TO:<{recipient}>");
        responses.push(self.exchange(&rcpt_to, SmtpPhase::RcptTo).await?);

        Ok(())
    }

    async fn exchange(
        &mut self,
        command: &str,
        phase: SmtpPhase,
    ) -> Result<SmtpResponse, TransportError> {
        self.transport.send_command(command).await?;
        let raw = self.transport.read_response().await?;
        let response = parse_response(&raw, phase);
        trace!("Phase {} answered with code {}", phase, response.code);
        Ok(response)
    }

    /// Sends QUIT, recording a synthetic entry if the server is already gone.
    async fn quit(&mut self, responses: &mut Vec<SmtpResponse>) {
        match self.exchange("QUIT", SmtpPhase::Quit).await {
            Ok(response) => responses.push(response),
            Err(e) => {
                trace!("QUIT failed: {}", e);
                responses.push(SmtpResponse {
                    code: NO_RESPONSE_CODE,
                    message: "NO_RESPONSE (connection closed during QUIT)".to_string(),
                    phase: SmtpPhase::Quit,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{duplex, split, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};

    type ScriptedSession = SmtpSession<
        BufReader<tokio::io::ReadHalf<tokio::io::DuplexStream>>,
        tokio::io::WriteHalf<tokio::io::DuplexStream>,
    >;

    // Pre-loads the peer side with the whole server script; the session then
    // reads it phase by phase. The duplex buffer is larger than any script,
    // so the write completes immediately.
    async fn scripted_session(responses: &[u8]) -> (ScriptedSession, tokio::io::DuplexStream) {
        let (mut peer, ours) = duplex(4096);
        peer.write_all(responses).await.unwrap();
        let (reader, writer) = split(ours);
        let transport = SmtpTransport::from_parts(
            BufReader::new(reader),
            writer,
            "mx.example:25".to_string(),
            Duration::from_secs(5),
        );
        (
            SmtpSession::new(transport, "verifier.example", "probe@verifier.example"),
            peer,
        )
    }

    #[tokio::test]
    async fn records_one_response_per_phase_plus_quit() {
        let (session, mut peer) = scripted_session(
            b"220 mx.example ESMTP\r\n\
              250 mx.example\r\n\
              250 2.1.0 Ok\r\n\
              250 2.1.5 Ok\r\n\
              221 2.0.0 Bye\r\n",
        )
        .await;

        let responses = session.verify("alice@example.com").await.unwrap();

        let phases: Vec<SmtpPhase> = responses.iter().map(|r| r.phase).collect();
        assert_eq!(
            phases,
            vec![
                SmtpPhase::Greeting,
                SmtpPhase::Helo,
                SmtpPhase::MailFrom,
                SmtpPhase::RcptTo,
                SmtpPhase::Quit,
            ]
        );
        assert_eq!(responses[3].code, 250);
        assert_eq!(responses[3].message, "2.1.5 Ok");

        // The wire form is exact: CRLF framing, angle brackets, final QUIT.
        let mut sent = Vec::new();
        peer.read_to_end(&mut sent).await.unwrap();
        assert_eq!(
            String::from_utf8(sent).unwrap(),
            "HELO verifier.example\r\n\
             MAIL FROM:<probe@verifier.example>\r\n\
             RCPT TO:<alice@example.com>\r\n\
             QUIT\r\n"
        );
    }

    #[tokio::test]
    async fn rejection_at_rcpt_still_quits() {
        let (session, mut peer) = scripted_session(
            b"220 mx.example ESMTP\r\n\
              250 mx.example\r\n\
              250 Ok\r\n\
              550 5.1.1 no such user\r\n\
              221 Bye\r\n",
        )
        .await;

        let responses = session.verify("ghost@example.com").await.unwrap();
        assert_eq!(responses.len(), 5);
        assert_eq!(responses[3].code, 550);
        assert_eq!(responses[4].phase, SmtpPhase::Quit);
        assert_eq!(responses[4].code, 221);

        let mut sent = Vec::new();
        peer.read_to_end(&mut sent).await.unwrap();
        assert!(String::from_utf8(sent).unwrap().ends_with("QUIT\r\n"));
    }

    #[tokio::test]
    async fn hangup_mid_dialogue_surfaces_the_transport_error() {
        // Greeting only, then the peer is gone: a later send fails and the
        // error must reach the caller after the guaranteed-release QUIT.
        let (session, peer) = scripted_session(b"220 mx.example ESMTP\r\n").await;
        drop(peer);

        let result = session.verify("alice@example.com").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn unanswered_quit_records_a_sentinel_entry() {
        let (peer, ours) = duplex(4096);
        let (reader, writer) = split(ours);
        let transport = SmtpTransport::from_parts(
            BufReader::new(reader),
            writer,
            "mx.example:25".to_string(),
            Duration::from_secs(5),
        );
        let session = SmtpSession::new(transport, "verifier.example", "probe@verifier.example");

        // Peer answers through RCPT TO, then hangs up without a 221.
        let server = tokio::spawn(async move {
            let (read_half, mut write_half) = split(peer);
            let mut reader = BufReader::new(read_half);
            write_half
                .write_all(b"220 mx.example ESMTP\r\n")
                .await
                .unwrap();
            for reply in [
                b"250 mx.example\r\n".as_slice(),
                b"250 2.1.0 Ok\r\n",
                b"250 2.1.5 Ok\r\n",
            ] {
                let mut line = String::new();
                reader.read_line(&mut line).await.unwrap();
                write_half.write_all(reply).await.unwrap();
            }
        });

        let responses = session.verify("alice@example.com").await.unwrap();
        server.await.unwrap();

        assert_eq!(responses.len(), 5);
        let quit = responses.last().unwrap();
        assert_eq!(quit.phase, SmtpPhase::Quit);
        // EOF or a failed write, depending on timing; both record the
        // sentinel code.
        assert_eq!(quit.code, NO_RESPONSE_CODE);
    }

    #[test]
    fn parse_response_extracts_code_and_message() {
        let r = parse_response("  250 2.1.5 Ok\r\n", SmtpPhase::RcptTo);
        assert_eq!(r.code, 250);
        assert_eq!(r.message, "2.1.5 Ok");
        assert_eq!(r.code_class(), 2);
    }

    #[test]
    fn parse_response_handles_garbage_and_empties() {
        let garbage = parse_response("hello world", SmtpPhase::Greeting);
        assert_eq!(garbage.code, NO_RESPONSE_CODE);
        assert_eq!(garbage.message, "hello world");

        let empty = parse_response("", SmtpPhase::Helo);
        assert_eq!(empty.code, NO_RESPONSE_CODE);
        assert_eq!(empty.message, "NO_RESPONSE");

        // Parses as an integer but is outside the SMTP code range.
        let out_of_range = parse_response("099 nope", SmtpPhase::Greeting);
        assert_eq!(out_of_range.code, NO_RESPONSE_CODE);
    }

    #[test]
    fn code_class_of_sentinel_is_sentinel() {
        let r = SmtpResponse {
            code: NO_RESPONSE_CODE,
            message: "NO_RESPONSE".to_string(),
            phase: SmtpPhase::RcptTo,
        };
        assert_eq!(r.code_class(), NO_RESPONSE_CODE);
        assert!(!r.is_positive_completion());
        assert!(!r.is_transient_failure());
        assert!(!r.is_permanent_failure());
    }
}
