//! Line-oriented SMTP client transport over a single TCP connection.
//!
//! This module owns the raw socket: connecting with a bounded timeout,
//! writing CRLF-terminated command lines, and reading server responses with
//! multi-line reassembly. It knows nothing about the SMTP dialogue itself;
//! that lives in [`super::session`].

use std::time::Duration;

use log::{debug, trace};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Errors raised by the transport layer.
///
/// Connect and I/O variants carry the `host:port` endpoint so callers can log
/// which mail exchanger misbehaved without threading it separately.
#[derive(Debug, Error)]
pub enum TransportError {
    /// TCP connect failed outright (refused, unreachable, DNS of the host).
    #[error("connection to {endpoint} failed: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },
    /// TCP connect did not complete within the configured timeout.
    #[error("connection to {endpoint} timed out after {timeout_ms}ms")]
    ConnectTimeout { endpoint: String, timeout_ms: u128 },
    /// The server did not produce a full response within the read timeout.
    #[error("read from {endpoint} timed out after {timeout_ms}ms")]
    ReadTimeout { endpoint: String, timeout_ms: u128 },
    /// Socket-level failure while sending or receiving.
    #[error("i/o error on {endpoint}: {source}")]
    Io {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },
    /// Operation attempted after `close()` (or before a successful connect).
    #[error("transport is not connected")]
    NotConnected,
}

/// The transport type produced by [`SmtpTransport::connect`].
pub type TcpSmtpTransport = SmtpTransport<BufReader<OwnedReadHalf>, OwnedWriteHalf>;

/// A scoped handle to one SMTP connection.
///
/// Generic over the reader (`R`) and writer (`W`) so unit tests can drive it
/// with in-memory duplex streams instead of a live socket.
pub struct SmtpTransport<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    endpoint: String,
    read_timeout: Duration,
    // `None` once closed; every operation checks this first.
    io: Option<(R, W)>,
}

impl TcpSmtpTransport {
    /// Opens a TCP connection to `host:port` under `connect_timeout`.
    ///
    /// The returned transport applies `read_timeout` to every subsequent
    /// `read_response` call.
    pub async fn connect(
        host: &str,
        port: u16,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let endpoint = format!("{host}:{port}");
        debug!("Connecting to SMTP endpoint {}", endpoint);

        let stream = match timeout(connect_timeout, TcpStream::connect(&endpoint)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                return Err(TransportError::Connect { endpoint, source });
            }
            Err(_) => {
                return Err(TransportError::ConnectTimeout {
                    endpoint,
                    timeout_ms: connect_timeout.as_millis(),
                });
            }
        };

        let (read_half, write_half) = stream.into_split();
        Ok(SmtpTransport::from_parts(
            BufReader::new(read_half),
            write_half,
            endpoint,
            read_timeout,
        ))
    }
}

impl<R, W> SmtpTransport<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Wraps an already-connected reader/writer pair.
    pub fn from_parts(reader: R, writer: W, endpoint: String, read_timeout: Duration) -> Self {
        SmtpTransport {
            endpoint,
            read_timeout,
            io: Some((reader, writer)),
        }
    }

    /// The `host:port` this transport is bound to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Whether the transport still holds an open connection.
    pub fn is_connected(&self) -> bool {
        self.io.is_some()
    }

    /// Sends one command line, appending CRLF and flushing.
    ///
    /// The CRLF is always explicit; platform line conventions never leak onto
    /// the wire.
    pub async fn send_command(&mut self, line: &str) -> Result<(), TransportError> {
        let (_, writer) = self.io.as_mut().ok_or(TransportError::NotConnected)?;
        trace!("SMTP >> {}", line);

        let framed = format!("{line}\r\n");
        writer
            .write_all(framed.as_bytes())
            .await
            .map_err(|source| TransportError::Io {
                endpoint: self.endpoint.clone(),
                source,
            })?;
        writer.flush().await.map_err(|source| TransportError::Io {
            endpoint: self.endpoint.clone(),
            source,
        })
    }

    /// Reads one complete server response, reassembling multi-line replies.
    ///
    /// Lines whose 4th character is `-` (`"250-..."`) are continuations; the
    /// response ends at a line with a space in column 4 (`"250 ..."`) or a
    /// line shorter than 4 characters. Continuation lines are joined with
    /// `\n`. A clean EOF before any data yields an empty string; the session
    /// layer maps that to its no-response sentinel.
    pub async fn read_response(&mut self) -> Result<String, TransportError> {
        let (reader, _) = self.io.as_mut().ok_or(TransportError::NotConnected)?;
        let mut parts: Vec<String> = Vec::new();

        loop {
            let mut buffer = String::new();
            let bytes_read = match timeout(self.read_timeout, reader.read_line(&mut buffer)).await {
                Ok(Ok(n)) => n,
                Ok(Err(source)) => {
                    return Err(TransportError::Io {
                        endpoint: self.endpoint.clone(),
                        source,
                    });
                }
                Err(_) => {
                    return Err(TransportError::ReadTimeout {
                        endpoint: self.endpoint.clone(),
                        timeout_ms: self.read_timeout.as_millis(),
                    });
                }
            };

            if bytes_read == 0 {
                // Peer closed the connection mid-response (or before one).
                break;
            }

            let line = buffer.trim_end_matches(['\r', '\n']).to_string();
            trace!("SMTP << {}", line);

            // A continuation has `-` in column 4; anything else ends the reply.
            let is_continuation = line.as_bytes().len() >= 4 && line.as_bytes()[3] == b'-';
            parts.push(line);
            if !is_continuation {
                break;
            }
        }

        Ok(parts.join("\n"))
    }

    /// Closes the connection, flushing buffered output first.
    ///
    /// Never fails: shutdown errors are logged and swallowed. The transport
    /// is unusable afterwards; further operations return
    /// [`TransportError::NotConnected`]. Calling `close` twice is a no-op.
    pub async fn close(&mut self) {
        if let Some((_, mut writer)) = self.io.take() {
            if let Err(e) = writer.shutdown().await {
                debug!("Error shutting down connection to {}: {}", self.endpoint, e);
            }
            debug!("Closed SMTP connection to {}", self.endpoint);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, split, AsyncReadExt, AsyncWriteExt};

    type TestTransport = SmtpTransport<
        BufReader<tokio::io::ReadHalf<tokio::io::DuplexStream>>,
        tokio::io::WriteHalf<tokio::io::DuplexStream>,
    >;

    fn test_transport(peer_buffer: usize) -> (TestTransport, tokio::io::DuplexStream) {
        let (peer, ours) = duplex(peer_buffer);
        let (reader, writer) = split(ours);
        let transport = SmtpTransport::from_parts(
            BufReader::new(reader),
            writer,
            "test.example:25".to_string(),
            Duration::from_secs(5),
        );
        (transport, peer)
    }

    #[tokio::test]
    async fn read_single_line_response() {
        let (mut transport, mut peer) = test_transport(1024);
        peer.write_all(b"220 mail.example ESMTP ready\r\n")
            .await
            .unwrap();

        let response = transport.read_response().await.unwrap();
        assert_eq!(response, "220 mail.example ESMTP ready");
    }

    #[tokio::test]
    async fn reassembles_multi_line_response() {
        let (mut transport, mut peer) = test_transport(1024);
        peer.write_all(b"250-mail.example greets you\r\n250-SIZE 35882577\r\n250 HELP\r\n")
            .await
            .unwrap();

        let response = transport.read_response().await.unwrap();
        assert_eq!(
            response,
            "250-mail.example greets you\n250-SIZE 35882577\n250 HELP"
        );
    }

    #[tokio::test]
    async fn short_line_terminates_reassembly() {
        let (mut transport, mut peer) = test_transport(1024);
        peer.write_all(b"250-part one\r\nok\r\n").await.unwrap();

        let response = transport.read_response().await.unwrap();
        assert_eq!(response, "250-part one\nok");
    }

    #[tokio::test]
    async fn eof_before_data_yields_empty_response() {
        let (mut transport, peer) = test_transport(1024);
        drop(peer); // peer hangs up immediately

        let response = transport.read_response().await.unwrap();
        assert_eq!(response, "");
    }

    #[tokio::test]
    async fn send_command_appends_crlf() {
        let (mut transport, mut peer) = test_transport(1024);
        transport.send_command("HELO verifier.example").await.unwrap();
        transport.close().await;

        let mut sent = Vec::new();
        peer.read_to_end(&mut sent).await.unwrap();
        assert_eq!(sent, b"HELO verifier.example\r\n");
    }

    #[tokio::test]
    async fn operations_after_close_fail_with_not_connected() {
        let (mut transport, _peer) = test_transport(1024);
        transport.close().await;
        transport.close().await; // second close is a no-op

        assert!(!transport.is_connected());
        assert!(matches!(
            transport.send_command("QUIT").await,
            Err(TransportError::NotConnected)
        ));
        assert!(matches!(
            transport.read_response().await,
            Err(TransportError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn read_timeout_is_reported() {
        let (peer, ours) = duplex(64);
        let (reader, writer) = split(ours);
        let mut transport = SmtpTransport::from_parts(
            BufReader::new(reader),
            writer,
            "slow.example:25".to_string(),
            Duration::from_millis(20),
        );

        // Peer stays silent; keep it alive so no EOF arrives.
        let result = transport.read_response().await;
        assert!(matches!(result, Err(TransportError::ReadTimeout { .. })));
        drop(peer);
    }
}
