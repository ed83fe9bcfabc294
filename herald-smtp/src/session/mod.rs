//! A single authenticated SMTP submission.
//!
//! The session walks a fixed sequence of steps: greeting, `EHLO`,
//! `AUTH LOGIN` with username and password, `MAIL FROM`, `RCPT TO`, `DATA`
//! and the message itself. Every step reads exactly one reply and compares its
//! code against the one the step requires. On the first mismatch the session
//! stops without sending anything further, and the caller is left to retry
//! later.

mod state;

use std::time::Duration;

use base64::{Engine, engine::general_purpose::STANDARD};
use herald_common::{ClientTimeouts, incoming, internal, outgoing};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use state::State;

use super::{
    error::{ClientError, Result},
    response::Response,
};

/// Initial size of the reply buffer.
const BUFFER_SIZE: usize = 8192;

/// Replies larger than this are treated as a protocol violation.
const MAX_BUFFER_SIZE: usize = 1024 * 1024;

/// Username and password for `AUTH LOGIN`.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// The names exchanged outside the message itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Name announced in `EHLO`.
    pub helo_name: String,
    /// Bare address for `MAIL FROM`.
    pub sender: String,
    /// Bare address for `RCPT TO`.
    pub recipient: String,
}

/// Drives one submission over `S`, normally a TLS stream from
/// [`connect_tls`](crate::connect_tls).
pub struct Session<S> {
    stream: S,
    buffer: Vec<u8>,
    buffer_pos: usize,
    state: State,
    timeouts: ClientTimeouts,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, timeouts: ClientTimeouts) -> Self {
        Self {
            stream,
            buffer: vec![0u8; BUFFER_SIZE],
            buffer_pos: 0,
            state: State::Connected,
            timeouts,
        }
    }

    /// Submits `message` and closes the stream.
    ///
    /// The stream is shut down whether or not the submission succeeded. Once
    /// the message is accepted a `QUIT` is attempted, but its outcome is
    /// ignored.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::UnexpectedReply` naming the step that failed, or
    /// the I/O, parse or timeout error that interrupted it.
    pub async fn submit(
        mut self,
        credentials: &Credentials,
        envelope: &Envelope,
        message: &str,
    ) -> Result<()> {
        let result = self.converse(credentials, envelope, message).await;

        if let Err(err) = &result {
            internal!(
                level = WARN,
                "Session failed in state {}: {err}",
                self.state
            );
        } else {
            self.quit().await;
        }

        self.close().await;
        result
    }

    async fn converse(
        &mut self,
        credentials: &Credentials,
        envelope: &Envelope,
        message: &str,
    ) -> Result<()> {
        let command = self.timeouts.command();

        self.advance(State::Greeted, None, command).await?;

        self.advance(
            State::Helod,
            Some(Line::plain(format!("EHLO {}", envelope.helo_name))),
            command,
        )
        .await?;

        self.advance(
            State::AuthUsernameSent,
            Some(Line::plain("AUTH LOGIN".to_string())),
            command,
        )
        .await?;

        self.advance(
            State::AuthPasswordSent,
            Some(Line::secret(STANDARD.encode(credentials.username.as_bytes()))),
            command,
        )
        .await?;

        self.advance(
            State::Authenticated,
            Some(Line::secret(STANDARD.encode(credentials.password.as_bytes()))),
            command,
        )
        .await?;

        self.advance(
            State::SenderSet,
            Some(Line::plain(format!("MAIL FROM:<{}>", envelope.sender))),
            command,
        )
        .await?;

        self.advance(
            State::RecipientSet,
            Some(Line::plain(format!("RCPT TO:<{}>", envelope.recipient))),
            command,
        )
        .await?;

        self.advance(State::DataMode, Some(Line::plain("DATA".to_string())), command)
            .await?;

        self.advance(
            State::MessageSent,
            Some(Line::data(encode_data(message))),
            self.timeouts.data(),
        )
        .await?;

        Ok(())
    }

    /// Sends `line` (if any), reads one reply and moves to `next` when the
    /// reply carries the code `next` requires.
    async fn advance(&mut self, next: State, line: Option<Line>, limit: Duration) -> Result<()> {
        let step = next.step();

        let exchange = async {
            if let Some(line) = &line {
                line.log();
                self.stream.write_all(line.wire.as_bytes()).await?;
                self.stream.flush().await?;
            }
            self.read_response().await
        };

        let response = tokio::time::timeout(limit, exchange)
            .await
            .map_err(|_| ClientError::Timeout { step })??;

        let expected = next.expected_code().unwrap_or_default();
        if response.code != expected {
            return Err(ClientError::UnexpectedReply {
                step,
                expected,
                code: response.code,
                reply: response.to_string(),
            });
        }

        self.state = next;
        Ok(())
    }

    async fn quit(&mut self) {
        let limit = self.timeouts.quit();
        let exchange = async {
            outgoing!("QUIT");
            self.stream.write_all(b"QUIT\r\n").await?;
            self.stream.flush().await?;
            self.read_response().await
        };

        match tokio::time::timeout(limit, exchange).await {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => {
                internal!(level = DEBUG, "QUIT failed after successful delivery: {err}");
            }
            Err(_) => {
                internal!(level = DEBUG, "QUIT timed out after successful delivery");
            }
        }
    }

    async fn close(&mut self) {
        if let Err(err) = self.stream.shutdown().await {
            internal!(level = DEBUG, "Error shutting down stream: {err}");
        }
        self.state = State::Closed;
    }

    /// Reads until a complete reply is buffered, keeping any bytes that
    /// arrived after it for the next read.
    async fn read_response(&mut self) -> Result<Response> {
        loop {
            if let Some((response, consumed)) =
                Response::parse_response(&self.buffer[..self.buffer_pos])?
            {
                self.buffer.copy_within(consumed..self.buffer_pos, 0);
                self.buffer_pos -= consumed;

                incoming!("{response}");
                return Ok(response);
            }

            if self.buffer_pos >= self.buffer.len() {
                let new_size = self.buffer.len() * 2;
                if new_size > MAX_BUFFER_SIZE {
                    return Err(ClientError::Parse(format!(
                        "Reply too large (exceeds {MAX_BUFFER_SIZE} bytes)"
                    )));
                }
                self.buffer.resize(new_size, 0);
            }

            let n = self.stream.read(&mut self.buffer[self.buffer_pos..]).await?;
            if n == 0 {
                return Err(ClientError::ConnectionClosed);
            }
            self.buffer_pos += n;
        }
    }
}

/// A line to put on the wire, with how it should appear in logs.
struct Line {
    wire: String,
    kind: LineKind,
}

enum LineKind {
    Plain,
    Secret,
    Data,
}

impl Line {
    fn plain(command: String) -> Self {
        Self {
            wire: format!("{command}\r\n"),
            kind: LineKind::Plain,
        }
    }

    fn secret(value: String) -> Self {
        Self {
            wire: format!("{value}\r\n"),
            kind: LineKind::Secret,
        }
    }

    fn data(payload: String) -> Self {
        Self {
            wire: payload,
            kind: LineKind::Data,
        }
    }

    fn log(&self) {
        match self.kind {
            LineKind::Plain => outgoing!("{}", self.wire.trim_end()),
            LineKind::Secret => outgoing!("<redacted>"),
            LineKind::Data => outgoing!("<message data, {} bytes>", self.wire.len()),
        }
    }
}

/// Prepares message text for the `DATA` phase.
///
/// Line endings are normalized to CRLF, lines starting with `.` get an extra
/// `.` and the end-of-data marker is appended.
fn encode_data(message: &str) -> String {
    let mut data = String::with_capacity(message.len() + 16);

    let message = message.strip_suffix('\n').map_or(message, |m| {
        m.strip_suffix('\r').unwrap_or(m)
    });

    for line in message.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.starts_with('.') {
            data.push('.');
        }
        data.push_str(line);
        data.push_str("\r\n");
    }

    data.push_str(".\r\n");
    data
}
