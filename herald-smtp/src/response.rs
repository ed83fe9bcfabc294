//! SMTP reply parsing.

use std::fmt;

use super::error::{ClientError, Result};

/// A single line of a reply, e.g. `250-SIZE 10240000`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseLine {
    pub code: u16,
    /// `false` for a `NNN-` continuation line.
    pub is_last: bool,
    pub message: String,
}

/// A complete reply, possibly spanning several lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub code: u16,
    pub lines: Vec<String>,
}

impl Response {
    #[must_use]
    pub const fn new(code: u16, lines: Vec<String>) -> Self {
        Self { code, lines }
    }

    /// Parses a single reply line without its line terminator.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Parse` if the line does not start with a three
    /// digit code followed by a space, a dash or nothing at all.
    pub fn parse_line(line: &str) -> Result<ResponseLine> {
        let bytes = line.as_bytes();

        if bytes.len() < 3 || !bytes[..3].iter().all(u8::is_ascii_digit) {
            return Err(ClientError::Parse(format!("Invalid reply line: '{line}'")));
        }

        let code = bytes[..3]
            .iter()
            .fold(0u16, |acc, digit| acc * 10 + u16::from(digit - b'0'));

        let is_last = match bytes.get(3) {
            None | Some(b' ') => true,
            Some(b'-') => false,
            Some(other) => {
                return Err(ClientError::Parse(format!(
                    "Invalid separator character: '{}'",
                    char::from(*other)
                )));
            }
        };

        Ok(ResponseLine {
            code,
            is_last,
            message: line.get(4..).unwrap_or_default().to_string(),
        })
    }

    /// Parses one complete reply from the front of `buffer`.
    ///
    /// Returns the reply and the number of bytes it occupied, or `None` when
    /// the buffer does not yet hold a complete reply. Any bytes after the
    /// reply are left for the next call.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Parse` if a line is malformed or a multi-line
    /// reply changes code part way through.
    pub fn parse_response(buffer: &[u8]) -> Result<Option<(Self, usize)>> {
        let mut consumed = 0;
        let mut code = None;
        let mut lines = Vec::new();

        while let Some(end) = buffer[consumed..].iter().position(|&b| b == b'\n') {
            let raw = &buffer[consumed..consumed + end];
            consumed += end + 1;

            let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
            if raw.is_empty() {
                continue;
            }

            let text = std::str::from_utf8(raw).map_err(|err| ClientError::Parse(err.to_string()))?;
            let line = Self::parse_line(text)?;

            match code {
                None => code = Some(line.code),
                Some(expected) if expected != line.code => {
                    return Err(ClientError::Parse(format!(
                        "Status code mismatch in multi-line reply: expected {expected}, got {}",
                        line.code
                    )));
                }
                Some(_) => {}
            }

            lines.push(line.message);

            if line.is_last {
                return Ok(Some((Self::new(line.code, lines), consumed)));
            }
        }

        Ok(None)
    }
}

impl fmt::Display for Response {
    /// Renders the reply the way it appeared on the wire, minus terminators.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let last = self.lines.len().saturating_sub(1);
        for (index, line) in self.lines.iter().enumerate() {
            if index > 0 {
                writeln!(f)?;
            }
            let separator = if index == last { ' ' } else { '-' };
            write!(f, "{}{separator}{line}", self.code)?;
        }
        Ok(())
    }
}
