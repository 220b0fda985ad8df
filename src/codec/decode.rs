//! Command Decoder
//!
//! Incremental two-state parser: accumulate a CR-LF terminated control line,
//! then for PUB accumulate exactly the declared payload plus its CR-LF.

use bytes::{Buf, BytesMut};
use smallvec::SmallVec;

use super::find_crlf;
use crate::protocol::{Op, ProtocolError, CR_LF, MAX_CONTROL_LINE_SIZE, MAX_PAYLOAD_SIZE};

/// Parser state
#[derive(Debug, Clone, PartialEq, Eq)]
enum State {
    /// Waiting for a complete control line
    AwaitingControlLine,
    /// PUB control line seen, waiting for `size` payload bytes and CR-LF
    AwaitingPayload {
        subject: String,
        reply_to: Option<String>,
        size: usize,
    },
}

/// Command Decoder
#[derive(Debug)]
pub struct Decoder {
    max_control_line: usize,
    max_payload: usize,
    state: State,
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            max_control_line: MAX_CONTROL_LINE_SIZE,
            max_payload: MAX_PAYLOAD_SIZE,
            state: State::AwaitingControlLine,
        }
    }

    pub fn with_max_control_line(mut self, size: usize) -> Self {
        self.max_control_line = size;
        self
    }

    pub fn with_max_payload(mut self, size: usize) -> Self {
        self.max_payload = size;
        self
    }

    /// True while a PUB payload is outstanding
    pub fn awaiting_payload(&self) -> bool {
        matches!(self.state, State::AwaitingPayload { .. })
    }

    /// Decode the next command, consuming its bytes from `buf`
    ///
    /// Returns `Ok(None)` when more data is needed. On a non-fatal error the
    /// offending line has been consumed and decoding can continue.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Op>, ProtocolError> {
        if let State::AwaitingPayload { size, .. } = self.state {
            if buf.len() < size + CR_LF.len() {
                return Ok(None);
            }
            let payload = buf.split_to(size).freeze();
            buf.advance(CR_LF.len());

            return match std::mem::replace(&mut self.state, State::AwaitingControlLine) {
                State::AwaitingPayload {
                    subject, reply_to, ..
                } => Ok(Some(Op::Pub {
                    subject,
                    reply_to,
                    payload,
                })),
                State::AwaitingControlLine => Ok(None),
            };
        }

        // Only search as far as a maximal line could reach
        let limit = buf.len().min(self.max_control_line + CR_LF.len());
        let pos = match find_crlf(&buf[..limit]) {
            Some(pos) => pos,
            None if buf.len() >= self.max_control_line + CR_LF.len() => {
                return Err(ProtocolError::ControlLineTooLong {
                    max: self.max_control_line,
                });
            }
            None => return Ok(None),
        };

        let line = buf.split_to(pos + CR_LF.len());
        let line = std::str::from_utf8(&line[..pos]).map_err(|_| ProtocolError::UnknownOperation)?;

        match self.parse_control_line(line)? {
            Some(op) => Ok(Some(op)),
            // PUB header accepted; the payload may already be buffered
            None => self.decode(buf),
        }
    }

    /// Parse one control line. Returns `Ok(None)` after a PUB header.
    fn parse_control_line(&mut self, line: &str) -> Result<Option<Op>, ProtocolError> {
        let (keyword, rest) = match line.find(|c: char| c.is_ascii_whitespace()) {
            Some(idx) => (&line[..idx], &line[idx..]),
            None => (line, ""),
        };
        let args: SmallVec<[&str; 4]> = rest.split_ascii_whitespace().collect();

        let is = |name: &str| keyword.eq_ignore_ascii_case(name);

        if is("PUB") {
            let (subject, reply_to, size) = match args.as_slice() {
                [subject, size] => (*subject, None, *size),
                [subject, reply_to, size] => (*subject, Some(*reply_to), *size),
                _ => return Err(ProtocolError::UnknownOperation),
            };
            if size.is_empty() || !size.bytes().all(|b| b.is_ascii_digit()) {
                return Err(ProtocolError::UnknownOperation);
            }
            // Too many digits for usize is certainly too big
            let size = size.parse::<usize>().unwrap_or(usize::MAX);
            if size > self.max_payload {
                return Err(ProtocolError::PayloadTooBig {
                    max: self.max_payload,
                });
            }
            self.state = State::AwaitingPayload {
                subject: subject.to_string(),
                reply_to: reply_to.map(str::to_string),
                size,
            };
            return Ok(None);
        }

        let op = match args.as_slice() {
            [subject, sid] if is("SUB") => Op::Sub {
                subject: subject.to_string(),
                sid: sid.to_string(),
            },
            [sid] if is("UNSUB") => Op::Unsub {
                sid: sid.to_string(),
            },
            [] if is("PING") => Op::Ping,
            [] if is("PONG") => Op::Pong,
            [] if is("INFO") => Op::Info,
            [_, ..] if is("CONNECT") => Op::Connect {
                options: rest.trim_start().to_string(),
            },
            _ => return Err(ProtocolError::UnknownOperation),
        };
        Ok(Some(op))
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}
