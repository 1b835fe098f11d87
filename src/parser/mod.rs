//! Incremental parser for the server side of the protocol.
//!
//! [`Parser::feed`] accepts chunks of any size and keeps its position between
//! calls, so a frame may be split across many reads and one read may carry
//! many frames. Completed frames are appended, in wire order, to the queue
//! supplied by the caller.
//!
//! The parser alternates between two states:
//!
//! - awaiting a control line, accumulating bytes until `LF` and matching the
//!   verb as soon as enough bytes are present to rule every verb out;
//! - awaiting a payload, consuming exactly the declared byte count plus the
//!   trailing CRLF for a pending `MSG`/`HMSG`. Declared counts above the
//!   payload limit are rejected before any of it is buffered.
//!
//! Payload bytes are never interpreted; only the control line is treated as
//! text.

mod error;

use std::str;

use bytes::BytesMut;
pub use error::ParseError;

use crate::{
    headers::HeaderMap,
    proto::{MsgFrame, ServerInfo, ServerOp, Sid},
};

/// Default upper bound on the length of a single control line.
pub const DEFAULT_MAX_CONTROL_LINE: usize = 16 * 1024;

/// Default upper bound on a declared `MSG`/`HMSG` byte count, used until the
/// server advertises its own limit.
pub const DEFAULT_MAX_PAYLOAD: usize = 64 * 1024 * 1024;

const VERBS: [&[u8]; 7] = [b"MSG", b"HMSG", b"INFO", b"+OK", b"-ERR", b"PING", b"PONG"];

#[derive(Debug)]
struct PendingPayload {
    subject: String,
    sid: Sid,
    reply: Option<String>,
    header_len: Option<usize>,
    total_len: usize,
    wanted: usize,
}

#[derive(Debug)]
enum State {
    AwaitingControl,
    AwaitingPayload(PendingPayload),
}

/// Restartable protocol parser.
///
/// # Examples
///
/// ```
/// use natwire::{parser::Parser, proto::ServerOp};
///
/// let mut parser = Parser::new();
/// let mut ops = Vec::new();
/// parser.feed(b"MSG foo 1 3\r\nb", &mut ops).unwrap();
/// assert!(ops.is_empty());
/// parser.feed(b"ar\r\nPING\r\n", &mut ops).unwrap();
/// assert!(matches!(&ops[0], ServerOp::Msg(frame) if frame.payload.as_ref() == b"bar"));
/// assert_eq!(ops[1], ServerOp::Ping);
/// ```
#[derive(Debug)]
pub struct Parser {
    state: State,
    control: BytesMut,
    payload: BytesMut,
    max_control_line: usize,
    max_payload: usize,
}

impl Default for Parser {
    fn default() -> Self { Self::new() }
}

impl Parser {
    /// Create a parser using [`DEFAULT_MAX_CONTROL_LINE`].
    #[must_use]
    pub fn new() -> Self { Self::with_max_control_line(DEFAULT_MAX_CONTROL_LINE) }

    /// Create a parser that rejects control lines longer than `max` bytes.
    #[must_use]
    pub fn with_max_control_line(max: usize) -> Self {
        Self {
            state: State::AwaitingControl,
            control: BytesMut::with_capacity(512),
            payload: BytesMut::new(),
            max_control_line: max.max(64),
            max_payload: DEFAULT_MAX_PAYLOAD,
        }
    }

    /// Reject `MSG`/`HMSG` frames declaring more than `max` payload bytes.
    pub fn set_max_payload(&mut self, max: usize) { self.max_payload = max; }

    /// Whether the parser sits on a frame boundary with nothing buffered.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        matches!(self.state, State::AwaitingControl) && self.control.is_empty()
    }

    /// Consume `chunk`, appending every completed frame to `out`.
    ///
    /// # Errors
    ///
    /// Returns a [`ParseError`] when the stream violates the protocol. The
    /// parser must not be fed again afterwards.
    pub fn feed(&mut self, mut chunk: &[u8], out: &mut Vec<ServerOp>) -> Result<(), ParseError> {
        while !chunk.is_empty() {
            chunk = match self.state {
                State::AwaitingControl => self.consume_control(chunk, out)?,
                State::AwaitingPayload(_) => self.consume_payload(chunk, out)?,
            };
        }
        Ok(())
    }

    fn consume_control<'a>(
        &mut self,
        chunk: &'a [u8],
        out: &mut Vec<ServerOp>,
    ) -> Result<&'a [u8], ParseError> {
        let Some(end) = chunk.iter().position(|&b| b == b'\n') else {
            self.control.extend_from_slice(chunk);
            self.check_partial_control()?;
            return Ok(&[]);
        };
        if self.control.len() + end > self.max_control_line {
            return Err(ParseError::ControlLineTooLong {
                max: self.max_control_line,
            });
        }
        self.control.extend_from_slice(&chunk[..end]);
        let mut line = self.control.split();
        if line.last() == Some(&b'\r') {
            line.truncate(line.len() - 1);
        }
        if !line.is_empty() {
            self.process_line(&line, out)?;
        }
        Ok(&chunk[end + 1..])
    }

    /// Reject a partial control line as soon as no verb can match it.
    fn check_partial_control(&self) -> Result<(), ParseError> {
        if self.control.len() > self.max_control_line {
            return Err(ParseError::ControlLineTooLong {
                max: self.max_control_line,
            });
        }
        let head = match self.control.iter().position(|b| *b == b' ' || *b == b'\t') {
            Some(split) => {
                let verb = &self.control[..split];
                if VERBS.iter().any(|known| verb.eq_ignore_ascii_case(known)) {
                    return Ok(());
                }
                verb
            }
            None => {
                let prefix = self.control.strip_suffix(b"\r").unwrap_or(&self.control[..]);
                let possible = VERBS.iter().any(|known| {
                    prefix.len() <= known.len() && known[..prefix.len()].eq_ignore_ascii_case(prefix)
                });
                if possible {
                    return Ok(());
                }
                prefix
            }
        };
        Err(ParseError::UnknownOperation(lossy_excerpt(head)))
    }

    fn process_line(&mut self, line: &[u8], out: &mut Vec<ServerOp>) -> Result<(), ParseError> {
        let split = line
            .iter()
            .position(|b| *b == b' ' || *b == b'\t')
            .unwrap_or(line.len());
        let (verb, rest) = line.split_at(split);
        let rest = rest.trim_ascii_start();
        if verb.eq_ignore_ascii_case(b"MSG") {
            self.begin_msg(rest)
        } else if verb.eq_ignore_ascii_case(b"HMSG") {
            self.begin_hmsg(rest)
        } else if verb.eq_ignore_ascii_case(b"PING") {
            out.push(ServerOp::Ping);
            Ok(())
        } else if verb.eq_ignore_ascii_case(b"PONG") {
            out.push(ServerOp::Pong);
            Ok(())
        } else if verb.eq_ignore_ascii_case(b"+OK") {
            out.push(ServerOp::Ok);
            Ok(())
        } else if verb.eq_ignore_ascii_case(b"-ERR") {
            out.push(ServerOp::Err(parse_err_text(rest)));
            Ok(())
        } else if verb.eq_ignore_ascii_case(b"INFO") {
            let info: ServerInfo = serde_json::from_slice(rest)
                .map_err(|err| ParseError::InvalidInfo(err.to_string()))?;
            out.push(ServerOp::Info(Box::new(info)));
            Ok(())
        } else {
            Err(ParseError::UnknownOperation(lossy_excerpt(line)))
        }
    }

    fn begin_msg(&mut self, args: &[u8]) -> Result<(), ParseError> {
        let text = str::from_utf8(args).map_err(|_| ParseError::InvalidUtf8)?;
        let fields: Vec<&str> = text.split_ascii_whitespace().collect();
        let (subject, sid, reply, size) = match fields.as_slice() {
            [subject, sid, size] => (*subject, *sid, None, *size),
            [subject, sid, reply, size] => (*subject, *sid, Some(*reply), *size),
            _ => {
                return Err(ParseError::InvalidArguments {
                    verb: "MSG",
                    line: text.to_owned(),
                });
            }
        };
        let pending = PendingPayload {
            subject: subject.to_owned(),
            sid: parse_sid(sid)?,
            reply: reply.map(str::to_owned),
            header_len: None,
            total_len: parse_size(size)?,
            wanted: 0,
        };
        self.await_payload(pending)
    }

    fn begin_hmsg(&mut self, args: &[u8]) -> Result<(), ParseError> {
        let text = str::from_utf8(args).map_err(|_| ParseError::InvalidUtf8)?;
        let fields: Vec<&str> = text.split_ascii_whitespace().collect();
        let (subject, sid, reply, header, total) = match fields.as_slice() {
            [subject, sid, header, total] => (*subject, *sid, None, *header, *total),
            [subject, sid, reply, header, total] => {
                (*subject, *sid, Some(*reply), *header, *total)
            }
            _ => {
                return Err(ParseError::InvalidArguments {
                    verb: "HMSG",
                    line: text.to_owned(),
                });
            }
        };
        let header = parse_size(header)?;
        let total = parse_size(total)?;
        if header > total {
            return Err(ParseError::HeaderLengthExceedsTotal { header, total });
        }
        let pending = PendingPayload {
            subject: subject.to_owned(),
            sid: parse_sid(sid)?,
            reply: reply.map(str::to_owned),
            header_len: Some(header),
            total_len: total,
            wanted: 0,
        };
        self.await_payload(pending)
    }

    /// Bound the declared size before anything is buffered for it.
    fn await_payload(&mut self, mut pending: PendingPayload) -> Result<(), ParseError> {
        let too_large = ParseError::PayloadTooLarge {
            size: pending.total_len,
            max: self.max_payload,
        };
        if pending.total_len > self.max_payload {
            return Err(too_large);
        }
        pending.wanted = pending.total_len.checked_add(2).ok_or(too_large)?;
        self.state = State::AwaitingPayload(pending);
        Ok(())
    }

    fn consume_payload<'a>(
        &mut self,
        chunk: &'a [u8],
        out: &mut Vec<ServerOp>,
    ) -> Result<&'a [u8], ParseError> {
        let State::AwaitingPayload(pending) = &self.state else {
            return Ok(chunk);
        };
        let wanted = pending.wanted;
        let take = (wanted - self.payload.len()).min(chunk.len());
        self.payload.reserve(take);
        self.payload.extend_from_slice(&chunk[..take]);
        if self.payload.len() == wanted {
            self.finish_payload(out)?;
        }
        Ok(&chunk[take..])
    }

    fn finish_payload(&mut self, out: &mut Vec<ServerOp>) -> Result<(), ParseError> {
        let State::AwaitingPayload(pending) =
            std::mem::replace(&mut self.state, State::AwaitingControl)
        else {
            return Ok(());
        };
        let mut data = self.payload.split();
        if !data.ends_with(b"\r\n") {
            return Err(ParseError::MissingPayloadTerminator);
        }
        data.truncate(pending.total_len);
        let mut payload = data.freeze();
        let headers = match pending.header_len {
            Some(len) => Some(HeaderMap::decode(&payload.split_to(len))?),
            None => None,
        };
        out.push(ServerOp::Msg(MsgFrame {
            subject: pending.subject,
            sid: pending.sid,
            reply: pending.reply,
            headers,
            payload,
        }));
        Ok(())
    }
}

fn parse_size(field: &str) -> Result<usize, ParseError> {
    if !field.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ParseError::InvalidSize(field.to_owned()));
    }
    field
        .parse::<usize>()
        .map_err(|_| ParseError::InvalidSize(field.to_owned()))
}

fn parse_sid(field: &str) -> Result<Sid, ParseError> {
    if !field.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ParseError::InvalidSid(field.to_owned()));
    }
    field
        .parse::<Sid>()
        .map_err(|_| ParseError::InvalidSid(field.to_owned()))
}

fn parse_err_text(rest: &[u8]) -> String {
    let text = String::from_utf8_lossy(rest);
    let trimmed = text.trim();
    trimmed
        .strip_prefix('\'')
        .and_then(|inner| inner.strip_suffix('\''))
        .unwrap_or(trimmed)
        .to_owned()
}

fn lossy_excerpt(bytes: &[u8]) -> String {
    let end = bytes.len().min(64);
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

#[cfg(test)]
mod tests;
