//! Frame echo on the `natwire::wire` tracing target.
//!
//! Enabled by [`ClientBuilder::debug`](crate::ClientBuilder::debug). Sent
//! frames are prefixed `>>`, received frames `<<`. Only control lines are
//! echoed; payloads appear as their byte count.

use std::fmt;

use crate::proto::ServerOp;

/// Target carrying echoed frames.
pub const WIRE_TARGET: &str = "natwire::wire";

pub(crate) fn echo_sent(frame: &[u8]) {
    let end = frame
        .windows(2)
        .position(|w| w == b"\r\n")
        .unwrap_or(frame.len());
    let line = String::from_utf8_lossy(&frame[..end]);
    tracing::debug!(target: WIRE_TARGET, ">> {line}");
}

pub(crate) fn echo_received(op: &ServerOp) {
    tracing::debug!(target: WIRE_TARGET, "<< {}", Received(op));
}

struct Received<'a>(&'a ServerOp);

impl fmt::Display for Received<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            ServerOp::Info(info) => match serde_json::to_string(info) {
                Ok(json) => write!(f, "INFO {json}"),
                Err(_) => f.write_str("INFO"),
            },
            ServerOp::Msg(frame) => {
                f.write_str(self.0.verb())?;
                write!(f, " {} {}", frame.subject, frame.sid)?;
                if let Some(reply) = &frame.reply {
                    write!(f, " {reply}")?;
                }
                if let Some(headers) = &frame.headers {
                    let header_len = headers.to_bytes().len();
                    write!(f, " {header_len} {}", header_len + frame.payload.len())
                } else {
                    write!(f, " {}", frame.payload.len())
                }
            }
            ServerOp::Ok => f.write_str("+OK"),
            ServerOp::Err(text) => write!(f, "-ERR '{text}'"),
            ServerOp::Ping => f.write_str("PING"),
            ServerOp::Pong => f.write_str("PONG"),
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::proto::MsgFrame;

    #[test]
    fn received_messages_render_as_control_lines() {
        let op = ServerOp::Msg(MsgFrame {
            subject: "foo".into(),
            sid: 3,
            reply: Some("bar".into()),
            headers: None,
            payload: Bytes::from_static(b"hello"),
        });
        assert_eq!(Received(&op).to_string(), "MSG foo 3 bar 5");
        assert_eq!(
            Received(&ServerOp::Err("Permissions Violation".into())).to_string(),
            "-ERR 'Permissions Violation'"
        );
    }
}
