//! Encoding of client operations.

use std::fmt::Write as _;

use bytes::{BufMut, BytesMut};

use super::ClientOp;

const CRLF: &[u8] = b"\r\n";

struct LineWriter<'a>(&'a mut BytesMut);

impl std::fmt::Write for LineWriter<'_> {
    fn write_str(&mut self, s: &str) -> std::fmt::Result {
        self.0.put_slice(s.as_bytes());
        Ok(())
    }
}

impl ClientOp {
    /// Append the wire representation of this operation to `dst`.
    ///
    /// # Errors
    ///
    /// Returns a [`serde_json::Error`] if a `CONNECT` payload cannot be
    /// serialized.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<(), serde_json::Error> {
        match self {
            Self::Connect(info) => {
                let json = serde_json::to_vec(info)?;
                dst.reserve(json.len() + 10);
                dst.put_slice(b"CONNECT ");
                dst.put_slice(&json);
                dst.put_slice(CRLF);
            }
            Self::Pub {
                subject,
                reply,
                headers,
                payload,
            } => {
                let header_block = headers.as_ref().map(crate::headers::HeaderMap::to_bytes);
                dst.reserve(subject.len() + payload.len() + 32);
                let mut line = LineWriter(&mut *dst);
                let verb = if header_block.is_some() { "HPUB" } else { "PUB" };
                let _ = write!(line, "{verb} {subject}");
                if let Some(reply) = reply {
                    let _ = write!(line, " {reply}");
                }
                match &header_block {
                    Some(block) => {
                        let _ = write!(line, " {} {}", block.len(), block.len() + payload.len());
                    }
                    None => {
                        let _ = write!(line, " {}", payload.len());
                    }
                }
                dst.put_slice(CRLF);
                if let Some(block) = &header_block {
                    dst.put_slice(block);
                }
                dst.put_slice(payload);
                dst.put_slice(CRLF);
            }
            Self::Sub {
                subject,
                queue_group,
                sid,
            } => {
                let mut line = LineWriter(&mut *dst);
                let _ = match queue_group {
                    Some(queue) => write!(line, "SUB {subject} {queue} {sid}"),
                    None => write!(line, "SUB {subject} {sid}"),
                };
                dst.put_slice(CRLF);
            }
            Self::Unsub { sid, max } => {
                let mut line = LineWriter(&mut *dst);
                let _ = match max {
                    Some(max) => write!(line, "UNSUB {sid} {max}"),
                    None => write!(line, "UNSUB {sid}"),
                };
                dst.put_slice(CRLF);
            }
            Self::Ping => dst.put_slice(b"PING\r\n"),
            Self::Pong => dst.put_slice(b"PONG\r\n"),
        }
        Ok(())
    }

    /// Encode this operation into a fresh buffer.
    ///
    /// # Errors
    ///
    /// See [`ClientOp::encode`].
    pub fn to_bytes(&self) -> Result<bytes::Bytes, serde_json::Error> {
        let mut buf = BytesMut::new();
        self.encode(&mut buf)?;
        Ok(buf.freeze())
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use rstest::rstest;

    use crate::{headers::HeaderMap, proto::ClientOp};

    fn encoded(op: &ClientOp) -> String {
        let bytes = op.to_bytes().expect("encode op");
        String::from_utf8(bytes.to_vec()).expect("utf8 frame")
    }

    #[rstest]
    #[case(ClientOp::Ping, "PING\r\n")]
    #[case(ClientOp::Pong, "PONG\r\n")]
    #[case(ClientOp::Unsub { sid: 7, max: None }, "UNSUB 7\r\n")]
    #[case(ClientOp::Unsub { sid: 7, max: Some(3) }, "UNSUB 7 3\r\n")]
    #[case(
        ClientOp::Sub { subject: "foo.bar".into(), queue_group: None, sid: 1 },
        "SUB foo.bar 1\r\n"
    )]
    #[case(
        ClientOp::Sub { subject: "foo".into(), queue_group: Some("workers".into()), sid: 12 },
        "SUB foo workers 12\r\n"
    )]
    fn control_frames_encode(#[case] op: ClientOp, #[case] expected: &str) {
        assert_eq!(encoded(&op), expected);
    }

    #[test]
    fn pub_frame_carries_reply_and_length() {
        let op = ClientOp::Pub {
            subject: "svc".into(),
            reply: Some("_INBOX.abc.1".into()),
            headers: None,
            payload: Bytes::from_static(b"hello"),
        };
        assert_eq!(encoded(&op), "PUB svc _INBOX.abc.1 5\r\nhello\r\n");
    }

    #[test]
    fn empty_payload_is_still_terminated() {
        let op = ClientOp::Pub {
            subject: "svc".into(),
            reply: None,
            headers: None,
            payload: Bytes::new(),
        };
        assert_eq!(encoded(&op), "PUB svc 0\r\n\r\n");
    }

    #[test]
    fn hpub_frame_counts_header_bytes() {
        let mut headers = HeaderMap::new();
        headers.insert("Trace", "1");
        let block_len = headers.to_bytes().len();
        let op = ClientOp::Pub {
            subject: "svc".into(),
            reply: None,
            headers: Some(headers),
            payload: Bytes::from_static(b"hi"),
        };
        let text = encoded(&op);
        let expected_line = format!("HPUB svc {block_len} {}\r\n", block_len + 2);
        assert!(text.starts_with(&expected_line), "unexpected frame {text:?}");
        assert!(text.ends_with("\r\n\r\nhi\r\n"));
    }
}
