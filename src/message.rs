//! Messages delivered to subscriptions and requests.

use bytes::Bytes;
use serde::de::DeserializeOwned;

use crate::{
    error::ClientError,
    headers::{HeaderMap, NO_RESPONDERS_STATUS},
    proto::{MsgFrame, Sid},
};

/// A message received from the server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    /// Subject the message was published on.
    pub subject: String,
    /// Reply subject supplied by the publisher.
    pub reply: Option<String>,
    /// Opaque payload.
    pub payload: Bytes,
    /// Header block, present for `HMSG` deliveries.
    pub headers: Option<HeaderMap>,
    /// Subscription the message was routed to.
    pub sid: Sid,
}

impl Message {
    /// Status code carried in the header block, if any.
    #[must_use]
    pub fn status(&self) -> Option<u16> { self.headers.as_ref().and_then(HeaderMap::status) }

    /// Whether this is the server's "no responders" reply to a request.
    #[must_use]
    pub fn is_no_responders(&self) -> bool {
        self.payload.is_empty() && self.status() == Some(NO_RESPONDERS_STATUS)
    }

    /// Decode the payload as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Json`] when the payload is not valid JSON for
    /// `T`.
    ///
    /// # Examples
    ///
    /// ```
    /// use bytes::Bytes;
    /// use natwire::Message;
    ///
    /// let message = Message {
    ///     subject: "orders".into(),
    ///     reply: None,
    ///     payload: Bytes::from_static(br#"{"id":7}"#),
    ///     headers: None,
    ///     sid: 1,
    /// };
    /// let value: serde_json::Value = message.json().unwrap();
    /// assert_eq!(value["id"], 7);
    /// ```
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ClientError> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
}

impl From<MsgFrame> for Message {
    fn from(frame: MsgFrame) -> Self {
        Self {
            subject: frame.subject,
            reply: frame.reply,
            payload: frame.payload,
            headers: frame.headers,
            sid: frame.sid,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(payload: &'static [u8], headers: Option<HeaderMap>) -> Message {
        Message {
            subject: "_INBOX.abc.1".into(),
            reply: None,
            payload: Bytes::from_static(payload),
            headers,
            sid: 1,
        }
    }

    #[test]
    fn empty_503_reply_is_no_responders() {
        let msg = message(b"", Some(HeaderMap::with_status(503, None)));
        assert!(msg.is_no_responders());
    }

    #[test]
    fn payload_with_503_status_is_not_no_responders() {
        let msg = message(b"data", Some(HeaderMap::with_status(503, None)));
        assert!(!msg.is_no_responders());
        assert!(!message(b"", None).is_no_responders());
    }

    #[test]
    fn malformed_json_is_reported() {
        let result: Result<serde_json::Value, _> = message(b"{nope", None).json();
        assert!(matches!(result, Err(ClientError::Json(_))));
    }
}
