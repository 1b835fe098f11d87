//! Message header blocks carried by `HPUB` and `HMSG`.
//!
//! A header block starts with a `NATS/1.0` version line, optionally followed
//! by a three digit status code and a description, then zero or more
//! `Name: value` lines, and ends with an empty line:
//!
//! ```text
//! NATS/1.0 503\r\n
//! \r\n
//! ```

use std::str;

use bytes::{BufMut, Bytes, BytesMut};

use crate::parser::ParseError;

const VERSION_LINE: &str = "NATS/1.0";

/// Status code the server attaches to a request nobody subscribed to.
pub const NO_RESPONDERS_STATUS: u16 = 503;

/// Ordered collection of message headers.
///
/// Names are compared case-sensitively, as the server does. A name may carry
/// several values.
///
/// # Examples
///
/// ```
/// use natwire::HeaderMap;
///
/// let mut headers = HeaderMap::new();
/// headers.insert("Content-Type", "application/json");
/// headers.append("Trace", "a");
/// headers.append("Trace", "b");
/// assert_eq!(headers.get("Content-Type"), Some("application/json"));
/// assert_eq!(headers.get_all("Trace").collect::<Vec<_>>(), ["a", "b"]);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HeaderMap {
    status: Option<u16>,
    description: Option<String>,
    entries: Vec<(String, String)>,
}

impl HeaderMap {
    /// Create an empty header map.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Replace every value of `name` with `value`.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.entries.retain(|(existing, _)| *existing != name);
        self.entries.push((name, value.into()));
    }

    /// Add `value` to the values of `name`.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// First value of `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, value)| value.as_str())
    }

    /// Every value of `name`, in insertion order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(existing, _)| existing == name)
            .map(|(_, value)| value.as_str())
    }

    /// Status code from the version line, if any.
    #[must_use]
    pub fn status(&self) -> Option<u16> { self.status }

    /// Status description from the version line, if any.
    #[must_use]
    pub fn description(&self) -> Option<&str> { self.description.as_deref() }

    /// Number of header entries, not counting the status line.
    #[must_use]
    pub fn len(&self) -> usize { self.entries.len() }

    /// Whether the map holds no entries and no status.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.entries.is_empty() && self.status.is_none() }

    /// Encode the header block including its terminating empty line.
    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(32 + self.entries.len() * 32);
        buf.put_slice(VERSION_LINE.as_bytes());
        if let Some(status) = self.status {
            buf.put_slice(format!(" {status}").as_bytes());
            if let Some(description) = &self.description {
                buf.put_u8(b' ');
                buf.put_slice(description.as_bytes());
            }
        }
        buf.put_slice(b"\r\n");
        for (name, value) in &self.entries {
            buf.put_slice(name.as_bytes());
            buf.put_slice(b": ");
            buf.put_slice(value.as_bytes());
            buf.put_slice(b"\r\n");
        }
        buf.put_slice(b"\r\n");
        buf.freeze()
    }

    /// Decode a header block as found at the start of an `HMSG` payload.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::InvalidHeaders`] when the version line is
    /// missing, the block is not UTF-8 or an entry has no `:` separator.
    pub fn decode(block: &[u8]) -> Result<Self, ParseError> {
        let text = str::from_utf8(block)
            .map_err(|_| ParseError::InvalidHeaders("header block is not UTF-8".into()))?;
        let mut lines = text.split("\r\n");
        let version_line = lines.next().unwrap_or_default();
        let Some(rest) = version_line.strip_prefix(VERSION_LINE) else {
            return Err(ParseError::InvalidHeaders(format!(
                "unexpected version line {version_line:?}"
            )));
        };
        let mut map = Self::new();
        let rest = rest.trim();
        if !rest.is_empty() {
            let (code, description) = rest.split_once(' ').unwrap_or((rest, ""));
            let code = code
                .parse::<u16>()
                .map_err(|_| ParseError::InvalidHeaders(format!("invalid status {code:?}")))?;
            map.status = Some(code);
            let description = description.trim();
            if !description.is_empty() {
                map.description = Some(description.to_owned());
            }
        }
        for line in lines.filter(|line| !line.is_empty()) {
            let Some((name, value)) = line.split_once(':') else {
                return Err(ParseError::InvalidHeaders(format!(
                    "header line without separator {line:?}"
                )));
            };
            map.append(name.trim(), value.trim());
        }
        Ok(map)
    }

    #[cfg(test)]
    pub(crate) fn with_status(status: u16, description: Option<&str>) -> Self {
        Self {
            status: Some(status),
            description: description.map(str::to_owned),
            entries: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_line_is_decoded() {
        let map = HeaderMap::decode(b"NATS/1.0 503\r\n\r\n").expect("decode headers");
        assert_eq!(map.status(), Some(NO_RESPONDERS_STATUS));
        assert_eq!(map.description(), None);
        assert_eq!(map.len(), 0);
    }

    #[test]
    fn status_description_and_entries_are_decoded() {
        let block = b"NATS/1.0 408 Request Timeout\r\nA: 1\r\nA: 2\r\nB:x\r\n\r\n";
        let map = HeaderMap::decode(block).expect("decode headers");
        assert_eq!(map.status(), Some(408));
        assert_eq!(map.description(), Some("Request Timeout"));
        assert_eq!(map.get_all("A").collect::<Vec<_>>(), ["1", "2"]);
        assert_eq!(map.get("B"), Some("x"));
    }

    #[test]
    fn encoded_block_decodes_to_same_map() {
        let mut map = HeaderMap::with_status(503, Some("No Responders"));
        map.append("Id", "42");
        let decoded = HeaderMap::decode(&map.to_bytes()).expect("decode headers");
        assert_eq!(decoded, map);
    }

    #[test]
    fn missing_version_line_is_rejected() {
        assert!(matches!(
            HeaderMap::decode(b"HTTP/1.1 200\r\n\r\n"),
            Err(ParseError::InvalidHeaders(_))
        ));
    }

    #[test]
    fn insert_replaces_existing_values() {
        let mut map = HeaderMap::new();
        map.append("A", "1");
        map.append("A", "2");
        map.insert("A", "3");
        assert_eq!(map.get_all("A").collect::<Vec<_>>(), ["3"]);
    }
}
