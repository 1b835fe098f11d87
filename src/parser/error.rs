//! Errors raised by the incremental parser.
//!
//! Every variant is fatal for the current connection: once the byte stream
//! has been misread the parser cannot find the next frame boundary safely.

use thiserror::Error;

/// Protocol violations detected while parsing server output.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    /// The control line does not start with a known verb.
    #[error("unknown protocol operation: {0:?}")]
    UnknownOperation(String),
    /// A known verb carried the wrong number of arguments.
    #[error("malformed {verb} arguments: {line:?}")]
    InvalidArguments {
        /// Verb whose arguments were rejected.
        verb: &'static str,
        /// Offending control line.
        line: String,
    },
    /// A byte count was not a non-negative decimal number.
    #[error("invalid byte count {0:?}")]
    InvalidSize(String),
    /// A subscription id was not a non-negative decimal number.
    #[error("invalid subscription id {0:?}")]
    InvalidSid(String),
    /// The header length of an `HMSG` exceeds its total length.
    #[error("header length {header} exceeds total length {total}")]
    HeaderLengthExceedsTotal {
        /// Declared header length.
        header: usize,
        /// Declared total length.
        total: usize,
    },
    /// The control line grew beyond the configured maximum.
    #[error("control line exceeds maximum of {max} bytes")]
    ControlLineTooLong {
        /// Configured maximum.
        max: usize,
    },
    /// A `MSG`/`HMSG` declared more payload bytes than the connection allows.
    #[error("declared payload of {size} bytes exceeds maximum of {max}")]
    PayloadTooLarge {
        /// Declared byte count.
        size: usize,
        /// Limit in force.
        max: usize,
    },
    /// The payload was not followed by CRLF.
    #[error("payload is not terminated by CRLF")]
    MissingPayloadTerminator,
    /// The JSON body of `INFO` could not be decoded.
    #[error("invalid INFO body: {0}")]
    InvalidInfo(String),
    /// The header block of an `HMSG` could not be decoded.
    #[error("invalid header block: {0}")]
    InvalidHeaders(String),
    /// The control line is not valid UTF-8.
    #[error("control line is not valid UTF-8")]
    InvalidUtf8,
}
