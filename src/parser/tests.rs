//! Unit tests for the incremental parser.

use bytes::Bytes;
use proptest::prelude::*;
use rstest::rstest;

use super::*;

const MIXED_STREAM: &[u8] = b"INFO {\"server_id\":\"s1\",\"max_payload\":1024,\"headers\":true}\r\n\
+OK\r\n\
MSG foo 1 3\r\nbar\r\n\
MSG foo.bar 22 reply.to 5\r\nhe\r\nl\r\n\
PING\r\n\
HMSG svc 3 _INBOX.x.y 16 18\r\nNATS/1.0 503\r\n\r\nhi\r\n\
-ERR 'Permissions Violation for Subscription to \"x\"'\r\n\
MSG empty 4 0\r\n\r\n\
PONG\r\n";

fn parse_all(chunks: &[&[u8]]) -> Result<Vec<ServerOp>, ParseError> {
    let mut parser = Parser::new();
    let mut ops = Vec::new();
    for chunk in chunks {
        parser.feed(chunk, &mut ops)?;
    }
    Ok(ops)
}

fn msg(ops: &[ServerOp], index: usize) -> &MsgFrame {
    match &ops[index] {
        ServerOp::Msg(frame) => frame,
        other => panic!("expected MSG at {index}, got {other:?}"),
    }
}

#[test]
fn parses_every_operation_in_one_chunk() {
    let ops = parse_all(&[MIXED_STREAM]).expect("parse stream");
    assert_eq!(ops.len(), 9);
    assert!(matches!(&ops[0], ServerOp::Info(info) if info.server_id == "s1" && info.headers));
    assert_eq!(ops[1], ServerOp::Ok);
    assert_eq!(msg(&ops, 2).payload, Bytes::from_static(b"bar"));
    assert_eq!(msg(&ops, 3).reply.as_deref(), Some("reply.to"));
    assert_eq!(msg(&ops, 3).sid, 22);
    assert_eq!(msg(&ops, 3).payload, Bytes::from_static(b"he\r\nl"));
    assert_eq!(ops[4], ServerOp::Ping);
    let hmsg = msg(&ops, 5);
    assert_eq!(hmsg.payload, Bytes::from_static(b"hi"));
    assert_eq!(hmsg.headers.as_ref().and_then(HeaderMap::status), Some(503));
    assert_eq!(
        ops[6],
        ServerOp::Err("Permissions Violation for Subscription to \"x\"".into())
    );
    assert!(msg(&ops, 7).payload.is_empty());
    assert_eq!(ops[8], ServerOp::Pong);
}

#[test]
fn byte_at_a_time_matches_single_chunk() {
    let whole = parse_all(&[MIXED_STREAM]).expect("parse whole");
    let bytes: Vec<&[u8]> = MIXED_STREAM.chunks(1).collect();
    let split = parse_all(&bytes).expect("parse bytes");
    assert_eq!(whole, split);
}

#[test]
fn partial_payload_waits_for_remaining_bytes() {
    let mut parser = Parser::new();
    let mut ops = Vec::new();
    parser.feed(b"MSG foo 1 10\r\n0123", &mut ops).expect("feed head");
    assert!(ops.is_empty());
    assert!(!parser.is_idle());
    parser.feed(b"456789", &mut ops).expect("feed body");
    assert!(ops.is_empty(), "trailing CRLF still outstanding");
    parser.feed(b"\r", &mut ops).expect("feed CR");
    assert!(ops.is_empty());
    parser.feed(b"\n", &mut ops).expect("feed LF");
    assert_eq!(msg(&ops, 0).payload, Bytes::from_static(b"0123456789"));
    assert!(parser.is_idle());
}

#[test]
fn payload_is_binary_safe() {
    let mut stream = b"MSG bin 9 4\r\n".to_vec();
    stream.extend_from_slice(&[0, 0xff, b'\r', b'\n']);
    stream.extend_from_slice(b"\r\n");
    let ops = parse_all(&[&stream]).expect("parse binary");
    assert_eq!(msg(&ops, 0).payload.as_ref(), &[0, 0xff, b'\r', b'\n']);
}

#[rstest]
#[case(b"ping\r\n".as_slice(), ServerOp::Ping)]
#[case(b"Pong\r\n".as_slice(), ServerOp::Pong)]
#[case(b"+ok\r\n".as_slice(), ServerOp::Ok)]
#[case(b"PING\n".as_slice(), ServerOp::Ping)]
fn verbs_match_case_insensitively(#[case] input: &[u8], #[case] expected: ServerOp) {
    let ops = parse_all(&[input]).expect("parse verb");
    assert_eq!(ops, vec![expected]);
}

#[test]
fn incomplete_verb_waits_for_more_bytes() {
    let mut parser = Parser::new();
    let mut ops = Vec::new();
    parser.feed(b"PI", &mut ops).expect("partial verb is not fatal");
    parser.feed(b"NG\r", &mut ops).expect("still partial");
    assert!(ops.is_empty());
    parser.feed(b"\n", &mut ops).expect("complete");
    assert_eq!(ops, vec![ServerOp::Ping]);
}

#[rstest]
#[case(b"HELLO world\r\n".as_slice())]
#[case(b"XYZ".as_slice())]
#[case(b"PINGPONG\r\n".as_slice())]
fn unknown_verbs_are_fatal(#[case] input: &[u8]) {
    assert!(matches!(
        parse_all(&[input]),
        Err(ParseError::UnknownOperation(_))
    ));
}

#[rstest]
#[case(b"MSG foo 1 abc\r\n".as_slice())]
#[case(b"MSG foo 1 -3\r\n".as_slice())]
#[case(b"HMSG foo 1 x 10\r\n".as_slice())]
fn non_numeric_sizes_are_fatal(#[case] input: &[u8]) {
    assert!(matches!(parse_all(&[input]), Err(ParseError::InvalidSize(_))));
}

#[test]
fn non_numeric_sid_is_fatal() {
    assert!(matches!(
        parse_all(&[b"MSG foo one 3\r\nbar\r\n"]),
        Err(ParseError::InvalidSid(_))
    ));
}

#[rstest]
#[case(b"MSG foo\r\n".as_slice())]
#[case(b"MSG a b c d e\r\n".as_slice())]
#[case(b"HMSG foo 1 2\r\n".as_slice())]
fn wrong_argument_counts_are_fatal(#[case] input: &[u8]) {
    assert!(matches!(
        parse_all(&[input]),
        Err(ParseError::InvalidArguments { .. })
    ));
}

#[test]
fn header_length_larger_than_total_is_fatal() {
    assert!(matches!(
        parse_all(&[b"HMSG foo 1 20 10\r\n"]),
        Err(ParseError::HeaderLengthExceedsTotal {
            header: 20,
            total: 10
        })
    ));
}

#[test]
fn missing_payload_terminator_is_fatal() {
    assert_eq!(
        parse_all(&[b"MSG foo 1 3\r\nbarXY"]),
        Err(ParseError::MissingPayloadTerminator)
    );
}

#[test]
fn oversized_control_line_is_fatal_before_terminator() {
    let mut parser = Parser::with_max_control_line(128);
    let mut ops = Vec::new();
    let line = format!("INFO {{\"server_id\":\"{}\"", "x".repeat(200));
    assert_eq!(
        parser.feed(line.as_bytes(), &mut ops),
        Err(ParseError::ControlLineTooLong { max: 128 })
    );
}

#[rstest]
#[case(b"MSG foo 1 18446744073709551615\r\n".as_slice(), usize::MAX)]
#[case(b"MSG foo 1 100000000000000\r\n".as_slice(), 100_000_000_000_000)]
#[case(b"HMSG foo 1 12 100000000000000\r\n".as_slice(), 100_000_000_000_000)]
fn declared_sizes_beyond_the_limit_are_fatal(#[case] input: &[u8], #[case] size: usize) {
    assert_eq!(
        parse_all(&[input]),
        Err(ParseError::PayloadTooLarge {
            size,
            max: DEFAULT_MAX_PAYLOAD
        })
    );
}

#[test]
fn payload_limit_can_be_lowered() {
    let mut parser = Parser::new();
    parser.set_max_payload(4);
    let mut ops = Vec::new();
    parser.feed(b"MSG a 1 4\r\nfour\r\n", &mut ops).expect("at limit");
    assert_eq!(msg(&ops, 0).payload, Bytes::from_static(b"four"));
    assert_eq!(
        parser.feed(b"MSG a 1 5\r\n", &mut ops),
        Err(ParseError::PayloadTooLarge { size: 5, max: 4 })
    );
}

#[test]
fn large_payload_buffers_only_what_arrived() {
    let mut parser = Parser::new();
    let mut ops = Vec::new();
    parser.feed(b"MSG big 1 1000000\r\n", &mut ops).expect("header");
    parser.feed(&[b'x'; 10], &mut ops).expect("first bytes");
    assert!(parser.payload.capacity() < 1_000_000);
    parser.feed(&vec![b'x'; 999_990], &mut ops).expect("rest");
    parser.feed(b"\r\n", &mut ops).expect("terminator");
    assert_eq!(msg(&ops, 0).payload.len(), 1_000_000);
    assert!(parser.is_idle());
}

#[test]
fn malformed_info_json_is_fatal() {
    assert!(matches!(
        parse_all(&[b"INFO {not json}\r\n"]),
        Err(ParseError::InvalidInfo(_))
    ));
}

#[test]
fn err_text_keeps_unquoted_content() {
    let ops = parse_all(&[b"-ERR Stale Connection\r\n"]).expect("parse err");
    assert_eq!(ops, vec![ServerOp::Err("Stale Connection".into())]);
}

fn split_at_points(input: &[u8], mut points: Vec<usize>) -> Vec<&[u8]> {
    points.retain(|point| *point > 0 && *point < input.len());
    points.sort_unstable();
    points.dedup();
    let mut chunks = Vec::with_capacity(points.len() + 1);
    let mut start = 0;
    for point in points {
        chunks.push(&input[start..point]);
        start = point;
    }
    chunks.push(&input[start..]);
    chunks
}

proptest! {
    #[test]
    fn chunking_never_changes_the_frames(points in proptest::collection::vec(0usize..MIXED_STREAM.len(), 0..40)) {
        let expected = parse_all(&[MIXED_STREAM]).expect("parse whole");
        let chunks = split_at_points(MIXED_STREAM, points);
        let actual = parse_all(&chunks).expect("parse chunks");
        prop_assert_eq!(expected, actual);
    }

    #[test]
    fn arbitrary_payloads_survive_chunking(
        payload in proptest::collection::vec(any::<u8>(), 0..256),
        points in proptest::collection::vec(0usize..300, 0..10),
    ) {
        let mut stream = format!("MSG sub.ject 9 {}\r\n", payload.len()).into_bytes();
        stream.extend_from_slice(&payload);
        stream.extend_from_slice(b"\r\nPING\r\n");
        let chunks = split_at_points(&stream, points);
        let ops = parse_all(&chunks).expect("parse chunks");
        prop_assert_eq!(ops.len(), 2);
        prop_assert_eq!(msg(&ops, 0).payload.as_ref(), payload.as_slice());
    }
}
