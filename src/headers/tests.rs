//! Unit tests for header parsing and Content-Type decoding.

use rstest::rstest;

use super::{parse_content_type, parse_header_block, HeaderMap, CONTENT_ID};
use crate::{framing::LineReader, source::SliceSource, BatchError};

async fn parse(payload: &str) -> crate::Result<HeaderMap> {
    let mut reader = LineReader::new(SliceSource::from(payload));
    parse_header_block(&mut reader).await
}

#[tokio::test]
async fn parses_simple_block() {
    let headers = parse("Content-Type: application/http\r\nContent-ID: 1\r\n\r\n")
        .await
        .unwrap();
    assert_eq!(headers.get("content-type"), Some("application/http"));
    assert_eq!(headers.get(CONTENT_ID), Some("1"));
    assert_eq!(headers.len(), 2);
}

#[tokio::test]
async fn multi_value_headers_concatenate() {
    let headers = parse("Accept: application/json\r\nAccept: text/plain\r\n\r\n")
        .await
        .unwrap();
    assert_eq!(headers.get("Accept"), Some("application/json, text/plain"));
}

#[rstest]
#[case::content_id("Content-ID: 1\r\nContent-ID: 2\r\n\r\n")]
#[case::content_type("Content-Type: a/b\r\ncontent-type: c/d\r\n\r\n")]
#[case::transfer_encoding(
    "Content-Transfer-Encoding: binary\r\nContent-Transfer-Encoding: binary\r\n\r\n"
)]
#[tokio::test]
async fn repeated_single_value_header_fails(#[case] payload: &str) {
    let err = parse(payload).await.unwrap_err();
    assert!(matches!(err, BatchError::MalformedFraming { .. }));
}

#[rstest]
#[case::truncated("Content-ID: 1\r\n")]
#[case::no_colon("not a header\r\n\r\n")]
#[case::empty_name(": value\r\n\r\n")]
#[tokio::test]
async fn malformed_blocks_fail(#[case] payload: &str) {
    let err = parse(payload).await.unwrap_err();
    assert!(matches!(err, BatchError::MalformedFraming { .. }));
}

#[rstest]
#[case::plain("multipart/mixed", "multipart/mixed", None)]
#[case::with_boundary(
    "multipart/mixed; boundary=batch_36522ad7",
    "multipart/mixed",
    Some("batch_36522ad7")
)]
#[case::quoted_boundary(
    "multipart/mixed;boundary=\"b:with=odd,chars\"",
    "multipart/mixed",
    Some("b:with=odd,chars")
)]
#[case::case_folding("Application/HTTP", "application/http", None)]
fn content_type_decodes(
    #[case] value: &str,
    #[case] media: &str,
    #[case] boundary: Option<&str>,
) {
    let parsed = parse_content_type(value).unwrap();
    assert_eq!(parsed.media_type(), media);
    assert_eq!(parsed.boundary(), boundary);
}

#[test]
fn textual_detection() {
    assert!(parse_content_type("text/plain; charset=utf-8")
        .unwrap()
        .is_textual());
    assert!(parse_content_type("application/json").unwrap().is_textual());
    assert!(!parse_content_type("application/octet-stream")
        .unwrap()
        .is_textual());
}

#[test]
fn empty_boundary_rejected() {
    let err = parse_content_type("multipart/mixed; boundary=").unwrap_err();
    assert!(matches!(err, BatchError::MalformedFraming { .. }));
}
