//! End-to-end coverage for multipart/mixed batch payloads.

use batchframe::{
    BatchError, BatchReader, BatchReaderSettings, Method, ReaderState, SliceSource,
};
use rstest::rstest;

const BATCH: &str = "batch_36522ad7-fc75-4b56-8c71-56071383e77b";
const CHANGESET: &str = "changeset_77162fcd-b8da-41ac-a9f8-9357efbbd";

fn content_type() -> String {
    format!("multipart/mixed; boundary={BATCH}")
}

/// The canonical request batch from the protocol examples: one changeset
/// with a create and a cross-referencing create.
fn changeset_batch() -> String {
    format!(
        "--{BATCH}\r\n\
         Content-Type: multipart/mixed; boundary={CHANGESET}\r\n\
         \r\n\
         --{CHANGESET}\r\n\
         Content-Type: application/http\r\n\
         Content-Transfer-Encoding: binary\r\n\
         Content-ID: 1\r\n\
         \r\n\
         POST /Customers HTTP/1.1\r\n\
         Content-Type: application/json\r\n\
         \r\n\
         {{\"Name\":\"A\"}}\r\n\
         --{CHANGESET}\r\n\
         Content-Type: application/http\r\n\
         Content-Transfer-Encoding: binary\r\n\
         Content-ID: 2\r\n\
         \r\n\
         POST $1/Orders HTTP/1.1\r\n\
         \r\n\
         \r\n\
         --{CHANGESET}--\r\n\
         --{BATCH}--\r\n"
    )
}

#[derive(Debug, PartialEq, Eq)]
enum Event {
    ChangesetStart,
    ChangesetEnd,
    Request {
        method: Method,
        uri: String,
        content_id: Option<String>,
        body: Vec<u8>,
    },
}

async fn collect_request_events(
    payload: &str,
    settings: BatchReaderSettings,
    chunk: usize,
) -> batchframe::Result<Vec<Event>> {
    let source = SliceSource::from(payload).chunked(chunk);
    let mut reader = BatchReader::open_request(source, &content_type(), settings)?;
    let mut events = Vec::new();
    while reader.advance().await? {
        match reader.state() {
            ReaderState::ChangesetStart => events.push(Event::ChangesetStart),
            ReaderState::ChangesetEnd => events.push(Event::ChangesetEnd),
            ReaderState::Operation => {
                let mut operation = reader.create_operation_request().await?;
                let method = operation.method();
                let uri = operation.uri().to_owned();
                let content_id = operation.content_id().map(str::to_owned);
                let body = operation.open_body()?.read_to_end().await?;
                events.push(Event::Request {
                    method,
                    uri,
                    content_id,
                    body,
                });
            }
            state => panic!("unexpected state while advancing: {state:?}"),
        }
    }
    assert_eq!(reader.state(), ReaderState::Completed);
    Ok(events)
}

#[rstest]
#[case::single_fill(usize::MAX)]
#[case::small_chunks(7)]
#[case::byte_at_a_time(1)]
#[tokio::test]
async fn changeset_with_cross_reference(#[case] chunk: usize) {
    let events = collect_request_events(&changeset_batch(), BatchReaderSettings::default(), chunk)
        .await
        .unwrap();
    assert_eq!(
        events,
        vec![
            Event::ChangesetStart,
            Event::Request {
                method: Method::Post,
                uri: "/Customers".to_owned(),
                content_id: Some("1".to_owned()),
                body: b"{\"Name\":\"A\"}".to_vec(),
            },
            Event::Request {
                method: Method::Post,
                uri: "/Customers/Orders".to_owned(),
                content_id: Some("2".to_owned()),
                body: Vec::new(),
            },
            Event::ChangesetEnd,
        ]
    );
}

#[tokio::test]
async fn empty_batch_completes_on_first_advance() {
    let payload = format!("--{BATCH}--\r\n");
    let mut reader = BatchReader::open_request(
        SliceSource::from(payload.as_str()),
        &content_type(),
        BatchReaderSettings::default(),
    )
    .unwrap();
    assert!(!reader.advance().await.unwrap());
    assert_eq!(reader.state(), ReaderState::Completed);
    // Advancing a completed reader stays a no-op.
    assert!(!reader.advance().await.unwrap());
    assert_eq!(reader.state(), ReaderState::Completed);
}

#[tokio::test]
async fn changeset_with_zero_operations() {
    let payload = format!(
        "--{BATCH}\r\n\
         Content-Type: multipart/mixed; boundary={CHANGESET}\r\n\
         \r\n\
         --{CHANGESET}--\r\n\
         --{BATCH}--\r\n"
    );
    let events = collect_request_events(&payload, BatchReaderSettings::default(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(events, vec![Event::ChangesetStart, Event::ChangesetEnd]);
}

#[tokio::test]
async fn get_inside_changeset_fails_on_message_creation() {
    let payload = format!(
        "--{BATCH}\r\n\
         Content-Type: multipart/mixed; boundary={CHANGESET}\r\n\
         \r\n\
         --{CHANGESET}\r\n\
         Content-Type: application/http\r\n\
         Content-Transfer-Encoding: binary\r\n\
         Content-ID: 1\r\n\
         \r\n\
         GET /Customers HTTP/1.1\r\n\
         \r\n\
         \r\n\
         --{CHANGESET}--\r\n\
         --{BATCH}--\r\n"
    );
    let mut reader = BatchReader::open_request(
        SliceSource::from(payload.as_str()),
        &content_type(),
        BatchReaderSettings::default(),
    )
    .unwrap();
    assert!(reader.advance().await.unwrap());
    assert_eq!(reader.state(), ReaderState::ChangesetStart);
    assert!(reader.advance().await.unwrap());
    assert_eq!(reader.state(), ReaderState::Operation);
    let err = reader.create_operation_request().await.unwrap_err();
    assert!(matches!(
        err,
        BatchError::QueryMethodInChangeset { method } if method == Method::Get
    ));
    assert_eq!(reader.state(), ReaderState::Exception);
    // Exception is terminal.
    assert!(matches!(
        reader.advance().await.unwrap_err(),
        BatchError::InvalidReaderState { .. }
    ));
}

#[tokio::test]
async fn self_reference_is_unresolved() {
    // Content-ID 1 is not published until the advance after its own
    // operation, so a request can never reference itself.
    let payload = format!(
        "--{BATCH}\r\n\
         Content-Type: multipart/mixed; boundary={CHANGESET}\r\n\
         \r\n\
         --{CHANGESET}\r\n\
         Content-Type: application/http\r\n\
         Content-Transfer-Encoding: binary\r\n\
         Content-ID: 1\r\n\
         \r\n\
         POST $1/Orders HTTP/1.1\r\n\
         \r\n\
         \r\n\
         --{CHANGESET}--\r\n\
         --{BATCH}--\r\n"
    );
    let err = collect_request_events(&payload, BatchReaderSettings::default(), usize::MAX)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        BatchError::UnresolvedContentId { reference } if reference == "1"
    ));
}

#[tokio::test]
async fn duplicate_content_id_within_changeset_fails() {
    let payload = format!(
        "--{BATCH}\r\n\
         Content-Type: multipart/mixed; boundary={CHANGESET}\r\n\
         \r\n\
         --{CHANGESET}\r\n\
         Content-Type: application/http\r\n\
         Content-Transfer-Encoding: binary\r\n\
         Content-ID: 1\r\n\
         \r\n\
         POST /A HTTP/1.1\r\n\
         \r\n\
         \r\n\
         --{CHANGESET}\r\n\
         Content-Type: application/http\r\n\
         Content-Transfer-Encoding: binary\r\n\
         Content-ID: 1\r\n\
         \r\n\
         POST /B HTTP/1.1\r\n\
         \r\n\
         \r\n\
         --{CHANGESET}--\r\n\
         --{BATCH}--\r\n"
    );
    let err = collect_request_events(&payload, BatchReaderSettings::default(), usize::MAX)
        .await
        .unwrap_err();
    assert!(matches!(err, BatchError::DuplicateContentId { id } if id == "1"));
}

#[tokio::test]
async fn content_ids_reset_between_changesets() {
    // The same Content-ID may be reused once the first changeset closed.
    let payload = format!(
        "--{BATCH}\r\n\
         Content-Type: multipart/mixed; boundary=cs_one\r\n\
         \r\n\
         --cs_one\r\n\
         Content-Type: application/http\r\n\
         Content-Transfer-Encoding: binary\r\n\
         Content-ID: 1\r\n\
         \r\n\
         POST /A HTTP/1.1\r\n\
         \r\n\
         \r\n\
         --cs_one--\r\n\
         --{BATCH}\r\n\
         Content-Type: multipart/mixed; boundary=cs_two\r\n\
         \r\n\
         --cs_two\r\n\
         Content-Type: application/http\r\n\
         Content-Transfer-Encoding: binary\r\n\
         Content-ID: 1\r\n\
         \r\n\
         POST /B HTTP/1.1\r\n\
         \r\n\
         \r\n\
         --cs_two--\r\n\
         --{BATCH}--\r\n"
    );
    let events = collect_request_events(&payload, BatchReaderSettings::default(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(events.len(), 6);
    assert_eq!(events[0], Event::ChangesetStart);
    assert_eq!(events[2], Event::ChangesetEnd);
    assert_eq!(events[3], Event::ChangesetStart);
    assert_eq!(events[5], Event::ChangesetEnd);
}

#[tokio::test]
async fn changeset_quota_is_enforced() {
    let operation = |id: u32, path: &str| {
        format!(
            "--{CHANGESET}\r\n\
             Content-Type: application/http\r\n\
             Content-Transfer-Encoding: binary\r\n\
             Content-ID: {id}\r\n\
             \r\n\
             POST {path} HTTP/1.1\r\n\
             \r\n\
             \r\n"
        )
    };
    let payload = format!(
        "--{BATCH}\r\n\
         Content-Type: multipart/mixed; boundary={CHANGESET}\r\n\
         \r\n\
         {}{}{}\
         --{CHANGESET}--\r\n\
         --{BATCH}--\r\n",
        operation(1, "/A"),
        operation(2, "/B"),
        operation(3, "/C"),
    );
    let settings = BatchReaderSettings::default().max_operations_per_changeset(2);
    let err = collect_request_events(&payload, settings, usize::MAX)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        BatchError::QuotaExceeded { limit: 2, .. }
    ));
}

#[tokio::test]
async fn batch_part_quota_is_enforced() {
    let operation = |path: &str| {
        format!(
            "--{BATCH}\r\n\
             Content-Type: application/http\r\n\
             Content-Transfer-Encoding: binary\r\n\
             \r\n\
             DELETE {path} HTTP/1.1\r\n\
             \r\n\
             \r\n"
        )
    };
    let payload = format!(
        "{}{}--{BATCH}--\r\n",
        operation("/A"),
        operation("/B"),
    );
    let settings = BatchReaderSettings::default().max_parts_per_batch(1);
    let err = collect_request_events(&payload, settings, usize::MAX)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        BatchError::QuotaExceeded { limit: 1, .. }
    ));
}

#[tokio::test]
async fn advancing_past_an_uncreated_operation_fails() {
    let payload = format!(
        "--{BATCH}\r\n\
         Content-Type: application/http\r\n\
         Content-Transfer-Encoding: binary\r\n\
         \r\n\
         GET /Products HTTP/1.1\r\n\
         \r\n\
         \r\n\
         --{BATCH}--\r\n"
    );
    let mut reader = BatchReader::open_request(
        SliceSource::from(payload.as_str()),
        &content_type(),
        BatchReaderSettings::default(),
    )
    .unwrap();
    assert!(reader.advance().await.unwrap());
    assert_eq!(reader.state(), ReaderState::Operation);
    let err = reader.advance().await.unwrap_err();
    assert!(matches!(err, BatchError::InvalidReaderState { .. }));
    assert_eq!(reader.state(), ReaderState::Exception);
}

#[tokio::test]
async fn request_message_on_a_response_batch_fails() {
    let payload = format!(
        "--{BATCH}\r\n\
         Content-Type: application/http\r\n\
         Content-Transfer-Encoding: binary\r\n\
         \r\n\
         HTTP/1.1 200 OK\r\n\
         \r\n\
         \r\n\
         --{BATCH}--\r\n"
    );
    let mut reader = BatchReader::open_response(
        SliceSource::from(payload.as_str()),
        &content_type(),
        BatchReaderSettings::default(),
    )
    .unwrap();
    assert!(reader.advance().await.unwrap());
    let err = reader.create_operation_request().await.unwrap_err();
    assert!(matches!(err, BatchError::InvalidReaderState { .. }));
}

#[tokio::test]
async fn response_batch_round_trips() {
    let payload = format!(
        "--{BATCH}\r\n\
         Content-Type: application/http\r\n\
         Content-Transfer-Encoding: binary\r\n\
         \r\n\
         HTTP/1.1 201 Created\r\n\
         Content-Type: application/json\r\n\
         \r\n\
         {{\"Id\":42}}\r\n\
         --{BATCH}\r\n\
         Content-Type: application/http\r\n\
         Content-Transfer-Encoding: binary\r\n\
         \r\n\
         HTTP/1.1 204 No Content\r\n\
         \r\n\
         \r\n\
         --{BATCH}--\r\n"
    );
    let mut reader = BatchReader::open_response(
        SliceSource::from(payload.as_str()),
        &content_type(),
        BatchReaderSettings::default(),
    )
    .unwrap();
    let mut statuses = Vec::new();
    let mut bodies = Vec::new();
    while reader.advance().await.unwrap() {
        let mut operation = reader.create_operation_response().await.unwrap();
        statuses.push(operation.status());
        bodies.push(operation.open_body().unwrap().read_to_end().await.unwrap());
    }
    assert_eq!(statuses, [201, 204]);
    assert_eq!(bodies[0], b"{\"Id\":42}");
    assert!(bodies[1].is_empty());
}

#[tokio::test]
async fn unread_bodies_are_skipped() {
    // The caller creates each message but never opens the bodies.
    let mut reader = BatchReader::open_request(
        SliceSource::from(changeset_batch().as_str()),
        &content_type(),
        BatchReaderSettings::default(),
    )
    .unwrap();
    let mut uris = Vec::new();
    while reader.advance().await.unwrap() {
        if reader.state() == ReaderState::Operation {
            let operation = reader.create_operation_request().await.unwrap();
            uris.push(operation.uri().to_owned());
        }
    }
    assert_eq!(uris, ["/Customers", "/Customers/Orders"]);
}

#[test]
fn blocking_reader_mirrors_the_async_flow() {
    let payload = changeset_batch();
    let mut reader = batchframe::blocking::BatchReader::open_request(
        payload.as_bytes(),
        &content_type(),
        BatchReaderSettings::default(),
    )
    .unwrap();
    let mut seen = Vec::new();
    while reader.advance().unwrap() {
        if reader.state() == ReaderState::Operation {
            let mut operation = reader.create_operation_request().unwrap();
            let body = operation.open_body().unwrap().read_to_end().unwrap();
            seen.push((operation.uri().to_owned(), body));
        }
    }
    assert_eq!(reader.state(), ReaderState::Completed);
    assert_eq!(
        seen,
        vec![
            ("/Customers".to_owned(), b"{\"Name\":\"A\"}".to_vec()),
            ("/Customers/Orders".to_owned(), Vec::new()),
        ]
    );
}
