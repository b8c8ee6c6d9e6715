//! Multipart/mixed batch driver.
//!
//! Walks the classical OData batch shape: an outer multipart body whose
//! parts are either `application/http` operations or nested
//! `multipart/mixed` changesets. The driver owns the boundary stack and
//! part-level decisions; the embedded HTTP message of an operation is only
//! parsed once the caller asks for the operation message.

use bytes::Bytes;
use log::warn;

use crate::{
    error::{BatchError, Result},
    framing::{BoundaryHit, LineReader},
    headers::{
        check_transfer_encoding, parse_content_type, parse_header_block, HeaderMap, CONTENT_ID,
        CONTENT_TYPE,
    },
    http::{parse_request_line, parse_status_line},
    message::{BodyDescriptor, RequestMetadata, ResponseMetadata},
    reader::{PendingOperation, ReaderState, StepEvent},
    resolver::{resolve_operation_uri, UrlResolver},
    settings::BatchReaderSettings,
    source::ByteSource,
};

/// What to do with an outer boundary that implicitly closed a changeset.
#[derive(Clone, Copy, Debug)]
enum PendingParent {
    Delimiter,
    Terminator,
}

/// State machine for one multipart batch payload.
pub(crate) struct MimeDriver {
    batch_boundary: String,
    changeset_boundary: Option<String>,
    pending_parent: Option<PendingParent>,
}

impl MimeDriver {
    pub(crate) fn new(batch_boundary: String) -> Self {
        Self {
            batch_boundary,
            changeset_boundary: None,
            pending_parent: None,
        }
    }

    /// Whether the reader currently sits inside a changeset.
    pub(crate) fn in_changeset(&self) -> bool { self.changeset_boundary.is_some() }

    /// The delimiter bounding the current part's body:
    /// `\r\n--<innermost boundary>`.
    pub(crate) fn body_delimiter(&self) -> Bytes {
        let boundary = self
            .changeset_boundary
            .as_deref()
            .unwrap_or(&self.batch_boundary);
        Bytes::from(format!("\r\n--{boundary}"))
    }

    /// Drive one state transition.
    pub(crate) async fn step<S: ByteSource>(
        &mut self,
        lr: &mut LineReader<S>,
        state: ReaderState,
    ) -> Result<StepEvent> {
        match state {
            ReaderState::Initial => match lr.skip_to_boundary(&self.batch_boundary, None).await? {
                BoundaryHit::Terminator => Ok(StepEvent::Completed),
                _ => self.read_outer_part(lr).await,
            },
            ReaderState::Operation | ReaderState::ChangesetStart => {
                if let Some(changeset) = self.changeset_boundary.clone() {
                    self.continue_changeset(lr, &changeset).await
                } else {
                    self.continue_batch(lr).await
                }
            }
            ReaderState::ChangesetEnd => match self.pending_parent.take() {
                Some(PendingParent::Terminator) => Ok(StepEvent::Completed),
                Some(PendingParent::Delimiter) => self.read_outer_part(lr).await,
                None => self.continue_batch(lr).await,
            },
            ReaderState::Completed | ReaderState::Exception => {
                unreachable!("façade never steps a finished reader")
            }
        }
    }

    /// Scan for the next part inside the open changeset.
    async fn continue_changeset<S: ByteSource>(
        &mut self,
        lr: &mut LineReader<S>,
        changeset: &str,
    ) -> Result<StepEvent> {
        match lr
            .skip_to_boundary(changeset, Some(&self.batch_boundary))
            .await?
        {
            BoundaryHit::Delimiter => {
                let headers = parse_header_block(lr).await?;
                let content_type = part_content_type(&headers)?;
                if content_type.is_multipart_mixed() {
                    return Err(BatchError::NestedChangesetNotAllowed);
                }
                if !content_type.is_application_http() {
                    return Err(BatchError::framing(format!(
                        "unsupported changeset part content type {:?}",
                        content_type.media_type()
                    )));
                }
                check_transfer_encoding(&headers)?;
                Ok(StepEvent::Operation {
                    pending: PendingOperation::MimePart {
                        part_headers: headers,
                    },
                    in_changeset: true,
                })
            }
            BoundaryHit::Terminator => {
                self.changeset_boundary = None;
                Ok(StepEvent::ChangesetEnd)
            }
            hit @ (BoundaryHit::ParentDelimiter | BoundaryHit::ParentTerminator) => {
                warn!("changeset {changeset:?} not closed before enclosing boundary");
                self.changeset_boundary = None;
                self.pending_parent = Some(if hit == BoundaryHit::ParentTerminator {
                    PendingParent::Terminator
                } else {
                    PendingParent::Delimiter
                });
                Ok(StepEvent::ChangesetEnd)
            }
        }
    }

    /// Scan for the next top-level part.
    async fn continue_batch<S: ByteSource>(&mut self, lr: &mut LineReader<S>) -> Result<StepEvent> {
        match lr.skip_to_boundary(&self.batch_boundary, None).await? {
            BoundaryHit::Terminator => Ok(StepEvent::Completed),
            _ => self.read_outer_part(lr).await,
        }
    }

    /// Read the headers of a top-level part and classify it.
    async fn read_outer_part<S: ByteSource>(&mut self, lr: &mut LineReader<S>) -> Result<StepEvent> {
        let headers = parse_header_block(lr).await?;
        let content_type = part_content_type(&headers)?;
        if content_type.is_multipart_mixed() {
            let boundary = content_type.boundary().ok_or_else(|| {
                BatchError::framing("changeset part has no boundary parameter")
            })?;
            self.changeset_boundary = Some(boundary.to_owned());
            return Ok(StepEvent::ChangesetStart);
        }
        if !content_type.is_application_http() {
            return Err(BatchError::framing(format!(
                "unsupported batch part content type {:?}",
                content_type.media_type()
            )));
        }
        check_transfer_encoding(&headers)?;
        Ok(StepEvent::Operation {
            pending: PendingOperation::MimePart {
                part_headers: headers,
            },
            in_changeset: false,
        })
    }
}

fn part_content_type(headers: &HeaderMap) -> Result<crate::headers::ContentType> {
    let value = headers
        .get(CONTENT_TYPE)
        .ok_or_else(|| BatchError::framing("batch part is missing a Content-Type header"))?;
    parse_content_type(value)
}

/// Skip any stray blank lines between the part headers and the embedded
/// HTTP start line.
async fn first_significant_line<S: ByteSource>(lr: &mut LineReader<S>) -> Result<String> {
    loop {
        let Some(line) = lr.read_line().await? else {
            return Err(BatchError::framing("embedded HTTP message is truncated"));
        };
        if !line.is_empty() {
            return String::from_utf8(line.to_vec())
                .map_err(|_| BatchError::framing("start line is not valid UTF-8"));
        }
    }
}

/// Parse the embedded HTTP request of an operation part.
///
/// Runs when the caller creates the operation message: the request line,
/// the HTTP headers, and the changeset rules all surface here.
pub(crate) async fn build_request<S: ByteSource>(
    lr: &mut LineReader<S>,
    part_headers: &HeaderMap,
    in_changeset: bool,
    settings: &BatchReaderSettings,
    resolver: &UrlResolver,
    delimiter: Bytes,
) -> Result<RequestMetadata> {
    let start = first_significant_line(lr).await?;
    let (method, raw_uri) = parse_request_line(&start)?;
    if in_changeset && method.is_query() {
        return Err(BatchError::QueryMethodInChangeset { method });
    }
    let headers = parse_header_block(lr).await?;
    let content_id = operation_content_id(part_headers, &headers, settings);
    if in_changeset {
        match &content_id {
            None => return Err(BatchError::MissingContentId),
            Some(id) if resolver.contains(id) => {
                return Err(BatchError::DuplicateContentId { id: id.clone() });
            }
            Some(_) => {}
        }
    }
    let uri = resolve_operation_uri(&raw_uri, resolver, in_changeset, settings.base())?;
    let uri = if settings.base().is_none() {
        absolutize_with_host(uri, &headers)
    } else {
        uri
    };
    Ok(RequestMetadata {
        method,
        uri,
        headers,
        content_id,
        depends_on: Vec::new(),
        body: BodyDescriptor::MimeDelimited { delimiter },
    })
}

/// Reconstruct an absolute URI from an origin-form request target and the
/// embedded `Host` header, when no base URI is configured.
fn absolutize_with_host(uri: String, headers: &HeaderMap) -> String {
    if !uri.starts_with('/') {
        return uri;
    }
    match headers.get("Host") {
        Some(host) => format!("http://{host}{uri}"),
        None => uri,
    }
}

/// Parse the embedded HTTP response of an operation part.
pub(crate) async fn build_response<S: ByteSource>(
    lr: &mut LineReader<S>,
    part_headers: &HeaderMap,
    settings: &BatchReaderSettings,
    delimiter: Bytes,
) -> Result<ResponseMetadata> {
    let start = first_significant_line(lr).await?;
    let status = parse_status_line(&start)?;
    let headers = parse_header_block(lr).await?;
    let content_id = operation_content_id(part_headers, &headers, settings);
    Ok(ResponseMetadata {
        status,
        headers,
        content_id,
        body: BodyDescriptor::MimeDelimited { delimiter },
    })
}

/// Locate the operation's `Content-ID`: MIME part headers first, then the
/// HTTP headers when the legacy location is allowed.
fn operation_content_id(
    part_headers: &HeaderMap,
    http_headers: &HeaderMap,
    settings: &BatchReaderSettings,
) -> Option<String> {
    part_headers
        .get(CONTENT_ID)
        .or_else(|| {
            settings
                .legacy_content_id()
                .then(|| http_headers.get(CONTENT_ID))
                .flatten()
        })
        .map(str::to_owned)
}
