//! Per-operation request and response messages.
//!
//! An operation message is created from the reader while it sits in the
//! `Operation` state. The message owns the operation's metadata (start
//! line, headers, cross-reference data) and borrows the reader for the
//! body: at most one body stream is alive at a time, which the borrow
//! checker enforces on top of the reader's own sub-state tracking.

use bytes::Bytes;

use crate::{
    error::{BatchError, Result},
    framing::{BodyChunk, LineReader},
    headers::HeaderMap,
    http::Method,
    reader::{BatchReader, OperationSubState},
    source::ByteSource,
};

/// Where an operation's body bytes come from.
#[derive(Debug)]
pub(crate) enum BodyDescriptor {
    /// No body.
    Empty,
    /// MIME part body, bounded by the part delimiter.
    MimeDelimited {
        /// `\r\n--<boundary>` of the innermost enclosing multipart body.
        delimiter: Bytes,
    },
    /// Raw bytes captured from a JSON string body.
    Captured(Bytes),
    /// JSON `body` subtree, serialized to UTF-8 when the stream is read.
    JsonValue(serde_json::Value),
}

/// Metadata of a batch sub-request.
#[derive(Debug)]
pub(crate) struct RequestMetadata {
    pub method: Method,
    pub uri: String,
    pub headers: HeaderMap,
    pub content_id: Option<String>,
    pub depends_on: Vec<String>,
    pub body: BodyDescriptor,
}

/// Metadata of a batch sub-response.
#[derive(Debug)]
pub(crate) struct ResponseMetadata {
    pub status: u16,
    pub headers: HeaderMap,
    pub content_id: Option<String>,
    pub body: BodyDescriptor,
}

/// A single sub-request yielded at an `Operation` state.
pub struct OperationRequestMessage<'r, S: ByteSource> {
    meta: RequestMetadata,
    reader: &'r mut BatchReader<S>,
}

impl<S: ByteSource> std::fmt::Debug for OperationRequestMessage<'_, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationRequestMessage")
            .field("meta", &self.meta)
            .finish()
    }
}

impl<'r, S: ByteSource> OperationRequestMessage<'r, S> {
    pub(crate) fn new(meta: RequestMetadata, reader: &'r mut BatchReader<S>) -> Self {
        Self { meta, reader }
    }

    /// The request method.
    #[must_use]
    pub fn method(&self) -> Method { self.meta.method }

    /// The request URI, with any `$id` reference already resolved.
    #[must_use]
    pub fn uri(&self) -> &str { &self.meta.uri }

    /// Headers of the embedded HTTP request.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap { &self.meta.headers }

    /// The operation's content id, when one was declared.
    #[must_use]
    pub fn content_id(&self) -> Option<&str> { self.meta.content_id.as_deref() }

    /// Flattened `dependsOn` list: prior request ids only, never groups.
    #[must_use]
    pub fn depends_on(&self) -> &[String] { &self.meta.depends_on }

    /// Open the bounded body stream. May be called once per operation.
    ///
    /// # Errors
    ///
    /// Fails with [`BatchError::InvalidReaderState`] when the body was
    /// already requested.
    pub fn open_body(&mut self) -> Result<BodyStream<'_, S>> {
        let body = std::mem::replace(&mut self.meta.body, BodyDescriptor::Empty);
        open_stream(self.reader, body)
    }
}

/// A single sub-response yielded at an `Operation` state.
pub struct OperationResponseMessage<'r, S: ByteSource> {
    meta: ResponseMetadata,
    reader: &'r mut BatchReader<S>,
}

impl<'r, S: ByteSource> OperationResponseMessage<'r, S> {
    pub(crate) fn new(meta: ResponseMetadata, reader: &'r mut BatchReader<S>) -> Self {
        Self { meta, reader }
    }

    /// The response status code.
    #[must_use]
    pub fn status(&self) -> u16 { self.meta.status }

    /// Headers of the embedded HTTP response.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap { &self.meta.headers }

    /// The content id correlating this response to its request, when
    /// present. Never registered with the URL resolver.
    #[must_use]
    pub fn content_id(&self) -> Option<&str> { self.meta.content_id.as_deref() }

    /// Open the bounded body stream. May be called once per operation.
    ///
    /// # Errors
    ///
    /// Fails with [`BatchError::InvalidReaderState`] when the body was
    /// already requested.
    pub fn open_body(&mut self) -> Result<BodyStream<'_, S>> {
        let body = std::mem::replace(&mut self.meta.body, BodyDescriptor::Empty);
        open_stream(self.reader, body)
    }
}

fn open_stream<'m, S: ByteSource>(
    reader: &'m mut BatchReader<S>,
    body: BodyDescriptor,
) -> Result<BodyStream<'m, S>> {
    reader.begin_stream()?;
    let body = match body {
        BodyDescriptor::JsonValue(value) => {
            BodyDescriptor::Captured(Bytes::from(reader.serialize_body(&value)?))
        }
        other => other,
    };
    let (line_reader, substate) = reader.stream_parts();
    let kind = match body {
        BodyDescriptor::Empty => BodyKind::Empty,
        BodyDescriptor::MimeDelimited { delimiter } => BodyKind::Mime {
            reader: line_reader,
            delimiter,
            first: true,
        },
        BodyDescriptor::Captured(data) => BodyKind::Replay { data },
        BodyDescriptor::JsonValue(_) => unreachable!("serialized above"),
    };
    Ok(BodyStream {
        kind,
        substate,
        poisoned: false,
        finished: false,
    })
}

enum BodyKind<'r, S> {
    Empty,
    Mime {
        reader: &'r mut LineReader<S>,
        delimiter: Bytes,
        first: bool,
    },
    Replay {
        data: Bytes,
    },
}

/// Bounded view over one operation's body bytes.
///
/// For MIME parts the stream ends at the part delimiter and delivers the
/// body verbatim; for JSON operations it replays the captured `body`
/// value. Dropping the stream early is safe: the reader skips any
/// unconsumed remainder on the next advance.
pub struct BodyStream<'r, S: ByteSource> {
    kind: BodyKind<'r, S>,
    substate: &'r mut OperationSubState,
    poisoned: bool,
    finished: bool,
}

impl<S: ByteSource> BodyStream<'_, S> {
    /// Pull the next chunk of body bytes. `None` signals the end.
    ///
    /// # Errors
    ///
    /// Once a read fails, the stream is aborted and every further read
    /// fails with [`BatchError::StreamAborted`].
    pub async fn chunk(&mut self) -> Result<Option<Bytes>> {
        if self.poisoned {
            return Err(BatchError::StreamAborted);
        }
        if self.finished {
            return Ok(None);
        }
        match &mut self.kind {
            BodyKind::Empty => {
                self.finished = true;
                Ok(None)
            }
            BodyKind::Replay { data } => {
                self.finished = true;
                if data.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(data.split_to(data.len())))
                }
            }
            BodyKind::Mime {
                reader,
                delimiter,
                first,
            } => match reader.body_chunk(delimiter, *first).await {
                Ok(BodyChunk::Data(chunk)) => {
                    *first = false;
                    Ok(Some(chunk))
                }
                Ok(BodyChunk::End) => {
                    self.finished = true;
                    Ok(None)
                }
                Err(err) => {
                    self.poisoned = true;
                    Err(err)
                }
            },
        }
    }

    /// Drain the stream into a single buffer.
    ///
    /// # Errors
    ///
    /// Propagates the first failed read.
    pub async fn read_to_end(&mut self) -> Result<Vec<u8>> {
        let mut body = Vec::new();
        while let Some(chunk) = self.chunk().await? {
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }
}

impl<S: ByteSource> Drop for BodyStream<'_, S> {
    fn drop(&mut self) { *self.substate = OperationSubState::StreamDisposed; }
}
