//! Blocking façade over the asynchronous reader.
//!
//! The state machine is shared with the async API; the only suspension
//! points sit inside [`ByteSource::fill`](crate::ByteSource::fill), and a
//! [`ReadSource`] completes those synchronously, so driving the futures
//! with a plain executor never parks the thread against anything but the
//! underlying `Read`.

use std::io;

use bytes::Bytes;
use futures::executor::block_on;

use crate::{
    headers::HeaderMap,
    http::Method,
    reader::{PayloadKind, ReaderState},
    settings::BatchReaderSettings,
    source::ReadSource,
    Result,
};

/// Blocking counterpart of [`crate::BatchReader`].
pub struct BatchReader<R: io::Read + Send> {
    inner: crate::BatchReader<ReadSource<R>>,
}

impl<R: io::Read + Send> BatchReader<R> {
    /// Open a reader over a request batch.
    ///
    /// # Errors
    ///
    /// Fails when the content type is not a supported batch format.
    pub fn open_request(
        source: R,
        content_type: &str,
        settings: BatchReaderSettings,
    ) -> Result<Self> {
        Ok(Self {
            inner: crate::BatchReader::open_request(
                ReadSource::new(source),
                content_type,
                settings,
            )?,
        })
    }

    /// Open a reader over a response batch.
    ///
    /// # Errors
    ///
    /// Fails when the content type is not a supported batch format.
    pub fn open_response(
        source: R,
        content_type: &str,
        settings: BatchReaderSettings,
    ) -> Result<Self> {
        Ok(Self {
            inner: crate::BatchReader::open_response(
                ReadSource::new(source),
                content_type,
                settings,
            )?,
        })
    }

    /// Move to the next state, blocking on the underlying reader.
    ///
    /// # Errors
    ///
    /// See [`crate::BatchReader::advance`].
    pub fn advance(&mut self) -> Result<bool> { block_on(self.inner.advance()) }

    /// Current reader state.
    #[must_use]
    pub fn state(&self) -> ReaderState { self.inner.state() }

    /// Whether this reader yields requests or responses.
    #[must_use]
    pub fn kind(&self) -> PayloadKind { self.inner.kind() }

    /// Create the request message for the current operation.
    ///
    /// # Errors
    ///
    /// See [`crate::BatchReader::create_operation_request`].
    pub fn create_operation_request(&mut self) -> Result<OperationRequestMessage<'_, R>> {
        Ok(OperationRequestMessage {
            inner: block_on(self.inner.create_operation_request())?,
        })
    }

    /// Create the response message for the current operation.
    ///
    /// # Errors
    ///
    /// See [`crate::BatchReader::create_operation_response`].
    pub fn create_operation_response(&mut self) -> Result<OperationResponseMessage<'_, R>> {
        Ok(OperationResponseMessage {
            inner: block_on(self.inner.create_operation_response())?,
        })
    }
}

/// Blocking counterpart of [`crate::OperationRequestMessage`].
pub struct OperationRequestMessage<'r, R: io::Read + Send> {
    inner: crate::OperationRequestMessage<'r, ReadSource<R>>,
}

impl<R: io::Read + Send> OperationRequestMessage<'_, R> {
    /// The request method.
    #[must_use]
    pub fn method(&self) -> Method { self.inner.method() }

    /// The request URI, with any `$id` reference already resolved.
    #[must_use]
    pub fn uri(&self) -> &str { self.inner.uri() }

    /// Headers of the embedded HTTP request.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap { self.inner.headers() }

    /// The operation's content id, when one was declared.
    #[must_use]
    pub fn content_id(&self) -> Option<&str> { self.inner.content_id() }

    /// Flattened `dependsOn` list.
    #[must_use]
    pub fn depends_on(&self) -> &[String] { self.inner.depends_on() }

    /// Open the bounded body stream.
    ///
    /// # Errors
    ///
    /// See [`crate::OperationRequestMessage::open_body`].
    pub fn open_body(&mut self) -> Result<BodyStream<'_, R>> {
        Ok(BodyStream {
            inner: self.inner.open_body()?,
        })
    }
}

/// Blocking counterpart of [`crate::OperationResponseMessage`].
pub struct OperationResponseMessage<'r, R: io::Read + Send> {
    inner: crate::OperationResponseMessage<'r, ReadSource<R>>,
}

impl<R: io::Read + Send> OperationResponseMessage<'_, R> {
    /// The response status code.
    #[must_use]
    pub fn status(&self) -> u16 { self.inner.status() }

    /// Headers of the embedded HTTP response.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap { self.inner.headers() }

    /// The content id correlating this response to its request.
    #[must_use]
    pub fn content_id(&self) -> Option<&str> { self.inner.content_id() }

    /// Open the bounded body stream.
    ///
    /// # Errors
    ///
    /// See [`crate::OperationResponseMessage::open_body`].
    pub fn open_body(&mut self) -> Result<BodyStream<'_, R>> {
        Ok(BodyStream {
            inner: self.inner.open_body()?,
        })
    }
}

/// Blocking counterpart of [`crate::BodyStream`].
pub struct BodyStream<'r, R: io::Read + Send> {
    inner: crate::BodyStream<'r, ReadSource<R>>,
}

impl<R: io::Read + Send> BodyStream<'_, R> {
    /// Pull the next chunk of body bytes. `None` signals the end.
    ///
    /// # Errors
    ///
    /// See [`crate::BodyStream::chunk`].
    pub fn chunk(&mut self) -> Result<Option<Bytes>> { block_on(self.inner.chunk()) }

    /// Drain the stream into a single buffer.
    ///
    /// # Errors
    ///
    /// Propagates the first failed read.
    pub fn read_to_end(&mut self) -> Result<Vec<u8>> { block_on(self.inner.read_to_end()) }
}
