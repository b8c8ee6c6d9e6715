//! Byte sources feeding the reader.
//!
//! The reader pulls its input through the [`ByteSource`] seam so the same
//! state machine runs against a live socket, an in-memory payload, or a
//! blocking `std::io::Read`. All suspension points in the crate occur inside
//! [`ByteSource::fill`]; the state machine itself never parks between
//! transitions.

use std::io;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Pull-based supplier of payload bytes.
#[async_trait]
pub trait ByteSource: Send {
    /// Append more bytes to `buf`, returning how many were added.
    ///
    /// A return of `Ok(0)` signals end of input.
    ///
    /// # Errors
    ///
    /// Returns an `io::Error` when the underlying transport fails.
    async fn fill(&mut self, buf: &mut BytesMut) -> io::Result<usize>;
}

/// Adapter over any [`AsyncRead`] transport.
pub struct AsyncSource<R> {
    inner: R,
}

impl<R> AsyncSource<R> {
    /// Wrap an asynchronous reader.
    pub fn new(inner: R) -> Self { Self { inner } }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> ByteSource for AsyncSource<R> {
    async fn fill(&mut self, buf: &mut BytesMut) -> io::Result<usize> {
        self.inner.read_buf(buf).await
    }
}

/// In-memory source serving a fixed payload.
///
/// Serves the payload in configurable chunks so tests can exercise
/// arbitrary caller pacing and split points.
pub struct SliceSource {
    data: Bytes,
    chunk: usize,
}

impl SliceSource {
    /// Wrap a complete payload, served in one chunk.
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            chunk: usize::MAX,
        }
    }

    /// Limit each [`fill`](ByteSource::fill) call to at most `chunk` bytes.
    #[must_use]
    pub fn chunked(mut self, chunk: usize) -> Self {
        self.chunk = chunk.max(1);
        self
    }
}

impl From<&str> for SliceSource {
    fn from(value: &str) -> Self { Self::new(Bytes::copy_from_slice(value.as_bytes())) }
}

impl From<Vec<u8>> for SliceSource {
    fn from(value: Vec<u8>) -> Self { Self::new(Bytes::from(value)) }
}

#[async_trait]
impl ByteSource for SliceSource {
    async fn fill(&mut self, buf: &mut BytesMut) -> io::Result<usize> {
        if self.data.is_empty() {
            return Ok(0);
        }
        let take = self.chunk.min(self.data.len());
        let chunk = self.data.split_to(take);
        buf.extend_from_slice(&chunk);
        Ok(take)
    }
}

/// Source over a blocking `std::io::Read`.
///
/// `fill` completes without suspending, which is what lets the
/// [`blocking`](crate::blocking) façade drive the async core with a plain
/// executor.
pub struct ReadSource<R> {
    inner: R,
    scratch: Vec<u8>,
}

impl<R: io::Read> ReadSource<R> {
    /// Wrap a blocking reader.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            scratch: vec![0; 8 * 1024],
        }
    }
}

#[async_trait]
impl<R: io::Read + Send> ByteSource for ReadSource<R> {
    async fn fill(&mut self, buf: &mut BytesMut) -> io::Result<usize> {
        let n = self.inner.read(&mut self.scratch)?;
        buf.extend_from_slice(&self.scratch[..n]);
        Ok(n)
    }
}
