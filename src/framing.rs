//! Line-oriented framing over a byte source.
//!
//! [`LineReader`] peels the multipart batch structure off the raw byte
//! stream: CRLF-delimited lines with a single line of rewindable lookahead,
//! boundary scanning that also recognises an enclosing batch boundary, and
//! delimiter-bounded body chunks for part payloads. The JSON driver uses the
//! byte-level accessors instead of the line accessors; the two families are
//! never mixed on one reader.

use bytes::{Bytes, BytesMut};
use log::debug;

use crate::{
    error::{BatchError, Result},
    source::ByteSource,
};

/// Cap on a single header or boundary line.
const MAX_LINE_LEN: usize = 16 * 1024;

/// Outcome of scanning for a boundary line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum BoundaryHit {
    /// `--boundary`: another part follows.
    Delimiter,
    /// `--boundary--`: the multipart body is complete.
    Terminator,
    /// The enclosing batch boundary appeared while scanning for the
    /// changeset boundary; the changeset end line is missing.
    ParentDelimiter,
    /// The enclosing batch terminator appeared while scanning for the
    /// changeset boundary.
    ParentTerminator,
}

/// One step of a delimiter-bounded body read.
#[derive(Debug)]
pub(crate) enum BodyChunk {
    /// Body bytes preceding the delimiter.
    Data(Bytes),
    /// The delimiter was reached; the reader is positioned at the
    /// boundary line.
    End,
}

/// Result of searching a buffer for a part delimiter.
enum DelimiterFind {
    /// Full, confirmed match at the offset.
    Match(usize),
    /// A prefix of the delimiter touches the end of the buffer; more
    /// bytes are needed to decide.
    Partial(usize),
    /// No trace of the delimiter.
    Absent,
}

/// Buffered, line-oriented reader over a [`ByteSource`].
pub(crate) struct LineReader<S> {
    source: S,
    buf: BytesMut,
    eof: bool,
    pushback: Option<Bytes>,
}

impl<S: ByteSource> LineReader<S> {
    pub(crate) fn new(source: S) -> Self {
        Self {
            source,
            buf: BytesMut::with_capacity(8 * 1024),
            eof: false,
            pushback: None,
        }
    }

    /// Pull more bytes from the source. Returns `false` at end of input.
    async fn fill_more(&mut self) -> Result<bool> {
        if self.eof {
            return Ok(false);
        }
        let n = self.source.fill(&mut self.buf).await?;
        if n == 0 {
            self.eof = true;
        }
        Ok(n > 0)
    }

    /// Read the next line, without its terminator.
    ///
    /// Lines are CRLF-delimited; a bare LF is tolerated. Returns `None`
    /// once the source is exhausted.
    pub(crate) async fn read_line(&mut self) -> Result<Option<Bytes>> {
        if let Some(line) = self.pushback.take() {
            return Ok(Some(line));
        }
        loop {
            if let Some(idx) = self.buf.iter().position(|&b| b == b'\n') {
                let mut line = self.buf.split_to(idx + 1);
                line.truncate(idx);
                if line.last() == Some(&b'\r') {
                    line.truncate(line.len() - 1);
                }
                return Ok(Some(line.freeze()));
            }
            if self.buf.len() > MAX_LINE_LEN {
                return Err(BatchError::framing("line exceeds maximum length"));
            }
            if !self.fill_more().await? {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                // Final line without terminator.
                let mut line = self.buf.split_off(0);
                if line.last() == Some(&b'\r') {
                    line.truncate(line.len() - 1);
                }
                return Ok(Some(line.freeze()));
            }
        }
    }

    /// Read the next line and immediately rewind it.
    pub(crate) async fn peek_line(&mut self) -> Result<Option<Bytes>> {
        let line = self.read_line().await?;
        if let Some(line) = &line {
            self.pushback = Some(line.clone());
        }
        Ok(line)
    }

    /// Push a line back so the next [`read_line`](Self::read_line)
    /// returns it again.
    pub(crate) fn unread_line(&mut self, line: Bytes) {
        debug_assert!(self.pushback.is_none(), "single line of lookahead");
        self.pushback = Some(line);
    }

    /// Discard lines until a boundary of the current (or enclosing)
    /// multipart body is found.
    ///
    /// Any preamble or stray body bytes before the boundary are dropped.
    pub(crate) async fn skip_to_boundary(
        &mut self,
        boundary: &str,
        parent: Option<&str>,
    ) -> Result<BoundaryHit> {
        let mut discarded = 0usize;
        loop {
            let Some(line) = self.read_line().await? else {
                return Err(BatchError::framing(format!(
                    "end boundary for {boundary:?} not found before end of input"
                )));
            };
            if let Some(end) = classify_boundary_line(&line, boundary) {
                if discarded > 0 {
                    debug!("discarded {discarded} line(s) before boundary {boundary:?}");
                }
                return Ok(if end {
                    BoundaryHit::Terminator
                } else {
                    BoundaryHit::Delimiter
                });
            }
            if let Some(parent) = parent {
                if let Some(end) = classify_boundary_line(&line, parent) {
                    return Ok(if end {
                        BoundaryHit::ParentTerminator
                    } else {
                        BoundaryHit::ParentDelimiter
                    });
                }
            }
            discarded += 1;
        }
    }

    /// Read one step of a part body bounded by `\r\n--<boundary>`.
    ///
    /// `first` must be `true` until the first chunk has been produced; it
    /// lets an empty body that opens directly on the boundary line be
    /// recognised. After [`BodyChunk::End`] the reader is positioned at
    /// the start of the boundary line.
    pub(crate) async fn body_chunk(&mut self, delimiter: &[u8], first: bool) -> Result<BodyChunk> {
        debug_assert!(self.pushback.is_none());
        loop {
            // An empty body opens directly on the boundary line; the
            // header terminator already consumed the preceding CRLF.
            if first && self.buf.starts_with(&delimiter[2..]) {
                match self.buf.get(delimiter.len() - 2) {
                    Some(b'\r' | b'\n' | b'-' | b' ' | b'\t') => return Ok(BodyChunk::End),
                    Some(_) => {}
                    None if self.eof => return Ok(BodyChunk::End),
                    None => {
                        if !self.fill_more().await? {
                            return Ok(BodyChunk::End);
                        }
                        continue;
                    }
                }
            }
            match find_delimiter(&self.buf, delimiter) {
                DelimiterFind::Match(0) => {
                    // Consume the CRLF; the boundary line stays buffered.
                    let _ = self.buf.split_to(2);
                    return Ok(BodyChunk::End);
                }
                DelimiterFind::Match(pos) | DelimiterFind::Partial(pos) if pos > 0 => {
                    return Ok(BodyChunk::Data(self.buf.split_to(pos).freeze()));
                }
                DelimiterFind::Absent if self.buf.len() > delimiter.len() => {
                    let safe = self.buf.len() - (delimiter.len() - 1);
                    return Ok(BodyChunk::Data(self.buf.split_to(safe).freeze()));
                }
                _ => {}
            }
            if !self.fill_more().await? {
                return Err(BatchError::framing(
                    "part body truncated before its boundary",
                ));
            }
        }
    }

    /// Peek the next raw byte without consuming it.
    pub(crate) async fn peek_byte(&mut self) -> Result<Option<u8>> {
        debug_assert!(self.pushback.is_none());
        while self.buf.is_empty() {
            if !self.fill_more().await? {
                return Ok(None);
            }
        }
        Ok(Some(self.buf[0]))
    }

    /// Consume and return the next raw byte.
    pub(crate) async fn next_byte(&mut self) -> Result<Option<u8>> {
        let byte = self.peek_byte().await?;
        if byte.is_some() {
            let _ = self.buf.split_to(1);
        }
        Ok(byte)
    }
}

/// Classify `line` against `--<boundary>` / `--<boundary>--`.
///
/// Trailing transport padding (spaces and tabs) is ignored.
fn classify_boundary_line(line: &[u8], boundary: &str) -> Option<bool> {
    let mut end = line.len();
    while end > 0 && (line[end - 1] == b' ' || line[end - 1] == b'\t') {
        end -= 1;
    }
    let line = &line[..end];
    let rest = line.strip_prefix(b"--")?;
    let rest = rest.strip_prefix(boundary.as_bytes())?;
    match rest {
        b"" => Some(false),
        b"--" => Some(true),
        _ => None,
    }
}

/// Search `buf` for `delimiter`, requiring the byte after a match to be
/// one a boundary line can legally continue with.
fn find_delimiter(buf: &[u8], delimiter: &[u8]) -> DelimiterFind {
    let mut offset = 0;
    while offset < buf.len() {
        let Some(pos) = buf[offset..]
            .iter()
            .position(|&b| b == delimiter[0])
            .map(|p| p + offset)
        else {
            return DelimiterFind::Absent;
        };
        let tail = &buf[pos..];
        if tail.len() < delimiter.len() {
            if delimiter.starts_with(tail) {
                return DelimiterFind::Partial(pos);
            }
            offset = pos + 1;
            continue;
        }
        if !tail.starts_with(delimiter) {
            offset = pos + 1;
            continue;
        }
        match tail.get(delimiter.len()) {
            // End of buffer right after the match: could still be body
            // content that merely resembles the delimiter.
            None => return DelimiterFind::Partial(pos),
            Some(b'\r' | b'\n' | b'-' | b' ' | b'\t') => return DelimiterFind::Match(pos),
            Some(_) => offset = pos + 1,
        }
    }
    DelimiterFind::Absent
}
