//! JSON batch driver.
//!
//! A JSON batch is a single object whose first property is a `requests` or
//! `responses` array. The driver scans the array one element at a time —
//! exactly one element of lookahead, never more — buffering each into a
//! property cache, and synthesizes the changeset event stream from the
//! elements' `atomicityGroup` keys. `serde_json` does the per-element
//! tokenisation; the byte-level array walk stays in this module so the
//! payload is never buffered whole.

use bytes::Bytes;
use log::debug;
use serde_json::Value;

use crate::{
    error::{BatchError, Result},
    framing::LineReader,
    groups::GroupTracker,
    headers::{parse_content_type, HeaderMap, CONTENT_TYPE},
    http::Method,
    message::{BodyDescriptor, RequestMetadata, ResponseMetadata},
    reader::{PayloadKind, PendingOperation, ReaderState, StepEvent},
    resolver::{resolve_operation_uri, UrlResolver},
    settings::BatchReaderSettings,
    source::ByteSource,
};

/// Recognised properties of one `requests` array element.
#[derive(Debug, Default)]
pub(crate) struct RequestProperties {
    pub id: Option<String>,
    pub method: Option<String>,
    pub url: Option<String>,
    pub group: Option<String>,
    pub depends_on: Option<Vec<String>>,
    pub headers: HeaderMap,
    pub body: Option<Value>,
}

/// Recognised properties of one `responses` array element.
#[derive(Debug, Default)]
pub(crate) struct ResponseProperties {
    pub id: Option<String>,
    pub status: Option<u16>,
    pub headers: HeaderMap,
    pub body: Option<Value>,
}

/// One buffered array element, typed by payload kind.
enum ElementCache {
    Request(RequestProperties),
    Response(ResponseProperties),
}

impl ElementCache {
    fn group(&self) -> Option<&str> {
        match self {
            Self::Request(cache) => cache.group.as_deref(),
            Self::Response(_) => None,
        }
    }

    fn into_pending(self) -> PendingOperation {
        match self {
            Self::Request(cache) => PendingOperation::JsonRequest(cache),
            Self::Response(cache) => PendingOperation::JsonResponse(cache),
        }
    }
}

/// State machine for one JSON batch payload.
pub(crate) struct JsonDriver {
    kind: PayloadKind,
    first_element: bool,
    array_done: bool,
    stash: Option<ElementCache>,
    synth: u32,
}

impl JsonDriver {
    pub(crate) fn new(kind: PayloadKind) -> Self {
        Self {
            kind,
            first_element: true,
            array_done: false,
            stash: None,
            synth: 0,
        }
    }

    /// Drive one state transition.
    pub(crate) async fn step<S: ByteSource>(
        &mut self,
        lr: &mut LineReader<S>,
        groups: &mut GroupTracker,
        state: ReaderState,
    ) -> Result<StepEvent> {
        match state {
            ReaderState::Initial => {
                self.read_preamble(lr).await?;
                match self.scan_next(lr).await? {
                    None => Ok(StepEvent::Completed),
                    Some(cache) => self.classify_scanned(groups, cache),
                }
            }
            ReaderState::ChangesetStart => {
                let cache = self
                    .stash
                    .take()
                    .unwrap_or_else(|| unreachable!("changeset start always stashes its opener"));
                Ok(StepEvent::Operation {
                    pending: cache.into_pending(),
                    in_changeset: true,
                })
            }
            ReaderState::Operation => match self.scan_next(lr).await? {
                None => {
                    if groups.active().is_some() {
                        groups.close();
                        Ok(StepEvent::ChangesetEnd)
                    } else {
                        Ok(StepEvent::Completed)
                    }
                }
                Some(cache) => {
                    if groups.is_end(cache.group()) {
                        groups.close();
                        self.stash = Some(cache);
                        Ok(StepEvent::ChangesetEnd)
                    } else {
                        self.classify_scanned(groups, cache)
                    }
                }
            },
            ReaderState::ChangesetEnd => match self.stash.take() {
                None => Ok(StepEvent::Completed),
                Some(cache) => self.classify_scanned(groups, cache),
            },
            ReaderState::Completed | ReaderState::Exception => {
                unreachable!("façade never steps a finished reader")
            }
        }
    }

    /// Decide the event for a freshly scanned or restashed element: open a
    /// group, or yield it as an operation.
    fn classify_scanned(
        &mut self,
        groups: &mut GroupTracker,
        cache: ElementCache,
    ) -> Result<StepEvent> {
        match cache.group() {
            Some(group) if groups.active() != Some(group) => {
                groups.open(group)?;
                self.stash = Some(cache);
                Ok(StepEvent::ChangesetStart)
            }
            group => {
                let in_changeset = group.is_some();
                Ok(StepEvent::Operation {
                    pending: cache.into_pending(),
                    in_changeset,
                })
            }
        }
    }

    /// Consume `{ "requests": [` (or the response-side equivalent).
    async fn read_preamble<S: ByteSource>(&mut self, lr: &mut LineReader<S>) -> Result<()> {
        let expected = match self.kind {
            PayloadKind::Request => "requests",
            PayloadKind::Response => "responses",
        };
        expect_byte(lr, b'{', "the batch object").await?;
        skip_ws(lr).await?;
        if lr.peek_byte().await? == Some(b'}') {
            // An object with no properties at all fails the same way as a
            // wrong first property.
            return Err(BatchError::UnexpectedTopLevelProperty {
                name: String::new(),
            });
        }
        let name = read_json_string(lr).await?;
        if !name.eq_ignore_ascii_case(expected) {
            return Err(BatchError::UnexpectedTopLevelProperty { name });
        }
        expect_byte(lr, b':', "a colon after the batch property").await?;
        expect_byte(lr, b'[', "the batch array").await?;
        Ok(())
    }

    /// Scan the next array element into a property cache, or detect the
    /// end of the array (and of the whole document).
    async fn scan_next<S: ByteSource>(
        &mut self,
        lr: &mut LineReader<S>,
    ) -> Result<Option<ElementCache>> {
        if self.array_done {
            return Ok(None);
        }
        skip_ws(lr).await?;
        match lr.peek_byte().await? {
            Some(b']') => {
                let _ = lr.next_byte().await?;
                finish_document(lr).await?;
                self.array_done = true;
                return Ok(None);
            }
            Some(b',') if !self.first_element => {
                let _ = lr.next_byte().await?;
            }
            Some(b'{') if self.first_element => {}
            Some(other) => {
                return Err(BatchError::framing(format!(
                    "expected next batch element, found {:?}",
                    other as char
                )));
            }
            None => return Err(BatchError::framing("batch array is unterminated")),
        }
        self.first_element = false;
        let raw = capture_element(lr).await?;
        let value: Value = serde_json::from_slice(&raw)?;
        let Value::Object(map) = value else {
            return Err(BatchError::framing("batch element must be a JSON object"));
        };
        let cache = match self.kind {
            PayloadKind::Request => ElementCache::Request(RequestProperties::from_map(map)?),
            PayloadKind::Response => {
                let mut cache = ResponseProperties::from_map(map)?;
                if cache.id.is_none() {
                    self.synth += 1;
                    cache.id = Some(format!("synthesized-{}", self.synth));
                }
                ElementCache::Response(cache)
            }
        };
        Ok(Some(cache))
    }
}

impl RequestProperties {
    fn from_map(map: serde_json::Map<String, Value>) -> Result<Self> {
        let mut cache = Self::default();
        for (name, value) in map {
            match name.to_ascii_lowercase().as_str() {
                "id" => cache.id = Some(string_property(&name, value)?),
                "method" => cache.method = Some(string_property(&name, value)?),
                "url" => cache.url = Some(string_property(&name, value)?),
                "atomicitygroup" => cache.group = Some(string_property(&name, value)?),
                "dependson" => cache.depends_on = Some(string_array_property(&name, value)?),
                "headers" => cache.headers = headers_property(&name, value)?,
                "body" => cache.body = Some(value),
                _ => debug!("ignoring unknown batch request property {name:?}"),
            }
        }
        Ok(cache)
    }
}

impl ResponseProperties {
    fn from_map(map: serde_json::Map<String, Value>) -> Result<Self> {
        let mut cache = Self::default();
        for (name, value) in map {
            match name.to_ascii_lowercase().as_str() {
                "id" => cache.id = Some(string_property(&name, value)?),
                "status" => cache.status = Some(status_property(value)?),
                "headers" => cache.headers = headers_property(&name, value)?,
                "body" => cache.body = Some(value),
                _ => debug!("ignoring unknown batch response property {name:?}"),
            }
        }
        Ok(cache)
    }
}

fn string_property(name: &str, value: Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s),
        _ => Err(BatchError::framing(format!(
            "batch property {name:?} must be a string"
        ))),
    }
}

fn string_array_property(name: &str, value: Value) -> Result<Vec<String>> {
    let Value::Array(items) = value else {
        return Err(BatchError::framing(format!(
            "batch property {name:?} must be an array of strings"
        )));
    };
    items
        .into_iter()
        .map(|item| string_property(name, item))
        .collect()
}

fn headers_property(name: &str, value: Value) -> Result<HeaderMap> {
    let Value::Object(map) = value else {
        return Err(BatchError::framing(format!(
            "batch property {name:?} must be an object"
        )));
    };
    let mut headers = HeaderMap::new();
    for (header, value) in map {
        let Value::String(value) = value else {
            return Err(BatchError::framing(format!(
                "header {header:?} must have a string value"
            )));
        };
        headers.append(header, value);
    }
    Ok(headers)
}

fn status_property(value: Value) -> Result<u16> {
    value
        .as_i64()
        .and_then(|status| u16::try_from(status).ok())
        .ok_or_else(|| BatchError::framing("batch property \"status\" must be an HTTP status code"))
}

/// Finalise a scanned request element into operation metadata.
///
/// All the `dependsOn` and uniqueness rules fire here, when the caller
/// creates the operation message.
pub(crate) fn build_request(
    cache: RequestProperties,
    groups: &mut GroupTracker,
    resolver: &UrlResolver,
    settings: &BatchReaderSettings,
) -> Result<RequestMetadata> {
    let id = cache.id.ok_or(BatchError::MissingRequiredProperty { name: "id" })?;
    let method = cache
        .method
        .ok_or(BatchError::MissingRequiredProperty { name: "method" })?;
    let url = cache.url.ok_or(BatchError::MissingRequiredProperty { name: "url" })?;
    let method = Method::parse_insensitive(&method)?;
    let group = cache.group.as_deref();
    groups.record(&id, group)?;
    let depends_on = match &cache.depends_on {
        Some(list) if !list.is_empty() => groups.flatten(&id, group, list)?,
        _ => Vec::new(),
    };
    let uri = resolve_operation_uri(&url, resolver, group.is_some(), settings.base())?;
    let body = body_descriptor(cache.body, &cache.headers);
    Ok(RequestMetadata {
        method,
        uri,
        headers: cache.headers,
        content_id: Some(id),
        depends_on,
        body,
    })
}

/// Finalise a scanned response element into operation metadata.
pub(crate) fn build_response(cache: ResponseProperties) -> Result<ResponseMetadata> {
    let status = cache
        .status
        .ok_or(BatchError::MissingRequiredProperty { name: "status" })?;
    let body = body_descriptor(cache.body, &cache.headers);
    Ok(ResponseMetadata {
        status,
        headers: cache.headers,
        content_id: cache.id,
        body,
    })
}

/// Decide how a JSON `body` value is exposed: raw bytes for a string body
/// under a textual content type, otherwise a serialized JSON snapshot.
fn body_descriptor(body: Option<Value>, headers: &HeaderMap) -> BodyDescriptor {
    match body {
        None => BodyDescriptor::Empty,
        Some(Value::String(text)) if textual_content(headers) => {
            BodyDescriptor::Captured(Bytes::from(text.into_bytes()))
        }
        Some(value) => BodyDescriptor::JsonValue(value),
    }
}

fn textual_content(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|value| parse_content_type(value).ok())
        .is_some_and(|content_type| content_type.is_textual())
}

async fn skip_ws<S: ByteSource>(lr: &mut LineReader<S>) -> Result<()> {
    while let Some(byte) = lr.peek_byte().await? {
        if matches!(byte, b' ' | b'\t' | b'\r' | b'\n') {
            let _ = lr.next_byte().await?;
        } else {
            break;
        }
    }
    Ok(())
}

async fn expect_byte<S: ByteSource>(lr: &mut LineReader<S>, expected: u8, what: &str) -> Result<()> {
    skip_ws(lr).await?;
    match lr.next_byte().await? {
        Some(byte) if byte == expected => Ok(()),
        Some(byte) => Err(BatchError::framing(format!(
            "expected {what}, found {:?}",
            byte as char
        ))),
        None => Err(BatchError::framing(format!(
            "expected {what}, found end of input"
        ))),
    }
}

/// Read a JSON string, handing escape decoding to `serde_json`.
async fn read_json_string<S: ByteSource>(lr: &mut LineReader<S>) -> Result<String> {
    skip_ws(lr).await?;
    let mut raw = Vec::new();
    match lr.next_byte().await? {
        Some(b'"') => raw.push(b'"'),
        _ => return Err(BatchError::framing("expected a JSON string")),
    }
    let mut escaped = false;
    loop {
        let Some(byte) = lr.next_byte().await? else {
            return Err(BatchError::framing("unterminated JSON string"));
        };
        raw.push(byte);
        if escaped {
            escaped = false;
        } else if byte == b'\\' {
            escaped = true;
        } else if byte == b'"' {
            break;
        }
    }
    Ok(serde_json::from_slice(&raw)?)
}

/// Capture one balanced JSON object, raw.
async fn capture_element<S: ByteSource>(lr: &mut LineReader<S>) -> Result<Vec<u8>> {
    skip_ws(lr).await?;
    if lr.peek_byte().await? != Some(b'{') {
        return Err(BatchError::framing("batch element must be a JSON object"));
    }
    let mut raw = Vec::new();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    loop {
        let Some(byte) = lr.next_byte().await? else {
            return Err(BatchError::framing("batch element is unterminated"));
        };
        raw.push(byte);
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
        } else {
            match byte {
                b'"' => in_string = true,
                b'{' | b'[' => depth += 1,
                b'}' | b']' => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(raw);
                    }
                }
                _ => {}
            }
        }
    }
}

/// Consume the closing `}` of the batch object and verify nothing else
/// follows.
async fn finish_document<S: ByteSource>(lr: &mut LineReader<S>) -> Result<()> {
    skip_ws(lr).await?;
    match lr.next_byte().await? {
        Some(b'}') => {}
        Some(b',') => {
            let name = read_json_string(lr).await?;
            return Err(BatchError::UnexpectedTopLevelProperty { name });
        }
        _ => return Err(BatchError::framing("batch object is unterminated")),
    }
    skip_ws(lr).await?;
    if lr.peek_byte().await?.is_some() {
        return Err(BatchError::framing("trailing data after the batch object"));
    }
    Ok(())
}
