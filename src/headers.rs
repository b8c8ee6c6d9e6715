//! Header block parsing and the case-insensitive header map.
//!
//! Covers the MIME part headers and the embedded HTTP message headers of a
//! batch operation: `Name: Value` lines up to a blank line, ASCII
//! case-insensitive names, comma-concatenation for repeated multi-value
//! headers, and strict single-occurrence rules for the headers the batch
//! format itself consumes.

use crate::{
    error::{BatchError, Result},
    framing::LineReader,
    source::ByteSource,
};

/// `Content-Type` header name.
pub const CONTENT_TYPE: &str = "Content-Type";

/// `Content-ID` header name.
pub const CONTENT_ID: &str = "Content-ID";

/// `Content-Transfer-Encoding` header name.
pub const CONTENT_TRANSFER_ENCODING: &str = "Content-Transfer-Encoding";

/// Headers that may appear at most once in a header block.
const SINGLE_VALUE: &[&str] = &[CONTENT_ID, CONTENT_TYPE, CONTENT_TRANSFER_ENCODING];

/// Insertion-ordered, ASCII case-insensitive header map.
///
/// Repeated multi-value headers are concatenated with `, ` into a single
/// entry, so lookup always yields the full field value.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HeaderMap {
    entries: Vec<(String, String)>,
}

impl HeaderMap {
    /// Create an empty map.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Append a header, concatenating repeated names with a comma.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        if let Some((_, existing)) = self
            .entries
            .iter_mut()
            .find(|(n, _)| n.eq_ignore_ascii_case(&name))
        {
            existing.push_str(", ");
            existing.push_str(&value);
        } else {
            self.entries.push((name, value));
        }
    }

    /// Look up a header value by case-insensitive name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Whether the map contains `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool { self.get(name).is_some() }

    /// Number of distinct header names.
    #[must_use]
    pub fn len(&self) -> usize { self.entries.len() }

    /// Whether the map holds no headers.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    /// Iterate the headers in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }
}

/// Parse a header block terminated by a blank line.
///
/// Fails when the block is truncated, a line lacks a colon, or a
/// single-occurrence header repeats.
pub(crate) async fn parse_header_block<S: ByteSource>(
    reader: &mut LineReader<S>,
) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    loop {
        let Some(line) = reader.read_line().await? else {
            return Err(BatchError::framing("header block truncated"));
        };
        if line.is_empty() {
            return Ok(headers);
        }
        let line = std::str::from_utf8(&line)
            .map_err(|_| BatchError::framing("header line is not valid UTF-8"))?;
        let Some((name, value)) = line.split_once(':') else {
            return Err(BatchError::framing(format!(
                "header line {line:?} has no colon"
            )));
        };
        let name = name.trim();
        let value = value.trim();
        if name.is_empty() {
            return Err(BatchError::framing("header line has an empty name"));
        }
        if SINGLE_VALUE.iter().any(|h| h.eq_ignore_ascii_case(name)) && headers.contains(name) {
            return Err(BatchError::framing(format!(
                "header {name:?} may not be repeated"
            )));
        }
        headers.append(name, value);
    }
}

/// Decoded `Content-Type` field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContentType {
    media_type: String,
    boundary: Option<String>,
}

impl ContentType {
    /// The lowercased `type/subtype` pair.
    #[must_use]
    pub fn media_type(&self) -> &str { &self.media_type }

    /// The `boundary` parameter, when present.
    #[must_use]
    pub fn boundary(&self) -> Option<&str> { self.boundary.as_deref() }

    /// Whether this is a `multipart/mixed` payload.
    #[must_use]
    pub fn is_multipart_mixed(&self) -> bool { self.media_type == "multipart/mixed" }

    /// Whether this is an embedded HTTP message part.
    #[must_use]
    pub fn is_application_http(&self) -> bool { self.media_type == "application/http" }

    /// Whether this is a JSON payload.
    #[must_use]
    pub fn is_json(&self) -> bool {
        self.media_type.ends_with("/json") || self.media_type.ends_with("+json")
    }

    /// Whether the payload is textual (safe to expose string bodies raw).
    #[must_use]
    pub fn is_textual(&self) -> bool {
        self.media_type.starts_with("text/") || self.is_json() || self.media_type.ends_with("/xml")
    }
}

/// Parse a `Content-Type` value into its media type and `boundary`
/// parameter.
pub fn parse_content_type(value: &str) -> Result<ContentType> {
    let mut parts = value.split(';');
    let media_type = parts
        .next()
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .ok_or_else(|| BatchError::framing("empty Content-Type"))?
        .to_ascii_lowercase();
    let mut boundary = None;
    for param in parts {
        let param = param.trim();
        if param.is_empty() {
            continue;
        }
        let Some((name, raw)) = param.split_once('=') else {
            return Err(BatchError::framing(format!(
                "malformed Content-Type parameter {param:?}"
            )));
        };
        if name.trim().eq_ignore_ascii_case("boundary") {
            let raw = raw.trim();
            let unquoted = raw
                .strip_prefix('"')
                .and_then(|r| r.strip_suffix('"'))
                .unwrap_or(raw);
            if unquoted.is_empty() {
                return Err(BatchError::framing("empty boundary parameter"));
            }
            boundary = Some(unquoted.to_owned());
        }
    }
    Ok(ContentType {
        media_type,
        boundary,
    })
}

/// Enforce the batch constraint on `Content-Transfer-Encoding`.
///
/// Only `binary` and `8bit` are permitted; anything else (base64, quoted
/// printable) cannot be streamed verbatim.
pub(crate) fn check_transfer_encoding(headers: &HeaderMap) -> Result<()> {
    match headers.get(CONTENT_TRANSFER_ENCODING) {
        None => Ok(()),
        Some(value) if value.eq_ignore_ascii_case("binary") || value.eq_ignore_ascii_case("8bit") => {
            Ok(())
        }
        Some(value) => Err(BatchError::framing(format!(
            "unsupported Content-Transfer-Encoding {value:?}"
        ))),
    }
}

#[cfg(test)]
mod tests;
