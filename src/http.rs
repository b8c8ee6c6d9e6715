//! HTTP start-line parsing for embedded batch operations.
//!
//! Each `application/http` part carries exactly one request or response
//! message. Only the literal `HTTP/1.1` version is accepted, and request
//! URIs may themselves contain spaces, so the request line is split on its
//! first and last space rather than whitespace-tokenised.

use crate::error::{BatchError, Result};

/// HTTP version literal required on every start line.
const HTTP_VERSION: &str = "HTTP/1.1";

/// Recognised HTTP methods for batch operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Method {
    /// `GET`
    Get,
    /// `HEAD`
    Head,
    /// `POST`
    Post,
    /// `PUT`
    Put,
    /// `PATCH`
    Patch,
    /// `DELETE`
    Delete,
    /// `MERGE` (legacy OData update)
    Merge,
}

impl Method {
    /// Parse an exact uppercase method token.
    pub fn parse(token: &str) -> Result<Self> {
        match token {
            "GET" => Ok(Self::Get),
            "HEAD" => Ok(Self::Head),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            "MERGE" => Ok(Self::Merge),
            _ => Err(BatchError::InvalidHttpMethod {
                method: token.to_owned(),
            }),
        }
    }

    /// Parse a method token of any case, as JSON batch payloads permit.
    pub fn parse_insensitive(token: &str) -> Result<Self> {
        Self::parse(token.to_ascii_uppercase().as_str())
    }

    /// Canonical uppercase token.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Merge => "MERGE",
        }
    }

    /// Whether this method only queries state (GET or HEAD).
    ///
    /// Query methods are excluded from changesets.
    #[must_use]
    pub const fn is_query(&self) -> bool { matches!(self, Self::Get | Self::Head) }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parse `METHOD SP URI SP HTTP/1.1`.
///
/// The URI is everything between the first and the last space, which lets
/// it legally contain spaces of its own.
pub(crate) fn parse_request_line(line: &str) -> Result<(Method, String)> {
    let invalid = || BatchError::InvalidRequestLine {
        line: line.to_owned(),
    };
    let (method, rest) = line.split_once(' ').ok_or_else(invalid)?;
    let (uri, version) = rest.rsplit_once(' ').ok_or_else(invalid)?;
    let uri = uri.trim();
    if method.is_empty() || uri.is_empty() {
        return Err(invalid());
    }
    if version != HTTP_VERSION {
        return Err(BatchError::InvalidHttpVersion {
            found: version.to_owned(),
        });
    }
    Ok((Method::parse(method)?, uri.to_owned()))
}

/// Parse `HTTP/1.1 SP status SP reason`.
///
/// The reason phrase may be empty or contain further spaces; only the
/// version and the integer status are significant.
pub(crate) fn parse_status_line(line: &str) -> Result<u16> {
    let invalid = || BatchError::InvalidResponseLine {
        line: line.to_owned(),
    };
    let (version, rest) = line.split_once(' ').ok_or_else(invalid)?;
    if version != HTTP_VERSION {
        return Err(BatchError::InvalidHttpVersion {
            found: version.to_owned(),
        });
    }
    let status = rest.split(' ').next().ok_or_else(invalid)?;
    status.parse::<u16>().map_err(|_| invalid())
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::{parse_request_line, parse_status_line, Method};
    use crate::BatchError;

    #[rstest]
    #[case::get("GET /Customers HTTP/1.1", Method::Get, "/Customers")]
    #[case::post_absolute(
        "POST https://host/svc/Orders HTTP/1.1",
        Method::Post,
        "https://host/svc/Orders"
    )]
    #[case::uri_with_spaces(
        "GET /Customers('a b') HTTP/1.1",
        Method::Get,
        "/Customers('a b')"
    )]
    #[case::reference("POST $1/Orders HTTP/1.1", Method::Post, "$1/Orders")]
    fn request_lines_parse(#[case] line: &str, #[case] method: Method, #[case] uri: &str) {
        let (m, u) = parse_request_line(line).unwrap();
        assert_eq!(m, method);
        assert_eq!(u, uri);
    }

    #[rstest]
    #[case::two_segments("GET /Customers")]
    #[case::empty("")]
    #[case::missing_uri("GET  HTTP/1.1")]
    fn malformed_request_lines_fail(#[case] line: &str) {
        assert!(matches!(
            parse_request_line(line).unwrap_err(),
            BatchError::InvalidRequestLine { .. }
        ));
    }

    #[test]
    fn wrong_version_fails() {
        assert!(matches!(
            parse_request_line("GET /x HTTP/1.0").unwrap_err(),
            BatchError::InvalidHttpVersion { found } if found == "HTTP/1.0"
        ));
    }

    #[test]
    fn lowercase_method_fails_in_mime() {
        assert!(matches!(
            parse_request_line("get /x HTTP/1.1").unwrap_err(),
            BatchError::InvalidHttpMethod { .. }
        ));
    }

    #[test]
    fn insensitive_parse_uppercases() {
        assert_eq!(Method::parse_insensitive("pAtCh").unwrap(), Method::Patch);
    }

    #[rstest]
    #[case::created("HTTP/1.1 201 Created", 201)]
    #[case::no_reason("HTTP/1.1 204 ", 204)]
    #[case::multiword_reason("HTTP/1.1 404 Not Found", 404)]
    fn status_lines_parse(#[case] line: &str, #[case] status: u16) {
        assert_eq!(parse_status_line(line).unwrap(), status);
    }

    #[rstest]
    #[case::not_a_number("HTTP/1.1 abc OK")]
    #[case::missing_status("HTTP/1.1")]
    fn malformed_status_lines_fail(#[case] line: &str) {
        let err = parse_status_line(line).unwrap_err();
        assert!(matches!(
            err,
            BatchError::InvalidResponseLine { .. } | BatchError::InvalidHttpVersion { .. }
        ));
    }
}
