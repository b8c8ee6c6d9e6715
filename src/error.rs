//! Canonical error and result types for the crate.
//!
//! Every failure the reader can surface is a [`BatchError`]. No error is
//! recovered internally: the façade intercepts it, transitions to the
//! terminal `Exception` state, and re-raises. The taxonomy keeps the parsing
//! layers decoupled from the state machine while surfacing precise
//! diagnostics for behavioural tests.

use thiserror::Error;

use crate::{http::Method, reader::ReaderState};

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, BatchError>;

/// Which quota a [`BatchError::QuotaExceeded`] refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QuotaScope {
    /// The per-batch part count (`max_parts_per_batch`).
    Batch,
    /// The per-changeset operation count (`max_operations_per_changeset`).
    Changeset,
}

impl std::fmt::Display for QuotaScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Batch => f.write_str("batch part"),
            Self::Changeset => f.write_str("changeset operation"),
        }
    }
}

/// Errors surfaced while reading an OData batch payload.
#[derive(Debug, Error)]
pub enum BatchError {
    /// The multipart framing is damaged: a boundary is missing, a header
    /// block is truncated, or a line terminator is malformed.
    #[error("malformed batch framing: {reason}")]
    MalformedFraming {
        /// Human-readable description of the framing defect.
        reason: String,
    },

    /// A request or response line used an HTTP version other than the
    /// literal `HTTP/1.1`.
    #[error("unsupported HTTP version {found:?}; batch operations must use HTTP/1.1")]
    InvalidHttpVersion {
        /// Version token found on the start line.
        found: String,
    },

    /// A request line did not consist of method, URI, and version segments.
    #[error("invalid request line {line:?}")]
    InvalidRequestLine {
        /// The offending line.
        line: String,
    },

    /// A response line did not consist of version, status, and reason
    /// segments, or its status code was not an integer.
    #[error("invalid response line {line:?}")]
    InvalidResponseLine {
        /// The offending line.
        line: String,
    },

    /// The request method is not in the recognised set.
    #[error("unrecognised HTTP method {method:?}")]
    InvalidHttpMethod {
        /// Method token found on the request line.
        method: String,
    },

    /// A query method (GET or HEAD) appeared inside a changeset.
    #[error("query method {method} is not allowed inside a changeset")]
    QueryMethodInChangeset {
        /// The query method that was used.
        method: Method,
    },

    /// A request inside a changeset carried no `Content-ID` header.
    #[error("request inside a changeset is missing a Content-ID header")]
    MissingContentId,

    /// The same content id was registered twice within the resolver's scope.
    #[error("duplicate Content-ID {id:?}")]
    DuplicateContentId {
        /// The repeated id.
        id: String,
    },

    /// A `multipart/mixed` part appeared inside a changeset.
    #[error("changesets cannot be nested")]
    NestedChangesetNotAllowed,

    /// The top-level JSON object held a property other than `requests` or
    /// `responses`.
    #[error("unexpected top-level property {name:?} in JSON batch")]
    UnexpectedTopLevelProperty {
        /// Name of the property that was found.
        name: String,
    },

    /// A JSON batch request lacked `id`, `method`, or `url`.
    #[error("JSON batch request is missing required property {name:?}")]
    MissingRequiredProperty {
        /// Name of the missing property.
        name: &'static str,
    },

    /// A request listed itself in `dependsOn`.
    #[error("request {id:?} cannot depend on itself")]
    SelfReference {
        /// Id of the request.
        id: String,
    },

    /// A request listed its own atomicity group in `dependsOn`.
    #[error("request {id:?} cannot depend on its own atomicity group {group:?}")]
    SelfGroupReference {
        /// Id of the request.
        id: String,
        /// The group both sides of the edge belong to.
        group: String,
    },

    /// A `dependsOn` entry named a request belonging to a different
    /// atomicity group; the group itself must be referenced instead.
    #[error(
        "dependsOn entry {id:?} names a request in group {group:?}; reference the group instead"
    )]
    MustReferenceGroup {
        /// Id of the referenced request.
        id: String,
        /// Group the referenced request belongs to.
        group: String,
    },

    /// A `dependsOn` entry named neither a prior request nor a prior group.
    #[error("dependsOn entry {reference:?} does not name any prior request or group")]
    ForwardReferenceNotAllowed {
        /// The unresolvable entry.
        reference: String,
    },

    /// A `$id` URI reference inside a changeset named an unregistered id.
    #[error("unresolved Content-ID reference {reference:?}")]
    UnresolvedContentId {
        /// The `$id` token that failed to resolve.
        reference: String,
    },

    /// A public call was made in a state that does not permit it.
    #[error("cannot {action} in reader state {state:?}")]
    InvalidReaderState {
        /// State the reader was in.
        state: ReaderState,
        /// The attempted action.
        action: &'static str,
    },

    /// A batch or changeset size limit was hit.
    #[error("quota exceeded: at most {limit} {scope}s are allowed")]
    QuotaExceeded {
        /// Which counter overflowed.
        scope: QuotaScope,
        /// The configured cap.
        limit: u32,
    },

    /// A body sub-stream was read after it had already failed.
    #[error("body stream aborted; no further reads are possible")]
    StreamAborted,

    /// The underlying byte source failed.
    #[error("I/O failure reading batch payload")]
    Io(#[from] std::io::Error),

    /// The JSON payload could not be tokenised.
    #[error("invalid JSON in batch payload")]
    InvalidJson(#[from] serde_json::Error),
}

impl BatchError {
    pub(crate) fn framing(reason: impl Into<String>) -> Self {
        Self::MalformedFraming {
            reason: reason.into(),
        }
    }
}
