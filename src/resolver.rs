//! Cross-referencing Content-ID resolver.
//!
//! Requests in a changeset may reference the entity created by an earlier
//! sibling through a `$<content-id>` URI prefix. The resolver records the
//! resolved URI of each completed request and substitutes it into later
//! references. Publication is deferred by the façade until the advance
//! following the owning request, so a request can never reference itself.

use crate::error::{BatchError, Result};

/// Insertion-ordered map from content id to resolved request URI.
#[derive(Debug, Default)]
pub(crate) struct UrlResolver {
    entries: Vec<(String, String)>,
}

/// Outcome of applying the `$id` rule to a URI.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Resolution {
    /// The URI carried no `$id` prefix, or the prefix is not a
    /// registered id; returned unchanged.
    Untouched(String),
    /// The `$id` prefix was substituted.
    Resolved(String),
}

impl Resolution {
    pub(crate) fn into_uri(self) -> String {
        match self {
            Self::Untouched(uri) | Self::Resolved(uri) => uri,
        }
    }
}

impl UrlResolver {
    /// Record the resolved URI of a completed request.
    ///
    /// # Errors
    ///
    /// Fails with [`BatchError::DuplicateContentId`] when `id` is already
    /// registered in the current scope.
    pub(crate) fn register(&mut self, id: impl Into<String>, uri: impl Into<String>) -> Result<()> {
        let id = id.into();
        if self.contains(&id) {
            return Err(BatchError::DuplicateContentId { id });
        }
        self.entries.push((id, uri.into()));
        Ok(())
    }

    /// Whether `id` has been registered.
    pub(crate) fn contains(&self, id: &str) -> bool {
        self.entries.iter().any(|(known, _)| known == id)
    }

    /// Apply the `$id` substitution rule to `uri`.
    ///
    /// A reference is `$` followed by URI-safe id characters, either
    /// ending the string or followed by `/`. Inside a changeset an
    /// unregistered reference is an error; outside, it passes through for
    /// the caller to resolve later.
    pub(crate) fn resolve(&self, uri: &str, in_changeset: bool) -> Result<Resolution> {
        let Some(reference) = uri.strip_prefix('$') else {
            return Ok(Resolution::Untouched(uri.to_owned()));
        };
        let id_len = reference
            .find('/')
            .unwrap_or(reference.len());
        let id = &reference[..id_len];
        if id.is_empty() || !id.bytes().all(is_id_char) {
            return Ok(Resolution::Untouched(uri.to_owned()));
        }
        let Some((_, target)) = self.entries.iter().find(|(known, _)| known == id) else {
            if in_changeset {
                return Err(BatchError::UnresolvedContentId {
                    reference: id.to_owned(),
                });
            }
            return Ok(Resolution::Untouched(uri.to_owned()));
        };
        let remainder = &reference[id_len..];
        Ok(Resolution::Resolved(format!("{target}{remainder}")))
    }

    /// Forget every registration. Called at changeset end for MIME
    /// batches; JSON batches keep the map for their whole lifetime.
    pub(crate) fn reset(&mut self) { self.entries.clear(); }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize { self.entries.len() }
}

/// Characters permitted in a `$id` token: unreserved URI characters.
fn is_id_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'~')
}

/// Produce an operation's final URI: `$id` substitution first, then a
/// join against the configured base URI for URIs still relative.
///
/// Unresolved `$id` references outside a changeset stay untouched, so
/// they are also exempt from base joining.
pub(crate) fn resolve_operation_uri(
    uri: &str,
    resolver: &UrlResolver,
    in_changeset: bool,
    base: Option<&str>,
) -> Result<String> {
    let resolved = resolver.resolve(uri, in_changeset)?.into_uri();
    match base {
        Some(base) if !resolved.contains("://") && !resolved.starts_with('$') => Ok(format!(
            "{}/{}",
            base.trim_end_matches('/'),
            resolved.trim_start_matches('/')
        )),
        _ => Ok(resolved),
    }
}
