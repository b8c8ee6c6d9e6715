//! Reader configuration.
//!
//! Provides a fluent builder for configuring [`BatchReader`] instances:
//! quota limits, an optional base URI for resolving relative operation
//! URIs, and the legacy `Content-ID` location toggle.
//!
//! [`BatchReader`]: crate::BatchReader

/// Default cap on top-level parts (operations and changesets) in a batch.
pub const DEFAULT_MAX_PARTS_PER_BATCH: u32 = 100;

/// Default cap on operations within a single changeset.
pub const DEFAULT_MAX_OPERATIONS_PER_CHANGESET: u32 = 1000;

/// Configuration for a [`BatchReader`](crate::BatchReader).
///
/// # Examples
///
/// ```
/// use batchframe::BatchReaderSettings;
///
/// let settings = BatchReaderSettings::default()
///     .max_parts_per_batch(10)
///     .base_uri("https://host/service");
/// assert_eq!(settings.parts_limit(), 10);
/// ```
#[derive(Clone, Debug)]
pub struct BatchReaderSettings {
    max_parts_per_batch: u32,
    max_operations_per_changeset: u32,
    base_uri: Option<String>,
    allow_legacy_content_id: bool,
}

impl Default for BatchReaderSettings {
    fn default() -> Self {
        Self {
            max_parts_per_batch: DEFAULT_MAX_PARTS_PER_BATCH,
            max_operations_per_changeset: DEFAULT_MAX_OPERATIONS_PER_CHANGESET,
            base_uri: None,
            allow_legacy_content_id: true,
        }
    }
}

impl BatchReaderSettings {
    /// Set the maximum number of top-level parts a batch may contain.
    #[must_use]
    pub fn max_parts_per_batch(mut self, limit: u32) -> Self {
        self.max_parts_per_batch = limit;
        self
    }

    /// Set the maximum number of operations a changeset may contain.
    #[must_use]
    pub fn max_operations_per_changeset(mut self, limit: u32) -> Self {
        self.max_operations_per_changeset = limit;
        self
    }

    /// Set the absolute base URI used to resolve relative operation URIs.
    #[must_use]
    pub fn base_uri(mut self, uri: impl Into<String>) -> Self {
        self.base_uri = Some(uri.into());
        self
    }

    /// Accept `Content-ID` among the HTTP headers of a changeset request
    /// when the MIME part headers carry none. On by default.
    #[must_use]
    pub fn allow_legacy_content_id(mut self, allow: bool) -> Self {
        self.allow_legacy_content_id = allow;
        self
    }

    /// Configured top-level part cap.
    #[inline]
    #[must_use]
    pub const fn parts_limit(&self) -> u32 { self.max_parts_per_batch }

    /// Configured per-changeset operation cap.
    #[inline]
    #[must_use]
    pub const fn changeset_limit(&self) -> u32 { self.max_operations_per_changeset }

    /// Configured base URI, if any.
    #[must_use]
    pub fn base(&self) -> Option<&str> { self.base_uri.as_deref() }

    /// Whether the legacy `Content-ID` location is accepted.
    #[inline]
    #[must_use]
    pub const fn legacy_content_id(&self) -> bool { self.allow_legacy_content_id }
}
