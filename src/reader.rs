//! Batch reader façade.
//!
//! One pull-driven state machine serves both wire formats: the caller
//! invokes [`advance`](BatchReader::advance) repeatedly and observes the
//! event stream `Initial → (ChangesetStart? Operation* ChangesetEnd?)* →
//! Completed`. Format-specific stepping lives in the [`mime`](crate::mime)
//! and [`json`](crate::json) drivers behind a tagged variant, so there is
//! no dynamic dispatch in the hot path. Every error is intercepted here:
//! the reader moves to the terminal `Exception` state and re-raises.

use crate::{
    error::{BatchError, QuotaScope, Result},
    framing::LineReader,
    groups::GroupTracker,
    headers::parse_content_type,
    json::{self, JsonDriver, RequestProperties, ResponseProperties},
    message::{OperationRequestMessage, OperationResponseMessage},
    mime::{self, MimeDriver},
    resolver::UrlResolver,
    settings::BatchReaderSettings,
    source::ByteSource,
};

/// Observable state of a [`BatchReader`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReaderState {
    /// Nothing has been read yet.
    Initial,
    /// An operation is available for
    /// [`create_operation_request`](BatchReader::create_operation_request)
    /// or the response-side equivalent.
    Operation,
    /// A changeset has opened.
    ChangesetStart,
    /// The current changeset has closed.
    ChangesetEnd,
    /// The batch has been fully consumed. Terminal.
    Completed,
    /// An error surfaced; the reader is unusable. Terminal.
    Exception,
}

/// Whether the payload carries requests or responses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PayloadKind {
    /// A batch of sub-requests.
    Request,
    /// A batch of sub-responses.
    Response,
}

/// Progress of the current operation's message and body stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum OperationSubState {
    /// No message has been created for the current operation.
    None,
    /// The operation message exists; its body has not been requested.
    MessageCreated,
    /// A body stream is alive.
    StreamRequested,
    /// The body stream has been dropped.
    StreamDisposed,
}

/// An operation detected by a driver but not yet parsed into a message.
#[derive(Debug)]
pub(crate) enum PendingOperation {
    /// MIME part: the embedded HTTP message is still unread.
    MimePart {
        part_headers: crate::headers::HeaderMap,
    },
    /// Buffered JSON request element.
    JsonRequest(RequestProperties),
    /// Buffered JSON response element.
    JsonResponse(ResponseProperties),
}

/// Outcome of one driver step.
#[derive(Debug)]
pub(crate) enum StepEvent {
    /// The next part or element is an operation.
    Operation {
        pending: PendingOperation,
        in_changeset: bool,
    },
    /// A changeset opened.
    ChangesetStart,
    /// The current changeset closed.
    ChangesetEnd,
    /// The payload is exhausted.
    Completed,
}

enum FormatDriver {
    Mime(MimeDriver),
    Json(JsonDriver),
}

/// Streaming reader over an OData batch payload.
///
/// Constructed with [`open_request`](Self::open_request) or
/// [`open_response`](Self::open_response); the batch `Content-Type` value
/// selects the wire format and supplies the MIME boundary.
pub struct BatchReader<S: ByteSource> {
    line_reader: LineReader<S>,
    driver: FormatDriver,
    kind: PayloadKind,
    settings: BatchReaderSettings,
    state: ReaderState,
    substate: OperationSubState,
    resolver: UrlResolver,
    groups: GroupTracker,
    batch_size: u32,
    changeset_size: u32,
    pending_publish: Option<(String, String)>,
    pending_op: Option<(PendingOperation, bool)>,
}

impl<S: ByteSource> BatchReader<S> {
    /// Open a reader over a request batch.
    ///
    /// # Errors
    ///
    /// Fails when `content_type` names neither `multipart/mixed` with a
    /// boundary nor a JSON media type.
    pub fn open_request(
        source: S,
        content_type: &str,
        settings: BatchReaderSettings,
    ) -> Result<Self> {
        Self::open(source, content_type, settings, PayloadKind::Request)
    }

    /// Open a reader over a response batch.
    ///
    /// # Errors
    ///
    /// Fails when `content_type` names neither `multipart/mixed` with a
    /// boundary nor a JSON media type.
    pub fn open_response(
        source: S,
        content_type: &str,
        settings: BatchReaderSettings,
    ) -> Result<Self> {
        Self::open(source, content_type, settings, PayloadKind::Response)
    }

    fn open(
        source: S,
        content_type: &str,
        settings: BatchReaderSettings,
        kind: PayloadKind,
    ) -> Result<Self> {
        let content_type = parse_content_type(content_type)?;
        let driver = if content_type.is_multipart_mixed() {
            let boundary = content_type.boundary().ok_or_else(|| {
                BatchError::framing("multipart batch Content-Type has no boundary parameter")
            })?;
            FormatDriver::Mime(MimeDriver::new(boundary.to_owned()))
        } else if content_type.is_json() {
            FormatDriver::Json(JsonDriver::new(kind))
        } else {
            return Err(BatchError::framing(format!(
                "unsupported batch content type {:?}",
                content_type.media_type()
            )));
        };
        Ok(Self {
            line_reader: LineReader::new(source),
            driver,
            kind,
            settings,
            state: ReaderState::Initial,
            substate: OperationSubState::None,
            resolver: UrlResolver::default(),
            groups: GroupTracker::default(),
            batch_size: 0,
            changeset_size: 0,
            pending_publish: None,
            pending_op: None,
        })
    }

    /// Current reader state. Never mutates.
    #[inline]
    #[must_use]
    pub const fn state(&self) -> ReaderState { self.state }

    /// Whether this reader yields requests or responses.
    #[inline]
    #[must_use]
    pub const fn kind(&self) -> PayloadKind { self.kind }

    /// Top-level parts read so far.
    #[inline]
    #[must_use]
    pub const fn batch_size(&self) -> u32 { self.batch_size }

    /// Operations read in the current changeset.
    #[inline]
    #[must_use]
    pub const fn changeset_size(&self) -> u32 { self.changeset_size }

    /// Move to the next state. Returns `false` once the batch is
    /// complete; calling again in `Completed` stays a no-op.
    ///
    /// # Errors
    ///
    /// Any parsing or validation failure moves the reader to the
    /// terminal `Exception` state and is re-raised; so is advancing a
    /// reader already in `Exception`, or advancing past an operation
    /// whose message was never created.
    pub async fn advance(&mut self) -> Result<bool> {
        match self.state {
            ReaderState::Completed => return Ok(false),
            ReaderState::Exception => {
                return Err(BatchError::InvalidReaderState {
                    state: self.state,
                    action: "advance",
                });
            }
            _ => {}
        }
        match self.advance_inner().await {
            Ok(more) => Ok(more),
            Err(err) => Err(self.fail(err)),
        }
    }

    async fn advance_inner(&mut self) -> Result<bool> {
        if self.substate == OperationSubState::StreamRequested {
            return Err(BatchError::InvalidReaderState {
                state: self.state,
                action: "advance while a body stream is live",
            });
        }
        if self.state == ReaderState::Operation && self.substate == OperationSubState::None {
            return Err(BatchError::InvalidReaderState {
                state: self.state,
                action: "advance before the operation message was created",
            });
        }
        self.pending_op = None;
        self.substate = OperationSubState::None;
        if let Some((id, uri)) = self.pending_publish.take() {
            self.resolver.register(id, uri)?;
        }
        let event = match &mut self.driver {
            FormatDriver::Mime(driver) => driver.step(&mut self.line_reader, self.state).await?,
            FormatDriver::Json(driver) => {
                driver
                    .step(&mut self.line_reader, &mut self.groups, self.state)
                    .await?
            }
        };
        match event {
            StepEvent::Completed => {
                self.state = ReaderState::Completed;
                Ok(false)
            }
            StepEvent::ChangesetStart => {
                self.state = ReaderState::ChangesetStart;
                self.bump(QuotaScope::Batch)?;
                Ok(true)
            }
            StepEvent::ChangesetEnd => {
                self.state = ReaderState::ChangesetEnd;
                self.changeset_size = 0;
                if matches!(self.driver, FormatDriver::Mime(_)) {
                    // JSON ids stay registered: dependsOn may reference
                    // earlier requests across groups.
                    self.resolver.reset();
                }
                Ok(true)
            }
            StepEvent::Operation {
                pending,
                in_changeset,
            } => {
                self.state = ReaderState::Operation;
                self.pending_op = Some((pending, in_changeset));
                self.bump(if in_changeset {
                    QuotaScope::Changeset
                } else {
                    QuotaScope::Batch
                })?;
                Ok(true)
            }
        }
    }

    fn bump(&mut self, scope: QuotaScope) -> Result<()> {
        let (counter, limit) = match scope {
            QuotaScope::Batch => (&mut self.batch_size, self.settings.parts_limit()),
            QuotaScope::Changeset => (&mut self.changeset_size, self.settings.changeset_limit()),
        };
        *counter += 1;
        if *counter > limit {
            return Err(BatchError::QuotaExceeded { scope, limit });
        }
        Ok(())
    }

    /// Create the request message for the current operation.
    ///
    /// Parses the embedded HTTP request (MIME) or finalises the buffered
    /// element (JSON); the changeset and `dependsOn` rules fire here.
    ///
    /// # Errors
    ///
    /// Fails with [`BatchError::InvalidReaderState`] outside the
    /// `Operation` state, on a response batch, or when the message was
    /// already created; any validation failure also moves the reader to
    /// `Exception`.
    pub async fn create_operation_request(
        &mut self,
    ) -> Result<OperationRequestMessage<'_, S>> {
        self.ensure_create(PayloadKind::Request, "create an operation request message")?;
        let Some((pending, in_changeset)) = self.pending_op.take() else {
            let err = BatchError::InvalidReaderState {
                state: self.state,
                action: "create an operation request message twice",
            };
            return Err(self.fail(err));
        };
        let built = match pending {
            PendingOperation::MimePart { part_headers } => {
                let FormatDriver::Mime(driver) = &self.driver else {
                    unreachable!("MIME parts only come from the MIME driver")
                };
                let delimiter = driver.body_delimiter();
                mime::build_request(
                    &mut self.line_reader,
                    &part_headers,
                    in_changeset,
                    &self.settings,
                    &self.resolver,
                    delimiter,
                )
                .await
            }
            PendingOperation::JsonRequest(cache) => {
                json::build_request(cache, &mut self.groups, &self.resolver, &self.settings)
            }
            PendingOperation::JsonResponse(_) => {
                unreachable!("payload kind was checked above")
            }
        };
        match built {
            Err(err) => Err(self.fail(err)),
            Ok(meta) => {
                self.substate = OperationSubState::MessageCreated;
                let register = match self.driver {
                    FormatDriver::Mime(_) => in_changeset,
                    FormatDriver::Json(_) => true,
                };
                if register {
                    if let Some(id) = &meta.content_id {
                        self.pending_publish = Some((id.clone(), meta.uri.clone()));
                    }
                }
                Ok(OperationRequestMessage::new(meta, self))
            }
        }
    }

    /// Create the response message for the current operation.
    ///
    /// # Errors
    ///
    /// Fails with [`BatchError::InvalidReaderState`] outside the
    /// `Operation` state, on a request batch, or when the message was
    /// already created; any parsing failure also moves the reader to
    /// `Exception`.
    pub async fn create_operation_response(
        &mut self,
    ) -> Result<OperationResponseMessage<'_, S>> {
        self.ensure_create(PayloadKind::Response, "create an operation response message")?;
        let Some((pending, _)) = self.pending_op.take() else {
            let err = BatchError::InvalidReaderState {
                state: self.state,
                action: "create an operation response message twice",
            };
            return Err(self.fail(err));
        };
        let built = match pending {
            PendingOperation::MimePart { part_headers } => {
                let FormatDriver::Mime(driver) = &self.driver else {
                    unreachable!("MIME parts only come from the MIME driver")
                };
                let delimiter = driver.body_delimiter();
                mime::build_response(&mut self.line_reader, &part_headers, &self.settings, delimiter)
                    .await
            }
            PendingOperation::JsonResponse(cache) => json::build_response(cache),
            PendingOperation::JsonRequest(_) => {
                unreachable!("payload kind was checked above")
            }
        };
        match built {
            Err(err) => Err(self.fail(err)),
            Ok(meta) => {
                self.substate = OperationSubState::MessageCreated;
                Ok(OperationResponseMessage::new(meta, self))
            }
        }
    }

    fn ensure_create(&mut self, expected: PayloadKind, action: &'static str) -> Result<()> {
        if self.state != ReaderState::Operation
            || self.kind != expected
            || self.substate != OperationSubState::None
        {
            let err = BatchError::InvalidReaderState {
                state: self.state,
                action,
            };
            return Err(self.fail(err));
        }
        Ok(())
    }

    /// Transition to `Exception` and hand the error back for re-raising.
    pub(crate) fn fail(&mut self, err: BatchError) -> BatchError {
        self.state = ReaderState::Exception;
        err
    }

    /// Begin a body stream: enforce the one-live-stream rule.
    pub(crate) fn begin_stream(&mut self) -> Result<()> {
        if self.substate != OperationSubState::MessageCreated {
            let err = BatchError::InvalidReaderState {
                state: self.state,
                action: "open the operation body a second time",
            };
            return Err(self.fail(err));
        }
        self.substate = OperationSubState::StreamRequested;
        Ok(())
    }

    /// Split out the parts a body stream needs.
    pub(crate) fn stream_parts(&mut self) -> (&mut LineReader<S>, &mut OperationSubState) {
        (&mut self.line_reader, &mut self.substate)
    }

    /// Serialize a JSON body snapshot, intercepting failure.
    pub(crate) fn serialize_body(&mut self, value: &serde_json::Value) -> Result<Vec<u8>> {
        match serde_json::to_vec(value) {
            Ok(data) => Ok(data),
            Err(err) => Err(self.fail(err.into())),
        }
    }
}
