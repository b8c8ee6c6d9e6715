//! Public API for the `batchframe` library.
//!
//! This crate provides a streaming, pull-driven reader for OData v4 batch
//! payloads in both wire formats: classical `multipart/mixed` batches with
//! nested changesets, and JSON batches with `atomicityGroup`/`dependsOn`
//! metadata. Both formats surface the same event stream through
//! [`BatchReader::advance`], with per-operation messages exposing headers
//! and a bounded body stream.
//!
//! ```no_run
//! use batchframe::{BatchReader, BatchReaderSettings, ReaderState, SliceSource};
//!
//! # async fn demo(payload: Vec<u8>) -> batchframe::Result<()> {
//! let mut reader = BatchReader::open_request(
//!     SliceSource::new(payload),
//!     "multipart/mixed; boundary=batch_1",
//!     BatchReaderSettings::default(),
//! )?;
//! while reader.advance().await? {
//!     if reader.state() == ReaderState::Operation {
//!         let mut operation = reader.create_operation_request().await?;
//!         println!("{} {}", operation.method(), operation.uri());
//!         let body = operation.open_body()?.read_to_end().await?;
//!         println!("{} body bytes", body.len());
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod blocking;
mod error;
mod framing;
mod groups;
pub mod headers;
mod http;
mod json;
mod message;
mod mime;
mod reader;
mod resolver;
pub mod settings;
pub mod source;

pub use error::{BatchError, QuotaScope, Result};
pub use headers::{parse_content_type, ContentType, HeaderMap};
pub use http::Method;
pub use message::{BodyStream, OperationRequestMessage, OperationResponseMessage};
pub use reader::{BatchReader, PayloadKind, ReaderState};
pub use settings::BatchReaderSettings;
pub use source::{AsyncSource, ByteSource, ReadSource, SliceSource};
