//! The data-store contract.
//!
//! A back-end provides the mandatory [`DataStore`] operations plus any of
//! the optional capability traits. Capabilities are registered explicitly
//! with a [`StoreComposer`](crate::composer::StoreComposer); the protocol
//! handlers consult the composer to advertise extensions and to refuse
//! requests the back-end cannot honor.

#[cfg(feature = "disk-store")]
mod disk;

use std::pin::Pin;

use bytes::Bytes;
#[cfg(feature = "disk-store")]
pub use disk::DiskStore;
use futures_util::Stream;
use salvo_core::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StoreResult;
use crate::metadata::Metadata;

/// Content bytes flowing in or out of a store.
///
/// Streams returned by [`ContentReader::reader`] may hold resources (open
/// files, network connections); they are released when the stream is
/// dropped.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static>>;

/// The per-upload descriptor persisted by the store.
///
/// The handlers only ever hold a transient copy; the store owns the durable
/// truth, in particular the current `offset`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadInfo {
    /// Server-assigned, URL-safe identifier.
    pub id: String,
    /// Total size in bytes; `None` while the length is deferred.
    pub size: Option<u64>,
    /// Bytes durably stored. Monotonically non-decreasing, never beyond
    /// `size` once the size is known.
    pub offset: u64,
    pub metadata: Metadata,
    /// A fragment meant only for later concatenation; never treated as a
    /// complete file even once `offset == size`.
    pub is_partial: bool,
    /// The result of concatenating other uploads. Mutually exclusive with
    /// `is_partial`.
    pub is_final: bool,
    /// Ordered concatenation sources; non-empty iff `is_final`.
    pub partial_uploads: Vec<String>,
    /// RFC 3339 creation timestamp.
    pub creation_date: String,
}

impl UploadInfo {
    pub fn new(id: impl Into<String>) -> UploadInfo {
        UploadInfo {
            id: id.into(),
            size: None,
            offset: 0,
            metadata: Metadata::default(),
            is_partial: false,
            is_final: false,
            partial_uploads: Vec::new(),
            creation_date: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn size_is_deferred(&self) -> bool {
        self.size.is_none()
    }

    /// Whether every declared byte has been stored. Always false while the
    /// length is deferred.
    pub fn is_complete(&self) -> bool {
        self.size == Some(self.offset)
    }
}

/// Protocol extensions a deployment can advertise via `Tus-Extension`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Extension {
    Creation,
    CreationWithUpload,
    CreationDeferLength,
    Concatenation,
    Termination,
}

impl Extension {
    pub fn as_str(&self) -> &'static str {
        match self {
            Extension::Creation => "creation",
            Extension::CreationWithUpload => "creation-with-upload",
            Extension::CreationDeferLength => "creation-defer-length",
            Extension::Concatenation => "concatenation",
            Extension::Termination => "termination",
        }
    }

    pub fn to_header_value(extensions: &[Extension]) -> String {
        extensions
            .iter()
            .map(Extension::as_str)
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Mandatory store operations.
#[async_trait]
pub trait DataStore: Send + Sync + 'static {
    /// Persists a fresh descriptor with `offset = 0` and reserves content
    /// storage. Creation is atomic: a concurrent `info` sees either no
    /// upload or the fully created one.
    async fn create(&self, info: UploadInfo) -> StoreResult<UploadInfo>;

    /// Appends the stream at exactly `offset` and returns the number of
    /// bytes durably written. A store that persists partial progress before
    /// failing makes that progress visible to a subsequent `info` call; one
    /// that cannot reports the failure with the descriptor untouched.
    async fn append(&self, id: &str, offset: u64, stream: ByteStream) -> StoreResult<u64>;

    /// The current descriptor, with the true durable offset.
    async fn info(&self, id: &str) -> StoreResult<UploadInfo>;
}

/// Streams stored content for the non-standard GET endpoint.
#[async_trait]
pub trait ContentReader: Send + Sync + 'static {
    /// The stored bytes `[0, offset)`.
    async fn reader(&self, id: &str) -> StoreResult<ByteStream>;
}

/// Removes an upload's descriptor and content.
#[async_trait]
pub trait Terminator: Send + Sync + 'static {
    async fn terminate(&self, id: &str) -> StoreResult<()>;
}

/// Produces a final upload from completed partial uploads.
#[async_trait]
pub trait Concatenator: Send + Sync + 'static {
    /// Writes the ordered concatenation of `partial_ids` into `id`. Callers
    /// must only invoke this once every source is complete; afterwards the
    /// destination's offset equals its size.
    async fn concatenate(&self, id: &str, partial_ids: &[String]) -> StoreResult<()>;
}

/// Fixes the size of a deferred-length upload.
#[async_trait]
pub trait LengthDeferrer: Send + Sync + 'static {
    /// Fails if the length has already been declared.
    async fn declare_length(&self, id: &str, size: u64) -> StoreResult<()>;
}

/// Finalization signal for stores that assemble multipart structures.
#[async_trait]
pub trait Finisher: Send + Sync + 'static {
    /// Called once no further writes will occur.
    async fn finish(&self, id: &str) -> StoreResult<()>;
}
