//! Resumable upload (tus 1.0.0) server core for the Salvo web framework.
//!
//! [tus](https://tus.io/) is an open protocol for resumable file uploads
//! over HTTP: arbitrarily large files can be paused and resumed across
//! network interruptions without ever re-transmitting a stored byte, and
//! concurrent clients are serialized per upload by an exclusive lock.
//!
//! # Features
//!
//! - Creation, creation-with-upload, creation-defer-length
//! - Concatenation of partial uploads into a final upload
//! - Termination, and a non-standard GET download endpoint
//! - Capability-composed storage: a store registers exactly the optional
//!   operations it supports and the advertised extensions follow
//! - Exclusive per-upload locking with pluggable lock back-ends
//! - Lifecycle notification streams and atomic upload counters
//!
//! # Example
//!
//! ```ignore
//! use tuserve::{MaxSize, Tus};
//! use salvo_core::prelude::*;
//!
//! let tus = Tus::new()
//!     .path("/files")
//!     .max_size(MaxSize::Fixed(100 * 1024 * 1024));
//!
//! let service = tus.into_service();
//!
//! let acceptor = TcpListener::new("0.0.0.0:8080").bind().await;
//! Server::new(acceptor).serve(service).await;
//! ```
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | OPTIONS | `/files` | Protocol discovery and CORS preflight |
//! | POST | `/files` | Create an upload (optionally with a first chunk) |
//! | HEAD | `/files/{id}` | Current offset and descriptor headers |
//! | PATCH | `/files/{id}` | Append a chunk at the current offset |
//! | DELETE | `/files/{id}` | Terminate an upload |
//! | GET | `/files/{id}` | Download stored content (non-standard) |
//!
//! # Storage back-ends
//!
//! [`stores::DiskStore`] is the bundled reference store. Custom back-ends
//! implement [`stores::DataStore`] plus whichever capability traits they can
//! honor, and register them on a [`composer::StoreComposer`].
//!
//! # Notifications
//!
//! ```ignore
//! let tus = Tus::new();
//! let mut completed = tus.completed_uploads();
//! tokio::spawn(async move {
//!     while let Some(upload) = completed.recv().await {
//!         println!("upload {} done ({} bytes)", upload.id, upload.offset);
//!     }
//! });
//! let service = tus.into_service();
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use salvo_core::{Request, Router, Service};
use tokio_util::sync::CancellationToken;

pub mod composer;
pub mod error;
pub mod lockers;
pub mod metadata;
pub mod metrics;
pub mod notify;
pub mod options;
pub mod stores;
pub mod utils;

mod concat;
mod handlers;
mod middleware;

pub use composer::StoreComposer;
pub use concat::UploadConcat;
pub use error::{StoreError, TusError};
pub use metadata::Metadata;
pub use middleware::MethodOverride;
pub use options::{MaxSize, TusOptions, UploadFinishPatch, UploadPatch};
pub use stores::UploadInfo;

use crate::lockers::Locker;
use crate::metrics::Metrics;
use crate::notify::Notifier;
use crate::options::GenerateUrlCtx;
use crate::utils::normalize_path;

pub const TUS_VERSION: &str = "1.0.0";

pub const H_TUS_RESUMABLE: &str = "tus-resumable";
pub const H_TUS_VERSION: &str = "tus-version";
pub const H_TUS_EXTENSION: &str = "tus-extension";
pub const H_TUS_MAX_SIZE: &str = "tus-max-size";

pub const H_UPLOAD_LENGTH: &str = "upload-length";
pub const H_UPLOAD_OFFSET: &str = "upload-offset";
pub const H_UPLOAD_METADATA: &str = "upload-metadata";
pub const H_UPLOAD_CONCAT: &str = "upload-concat";
pub const H_UPLOAD_DEFER_LENGTH: &str = "upload-defer-length";

pub const H_CONTENT_TYPE: &str = "content-type";
pub const H_CONTENT_LENGTH: &str = "content-length";
pub const H_METHOD_OVERRIDE: &str = "x-http-method-override";
pub const CT_OFFSET_OCTET_STREAM: &str = "application/offset+octet-stream";

/// Why an in-flight append was stopped.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StopReason {
    /// The server asked for the upload to stop; it is terminated.
    Abort,
    /// The request went away (client disconnect, shutdown).
    Cancel,
}

/// Stop switch for one in-flight append, shared between the append path and
/// whoever may want to interrupt it.
///
/// Backed by a [`CancellationToken`]. The reason is recorded before the
/// token trips and can be written only once, so every observer of a stopped
/// handle sees the same reason, no matter how late it looks.
#[derive(Clone, Debug, Default)]
pub struct StopHandle {
    token: CancellationToken,
    reason: Arc<OnceLock<StopReason>>,
}

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stops the append; the upload is terminated.
    pub fn abort(&self) {
        self.stop(StopReason::Abort);
    }

    /// Stops the append; bytes stored so far are kept.
    pub fn cancel(&self) {
        self.stop(StopReason::Cancel);
    }

    fn stop(&self, reason: StopReason) {
        // First writer wins; later stop calls keep the original reason.
        let _ = self.reason.set(reason);
        self.token.cancel();
    }

    pub fn reason(&self) -> Option<StopReason> {
        if !self.token.is_cancelled() {
            return None;
        }
        Some(*self.reason.get().unwrap_or(&StopReason::Cancel))
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn is_aborted(&self) -> bool {
        self.reason() == Some(StopReason::Abort)
    }

    /// Resolves once the handle is stopped.
    pub async fn stopped(&self) -> StopReason {
        self.token.cancelled().await;
        *self.reason.get().unwrap_or(&StopReason::Cancel)
    }
}

type StopRegistry = Arc<Mutex<HashMap<String, StopHandle>>>;

/// Registry entry for one in-flight append; deregisters on drop so the map
/// is cleaned up on every handler exit path.
pub(crate) struct StopLease {
    id: String,
    registry: StopRegistry,
    pub(crate) stop: StopHandle,
}

impl Drop for StopLease {
    fn drop(&mut self) {
        if let Ok(mut registry) = self.registry.lock() {
            registry.remove(&self.id);
        }
    }
}

/// The upload service: configuration, store composition and router
/// assembly.
///
/// Cloning is cheap and clones share the notification, metrics and
/// in-flight stop state, so keep a clone around before calling
/// [`Tus::into_service`] if you need [`Tus::stop_upload`] or the metrics
/// handle afterwards.
#[derive(Clone, Debug)]
pub struct Tus {
    pub(crate) options: TusOptions,
    pub(crate) composer: StoreComposer,
    pub(crate) notifier: Arc<Notifier>,
    pub(crate) metrics: Arc<Metrics>,
    inflight: StopRegistry,
}

#[cfg(feature = "disk-store")]
impl Default for Tus {
    fn default() -> Self {
        Self::new()
    }
}

// Service configuration
impl Tus {
    /// A service over a [`stores::DiskStore`] rooted at its default
    /// directory.
    #[cfg(feature = "disk-store")]
    pub fn new() -> Self {
        Self::with_composer(stores::DiskStore::new().compose())
    }

    /// A service over an explicitly composed store.
    pub fn with_composer(composer: StoreComposer) -> Self {
        Self {
            options: TusOptions::default(),
            composer,
            notifier: Arc::new(Notifier::default()),
            metrics: Arc::new(Metrics::default()),
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.options.path = path.into();
        self
    }

    /// Absolute base URL used verbatim when building upload URLs.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.options.base_url = Some(base_url.into());
        self
    }

    pub fn max_size(mut self, max_size: MaxSize) -> Self {
        self.options.max_size = Some(max_size);
        self
    }

    pub fn relative_location(mut self, yes: bool) -> Self {
        self.options.relative_location = yes;
        self
    }

    pub fn respect_forwarded_headers(mut self, yes: bool) -> Self {
        self.options.respect_forwarded_headers = yes;
        self
    }

    pub fn allowed_origins(mut self, origins: Vec<String>) -> Self {
        self.options.allowed_origins = origins;
        self
    }

    pub fn allowed_headers(mut self, headers: Vec<String>) -> Self {
        self.options.allowed_headers = headers;
        self
    }

    pub fn exposed_headers(mut self, headers: Vec<String>) -> Self {
        self.options.exposed_headers = headers;
        self
    }

    pub fn allow_credentials(mut self, yes: bool) -> Self {
        self.options.allow_credentials = yes;
        self
    }

    /// Cadence of progress snapshots; `None` disables them.
    pub fn post_receive_interval(mut self, interval: Option<Duration>) -> Self {
        self.options.post_receive_interval = interval;
        self
    }

    pub fn with_locker(mut self, locker: impl Locker) -> Self {
        self.options.locker = Arc::new(locker);
        self
    }

    pub fn disable_termination_for_finished_uploads(mut self, yes: bool) -> Self {
        self.options.disable_termination_for_finished_uploads = yes;
        self
    }
}

// Hooks
impl Tus {
    pub fn with_upload_id_naming_function<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(&Request, &Metadata) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, TusError>> + Send + 'static,
    {
        self.options.upload_id_naming_function = Arc::new(move |req, meta| Box::pin(f(req, meta)));
        self
    }

    pub fn with_generate_url_function<F>(mut self, f: F) -> Self
    where
        F: Fn(&Request, GenerateUrlCtx) -> Result<String, TusError> + Send + Sync + 'static,
    {
        self.options.generate_url_function = Some(Arc::new(f));
        self
    }

    pub fn with_on_upload_create<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(&Request, UploadInfo) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<UploadPatch, TusError>> + Send + 'static,
    {
        self.options.on_upload_create = Some(Arc::new(move |req, upload| Box::pin(f(req, upload))));
        self
    }

    pub fn with_on_upload_finish<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(&Request, UploadInfo) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<UploadFinishPatch, TusError>> + Send + 'static,
    {
        self.options.on_upload_finish = Some(Arc::new(move |req, upload| Box::pin(f(req, upload))));
        self
    }
}

// Observation
impl Tus {
    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }

    pub fn notifier(&self) -> Arc<Notifier> {
        self.notifier.clone()
    }

    /// See [`Notifier::created_uploads`].
    pub fn created_uploads(&self) -> tokio::sync::mpsc::UnboundedReceiver<UploadInfo> {
        self.notifier.created_uploads()
    }

    /// See [`Notifier::completed_uploads`].
    pub fn completed_uploads(&self) -> tokio::sync::mpsc::UnboundedReceiver<UploadInfo> {
        self.notifier.completed_uploads()
    }

    /// See [`Notifier::terminated_uploads`].
    pub fn terminated_uploads(&self) -> tokio::sync::mpsc::UnboundedReceiver<UploadInfo> {
        self.notifier.terminated_uploads()
    }

    /// See [`Notifier::upload_progress`].
    pub fn upload_progress(&self) -> tokio::sync::broadcast::Receiver<UploadInfo> {
        self.notifier.upload_progress()
    }

    /// Stops an in-flight append for `id`: its body is no longer read, the
    /// bytes already accepted stay durable, and the upload is terminated
    /// when the store supports termination. Returns false when no append is
    /// currently running for `id`.
    pub fn stop_upload(&self, id: &str) -> bool {
        let registry = self.inflight.lock().expect("stop registry poisoned");
        match registry.get(id) {
            Some(stop) => {
                stop.abort();
                true
            }
            None => false,
        }
    }

    pub(crate) fn track_upload(&self, id: &str) -> StopLease {
        let stop = StopHandle::new();
        self.inflight
            .lock()
            .expect("stop registry poisoned")
            .insert(id.to_owned(), stop.clone());
        StopLease {
            id: id.to_owned(),
            registry: self.inflight.clone(),
            stop,
        }
    }
}

// Router assembly
impl Tus {
    /// The router serving the protocol under the configured path.
    ///
    /// Note that `X-HTTP-Method-Override` must be applied before routing;
    /// mount this router behind [`MethodOverride`] or use
    /// [`Tus::into_service`], which wires both.
    pub fn into_router(self) -> Router {
        let base_path = normalize_path(&self.options.path);
        let state = Arc::new(self);

        Router::with_path(base_path)
            .hoop(middleware::TusHoop::new(state.clone()))
            .options(handlers::capabilities)
            .post(handlers::create)
            .push(
                Router::with_path("{id}")
                    .options(handlers::capabilities)
                    .head(handlers::status)
                    .patch(handlers::write_chunk)
                    .get(handlers::download)
                    .delete(handlers::remove),
            )
    }

    /// The router wrapped in a [`Service`] with method-override handling.
    pub fn into_service(self) -> Service {
        Service::new(self.into_router()).hoop(MethodOverride)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constants_match_the_wire_protocol() {
        assert_eq!(TUS_VERSION, "1.0.0");
        assert_eq!(H_TUS_RESUMABLE, "tus-resumable");
        assert_eq!(H_UPLOAD_OFFSET, "upload-offset");
        assert_eq!(H_UPLOAD_DEFER_LENGTH, "upload-defer-length");
        assert_eq!(H_METHOD_OVERRIDE, "x-http-method-override");
        assert_eq!(CT_OFFSET_OCTET_STREAM, "application/offset+octet-stream");
    }

    #[test]
    fn stop_handle_reports_reason() {
        let stop = StopHandle::new();
        assert!(!stop.is_stopped());
        assert!(stop.reason().is_none());

        stop.abort();
        assert!(stop.is_stopped());
        assert!(stop.is_aborted());
        assert_eq!(stop.reason(), Some(StopReason::Abort));
    }

    #[test]
    fn stop_handle_is_shared_across_clones() {
        let stop = StopHandle::new();
        let observer = stop.clone();

        stop.cancel();
        assert!(observer.is_stopped());
        assert!(!observer.is_aborted());
    }

    #[test]
    fn first_stop_reason_wins() {
        let stop = StopHandle::new();
        stop.cancel();
        stop.abort();
        assert_eq!(stop.reason(), Some(StopReason::Cancel));
    }

    #[tokio::test]
    async fn stopped_wakes_up_waiters() {
        let stop = StopHandle::new();
        let observer = stop.clone();

        let waiter = tokio::spawn(async move { observer.stopped().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        stop.abort();

        assert_eq!(waiter.await.unwrap(), StopReason::Abort);
    }

    #[cfg(feature = "disk-store")]
    #[test]
    fn builder_chain_applies_options() {
        let tus = Tus::new()
            .path("/api/files")
            .max_size(MaxSize::Fixed(10 * 1024 * 1024))
            .relative_location(true)
            .respect_forwarded_headers(true)
            .allow_credentials(true);

        assert_eq!(tus.options.path, "/api/files");
        assert!(tus.options.relative_location);
        assert!(tus.options.respect_forwarded_headers);
        assert!(tus.options.allow_credentials);
        match tus.options.max_size {
            Some(MaxSize::Fixed(size)) => assert_eq!(size, 10 * 1024 * 1024),
            other => panic!("unexpected max size: {other:?}"),
        }
    }

    #[cfg(feature = "disk-store")]
    #[test]
    fn stop_upload_without_inflight_append_is_false() {
        let tus = Tus::new();
        assert!(!tus.stop_upload("nope"));
    }

    #[cfg(feature = "disk-store")]
    #[test]
    fn track_upload_registers_and_lease_drop_deregisters() {
        let tus = Tus::new();
        {
            let lease = tus.track_upload("abc");
            assert!(tus.stop_upload("abc"));
            assert!(lease.stop.is_aborted());
        }
        assert!(!tus.stop_upload("abc"));
    }

    #[cfg(feature = "disk-store")]
    #[test]
    fn into_router_builds() {
        let _router = Tus::new().path("/files").into_router();
    }
}
