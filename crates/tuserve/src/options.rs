use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use salvo_core::Request;
use salvo_core::http::{HeaderMap, StatusCode, header};

use crate::StopHandle;
use crate::error::{TusError, TusResult};
use crate::lockers::{LockGuard, Locker, MemoryLocker};
use crate::metadata::Metadata;
use crate::stores::UploadInfo;

pub type UploadId = Option<String>;

#[derive(Clone)]
pub enum MaxSize {
    Fixed(u64),
    #[allow(clippy::type_complexity)]
    Dynamic(
        Arc<
            dyn Fn(&Request, UploadId) -> Pin<Box<dyn Future<Output = u64> + Send + 'static>>
                + Send
                + Sync,
        >,
    ),
}

impl fmt::Debug for MaxSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MaxSize::Fixed(size) => f.debug_tuple("Fixed").field(size).finish(),
            MaxSize::Dynamic(_) => f.debug_tuple("Dynamic").finish_non_exhaustive(),
        }
    }
}

pub type NamingFunction = Arc<
    dyn Fn(
            &Request,
            &Metadata,
        ) -> Pin<Box<dyn Future<Output = Result<String, TusError>> + Send>>
        + Send
        + Sync,
>;
pub type GenerateUrlFunction =
    Arc<dyn Fn(&Request, GenerateUrlCtx) -> Result<String, TusError> + Send + Sync>;

pub type OnUploadCreate = Arc<
    dyn Fn(
            &Request,
            UploadInfo,
        ) -> Pin<Box<dyn Future<Output = Result<UploadPatch, TusError>> + Send>>
        + Send
        + Sync,
>;
pub type OnUploadFinish = Arc<
    dyn Fn(
            &Request,
            UploadInfo,
        ) -> Pin<Box<dyn Future<Output = Result<UploadFinishPatch, TusError>> + Send>>
        + Send
        + Sync,
>;

/// Adjustments an `on_upload_create` callback may apply before the
/// descriptor is persisted.
#[derive(Clone, Debug, Default)]
pub struct UploadPatch {
    pub metadata: Option<Metadata>,
}

/// Adjustments an `on_upload_finish` callback may apply to the completion
/// response.
#[derive(Clone, Debug, Default)]
pub struct UploadFinishPatch {
    pub status_code: Option<StatusCode>,
    pub headers: Option<HeaderMap>,
    pub body: Option<Vec<u8>>,
}

#[derive(Clone, Copy, Debug)]
pub struct GenerateUrlCtx<'a> {
    pub proto: &'a str,
    pub host: &'a str,
    pub path: &'a str,
    pub id: &'a str,
}

#[derive(Clone, Copy, Debug)]
pub struct HostProto<'a> {
    pub proto: &'a str,
    pub host: &'a str,
}

#[derive(Clone)]
pub struct TusOptions {
    /// The route prefix upload resources live under.
    pub path: String,

    /// Absolute base URL (scheme included) used verbatim for `Location` and
    /// `Upload-Concat` URLs. When unset, scheme and host come from the
    /// request.
    pub base_url: Option<String>,

    /// Max upload size; `None` means unlimited.
    pub max_size: Option<MaxSize>,

    /// Return a relative URL as the `Location` header.
    pub relative_location: bool,

    /// Let `Forwarded` / `X-Forwarded-*` headers override host and scheme.
    pub respect_forwarded_headers: bool,

    /// Origins accepted for CORS; empty means every origin is echoed back.
    pub allowed_origins: Vec<String>,

    /// Additional names sent in `Access-Control-Allow-Headers`.
    pub allowed_headers: Vec<String>,

    /// Additional names sent in `Access-Control-Expose-Headers`.
    pub exposed_headers: Vec<String>,

    /// Set `Access-Control-Allow-Credentials`.
    pub allow_credentials: bool,

    /// Cadence of progress snapshots while a body is appended.
    pub post_receive_interval: Option<Duration>,

    /// The exclusive per-upload lock provider.
    pub locker: Arc<dyn Locker>,

    /// Respond 403 to DELETE of an upload whose offset reached its size.
    pub disable_termination_for_finished_uploads: bool,

    /// Produces ids for new uploads.
    pub upload_id_naming_function: NamingFunction,

    /// Overrides upload URL generation entirely.
    pub generate_url_function: Option<GenerateUrlFunction>,

    pub on_upload_create: Option<OnUploadCreate>,
    pub on_upload_finish: Option<OnUploadFinish>,
}

impl fmt::Debug for TusOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TusOptions")
            .field("path", &self.path)
            .field("base_url", &self.base_url)
            .field("max_size", &self.max_size)
            .field("relative_location", &self.relative_location)
            .field("respect_forwarded_headers", &self.respect_forwarded_headers)
            .finish_non_exhaustive()
    }
}

impl Default for TusOptions {
    fn default() -> Self {
        TusOptions {
            path: "/files".to_owned(),
            base_url: None,
            max_size: None,
            relative_location: false,
            respect_forwarded_headers: false,
            allowed_origins: vec![],
            allowed_headers: vec![],
            exposed_headers: vec![],
            allow_credentials: false,
            post_receive_interval: Some(Duration::from_secs(1)),
            locker: Arc::new(MemoryLocker::new()),
            disable_termination_for_finished_uploads: false,
            upload_id_naming_function: Arc::new(|_req, _metadata| {
                Box::pin(async move { Ok(uuid::Uuid::new_v4().simple().to_string()) })
            }),
            generate_url_function: None,
            on_upload_create: None,
            on_upload_finish: None,
        }
    }
}

impl TusOptions {
    /// Acquires the exclusive lock for `upload_id`, giving up early when the
    /// request is stopped.
    pub async fn acquire_lock(&self, upload_id: &str, stop: &StopHandle) -> TusResult<LockGuard> {
        tokio::select! {
            lock = self.locker.lock(upload_id) => Ok(lock?),
            _ = stop.stopped() => Err(TusError::UploadStopped),
        }
    }

    pub async fn configured_max_size(&self, req: &Request, upload_id: UploadId) -> u64 {
        match &self.max_size {
            Some(MaxSize::Fixed(size)) => *size,
            Some(MaxSize::Dynamic(func)) => func(req, upload_id).await,
            None => 0,
        }
    }

    /// The URL for an upload id, honoring the configured generator, base
    /// URL, relative-location mode and forwarded headers, in that order.
    pub fn upload_url(&self, req: &Request, upload_id: &str) -> TusResult<String> {
        let path = if self.path == "/" { "" } else { self.path.as_str() };

        let HostProto { proto, host } =
            Self::extract_host_and_proto(req.headers(), self.respect_forwarded_headers);

        if let Some(callback) = &self.generate_url_function {
            return callback(
                req,
                GenerateUrlCtx {
                    proto,
                    host,
                    path,
                    id: upload_id,
                },
            );
        }

        if let Some(base) = &self.base_url {
            return Ok(format!("{}/{upload_id}", base.trim_end_matches('/')));
        }

        if self.relative_location {
            return Ok(format!("{path}/{upload_id}"));
        }

        Ok(format!("{proto}://{host}{path}/{upload_id}"))
    }

    fn extract_host_and_proto(headers: &HeaderMap, respect_forwarded_headers: bool) -> HostProto<'_> {
        let mut proto: &str = "http";
        let mut host: &str = "localhost";

        if respect_forwarded_headers {
            // RFC 7239 Forwarded wins over the legacy X-Forwarded-* pair.
            if let Some(v) = headers.get("forwarded").and_then(|v| v.to_str().ok()) {
                if let Some(h) = parse_forwarded_param(v, "host") {
                    host = h;
                }
                if let Some(p) = parse_forwarded_param(v, "proto") {
                    proto = p;
                }
            }

            if host == "localhost"
                && let Some(v) = headers
                    .get("x-forwarded-host")
                    .and_then(|v| v.to_str().ok())
            {
                host = v.split(',').next().unwrap_or(v).trim();
            }

            if proto == "http"
                && let Some(v) = headers
                    .get("x-forwarded-proto")
                    .and_then(|v| v.to_str().ok())
            {
                proto = v.split(',').next().unwrap_or(v).trim();
            }

            // Anything that is not plain http(s) cannot go into a Location
            // URL; fall back instead of echoing arbitrary schemes.
            if proto != "http" && proto != "https" {
                proto = "http";
            }
        }

        if host == "localhost"
            && let Some(v) = headers.get(header::HOST).and_then(|v| v.to_str().ok())
        {
            host = v.trim();
        }

        HostProto { proto, host }
    }
}

/// Extracts one parameter from an RFC 7239 `Forwarded` header. Multiple
/// forwarding hops are comma-separated; the first (closest to the client)
/// wins.
fn parse_forwarded_param<'a>(forwarded: &'a str, key: &str) -> Option<&'a str> {
    let first = forwarded.split(',').next()?.trim();

    for part in first.split(';') {
        let (k, v) = part.trim().split_once('=')?;
        if k.trim().eq_ignore_ascii_case(key) {
            let v = v.trim().trim_matches('"');
            if !v.is_empty() {
                return Some(v);
            }
        }
    }
    None
}
