//! Cross-cutting request handling: method override, CORS and the protocol
//! version gate.

use std::sync::Arc;

use salvo_core::http::{HeaderValue, Method, header};
use salvo_core::{Depot, FlowCtrl, Handler, Request, Response, async_trait};

use crate::error::TusError;
use crate::handlers::respond_error;
use crate::utils::check_tus_version;
use crate::{H_METHOD_OVERRIDE, H_TUS_RESUMABLE, H_TUS_VERSION, TUS_VERSION, Tus};

const ALLOWED_METHODS: &str = "POST, GET, HEAD, PATCH, DELETE, OPTIONS";
const ALLOWED_HEADERS: &str = "Authorization, Origin, X-Requested-With, X-Request-ID, \
     X-HTTP-Method-Override, Content-Type, Content-Length, Upload-Length, Upload-Offset, \
     Tus-Resumable, Upload-Metadata, Upload-Defer-Length, Upload-Concat";
const EXPOSED_HEADERS: &str = "Upload-Offset, Location, Upload-Length, Tus-Version, \
     Tus-Resumable, Tus-Max-Size, Tus-Extension, Upload-Metadata, Upload-Defer-Length, \
     Upload-Concat";

/// Applies `X-HTTP-Method-Override` before routing, so clients that cannot
/// emit PATCH or DELETE can tunnel them through POST.
///
/// Must be hooped on the [`Service`](salvo_core::Service), not the router:
/// route matching already dispatched on the method by the time router hoops
/// run.
#[derive(Clone, Copy, Debug, Default)]
pub struct MethodOverride;

#[async_trait]
impl Handler for MethodOverride {
    async fn handle(
        &self,
        req: &mut Request,
        depot: &mut Depot,
        res: &mut Response,
        ctrl: &mut FlowCtrl,
    ) {
        if let Some(name) = req
            .headers()
            .get(H_METHOD_OVERRIDE)
            .and_then(|v| v.to_str().ok())
            && let Ok(method) = name.trim().to_ascii_uppercase().parse::<Method>()
        {
            *req.method_mut() = method;
        }
        ctrl.call_next(req, depot, res).await;
    }
}

/// Per-request protocol plumbing shared by every handler: injects the
/// service state, stamps the always-on response headers, answers CORS, and
/// enforces the `Tus-Resumable` version gate.
pub(crate) struct TusHoop {
    state: Arc<Tus>,
}

impl TusHoop {
    pub(crate) fn new(state: Arc<Tus>) -> Self {
        Self { state }
    }

    fn origin_allowed(&self, origin: &str) -> bool {
        let allowed = &self.state.options.allowed_origins;
        allowed.is_empty() || allowed.iter().any(|o| o == origin)
    }

    fn extend_list(base: &str, extra: &[String]) -> HeaderValue {
        if extra.is_empty() {
            HeaderValue::from_str(base)
        } else {
            HeaderValue::from_str(&format!("{base}, {}", extra.join(", ")))
        }
        .unwrap_or(HeaderValue::from_static(""))
    }
}

#[async_trait]
impl Handler for TusHoop {
    async fn handle(
        &self,
        req: &mut Request,
        depot: &mut Depot,
        res: &mut Response,
        ctrl: &mut FlowCtrl,
    ) {
        let opts = &self.state.options;
        self.state.metrics.incr_requests();
        depot.inject(self.state.clone());

        res.headers_mut()
            .insert(H_TUS_RESUMABLE, HeaderValue::from_static(TUS_VERSION));
        res.headers_mut().insert(
            "x-content-type-options",
            HeaderValue::from_static("nosniff"),
        );

        let origin = req.headers().get(header::ORIGIN).cloned();
        if let Some(origin) = origin
            && origin
                .to_str()
                .is_ok_and(|value| self.origin_allowed(value))
        {
            res.headers_mut()
                .insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin);
            if opts.allow_credentials {
                res.headers_mut().insert(
                    header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
                    HeaderValue::from_static("true"),
                );
            }

            if req.method() == Method::OPTIONS {
                res.headers_mut().insert(
                    header::ACCESS_CONTROL_ALLOW_METHODS,
                    HeaderValue::from_static(ALLOWED_METHODS),
                );
                res.headers_mut().insert(
                    header::ACCESS_CONTROL_ALLOW_HEADERS,
                    Self::extend_list(ALLOWED_HEADERS, &opts.allowed_headers),
                );
                res.headers_mut().insert(
                    header::ACCESS_CONTROL_MAX_AGE,
                    HeaderValue::from_static("86400"),
                );
            } else {
                res.headers_mut().insert(
                    header::ACCESS_CONTROL_EXPOSE_HEADERS,
                    Self::extend_list(EXPOSED_HEADERS, &opts.exposed_headers),
                );
            }
        }

        // GET is exempt per protocol; OPTIONS must work without any tus
        // headers so discovery and preflights never 412.
        let method = req.method().clone();
        if method != Method::GET && method != Method::OPTIONS {
            let version = req
                .headers()
                .get(H_TUS_RESUMABLE)
                .and_then(|v| v.to_str().ok());
            if let Err(e) = check_tus_version(version) {
                res.headers_mut()
                    .insert(H_TUS_VERSION, HeaderValue::from_static(TUS_VERSION));
                respond_error(res, &TusError::Protocol(e));
                self.state.metrics.incr_errors();
                ctrl.skip_rest();
                return;
            }
        }

        ctrl.call_next(req, depot, res).await;

        if res
            .status_code
            .is_some_and(|s| s.is_client_error() || s.is_server_error())
        {
            self.state.metrics.incr_errors();
        }
    }
}

impl std::fmt::Debug for TusHoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TusHoop").finish_non_exhaustive()
    }
}
