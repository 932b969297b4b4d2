use salvo_core::http::{HeaderValue, StatusCode};
use salvo_core::{Depot, Request, Response, handler};

use crate::error::TusError;
use crate::handlers::{obtain_state, respond_status};
use crate::{H_UPLOAD_CONCAT, H_UPLOAD_DEFER_LENGTH, H_UPLOAD_LENGTH, H_UPLOAD_METADATA, H_UPLOAD_OFFSET, StopHandle};

/// Upload status: the current offset plus the descriptor headers a client
/// needs to resume. Takes the exclusive lock so the reported offset is
/// never torn by a concurrent append.
#[handler]
pub(crate) async fn status(req: &mut Request, depot: &mut Depot, res: &mut Response) {
    let state = obtain_state(depot);
    let opts = &state.options;

    let Some(id) = req.param::<String>("id") else {
        respond_status(res, &TusError::NotFound);
        return;
    };

    let _lock = match opts.acquire_lock(&id, &StopHandle::new()).await {
        Ok(lock) => lock,
        Err(e) => {
            respond_status(res, &e);
            return;
        }
    };

    let info = match state.composer.core().info(&id).await {
        Ok(info) => info,
        Err(e) => {
            respond_status(res, &e.into());
            return;
        }
    };

    res.status_code(StatusCode::OK);
    res.headers_mut()
        .insert("cache-control", HeaderValue::from_static("no-store"));
    res.headers_mut().insert(
        H_UPLOAD_OFFSET,
        HeaderValue::from_str(&info.offset.to_string()).expect("numeric header"),
    );

    if let Some(size) = info.size {
        res.headers_mut().insert(
            H_UPLOAD_LENGTH,
            HeaderValue::from_str(&size.to_string()).expect("numeric header"),
        );
    } else {
        res.headers_mut()
            .insert(H_UPLOAD_DEFER_LENGTH, HeaderValue::from_static("1"));
    }

    if let Some(serialized) = info.metadata.to_header()
        && let Ok(value) = HeaderValue::from_str(&serialized)
    {
        res.headers_mut().insert(H_UPLOAD_METADATA, value);
    }

    if info.is_partial {
        res.headers_mut()
            .insert(H_UPLOAD_CONCAT, HeaderValue::from_static("partial"));
    } else if info.is_final {
        let mut urls = Vec::with_capacity(info.partial_uploads.len());
        for partial_id in &info.partial_uploads {
            match opts.upload_url(req, partial_id) {
                Ok(url) => urls.push(url),
                Err(e) => {
                    respond_status(res, &e);
                    return;
                }
            }
        }
        if let Ok(value) = HeaderValue::from_str(&format!("final;{}", urls.join(" "))) {
            res.headers_mut().insert(H_UPLOAD_CONCAT, value);
        }
    }
}
