use salvo_core::http::{HeaderValue, StatusCode};
use salvo_core::{Depot, Request, Response, handler};

use crate::error::{ProtocolError, TusError};
use crate::handlers::{
    append_upload_body, apply_finish_hook, obtain_state, respond_append_error, respond_error,
};
use crate::utils::parse_u64;
use crate::{CT_OFFSET_OCTET_STREAM, H_CONTENT_TYPE, H_UPLOAD_LENGTH, H_UPLOAD_OFFSET};

/// Appends a chunk at exactly the upload's current offset.
#[handler]
pub(crate) async fn write_chunk(req: &mut Request, depot: &mut Depot, res: &mut Response) {
    let state = obtain_state(depot);
    let opts = &state.options;

    let Some(id) = req.param::<String>("id") else {
        respond_error(res, &TusError::NotFound);
        return;
    };

    let content_type = req
        .headers()
        .get(H_CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    if content_type != Some(CT_OFFSET_OCTET_STREAM) {
        respond_error(res, &ProtocolError::InvalidContentType.into());
        return;
    }

    let sent_offset = match parse_u64(
        req.headers()
            .get(H_UPLOAD_OFFSET)
            .and_then(|v| v.to_str().ok()),
        H_UPLOAD_OFFSET,
    ) {
        Ok(offset) => offset,
        Err(_) => {
            respond_error(res, &ProtocolError::InvalidOffset.into());
            return;
        }
    };

    let lease = state.track_upload(&id);
    let _lock = match opts.acquire_lock(&id, &lease.stop).await {
        Ok(lock) => lock,
        Err(e) => {
            respond_error(res, &e);
            return;
        }
    };

    let mut info = match state.composer.core().info(&id).await {
        Ok(info) => info,
        Err(e) => {
            respond_error(res, &e.into());
            return;
        }
    };

    if info.is_final {
        respond_error(res, &TusError::ModifyFinal);
        return;
    }

    if sent_offset != info.offset {
        tracing::info!(id = %id, sent = sent_offset, current = info.offset, "offset mismatch");
        respond_error(
            res,
            &TusError::MismatchOffset {
                current: info.offset,
                sent: sent_offset,
            },
        );
        return;
    }

    // Appends to a completed upload are idempotent no-ops.
    if info.is_complete() {
        res.status_code(StatusCode::NO_CONTENT);
        res.headers_mut().insert(
            H_UPLOAD_OFFSET,
            HeaderValue::from_str(&info.offset.to_string()).expect("numeric header"),
        );
        return;
    }

    let max_file_size = opts.configured_max_size(req, Some(id.clone())).await;

    if let Some(raw) = req.headers().get(H_UPLOAD_LENGTH) {
        let declared = match parse_u64(raw.to_str().ok(), H_UPLOAD_LENGTH) {
            Ok(declared) => declared,
            Err(e) => {
                respond_error(res, &e.into());
                return;
            }
        };

        if !info.size_is_deferred() {
            respond_error(res, &ProtocolError::InvalidUploadLength.into());
            return;
        }
        let Some(deferrer) = state.composer.length_deferrer() else {
            respond_error(res, &TusError::UnsupportedByStore("creation-defer-length"));
            return;
        };
        if declared < info.offset {
            respond_error(res, &ProtocolError::InvalidUploadLength.into());
            return;
        }
        if max_file_size > 0 && declared > max_file_size {
            respond_error(res, &ProtocolError::MaxSizeExceeded.into());
            return;
        }

        if let Err(e) = deferrer.declare_length(&id, declared).await {
            respond_error(res, &e.into());
            return;
        }
        info.size = Some(declared);
    }

    match append_upload_body(&state, req, &info, max_file_size, lease.stop.clone()).await {
        Ok(outcome) => {
            res.status_code(StatusCode::NO_CONTENT);
            res.headers_mut().insert(
                H_UPLOAD_OFFSET,
                HeaderValue::from_str(&outcome.new_offset.to_string()).expect("numeric header"),
            );
            if outcome.completed && !info.is_partial {
                let mut upload = info.clone();
                upload.offset = outcome.new_offset;
                apply_finish_hook(&state, req, upload, res).await;
            }
        }
        Err(err) => respond_append_error(&state, res, &id, &err).await,
    }
}
