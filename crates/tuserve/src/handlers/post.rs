use std::sync::Arc;

use salvo_core::http::{HeaderValue, StatusCode, header};
use salvo_core::{Depot, Request, Response, handler};

use crate::concat::UploadConcat;
use crate::error::{ProtocolError, TusError};
use crate::handlers::{
    append_upload_body, apply_finish_hook, obtain_state, respond_append_error, respond_error,
};
use crate::metadata::Metadata;
use crate::stores::UploadInfo;
use crate::utils::parse_u64;
use crate::{
    CT_OFFSET_OCTET_STREAM, H_CONTENT_LENGTH, H_CONTENT_TYPE, H_UPLOAD_CONCAT,
    H_UPLOAD_DEFER_LENGTH, H_UPLOAD_LENGTH, H_UPLOAD_METADATA, H_UPLOAD_OFFSET, Tus,
};

/// Creates an upload: regular, partial, final (concatenation), or
/// creation-with-upload when a body in the offset media type is attached.
#[handler]
pub(crate) async fn create(req: &mut Request, depot: &mut Depot, res: &mut Response) {
    let state = obtain_state(depot);
    let opts = &state.options;

    // A body is only meaningful as creation-with-upload; any other non-empty
    // content type is refused outright.
    let has_body = match req
        .headers()
        .get(H_CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
    {
        Some(value) if value == CT_OFFSET_OCTET_STREAM => true,
        Some(value) if !value.trim().is_empty() => {
            respond_error(res, &ProtocolError::InvalidContentType.into());
            return;
        }
        _ => false,
    };

    let concat = match req
        .headers()
        .get(H_UPLOAD_CONCAT)
        .and_then(|v| v.to_str().ok())
    {
        Some(raw) => {
            if !state.composer.supports_concatenation() {
                respond_error(res, &TusError::UnsupportedByStore("concatenation"));
                return;
            }
            match UploadConcat::parse(raw) {
                Ok(parsed) => Some(parsed),
                Err(e) => {
                    respond_error(res, &e.into());
                    return;
                }
            }
        }
        None => None,
    };

    let metadata = req
        .headers()
        .get(H_UPLOAD_METADATA)
        .and_then(|v| v.to_str().ok())
        .map(Metadata::parse)
        .unwrap_or_default();

    let upload_id = match (opts.upload_id_naming_function)(req, &metadata).await {
        Ok(id) => id,
        Err(e) => {
            respond_error(res, &e);
            return;
        }
    };
    let max_file_size = opts
        .configured_max_size(req, Some(upload_id.clone()))
        .await;

    if let Some(UploadConcat::Final { parts }) = &concat {
        let content_length = req
            .headers()
            .get(H_CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(0);
        if has_body || content_length > 0 {
            respond_error(res, &TusError::ModifyFinal);
            return;
        }
        create_final(&state, req, res, upload_id, parts, metadata, max_file_size).await;
        return;
    }

    let upload_length = req.headers().get(H_UPLOAD_LENGTH).cloned();
    let defer_length = req.headers().get(H_UPLOAD_DEFER_LENGTH).cloned();

    if let Some(value) = &defer_length {
        if !state.composer.supports_length_deferral() {
            respond_error(res, &TusError::UnsupportedByStore("creation-defer-length"));
            return;
        }
        if value.to_str().ok() != Some("1") {
            respond_error(res, &ProtocolError::InvalidUploadLength.into());
            return;
        }
    }

    // Exactly one of Upload-Length and Upload-Defer-Length.
    if upload_length.is_none() == defer_length.is_none() {
        respond_error(res, &ProtocolError::InvalidUploadLength.into());
        return;
    }

    let size = match &upload_length {
        Some(value) => match parse_u64(value.to_str().ok(), H_UPLOAD_LENGTH) {
            Ok(size) => Some(size),
            Err(e) => {
                respond_error(res, &e.into());
                return;
            }
        },
        None => None,
    };

    if let Some(size) = size
        && max_file_size > 0
        && size > max_file_size
    {
        respond_error(res, &ProtocolError::MaxSizeExceeded.into());
        return;
    }

    let mut upload = UploadInfo::new(upload_id.clone());
    upload.size = size;
    upload.metadata = metadata;
    upload.is_partial = matches!(concat, Some(UploadConcat::Partial));

    if let Some(hook) = &opts.on_upload_create {
        match hook(req, upload.clone()).await {
            Ok(patch) => {
                if let Some(metadata) = patch.metadata {
                    upload.metadata = metadata;
                }
            }
            Err(e) => {
                respond_error(res, &e);
                return;
            }
        }
    }

    let mut upload = match state.composer.core().create(upload).await {
        Ok(upload) => upload,
        Err(e) => {
            respond_error(res, &e.into());
            return;
        }
    };
    state.notifier.notify_created(upload.clone());
    state.metrics.incr_uploads_created();
    tracing::info!(id = %upload_id, size = ?upload.size, partial = upload.is_partial, "upload created");

    let location = match opts.upload_url(req, &upload_id) {
        Ok(url) => url,
        Err(_) => {
            respond_error(res, &TusError::GenerateUploadUrl);
            return;
        }
    };

    res.status_code(StatusCode::CREATED);

    if has_body {
        let lease = state.track_upload(&upload_id);
        let _lock = match opts.acquire_lock(&upload_id, &lease.stop).await {
            Ok(lock) => lock,
            Err(e) => {
                respond_error(res, &e);
                return;
            }
        };

        match append_upload_body(&state, req, &upload, max_file_size, lease.stop.clone()).await {
            Ok(outcome) => {
                upload.offset = outcome.new_offset;
                res.headers_mut().insert(
                    H_UPLOAD_OFFSET,
                    HeaderValue::from_str(&outcome.new_offset.to_string())
                        .expect("numeric header"),
                );
                if outcome.completed && !upload.is_partial {
                    apply_finish_hook(&state, req, upload.clone(), res).await;
                }
            }
            Err(err) => {
                // The upload exists; keep Location so the client can resume.
                respond_append_error(&state, res, &upload_id, &err).await;
                set_location(res, &location);
                return;
            }
        }
    } else if upload.size == Some(0) {
        // Nothing to transfer: complete at creation time.
        if let Some(finisher) = state.composer.finisher()
            && let Err(e) = finisher.finish(&upload_id).await
        {
            respond_error(res, &e.into());
            return;
        }
        if !upload.is_partial {
            state.notifier.notify_completed(upload.clone());
            state.metrics.incr_uploads_finished();
            apply_finish_hook(&state, req, upload.clone(), res).await;
        }
    }

    set_location(res, &location);
}

/// Creates a final upload from completed partials and concatenates them.
async fn create_final(
    state: &Arc<Tus>,
    req: &mut Request,
    res: &mut Response,
    upload_id: String,
    parts: &[String],
    metadata: Metadata,
    max_file_size: u64,
) {
    let store = state.composer.core();

    let mut total: u64 = 0;
    for partial_id in parts {
        let part = match store.info(partial_id).await {
            Ok(part) => part,
            Err(e) => {
                respond_error(res, &e.into());
                return;
            }
        };
        if !part.is_partial {
            respond_error(res, &ProtocolError::InvalidConcat.into());
            return;
        }
        if !part.is_complete() {
            respond_error(res, &TusError::UploadNotFinished);
            return;
        }
        total += part.offset;
    }

    if max_file_size > 0 && total > max_file_size {
        respond_error(res, &ProtocolError::MaxSizeExceeded.into());
        return;
    }

    let mut upload = UploadInfo::new(upload_id.clone());
    upload.size = Some(total);
    upload.metadata = metadata;
    upload.is_final = true;
    upload.partial_uploads = parts.to_vec();

    if let Some(hook) = &state.options.on_upload_create {
        match hook(req, upload.clone()).await {
            Ok(patch) => {
                if let Some(metadata) = patch.metadata {
                    upload.metadata = metadata;
                }
            }
            Err(e) => {
                respond_error(res, &e);
                return;
            }
        }
    }

    let mut upload = match store.create(upload).await {
        Ok(upload) => upload,
        Err(e) => {
            respond_error(res, &e.into());
            return;
        }
    };
    state.notifier.notify_created(upload.clone());
    state.metrics.incr_uploads_created();

    let Some(concatenator) = state.composer.concatenator() else {
        respond_error(res, &TusError::UnsupportedByStore("concatenation"));
        return;
    };
    if let Err(e) = concatenator.concatenate(&upload.id, &upload.partial_uploads).await {
        respond_error(res, &e.into());
        return;
    }
    upload.offset = total;
    tracing::info!(id = %upload.id, size = total, sources = parts.len(), "final upload concatenated");

    state.notifier.notify_completed(upload.clone());
    state.metrics.incr_uploads_finished();

    let location = match state.options.upload_url(req, &upload.id) {
        Ok(url) => url,
        Err(_) => {
            respond_error(res, &TusError::GenerateUploadUrl);
            return;
        }
    };

    res.status_code(StatusCode::CREATED);
    apply_finish_hook(state, req, upload, res).await;
    set_location(res, &location);
}

fn set_location(res: &mut Response, location: &str) {
    if let Ok(value) = HeaderValue::from_str(location) {
        res.headers_mut().insert(header::LOCATION, value);
    }
}
