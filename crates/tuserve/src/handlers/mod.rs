//! Per-verb protocol handlers.

mod delete;
mod get;
mod head;
mod options;
mod patch;
mod post;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

pub(crate) use delete::remove;
use futures_util::StreamExt;
pub(crate) use get::download;
pub(crate) use head::status;
pub(crate) use options::capabilities;
pub(crate) use patch::write_chunk;
pub(crate) use post::create;
use salvo_core::http::HeaderValue;
use salvo_core::{Depot, Request, Response};

use bytes::Bytes;

use crate::error::{ProtocolError, TusError, TusResult};
use crate::stores::UploadInfo;
use crate::{H_CONTENT_LENGTH, H_UPLOAD_OFFSET, StopHandle, Tus};

pub(crate) fn obtain_state(depot: &Depot) -> Arc<Tus> {
    depot
        .obtain::<Arc<Tus>>()
        .expect("tus state missing from depot")
        .clone()
}

/// Error response with a plain-text message body.
pub(crate) fn respond_error(res: &mut Response, err: &TusError) {
    res.status_code(err.status());
    let _ = res.write_body(format!("{err}\n"));
}

/// Error response without a body, for HEAD.
pub(crate) fn respond_status(res: &mut Response, err: &TusError) {
    res.status_code(err.status());
}

/// Error response for a failed append. The store's durable offset is
/// reported alongside so the client knows where to resume from.
pub(crate) async fn respond_append_error(
    state: &Arc<Tus>,
    res: &mut Response,
    id: &str,
    err: &TusError,
) {
    if let Ok(current) = state.composer.core().info(id).await
        && let Ok(value) = HeaderValue::from_str(&current.offset.to_string())
    {
        res.headers_mut().insert(H_UPLOAD_OFFSET, value);
    }
    respond_error(res, err);
}

pub(crate) struct AppendOutcome {
    pub(crate) new_offset: u64,
    pub(crate) completed: bool,
}

/// The append path shared by PATCH and creation-with-upload.
///
/// The request body is hard-limited to the bytes the upload can still take:
/// surplus on a known-size upload is silently discarded, while overrunning
/// the configured max size of a deferred-length upload fails with 413 after
/// the allowed bytes were stored. The store's byte count is authoritative;
/// on failure the caller reports the durable offset via
/// [`respond_append_error`].
pub(crate) async fn append_upload_body(
    state: &Arc<Tus>,
    req: &mut Request,
    info: &UploadInfo,
    max_file_size: u64,
    stop: StopHandle,
) -> TusResult<AppendOutcome> {
    let offset = info.offset;

    let content_length = req
        .headers()
        .get(H_CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());

    // A declared body that cannot fit is refused before reading anything.
    if let Some(declared) = content_length {
        let refused = match info.size {
            Some(size) => declared > size.saturating_sub(offset),
            None => max_file_size > 0 && offset + declared > max_file_size,
        };
        if refused {
            return Err(ProtocolError::MaxSizeExceeded.into());
        }
    }

    let limit = match info.size {
        Some(size) => Some(size.saturating_sub(offset)),
        None if max_file_size > 0 => Some(max_file_size.saturating_sub(offset)),
        None => None,
    };
    // Overrunning a known size is tolerated (surplus dropped); overrunning
    // the max size of a deferred-length upload is an error.
    let enforce_limit = info.size.is_none() && max_file_size > 0;
    let overflowed = Arc::new(AtomicBool::new(false));

    // The body arrives as hyper frames. Only data frames carry upload
    // bytes; a trailer frame makes `into_data` hand the frame back, and we
    // flatten it to an empty chunk, which the limiter and the store both
    // skip. Transport failures still surface through the item's Err side.
    let frames = req.take_body().map(|item| {
        item.map(|frame| frame.into_data().unwrap_or_else(|_trailers| Bytes::new()))
    });

    let flag = overflowed.clone();
    let limited = frames.scan(limit, move |budget, item| {
        let out = match item {
            Err(e) => Some(Err(e)),
            Ok(chunk) => match budget {
                None => Some(Ok(chunk)),
                Some(remaining) => {
                    if *remaining == 0 {
                        if !chunk.is_empty() {
                            flag.store(true, Ordering::Relaxed);
                        }
                        None
                    } else if (chunk.len() as u64) <= *remaining {
                        *remaining -= chunk.len() as u64;
                        Some(Ok(chunk))
                    } else {
                        let keep = chunk.slice(0..*remaining as usize);
                        *remaining = 0;
                        flag.store(true, Ordering::Relaxed);
                        Some(Ok(keep))
                    }
                }
            },
        };
        futures_util::future::ready(out)
    });

    let notifier = state.notifier.clone();
    let progress_interval = state.options.post_receive_interval;
    let mut template = info.clone();
    let mut received = 0u64;
    let mut last_emit = Instant::now();
    let observed = limited.inspect(move |item| {
        let Ok(chunk) = item else { return };
        received += chunk.len() as u64;
        if let Some(interval) = progress_interval
            && last_emit.elapsed() >= interval
        {
            last_emit = Instant::now();
            template.offset = offset + received;
            notifier.notify_progress(template.clone());
        }
    });

    // A stop signal ends the stream; whatever the store accepted so far
    // stays durable and visible to the next HEAD.
    let watcher = stop.clone();
    let stoppable = observed.take_until(Box::pin(async move {
        watcher.stopped().await;
    }));

    let written = state
        .composer
        .core()
        .append(&info.id, offset, Box::pin(stoppable))
        .await?;

    state.metrics.add_bytes_received(written);
    let new_offset = offset + written;

    if stop.is_aborted() {
        tracing::info!(id = %info.id, offset = new_offset, "upload stopped by server");
        if let Some(terminator) = state.composer.terminator()
            && terminator.terminate(&info.id).await.is_ok()
        {
            let mut snapshot = info.clone();
            snapshot.offset = new_offset;
            state.notifier.notify_terminated(snapshot);
            state.metrics.incr_uploads_terminated();
        }
        return Err(TusError::UploadStopped);
    }

    if enforce_limit && overflowed.load(Ordering::Relaxed) {
        return Err(ProtocolError::MaxSizeExceeded.into());
    }

    let completed = info.size == Some(new_offset);
    if completed {
        if let Some(finisher) = state.composer.finisher() {
            finisher.finish(&info.id).await?;
        }
        // Partial uploads only ever complete through the final upload that
        // concatenates them.
        if !info.is_partial {
            let mut snapshot = info.clone();
            snapshot.offset = new_offset;
            state.notifier.notify_completed(snapshot);
            state.metrics.incr_uploads_finished();
        }
    }

    Ok(AppendOutcome {
        new_offset,
        completed,
    })
}

/// Lets the `on_upload_finish` callback adjust the completion response.
pub(crate) async fn apply_finish_hook(
    state: &Arc<Tus>,
    req: &Request,
    upload: UploadInfo,
    res: &mut Response,
) {
    let Some(hook) = &state.options.on_upload_finish else {
        return;
    };
    match hook(req, upload).await {
        Ok(patch) => {
            if let Some(status_code) = patch.status_code {
                res.status_code(status_code);
            }
            if let Some(headers) = patch.headers {
                for (name, value) in headers.iter() {
                    if !res.headers().contains_key(name) {
                        res.headers_mut().insert(name.clone(), value.clone());
                    }
                }
            }
            if let Some(body) = patch.body {
                let _ = res.write_body(body);
            }
        }
        Err(e) => respond_error(res, &e),
    }
}
