use futures_util::StreamExt;
use salvo_core::http::{HeaderValue, StatusCode, header};
use salvo_core::{Depot, Request, Response, handler};

use crate::StopHandle;
use crate::error::TusError;
use crate::handlers::{obtain_state, respond_error};

/// Non-standard download endpoint streaming the stored bytes `[0, offset)`.
#[handler]
pub(crate) async fn download(req: &mut Request, depot: &mut Depot, res: &mut Response) {
    let state = obtain_state(depot);
    let opts = &state.options;

    let Some(reader) = state.composer.reader() else {
        respond_error(res, &TusError::UnsupportedByStore("content download"));
        return;
    };

    let Some(id) = req.param::<String>("id") else {
        respond_error(res, &TusError::NotFound);
        return;
    };

    let lock = match opts.acquire_lock(&id, &StopHandle::new()).await {
        Ok(lock) => lock,
        Err(e) => {
            respond_error(res, &e);
            return;
        }
    };

    let info = match state.composer.core().info(&id).await {
        Ok(info) => info,
        Err(e) => {
            respond_error(res, &e.into());
            return;
        }
    };

    if info.offset == 0 {
        res.status_code(StatusCode::NO_CONTENT);
        return;
    }

    let stream = match reader.reader(&id).await {
        Ok(stream) => stream,
        Err(e) => {
            respond_error(res, &e.into());
            return;
        }
    };

    res.status_code(StatusCode::OK);
    res.headers_mut().insert(
        header::CONTENT_LENGTH,
        HeaderValue::from_str(&info.offset.to_string()).expect("numeric header"),
    );
    res.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    if let Some(filename) = info.metadata.get_str("filename") {
        let disposition = format!("inline;filename=\"{}\"", filename.replace('"', ""));
        if let Ok(value) = HeaderValue::from_str(&disposition) {
            res.headers_mut().insert(header::CONTENT_DISPOSITION, value);
        }
    }

    // The lock and the reader's resources are released together once the
    // body has been streamed out.
    let guarded = stream.map(move |item| {
        let _hold = &lock;
        item
    });
    res.stream(guarded);
}
