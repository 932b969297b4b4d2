use salvo_core::http::StatusCode;
use salvo_core::{Depot, Request, Response, handler};

use crate::StopHandle;
use crate::error::TusError;
use crate::handlers::{obtain_state, respond_error};

/// Terminates an upload, removing its descriptor and content.
#[handler]
pub(crate) async fn remove(req: &mut Request, depot: &mut Depot, res: &mut Response) {
    let state = obtain_state(depot);
    let opts = &state.options;

    let Some(terminator) = state.composer.terminator() else {
        respond_error(res, &TusError::TerminationUnsupported);
        return;
    };

    let Some(id) = req.param::<String>("id") else {
        respond_error(res, &TusError::NotFound);
        return;
    };

    let _lock = match opts.acquire_lock(&id, &StopHandle::new()).await {
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

    if opts.disable_termination_for_finished_uploads && info.is_complete() {
        res.status_code(StatusCode::FORBIDDEN);
        let _ = res.write_body("termination of a finished upload is disabled\n");
        return;
    }

    match terminator.terminate(&id).await {
        Ok(()) => {
            res.status_code(StatusCode::NO_CONTENT);
            tracing::info!(id = %id, "upload terminated");
            state.notifier.notify_terminated(info);
            state.metrics.incr_uploads_terminated();
        }
        Err(e) => respond_error(res, &e.into()),
    }
}
