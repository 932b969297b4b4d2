use salvo_core::http::{HeaderValue, StatusCode};
use salvo_core::{Depot, Request, Response, handler};

use crate::handlers::obtain_state;
use crate::options::MaxSize;
use crate::stores::Extension;
use crate::{H_TUS_EXTENSION, H_TUS_MAX_SIZE, H_TUS_VERSION, TUS_VERSION};

/// Protocol discovery (and the response half of CORS preflights, whose
/// `Access-Control-*` headers the middleware already stamped).
///
/// Responds 200 rather than 204: some clients reject 204 preflights.
#[handler]
pub(crate) async fn capabilities(_req: &mut Request, depot: &mut Depot, res: &mut Response) {
    let state = obtain_state(depot);

    res.status_code(StatusCode::OK);
    res.headers_mut()
        .insert(H_TUS_VERSION, HeaderValue::from_static(TUS_VERSION));

    let extensions = Extension::to_header_value(&state.composer.extensions());
    if let Ok(value) = HeaderValue::from_str(&extensions) {
        res.headers_mut().insert(H_TUS_EXTENSION, value);
    }

    if let Some(MaxSize::Fixed(max)) = &state.options.max_size
        && *max > 0
        && let Ok(value) = HeaderValue::from_str(&max.to_string())
    {
        res.headers_mut().insert(H_TUS_MAX_SIZE, value);
    }

    res.render("");
}
