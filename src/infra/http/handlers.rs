use axum::{
    Json,
    extract::State,
    http::header::CONTENT_TYPE,
    response::{IntoResponse, Response},
};
use bytes::Bytes;

use crate::application::render::{
    DiagnosticsReport, diagnostics,
    types::{OutputFormat, RenderPayload},
};

use super::{error, state::HttpState};

/// `POST /render`: render the submitted diagram source and stream the image
/// back. Every fault is converted to a JSON error response here; a single
/// request can never take the process down.
pub async fn render(State(state): State<HttpState>, body: Bytes) -> Response {
    // The body is parsed by hand so an absent or malformed body reports the
    // same client error as a present body without `code`.
    let payload = match serde_json::from_slice::<RenderPayload>(&body) {
        Ok(payload) => payload,
        Err(_) => return error::missing_code(),
    };
    let Some(code) = payload.code else {
        return error::missing_code();
    };
    let format = OutputFormat::new(payload.format.as_deref());

    match state.render.render(&code, &format).await {
        Ok(image) => ([(CONTENT_TYPE, image.mime)], image.bytes).into_response(),
        Err(err) => error::render_error_response(err, state.verbose_errors),
    }
}

/// `POST /test-simple`: render the fixed sample diagram and report the raw
/// invocation outcome.
pub async fn test_simple(State(state): State<HttpState>) -> Response {
    match state.render.render_sample().await {
        Ok(report) => Json(report).into_response(),
        Err(err) => error::render_error_response(err, state.verbose_errors),
    }
}

/// `GET /test`: toolchain health report.
pub async fn test_server(State(state): State<HttpState>) -> Json<DiagnosticsReport> {
    Json(diagnostics::probe(state.render.invoker(), state.render.workspace()).await)
}
