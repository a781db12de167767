use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::application::{error::ErrorReport, render::service::RenderError};

pub const MISSING_CODE_MESSAGE: &str = "Missing 'code' in request";

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Render-failure body carrying the captured subprocess diagnostics; emitted
/// only while `http.verbose_errors` is enabled.
#[derive(Debug, Serialize)]
pub struct RenderFailureBody {
    pub error: String,
    pub expected: String,
    pub temp_files: Vec<String>,
    pub stdout: String,
    pub stderr: String,
}

/// 400 for a request body that is absent, unparseable, or lacks `code`.
pub fn missing_code() -> Response {
    let mut response = (
        StatusCode::BAD_REQUEST,
        Json(ErrorBody {
            error: MISSING_CODE_MESSAGE.to_string(),
        }),
    )
        .into_response();
    ErrorReport::from_message(
        "infra::http::render",
        StatusCode::BAD_REQUEST,
        MISSING_CODE_MESSAGE,
    )
    .attach(&mut response);
    response
}

/// Map a render pipeline failure onto the wire contract: 503 when the gate is
/// saturated, otherwise 500, with the full diagnostic payload for an
/// unresolved output when verbose errors are enabled.
pub fn render_error_response(err: RenderError, verbose: bool) -> Response {
    let status = match &err {
        RenderError::Busy => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let report = ErrorReport::from_error("infra::http::render", status, &err);

    let mut response = match err {
        RenderError::Unresolved {
            expected,
            temp_files,
            stdout,
            stderr,
        } if verbose => (
            status,
            Json(RenderFailureBody {
                error: "failed to generate output file".to_string(),
                expected,
                temp_files,
                stdout,
                stderr,
            }),
        )
            .into_response(),
        err => (
            status,
            Json(ErrorBody {
                error: err.to_string(),
            }),
        )
            .into_response(),
    };

    report.attach(&mut response);
    response
}
