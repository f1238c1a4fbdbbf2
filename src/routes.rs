use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use convertly_core::{Advisor, AdvisorRequest, AdvisorResponse, Error};
use serde::Serialize;
use tracing::{info, warn};

#[derive(Clone)]
struct AppState {
    advisor: Arc<dyn Advisor>,
}

#[derive(Serialize, Debug)]
pub struct ErrorResponse {
    pub error: String,
}

/// An advisor failure rendered as `{"error": ...}` with a matching status.
struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::Validation(_) | Error::InvalidFileType { .. } => StatusCode::BAD_REQUEST,
            Error::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        warn!(status = status.as_u16(), error = %self.0, "optimize request failed");
        let body = ErrorResponse {
            error: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

pub fn router(advisor: Arc<dyn Advisor>) -> Router {
    Router::new()
        .route("/api/optimize", post(optimize))
        .route("/health", get(|| async { "OK" }))
        .with_state(AppState { advisor })
}

// The body is parsed by hand so malformed JSON gets the same error shape
// as out-of-range values.
async fn optimize(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<AdvisorResponse>, ApiError> {
    let request: AdvisorRequest = serde_json::from_slice(&body)
        .map_err(|e| Error::Validation(format!("invalid request body: {e}")))?;
    request.validate()?;

    let response = state.advisor.advise(&request).await?;
    info!(
        format = %request.target_format,
        speed = request.compression_speed,
        adjusted_speed = response.adjusted_compression_speed,
        "advised"
    );
    Ok(Json(response))
}
