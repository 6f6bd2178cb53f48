use axum::{
    body::Body,
    extract::State,
    http::{header, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};

use tgapi_core::security::{bearer_token, token_matches};

use crate::{error::ApiError, router::AppState};

/// Per-endpoint access attribute.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Access {
    Open,
    Bearer,
}

/// Reject requests without `Authorization: Bearer <API_TOKEN>`.
pub async fn require_bearer(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let presented = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(bearer_token);

    match presented {
        Some(token) if token_matches(token, &state.api_token) => next.run(request).await,
        _ => {
            tracing::debug!(path = %request.uri().path(), "rejected request without valid bearer token");
            ApiError::unauthorized().into_response()
        }
    }
}
