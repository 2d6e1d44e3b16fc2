use crate::models::error::{api_error, ApiError};
use crate::routes::AppState;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::warn;

/// `X-API-Key` gate for the API group.
///
/// Keys are compared as SHA-256 digests in constant time. Session creation
/// stays open so a fresh client can obtain its edit URL without a key.
pub async fn api_key_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if !state.config.api_key_auth || state.config.api_keys.is_empty() {
        return Ok(next.run(req).await);
    }

    // the router is nested under /api, so the session path arrives stripped
    let path = req.uri().path();
    if path == "/session" || path == "/api/session" {
        return Ok(next.run(req).await);
    }

    let provided = match req.headers().get("x-api-key").and_then(|v| v.to_str().ok()) {
        Some(value) => value,
        None => {
            warn!(path = %path, "request without API key");
            return Err(api_error(
                StatusCode::UNAUTHORIZED,
                "missing or malformed API key",
            ));
        }
    };

    let provided_hash = Sha256::digest(provided.as_bytes());
    for key in &state.config.api_keys {
        let key_hash = Sha256::digest(key.as_bytes());
        if bool::from(provided_hash.as_slice().ct_eq(key_hash.as_slice())) {
            return Ok(next.run(req).await);
        }
    }

    warn!(path = %path, "request with invalid API key");
    Err(api_error(
        StatusCode::UNAUTHORIZED,
        "missing or malformed API key",
    ))
}
