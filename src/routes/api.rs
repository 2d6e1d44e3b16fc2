use crate::config::MAX_BODY_SIZE;
use crate::handlers;
use crate::models::error::api_error;
use crate::routes::{api_key::api_key_middleware, AppState};
use axum::error_handling::HandleErrorLayer;
use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{middleware, BoxError, Router};
use std::time::Duration;
use tower::buffer::BufferLayer;
use tower::limit::RateLimitLayer;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

/// Assemble the full application router: the `/api` group behind the
/// rate limiter and optional API-key gate, plus the static frontend with an
/// `index.html` fallback for client-side routes.
pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/session", post(handlers::create_session))
        .route("/session/:sessionid", get(handlers::session_ws))
        .route("/socket/:room", get(handlers::room_ws))
        .route(
            "/file/:fileid",
            get(handlers::get_file).put(handlers::save_file),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            api_key_middleware,
        ))
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(|err: BoxError| async move {
                    api_error(
                        StatusCode::TOO_MANY_REQUESTS,
                        format!("rate limit exceeded: {err}"),
                    )
                    .into_response()
                }))
                .layer(BufferLayer::new(1024))
                .layer(RateLimitLayer::new(
                    state.config.api_rpm(),
                    Duration::from_secs(60),
                )),
        )
        .with_state(state.clone());

    let index = format!("{}/index.html", state.config.static_dir);
    Router::new()
        .nest("/api", api_routes)
        .fallback_service(ServeDir::new(&state.config.static_dir).not_found_service(ServeFile::new(index)))
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
