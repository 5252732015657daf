//! HTTP routes.
//!
//! - `/health`, `/metrics`: public
//! - `/v1/account*`: behind [`require_auth`]

use axum::{middleware, routing::get, Router};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::metrics::metrics_handler;
use crate::middleware::require_auth;
use crate::state::AppState;

pub mod account;
pub mod health;

/// Build the full application router.
pub fn create_api_router(state: AppState) -> Router {
    let protected = account::create_router()
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(health::create_router())
        .route("/metrics", get(metrics_handler))
        .merge(protected)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}
