//! HTTP surface for the checkout consistency layer.
//!
//! Provides the coupon issuance endpoint, operator endpoints over the
//! dead-letter store, and a health report on the lock circuit breaker,
//! with structured logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use config::{Config, LogFormat};
pub use state::{AppState, Backends, InMemoryBackends, PostgresBackends, create_in_memory_state};

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<B: Backends>(state: Arc<AppState<B>>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check::<B>))
        .route("/coupons", post(routes::coupons::create::<B>))
        .route("/coupons/{id}", get(routes::coupons::get::<B>))
        .route("/coupons/{id}/issue", post(routes::coupons::issue::<B>))
        .route("/dead-letters", get(routes::dead_letters::list::<B>))
        .route(
            "/dead-letters/pending/count",
            get(routes::dead_letters::pending_count::<B>),
        )
        .route("/dead-letters/{id}", get(routes::dead_letters::get::<B>))
        .route(
            "/dead-letters/{id}/reprocess",
            post(routes::dead_letters::reprocess::<B>),
        )
        .route(
            "/dead-letters/{id}/ignore",
            post(routes::dead_letters::ignore::<B>),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
