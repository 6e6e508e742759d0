//! HTTP boundary of the order fulfillment service.
//!
//! Exposes the saga coordinator over REST, gating flash-sale products
//! through the in-memory admission ledger before an order is started.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use event_store::EventStore;
use inventory::Database;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use routes::orders::{AppState, Coordinator};

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S, D>(state: Arc<AppState<S, D>>) -> Router
where
    S: EventStore + Clone + 'static,
    D: Database + 'static,
{
    let orders = Router::new()
        .route("/orders", post(routes::orders::create::<S, D>))
        .route("/orders/{id}", get(routes::orders::status::<S, D>))
        .route("/orders/{id}/pay", post(routes::orders::pay::<S, D>))
        .route("/orders/{id}/audit", post(routes::orders::audit::<S, D>))
        .with_state(state);

    Router::new()
        .route("/health", get(routes::health::check))
        .nest("/api/v1", orders)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
