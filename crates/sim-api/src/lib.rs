//! HTTP Surface: the `/api` REST routes and the `/ws` subscriber channel.
//! Wires the Store, Engine, Event Bus, Subscriber Hub, and AI Caller
//! together behind one `axum::Router`; the process entrypoint lives in
//! `src/bin/sim_service.rs`.

pub mod error;
pub mod routes;
pub mod state;
pub mod ws;

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use state::AppState;

/// Builds the full application router: `/api/*` REST routes plus `/ws`,
/// CORS and request tracing layered over all of them.
pub fn build_router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/health", get(routes::health::health))
        .route("/strategies", get(routes::strategies::list).post(routes::strategies::create))
        .route("/strategies/top", get(routes::strategies::top))
        .route("/strategies/:id", get(routes::strategies::get))
        .route("/trigger/create-strategy", post(routes::triggers::create_strategy))
        .route("/trigger/simulate/:id", post(routes::triggers::simulate))
        .route("/trigger/stop/:id", post(routes::triggers::stop))
        .route("/trigger/status/:id", get(routes::triggers::status))
        .route("/trigger/analyze", post(routes::triggers::analyze))
        .route("/simulations/running", get(routes::simulations::running))
        .route("/simulations/summary/:id", get(routes::simulations::summary))
        .route("/ai/analysis/:id", get(routes::ai::analysis))
        .route("/dashboard/stats", get(routes::dashboard::stats))
        .route("/dashboard/charts", get(routes::dashboard::charts))
        .route("/dashboard/complete", get(routes::dashboard::complete));

    Router::new()
        .nest("/api", api)
        .route("/ws", get(ws::ws_handler))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Keep-alive sweep cadence for the Subscriber Hub: sends nothing itself
/// (clients ping over the JSON protocol), just evicts connections silent
/// past the pong timeout.
pub const HUB_SWEEP_INTERVAL: Duration = Duration::from_secs(30);
