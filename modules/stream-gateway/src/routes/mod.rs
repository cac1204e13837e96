pub mod events;
pub mod health;
pub mod summaries;
pub mod ws;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health::root))
        .route("/api/health", get(health::health))
        .route("/api/stats", get(health::stats))
        .route("/metrics", get(health::metrics))
        .route("/api/templates", get(events::templates))
        .route("/api/simulate", post(events::simulate_event))
        .route("/api/scenario/{name}", post(events::run_scenario))
        .route("/api/summaries", get(summaries::get_summaries))
        .route("/ws", get(ws::ws_handler))
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
        .layer(TraceLayer::new_for_http())
}
