use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::handlers::{
    decode_id_handler, health_handler, next_id_for_handler, next_id_handler, worker_handler,
};
use crate::state::AppState;

pub struct App {}

impl App {
    pub fn router(state: AppState) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .nest(
                "/v1",
                Router::new()
                    .route("/ids", get(next_id_handler))
                    .route("/ids/{code}", get(next_id_for_handler))
                    .route("/ids/decode/{id}", get(decode_id_handler))
                    .route("/worker", get(worker_handler)),
            )
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }
}
