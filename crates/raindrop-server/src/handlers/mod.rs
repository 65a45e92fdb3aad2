mod health;
mod ids;

pub use health::health_handler;
pub use ids::{decode_id_handler, next_id_for_handler, next_id_handler, worker_handler};
