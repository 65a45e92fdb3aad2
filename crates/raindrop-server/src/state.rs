use std::sync::Arc;

use raindrop_worker::Raindrop;

#[derive(Clone)]
pub struct AppState {
    raindrop: Arc<Raindrop>,
}

impl AppState {
    pub fn new(raindrop: Arc<Raindrop>) -> Self {
        Self { raindrop }
    }

    pub fn raindrop(&self) -> &Arc<Raindrop> {
        &self.raindrop
    }
}
