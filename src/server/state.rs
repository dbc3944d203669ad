use std::sync::Arc;

use crate::generate::Generator;

#[derive(Clone)]
pub struct AppState {
    pub generator: Arc<Generator>,
}

impl AppState {
    pub fn new(generator: Arc<Generator>) -> Self {
        Self { generator }
    }
}
