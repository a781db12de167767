use std::sync::Arc;

use crate::application::render::RenderService;

#[derive(Clone)]
pub struct HttpState {
    pub render: Arc<RenderService>,
    /// Whether render-failure responses carry the full subprocess diagnostic
    /// payload. Off for deployments facing untrusted clients.
    pub verbose_errors: bool,
}
