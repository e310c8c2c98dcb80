use std::sync::Arc;
use streamgate_config::Config;
use streamgate_core::SessionSupervisor;

/// Shared application state handed to every handler.
#[derive(Clone, Debug)]
pub struct AppState {
    supervisor: SessionSupervisor,
    config: Arc<Config>,
}

impl AppState {
    pub fn new(supervisor: SessionSupervisor, config: Arc<Config>) -> Self {
        Self { supervisor, config }
    }

    pub fn supervisor(&self) -> &SessionSupervisor {
        &self.supervisor
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}
