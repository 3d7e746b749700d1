use std::sync::Arc;

use crate::backend::ChatBackend;
use crate::catalog::ModelCatalog;
use crate::config::Settings;
use crate::metrics::Metrics;
use crate::policy::Policies;

// app's shared state, handed to handlers as Arc<AppState>
pub struct AppState {
    pub metrics: Arc<Metrics>,
    pub backend: Arc<dyn ChatBackend>,
    pub catalog: Arc<dyn ModelCatalog>,
    pub policies: Policies,
    pub settings: Settings,
}

impl AppState {
    pub fn new(
        metrics: Arc<Metrics>,
        backend: Arc<dyn ChatBackend>,
        catalog: Arc<dyn ModelCatalog>,
        settings: Settings,
    ) -> Self {
        Self {
            metrics,
            backend,
            catalog,
            policies: Policies::default(),
            settings,
        }
    }

    #[cfg(test)]
    pub fn with_policies(mut self, policies: Policies) -> Self {
        self.policies = policies;
        self
    }

    /// llama.cpp accounting for `model` on the configured backend.
    pub fn is_llama_cpp(&self, model: &str) -> bool {
        self.policies
            .is_llama_cpp(model, &self.settings.base_url)
    }
}
