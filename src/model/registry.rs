use crate::config::ModelRole;
use crate::model::InferenceModel;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

type ModelMap = HashMap<ModelRole, Arc<dyn InferenceModel>>;

/// Maps a model role to its loaded network, plus the load error for any
/// role that failed. Lookups take the read lock only.
#[derive(Clone, Default)]
pub struct ModelRegistry {
    models: Arc<RwLock<ModelMap>>,
    failures: Arc<RwLock<HashMap<ModelRole, String>>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, role: ModelRole, model: Arc<dyn InferenceModel>) {
        if let Ok(mut failures) = self.failures.write() {
            failures.remove(&role);
        }
        if let Ok(mut map) = self.models.write() {
            map.insert(role, model);
        }
    }

    pub fn record_failure(&self, role: ModelRole, reason: String) {
        if let Ok(mut failures) = self.failures.write() {
            failures.insert(role, reason);
        }
    }

    pub fn get(&self, role: ModelRole) -> Option<Arc<dyn InferenceModel>> {
        self.models.read().ok()?.get(&role).cloned()
    }

    pub fn failures(&self) -> HashMap<ModelRole, String> {
        self.failures
            .read()
            .map(|f| f.clone())
            .unwrap_or_default()
    }

    /// Both classification stages are loaded.
    pub fn is_ready(&self) -> bool {
        self.get(ModelRole::Detector).is_some() && self.get(ModelRole::SubtypeClassifier).is_some()
    }
}
