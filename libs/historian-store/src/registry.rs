//! Backend registry: backend id -> connected backend

use dashmap::DashMap;
use std::sync::Arc;

use crate::error::{Result, StoreError};
use crate::traits::StorageBackend;

/// Connected backends keyed by backend id
#[derive(Default)]
pub struct BackendRegistry {
    backends: DashMap<String, Arc<dyn StorageBackend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend, returning the one it replaced
    pub fn insert(
        &self,
        id: impl Into<String>,
        backend: Arc<dyn StorageBackend>,
    ) -> Option<Arc<dyn StorageBackend>> {
        self.backends.insert(id.into(), backend)
    }

    pub fn get(&self, id: &str) -> Result<Arc<dyn StorageBackend>> {
        self.backends
            .get(id)
            .map(|b| Arc::clone(b.value()))
            .ok_or_else(|| StoreError::BackendNotFound(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.backends.contains_key(id)
    }

    pub fn remove(&self, id: &str) -> Option<Arc<dyn StorageBackend>> {
        self.backends.remove(id).map(|(_, b)| b)
    }

    pub fn ids(&self) -> Vec<String> {
        self.backends.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}
