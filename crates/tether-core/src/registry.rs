//! Closed registry mapping session kind strings to adapters.

use std::{collections::HashMap, sync::Arc};

use thiserror::Error;

use crate::traits::SessionAdapter;

/// Lookup failure for an unregistered kind. Always fatal; there is no
/// fallback adapter.
#[derive(Debug, Error)]
#[error("no adapter registered for session kind {0:?}")]
pub struct UnknownKind(pub String);

/// Registry of session type adapters, keyed by kind string.
#[derive(Default, Clone)]
pub struct AdapterRegistry {
    adapters: HashMap<&'static str, Arc<dyn SessionAdapter>>,
}

impl AdapterRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its own kind string. Replaces any
    /// previous adapter for the same kind.
    pub fn register(&mut self, adapter: Arc<dyn SessionAdapter>) {
        self.adapters.insert(adapter.kind(), adapter);
    }

    /// Builder-style registration.
    #[must_use]
    pub fn with(mut self, adapter: Arc<dyn SessionAdapter>) -> Self {
        self.register(adapter);
        self
    }

    /// Look up the adapter for a kind.
    ///
    /// # Errors
    /// Returns `UnknownKind` if no adapter is registered for `kind`.
    pub fn get(&self, kind: &str) -> Result<Arc<dyn SessionAdapter>, UnknownKind> {
        self.adapters
            .get(kind)
            .cloned()
            .ok_or_else(|| UnknownKind(kind.to_string()))
    }

    /// Registered kind strings.
    #[must_use]
    pub fn kinds(&self) -> Vec<&'static str> {
        self.adapters.keys().copied().collect()
    }
}
