/// Process-wide adapter registry
///
/// Built once at startup through [`AdapterRegistryBuilder`] and read-only afterwards;
/// there is no API to add or remove adapters from a built registry.

use crate::adapter::EntityAdapter;
use anyhow::{bail, Result};
use std::{collections::HashMap, sync::Arc};

#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: Arc<HashMap<String, Arc<dyn EntityAdapter>>>,
}

#[derive(Default)]
pub struct AdapterRegistryBuilder {
    adapters: HashMap<String, Arc<dyn EntityAdapter>>,
}

impl AdapterRegistryBuilder {
    /// Register an adapter under its business type; duplicates are an error
    pub fn register(mut self, adapter: Arc<dyn EntityAdapter>) -> Result<Self> {
        let business_type = adapter.business_type().to_string();
        if self.adapters.contains_key(&business_type) {
            bail!("Adapter already registered for business type '{}'", business_type);
        }
        tracing::debug!("Registered entity adapter: {}", business_type);
        self.adapters.insert(business_type, adapter);
        Ok(self)
    }

    pub fn build(self) -> AdapterRegistry {
        tracing::info!("Adapter registry built with {} business types", self.adapters.len());
        AdapterRegistry {
            adapters: Arc::new(self.adapters),
        }
    }
}

impl AdapterRegistry {
    pub fn builder() -> AdapterRegistryBuilder {
        AdapterRegistryBuilder::default()
    }

    pub fn get(&self, business_type: &str) -> Option<Arc<dyn EntityAdapter>> {
        self.adapters.get(business_type).cloned()
    }

    pub fn business_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.adapters.keys().cloned().collect();
        types.sort();
        types
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("business_types", &self.business_types())
            .finish()
    }
}
