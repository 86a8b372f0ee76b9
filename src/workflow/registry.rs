/// Hot-reload registry of workflow definitions
///
/// Readers take a lock-free snapshot through `ArcSwap`; every update builds a new map
/// and swaps the pointer, so in-flight decisions keep the definitions they started with.

use crate::error::{EngineError, EngineResult};
use crate::workflow::{storage::DefinitionStorage, types::WorkflowDefinition};
use arc_swap::ArcSwap;
use std::{collections::HashMap, sync::Arc};

#[derive(Debug)]
pub struct DefinitionRegistry {
    /// flow_code -> definition
    definitions: ArcSwap<HashMap<String, Arc<WorkflowDefinition>>>,
    storage: DefinitionStorage,
}

impl DefinitionRegistry {
    pub fn new(storage: DefinitionStorage) -> Self {
        Self {
            definitions: ArcSwap::new(Arc::new(HashMap::new())),
            storage,
        }
    }

    pub fn storage(&self) -> &DefinitionStorage {
        &self.storage
    }

    /// Load every stored definition; invalid ones are logged and left out
    pub async fn init_from_storage(&self) -> EngineResult<()> {
        let stored = self.storage.load_all_definitions().await?;
        let mut loaded = HashMap::new();

        for definition in stored {
            match definition.validate() {
                Ok(()) => {
                    loaded.insert(definition.flow_code.clone(), Arc::new(definition));
                }
                Err(e) => {
                    tracing::warn!("Skipping invalid workflow definition {}: {}", definition.flow_code, e);
                }
            }
        }

        self.definitions.store(Arc::new(loaded));
        tracing::info!("Initialized definition registry with {} flows", self.definitions.load().len());

        Ok(())
    }

    /// Persist a definition and swap it into the registry
    pub async fn upsert(&self, definition: WorkflowDefinition) -> EngineResult<()> {
        self.storage.save_definition(&definition).await?;
        self.reload(&definition.flow_code).await
    }

    /// Re-read one definition from storage
    pub async fn reload(&self, flow_code: &str) -> EngineResult<()> {
        let definition = self
            .storage
            .get_definition(flow_code)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("workflow definition {}", flow_code)))?;
        definition.validate()?;

        let current = self.definitions.load();
        let mut next = (**current).clone();
        next.insert(flow_code.to_string(), Arc::new(definition));
        self.definitions.store(Arc::new(next));

        tracing::info!("Hot-reloaded workflow definition: {}", flow_code);
        Ok(())
    }

    /// Delete from storage and registry; returns whether it existed
    pub async fn remove(&self, flow_code: &str) -> EngineResult<bool> {
        let existed = self.storage.delete_definition(flow_code).await?;

        let current = self.definitions.load();
        if current.contains_key(flow_code) {
            let mut next = (**current).clone();
            next.remove(flow_code);
            self.definitions.store(Arc::new(next));
            tracing::info!("Removed workflow definition from registry: {}", flow_code);
        }

        Ok(existed)
    }

    pub fn get(&self, flow_code: &str) -> Option<Arc<WorkflowDefinition>> {
        self.definitions.load().get(flow_code).cloned()
    }

    /// All definitions serving a business type, ordered by flow_code
    pub fn for_business_type(&self, business_type: &str) -> Vec<WorkflowDefinition> {
        let mut matching: Vec<WorkflowDefinition> = self
            .definitions
            .load()
            .values()
            .filter(|def| def.business_type == business_type)
            .map(|def| (**def).clone())
            .collect();
        matching.sort_by(|a, b| a.flow_code.cmp(&b.flow_code));
        matching
    }

    pub fn flow_codes(&self) -> Vec<String> {
        let mut codes: Vec<String> = self.definitions.load().keys().cloned().collect();
        codes.sort();
        codes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::types::{ApproverResolver, Node, NodeKind};
    use sqlx::sqlite::SqlitePoolOptions;

    async fn registry() -> DefinitionRegistry {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let storage = DefinitionStorage::new(pool);
        storage.init_schema().await.unwrap();
        DefinitionRegistry::new(storage)
    }

    fn definition(flow_code: &str, business_type: &str) -> WorkflowDefinition {
        WorkflowDefinition {
            flow_code: flow_code.into(),
            business_type: business_type.into(),
            name: flow_code.to_uppercase(),
            applies_when: None,
            nodes: vec![Node {
                sequence: 1,
                name: "manager".into(),
                kind: NodeKind::Sequential,
                approvers: ApproverResolver::Static { user_ids: vec!["m".into()] },
                minimum_approval_count: None,
                veto_approver_ids: Default::default(),
                skip_unless: None,
                routes: vec![],
                escalation: None,
            }],
        }
    }

    #[tokio::test]
    async fn upsert_reload_and_remove() {
        let registry = registry().await;
        registry.upsert(definition("po-b", "purchase_order")).await.unwrap();
        registry.upsert(definition("po-a", "purchase_order")).await.unwrap();
        registry.upsert(definition("inv", "invoice")).await.unwrap();

        let po: Vec<String> = registry
            .for_business_type("purchase_order")
            .into_iter()
            .map(|d| d.flow_code)
            .collect();
        assert_eq!(po, vec!["po-a", "po-b"]);

        assert!(registry.remove("po-a").await.unwrap());
        assert!(registry.get("po-a").is_none());
        assert!(!registry.remove("po-a").await.unwrap());
        assert_eq!(registry.flow_codes(), vec!["inv", "po-b"]);
    }

    #[tokio::test]
    async fn invalid_definitions_are_not_stored() {
        let registry = registry().await;
        let mut broken = definition("broken", "quote");
        broken.nodes.clear();

        assert!(matches!(
            registry.upsert(broken).await,
            Err(EngineError::InvalidDefinition(_))
        ));
        assert!(registry.storage().get_definition("broken").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn init_from_storage_loads_persisted_definitions() {
        let registry = registry().await;
        registry
            .storage()
            .save_definition(&definition("quote-std", "quote"))
            .await
            .unwrap();
        assert!(registry.get("quote-std").is_none());

        registry.init_from_storage().await.unwrap();
        assert_eq!(registry.get("quote-std").unwrap().business_type, "quote");
    }
}
