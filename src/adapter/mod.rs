/// Entity adapter contract
///
/// The engine never looks inside business entities. Each business type (purchase order,
/// acceptance order, quote, invoice, ...) plugs in through one [`EntityAdapter`]
/// implementation registered at startup in the [`AdapterRegistry`].

pub mod memory;
pub mod registry;

pub use memory::{EntityStatus, InMemoryAdapter};
pub use registry::{AdapterRegistry, AdapterRegistryBuilder};

use crate::approval::types::ApprovalInstance;
use crate::condition::EntityData;
use crate::workflow::types::UserId;
use async_trait::async_trait;
use std::collections::BTreeSet;

#[async_trait]
pub trait EntityAdapter: Send + Sync {
    /// Business type served by this adapter (registry key)
    fn business_type(&self) -> &str;

    /// Raw entity as JSON, `None` when it does not exist
    async fn get_entity(&self, id: &str) -> Option<serde_json::Value>;

    /// Entity plus shallow relations flattened to scalars; empty when not found.
    /// Rates must be on the 0-100 scale.
    async fn get_entity_data(&self, id: &str) -> EntityData;

    /// First unmet submit precondition, or `Ok(())`.
    /// A missing entity yields `Err("<entity> not found")`.
    async fn validate_submit(&self, id: &str) -> Result<(), String>;

    // Status hooks. Each must succeed as a no-op when the entity no longer exists.

    async fn on_submit(&self, id: &str, instance: &ApprovalInstance) -> anyhow::Result<()>;

    async fn on_approved(&self, id: &str, instance: &ApprovalInstance) -> anyhow::Result<()>;

    async fn on_rejected(&self, id: &str, instance: &ApprovalInstance) -> anyhow::Result<()>;

    async fn on_withdrawn(&self, id: &str, instance: &ApprovalInstance) -> anyhow::Result<()>;

    /// Display title; a fixed fallback when the entity is missing
    async fn generate_title(&self, id: &str) -> String;

    /// Display summary; a fixed fallback when the entity is missing
    async fn generate_summary(&self, id: &str) -> String;

    /// Deduplicated CC recipients for notifications
    async fn get_cc_user_ids(&self, id: &str) -> BTreeSet<UserId>;
}
