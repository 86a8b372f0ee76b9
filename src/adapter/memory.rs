/// Configurable in-memory entity adapter
///
/// Holds entities as flat [`EntityData`] records and keeps their approval status in
/// step with the engine's hooks. Validation is a list of required fields plus optional
/// custom rules; CC recipients come from directory roles, optionally gated by a
/// condition (e.g. an extra department for imported goods).

use crate::adapter::EntityAdapter;
use crate::approval::types::ApprovalInstance;
use crate::condition::{Condition, EntityData, OrgDirectory, Scalar};
use crate::workflow::types::UserId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Approval-related status of a business entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityStatus {
    Draft,
    PendingApproval,
    Approved,
    Rejected,
    Withdrawn,
}

impl EntityStatus {
    fn as_str(self) -> &'static str {
        match self {
            EntityStatus::Draft => "draft",
            EntityStatus::PendingApproval => "pending_approval",
            EntityStatus::Approved => "approved",
            EntityStatus::Rejected => "rejected",
            EntityStatus::Withdrawn => "withdrawn",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EntityRecord {
    pub data: EntityData,
    pub status: EntityStatus,
    /// Instance that last moved this entity's status
    pub last_instance_id: Option<String>,
}

type ValidationRule = Box<dyn Fn(&EntityData) -> Result<(), String> + Send + Sync>;

pub struct InMemoryAdapter {
    business_type: String,
    /// Human label used in messages and fallbacks (e.g. "Purchase order")
    label: String,
    directory: Arc<OrgDirectory>,
    records: RwLock<HashMap<String, EntityRecord>>,
    required_fields: Vec<String>,
    rules: Vec<ValidationRule>,
    title_field: Option<String>,
    summary_fields: Vec<String>,
    cc_roles: Vec<String>,
    conditional_cc: Vec<(Condition, String)>,
}

impl InMemoryAdapter {
    pub fn new(business_type: &str, label: &str, directory: Arc<OrgDirectory>) -> Self {
        Self {
            business_type: business_type.to_string(),
            label: label.to_string(),
            directory,
            records: RwLock::new(HashMap::new()),
            required_fields: Vec::new(),
            rules: Vec::new(),
            title_field: None,
            summary_fields: Vec::new(),
            cc_roles: Vec::new(),
            conditional_cc: Vec::new(),
        }
    }

    pub fn require(mut self, field: &str) -> Self {
        self.required_fields.push(field.to_string());
        self
    }

    /// Extra precondition checked after required fields
    pub fn with_rule<F>(mut self, rule: F) -> Self
    where
        F: Fn(&EntityData) -> Result<(), String> + Send + Sync + 'static,
    {
        self.rules.push(Box::new(rule));
        self
    }

    pub fn title_from(mut self, field: &str) -> Self {
        self.title_field = Some(field.to_string());
        self
    }

    pub fn summarize(mut self, fields: &[&str]) -> Self {
        self.summary_fields = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn cc_role(mut self, role: &str) -> Self {
        self.cc_roles.push(role.to_string());
        self
    }

    /// CC a role only when `condition` holds for the entity
    pub fn cc_role_when(mut self, condition: Condition, role: &str) -> Self {
        self.conditional_cc.push((condition, role.to_string()));
        self
    }

    /// Insert or replace an entity; it starts (again) as a draft
    pub async fn upsert(&self, id: &str, data: EntityData) {
        let mut records = self.records.write().await;
        let record = records.entry(id.to_string()).or_insert_with(|| EntityRecord {
            data: EntityData::new(),
            status: EntityStatus::Draft,
            last_instance_id: None,
        });
        record.data = data;
        if record.status != EntityStatus::PendingApproval {
            record.status = EntityStatus::Draft;
        }
    }

    pub async fn remove(&self, id: &str) -> bool {
        self.records.write().await.remove(id).is_some()
    }

    pub async fn status(&self, id: &str) -> Option<EntityStatus> {
        self.records.read().await.get(id).map(|record| record.status)
    }

    pub async fn record(&self, id: &str) -> Option<EntityRecord> {
        self.records.read().await.get(id).cloned()
    }

    async fn set_status(&self, id: &str, status: EntityStatus, instance: &ApprovalInstance) {
        let mut records = self.records.write().await;
        match records.get_mut(id) {
            Some(record) => {
                record.status = status;
                record.last_instance_id = Some(instance.id.clone());
                tracing::debug!("{} {} -> {}", self.business_type, id, status.as_str());
            }
            None => {
                tracing::debug!("{} {} no longer exists; status hook skipped", self.business_type, id);
            }
        }
    }
}

fn display(value: &Scalar) -> String {
    match value {
        Scalar::Bool(b) => b.to_string(),
        Scalar::Number(n) => n.to_string(),
        Scalar::Text(s) => s.clone(),
        Scalar::Null => "-".to_string(),
    }
}

#[async_trait]
impl EntityAdapter for InMemoryAdapter {
    fn business_type(&self) -> &str {
        &self.business_type
    }

    async fn get_entity(&self, id: &str) -> Option<serde_json::Value> {
        let records = self.records.read().await;
        let record = records.get(id)?;
        serde_json::to_value(record).ok()
    }

    async fn get_entity_data(&self, id: &str) -> EntityData {
        let records = self.records.read().await;
        match records.get(id) {
            Some(record) => record
                .data
                .clone()
                .with("entity_status", record.status.as_str()),
            None => EntityData::new(),
        }
    }

    async fn validate_submit(&self, id: &str) -> Result<(), String> {
        let records = self.records.read().await;
        let Some(record) = records.get(id) else {
            return Err(format!("{} not found", self.label));
        };

        if record.status == EntityStatus::PendingApproval {
            return Err(format!("{} {} is already pending approval", self.label, id));
        }
        if record.status == EntityStatus::Approved {
            return Err(format!("{} {} is already approved", self.label, id));
        }

        for field in &self.required_fields {
            let present = record.data.get(field).map(|v| !v.is_null()).unwrap_or(false);
            if !present {
                return Err(format!("{} is required", field));
            }
        }

        for rule in &self.rules {
            rule(&record.data)?;
        }

        Ok(())
    }

    async fn on_submit(&self, id: &str, instance: &ApprovalInstance) -> anyhow::Result<()> {
        self.set_status(id, EntityStatus::PendingApproval, instance).await;
        Ok(())
    }

    async fn on_approved(&self, id: &str, instance: &ApprovalInstance) -> anyhow::Result<()> {
        self.set_status(id, EntityStatus::Approved, instance).await;
        Ok(())
    }

    async fn on_rejected(&self, id: &str, instance: &ApprovalInstance) -> anyhow::Result<()> {
        self.set_status(id, EntityStatus::Rejected, instance).await;
        Ok(())
    }

    async fn on_withdrawn(&self, id: &str, instance: &ApprovalInstance) -> anyhow::Result<()> {
        self.set_status(id, EntityStatus::Withdrawn, instance).await;
        Ok(())
    }

    async fn generate_title(&self, id: &str) -> String {
        let records = self.records.read().await;
        match records.get(id) {
            Some(record) => {
                let name = self
                    .title_field
                    .as_deref()
                    .and_then(|field| record.data.get(field))
                    .filter(|value| !value.is_null())
                    .map(display)
                    .unwrap_or_else(|| id.to_string());
                format!("{} {}", self.label, name)
            }
            None => format!("{} approval", self.label),
        }
    }

    async fn generate_summary(&self, id: &str) -> String {
        let records = self.records.read().await;
        match records.get(id) {
            Some(record) => self
                .summary_fields
                .iter()
                .filter_map(|field| record.data.get(field).map(|v| format!("{}: {}", field, display(v))))
                .collect::<Vec<_>>()
                .join(", "),
            None => "No details available".to_string(),
        }
    }

    async fn get_cc_user_ids(&self, id: &str) -> BTreeSet<UserId> {
        let records = self.records.read().await;
        let Some(record) = records.get(id) else {
            return BTreeSet::new();
        };

        let mut users = BTreeSet::new();
        for role in &self.cc_roles {
            users.extend(self.directory.users_in_role(role));
        }
        for (condition, role) in &self.conditional_cc {
            if condition.evaluate(&record.data) {
                users.extend(self.directory.users_in_role(role));
            }
        }
        users
    }
}
