/// Organisation directory used for approver, CC and escalation lookups
///
/// Loaded once at startup and shared read-only, so every lookup is a pure function of
/// the snapshot.

use crate::workflow::types::UserId;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrgDirectory {
    /// role name -> members
    #[serde(default)]
    pub roles: BTreeMap<String, BTreeSet<UserId>>,
    /// department name -> members
    #[serde(default)]
    pub departments: BTreeMap<String, BTreeSet<UserId>>,
    /// user -> direct manager
    #[serde(default)]
    pub managers: BTreeMap<UserId, UserId>,
}

impl OrgDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a directory snapshot from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read directory file '{}'", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse directory file '{}'", path.display()))
    }

    pub fn with_role<I, S>(mut self, role: &str, users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<UserId>,
    {
        self.roles
            .entry(role.to_string())
            .or_default()
            .extend(users.into_iter().map(Into::into));
        self
    }

    pub fn with_department<I, S>(mut self, department: &str, users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<UserId>,
    {
        self.departments
            .entry(department.to_string())
            .or_default()
            .extend(users.into_iter().map(Into::into));
        self
    }

    pub fn with_manager(mut self, user: &str, manager: &str) -> Self {
        self.managers.insert(user.to_string(), manager.to_string());
        self
    }

    pub fn users_in_role(&self, role: &str) -> BTreeSet<UserId> {
        self.roles.get(role).cloned().unwrap_or_default()
    }

    pub fn users_in_department(&self, department: &str) -> BTreeSet<UserId> {
        self.departments.get(department).cloned().unwrap_or_default()
    }

    pub fn manager_of(&self, user: &str) -> Option<&UserId> {
        self.managers.get(user)
    }
}
