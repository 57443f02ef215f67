use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::config::WorkflowOverrides;
use crate::diff::Shorthand;
use crate::document::PeerId;

/// The stored inverse of one mutation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RollbackEntry {
    pub id: Uuid,
    pub user_id: PeerId,
    /// Unique within a Subject's stack
    pub name: String,
    pub delta: Shorthand,
    /// Comparison key used for each collection the delta touches
    pub comparison_keys: BTreeMap<String, String>,
    /// Opaque options forwarded to the store when the delta is applied
    #[serde(default)]
    pub update_options: Value,
    #[serde(default)]
    pub overrides: WorkflowOverrides,
    #[serde(default)]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl RollbackEntry {
    pub fn new(user_id: PeerId, name: impl Into<String>, delta: Shorthand) -> Self {
        let comparison_keys = delta.config.comparison_keys.clone();
        Self {
            id: Uuid::new_v4(),
            user_id,
            name: name.into(),
            delta,
            comparison_keys,
            update_options: Value::Null,
            overrides: WorkflowOverrides::default(),
            description: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_update_options(mut self, options: Value) -> Self {
        self.update_options = options;
        self
    }

    pub fn with_overrides(mut self, overrides: WorkflowOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }

    /// The delta to apply on revert, with the recorded comparison keys.
    pub fn revert_shorthand(&self) -> Shorthand {
        let mut shorthand = self.delta.clone();
        for (collection, key) in &self.comparison_keys {
            shorthand
                .config
                .comparison_keys
                .entry(collection.clone())
                .or_insert_with(|| key.clone());
        }
        shorthand
    }
}
