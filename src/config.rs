//! Peer configuration and workflow settings
//!
//! Settings are plain reads: a world-level auto-accept default plus two
//! tri-state client overrides. Storage is a single JSON file; a missing file
//! yields defaults.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),
}

/// Client-side override of a world-level default.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriState {
    #[default]
    Inherit,
    ForceTrue,
    ForceFalse,
}

impl TriState {
    pub fn resolve(self, default: bool) -> bool {
        match self {
            TriState::Inherit => default,
            TriState::ForceTrue => true,
            TriState::ForceFalse => false,
        }
    }
}

/// Order in which an update queue lane drains its pending writes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DrainOrder {
    /// Most recently enqueued write runs first.
    #[default]
    Lifo,
    /// Oldest write runs first.
    Fifo,
}

/// Per-request workflow overrides carried with a mutation.
///
/// Batch operations force both flags on for every request after the first
/// accepted one sent to the same authority.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowOverrides {
    pub always_accept: bool,
    pub suppress_notice: bool,
}

impl WorkflowOverrides {
    pub fn forced() -> Self {
        Self {
            always_accept: true,
            suppress_notice: true,
        }
    }
}

/// Settings consumed by the mutation workflow.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowSettings {
    /// World-level default for accepting remote requests without a prompt.
    pub auto_accept_default: bool,
    /// Client override for auto-accept.
    pub client_auto_accept: TriState,
    /// Client override for suppressing outcome notices.
    pub client_suppress_notice: TriState,
    /// Comparison key used by collections without an explicit one.
    pub default_comparison_key: String,
    /// Drain order of the update queue.
    pub drain_order: DrainOrder,
    /// Give up on a remote response after this many millis. `None` waits forever.
    pub response_timeout_ms: Option<u64>,
    /// Flag key the rollback stack is stored under.
    pub flag_key: String,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            auto_accept_default: false,
            client_auto_accept: TriState::Inherit,
            client_suppress_notice: TriState::Inherit,
            default_comparison_key: "name".to_string(),
            drain_order: DrainOrder::Lifo,
            response_timeout_ms: None,
            flag_key: "mutate".to_string(),
        }
    }
}

impl WorkflowSettings {
    /// Whether a request may be accepted without presenting it.
    /// Request overrides win, then the client override, then the world default.
    pub fn auto_accept(&self, overrides: &WorkflowOverrides) -> bool {
        overrides.always_accept || self.client_auto_accept.resolve(self.auto_accept_default)
    }

    pub fn suppress_notice(&self, overrides: &WorkflowOverrides) -> bool {
        overrides.suppress_notice || self.client_suppress_notice.resolve(false)
    }

    pub fn response_timeout(&self) -> Option<Duration> {
        self.response_timeout_ms.map(Duration::from_millis)
    }
}

/// On-disk configuration for one peer.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StewardConfig {
    pub peer_name: String,
    pub settings: WorkflowSettings,
}

impl StewardConfig {
    /// Load from a JSON file. A missing file yields the default configuration.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let data = std::fs::read(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
        serde_json::from_slice(&data).map_err(|e| ConfigError::DeserializationError(e.to_string()))
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializationError(e.to_string()))?;
        std::fs::write(path, json).map_err(|e| ConfigError::IoError(e.to_string()))
    }
}
