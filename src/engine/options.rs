use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::authority::RemoteResponse;
use crate::config::WorkflowOverrides;
use crate::diff::{Shorthand, ValidationError};
use crate::document::{PeerId, Subject};
use crate::rollback::RollbackEntry;

/// Per-call options. Travels with forwarded requests.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MutateOptions {
    /// Rollback entry name. Generated when absent.
    pub name: Option<String>,
    /// Skip the rollback entry entirely.
    pub permanent: bool,
    /// Opaque options stored with the entry
    pub update_options: Value,
    pub overrides: WorkflowOverrides,
    pub description: Option<String>,
    /// Precomputed delta. Set on forwarded requests so the authority stores
    /// what the requester observed.
    pub delta: Option<Shorthand>,
}

impl MutateOptions {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn permanent(mut self) -> Self {
        self.permanent = true;
        self
    }

    pub fn with_delta(mut self, delta: Shorthand) -> Self {
        self.delta = Some(delta);
        self
    }

    pub fn with_overrides(mut self, overrides: WorkflowOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_update_options(mut self, options: Value) -> Self {
        self.update_options = options;
        self
    }
}

pub type PreCallback = Box<dyn FnOnce(&mut Shorthand, &Subject) + Send>;
pub type DeltaCallback = Box<dyn FnOnce(&mut Shorthand, &Subject) -> bool + Send>;
pub type PostCallback = Box<dyn FnOnce(Option<&RollbackEntry>) + Send>;

/// Hooks into a single mutation.
#[derive(Default)]
pub struct MutationCallbacks {
    /// Edit the shorthand before its delta is computed.
    pub pre: Option<PreCallback>,
    /// Edit the rollback delta before anything is written. `false` aborts.
    pub delta: Option<DeltaCallback>,
    /// Runs after the writes are committed.
    pub post: Option<PostCallback>,
}

impl MutationCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pre(mut self, f: impl FnOnce(&mut Shorthand, &Subject) + Send + 'static) -> Self {
        self.pre = Some(Box::new(f));
        self
    }

    pub fn with_delta(
        mut self,
        f: impl FnOnce(&mut Shorthand, &Subject) -> bool + Send + 'static,
    ) -> Self {
        self.delta = Some(Box::new(f));
        self
    }

    pub fn with_post(mut self, f: impl FnOnce(Option<&RollbackEntry>) + Send + 'static) -> Self {
        self.post = Some(Box::new(f));
        self
    }
}

/// What a local commit did.
#[derive(Clone, Debug, PartialEq)]
pub struct MutationReport {
    /// The pushed (or popped) entry. `None` for permanent mutations.
    pub entry: Option<RollbackEntry>,
    /// Collections left untouched because validation rejected them
    pub skipped_collections: Vec<(String, ValidationError)>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum MutationOutcome {
    Committed(MutationReport),
    /// Forwarded to another peer, which answered.
    Remote(RemoteResponse),
    /// The delta callback declined.
    Aborted,
}

impl MutationOutcome {
    pub fn accepted(&self) -> bool {
        match self {
            MutationOutcome::Committed(_) => true,
            MutationOutcome::Remote(response) => response.accepted,
            MutationOutcome::Aborted => false,
        }
    }

    pub fn entry(&self) -> Option<&RollbackEntry> {
        match self {
            MutationOutcome::Committed(report) => report.entry.as_ref(),
            MutationOutcome::Remote(response) => response.entry.as_ref(),
            MutationOutcome::Aborted => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum RevertOutcome {
    Reverted(MutationReport),
    Remote(RemoteResponse),
    NothingToRevert,
}

impl RevertOutcome {
    pub fn accepted(&self) -> bool {
        match self {
            RevertOutcome::Reverted(_) => true,
            RevertOutcome::Remote(response) => response.accepted,
            RevertOutcome::NothingToRevert => false,
        }
    }
}

/// What `dismiss` did with the placement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DismissOutcome {
    /// Removed here, and the `Dismiss` event was announced.
    Dismissed,
    /// Sent to the authority named here, which answers only with a `Dismiss` event.
    Forwarded(PeerId),
}
