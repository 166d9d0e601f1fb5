//! Change detection.
//!
//! Deciding whether a component is new, changed in place, or must be
//! replaced belongs to an external state-diffing collaborator. The
//! scheduler only asks a [`ChangeDetector`] and acts on the answer.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::component::{Component, ResourceHandle};

/// What the scheduler will do to a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// Create a new resource.
    Create,
    /// Update an existing resource in place.
    Update,
    /// Replace an existing resource with a new one.
    Replace,
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Update => write!(f, "update"),
            Self::Replace => write!(f, "replace"),
        }
    }
}

/// A planned change together with the resource it affects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlannedChange {
    /// Nothing exists yet.
    Create,
    /// `existing` is updated in place.
    Update {
        /// The live resource.
        existing: ResourceHandle,
    },
    /// `existing` is replaced.
    Replace {
        /// The live resource.
        existing: ResourceHandle,
    },
}

impl PlannedChange {
    /// The kind of change.
    #[must_use]
    pub const fn kind(&self) -> ChangeKind {
        match self {
            Self::Create => ChangeKind::Create,
            Self::Update { .. } => ChangeKind::Update,
            Self::Replace { .. } => ChangeKind::Replace,
        }
    }
}

/// Decides, per component, how the desired spec relates to what exists.
pub trait ChangeDetector: Send + Sync {
    /// Returns the change to perform for `component`.
    fn detect(&self, component: &Component) -> PlannedChange;
}

/// Nothing exists: every component is created.
#[derive(Debug, Clone, Copy, Default)]
pub struct FreshDeployment;

impl ChangeDetector for FreshDeployment {
    fn detect(&self, _component: &Component) -> PlannedChange {
        PlannedChange::Create
    }
}

/// A fixed table of known prior resources.
///
/// Components absent from the table are created.
#[derive(Debug, Clone, Default)]
pub struct PriorState {
    changes: HashMap<String, PlannedChange>,
}

impl PriorState {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// `component` exists as `existing` and is updated in place.
    #[must_use]
    pub fn with_update(mut self, component: impl Into<String>, existing: ResourceHandle) -> Self {
        self.changes
            .insert(component.into(), PlannedChange::Update { existing });
        self
    }

    /// `component` exists as `existing` and must be replaced.
    #[must_use]
    pub fn with_replacement(
        mut self,
        component: impl Into<String>,
        existing: ResourceHandle,
    ) -> Self {
        self.changes
            .insert(component.into(), PlannedChange::Replace { existing });
        self
    }
}

impl ChangeDetector for PriorState {
    fn detect(&self, component: &Component) -> PlannedChange {
        self.changes
            .get(component.name())
            .cloned()
            .unwrap_or(PlannedChange::Create)
    }
}
