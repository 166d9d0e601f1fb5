//! Write-once registry of component outputs.
//!
//! Every successful apply publishes its outputs here; deferred inputs of
//! downstream components and the final stack exports read from it.
//! Entries flagged sensitive are excluded from [`OutputRegistry::export_all`]
//! and only reachable through an explicit [`OutputRegistry::get`].

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use serde_json::Value;

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
struct StoredOutput {
    value: Value,
    sensitive: bool,
}

/// Thread-safe table of `(component, key) -> value`.
///
/// Writes are write-once: publishing an existing key fails with
/// [`Error::DuplicateOutput`], which also makes two concurrent writers to
/// the same key a detectable programming error rather than a race.
#[derive(Debug, Default)]
pub struct OutputRegistry {
    entries: RwLock<BTreeMap<(String, String), StoredOutput>>,
}

impl OutputRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes one output.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateOutput`] if `(component, key)` is already set.
    pub fn publish(
        &self,
        component: &str,
        key: &str,
        value: Value,
        sensitive: bool,
    ) -> Result<()> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let slot = (component.to_string(), key.to_string());
        if entries.contains_key(&slot) {
            return Err(Error::DuplicateOutput {
                component: component.to_string(),
                key: key.to_string(),
            });
        }
        entries.insert(slot, StoredOutput { value, sensitive });
        Ok(())
    }

    /// Reads one output, sensitive or not.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutputNotFound`] if nothing was published under the key.
    pub fn get(&self, component: &str, key: &str) -> Result<Value> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(&(component.to_string(), key.to_string()))
            .map(|stored| stored.value.clone())
            .ok_or_else(|| Error::OutputNotFound {
                component: component.to_string(),
                key: key.to_string(),
            })
    }

    /// Returns true if the output exists.
    #[must_use]
    pub fn contains(&self, component: &str, key: &str) -> bool {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.contains_key(&(component.to_string(), key.to_string()))
    }

    /// Returns true if the output exists and was published as sensitive.
    #[must_use]
    pub fn is_sensitive(&self, component: &str, key: &str) -> bool {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(&(component.to_string(), key.to_string()))
            .is_some_and(|stored| stored.sensitive)
    }

    /// Removes every output of `component` once its resource is destroyed.
    ///
    /// Returns the number of entries removed.
    pub fn retract(&self, component: &str) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|(owner, _), _| owner != component);
        before - entries.len()
    }

    /// Snapshot of all non-sensitive outputs keyed `component.key`.
    #[must_use]
    pub fn export_all(&self) -> BTreeMap<String, Value> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .iter()
            .filter(|(_, stored)| !stored.sensitive)
            .map(|((component, key), stored)| {
                (format!("{component}.{key}"), stored.value.clone())
            })
            .collect()
    }

    /// Number of published outputs, sensitive ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns true if nothing has been published.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
