//! Lazily-resolved values flowing from producing components to consumers.
//!
//! A [`Deferred`] is either a concrete value, a reference to an output that
//! some upstream component will publish, or a combination/transformation of
//! other deferreds. Transformations never run until the value is resolved,
//! and each deferred evaluates at most once: the first successful resolution
//! is memoized and every later read returns the cached value.
//!
//! ```rust
//! use echoes_flow::deferred::Deferred;
//! use echoes_flow::outputs::OutputRegistry;
//! use serde_json::json;
//!
//! let endpoint = Deferred::output("app-cluster", "endpoint")
//!     .map(|v| format!("https://{}", v.as_str().unwrap_or_default()));
//!
//! let registry = OutputRegistry::new();
//! assert!(endpoint.resolve(&registry).is_err());
//!
//! registry.publish("app-cluster", "endpoint", json!("10.0.0.2"), false).unwrap();
//! assert_eq!(endpoint.resolve(&registry).unwrap(), "https://10.0.0.2");
//! ```

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::outputs::OutputRegistry;

/// Address of one published output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutputRef {
    /// Producing component.
    pub component: String,
    /// Output key.
    pub key: String,
}

impl OutputRef {
    /// Creates an output reference.
    #[must_use]
    pub fn new(component: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for OutputRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.component, self.key)
    }
}

type Resolver<T> = dyn Fn(&OutputRegistry) -> Result<T> + Send + Sync;

struct Inner<T> {
    references: Vec<OutputRef>,
    resolver: Box<Resolver<T>>,
    memo: Mutex<Option<T>>,
}

/// A value that becomes available once its producers have applied.
///
/// Cloning is cheap and clones share the memoized result.
pub struct Deferred<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let resolved = self
            .inner
            .memo
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some();
        f.debug_struct("Deferred")
            .field("references", &self.inner.references)
            .field("resolved", &resolved)
            .finish_non_exhaustive()
    }
}

impl<T> Deferred<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn from_parts<F>(references: Vec<OutputRef>, resolver: F) -> Self
    where
        F: Fn(&OutputRegistry) -> Result<T> + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(Inner {
                references,
                resolver: Box::new(resolver),
                memo: Mutex::new(None),
            }),
        }
    }

    /// Wraps a value that is already known.
    #[must_use]
    pub fn ready(value: T) -> Self {
        Self::from_parts(Vec::new(), move |_| Ok(value.clone()))
    }

    /// Transforms the eventual value.
    ///
    /// `f` is not called until the returned deferred is resolved, and is
    /// called at most once.
    #[must_use]
    pub fn map<U, F>(&self, f: F) -> Deferred<U>
    where
        U: Clone + Send + Sync + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        let source = self.clone();
        Deferred::from_parts(self.inner.references.clone(), move |registry| {
            source.resolve(registry).map(&f)
        })
    }

    /// Transforms the eventual value with a fallible function.
    ///
    /// An error from `f` surfaces from [`Deferred::resolve`] and is not memoized.
    #[must_use]
    pub fn try_map<U, F>(&self, f: F) -> Deferred<U>
    where
        U: Clone + Send + Sync + 'static,
        F: Fn(T) -> Result<U> + Send + Sync + 'static,
    {
        let source = self.clone();
        Deferred::from_parts(self.inner.references.clone(), move |registry| {
            source.resolve(registry).and_then(&f)
        })
    }

    /// Combines several deferreds into one that resolves to all their values,
    /// in order.
    #[must_use]
    pub fn all(items: impl IntoIterator<Item = Self>) -> Deferred<Vec<T>> {
        let items: Vec<Self> = items.into_iter().collect();
        let mut references: Vec<OutputRef> = Vec::new();
        for item in &items {
            for reference in &item.inner.references {
                if !references.contains(reference) {
                    references.push(reference.clone());
                }
            }
        }
        Deferred::from_parts(references, move |registry| {
            items.iter().map(|item| item.resolve(registry)).collect()
        })
    }

    /// Resolves the value against published outputs.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnresolvedInput`] if a referenced output has not been
    /// published yet, or whatever a `try_map` step returned.
    pub fn resolve(&self, registry: &OutputRegistry) -> Result<T> {
        let mut memo = self
            .inner
            .memo
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(value) = memo.as_ref() {
            return Ok(value.clone());
        }
        let value = (self.inner.resolver)(registry)?;
        *memo = Some(value.clone());
        Ok(value)
    }

    /// The outputs this value depends on.
    #[must_use]
    pub fn references(&self) -> &[OutputRef] {
        &self.inner.references
    }

    /// Returns true once a resolution has succeeded.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.inner
            .memo
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl Deferred<Value> {
    /// References an output that `component` will publish under `key`.
    #[must_use]
    pub fn output(component: impl Into<String>, key: impl Into<String>) -> Self {
        let reference = OutputRef::new(component, key);
        let lookup = reference.clone();
        Self::from_parts(vec![reference], move |registry| {
            registry
                .get(&lookup.component, &lookup.key)
                .map_err(|_| Error::UnresolvedInput {
                    component: lookup.component.clone(),
                    key: lookup.key.clone(),
                })
        })
    }
}

impl From<Value> for Deferred<Value> {
    fn from(value: Value) -> Self {
        Self::ready(value)
    }
}

impl From<&str> for Deferred<Value> {
    fn from(value: &str) -> Self {
        Self::ready(Value::String(value.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn ready_value_resolves_without_registry_entries() {
        let registry = OutputRegistry::new();
        let value = Deferred::ready(json!("static"));
        assert_eq!(value.resolve(&registry).unwrap(), json!("static"));
        assert!(value.references().is_empty());
    }

    #[test]
    fn output_before_publish_is_unresolved() {
        let registry = OutputRegistry::new();
        let vpc = Deferred::output("main-network", "vpc_id");
        let err = vpc.resolve(&registry).unwrap_err();
        assert!(matches!(err, Error::UnresolvedInput { .. }));
        assert!(!vpc.is_resolved());
    }

    #[test]
    fn map_chain_runs_each_function_once() {
        let registry = OutputRegistry::new();
        let f_calls = Arc::new(AtomicUsize::new(0));
        let g_calls = Arc::new(AtomicUsize::new(0));

        let f_counter = Arc::clone(&f_calls);
        let g_counter = Arc::clone(&g_calls);
        let chained = Deferred::output("db", "port")
            .map(move |v| {
                f_counter.fetch_add(1, Ordering::SeqCst);
                v.as_i64().unwrap_or_default() + 1
            })
            .map(move |n| {
                g_counter.fetch_add(1, Ordering::SeqCst);
                n * 10
            });

        assert_eq!(f_calls.load(Ordering::SeqCst), 0, "map must be lazy");

        registry.publish("db", "port", json!(5431), false).unwrap();
        assert_eq!(chained.resolve(&registry).unwrap(), 54320);
        assert_eq!(chained.resolve(&registry).unwrap(), 54320);
        assert_eq!(chained.clone().resolve(&registry).unwrap(), 54320);

        assert_eq!(f_calls.load(Ordering::SeqCst), 1);
        assert_eq!(g_calls.load(Ordering::SeqCst), 1);
        assert!(chained.is_resolved());
    }

    #[test]
    fn failed_resolution_is_not_memoized() {
        let registry = OutputRegistry::new();
        let name = Deferred::output("app-cluster", "cluster_name").map(|v| v.to_string());
        assert!(name.resolve(&registry).is_err());

        registry
            .publish("app-cluster", "cluster_name", json!("app"), false)
            .unwrap();
        assert_eq!(name.resolve(&registry).unwrap(), "\"app\"");
    }

    #[test]
    fn all_combines_in_order_and_merges_references() {
        let registry = OutputRegistry::new();
        registry.publish("c", "name", json!("app"), false).unwrap();
        registry.publish("c", "endpoint", json!("1.2.3.4"), false).unwrap();

        let combined = Deferred::all([
            Deferred::output("c", "name"),
            Deferred::output("c", "endpoint"),
            Deferred::output("c", "name"),
        ]);
        assert_eq!(combined.references().len(), 2);
        assert_eq!(
            combined.resolve(&registry).unwrap(),
            vec![json!("app"), json!("1.2.3.4"), json!("app")]
        );
    }

    #[test]
    fn try_map_surfaces_errors() {
        let registry = OutputRegistry::new();
        registry.publish("c", "endpoint", json!(42), false).unwrap();
        let endpoint = Deferred::output("c", "endpoint").try_map(|v| {
            v.as_str()
                .map(str::to_string)
                .ok_or_else(|| Error::InvalidInput("endpoint must be a string".into()))
        });
        assert!(matches!(
            endpoint.resolve(&registry),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn map_keeps_references() {
        let mapped = Deferred::output("net", "vpc_id").map(|v| v);
        assert_eq!(mapped.references(), &[OutputRef::new("net", "vpc_id")]);
        assert_eq!(mapped.references()[0].to_string(), "net.vpc_id");
    }
}
