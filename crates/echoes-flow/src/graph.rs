//! The component dependency graph.
//!
//! Edges come from three places: `Component::depends_on`, output references
//! inside a component's deferred inputs, and [`DependencyGraph::add_dependency`].
//! All three are resolved together whenever the graph is validated, so a
//! component may be registered before the components it references.

use std::collections::HashMap;

use serde_json::Value;

use crate::component::Component;
use crate::dag::Dag;
use crate::deferred::Deferred;
use crate::error::{Error, Result};

/// A validated view of the graph used by the scheduler.
#[derive(Debug, Clone)]
pub(crate) struct ResolvedGraph {
    /// Component names in topological order.
    pub order: Vec<String>,
    /// Direct dependencies by component, in insertion order.
    pub dependencies: HashMap<String, Vec<String>>,
}

/// Components, their dependency edges, and named stack exports.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    components: Vec<Component>,
    index: HashMap<String, usize>,
    /// `(component, depends_on)` pairs added after registration.
    extra_edges: Vec<(String, String)>,
    exports: Vec<(String, Deferred<Value>)>,
}

impl DependencyGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a component.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateName`] if the name is taken.
    pub fn add_component(&mut self, component: Component) -> Result<()> {
        let name = component.name().to_string();
        if self.index.contains_key(&name) {
            return Err(Error::DuplicateName { name });
        }
        self.index.insert(name, self.components.len());
        self.components.push(component);
        Ok(())
    }

    /// Declares that `component` depends on `depends_on`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownComponent`] if either name is unregistered,
    /// or [`Error::CycleDetected`] if both names are the same.
    pub fn add_dependency(&mut self, component: &str, depends_on: &str) -> Result<()> {
        for name in [component, depends_on] {
            if !self.index.contains_key(name) {
                return Err(Error::UnknownComponent {
                    name: name.to_string(),
                });
            }
        }
        if component == depends_on {
            return Err(self_cycle(component));
        }
        let edge = (component.to_string(), depends_on.to_string());
        if !self.extra_edges.contains(&edge) {
            self.extra_edges.push(edge);
        }
        Ok(())
    }

    /// Publishes a named stack export, resolved after a successful run.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the export name is taken.
    pub fn export(
        &mut self,
        name: impl Into<String>,
        value: impl Into<Deferred<Value>>,
    ) -> Result<()> {
        let name = name.into();
        if self.exports.iter().any(|(existing, _)| *existing == name) {
            return Err(Error::InvalidInput(format!("duplicate export: {name}")));
        }
        self.exports.push((name, value.into()));
        Ok(())
    }

    /// Looks up a component by name.
    #[must_use]
    pub fn component(&self, name: &str) -> Option<&Component> {
        self.index.get(name).and_then(|&i| self.components.get(i))
    }

    /// All components in registration order.
    #[must_use]
    pub fn components(&self) -> &[Component] {
        &self.components
    }

    /// Named stack exports in declaration order.
    #[must_use]
    pub fn exports(&self) -> &[(String, Deferred<Value>)] {
        &self.exports
    }

    /// Number of components.
    #[must_use]
    pub fn len(&self) -> usize {
        self.components.len()
    }

    /// Returns true if no component is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Number of distinct dependency edges, implicit ones included.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownComponent`] for dangling references.
    pub fn edge_count(&self) -> Result<usize> {
        Ok(self.build_dag()?.edge_count())
    }

    /// Checks that every reference resolves and the graph is acyclic.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownComponent`] or [`Error::CycleDetected`].
    pub fn validate(&self) -> Result<()> {
        self.build_dag()?.toposort().map(|_| ())
    }

    /// Creation order: every dependency strictly before its dependents,
    /// ties broken by registration order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownComponent`] or [`Error::CycleDetected`].
    pub fn topological_order(&self) -> Result<Vec<String>> {
        self.build_dag()?.toposort()
    }

    /// Destruction order: the reverse of [`Self::topological_order`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownComponent`] or [`Error::CycleDetected`].
    pub fn destroy_order(&self) -> Result<Vec<String>> {
        let mut order = self.topological_order()?;
        order.reverse();
        Ok(order)
    }

    /// Direct dependencies of a component, in registration order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownComponent`] if the name (or a reference) is
    /// unregistered.
    pub fn dependencies_of(&self, name: &str) -> Result<Vec<String>> {
        let dag = self.build_dag()?;
        dag.upstream(node_index(&dag, name)?)
    }

    /// Direct dependents of a component, in registration order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownComponent`] if the name (or a reference) is
    /// unregistered.
    pub fn dependents_of(&self, name: &str) -> Result<Vec<String>> {
        let dag = self.build_dag()?;
        dag.downstream(node_index(&dag, name)?)
    }

    pub(crate) fn resolve(&self) -> Result<ResolvedGraph> {
        let dag = self.build_dag()?;
        let order = dag.toposort()?;
        let mut dependencies = HashMap::with_capacity(order.len());
        for name in &order {
            dependencies.insert(name.clone(), dag.upstream(node_index(&dag, name)?)?);
        }
        Ok(ResolvedGraph {
            order,
            dependencies,
        })
    }

    fn build_dag(&self) -> Result<Dag<String>> {
        let mut dag = Dag::new();
        for component in &self.components {
            dag.add_node(component.name().to_string());
        }

        for component in &self.components {
            let name = component.name();
            let dependencies = component
                .declared_dependencies()
                .iter()
                .map(String::as_str)
                .chain(component.input_references().map(|r| r.component.as_str()));
            for dependency in dependencies {
                if dependency == name {
                    return Err(self_cycle(name));
                }
                dag.add_edge(node_index(&dag, dependency)?, node_index(&dag, name)?)?;
            }
        }

        for (component, depends_on) in &self.extra_edges {
            dag.add_edge(node_index(&dag, depends_on)?, node_index(&dag, component)?)?;
        }

        for (_, export) in &self.exports {
            for reference in export.references() {
                node_index(&dag, &reference.component)?;
            }
        }

        Ok(dag)
    }
}

fn node_index(dag: &Dag<String>, name: &str) -> Result<petgraph::graph::NodeIndex> {
    dag.get_index(&name.to_string())
        .ok_or_else(|| Error::UnknownComponent {
            name: name.to_string(),
        })
}

fn self_cycle(name: &str) -> Error {
    Error::CycleDetected {
        cycle: vec![name.to_string(), name.to_string()],
    }
}
