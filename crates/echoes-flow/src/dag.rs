//! Directed acyclic graph over component names.
//!
//! Backs [`DependencyGraph`](crate::graph::DependencyGraph): edges point
//! from a dependency to its dependent, so a topological sort yields a valid
//! creation order.
//!
//! **Note:** This module is internal to `echoes-flow`.

use std::collections::{HashMap, VecDeque};
use std::fmt::Display;
use std::hash::Hash;

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    OnStack,
    Done,
}

/// A directed graph with deterministic, insertion-ordered traversal.
#[derive(Debug, Clone)]
pub struct Dag<T>
where
    T: Clone + Eq + Hash + Display,
{
    graph: DiGraph<T, ()>,
    index_map: HashMap<T, NodeIndex>,
    /// Insertion order for deterministic tie-breaking.
    insertion_order: Vec<NodeIndex>,
}

impl<T> Dag<T>
where
    T: Clone + Eq + Hash + Display,
{
    /// Creates an empty DAG.
    #[must_use]
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            index_map: HashMap::new(),
            insertion_order: Vec::new(),
        }
    }

    /// Number of nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Number of edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Adds a node; a no-op returning the existing index if already present.
    pub fn add_node(&mut self, value: T) -> NodeIndex {
        if let Some(&idx) = self.index_map.get(&value) {
            return idx;
        }
        let idx = self.graph.add_node(value.clone());
        self.index_map.insert(value, idx);
        self.insertion_order.push(idx);
        idx
    }

    /// Adds an edge `from -> to`. Duplicate edges are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownComponent`] if either index is invalid.
    pub fn add_edge(&mut self, from: NodeIndex, to: NodeIndex) -> Result<()> {
        self.weight(from)?;
        self.weight(to)?;
        if self.graph.find_edge(from, to).is_none() {
            self.graph.add_edge(from, to, ());
        }
        Ok(())
    }

    /// Returns the nodes in topological order.
    ///
    /// Kahn's algorithm; when several nodes are ready at once they are
    /// emitted in insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CycleDetected`] with the full cycle path if the graph
    /// is not acyclic.
    pub fn toposort(&self) -> Result<Vec<T>> {
        let node_count = self.graph.node_count();
        if node_count == 0 {
            return Ok(Vec::new());
        }

        let mut in_degree: HashMap<NodeIndex, usize> = HashMap::with_capacity(node_count);
        for idx in self.graph.node_indices() {
            in_degree.insert(idx, 0);
        }
        for edge in self.graph.edge_references() {
            *in_degree.entry(edge.target()).or_insert(0) += 1;
        }

        let mut queue: VecDeque<NodeIndex> = self
            .insertion_order
            .iter()
            .filter(|&&idx| in_degree.get(&idx).copied().unwrap_or(0) == 0)
            .copied()
            .collect();

        let mut result = Vec::with_capacity(node_count);

        while let Some(idx) = queue.pop_front() {
            result.push(self.weight(idx)?.clone());

            for neighbor in self.sorted_neighbors(idx, Direction::Outgoing) {
                if let Some(deg) = in_degree.get_mut(&neighbor) {
                    *deg = deg.saturating_sub(1);
                    if *deg == 0 {
                        queue.push_back(neighbor);
                    }
                }
            }
        }

        if result.len() != node_count {
            let cycle = self
                .find_cycle()
                .unwrap_or_default()
                .into_iter()
                .map(|node| node.to_string())
                .collect();
            return Err(Error::CycleDetected { cycle });
        }

        Ok(result)
    }

    /// Finds one cycle, if any, as a path whose first node is repeated at
    /// the end (`[a, b, a]`).
    ///
    /// Depth-first search with recursion-stack marking; roots and neighbors
    /// are visited in insertion order, so the reported cycle is stable.
    #[must_use]
    pub fn find_cycle(&self) -> Option<Vec<T>> {
        let mut marks: HashMap<NodeIndex, Mark> = HashMap::with_capacity(self.node_count());

        for &root in &self.insertion_order {
            if marks.contains_key(&root) {
                continue;
            }

            // Explicit stack of (node, next neighbor position).
            let mut path: Vec<NodeIndex> = vec![root];
            let mut cursors: Vec<(Vec<NodeIndex>, usize)> =
                vec![(self.sorted_neighbors(root, Direction::Outgoing), 0)];
            marks.insert(root, Mark::OnStack);

            while let Some((neighbors, pos)) = cursors.last_mut() {
                let Some(&next) = neighbors.get(*pos) else {
                    if let Some(done) = path.pop() {
                        marks.insert(done, Mark::Done);
                    }
                    cursors.pop();
                    continue;
                };
                *pos += 1;

                match marks.get(&next).copied() {
                    Some(Mark::OnStack) => {
                        let start = path.iter().position(|&n| n == next).unwrap_or(0);
                        let mut cycle: Vec<T> = path[start..]
                            .iter()
                            .filter_map(|&n| self.graph.node_weight(n).cloned())
                            .collect();
                        if let Some(first) = cycle.first().cloned() {
                            cycle.push(first);
                        }
                        return Some(cycle);
                    }
                    Some(Mark::Done) => {}
                    None => {
                        marks.insert(next, Mark::OnStack);
                        path.push(next);
                        cursors.push((self.sorted_neighbors(next, Direction::Outgoing), 0));
                    }
                }
            }
        }

        None
    }

    /// Direct predecessors of a node, in insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownComponent`] if the index is invalid.
    pub fn upstream(&self, node: NodeIndex) -> Result<Vec<T>> {
        self.weight(node)?;
        Ok(self.weights(self.sorted_neighbors(node, Direction::Incoming)))
    }

    /// Direct successors of a node, in insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownComponent`] if the index is invalid.
    pub fn downstream(&self, node: NodeIndex) -> Result<Vec<T>> {
        self.weight(node)?;
        Ok(self.weights(self.sorted_neighbors(node, Direction::Outgoing)))
    }

    /// Returns the index of a node, if it exists.
    #[must_use]
    pub fn get_index(&self, value: &T) -> Option<NodeIndex> {
        self.index_map.get(value).copied()
    }

    fn weight(&self, idx: NodeIndex) -> Result<&T> {
        self.graph
            .node_weight(idx)
            .ok_or_else(|| Error::UnknownComponent {
                name: format!("index {}", idx.index()),
            })
    }

    fn weights(&self, indices: Vec<NodeIndex>) -> Vec<T> {
        indices
            .into_iter()
            .filter_map(|idx| self.graph.node_weight(idx).cloned())
            .collect()
    }

    fn sorted_neighbors(&self, node: NodeIndex, direction: Direction) -> Vec<NodeIndex> {
        let mut neighbors: Vec<NodeIndex> =
            self.graph.neighbors_directed(node, direction).collect();
        // Nodes are only ever appended, so the index is the insertion position.
        neighbors.sort_unstable_by_key(|n| n.index());
        neighbors
    }
}

impl<T> Default for Dag<T>
where
    T: Clone + Eq + Hash + Display,
{
    fn default() -> Self {
        Self::new()
    }
}
