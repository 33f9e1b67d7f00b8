//! Dependency graph with deterministic ordering
//!
//! Edges point from a dependency to its dependent, so a topological order
//! lists dependencies first. When several nodes are ready at once the one
//! with the lowest rank wins; by default the rank is insertion order, which
//! gives "declaration order" tie-breaking.

use crate::error::{CoreError, Result};
use petgraph::Direction;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Dfs, Reversed};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashSet};
use std::fmt::Display;

#[derive(Debug, Clone)]
struct Node<K> {
    key: K,
    rank: usize,
}

#[derive(Debug, Clone)]
pub struct DependencyGraph<K> {
    graph: DiGraph<Node<K>, ()>,
    index: BTreeMap<K, NodeIndex>,
}

impl<K> Default for DependencyGraph<K> {
    fn default() -> Self {
        Self {
            graph: DiGraph::new(),
            index: BTreeMap::new(),
        }
    }
}

impl<K: Clone + Ord + Display> DependencyGraph<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node ranked by insertion order. Returns false if it already exists.
    pub fn add_node(&mut self, key: K) -> bool {
        let rank = self.graph.node_count();
        self.add_node_ranked(key, rank)
    }

    /// Add a node with an explicit tie-break rank (lower runs first).
    pub fn add_node_ranked(&mut self, key: K, rank: usize) -> bool {
        if self.index.contains_key(&key) {
            return false;
        }
        let idx = self.graph.add_node(Node {
            key: key.clone(),
            rank,
        });
        self.index.insert(key, idx);
        true
    }

    pub fn contains(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Record that `dependent` must come after `dependency`.
    pub fn add_dependency(&mut self, dependent: &K, dependency: &K) -> Result<()> {
        let to = self.node(dependent)?;
        let from = self.node(dependency)?;
        self.graph.update_edge(from, to, ());
        Ok(())
    }

    /// Direct dependencies of `key`, in rank order.
    pub fn dependencies_of(&self, key: &K) -> Result<Vec<K>> {
        self.neighbors(key, Direction::Incoming)
    }

    /// Direct dependents of `key`, in rank order.
    pub fn dependents_of(&self, key: &K) -> Result<Vec<K>> {
        self.neighbors(key, Direction::Outgoing)
    }

    /// Every node `key` depends on, directly or transitively.
    pub fn transitive_dependencies(&self, key: &K) -> Result<BTreeSet<K>> {
        let start = self.node(key)?;
        let reversed = Reversed(&self.graph);
        let mut dfs = Dfs::new(reversed, start);
        let mut out = BTreeSet::new();
        while let Some(idx) = dfs.next(reversed) {
            if idx != start {
                out.insert(self.graph[idx].key.clone());
            }
        }
        Ok(out)
    }

    /// Every node that depends on `key`, directly or transitively.
    pub fn transitive_dependents(&self, key: &K) -> Result<BTreeSet<K>> {
        let start = self.node(key)?;
        let mut dfs = Dfs::new(&self.graph, start);
        let mut out = BTreeSet::new();
        while let Some(idx) = dfs.next(&self.graph) {
            if idx != start {
                out.insert(self.graph[idx].key.clone());
            }
        }
        Ok(out)
    }

    /// Fail with [`CoreError::Cycle`] naming one cycle, if any exists.
    pub fn check_acyclic(&self) -> Result<()> {
        for component in tarjan_scc(&self.graph) {
            let self_loop = component.len() == 1
                && self.graph.contains_edge(component[0], component[0]);
            if component.len() > 1 || self_loop {
                return Err(CoreError::Cycle(self.describe_cycle(&component)));
            }
        }
        Ok(())
    }

    /// Kahn's algorithm over a min-heap of ranks.
    pub fn topological_order(&self) -> Result<Vec<K>> {
        let mut in_degree: Vec<usize> = self
            .graph
            .node_indices()
            .map(|idx| {
                self.graph
                    .neighbors_directed(idx, Direction::Incoming)
                    .count()
            })
            .collect();

        let mut ready: BinaryHeap<Reverse<(usize, usize)>> = self
            .graph
            .node_indices()
            .filter(|idx| in_degree[idx.index()] == 0)
            .map(|idx| Reverse((self.graph[idx].rank, idx.index())))
            .collect();

        let mut order = Vec::with_capacity(self.graph.node_count());
        while let Some(Reverse((_, raw))) = ready.pop() {
            let idx = NodeIndex::new(raw);
            order.push(self.graph[idx].key.clone());
            for next in self.graph.neighbors_directed(idx, Direction::Outgoing) {
                in_degree[next.index()] -= 1;
                if in_degree[next.index()] == 0 {
                    ready.push(Reverse((self.graph[next].rank, next.index())));
                }
            }
        }

        if order.len() != self.graph.node_count() {
            self.check_acyclic()?;
        }
        Ok(order)
    }

    fn node(&self, key: &K) -> Result<NodeIndex> {
        self.index
            .get(key)
            .copied()
            .ok_or_else(|| CoreError::UnknownNode(key.to_string()))
    }

    fn neighbors(&self, key: &K, direction: Direction) -> Result<Vec<K>> {
        let idx = self.node(key)?;
        let mut nodes: Vec<&Node<K>> = self
            .graph
            .neighbors_directed(idx, direction)
            .map(|n| &self.graph[n])
            .collect();
        nodes.sort_by_key(|n| n.rank);
        Ok(nodes.into_iter().map(|n| n.key.clone()).collect())
    }

    /// Walk successors inside a strongly connected component until a node
    /// repeats, then report that loop as `a -> b -> a`.
    fn describe_cycle(&self, component: &[NodeIndex]) -> String {
        let members: HashSet<NodeIndex> = component.iter().copied().collect();
        let start = component
            .iter()
            .copied()
            .min_by_key(|idx| self.graph[*idx].rank)
            .unwrap_or(component[0]);

        let mut path = vec![start];
        let mut current = start;
        loop {
            let mut successors: Vec<NodeIndex> = self
                .graph
                .neighbors_directed(current, Direction::Outgoing)
                .filter(|n| members.contains(n))
                .collect();
            successors.sort_by_key(|n| self.graph[*n].rank);
            let Some(next) = successors.first().copied() else {
                break;
            };
            if let Some(pos) = path.iter().position(|n| *n == next) {
                path.drain(..pos);
                path.push(next);
                break;
            }
            path.push(next);
            current = next;
        }

        path.iter()
            .map(|idx| self.graph[*idx].key.to_string())
            .collect::<Vec<_>>()
            .join(" -> ")
    }
}
