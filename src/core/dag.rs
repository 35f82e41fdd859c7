//! Task DAG (Directed Acyclic Graph) for dependency management.
//!
//! This module provides the TaskDAG structure that represents task dependencies
//! as a directed graph over task names, and resolves a stable execution order.

use crate::error::ConfigError;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

/// Why one task must run before another.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DependencyType {
    /// Listed in the task's `depends_on`.
    #[default]
    Declared,
    /// Implied by a `{task.output}` placeholder in the instruction.
    Reference,
}

impl std::fmt::Display for DependencyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DependencyType::Declared => write!(f, "declared"),
            DependencyType::Reference => write!(f, "reference"),
        }
    }
}

/// The task dependency graph.
///
/// Nodes are task names, added in configuration order, so node indices double
/// as the configuration position used for stable tie-breaking. An edge
/// `from -> to` means `from` must complete before `to` starts.
pub struct TaskDAG {
    /// The underlying directed graph.
    graph: DiGraph<String, DependencyType>,
    /// Index mapping from task name to NodeIndex for fast lookups.
    task_index: HashMap<String, NodeIndex>,
}

impl TaskDAG {
    /// Create a new empty TaskDAG.
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            task_index: HashMap::new(),
        }
    }

    /// Add a task to the DAG.
    ///
    /// If a task with the same name already exists, returns its NodeIndex.
    pub fn add_task(&mut self, name: &str) -> NodeIndex {
        if let Some(&index) = self.task_index.get(name) {
            return index;
        }
        let index = self.graph.add_node(name.to_string());
        self.task_index.insert(name.to_string(), index);
        index
    }

    /// Add a dependency: `from` must complete before `to` can start.
    ///
    /// A repeated dependency keeps the first edge. Cycles are not checked
    /// here; `topological_order` reports them with every task involved.
    ///
    /// # Errors
    /// Returns `UnknownDependency` if either task is not in the DAG.
    pub fn add_dependency(
        &mut self,
        from: &str,
        to: &str,
        dep_type: DependencyType,
    ) -> Result<(), ConfigError> {
        let to_index = *self
            .task_index
            .get(to)
            .ok_or_else(|| ConfigError::UnknownDependency {
                task: to.to_string(),
                dependency: to.to_string(),
            })?;
        let from_index = *self
            .task_index
            .get(from)
            .ok_or_else(|| ConfigError::UnknownDependency {
                task: to.to_string(),
                dependency: from.to_string(),
            })?;

        if self.graph.find_edge(from_index, to_index).is_none() {
            self.graph.add_edge(from_index, to_index, dep_type);
        }
        Ok(())
    }

    /// Get the number of tasks in the DAG.
    pub fn task_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Get the number of dependencies (edges) in the DAG.
    pub fn dependency_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Check if the DAG contains a task.
    pub fn contains_task(&self, name: &str) -> bool {
        self.task_index.contains_key(name)
    }

    /// Check if a dependency exists between two tasks.
    pub fn has_dependency(&self, from: &str, to: &str) -> bool {
        self.get_dependency(from, to).is_some()
    }

    /// Get the dependency type between two tasks, if one exists.
    pub fn get_dependency(&self, from: &str, to: &str) -> Option<DependencyType> {
        let from_idx = self.task_index.get(from)?;
        let to_idx = self.task_index.get(to)?;
        let edge = self.graph.find_edge(*from_idx, *to_idx)?;
        self.graph.edge_weight(edge).copied()
    }

    /// Tasks the given task depends on, in configuration order.
    pub fn dependencies(&self, name: &str) -> Vec<&str> {
        self.neighbors(name, Direction::Incoming)
    }

    /// Tasks that depend on the given task, in configuration order.
    pub fn dependents(&self, name: &str) -> Vec<&str> {
        self.neighbors(name, Direction::Outgoing)
    }

    fn neighbors(&self, name: &str, direction: Direction) -> Vec<&str> {
        let Some(&index) = self.task_index.get(name) else {
            return Vec::new();
        };
        let mut indices: Vec<NodeIndex> = self.graph.neighbors_directed(index, direction).collect();
        indices.sort();
        indices.dedup();
        indices
            .into_iter()
            .filter_map(|i| self.graph.node_weight(i).map(String::as_str))
            .collect()
    }

    /// Tasks that sit on a dependency cycle, in configuration order.
    ///
    /// Empty when the graph is acyclic.
    pub fn cyclic_tasks(&self) -> Vec<&str> {
        let mut members: Vec<NodeIndex> = tarjan_scc(&self.graph)
            .into_iter()
            .filter(|component| {
                component.len() > 1
                    || self
                        .graph
                        .find_edge(component[0], component[0])
                        .is_some()
            })
            .flatten()
            .collect();
        members.sort();
        members
            .into_iter()
            .filter_map(|i| self.graph.node_weight(i).map(String::as_str))
            .collect()
    }

    /// Get tasks in topological order (respecting dependencies).
    ///
    /// Kahn's algorithm with a min-heap on configuration position, so
    /// independent tasks keep the order in which they were declared.
    ///
    /// # Errors
    /// Returns `Cycle` naming every task on a cycle.
    pub fn topological_order(&self) -> Result<Vec<&str>, ConfigError> {
        let mut in_degree: Vec<usize> = self
            .graph
            .node_indices()
            .map(|i| self.graph.neighbors_directed(i, Direction::Incoming).count())
            .collect();

        let mut ready: BinaryHeap<Reverse<NodeIndex>> = self
            .graph
            .node_indices()
            .filter(|i| in_degree[i.index()] == 0)
            .map(Reverse)
            .collect();

        let mut order = Vec::with_capacity(self.graph.node_count());
        while let Some(Reverse(index)) = ready.pop() {
            order.push(self.graph[index].as_str());
            for next in self.graph.neighbors_directed(index, Direction::Outgoing) {
                in_degree[next.index()] -= 1;
                if in_degree[next.index()] == 0 {
                    ready.push(Reverse(next));
                }
            }
        }

        if order.len() != self.graph.node_count() {
            let tasks = self.cyclic_tasks().into_iter().map(String::from).collect();
            return Err(ConfigError::Cycle { tasks });
        }
        Ok(order)
    }

    /// Check if the DAG is empty.
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }
}

impl Default for TaskDAG {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TaskDAG {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskDAG")
            .field("tasks", &self.task_count())
            .field("dependencies", &self.dependency_count())
            .finish()
    }
}
