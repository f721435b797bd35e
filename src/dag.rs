//! Multi-edge directed acyclic graph of activities
//!
//! Nodes are keyed by task id and carry the activity instances scheduled for
//! that task, in insertion order. Edges run from an upstream task to the
//! downstream task and are keyed by the downstream activity's id, so repeated
//! instances of the same two tasks produce distinct parallel edges.
//!
//! The graph is the single owner of activities; merge unions node attribute
//! maps and accumulates keyed edges, which is what lets nested pipelines be
//! inlined into one larger graph.

use crate::activity::Activity;
use crate::error::{LoomError, Result};
use crate::ids::{ActivityId, TaskId};
use petgraph::algo::{is_cyclic_directed, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug)]
struct DagNode {
    task: TaskId,
    activities: Vec<Arc<Activity>>,
}

/// Directed acyclic multigraph of scheduled activities.
#[derive(Debug, Default)]
pub struct Dag {
    graph: DiGraph<DagNode, ActivityId>,
    node_indices: HashMap<TaskId, NodeIndex>,
    activity_index: HashMap<ActivityId, TaskId>,
}

impl Dag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn activity_count(&self) -> usize {
        self.activity_index.len()
    }

    pub fn contains_task(&self, task: &TaskId) -> bool {
        self.node_indices.contains_key(task)
    }

    fn node_for(&mut self, task: TaskId) -> NodeIndex {
        if let Some(&index) = self.node_indices.get(&task) {
            return index;
        }
        let index = self.graph.add_node(DagNode {
            task,
            activities: Vec::new(),
        });
        self.node_indices.insert(task, index);
        index
    }

    /// Add an activity to its task's node, creating the node if needed.
    ///
    /// Re-adding an activity id already stored at the node is a no-op, which
    /// makes merge idempotent.
    pub fn add_activity(&mut self, task: TaskId, activity: Arc<Activity>) {
        let index = self.node_for(task);
        let node = &mut self.graph[index];
        if node.activities.iter().any(|a| a.id == activity.id) {
            return;
        }
        self.activity_index.insert(activity.id, task);
        node.activities.push(activity);
    }

    /// Add an edge from `from`'s node to `to`'s node, keyed by the
    /// downstream activity id. Duplicate `(from, to, key)` triples are
    /// skipped.
    pub fn add_edge(&mut self, from: TaskId, to: TaskId, key: ActivityId) {
        let from_index = self.node_for(from);
        let to_index = self.node_for(to);
        let exists = self
            .graph
            .edges_connecting(from_index, to_index)
            .any(|edge| *edge.weight() == key);
        if !exists {
            self.graph.add_edge(from_index, to_index, key);
        }
    }

    /// Union another graph into this one: activities merge into their task's
    /// node attribute map, keyed edges accumulate.
    pub fn merge(&mut self, other: Dag) {
        let Dag { graph, .. } = other;
        for index in graph.node_indices() {
            let node = &graph[index];
            for activity in &node.activities {
                self.add_activity(node.task, Arc::clone(activity));
            }
        }
        for edge in graph.edge_references() {
            let from = graph[edge.source()].task;
            let to = graph[edge.target()].task;
            self.add_edge(from, to, *edge.weight());
        }
    }

    /// Activities stored at a task's node, in insertion order.
    pub fn activities(&self, task: &TaskId) -> &[Arc<Activity>] {
        self.node_indices
            .get(task)
            .map(|&index| self.graph[index].activities.as_slice())
            .unwrap_or(&[])
    }

    /// Look up a single activity by id.
    pub fn activity(&self, id: &ActivityId) -> Option<Arc<Activity>> {
        let task = self.activity_index.get(id)?;
        self.activities(task).iter().find(|a| a.id == *id).cloned()
    }

    /// First activity with the given name, scanning nodes in insertion
    /// order.
    pub fn find_by_name(&self, name: &str) -> Option<Arc<Activity>> {
        self.graph.node_indices().find_map(|index| {
            self.graph[index]
                .activities
                .iter()
                .find(|a| a.name.as_deref() == Some(name))
                .cloned()
        })
    }

    /// Every activity in the graph, grouped by node insertion order.
    pub fn all_activities(&self) -> impl Iterator<Item = &Arc<Activity>> {
        self.graph
            .node_indices()
            .collect::<Vec<_>>()
            .into_iter()
            .flat_map(move |index| self.graph[index].activities.iter())
    }

    fn neighbors(&self, task: &TaskId, direction: Direction) -> Vec<TaskId> {
        let Some(&index) = self.node_indices.get(task) else {
            return Vec::new();
        };
        // parallel edges yield duplicate neighbors
        let mut seen = Vec::new();
        for neighbor in self.graph.neighbors_directed(index, direction) {
            let task = self.graph[neighbor].task;
            if !seen.contains(&task) {
                seen.push(task);
            }
        }
        seen
    }

    /// Tasks with an edge into the given task.
    pub fn predecessors(&self, task: &TaskId) -> Vec<TaskId> {
        self.neighbors(task, Direction::Incoming)
    }

    /// Tasks with an edge out of the given task.
    pub fn successors(&self, task: &TaskId) -> Vec<TaskId> {
        self.neighbors(task, Direction::Outgoing)
    }

    /// Edges as `(from, to, key)` triples.
    pub fn edges(&self) -> Vec<(TaskId, TaskId, ActivityId)> {
        self.graph
            .edge_references()
            .map(|edge| {
                (
                    self.graph[edge.source()].task,
                    self.graph[edge.target()].task,
                    *edge.weight(),
                )
            })
            .collect()
    }

    /// Node keys in graph insertion order.
    pub fn tasks(&self) -> Vec<TaskId> {
        self.graph
            .node_indices()
            .map(|index| self.graph[index].task)
            .collect()
    }

    /// Task ids in dependency-safe execution order.
    ///
    /// # Errors
    ///
    /// * [`LoomError::CircularDependency`] - if the graph contains a cycle
    pub fn topological_sort(&self) -> Result<Vec<TaskId>> {
        let sorted = toposort(&self.graph, None)
            .map_err(|_| LoomError::CircularDependency(self.find_cycle()))?;
        Ok(sorted.iter().map(|&index| self.graph[index].task).collect())
    }

    /// Check that the graph contains no cycles.
    ///
    /// # Errors
    ///
    /// * [`LoomError::CircularDependency`] - with the cycle path for
    ///   debugging
    pub fn validate_acyclic(&self) -> Result<()> {
        if is_cyclic_directed(&self.graph) {
            return Err(LoomError::CircularDependency(self.find_cycle()));
        }
        Ok(())
    }

    /// Find a cycle in the graph for error reporting
    fn find_cycle(&self) -> String {
        let mut visited = HashMap::new();
        let mut path = Vec::new();

        for node in self.graph.node_indices() {
            if !visited.contains_key(&node) {
                if let Some(cycle) = self.dfs_find_cycle(node, &mut visited, &mut path) {
                    return cycle;
                }
            }
        }

        "unknown cycle".to_string()
    }

    fn dfs_find_cycle(
        &self,
        node: NodeIndex,
        visited: &mut HashMap<NodeIndex, bool>,
        path: &mut Vec<String>,
    ) -> Option<String> {
        if let Some(&in_path) = visited.get(&node) {
            if in_path {
                path.push(self.graph[node].task.to_string());
                return Some(path.join(" -> "));
            }
            return None;
        }

        visited.insert(node, true);
        path.push(self.graph[node].task.to_string());

        for neighbor in self.graph.neighbors(node) {
            if let Some(cycle) = self.dfs_find_cycle(neighbor, visited, path) {
                return Some(cycle);
            }
        }

        path.pop();
        visited.insert(node, false);
        None
    }
}
