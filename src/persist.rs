//! Structural persistence of composed graphs
//!
//! Serializing user callables is intentionally avoided: a snapshot stores
//! the structure of the DAG (task specs by symbol name, activities, keyed
//! edges) and the registry is consulted at load time to re-bind the
//! callables. Round-tripping therefore requires registered symbols.

use crate::activity::Activity;
use crate::dag::Dag;
use crate::error::Result;
use crate::ids::{ActivityId, TaskId};
use crate::task::{TaskRegistry, TaskSpec};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub task: TaskId,
    pub activities: Vec<Activity>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EdgeSnapshot {
    pub from: TaskId,
    pub to: TaskId,
    pub key: ActivityId,
}

/// Serializable form of a composed DAG and its task table.
#[derive(Debug, Serialize, Deserialize)]
pub struct DagSnapshot {
    pub tasks: Vec<TaskSpec>,
    pub nodes: Vec<NodeSnapshot>,
    pub edges: Vec<EdgeSnapshot>,
}

impl DagSnapshot {
    /// Capture the graph and task table, nodes in graph insertion order.
    pub fn capture(dag: &Dag, tasks: &HashMap<TaskId, TaskSpec>) -> Self {
        let mut specs = Vec::new();
        let mut nodes = Vec::new();
        for tid in dag.tasks() {
            if let Some(spec) = tasks.get(&tid) {
                specs.push(spec.clone());
            }
            nodes.push(NodeSnapshot {
                task: tid,
                activities: dag
                    .activities(&tid)
                    .iter()
                    .map(|activity| (**activity).clone())
                    .collect(),
            });
        }
        let edges = dag
            .edges()
            .into_iter()
            .map(|(from, to, key)| EdgeSnapshot { from, to, key })
            .collect();
        Self {
            tasks: specs,
            nodes,
            edges,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Rebuild the graph and task table, re-binding callables from
    /// `registry`.
    ///
    /// # Errors
    ///
    /// * [`crate::error::LoomError::UnknownSymbol`] - a persisted task's
    ///   symbol is not registered
    pub fn restore(self, registry: &TaskRegistry) -> Result<(Dag, HashMap<TaskId, TaskSpec>)> {
        let mut tasks = HashMap::with_capacity(self.tasks.len());
        for mut spec in self.tasks {
            spec.rebind(registry)?;
            tasks.insert(spec.tid, spec);
        }
        let mut dag = Dag::new();
        for node in self.nodes {
            for activity in node.activities {
                dag.add_activity(node.task, Arc::new(activity));
            }
        }
        for edge in self.edges {
            dag.add_edge(edge.from, edge.to, edge.key);
        }
        Ok((dag, tasks))
    }
}
