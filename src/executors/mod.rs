//! Execution backends for the activity queue
//!
//! All three backends share the same per-activity procedure: gather inputs
//! from completed upstream activities, invoke the task's callable, store the
//! result and acknowledge the queue. They differ only in how workers are
//! scheduled around that procedure.

pub mod cooperative;
pub mod pool;
pub mod sequential;

use crate::activity::Activity;
use crate::dag::Dag;
use crate::error::{LoomError, Result};
use crate::ids::TaskId;
use crate::metrics::EngineMetrics;
use crate::reclaim;
use crate::task::{TaskContext, TaskSpec};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

/// Shared read-only view of a running pipeline.
///
/// The graph is immutable during a run; only per-activity status and result
/// slots mutate, behind their own locks.
pub(crate) struct ExecEnv<'a> {
    pub dag: &'a Dag,
    pub tasks: &'a HashMap<TaskId, TaskSpec>,
    pub ctx: &'a TaskContext,
    pub gc_enabled: bool,
    pub metrics: &'a EngineMetrics,
}

/// Assemble the positional input tuple for an activity.
///
/// Resolved dependencies are visited in declaration order, deduplicated; at
/// each upstream node the results of the activities named in `related` are
/// collected. Null results contribute nothing.
pub(crate) fn gather_inputs(dag: &Dag, activity: &Activity) -> Vec<Value> {
    let mut inputs = Vec::new();
    let mut seen: Vec<TaskId> = Vec::new();
    for dep in &activity.depends_on {
        if seen.contains(dep) {
            continue;
        }
        seen.push(*dep);
        for upstream in dag.activities(dep) {
            if !activity.related.contains(&upstream.id) {
                continue;
            }
            match upstream.result() {
                Some(Value::Null) | None => {}
                Some(value) => inputs.push(value),
            }
        }
    }
    inputs
}

/// Run one activity's callable and record the outcome.
///
/// The caller has already transitioned the activity to `Running`.
pub(crate) fn invoke(env: &ExecEnv<'_>, activity: &Arc<Activity>) -> Result<()> {
    let spec = env.tasks.get(&activity.task).ok_or_else(|| {
        LoomError::NotFound(format!(
            "task {} referenced by activity '{}'",
            activity.task,
            activity.label()
        ))
    })?;
    let inputs = gather_inputs(env.dag, activity);
    let started = Instant::now();
    match spec.run(env.ctx, &inputs, &activity.kwargs) {
        Ok(value) => {
            activity.complete(value);
            let elapsed = started.elapsed();
            env.metrics
                .record_completed(spec.symbol(), elapsed.as_secs_f64());
            info!(
                "activity '{}' completed in {:?}",
                activity.label(),
                elapsed
            );
            Ok(())
        }
        Err(cause) => {
            activity.fail();
            env.metrics.record_failed(spec.symbol());
            error!("activity '{}' failed: {:#}", activity.label(), cause);
            Err(LoomError::ActivityFailed {
                name: activity.label(),
                id: activity.id,
                cause,
            })
        }
    }
}

/// Run the reclamation pass for a just-completed task, if enabled.
pub(crate) fn reclaim_after(env: &ExecEnv<'_>, task: &TaskId) {
    if !env.gc_enabled {
        return;
    }
    let cleared = reclaim::sweep(env.dag, task);
    if cleared > 0 {
        env.metrics.record_reclaimed(cleared);
        debug!("reclaimed {} intermediate result(s)", cleared);
    }
}
