//! Result reclamation for completed intermediates
//!
//! An intermediate value stays alive exactly until the last downstream
//! consumer has finished. After each completion, the predecessors of the
//! completed node are inspected: once every successor of a predecessor has
//! run all of its activities to completion, the predecessor's stored results
//! are dropped. Terminal sinks are never visited, so their results survive
//! the run.

use crate::activity::ActivityStatus;
use crate::dag::Dag;
use crate::ids::TaskId;
use tracing::debug;

fn all_children_complete(dag: &Dag, task: &TaskId) -> bool {
    dag.successors(task).iter().all(|succ| {
        dag.activities(succ)
            .iter()
            .all(|activity| activity.status() == ActivityStatus::Completed)
    })
}

/// Reclaim upstream results after `completed` has finished.
///
/// Returns the number of result slots that were cleared.
pub fn sweep(dag: &Dag, completed: &TaskId) -> usize {
    let mut cleared = 0;
    for pred in dag.predecessors(completed) {
        if !all_children_complete(dag, &pred) {
            continue;
        }
        for activity in dag.activities(&pred) {
            if activity.clear_result() {
                debug!("reclaimed result of activity '{}'", activity.label());
                cleared += 1;
            }
        }
    }
    cleared
}
