//! Single-threaded run loop
//!
//! Drains the queue in topological order. No suspension points and no
//! locking are needed; by construction every upstream has completed before
//! its downstream is dequeued.

use super::{invoke, reclaim_after, ExecEnv};
use crate::activity::ActivityStatus;
use crate::error::Result;
use crate::queue::SequentialQueue;
use tracing::debug;

pub(crate) fn run(env: &ExecEnv<'_>, queue: &SequentialQueue) -> Result<()> {
    while let Some(activity) = queue.dequeue() {
        activity.set_status(ActivityStatus::Running);
        debug!("activity '{}' running", activity.label());
        invoke(env, &activity)?;
        queue.done();
        reclaim_after(env, &activity.task);
    }
    Ok(())
}
