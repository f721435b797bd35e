//! Cooperative execution on a single OS thread
//!
//! N logical workers run as futures polled concurrently on a current-thread
//! runtime. The suspension points are the dequeue yield, the per-upstream
//! completion signals and a post-completion yield; an upstream result that
//! is not yet available suspends the worker on the upstream's notify instead
//! of sleep-polling. The first failure cancels the remaining workers.

use super::{invoke, reclaim_after, ExecEnv};
use crate::activity::ActivityStatus;
use crate::error::Result;
use crate::queue::CooperativeQueue;
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

pub(crate) fn run(env: &ExecEnv<'_>, queue: &CooperativeQueue, workers: usize) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()?;
    let abort = AtomicBool::new(false);

    runtime.block_on(async {
        let mut pool = FuturesUnordered::new();
        for worker_id in 0..workers.max(1) {
            pool.push(worker_loop(env, queue, &abort, worker_id));
        }
        while let Some(result) = pool.next().await {
            // dropping the pool on error cancels the outstanding workers
            result?;
        }
        queue.join().await;
        Ok(())
    })
}

async fn worker_loop(
    env: &ExecEnv<'_>,
    queue: &CooperativeQueue,
    abort: &AtomicBool,
    worker_id: usize,
) -> Result<()> {
    loop {
        if abort.load(Ordering::Acquire) {
            return Ok(());
        }
        let Some(activity) = queue.dequeue().await else {
            return Ok(());
        };

        activity.set_status(ActivityStatus::Waiting);
        debug!("worker {} waiting on '{}'", worker_id, activity.label());
        for upstream_id in &activity.related {
            let Some(upstream) = env.dag.activity(upstream_id) else {
                continue;
            };
            if upstream.wait_terminal().await != ActivityStatus::Completed {
                // the worker that observed the failure aborts the run
                queue.done();
                return Ok(());
            }
        }

        activity.set_status(ActivityStatus::Running);
        debug!("worker {} running '{}'", worker_id, activity.label());
        match invoke(env, &activity) {
            Ok(()) => {
                queue.done();
                reclaim_after(env, &activity.task);
                tokio::task::yield_now().await;
            }
            Err(err) => {
                abort.store(true, Ordering::Release);
                queue.done();
                return Err(err);
            }
        }
    }
}
