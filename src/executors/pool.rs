//! Thread-pool execution
//!
//! N worker threads drain the concurrent queue. Siblings may overlap; a
//! worker that dequeues an activity whose upstreams are still running blocks
//! on their completion signals before starting the callable. The first
//! failure raises the abort flag: remaining queued activities are not
//! executed and blocked waiters wake up and exit.

use super::{invoke, reclaim_after, ExecEnv};
use crate::activity::ActivityStatus;
use crate::error::{LoomError, Result};
use crate::queue::ConcurrentQueue;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

pub(crate) fn run(env: &ExecEnv<'_>, queue: &ConcurrentQueue, workers: usize) -> Result<()> {
    let workers = workers.max(1);
    let abort = AtomicBool::new(false);

    let results: Vec<Result<()>> = std::thread::scope(|scope| {
        let mut handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let abort = &abort;
            handles.push(scope.spawn(move || worker_loop(env, queue, abort, worker_id)));
        }
        handles
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .unwrap_or_else(|_| Err(LoomError::Other("worker thread panicked".to_string())))
            })
            .collect()
    });

    let mut first_error = None;
    for result in results {
        if let Err(err) = result {
            if matches!(err, LoomError::ActivityFailed { .. }) {
                return Err(err);
            }
            first_error.get_or_insert(err);
        }
    }
    if let Some(err) = first_error {
        return Err(err);
    }

    queue.join();
    Ok(())
}

fn worker_loop(
    env: &ExecEnv<'_>,
    queue: &ConcurrentQueue,
    abort: &AtomicBool,
    worker_id: usize,
) -> Result<()> {
    loop {
        if abort.load(Ordering::Acquire) {
            return Ok(());
        }
        let Some(activity) = queue.dequeue(false, None)? else {
            return Ok(());
        };
        debug!("worker {} picked up '{}'", worker_id, activity.label());

        // a downstream never starts its callable until every upstream in its
        // related list has completed
        let mut aborted = false;
        for upstream_id in &activity.related {
            let Some(upstream) = env.dag.activity(upstream_id) else {
                continue;
            };
            match upstream.wait_terminal_blocking(abort) {
                Some(ActivityStatus::Completed) => {}
                _ => {
                    aborted = true;
                    break;
                }
            }
        }
        if aborted {
            abort.store(true, Ordering::Release);
            queue.done();
            return Ok(());
        }

        activity.set_status(ActivityStatus::Running);
        match invoke(env, &activity) {
            Ok(()) => {
                queue.done();
                reclaim_after(env, &activity.task);
            }
            Err(err) => {
                abort.store(true, Ordering::Release);
                queue.done();
                return Err(err);
            }
        }
    }
}
