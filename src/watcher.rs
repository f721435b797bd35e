//! Periodic scan-and-launch trigger
//!
//! Every N minutes (default 5) the watcher scans the dags directory for
//! persisted pipelines; each non-directory entry is deserialized against the
//! configured task registry, collected and run on a blocking thread.

use crate::error::{LoomError, Result};
use crate::pipeline::Pipeline;
use crate::task::TaskRegistry;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

pub const DEFAULT_INTERVAL_MINUTES: u64 = 5;

/// Background trigger that launches persisted DAGs on an interval.
pub struct DagWatcher {
    scheduler: JobScheduler,
    dags_dir: PathBuf,
    registry: Arc<TaskRegistry>,
    interval_minutes: u64,
}

impl DagWatcher {
    pub async fn new(
        dags_dir: impl Into<PathBuf>,
        registry: Arc<TaskRegistry>,
        interval_minutes: u64,
    ) -> Result<Self> {
        let scheduler = JobScheduler::new().await.map_err(|err| {
            LoomError::Scheduler(format!("failed to create job scheduler: {}", err))
        })?;
        Ok(Self {
            scheduler,
            dags_dir: dags_dir.into(),
            registry,
            interval_minutes: interval_minutes.clamp(1, 59),
        })
    }

    /// Register the interval job and start the scheduler.
    pub async fn start(&mut self) -> Result<()> {
        let cron = format!("0 */{} * * * *", self.interval_minutes);
        let dags_dir = self.dags_dir.clone();
        let registry = Arc::clone(&self.registry);

        let job = Job::new_async(cron.as_str(), move |_uuid, _lock| {
            let dags_dir = dags_dir.clone();
            let registry = Arc::clone(&registry);
            Box::pin(async move {
                let (launched, failed) = scan_and_launch(&dags_dir, registry).await;
                info!(
                    "dag scan finished: {} launched, {} failed",
                    launched, failed
                );
            })
        })
        .map_err(|err| LoomError::Scheduler(format!("invalid trigger schedule: {}", err)))?;

        self.scheduler
            .add(job)
            .await
            .map_err(|err| LoomError::Scheduler(format!("failed to add trigger job: {}", err)))?;
        self.scheduler
            .start()
            .await
            .map_err(|err| LoomError::Scheduler(format!("failed to start scheduler: {}", err)))?;

        info!(
            "watching {:?} every {} minute(s)",
            self.dags_dir, self.interval_minutes
        );
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.scheduler
            .shutdown()
            .await
            .map_err(|err| LoomError::Scheduler(format!("failed to shut down scheduler: {}", err)))
    }
}

/// Scan the dags directory once; load, collect and run every persisted DAG.
///
/// Returns `(launched, failed)` counts. Failures are logged and do not stop
/// the scan.
pub async fn scan_and_launch(dags_dir: &Path, registry: Arc<TaskRegistry>) -> (usize, usize) {
    let entries = match std::fs::read_dir(dags_dir) {
        Ok(entries) => entries,
        Err(err) => {
            error!("cannot scan dags directory {:?}: {}", dags_dir, err);
            return (0, 0);
        }
    };

    let mut launched = 0;
    let mut failed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            continue;
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let registry = Arc::clone(&registry);

        let outcome = tokio::task::spawn_blocking(move || {
            let mut pipeline = Pipeline::load_file(&path, &registry)?;
            pipeline.collect()?;
            pipeline.run()
        })
        .await;

        match outcome {
            Ok(Ok(())) => {
                info!("pipeline '{}' run complete", name);
                launched += 1;
            }
            Ok(Err(err)) => {
                error!("pipeline '{}' failed: {}", name, err);
                failed += 1;
            }
            Err(err) => {
                error!("pipeline '{}' panicked: {}", name, err);
                failed += 1;
            }
        }
    }
    (launched, failed)
}
