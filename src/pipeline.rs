//! Pipelines: compose step declarations into a validated DAG and execute it
//!
//! A pipeline is authored as an ordered list of steps. `compose` resolves
//! every dependency reference down to a task id, checks type compatibility
//! between adjacent tasks, inlines nested pipelines by merging their graphs,
//! and verifies the result is acyclic. `collect` enqueues the activities in
//! topological order and `run` drains the queue under the chosen scheduling
//! model.

use crate::activity::{Activity, ActivityDef, ActivityStatus, DepRef};
use crate::dag::Dag;
use crate::error::{LoomError, Result};
use crate::executors::{self, ExecEnv};
use crate::ids::{ActivityId, PipelineId, TaskId};
use crate::metrics::EngineMetrics;
use crate::persist::DagSnapshot;
use crate::queue::{QueueBackend, QueueKind};
use crate::task::{TaskContext, TaskRegistry, TaskSpec};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Scheduling model, selected at pipeline construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// One thread, one worker, no suspension points.
    #[default]
    Sequential,
    /// N worker threads over a thread-safe queue.
    ThreadPool { workers: usize },
    /// N interleaved logical workers on a single thread.
    Cooperative { workers: usize },
}

impl ExecutionMode {
    fn queue_kind(self) -> QueueKind {
        match self {
            ExecutionMode::Sequential => QueueKind::Sequential,
            ExecutionMode::ThreadPool { .. } => QueueKind::Concurrent,
            ExecutionMode::Cooperative { .. } => QueueKind::Cooperative,
        }
    }
}

/// One entry in a pipeline's step list.
#[derive(Debug)]
pub enum Step {
    Activity(ActivityDef),
    /// A nested pipeline, inlined into the outer graph during compose.
    Pipeline(Pipeline),
}

impl From<ActivityDef> for Step {
    fn from(def: ActivityDef) -> Self {
        Step::Activity(def)
    }
}

impl From<Pipeline> for Step {
    fn from(pipeline: Pipeline) -> Self {
        Step::Pipeline(pipeline)
    }
}

impl DepRef {
    /// Reference a nested pipeline; resolves to the task of its last step.
    pub fn pipeline(pipeline: &Pipeline) -> Self {
        DepRef::ByPipeline(pipeline.pid)
    }
}

/// A DAG-based pipeline of activities.
#[derive(Debug)]
pub struct Pipeline {
    pid: PipelineId,
    steps: Vec<Step>,
    mode: ExecutionMode,
    gc_enabled: bool,
    tasks: HashMap<TaskId, TaskSpec>,
    dag: Dag,
    /// Inlined sub-pipelines, mapped to the task of their last step.
    inlined: HashMap<PipelineId, TaskId>,
    /// Ids of the activity instances scheduled by this pipeline's own steps
    /// and those of inlined sub-pipelines.
    scheduled: Vec<ActivityId>,
    last_task: Option<TaskId>,
    queue: QueueBackend,
    ctx: TaskContext,
    metrics: EngineMetrics,
}

impl Pipeline {
    pub fn new(
        steps: impl IntoIterator<Item = Step>,
        mode: ExecutionMode,
        gc_enabled: bool,
    ) -> Self {
        Self {
            pid: PipelineId::new(),
            steps: steps.into_iter().collect(),
            mode,
            gc_enabled,
            tasks: HashMap::new(),
            dag: Dag::new(),
            inlined: HashMap::new(),
            scheduled: Vec::new(),
            last_task: None,
            queue: mode.queue_kind().build(0),
            ctx: TaskContext::new(),
            metrics: EngineMetrics::new(),
        }
    }

    /// Sequential pipeline with reclamation enabled.
    pub fn sequential(steps: impl IntoIterator<Item = Step>) -> Self {
        Self::new(steps, ExecutionMode::Sequential, true)
    }

    /// Attach shared runtime resources for context-aware tasks.
    pub fn with_context(mut self, ctx: TaskContext) -> Self {
        self.ctx = ctx;
        self
    }

    pub fn pid(&self) -> PipelineId {
        self.pid
    }

    pub fn dag(&self) -> &Dag {
        &self.dag
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn gc_enabled(&self) -> bool {
        self.gc_enabled
    }

    pub fn task_spec(&self, task: &TaskId) -> Option<&TaskSpec> {
        self.tasks.get(task)
    }

    pub fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }

    /// Compose the DAG from the pipeline's steps.
    ///
    /// # Errors
    ///
    /// * [`LoomError::Dependency`] - unresolvable or self-referential
    ///   dependency
    /// * [`LoomError::Compatibility`] - adjacent tasks are not
    ///   type-compatible
    /// * [`LoomError::CircularDependency`] - the composed graph has a cycle
    pub fn compose(&mut self) -> Result<()> {
        self.compose_with(None)
    }

    fn compose_with(&mut self, caller: Option<&Pipeline>) -> Result<()> {
        let steps = std::mem::take(&mut self.steps);

        // activity names are the lookup key for by-name references and must
        // be unique within a single authored pipeline
        let mut seen_names = HashSet::new();
        for step in &steps {
            if let Step::Activity(def) = step {
                if let Some(name) = &def.name {
                    if !seen_names.insert(name.clone()) {
                        return Err(LoomError::Dependency(format!(
                            "duplicate activity name '{}' in pipeline",
                            name
                        )));
                    }
                }
            }
        }

        for step in steps {
            match step {
                Step::Pipeline(mut sub) => {
                    if sub.dag.is_empty() {
                        sub.compose_with(Some(&*self))?;
                    }
                    self.absorb(sub)?;
                }
                Step::Activity(def) => self.add_step(def, caller)?,
            }
        }

        self.dag.validate_acyclic()
    }

    /// Merge an already-composed sub-pipeline into this graph.
    fn absorb(&mut self, sub: Pipeline) -> Result<()> {
        let last = sub.last_task.ok_or_else(|| {
            LoomError::Dependency(format!("nested pipeline {} has no steps", sub.pid))
        })?;
        debug!("inlining pipeline {} into {}", sub.pid, self.pid);
        self.inlined.insert(sub.pid, last);
        self.inlined.extend(sub.inlined);
        self.tasks.extend(sub.tasks);
        self.scheduled.extend(sub.scheduled);
        self.dag.merge(sub.dag);
        Ok(())
    }

    fn add_step(&mut self, def: ActivityDef, caller: Option<&Pipeline>) -> Result<()> {
        let ActivityDef {
            id,
            task,
            kwargs,
            depends_on,
            skip_validation,
            retry,
            timeout,
            name,
            desc,
        } = def;
        let tid = task.tid;
        self.tasks.entry(tid).or_insert(task);

        let mut resolved: Vec<TaskId> = Vec::with_capacity(depends_on.len());
        let mut related: Vec<ActivityId> = Vec::new();

        for dep in depends_on {
            let (dep_task, upstream_ids) = self.resolve_dep(&dep, caller)?;

            if dep_task == tid {
                return Err(LoomError::Dependency(format!(
                    "activity '{}' cannot have its own task as a dependency",
                    name.as_deref().unwrap_or("<unnamed>")
                )));
            }

            if !skip_validation {
                let downstream = &self.tasks[&tid];
                let upstream = self.lookup_spec(&dep_task, caller).ok_or_else(|| {
                    LoomError::Dependency(format!("no task spec registered for {}", dep_task))
                })?;
                downstream.validate(upstream)?;
            }

            self.dag.add_edge(dep_task, tid, id);
            resolved.push(dep_task);
            related.extend(upstream_ids);
        }

        // dedup related, first-seen order
        let mut deduped = Vec::with_capacity(related.len());
        for rid in related {
            if !deduped.contains(&rid) {
                deduped.push(rid);
            }
        }

        let activity = Arc::new(Activity::new(
            id,
            name,
            desc,
            tid,
            kwargs,
            resolved,
            deduped,
            skip_validation,
            retry,
            timeout,
        ));
        debug!("adding activity '{}' to task node {}", activity.label(), tid);
        self.dag.add_activity(tid, activity);
        self.scheduled.push(id);
        self.last_task = Some(tid);
        Ok(())
    }

    fn lookup_spec<'a>(
        &'a self,
        task: &TaskId,
        caller: Option<&'a Pipeline>,
    ) -> Option<&'a TaskSpec> {
        self.tasks
            .get(task)
            .or_else(|| caller.and_then(|c| c.tasks.get(task)))
    }

    /// Resolve a dependency reference to `(task id, upstream activity ids)`.
    ///
    /// Lookups scope to this pipeline first and fall back to the calling
    /// pipeline during recursive composition.
    fn resolve_dep(
        &self,
        dep: &DepRef,
        caller: Option<&Pipeline>,
    ) -> Result<(TaskId, Vec<ActivityId>)> {
        match dep {
            DepRef::ByPipeline(pid) => {
                let last = self
                    .inlined
                    .get(pid)
                    .or_else(|| caller.and_then(|c| c.inlined.get(pid)))
                    .ok_or_else(|| {
                        LoomError::Dependency(format!(
                            "pipeline {} was not inlined before it was referenced",
                            pid
                        ))
                    })?;
                let ids: Vec<ActivityId> =
                    self.dag.activities(last).iter().map(|a| a.id).collect();
                if ids.is_empty() {
                    return Err(LoomError::Dependency(format!(
                        "no activities found for the last step of pipeline {}",
                        pid
                    )));
                }
                Ok((*last, ids))
            }
            DepRef::ByName(name) => {
                let (activity, dag) = match self.dag.find_by_name(name) {
                    Some(activity) => (activity, &self.dag),
                    None => match caller
                        .and_then(|c| c.dag.find_by_name(name).map(|a| (a, &c.dag)))
                    {
                        Some(found) => found,
                        None => {
                            return Err(LoomError::Dependency(format!(
                                "activity '{}' was not found in the pipeline or its caller",
                                name
                            )))
                        }
                    },
                };
                let tid = activity.task;
                let ids: Vec<ActivityId> = dag.activities(&tid).iter().map(|a| a.id).collect();
                Ok((tid, ids))
            }
            DepRef::ByTask(tid) => {
                let (dag, scheduled) = if self.dag.contains_task(tid) {
                    (&self.dag, &self.scheduled)
                } else if let Some(c) = caller.filter(|c| c.dag.contains_task(tid)) {
                    (&c.dag, &c.scheduled)
                } else {
                    return Err(LoomError::Dependency(format!(
                        "task {} was not found in the pipeline or its caller",
                        tid
                    )));
                };
                // only consume outputs of activity instances that were
                // actually scheduled; an empty subset leaves related empty
                let ids: Vec<ActivityId> = dag
                    .activities(tid)
                    .iter()
                    .map(|a| a.id)
                    .filter(|id| scheduled.contains(id))
                    .collect();
                Ok((*tid, ids))
            }
        }
    }

    /// Enqueue every activity in topological order, transitioning each to
    /// `Queued`. Composes first when the DAG is empty.
    pub fn collect(&mut self) -> Result<()> {
        if self.dag.is_empty() {
            self.compose()?;
        }
        for tid in self.dag.topological_sort()? {
            for activity in self.dag.activities(&tid) {
                self.queue.enqueue(Arc::clone(activity))?;
                activity.set_status(ActivityStatus::Queued);
                debug!("activity '{}' queued", activity.label());
            }
        }
        Ok(())
    }

    /// Run all activities under the pipeline's scheduling model.
    ///
    /// Results are read off activities afterwards; see [`Self::result_of`].
    ///
    /// # Errors
    ///
    /// * [`LoomError::ActivityFailed`] - a callable raised; the run stops
    ///   and the graph is left in place for inspection
    pub fn run(&mut self) -> Result<()> {
        if self.queue.is_empty() {
            self.collect()?;
        }
        info!(
            "running pipeline {} ({} activities, {:?})",
            self.pid,
            self.dag.activity_count(),
            self.mode
        );
        let env = ExecEnv {
            dag: &self.dag,
            tasks: &self.tasks,
            ctx: &self.ctx,
            gc_enabled: self.gc_enabled,
            metrics: &self.metrics,
        };
        match (self.mode, &self.queue) {
            (ExecutionMode::Sequential, QueueBackend::Sequential(queue)) => {
                executors::sequential::run(&env, queue)
            }
            (ExecutionMode::ThreadPool { workers }, QueueBackend::Concurrent(queue)) => {
                executors::pool::run(&env, queue, workers)
            }
            (ExecutionMode::Cooperative { workers }, QueueBackend::Cooperative(queue)) => {
                executors::cooperative::run(&env, queue, workers)
            }
            _ => Err(LoomError::Other(
                "pipeline queue does not match its execution mode".to_string(),
            )),
        }
    }

    /// Look up an activity by name.
    ///
    /// # Errors
    ///
    /// * [`LoomError::NotFound`] - no activity carries the name
    pub fn get_activity_by_name(&self, name: &str) -> Result<Arc<Activity>> {
        self.dag
            .find_by_name(name)
            .ok_or_else(|| LoomError::NotFound(name.to_string()))
    }

    /// The stored result of a named activity, if any.
    pub fn result_of(&self, name: &str) -> Result<Option<Value>> {
        Ok(self.get_activity_by_name(name)?.result())
    }

    /// Serialize the composed DAG to a byte stream.
    pub fn dump_bytes(&self) -> Result<Vec<u8>> {
        DagSnapshot::capture(&self.dag, &self.tasks).encode()
    }

    /// Serialize the composed DAG to a file.
    pub fn dump(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.dump_bytes()?)?;
        Ok(())
    }

    /// Replace this pipeline's DAG with a deserialized snapshot, re-binding
    /// callables from `registry`.
    pub fn load_bytes(&mut self, bytes: &[u8], registry: &TaskRegistry) -> Result<()> {
        let snapshot = DagSnapshot::decode(bytes)?;
        let (dag, tasks) = snapshot.restore(registry)?;
        self.dag = dag;
        self.tasks = tasks;
        Ok(())
    }

    /// Replace this pipeline's DAG with the snapshot stored at `path`.
    pub fn load(&mut self, path: impl AsRef<Path>, registry: &TaskRegistry) -> Result<()> {
        let bytes = std::fs::read(path)?;
        self.load_bytes(&bytes, registry)
    }

    /// Build a fresh sequential pipeline from a persisted snapshot.
    pub fn load_file(path: impl AsRef<Path>, registry: &TaskRegistry) -> Result<Pipeline> {
        let mut pipeline = Pipeline::new([], ExecutionMode::Sequential, true);
        pipeline.load(path, registry)?;
        Ok(pipeline)
    }
}
