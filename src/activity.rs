//! Scheduling nodes: activities and their runtime state
//!
//! An [`Activity`] is one scheduled instance of a task: the task reference,
//! bound keyword arguments, resolved dependencies, a status machine and a
//! result slot. Several activities may share one task and therefore one DAG
//! node.

use crate::ids::{ActivityId, PipelineId, TaskId};
use crate::task::{Kwargs, TaskSpec};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;

/// Runtime status of an activity.
///
/// `Waiting` is only entered by the cooperative executor while upstream
/// results are pending. `Completed` and `Failed` are terminal for the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ActivityStatus {
    #[default]
    NotStarted,
    Queued,
    Waiting,
    Running,
    Completed,
    Failed,
}

impl ActivityStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ActivityStatus::Completed | ActivityStatus::Failed)
    }
}

impl fmt::Display for ActivityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActivityStatus::NotStarted => write!(f, "not started"),
            ActivityStatus::Queued => write!(f, "queued"),
            ActivityStatus::Waiting => write!(f, "waiting"),
            ActivityStatus::Running => write!(f, "running"),
            ActivityStatus::Completed => write!(f, "completed"),
            ActivityStatus::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CellState {
    status: ActivityStatus,
    result: Option<Value>,
}

/// Status and result slot with both blocking and async completion signals.
///
/// The status/result pair is written by exactly one worker (the one that
/// dequeued the activity); readers are workers handling its downstreams and
/// the reclamation pass. Terminal transitions wake condvar waiters
/// (thread pool) and notify waiters (cooperative executor).
pub struct StatusCell {
    state: Mutex<CellState>,
    cv: Condvar,
    notify: Notify,
}

impl StatusCell {
    fn from_state(state: CellState) -> Self {
        Self {
            state: Mutex::new(state),
            cv: Condvar::new(),
            notify: Notify::new(),
        }
    }

    /// Acquire the state lock, recovering from poisoning. A worker panic
    /// cannot corrupt the status/result pair, so the data is still usable.
    fn lock(&self) -> MutexGuard<'_, CellState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poison) => {
                tracing::warn!("activity state mutex was poisoned, recovering");
                poison.into_inner()
            }
        }
    }

    fn snapshot(&self) -> CellState {
        self.lock().clone()
    }
}

impl Default for StatusCell {
    fn default() -> Self {
        Self::from_state(CellState::default())
    }
}

impl Clone for StatusCell {
    fn clone(&self) -> Self {
        Self::from_state(self.snapshot())
    }
}

impl fmt::Debug for StatusCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.snapshot();
        f.debug_struct("StatusCell")
            .field("status", &state.status)
            .field("has_result", &state.result.is_some())
            .finish()
    }
}

impl Serialize for StatusCell {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.snapshot().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for StatusCell {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        CellState::deserialize(deserializer).map(StatusCell::from_state)
    }
}

/// One scheduled instance of a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activity {
    pub id: ActivityId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub desc: Option<String>,
    /// The task this activity runs. Activities refer to specs by id; the
    /// pipeline's task table owns the specs.
    pub task: TaskId,
    #[serde(default)]
    pub kwargs: Kwargs,
    /// Resolved upstream task ids, in declaration order.
    #[serde(default)]
    pub depends_on: Vec<TaskId>,
    /// Ids of the specific upstream activity instances whose results feed
    /// this activity.
    #[serde(default)]
    pub related: Vec<ActivityId>,
    #[serde(default)]
    pub skip_validation: bool,
    /// Reserved; not acted upon by the engine.
    #[serde(default)]
    pub retry: u32,
    /// Reserved; not acted upon by the engine.
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(rename = "state", default)]
    cell: StatusCell,
}

impl Activity {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: ActivityId,
        name: Option<String>,
        desc: Option<String>,
        task: TaskId,
        kwargs: Kwargs,
        depends_on: Vec<TaskId>,
        related: Vec<ActivityId>,
        skip_validation: bool,
        retry: u32,
        timeout: Option<u64>,
    ) -> Self {
        Self {
            id,
            name,
            desc,
            task,
            kwargs,
            depends_on,
            related,
            skip_validation,
            retry,
            timeout,
            cell: StatusCell::default(),
        }
    }

    /// Display name used in logs and failure reports.
    pub fn label(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.id.to_string())
    }

    pub fn status(&self) -> ActivityStatus {
        self.cell.lock().status
    }

    pub fn set_status(&self, status: ActivityStatus) {
        self.cell.lock().status = status;
    }

    /// Store the result and transition to `Completed`, waking all waiters.
    pub fn complete(&self, result: Value) {
        {
            let mut state = self.cell.lock();
            state.status = ActivityStatus::Completed;
            state.result = Some(result);
        }
        self.cell.cv.notify_all();
        self.cell.notify.notify_waiters();
    }

    /// Transition to `Failed`, waking all waiters.
    pub fn fail(&self) {
        self.cell.lock().status = ActivityStatus::Failed;
        self.cell.cv.notify_all();
        self.cell.notify.notify_waiters();
    }

    pub fn result(&self) -> Option<Value> {
        self.cell.lock().result.clone()
    }

    pub fn has_result(&self) -> bool {
        self.cell.lock().result.is_some()
    }

    /// Drop the stored result. Returns whether a value was held.
    pub fn clear_result(&self) -> bool {
        self.cell.lock().result.take().is_some()
    }

    /// Block until this activity reaches a terminal status.
    ///
    /// Returns `None` when the abort flag is raised before completion. The
    /// wait re-checks the flag on a bounded interval so that an aborted run
    /// cannot strand waiters on upstreams that will never run.
    pub fn wait_terminal_blocking(&self, abort: &AtomicBool) -> Option<ActivityStatus> {
        let mut state = self.cell.lock();
        loop {
            if state.status.is_terminal() {
                return Some(state.status);
            }
            if abort.load(Ordering::Acquire) {
                return None;
            }
            let (guard, _) = match self.cell.cv.wait_timeout(state, Duration::from_millis(50)) {
                Ok(pair) => pair,
                Err(poison) => {
                    tracing::warn!("activity state mutex was poisoned, recovering");
                    poison.into_inner()
                }
            };
            state = guard;
        }
    }

    /// Await a terminal status without polling.
    ///
    /// The notified future is created before the status check, so a
    /// completion between check and await cannot be missed.
    pub async fn wait_terminal(&self) -> ActivityStatus {
        loop {
            let notified = self.cell.notify.notified();
            let status = self.status();
            if status.is_terminal() {
                return status;
            }
            notified.await;
        }
    }
}

/// A dependency reference as authored by the user.
///
/// Compose resolves every reference down to a task id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DepRef {
    /// Reference by activity name within the pipeline (or its caller).
    ByName(String),
    /// Reference by the task a previous step runs.
    ByTask(TaskId),
    /// Reference to a nested pipeline; resolves to its last step's task.
    ByPipeline(PipelineId),
}

impl DepRef {
    pub fn name(name: impl Into<String>) -> Self {
        DepRef::ByName(name.into())
    }

    pub fn task(spec: &TaskSpec) -> Self {
        DepRef::ByTask(spec.tid)
    }
}

/// A step declaration: a task plus bindings, dependencies and metadata.
///
/// Built by the user, consumed by `Pipeline::compose`, which turns it into
/// an [`Activity`] in the graph.
#[derive(Debug, Clone)]
pub struct ActivityDef {
    pub(crate) id: ActivityId,
    pub(crate) task: TaskSpec,
    pub(crate) kwargs: Kwargs,
    pub(crate) depends_on: Vec<DepRef>,
    pub(crate) skip_validation: bool,
    pub(crate) retry: u32,
    pub(crate) timeout: Option<u64>,
    pub(crate) name: Option<String>,
    pub(crate) desc: Option<String>,
}

impl ActivityDef {
    pub fn new(task: TaskSpec) -> Self {
        Self {
            id: ActivityId::new(),
            task,
            kwargs: Kwargs::new(),
            depends_on: Vec::new(),
            skip_validation: false,
            retry: 0,
            timeout: None,
            name: None,
            desc: None,
        }
    }

    pub fn id(&self) -> ActivityId {
        self.id
    }

    pub fn with_kwargs(mut self, kwargs: Kwargs) -> Self {
        for (k, v) in kwargs {
            self.kwargs.insert(k, v);
        }
        self
    }

    pub fn kwarg(mut self, key: impl Into<String>, value: Value) -> Self {
        self.kwargs.insert(key.into(), value);
        self
    }

    pub fn depends_on(mut self, deps: impl IntoIterator<Item = DepRef>) -> Self {
        self.depends_on.extend(deps);
        self
    }

    /// Name this activity; the lookup key for by-name dependency references.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn described(mut self, desc: impl Into<String>) -> Self {
        self.desc = Some(desc.into());
        self
    }

    /// Suppress the type-compatibility check for this activity's
    /// dependencies.
    pub fn skip_validation(mut self, skip: bool) -> Self {
        self.skip_validation = skip;
        self
    }

    /// Reserved; stored but not acted upon.
    pub fn retry(mut self, retries: u32) -> Self {
        self.retry = retries;
        self
    }

    /// Reserved; stored but not acted upon.
    pub fn timeout_secs(mut self, seconds: u64) -> Self {
        self.timeout = Some(seconds);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn activity() -> Activity {
        Activity::new(
            ActivityId::new(),
            Some("extract".to_string()),
            None,
            TaskId::new(),
            Kwargs::new(),
            vec![],
            vec![],
            false,
            0,
            None,
        )
    }

    #[test]
    fn test_status_machine() {
        let act = activity();
        assert_eq!(act.status(), ActivityStatus::NotStarted);
        act.set_status(ActivityStatus::Queued);
        act.set_status(ActivityStatus::Running);
        act.complete(json!([1, 2, 3]));
        assert_eq!(act.status(), ActivityStatus::Completed);
        assert!(act.status().is_terminal());
        assert_eq!(act.result(), Some(json!([1, 2, 3])));
    }

    #[test]
    fn test_clear_result() {
        let act = activity();
        act.complete(json!(42));
        assert!(act.clear_result());
        assert!(!act.clear_result());
        assert_eq!(act.result(), None);
        // status stays terminal
        assert_eq!(act.status(), ActivityStatus::Completed);
    }

    #[test]
    fn test_serde_keeps_status_and_result() {
        let act = activity();
        act.complete(json!("done"));
        let encoded = serde_json::to_string(&act).unwrap();
        let restored: Activity = serde_json::from_str(&encoded).unwrap();
        assert_eq!(restored.id, act.id);
        assert_eq!(restored.status(), ActivityStatus::Completed);
        assert_eq!(restored.result(), Some(json!("done")));
    }

    #[test]
    fn test_blocking_wait_sees_completion() {
        let act = Arc::new(activity());
        let waiter = Arc::clone(&act);
        let abort = Arc::new(AtomicBool::new(false));
        let abort_flag = Arc::clone(&abort);

        let handle = std::thread::spawn(move || waiter.wait_terminal_blocking(&abort_flag));
        act.complete(json!(1));
        assert_eq!(handle.join().unwrap(), Some(ActivityStatus::Completed));
    }

    #[test]
    fn test_blocking_wait_observes_abort() {
        let act = Arc::new(activity());
        let waiter = Arc::clone(&act);
        let abort = Arc::new(AtomicBool::new(false));
        let abort_flag = Arc::clone(&abort);

        let handle = std::thread::spawn(move || waiter.wait_terminal_blocking(&abort_flag));
        abort.store(true, Ordering::Release);
        assert_eq!(handle.join().unwrap(), None);
    }

    #[tokio::test]
    async fn test_async_wait_sees_completion() {
        let act = Arc::new(activity());
        let waiter = Arc::clone(&act);
        let task = tokio::spawn(async move { waiter.wait_terminal().await });
        tokio::task::yield_now().await;
        act.fail();
        assert_eq!(task.await.unwrap(), ActivityStatus::Failed);
    }

    #[test]
    fn test_def_builder() {
        let mut registry = crate::task::TaskRegistry::new();
        registry.register("t", vec![], Some(crate::types::TypeTag::Unit), |_, _| {
            Ok(Value::Null)
        });
        let spec = TaskSpec::new(&registry, "t").unwrap();
        let def = ActivityDef::new(spec.clone())
            .named("step")
            .kwarg("n", json!(3))
            .depends_on([DepRef::name("upstream"), DepRef::task(&spec)]);
        assert_eq!(def.name.as_deref(), Some("step"));
        assert_eq!(def.kwargs.get("n"), Some(&json!(3)));
        assert_eq!(def.depends_on.len(), 2);
    }
}
