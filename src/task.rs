use crate::{
    oneshot::{ResultHandle, Slot, SlotGuard, TaskError},
    sync::{Mutex, MutexGuard},
    types::{IndexMap, TaskId},
};
use derive_more::Debug;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use thiserror::Error;

/// Error kind for task construction failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TaskBuildError {
    /// The function slot can only be changed while the task is
    /// [`State::Unsubmitted`].
    #[error("function can only be set while the task is unsubmitted")]
    AlreadySubmitted,
}

/// Lifecycle state of a task.
///
/// `Unsubmitted → Waiting|Ready → Running → Completed`; from `Unsubmitted`,
/// `Waiting` or `Ready`, an ancestor's stop directive moves the task to
/// `Aborted` without executing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Created but not yet known to a pool.
    Unsubmitted,
    /// Registered, with at least one unfinished predecessor.
    Waiting,
    /// All predecessors resolved; queued for a worker.
    Ready,
    /// A worker is executing the function.
    Running,
    /// The function returned (or panicked; panics count as completion).
    Completed,
    /// Cancelled before execution.
    Aborted,
}

impl State {
    /// Terminal states count as resolved for dependency accounting.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Aborted)
    }
}

/// Directive a running task may emit; takes effect when its function
/// returns and is reset to [`Flow::Continue`] afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Flow {
    /// Release successors normally.
    #[default]
    Continue,
    /// Abort the transitive successor cone of this task.
    StopDependents,
    /// Drain the whole pool: abort everything not currently running.
    StopAll,
}

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

fn next_task_id() -> TaskId {
    TaskId::new(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed)).expect("Task::new: id overflow")
}

pub(crate) struct TaskInner {
    id: TaskId,
    body: Mutex<TaskBody>,
}

#[derive(Debug)]
pub(crate) struct TaskBody {
    pub(crate) state: State,
    pub(crate) flow: Flow,
    #[debug(skip)]
    pub(crate) func: Option<Box<dyn FnOnce() + Send + 'static>>,
    /// Resolves the result channel to `Aborted` when dropped unfulfilled.
    #[debug(skip)]
    pub(crate) abort_guard: Option<Box<dyn Any + Send>>,
    /// Forward edges; strong handles keep an unsubmitted subgraph alive
    /// until registration hands ownership to the pool's registry.
    pub(crate) predecessors: IndexMap<TaskId, Task>,
    /// Reverse edges; non-owning, maintained by [`Task::add_dependency`].
    #[debug(skip)]
    pub(crate) successors: IndexMap<TaskId, Weak<TaskInner>>,
    /// Number of predecessors not yet in a terminal state.
    pub(crate) pending: usize,
}

/// A unit of deferred work with dependencies.
///
/// `Task` is a cheap-to-clone shared handle; clones refer to the same
/// underlying task, so a closure may capture a clone of its own task to
/// call [`set_flow`](Self::set_flow) from within, exactly as it may
/// capture handles to other tasks to wire dependencies at runtime.
///
/// Attaching a predecessor with [`add_dependency`](Self::add_dependency)
/// records the edge in both directions. Once the task is submitted, the
/// dependency set may only grow, and only while holding the pool's
/// [`task_lock_guard`](crate::pool::ThreadPool::task_lock_guard) (except
/// for edges to the currently-running task, which cannot complete
/// concurrently with its own function body).
#[must_use]
#[derive(Clone)]
pub struct Task {
    inner: Arc<TaskInner>,
}

impl Task {
    /// Empty task: no function, no dependencies, flow [`Flow::Continue`].
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TaskInner {
                id: next_task_id(),
                body: Mutex::new(TaskBody {
                    state: State::Unsubmitted,
                    flow: Flow::Continue,
                    func: None,
                    abort_guard: None,
                    predecessors: IndexMap::default(),
                    successors: IndexMap::default(),
                    pending: 0,
                }),
            }),
        }
    }

    /// Task with its function already set. The function's return value is
    /// discarded; use [`set_function_with_result`](Self::set_function_with_result)
    /// to observe it.
    pub fn with_fn<F, R>(f: F) -> Self
    where
        F: FnOnce() -> R + Send + 'static,
    {
        let task = Self::new();
        task.set_function(f)
            .expect("Task::with_fn: fresh task is unsubmitted");
        task
    }

    /// Stable identifier of this task.
    #[must_use]
    pub fn id(&self) -> TaskId {
        self.inner.id
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> State {
        self.body().state
    }

    /// Replaces the task's function, discarding its return value.
    ///
    /// # Errors
    /// [`TaskBuildError::AlreadySubmitted`] unless the task is still
    /// [`State::Unsubmitted`].
    pub fn set_function<F, R>(&self, f: F) -> Result<(), TaskBuildError>
    where
        F: FnOnce() -> R + Send + 'static,
    {
        let mut body = self.body();
        if body.state != State::Unsubmitted {
            return Err(TaskBuildError::AlreadySubmitted);
        }
        // A previously installed result channel resolves to Aborted when
        // its guard drops below.
        body.func = Some(Box::new(move || {
            let _ = f();
        }));
        body.abort_guard = None;
        Ok(())
    }

    /// Replaces the task's function and installs a result channel.
    ///
    /// The returned handle's [`get`](ResultHandle::get) blocks until the
    /// task completes and yields the function's return value, or a
    /// [`TaskError`] if the task was aborted or its function panicked.
    ///
    /// # Errors
    /// [`TaskBuildError::AlreadySubmitted`] unless the task is still
    /// [`State::Unsubmitted`].
    pub fn set_function_with_result<F, R>(&self, f: F) -> Result<ResultHandle<R>, TaskBuildError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let mut body = self.body();
        if body.state != State::Unsubmitted {
            return Err(TaskBuildError::AlreadySubmitted);
        }
        let slot = Arc::new(Slot::new());
        let producer = Arc::clone(&slot);
        body.func = Some(Box::new(move || {
            // Capture the panic here so the channel observes it; the task
            // itself still counts as completed.
            let outcome = catch_unwind(AssertUnwindSafe(f)).map_err(TaskError::from_panic);
            producer.fill(outcome);
        }));
        body.abort_guard = Some(Box::new(SlotGuard::new(Arc::clone(&slot))));
        Ok(ResultHandle::new(slot))
    }

    /// Attaches `other` as a predecessor of `self`.
    ///
    /// Both directions of the edge are recorded; attaching the same
    /// predecessor twice is a no-op. Must not create a cycle (the pool
    /// does not verify acyclicity). If `self` is already submitted, the
    /// caller must hold the pool's task lock, per the contract above.
    pub fn add_dependency(&self, other: &Task) {
        assert_ne!(
            self.inner.id, other.inner.id,
            "Task::add_dependency: task depends on itself"
        );
        let other_state = other.body().state;
        {
            let mut body = self.body();
            if body.predecessors.contains_key(&other.inner.id) {
                return;
            }
            body.predecessors.insert(other.inner.id, other.clone());
            if !other_state.is_terminal() {
                body.pending += 1;
            }
        }
        other
            .body()
            .successors
            .insert(self.inner.id, Arc::downgrade(&self.inner));
    }

    /// Sets the flow directive observed when this task's function returns.
    ///
    /// Intended to be called from inside the function through a cloned
    /// handle; calling it on a task that never runs has no effect.
    pub fn set_flow(&self, flow: Flow) {
        self.body().flow = flow;
    }

    pub(crate) fn body(&self) -> MutexGuard<'_, TaskBody> {
        self.inner.body.lock().expect("Task::body: poisoned")
    }

    pub(crate) fn from_inner(inner: Arc<TaskInner>) -> Self {
        Self { inner }
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut out = f.debug_struct("Task");
        out.field("id", &self.inner.id);
        // Never block: Debug may run while accounting holds the body.
        match self.inner.body.try_lock() {
            Ok(body) => out
                .field("state", &body.state)
                .field("pending", &body.pending)
                .finish(),
            Err(_) => out.finish_non_exhaustive(),
        }
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;

    #[test]
    fn fresh_task_defaults() {
        let t = Task::new();
        assert_eq!(t.state(), State::Unsubmitted);
        let body = t.body();
        assert!(body.func.is_none());
        assert_eq!(body.flow, Flow::Continue);
        assert_eq!(body.pending, 0);
    }

    #[test]
    fn ids_are_unique() {
        let a = Task::new();
        let b = Task::new();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn dependency_recorded_both_ways() {
        let a = Task::new();
        let b = Task::new();
        b.add_dependency(&a);
        assert_eq!(b.body().pending, 1);
        assert!(b.body().predecessors.contains_key(&a.id()));
        assert!(a.body().successors.contains_key(&b.id()));
    }

    #[test]
    fn duplicate_dependency_ignored() {
        let a = Task::new();
        let b = Task::new();
        b.add_dependency(&a);
        b.add_dependency(&a);
        assert_eq!(b.body().pending, 1);
        assert_eq!(b.body().predecessors.len(), 1);
    }

    #[test]
    fn clones_share_state() {
        let t = Task::new();
        let u = t.clone();
        u.set_flow(Flow::StopAll);
        assert_eq!(t.body().flow, Flow::StopAll);
    }
}
