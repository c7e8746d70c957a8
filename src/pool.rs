mod worker;

use crate::{
    config::PoolConfig,
    oneshot::ResultHandle,
    sync::{spawn_worker, Condvar, JoinHandle, Mutex, MutexGuard},
    task::{State, Task},
    types::{IndexMap, TaskId},
};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Error kind for pool operation failures.
///
/// These are contract violations by the caller; the pool itself never
/// retries or recovers an operation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum PoolError {
    /// `late_init` was called on a pool whose workers already exist.
    #[error("worker threads are already initialized")]
    AlreadyInitialized,
    /// The requested worker count was zero.
    #[error("worker count must be non-zero")]
    ZeroWorkers,
    /// The submitted task has no function installed.
    #[error("cannot submit a task without a function")]
    EmptyFunction,
}

/// State shared between the pool handle and its workers, all of it behind
/// the single coordinator mutex. Task functions execute outside this
/// mutex; everything else (registration, readiness, flow propagation, the
/// stop flags and the liveness counters) is serialized through it.
#[derive(Debug)]
pub(crate) struct Coordinator {
    /// Every task the pool currently owns: waiting, ready or running.
    pub(crate) registry: IndexMap<TaskId, Task>,
    /// Tasks with no unresolved predecessors, awaiting a worker. Entries
    /// may be stale after an abort; workers skip anything not `Ready`.
    pub(crate) ready: VecDeque<Task>,
    /// Number of workers currently executing a task function.
    pub(crate) running: usize,
    /// Transient pool-wide abort; cleared once the pool drains.
    pub(crate) stopping: bool,
    /// Permanent teardown flag set by the destructor.
    pub(crate) shutdown: bool,
}

pub(crate) struct PoolInner {
    pub(crate) coordinator: Mutex<Coordinator>,
    /// Signals workers that the ready queue may be non-empty, or that the
    /// pool is shutting down.
    pub(crate) work_available: Condvar,
    /// Signals barrier callers that the pool may have drained.
    pub(crate) all_done: Condvar,
}

impl PoolInner {
    fn new() -> Self {
        Self {
            coordinator: Mutex::new(Coordinator {
                registry: IndexMap::default(),
                ready: VecDeque::new(),
                running: 0,
                stopping: false,
                shutdown: false,
            }),
            work_available: Condvar::new(),
            all_done: Condvar::new(),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Coordinator> {
        self.coordinator
            .lock()
            .expect("PoolInner::lock: coordinator mutex poisoned")
    }

    /// Registers `task` and, depth-first, every unsubmitted predecessor
    /// below it, so callers need only submit sink tasks. Tasks whose
    /// pending count is already zero go straight to the ready queue.
    fn register(&self, coordinator: &mut Coordinator, task: &Task) {
        if task.body().state != State::Unsubmitted {
            return;
        }
        if coordinator.stopping || coordinator.shutdown {
            // The pool is draining towards the barrier (or being torn
            // down); registering new work now would stall it. The subtree
            // is cancelled instead.
            self.abort_submission(coordinator, task);
            return;
        }
        let predecessors: Vec<Task> = task.body().predecessors.values().cloned().collect();
        for predecessor in &predecessors {
            self.register(coordinator, predecessor);
        }
        let mut body = task.body();
        if body.state != State::Unsubmitted {
            // A predecessor's registration was cancelled and aborted us.
            return;
        }
        if body.pending == 0 {
            body.state = State::Ready;
            drop(body);
            coordinator.ready.push_back(task.clone());
            self.work_available.notify_one();
        } else {
            body.state = State::Waiting;
            drop(body);
        }
        coordinator.registry.insert(task.id(), task.clone());
        tracing::trace!(task_id = task.id().get(), "task registered");
    }

    fn submit(&self, task: &Task) -> Result<(), PoolError> {
        {
            let body = task.body();
            if body.state != State::Unsubmitted {
                // Already owned by the registry (or finished); nothing to do.
                return Ok(());
            }
            if body.func.is_none() {
                return Err(PoolError::EmptyFunction);
            }
        }
        let mut coordinator = self.lock();
        self.register(&mut coordinator, task);
        self.settle(&mut coordinator);
        Ok(())
    }

    fn wait(&self) {
        let mut coordinator = self.lock();
        while !(coordinator.registry.is_empty() && coordinator.running == 0) {
            coordinator = self
                .all_done
                .wait(coordinator)
                .expect("PoolInner::wait: coordinator mutex poisoned");
        }
    }

    fn stop(&self) {
        let mut coordinator = self.lock();
        self.initiate_stop(&mut coordinator);
        self.settle(&mut coordinator);
    }
}

/// Dependency-aware thread pool with a fixed set of worker threads.
///
/// Construct with [`new`](Self::new) or [`with_config`](Self::with_config),
/// or default-construct and call [`late_init`](Self::late_init) exactly
/// once. Workers are joined when the pool is dropped; tasks still owned by
/// the pool at that point are discarded, resolving their result channels
/// to [`TaskError::Aborted`](crate::oneshot::TaskError::Aborted).
#[must_use]
pub struct ThreadPool {
    inner: Arc<PoolInner>,
    config: PoolConfig,
    workers: Vec<JoinHandle>,
}

impl ThreadPool {
    /// Pool with `workers` worker threads and default configuration.
    ///
    /// # Panics
    /// If `workers` is zero.
    pub fn new(workers: usize) -> Self {
        assert!(workers > 0, "ThreadPool::new: worker count must be non-zero");
        Self::with_config(PoolConfig::new(workers))
    }

    /// Pool built from an explicit configuration. A zero worker count
    /// leaves the pool uninitialized, awaiting [`late_init`](Self::late_init).
    pub fn with_config(config: PoolConfig) -> Self {
        let mut pool = Self {
            inner: Arc::new(PoolInner::new()),
            config,
            workers: Vec::new(),
        };
        if pool.config.workers > 0 {
            pool.spawn_workers(pool.config.workers);
        }
        pool
    }

    /// Deferred initialization of a default-constructed pool.
    ///
    /// # Errors
    /// [`PoolError::AlreadyInitialized`] if workers already exist (this
    /// call is permitted at most once), [`PoolError::ZeroWorkers`] if
    /// `workers` is zero.
    pub fn late_init(&mut self, workers: usize) -> Result<(), PoolError> {
        if !self.workers.is_empty() {
            return Err(PoolError::AlreadyInitialized);
        }
        if workers == 0 {
            return Err(PoolError::ZeroWorkers);
        }
        self.config.workers = workers;
        self.spawn_workers(workers);
        Ok(())
    }

    fn spawn_workers(&mut self, workers: usize) {
        for index in 0..workers {
            let inner = Arc::clone(&self.inner);
            let name = format!("{}-worker-{index}", self.config.thread_name_prefix);
            let handle =
                spawn_worker(name, move || worker::run(&inner)).expect("ThreadPool: spawn worker");
            self.workers.push(handle);
        }
    }

    /// Cloneable handle for submitting and querying from other threads,
    /// including from inside running tasks.
    pub fn handle(&self) -> PoolHandle {
        PoolHandle {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Submits a task; unsubmitted predecessors are registered with it.
    /// Submitting a task that is already registered is a no-op.
    ///
    /// # Errors
    /// [`PoolError::EmptyFunction`] if no function is installed.
    pub fn submit(&self, task: &Task) -> Result<(), PoolError> {
        self.inner.submit(task)
    }

    /// Wraps a closure into a fresh task and submits it.
    ///
    /// # Errors
    /// See [`submit`](Self::submit).
    pub fn submit_fn<F, R>(&self, f: F) -> Result<(), PoolError>
    where
        F: FnOnce() -> R + Send + 'static,
    {
        self.submit(&Task::with_fn(f))
    }

    /// Wraps a closure into a fresh task, submits it and returns the
    /// result channel for its return value.
    ///
    /// # Errors
    /// See [`submit`](Self::submit).
    pub fn submit_with_result<F, R>(&self, f: F) -> Result<ResultHandle<R>, PoolError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let task = Task::new();
        let handle = task
            .set_function_with_result(f)
            .expect("ThreadPool::submit_with_result: fresh task is unsubmitted");
        self.submit(&task)?;
        Ok(handle)
    }

    /// Blocks until the pool owns no tasks and no worker is executing.
    ///
    /// Must not be called from inside a task function: the calling worker
    /// could never finish, so the barrier would never open. This contract
    /// is not enforced.
    pub fn wait(&self) {
        self.inner.wait();
    }

    /// Aborts every task that is not currently running, lets running
    /// tasks finish, and clears the stopping flag once the pool drains.
    pub fn stop(&self) {
        self.inner.stop();
    }

    /// Number of tasks the pool owns (waiting, ready or running).
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.lock().registry.len()
    }

    /// Whether the pool owns no tasks.
    #[must_use]
    pub fn empty(&self) -> bool {
        self.inner.lock().registry.is_empty()
    }

    /// Whether no worker is currently executing a task.
    #[must_use]
    pub fn idle(&self) -> bool {
        self.inner.lock().running == 0
    }

    /// Whether at least one worker is currently executing a task.
    #[must_use]
    pub fn busy(&self) -> bool {
        !self.idle()
    }

    /// Whether a pool-wide stop is draining. Always false again once
    /// [`wait`](Self::wait) has returned.
    #[must_use]
    pub fn stopping(&self) -> bool {
        self.inner.lock().stopping
    }

    /// Scoped acquisition of the coordinator mutex.
    ///
    /// A running task holds this while mutating another submitted task's
    /// dependency set, making the mutation atomic with respect to
    /// completion accounting.
    pub fn task_lock_guard(&self) -> TaskLockGuard<'_> {
        TaskLockGuard {
            _guard: self.inner.lock(),
        }
    }
}

impl Default for ThreadPool {
    /// Uninitialized pool; call [`late_init`](Self::late_init) before use.
    fn default() -> Self {
        Self::with_config(PoolConfig::default())
    }
}

impl fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("ThreadPool");
        out.field("workers", &self.workers.len());
        match self.inner.coordinator.try_lock() {
            Ok(coordinator) => out
                .field("pending", &coordinator.registry.len())
                .field("running", &coordinator.running)
                .field("stopping", &coordinator.stopping)
                .finish(),
            Err(_) => out.finish_non_exhaustive(),
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        {
            let mut coordinator = self.inner.lock();
            coordinator.shutdown = true;
        }
        self.inner.work_available.notify_all();
        for handle in self.workers.drain(..) {
            // A worker that panicked outside a task function is already
            // accounted for; nothing useful to do with the payload here.
            let _ = handle.join();
        }
        // Discard whatever the registry still owns, resolving result
        // channels so no external waiter hangs.
        let mut coordinator = self.inner.lock();
        let leftovers: Vec<Task> = coordinator.registry.values().cloned().collect();
        for task in &leftovers {
            self.inner.abort_cone(&mut coordinator, task);
        }
        coordinator.ready.clear();
        coordinator.stopping = false;
        drop(coordinator);
        self.inner.all_done.notify_all();
    }
}

/// Cloneable submission/query handle to a [`ThreadPool`].
///
/// Task functions capture one of these to submit follow-up work, stop the
/// pool or take the task lock; the handle does not keep workers alive.
#[derive(Clone)]
pub struct PoolHandle {
    inner: Arc<PoolInner>,
}

impl PoolHandle {
    /// See [`ThreadPool::submit`].
    ///
    /// # Errors
    /// See [`ThreadPool::submit`].
    pub fn submit(&self, task: &Task) -> Result<(), PoolError> {
        self.inner.submit(task)
    }

    /// See [`ThreadPool::submit_fn`].
    ///
    /// # Errors
    /// See [`ThreadPool::submit`].
    pub fn submit_fn<F, R>(&self, f: F) -> Result<(), PoolError>
    where
        F: FnOnce() -> R + Send + 'static,
    {
        self.submit(&Task::with_fn(f))
    }

    /// See [`ThreadPool::submit_with_result`].
    ///
    /// # Errors
    /// See [`ThreadPool::submit`].
    pub fn submit_with_result<F, R>(&self, f: F) -> Result<ResultHandle<R>, PoolError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let task = Task::new();
        let handle = task
            .set_function_with_result(f)
            .expect("PoolHandle::submit_with_result: fresh task is unsubmitted");
        self.submit(&task)?;
        Ok(handle)
    }

    /// See [`ThreadPool::wait`]; the same re-entrance contract applies.
    pub fn wait(&self) {
        self.inner.wait();
    }

    /// See [`ThreadPool::stop`].
    pub fn stop(&self) {
        self.inner.stop();
    }

    /// See [`ThreadPool::pending`].
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.lock().registry.len()
    }

    /// See [`ThreadPool::empty`].
    #[must_use]
    pub fn empty(&self) -> bool {
        self.inner.lock().registry.is_empty()
    }

    /// See [`ThreadPool::idle`].
    #[must_use]
    pub fn idle(&self) -> bool {
        self.inner.lock().running == 0
    }

    /// See [`ThreadPool::busy`].
    #[must_use]
    pub fn busy(&self) -> bool {
        !self.idle()
    }

    /// See [`ThreadPool::stopping`].
    #[must_use]
    pub fn stopping(&self) -> bool {
        self.inner.lock().stopping
    }

    /// See [`ThreadPool::task_lock_guard`].
    pub fn task_lock_guard(&self) -> TaskLockGuard<'_> {
        TaskLockGuard {
            _guard: self.inner.lock(),
        }
    }
}

impl fmt::Debug for PoolHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("PoolHandle");
        match self.inner.coordinator.try_lock() {
            Ok(coordinator) => out
                .field("pending", &coordinator.registry.len())
                .field("running", &coordinator.running)
                .field("stopping", &coordinator.stopping)
                .finish(),
            Err(_) => out.finish_non_exhaustive(),
        }
    }
}

/// Scoped hold of the coordinator mutex, released on all exit paths.
///
/// While held, completion accounting cannot run, so dependency mutations
/// on submitted tasks are atomic with respect to readiness decisions.
#[must_use = "the task lock is released as soon as the guard is dropped"]
pub struct TaskLockGuard<'a> {
    _guard: MutexGuard<'a, Coordinator>,
}

impl fmt::Debug for TaskLockGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskLockGuard").finish_non_exhaustive()
    }
}
