use crate::{
    pool::{Coordinator, PoolInner},
    task::{Flow, State, Task},
};
use std::mem;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Worker loop: wait for readiness, pop one task, execute it outside the
/// coordinator mutex, then perform completion accounting under it.
pub(super) fn run(inner: &PoolInner) {
    tracing::debug!("worker started");
    loop {
        let task = {
            let mut coordinator = inner.lock();
            'acquire: loop {
                if coordinator.shutdown {
                    tracing::debug!("worker stopped");
                    return;
                }
                while let Some(task) = coordinator.ready.pop_front() {
                    let mut body = task.body();
                    if body.state != State::Ready {
                        // Stale queue entry left behind by an abort.
                        continue;
                    }
                    body.state = State::Running;
                    drop(body);
                    coordinator.running += 1;
                    break 'acquire task;
                }
                coordinator = inner
                    .work_available
                    .wait(coordinator)
                    .expect("worker::run: coordinator mutex poisoned");
            }
        };
        execute(inner, task);
    }
}

/// Runs one task function and accounts for its completion.
fn execute(inner: &PoolInner, task: Task) {
    // The submission path rejects function-less tasks; a task registered
    // indirectly through its successor edge may still lack one and is
    // treated as a no-op. The body lock must not be held across the call:
    // the function may touch its own task through a cloned handle.
    let func = task.body().func.take();
    if let Some(func) = func {
        if let Err(payload) = catch_unwind(AssertUnwindSafe(func)) {
            // Tasks with a result channel capture their panic inside the
            // function wrapper, so reaching this arm means nobody is
            // listening; the task still counts as completed.
            let message = crate::oneshot::TaskError::from_panic(payload);
            tracing::error!(task_id = task.id().get(), %message, "task panicked");
        }
    }
    let flow = mem::replace(&mut task.body().flow, Flow::Continue);
    let mut coordinator = inner.lock();
    inner.finish(&mut coordinator, &task, flow);
    inner.settle(&mut coordinator);
}

impl PoolInner {
    /// Completion accounting for `task`, running under the coordinator
    /// mutex: records the terminal state, applies the flow directive to
    /// the successor set and removes the task from the registry.
    pub(super) fn finish(&self, coordinator: &mut Coordinator, task: &Task, flow: Flow) {
        let successors = {
            let mut body = task.body();
            body.state = State::Completed;
            // A filled result channel makes this guard a no-op.
            let guard = body.abort_guard.take();
            let successors: Vec<_> = body.successors.values().cloned().collect();
            body.successors.clear();
            body.predecessors.clear();
            drop(body);
            drop(guard);
            successors
        };
        coordinator.registry.swap_remove(&task.id());
        coordinator.running -= 1;
        tracing::trace!(task_id = task.id().get(), ?flow, "task completed");
        match flow {
            Flow::Continue => {
                for weak in successors {
                    let Some(successor) = weak.upgrade().map(Task::from_inner) else {
                        continue;
                    };
                    self.release_successor(coordinator, &successor);
                }
            }
            Flow::StopDependents => {
                for weak in successors {
                    let Some(successor) = weak.upgrade().map(Task::from_inner) else {
                        continue;
                    };
                    self.abort_cone(coordinator, &successor);
                }
            }
            Flow::StopAll => self.initiate_stop(coordinator),
        }
    }

    /// Marks one predecessor of `successor` as resolved; a task whose last
    /// predecessor resolves becomes ready. A successor that was attached
    /// to an already-submitted predecessor but never explicitly submitted
    /// is registered here, when it becomes runnable.
    fn release_successor(&self, coordinator: &mut Coordinator, successor: &Task) {
        let mut body = successor.body();
        match body.state {
            State::Unsubmitted | State::Waiting => {
                body.pending = body
                    .pending
                    .checked_sub(1)
                    .expect("PoolInner::release_successor: pending underflow");
                if body.pending > 0 {
                    return;
                }
                if coordinator.stopping {
                    drop(body);
                    self.abort_cone(coordinator, successor);
                    return;
                }
                body.state = State::Ready;
                drop(body);
                coordinator.registry.insert(successor.id(), successor.clone());
                coordinator.ready.push_back(successor.clone());
                self.work_available.notify_one();
                tracing::trace!(task_id = successor.id().get(), "task ready");
            }
            // Already cancelled, or resolved through an earlier edge.
            State::Ready | State::Running | State::Completed | State::Aborted => {}
        }
    }

    /// Aborts `task` and, transitively, its successor cone. Tasks already
    /// running (or finished) are left alone; their own flow handling
    /// decides the fate of anything below them.
    pub(super) fn abort_cone(&self, coordinator: &mut Coordinator, task: &Task) {
        let successors = {
            let mut body = task.body();
            match body.state {
                State::Unsubmitted | State::Waiting | State::Ready => {}
                State::Running | State::Completed | State::Aborted => return,
            }
            body.state = State::Aborted;
            body.func = None;
            let guard = body.abort_guard.take();
            let successors: Vec<_> = body.successors.values().cloned().collect();
            body.successors.clear();
            body.predecessors.clear();
            drop(body);
            // Resolves the result channel to Aborted.
            drop(guard);
            successors
        };
        coordinator.registry.swap_remove(&task.id());
        tracing::trace!(task_id = task.id().get(), "task aborted");
        for weak in successors {
            let Some(successor) = weak.upgrade().map(Task::from_inner) else {
                continue;
            };
            self.abort_cone(coordinator, &successor);
        }
    }

    /// Aborts a submission that arrived while the pool was draining:
    /// unsubmitted predecessors first, then the task's own cone.
    pub(super) fn abort_submission(&self, coordinator: &mut Coordinator, task: &Task) {
        let predecessors: Vec<Task> = task.body().predecessors.values().cloned().collect();
        for predecessor in &predecessors {
            if predecessor.body().state == State::Unsubmitted {
                self.abort_submission(coordinator, predecessor);
            }
        }
        self.abort_cone(coordinator, task);
    }

    /// Pool-wide stop: raise the stopping flag and abort everything that
    /// is not currently running. Running tasks finish normally; the flag
    /// clears in [`settle`](Self::settle) once the pool drains.
    pub(super) fn initiate_stop(&self, coordinator: &mut Coordinator) {
        coordinator.stopping = true;
        tracing::debug!("pool stop requested");
        let owned: Vec<Task> = coordinator.registry.values().cloned().collect();
        for task in &owned {
            self.abort_cone(coordinator, task);
        }
        coordinator.ready.clear();
    }

    /// Opens the barrier and clears the transient stopping flag once the
    /// pool owns nothing and no worker is executing.
    pub(super) fn settle(&self, coordinator: &mut Coordinator) {
        if coordinator.registry.is_empty() && coordinator.running == 0 {
            if coordinator.stopping {
                coordinator.stopping = false;
                tracing::debug!("pool stop drained");
            }
            self.all_done.notify_all();
        }
    }
}
