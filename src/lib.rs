//! Dependency-aware thread pool running a dynamic DAG of tasks on a fixed
//! set of OS worker threads.
//!
//! This crate provides a pool that accepts units of deferred work (*tasks*)
//! from any thread, including from inside an already-running task. It:
//! - Runs each submitted task exactly once, after all of its declared
//!   predecessors have completed.
//! - Runs independent tasks concurrently, up to the configured worker count.
//! - Lets a running task cancel its transitive successors
//!   ([`Flow::StopDependents`](task::Flow::StopDependents)) or drain the
//!   whole pool ([`Flow::StopAll`](task::Flow::StopAll)); the pool recovers
//!   and accepts new work once drained.
//! - Exposes liveness queries (`pending`, `empty`, `idle`, `busy`,
//!   `stopping`) and a barrier ([`ThreadPool::wait`](pool::ThreadPool::wait))
//!   that blocks until nothing remains to do.
//! - Optionally delivers a task's return value through a one-shot
//!   [`ResultHandle`](oneshot::ResultHandle).
//!
//! Key modules:
//! - `config`: pool construction parameters (`PoolConfig`).
//! - `task`: the `Task` handle, its dependency edges, state and flow
//!   directive.
//! - `oneshot`: the one-shot result channel connecting a task to an
//!   external waiter.
//! - `pool`: the pool itself: submission, the worker set, completion
//!   accounting, queries, stop and the barrier.
//! - `types`: common identifier and collection aliases.
//!
//! Quick start:
//! 1. Build a pool with `ThreadPool::new(workers)`, or default-construct
//!    one and call `late_init(workers)` once.
//! 2. Create `Task`s, wire them with `Task::add_dependency`, and `submit`
//!    the sink tasks; unsubmitted predecessors are registered
//!    transitively.
//! 3. Call `wait()` to block until the whole graph has run.
//!
//! The caller is responsible for keeping the dependency graph acyclic; the
//! pool does not verify this. A predecessor's function body happens-before
//! every successor's function body. No ordering is guaranteed between
//! independent tasks.

/// Pool construction parameters.
///
/// Exposes `PoolConfig`, which fixes the worker count and the worker
/// thread naming for a concrete pool instantiation.
pub mod config;
/// One-shot delivery of a task's return value to an external waiter.
///
/// Defines `ResultHandle`, whose `get()` blocks until the task completes,
/// and `TaskError`, the failure it surfaces when the task was aborted or
/// panicked instead.
pub mod oneshot;
/// The dependency-aware thread pool.
///
/// Contains `ThreadPool` and its cloneable `PoolHandle`: submission with
/// transitive registration of predecessors, the worker loop, completion
/// accounting with flow propagation, liveness queries, `stop` and the
/// `wait` barrier.
pub mod pool;
mod sync;
/// Task definitions: the `Task` handle, dependency attachment, the task
/// state machine and the `Flow` directive a running task may emit.
pub mod task;
/// Core types used across the crate (task identifiers, collection aliases).
pub mod types;
