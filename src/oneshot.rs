use crate::sync::{Condvar, Mutex};
use std::any::Any;
use std::sync::Arc;
use thiserror::Error;

/// Failure surfaced by [`ResultHandle::get`] when a task produced no value.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TaskError {
    /// The task was aborted before it could run, either by an ancestor's
    /// stop directive, a pool-wide stop, or pool teardown.
    #[error("task was aborted before it could run")]
    Aborted,
    /// The task's function panicked. The task still counts as completed
    /// for dependency accounting; the panic surfaces only here.
    #[error("task panicked: {message}")]
    Panicked {
        /// Panic payload rendered to text, when it carried one.
        message: String,
    },
}

impl TaskError {
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(msg) = payload.downcast_ref::<&str>() {
            (*msg).to_owned()
        } else if let Some(msg) = payload.downcast_ref::<String>() {
            msg.clone()
        } else {
            "opaque panic payload".to_owned()
        };
        Self::Panicked { message }
    }
}

/// One-shot slot carrying a task's outcome to at most one waiter.
///
/// Single producer (the executing worker, or abort accounting), single
/// consumer (the external [`ResultHandle`]). The first write wins; the
/// producer never blocks.
pub(crate) struct Slot<T> {
    state: Mutex<SlotState<T>>,
    filled: Condvar,
}

enum SlotState<T> {
    Empty,
    Value(Result<T, TaskError>),
    Taken,
}

impl<T> Slot<T> {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(SlotState::Empty),
            filled: Condvar::new(),
        }
    }

    /// Stores the outcome unless one is already present.
    pub(crate) fn fill(&self, value: Result<T, TaskError>) {
        let mut state = self.state.lock().expect("Slot::fill: poisoned");
        if matches!(*state, SlotState::Empty) {
            *state = SlotState::Value(value);
            self.filled.notify_all();
        }
    }

    fn take_blocking(&self) -> Result<T, TaskError> {
        let mut state = self.state.lock().expect("Slot::take_blocking: poisoned");
        while matches!(*state, SlotState::Empty) {
            state = self
                .filled
                .wait(state)
                .expect("Slot::take_blocking: poisoned");
        }
        match std::mem::replace(&mut *state, SlotState::Taken) {
            SlotState::Value(value) => value,
            _ => unreachable!("Slot::take_blocking: taken twice"),
        }
    }

    fn is_filled(&self) -> bool {
        let state = self.state.lock().expect("Slot::is_filled: poisoned");
        matches!(*state, SlotState::Value(_))
    }
}

/// Producer-side guard held by the pool for a task with a result channel.
///
/// Dropping it resolves the slot to [`TaskError::Aborted`] unless a value
/// arrived first, so a waiter can never hang on a task that was aborted or
/// discarded at pool teardown.
pub(crate) struct SlotGuard<T>(Arc<Slot<T>>);

impl<T> SlotGuard<T> {
    pub(crate) fn new(slot: Arc<Slot<T>>) -> Self {
        Self(slot)
    }
}

impl<T> Drop for SlotGuard<T> {
    fn drop(&mut self) {
        self.0.fill(Err(TaskError::Aborted));
    }
}

/// Waiting side of a task's result channel.
///
/// Obtained from [`Task::set_function_with_result`](crate::task::Task::set_function_with_result)
/// or [`submit_with_result`](crate::pool::ThreadPool::submit_with_result).
/// [`get`](Self::get) blocks until the task completes and yields the
/// function's return value, or a [`TaskError`] if the task was aborted or
/// panicked.
#[must_use]
pub struct ResultHandle<T> {
    slot: Arc<Slot<T>>,
}

impl<T> ResultHandle<T> {
    pub(crate) fn new(slot: Arc<Slot<T>>) -> Self {
        Self { slot }
    }

    /// Blocks until the task's outcome is available and returns it.
    pub fn get(self) -> Result<T, TaskError> {
        self.slot.take_blocking()
    }

    /// Whether an outcome is already available, without blocking.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.slot.is_filled()
    }
}

impl<T> std::fmt::Debug for ResultHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultHandle")
            .field("ready", &self.is_ready())
            .finish()
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;

    #[test]
    fn delivers_value() {
        let slot = Arc::new(Slot::new());
        let handle = ResultHandle::new(Arc::clone(&slot));
        assert!(!handle.is_ready());
        slot.fill(Ok(7));
        assert!(handle.is_ready());
        assert_eq!(handle.get(), Ok(7));
    }

    #[test]
    fn first_write_wins() {
        let slot = Arc::new(Slot::new());
        let handle = ResultHandle::<i32>::new(Arc::clone(&slot));
        slot.fill(Ok(1));
        slot.fill(Ok(2));
        assert_eq!(handle.get(), Ok(1));
    }

    #[test]
    fn guard_drop_aborts_unfilled() {
        let slot = Arc::new(Slot::<i32>::new());
        let handle = ResultHandle::new(Arc::clone(&slot));
        drop(SlotGuard::new(slot));
        assert_eq!(handle.get(), Err(TaskError::Aborted));
    }

    #[test]
    fn guard_drop_keeps_value() {
        let slot = Arc::new(Slot::new());
        let handle = ResultHandle::new(Arc::clone(&slot));
        let guard = SlotGuard::new(Arc::clone(&slot));
        slot.fill(Ok(3));
        drop(guard);
        assert_eq!(handle.get(), Ok(3));
    }

    #[test]
    fn blocking_get_wakes() {
        let slot = Arc::new(Slot::new());
        let handle = ResultHandle::new(Arc::clone(&slot));
        let producer = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(10));
            slot.fill(Ok(42));
        });
        assert_eq!(handle.get(), Ok(42));
        producer.join().expect("producer panicked");
    }

    #[test]
    fn panic_payload_rendered() {
        let err = TaskError::from_panic(Box::new("boom"));
        assert_eq!(
            err,
            TaskError::Panicked {
                message: "boom".to_owned()
            }
        );
    }
}
