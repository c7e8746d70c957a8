use core::num::NonZeroU64;
use indexmap::IndexMap as _IndexMap;
use rustc_hash::FxBuildHasher;

/// Unique identifier of a task.
///
/// Allocated from a process-global counter when the task is created and
/// stable for the task's whole lifetime; used to key the pool's registry
/// and the per-task edge sets.
pub type TaskId = NonZeroU64;

/// `IndexMap` type with fast hasher.
pub(crate) type IndexMap<K, V> = _IndexMap<K, V, FxBuildHasher>;
