/// Configuration for instantiating a [`ThreadPool`](crate::pool::ThreadPool).
///
/// Fixes the worker count and how worker threads are named. The worker
/// count is set once, either here or via
/// [`ThreadPool::late_init`](crate::pool::ThreadPool::late_init), and never
/// changes afterwards.
#[must_use]
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of worker threads to spawn. Zero leaves the pool
    /// uninitialized until `late_init` is called.
    pub workers: usize,
    /// Prefix for worker thread names (`"<prefix>-worker-<index>"`).
    pub thread_name_prefix: String,
}

impl PoolConfig {
    /// Configuration with the given worker count and default thread naming.
    pub fn new(workers: usize) -> Self {
        Self {
            workers,
            thread_name_prefix: "dagpool".to_owned(),
        }
    }

    /// Replaces the worker thread name prefix.
    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::new(0)
    }
}
