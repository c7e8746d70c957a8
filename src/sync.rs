#[cfg(feature = "loom")]
mod imp {
    use loom::thread;
    pub(crate) use loom::sync::{Condvar, Mutex, MutexGuard};
    use std::io;

    pub(crate) type JoinHandle = thread::JoinHandle<()>;

    pub(crate) fn spawn_worker(
        _name: String,
        f: impl FnOnce() + Send + 'static,
    ) -> io::Result<JoinHandle> {
        // Loom threads cannot be named; the model does not surface names
        // anyway.
        Ok(thread::spawn(f))
    }
}

#[cfg(not(feature = "loom"))]
mod imp {
    use std::io;
    pub(crate) use std::sync::{Condvar, Mutex, MutexGuard};
    use std::thread;

    pub(crate) type JoinHandle = thread::JoinHandle<()>;

    pub(crate) fn spawn_worker(
        name: String,
        f: impl FnOnce() + Send + 'static,
    ) -> io::Result<JoinHandle> {
        thread::Builder::new().name(name).spawn(f)
    }
}

pub(crate) use imp::*;
