//! Erased nullary tasks for the worker pool.

use std::panic::{catch_unwind, AssertUnwindSafe};

/// A unit of work: an erased callable plus its captured arguments.
///
/// ```
/// use grove_exec::Job;
///
/// let job = Job::with_arg(|n: u32| assert_eq!(n, 42), 42);
/// job.run();
/// ```
pub struct Job {
    task: Box<dyn FnOnce() + Send + 'static>,
}

impl Job {
    /// Wraps a nullary callable.
    pub fn new(task: impl FnOnce() + Send + 'static) -> Self {
        Self {
            task: Box::new(task),
        }
    }

    /// Binds one argument into a nullary task.
    pub fn with_arg<A: Send + 'static>(task: impl FnOnce(A) + Send + 'static, arg: A) -> Self {
        Self::new(move || task(arg))
    }

    /// Runs the task to completion.
    ///
    /// A panicking task completes with failure: the panic is trapped and
    /// reported, and the calling worker keeps running. Tasks that want to
    /// observe their own failures trap them before panicking.
    pub fn run(self) {
        if let Err(payload) = catch_unwind(AssertUnwindSafe(self.task)) {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "opaque panic payload".to_string());
            tracing::error!(%message, "job panicked");
        }
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job").finish_non_exhaustive()
    }
}
