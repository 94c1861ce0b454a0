//! Asynchronous execution of completions.
//!
//! The journal never runs a caller's completion on its writer thread. It
//! hands each one to a [`CompletionDispatcher`], in sequence order, and
//! moves on. [`Finisher`] is the stock dispatcher: one named worker thread
//! draining a FIFO queue.

use crate::completion::Completion;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, warn};

/// Runs completions asynchronously, each exactly once.
pub trait CompletionDispatcher: Send + Sync {
    /// Queues a completion for execution on another thread.
    fn enqueue(&self, completion: Completion);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Phase {
    /// Never started; tasks wait for `start`.
    #[default]
    Idle,
    Running,
    /// Stopped after running; tasks run inline.
    Stopped,
}

#[derive(Default)]
struct Queue {
    tasks: VecDeque<Completion>,
    phase: Phase,
    busy: bool,
}

#[derive(Default)]
struct FinisherInner {
    queue: Mutex<Queue>,
    work_ready: Condvar,
    idle: Condvar,
}

/// A single-threaded FIFO completion dispatcher.
///
/// Tasks enqueued before [`Finisher::start`] wait in the queue. After
/// [`Finisher::stop`] the queue is drained and the worker joined; tasks
/// enqueued on a stopped finisher run inline on the caller's thread so
/// that every task still runs exactly once.
///
/// # Example
///
/// ```rust
/// use ringjournal_core::{Completion, CompletionDispatcher, Finisher};
///
/// let finisher = Finisher::new("doc");
/// finisher.start().unwrap();
/// let (done, waiter) = Completion::channel();
/// finisher.enqueue(done);
/// waiter.wait();
/// finisher.stop();
/// ```
pub struct Finisher {
    name: String,
    inner: Arc<FinisherInner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Finisher {
    /// Creates a stopped finisher; the worker thread is named `{name}-finisher`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Arc::default(),
            worker: Mutex::new(None),
        }
    }

    /// Starts the worker thread. Calling it on a running finisher is a no-op.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the worker thread cannot be spawned; the
    /// finisher stays idle and queued tasks keep waiting.
    pub fn start(&self) -> io::Result<()> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Ok(());
        }
        self.inner.queue.lock().phase = Phase::Running;

        let inner = Arc::clone(&self.inner);
        let spawned = std::thread::Builder::new()
            .name(format!("{}-finisher", self.name))
            .spawn(move || worker_loop(&inner));
        match spawned {
            Ok(handle) => *worker = Some(handle),
            Err(err) => {
                self.inner.queue.lock().phase = Phase::Idle;
                warn!(name = %self.name, error = %err, "finisher thread failed to start");
                return Err(err);
            }
        }
        debug!(name = %self.name, "finisher started");
        Ok(())
    }

    /// Drains queued tasks, then stops and joins the worker.
    pub fn stop(&self) {
        let handle = self.worker.lock().take();
        let Some(handle) = handle else {
            return;
        };
        {
            let mut queue = self.inner.queue.lock();
            queue.phase = Phase::Stopped;
            self.inner.work_ready.notify_all();
        }
        if handle.join().is_err() {
            warn!(name = %self.name, "finisher thread panicked");
        }
        debug!(name = %self.name, "finisher stopped");
    }

    /// Blocks until every queued task has run.
    pub fn wait_for_empty(&self) {
        let mut queue = self.inner.queue.lock();
        while queue.phase == Phase::Running && (!queue.tasks.is_empty() || queue.busy) {
            self.inner.idle.wait(&mut queue);
        }
    }

    /// Number of tasks waiting to run.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.inner.queue.lock().tasks.len()
    }
}

impl CompletionDispatcher for Finisher {
    fn enqueue(&self, completion: Completion) {
        let mut queue = self.inner.queue.lock();
        match queue.phase {
            Phase::Idle => queue.tasks.push_back(completion),
            Phase::Running => {
                queue.tasks.push_back(completion);
                self.inner.work_ready.notify_one();
            }
            Phase::Stopped => {
                drop(queue);
                debug!(name = %self.name, "finisher stopped, running completion inline");
                completion.complete();
            }
        }
    }
}

impl Drop for Finisher {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Finisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Finisher")
            .field("name", &self.name)
            .field("queued", &self.queued())
            .finish_non_exhaustive()
    }
}

fn worker_loop(inner: &FinisherInner) {
    loop {
        let task = {
            let mut queue = inner.queue.lock();
            loop {
                if let Some(task) = queue.tasks.pop_front() {
                    queue.busy = true;
                    break Some(task);
                }
                if queue.phase != Phase::Running {
                    break None;
                }
                inner.idle.notify_all();
                inner.work_ready.wait(&mut queue);
            }
        };

        let Some(task) = task else {
            inner.idle.notify_all();
            return;
        };
        task.complete();

        let mut queue = inner.queue.lock();
        queue.busy = false;
        if queue.tasks.is_empty() {
            inner.idle.notify_all();
        }
    }
}
