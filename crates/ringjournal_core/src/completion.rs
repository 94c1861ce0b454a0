//! One-shot completions and the gather combinator.
//!
//! A [`Completion`] is handed to [`crate::Journal::submit_entry`] and fired
//! exactly once, by the dispatcher, after the entry is durable. Callers that
//! want to block use [`Completion::channel`]; callers that want one signal
//! for many entries use [`GatherBuilder`].
//!
//! ```rust
//! use ringjournal_core::{Completion, GatherBuilder};
//!
//! let (done, waiter) = Completion::channel();
//! let mut gather = GatherBuilder::new(done);
//! let subs: Vec<_> = (0..3).map(|_| gather.new_sub()).collect();
//! gather.activate();
//!
//! for sub in subs {
//!     sub.complete();
//! }
//! waiter.wait();
//! ```

use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// A unit of work that runs once an entry is durable.
pub struct Completion {
    callback: Box<dyn FnOnce() + Send + 'static>,
}

impl Completion {
    /// Wraps a closure.
    pub fn new(callback: impl FnOnce() + Send + 'static) -> Self {
        Self {
            callback: Box::new(callback),
        }
    }

    /// A completion that does nothing.
    #[must_use]
    pub fn noop() -> Self {
        Self::new(|| {})
    }

    /// Creates a completion paired with a waiter that unblocks when it fires.
    #[must_use]
    pub fn channel() -> (Self, CompletionWaiter) {
        let signal = Arc::new(Signal::default());
        let fire = Arc::clone(&signal);
        (
            Self::new(move || fire.set()),
            CompletionWaiter { signal },
        )
    }

    /// Runs the completion, consuming it.
    pub fn complete(self) {
        (self.callback)();
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion").finish_non_exhaustive()
    }
}

#[derive(Default)]
struct Signal {
    done: Mutex<bool>,
    cond: Condvar,
}

impl Signal {
    fn set(&self) {
        let mut done = self.done.lock();
        *done = true;
        self.cond.notify_all();
    }
}

/// Blocks until its paired [`Completion`] has fired.
#[derive(Clone)]
pub struct CompletionWaiter {
    signal: Arc<Signal>,
}

impl CompletionWaiter {
    /// Waits until the completion fires.
    pub fn wait(&self) {
        let mut done = self.signal.done.lock();
        while !*done {
            self.signal.cond.wait(&mut done);
        }
    }

    /// Waits up to `timeout`; returns whether the completion fired.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut done = self.signal.done.lock();
        if !*done {
            let _ = self
                .signal
                .cond
                .wait_while_for(&mut done, |done| !*done, timeout);
        }
        *done
    }

    /// Returns whether the completion has fired.
    #[must_use]
    pub fn is_done(&self) -> bool {
        *self.signal.done.lock()
    }
}

impl fmt::Debug for CompletionWaiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionWaiter")
            .field("done", &self.is_done())
            .finish()
    }
}

struct GatherInner {
    outstanding: usize,
    activated: bool,
    finisher: Option<Completion>,
}

impl GatherInner {
    fn take_ready(&mut self) -> Option<Completion> {
        if self.activated && self.outstanding == 0 {
            self.finisher.take()
        } else {
            None
        }
    }
}

/// Joins many completions into one.
///
/// The final completion fires once the builder has been activated and
/// every sub-completion created by [`GatherBuilder::new_sub`] has fired.
/// Dropping the builder activates it.
pub struct GatherBuilder {
    inner: Arc<Mutex<GatherInner>>,
    created: usize,
}

impl GatherBuilder {
    /// Creates a gather that fires `finisher` when complete.
    #[must_use]
    pub fn new(finisher: Completion) -> Self {
        Self {
            inner: Arc::new(Mutex::new(GatherInner {
                outstanding: 0,
                activated: false,
                finisher: Some(finisher),
            })),
            created: 0,
        }
    }

    /// Creates one more constituent completion.
    pub fn new_sub(&mut self) -> Completion {
        self.inner.lock().outstanding += 1;
        self.created += 1;
        let inner = Arc::clone(&self.inner);
        Completion::new(move || {
            let ready = {
                let mut inner = inner.lock();
                inner.outstanding -= 1;
                inner.take_ready()
            };
            if let Some(finisher) = ready {
                finisher.complete();
            }
        })
    }

    /// Number of sub-completions created so far.
    #[must_use]
    pub fn num_subs(&self) -> usize {
        self.created
    }

    /// Stops accepting subs; the finisher fires once all subs have fired.
    pub fn activate(self) {
        // Drop does the work.
    }

    fn activate_inner(&self) {
        let ready = {
            let mut inner = self.inner.lock();
            if inner.activated {
                return;
            }
            inner.activated = true;
            inner.take_ready()
        };
        if let Some(finisher) = ready {
            finisher.complete();
        }
    }
}

impl Drop for GatherBuilder {
    fn drop(&mut self) {
        self.activate_inner();
    }
}

impl fmt::Debug for GatherBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatherBuilder")
            .field("created", &self.created)
            .finish_non_exhaustive()
    }
}
