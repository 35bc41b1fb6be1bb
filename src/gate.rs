//! Deferred, state-conditional execution.
//!
//! Some work is detected before the session is considered connected and must
//! not be surfaced early (a remote track arriving on the subscriber leg
//! during the join is the typical case). [`ExecutionGate::enqueue`] runs the
//! job right away when its condition already holds, otherwise parks it until
//! a later state transition satisfies it, or drops it when the removal
//! condition matches first.
//!
//! The gate is drained by the engine's observer task, never from inside a
//! state mutation, so a job is free to mutate state again.

use parking_lot::Mutex;
use tracing::trace;

/// Predicate over `(new, old)` state. `old` is `None` when evaluated at
/// enqueue time.
pub type StatePredicate<S> = Box<dyn Fn(&S, Option<&S>) -> bool + Send + Sync>;

/// A parked unit of work.
pub type Job = Box<dyn FnOnce() + Send>;

struct Entry<S> {
    execute_when: StatePredicate<S>,
    remove_when: StatePredicate<S>,
    job: Job,
}

/// Queue of `(execute_when, remove_when, job)` entries evaluated on every
/// state transition.
pub struct ExecutionGate<S> {
    queue: Mutex<Vec<Entry<S>>>,
}

impl<S> Default for ExecutionGate<S> {
    fn default() -> Self {
        Self {
            queue: Mutex::new(Vec::new()),
        }
    }
}

impl<S> std::fmt::Debug for ExecutionGate<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionGate")
            .field("pending", &self.len())
            .finish()
    }
}

impl<S> ExecutionGate<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `job` now if `execute_when(current(), None)` holds, otherwise park it.
    ///
    /// `current` is read while the queue lock is held, and [`process`] takes
    /// the same lock. A transition committed after the read therefore always
    /// finds the parked entry.
    ///
    /// [`process`]: Self::process
    pub fn enqueue(
        &self,
        current: impl FnOnce() -> S,
        execute_when: StatePredicate<S>,
        remove_when: StatePredicate<S>,
        job: Job,
    ) {
        let job = {
            let mut queue = self.queue.lock();
            if !execute_when(&current(), None) {
                queue.push(Entry {
                    execute_when,
                    remove_when,
                    job,
                });
                return;
            }
            job
        };
        trace!("gate: condition already met, running job");
        job();
    }

    /// Evaluate every parked entry once against a committed transition.
    ///
    /// Entries whose `remove_when` holds are dropped without running.
    /// Otherwise entries whose `execute_when` holds are run and dropped.
    /// The rest stay parked. Jobs run after the queue lock is released.
    pub fn process(&self, new: &S, old: &S) {
        let ready = {
            let mut queue = self.queue.lock();
            if queue.is_empty() {
                return;
            }
            let mut ready = Vec::new();
            let mut kept = Vec::with_capacity(queue.len());
            for entry in queue.drain(..) {
                if (entry.remove_when)(new, Some(old)) {
                    trace!("gate: entry removed");
                } else if (entry.execute_when)(new, Some(old)) {
                    ready.push(entry.job);
                } else {
                    kept.push(entry);
                }
            }
            *queue = kept;
            ready
        };

        for job in ready {
            job();
        }
    }

    /// Number of parked entries.
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every parked entry without running it.
    pub fn clear(&self) {
        self.queue.lock().clear();
    }
}
