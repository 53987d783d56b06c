//! Single-consumer result handles.
//!
//! Every submitted task gets a [`TaskHandle`]/[`TaskSlot`] pair: the handle
//! goes back to the submitter, the slot travels with the task. The slot
//! delivers exactly once (the task's value, its captured panic, or
//! [`TaskError::Abandoned`] if the slot is dropped undelivered), so `join`
//! can never hang on a task the pool gave up on.

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use super::error::TaskError;

/// Poison-tolerant lock. Task panics are caught before delivery, so a
/// poisoned mutex here only means a panic *between* delivery steps; the
/// stored state is still a plain `Option` and remains valid.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct State<R> {
    result: Mutex<Option<Result<R, TaskError>>>,
    ready: Condvar,
}

/// Create a connected handle/slot pair.
pub(crate) fn handle_pair<R>() -> (TaskHandle<R>, TaskSlot<R>) {
    let state = Arc::new(State {
        result: Mutex::new(None),
        ready: Condvar::new(),
    });
    (
        TaskHandle {
            state: Arc::clone(&state),
        },
        TaskSlot {
            state,
            delivered: false,
        },
    )
}

/// Receiving side of a task's result.
///
/// Transitions exactly once from pending to ready; ready carries either the
/// task's return value or its captured failure.
pub struct TaskHandle<R> {
    state: Arc<State<R>>,
}

impl<R> TaskHandle<R> {
    /// Block until the task finishes, then return its outcome.
    ///
    /// Consumes the handle: the result is delivered to exactly one waiter.
    pub fn join(self) -> Result<R, TaskError> {
        let mut guard = lock(&self.state.result);
        loop {
            if let Some(result) = guard.take() {
                return result;
            }
            guard = self
                .state
                .ready
                .wait(guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    /// Whether the result has been delivered. Non-blocking.
    pub fn is_ready(&self) -> bool {
        lock(&self.state.result).is_some()
    }
}

impl<R> fmt::Debug for TaskHandle<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("ready", &self.is_ready())
            .finish()
    }
}

/// Delivery side, owned by the wrapped task.
pub(crate) struct TaskSlot<R> {
    state: Arc<State<R>>,
    delivered: bool,
}

impl<R> TaskSlot<R> {
    /// Publish the task's outcome and wake the waiter.
    pub(crate) fn deliver(mut self, result: Result<R, TaskError>) {
        self.put(result);
    }

    fn put(&mut self, result: Result<R, TaskError>) {
        if self.delivered {
            return;
        }
        self.delivered = true;
        *lock(&self.state.result) = Some(result);
        self.state.ready.notify_all();
    }
}

impl<R> Drop for TaskSlot<R> {
    fn drop(&mut self) {
        if !self.delivered {
            self.put(Err(TaskError::Abandoned));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn join_returns_delivered_value() {
        let (handle, slot) = handle_pair::<u32>();
        assert!(!handle.is_ready());
        slot.deliver(Ok(7));
        assert!(handle.is_ready());
        assert_eq!(handle.join().unwrap(), 7);
    }

    #[test]
    fn join_blocks_until_delivery() {
        let (handle, slot) = handle_pair::<&'static str>();

        let deliverer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            slot.deliver(Ok("done"));
        });

        assert_eq!(handle.join().unwrap(), "done");
        deliverer.join().unwrap();
    }

    #[test]
    fn dropped_slot_yields_abandoned() {
        let (handle, slot) = handle_pair::<u32>();
        drop(slot);
        assert!(matches!(handle.join(), Err(TaskError::Abandoned)));
    }

    #[test]
    fn failure_is_observable() {
        let (handle, slot) = handle_pair::<u32>();
        slot.deliver(Err(TaskError::Panicked {
            message: "boom".to_string(),
        }));
        let err = handle.join().unwrap_err();
        assert!(err.to_string().contains("boom"));
    }
}
