use std::{
    fmt::Display,
    future::Future,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, warn};

use crate::Observable;

#[derive(Default)]
struct ScopeState {
    closed: bool,
    in_flight: usize,
    tasks: Vec<AbortHandle>,
}

struct ScopeShared {
    state: Mutex<ScopeState>,
    loading: Observable<bool>,
    error: Observable<Option<String>>,
}

impl ScopeShared {
    fn lock(&self) -> MutexGuard<'_, ScopeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `publish` unless the scope has been shut down. The lock is held
    /// across the publish so nothing lands after `shutdown` returns.
    fn publish_if_open(&self, publish: impl FnOnce()) -> bool {
        let state = self.lock();
        if state.closed {
            return false;
        }
        publish();
        true
    }

    fn enter(&self) {
        let mut state = self.lock();
        state.in_flight += 1;
        if state.in_flight == 1 {
            self.loading.set(true);
        }
    }

    fn exit(&self) {
        let mut state = self.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
        if state.in_flight == 0 && !state.closed {
            self.loading.set(false);
        }
    }
}

/// Clears the in-flight mark when the task finishes, fails or is aborted.
struct InFlight(Arc<ScopeShared>);

impl InFlight {
    fn enter(shared: Arc<ScopeShared>) -> Self {
        shared.enter();
        Self(shared)
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.exit();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationOutcome {
    /// The task ran to the end. Failures are reported through `error`.
    Completed,
    Cancelled,
}

/// Handle to one launched controller operation.
#[must_use = "dropping an Operation detaches it; call wait() to observe completion"]
pub struct Operation {
    name: &'static str,
    task: Option<JoinHandle<()>>,
}

impl Operation {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub async fn wait(self) -> OperationOutcome {
        let Some(task) = self.task else {
            return OperationOutcome::Cancelled;
        };
        match task.await {
            Ok(()) => OperationOutcome::Completed,
            Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            Err(_) => OperationOutcome::Cancelled,
        }
    }

    pub fn abort(&self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }
}

/// Lifetime of a controller's operations together with the `loading` and
/// `error` cells every operation reports through.
///
/// `loading` follows an in-flight counter: it turns true when the first
/// operation starts and false when the last one ends. Shutting the scope down
/// (or dropping it) aborts every task still running and freezes the state
/// cells at their last published values. In particular `loading` keeps
/// reading `true` if work was in flight at shutdown; `in_flight` still drops
/// to zero once the aborted tasks unwind.
pub struct OperationScope {
    shared: Arc<ScopeShared>,
}

impl Default for OperationScope {
    fn default() -> Self {
        Self::new()
    }
}

impl OperationScope {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(ScopeShared {
                state: Mutex::new(ScopeState::default()),
                loading: Observable::new(false),
                error: Observable::new(None),
            }),
        }
    }

    pub fn loading(&self) -> &Observable<bool> {
        &self.shared.loading
    }

    pub fn error(&self) -> &Observable<Option<String>> {
        &self.shared.error
    }

    pub fn clear_error(&self) {
        self.shared.publish_if_open(|| self.shared.error.set(None));
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    pub fn in_flight(&self) -> usize {
        self.shared.lock().in_flight
    }

    /// Publishes a state change made outside an operation, e.g. resetting a
    /// transient flag. Ignored after shutdown.
    pub(crate) fn publish(&self, publish: impl FnOnce()) {
        self.shared.publish_if_open(publish);
    }

    /// Spawns `call` on the current runtime. On success `apply` receives the
    /// result; on failure the error's display text lands in `error`. Must be
    /// called from within a Tokio runtime.
    pub(crate) fn launch<T, E, Fut, Apply>(
        &self,
        name: &'static str,
        call: Fut,
        apply: Apply,
    ) -> Operation
    where
        T: Send + 'static,
        E: Display + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        Apply: FnOnce(T) + Send + 'static,
    {
        if self.is_closed() {
            debug!(operation = name, "scope closed, operation not started");
            return Operation { name, task: None };
        }

        let guard = InFlight::enter(Arc::clone(&self.shared));
        let shared = Arc::clone(&self.shared);
        let task = tokio::spawn(async move {
            let _in_flight = guard;
            match call.await {
                Ok(value) => {
                    if shared.publish_if_open(|| apply(value)) {
                        debug!(operation = name, "operation completed");
                    }
                }
                Err(err) => {
                    let message = err.to_string();
                    warn!(operation = name, error = %message, "operation failed");
                    shared.publish_if_open(|| shared.error.set(Some(message)));
                }
            }
        });

        let mut state = self.shared.lock();
        state.tasks.retain(|handle| !handle.is_finished());
        if state.closed {
            task.abort();
        } else {
            state.tasks.push(task.abort_handle());
        }
        drop(state);

        Operation {
            name,
            task: Some(task),
        }
    }

    /// Aborts in-flight operations. Later launches are refused and no state
    /// change is published after this returns, so `loading` is not reset for
    /// the aborted work.
    pub fn shutdown(&self) {
        let tasks = {
            let mut state = self.shared.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            std::mem::take(&mut state.tasks)
        };
        for task in &tasks {
            task.abort();
        }
        debug!(aborted = tasks.len(), "operation scope shut down");
    }
}

impl Drop for OperationScope {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
#[path = "tests/scope_tests.rs"]
mod tests;
