use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{sync_channel, RecvTimeoutError};
use std::time::Duration;

use crate::error::AppError;

/// Result of a deadline-bounded, fault-isolated call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome<T> {
    Completed(T),
    TimedOut,
    Failed(String),
}

impl<T> TaskOutcome<T> {
    pub fn into_result(self, deadline: Duration) -> Result<T, AppError> {
        match self {
            Self::Completed(value) => Ok(value),
            Self::TimedOut => Err(AppError::Timeout(deadline)),
            Self::Failed(message) => Err(AppError::Extraction(message)),
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}

/// Runs `f` on its own thread and waits at most `deadline` for it.
///
/// A timed-out worker is detached: it keeps running and its result is dropped.
/// Panics inside `f` are caught and reported as `Failed`.
pub fn run_with_deadline<T, F>(deadline: Duration, f: F) -> TaskOutcome<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, AppError> + Send + 'static,
{
    let (tx, rx) = sync_channel(1);
    let spawned = std::thread::Builder::new()
        .name("supervised-task".to_string())
        .spawn(move || {
            let outcome = match catch_unwind(AssertUnwindSafe(f)) {
                Ok(Ok(value)) => TaskOutcome::Completed(value),
                Ok(Err(e)) => TaskOutcome::Failed(e.to_string()),
                Err(payload) => TaskOutcome::Failed(panic_message(payload)),
            };
            let _ = tx.send(outcome);
        });

    if let Err(e) = spawned {
        return TaskOutcome::Failed(format!("failed to spawn worker: {e}"));
    }

    match rx.recv_timeout(deadline) {
        Ok(outcome) => outcome,
        Err(RecvTimeoutError::Timeout) => TaskOutcome::TimedOut,
        Err(RecvTimeoutError::Disconnected) => {
            TaskOutcome::Failed("worker exited without a result".to_string())
        }
    }
}

/// Same-thread fault isolation for collaborator calls that have no deadline.
pub fn supervise<T>(f: impl FnOnce() -> Result<T, AppError>) -> Result<T, AppError> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(AppError::General(panic_message(payload))),
    }
}
