use thiserror::Error;

/// Cancellation has been requested for the current task.
///
/// Returned by [`TaskContext::checkpoint`](crate::TaskContext::checkpoint);
/// the run closure is expected to propagate it with `?`. The worker loop
/// treats it as the normal finished-cancelled outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("task cancelled")]
pub struct Cancelled;

/// Errors returned by [`Engine::submit`](crate::Engine::submit).
#[derive(Debug, Error)]
pub enum SubmitError {
  /// The engine has been shut down; the task's closures were dropped without
  /// being invoked.
  #[error("engine is shutting down")]
  ShuttingDown,
}
