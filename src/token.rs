use std::sync::{Arc, Weak};

use crate::{engine::Shared, task::Task};

/// Move-only handle to a submitted task.
///
/// The token never owns the task's execution; it is a cancellation handle.
/// A default-constructed or [`detach`](Self::detach)ed token is "null" and
/// every operation on it is a no-op, so `std::mem::take` gives move-out
/// semantics: the new binding keeps the task reference, the old one is null.
///
/// Dropping a token detaches it without blocking on the task finishing.
#[derive(Default)]
pub struct TaskToken {
  inner: Option<(Weak<Shared>, Arc<Task>)>,
}

impl TaskToken {
  pub(crate) fn new(shared: Weak<Shared>, task: Arc<Task>) -> TaskToken {
    TaskToken { inner: Some((shared, task)) }
  }

  /// A token bound to no task.
  pub fn null() -> TaskToken {
    TaskToken::default()
  }

  /// Whether the token still refers to a live task whose outcome is
  /// undecided. Once the task is delivered or the engine shuts down this
  /// reports false, mirroring how the engine side of the old mutual
  /// back-reference would null the token on dispose.
  pub fn is_attached(&self) -> bool {
    match &self.inner {
      Some((shared, task)) => {
        shared.strong_count() > 0 && !task.post_executed()
      }
      None => false,
    }
  }

  /// The key of the referenced task, if any.
  pub fn key(&self) -> Option<&str> {
    self.inner.as_ref().map(|(_, task)| task.key())
  }

  /// Requests cancellation of the task. Idempotent; never blocks on the
  /// task finishing.
  ///
  /// A running task observes the request at its next checkpoint; a pending
  /// one at its first. Either way its delivery becomes `abort` instead of
  /// `post`, unless a handler already fired, in which case this is a no-op.
  ///
  /// With `run_abort_now` set and no handler fired yet, `abort` is invoked
  /// synchronously on the calling thread and the owner-thread delivery
  /// becomes a no-op. Useful for deterministic cleanup at caller-controlled
  /// points.
  pub fn cancel(&mut self, run_abort_now: bool) {
    let Some((shared, task)) = self.inner.clone() else { return };
    if shared.upgrade().is_none() || task.post_executed() {
      // The engine shut down or the task was already delivered; either way
      // it is disposed, so the token detaches itself.
      self.inner = None;
      return;
    }
    if task.request_cancel() {
      tracing::debug!(key = task.key(), "cancellation requested via token");
    }
    if run_abort_now {
      if let Some(abort) = task.claim_abort() {
        abort();
      }
    }
  }

  /// Severs the token from its task without affecting the task.
  pub fn detach(&mut self) {
    self.inner = None;
  }
}
