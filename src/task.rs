use std::sync::{
  atomic::{AtomicBool, Ordering},
  Arc, Mutex,
};

use crate::error::Cancelled;

pub(crate) type RunFn =
  Box<dyn FnOnce(&TaskContext) -> Result<(), Cancelled> + Send>;
pub(crate) type HandlerFn = Box<dyn FnOnce() + Send>;

/// A submitted unit of work.
///
/// The engine owns the only strong references that matter for execution;
/// tokens hold an extra `Arc` purely so a stale cancel can be detected
/// through `post_executed` instead of a dangling pointer.
pub(crate) struct Task {
  key: String,
  cancelled: AtomicBool,
  handlers: Mutex<Handlers>,
}

struct Handlers {
  run: Option<RunFn>,
  post: Option<HandlerFn>,
  abort: Option<HandlerFn>,
  post_executed: bool,
}

impl Task {
  pub(crate) fn new(
    key: String,
    run: RunFn,
    post: Option<HandlerFn>,
    abort: HandlerFn,
  ) -> Arc<Task> {
    Arc::new(Task {
      key,
      cancelled: AtomicBool::new(false),
      handlers: Mutex::new(Handlers {
        run: Some(run),
        post,
        abort: Some(abort),
        post_executed: false,
      }),
    })
  }

  pub(crate) fn key(&self) -> &str {
    &self.key
  }

  pub(crate) fn key_matches(&self, key: &str) -> bool {
    self.key.eq_ignore_ascii_case(key)
  }

  /// Sets the cancelled flag. Returns whether this call was the one that
  /// set it; the flag is never cleared again.
  pub(crate) fn request_cancel(&self) -> bool {
    !self.cancelled.swap(true, Ordering::AcqRel)
  }

  pub(crate) fn is_cancelled(&self) -> bool {
    self.cancelled.load(Ordering::Acquire)
  }

  /// Whether the task's outcome has been decided: a handler fired (or was
  /// discarded) and the task is disposed as far as callers are concerned.
  pub(crate) fn post_executed(&self) -> bool {
    self.handlers.lock().unwrap().post_executed
  }

  pub(crate) fn take_run(&self) -> Option<RunFn> {
    self.handlers.lock().unwrap().run.take()
  }

  /// Claims the delivery handler: `post` if the task was not cancelled,
  /// `abort` otherwise. The unclaimed handler is dropped. Returns `None` if
  /// delivery already happened (a synchronous abort got here first).
  ///
  /// Invocation is the caller's job and must happen after this returns, so
  /// the handler never runs while the lock is held.
  pub(crate) fn claim_delivery(&self) -> Option<HandlerFn> {
    let mut handlers = self.handlers.lock().unwrap();
    if handlers.post_executed {
      return None;
    }
    handlers.post_executed = true;
    handlers.run = None;
    if self.is_cancelled() {
      handlers.post = None;
      handlers.abort.take()
    } else {
      handlers.abort = None;
      handlers.post.take()
    }
  }

  /// Claims the abort handler for synchronous invocation, dropping `post`.
  /// `None` if a handler already fired.
  pub(crate) fn claim_abort(&self) -> Option<HandlerFn> {
    let mut handlers = self.handlers.lock().unwrap();
    if handlers.post_executed {
      return None;
    }
    handlers.post_executed = true;
    handlers.run = None;
    handlers.post = None;
    handlers.abort.take()
  }

  /// Shutdown drain: releases every closure uninvoked. Captured resources
  /// are dropped; neither post nor abort will ever fire for this task.
  pub(crate) fn discard_handlers(&self) {
    let mut handlers = self.handlers.lock().unwrap();
    handlers.post_executed = true;
    handlers.run = None;
    handlers.post = None;
    handlers.abort = None;
  }

  /// Sets or replaces the post handler, unless delivery already happened.
  pub(crate) fn set_post(&self, handler: HandlerFn) {
    let mut handlers = self.handlers.lock().unwrap();
    if !handlers.post_executed {
      handlers.post = Some(handler);
    }
  }

  pub(crate) fn set_abort(&self, handler: HandlerFn) {
    let mut handlers = self.handlers.lock().unwrap();
    if !handlers.post_executed {
      handlers.abort = Some(handler);
    }
  }
}

/// Handed to a run closure while it executes on a worker thread.
///
/// This is the only way to poll for cooperative cancellation and to register
/// or override the delivery handlers from inside the task's own run body,
/// which keeps the "only from the running task itself" contract at the type
/// level.
pub struct TaskContext {
  task: Arc<Task>,
}

impl TaskContext {
  pub(crate) fn new(task: Arc<Task>) -> TaskContext {
    TaskContext { task }
  }

  /// The cooperative cancellation checkpoint.
  ///
  /// Returns `Err(Cancelled)` once cancellation has been requested for this
  /// task, via its token, [`Engine::cancel_by_key`](crate::Engine::cancel_by_key)
  /// or engine shutdown. Intended to be propagated with `?`.
  pub fn checkpoint(&self) -> Result<(), Cancelled> {
    if self.task.is_cancelled() {
      Err(Cancelled)
    } else {
      Ok(())
    }
  }

  pub fn is_cancelled(&self) -> bool {
    self.task.is_cancelled()
  }

  /// The key the task was submitted under.
  pub fn key(&self) -> &str {
    self.task.key()
  }

  /// Registers (or replaces) the success handler from inside the run body,
  /// e.g. to move a computed result into the closure delivered to the owner
  /// thread.
  pub fn set_post<F>(&self, handler: F)
  where
    F: FnOnce() + Send + 'static,
  {
    self.task.set_post(Box::new(handler));
  }

  /// Registers (or replaces) the cancellation handler from inside the run
  /// body.
  pub fn set_abort<F>(&self, handler: F)
  where
    F: FnOnce() + Send + 'static,
  {
    self.task.set_abort(Box::new(handler));
  }
}
