use std::{
  panic::{self, AssertUnwindSafe},
  sync::Arc,
  thread,
};

use crossbeam_channel::TryRecvError;
use parking::Parker;

use crate::{
  engine::Shared,
  task::{Task, TaskContext},
};

/// Removes this worker's RunningSet entry even if execution unwinds.
struct RunningGuard<'a> {
  shared: &'a Shared,
}

impl Drop for RunningGuard<'_> {
  fn drop(&mut self) {
    self.shared.finish_running(thread::current().id());
  }
}

pub(crate) fn main_loop(shared: Arc<Shared>, index: usize) {
  tracing::trace!(worker = index, "starting");
  let parker = Parker::new();
  let id = thread::current().id();

  loop {
    if shared.is_shutting_down() {
      break;
    }
    match shared.next_task() {
      Ok(task) => {
        if shared.is_shutting_down() {
          // Dequeued in the window where shutdown was flagged; the task was
          // never allowed to start, so release its closures uninvoked.
          task.discard_handlers();
          break;
        }
        execute(&shared, task);
      }
      Err(TryRecvError::Empty) => {
        // Register before rechecking the queue: a submit that raced the
        // miss above now either lands in the recheck or finds this
        // worker's unparker, so no wake is lost.
        shared.register_idle(id, parker.unparker());
        match shared.next_task() {
          Ok(task) => {
            shared.unregister_idle(id);
            if shared.is_shutting_down() {
              task.discard_handlers();
              break;
            }
            execute(&shared, task);
          }
          Err(TryRecvError::Empty) => {
            if !shared.is_shutting_down() {
              parker.park();
            }
            shared.unregister_idle(id);
          }
          Err(TryRecvError::Disconnected) => {
            shared.unregister_idle(id);
            break;
          }
        }
      }
      Err(TryRecvError::Disconnected) => break,
    }
  }

  tracing::trace!(worker = index, "shutting down");
}

fn execute(shared: &Arc<Shared>, task: Arc<Task>) {
  shared.begin_running(thread::current().id(), Arc::clone(&task));
  let guard = RunningGuard { shared: shared.as_ref() };

  let run = task.take_run();
  let ctx = TaskContext::new(Arc::clone(&task));
  let result = panic::catch_unwind(AssertUnwindSafe(move || match run {
    Some(run) => run(&ctx),
    None => Ok(()),
  }));

  match result {
    Ok(Ok(())) => {}
    Ok(Err(_cancelled)) => {
      // Voluntary early exit counts as cancellation even if nobody asked.
      task.request_cancel();
    }
    Err(_payload) => {
      task.request_cancel();
      tracing::debug!(key = task.key(), "run panicked, treating as abort");
    }
  }

  // Posted before the RunningSet entry goes away so a key scan can never
  // miss the task between the two containers.
  Shared::post_for_delivery(shared, task);
  drop(guard);
}
