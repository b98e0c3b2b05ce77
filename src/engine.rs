use std::{
  collections::HashMap,
  sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
  },
  thread::{self, JoinHandle, ThreadId},
};

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use dashmap::DashMap;
use parking::Unparker;

use crate::{
  bridge::OwnerBridge,
  error::{Cancelled, SubmitError},
  task::{HandlerFn, RunFn, Task, TaskContext},
  token::TaskToken,
  worker,
};

/// Engine configuration. Obtained through [`Engine::builder`].
pub struct Builder {
  workers: usize,
}

impl Default for Builder {
  fn default() -> Self {
    let workers =
      thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
    Builder { workers }
  }
}

impl Builder {
  pub fn new() -> Builder {
    Builder::default()
  }

  /// Overrides the worker thread count. Defaults to
  /// `std::thread::available_parallelism()`.
  pub fn workers(mut self, workers: usize) -> Builder {
    assert!(workers > 0, "worker count must be non-zero");
    self.workers = workers;
    self
  }

  /// Builds the engine and launches its worker threads.
  pub fn build(self, bridge: Arc<dyn OwnerBridge>) -> Engine {
    let (queue_tx, queue_rx) = crossbeam_channel::unbounded();
    let shared = Arc::new(Shared {
      queue_tx,
      queue_rx,
      running: DashMap::new(),
      posted: Mutex::new(Vec::new()),
      unparkers: Mutex::new(HashMap::new()),
      shutting_down: AtomicBool::new(false),
      bridge,
    });

    tracing::trace!(workers = self.workers, "launching workers");
    let handles = (0..self.workers)
      .map(|index| {
        let shared = Arc::clone(&shared);
        thread::Builder::new()
          .name(format!("ferry-worker-{index}"))
          .spawn(move || worker::main_loop(shared, index))
          .expect("failed to spawn worker thread")
      })
      .collect();

    Engine { shared, workers: Some(handles) }
  }
}

/// State shared between the engine handle, its workers and outstanding
/// tokens.
pub(crate) struct Shared {
  queue_tx: Sender<Arc<Task>>,
  queue_rx: Receiver<Arc<Task>>,
  running: DashMap<ThreadId, Arc<Task>>,
  posted: Mutex<Vec<Arc<Task>>>,
  unparkers: Mutex<HashMap<ThreadId, Unparker>>,
  shutting_down: AtomicBool,
  bridge: Arc<dyn OwnerBridge>,
}

impl Shared {
  pub(crate) fn is_shutting_down(&self) -> bool {
    self.shutting_down.load(Ordering::Acquire)
  }

  pub(crate) fn next_task(&self) -> Result<Arc<Task>, TryRecvError> {
    self.queue_rx.try_recv()
  }

  pub(crate) fn register_idle(&self, id: ThreadId, unparker: Unparker) {
    self.unparkers.lock().unwrap().insert(id, unparker);
  }

  pub(crate) fn unregister_idle(&self, id: ThreadId) {
    self.unparkers.lock().unwrap().remove(&id);
  }

  pub(crate) fn begin_running(&self, id: ThreadId, task: Arc<Task>) {
    self.running.insert(id, task);
  }

  pub(crate) fn finish_running(&self, id: ThreadId) {
    self.running.remove(&id);
  }

  /// Moves a finished task into the posted queue and schedules its delivery
  /// on the owner thread.
  pub(crate) fn post_for_delivery(this: &Arc<Shared>, task: Arc<Task>) {
    this.posted.lock().unwrap().push(Arc::clone(&task));
    let shared = Arc::downgrade(this);
    this.bridge.post_to_owner(Box::new(move || {
      // The engine may be gone by the time the owner pumps; the handlers
      // were drained at shutdown in that case.
      if let Some(shared) = shared.upgrade() {
        shared.deliver(&task);
      }
    }));
  }

  /// Runs on the owner thread: the single place a handler fires.
  fn deliver(&self, task: &Arc<Task>) {
    self.posted.lock().unwrap().retain(|t| !Arc::ptr_eq(t, task));
    if let Some(handler) = task.claim_delivery() {
      tracing::trace!(
        key = task.key(),
        cancelled = task.is_cancelled(),
        "delivering"
      );
      handler();
    }
  }

  fn unpark_one(&self) {
    let unparkers = self.unparkers.lock().unwrap();
    if let Some(unparker) = unparkers.values().next() {
      unparker.unpark();
    }
  }

  fn unpark_all(&self) {
    for unparker in self.unparkers.lock().unwrap().values() {
      unparker.unpark();
    }
  }
}

/// The task engine: a pool of worker threads plus the bookkeeping needed to
/// deliver every task's completion handler to the owner thread exactly once.
///
/// Dropping the engine shuts it down: workers are joined and every task that
/// never got to finish has its closures released without being invoked.
pub struct Engine {
  shared: Arc<Shared>,
  workers: Option<Vec<JoinHandle<()>>>,
}

impl Engine {
  /// An engine with default parallelism.
  pub fn new(bridge: Arc<dyn OwnerBridge>) -> Engine {
    Builder::default().build(bridge)
  }

  pub fn builder() -> Builder {
    Builder::default()
  }

  /// Submits a task. Non-blocking; tasks start in submission order.
  ///
  /// `run` executes on a worker thread and should call
  /// [`TaskContext::checkpoint`] at points where cancellation may be
  /// observed. `abort` is delivered on the owner thread if the task ends up
  /// cancelled. A success handler can be registered up front with
  /// [`submit_with_post`](Self::submit_with_post) or from inside `run` via
  /// [`TaskContext::set_post`].
  pub fn submit<R, A>(
    &self,
    key: impl Into<String>,
    run: R,
    abort: A,
  ) -> Result<TaskToken, SubmitError>
  where
    R: FnOnce(&TaskContext) -> Result<(), Cancelled> + Send + 'static,
    A: FnOnce() + Send + 'static,
  {
    self.submit_task(key.into(), Box::new(run), None, Box::new(abort))
  }

  /// [`submit`](Self::submit) with the success handler supplied up front.
  pub fn submit_with_post<R, P, A>(
    &self,
    key: impl Into<String>,
    run: R,
    post: P,
    abort: A,
  ) -> Result<TaskToken, SubmitError>
  where
    R: FnOnce(&TaskContext) -> Result<(), Cancelled> + Send + 'static,
    P: FnOnce() + Send + 'static,
    A: FnOnce() + Send + 'static,
  {
    self.submit_task(
      key.into(),
      Box::new(run),
      Some(Box::new(post)),
      Box::new(abort),
    )
  }

  fn submit_task(
    &self,
    key: String,
    run: RunFn,
    post: Option<HandlerFn>,
    abort: HandlerFn,
  ) -> Result<TaskToken, SubmitError> {
    if self.shared.is_shutting_down() {
      // Closures are dropped here without being invoked; their captured
      // data is released, post and abort never fire.
      return Err(SubmitError::ShuttingDown);
    }
    let task = Task::new(key, run, post, abort);
    tracing::trace!(key = task.key(), "task queued");
    self
      .shared
      .queue_tx
      .send(Arc::clone(&task))
      .map_err(|_| SubmitError::ShuttingDown)?;
    self.shared.unpark_one();
    Ok(TaskToken::new(Arc::downgrade(&self.shared), task))
  }

  /// Requests cancellation of every running or posted task whose key equals
  /// `key` ASCII-case-insensitively.
  ///
  /// Tasks still waiting in the pending queue are deliberately not matched;
  /// they will run (and post) normally unless cancelled through their token.
  /// This mirrors the behavior of the system this engine is modeled on.
  pub fn cancel_by_key(&self, key: &str) {
    for entry in self.shared.running.iter() {
      if entry.value().key_matches(key) && entry.value().request_cancel() {
        tracing::debug!(key = entry.value().key(), "cancelled while running");
      }
    }
    let posted = self.shared.posted.lock().unwrap();
    for task in posted.iter() {
      if task.key_matches(key) && task.request_cancel() {
        tracing::debug!(key = task.key(), "cancelled while posted");
      }
    }
  }

  /// Shuts the engine down: requests cancellation of running tasks, joins
  /// every worker, then drains the pending and posted queues releasing
  /// their closures uninvoked. Blocks until workers have exited; also runs
  /// on drop.
  ///
  /// Running tasks are only interrupted at their checkpoints; a task that
  /// never polls delays shutdown until it returns.
  pub fn shutdown(&mut self) {
    let Some(handles) = self.workers.take() else { return };
    self.shared.shutting_down.store(true, Ordering::Release);
    for entry in self.shared.running.iter() {
      entry.value().request_cancel();
    }
    self.shared.unpark_all();
    for handle in handles {
      let _ = handle.join();
    }
    assert!(
      self.shared.running.is_empty(),
      "worker exited with a task still registered as running"
    );

    let mut drained = 0usize;
    while let Ok(task) = self.shared.queue_rx.try_recv() {
      task.discard_handlers();
      drained += 1;
    }
    let posted = std::mem::take(&mut *self.shared.posted.lock().unwrap());
    for task in posted {
      task.discard_handlers();
      drained += 1;
    }
    tracing::trace!(drained, "engine shut down");
  }
}

impl Drop for Engine {
  fn drop(&mut self) {
    self.shutdown();
  }
}
