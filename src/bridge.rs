use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};

/// The seam between the engine and the host's owner thread.
///
/// The engine never runs completion handlers itself; it wraps each delivery
/// in a closure and hands it to `post_to_owner`. The host is expected to
/// execute those closures on its single owner thread (a UI main loop, for
/// instance), in the order they were posted. Closures that arrive after the
/// engine has shut down are harmless no-ops.
pub trait OwnerBridge: Send + Sync + 'static {
  fn post_to_owner(&self, job: Box<dyn FnOnce() + Send>);
}

/// Channel-backed [`OwnerBridge`] for hosts without a native event loop.
///
/// Workers push delivery closures into the channel; whichever thread the
/// host designates as owner pumps them out with [`drain`](Self::drain) or
/// [`run_next`](Self::run_next).
pub struct ChannelBridge {
  sender: Sender<Box<dyn FnOnce() + Send>>,
  receiver: Receiver<Box<dyn FnOnce() + Send>>,
}

impl ChannelBridge {
  pub fn new() -> ChannelBridge {
    let (sender, receiver) = crossbeam_channel::unbounded();
    ChannelBridge { sender, receiver }
  }

  /// Runs every delivery queued so far. Returns how many ran.
  pub fn drain(&self) -> usize {
    let mut count = 0;
    while let Ok(job) = self.receiver.try_recv() {
      job();
      count += 1;
    }
    count
  }

  /// Waits up to `timeout` for one delivery and runs it. Returns whether a
  /// delivery ran.
  pub fn run_next(&self, timeout: Duration) -> bool {
    match self.receiver.recv_timeout(timeout) {
      Ok(job) => {
        job();
        true
      }
      Err(_) => false,
    }
  }
}

impl Default for ChannelBridge {
  fn default() -> Self {
    Self::new()
  }
}

impl OwnerBridge for ChannelBridge {
  fn post_to_owner(&self, job: Box<dyn FnOnce() + Send>) {
    // Receiver lives as long as self, so this cannot fail.
    let _ = self.sender.send(job);
  }
}
