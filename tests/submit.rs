use std::sync::{
  atomic::{AtomicUsize, Ordering},
  Arc, Mutex,
};
use std::time::Duration;

use ferry::{ChannelBridge, Engine, SubmitError};

fn pump(bridge: &ChannelBridge, deliveries: usize) {
  for _ in 0..deliveries {
    assert!(
      bridge.run_next(Duration::from_secs(5)),
      "timed out waiting for a delivery"
    );
  }
}

#[test]
fn every_task_posts_exactly_once() {
  let bridge = Arc::new(ChannelBridge::new());
  let engine = Engine::new(bridge.clone());

  let posts = Arc::new(AtomicUsize::new(0));
  let aborts = Arc::new(AtomicUsize::new(0));

  for _ in 0..8 {
    let posts = Arc::clone(&posts);
    let aborts = Arc::clone(&aborts);
    engine
      .submit_with_post(
        "work",
        |_ctx| Ok(()),
        move || {
          posts.fetch_add(1, Ordering::SeqCst);
        },
        move || {
          aborts.fetch_add(1, Ordering::SeqCst);
        },
      )
      .unwrap();
  }

  pump(&bridge, 8);
  assert_eq!(posts.load(Ordering::SeqCst), 8);
  assert_eq!(aborts.load(Ordering::SeqCst), 0);
}

#[test]
fn tasks_start_in_submission_order() {
  let bridge = Arc::new(ChannelBridge::new());
  let engine = Engine::builder().workers(1).build(bridge.clone());

  let order = Arc::new(Mutex::new(Vec::new()));
  for index in 0..5usize {
    let order = Arc::clone(&order);
    engine
      .submit(
        "ordered",
        move |_ctx| {
          order.lock().unwrap().push(index);
          Ok(())
        },
        || {},
      )
      .unwrap();
  }

  pump(&bridge, 5);
  assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
}

#[test]
fn post_handler_set_from_inside_run_carries_the_result() {
  let bridge = Arc::new(ChannelBridge::new());
  let engine = Engine::new(bridge.clone());

  let result = Arc::new(AtomicUsize::new(0));
  let slot = Arc::clone(&result);
  engine
    .submit(
      "compute",
      move |ctx| {
        let computed = 6 * 7;
        ctx.set_post(move || {
          slot.store(computed, Ordering::SeqCst);
        });
        Ok(())
      },
      || panic!("abort must not fire"),
    )
    .unwrap();

  pump(&bridge, 1);
  assert_eq!(result.load(Ordering::SeqCst), 42);
}

#[test]
fn submit_without_post_delivers_nothing_on_success() {
  let bridge = Arc::new(ChannelBridge::new());
  let engine = Engine::new(bridge.clone());

  let aborts = Arc::new(AtomicUsize::new(0));
  let counter = Arc::clone(&aborts);
  engine
    .submit(
      "fire-and-forget",
      |_ctx| Ok(()),
      move || {
        counter.fetch_add(1, Ordering::SeqCst);
      },
    )
    .unwrap();

  // The delivery still happens, it just has no handler to run.
  pump(&bridge, 1);
  assert_eq!(aborts.load(Ordering::SeqCst), 0);
}

// Each submission lands while the lone worker is idle (parked or about to
// park); every wake must reach it, since a lost one would now stall the
// delivery past the pump timeout.
#[test]
fn sequential_submits_wake_an_idle_worker() {
  let bridge = Arc::new(ChannelBridge::new());
  let engine = Engine::builder().workers(1).build(bridge.clone());

  let posts = Arc::new(AtomicUsize::new(0));
  for round in 1..=20 {
    let posts_in_handler = Arc::clone(&posts);
    engine
      .submit_with_post(
        "ping",
        |_ctx| Ok(()),
        move || {
          posts_in_handler.fetch_add(1, Ordering::SeqCst);
        },
        || {},
      )
      .unwrap();
    pump(&bridge, 1);
    assert_eq!(posts.load(Ordering::SeqCst), round);
  }
}

#[test]
fn submit_after_shutdown_is_rejected() {
  let bridge = Arc::new(ChannelBridge::new());
  let mut engine = Engine::new(bridge.clone());
  engine.shutdown();

  let result = engine.submit("late", |_ctx| Ok(()), || {});
  assert!(matches!(result, Err(SubmitError::ShuttingDown)));
}
