//! Background task engine for hosts with a single "owner" thread.
//!
//! A host application (typically one with a UI/main thread) submits CPU-bound
//! jobs to a pool of worker threads and gets back a [`TaskToken`] it can use
//! to cancel the job. When a job finishes, the engine hands a delivery closure
//! to the host's [`OwnerBridge`]; when the owner thread runs it, exactly one
//! of the task's two completion handlers fires: `post` on success, `abort` on
//! cancellation or panic. Never both, never twice.
//!
//! Cancellation is cooperative: a running job observes it only at
//! [`TaskContext::checkpoint`] calls. A job that never polls runs to
//! completion and only the post-vs-abort decision changes.
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use ferry::{ChannelBridge, Engine};
//!
//! let bridge = Arc::new(ChannelBridge::new());
//! let engine = Engine::new(bridge.clone());
//!
//! let _token = engine
//!   .submit(
//!     "thumbnail",
//!     |ctx| {
//!       // ... chew on something, polling for cancellation ...
//!       ctx.checkpoint()?;
//!       ctx.set_post(|| println!("done"));
//!       Ok(())
//!     },
//!     || println!("aborted"),
//!   )
//!   .unwrap();
//!
//! // The owner thread pumps deliveries.
//! assert!(bridge.run_next(Duration::from_secs(5)));
//! ```

mod bridge;
mod engine;
mod error;
mod task;
mod token;
mod worker;

pub use bridge::{ChannelBridge, OwnerBridge};
pub use engine::{Builder, Engine};
pub use error::{Cancelled, SubmitError};
pub use task::TaskContext;
pub use token::TaskToken;
