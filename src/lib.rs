//! Settle-once broadcast promises.
//!
//! A [`Promise`] is the eventual result of an asynchronous computation:
//! either a success value or a failure reason, settled exactly once and
//! delivered to any number of continuations — including continuations
//! registered after settlement. Continuations never run inside the call that
//! registered them; they are dispatched through an injected FIFO
//! [`Scheduler`] once the promise settles.
//!
//! Resolving a promise with another promise, or with any [`Thenable`],
//! adopts that value's eventual outcome instead of treating it as a plain
//! value. Rejections that no continuation ever observes are reported once
//! to a diagnostic sink (a `tracing` warning by default).
//!
//! # Examples
//!
//! ```
//! use promise_chain::{Promise, Resolution, TaskQueue};
//!
//! let queue = TaskQueue::new();
//! let (producer, promise) = Promise::<i32, String>::pending(queue.handle());
//! let doubled = promise.then(|n| Resolution::Value(*n * 2));
//!
//! producer.resolve(21);
//! // Continuations run on the queue, never inside `resolve`.
//! assert!(doubled.is_pending());
//!
//! queue.run_until_idle();
//! assert_eq!(*doubled.outcome().unwrap().unwrap(), 42);
//! ```

use std::fmt;

pub mod combinator;
pub mod promise;
pub mod task;
pub mod waiter;

pub use combinator::{all, race};
pub use promise::{Producer, Promise, Resolution, Thenable};
pub use task::{Scheduler, SchedulerHandle, Task, TaskQueue};
pub use waiter::Waiter;

/// Failures the settlement machinery itself can raise as rejection reasons.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A promise was resolved with itself, or with an adoption chain that
    /// loops back to it.
    #[error("promise cannot adopt its own resolution")]
    Cycle,
    /// Every `Producer` handle was dropped before a settlement happened.
    #[error("producer dropped before settling")]
    ProducerDropped,
}

impl From<Error> for String {
    fn from(err: Error) -> Self {
        err.to_string()
    }
}

/// Marker for types usable as a rejection reason.
///
/// Blanket-implemented; a reason type only needs `From<Error>` so the
/// machinery can reject with [`Error::Cycle`] or [`Error::ProducerDropped`]
/// when it has to.
pub trait Reason: From<Error> + fmt::Debug + Send + Sync + 'static {}

impl<E> Reason for E where E: From<Error> + fmt::Debug + Send + Sync + 'static {}
