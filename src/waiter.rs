//! Awaiting a promise from async code.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use crate::promise::Promise;

/// A [`Future`] view of a promise, obtained via [`Promise::waiter`].
///
/// Readiness tracks settlement directly — wakers are parked on the promise
/// and woken when it settles — so awaiting works even when nobody is
/// draining the task queue. Any number of waiters may watch one promise;
/// each receives the shared outcome. Awaiting counts as observing a
/// rejection.
pub struct Waiter<T, E> {
    promise: Promise<T, E>,
}

impl<T, E> Clone for Waiter<T, E> {
    fn clone(&self) -> Self {
        Self {
            promise: self.promise.clone(),
        }
    }
}

impl<T, E> Waiter<T, E> {
    pub(crate) fn new(promise: Promise<T, E>) -> Self {
        Self { promise }
    }
}

impl<T, E> Future for Waiter<T, E> {
    type Output = Result<Arc<T>, Arc<E>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.promise.poll_outcome(cx.waker()) {
            Some(outcome) => Poll::Ready(outcome),
            None => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::thread;

    use futures::executor::block_on;
    use futures::FutureExt;

    use crate::promise::{Promise, Resolution};
    use crate::task::TaskQueue;

    #[test]
    fn waiter_resolves_across_threads() {
        let queue = TaskQueue::new();
        let (producer, promise) = Promise::<String, String>::pending(queue.handle());
        let waiter = promise.waiter();
        let consumer = thread::spawn(move || block_on(async { waiter.await }));
        let sender = thread::spawn(move || producer.resolve(String::from("🍓")));
        sender.join().expect("the sender thread has panicked");
        let outcome = consumer.join().expect("the consumer thread has panicked");
        assert_eq!(*outcome.unwrap(), "🍓");
    }

    #[test]
    fn every_waiter_sees_the_same_outcome() {
        let queue = TaskQueue::new();
        let (producer, promise) = Promise::<String, String>::pending(queue.handle());
        let first = promise.waiter();
        let second = first.clone();
        let one = thread::spawn(move || block_on(async { first.await }));
        let two = thread::spawn(move || block_on(async { second.await }));
        producer.resolve(String::from("shared"));
        let one = one.join().expect("the first waiter thread has panicked");
        let two = two.join().expect("the second waiter thread has panicked");
        assert_eq!(*one.unwrap(), "shared");
        assert_eq!(*two.unwrap(), "shared");
    }

    #[test]
    fn waiter_observes_rejection() {
        let queue = TaskQueue::new();
        let (producer, promise) = Promise::<i32, String>::pending(queue.handle());
        let reports = std::sync::Arc::new(Mutex::new(0));
        let sink = reports.clone();
        promise.set_unhandled_sink(move |_reason| *sink.lock().unwrap() += 1);

        producer.reject("seen by await".into());
        let outcome = promise.waiter().now_or_never().expect("promise is settled");
        assert_eq!(*outcome.unwrap_err(), "seen by await");

        // Awaiting counted as observation, so no report fires.
        queue.run_until_idle();
        assert_eq!(*reports.lock().unwrap(), 0);
    }

    #[test]
    fn waiter_is_ready_only_after_adoption_completes() {
        let queue = TaskQueue::new();
        let (producer_a, a) = Promise::<i32, String>::pending(queue.handle());
        let (producer_b, b) = Promise::<i32, String>::pending(queue.handle());
        producer_a.resolve_with(Resolution::Promise(b.clone()));

        producer_b.resolve(11);
        // Adoption is copied back on the queue, one turn later.
        assert!(a.waiter().now_or_never().is_none());
        queue.run_until_idle();
        let outcome = a.waiter().now_or_never().expect("adoption has completed");
        assert_eq!(*outcome.unwrap(), 11);
    }
}
