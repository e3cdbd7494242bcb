//! The settlement state machine and continuation dispatch.
//!
//! A promise moves through one terminal edge and never again:
//! `Pending → Fulfilled`, `Pending → Rejected`, or `Pending → Following →
//! (Fulfilled | Rejected)` when it adopts another promise's eventual
//! outcome. Settled outcomes are stored as `Arc`s and shared with every
//! continuation; continuations themselves always run on the injected
//! scheduler, never inside the call that settled or registered them.

use std::fmt;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::Waker;

use crate::task::SchedulerHandle;
use crate::waiter::Waiter;
use crate::{Error, Reason};

type Sink<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// What a continuation resolves to, deciding the assimilation route at the
/// type level.
pub enum Resolution<T: Send + Sync + 'static, E: Reason> {
    /// A plain value; fulfills directly.
    Value(T),
    /// A failure; rejects the promise being resolved.
    Error(E),
    /// Another promise; its eventual outcome is adopted.
    Promise(Promise<T, E>),
    /// Anything exposing a continuation protocol; subscribed and adopted.
    Thenable(Box<dyn Thenable<T, E>>),
}

/// A value that can be settled like a promise without being one.
///
/// `then` receives a fresh [`Producer`] whose first settlement call wins, so
/// an implementation that calls back twice, or on both branches, has only
/// its first outcome honored. Returning `Err` counts as a failed
/// subscription and rejects the promise unless it was already settled.
pub trait Thenable<T: Send + Sync + 'static, E: Reason>: Send {
    fn then(self: Box<Self>, producer: Producer<T, E>) -> Result<(), E>;
}

/// One registered continuation: a branch per terminal state, each of which
/// settles the downstream promise created by the chaining call. An absent
/// branch passes the outcome through unchanged.
pub(crate) struct Reaction<T, E> {
    on_fulfilled: Box<dyn FnOnce(Arc<T>) + Send>,
    on_rejected: Box<dyn FnOnce(Arc<E>) + Send>,
}

impl<T: Send + Sync + 'static, E: Reason> Reaction<T, E> {
    pub(crate) fn new(
        on_fulfilled: Box<dyn FnOnce(Arc<T>) + Send>,
        on_rejected: Box<dyn FnOnce(Arc<E>) + Send>,
    ) -> Self {
        Self {
            on_fulfilled,
            on_rejected,
        }
    }

    /// Copies the settled state of the promise this reaction is parked on
    /// into `target`.
    fn adopt(target: Promise<T, E>) -> Self {
        let fulfil = target.clone();
        Self {
            on_fulfilled: Box::new(move |value| fulfil.settle_value(value)),
            on_rejected: Box::new(move |reason| target.settle_error(reason)),
        }
    }
}

enum State<T, E> {
    /// Unsettled; reactions park here in registration order.
    Pending(Vec<Reaction<T, E>>),
    /// Resolved to another promise whose outcome will be copied in.
    Following(Promise<T, E>),
    Fulfilled(Arc<T>),
    Rejected(Arc<E>),
}

struct Inner<T, E> {
    state: State<T, E>,
    /// True once any continuation or waiter can see the outcome.
    observed: bool,
    wakers: Vec<Waker>,
    scheduler: SchedulerHandle,
    sink: Option<Sink<E>>,
}

/// The deferred-value handle. Cloning shares the same underlying cell.
pub struct Promise<T, E> {
    inner: Arc<Mutex<Inner<T, E>>>,
}

impl<T, E> Clone for Promise<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T, E> fmt::Debug for Promise<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.inner.lock().unwrap().state {
            State::Pending(_) => "pending",
            State::Following(_) => "following",
            State::Fulfilled(_) => "fulfilled",
            State::Rejected(_) => "rejected",
        };
        f.debug_tuple("Promise").field(&state).finish()
    }
}

impl<T, E> Promise<T, E> {
    /// True while unsettled, including while adopting another promise.
    pub fn is_pending(&self) -> bool {
        matches!(
            self.inner.lock().unwrap().state,
            State::Pending(_) | State::Following(_)
        )
    }

    pub fn is_fulfilled(&self) -> bool {
        matches!(self.inner.lock().unwrap().state, State::Fulfilled(_))
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self.inner.lock().unwrap().state, State::Rejected(_))
    }

    /// Snapshot of the settled outcome, if any.
    ///
    /// A probe, not a continuation: reading a rejection this way does not
    /// count as observing it.
    pub fn outcome(&self) -> Option<Result<Arc<T>, Arc<E>>> {
        match &self.inner.lock().unwrap().state {
            State::Fulfilled(value) => Some(Ok(value.clone())),
            State::Rejected(reason) => Some(Err(reason.clone())),
            _ => None,
        }
    }

    /// A [`std::future::Future`] view of this promise.
    pub fn waiter(&self) -> Waiter<T, E> {
        Waiter::new(self.clone())
    }

    /// Ready outcome, or parks `waker` for settlement. Awaiting counts as
    /// observing a rejection.
    pub(crate) fn poll_outcome(&self, waker: &Waker) -> Option<Result<Arc<T>, Arc<E>>> {
        let mut inner = self.inner.lock().unwrap();
        inner.observed = true;
        match &inner.state {
            State::Fulfilled(value) => Some(Ok(value.clone())),
            State::Rejected(reason) => Some(Err(reason.clone())),
            _ => {
                // Every poll parks its own waker; extra wakes are harmless,
                // dropped wakes are not.
                inner.wakers.push(waker.clone());
                None
            }
        }
    }
}

impl<T, E> Promise<T, E>
where
    T: Send + Sync + 'static,
    E: Reason,
{
    fn bare(scheduler: SchedulerHandle, sink: Option<Sink<E>>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: State::Pending(Vec::new()),
                observed: false,
                wakers: Vec::new(),
                scheduler,
                sink,
            })),
        }
    }

    /// An unsettled promise plus the handle that settles it.
    pub fn pending(scheduler: SchedulerHandle) -> (Producer<T, E>, Promise<T, E>) {
        let promise = Self::bare(scheduler, None);
        (Producer::settling(promise.clone()), promise)
    }

    /// Runs `resolver` synchronously with the settle handle. An `Err`
    /// return rejects the promise unless the resolver already settled it.
    pub fn new<F>(scheduler: SchedulerHandle, resolver: F) -> Self
    where
        F: FnOnce(Producer<T, E>) -> Result<(), E>,
    {
        let (producer, promise) = Self::pending(scheduler);
        if let Err(reason) = resolver(producer.clone()) {
            producer.reject(reason);
        }
        promise
    }

    /// A promise settled through the resolution algorithm.
    ///
    /// `Resolution::Promise` short-circuits: the promise is returned as-is,
    /// no wrapper.
    pub fn resolved(scheduler: SchedulerHandle, value: Resolution<T, E>) -> Self {
        if let Resolution::Promise(existing) = value {
            return existing;
        }
        let promise = Self::bare(scheduler, None);
        promise.resolve(value);
        promise
    }

    /// A promise rejected with `reason`, verbatim; rejection reasons are
    /// never assimilated.
    pub fn rejected(scheduler: SchedulerHandle, reason: E) -> Self {
        let promise = Self::bare(scheduler, None);
        promise.settle_error(Arc::new(reason));
        promise
    }

    /// Chains a success continuation; rejection passes through unchanged.
    pub fn then<U, F>(&self, on_fulfilled: F) -> Promise<U, E>
    where
        U: Send + Sync + 'static,
        F: FnOnce(Arc<T>) -> Resolution<U, E> + Send + 'static,
    {
        let downstream = self.downstream::<U>();
        let fulfil = downstream.clone();
        let reject = downstream.clone();
        self.push_reactions(vec![Reaction::new(
            Box::new(move |value| fulfil.resolve(on_fulfilled(value))),
            Box::new(move |reason| reject.settle_error(reason)),
        )]);
        downstream
    }

    /// Chains a failure continuation; fulfillment passes through unchanged.
    pub fn or_else<F>(&self, on_rejected: F) -> Promise<T, E>
    where
        F: FnOnce(Arc<E>) -> Resolution<T, E> + Send + 'static,
    {
        let downstream = self.downstream::<T>();
        let fulfil = downstream.clone();
        let reject = downstream.clone();
        self.push_reactions(vec![Reaction::new(
            Box::new(move |value| fulfil.settle_value(value)),
            Box::new(move |reason| reject.resolve(on_rejected(reason))),
        )]);
        downstream
    }

    /// Chains both continuations at once.
    pub fn then_or_else<U, F, R>(&self, on_fulfilled: F, on_rejected: R) -> Promise<U, E>
    where
        U: Send + Sync + 'static,
        F: FnOnce(Arc<T>) -> Resolution<U, E> + Send + 'static,
        R: FnOnce(Arc<E>) -> Resolution<U, E> + Send + 'static,
    {
        let downstream = self.downstream::<U>();
        let fulfil = downstream.clone();
        let reject = downstream.clone();
        self.push_reactions(vec![Reaction::new(
            Box::new(move |value| fulfil.resolve(on_fulfilled(value))),
            Box::new(move |reason| reject.resolve(on_rejected(reason))),
        )]);
        downstream
    }

    /// Runs `f` once this promise settles, either way, and passes the
    /// outcome through unchanged.
    pub fn finally<F>(&self, f: F) -> Promise<T, E>
    where
        F: FnOnce() + Send + 'static,
    {
        // One FnOnce, two branches; only the matching branch takes it.
        let slot = Arc::new(Mutex::new(Some(f)));
        let other = slot.clone();
        let downstream = self.downstream::<T>();
        let fulfil = downstream.clone();
        let reject = downstream.clone();
        self.push_reactions(vec![Reaction::new(
            Box::new(move |value| {
                if let Some(f) = slot.lock().unwrap().take() {
                    f();
                }
                fulfil.settle_value(value);
            }),
            Box::new(move |reason| {
                if let Some(f) = other.lock().unwrap().take() {
                    f();
                }
                reject.settle_error(reason);
            }),
        )]);
        downstream
    }

    /// Replaces the diagnostic sink consulted when a rejection goes
    /// unobserved. Promises chained off this one after the call inherit it.
    /// Without a sink the report is a `tracing` warning.
    pub fn set_unhandled_sink<F>(&self, sink: F)
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.inner.lock().unwrap().sink = Some(Arc::new(sink));
    }

    /// A fresh pending promise on the same scheduler, inheriting the sink.
    fn downstream<U: Send + Sync + 'static>(&self) -> Promise<U, E> {
        let (scheduler, sink) = {
            let inner = self.inner.lock().unwrap();
            (inner.scheduler.clone(), inner.sink.clone())
        };
        Promise::bare(scheduler, sink)
    }

    /// The resolution algorithm: routes `value` by its tag.
    pub(crate) fn resolve(&self, value: Resolution<T, E>) {
        match value {
            Resolution::Value(value) => self.settle_value(Arc::new(value)),
            Resolution::Error(reason) => self.settle_error(Arc::new(reason)),
            Resolution::Promise(target) => self.follow(target),
            Resolution::Thenable(thenable) => {
                let producer = Producer::settling(self.clone());
                if let Err(reason) = thenable.then(producer.clone()) {
                    producer.reject(reason);
                }
            }
        }
    }

    /// Adopts `target`'s eventual outcome.
    ///
    /// Accumulated reactions move onto `target` behind an adoption reaction
    /// that copies the terminal state back here, so they still fire in
    /// registration order and the pending list empties the moment this
    /// promise stops being `Pending`.
    fn follow(&self, target: Promise<T, E>) {
        // Walk the adoption chain first: a loop back to this promise could
        // never settle, so refuse it outright.
        let mut probe = target.clone();
        loop {
            if Arc::ptr_eq(&probe.inner, &self.inner) {
                self.settle_error(Arc::new(E::from(Error::Cycle)));
                return;
            }
            let next = match &probe.inner.lock().unwrap().state {
                State::Following(next) => next.clone(),
                _ => break,
            };
            probe = next;
        }

        let parked = {
            let mut inner = self.inner.lock().unwrap();
            match mem::replace(&mut inner.state, State::Following(target.clone())) {
                State::Pending(reactions) => reactions,
                // Already settled or following; the first resolution won.
                previous => {
                    inner.state = previous;
                    return;
                }
            }
        };
        let mut moved = Vec::with_capacity(parked.len() + 1);
        moved.push(Reaction::adopt(self.clone()));
        moved.extend(parked);
        target.push_reactions(moved);
    }

    /// Terminal fulfillment; dispatches every parked reaction in order.
    pub(crate) fn settle_value(&self, value: Arc<T>) {
        let (reactions, wakers, scheduler) = {
            let mut inner = self.inner.lock().unwrap();
            match inner.state {
                State::Pending(_) | State::Following(_) => {}
                // Terminal states never change again.
                _ => return,
            }
            let previous = mem::replace(&mut inner.state, State::Fulfilled(value.clone()));
            let reactions = match previous {
                State::Pending(reactions) => reactions,
                _ => Vec::new(),
            };
            (
                reactions,
                mem::take(&mut inner.wakers),
                inner.scheduler.clone(),
            )
        };
        for waker in wakers {
            waker.wake();
        }
        for reaction in reactions {
            let value = value.clone();
            let run = reaction.on_fulfilled;
            scheduler.schedule(Box::new(move || run(value)));
        }
    }

    /// Terminal rejection; dispatches parked reactions and, when nothing
    /// has ever observed this promise, schedules the unobserved-rejection
    /// check for the next queue turn.
    pub(crate) fn settle_error(&self, reason: Arc<E>) {
        let (reactions, wakers, scheduler, observed) = {
            let mut inner = self.inner.lock().unwrap();
            match inner.state {
                State::Pending(_) | State::Following(_) => {}
                _ => return,
            }
            let previous = mem::replace(&mut inner.state, State::Rejected(reason.clone()));
            let reactions = match previous {
                State::Pending(reactions) => reactions,
                _ => Vec::new(),
            };
            (
                reactions,
                mem::take(&mut inner.wakers),
                inner.scheduler.clone(),
                inner.observed,
            )
        };
        for waker in wakers {
            waker.wake();
        }
        for reaction in reactions {
            let reason = reason.clone();
            let run = reaction.on_rejected;
            scheduler.schedule(Box::new(move || run(reason)));
        }
        if !observed {
            let me = self.clone();
            scheduler.schedule(Box::new(move || me.report_unobserved(&reason)));
        }
    }

    /// Runs one queue turn after an unobserved rejection; a continuation
    /// attached in the meantime suppresses the report.
    fn report_unobserved(&self, reason: &Arc<E>) {
        let sink = {
            let inner = self.inner.lock().unwrap();
            if inner.observed {
                return;
            }
            inner.sink.clone()
        };
        match sink {
            // Best-effort reporting; a broken sink must not take the queue
            // drain down with it.
            Some(sink) => {
                let _ = panic::catch_unwind(AssertUnwindSafe(|| sink(reason)));
            }
            None => tracing::warn!(?reason, "promise rejection was never observed"),
        }
    }

    /// Parks reactions at the adoption-chain tip, or schedules them right
    /// away when the tip is already terminal. Iterative on purpose: chains
    /// are unbounded.
    pub(crate) fn push_reactions(&self, reactions: Vec<Reaction<T, E>>) {
        enum Tip<T, E> {
            Advance(Promise<T, E>),
            Parked,
            Ready(Result<Arc<T>, Arc<E>>, SchedulerHandle),
        }

        let mut pending = reactions;
        let mut current = self.clone();
        loop {
            let tip = {
                let mut guard = current.inner.lock().unwrap();
                let inner = &mut *guard;
                inner.observed = true;
                match &mut inner.state {
                    State::Following(next) => Tip::Advance(next.clone()),
                    State::Pending(parked) => {
                        parked.append(&mut pending);
                        Tip::Parked
                    }
                    State::Fulfilled(value) => {
                        Tip::Ready(Ok(value.clone()), inner.scheduler.clone())
                    }
                    State::Rejected(reason) => {
                        Tip::Ready(Err(reason.clone()), inner.scheduler.clone())
                    }
                }
            };
            match tip {
                Tip::Advance(next) => current = next,
                Tip::Parked => return,
                Tip::Ready(outcome, scheduler) => {
                    for reaction in pending {
                        match &outcome {
                            Ok(value) => {
                                let value = value.clone();
                                let run = reaction.on_fulfilled;
                                scheduler.schedule(Box::new(move || run(value)));
                            }
                            Err(reason) => {
                                let reason = reason.clone();
                                let run = reaction.on_rejected;
                                scheduler.schedule(Box::new(move || run(reason)));
                            }
                        }
                    }
                    return;
                }
            }
        }
    }
}

/// Settle handle for a pending promise.
///
/// Clones share one once-flag: the first `resolve`/`reject` across all
/// clones wins and every later call is silently ignored. Dropping the last
/// clone without settling rejects the promise with
/// [`Error::ProducerDropped`].
pub struct Producer<T: Send + Sync + 'static, E: Reason> {
    target: Promise<T, E>,
    used: Arc<AtomicBool>,
}

impl<T: Send + Sync + 'static, E: Reason> Clone for Producer<T, E> {
    fn clone(&self) -> Self {
        Self {
            target: self.target.clone(),
            used: self.used.clone(),
        }
    }
}

impl<T: Send + Sync + 'static, E: Reason> Producer<T, E> {
    pub(crate) fn settling(target: Promise<T, E>) -> Self {
        Self {
            target,
            used: Arc::new(AtomicBool::new(false)),
        }
    }

    fn first_use(&self) -> bool {
        !self.used.swap(true, Ordering::SeqCst)
    }

    /// Fulfills with a plain value.
    pub fn resolve(&self, value: T) {
        self.resolve_with(Resolution::Value(value));
    }

    /// Settles through the full resolution algorithm; promises and
    /// thenables are adopted rather than stored.
    pub fn resolve_with(&self, value: Resolution<T, E>) {
        if self.first_use() {
            self.target.resolve(value);
        }
    }

    /// Rejects with `reason`, verbatim.
    pub fn reject(&self, reason: E) {
        if self.first_use() {
            self.target.settle_error(Arc::new(reason));
        }
    }

    pub(crate) fn fulfill_shared(&self, value: Arc<T>) {
        if self.first_use() {
            self.target.settle_value(value);
        }
    }

    pub(crate) fn reject_shared(&self, reason: Arc<E>) {
        if self.first_use() {
            self.target.settle_error(reason);
        }
    }
}

impl<T: Send + Sync + 'static, E: Reason> Drop for Producer<T, E> {
    fn drop(&mut self) {
        // Last handle going away unsettled: nothing can ever settle the
        // promise now, so reject instead of hanging forever.
        if Arc::strong_count(&self.used) == 1 && !self.used.load(Ordering::SeqCst) {
            self.target
                .settle_error(Arc::new(E::from(Error::ProducerDropped)));
        }
    }
}
