//! Composition over settled outcomes: `all` and `race`.
//!
//! Both are thin composition atop the promise core: each input feeds a
//! shared [`Producer`], and the producer's once-flag is what makes
//! "first failure wins" and "first settlement wins" hold.

use std::sync::{Arc, Mutex};

use crate::promise::{Promise, Reaction, Resolution};
use crate::task::SchedulerHandle;
use crate::Reason;

struct Gather<T> {
    values: Vec<Option<Arc<T>>>,
    remaining: usize,
}

/// Fulfills with every input's value, in input order, once all inputs
/// fulfill; rejects with the first failure observed, after which the
/// remaining inputs' settlements are ignored (and not cancelled).
///
/// Inputs may be plain values, promises, or thenables; each is routed
/// through the resolution algorithm. An empty input fulfills immediately
/// with an empty vec.
pub fn all<T, E>(
    scheduler: SchedulerHandle,
    inputs: Vec<Resolution<T, E>>,
) -> Promise<Vec<Arc<T>>, E>
where
    T: Send + Sync + 'static,
    E: Reason,
{
    let (producer, promise) = Promise::pending(scheduler.clone());
    if inputs.is_empty() {
        producer.resolve(Vec::new());
        return promise;
    }

    let gather = Arc::new(Mutex::new(Gather {
        values: vec![None; inputs.len()],
        remaining: inputs.len(),
    }));
    for (index, input) in inputs.into_iter().enumerate() {
        let gather = gather.clone();
        let fulfil = producer.clone();
        let reject = producer.clone();
        Promise::resolved(scheduler.clone(), input).push_reactions(vec![Reaction::new(
            Box::new(move |value| {
                let done: Option<Vec<Arc<T>>> = {
                    let mut gather = gather.lock().unwrap();
                    gather.values[index] = Some(value);
                    gather.remaining -= 1;
                    if gather.remaining == 0 {
                        Some(gather.values.iter_mut().filter_map(Option::take).collect())
                    } else {
                        None
                    }
                };
                if let Some(values) = done {
                    fulfil.resolve(values);
                }
            }),
            Box::new(move |reason| reject.reject_shared(reason)),
        )]);
    }
    promise
}

/// Settles exactly like whichever input settles first; every later
/// settlement is ignored.
///
/// Callers should pass at least one input. With none, nothing can ever
/// settle the result, so it rejects with
/// [`Error::ProducerDropped`](crate::Error::ProducerDropped).
pub fn race<T, E>(scheduler: SchedulerHandle, inputs: Vec<Promise<T, E>>) -> Promise<T, E>
where
    T: Send + Sync + 'static,
    E: Reason,
{
    let (producer, promise) = Promise::pending(scheduler);
    for input in inputs {
        let fulfil = producer.clone();
        let reject = producer.clone();
        input.push_reactions(vec![Reaction::new(
            Box::new(move |value| fulfil.fulfill_shared(value)),
            Box::new(move |reason| reject.reject_shared(reason)),
        )]);
    }
    promise
}
