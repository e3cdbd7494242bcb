use std::sync::{Arc, Mutex};
use std::thread;

use futures::executor::block_on;

use promise_chain::{
    all, race, Error, Producer, Promise, Resolution, Scheduler, TaskQueue, Thenable,
};

/// A thenable that settles on a later queue turn instead of inline.
struct DeferredValue {
    value: i32,
    queue: TaskQueue,
}

impl Thenable<i32, String> for DeferredValue {
    fn then(self: Box<Self>, producer: Producer<i32, String>) -> Result<(), String> {
        let DeferredValue { value, queue } = *self;
        queue.schedule(Box::new(move || producer.resolve(value)));
        Ok(())
    }
}

#[test]
fn chained_pipeline_transforms_and_adopts() {
    let queue = TaskQueue::new();
    let handle = queue.handle();
    let promise = Promise::<i32, String>::new(queue.handle(), |producer| {
        producer.resolve(2);
        Ok(())
    });

    let formatted = promise
        .then(|n| Resolution::Value(*n * 10))
        .then(move |n| {
            Resolution::Promise(Promise::resolved(handle, Resolution::Value(*n + 1)))
        })
        .then(|n| Resolution::Value(n.to_string()));

    queue.run_until_idle();
    assert_eq!(*formatted.outcome().unwrap().unwrap(), "21");
}

#[test]
fn rejection_skips_success_callbacks_until_recovered() {
    let queue = TaskQueue::new();
    let touched = Arc::new(Mutex::new(Vec::new()));

    let (producer, promise) = Promise::<i32, String>::pending(queue.handle());
    let skipped = touched.clone();
    let recovered_log = touched.clone();
    let after_log = touched.clone();
    let recovered = promise
        .then(move |_n| {
            skipped.lock().unwrap().push("skipped");
            Resolution::Value(0)
        })
        .or_else(move |reason| {
            recovered_log.lock().unwrap().push("recovered");
            assert_eq!(reason.as_str(), "no dice");
            Resolution::Value(42)
        })
        .then(move |n| {
            after_log.lock().unwrap().push("after");
            Resolution::Value(*n)
        });

    producer.reject("no dice".into());
    queue.run_until_idle();

    assert_eq!(*recovered.outcome().unwrap().unwrap(), 42);
    assert_eq!(*touched.lock().unwrap(), vec!["recovered", "after"]);
}

#[test]
fn thenable_settling_on_a_later_turn_is_adopted() {
    let queue = TaskQueue::new();
    let (producer, promise) = Promise::<i32, String>::pending(queue.handle());
    producer.resolve_with(Resolution::Thenable(Box::new(DeferredValue {
        value: 33,
        queue: queue.clone(),
    })));

    assert!(promise.is_pending());
    queue.run_until_idle();
    assert_eq!(*promise.outcome().unwrap().unwrap(), 33);
}

#[test]
fn unhandled_rejection_reports_at_the_chain_tail_only() {
    let queue = TaskQueue::new();
    let (producer, promise) = Promise::<i32, String>::pending(queue.handle());
    let reports = Arc::new(Mutex::new(Vec::new()));
    let sink = reports.clone();
    promise.set_unhandled_sink(move |reason| sink.lock().unwrap().push(reason.clone()));

    // Two pass-through links; nothing ever handles the failure.
    promise
        .then(|n| Resolution::Value(*n))
        .then(|n| Resolution::Value(*n));

    producer.reject("tip".into());
    queue.run_until_idle();
    assert_eq!(*reports.lock().unwrap(), vec!["tip".to_string()]);
}

#[test]
fn settlement_from_another_thread_reaches_continuations() {
    let queue = TaskQueue::new();
    let (producer, promise) = Promise::<String, String>::pending(queue.handle());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();
    promise.then(move |greeting| {
        log.lock().unwrap().push(greeting.to_string());
        Resolution::Value(())
    });

    let sender = thread::spawn(move || producer.resolve(String::from("from afar")));
    sender.join().expect("the sender thread has panicked");
    queue.run_until_idle();
    assert_eq!(*seen.lock().unwrap(), vec!["from afar".to_string()]);
}

#[test]
fn awaiting_the_tail_of_a_combinator_chain() {
    let queue = TaskQueue::new();
    let (left, a) = Promise::<i32, Error>::pending(queue.handle());
    let (right, b) = Promise::<i32, Error>::pending(queue.handle());
    let joined = all(
        queue.handle(),
        vec![Resolution::Promise(a), Resolution::Promise(b)],
    );
    let summed = joined.then(|values| Resolution::Value(values.iter().map(|v| **v).sum::<i32>()));

    left.resolve(20);
    right.resolve(22);
    queue.run_until_idle();

    let outcome = block_on(summed.waiter());
    assert_eq!(*outcome.unwrap(), 42);
}

#[test]
fn race_against_an_already_settled_promise() {
    let queue = TaskQueue::new();
    let (never, slow) = Promise::<i32, Error>::pending(queue.handle());
    let fast = Promise::<i32, Error>::resolved(queue.handle(), Resolution::Value(1));
    let winner = race(queue.handle(), vec![slow, fast]);

    queue.run_until_idle();
    assert_eq!(*winner.outcome().unwrap().unwrap(), 1);

    never.resolve(2);
    queue.run_until_idle();
    assert_eq!(*winner.outcome().unwrap().unwrap(), 1);
}
