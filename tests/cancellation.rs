use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::{Duration, Instant};

use tickloop::{
    Cancellation, CancellationSource, CompositeCancellation, Driver, Error, TimeoutCancellation,
    time,
};

#[test]
fn test_cancel_is_idempotent_and_deferred() {
    let driver = Driver::new();
    let source = CancellationSource::new(&driver);
    let token = source.token();
    let calls = Rc::new(Cell::new(0));

    let counter = calls.clone();
    token.subscribe(move |_| counter.set(counter.get() + 1));

    source.cancel(Some(Error::msg("first")));
    source.cancel(Some(Error::msg("second")));

    assert!(source.is_requested());
    assert_eq!(calls.get(), 0, "Subscribers must run from the loop");

    driver.run().unwrap();

    assert_eq!(calls.get(), 1);
    match token.throw_if_requested() {
        Err(Error::Cancelled(cancelled)) => {
            assert_eq!(cancelled.reason().map(ToString::to_string).as_deref(), Some("first"));
        }
        other => panic!("expected a cancellation, got {other:?}"),
    }
}

#[test]
fn test_subscribe_after_cancel_is_delivered_once() {
    let driver = Driver::new();
    let source = CancellationSource::new(&driver);
    let token = source.token();
    let calls = Rc::new(Cell::new(0));

    source.cancel(None);

    let counter = calls.clone();
    token.subscribe(move |_| counter.set(counter.get() + 1));

    assert_eq!(calls.get(), 0);
    driver.run().unwrap();
    assert_eq!(calls.get(), 1);
}

#[test]
fn test_none_is_never_cancelled() {
    let driver = Driver::new();
    let token = Cancellation::none();

    token.subscribe(|_| panic!("never cancelled"));
    driver.run().unwrap();

    assert!(!token.is_requested());
    assert!(token.throw_if_requested().is_ok());
}

#[test]
fn test_unsubscribe_before_cancel() {
    let driver = Driver::new();
    let source = CancellationSource::new(&driver);
    let token = source.token();
    let called = Rc::new(Cell::new(false));

    let record = called.clone();
    let id = token.subscribe(move |_| record.set(true));
    token.unsubscribe(id);

    source.cancel(None);
    driver.run().unwrap();

    assert!(!called.get());
    assert!(token.is_requested());
}

#[test]
fn test_timeout_cancellation_fires() {
    let driver = Driver::new();
    let timeout = TimeoutCancellation::new(&driver, Duration::from_millis(10));
    let reason = Rc::new(RefCell::new(None));

    let record = reason.clone();
    timeout.subscribe(move |cancelled| {
        *record.borrow_mut() = cancelled.reason().cloned();
    });

    // The timeout itself does not keep the loop alive.
    driver.delay(Duration::from_millis(30), |_, _| Ok(()));

    driver.run().unwrap();

    assert!(timeout.is_requested());
    assert!(matches!(
        *reason.borrow(),
        Some(Error::TimedOut(d)) if d == Duration::from_millis(10)
    ));
}

#[test]
fn test_timeout_alone_does_not_keep_loop_alive() {
    let driver = Driver::new();
    let timeout = TimeoutCancellation::new(&driver, Duration::from_secs(5));

    let start = Instant::now();
    driver.run().unwrap();

    assert!(start.elapsed() < Duration::from_secs(1));
    assert!(!timeout.is_requested());
}

#[test]
fn test_dropped_timeout_releases_its_timer() {
    let driver = Driver::new();

    let timeout = TimeoutCancellation::new(&driver, Duration::from_secs(5));
    assert_eq!(driver.info().delay.enabled, 1);

    drop(timeout);
    assert_eq!(driver.info().delay.enabled, 0);
}

#[test]
fn test_composite_forwards_first_reason() {
    let driver = Driver::new();
    let first = CancellationSource::new(&driver);
    let second = CancellationSource::new(&driver);

    let composite = CompositeCancellation::new(&driver, [first.token(), second.token()]);
    assert!(!composite.is_requested());

    second.cancel(Some(Error::msg("shutdown")));
    first.cancel(Some(Error::msg("too late")));

    driver.run().unwrap();

    match composite.throw_if_requested() {
        Err(Error::Cancelled(cancelled)) => {
            assert_eq!(cancelled.reason().map(ToString::to_string).as_deref(), Some("shutdown"));
        }
        other => panic!("expected a cancellation, got {other:?}"),
    }
}

#[test]
fn test_composite_with_cancelled_token() {
    let driver = Driver::new();
    let done = CancellationSource::new(&driver);
    done.cancel(None);

    let composite =
        CompositeCancellation::new(&driver, [Cancellation::none(), done.token()]);

    assert!(composite.is_requested(), "Should be cancelled without a tick");
}

#[test]
fn test_delay_interrupted_by_cancellation() {
    let driver = Driver::new();
    let source = CancellationSource::new(&driver);
    let token = source.token();

    driver.delay(Duration::from_millis(5), move |_, _| {
        source.cancel(None);
        Ok(())
    });

    let start = Instant::now();
    let result = driver.block_on({
        let driver = driver.clone();
        async move { time::delay(&driver, Duration::from_secs(10), Some(&token)).await }
    });

    assert!(matches!(result, Err(Error::Cancelled(_))));
    assert!(start.elapsed() < Duration::from_secs(1));
    assert_eq!(driver.info().delay.enabled, 0, "Interrupted delay should be cancelled");
}

#[test]
fn test_delay_already_cancelled() {
    let driver = Driver::new();
    let source = CancellationSource::new(&driver);
    source.cancel(None);

    let token = source.token();
    let result = driver.block_on({
        let driver = driver.clone();
        async move { time::delay(&driver, Duration::from_secs(10), Some(&token)).await }
    });

    assert!(matches!(result, Err(Error::Cancelled(_))));
}
