use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::{Duration, Instant};

use tickloop::{Driver, Error, WatcherCount, WatcherId};

type Log = Rc<RefCell<Vec<&'static str>>>;

fn log() -> Log {
    Rc::new(RefCell::new(Vec::new()))
}

#[test]
fn test_defers_run_in_registration_order() {
    let driver = Driver::new();
    let order = log();

    for name in ["a", "b", "c"] {
        let order = order.clone();
        driver.defer(move |_, _| {
            order.borrow_mut().push(name);
            Ok(())
        });
    }

    driver.run().unwrap();

    assert_eq!(*order.borrow(), vec!["a", "b", "c"]);
}

#[test]
fn test_watcher_created_during_tick_runs_next_tick() {
    let driver = Driver::new();
    let order = log();

    let first = order.clone();
    driver.defer(move |driver, _| {
        first.borrow_mut().push("a");

        let nested = first.clone();
        driver.defer(move |_, _| {
            nested.borrow_mut().push("c");
            Ok(())
        });
        Ok(())
    });

    let second = order.clone();
    driver.defer(move |_, _| {
        second.borrow_mut().push("b");
        Ok(())
    });

    driver.run().unwrap();

    assert_eq!(
        *order.borrow(),
        vec!["a", "b", "c"],
        "A defer registered during a tick must wait for the next tick"
    );
}

fn reschedule(driver: &Driver, count: Rc<Cell<u32>>) {
    driver.defer(move |driver, _| {
        count.set(count.get() + 1);
        reschedule(driver, count);
        Ok(())
    });
}

#[test]
fn test_self_rescheduling_defer_does_not_starve_timers() {
    let driver = Driver::new();
    let count = Rc::new(Cell::new(0));

    reschedule(&driver, count.clone());
    driver.delay(Duration::ZERO, |driver, _| {
        driver.stop();
        Ok(())
    });

    driver.run().unwrap();

    assert!(
        count.get() <= 2,
        "Timer should fire within the first ticks, defer ran {} times",
        count.get()
    );
}

#[test]
fn test_timers_fire_in_expiration_order() {
    let driver = Driver::new();
    let order = log();

    for (name, ms) in [("slow", 30), ("fast", 10), ("mid", 20)] {
        let order = order.clone();
        driver.delay(Duration::from_millis(ms), move |_, _| {
            order.borrow_mut().push(name);
            Ok(())
        });
    }

    driver.run().unwrap();

    assert_eq!(*order.borrow(), vec!["fast", "mid", "slow"]);
}

#[test]
fn test_repeat_fires_until_cancelled() {
    let driver = Driver::new();
    let count = Rc::new(Cell::new(0));

    let counter = count.clone();
    driver.repeat(Duration::from_millis(2), move |driver, id| {
        counter.set(counter.get() + 1);
        if counter.get() == 3 {
            driver.cancel(id);
        }
        Ok(())
    });

    driver.run().unwrap();

    assert_eq!(count.get(), 3);
    assert_eq!(driver.info().repeat, WatcherCount::default());
}

#[test]
fn test_unreferenced_repeat_does_not_keep_loop_alive() {
    let driver = Driver::new();
    let count = Rc::new(Cell::new(0));

    let counter = count.clone();
    let id = driver.repeat(Duration::from_millis(1), move |_, _| {
        counter.set(counter.get() + 1);
        Ok(())
    });
    driver.unreference(id).unwrap();

    driver.delay(Duration::from_millis(20), |_, _| Ok(()));

    let start = Instant::now();
    driver.run().unwrap();

    assert!(count.get() > 0, "Repeat should run while the delay is pending");
    assert!(start.elapsed() < Duration::from_secs(1));

    // Nothing referenced is left.
    let calls = count.get();
    driver.run().unwrap();
    assert_eq!(count.get(), calls);
}

#[test]
fn test_enable_restarts_timer_delay() {
    let driver = Driver::new();
    let fired = Rc::new(Cell::new(None));

    let start = Instant::now();
    let record = fired.clone();
    let timer = driver.delay(Duration::from_millis(20), move |_, _| {
        record.set(Some(start.elapsed()));
        Ok(())
    });
    driver.disable(timer);

    driver.delay(Duration::from_millis(30), move |driver, _| driver.enable(timer));

    driver.run().unwrap();

    let elapsed = fired.get().expect("re-enabled timer should fire");
    assert!(
        elapsed >= Duration::from_millis(50),
        "Delay should restart when enabled, fired after {elapsed:?}"
    );
}

#[test]
fn test_disabled_watcher_does_not_fire() {
    let driver = Driver::new();
    let fired = Rc::new(Cell::new(false));

    let record = fired.clone();
    let id = driver.defer(move |_, _| {
        record.set(true);
        Ok(())
    });
    driver.disable(id);

    driver.run().unwrap();

    assert!(!fired.get());
    assert_eq!(driver.info().defer, WatcherCount { enabled: 0, disabled: 1 });
}

#[test]
fn test_invalid_watcher_identifiers() {
    let driver = Driver::new();

    let id = driver.delay(Duration::from_secs(1), |_, _| Ok(()));
    driver.cancel(id);

    assert!(matches!(driver.enable(id), Err(Error::InvalidWatcher(w)) if w == id));
    assert!(matches!(driver.reference(id), Err(Error::InvalidWatcher(_))));
    assert!(driver.unreference(id).is_ok());

    // Cancelling or disabling twice is harmless.
    driver.cancel(id);
    driver.disable(id);

    let never = WatcherId::from_raw(10_000);
    assert!(matches!(driver.unreference(never), Err(Error::InvalidWatcher(_))));
    assert!(matches!(driver.enable(never), Err(Error::InvalidWatcher(_))));
}

#[test]
fn test_stop_ends_run() {
    let driver = Driver::new();
    let count = Rc::new(Cell::new(0));

    // No-op outside of `run`.
    driver.stop();

    let counter = count.clone();
    driver.repeat(Duration::from_millis(1), move |driver, _| {
        counter.set(counter.get() + 1);
        if counter.get() == 3 {
            driver.stop();
        }
        Ok(())
    });

    driver.run().unwrap();

    assert_eq!(count.get(), 3);
    assert!(!driver.is_running());
    assert_eq!(driver.info().repeat.enabled, 1);
}

#[test]
#[should_panic(expected = "already running")]
fn test_run_while_running_panics() {
    let driver = Driver::new();

    driver.defer(|driver, _| {
        let _ = driver.run();
        Ok(())
    });

    let _ = driver.run();
}

#[test]
fn test_callback_error_without_handler_stops_run() {
    let driver = Driver::new();
    let later = Rc::new(Cell::new(false));

    driver.defer(|_, _| Err(Error::msg("boom")));

    let record = later.clone();
    driver.delay(Duration::from_millis(5), move |_, _| {
        record.set(true);
        Ok(())
    });

    let err = driver.run().unwrap_err();
    assert_eq!(err.to_string(), "boom");
    assert!(!later.get());

    // The loop can be resumed.
    driver.run().unwrap();
    assert!(later.get());
}

#[test]
fn test_error_handler_receives_callback_errors() {
    let driver = Driver::new();
    let seen = Rc::new(RefCell::new(Vec::new()));

    let record = seen.clone();
    let previous = driver.set_error_handler(Some(Box::new(move |_, err| {
        record.borrow_mut().push(err.to_string());
        Ok(())
    })));
    assert!(previous.is_none());

    driver.defer(|_, _| Err(Error::msg("first")));
    driver.delay(Duration::from_millis(1), |_, _| Err(Error::msg("second")));

    driver.run().unwrap();

    assert_eq!(*seen.borrow(), vec!["first".to_string(), "second".to_string()]);
    assert!(driver.set_error_handler(None).is_some());
}

#[test]
fn test_failing_error_handler_stops_run() {
    let driver = Driver::new();

    driver.set_error_handler(Some(Box::new(|_, err| {
        Err(Error::msg(format!("handler saw: {err}")))
    })));
    driver.defer(|_, _| Err(Error::msg("boom")));

    let err = driver.run().unwrap_err();
    assert_eq!(err.to_string(), "handler saw: boom");
}

#[test]
fn test_info_counts_watchers() {
    let driver = Driver::new();

    driver.defer(|_, _| Ok(()));
    let timer = driver.delay(Duration::from_secs(1), |_, _| Ok(()));
    driver.disable(timer);
    let repeat = driver.repeat(Duration::from_secs(1), |_, _| Ok(()));
    driver.unreference(repeat).unwrap();

    let info = driver.info();
    assert_eq!(info.defer, WatcherCount { enabled: 1, disabled: 0 });
    assert_eq!(info.delay, WatcherCount { enabled: 0, disabled: 1 });
    assert_eq!(info.repeat, WatcherCount { enabled: 1, disabled: 0 });
    assert_eq!(info.on_readable, WatcherCount::default());
    assert_eq!(info.referenced, 1);
    assert_eq!(info.unreferenced, 1);
    assert!(!info.running);

    let running = Rc::new(Cell::new(false));
    let record = running.clone();
    driver.defer(move |driver, _| {
        record.set(driver.info().running);
        driver.cancel(repeat);
        driver.cancel(timer);
        Ok(())
    });
    driver.run().unwrap();

    assert!(running.get());
}

#[test]
fn test_state_storage() {
    let driver = Driver::new();

    assert!(driver.get_state("hits").is_none());

    driver.set_state("hits", Some(Rc::new(Cell::new(1u32))));
    let hits = driver.state::<Cell<u32>>("hits").unwrap();
    hits.set(hits.get() + 1);

    assert_eq!(driver.state::<Cell<u32>>("hits").unwrap().get(), 2);
    assert!(driver.state::<String>("hits").is_none());

    driver.set_state("hits", None);
    assert!(driver.get_state("hits").is_none());
}

fn pipe() -> (i32, i32) {
    let mut fds = [0i32; 2];
    let res = unsafe { libc::pipe(fds.as_mut_ptr()) };
    assert_eq!(res, 0, "pipe() failed");
    (fds[0], fds[1])
}

#[test]
fn test_readable_watcher_fires_on_pipe_data() {
    let driver = Driver::new();
    let (rfd, wfd) = pipe();
    let received = Rc::new(Cell::new(0));

    let record = received.clone();
    driver.on_readable(rfd, move |driver, id| {
        let mut buf = [0u8; 8];
        let n = unsafe { libc::read(rfd, buf.as_mut_ptr() as *mut _, buf.len()) };
        record.set(n);
        driver.cancel(id);
        Ok(())
    });

    driver.delay(Duration::from_millis(5), move |_, _| {
        let wrote = unsafe { libc::write(wfd, b"hi".as_ptr() as *const _, 2) };
        assert_eq!(wrote, 2);
        Ok(())
    });

    driver.run().unwrap();

    assert_eq!(received.get(), 2);

    unsafe {
        libc::close(rfd);
        libc::close(wfd);
    }
}

#[test]
fn test_writable_watcher_fires_on_empty_pipe() {
    let driver = Driver::new();
    let (rfd, wfd) = pipe();
    let fired = Rc::new(Cell::new(0));

    let record = fired.clone();
    driver.on_writable(wfd, move |driver, id| {
        record.set(record.get() + 1);
        driver.cancel(id);
        Ok(())
    });

    driver.run().unwrap();

    assert_eq!(fired.get(), 1);

    unsafe {
        libc::close(rfd);
        libc::close(wfd);
    }
}

#[test]
fn test_signal_watcher_receives_raised_signal() {
    let driver = Driver::new();
    let received = Rc::new(Cell::new(0));

    let record = received.clone();
    driver
        .on_signal(libc::SIGUSR1, move |driver, id| {
            record.set(record.get() + 1);
            driver.cancel(id);
            Ok(())
        })
        .unwrap();

    driver.defer(|_, _| {
        unsafe {
            libc::raise(libc::SIGUSR1);
        }
        Ok(())
    });

    driver.run().unwrap();

    assert_eq!(received.get(), 1);
    assert_eq!(driver.info().on_signal, WatcherCount::default());
}

/// Watches `signum` once; an unreferenced deadline stops `run` if the signal
/// never arrives.
fn watch_signal_once(driver: &Driver, signum: i32, name: &'static str, seen: &Log) {
    let deadline = driver.delay(Duration::from_secs(2), |driver, _| {
        driver.stop();
        Ok(())
    });
    driver.unreference(deadline).unwrap();

    let record = seen.clone();
    driver
        .on_signal(signum, move |driver, id| {
            record.borrow_mut().push(name);
            driver.cancel(id);
            driver.cancel(deadline);
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_signal_shared_between_drivers() {
    let seen = log();

    // Both drivers receive the same delivery.
    let first = Driver::new();
    let second = Driver::new();
    watch_signal_once(&first, libc::SIGUSR2, "first", &seen);
    watch_signal_once(&second, libc::SIGUSR2, "second", &seen);

    unsafe {
        libc::raise(libc::SIGUSR2);
    }

    first.run().unwrap();
    second.run().unwrap();
    assert_eq!(*seen.borrow(), vec!["first", "second"]);

    // Dropping one driver keeps the handler installed for the other.
    let dropped = Driver::new();
    let kept = Driver::new();
    watch_signal_once(&dropped, libc::SIGUSR2, "dropped", &seen);
    watch_signal_once(&kept, libc::SIGUSR2, "kept", &seen);
    drop(dropped);

    unsafe {
        libc::raise(libc::SIGUSR2);
    }

    kept.run().unwrap();
    assert_eq!(*seen.borrow(), vec!["first", "second", "kept"]);
    assert_eq!(kept.info().on_signal, WatcherCount::default());
}

#[test]
fn test_repeat_fires_once_per_tick_after_slow_callback() {
    let driver = Driver::new();
    let ticks = Rc::new(RefCell::new(Vec::new()));

    let record = ticks.clone();
    driver.repeat(Duration::from_millis(10), move |driver, id| {
        record.borrow_mut().push(driver.now());
        std::thread::sleep(Duration::from_millis(50));
        if record.borrow().len() == 4 {
            driver.cancel(id);
        }
        Ok(())
    });

    driver.run().unwrap();

    let ticks = ticks.borrow();
    assert_eq!(ticks.len(), 4);
    for pair in ticks.windows(2) {
        assert!(
            pair[1] - pair[0] >= Duration::from_millis(50),
            "A late repeat must fire once per tick, not catch up in a burst"
        );
    }
}
