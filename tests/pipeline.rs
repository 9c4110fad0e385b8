use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use tickloop::pipeline::{channel, channel_with_return};
use tickloop::{Driver, Error, Pipeline};

#[test]
fn test_emit_waits_for_consumer() {
    let driver = Driver::new();
    let (source, mut pipeline) = channel(&driver);
    let log = Rc::new(RefCell::new(Vec::new()));

    let producer_log = log.clone();
    driver
        .spawn(async move {
            producer_log.borrow_mut().push("emit 1".to_string());
            source.emit(1).await?;
            producer_log.borrow_mut().push("resumed 1".to_string());
            source.emit(2).await?;
            producer_log.borrow_mut().push("resumed 2".to_string());
            source.complete();
            Ok(())
        })
        .ignore();

    let consumer_log = log.clone();
    let values = driver
        .block_on({
            let driver = driver.clone();
            async move {
                let mut values = Vec::new();
                loop {
                    driver.sleep(Duration::from_millis(10)).await?;
                    consumer_log.borrow_mut().push("pull".to_string());
                    match pipeline.next().await? {
                        Some(value) => values.push(value),
                        None => break,
                    }
                }
                Ok(values)
            }
        })
        .unwrap();

    assert_eq!(values, vec![1, 2]);
    assert_eq!(
        log.borrow()[..5],
        ["emit 1", "pull", "resumed 1", "pull", "resumed 2"]
    );
}

#[test]
fn test_end_marker_after_last_value() {
    let driver = Driver::new();
    let mut pipeline = Pipeline::from_iter(&driver, 1..=10);

    let pulled = driver
        .block_on(async move {
            let mut pulled = Vec::new();
            for _ in 0..11 {
                pulled.push(pipeline.next().await?);
            }
            Ok(pulled)
        })
        .unwrap();

    let expected: Vec<Option<i32>> = (1..=10).map(Some).chain([None]).collect();
    assert_eq!(pulled, expected);
}

#[test]
fn test_dispose_releases_producer() {
    let driver = Driver::new();
    let (source, mut pipeline) = channel(&driver);

    let producer = driver.spawn(async move {
        source.emit("first").await?;
        source.emit("second").await?;
        Ok(())
    });

    let first = driver
        .block_on(async move {
            let first = pipeline.next().await?;
            pipeline.dispose();
            assert!(pipeline.is_disposed());
            assert!(matches!(pipeline.next().await, Err(Error::Disposed)));
            Ok(first)
        })
        .unwrap();
    assert_eq!(first, Some("first"));

    let released = driver.block_on(async move { producer.await });
    assert!(matches!(released, Err(Error::Disposed)));
}

#[test]
fn test_emit_after_dispose_fails() {
    let driver = Driver::new();
    let (source, pipeline) = channel(&driver);

    drop(pipeline);

    assert!(source.is_disposed());
    let result = driver.block_on(async move { source.emit(1).await });
    assert!(matches!(result, Err(Error::Disposed)));
}

#[test]
fn test_dropped_source_fails_pipeline() {
    let driver = Driver::new();
    let (source, mut pipeline) = channel::<i32>(&driver);

    drop(source);

    let result = driver.block_on(async move { pipeline.next().await });
    assert!(matches!(result, Err(Error::SourceDropped)));
}

#[test]
fn test_failure_is_repeated() {
    let driver = Driver::new();
    let (source, mut pipeline) = channel::<i32>(&driver);

    source.emit(1).ignore();
    source.fail(Error::msg("broken"));
    assert!(source.is_complete());

    let results = driver
        .block_on(async move {
            let mut results = Vec::new();
            for _ in 0..3 {
                results.push(pipeline.next().await.map_err(|e| e.to_string()));
            }
            Ok(results)
        })
        .unwrap();

    assert_eq!(
        results,
        vec![
            Ok(Some(1)),
            Err("broken".to_string()),
            Err("broken".to_string())
        ]
    );
}

#[test]
#[should_panic(expected = "completed pipeline")]
fn test_emit_after_complete_panics() {
    let driver = Driver::new();
    let (source, _pipeline) = channel(&driver);

    source.complete();
    source.emit(1).ignore();
}

#[test]
#[should_panic(expected = "already been completed")]
fn test_complete_twice_panics() {
    let driver = Driver::new();
    let (source, _pipeline) = channel::<i32>(&driver);

    source.complete();
    source.fail(Error::msg("again"));
}

#[test]
fn test_return_value() {
    let driver = Driver::new();
    let (source, mut pipeline) = channel_with_return::<i32, &'static str>(&driver);

    source.emit(7).ignore();
    source.complete_with("summary");

    let (values, returned) = driver
        .block_on(async move {
            let mut values = Vec::new();
            while let Some(value) = pipeline.next().await? {
                values.push(value);
            }
            Ok((values, pipeline.get_return()))
        })
        .unwrap();

    assert_eq!(values, vec![7]);
    assert_eq!(returned, Some("summary"));
}

#[test]
fn test_generate_completes_with_producer_result() {
    let driver = Driver::new();
    let pipeline: Pipeline<u32, u32> = Pipeline::generate(&driver, |source| async move {
        let mut sum = 0;
        for n in 1..=4 {
            source.emit(n).await?;
            sum += n;
        }
        Ok(sum)
    });

    let (values, sum) = driver
        .block_on(async move {
            let mut pipeline = pipeline;
            let mut values = Vec::new();
            while let Some(value) = pipeline.next().await? {
                values.push(value);
            }
            Ok((values, pipeline.get_return()))
        })
        .unwrap();

    assert_eq!(values, vec![1, 2, 3, 4]);
    assert_eq!(sum, Some(10));
}

#[test]
fn test_generate_propagates_producer_error() {
    let driver = Driver::new();
    let pipeline: Pipeline<u32> = Pipeline::generate(&driver, |source| async move {
        source.emit(1).await?;
        Err(Error::msg("producer failed"))
    });

    let err = driver.block_on(pipeline.collect()).unwrap_err();

    assert_eq!(err.to_string(), "producer failed");
}

#[test]
fn test_map_and_filter() {
    let driver = Driver::new();

    let evens = Pipeline::from_iter(&driver, 1..=10)
        .filter(|n| n % 2 == 0)
        .map(|n| n * 10);

    let values = driver.block_on(evens.collect()).unwrap();

    assert_eq!(values, vec![20, 40, 60, 80, 100]);
}

#[test]
fn test_concat_preserves_order() {
    let driver = Driver::new();

    let joined = Pipeline::concat(
        &driver,
        [
            Pipeline::from_iter(&driver, vec!["a", "b"]),
            Pipeline::from_iter(&driver, vec!["c"]),
        ],
    );

    let values = driver.block_on(joined.collect()).unwrap();

    assert_eq!(values, vec!["a", "b", "c"]);
}

#[test]
fn test_merge_emits_every_value() {
    let driver = Driver::new();

    let merged = Pipeline::merge(
        &driver,
        [
            Pipeline::from_iter(&driver, vec![1, 3, 5]),
            Pipeline::from_iter(&driver, vec![2, 4, 6]),
        ],
    );

    let mut values = driver.block_on(merged.collect()).unwrap();
    values.sort();

    assert_eq!(values, vec![1, 2, 3, 4, 5, 6]);

    let empty = Pipeline::<i32>::merge(&driver, []);
    assert_eq!(driver.block_on(empty.collect()).unwrap(), Vec::<i32>::new());
}

#[test]
fn test_merge_fails_with_first_input_error() {
    let driver = Driver::new();
    let (failing, failed) = channel::<i32>(&driver);
    failing.fail(Error::msg("input failed"));

    let merged = Pipeline::merge(&driver, [Pipeline::from_iter(&driver, vec![1]), failed]);

    let err = driver.block_on(merged.collect()).unwrap_err();
    assert_eq!(err.to_string(), "input failed");
}

#[test]
fn test_stream_adapter() {
    let driver = Driver::new();
    let (source, pipeline) = channel::<i32>(&driver);

    source.emit(1).ignore();
    source.emit(2).ignore();
    source.fail(Error::msg("end"));

    let items = driver
        .block_on(async move { Ok(StreamExt::collect::<Vec<_>>(pipeline).await) })
        .unwrap();

    assert_eq!(items.len(), 3, "The error is yielded once, then the stream ends");
    assert!(matches!(items[0], Ok(1)));
    assert!(matches!(items[1], Ok(2)));
    assert!(items[2].is_err());
}

#[test]
fn test_producer_and_consumer_delays_add_up() {
    let driver = Driver::new();
    let delays = [500, 1500, 1000, 2000];

    let mut pipeline: Pipeline<u32> = Pipeline::generate(&driver, {
        let driver = driver.clone();
        move |source| async move {
            for n in 1..=10u32 {
                if let Some(ms) = delays.get(n as usize - 1) {
                    driver.sleep(Duration::from_millis(*ms)).await?;
                }
                source.emit(n).await?;
            }
            Ok(())
        }
    });

    let start = Instant::now();
    let values = driver
        .block_on({
            let driver = driver.clone();
            async move {
                let mut values = Vec::new();
                while let Some(value) = pipeline.next().await? {
                    values.push(value);
                    driver.sleep(Duration::from_millis(100)).await?;
                }
                Ok(values)
            }
        })
        .unwrap();
    let elapsed = start.elapsed();

    assert_eq!(values, (1..=10).collect::<Vec<_>>());
    assert!(elapsed >= Duration::from_millis(5000), "Finished too early: {elapsed:?}");
    assert!(
        elapsed < Duration::from_millis(7000),
        "Delays should overlap, took {elapsed:?}"
    );
}
