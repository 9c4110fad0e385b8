//! Pipeline constructors and operators.
//!
//! Every operator runs as a fiber that pulls from its input and awaits each
//! emit into its output, so a chain of operators holds at most one value per
//! stage and backpressure reaches the original producer.

use crate::driver::{Driver, WeakDriver};
use crate::error::Error;
use crate::pipeline::{Pipeline, PipelineSource, channel, channel_on, channel_with_return};

use std::cell::Cell;
use std::rc::Rc;

impl<T: 'static, R: 'static> Pipeline<T, R> {
    /// Runs `producer` as a fiber feeding a new pipeline.
    ///
    /// The pipeline completes with the producer's `Ok` value, or fails with
    /// its error, unless the producer already completed it itself.
    ///
    /// # Example
    /// ```ignore
    /// let lines = Pipeline::generate(&driver, |source| async move {
    ///     for line in ["a", "b"] {
    ///         source.emit(line).await?;
    ///     }
    ///     Ok(())
    /// });
    /// ```
    pub fn generate<F, Fut>(driver: &Driver, producer: F) -> Pipeline<T, R>
    where
        F: FnOnce(PipelineSource<T, R>) -> Fut + 'static,
        Fut: std::future::Future<Output = Result<R, Error>> + 'static,
    {
        let (source, pipeline) = channel_with_return(driver);
        let handle = source.clone();

        driver
            .spawn(async move {
                let result = producer(source).await;

                if !handle.is_complete() {
                    match result {
                        Ok(value) => handle.complete_with(value),
                        Err(error) => handle.fail(error),
                    }
                }

                Ok(())
            })
            .ignore();

        pipeline
    }
}

/// Like [`Pipeline::generate`], for operators that only hold a weak driver.
fn stage<T, F, Fut>(driver: WeakDriver, producer: F) -> Pipeline<T>
where
    T: 'static,
    F: FnOnce(PipelineSource<T>) -> Fut + 'static,
    Fut: std::future::Future<Output = Result<(), Error>> + 'static,
{
    match driver.upgrade() {
        Some(driver) => Pipeline::generate(&driver, producer),
        None => {
            let (source, pipeline) = channel_on(driver);
            source.fail(Error::Unresolved);
            pipeline
        }
    }
}

impl<T: 'static> Pipeline<T> {
    /// A pipeline emitting every item of `iter`, then completing.
    pub fn from_iter<I>(driver: &Driver, iter: I) -> Pipeline<T>
    where
        I: IntoIterator<Item = T> + 'static,
    {
        Pipeline::generate(driver, move |source| async move {
            for value in iter {
                source.emit(value).await?;
            }
            Ok(())
        })
    }

    /// Applies `f` to every value.
    pub fn map<U, F>(self, mut f: F) -> Pipeline<U>
    where
        U: 'static,
        F: FnMut(T) -> U + 'static,
    {
        let driver = self.weak_driver();

        stage(driver, move |source| async move {
            let mut input = self;
            while let Some(value) = input.next().await? {
                source.emit(f(value)).await?;
            }
            Ok(())
        })
    }

    /// Keeps only the values for which `predicate` returns `true`.
    pub fn filter<F>(self, mut predicate: F) -> Pipeline<T>
    where
        F: FnMut(&T) -> bool + 'static,
    {
        let driver = self.weak_driver();

        stage(driver, move |source| async move {
            let mut input = self;
            while let Some(value) = input.next().await? {
                if predicate(&value) {
                    source.emit(value).await?;
                }
            }
            Ok(())
        })
    }

    /// Emits every value of each pipeline in turn.
    pub fn concat<I>(driver: &Driver, pipelines: I) -> Pipeline<T>
    where
        I: IntoIterator<Item = Pipeline<T>>,
    {
        let pipelines: Vec<_> = pipelines.into_iter().collect();

        Pipeline::generate(driver, move |source| async move {
            for mut input in pipelines {
                while let Some(value) = input.next().await? {
                    source.emit(value).await?;
                }
            }
            Ok(())
        })
    }

    /// Emits the values of all pipelines as they arrive.
    ///
    /// Completes once every input completed; fails with the first input
    /// failure.
    pub fn merge<I>(driver: &Driver, pipelines: I) -> Pipeline<T>
    where
        I: IntoIterator<Item = Pipeline<T>>,
    {
        let pipelines: Vec<_> = pipelines.into_iter().collect();
        let (source, merged) = channel(driver);

        if pipelines.is_empty() {
            source.complete();
            return merged;
        }

        let remaining = Rc::new(Cell::new(pipelines.len()));

        for mut input in pipelines {
            let source = source.clone();
            let remaining = remaining.clone();

            driver
                .spawn(async move {
                    loop {
                        if source.is_complete() || source.is_disposed() {
                            break;
                        }

                        match input.next().await {
                            Ok(Some(value)) => {
                                if source.is_complete() || source.emit(value).await.is_err() {
                                    break;
                                }
                            }
                            Ok(None) => break,
                            Err(error) => {
                                if !source.is_complete() {
                                    source.fail(error);
                                }
                                break;
                            }
                        }
                    }

                    remaining.set(remaining.get() - 1);
                    if remaining.get() == 0 && !source.is_complete() {
                        source.complete();
                    }

                    Ok(())
                })
                .ignore();
        }

        merged
    }

    /// Collects every remaining value.
    ///
    /// # Errors
    /// The pipeline's failure.
    pub async fn collect(mut self) -> Result<Vec<T>, Error> {
        let mut values = Vec::new();

        while let Some(value) = self.next().await? {
            values.push(value);
        }

        Ok(values)
    }
}
