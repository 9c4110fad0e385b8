//! Completion-order combinators.
//!
//! Each combinator drains a [`FutureIterator`] over its inputs, so results are
//! observed in the order the futures resolve. Futures resolving in the same
//! tick are observed in the order they were passed in. Indices in the results
//! refer to positions in the input.
//!
//! Every combinator takes an optional [`Cancellation`]; requesting it aborts
//! the wait with [`Error::Cancelled`] but leaves the input futures running.

use crate::cancellation::Cancellation;
use crate::error::{CompositeError, Error};
use crate::future::{Future, FutureIterator};

/// Resolves with the first future to resolve, whether it succeeded or failed.
///
/// # Errors
/// The first future's error, or [`Error::TooFewFutures`] for an empty input.
pub async fn first<T, I>(futures: I, cancellation: Option<&Cancellation>) -> Result<T, Error>
where
    T: Clone + 'static,
    I: IntoIterator<Item = Future<T>>,
{
    let iterator = Future::iterate(futures);

    match iterator.consume(cancellation).await? {
        Some((_, future)) => future.await,
        None => Err(Error::TooFewFutures {
            required: 1,
            available: 0,
        }),
    }
}

/// Resolves with the first successful value; fails only if every future
/// fails.
///
/// # Errors
/// [`Error::Composite`] with every error when all futures fail;
/// [`Error::TooFewFutures`] for an empty input.
///
/// # Example
/// ```ignore
/// let fastest = any([primary, mirror], None).await?;
/// ```
pub async fn any<T, I>(futures: I, cancellation: Option<&Cancellation>) -> Result<T, Error>
where
    T: Clone + 'static,
    I: IntoIterator<Item = Future<T>>,
{
    let mut values = some(1, futures, cancellation).await?;

    match values.pop() {
        Some((_, value)) => Ok(value),
        None => Err(Error::TooFewFutures {
            required: 1,
            available: 0,
        }),
    }
}

/// Resolves once `count` futures succeeded, with their indices and values
/// in completion order.
///
/// A `count` of zero resolves immediately with no values.
///
/// # Errors
/// [`Error::TooFewFutures`] when fewer than `count` futures are given;
/// [`Error::Composite`] with every observed error as soon as so many failed
/// that `count` successes are out of reach.
pub async fn some<T, I>(
    count: usize,
    futures: I,
    cancellation: Option<&Cancellation>,
) -> Result<Vec<(usize, T)>, Error>
where
    T: Clone + 'static,
    I: IntoIterator<Item = Future<T>>,
{
    if count == 0 {
        return Ok(Vec::new());
    }

    let futures: Vec<_> = futures.into_iter().collect();
    let total = futures.len();

    if total < count {
        return Err(Error::TooFewFutures {
            required: count,
            available: total,
        });
    }

    let iterator = Future::iterate(futures);
    let mut values = Vec::with_capacity(count);
    let mut errors = Vec::new();

    while let Some((index, future)) = iterator.consume(cancellation).await? {
        match future.await {
            Ok(value) => {
                values.push((index, value));
                if values.len() == count {
                    return Ok(values);
                }
            }
            Err(error) => {
                errors.push((index, error));
                if total - errors.len() < count {
                    break;
                }
            }
        }
    }

    Err(CompositeError::new(errors).into())
}

/// Resolves with every value, in input order.
///
/// # Errors
/// The error of the first future to fail, as soon as it fails.
pub async fn all<T, I>(futures: I, cancellation: Option<&Cancellation>) -> Result<Vec<T>, Error>
where
    T: Clone + 'static,
    I: IntoIterator<Item = Future<T>>,
{
    let futures: Vec<_> = futures.into_iter().collect();
    let mut values: Vec<Option<T>> = (0..futures.len()).map(|_| None).collect();

    let iterator = Future::iterate(futures);
    while let Some((index, future)) = iterator.consume(cancellation).await? {
        values[index] = Some(future.await?);
    }

    Ok(values.into_iter().flatten().collect())
}

/// Waits for every future and returns the failures and the successes
/// separately, each with input indices, in completion order.
///
/// Never fails because an input failed; only cancellation ends it early.
pub async fn settle<T, I>(
    futures: I,
    cancellation: Option<&Cancellation>,
) -> Result<(Vec<(usize, Error)>, Vec<(usize, T)>), Error>
where
    T: Clone + 'static,
    I: IntoIterator<Item = Future<T>>,
{
    let iterator: FutureIterator<usize, T> = Future::iterate(futures);
    let mut errors = Vec::new();
    let mut values = Vec::new();

    while let Some((index, future)) = iterator.consume(cancellation).await? {
        match future.await {
            Ok(value) => values.push((index, value)),
            Err(error) => errors.push((index, error)),
        }
    }

    Ok((errors, values))
}
