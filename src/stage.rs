//! Per-binary fan-out within one pipeline stage.
//!
//! Every item gets its own task. The stage always waits for all of them, even after a
//! failure, so no binary is left half-processed while the next stage starts; the first
//! error seen is surfaced only once the set is drained.

use crate::error::{Error, Result};
use std::future::Future;
use tokio::task::JoinSet;

/// Run `task` for every item concurrently and collect the outputs in input order.
pub async fn run_all<T, O, F, Fut>(items: impl IntoIterator<Item = T>, task: F) -> Result<Vec<O>>
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = Result<O>> + Send + 'static,
    O: Send + 'static,
{
    let mut set = JoinSet::new();
    for (index, item) in items.into_iter().enumerate() {
        let future = task(item);
        set.spawn(async move { (index, future.await) });
    }

    let mut outputs = Vec::with_capacity(set.len());
    let mut first_error: Option<Error> = None;

    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((index, Ok(output))) => outputs.push((index, output)),
            Ok((_, Err(e))) => {
                first_error.get_or_insert(e);
            }
            Err(e) => {
                first_error.get_or_insert(Error::Join(e));
            }
        }
    }

    if let Some(e) = first_error {
        return Err(e);
    }

    outputs.sort_by_key(|(index, _)| *index);
    Ok(outputs.into_iter().map(|(_, output)| output).collect())
}

/// Run `task` for every item and return the items it reported failure for.
///
/// An empty result means the whole stage succeeded.
pub async fn failures<T, F, Fut>(items: impl IntoIterator<Item = T>, task: F) -> Result<Vec<T>>
where
    T: Clone + Send + 'static,
    F: Fn(T) -> Fut,
    Fut: Future<Output = Result<bool>> + Send + 'static,
{
    let outcomes = run_all(items, |item: T| {
        let future = task(item.clone());
        async move { Ok((item, future.await?)) }
    })
    .await?;

    Ok(outcomes
        .into_iter()
        .filter_map(|(item, ok)| (!ok).then_some(item))
        .collect())
}
