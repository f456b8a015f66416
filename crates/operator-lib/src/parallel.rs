//! Concurrent fan-out with first-error join
//!
//! All launched units are driven to completion before returning, even when
//! one of them fails early, so no in-flight work is abandoned.

use futures::future::{join_all, BoxFuture};
use std::future::Future;

/// Run every unit concurrently and return the first error in argument order
pub async fn run_first_err<'a, E>(units: Vec<BoxFuture<'a, Result<(), E>>>) -> Result<(), E> {
    join_all(units)
        .await
        .into_iter()
        .find_map(Result::err)
        .map_or(Ok(()), Err)
}

/// Run two fallible futures concurrently, keeping both outputs
pub async fn join_first_err<A, B, E, FA, FB>(a: FA, b: FB) -> Result<(A, B), E>
where
    FA: Future<Output = Result<A, E>>,
    FB: Future<Output = Result<B, E>>,
{
    let (a, b) = tokio::join!(a, b);
    Ok((a?, b?))
}
