use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("deadline of {}ms exceeded", .after.as_millis())]
pub struct DeadlineExceeded {
    pub after: Duration,
}

/// Races `operation` against `duration`.
///
/// When the deadline wins the operation future is dropped, so an in-flight
/// upstream request is aborted rather than left running in the background.
pub async fn with_deadline<F>(duration: Duration, operation: F) -> Result<F::Output, DeadlineExceeded>
where
    F: Future,
{
    tokio::time::timeout(duration, operation)
        .await
        .map_err(|_| DeadlineExceeded { after: duration })
}
