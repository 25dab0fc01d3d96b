//! Bounded parallelism and per-call timeouts.

use std::future::Future;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use preview_fleet_provider::ProviderError;

/// Run a provider call, abandoning it after `limit`.
///
/// # Errors
///
/// Returns the call's own error, or `ProviderError::Timeout` naming `operation`.
pub async fn with_timeout<T, F>(limit: Duration, operation: &str, call: F) -> Result<T, ProviderError>
where
    F: Future<Output = Result<T, ProviderError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(%operation, timeout_secs = limit.as_secs(), "Provider call timed out");
            Err(ProviderError::Timeout(format!(
                "{operation} after {}s",
                limit.as_secs()
            )))
        }
    }
}

/// Apply `task` to every item with at most `concurrency` in flight.
///
/// Results come back in completion order.
pub async fn run_bounded<I, F, Fut>(items: I, concurrency: usize, task: F) -> Vec<Fut::Output>
where
    I: IntoIterator,
    F: FnMut(I::Item) -> Fut,
    Fut: Future,
{
    stream::iter(items)
        .map(task)
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn timeout_abandons_slow_call() {
        let result: Result<(), _> = with_timeout(Duration::from_secs(1), "deploy worker", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        match result {
            Err(ProviderError::Timeout(msg)) => assert_eq!(msg, "deploy worker after 1s"),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn fast_call_passes_through() {
        let result = with_timeout(Duration::from_secs(1), "list workers", async {
            Ok::<_, ProviderError>(3)
        })
        .await;
        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn run_bounded_caps_concurrency() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let results = run_bounded(0..10, 3, |i| {
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                i * 2
            }
        })
        .await;

        assert_eq!(results.len(), 10);
        assert_eq!(results.iter().sum::<i32>(), 90);
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }
}
