use std::future::Future;
use std::time::Duration;

use log::warn;
use tokio_util::sync::CancellationToken;

/// Delays before each download attempt; five attempts in total.
pub const DEFAULT_RETRY_DELAYS_SECS: [u64; 5] = [0, 2, 5, 10, 20];

/// Errors that may succeed when the same request is repeated.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

impl Transient for wuintegrate_model::CatalogError {
    fn is_transient(&self) -> bool {
        !matches!(self, Self::Cancelled { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    delays: Vec<Duration>,
}

impl RetryPolicy {
    /// One attempt per entry, each preceded by its delay. An empty list
    /// still makes a single immediate attempt.
    #[must_use]
    pub fn new(delays: Vec<Duration>) -> Self {
        if delays.is_empty() {
            return Self {
                delays: vec![Duration::ZERO],
            };
        }
        Self { delays }
    }

    #[must_use]
    pub fn from_secs(delays: &[u64]) -> Self {
        Self::new(delays.iter().copied().map(Duration::from_secs).collect())
    }

    /// `attempts` attempts with no delay between them.
    #[must_use]
    pub fn immediate(attempts: usize) -> Self {
        Self::new(vec![Duration::ZERO; attempts.max(1)])
    }

    #[must_use]
    pub fn attempts(&self) -> usize {
        self.delays.len()
    }

    /// Run `attempt` until it succeeds, fails with a non-transient error, or
    /// the attempts are used up. Cancellation cuts a pending delay short; the
    /// attempt itself is expected to observe the token and fail fast.
    pub async fn run<T, E, F, Fut>(&self, cancel: &CancellationToken, mut attempt: F) -> Result<T, E>
    where
        E: Transient + std::fmt::Display,
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let total = self.delays.len();
        let (final_delay, earlier) = self
            .delays
            .split_last()
            .map_or((Duration::ZERO, &[][..]), |(last, rest)| (*last, rest));

        for (index, delay) in earlier.iter().enumerate() {
            pause(*delay, cancel).await;
            match attempt(index + 1).await {
                Err(error) if error.is_transient() && !cancel.is_cancelled() => {
                    warn!("Attempt {} of {total} failed: {error}", index + 1);
                }
                result => return result,
            }
        }

        pause(final_delay, cancel).await;
        attempt(total).await
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_secs(&DEFAULT_RETRY_DELAYS_SECS)
    }
}

async fn pause(delay: Duration, cancel: &CancellationToken) {
    if delay.is_zero() {
        return;
    }
    tokio::select! {
        () = cancel.cancelled() => {}
        () = tokio::time::sleep(delay) => {}
    }
}
