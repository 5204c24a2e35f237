//! Retrying transport failures around any [`RangeFetcher`].
//!
//! The engine itself never retries. Wrap a backend in [`RetryReader`] to retry fetches that fail
//! with a transport error; bounds, configuration and request errors are returned immediately.

use std::ops::Range;
use std::time::Duration;

use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt};
use log::warn;

use crate::error::RangeReaderResult;
use crate::reader::RangeFetcher;

/// Default number of attempts, including the first.
pub const DEFAULT_MAX_ATTEMPTS: usize = 3;

/// Default delay before the first retry. Later retries wait proportionally longer.
pub const DEFAULT_BACKOFF: Duration = Duration::from_millis(100);

/// A [`RangeFetcher`] decorator that retries transport failures with linear backoff.
#[derive(Debug)]
pub struct RetryReader<F: RangeFetcher> {
    inner: F,
    max_attempts: usize,
    backoff: Duration,
}

impl<F: RangeFetcher> RetryReader<F> {
    /// Wrap `inner` with the default policy.
    pub fn new(inner: F) -> Self {
        Self {
            inner,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: DEFAULT_BACKOFF,
        }
    }

    /// Total attempts per fetch, including the first. Values below one are treated as one.
    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Delay before the first retry.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// The wrapped fetcher.
    pub fn inner(&self) -> &F {
        &self.inner
    }

    async fn fetch_with_retry(&self, range: Range<u64>) -> RangeReaderResult<Bytes> {
        let mut attempt = 1;
        loop {
            match self.inner.fetch(range.clone()).await {
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    warn!(
                        "fetch of {range:?} failed (attempt {attempt}/{}): {e}",
                        self.max_attempts
                    );
                    tokio::time::sleep(self.backoff * attempt as u32).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

impl<F: RangeFetcher> RangeFetcher for RetryReader<F> {
    fn fetch(&self, range: Range<u64>) -> BoxFuture<'_, RangeReaderResult<Bytes>> {
        self.fetch_with_retry(range).boxed()
    }
}
