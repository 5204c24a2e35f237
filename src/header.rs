use std::ops::Range;

use bytes::Bytes;
use log::debug;
use tokio::sync::OnceCell;

use crate::error::RangeReaderResult;

/// Buffering for the first `N` bytes of an object.
///
/// The header is fetched at most once, even when several callers ask for it concurrently:
/// later callers wait for the first fetch and then share its bytes. A failed fetch leaves the
/// cache empty so that the next caller tries again.
#[derive(Debug)]
pub(crate) struct HeaderCache {
    length: u64,
    buffer: OnceCell<Bytes>,
}

impl HeaderCache {
    pub(crate) fn new(length: u64) -> Self {
        Self {
            length,
            buffer: OnceCell::new(),
        }
    }

    /// Return the cached header, running `fetch` for `0..length` if it is not cached yet.
    pub(crate) async fn get_or_fetch<F, Fut>(&self, fetch: F) -> RangeReaderResult<Bytes>
    where
        F: FnOnce(Range<u64>) -> Fut,
        Fut: std::future::Future<Output = RangeReaderResult<Bytes>>,
    {
        let buffer = self
            .buffer
            .get_or_try_init(|| async {
                debug!("fetching {} header bytes", self.length);
                fetch(0..self.length).await
            })
            .await?;
        Ok(buffer.clone())
    }

    /// Serve `range` from the cached header, if the header is cached and contains all of it.
    pub(crate) fn serve(&self, range: &Range<u64>) -> Option<Bytes> {
        let buffer = self.buffer.get()?;
        if range.start < range.end && range.end <= buffer.len() as u64 {
            Some(buffer.slice(range.start as usize..range.end as usize))
        } else {
            None
        }
    }
}
