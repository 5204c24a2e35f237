#![allow(dead_code)]

use std::collections::HashSet;
use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_range_reader::config::{ReaderOptions, ResolvedConfig};
use async_range_reader::endpoint::EndpointDescriptor;
use async_range_reader::error::{RangeReaderError, RangeReaderResult};
use async_range_reader::reader::RangeFetcher;
use async_range_reader::RangeReader;
use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt};
use url::Url;

pub(crate) const TEST_URL: &str = "https://example.com/data/object.tif";

/// Deterministic, never-zero content for byte `i`.
pub(crate) fn byte_at(i: u64) -> u8 {
    (i % 251) as u8 + 1
}

/// An in-memory object that records every fetch it serves.
#[derive(Debug)]
pub(crate) struct MemoryReader {
    data: Bytes,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    fetched: Mutex<Vec<Range<u64>>>,
    failing: HashSet<u64>,
    delay: Duration,
}

impl MemoryReader {
    pub(crate) fn new(len: u64) -> Self {
        Self {
            data: (0..len).map(byte_at).collect::<Vec<_>>().into(),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            fetched: Mutex::new(Vec::new()),
            failing: HashSet::new(),
            delay: Duration::ZERO,
        }
    }

    /// Fail every fetch whose range starts at `start`.
    pub(crate) fn failing_at(mut self, start: u64) -> Self {
        self.failing.insert(start);
        self
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn fetched(&self) -> Vec<Range<u64>> {
        let mut fetched = self.fetched.lock().unwrap().clone();
        fetched.sort_by_key(|r| r.start);
        fetched
    }

    pub(crate) fn expected(&self, range: Range<u64>) -> Bytes {
        self.data.slice(range.start as usize..range.end as usize)
    }
}

impl RangeFetcher for MemoryReader {
    fn fetch(&self, range: Range<u64>) -> BoxFuture<'_, RangeReaderResult<Bytes>> {
        async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.fetched.lock().unwrap().push(range.clone());
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.failing.contains(&range.start) {
                return Err(RangeReaderError::UnexpectedStatus(503));
            }
            if range.end > self.data.len() as u64 {
                return Err(RangeReaderError::OutOfBounds {
                    range,
                    length: Some(self.data.len() as u64),
                });
            }
            Ok(self.expected(range))
        }
        .boxed()
    }
}

pub(crate) fn config(options: ReaderOptions) -> ResolvedConfig {
    let endpoint = EndpointDescriptor::parse(TEST_URL).unwrap();
    options.resolve(&endpoint).unwrap()
}

pub(crate) fn reader_over(memory: Arc<MemoryReader>, options: ReaderOptions) -> RangeReader {
    RangeReader::new(memory, Url::parse(TEST_URL).unwrap(), config(options))
}
