use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::future::{join_all, BoxFuture, FutureExt};
use log::{debug, trace};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use url::Url;

use crate::coalesce::FetchPlan;
use crate::config::{ReaderOptions, ResolvedConfig};
use crate::endpoint::{EndpointDescriptor, Scheme};
use crate::error::{RangeReaderError, RangeReaderResult};
use crate::header::HeaderCache;
use crate::reader::{check_length, LocalFileReader, RangeFetcher};

/// Reads sparse byte windows of one immutable object with as few round trips as possible.
///
/// Requested ranges are coalesced into physical fetches, which run concurrently up to the
/// configured parallelism, each bounded by the configured timeout. Results are handed back
/// addressed by the originally requested ranges.
///
/// ```no_run
/// # async fn example() -> async_range_reader::error::RangeReaderResult<()> {
/// use async_range_reader::config::ReaderOptions;
/// use async_range_reader::RangeReader;
///
/// let reader = RangeReader::open(
///     "s3://sentinel-cogs/sentinel-s2-l2a-cogs/16/T/CR/2025/3/S2A_16TCR_20250322_0_L2A/B02.tif",
///     ReaderOptions::new().with_region("us-west-2"),
/// )
/// .await?;
/// let header = reader.read_header().await?;
/// let tiles = reader.read(&[20_000..21_000, 30_000..31_000]).await?;
/// assert_eq!(tiles[&20_000].len(), 1_000);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct RangeReader {
    context: FetchContext,
    header: Arc<HeaderCache>,
    url: Url,
    endpoint: Option<EndpointDescriptor>,
    config: ResolvedConfig,
}

/// Everything a physical fetch needs. Cheap to clone into spawned tasks.
#[derive(Debug, Clone)]
struct FetchContext {
    fetcher: Arc<dyn RangeFetcher>,
    pool: Arc<Semaphore>,
    timeout: Duration,
}

impl FetchContext {
    async fn fetch_one(&self, range: Range<u64>) -> RangeReaderResult<Bytes> {
        let result = match self.pool.acquire().await {
            Ok(_permit) => {
                trace!("fetching {range:?}");
                match tokio::time::timeout(self.timeout, self.fetcher.fetch(range.clone())).await
                {
                    Ok(result) => result.and_then(|bytes| {
                        check_length(&range, &bytes)?;
                        Ok(bytes)
                    }),
                    Err(_) => Err(RangeReaderError::Timeout(self.timeout)),
                }
            }
            Err(_) => Err(RangeReaderError::General("fetch pool is closed".to_string())),
        };
        result.map_err(|source| RangeReaderError::Fetch {
            range,
            source: Box::new(source),
        })
    }

    /// Fetch all `ranges`, waiting for every fetch to settle before reporting.
    ///
    /// A failure does not cancel sibling fetches; the first failure in range order is returned
    /// once all of them are done.
    async fn fetch_all(&self, ranges: Vec<Range<u64>>) -> RangeReaderResult<Vec<Bytes>> {
        let results = join_all(ranges.into_iter().map(|range| self.fetch_one(range))).await;
        results.into_iter().collect()
    }
}

/// A planned multi-range read, detached from the reader so it can run on its own task.
struct ReadRequest {
    len: usize,
    cached: Vec<(usize, Bytes)>,
    fetch_indices: Vec<usize>,
    plan: FetchPlan,
}

impl ReadRequest {
    fn new(
        ranges: &[Range<u64>],
        header: &HeaderCache,
        merge_distance: u64,
    ) -> RangeReaderResult<Self> {
        if let Some(bad) = ranges.iter().find(|r| r.end <= r.start) {
            return Err(RangeReaderError::EmptyRange(bad.clone()));
        }

        let mut cached = Vec::new();
        let mut fetch_indices = Vec::new();
        let mut to_fetch = Vec::new();
        for (i, range) in ranges.iter().enumerate() {
            match header.serve(range) {
                Some(bytes) => cached.push((i, bytes)),
                None => {
                    fetch_indices.push(i);
                    to_fetch.push(range.clone());
                }
            }
        }

        let plan = FetchPlan::new(&to_fetch, merge_distance)?;
        debug!(
            "read of {} ranges: {} from header, {} physical fetches totalling {} bytes",
            ranges.len(),
            cached.len(),
            plan.physical().len(),
            plan.fetched_bytes()
        );
        Ok(Self {
            len: ranges.len(),
            cached,
            fetch_indices,
            plan,
        })
    }

    async fn execute(self, context: &FetchContext) -> RangeReaderResult<Vec<Bytes>> {
        let buffers = context.fetch_all(self.plan.physical_ranges()).await?;
        let fetched = self.plan.demultiplex(&buffers)?;

        let mut out = vec![Bytes::new(); self.len];
        for (i, bytes) in self.cached {
            out[i] = bytes;
        }
        for (i, bytes) in self.fetch_indices.into_iter().zip(fetched) {
            out[i] = bytes;
        }
        Ok(out)
    }
}

impl RangeReader {
    /// Create a reader over a custom fetcher.
    ///
    /// `url` is what [`url`](Self::url) reports. The reader gets its own fetch pool sized by
    /// `config`; see [`with_fetch_pool`](Self::with_fetch_pool) to share one instead.
    pub fn new(fetcher: Arc<dyn RangeFetcher>, url: Url, config: ResolvedConfig) -> Self {
        let context = FetchContext {
            fetcher,
            pool: Arc::new(Semaphore::new(config.max_parallel_fetches())),
            timeout: config.read_timeout(),
        };
        Self {
            context,
            header: Arc::new(HeaderCache::new(config.header_length())),
            url,
            endpoint: None,
            config,
        }
    }

    /// Open a reader for a location string.
    ///
    /// Out-of-band credentials in `options` replace credentials embedded in `location`.
    /// Malformed locations and unresolved settings fail here, before any network I/O.
    pub async fn open(location: &str, options: ReaderOptions) -> RangeReaderResult<Self> {
        let mut endpoint = EndpointDescriptor::parse(location)?;
        if let Some(credentials) = options.credentials() {
            endpoint = endpoint.with_credentials(credentials.clone());
        }
        Self::open_endpoint(endpoint, options).await
    }

    /// Open a reader for an already parsed endpoint.
    pub async fn open_endpoint(
        endpoint: EndpointDescriptor,
        options: ReaderOptions,
    ) -> RangeReaderResult<Self> {
        let config = options.resolve(&endpoint)?;
        let url = endpoint.https_url(config.region())?;

        let fetcher: Arc<dyn RangeFetcher> = match endpoint.scheme() {
            Scheme::File => {
                let path = endpoint.local_path().ok_or_else(|| {
                    RangeReaderError::invalid_location(endpoint.to_string(), "not a local path")
                })?;
                Arc::new(LocalFileReader::open(path).await?)
            }
            _ if endpoint.is_object_storage() => object_store_fetcher(&endpoint, &config)?,
            _ => http_fetcher(&endpoint)?,
        };
        debug!("opened {url} ({:?})", endpoint.addressing());

        let mut reader = Self::new(fetcher, url, config);
        reader.endpoint = Some(endpoint);
        Ok(reader)
    }

    /// Share `pool` with other readers to bound physical fetches across all of them.
    pub fn with_fetch_pool(mut self, pool: Arc<Semaphore>) -> Self {
        self.context.pool = pool;
        self
    }

    /// The pool bounding concurrent physical fetches.
    pub fn fetch_pool(&self) -> &Arc<Semaphore> {
        &self.context.pool
    }

    /// The normalized URL of the object. Non-HTTP locations are translated to HTTPS.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The parsed endpoint, for readers created from a location.
    pub fn endpoint(&self) -> Option<&EndpointDescriptor> {
        self.endpoint.as_ref()
    }

    /// The settings this reader was resolved with.
    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    /// Whether the header has been fetched.
    pub fn header_cached(&self) -> bool {
        self.header.serve(&(0..1)).is_some()
    }

    /// The first `header_length` bytes of the object.
    ///
    /// Fetched once and cached. Concurrent callers share a single physical fetch.
    pub async fn read_header(&self) -> RangeReaderResult<Bytes> {
        self.header
            .get_or_fetch(|range| self.context.fetch_one(range))
            .await
    }

    /// Read `ranges`, returning one buffer per requested range in request order.
    ///
    /// Ranges lying fully inside an already cached header are served from it. If any physical
    /// fetch fails the whole call fails, after all fetches of the call have settled.
    pub async fn read_ranges(&self, ranges: &[Range<u64>]) -> RangeReaderResult<Vec<Bytes>> {
        let request = ReadRequest::new(ranges, &self.header, self.config.merge_distance())?;
        request.execute(&self.context).await
    }

    /// Read `ranges`, returning a map from each requested start offset to its bytes.
    ///
    /// When several requested ranges share a start, the longest one is kept.
    pub async fn read(&self, ranges: &[Range<u64>]) -> RangeReaderResult<BTreeMap<u64, Bytes>> {
        let buffers = self.read_ranges(ranges).await?;
        let mut out = BTreeMap::new();
        for (range, bytes) in ranges.iter().zip(buffers) {
            match out.entry(range.start) {
                Entry::Vacant(entry) => {
                    entry.insert(bytes);
                }
                Entry::Occupied(mut entry) => {
                    if bytes.len() > entry.get().len() {
                        entry.insert(bytes);
                    }
                }
            }
        }
        Ok(out)
    }

    /// Start reading `ranges` in the background and return a handle to collect them later.
    ///
    /// Invalid ranges are reported here. Must be called from within a tokio runtime.
    pub fn read_async(&self, ranges: &[Range<u64>]) -> RangeReaderResult<PendingRead> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            RangeReaderError::General(format!("read_async needs a tokio runtime: {e}"))
        })?;
        let request = ReadRequest::new(ranges, &self.header, self.config.merge_distance())?;
        let span = ranges
            .iter()
            .map(|r| r.start)
            .min()
            .zip(ranges.iter().map(|r| r.end).max())
            .map(|(start, end)| start..end);

        let context = self.context.clone();
        let task = runtime.spawn(async move { request.execute(&context).await });
        Ok(PendingRead {
            task,
            ranges: ranges.to_vec(),
            span,
        })
    }
}

/// A multi-range read started by [`RangeReader::read_async`].
///
/// Dropping the handle does not cancel the fetches; they run to completion and their bytes are
/// discarded.
#[derive(Debug)]
pub struct PendingRead {
    task: JoinHandle<RangeReaderResult<Vec<Bytes>>>,
    ranges: Vec<Range<u64>>,
    span: Option<Range<u64>>,
}

impl PendingRead {
    /// The requested ranges.
    pub fn ranges(&self) -> &[Range<u64>] {
        &self.ranges
    }

    /// Lowest requested start to highest requested end. `None` when nothing was requested.
    pub fn span(&self) -> Option<Range<u64>> {
        self.span.clone()
    }

    /// Whether all fetches of this read have settled.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the read and return one flat buffer covering [`span`](Self::span).
    ///
    /// Requested bytes sit at `range.start - span.start`; bytes outside every requested range
    /// are zero.
    pub async fn get_bytes(self) -> RangeReaderResult<Bytes> {
        let buffers = self
            .task
            .await
            .map_err(|e| RangeReaderError::External(Box::new(e)))??;
        let Some(span) = self.span else {
            return Ok(Bytes::new());
        };

        let mut flat = BytesMut::zeroed((span.end - span.start) as usize);
        for (range, bytes) in self.ranges.iter().zip(&buffers) {
            let offset = (range.start - span.start) as usize;
            flat[offset..offset + bytes.len()].copy_from_slice(bytes);
        }
        Ok(flat.freeze())
    }
}

/// A reader is itself a fetcher, so decoders written against [`RangeFetcher`] get coalescing,
/// bounded parallelism and header caching for free.
impl RangeFetcher for RangeReader {
    fn fetch(&self, range: Range<u64>) -> BoxFuture<'_, RangeReaderResult<Bytes>> {
        async move {
            self.read_ranges(&[range])
                .await?
                .pop()
                .ok_or_else(|| RangeReaderError::General("empty read result".to_string()))
        }
        .boxed()
    }

    fn fetch_ranges(
        &self,
        ranges: Vec<Range<u64>>,
    ) -> BoxFuture<'_, RangeReaderResult<Vec<Bytes>>> {
        async move { self.read_ranges(&ranges).await }.boxed()
    }
}

#[cfg(feature = "object_store")]
fn object_store_fetcher(
    endpoint: &EndpointDescriptor,
    config: &ResolvedConfig,
) -> RangeReaderResult<Arc<dyn RangeFetcher>> {
    Ok(Arc::new(crate::reader::ObjectReader::s3(endpoint, config)?))
}

#[cfg(not(feature = "object_store"))]
fn object_store_fetcher(
    endpoint: &EndpointDescriptor,
    _config: &ResolvedConfig,
) -> RangeReaderResult<Arc<dyn RangeFetcher>> {
    Err(RangeReaderError::General(format!(
        "cannot read {endpoint}: built without the `object_store` feature"
    )))
}

#[cfg(feature = "reqwest")]
fn http_fetcher(endpoint: &EndpointDescriptor) -> RangeReaderResult<Arc<dyn RangeFetcher>> {
    let client = reqwest::Client::builder().build()?;
    let mut reader = crate::reader::ReqwestReader::new(client, endpoint.location().clone());
    if let Some(credentials) = endpoint.credentials() {
        reader = reader.with_credentials(credentials.clone());
    }
    Ok(Arc::new(reader))
}

#[cfg(not(feature = "reqwest"))]
fn http_fetcher(endpoint: &EndpointDescriptor) -> RangeReaderResult<Arc<dyn RangeFetcher>> {
    Err(RangeReaderError::General(format!(
        "cannot read {endpoint}: built without the `reqwest` feature"
    )))
}
