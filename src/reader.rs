//! Backends that fetch one byte range at a time.

use std::fmt::Debug;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt};
use log::trace;

use crate::error::{RangeReaderError, RangeReaderResult};

/// The asynchronous interface used to fetch byte ranges of a remote or local object.
///
/// This was derived from the Parquet
/// [`AsyncFileReader`](https://docs.rs/parquet/latest/parquet/arrow/async_reader/trait.AsyncFileReader.html)
///
/// Notes:
///
/// 1. [`ObjectReader`], available when the `object_store` crate feature
///    is enabled, implements this interface for [`ObjectStore`].
///
/// 2. [`ReqwestReader`], available when the `reqwest` crate feature is enabled, issues HTTP
///    `Range` requests.
///
/// 3. [`LocalFileReader`] performs positioned reads on a local file.
///
/// Implementations return exactly `range.end - range.start` bytes or an error.
///
/// [`ObjectStore`]: object_store::ObjectStore
pub trait RangeFetcher: Debug + Send + Sync {
    /// Retrieve the bytes in `range`.
    fn fetch(&self, range: Range<u64>) -> BoxFuture<'_, RangeReaderResult<Bytes>>;

    /// Retrieve multiple byte ranges. The default implementation will call `fetch`
    /// sequentially.
    fn fetch_ranges(
        &self,
        ranges: Vec<Range<u64>>,
    ) -> BoxFuture<'_, RangeReaderResult<Vec<Bytes>>> {
        async move {
            let mut result = Vec::with_capacity(ranges.len());

            for range in ranges.into_iter() {
                let data = self.fetch(range).await?;
                result.push(data);
            }

            Ok(result)
        }
        .boxed()
    }
}

/// This allows Box<dyn RangeFetcher + '_> to be used as a RangeFetcher,
impl RangeFetcher for Box<dyn RangeFetcher + '_> {
    fn fetch(&self, range: Range<u64>) -> BoxFuture<'_, RangeReaderResult<Bytes>> {
        self.as_ref().fetch(range)
    }

    fn fetch_ranges(
        &self,
        ranges: Vec<Range<u64>>,
    ) -> BoxFuture<'_, RangeReaderResult<Vec<Bytes>>> {
        self.as_ref().fetch_ranges(ranges)
    }
}

/// This allows Arc<dyn RangeFetcher + '_> to be used as a RangeFetcher,
impl RangeFetcher for Arc<dyn RangeFetcher + '_> {
    fn fetch(&self, range: Range<u64>) -> BoxFuture<'_, RangeReaderResult<Bytes>> {
        self.as_ref().fetch(range)
    }

    fn fetch_ranges(
        &self,
        ranges: Vec<Range<u64>>,
    ) -> BoxFuture<'_, RangeReaderResult<Vec<Bytes>>> {
        self.as_ref().fetch_ranges(ranges)
    }
}

pub(crate) fn check_length(range: &Range<u64>, bytes: &Bytes) -> RangeReaderResult<()> {
    let expected = range.end - range.start;
    if bytes.len() as u64 != expected {
        return Err(RangeReaderError::EndOfFile(expected, bytes.len() as u64));
    }
    Ok(())
}

/// Positioned reads on a local file.
///
/// The file is opened once and its length captured; reads past that length fail with
/// [`RangeReaderError::OutOfBounds`] without touching the file.
///
/// Reads do not move a shared cursor, so concurrent fetches run in parallel on the blocking
/// thread pool.
#[derive(Debug)]
pub struct LocalFileReader {
    file: Arc<std::fs::File>,
    path: PathBuf,
    len: u64,
}

impl LocalFileReader {
    /// Open `path` for reading.
    pub async fn open(path: impl AsRef<Path>) -> RangeReaderResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = tokio::fs::File::open(&path).await?;
        let len = file.metadata().await?.len();
        Ok(Self {
            file: Arc::new(file.into_std().await),
            path,
            len,
        })
    }

    /// Length of the file at open time.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether the file was empty at open time.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Path of the file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn make_range_request(&self, range: Range<u64>) -> RangeReaderResult<Bytes> {
        if range.end <= range.start {
            return Err(RangeReaderError::EmptyRange(range));
        }
        if range.end > self.len {
            return Err(RangeReaderError::OutOfBounds {
                range,
                length: Some(self.len),
            });
        }

        let file = self.file.clone();
        let (offset, len) = (range.start, (range.end - range.start) as usize);
        let result = tokio::task::spawn_blocking(move || {
            let mut buffer = vec![0; len];
            read_exact_at(&file, &mut buffer, offset).map(|_| buffer)
        })
        .await
        .map_err(|e| RangeReaderError::External(Box::new(e)))?;

        match result {
            Ok(buffer) => Ok(buffer.into()),
            // The file shrank since it was opened.
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                Err(RangeReaderError::OutOfBounds {
                    range,
                    length: None,
                })
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(unix)]
fn read_exact_at(file: &std::fs::File, buffer: &mut [u8], offset: u64) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buffer, offset)
}

#[cfg(windows)]
fn read_exact_at(file: &std::fs::File, mut buffer: &mut [u8], mut offset: u64) -> std::io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buffer.is_empty() {
        match file.seek_read(buffer, offset) {
            Ok(0) => return Err(std::io::ErrorKind::UnexpectedEof.into()),
            Ok(n) => {
                buffer = &mut buffer[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

impl RangeFetcher for LocalFileReader {
    fn fetch(&self, range: Range<u64>) -> BoxFuture<'_, RangeReaderResult<Bytes>> {
        trace!("reading {range:?} from {}", self.path.display());
        self.make_range_request(range).boxed()
    }
}

/// A RangeFetcher that reads from an [`ObjectStore`] instance.
///
/// [`ObjectStore`]: object_store::ObjectStore
#[cfg(feature = "object_store")]
#[derive(Clone, Debug)]
pub struct ObjectReader {
    store: Arc<dyn object_store::ObjectStore>,
    path: object_store::path::Path,
}

#[cfg(feature = "object_store")]
impl ObjectReader {
    /// Creates a new [`ObjectReader`] for the provided [`ObjectStore`] and path
    ///
    /// [`ObjectStore`]: object_store::ObjectStore
    pub fn new(store: Arc<dyn object_store::ObjectStore>, path: object_store::path::Path) -> Self {
        Self { store, path }
    }

    /// Build an S3 store for an object storage endpoint.
    ///
    /// Region comes from `config`. Credentials are the endpoint's; without any, requests are
    /// sent unsigned.
    pub fn s3(
        endpoint: &crate::endpoint::EndpointDescriptor,
        config: &crate::config::ResolvedConfig,
    ) -> RangeReaderResult<Self> {
        use object_store::aws::AmazonS3Builder;
        use object_store::ClientOptions;

        let bucket = endpoint.bucket().ok_or_else(|| {
            RangeReaderError::invalid_location(endpoint.to_string(), "not an object storage location")
        })?;
        let region = config
            .region()
            .ok_or(RangeReaderError::MissingSetting("region"))?;

        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(bucket)
            .with_region(region)
            .with_client_options(ClientOptions::new().with_timeout(config.read_timeout()));
        builder = match endpoint.credentials() {
            Some(credentials) => builder
                .with_access_key_id(credentials.user())
                .with_secret_access_key(credentials.password()),
            None => builder.with_skip_signature(true),
        };
        if let Some(service) = endpoint.service_endpoint() {
            builder = builder
                .with_allow_http(service.starts_with("http:"))
                .with_endpoint(service);
        }

        // The key is already decoded; it must reach the store verbatim, not be re-encoded.
        let path = object_store::path::Path::parse(endpoint.key())
            .map_err(|e| RangeReaderError::invalid_location(endpoint.to_string(), e.to_string()))?;
        let store = builder.build()?;
        Ok(Self::new(Arc::new(store), path))
    }

    /// The object path within the store.
    pub fn path(&self) -> &object_store::path::Path {
        &self.path
    }

    async fn make_range_request(&self, range: Range<u64>) -> RangeReaderResult<Bytes> {
        let bytes = self.store.get_range(&self.path, range.clone()).await?;
        check_length(&range, &bytes)?;
        Ok(bytes)
    }
}

#[cfg(feature = "object_store")]
impl RangeFetcher for ObjectReader {
    fn fetch(&self, range: Range<u64>) -> BoxFuture<'_, RangeReaderResult<Bytes>> {
        trace!("GetObject {} {range:?}", self.path);
        self.make_range_request(range).boxed()
    }

    fn fetch_ranges(
        &self,
        ranges: Vec<Range<u64>>,
    ) -> BoxFuture<'_, RangeReaderResult<Vec<Bytes>>>
    where
        Self: Send,
    {
        async move {
            let buffers = self.store.get_ranges(&self.path, &ranges).await?;
            for (range, bytes) in ranges.iter().zip(&buffers) {
                check_length(range, bytes)?;
            }
            Ok(buffers)
        }
        .boxed()
    }
}

/// Format the HTTP `Range` header value for a half-open byte range.
///
/// HTTP ranges are inclusive, so the end is reduced by one.
pub fn http_range_header(range: &Range<u64>) -> String {
    format!("bytes={}-{}", range.start, range.end - 1)
}

/// Map the status of a ranged response to success or a descriptive error.
///
/// Only `206 Partial Content` is a success. `200 OK` means the server ignored the range, which
/// is reported as [`RangeReaderError::RangeIgnored`] rather than silently downloading the whole
/// object.
pub fn check_range_status(status: u16, range: &Range<u64>) -> RangeReaderResult<()> {
    match status {
        206 => Ok(()),
        200 => Err(RangeReaderError::RangeIgnored(status)),
        416 => Err(RangeReaderError::OutOfBounds {
            range: range.clone(),
            length: None,
        }),
        status => Err(RangeReaderError::UnexpectedStatus(status)),
    }
}

/// A RangeFetcher that reads from a URL using reqwest.
#[cfg(feature = "reqwest")]
#[derive(Debug, Clone)]
pub struct ReqwestReader {
    client: reqwest::Client,
    url: reqwest::Url,
    credentials: Option<crate::endpoint::Credentials>,
}

#[cfg(feature = "reqwest")]
impl ReqwestReader {
    /// Construct a new ReqwestReader from a reqwest client and URL.
    pub fn new(client: reqwest::Client, url: reqwest::Url) -> Self {
        Self {
            client,
            url,
            credentials: None,
        }
    }

    /// Send the given credentials with every request, using basic authentication.
    pub fn with_credentials(mut self, credentials: crate::endpoint::Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// The URL requests are sent to.
    pub fn url(&self) -> &reqwest::Url {
        &self.url
    }

    fn make_range_request(&self, range: Range<u64>) -> BoxFuture<'_, RangeReaderResult<Bytes>> {
        let mut request = self
            .client
            .get(self.url.clone())
            .header(reqwest::header::RANGE, http_range_header(&range));
        if let Some(credentials) = &self.credentials {
            request = request.basic_auth(credentials.user(), Some(credentials.password()));
        }
        async move {
            let mut response = request.send().await?;
            if response.status() != reqwest::StatusCode::RANGE_NOT_SATISFIABLE {
                response = response.error_for_status()?;
            }
            check_range_status(response.status().as_u16(), &range)?;
            let bytes = response.bytes().await?;
            check_length(&range, &bytes)?;
            Ok(bytes)
        }
        .boxed()
    }
}

#[cfg(feature = "reqwest")]
impl RangeFetcher for ReqwestReader {
    fn fetch(&self, range: Range<u64>) -> BoxFuture<'_, RangeReaderResult<Bytes>> {
        trace!("GET {} {}", self.url, http_range_header(&range));
        self.make_range_request(range)
    }
}
