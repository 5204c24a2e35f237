//! Reader options and the resolution of per-reader settings.
//!
//! Region resolution precedence, highest first:
//!
//! 1. [`ReaderOptions::with_region`]
//! 2. a region embedded in the location (host name or `region` query parameter)
//! 3. the per-alias runtime property `s3.<alias>.region`
//! 4. the generic runtime property `s3.region`
//! 5. [`ReaderOptions::with_default_region`], `us-east-1` unless disabled
//!
//! Empty or whitespace-only values count as absent at every level.

use std::collections::HashMap;
use std::time::Duration;

use log::debug;

use crate::endpoint::{Credentials, EndpointDescriptor};
use crate::error::{RangeReaderError, RangeReaderResult};

/// Default number of bytes fetched by [`RangeReader::read_header`](crate::RangeReader::read_header).
pub const DEFAULT_HEADER_LENGTH: u64 = 32 * 1024;

/// Default gap, in bytes, below which two requested ranges share one physical fetch.
pub const DEFAULT_MERGE_DISTANCE: u64 = 8 * 1024;

/// Default bound on concurrently running physical fetches.
pub const DEFAULT_MAX_PARALLEL_FETCHES: usize = 8;

/// Default timeout of a single physical fetch.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Region used when nothing else resolves one.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Default backend alias.
pub const DEFAULT_ALIAS: &str = "s3";

/// Runtime property consulted for all S3-like backends.
pub const GENERIC_REGION_PROPERTY: &str = "s3.region";

/// Name of the runtime property holding the region override for `alias`.
pub fn alias_region_property(alias: &str) -> String {
    format!("s3.{alias}.region")
}

/// String-valued runtime settings, passed explicitly to each reader.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeProperties(HashMap<String, String>);

impl RuntimeProperties {
    /// An empty property set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Properties derived from the process environment.
    ///
    /// `AWS_REGION`, falling back to `AWS_DEFAULT_REGION`, becomes the generic region property.
    pub fn from_env() -> Self {
        let mut properties = Self::new();
        if let Some(region) = ["AWS_REGION", "AWS_DEFAULT_REGION"]
            .iter()
            .find_map(|name| std::env::var(name).ok().filter(|v| !v.trim().is_empty()))
        {
            properties.set(GENERIC_REGION_PROPERTY, region);
        }
        properties
    }

    /// Set a property, returning `self`.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    /// Set a property.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Look up a property. Blank values are reported as absent.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RuntimeProperties {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Caller-supplied options for a [`RangeReader`](crate::RangeReader).
#[derive(Debug, Clone)]
pub struct ReaderOptions {
    region: Option<String>,
    alias: String,
    default_region: Option<String>,
    header_length: u64,
    merge_distance: u64,
    max_parallel_fetches: usize,
    read_timeout: Duration,
    credentials: Option<Credentials>,
    properties: RuntimeProperties,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            region: None,
            alias: DEFAULT_ALIAS.to_string(),
            default_region: Some(DEFAULT_REGION.to_string()),
            header_length: DEFAULT_HEADER_LENGTH,
            merge_distance: DEFAULT_MERGE_DISTANCE,
            max_parallel_fetches: DEFAULT_MAX_PARALLEL_FETCHES,
            read_timeout: DEFAULT_READ_TIMEOUT,
            credentials: None,
            properties: RuntimeProperties::default(),
        }
    }
}

impl ReaderOptions {
    /// Options with all defaults and no runtime properties.
    pub fn new() -> Self {
        Self::default()
    }

    /// Explicit region. Wins over every other source.
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Backend alias used to look up `s3.<alias>.region`.
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = alias.into();
        self
    }

    /// Fallback region. `None` makes an unresolved region a configuration error.
    pub fn with_default_region(mut self, region: Option<String>) -> Self {
        self.default_region = region;
        self
    }

    /// Length of the header fetched by `read_header`.
    pub fn with_header_length(mut self, length: u64) -> Self {
        self.header_length = length;
        self
    }

    /// Maximum gap between two requested ranges that still get merged into one fetch.
    ///
    /// Zero merges only overlapping or touching ranges.
    pub fn with_merge_distance(mut self, distance: u64) -> Self {
        self.merge_distance = distance;
        self
    }

    /// Bound on concurrently running physical fetches.
    pub fn with_max_parallel_fetches(mut self, max: usize) -> Self {
        self.max_parallel_fetches = max;
        self
    }

    /// Timeout applied to every physical fetch.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Out-of-band credentials. These replace credentials embedded in the location.
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Runtime properties consulted during resolution.
    pub fn with_properties(mut self, properties: RuntimeProperties) -> Self {
        self.properties = properties;
        self
    }

    /// Out-of-band credentials, if any.
    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    /// Resolve these options against `endpoint`.
    ///
    /// Fails before any I/O when a setting is invalid or a required one is unresolved.
    pub fn resolve(&self, endpoint: &EndpointDescriptor) -> RangeReaderResult<ResolvedConfig> {
        if self.header_length == 0 {
            return Err(RangeReaderError::InvalidSetting {
                name: "header_length",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.max_parallel_fetches == 0 {
            return Err(RangeReaderError::InvalidSetting {
                name: "max_parallel_fetches",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.read_timeout.is_zero() {
            return Err(RangeReaderError::InvalidSetting {
                name: "read_timeout",
                reason: "must be greater than zero".to_string(),
            });
        }

        let region = if endpoint.is_object_storage() {
            let (region, source) = self.resolve_region(endpoint)?;
            debug!("resolved region {region} for {endpoint} from {source:?}");
            Some((region, source))
        } else {
            None
        };

        Ok(ResolvedConfig {
            region,
            header_length: self.header_length,
            merge_distance: self.merge_distance,
            max_parallel_fetches: self.max_parallel_fetches,
            read_timeout: self.read_timeout,
        })
    }

    fn resolve_region(
        &self,
        endpoint: &EndpointDescriptor,
    ) -> RangeReaderResult<(String, RegionSource)> {
        let non_blank = |value: &str| {
            let value = value.trim();
            (!value.is_empty()).then(|| value.to_string())
        };
        let alias_property = alias_region_property(&self.alias);

        let candidates = [
            (self.region.as_deref(), RegionSource::Explicit),
            (endpoint.region(), RegionSource::Location),
            (self.properties.get(&alias_property), RegionSource::AliasProperty),
            (
                self.properties.get(GENERIC_REGION_PROPERTY),
                RegionSource::GenericProperty,
            ),
            (self.default_region.as_deref(), RegionSource::Default),
        ];
        candidates
            .into_iter()
            .find_map(|(value, source)| value.and_then(non_blank).map(|value| (value, source)))
            .ok_or(RangeReaderError::MissingSetting("region"))
    }
}

/// Where a resolved region came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionSource {
    /// Set on the reader options.
    Explicit,
    /// Embedded in the location.
    Location,
    /// Per-alias runtime property.
    AliasProperty,
    /// Generic runtime property.
    GenericProperty,
    /// Built-in fallback.
    Default,
}

/// Immutable settings of one reader, computed once at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    region: Option<(String, RegionSource)>,
    header_length: u64,
    merge_distance: u64,
    max_parallel_fetches: usize,
    read_timeout: Duration,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            region: None,
            header_length: DEFAULT_HEADER_LENGTH,
            merge_distance: DEFAULT_MERGE_DISTANCE,
            max_parallel_fetches: DEFAULT_MAX_PARALLEL_FETCHES,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }
}

impl ResolvedConfig {
    /// Resolved region. `None` for backends without regions.
    pub fn region(&self) -> Option<&str> {
        self.region.as_ref().map(|(region, _)| region.as_str())
    }

    /// Which source the region was taken from.
    pub fn region_source(&self) -> Option<RegionSource> {
        self.region.as_ref().map(|(_, source)| *source)
    }

    /// Header length in bytes.
    pub fn header_length(&self) -> u64 {
        self.header_length
    }

    /// Merge distance in bytes.
    pub fn merge_distance(&self) -> u64 {
        self.merge_distance
    }

    /// Bound on concurrently running physical fetches.
    pub fn max_parallel_fetches(&self) -> usize {
        self.max_parallel_fetches
    }

    /// Timeout applied to every physical fetch.
    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }
}
