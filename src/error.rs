//! Error handling.

use std::fmt::Debug;
use std::ops::Range;
use std::time::Duration;

use thiserror::Error;

/// Enum with all errors in this crate.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RangeReaderError {
    /// The location string could not be turned into an endpoint.
    #[error("Invalid location {location:?}: {reason}")]
    InvalidLocation {
        /// The offending input.
        location: String,
        /// What was wrong with it.
        reason: String,
    },

    /// A required setting could not be resolved from any source.
    #[error("No value configured for required setting `{0}`")]
    MissingSetting(&'static str),

    /// A setting was given a value it cannot take.
    #[error("Invalid value for setting `{name}`: {reason}")]
    InvalidSetting {
        /// Setting name.
        name: &'static str,
        /// Why the value was rejected.
        reason: String,
    },

    /// A requested range has `end <= start`.
    #[error("Empty or inverted byte range {0:?}")]
    EmptyRange(Range<u64>),

    /// The server answered a ranged request with something other than partial content.
    ///
    /// A `200 OK` means the server ignored the `Range` header and would send the whole object.
    #[error("Server ignored range request (HTTP status {0})")]
    RangeIgnored(u16),

    /// The server answered with an unexpected status code.
    #[error("Unexpected HTTP status {0}")]
    UnexpectedStatus(u16),

    /// A range reaches past the end of the object.
    #[error("Range {range:?} exceeds object length {length:?}")]
    OutOfBounds {
        /// Requested range.
        range: Range<u64>,
        /// Object length, when known.
        length: Option<u64>,
    },

    /// End of file error.
    #[error("End of File: expected to read {0} bytes, got {1}")]
    EndOfFile(u64, u64),

    /// A physical fetch did not finish in time.
    #[error("Fetch timed out after {0:?}")]
    Timeout(Duration),

    /// A physical fetch failed. Carries the physical range that failed.
    #[error("Fetching bytes {range:?} failed: {source}")]
    Fetch {
        /// The physical range whose fetch failed.
        range: Range<u64>,
        /// The underlying failure.
        #[source]
        source: Box<RangeReaderError>,
    },

    /// General error.
    #[error("General error: {0}")]
    General(String),

    /// IO Error.
    #[error(transparent)]
    IOError(#[from] std::io::Error),

    /// Error while fetching data using object store.
    #[cfg(feature = "object_store")]
    #[error(transparent)]
    ObjectStore(#[from] object_store::Error),

    /// Reqwest error
    #[cfg(feature = "reqwest")]
    #[error(transparent)]
    ReqwestError(#[from] reqwest::Error),

    /// External error
    #[error(transparent)]
    External(Box<dyn std::error::Error + Send + Sync>),
}

impl RangeReaderError {
    /// Returns `true` for failures that may succeed when the same fetch is issued again.
    ///
    /// This is narrower than the set of transport errors: [`RangeIgnored`](Self::RangeIgnored)
    /// and client-side HTTP statuses come from the server but will not change on retry.
    /// Configuration errors, invalid requests and bounds errors are never retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Fetch { source, .. } => source.is_retryable(),
            Self::Timeout(_) | Self::IOError(_) => true,
            Self::UnexpectedStatus(status) => *status >= 500 || *status == 429,
            #[cfg(feature = "object_store")]
            Self::ObjectStore(e) => !matches!(
                e,
                object_store::Error::NotFound { .. }
                    | object_store::Error::InvalidPath { .. }
                    | object_store::Error::NotSupported { .. }
                    | object_store::Error::PermissionDenied { .. }
                    | object_store::Error::Unauthenticated { .. }
                    | object_store::Error::NotImplemented
            ),
            #[cfg(feature = "reqwest")]
            Self::ReqwestError(e) => match e.status() {
                Some(status) => status.is_server_error() || status.as_u16() == 429,
                None => true,
            },
            _ => false,
        }
    }

    /// The physical range attached to this error, if it came from a fetch.
    pub fn failed_range(&self) -> Option<&Range<u64>> {
        match self {
            Self::Fetch { range, .. } => Some(range),
            _ => None,
        }
    }

    pub(crate) fn invalid_location(location: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidLocation {
            location: location.into(),
            reason: reason.into(),
        }
    }
}

/// Crate-specific result type.
pub type RangeReaderResult<T> = std::result::Result<T, RangeReaderError>;
