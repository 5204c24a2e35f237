//! Parsing location strings into normalized endpoint descriptors.
//!
//! Accepted forms:
//!
//! - `s3://bucket/key[?region=...]`
//! - virtual-hosted S3: `https://bucket.s3.<region>.amazonaws.com/key`, `https://bucket.s3-<region>.amazonaws.com/key`
//! - path-style S3: `https://s3.<region>.amazonaws.com/bucket/key`, `https://s3-<region>.amazonaws.com/bucket/key`
//! - plain HTTP(S): `https://host/path`
//! - local files: `file:///path` or an absolute path
//!
//! Virtual-hosted and path-style URLs for the same object normalize to the same
//! `(bucket, key, region)` triple.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use percent_encoding::percent_decode_str;
use url::Url;

use crate::error::{RangeReaderError, RangeReaderResult};

const AWS_DOMAIN: &str = "amazonaws.com";

/// Transport scheme of a location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    /// `http://`
    Http,
    /// `https://`
    Https,
    /// `s3://`
    S3,
    /// `file://` or an absolute path
    File,
}

/// How the bucket and key were encoded in the location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Addressing {
    /// Bucket in the host name, key in the path.
    VirtualHosted,
    /// Bucket as first path segment.
    PathStyle,
    /// `s3://bucket/key`
    S3Uri,
    /// Any other HTTP(S) URL.
    PlainHttp,
    /// Local filesystem path.
    LocalFile,
}

/// A user/password pair. For object storage these are the access key id and secret key.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    user: String,
    password: String,
}

impl Credentials {
    /// Create new credentials.
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }

    /// User name, or access key id.
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Password, or secret access key.
    pub fn password(&self) -> &str {
        &self.password
    }

    fn from_userinfo(url: &Url) -> Option<Self> {
        if url.username().is_empty() {
            return None;
        }
        Some(Self::new(
            decode(url.username()),
            url.password().map(decode).unwrap_or_default(),
        ))
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

/// A normalized description of where an object lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointDescriptor {
    /// Parsed location with any userinfo removed.
    location: Url,
    scheme: Scheme,
    addressing: Addressing,
    host: Option<String>,
    bucket: Option<String>,
    /// Percent-decoded key or path, without a leading slash (except for local files).
    key: String,
    /// Key exactly as it appeared in the URL.
    encoded_key: String,
    region: Option<String>,
    filename: String,
    credentials: Option<Credentials>,
}

struct Parts {
    addressing: Addressing,
    bucket: Option<String>,
    key: String,
    encoded_key: String,
    region: Option<String>,
}

impl EndpointDescriptor {
    /// Parse a location string.
    ///
    /// Absolute filesystem paths are accepted in addition to URLs.
    pub fn parse(location: &str) -> RangeReaderResult<Self> {
        let trimmed = location.trim();
        let url = match Url::parse(trimmed) {
            Ok(url) => url,
            Err(url::ParseError::RelativeUrlWithoutBase) if Path::new(trimmed).is_absolute() => {
                Url::from_file_path(trimmed).map_err(|_| {
                    RangeReaderError::invalid_location(location, "not a valid file path")
                })?
            }
            Err(e) => return Err(RangeReaderError::invalid_location(location, e.to_string())),
        };
        Self::from_url(&url)
    }

    /// Build a descriptor from an already parsed URL.
    pub fn from_url(url: &Url) -> RangeReaderResult<Self> {
        let scheme = match url.scheme() {
            "http" => Scheme::Http,
            "https" => Scheme::Https,
            "s3" | "s3a" => Scheme::S3,
            "file" => Scheme::File,
            other => {
                return Err(RangeReaderError::invalid_location(
                    url.as_str(),
                    format!("unsupported scheme `{other}`"),
                ))
            }
        };

        let parts = match scheme {
            Scheme::File => local_parts(url)?,
            Scheme::S3 => s3_uri_parts(url)?,
            Scheme::Http | Scheme::Https => http_parts(url)?,
        };

        let filename = parts
            .key
            .rsplit('/')
            .next()
            .filter(|name| !name.is_empty())
            .ok_or_else(|| RangeReaderError::invalid_location(url.as_str(), "missing object name"))?
            .to_string();

        let region = if parts.bucket.is_some() {
            parts.region.or_else(|| query_region(url))
        } else {
            None
        };

        let mut location = url.clone();
        // Only fails for URLs that cannot carry userinfo, which then have none to strip.
        let _ = location.set_username("");
        let _ = location.set_password(None);

        Ok(Self {
            location,
            scheme,
            addressing: parts.addressing,
            host: url.host_str().map(str::to_ascii_lowercase),
            bucket: parts.bucket,
            key: parts.key,
            encoded_key: parts.encoded_key,
            region,
            filename,
            credentials: Credentials::from_userinfo(url),
        })
    }

    /// Replace any embedded credentials with `credentials`.
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// The location, without userinfo.
    pub fn location(&self) -> &Url {
        &self.location
    }

    /// The transport scheme.
    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// How bucket and key were encoded.
    pub fn addressing(&self) -> Addressing {
        self.addressing
    }

    /// Host name, lowercased. `None` for local files.
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    /// Bucket name, for object storage locations.
    pub fn bucket(&self) -> Option<&str> {
        self.bucket.as_deref()
    }

    /// Object key (object storage) or path (plain HTTP, local file), percent-decoded.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Region embedded in the host name or `region` query parameter.
    pub fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }

    /// Last `/`-delimited segment of the key. Never empty.
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Credentials, embedded or set out-of-band.
    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    /// Whether this location names an object in an S3-like bucket.
    pub fn is_object_storage(&self) -> bool {
        self.bucket.is_some()
    }

    /// Filesystem path for local file locations.
    pub fn local_path(&self) -> Option<PathBuf> {
        match self.scheme {
            Scheme::File => self.location.to_file_path().ok(),
            _ => None,
        }
    }

    /// Service endpoint for S3-compatible stores not hosted on AWS, e.g. `http://minio:9000`.
    pub fn service_endpoint(&self) -> Option<String> {
        let host = self.host.as_deref()?;
        if host.ends_with(AWS_DOMAIN) || self.scheme == Scheme::S3 {
            return None;
        }
        let service_host = match (self.addressing, self.bucket.as_deref()) {
            (Addressing::VirtualHosted, Some(bucket)) => host.strip_prefix(bucket)?.strip_prefix('.')?,
            (Addressing::PathStyle, _) => host,
            _ => return None,
        };
        let port = self
            .location
            .port()
            .map(|port| format!(":{port}"))
            .unwrap_or_default();
        Some(format!("{}://{service_host}{port}", self.location.scheme()))
    }

    /// The equivalent HTTPS URL for this location.
    ///
    /// AWS object storage locations render in virtual-hosted style, including `region` when
    /// given. Plain HTTP, non-AWS and local locations are returned as parsed, without userinfo.
    pub fn https_url(&self, region: Option<&str>) -> RangeReaderResult<Url> {
        let bucket = match self.bucket.as_deref() {
            Some(bucket) if self.service_endpoint().is_none() => bucket,
            _ => return Ok(self.location.clone()),
        };
        let formatted = match region {
            Some(region) => format!(
                "https://{bucket}.s3.{region}.{AWS_DOMAIN}/{}",
                self.encoded_key
            ),
            None => format!("https://{bucket}.s3.{AWS_DOMAIN}/{}", self.encoded_key),
        };
        Url::parse(&formatted)
            .map_err(|e| RangeReaderError::invalid_location(formatted.clone(), e.to_string()))
    }
}

impl FromStr for EndpointDescriptor {
    type Err = RangeReaderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for EndpointDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.location)
    }
}

fn decode(s: &str) -> String {
    percent_decode_str(s).decode_utf8_lossy().into_owned()
}

fn query_region(url: &Url) -> Option<String> {
    url.query_pairs()
        .find(|(key, _)| key == "region")
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn require_host(url: &Url) -> RangeReaderResult<String> {
    url.host_str()
        .filter(|host| !host.is_empty())
        .map(str::to_ascii_lowercase)
        .ok_or_else(|| RangeReaderError::invalid_location(url.as_str(), "missing host"))
}

fn local_parts(url: &Url) -> RangeReaderResult<Parts> {
    let path = url
        .to_file_path()
        .map_err(|_| RangeReaderError::invalid_location(url.as_str(), "not a local file path"))?;
    Ok(Parts {
        addressing: Addressing::LocalFile,
        bucket: None,
        key: path.to_string_lossy().into_owned(),
        encoded_key: url.path().to_string(),
        region: None,
    })
}

fn s3_uri_parts(url: &Url) -> RangeReaderResult<Parts> {
    let bucket = require_host(url)?;
    let encoded_key = url.path().trim_start_matches('/').to_string();
    if encoded_key.is_empty() {
        return Err(RangeReaderError::invalid_location(
            url.as_str(),
            "missing object key",
        ));
    }
    Ok(Parts {
        addressing: Addressing::S3Uri,
        bucket: Some(bucket),
        key: decode(&encoded_key),
        encoded_key,
        region: None,
    })
}

fn http_parts(url: &Url) -> RangeReaderResult<Parts> {
    let host = require_host(url)?;
    let path = url.path().trim_start_matches('/');

    if let Some((bucket, rest)) = split_virtual_hosted(&host) {
        return Ok(Parts {
            addressing: Addressing::VirtualHosted,
            bucket: Some(bucket.to_string()),
            key: decode(path),
            encoded_key: path.to_string(),
            region: region_from_host(&host, rest),
        });
    }

    if host.starts_with("s3.") || host.starts_with("s3-") {
        let bucket_and_key = path
            .split_once('/')
            .filter(|(bucket, _)| !bucket.is_empty());
        match bucket_and_key {
            Some((bucket, key)) => {
                return Ok(Parts {
                    addressing: Addressing::PathStyle,
                    bucket: Some(decode(bucket)),
                    key: decode(key),
                    encoded_key: key.to_string(),
                    region: region_from_host(&host, &host[2..]),
                })
            }
            // Other services may simply name their web host `s3.`; serve those as plain HTTP.
            None if !host.ends_with(AWS_DOMAIN) => {}
            None => {
                return Err(RangeReaderError::invalid_location(
                    url.as_str(),
                    "missing bucket or object key",
                ))
            }
        }
    }

    Ok(Parts {
        addressing: Addressing::PlainHttp,
        bucket: None,
        key: decode(path),
        encoded_key: path.to_string(),
        region: None,
    })
}

/// Split `bucket.s3.rest` or `bucket.s3-rest` into the bucket and the part after `s3`.
///
/// Bucket names may contain an `s3` label themselves. On AWS hosts the service label always
/// sits right before `[dualstack.]<region>.amazonaws.com`, so the last occurrence is taken.
fn split_virtual_hosted(host: &str) -> Option<(&str, &str)> {
    let candidates = [".s3.", ".s3-"];
    let idx = if host.ends_with(AWS_DOMAIN) {
        candidates.iter().filter_map(|label| host.rfind(label)).max()?
    } else {
        candidates.iter().filter_map(|label| host.find(label)).min()?
    };
    let bucket = &host[..idx];
    if bucket.is_empty() {
        return None;
    }
    Some((bucket, &host[idx + 3..]))
}

/// Extract the region token following `s3` in an AWS host name.
///
/// `rest` starts right after `s3`, e.g. `.eu-central-1.amazonaws.com` or `-eu-west-1.amazonaws.com`.
fn region_from_host(host: &str, rest: &str) -> Option<String> {
    if !host.ends_with(AWS_DOMAIN) {
        return None;
    }
    let token = match rest.strip_prefix('-') {
        Some(legacy) => legacy.split('.').next(),
        None => rest
            .strip_prefix('.')?
            .split('.')
            .find(|token| *token != "dualstack"),
    }?;
    match token {
        "" | "amazonaws" => None,
        "external-1" => Some("us-east-1".to_string()),
        region => Some(region.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triple(location: &str) -> (String, Option<String>, String, String) {
        let endpoint = EndpointDescriptor::parse(location).unwrap();
        (
            endpoint.bucket().unwrap().to_string(),
            endpoint.region().map(str::to_string),
            endpoint.key().to_string(),
            endpoint.filename().to_string(),
        )
    }

    #[test]
    fn virtual_hosted_and_path_style_agree() {
        let expected = (
            "my-bucket".to_string(),
            Some("eu-central-1".to_string()),
            "sampleFiles/myfile.jpeg".to_string(),
            "myfile.jpeg".to_string(),
        );
        for location in [
            "http://my-bucket.s3.eu-central-1.amazonaws.com/sampleFiles/myfile.jpeg",
            "http://s3.eu-central-1.amazonaws.com/my-bucket/sampleFiles/myfile.jpeg",
            "https://my-bucket.s3-eu-central-1.amazonaws.com/sampleFiles/myfile.jpeg",
            "https://s3-eu-central-1.amazonaws.com/my-bucket/sampleFiles/myfile.jpeg",
            "s3://my-bucket/sampleFiles/myfile.jpeg?region=eu-central-1",
        ] {
            assert_eq!(triple(location), expected, "{location}");
        }
    }

    #[test]
    fn addressing_is_detected() {
        let cases = [
            ("https://b.s3.amazonaws.com/k", Addressing::VirtualHosted),
            ("https://s3.amazonaws.com/b/k", Addressing::PathStyle),
            ("s3://b/k", Addressing::S3Uri),
            ("https://example.com/data/k.tif", Addressing::PlainHttp),
            ("file:///tmp/k.tif", Addressing::LocalFile),
        ];
        for (location, addressing) in cases {
            let endpoint = EndpointDescriptor::parse(location).unwrap();
            assert_eq!(endpoint.addressing(), addressing, "{location}");
        }
    }

    #[test]
    fn region_left_unresolved_without_host_token() {
        let endpoint =
            EndpointDescriptor::parse("https://isdasoil.s3.amazonaws.com/soil_data/bd.tif").unwrap();
        assert_eq!(endpoint.bucket(), Some("isdasoil"));
        assert_eq!(endpoint.region(), None);
        assert_eq!(endpoint.key(), "soil_data/bd.tif");

        let endpoint = EndpointDescriptor::parse("https://s3.amazonaws.com/b/x/y.tif").unwrap();
        assert_eq!(endpoint.bucket(), Some("b"));
        assert_eq!(endpoint.region(), None);
        assert_eq!(endpoint.key(), "x/y.tif");
    }

    #[test]
    fn special_region_tokens() {
        let endpoint =
            EndpointDescriptor::parse("https://b.s3.dualstack.ap-south-1.amazonaws.com/k.tif")
                .unwrap();
        assert_eq!(endpoint.region(), Some("ap-south-1"));

        let endpoint =
            EndpointDescriptor::parse("https://s3-external-1.amazonaws.com/b/k.tif").unwrap();
        assert_eq!(endpoint.region(), Some("us-east-1"));
    }

    #[test]
    fn host_region_beats_query_region() {
        let endpoint = EndpointDescriptor::parse(
            "https://b.s3.us-west-2.amazonaws.com/k.tif?region=eu-west-1",
        )
        .unwrap();
        assert_eq!(endpoint.region(), Some("us-west-2"));

        let endpoint =
            EndpointDescriptor::parse("https://b.s3.amazonaws.com/k.tif?region=eu-west-1").unwrap();
        assert_eq!(endpoint.region(), Some("eu-west-1"));
    }

    #[test]
    fn bucket_with_dots() {
        let endpoint =
            EndpointDescriptor::parse("https://my.dotted.bucket.s3.us-east-2.amazonaws.com/a/b.tif")
                .unwrap();
        assert_eq!(endpoint.bucket(), Some("my.dotted.bucket"));
        assert_eq!(endpoint.region(), Some("us-east-2"));

        let endpoint =
            EndpointDescriptor::parse("https://logs.s3.archive.s3.us-east-1.amazonaws.com/k.tif")
                .unwrap();
        assert_eq!(endpoint.addressing(), Addressing::VirtualHosted);
        assert_eq!(endpoint.bucket(), Some("logs.s3.archive"));
        assert_eq!(endpoint.region(), Some("us-east-1"));
        assert_eq!(endpoint.key(), "k.tif");
    }

    #[test]
    fn s3_named_web_host_is_plain_http() {
        let endpoint = EndpointDescriptor::parse("https://s3.example.com/file.tif").unwrap();
        assert_eq!(endpoint.addressing(), Addressing::PlainHttp);
        assert!(!endpoint.is_object_storage());
        assert_eq!(endpoint.bucket(), None);
        assert_eq!(endpoint.key(), "file.tif");

        let endpoint = EndpointDescriptor::parse("https://s3.example.com/bucket/a.tif").unwrap();
        assert_eq!(endpoint.addressing(), Addressing::PathStyle);
        assert_eq!(endpoint.bucket(), Some("bucket"));
        assert_eq!(endpoint.key(), "a.tif");
    }

    #[test]
    fn plain_http() {
        let endpoint =
            EndpointDescriptor::parse("https://service.pdok.nl/rws/ahn/dtm_05m/M_01GN2.tif")
                .unwrap();
        assert_eq!(endpoint.scheme(), Scheme::Https);
        assert!(!endpoint.is_object_storage());
        assert_eq!(endpoint.host(), Some("service.pdok.nl"));
        assert_eq!(endpoint.key(), "rws/ahn/dtm_05m/M_01GN2.tif");
        assert_eq!(endpoint.filename(), "M_01GN2.tif");
        assert_eq!(endpoint.region(), None);
    }

    #[test]
    fn query_region_ignored_for_plain_http() {
        let endpoint = EndpointDescriptor::parse("https://example.com/a.tif?region=x").unwrap();
        assert_eq!(endpoint.region(), None);
    }

    #[test]
    fn embedded_credentials_are_extracted_and_stripped() {
        let endpoint =
            EndpointDescriptor::parse("s3://AKIDEXAMPLE:se%2Fcret@bucket/key.tif").unwrap();
        let credentials = endpoint.credentials().unwrap();
        assert_eq!(credentials.user(), "AKIDEXAMPLE");
        assert_eq!(credentials.password(), "se/cret");
        assert_eq!(endpoint.location().as_str(), "s3://bucket/key.tif");
        assert!(!format!("{credentials:?}").contains("se/cret"));

        let endpoint = endpoint.with_credentials(Credentials::new("other", "pw"));
        assert_eq!(endpoint.credentials().unwrap().user(), "other");
    }

    #[test]
    fn keys_are_percent_decoded() {
        let endpoint = EndpointDescriptor::parse("s3://b/dir/my%20file.tif").unwrap();
        assert_eq!(endpoint.key(), "dir/my file.tif");
        assert_eq!(endpoint.filename(), "my file.tif");
    }

    #[test]
    fn malformed_inputs_are_rejected() {
        for location in [
            "not a url",
            "s3:///key.tif",
            "s3://bucket",
            "s3://bucket/",
            "https://s3.amazonaws.com/bucket-only",
            "https://example.com/",
            "https://b.s3.amazonaws.com/",
            "ftp://host/file.tif",
        ] {
            let result = EndpointDescriptor::parse(location);
            assert!(
                matches!(result, Err(RangeReaderError::InvalidLocation { .. })),
                "{location}: {result:?}"
            );
        }
    }

    #[test]
    fn https_url_normalizes_object_storage() {
        let endpoint = EndpointDescriptor::parse("s3://my-bucket/a/b%20c.tif").unwrap();
        assert_eq!(
            endpoint.https_url(Some("eu-west-1")).unwrap().as_str(),
            "https://my-bucket.s3.eu-west-1.amazonaws.com/a/b%20c.tif"
        );
        assert_eq!(
            endpoint.https_url(None).unwrap().as_str(),
            "https://my-bucket.s3.amazonaws.com/a/b%20c.tif"
        );

        let endpoint =
            EndpointDescriptor::parse("http://s3.eu-central-1.amazonaws.com/my-bucket/x.jpeg")
                .unwrap();
        assert_eq!(
            endpoint.https_url(endpoint.region()).unwrap().as_str(),
            "https://my-bucket.s3.eu-central-1.amazonaws.com/x.jpeg"
        );
    }

    #[test]
    fn https_url_keeps_plain_http() {
        let endpoint = EndpointDescriptor::parse("https://user:pw@example.com/x/y.tif").unwrap();
        assert_eq!(
            endpoint.https_url(None).unwrap().as_str(),
            "https://example.com/x/y.tif"
        );
    }

    #[test]
    fn non_aws_service_endpoint() {
        let endpoint = EndpointDescriptor::parse("http://s3.minio.local:9000/b/k.tif").unwrap();
        assert_eq!(endpoint.bucket(), Some("b"));
        assert_eq!(endpoint.region(), None);
        assert_eq!(
            endpoint.service_endpoint().as_deref(),
            Some("http://s3.minio.local:9000")
        );

        let endpoint = EndpointDescriptor::parse("https://b.s3.example.org/k.tif").unwrap();
        assert_eq!(
            endpoint.service_endpoint().as_deref(),
            Some("https://s3.example.org")
        );

        let endpoint = EndpointDescriptor::parse("https://b.s3.amazonaws.com/k.tif").unwrap();
        assert_eq!(endpoint.service_endpoint(), None);
    }

    #[cfg(unix)]
    #[test]
    fn local_paths() {
        let endpoint = EndpointDescriptor::parse("/data/cogs/scene.tif").unwrap();
        assert_eq!(endpoint.scheme(), Scheme::File);
        assert_eq!(endpoint.filename(), "scene.tif");
        assert_eq!(
            endpoint.local_path(),
            Some(PathBuf::from("/data/cogs/scene.tif"))
        );
    }
}
