//! S3 types and response structures

use serde::{Deserialize, Serialize};

/// Inclusive byte range for a ranged read.
///
/// Serialized onto the wire as `range: <first>-<last>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub first: u64,
    pub last: u64,
}

impl ByteRange {
    pub fn new(first: u64, last: u64) -> Self {
        Self { first, last }
    }

    pub fn header_value(&self) -> String {
        format!("{}-{}", self.first, self.last)
    }
}

/// Output of a GetObject call.
#[derive(Debug, Clone)]
pub struct GetObjectOutput {
    /// Content-Length propagated from the response, when the server sent
    /// one.
    pub length: Option<u64>,
}

/// One uploaded part: 1-based number plus the ETag the server assigned.
///
/// The ETag is kept verbatim, quotes included, because the completion XML
/// must echo it unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedPart {
    pub part_number: u32,
    pub etag: String,
}

impl CompletedPart {
    pub fn new(part_number: u32, etag: String) -> Self {
        Self { part_number, etag }
    }
}

/// Callback interface for ListBuckets: one `next` per bucket name, then a
/// single `end`.
pub trait ListBucketsCallback {
    fn next(&mut self, name: &str);
    fn end(&mut self);
}

/// Collecting callback, mostly useful in tests and the CLI.
#[derive(Debug, Default)]
pub struct CollectBuckets {
    pub names: Vec<String>,
    pub ended: bool,
}

impl ListBucketsCallback for CollectBuckets {
    fn next(&mut self, name: &str) {
        self.names.push(name.to_string());
    }

    fn end(&mut self) {
        self.ended = true;
    }
}

/// Configuration for multipart upload streams
#[derive(Debug, Clone)]
pub struct MultipartConfig {
    /// Part size in bytes (default 8 MiB; S3 requires at least 5 MiB for
    /// every part but the last)
    pub part_size: usize,
    /// Maximum concurrent part uploads (default 1)
    pub max_inflight: usize,
}

/// S3 minimum part size for all parts except the last.
pub const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// Default part size for multipart streams.
pub const DEFAULT_PART_SIZE: usize = 8 * 1024 * 1024;

impl Default for MultipartConfig {
    fn default() -> Self {
        Self {
            part_size: DEFAULT_PART_SIZE,
            max_inflight: 1,
        }
    }
}

impl MultipartConfig {
    /// Set the part size, clamped to the S3 minimum.
    pub fn with_part_size(mut self, size: usize) -> Self {
        self.part_size = size.max(MIN_PART_SIZE);
        self
    }

    pub fn with_max_inflight(mut self, max_inflight: usize) -> Self {
        self.max_inflight = max_inflight.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_header_value() {
        assert_eq!(ByteRange::new(0, 499).header_value(), "0-499");
    }

    #[test]
    fn test_part_size_clamped_to_minimum() {
        let config = MultipartConfig::default().with_part_size(1024);
        assert_eq!(config.part_size, MIN_PART_SIZE);
    }

    #[test]
    fn test_default_part_size() {
        assert_eq!(MultipartConfig::default().part_size, 8 * 1024 * 1024);
        assert_eq!(MultipartConfig::default().max_inflight, 1);
    }
}
