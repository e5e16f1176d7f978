//! S3 client core
//!
//! This module provides:
//! - Typed S3 operations flowing through the signing proxy
//! - The capability-style S3 -> Bucket -> Object handle hierarchy
//! - The streaming multipart upload sink
//! - The XML micro-parser for S3 response documents

pub mod client;
pub mod handle;
pub mod multipart;
pub mod types;
pub mod xml;

pub use client::S3Client;
pub use handle::{BucketHandle, ObjectHandle, S3Handle};
pub use multipart::MultipartStream;
pub use types::{
    ByteRange, CollectBuckets, CompletedPart, GetObjectOutput, ListBucketsCallback,
    MultipartConfig, DEFAULT_PART_SIZE, MIN_PART_SIZE,
};
