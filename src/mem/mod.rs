//! In-memory server-side facade
//!
//! The same object surface as the HTTP client, backed by an in-memory
//! directory tree: buckets own keys, keys own version lists (a write
//! appends a new version, a read takes the latest), and a pending
//! multipart table collects parts until completion stitches them into a
//! new object version.

pub mod server;

use bytes::{Bytes, BytesMut};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use uuid::Uuid;

use crate::hash;

/// Storage-level failures, mapped onto S3 error codes by the HTTP layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    NoSuchBucket,
    NoSuchKey,
    NoSuchUpload,
    InvalidPart,
}

impl StoreError {
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::NoSuchBucket => "NoSuchBucket",
            StoreError::NoSuchKey => "NoSuchKey",
            StoreError::NoSuchUpload => "NoSuchUpload",
            StoreError::InvalidPart => "InvalidPart",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            StoreError::NoSuchBucket => "The specified bucket does not exist",
            StoreError::NoSuchKey => "The specified key does not exist",
            StoreError::NoSuchUpload => "The specified upload does not exist",
            StoreError::InvalidPart => "One or more parts could not be found",
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Default)]
struct PendingUpload {
    key: String,
    parts: BTreeMap<u32, StoredPart>,
}

struct StoredPart {
    etag: String,
    data: Bytes,
}

#[derive(Default)]
struct BucketNode {
    /// Versions per key, oldest first; reads take the last entry.
    objects: BTreeMap<String, Vec<Bytes>>,
    uploads: HashMap<String, PendingUpload>,
}

#[derive(Default)]
struct Tree {
    buckets: BTreeMap<String, BucketNode>,
}

/// The in-memory directory tree. Clone shares the same tree.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Tree>>,
}

fn etag_for(data: &[u8]) -> String {
    format!("\"{}\"", hash::sha256_hex(data))
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a bucket; creating an existing bucket is a no-op.
    pub fn create_bucket(&self, name: &str) {
        let mut tree = self.inner.write().unwrap();
        tree.buckets.entry(name.to_string()).or_default();
    }

    pub fn list_buckets(&self) -> Vec<String> {
        let tree = self.inner.read().unwrap();
        tree.buckets.keys().cloned().collect()
    }

    /// Append a new version of the object; returns its ETag.
    pub fn put_object(&self, bucket: &str, key: &str, data: Bytes) -> StoreResult<String> {
        let mut tree = self.inner.write().unwrap();
        let node = tree
            .buckets
            .get_mut(bucket)
            .ok_or(StoreError::NoSuchBucket)?;
        let etag = etag_for(&data);
        node.objects.entry(key.to_string()).or_default().push(data);
        Ok(etag)
    }

    /// Latest version of the object with its ETag.
    pub fn get_object(&self, bucket: &str, key: &str) -> StoreResult<(Bytes, String)> {
        let tree = self.inner.read().unwrap();
        let node = tree.buckets.get(bucket).ok_or(StoreError::NoSuchBucket)?;
        let versions = node.objects.get(key).ok_or(StoreError::NoSuchKey)?;
        let data = versions.last().ok_or(StoreError::NoSuchKey)?.clone();
        let etag = etag_for(&data);
        Ok((data, etag))
    }

    /// Number of stored versions for a key.
    pub fn version_count(&self, bucket: &str, key: &str) -> StoreResult<usize> {
        let tree = self.inner.read().unwrap();
        let node = tree.buckets.get(bucket).ok_or(StoreError::NoSuchBucket)?;
        Ok(node.objects.get(key).map(|v| v.len()).unwrap_or(0))
    }

    /// Remove all versions of a key. Deleting a missing key succeeds, as
    /// S3's DeleteObject does.
    pub fn delete_object(&self, bucket: &str, key: &str) -> StoreResult<()> {
        let mut tree = self.inner.write().unwrap();
        let node = tree
            .buckets
            .get_mut(bucket)
            .ok_or(StoreError::NoSuchBucket)?;
        node.objects.remove(key);
        Ok(())
    }

    /// Start a multipart upload; returns a fresh upload id.
    pub fn begin_multipart(&self, bucket: &str, key: &str) -> StoreResult<String> {
        let mut tree = self.inner.write().unwrap();
        let node = tree
            .buckets
            .get_mut(bucket)
            .ok_or(StoreError::NoSuchBucket)?;
        let upload_id = Uuid::new_v4().simple().to_string();
        node.uploads.insert(
            upload_id.clone(),
            PendingUpload {
                key: key.to_string(),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    /// Store one part; re-uploading a part number replaces it.
    pub fn put_part(
        &self,
        bucket: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> StoreResult<String> {
        let mut tree = self.inner.write().unwrap();
        let node = tree
            .buckets
            .get_mut(bucket)
            .ok_or(StoreError::NoSuchBucket)?;
        let upload = node
            .uploads
            .get_mut(upload_id)
            .ok_or(StoreError::NoSuchUpload)?;
        let etag = etag_for(&data);
        upload
            .parts
            .insert(part_number, StoredPart { etag: etag.clone(), data });
        Ok(etag)
    }

    /// Complete a multipart upload from `(part_number, etag)` references.
    ///
    /// Every referenced part must exist with a matching ETag; otherwise
    /// the whole completion fails with `InvalidPart` and the upload stays
    /// pending. On success the stitched bytes become a new object version
    /// and the upload is destroyed.
    pub fn complete_multipart(
        &self,
        bucket: &str,
        upload_id: &str,
        parts: &[(u32, String)],
    ) -> StoreResult<(String, String)> {
        let mut tree = self.inner.write().unwrap();
        let node = tree
            .buckets
            .get_mut(bucket)
            .ok_or(StoreError::NoSuchBucket)?;
        let upload = node
            .uploads
            .get(upload_id)
            .ok_or(StoreError::NoSuchUpload)?;

        if parts.is_empty() {
            return Err(StoreError::InvalidPart);
        }

        let mut assembled = BytesMut::new();
        for (part_number, etag) in parts {
            let stored = upload.parts.get(part_number).ok_or(StoreError::InvalidPart)?;
            if &stored.etag != etag {
                return Err(StoreError::InvalidPart);
            }
            assembled.extend_from_slice(&stored.data);
        }

        let data = assembled.freeze();
        let etag = etag_for(&data);
        let key = upload.key.clone();

        node.objects.entry(key.clone()).or_default().push(data);
        node.uploads.remove(upload_id);

        Ok((key, etag))
    }

    /// Sizes of the parts received so far for a pending upload, in part
    /// number order.
    pub fn part_sizes(&self, bucket: &str, upload_id: &str) -> StoreResult<Vec<(u32, usize)>> {
        let tree = self.inner.read().unwrap();
        let node = tree.buckets.get(bucket).ok_or(StoreError::NoSuchBucket)?;
        let upload = node
            .uploads
            .get(upload_id)
            .ok_or(StoreError::NoSuchUpload)?;
        Ok(upload
            .parts
            .iter()
            .map(|(n, part)| (*n, part.data.len()))
            .collect())
    }

    /// Drop a pending upload and its parts.
    pub fn abort_multipart(&self, bucket: &str, upload_id: &str) -> StoreResult<()> {
        let mut tree = self.inner.write().unwrap();
        let node = tree
            .buckets
            .get_mut(bucket)
            .ok_or(StoreError::NoSuchBucket)?;
        node.uploads
            .remove(upload_id)
            .map(|_| ())
            .ok_or(StoreError::NoSuchUpload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_round_trip() {
        let store = MemoryStore::new();
        store.create_bucket("data");
        store
            .put_object("data", "a.txt", Bytes::from_static(b"one"))
            .unwrap();
        let (body, etag) = store.get_object("data", "a.txt").unwrap();
        assert_eq!(&body[..], b"one");
        assert!(etag.starts_with('"') && etag.ends_with('"'));
    }

    #[test]
    fn test_writes_append_versions() {
        let store = MemoryStore::new();
        store.create_bucket("data");
        store
            .put_object("data", "a", Bytes::from_static(b"v0"))
            .unwrap();
        store
            .put_object("data", "a", Bytes::from_static(b"v1"))
            .unwrap();
        assert_eq!(store.version_count("data", "a").unwrap(), 2);
        let (body, _) = store.get_object("data", "a").unwrap();
        assert_eq!(&body[..], b"v1");
    }

    #[test]
    fn test_missing_bucket_and_key() {
        let store = MemoryStore::new();
        assert_eq!(
            store.get_object("nope", "a").unwrap_err(),
            StoreError::NoSuchBucket
        );
        store.create_bucket("data");
        assert_eq!(
            store.get_object("data", "a").unwrap_err(),
            StoreError::NoSuchKey
        );
    }

    #[test]
    fn test_multipart_assembles_in_given_order() {
        let store = MemoryStore::new();
        store.create_bucket("data");
        let upload_id = store.begin_multipart("data", "big").unwrap();
        let e1 = store
            .put_part("data", &upload_id, 1, Bytes::from_static(b"aaa"))
            .unwrap();
        let e2 = store
            .put_part("data", &upload_id, 2, Bytes::from_static(b"bbb"))
            .unwrap();

        let (key, _etag) = store
            .complete_multipart("data", &upload_id, &[(1, e1), (2, e2)])
            .unwrap();
        assert_eq!(key, "big");

        let (body, _) = store.get_object("data", "big").unwrap();
        assert_eq!(&body[..], b"aaabbb");

        // The upload is destroyed on completion
        assert_eq!(
            store.abort_multipart("data", &upload_id).unwrap_err(),
            StoreError::NoSuchUpload
        );
    }

    #[test]
    fn test_complete_with_wrong_etag_is_invalid_part() {
        let store = MemoryStore::new();
        store.create_bucket("data");
        let upload_id = store.begin_multipart("data", "big").unwrap();
        store
            .put_part("data", &upload_id, 1, Bytes::from_static(b"aaa"))
            .unwrap();
        let err = store
            .complete_multipart("data", &upload_id, &[(1, "\"bogus\"".to_string())])
            .unwrap_err();
        assert_eq!(err, StoreError::InvalidPart);
        // Upload survives a failed completion
        assert!(store.abort_multipart("data", &upload_id).is_ok());
    }
}
