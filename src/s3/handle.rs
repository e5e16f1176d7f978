//! Capability-style typed handles: S3 -> Bucket -> Object
//!
//! Thin wrappers over a shared [`S3Client`]. Ownership is one-way: an
//! object handle carries its bucket name by value rather than a
//! back-reference, so no reference cycle arises.

use bytes::Bytes;
use hyper::HeaderMap;
use tokio::io::AsyncWrite;

use crate::error::Result;
use crate::s3::client::S3Client;
use crate::s3::types::{
    ByteRange, GetObjectOutput, ListBucketsCallback, MultipartConfig,
};
use crate::s3::MultipartStream;

/// Root handle: the service itself.
#[derive(Clone)]
pub struct S3Handle {
    client: S3Client,
}

impl S3Handle {
    pub fn new(client: S3Client) -> Self {
        Self { client }
    }

    /// Enumerate buckets through the callback interface.
    pub async fn list_buckets(&self, callback: &mut dyn ListBucketsCallback) -> Result<()> {
        self.client.list_buckets(callback).await
    }

    /// Get a handle to a named bucket. Purely local; no request is made.
    pub fn bucket(&self, name: &str) -> BucketHandle {
        BucketHandle {
            client: self.client.clone(),
            name: name.to_string(),
        }
    }
}

/// Handle to one bucket.
#[derive(Clone)]
pub struct BucketHandle {
    client: S3Client,
    name: String,
}

impl BucketHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get a handle to an object key. Purely local; no request is made.
    pub fn object(&self, key: &str) -> ObjectHandle {
        ObjectHandle {
            client: self.client.clone(),
            bucket: self.name.clone(),
            key: key.to_string(),
        }
    }
}

/// Handle to one object key.
#[derive(Clone)]
pub struct ObjectHandle {
    client: S3Client,
    bucket: String,
    key: String,
}

impl ObjectHandle {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// HEAD: response headers verbatim.
    pub async fn head(&self) -> Result<HeaderMap> {
        self.client.head_object(&self.bucket, &self.key).await
    }

    /// GET, pumping the body into the sink; optionally ranged.
    pub async fn read<W>(&self, range: Option<ByteRange>, sink: &mut W) -> Result<GetObjectOutput>
    where
        W: AsyncWrite + Unpin,
    {
        self.client
            .get_object(&self.bucket, &self.key, range, sink)
            .await
    }

    /// PUT the full buffer as the object body.
    pub async fn write(&self, data: Bytes) -> Result<()> {
        self.client.put_object(&self.bucket, &self.key, data).await
    }

    /// DELETE the object.
    pub async fn delete(&self) -> Result<()> {
        self.client.delete_object(&self.bucket, &self.key).await
    }

    /// Start a streaming multipart upload to this key.
    pub async fn multipart(&self, config: MultipartConfig) -> Result<MultipartStream> {
        self.client
            .start_multipart(&self.bucket, &self.key, config)
            .await
    }

    /// Abort a multipart upload previously started on this key.
    pub async fn abort_multipart(&self, upload_id: &str) -> Result<()> {
        self.client
            .abort_multipart_upload(&self.bucket, &self.key, upload_id)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticCredentials;
    use std::sync::Arc;

    #[test]
    fn test_handles_are_local() {
        let provider = Arc::new(StaticCredentials::new("k".into(), "s".into(), None));
        let s3 = S3Handle::new(S3Client::new(provider, "us-east-1"));
        let bucket = s3.bucket("data");
        let object = bucket.object("a/b.txt");
        assert_eq!(bucket.name(), "data");
        assert_eq!(object.bucket(), "data");
        assert_eq!(object.key(), "a/b.txt");
    }
}
