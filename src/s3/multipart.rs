//! Streaming multipart upload
//!
//! An append-only byte sink: bytes accumulate in a fixed-size buffer, a
//! full buffer becomes one `UploadPart` request, and `end()` flushes the
//! tail, waits for every in-flight part, and posts the completion XML.
//! Part numbers are assigned at buffer rotation, so the completion
//! document always lists a dense ascending `1..N` sequence.

use bytes::BytesMut;
use tokio::task::JoinSet;

use crate::error::{Error, Result};
use crate::s3::client::S3Client;
use crate::s3::types::{CompletedPart, MultipartConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamState {
    Open,
    Completing,
    Completed,
    Failed,
}

/// Byte sink driving one multipart upload.
///
/// The stream exclusively owns its buffer, part list, and upload id.
/// Dropping it before `end()` aborts all in-flight part uploads and
/// leaves the server-side upload dangling; cleaning that up (via
/// [`S3Client::abort_multipart_upload`]) is the caller's decision.
pub struct MultipartStream {
    client: S3Client,
    bucket: String,
    key: String,
    upload_id: String,
    part_size: usize,
    max_inflight: usize,
    buffer: BytesMut,
    next_part_number: u32,
    inflight: JoinSet<Result<CompletedPart>>,
    parts: Vec<CompletedPart>,
    state: StreamState,
    failure: Option<Error>,
}

impl MultipartStream {
    pub(crate) fn new(
        client: S3Client,
        bucket: String,
        key: String,
        upload_id: String,
        config: MultipartConfig,
    ) -> Self {
        Self {
            client,
            bucket,
            key,
            upload_id,
            part_size: config.part_size,
            max_inflight: config.max_inflight.max(1),
            buffer: BytesMut::with_capacity(config.part_size),
            next_part_number: 1,
            inflight: JoinSet::new(),
            parts: Vec::new(),
            state: StreamState::Open,
            failure: None,
        }
    }

    pub fn upload_id(&self) -> &str {
        &self.upload_id
    }

    /// Append bytes to the stream.
    ///
    /// Returns once every byte is either buffered or handed to a spawned
    /// part upload; caller byte order is preserved. When a part upload
    /// has failed, the write is rejected and the stream stays `Failed`.
    pub async fn write(&mut self, mut bytes: &[u8]) -> Result<()> {
        match self.state {
            StreamState::Open => {}
            StreamState::Failed => return Err(self.rejection()),
            _ => {
                return Err(Error::multipart(
                    None,
                    Error::Http("stream is already completing".into()),
                ))
            }
        }

        while !bytes.is_empty() {
            let remaining = self.part_size - self.buffer.len();
            let take = remaining.min(bytes.len());
            self.buffer.extend_from_slice(&bytes[..take]);
            bytes = &bytes[take..];

            if self.buffer.len() == self.part_size {
                self.rotate().await?;
            }
        }

        Ok(())
    }

    /// Flush the tail, await every in-flight part, and post the
    /// completion document. Returns the final object ETag.
    pub async fn end(mut self) -> Result<String> {
        match self.state {
            StreamState::Open => {}
            StreamState::Failed => {
                let failure = self.failure.take();
                return Err(failure.unwrap_or_else(|| self.rejection()));
            }
            _ => {
                return Err(Error::multipart(
                    None,
                    Error::Http("stream is already completing".into()),
                ))
            }
        }
        self.state = StreamState::Completing;

        // The tail may be smaller than the minimum part size; S3 allows
        // that for the final part. A rotation error here is already
        // recorded in self.failure and picked up below.
        if self.failure.is_none() && !self.buffer.is_empty() {
            let _ = self.rotate().await;
        }

        while let Some(joined) = self.inflight.join_next().await {
            match joined {
                Ok(Ok(part)) => self.parts.push(part),
                Ok(Err(e)) => {
                    if self.failure.is_none() {
                        self.failure = Some(e);
                    }
                }
                Err(join_err) => {
                    if self.failure.is_none() {
                        self.failure = Some(Error::multipart(
                            None,
                            Error::Http(format!("part upload task failed: {join_err}")),
                        ));
                    }
                }
            }
        }

        if let Some(failure) = self.failure.take() {
            self.state = StreamState::Failed;
            return Err(failure);
        }

        if self.parts.is_empty() {
            self.state = StreamState::Failed;
            return Err(Error::multipart(
                None,
                Error::Http("no bytes were written to the stream".into()),
            ));
        }

        self.parts.sort_by_key(|p| p.part_number);

        tracing::debug!(
            upload_id = %self.upload_id,
            parts = self.parts.len(),
            "completing multipart upload"
        );

        let etag = self
            .client
            .complete_multipart_upload(&self.bucket, &self.key, &self.upload_id, &self.parts)
            .await?;

        self.state = StreamState::Completed;
        Ok(etag)
    }

    /// Ship the current buffer as the next part and reset it.
    ///
    /// Applies backpressure first: with `max_inflight` uploads running,
    /// one must finish before the next is spawned.
    async fn rotate(&mut self) -> Result<()> {
        while self.inflight.len() >= self.max_inflight {
            self.drain_one().await?;
        }

        let data = self.buffer.split().freeze();
        let part_number = self.next_part_number;
        self.next_part_number += 1;

        let client = self.client.clone();
        let bucket = self.bucket.clone();
        let key = self.key.clone();
        let upload_id = self.upload_id.clone();

        tracing::debug!(part_number, size = data.len(), "spawning part upload");

        self.inflight.spawn(async move {
            client
                .upload_part(&bucket, &key, &upload_id, part_number, data)
                .await
                .map(|etag| CompletedPart::new(part_number, etag))
                .map_err(|e| Error::multipart(Some(part_number), e))
        });

        Ok(())
    }

    /// Wait for one in-flight part; record its ETag or latch the failure.
    async fn drain_one(&mut self) -> Result<()> {
        match self.inflight.join_next().await {
            Some(Ok(Ok(part))) => {
                self.parts.push(part);
                Ok(())
            }
            Some(Ok(Err(e))) => {
                self.state = StreamState::Failed;
                let rejection = Self::rejection_for(&e);
                self.failure = Some(e);
                Err(rejection)
            }
            Some(Err(join_err)) => {
                self.state = StreamState::Failed;
                let e = Error::multipart(
                    None,
                    Error::Http(format!("part upload task failed: {join_err}")),
                );
                let rejection = Self::rejection_for(&e);
                self.failure = Some(e);
                Err(rejection)
            }
            None => Ok(()),
        }
    }

    /// Rejection error for writes after failure; `end()` surfaces the
    /// recorded failure itself.
    fn rejection(&self) -> Error {
        match &self.failure {
            Some(e) => Self::rejection_for(e),
            None => Error::multipart(None, Error::Http("stream is closed".into())),
        }
    }

    fn rejection_for(failure: &Error) -> Error {
        match failure {
            Error::MultipartFailed { part_number, cause } => {
                Error::multipart(*part_number, Error::Http(cause.to_string()))
            }
            other => Error::multipart(None, Error::Http(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticCredentials;
    use std::sync::Arc;

    fn stream() -> MultipartStream {
        let provider = Arc::new(StaticCredentials::new("k".into(), "s".into(), None));
        let client = S3Client::new(provider, "us-east-1");
        MultipartStream::new(
            client,
            "bucket".into(),
            "key".into(),
            "upload-1".into(),
            MultipartConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_small_writes_stay_buffered() {
        let mut s = stream();
        s.write(b"hello").await.unwrap();
        s.write(b" world").await.unwrap();
        assert_eq!(s.buffer.len(), 11);
        assert_eq!(s.next_part_number, 1);
        assert!(s.inflight.is_empty());
    }

    #[tokio::test]
    async fn test_empty_write_is_noop() {
        let mut s = stream();
        s.write(b"").await.unwrap();
        assert_eq!(s.buffer.len(), 0);
    }
}
