//! Error kinds shared across the crate
//!
//! None of these are retried internally; transient-error classification
//! (503, connection reset) is the caller's responsibility.

use hyper::StatusCode;
use thiserror::Error;

/// Errors surfaced by the signing proxy, the S3 client, and the
/// multipart stream.
#[derive(Error, Debug)]
pub enum Error {
    /// The credentials provider failed; fatal for the current request.
    #[error("credentials unavailable: {0}")]
    CredentialsUnavailable(String),

    /// Inconsistent signing inputs (empty region/service, non-ASCII header
    /// value). Well-formed callers never see this.
    #[error("signing error: {0}")]
    Signing(String),

    /// Downstream transport error, surfaced verbatim.
    #[error("HTTP error: {0}")]
    Http(String),

    /// A 4xx/5xx response. When the body parses as an `<Error>` document,
    /// `code` and `message` come from it; otherwise `code` is `Unknown` and
    /// `message` is the raw body.
    #[error("S3 error {status}: {code} - {message}")]
    S3 {
        code: String,
        message: String,
        status: StatusCode,
    },

    /// One part upload failed; subsequent writes and `end()` return this.
    #[error("multipart upload failed{}: {cause}", part_display(.part_number))]
    MultipartFailed {
        part_number: Option<u32>,
        cause: Box<Error>,
    },

    /// An expected element was missing from an S3 response body.
    #[error("malformed XML: missing {0}")]
    XmlMalformed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn part_display(part_number: &Option<u32>) -> String {
    match part_number {
        Some(n) => format!(" (part {n})"),
        None => String::new(),
    }
}

impl From<hyper::Error> for Error {
    fn from(err: hyper::Error) -> Self {
        Error::Http(err.to_string())
    }
}

impl From<hyper::http::Error> for Error {
    fn from(err: hyper::http::Error) -> Self {
        Error::Http(err.to_string())
    }
}

impl From<hyper_util::client::legacy::Error> for Error {
    fn from(err: hyper_util::client::legacy::Error) -> Self {
        Error::Http(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Wrap a part-upload failure, preserving the original cause.
    pub fn multipart(part_number: Option<u32>, cause: Error) -> Self {
        Error::MultipartFailed {
            part_number,
            cause: Box::new(cause),
        }
    }
}
