//! The signing interceptor
//!
//! One operation: take a client request, fetch credentials, enrich the
//! headers with date/nonce/content-hash (and session token when present),
//! compute the SigV4 signature, and forward the request downstream. The
//! response comes back verbatim: status, headers, and body stream.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{HeaderMap, Method, Request, Response, StatusCode};
use hyper_tls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client as HyperClient;
use hyper_util::rt::TokioExecutor;
use native_tls::TlsConnector;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::signer::UNSIGNED_PAYLOAD;
use crate::auth::{CredentialsProvider, Signer};
use crate::error::{Error, Result};
use crate::hash::EMPTY_SHA256;

/// HTTP middleware that signs every request it forwards.
///
/// Clone is cheap: the hyper client is internally reference-counted and
/// the credentials source is shared.
#[derive(Clone)]
pub struct SigningProxy {
    client: HyperClient<HttpsConnector<HttpConnector>, Full<Bytes>>,
    provider: Arc<dyn CredentialsProvider>,
    signer: Signer,
}

impl SigningProxy {
    /// Create a signing proxy for the given region, targeting the `s3`
    /// service.
    ///
    /// The transport matches tuned S3 client settings: HTTP/1.1, large
    /// idle pool, TCP_NODELAY, 90s keepalive.
    pub fn new(provider: Arc<dyn CredentialsProvider>, region: &str) -> Self {
        Self::for_service(provider, region, "s3")
    }

    /// Create a signing proxy for an arbitrary service name.
    pub fn for_service(
        provider: Arc<dyn CredentialsProvider>,
        region: &str,
        service: &str,
    ) -> Self {
        let insecure_tls = std::env::var("S3CAP_INSECURE_TLS")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        let mut http = HttpConnector::new();
        http.set_nodelay(true);
        http.enforce_http(false);
        http.set_connect_timeout(Some(Duration::from_secs(10)));
        http.set_keepalive(Some(Duration::from_secs(90)));

        let tls = if insecure_tls {
            tracing::warn!("INSECURE TLS MODE ENABLED: certificate verification is disabled");
            TlsConnector::builder()
                .danger_accept_invalid_certs(true)
                .danger_accept_invalid_hostnames(true)
                .build()
                .expect("Failed to build TLS connector")
        } else {
            TlsConnector::new().expect("Failed to build TLS connector")
        };

        let https = HttpsConnector::from((http, tls.into()));

        let client = HyperClient::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(1024)
            .set_host(true)
            .build(https);

        Self {
            client,
            provider,
            signer: Signer::new(region.to_string(), service.to_string()),
        }
    }

    /// Sign and forward one request; return the downstream response with
    /// its body still streaming.
    ///
    /// The payload hash is the empty-string SHA-256 for zero-length bodies
    /// and `UNSIGNED-PAYLOAD` otherwise; precomputed digests over
    /// arbitrary bodies are out of scope.
    pub async fn request(
        &self,
        method: Method,
        url: &str,
        headers: BTreeMap<String, String>,
        body: Bytes,
    ) -> Result<Response<Incoming>> {
        let credentials = self.provider.fetch().await.map_err(|e| match e {
            unavailable @ Error::CredentialsUnavailable(_) => unavailable,
            other => Error::CredentialsUnavailable(other.to_string()),
        })?;

        let payload_hash = if body.is_empty() {
            EMPTY_SHA256
        } else {
            UNSIGNED_PAYLOAD
        };

        // The caller keeps its map; signing mutates only this shallow copy.
        let mut signed_headers = headers;
        self.signer
            .sign(method.as_str(), url, &mut signed_headers, payload_hash, &credentials)?;

        tracing::debug!(method = %method, url = %url, "signed_request");

        let mut req = Request::builder().method(method).uri(url);
        for (name, value) in signed_headers.iter() {
            req = req.header(name, value);
        }

        let request = req.body(Full::new(body))?;
        let response = self.client.request(request).await?;
        Ok(response)
    }

    /// Sign, forward, and collect the full response body.
    ///
    /// Convenience for operations whose responses are small XML documents
    /// or header-only; draining the body also returns the connection to
    /// the pool.
    pub async fn request_collected(
        &self,
        method: Method,
        url: &str,
        headers: BTreeMap<String, String>,
        body: Bytes,
    ) -> Result<(StatusCode, HeaderMap, Bytes)> {
        let response = self.request(method, url, headers, body).await?;
        let status = response.status();
        let resp_headers = response.headers().clone();
        let body_bytes = response
            .collect()
            .await
            .map_err(|e| Error::Http(format!("body error: {e}")))?
            .to_bytes();
        Ok((status, resp_headers, body_bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticCredentials;

    #[test]
    fn test_proxy_is_clone() {
        let provider = Arc::new(StaticCredentials::new("k".into(), "s".into(), None));
        let proxy = SigningProxy::new(provider, "us-east-1");
        let _clone = proxy.clone();
    }
}
