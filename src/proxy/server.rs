//! Listening front-end for the signing proxy
//!
//! Accepts plain (unsigned) HTTP requests, rewrites them onto the
//! configured upstream endpoint, signs them, and streams the upstream
//! response back to the caller.

use anyhow::{Context, Result};
use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{body::Incoming, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::proxy::SigningProxy;

/// HTTP body type for responses
type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

/// Signing proxy server state
pub struct ProxyServer {
    proxy: SigningProxy,
    upstream: String,
    listen: String,
}

impl ProxyServer {
    /// Create a new proxy server forwarding to the given upstream endpoint
    pub fn new(proxy: SigningProxy, upstream: String, listen: String) -> Self {
        Self {
            proxy,
            upstream: upstream.trim_end_matches('/').to_string(),
            listen,
        }
    }

    /// Start the proxy server and listen for incoming connections
    pub async fn run(self) -> Result<()> {
        let addr: SocketAddr = self
            .listen
            .parse()
            .context(format!("Invalid listen address: {}", self.listen))?;

        let listener = TcpListener::bind(addr)
            .await
            .context(format!("Failed to bind to {}", addr))?;

        self.serve_on(listener).await
    }

    /// Serve connections from an already-bound listener.
    pub async fn serve_on(self, listener: TcpListener) -> Result<()> {
        let addr = listener.local_addr().context("listener has no local addr")?;
        info!("signing proxy listening on {} -> {}", addr, self.upstream);

        let server = Arc::new(self);

        loop {
            let (stream, remote_addr) = match listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                    continue;
                }
            };

            let server = Arc::clone(&server);

            tokio::spawn(async move {
                let io = TokioIo::new(stream);

                let service = service_fn(move |req| {
                    let server = Arc::clone(&server);
                    async move { server.handle_request(req).await }
                });

                if let Err(e) = http1::Builder::new()
                    .keep_alive(true)
                    .serve_connection(io, service)
                    .await
                {
                    // Filter out benign connection reset errors
                    let err_str = format!("{}", e);
                    if !err_str.contains("connection reset") && !err_str.contains("broken pipe") {
                        error!("Error serving connection from {}: {}", remote_addr, e);
                    }
                }
            });
        }
    }

    /// Sign and forward one incoming request
    async fn handle_request(&self, req: Request<Incoming>) -> Result<Response<BoxBody>> {
        let method = req.method().clone();
        let uri = req.uri().clone();

        debug!("{} {}", method, uri);

        let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
        let upstream_url = format!("{}{}", self.upstream, path_and_query);

        // Carry over the entity headers that matter downstream; the
        // signing set itself is overwritten by the signer.
        let mut extra_headers = BTreeMap::new();
        for name in ["content-type", "content-length", "range"] {
            if let Some(value) = req.headers().get(name) {
                if let Ok(v) = value.to_str() {
                    extra_headers.insert(name.to_string(), v.to_string());
                }
            }
        }

        let body = match req.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                warn!("Failed to read request body: {}", e);
                return self.error_response(
                    StatusCode::BAD_REQUEST,
                    format!("Failed to read request body: {}", e),
                );
            }
        };

        if !body.is_empty() && !extra_headers.contains_key("content-length") {
            extra_headers.insert("content-length".to_string(), body.len().to_string());
        }

        let response = match self
            .proxy
            .request(method.clone(), &upstream_url, extra_headers, body)
            .await
        {
            Ok(r) => r,
            Err(e) => {
                error!(method = %method, url = %upstream_url, error = %e, "upstream_request_failed");
                return self.error_response(
                    StatusCode::BAD_GATEWAY,
                    format!("Upstream request failed: {}", e),
                );
            }
        };

        let status = response.status();

        // Forward the upstream response, streaming the body and keeping
        // only the S3-relevant response headers.
        let mut builder = Response::builder().status(status);
        for (name, value) in response.headers().iter() {
            let n = name.as_str();
            if n.starts_with("x-amz-")
                || n == "content-type"
                || n == "content-length"
                || n == "etag"
                || n == "last-modified"
                || n == "accept-ranges"
                || n == "content-range"
            {
                builder = builder.header(name, value);
            }
        }

        Ok(builder.body(response.into_body().boxed()).unwrap())
    }

    /// Create an error response
    fn error_response(&self, status: StatusCode, message: String) -> Result<Response<BoxBody>> {
        use http_body_util::Full;
        Ok(Response::builder()
            .status(status)
            .header("Content-Type", "text/plain")
            .body(
                Full::new(Bytes::from(message))
                    .map_err(|never| match never {})
                    .boxed(),
            )
            .unwrap())
    }
}
