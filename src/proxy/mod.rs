//! SigV4 signing proxy
//!
//! [`SigningProxy`] is the middleware itself: sign one request, forward
//! it, hand back the response stream. [`ProxyServer`] wraps it in a
//! listening HTTP front-end so unsigned local clients can talk to S3.

mod server;
mod service;

pub use server::ProxyServer;
pub use service::SigningProxy;
