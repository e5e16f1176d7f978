//! Credential types and asynchronous credential sources

use async_trait::async_trait;
use zeroize::Zeroize;

use crate::error::{Error, Result};

/// One set of AWS credentials, immutable per fetch.
///
/// The secret key is wiped from memory when the value is dropped.
pub struct Credentials {
    access_key: String,
    secret_key: String,
    session_token: Option<String>,
}

impl Credentials {
    pub fn new(access_key: String, secret_key: String, session_token: Option<String>) -> Self {
        Self {
            access_key,
            secret_key,
            session_token: session_token.filter(|t| !t.is_empty()),
        }
    }

    pub fn access_key(&self) -> &str {
        &self.access_key
    }

    pub fn secret_key(&self) -> &str {
        &self.secret_key
    }

    pub fn session_token(&self) -> Option<&str> {
        self.session_token.as_deref()
    }
}

impl Clone for Credentials {
    fn clone(&self) -> Self {
        Self {
            access_key: self.access_key.clone(),
            secret_key: self.secret_key.clone(),
            session_token: self.session_token.clone(),
        }
    }
}

impl Drop for Credentials {
    fn drop(&mut self) {
        self.secret_key.zeroize();
        if let Some(ref mut token) = self.session_token {
            token.zeroize();
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// A polymorphic source of credentials with one async operation.
///
/// The signing proxy fetches once per outbound request; sources that want
/// to amortize an expensive fetch wrap themselves in [`CachingProvider`].
#[async_trait]
pub trait CredentialsProvider: Send + Sync {
    async fn fetch(&self) -> Result<Credentials>;
}

/// Fixed credentials supplied at construction time.
pub struct StaticCredentials {
    credentials: Credentials,
}

impl StaticCredentials {
    pub fn new(access_key: String, secret_key: String, session_token: Option<String>) -> Self {
        Self {
            credentials: Credentials::new(access_key, secret_key, session_token),
        }
    }
}

#[async_trait]
impl CredentialsProvider for StaticCredentials {
    async fn fetch(&self) -> Result<Credentials> {
        Ok(self.credentials.clone())
    }
}

/// Credentials read from the standard AWS environment variables on every
/// fetch: `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`, and optionally
/// `AWS_SESSION_TOKEN`.
pub struct EnvCredentials;

#[async_trait]
impl CredentialsProvider for EnvCredentials {
    async fn fetch(&self) -> Result<Credentials> {
        let access_key = std::env::var("AWS_ACCESS_KEY_ID")
            .map_err(|_| Error::CredentialsUnavailable("AWS_ACCESS_KEY_ID is not set".into()))?;
        let secret_key = std::env::var("AWS_SECRET_ACCESS_KEY").map_err(|_| {
            Error::CredentialsUnavailable("AWS_SECRET_ACCESS_KEY is not set".into())
        })?;
        let session_token = std::env::var("AWS_SESSION_TOKEN").ok();
        Ok(Credentials::new(access_key, secret_key, session_token))
    }
}

/// Memoizing wrapper around another provider.
///
/// The first successful fetch is reused for the lifetime of the wrapper.
/// Refresh-before-expiry policies belong in the inner provider; the signer
/// stays oblivious either way.
pub struct CachingProvider<P> {
    inner: P,
    cached: tokio::sync::Mutex<Option<Credentials>>,
}

impl<P> CachingProvider<P> {
    pub fn new(inner: P) -> Self {
        Self {
            inner,
            cached: tokio::sync::Mutex::new(None),
        }
    }
}

#[async_trait]
impl<P: CredentialsProvider> CredentialsProvider for CachingProvider<P> {
    async fn fetch(&self) -> Result<Credentials> {
        let mut cached = self.cached.lock().await;
        if let Some(ref creds) = *cached {
            return Ok(creds.clone());
        }
        let creds = self.inner.fetch().await?;
        *cached = Some(creds.clone());
        Ok(creds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_provider_round_trip() {
        let provider = StaticCredentials::new("AKID".into(), "secret".into(), None);
        let creds = provider.fetch().await.unwrap();
        assert_eq!(creds.access_key(), "AKID");
        assert_eq!(creds.secret_key(), "secret");
        assert_eq!(creds.session_token(), None);
    }

    #[tokio::test]
    async fn test_empty_session_token_is_none() {
        let provider = StaticCredentials::new("AKID".into(), "secret".into(), Some(String::new()));
        let creds = provider.fetch().await.unwrap();
        assert_eq!(creds.session_token(), None);
    }

    #[tokio::test]
    async fn test_caching_provider_fetches_once() {
        use std::sync::atomic::{AtomicU32, Ordering};

        struct CountingProvider(AtomicU32);

        #[async_trait]
        impl CredentialsProvider for CountingProvider {
            async fn fetch(&self) -> Result<Credentials> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(Credentials::new("k".into(), "s".into(), None))
            }
        }

        let provider = CachingProvider::new(CountingProvider(AtomicU32::new(0)));
        provider.fetch().await.unwrap();
        provider.fetch().await.unwrap();
        assert_eq!(provider.inner.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_env_provider_reads_aws_variables() {
        let orig_key = std::env::var("AWS_ACCESS_KEY_ID").ok();
        let orig_secret = std::env::var("AWS_SECRET_ACCESS_KEY").ok();

        std::env::set_var("AWS_ACCESS_KEY_ID", "env-key");
        std::env::set_var("AWS_SECRET_ACCESS_KEY", "env-secret");
        std::env::remove_var("AWS_SESSION_TOKEN");

        let creds = EnvCredentials.fetch().await.unwrap();
        assert_eq!(creds.access_key(), "env-key");
        assert_eq!(creds.secret_key(), "env-secret");
        assert_eq!(creds.session_token(), None);

        match orig_key {
            Some(v) => std::env::set_var("AWS_ACCESS_KEY_ID", v),
            None => std::env::remove_var("AWS_ACCESS_KEY_ID"),
        }
        match orig_secret {
            Some(v) => std::env::set_var("AWS_SECRET_ACCESS_KEY", v),
            None => std::env::remove_var("AWS_SECRET_ACCESS_KEY"),
        }
    }

    #[test]
    fn test_debug_redacts_secret() {
        let creds = Credentials::new("AKID".into(), "very-secret".into(), Some("tok".into()));
        let rendered = format!("{:?}", creds);
        assert!(!rendered.contains("very-secret"));
        assert!(!rendered.contains("tok"));
    }
}
