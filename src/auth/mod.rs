//! AWS Signature Version 4 authentication
//!
//! This module provides:
//! - Credential types and async credential sources
//! - Canonical request construction per SigV4
//! - The signer: key derivation, string-to-sign, Authorization header

pub mod canonical;
pub mod credentials;
pub mod signer;

pub use credentials::{
    CachingProvider, Credentials, CredentialsProvider, EnvCredentials, StaticCredentials,
};
pub use signer::{Signer, SigningScope, ALGORITHM, UNSIGNED_PAYLOAD};
