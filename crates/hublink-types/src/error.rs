//! Shared error types for HubLink.

use thiserror::Error;

/// Errors raised by the credential collaborator.
#[derive(Error, Debug)]
pub enum CredentialError {
    /// Reading or writing the key file failed.
    #[error("Key file error: {0}")]
    Io(#[from] std::io::Error),

    /// The stored key material is not a valid Ed25519 secret key.
    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    /// An authentication header could not be parsed.
    #[error("Malformed auth header: {0}")]
    MalformedHeader(String),

    /// The header's signature does not match its public key.
    #[error("Auth header signature rejected")]
    BadSignature,

    /// The header's validity window has passed.
    #[error("Auth header expired at {expires} (now {now})")]
    Expired {
        /// Unix timestamp carried in the header.
        expires: i64,
        /// Unix timestamp the header was checked against.
        now: i64,
    },
}

/// Alias for credential results.
pub type CredentialResult<T> = Result<T, CredentialError>;
