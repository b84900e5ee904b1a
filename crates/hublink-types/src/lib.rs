//! Shared types for the HubLink peer protocol.
//!
//! This crate holds everything the engine consumes but does not own:
//! node configuration, the credential collaborator that signs the
//! connect-time authentication header, and the error types for both.

pub mod config;
pub mod error;
pub mod keychain;

pub use config::{AuthConfig, HubConfig, ReconnectConfig};
pub use error::CredentialError;
pub use keychain::{Credentials, KeyChain};
