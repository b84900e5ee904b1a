//! Ed25519 node identity and the connect-time authentication header.
//!
//! A node proves its identity to the hub with a single request header:
//!
//! ```text
//! key.<base64 DER public key>.<base64 signature>.<unix expiry>
//! ```
//!
//! The expiry is the signing time plus [`HEADER_VALIDITY_SECS`], and the
//! signature covers the expiry's decimal string. The public key is the raw
//! 32-byte Ed25519 key behind the fixed DER `SubjectPublicKeyInfo` prefix,
//! so peers can feed it straight into a standard SPKI parser.

use crate::error::{CredentialError, CredentialResult};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use std::fmt;
use std::io::Write;
use std::path::Path;
use tracing::info;
use zeroize::Zeroizing;

/// DER prefix of an Ed25519 `SubjectPublicKeyInfo`.
pub const ED25519_SPKI_PREFIX: [u8; 12] = [
    0x30, 0x2a, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70, 0x03, 0x21, 0x00,
];

/// Seconds an authentication header stays valid after signing.
pub const HEADER_VALIDITY_SECS: i64 = 60;

const HEADER_SCHEME: &str = "key";

/// Anything that can produce an authentication header at connect time.
pub trait Credentials: Send + Sync + 'static {
    /// A fresh header value for the next connection attempt.
    fn auth_header(&self) -> CredentialResult<String>;
}

/// A node's Ed25519 signing identity.
pub struct KeyChain {
    signing_key: SigningKey,
}

impl KeyChain {
    /// Generate a new random identity (not persisted).
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Build an identity from raw secret key bytes.
    pub fn from_bytes(raw: &[u8]) -> CredentialResult<Self> {
        let bytes: [u8; 32] = raw.try_into().map_err(|_| {
            CredentialError::InvalidKey(format!("expected 32 bytes, got {}", raw.len()))
        })?;
        Ok(Self {
            signing_key: SigningKey::from_bytes(&bytes),
        })
    }

    /// Load the key stored at `path`, or generate one and store it there.
    pub fn load_or_create(path: &Path) -> CredentialResult<Self> {
        if path.exists() {
            let raw = Zeroizing::new(std::fs::read(path)?);
            return Self::from_bytes(&raw);
        }

        let keychain = Self::generate();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let raw = Zeroizing::new(keychain.signing_key.to_bytes());
        write_private_file(path, raw.as_slice())?;
        info!(path = %path.display(), "Generated new node key");
        Ok(keychain)
    }

    /// Base64 of the DER-prefixed public key.
    pub fn public_key(&self) -> String {
        let mut der = Vec::with_capacity(ED25519_SPKI_PREFIX.len() + 32);
        der.extend_from_slice(&ED25519_SPKI_PREFIX);
        der.extend_from_slice(self.signing_key.verifying_key().as_bytes());
        STANDARD.encode(der)
    }

    /// The public half of this identity.
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Base64 signature over the UTF-8 bytes of `text`.
    pub fn sign(&self, text: &str) -> String {
        let signature = self.signing_key.sign(text.as_bytes());
        STANDARD.encode(signature.to_bytes())
    }

    /// Authentication header signed at `unix_now`.
    pub fn auth_header_at(&self, unix_now: i64) -> String {
        let expires = (unix_now + HEADER_VALIDITY_SECS).to_string();
        format!(
            "{HEADER_SCHEME}.{}.{}.{expires}",
            self.public_key(),
            self.sign(&expires)
        )
    }
}

impl Credentials for KeyChain {
    fn auth_header(&self) -> CredentialResult<String> {
        Ok(self.auth_header_at(chrono::Utc::now().timestamp()))
    }
}

impl fmt::Debug for KeyChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyChain")
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}

/// Check an authentication header against `unix_now` and return the
/// caller's public key.
pub fn verify_auth_header(value: &str, unix_now: i64) -> CredentialResult<VerifyingKey> {
    let malformed = |what: &str| CredentialError::MalformedHeader(what.to_string());

    let mut parts = value.trim().split('.');
    let (Some(scheme), Some(key), Some(signature), Some(expires), None) = (
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
    ) else {
        return Err(malformed("expected four dot-separated fields"));
    };
    if scheme != HEADER_SCHEME {
        return Err(malformed("unknown scheme"));
    }

    let der = STANDARD
        .decode(key)
        .map_err(|_| malformed("public key is not base64"))?;
    let raw_key = der
        .strip_prefix(&ED25519_SPKI_PREFIX[..])
        .ok_or_else(|| malformed("public key lacks the Ed25519 DER prefix"))?;
    let raw_key: [u8; 32] = raw_key
        .try_into()
        .map_err(|_| malformed("public key has the wrong length"))?;
    let verifying_key =
        VerifyingKey::from_bytes(&raw_key).map_err(|_| malformed("invalid public key"))?;

    let sig_bytes = STANDARD
        .decode(signature)
        .map_err(|_| malformed("signature is not base64"))?;
    let sig_bytes: [u8; 64] = sig_bytes
        .as_slice()
        .try_into()
        .map_err(|_| malformed("signature has the wrong length"))?;
    verifying_key
        .verify(expires.as_bytes(), &Signature::from_bytes(&sig_bytes))
        .map_err(|_| CredentialError::BadSignature)?;

    let expires: i64 = expires
        .parse()
        .map_err(|_| malformed("expiry is not a unix timestamp"))?;
    if expires < unix_now {
        return Err(CredentialError::Expired {
            expires,
            now: unix_now,
        });
    }

    Ok(verifying_key)
}

/// Create `path` (it must not exist yet) readable only by the owner on unix.
fn write_private_file(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(contents)?;
    file.sync_all()
}
