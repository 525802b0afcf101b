use std::{fmt, time::Duration};

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE, Engine as _};
use rand::{rngs::OsRng, RngCore};
use thiserror::Error;
use zeroize::Zeroizing;

/// Length of the symmetric master key in bytes (256-bit).
pub const MASTER_KEY_LEN: usize = 32;

/// Root-owned file the privileged helper reads the encoded master key from.
pub const MASTER_KEY_PATH: &str = "/etc/keyward/master.key";

/// Errors raised while obtaining the master key.
///
/// Every variant is returned only after the elevation used to obtain the key
/// has been revoked.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BrokerError {
    /// The privileged helper binary does not exist.
    #[error("privileged helper not found at {path}")]
    HelperNotFound { path: String },
    /// The helper ran and exited non-zero.
    #[error("privileged helper failed: {message}")]
    HelperFailed { message: String },
    /// The helper succeeded but printed nothing.
    #[error("privileged helper returned an empty master key")]
    EmptyMasterKey,
    /// The helper printed something that is not an encoded 256-bit key.
    #[error("master key is malformed: {reason}")]
    MalformedMasterKey { reason: String },
    /// The escalation prompt or helper did not finish in time.
    #[error("privileged helper timed out after {after:?}")]
    TimedOut { after: Duration },
    /// The escalation program could not be started.
    #[error("escalation failed: {reason}")]
    Escalation { reason: String },
    /// Revoking the elevation session failed.
    #[error("failed to revoke elevation: {reason}")]
    RevokeFailed { reason: String },
}

/// Ephemeral symmetric key used for exactly one vault operation.
///
/// Not `Clone`: a fetched key is consumed by the operation that fetched it.
/// The bytes are wiped when the value is dropped.
pub struct MasterKey {
    bytes: Zeroizing<[u8; MASTER_KEY_LEN]>,
}

impl MasterKey {
    /// Build a key from raw bytes.
    pub fn from_bytes(bytes: [u8; MASTER_KEY_LEN]) -> Self {
        Self {
            bytes: Zeroizing::new(bytes),
        }
    }

    /// Decode the helper's wire form: URL-safe base64 (padded) of 32 bytes.
    pub fn decode(encoded: &[u8]) -> Result<Self, BrokerError> {
        let decoded = Zeroizing::new(URL_SAFE.decode(encoded).map_err(|e| {
            BrokerError::MalformedMasterKey {
                reason: e.to_string(),
            }
        })?);

        if decoded.len() != MASTER_KEY_LEN {
            return Err(BrokerError::MalformedMasterKey {
                reason: format!("expected {MASTER_KEY_LEN} bytes, got {}", decoded.len()),
            });
        }

        let mut out = [0u8; MASTER_KEY_LEN];
        out.copy_from_slice(&decoded);
        let key = Self::from_bytes(out);
        zeroize::Zeroize::zeroize(&mut out);
        Ok(key)
    }

    /// Generate a fresh random key (used when provisioning the key file).
    pub fn generate() -> Self {
        let mut bytes = Zeroizing::new([0u8; MASTER_KEY_LEN]);
        OsRng.fill_bytes(&mut bytes[..]);
        Self { bytes }
    }

    /// Encode into the wire form accepted by [`MasterKey::decode`].
    pub fn encode(&self) -> Zeroizing<String> {
        Zeroizing::new(URL_SAFE.encode(&self.bytes[..]))
    }

    pub fn as_bytes(&self) -> &[u8; MASTER_KEY_LEN] {
        &self.bytes
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MasterKey(<redacted>)")
    }
}

/// The only path by which a master key enters the process.
///
/// Implementations must not cache: every call performs a fresh, authenticated
/// fetch.
#[async_trait]
pub trait MasterKeySource: Send + Sync {
    async fn fetch(&self) -> Result<MasterKey, BrokerError>;
}
