//! Self-describing authenticated encryption token.
//!
//! Layout:
//! - version: 1 byte (`0x01`)
//! - issued_at: 8 bytes, big-endian unix seconds
//! - nonce: 12 bytes (AES-256-GCM)
//! - ciphertext: AEAD output (ciphertext + 16-byte tag)
//!
//! The version byte and timestamp are passed as associated data, so the tag
//! authenticates every byte of the token.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
    Aes256Gcm, Nonce,
};
use chrono::{DateTime, Utc};
use keyward_core::{
    key::MasterKey,
    storage::{Secret, VaultError},
};
use zeroize::Zeroizing;

pub const TOKEN_VERSION: u8 = 0x01;

const TIMESTAMP_LEN: usize = 8;
const HEADER_LEN: usize = 1 + TIMESTAMP_LEN;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const MIN_TOKEN_LEN: usize = HEADER_LEN + NONCE_LEN + TAG_LEN;

/// Encrypt `plaintext` into a fresh token stamped with the current time.
pub fn seal(key: &MasterKey, plaintext: &[u8]) -> Result<Vec<u8>, VaultError> {
    seal_at(key, plaintext, Utc::now())
}

fn seal_at(
    key: &MasterKey,
    plaintext: &[u8],
    issued_at: DateTime<Utc>,
) -> Result<Vec<u8>, VaultError> {
    let cipher = build_cipher(key)?;
    let header = header(issued_at);
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(
            &nonce,
            Payload {
                msg: plaintext,
                aad: &header,
            },
        )
        .map_err(|e| VaultError::Storage {
            reason: format!("encrypt failed: {e}"),
        })?;

    let mut token = Vec::with_capacity(HEADER_LEN + NONCE_LEN + ciphertext.len());
    token.extend_from_slice(&header);
    token.extend_from_slice(nonce.as_slice());
    token.extend_from_slice(&ciphertext);
    Ok(token)
}

/// Authenticate and decrypt a token. Anything short of a valid tag under
/// `key` is [`VaultError::DecryptionFailed`].
pub fn open(key: &MasterKey, token: &[u8]) -> Result<Secret, VaultError> {
    if token.len() < MIN_TOKEN_LEN || token[0] != TOKEN_VERSION {
        return Err(VaultError::DecryptionFailed);
    }
    let (header, rest) = token.split_at(HEADER_LEN);
    let (nonce, ciphertext) = rest.split_at(NONCE_LEN);

    build_cipher(key)?
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad: header,
            },
        )
        .map(Zeroizing::new)
        .map_err(|_| VaultError::DecryptionFailed)
}

/// Issuance time recorded in the token header. Unauthenticated until the
/// token is opened; informational only.
pub fn issued_at(token: &[u8]) -> Option<DateTime<Utc>> {
    if token.len() < HEADER_LEN || token[0] != TOKEN_VERSION {
        return None;
    }
    let mut secs = [0u8; TIMESTAMP_LEN];
    secs.copy_from_slice(&token[1..HEADER_LEN]);
    DateTime::from_timestamp(i64::from_be_bytes(secs), 0)
}

fn header(issued_at: DateTime<Utc>) -> [u8; HEADER_LEN] {
    let mut header = [0u8; HEADER_LEN];
    header[0] = TOKEN_VERSION;
    header[1..].copy_from_slice(&issued_at.timestamp().to_be_bytes());
    header
}

fn build_cipher(key: &MasterKey) -> Result<Aes256Gcm, VaultError> {
    Aes256Gcm::new_from_slice(key.as_bytes()).map_err(|e| VaultError::Storage {
        reason: format!("cipher init failed: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(byte: u8) -> MasterKey {
        MasterKey::from_bytes([byte; 32])
    }

    #[test]
    fn round_trip_recovers_plaintext() {
        let token = seal(&key(1), b"sk-live-123").expect("seal");
        let opened = open(&key(1), &token).expect("open");
        assert_eq!(opened.as_slice(), b"sk-live-123");
    }

    #[test]
    fn empty_plaintext_round_trips() {
        let token = seal(&key(1), b"").expect("seal");
        assert_eq!(token.len(), MIN_TOKEN_LEN);
        assert!(open(&key(1), &token).expect("open").is_empty());
    }

    #[test]
    fn every_single_byte_flip_is_detected() {
        let token = seal(&key(1), b"payload under test").expect("seal");
        for index in 0..token.len() {
            let mut tampered = token.clone();
            tampered[index] ^= 0x01;
            let err = open(&key(1), &tampered).expect_err("tampered token must not open");
            assert_eq!(err, VaultError::DecryptionFailed, "byte {index}");
        }
    }

    #[test]
    fn wrong_key_is_detected() {
        let token = seal(&key(1), b"payload").expect("seal");
        let err = open(&key(2), &token).expect_err("wrong key");
        assert_eq!(err, VaultError::DecryptionFailed);
    }

    #[test]
    fn truncated_token_is_rejected() {
        let token = seal(&key(1), b"payload").expect("seal");
        for len in [0, 1, HEADER_LEN, MIN_TOKEN_LEN - 1, token.len() - 1] {
            let err = open(&key(1), &token[..len]).expect_err("truncated");
            assert_eq!(err, VaultError::DecryptionFailed, "len {len}");
        }
    }

    #[test]
    fn nonce_is_fresh_per_seal() {
        let first = seal(&key(1), b"same").expect("seal");
        let second = seal(&key(1), b"same").expect("seal");
        assert_ne!(
            first[HEADER_LEN..HEADER_LEN + NONCE_LEN],
            second[HEADER_LEN..HEADER_LEN + NONCE_LEN]
        );
    }

    #[test]
    fn issued_at_reads_header() {
        let stamp = DateTime::from_timestamp(1_700_000_000, 0).expect("timestamp");
        let token = seal_at(&key(1), b"payload", stamp).expect("seal");
        assert_eq!(issued_at(&token), Some(stamp));
        assert_eq!(issued_at(b"\x02"), None);
    }
}
