//! Core abstractions for keyward: startup attestation, auth policy checks,
//! master key handling, and credential storage contracts.
//! Concrete escalation and file-backed storage live in `keyward-vault`.

pub mod integrity;
pub mod key;
pub mod policy;
pub mod storage;
