//! Concrete fetch-use-revoke implementation.
//! The broker obtains the master key through `sudo` and revokes the elevation
//! immediately; the vault uses that key for a single AES-GCM operation.

pub mod broker;
pub mod executor;
pub mod token;
pub mod vault;
