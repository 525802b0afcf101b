use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use thiserror::Error;
use zeroize::Zeroizing;

use super::service_name::ServiceName;
use crate::key::BrokerError;

/// Decrypted secret bytes, wiped on drop.
pub type Secret = Zeroizing<Vec<u8>>;

/// Errors produced by credential store implementations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum VaultError {
    /// The host's escalation policy does not require a strong factor.
    #[error("sudo is not configured to require a strong authentication factor")]
    PolicyNotSatisfied,
    /// The service name is empty once sanitized.
    #[error("invalid service name: {input:?}")]
    InvalidService { input: String },
    /// No credential is stored for the service.
    #[error("no credential stored for service: {service}")]
    NotFound { service: String },
    /// The token failed authentication (corrupted, or master key changed).
    #[error("credential could not be decrypted; the file may be corrupted or the master key changed")]
    DecryptionFailed,
    /// The master key could not be obtained.
    #[error(transparent)]
    Key(#[from] BrokerError),
    /// Underlying storage failure.
    #[error("storage failure: {reason}")]
    Storage { reason: String },
}

/// Contract for per-service credential storage. Every call is self-contained:
/// implementations keep no key or plaintext between calls.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Store a secret for a service, replacing any existing one.
    async fn set(&self, service: &str, secret: &[u8]) -> Result<(), VaultError>;

    /// Retrieve the secret stored for a service.
    async fn get(&self, service: &str) -> Result<Secret, VaultError>;

    /// Remove the secret for a service (idempotent).
    async fn delete(&self, service: &str) -> Result<(), VaultError>;

    /// Services that currently have a stored credential, sorted.
    async fn list(&self) -> Result<Vec<ServiceName>, VaultError>;
}

/// In-memory store for tests and smoke runs. Performs no encryption and no
/// authentication; never use it for real secrets.
#[derive(Debug, Default, Clone)]
pub struct InMemoryCredentialStore {
    inner: Arc<Mutex<BTreeMap<ServiceName, Secret>>>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<ServiceName, Secret>>, VaultError> {
        self.inner.lock().map_err(|err| VaultError::Storage {
            reason: format!("lock poisoned: {err}"),
        })
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn set(&self, service: &str, secret: &[u8]) -> Result<(), VaultError> {
        let name = ServiceName::parse(service)?;
        self.lock()?.insert(name, Zeroizing::new(secret.to_vec()));
        Ok(())
    }

    async fn get(&self, service: &str) -> Result<Secret, VaultError> {
        let name = ServiceName::parse(service)?;
        self.lock()?
            .get(&name)
            .cloned()
            .ok_or_else(|| VaultError::NotFound {
                service: name.to_string(),
            })
    }

    async fn delete(&self, service: &str) -> Result<(), VaultError> {
        let name = ServiceName::parse(service)?;
        self.lock()?.remove(&name);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ServiceName>, VaultError> {
        Ok(self.lock()?.keys().cloned().collect())
    }
}
