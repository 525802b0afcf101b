use std::{
    fs::{self, File, OpenOptions},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use fs2::FileExt;
use keyward_core::{
    integrity::Attestation,
    key::MasterKeySource,
    policy::AuthPolicyVerifier,
    storage::{CredentialStore, Secret, ServiceName, VaultError},
};
use tempfile::NamedTempFile;
use tracing::{error, info, instrument, Span};

use crate::token;

/// Extension of credential files inside the store directory.
pub const CREDENTIAL_EXTENSION: &str = "enc";
const LOCK_FILE: &str = ".keyward.lock";

/// Encrypted file-backed credential store. Every `set`/`get` fetches a fresh
/// master key from `K` and drops it when the call returns.
pub struct CredentialVault<K: MasterKeySource> {
    root: PathBuf,
    key_source: K,
}

impl<K: MasterKeySource> CredentialVault<K> {
    /// Open the vault. Requires proof that the integrity gate passed, and
    /// fails with [`VaultError::PolicyNotSatisfied`] unless the host's sudo
    /// policy demands a strong factor.
    pub fn open(
        _attestation: &Attestation,
        policy: &AuthPolicyVerifier,
        root: impl Into<PathBuf>,
        key_source: K,
    ) -> Result<Self, VaultError> {
        if !policy.check() {
            error!("refusing to open vault: sudo does not require a strong factor");
            return Err(VaultError::PolicyNotSatisfied);
        }

        let root = root.into();
        create_private_dir(&root)?;
        Ok(Self { root, key_source })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, name: &ServiceName) -> PathBuf {
        self.root.join(format!("{name}.{CREDENTIAL_EXTENSION}"))
    }

    /// Recreates the store directory if it vanished since `open`.
    fn lock(&self) -> Result<StoreLock, VaultError> {
        create_private_dir(&self.root)?;
        StoreLock::acquire(&self.root.join(LOCK_FILE))
    }
}

#[async_trait]
impl<K: MasterKeySource> CredentialStore for CredentialVault<K> {
    #[instrument(skip_all, fields(service))]
    async fn set(&self, service: &str, secret: &[u8]) -> Result<(), VaultError> {
        let name = ServiceName::parse(service)?;
        Span::current().record("service", name.as_str());

        let token = {
            let key = self.key_source.fetch().await?;
            token::seal(&key, secret)?
        };

        let path = self.path_for(&name);
        let _lock = self.lock()?;
        write_token(&path, &token)?;
        info!(path = %path.display(), "credential stored");
        Ok(())
    }

    #[instrument(skip_all, fields(service))]
    async fn get(&self, service: &str) -> Result<Secret, VaultError> {
        let name = ServiceName::parse(service)?;
        Span::current().record("service", name.as_str());

        let token = read_token(&self.path_for(&name), &name)?;
        let key = self.key_source.fetch().await?;
        let secret = token::open(&key, &token).inspect_err(|_| {
            error!("credential failed authentication; corrupted file or changed master key");
        })?;
        info!("credential decrypted");
        Ok(secret)
    }

    #[instrument(skip_all, fields(service))]
    async fn delete(&self, service: &str) -> Result<(), VaultError> {
        let name = ServiceName::parse(service)?;
        Span::current().record("service", name.as_str());

        let _lock = self.lock()?;
        match fs::remove_file(self.path_for(&name)) {
            Ok(()) => {
                info!("credential deleted");
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(storage_err(err)),
        }
    }

    async fn list(&self) -> Result<Vec<ServiceName>, VaultError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(storage_err(err)),
        };

        let mut names = Vec::new();
        for entry in entries {
            let path = entry.map_err(storage_err)?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(CREDENTIAL_EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            // Only files this vault could have written.
            if let Ok(name) = ServiceName::parse(stem) {
                if name.as_str() == stem {
                    names.push(name);
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

/// Exclusive advisory lock on the store, held for the duration of a write.
struct StoreLock {
    file: File,
}

impl StoreLock {
    fn acquire(path: &Path) -> Result<Self, VaultError> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .map_err(storage_err)?;
        FileExt::lock_exclusive(&file).map_err(|e| VaultError::Storage {
            reason: format!("could not lock store: {e}"),
        })?;
        Ok(Self { file })
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

fn write_token(path: &Path, token: &[u8]) -> Result<(), VaultError> {
    let parent = path.parent().ok_or_else(|| VaultError::Storage {
        reason: "invalid storage path".to_string(),
    })?;

    // NamedTempFile is created 0600 on unix; the rename keeps that mode.
    let mut tmp = NamedTempFile::new_in(parent).map_err(storage_err)?;
    tmp.write_all(token).map_err(storage_err)?;
    tmp.as_file().sync_all().map_err(storage_err)?;
    tmp.persist(path).map_err(|e| storage_err(e.error))?;
    Ok(())
}

fn read_token(path: &Path, name: &ServiceName) -> Result<Vec<u8>, VaultError> {
    fs::read(path).map_err(|err| {
        if err.kind() == ErrorKind::NotFound {
            VaultError::NotFound {
                service: name.to_string(),
            }
        } else {
            storage_err(err)
        }
    })
}

fn create_private_dir(path: &Path) -> Result<(), VaultError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        fs::DirBuilder::new()
            .recursive(true)
            .mode(0o700)
            .create(path)
            .map_err(storage_err)
    }
    #[cfg(not(unix))]
    {
        fs::create_dir_all(path).map_err(storage_err)
    }
}

fn storage_err<E: ToString>(err: E) -> VaultError {
    VaultError::Storage {
        reason: err.to_string(),
    }
}
