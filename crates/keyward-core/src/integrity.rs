//! Startup integrity attestation.
//!
//! A manifest written at install time maps relative file paths to their
//! SHA-256 digests. [`IntegrityGate::self_check`] re-hashes every listed file
//! and only hands out an [`Attestation`] when all of them match.

use std::{
    collections::{BTreeMap, BTreeSet},
    fs::{self, File},
    io::{self, Read},
    path::{Path, PathBuf},
};

use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, error, info};

const CHUNK_SIZE: usize = 8192;

/// Failures of the integrity gate. All of them are fatal for the process.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IntegrityError {
    #[error("integrity manifest not found at {path}; refusing to run")]
    ManifestMissing { path: String },
    #[error("integrity manifest at {path} is invalid: {reason}")]
    ManifestInvalid { path: String, reason: String },
    #[error("protected file {path} has been removed")]
    FileRemoved { path: String },
    #[error("protected file {path} has been modified or is corrupted")]
    IntegrityViolation { path: String },
    #[error("protected file {path} could not be read: {reason}")]
    Unreadable { path: String, reason: String },
}

/// Expected digests keyed by path relative to the gate's root.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct IntegrityManifest {
    entries: BTreeMap<String, String>,
}

impl IntegrityManifest {
    pub fn load(path: &Path) -> Result<Self, IntegrityError> {
        let display = path.display().to_string();
        let bytes = std::fs::read(path).map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => IntegrityError::ManifestMissing {
                path: display.clone(),
            },
            _ => IntegrityError::ManifestInvalid {
                path: display.clone(),
                reason: err.to_string(),
            },
        })?;

        let manifest: Self =
            serde_json::from_slice(&bytes).map_err(|e| IntegrityError::ManifestInvalid {
                path: display.clone(),
                reason: e.to_string(),
            })?;

        if manifest.entries.is_empty() {
            return Err(IntegrityError::ManifestInvalid {
                path: display,
                reason: "manifest lists no files".to_string(),
            });
        }
        Ok(manifest)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Proof that [`IntegrityGate::self_check`] passed. Cannot be built elsewhere.
#[derive(Debug)]
pub struct Attestation {
    files_checked: usize,
    /// Canonical paths of every file whose digest matched.
    verified: BTreeSet<PathBuf>,
}

impl Attestation {
    pub fn files_checked(&self) -> usize {
        self.files_checked
    }

    /// Whether `path` names a file this self-check verified.
    pub fn covers(&self, path: &Path) -> bool {
        fs::canonicalize(path).is_ok_and(|resolved| self.verified.contains(&resolved))
    }
}

pub struct IntegrityGate {
    manifest_path: PathBuf,
    root: PathBuf,
}

impl IntegrityGate {
    /// Gate whose file paths resolve against the manifest's directory.
    pub fn new(manifest_path: impl Into<PathBuf>) -> Self {
        let manifest_path = manifest_path.into();
        let root = manifest_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Self {
            manifest_path,
            root,
        }
    }

    pub fn with_root(manifest_path: impl Into<PathBuf>, root: impl Into<PathBuf>) -> Self {
        Self {
            manifest_path: manifest_path.into(),
            root: root.into(),
        }
    }

    /// Verify every manifest entry, stopping at the first mismatch.
    pub fn self_check(&self) -> Result<Attestation, IntegrityError> {
        let manifest = IntegrityManifest::load(&self.manifest_path).inspect_err(|err| {
            error!(%err, "integrity manifest unavailable");
        })?;

        let mut verified = BTreeSet::new();
        for (relative, expected) in manifest.iter() {
            let path = self.root.join(relative);
            verify_entry(relative, &path, expected).inspect_err(|err| {
                error!(%err, "integrity check failed");
            })?;
            debug!(file = relative, "integrity ok");
            verified.insert(fs::canonicalize(&path).unwrap_or(path));
        }

        info!(files = manifest.len(), "integrity self-check passed");
        Ok(Attestation {
            files_checked: manifest.len(),
            verified,
        })
    }
}

fn verify_entry(relative: &str, path: &Path, expected: &str) -> Result<(), IntegrityError> {
    let actual = hash_file(path).map_err(|err| match err.kind() {
        io::ErrorKind::NotFound => IntegrityError::FileRemoved {
            path: relative.to_string(),
        },
        _ => IntegrityError::Unreadable {
            path: relative.to_string(),
            reason: err.to_string(),
        },
    })?;

    if !actual.eq_ignore_ascii_case(expected.trim()) {
        return Err(IntegrityError::IntegrityViolation {
            path: relative.to_string(),
        });
    }
    Ok(())
}

/// Lowercase hex SHA-256 of a file, streamed in fixed-size chunks.
pub fn hash_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; CHUNK_SIZE];
    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}
