use std::{
    env,
    path::{Path, PathBuf},
};

use crate::config::Config;
use color_eyre::Result;
use keyward_core::{
    integrity::{Attestation, IntegrityGate},
    policy::AuthPolicyVerifier,
};
use keyward_vault::{broker::MasterKeyBroker, executor::SudoExecutor, vault::CredentialVault};
use tracing::debug;

/// Manifest shipped next to the installed binaries.
pub const MANIFEST_FILE: &str = "keyward.manifest.json";
/// Privileged helper binary shipped next to `keyward`.
pub const HELPER_FILE: &str = "keyward-master-key";

pub type ProductionVault = CredentialVault<MasterKeyBroker<SudoExecutor>>;

/// Directory holding the running executable; installed files live beside it.
pub fn install_dir() -> Result<PathBuf> {
    let exe = env::current_exe()?;
    let dir = exe
        .parent()
        .ok_or_else(|| color_eyre::eyre::eyre!("executable has no parent directory"))?;
    Ok(dir.to_path_buf())
}

/// Verify the installed files against the manifest. Nothing else runs until
/// this passes.
pub fn attest() -> Result<Attestation> {
    let manifest = install_dir()?.join(MANIFEST_FILE);
    debug!(manifest = %manifest.display(), "running integrity self-check");
    Ok(IntegrityGate::new(manifest).self_check()?)
}

pub fn policy_verifier(config: &Config) -> AuthPolicyVerifier {
    AuthPolicyVerifier::for_host()
        .with_extra_modules(config.policy.extra_strong_factor_modules.iter().cloned())
}

/// Helper path from config or the install dir. It runs as root, so it must be
/// a file the integrity gate just verified.
fn verified_helper(
    config: &Config,
    install_dir: &Path,
    attestation: &Attestation,
) -> Result<PathBuf> {
    let helper = config
        .broker
        .helper
        .clone()
        .unwrap_or_else(|| install_dir.join(HELPER_FILE));
    if !attestation.covers(&helper) {
        color_eyre::eyre::bail!(
            "refusing to run privileged helper {}: it is not listed in the integrity manifest",
            helper.display()
        );
    }
    Ok(helper)
}

pub fn broker(
    attestation: &Attestation,
    config: &Config,
) -> Result<MasterKeyBroker<SudoExecutor>> {
    let helper = verified_helper(config, &install_dir()?, attestation)?;
    Ok(MasterKeyBroker::new(SudoExecutor::default(), helper).with_timeout(config.helper_timeout()))
}

/// Open the credential vault for this host using config overrides.
pub fn vault_from_config(attestation: &Attestation, config: &Config) -> Result<ProductionVault> {
    let root = config.store_dir()?;
    debug!(?root, "opening credential vault");
    let vault = CredentialVault::open(
        attestation,
        &policy_verifier(config),
        root,
        broker(attestation, config)?,
    )?;
    Ok(vault)
}
