use std::io::{BufRead, Read, Write};

use color_eyre::{eyre::bail, Result};
use keyward_core::storage::{CredentialStore, Secret};
use zeroize::Zeroizing;

use crate::cli::SecretCommand;

/// Execute a secret subcommand against `store`.
///
/// `read_input` supplies the secret for `set` and is only called there; `out`
/// receives the secret for `get` and confirmation lines for everything else.
pub async fn handle<S: CredentialStore>(
    cmd: SecretCommand,
    store: &S,
    read_input: impl FnOnce() -> Result<Secret>,
    out: &mut impl Write,
) -> Result<()> {
    match cmd {
        SecretCommand::Set { service } => {
            let secret = read_input()?;
            if secret.is_empty() {
                bail!("refusing to store an empty secret for '{service}'");
            }
            store.set(&service, &secret).await?;
            writeln!(out, "Stored credential for '{service}'.")?;
        }
        SecretCommand::Get { service } => {
            let secret = store.get(&service).await?;
            out.write_all(&secret)?;
            out.flush()?;
        }
        SecretCommand::Delete { service } => {
            store.delete(&service).await?;
            writeln!(out, "Deleted credential for '{service}'.")?;
        }
        SecretCommand::Purge { yes } => {
            if !yes {
                bail!("purge deletes every stored credential; pass --yes to confirm");
            }
            let services = store.list().await?;
            for service in &services {
                store.delete(service.as_str()).await?;
            }
            writeln!(out, "Deleted {} credential(s).", services.len())?;
        }
        SecretCommand::List => {
            let services = store.list().await?;
            if services.is_empty() {
                writeln!(out, "No credentials stored. Add one with `keyward set <service>`.")?;
                return Ok(());
            }
            for (index, service) in services.iter().enumerate() {
                writeln!(out, "{:>3}. {service}", index + 1)?;
            }
        }
    }

    Ok(())
}

/// Read a secret from `input`, dropping one trailing line ending.
pub fn read_secret(input: &mut impl BufRead) -> Result<Secret> {
    let mut buf = Zeroizing::new(Vec::new());
    input.read_to_end(&mut buf)?;
    if buf.ends_with(b"\n") {
        buf.pop();
        if buf.ends_with(b"\r") {
            buf.pop();
        }
    }
    Ok(buf)
}
