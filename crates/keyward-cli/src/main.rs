mod cli;
mod config;
mod credentials;
mod prompt;
mod storage;

use std::io::{self, IsTerminal, Write};

use crate::cli::{Command, ConfigCommand, SecretCommand};
use clap::Parser;
use color_eyre::Result;
use keyward_core::{
    integrity::Attestation,
    key::{MasterKey, MASTER_KEY_PATH},
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Entry point: nothing touches configuration or secrets before the
/// integrity self-check passes.
#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let cli = cli::Cli::parse();
    if cli.command == Command::Version {
        print_version();
        return Ok(());
    }

    let attestation = storage::attest()?;
    let config = config::load()?;
    match cli.command {
        Command::Secret(cmd) => run_secret(cmd, &attestation, &config).await?,
        Command::Check => run_check(&attestation, &config)?,
        Command::Keygen => run_keygen()?,
        Command::Config(ConfigCommand::Init) => init_config(&config)?,
        Command::Version => print_version(),
    }

    Ok(())
}

fn init_tracing() {
    // stdout carries secrets for `get`, so diagnostics go to stderr.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(io::stderr);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

fn print_version() {
    println!("keyward {}", env!("CARGO_PKG_VERSION"));
}

async fn run_secret(
    cmd: SecretCommand,
    attestation: &Attestation,
    config: &config::Config,
) -> Result<()> {
    let vault = storage::vault_from_config(attestation, config)?;
    let label = match &cmd {
        SecretCommand::Set { service } => format!("Secret for '{service}': "),
        _ => String::new(),
    };
    let read_input = move || {
        let stdin = io::stdin();
        if stdin.is_terminal() {
            prompt::read_hidden(&label)
        } else {
            credentials::read_secret(&mut stdin.lock())
        }
    };
    let mut out = io::stdout().lock();
    credentials::handle(cmd, &vault, read_input, &mut out).await
}

/// Report both gates. The integrity gate already passed to get here.
fn run_check(attestation: &Attestation, config: &config::Config) -> Result<()> {
    println!(
        "Integrity: ok ({} files verified)",
        attestation.files_checked()
    );

    let graph = storage::policy_verifier(config).inspect();
    for node in &graph.nodes {
        let marker = if node.strong_factor { "*" } else { " " };
        println!("  {marker} {}", node.path.display());
    }
    match &graph.satisfied_by {
        Some(path) => {
            println!("Policy: ok (strong factor required by {})", path.display());
            Ok(())
        }
        None => color_eyre::eyre::bail!(
            "Policy: sudo does not require a strong authentication factor"
        ),
    }
}

fn run_keygen() -> Result<()> {
    let key = MasterKey::generate();
    let mut out = io::stdout().lock();
    writeln!(out, "{}", key.encode().as_str())?;
    eprintln!("Install it root-only, e.g.: sudo install -m 0400 -o root /dev/stdin {MASTER_KEY_PATH}");
    Ok(())
}

fn init_config(config: &config::Config) -> Result<()> {
    let path = config::write_default_if_missing(config)?;
    println!("Config initialized at {}", path.display());
    Ok(())
}
