use clap::{Parser, Subcommand};

/// CLI surface definition. Secret operations are flattened to the top level.
#[derive(Parser, Debug)]
#[command(
    name = "keyward",
    about = "Local API-key vault that demands fresh strong authentication for every access",
    version,
    propagate_version = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    #[command(flatten)]
    Secret(SecretCommand),
    /// Run the integrity and sudo policy checks and report the result.
    Check,
    /// Print a new master key for provisioning the protected key file.
    Keygen,
    /// Manage CLI configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version and exit.
    Version,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum SecretCommand {
    /// Add or replace the secret for a service (read from stdin).
    Set { service: String },
    /// Print the secret for a service to stdout.
    Get { service: String },
    /// Delete the secret for a service.
    Delete { service: String },
    /// Delete every stored secret.
    Purge {
        /// Confirm deleting everything.
        #[arg(long)]
        yes: bool,
    },
    /// List services with a stored secret.
    List,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ConfigCommand {
    /// Create a default config file if one does not exist.
    Init,
}
