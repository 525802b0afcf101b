//! Credential storage contracts shared by the vault and its callers.

pub mod credential_store;
pub mod service_name;

pub use credential_store::{CredentialStore, InMemoryCredentialStore, Secret, VaultError};
pub use service_name::ServiceName;
