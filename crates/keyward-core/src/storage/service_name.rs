use std::fmt;

use super::credential_store::VaultError;

/// Caller-supplied service identifier reduced to `[A-Za-z0-9_-]`.
///
/// Always non-empty, so it is safe to use directly as a file stem.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServiceName(String);

impl ServiceName {
    /// Sanitize `input`, rejecting it if nothing survives.
    pub fn parse(input: &str) -> Result<Self, VaultError> {
        let sanitized: String = input.chars().filter(|c| is_allowed(*c)).collect();
        if sanitized.is_empty() {
            return Err(VaultError::InvalidService {
                input: input.to_string(),
            });
        }
        Ok(Self(sanitized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ServiceName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn is_allowed(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}
