use crate::errors::OtpError;
use std::fmt;

/// Normalized email address used as the sole key for per-identity state.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentityKey(String);

impl IdentityKey {
    /// Trims and lowercases `raw`, rejecting anything that is not `local@domain`.
    pub fn parse(raw: &str) -> Result<Self, OtpError> {
        let normalized = raw.trim().to_ascii_lowercase();
        if normalized.is_empty() || normalized.chars().any(char::is_whitespace) {
            return Err(OtpError::InvalidIdentity);
        }

        let mut parts = normalized.split('@');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(local), Some(domain), None) if !local.is_empty() && !domain.is_empty() => {
                Ok(Self(normalized))
            }
            _ => Err(OtpError::InvalidIdentity),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for IdentityKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
