//! Provider credentials held in secure memory.

use secrecy::{ExposeSecret, SecretBox};
use std::fmt;

/// An API key that never shows up in logs, debug output or error messages.
pub struct Credential(SecretBox<str>);

impl Credential {
    pub fn new(value: impl Into<String>) -> Self {
        Self(SecretBox::new(Box::from(value.into().as_str())))
    }

    /// Only call this when building the outbound request.
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }

    /// First four characters followed by an ellipsis, safe for logs.
    pub fn masked(&self) -> String {
        let prefix: String = self.expose().chars().take(4).collect();
        format!("{}...", prefix)
    }

    /// Header values must be visible ASCII.
    pub fn is_well_formed(&self) -> bool {
        let value = self.expose();
        !value.is_empty() && value.bytes().all(|b| b.is_ascii_graphic())
    }
}

impl Clone for Credential {
    fn clone(&self) -> Self {
        Self::new(self.expose())
    }
}

impl PartialEq for Credential {
    fn eq(&self, other: &Self) -> bool {
        self.expose() == other.expose()
    }
}

impl Eq for Credential {}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl From<&str> for Credential {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Credential {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}
