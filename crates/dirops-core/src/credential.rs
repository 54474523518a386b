//! Bind credentials.
//!
//! Credentials arrive pre-validated from a credential collaborator (environment, vault, 2FA
//! front-end). The secret is wrapped in [`SecretString`] so it never appears in `Debug`
//! output, logs or serialized audit records.

use secrecy::{ExposeSecret, SecretString};
use std::fmt;

/// Pre-validated credential used to bind to a directory controller.
#[derive(Clone)]
pub struct BindCredential {
    identity: String,
    password: SecretString,
}

impl BindCredential {
    /// Create a new credential.
    ///
    /// `identity` is the bind name understood by the directory: a DN, a UPN
    /// (`user@example.com`) or a down-level logon name (`EXAMPLE\user`).
    #[must_use]
    pub fn new(identity: impl Into<String>, password: SecretString) -> Self {
        Self {
            identity: identity.into(),
            password,
        }
    }

    /// Convenience constructor from a plain password.
    #[must_use]
    pub fn from_password(identity: impl Into<String>, password: impl Into<String>) -> Self {
        Self::new(identity, SecretString::from(password.into()))
    }

    /// The bind identity; safe to log and to record in a session.
    #[must_use]
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Exposes the secret for the protocol bind call.
    #[must_use]
    pub fn expose_password(&self) -> &str {
        self.password.expose_secret()
    }

    /// Returns true if either part of the credential is blank.
    #[must_use]
    pub fn is_incomplete(&self) -> bool {
        self.identity.trim().is_empty() || self.password.expose_secret().is_empty()
    }
}

impl fmt::Debug for BindCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindCredential")
            .field("identity", &self.identity)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_accessors() {
        let cred = BindCredential::from_password("EXAMPLE\\operator", "secret");
        assert_eq!(cred.identity(), "EXAMPLE\\operator");
        assert_eq!(cred.expose_password(), "secret");
        assert!(!cred.is_incomplete());
    }

    #[test]
    fn test_debug_redacts_password() {
        let cred = BindCredential::from_password("cn=admin,dc=example,dc=com", "hunter2");
        let debug = format!("{cred:?}");
        assert!(debug.contains("cn=admin,dc=example,dc=com"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_incomplete_credential() {
        assert!(BindCredential::from_password("", "secret").is_incomplete());
        assert!(BindCredential::from_password("operator", "").is_incomplete());
    }
}
