//! Credential generation for newly created principals.
//!
//! Secrets come only from the operating system's CSPRNG and are encoded in
//! the URL-safe base64 alphabet (`A-Z a-z 0-9 - _`, no padding), so they can
//! be dropped into a connection-string userinfo or query component without
//! escaping. Usernames, by contrast, are deterministic so that a re-run
//! finds the principal it created last time.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::context::TenantIdentity;

/// Default secret length in bytes (256 bits).
pub const DEFAULT_SECRET_BYTES: usize = 32;

/// A secret string that never appears in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    /// Wraps an existing secret value.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the secret value.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(********)")
    }
}

impl Serialize for Secret {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Secret {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self)
    }
}

/// A generated principal: stable username, fresh password.
#[derive(Debug, Clone, Serialize)]
pub struct Credential {
    /// Deterministic principal name.
    pub username: String,
    /// Random password, generated anew on every creation.
    pub password: Secret,
}

/// Produces random secrets and deterministic principal names.
#[derive(Debug, Clone, Copy)]
pub struct CredentialGenerator {
    secret_bytes: usize,
}

impl Default for CredentialGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialGenerator {
    /// Creates a generator producing secrets of `DEFAULT_SECRET_BYTES`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            secret_bytes: DEFAULT_SECRET_BYTES,
        }
    }

    /// Sets the secret length in bytes.
    #[must_use]
    pub fn with_secret_bytes(mut self, bytes: usize) -> Self {
        self.secret_bytes = bytes;
        self
    }

    /// Generates a secret of `byte_length` random bytes.
    #[must_use]
    pub fn generate(byte_length: usize) -> Secret {
        let mut bytes = vec![0u8; byte_length];
        OsRng.fill_bytes(&mut bytes);
        Secret(URL_SAFE_NO_PAD.encode(bytes))
    }

    /// Creates a credential for a tenant's resource kind.
    #[must_use]
    pub fn credential_for(&self, tenant: &TenantIdentity, kind: &str) -> Credential {
        Credential {
            username: username_for(tenant, kind),
            password: Self::generate(self.secret_bytes),
        }
    }
}

/// Derives the stable principal name for a tenant's resource kind.
///
/// The result is a valid unquoted Postgres identifier: lowercase, starts
/// with a letter, at most 63 bytes.
#[must_use]
pub fn username_for(tenant: &TenantIdentity, kind: &str) -> String {
    let kind: String = kind
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    let mut name = format!("{}_{kind}", tenant.slug());
    if !name.starts_with(|c: char| c.is_ascii_lowercase()) {
        name.insert(0, 't');
    }
    name.truncate(63);
    name
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generate_length_and_alphabet() {
        let secret = CredentialGenerator::generate(32);

        // 32 bytes -> 43 base64 chars without padding.
        assert_eq!(secret.expose().len(), 43);
        assert!(secret
            .expose()
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_generate_uniqueness() {
        let samples: HashSet<String> = (0..10_000)
            .map(|_| CredentialGenerator::generate(16).expose().to_string())
            .collect();

        assert_eq!(samples.len(), 10_000);
    }

    #[test]
    fn test_consecutive_calls_differ() {
        assert_ne!(CredentialGenerator::generate(32), CredentialGenerator::generate(32));
    }

    #[test]
    fn test_secret_debug_is_masked() {
        let secret = Secret::new("hunter2");
        assert!(!format!("{secret:?}").contains("hunter2"));
        assert_eq!(serde_json::to_string(&secret).unwrap(), r#""hunter2""#);
    }

    #[test]
    fn test_username_is_deterministic() {
        let tenant = TenantIdentity::new("acme-corp").unwrap();
        let other_run = TenantIdentity::new("acme-corp").unwrap();

        assert_eq!(username_for(&tenant, "app"), "acme_corp_app");
        assert_eq!(username_for(&tenant, "app"), username_for(&other_run, "app"));
    }

    #[test]
    fn test_username_starts_with_letter() {
        let tenant = TenantIdentity::new("42").unwrap();
        assert_eq!(username_for(&tenant, "app"), "t42_app");
    }

    #[test]
    fn test_secret_length_is_configurable() {
        let tenant = TenantIdentity::new("acme").unwrap();

        let credential = CredentialGenerator::new().with_secret_bytes(48).credential_for(&tenant, "app");

        assert_eq!(credential.password.expose().len(), 64);
    }

    #[test]
    fn test_credential_for_uses_fresh_password() {
        let generator = CredentialGenerator::new();
        let tenant = TenantIdentity::new("acme").unwrap();

        let first = generator.credential_for(&tenant, "admin");
        let second = generator.credential_for(&tenant, "admin");

        assert_eq!(first.username, second.username);
        assert_ne!(first.password, second.password);
    }
}
