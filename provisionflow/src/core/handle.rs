//! Resource handles: flat string maps identifying remote objects.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Well-known handle field names.
pub mod fields {
    /// Remote identifier.
    pub const ID: &str = "id";
    /// Human-readable name.
    pub const NAME: &str = "name";
    /// Network host.
    pub const HOST: &str = "host";
    /// Network port.
    pub const PORT: &str = "port";
    /// Database name.
    pub const DATABASE: &str = "database";
    /// Principal name.
    pub const USERNAME: &str = "username";
    /// Principal secret.
    pub const PASSWORD: &str = "password";
    /// Public URL.
    pub const URL: &str = "url";
}

const REDACTED: &str = "********";

/// Opaque record identifying a remote object created by a collaborator.
///
/// Schema-free beyond "string-keyed flat map": vendors expose different
/// fields, and the orchestrator never looks inside.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceHandle {
    fields: BTreeMap<String, String>,
}

impl ResourceHandle {
    /// Creates an empty handle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a handle with an id.
    #[must_use]
    pub fn with_id(id: impl Into<String>) -> Self {
        Self::new().with(fields::ID, id)
    }

    /// Sets a field.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Sets a field if the value is present.
    #[must_use]
    pub fn with_opt(self, key: impl Into<String>, value: Option<impl Into<String>>) -> Self {
        match value {
            Some(value) => self.with(key, value),
            None => self,
        }
    }

    /// Gets a field.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// Returns the `id` field.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.get(fields::ID)
    }

    /// Returns the `host` field.
    #[must_use]
    pub fn host(&self) -> Option<&str> {
        self.get(fields::HOST)
    }

    /// Returns the `port` field parsed as a number.
    #[must_use]
    pub fn port(&self) -> Option<u16> {
        self.get(fields::PORT).and_then(|p| p.parse().ok())
    }

    /// Returns the `database` field.
    #[must_use]
    pub fn database(&self) -> Option<&str> {
        self.get(fields::DATABASE)
    }

    /// Returns the `username` field.
    #[must_use]
    pub fn username(&self) -> Option<&str> {
        self.get(fields::USERNAME)
    }

    /// Returns the `password` field.
    #[must_use]
    pub fn password(&self) -> Option<&str> {
        self.get(fields::PASSWORD)
    }

    /// Iterates over all fields in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Returns the number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if the handle has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Returns a copy with secret-bearing fields masked.
    #[must_use]
    pub fn redacted(&self) -> Self {
        let fields = self
            .fields
            .iter()
            .map(|(k, v)| {
                if is_sensitive(k) {
                    (k.clone(), REDACTED.to_string())
                } else {
                    (k.clone(), v.clone())
                }
            })
            .collect();
        Self { fields }
    }
}

impl fmt::Debug for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.redacted().fields.iter()).finish()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ResourceHandle {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

fn is_sensitive(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    key.contains("password")
        || key.contains("secret")
        || key.contains("token")
        || key.contains("connection_uri")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_accessors() {
        let handle = ResourceHandle::with_id("br-123")
            .with(fields::HOST, "ep-1.neon.tech")
            .with(fields::PORT, "5432")
            .with(fields::DATABASE, "acme");

        assert_eq!(handle.id(), Some("br-123"));
        assert_eq!(handle.host(), Some("ep-1.neon.tech"));
        assert_eq!(handle.port(), Some(5432));
        assert_eq!(handle.database(), Some("acme"));
        assert_eq!(handle.username(), None);
    }

    #[test]
    fn test_with_opt_skips_missing() {
        let handle = ResourceHandle::new()
            .with_opt("a", Some("1"))
            .with_opt("b", None::<String>);

        assert_eq!(handle.len(), 1);
        assert_eq!(handle.get("a"), Some("1"));
    }

    #[test]
    fn test_debug_masks_secrets() {
        let handle = ResourceHandle::new()
            .with(fields::USERNAME, "acme_user")
            .with(fields::PASSWORD, "hunter2")
            .with("connection_uri", "postgresql://acme_user:hunter2@h/db");

        let debug = format!("{handle:?}");
        assert!(debug.contains("acme_user"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_redacted_keeps_original() {
        let handle = ResourceHandle::new().with("api_token", "t0k3n");

        assert_eq!(handle.redacted().get("api_token"), Some(REDACTED));
        assert_eq!(handle.get("api_token"), Some("t0k3n"));
    }

    #[test]
    fn test_serializes_as_flat_map() {
        let handle: ResourceHandle = [("id", "p-1"), ("name", "project-acme")].into_iter().collect();
        let json = serde_json::to_value(&handle).unwrap();

        assert_eq!(json, serde_json::json!({"id": "p-1", "name": "project-acme"}));
    }
}
