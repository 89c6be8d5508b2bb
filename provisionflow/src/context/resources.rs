//! Write-once map of resource kind to resource handle.

use crate::core::ResourceHandle;
use crate::errors::ResourceConflictError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Resource handles keyed by logical kind ("project", "branch", "user").
///
/// Writing to an existing kind returns a `ResourceConflictError`; the first
/// handle recorded for a kind is the one that stands for the whole run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceMap {
    entries: BTreeMap<String, ResourceHandle>,
}

impl ResourceMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets the handle for a kind.
    #[must_use]
    pub fn get(&self, kind: &str) -> Option<&ResourceHandle> {
        self.entries.get(kind)
    }

    /// Checks whether a kind is recorded.
    #[must_use]
    pub fn contains(&self, kind: &str) -> bool {
        self.entries.contains_key(kind)
    }

    /// Records a handle.
    ///
    /// # Errors
    ///
    /// Returns `ResourceConflictError` if the kind is already recorded.
    pub fn insert(
        &mut self,
        kind: impl Into<String>,
        handle: ResourceHandle,
    ) -> Result<(), ResourceConflictError> {
        let kind = kind.into();
        if self.entries.contains_key(&kind) {
            return Err(ResourceConflictError::new(kind));
        }
        self.entries.insert(kind, handle);
        Ok(())
    }

    /// Returns all recorded kinds.
    #[must_use]
    pub fn kinds(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Iterates over kind/handle pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ResourceHandle)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Returns the number of recorded kinds.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns a copy with every handle's secrets masked.
    #[must_use]
    pub fn redacted(&self) -> Self {
        Self {
            entries: self
                .entries
                .iter()
                .map(|(k, v)| (k.clone(), v.redacted()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let mut map = ResourceMap::new();
        map.insert("project", ResourceHandle::with_id("p-1")).unwrap();

        assert!(map.contains("project"));
        assert_eq!(map.get("project").and_then(ResourceHandle::id), Some("p-1"));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_insert_never_overwrites() {
        let mut map = ResourceMap::new();
        map.insert("project", ResourceHandle::with_id("p-1")).unwrap();

        let err = map.insert("project", ResourceHandle::with_id("p-2")).unwrap_err();

        assert_eq!(err.kind, "project");
        assert_eq!(map.get("project").and_then(ResourceHandle::id), Some("p-1"));
    }

    #[test]
    fn test_redacted() {
        let mut map = ResourceMap::new();
        map.insert(
            "user",
            ResourceHandle::new().with("username", "acme_app").with("password", "s3cr3t"),
        )
        .unwrap();

        let redacted = map.redacted();
        assert_ne!(redacted.get("user").unwrap().password(), Some("s3cr3t"));
        assert_eq!(redacted.get("user").unwrap().username(), Some("acme_app"));
    }
}
