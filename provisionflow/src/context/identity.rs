//! Tenant identity for a provisioning run.

use crate::errors::ConfigError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use uuid::Uuid;

#[allow(clippy::expect_used)]
static TENANT_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9](?:[a-z0-9-]{0,38}[a-z0-9])?$").expect("tenant pattern is valid")
});

/// Identifies the tenant being provisioned and the run doing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantIdentity {
    /// Tenant short name, used to derive every remote resource name.
    pub name: String,
    /// Public domain the tenant is served on, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    /// Unique id of this run.
    pub run_id: Uuid,
}

impl TenantIdentity {
    /// Creates a tenant identity, validating the name.
    ///
    /// Names are lowercase letters, digits and inner hyphens, at most 40
    /// characters, so they are usable as project, database and DNS labels.
    pub fn new(name: impl Into<String>) -> Result<Self, ConfigError> {
        let name = name.into();
        if !TENANT_NAME.is_match(&name) {
            return Err(ConfigError::InvalidTenant {
                name,
                reason: "expected 1-40 lowercase letters, digits or inner hyphens".to_string(),
            });
        }
        Ok(Self {
            name,
            domain: None,
            run_id: Uuid::new_v4(),
        })
    }

    /// Sets the public domain.
    #[must_use]
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Tenant name with hyphens replaced, for SQL identifiers.
    #[must_use]
    pub fn slug(&self) -> String {
        self.name.replace('-', "_")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_tenant_names() {
        for name in ["acme", "a", "acme-corp", "tenant42", "9lives"] {
            assert!(TenantIdentity::new(name).is_ok(), "{name} should be valid");
        }
    }

    #[test]
    fn test_invalid_tenant_names() {
        let too_long = "a".repeat(41);
        for name in ["", "Acme", "acme-", "-acme", "acme corp", "acme_corp", too_long.as_str()] {
            assert!(
                matches!(TenantIdentity::new(name), Err(ConfigError::InvalidTenant { .. })),
                "{name:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_run_ids_are_unique() {
        let a = TenantIdentity::new("acme").unwrap();
        let b = TenantIdentity::new("acme").unwrap();
        assert_ne!(a.run_id, b.run_id);
    }

    #[test]
    fn test_slug_and_domain() {
        let tenant = TenantIdentity::new("acme-corp")
            .unwrap()
            .with_domain("acme-corp.example.com");

        assert_eq!(tenant.slug(), "acme_corp");
        assert_eq!(tenant.domain.as_deref(), Some("acme-corp.example.com"));
    }
}
