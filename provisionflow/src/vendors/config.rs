//! Configuration for the vendor adapters.
//!
//! Every value is injected per run; nothing is read from process-wide
//! state once a [`ProvisionConfig`] has been built.

use crate::credentials::Secret;
use crate::errors::ConfigError;
use crate::pipeline::OrchestratorConfig;
use crate::polling::PollConfig;
use serde::Deserialize;
use std::time::Duration;

/// Configuration for the shared HTTP client.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HttpConfig {
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: f64,
    /// User agent string.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_timeout() -> f64 {
    30.0
}

fn default_user_agent() -> String {
    concat!("provisionflow/", env!("CARGO_PKG_VERSION")).to_string()
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

impl HttpConfig {
    /// Creates a new HTTP configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the timeout.
    #[must_use]
    pub fn with_timeout(mut self, seconds: f64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    /// Gets the timeout as a Duration.
    ///
    /// A value that is not a representable positive duration falls back to
    /// the default.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeout_seconds)
            .ok()
            .filter(|d| !d.is_zero())
            .unwrap_or_else(|| Duration::from_secs_f64(default_timeout()))
    }
}

/// Neon database API settings.
#[derive(Debug, Clone, Deserialize)]
pub struct NeonConfig {
    /// API key.
    pub api_key: Secret,
    /// API base URL.
    #[serde(default = "default_neon_base_url")]
    pub base_url: String,
    /// Region for new projects.
    #[serde(default = "default_neon_region")]
    pub region_id: String,
    /// Postgres major version for new projects.
    #[serde(default = "default_pg_version")]
    pub pg_version: u32,
    /// Budget for waiting on endpoints and project operations.
    #[serde(default)]
    pub poll: PollConfig,
}

fn default_neon_base_url() -> String {
    "https://console.neon.tech/api/v2".to_string()
}

fn default_neon_region() -> String {
    "aws-us-east-1".to_string()
}

fn default_pg_version() -> u32 {
    16
}

impl NeonConfig {
    /// Creates a configuration with defaults for everything but the key.
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: Secret::new(api_key),
            base_url: default_neon_base_url(),
            region_id: default_neon_region(),
            pg_version: default_pg_version(),
            poll: PollConfig::default(),
        }
    }

    /// Sets the base URL.
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Sets the region.
    #[must_use]
    pub fn with_region(mut self, region_id: impl Into<String>) -> Self {
        self.region_id = region_id.into();
        self
    }

    /// Sets the polling budget.
    #[must_use]
    pub fn with_poll(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }
}

/// Database bootstrap settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BootstrapConfig {
    /// Seeded admin email. Derived from the tenant when unset.
    #[serde(default)]
    pub admin_email: Option<String>,
    /// Budget for waiting until the database accepts connections.
    #[serde(default = "default_connect_poll")]
    pub connect_poll: PollConfig,
}

fn default_connect_poll() -> PollConfig {
    PollConfig::new()
        .with_interval(Duration::from_secs(3))
        .with_max_attempts(10)
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            admin_email: None,
            connect_poll: default_connect_poll(),
        }
    }
}

impl BootstrapConfig {
    /// Sets the admin email.
    #[must_use]
    pub fn with_admin_email(mut self, email: impl Into<String>) -> Self {
        self.admin_email = Some(email.into());
        self
    }
}

/// Railway backend hosting settings.
#[derive(Debug, Clone, Deserialize)]
pub struct RailwayConfig {
    /// API token.
    pub api_key: Secret,
    /// GraphQL endpoint.
    #[serde(default = "default_railway_endpoint")]
    pub endpoint: String,
    /// Backend source repository, `owner/name`.
    pub backend_repo: String,
}

fn default_railway_endpoint() -> String {
    "https://backboard.railway.app/graphql/v2".to_string()
}

impl RailwayConfig {
    /// Creates a configuration with the default endpoint.
    #[must_use]
    pub fn new(api_key: impl Into<String>, backend_repo: impl Into<String>) -> Self {
        Self {
            api_key: Secret::new(api_key),
            endpoint: default_railway_endpoint(),
            backend_repo: backend_repo.into(),
        }
    }

    /// Sets the GraphQL endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

/// Readiness check for the deployed backend.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReadinessConfig {
    /// Path probed on the backend.
    #[serde(default = "default_health_path")]
    pub path: String,
    /// Budget for the backend to answer.
    #[serde(default = "default_readiness_poll")]
    pub poll: PollConfig,
}

fn default_health_path() -> String {
    "/".to_string()
}

fn default_readiness_poll() -> PollConfig {
    PollConfig::new()
        .with_interval(Duration::from_secs(10))
        .with_max_attempts(60)
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            path: default_health_path(),
            poll: default_readiness_poll(),
        }
    }
}

/// Vercel frontend hosting settings.
#[derive(Debug, Clone, Deserialize)]
pub struct VercelConfig {
    /// API token.
    pub token: Secret,
    /// API base URL.
    #[serde(default = "default_vercel_base_url")]
    pub base_url: String,
    /// Frontend source repository, `owner/name`.
    pub frontend_repo: String,
    /// Team scope for API calls.
    #[serde(default)]
    pub team_id: Option<String>,
    /// Framework preset.
    #[serde(default = "default_framework")]
    pub framework: String,
}

fn default_vercel_base_url() -> String {
    "https://api.vercel.com".to_string()
}

fn default_framework() -> String {
    "nextjs".to_string()
}

impl VercelConfig {
    /// Creates a configuration with defaults for the rest.
    #[must_use]
    pub fn new(token: impl Into<String>, frontend_repo: impl Into<String>) -> Self {
        Self {
            token: Secret::new(token),
            base_url: default_vercel_base_url(),
            frontend_repo: frontend_repo.into(),
            team_id: None,
            framework: default_framework(),
        }
    }

    /// Sets the base URL.
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Sets the team scope.
    #[must_use]
    pub fn with_team(mut self, team_id: impl Into<String>) -> Self {
        self.team_id = Some(team_id.into());
        self
    }
}

/// Namecheap DNS settings.
#[derive(Debug, Clone, Deserialize)]
pub struct NamecheapConfig {
    /// API user (also used as the account user name).
    pub api_user: String,
    /// API key.
    pub api_key: Secret,
    /// Whitelisted client IP.
    pub client_ip: String,
    /// API endpoint.
    #[serde(default = "default_namecheap_endpoint")]
    pub endpoint: String,
    /// CNAME target for tenant hosts.
    #[serde(default = "default_cname_target")]
    pub cname_target: String,
    /// Record TTL in seconds.
    #[serde(default = "default_ttl")]
    pub ttl: u32,
}

fn default_namecheap_endpoint() -> String {
    "https://api.namecheap.com/xml.response".to_string()
}

/// Namecheap sandbox endpoint.
pub const NAMECHEAP_SANDBOX_ENDPOINT: &str = "https://api.sandbox.namecheap.com/xml.response";

fn default_cname_target() -> String {
    "cname.vercel-dns.com".to_string()
}

fn default_ttl() -> u32 {
    60
}

impl NamecheapConfig {
    /// Creates a configuration with defaults for the rest.
    #[must_use]
    pub fn new(api_user: impl Into<String>, api_key: impl Into<String>, client_ip: impl Into<String>) -> Self {
        Self {
            api_user: api_user.into(),
            api_key: Secret::new(api_key),
            client_ip: client_ip.into(),
            endpoint: default_namecheap_endpoint(),
            cname_target: default_cname_target(),
            ttl: default_ttl(),
        }
    }

    /// Sets the endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Sets the CNAME target.
    #[must_use]
    pub fn with_cname_target(mut self, target: impl Into<String>) -> Self {
        self.cname_target = target.into();
        self
    }
}

/// Everything needed to build the standard pipeline.
///
/// Downstream vendors are optional; their stages skip when unconfigured.
#[derive(Debug, Clone, Deserialize)]
pub struct ProvisionConfig {
    /// Shared HTTP client settings.
    #[serde(default)]
    pub http: HttpConfig,
    /// Neon settings.
    pub neon: NeonConfig,
    /// Database bootstrap settings.
    #[serde(default)]
    pub bootstrap: BootstrapConfig,
    /// Railway settings.
    #[serde(default)]
    pub railway: Option<RailwayConfig>,
    /// Backend readiness settings.
    #[serde(default)]
    pub readiness: ReadinessConfig,
    /// Vercel settings.
    #[serde(default)]
    pub vercel: Option<VercelConfig>,
    /// Namecheap settings.
    #[serde(default)]
    pub namecheap: Option<NamecheapConfig>,
    /// Orchestrator settings.
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
}

impl ProvisionConfig {
    /// Creates a configuration with only the database vendor set.
    #[must_use]
    pub fn new(neon: NeonConfig) -> Self {
        Self {
            http: HttpConfig::default(),
            neon,
            bootstrap: BootstrapConfig::default(),
            railway: None,
            readiness: ReadinessConfig::default(),
            vercel: None,
            namecheap: None,
            orchestrator: OrchestratorConfig::default(),
        }
    }

    /// Load configuration from environment variables.
    ///
    /// | Env Var                | Required                          |
    /// |------------------------|-----------------------------------|
    /// | `NEON_API_KEY`         | yes                               |
    /// | `NEON_REGION`          | no (`aws-us-east-1`)              |
    /// | `RAILWAY_API_KEY`      | enables the backend stages        |
    /// | `BACKEND_REPO`         | with `RAILWAY_API_KEY`            |
    /// | `VERCEL_TOKEN`         | enables the frontend stage        |
    /// | `FRONTEND_REPO`        | with `VERCEL_TOKEN`               |
    /// | `VERCEL_TEAM_ID`       | no                                |
    /// | `NAMECHEAP_API_USER`   | enables DNS, with the two below   |
    /// | `NAMECHEAP_API_KEY`    |                                   |
    /// | `NAMECHEAP_CLIENT_IP`  |                                   |
    /// | `NAMECHEAP_SANDBOX`    | no (`false`)                      |
    /// | `DNS_CNAME_TARGET`     | no (`cname.vercel-dns.com`)       |
    /// | `ADMIN_EMAIL`          | no                                |
    /// | `POLL_INTERVAL_MS`     | no (`2000`)                       |
    /// | `POLL_MAX_ATTEMPTS`    | no (`30`)                         |
    /// | `HTTP_TIMEOUT_SECS`    | no (`30`)                         |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let require = |name: &str| get(name).ok_or_else(|| ConfigError::MissingEnv(name.to_string()));

        let mut poll = PollConfig::default();
        if let Some(ms) = parse_opt::<u64>("POLL_INTERVAL_MS", get("POLL_INTERVAL_MS"))? {
            poll = poll.with_interval(Duration::from_millis(ms));
        }
        if let Some(n) = parse_opt::<u32>("POLL_MAX_ATTEMPTS", get("POLL_MAX_ATTEMPTS"))? {
            poll = poll.with_max_attempts(n);
        }

        let mut neon = NeonConfig::new(require("NEON_API_KEY")?).with_poll(poll);
        if let Some(region) = get("NEON_REGION") {
            neon = neon.with_region(region);
        }

        let mut config = Self::new(neon);

        if let Some(secs) = parse_opt::<f64>("HTTP_TIMEOUT_SECS", get("HTTP_TIMEOUT_SECS"))? {
            config.http = config.http.with_timeout(check_timeout("HTTP_TIMEOUT_SECS", secs)?);
        }

        if let Some(email) = get("ADMIN_EMAIL") {
            config.bootstrap = config.bootstrap.with_admin_email(email);
        }

        if let Some(key) = get("RAILWAY_API_KEY") {
            config.railway = Some(RailwayConfig::new(key, require("BACKEND_REPO")?));
        }

        if let Some(token) = get("VERCEL_TOKEN") {
            let mut vercel = VercelConfig::new(token, require("FRONTEND_REPO")?);
            if let Some(team) = get("VERCEL_TEAM_ID") {
                vercel = vercel.with_team(team);
            }
            config.vercel = Some(vercel);
        }

        let namecheap_vars = ["NAMECHEAP_API_USER", "NAMECHEAP_API_KEY", "NAMECHEAP_CLIENT_IP"];
        if namecheap_vars.iter().any(|name| get(name).is_some()) {
            let mut namecheap = NamecheapConfig::new(
                require(namecheap_vars[0])?,
                require(namecheap_vars[1])?,
                require(namecheap_vars[2])?,
            );
            if parse_opt::<bool>("NAMECHEAP_SANDBOX", get("NAMECHEAP_SANDBOX"))?.unwrap_or(false) {
                namecheap = namecheap.with_endpoint(NAMECHEAP_SANDBOX_ENDPOINT);
            }
            if let Some(target) = get("DNS_CNAME_TARGET") {
                namecheap = namecheap.with_cname_target(target);
            }
            config.namecheap = Some(namecheap);
        }

        Ok(config)
    }
}

fn check_timeout(name: &str, seconds: f64) -> Result<f64, ConfigError> {
    match Duration::try_from_secs_f64(seconds) {
        Ok(d) if !d.is_zero() => Ok(seconds),
        Ok(_) => Err(ConfigError::InvalidEnv {
            name: name.to_string(),
            reason: "must be greater than zero".to_string(),
        }),
        Err(e) => Err(ConfigError::InvalidEnv {
            name: name.to_string(),
            reason: e.to_string(),
        }),
    }
}

fn parse_opt<T>(name: &str, value: Option<String>) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .map(|v| {
            v.parse::<T>().map_err(|e| ConfigError::InvalidEnv {
                name: name.to_string(),
                reason: e.to_string(),
            })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_minimal_env() {
        let config = ProvisionConfig::from_lookup(lookup(&[("NEON_API_KEY", "neon-key")])).unwrap();

        assert_eq!(config.neon.api_key.expose(), "neon-key");
        assert_eq!(config.neon.region_id, "aws-us-east-1");
        assert!(config.railway.is_none());
        assert!(config.vercel.is_none());
        assert!(config.namecheap.is_none());
    }

    #[test]
    fn test_missing_neon_key() {
        let err = ProvisionConfig::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnv(name) if name == "NEON_API_KEY"));
    }

    #[test]
    fn test_blank_values_count_as_missing() {
        let err = ProvisionConfig::from_lookup(lookup(&[("NEON_API_KEY", "  ")])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnv(_)));
    }

    #[test]
    fn test_full_env() {
        let config = ProvisionConfig::from_lookup(lookup(&[
            ("NEON_API_KEY", "n"),
            ("NEON_REGION", "aws-eu-central-1"),
            ("RAILWAY_API_KEY", "r"),
            ("BACKEND_REPO", "acme/api"),
            ("VERCEL_TOKEN", "v"),
            ("FRONTEND_REPO", "acme/web"),
            ("VERCEL_TEAM_ID", "team_1"),
            ("NAMECHEAP_API_USER", "u"),
            ("NAMECHEAP_API_KEY", "k"),
            ("NAMECHEAP_CLIENT_IP", "203.0.113.7"),
            ("NAMECHEAP_SANDBOX", "true"),
            ("POLL_INTERVAL_MS", "500"),
            ("POLL_MAX_ATTEMPTS", "4"),
        ]))
        .unwrap();

        assert_eq!(config.neon.region_id, "aws-eu-central-1");
        assert_eq!(config.neon.poll.worst_case_wait(), Duration::from_secs(2));
        assert_eq!(config.railway.unwrap().backend_repo, "acme/api");
        assert_eq!(config.vercel.unwrap().team_id.as_deref(), Some("team_1"));
        assert_eq!(config.namecheap.unwrap().endpoint, NAMECHEAP_SANDBOX_ENDPOINT);
    }

    #[test]
    fn test_partial_namecheap_env_is_an_error() {
        let err = ProvisionConfig::from_lookup(lookup(&[("NEON_API_KEY", "n"), ("NAMECHEAP_API_USER", "u")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnv(name) if name == "NAMECHEAP_API_KEY"));
    }

    #[test]
    fn test_railway_requires_repo() {
        let err = ProvisionConfig::from_lookup(lookup(&[("NEON_API_KEY", "n"), ("RAILWAY_API_KEY", "r")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnv(name) if name == "BACKEND_REPO"));
    }

    #[test]
    fn test_invalid_number() {
        let err = ProvisionConfig::from_lookup(lookup(&[("NEON_API_KEY", "n"), ("POLL_MAX_ATTEMPTS", "many")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { name, .. } if name == "POLL_MAX_ATTEMPTS"));
    }

    #[test]
    fn test_unrepresentable_timeout_is_rejected() {
        for value in ["inf", "NaN", "1e20", "-5", "0"] {
            let err = ProvisionConfig::from_lookup(lookup(&[("NEON_API_KEY", "n"), ("HTTP_TIMEOUT_SECS", value)]))
                .unwrap_err();
            assert!(
                matches!(&err, ConfigError::InvalidEnv { name, .. } if name == "HTTP_TIMEOUT_SECS"),
                "{value}: {err}"
            );
        }

        let config =
            ProvisionConfig::from_lookup(lookup(&[("NEON_API_KEY", "n"), ("HTTP_TIMEOUT_SECS", "2.5")])).unwrap();
        assert_eq!(config.http.timeout(), Duration::from_millis(2500));
    }

    #[test]
    fn test_timeout_falls_back_to_default() {
        assert_eq!(HttpConfig::new().with_timeout(f64::INFINITY).timeout(), Duration::from_secs(30));
        assert_eq!(HttpConfig::new().with_timeout(f64::NAN).timeout(), Duration::from_secs(30));
        assert_eq!(HttpConfig::new().with_timeout(-1.0).timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_deserialize_defaults() {
        let config: ProvisionConfig = serde_json::from_str(r#"{"neon": {"api_key": "k"}}"#).unwrap();

        assert_eq!(config.neon.pg_version, 16);
        assert_eq!(config.http, HttpConfig::default());
        assert_eq!(config.readiness.poll.max_attempts, 60);
    }
}
