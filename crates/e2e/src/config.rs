//! Runner configuration
//!
//! Every field has a default matching the AccessGate demo environment, so a
//! run with no config file and no flags needs nothing but a working kubectl.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::E2eResult;

/// Complete configuration for one smoke run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// JSON Lines event log
    pub log_file: PathBuf,

    /// kubectl binary (resolved through PATH)
    pub kubectl: String,

    /// Namespace holding the AccessGate workloads
    pub namespace: String,

    /// Backend base URL as seen through its tunnel
    pub backend_url: String,

    /// Frontend base URL as seen through its tunnel
    pub frontend_url: String,

    pub readiness: ReadinessConfig,
    pub tunnels: TunnelConfig,
    pub api: ApiConfig,
    pub browser: BrowserConfig,
    pub deploy: DeployConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            log_file: PathBuf::from("logs/e2e-test-results.jsonl"),
            kubectl: "kubectl".to_string(),
            namespace: "accessgate-poc".to_string(),
            backend_url: "http://localhost:8001".to_string(),
            frontend_url: "http://localhost:3001".to_string(),
            readiness: ReadinessConfig::default(),
            tunnels: TunnelConfig::default(),
            api: ApiConfig::default(),
            browser: BrowserConfig::default(),
            deploy: DeployConfig::default(),
        }
    }
}

impl RunConfig {
    /// Load configuration from a TOML file, falling back to defaults when absent
    pub fn load(path: &Path) -> E2eResult<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }
}

/// Pod readiness polling
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadinessConfig {
    pub timeout_secs: u64,
    pub interval_secs: u64,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 300,
            interval_secs: 10,
        }
    }
}

impl ReadinessConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// One `kubectl port-forward` mapping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelSpec {
    /// Logical name, e.g. "backend"
    pub name: String,

    /// Forward target, e.g. "service/accessgate-backend-service"
    pub target: String,

    pub local_port: u16,
    pub remote_port: u16,
}

impl TunnelSpec {
    pub fn new(name: &str, target: &str, local_port: u16, remote_port: u16) -> Self {
        Self {
            name: name.to_string(),
            target: target.to_string(),
            local_port,
            remote_port,
        }
    }

    /// `LOCAL:REMOTE` argument for kubectl
    pub fn port_mapping(&self) -> String {
        format!("{}:{}", self.local_port, self.remote_port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelConfig {
    /// Pause after starting the forwards so they can bind
    pub settle_secs: u64,

    /// Time allowed between SIGTERM and a forced kill
    pub grace_secs: u64,

    pub forwards: Vec<TunnelSpec>,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            settle_secs: 10,
            grace_secs: 5,
            forwards: vec![
                TunnelSpec::new("backend", "service/accessgate-backend-service", 8001, 8000),
                TunnelSpec::new("frontend", "service/accessgate-frontend-service", 3001, 3000),
            ],
        }
    }
}

impl TunnelConfig {
    pub fn settle(&self) -> Duration {
        Duration::from_secs(self.settle_secs)
    }

    pub fn grace(&self) -> Duration {
        Duration::from_secs(self.grace_secs)
    }
}

/// Account used by a probe suite. Fields missing from a partial table fall
/// back to the API test account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Credentials {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
}

impl Default for Credentials {
    fn default() -> Self {
        Self::new("api-test@accessgate.com", "ApiTest123!", "API", "Test")
    }
}

impl Credentials {
    pub fn new(email: &str, password: &str, first_name: &str, last_name: &str) -> Self {
        Self {
            email: email.to_string(),
            password: password.to_string(),
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
        }
    }
}

/// Which status codes count as a pass for the protected `/api/users` fetch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtectedAccess {
    /// Only 200
    #[default]
    Strict,
    /// 200, or 403 for an account without the `user.read` permission
    AllowForbidden,
}

impl ProtectedAccess {
    pub fn accepts(&self, status: u16) -> bool {
        match self {
            ProtectedAccess::Strict => status == 200,
            ProtectedAccess::AllowForbidden => status == 200 || status == 403,
        }
    }
}

/// HTTP probe suite
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub request_timeout_secs: u64,
    pub credentials: Credentials,
    pub protected_access: ProtectedAccess,

    /// Also probe the frontend root page over plain HTTP
    pub frontend_probe: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 10,
            credentials: Credentials::default(),
            protected_access: ProtectedAccess::Strict,
            frontend_probe: true,
        }
    }
}

impl ApiConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Playwright probe suite
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub enabled: bool,
    pub headless: bool,
    pub credentials: Credentials,
    pub navigation_timeout_secs: u64,

    /// Upper bound for the whole browser session
    pub session_timeout_secs: u64,

    /// Used for the `playwright --version` availability check
    pub npx: String,

    /// Runs the generated driver script
    pub node: String,

    /// Directory added to NODE_PATH so the generated script can `require('playwright')`
    pub node_path: Option<PathBuf>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            headless: true,
            credentials: Credentials::new(
                "e2e-test@accessgate.com",
                "E2ETest123!",
                "E2E",
                "Test",
            ),
            navigation_timeout_secs: 30,
            session_timeout_secs: 180,
            npx: "npx".to_string(),
            node: "node".to_string(),
            node_path: None,
        }
    }
}

impl BrowserConfig {
    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }
}

/// Optional deployment phase run before the probes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    pub enabled: bool,
    pub manifests_dir: PathBuf,
    pub wait_timeout_secs: u64,

    /// Pause before initialising the database, after PostgreSQL reports ready
    pub db_settle_secs: u64,
    pub postgres_image: String,
    pub db_host: String,
    pub db_user: String,
    pub db_name: String,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            manifests_dir: PathBuf::from("k8s"),
            wait_timeout_secs: 300,
            db_settle_secs: 10,
            postgres_image: "postgres:15".to_string(),
            db_host: "postgres-service".to_string(),
            db_user: "accessgate".to_string(),
            db_name: "accessgate_poc".to_string(),
        }
    }
}

impl DeployConfig {
    pub fn manifest(&self, name: &str) -> PathBuf {
        self.manifests_dir.join(format!("{}.yaml", name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_demo_environment() {
        let config = RunConfig::default();
        assert_eq!(config.namespace, "accessgate-poc");
        assert_eq!(config.readiness.timeout(), Duration::from_secs(300));
        assert_eq!(config.readiness.interval(), Duration::from_secs(10));
        assert_eq!(config.tunnels.grace(), Duration::from_secs(5));
        assert_eq!(config.api.request_timeout(), Duration::from_secs(10));
        assert_eq!(config.tunnels.forwards[0].port_mapping(), "8001:8000");
        assert_eq!(config.tunnels.forwards[1].port_mapping(), "3001:3000");
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: RunConfig = toml::from_str(
            r#"
namespace = "staging"

[api]
protected_access = "allow_forbidden"

[browser]
enabled = true
"#,
        )
        .unwrap();

        assert_eq!(config.namespace, "staging");
        assert_eq!(config.api.protected_access, ProtectedAccess::AllowForbidden);
        assert_eq!(config.api.credentials.email, "api-test@accessgate.com");
        assert!(config.browser.enabled);
        assert_eq!(config.browser.navigation_timeout_secs, 30);
        assert_eq!(config.tunnels.forwards.len(), 2);
    }

    #[test]
    fn test_partial_credentials_table() {
        let config: RunConfig = toml::from_str(
            r#"
[api.credentials]
email = "ops@accessgate.com"
"#,
        )
        .unwrap();

        assert_eq!(config.api.credentials.email, "ops@accessgate.com");
        assert_eq!(config.api.credentials.password, "ApiTest123!");
        assert_eq!(config.api.credentials.first_name, "API");
        assert_eq!(config.browser.credentials.email, "e2e-test@accessgate.com");
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = RunConfig::load(Path::new("/nonexistent/accessgate-e2e.toml")).unwrap();
        assert_eq!(config.backend_url, "http://localhost:8001");
    }

    #[test]
    fn test_protected_access_policy() {
        assert!(ProtectedAccess::Strict.accepts(200));
        assert!(!ProtectedAccess::Strict.accepts(403));
        assert!(ProtectedAccess::AllowForbidden.accepts(403));
        assert!(!ProtectedAccess::AllowForbidden.accepts(401));
    }
}
