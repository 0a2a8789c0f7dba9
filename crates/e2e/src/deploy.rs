//! Optional deployment phase: namespace, PostgreSQL, schema, application manifests

use std::time::{Duration, Instant};

use serde_json::json;
use tokio::time::sleep;
use tracing::{info, warn};

use accessgate_common::EventLogger;

use crate::config::{DeployConfig, RunConfig};
use crate::error::{E2eError, E2eResult};
use crate::kube::Kubectl;

/// Schema and seed data applied after PostgreSQL comes up
pub const INIT_SQL: &str = include_str!("../sql/init.sql");

/// Application manifests applied after the database, in order
const APP_MANIFESTS: [(&str, &str); 3] = [
    ("backend", "Backend"),
    ("frontend", "Frontend"),
    ("services", "Services"),
];

const VERIFY_SELECTORS: [&str; 2] = ["app=accessgate-backend", "app=accessgate-frontend"];

/// Applies the AccessGate manifests to the cluster
pub struct Deployer {
    kubectl: Kubectl,
    settings: DeployConfig,
    logger: EventLogger,
}

impl Deployer {
    pub fn new(config: &RunConfig, logger: EventLogger) -> Self {
        Self {
            kubectl: Kubectl::new(&config.kubectl, &config.namespace, logger.clone()),
            settings: config.deploy.clone(),
            logger,
        }
    }

    fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.settings.wait_timeout_secs)
    }

    /// Run every step. Returns whether the application pods verified ready;
    /// a fatal step failure also yields `false`.
    pub async fn deploy(&self) -> bool {
        self.logger
            .log_event("deployment_start", "Starting full deployment", json!({}));
        let start = Instant::now();

        match self.run_steps().await {
            Ok(verified) => {
                let duration = start.elapsed().as_secs_f64();
                info!("Deployment finished in {:.1}s (verified: {})", duration, verified);
                self.logger.log_event(
                    "deployment_complete",
                    "Deployment finished",
                    json!({ "success": verified, "duration": duration }),
                );
                verified
            }
            Err(e) => {
                warn!("{}", e);
                self.logger.log_event(
                    "deployment_error",
                    "Deployment failed",
                    json!({ "error": e.to_string(), "status": "error" }),
                );
                false
            }
        }
    }

    async fn run_steps(&self) -> E2eResult<bool> {
        self.create_namespace().await;
        self.apply_manifest("postgres", "PostgreSQL").await?;
        self.wait_for_postgres().await?;
        self.init_database().await;

        for (step, label) in APP_MANIFESTS {
            self.apply_manifest(step, label).await?;
        }

        Ok(self.verify().await)
    }

    /// An existing namespace (or any failure here) is not fatal
    async fn create_namespace(&self) {
        self.logger
            .log_event("namespace_create", "Creating namespace", json!({}));

        match self.kubectl.ensure_namespace().await {
            Ok(()) => self
                .logger
                .log_event("namespace_created", "Namespace created", json!({})),
            Err(e) => self.logger.log_event(
                "namespace_exists",
                "Namespace already exists",
                json!({ "error": e.to_string() }),
            ),
        }
    }

    async fn apply_manifest(&self, step: &str, label: &str) -> E2eResult<()> {
        self.logger.log_event(
            &format!("{}_deploy", step),
            format!("Deploying {}", label),
            json!({}),
        );

        let manifest = self.settings.manifest(step);
        match self.kubectl.apply(&manifest).await {
            Ok(()) => {
                self.logger.log_event(
                    &format!("{}_deployed", step),
                    format!("{} deployed", label),
                    json!({ "manifest": manifest.display().to_string() }),
                );
                Ok(())
            }
            Err(e) => {
                self.logger.log_event(
                    &format!("{}_error", step),
                    format!("{} deployment failed", label),
                    json!({ "error": e.to_string() }),
                );
                Err(E2eError::Deployment {
                    step: step.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    async fn wait_for_postgres(&self) -> E2eResult<()> {
        self.logger
            .log_event("postgres_wait", "Waiting for PostgreSQL", json!({}));

        match self.kubectl.wait_for_ready("app=postgres", self.wait_timeout()).await {
            Ok(()) => {
                self.logger
                    .log_event("postgres_ready", "PostgreSQL ready", json!({}));
                Ok(())
            }
            Err(e) => {
                self.logger.log_event(
                    "postgres_timeout",
                    "Timed out waiting for PostgreSQL",
                    json!({ "error": e.to_string() }),
                );
                Err(E2eError::Deployment {
                    step: "postgres_wait".to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Run the bundled SQL from a throw-away psql pod. Failure is logged and
    /// skipped; an already initialised database is the common cause.
    async fn init_database(&self) {
        self.logger
            .log_event("db_init", "Initialising database", json!({}));

        sleep(Duration::from_secs(self.settings.db_settle_secs)).await;

        let image = format!("--image={}", self.settings.postgres_image);
        let namespace = self.kubectl.namespace().to_string();
        let args = [
            "run",
            "postgres-init",
            image.as_str(),
            "--rm",
            "-i",
            "--restart=Never",
            "-n",
            namespace.as_str(),
            "--",
            "psql",
            "-h",
            self.settings.db_host.as_str(),
            "-U",
            self.settings.db_user.as_str(),
            "-d",
            self.settings.db_name.as_str(),
            "-c",
            INIT_SQL,
        ];

        match self.kubectl.run(&args).await {
            Ok(_) => self
                .logger
                .log_event("db_initialized", "Database initialised", json!({})),
            Err(e) => {
                warn!("Database init failed, continuing: {}", e);
                self.logger.log_event(
                    "db_init_error",
                    "Database initialisation failed",
                    json!({ "error": e.to_string() }),
                );
                self.logger
                    .log_event("db_init_skip", "Database initialisation skipped", json!({}));
            }
        }
    }

    /// Wait for the backend and frontend pods
    pub async fn verify(&self) -> bool {
        self.logger
            .log_event("deployment_verify", "Verifying deployment", json!({}));

        for selector in VERIFY_SELECTORS {
            if let Err(e) = self.kubectl.wait_for_ready(selector, self.wait_timeout()).await {
                self.logger.log_event(
                    "deployment_verify_error",
                    "Deployment verification failed",
                    json!({ "error": e.to_string(), "selector": selector }),
                );
                return false;
            }
        }

        self.logger
            .log_event("deployment_verified", "Deployment verified", json!({}));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use accessgate_common::{EventSink, SystemClock};
    use serde_json::Value;
    use std::sync::Arc;

    fn deployer(dir: &tempfile::TempDir, kubectl: &str) -> (Deployer, EventSink) {
        let path = dir.path().join("deploy.jsonl");
        let sink = EventSink::open_with(path, Arc::new(SystemClock), false).unwrap();
        let mut config = RunConfig::default();
        config.kubectl = kubectl.to_string();
        config.deploy.db_settle_secs = 0;
        (Deployer::new(&config, sink.logger("k8s_deployer")), sink)
    }

    fn event_types(sink: &EventSink) -> Vec<String> {
        std::fs::read_to_string(sink.path())
            .unwrap()
            .lines()
            .map(|l| {
                let event: Value = serde_json::from_str(l).unwrap();
                event["event_type"].as_str().unwrap().to_string()
            })
            .collect()
    }

    #[test]
    fn test_init_sql_is_idempotent() {
        for table in ["users", "roles", "permissions", "user_roles", "role_permissions"] {
            assert!(INIT_SQL.contains(&format!("CREATE TABLE IF NOT EXISTS {} (", table)));
        }
        assert_eq!(INIT_SQL.matches("ON CONFLICT").count(), 5);
    }

    #[tokio::test]
    async fn test_missing_kubectl_stops_at_postgres() {
        let dir = tempfile::tempdir().unwrap();
        let (deployer, sink) = deployer(&dir, "/nonexistent/kubectl");

        assert!(!deployer.deploy().await);
        assert_eq!(
            event_types(&sink),
            vec![
                "deployment_start",
                "namespace_create",
                "namespace_exists",
                "postgres_deploy",
                "postgres_error",
                "deployment_error",
            ]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_every_step_runs_in_order() {
        let dir = tempfile::tempdir().unwrap();
        // `true` accepts any arguments and succeeds
        let (deployer, sink) = deployer(&dir, "true");

        assert!(deployer.deploy().await);
        assert_eq!(
            event_types(&sink),
            vec![
                "deployment_start",
                "namespace_create",
                "namespace_created",
                "postgres_deploy",
                "postgres_deployed",
                "postgres_wait",
                "postgres_ready",
                "db_init",
                "db_initialized",
                "backend_deploy",
                "backend_deployed",
                "frontend_deploy",
                "frontend_deployed",
                "services_deploy",
                "services_deployed",
                "deployment_verify",
                "deployment_verified",
                "deployment_complete",
            ]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_verify_is_not_fatal_error() {
        let dir = tempfile::tempdir().unwrap();
        let (deployer, sink) = deployer(&dir, "false");

        assert!(!deployer.verify().await);
        assert_eq!(
            event_types(&sink),
            vec!["deployment_verify", "deployment_verify_error"]
        );
    }
}
