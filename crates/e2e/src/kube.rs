//! kubectl access: presence check, pod status snapshots, manifests and waits

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use accessgate_common::EventLogger;

use crate::error::{E2eError, E2eResult};

/// Readiness snapshot of one pod
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodStatus {
    /// Pod phase as reported by the API server
    pub status: String,

    /// Primary container readiness
    pub ready: bool,

    pub restarts: u32,
}

/// Anything that can report pod readiness for the poller
#[async_trait]
pub trait PodStatusSource: Send + Sync {
    /// Current status by pod name. `Ok` with an empty map means the
    /// namespace has no pods; a failed query is an `Err`.
    async fn pod_statuses(&self) -> E2eResult<BTreeMap<String, PodStatus>>;
}

#[derive(Deserialize)]
struct PodList {
    #[serde(default)]
    items: Vec<PodItem>,
}

#[derive(Deserialize)]
struct PodItem {
    metadata: PodMeta,
    #[serde(default)]
    status: PodItemStatus,
}

#[derive(Deserialize)]
struct PodMeta {
    name: String,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct PodItemStatus {
    #[serde(default)]
    phase: String,
    #[serde(default)]
    container_statuses: Vec<ContainerStatus>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContainerStatus {
    #[serde(default)]
    ready: bool,
    #[serde(default)]
    restart_count: u32,
}

/// Parse `kubectl get pods -o json` output into per-pod readiness
pub fn parse_pod_list(json: &str) -> E2eResult<BTreeMap<String, PodStatus>> {
    let list: PodList = serde_json::from_str(json)?;
    Ok(list
        .items
        .into_iter()
        .map(|pod| {
            let primary = pod.status.container_statuses.first();
            let status = PodStatus {
                status: pod.status.phase,
                ready: primary.map(|c| c.ready).unwrap_or(false),
                restarts: primary.map(|c| c.restart_count).unwrap_or(0),
            };
            (pod.metadata.name, status)
        })
        .collect())
}

/// kubectl bound to one namespace
#[derive(Debug, Clone)]
pub struct Kubectl {
    program: String,
    namespace: String,
    logger: EventLogger,
}

impl Kubectl {
    pub fn new(
        program: impl Into<String>,
        namespace: impl Into<String>,
        logger: EventLogger,
    ) -> Self {
        Self {
            program: program.into(),
            namespace: namespace.into(),
            logger,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn logger(&self) -> &EventLogger {
        &self.logger
    }

    /// Run kubectl to completion, returning stdout
    pub async fn run(&self, args: &[&str]) -> E2eResult<String> {
        self.run_with_input(args, None).await
    }

    /// Run kubectl with `input` written to its stdin
    pub async fn run_with_input(&self, args: &[&str], input: Option<&[u8]>) -> E2eResult<String> {
        debug!("{} {}", self.program, args.join(" "));

        let mut cmd = Command::new(&self.program);
        cmd.args(args)
            .stdin(if input.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                E2eError::KubectlUnavailable(format!("{} not found on PATH", self.program))
            } else {
                E2eError::Io(e)
            }
        })?;

        if let (Some(bytes), Some(mut stdin)) = (input, child.stdin.take()) {
            stdin.write_all(bytes).await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(E2eError::Kubectl {
                command: args.first().copied().unwrap_or_default().to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Verify kubectl is installed and runnable
    pub async fn check(&self) -> E2eResult<String> {
        match self.run(&["version", "--client"]).await {
            Ok(stdout) => {
                let version = stdout.trim().to_string();
                self.logger.log_event(
                    "kubectl_check",
                    "kubectl available",
                    json!({ "kubectl_version": version }),
                );
                Ok(version)
            }
            Err(e) => {
                self.logger.log_event(
                    "kubectl_check",
                    "kubectl not available",
                    json!({ "status": "error", "error": e.to_string() }),
                );
                Err(match e {
                    E2eError::KubectlUnavailable(msg) => E2eError::KubectlUnavailable(msg),
                    other => E2eError::KubectlUnavailable(other.to_string()),
                })
            }
        }
    }

    /// Snapshot pod readiness in the namespace, logging the result
    pub async fn query_pods(&self) -> E2eResult<BTreeMap<String, PodStatus>> {
        let stdout = self
            .run(&["get", "pods", "-n", &self.namespace, "-o", "json"])
            .await?;
        parse_pod_list(&stdout)
    }

    /// Apply a manifest file into the namespace
    pub async fn apply(&self, manifest: &Path) -> E2eResult<()> {
        let manifest = manifest.to_string_lossy();
        self.run(&["apply", "-f", &manifest, "-n", &self.namespace]).await?;
        Ok(())
    }

    /// Block until pods matching `selector` report Ready, or kubectl's own timeout fires
    pub async fn wait_for_ready(&self, selector: &str, timeout: Duration) -> E2eResult<()> {
        let timeout = format!("--timeout={}s", timeout.as_secs());
        self.run(&[
            "wait",
            "--for=condition=ready",
            "pod",
            "-l",
            selector,
            "-n",
            &self.namespace,
            &timeout,
        ])
        .await?;
        Ok(())
    }

    /// Create the namespace if missing (client-side dry run piped into apply)
    pub async fn ensure_namespace(&self) -> E2eResult<()> {
        let manifest = self
            .run(&["create", "namespace", &self.namespace, "--dry-run=client", "-o", "yaml"])
            .await?;
        self.run_with_input(&["apply", "-f", "-"], Some(manifest.as_bytes()))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl PodStatusSource for Kubectl {
    async fn pod_statuses(&self) -> E2eResult<BTreeMap<String, PodStatus>> {
        match self.query_pods().await {
            Ok(pods) => {
                self.logger.log_event(
                    "pods_status",
                    "Pod status retrieved",
                    json!({ "pods": pods }),
                );
                Ok(pods)
            }
            Err(e) => {
                warn!("Pod status query failed: {}", e);
                self.logger.log_event(
                    "pods_status",
                    "Pod status query failed",
                    json!({ "error": e.to_string(), "status": "error" }),
                );
                Err(e)
            }
        }
    }
}
