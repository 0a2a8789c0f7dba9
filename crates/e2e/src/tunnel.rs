//! `kubectl port-forward` tunnels
//!
//! Tunnels are owned handles: [`TunnelManager::open`] returns a [`TunnelSet`]
//! holding only the forwards that actually started, and [`TunnelSet::close`]
//! consumes the set so each process is released once. A set dropped without
//! `close` (panic, early return) still kills its processes from `Drop`.

use std::process::Stdio;
use std::time::Duration;

use serde_json::json;
use tokio::process::{Child, Command};
use tokio::time::{sleep, timeout};
use tracing::{info, warn};

use accessgate_common::EventLogger;

use crate::config::{RunConfig, TunnelSpec};
use crate::error::{E2eError, E2eResult};

/// How a tunnel process ended during cleanup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Exited within the grace period after SIGTERM
    Stopped,
    /// Still running after the grace period and force-killed
    Killed,
}

/// One running port-forward process
#[derive(Debug)]
pub struct Tunnel {
    name: String,
    child: Option<Child>,
}

impl Tunnel {
    /// Start `kubectl port-forward <target> LOCAL:REMOTE -n <namespace>`
    pub fn spawn(program: &str, namespace: &str, spec: &TunnelSpec) -> E2eResult<Self> {
        let child = Command::new(program)
            .arg("port-forward")
            .arg(&spec.target)
            .arg(spec.port_mapping())
            .arg("-n")
            .arg(namespace)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| E2eError::TunnelStart {
                name: spec.name.clone(),
                reason: e.to_string(),
            })?;

        Ok(Self::from_child(&spec.name, child))
    }

    pub(crate) fn from_child(name: &str, child: Child) -> Self {
        Self {
            name: name.to_string(),
            child: Some(child),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(|c| c.id())
    }

    /// True if the process has already exited on its own
    fn has_exited(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(Some(_))),
            None => true,
        }
    }

    /// SIGTERM, wait up to `grace`, then SIGKILL. Releases the process exactly once.
    async fn terminate(&mut self, grace: Duration) -> E2eResult<Termination> {
        let Some(mut child) = self.child.take() else {
            return Ok(Termination::Stopped);
        };

        request_stop(&mut child)?;

        match timeout(grace, child.wait()).await {
            Ok(status) => {
                status?;
                Ok(Termination::Stopped)
            }
            Err(_) => {
                child.kill().await?;
                Ok(Termination::Killed)
            }
        }
    }
}

impl Drop for Tunnel {
    fn drop(&mut self) {
        if let Some(child) = self.child.as_mut() {
            let _ = child.start_kill();
        }
    }
}

#[cfg(unix)]
fn request_stop(child: &mut Child) -> E2eResult<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    // already reaped
    let Some(pid) = child.id() else {
        return Ok(());
    };

    kill(Pid::from_raw(pid as i32), Signal::SIGTERM)
        .map_err(|e| E2eError::Io(std::io::Error::from(e)))
}

#[cfg(not(unix))]
fn request_stop(child: &mut Child) -> E2eResult<()> {
    child.start_kill()?;
    Ok(())
}

/// The tunnels that started successfully in one run
#[derive(Debug)]
pub struct TunnelSet {
    tunnels: Vec<Tunnel>,
    grace: Duration,
    logger: EventLogger,
}

impl TunnelSet {
    pub(crate) fn new(tunnels: Vec<Tunnel>, grace: Duration, logger: EventLogger) -> Self {
        Self {
            tunnels,
            grace,
            logger,
        }
    }

    pub fn len(&self) -> usize {
        self.tunnels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tunnels.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tunnels.iter().map(|t| t.name()).collect()
    }

    /// Terminate every tunnel. Failures are logged and never stop the
    /// remaining tunnels from being visited.
    pub async fn close(mut self) -> Vec<(String, Option<Termination>)> {
        self.logger
            .log_event("port_forward_cleanup", "Cleaning up port forwarding", json!({}));

        let mut results = Vec::with_capacity(self.tunnels.len());
        for tunnel in self.tunnels.iter_mut() {
            let name = tunnel.name().to_string();
            match tunnel.terminate(self.grace).await {
                Ok(Termination::Stopped) => {
                    info!("Tunnel {} stopped", name);
                    self.logger.log_event(
                        "port_forward_cleanup",
                        format!("Process {} stopped", name),
                        json!({ "tunnel": name, "result": "stopped" }),
                    );
                    results.push((name, Some(Termination::Stopped)));
                }
                Ok(Termination::Killed) => {
                    warn!("Tunnel {} did not stop within {:?}, killed", name, self.grace);
                    self.logger.log_event(
                        "port_forward_cleanup",
                        format!("Process {} killed", name),
                        json!({ "tunnel": name, "result": "killed" }),
                    );
                    results.push((name, Some(Termination::Killed)));
                }
                Err(e) => {
                    warn!("Failed to stop tunnel {}: {}", name, e);
                    self.logger.log_event(
                        "port_forward_cleanup",
                        format!("Error stopping {}", name),
                        json!({ "tunnel": name, "result": "error", "error": e.to_string() }),
                    );
                    results.push((name, None));
                }
            }
        }
        results
    }
}

/// Opens the configured port-forwards
pub struct TunnelManager {
    program: String,
    namespace: String,
    specs: Vec<TunnelSpec>,
    settle: Duration,
    grace: Duration,
    logger: EventLogger,
}

impl TunnelManager {
    pub fn new(config: &RunConfig, logger: EventLogger) -> Self {
        Self {
            program: config.kubectl.clone(),
            namespace: config.namespace.clone(),
            specs: config.tunnels.forwards.clone(),
            settle: config.tunnels.settle(),
            grace: config.tunnels.grace(),
            logger,
        }
    }

    /// Start every forward independently, then wait for them to bind.
    ///
    /// A forward that fails to start is logged and left out of the returned
    /// set; it never prevents the others from starting.
    pub async fn open(&self) -> TunnelSet {
        self.logger
            .log_event("port_forward", "Setting up port forwarding", json!({}));

        let mut tunnels = Vec::with_capacity(self.specs.len());
        for spec in &self.specs {
            match Tunnel::spawn(&self.program, &self.namespace, spec) {
                Ok(tunnel) => {
                    info!(
                        "Forwarding localhost:{} -> {}:{}",
                        spec.local_port, spec.target, spec.remote_port
                    );
                    self.logger.log_event(
                        "port_forward",
                        format!("{} port forwarding started", spec.name),
                        json!({ "tunnel": spec.name, "port": spec.local_port.to_string() }),
                    );
                    tunnels.push(tunnel);
                }
                Err(e) => {
                    warn!("{}", e);
                    self.logger.log_event(
                        "port_forward",
                        format!("{} port forwarding failed", spec.name),
                        json!({ "tunnel": spec.name, "error": e.to_string(), "status": "error" }),
                    );
                }
            }
        }

        if !tunnels.is_empty() {
            sleep(self.settle).await;
        }

        // A forward that could not bind its local port exits right away; keep
        // the handle (cleanup still owns it) but say so.
        for tunnel in tunnels.iter_mut() {
            if tunnel.has_exited() {
                warn!("Tunnel {} exited during startup", tunnel.name());
                self.logger.log_event(
                    "port_forward",
                    format!("{} port forwarding exited", tunnel.name()),
                    json!({ "tunnel": tunnel.name(), "status": "error" }),
                );
            }
        }

        TunnelSet::new(tunnels, self.grace, self.logger.clone())
    }
}
