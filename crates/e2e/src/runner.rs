//! Smoke run orchestration: kubectl check, optional deploy, readiness,
//! tunnels, probe suites, aggregation, and guaranteed tunnel cleanup

use std::future::Future;
use std::time::Instant;

use serde_json::json;
use tracing::{error, info, warn};

use accessgate_common::{aggregate, EventLogger, EventSink, OutcomeMap, RunSummary};

use crate::api::ApiProbes;
use crate::browser::BrowserProbes;
use crate::config::RunConfig;
use crate::deploy::Deployer;
use crate::error::{E2eError, E2eResult};
use crate::kube::Kubectl;
use crate::readiness::ReadinessPoller;
use crate::tunnel::{TunnelManager, TunnelSet};

/// Probe outcomes and their aggregate
#[derive(Debug, Clone)]
pub struct RunReport {
    pub outcomes: OutcomeMap,
    pub summary: RunSummary,
}

/// How a run ended
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// Probes ran and were aggregated
    Completed(RunReport),
    /// A precondition failed or an unexpected error stopped the run
    Aborted(String),
    /// The user interrupted the run
    Interrupted,
}

impl RunOutcome {
    pub fn passed(&self) -> bool {
        matches!(self, RunOutcome::Completed(report) if report.summary.passed())
    }

    pub fn exit_code(&self) -> i32 {
        if self.passed() {
            0
        } else {
            1
        }
    }
}

/// Runs one smoke test against the configured namespace
pub struct SmokeRunner {
    config: RunConfig,
    sink: EventSink,
    logger: EventLogger,
}

impl SmokeRunner {
    pub fn new(config: RunConfig, sink: EventSink) -> Self {
        let logger = sink.logger("e2e_runner");
        Self {
            config,
            sink,
            logger,
        }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Run to completion, stopping early on Ctrl-C
    pub async fn run(&self) -> RunOutcome {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                // without a handler, never interrupt
                warn!("Cannot listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Run until done or until `interrupt` resolves. Tunnels that were
    /// opened are closed on every path.
    pub async fn run_until<F: Future<Output = ()>>(&self, interrupt: F) -> RunOutcome {
        self.logger.log_event(
            "test_suite_start",
            "Starting E2E test suite",
            json!({ "namespace": self.config.namespace }),
        );
        let start = Instant::now();
        let mut tunnels: Option<TunnelSet> = None;

        let outcome = tokio::select! {
            biased;

            _ = interrupt => {
                warn!("Interrupted, cleaning up");
                self.logger.log_event(
                    "test_suite_interrupted",
                    "Test suite interrupted by user",
                    json!({ "status": "error" }),
                );
                RunOutcome::Interrupted
            }
            result = self.execute(start, &mut tunnels) => match result {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!("Test suite error: {}", e);
                    self.logger.log_event(
                        "test_suite_error",
                        "Test suite error",
                        json!({ "error": e.to_string(), "status": "error" }),
                    );
                    RunOutcome::Aborted(e.to_string())
                }
            },
        };

        if let Some(set) = tunnels.take() {
            set.close().await;
        }

        outcome
    }

    async fn execute(
        &self,
        start: Instant,
        tunnels: &mut Option<TunnelSet>,
    ) -> E2eResult<RunOutcome> {
        let kubectl = Kubectl::new(
            &self.config.kubectl,
            &self.config.namespace,
            self.sink.logger("kubernetes"),
        );

        if let Err(e) = kubectl.check().await {
            error!("{}", e);
            return Ok(self.abort("kubectl not available", e));
        }

        if self.config.deploy.enabled {
            self.logger
                .log_event("test_suite", "Deploying components", json!({}));
            let deployer = Deployer::new(&self.config, self.sink.logger("k8s_deployer"));
            if !deployer.deploy().await {
                return Ok(self.abort(
                    "Deployment failed",
                    E2eError::Deployment {
                        step: "deploy".to_string(),
                        reason: "see k8s_deployer events".to_string(),
                    },
                ));
            }
        }

        self.logger.log_event("test_suite", "Checking pods", json!({}));
        let readiness = &self.config.readiness;
        let poller =
            ReadinessPoller::new(kubectl, readiness.interval(), self.sink.logger("kubernetes"));
        if !poller.wait_ready(readiness.timeout()).await {
            return Ok(self.abort(
                "Pods not ready",
                E2eError::ReadinessTimeout(readiness.timeout_secs),
            ));
        }

        let manager = TunnelManager::new(&self.config, self.sink.logger("kubernetes"));
        let set = tunnels.insert(manager.open().await);
        info!("{} tunnel(s) open: {}", set.len(), set.names().join(", "));

        self.logger
            .log_event("test_suite", "Running API tests", json!({}));
        let api = ApiProbes::new(&self.config, self.sink.logger("api_tester"))?;
        let mut outcomes = api.run(&self.config.api.credentials).await;

        if self.config.browser.enabled {
            self.logger
                .log_event("test_suite", "Running Playwright tests", json!({}));
            let browser = BrowserProbes::new(&self.config, self.sink.logger("playwright_tester"));
            outcomes.merge(browser.run().await);
        }

        let summary = aggregate(&outcomes, start.elapsed(), &self.logger);
        info!(
            "{}/{} passed ({:.1}%)",
            summary.succeeded, summary.total, summary.success_rate
        );

        Ok(RunOutcome::Completed(RunReport { outcomes, summary }))
    }

    fn abort(&self, message: &str, cause: E2eError) -> RunOutcome {
        self.logger.log_event(
            "test_suite",
            message,
            json!({ "status": "error", "error": cause.to_string() }),
        );
        RunOutcome::Aborted(cause.to_string())
    }
}
