//! Playwright browser probes
//!
//! One generated Node script drives a single Chromium page through the five
//! checks and prints a JSON observation per check. Pass/fail is decided here,
//! from those observations, so the thresholds below are the whole scoring policy.

use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use accessgate_common::{EventLogger, OutcomeMap, TestStatus};

use crate::config::{BrowserConfig, Credentials, RunConfig};
use crate::error::{E2eError, E2eResult};

/// Minimum profile elements (of [`PROFILE_SELECTORS`]) that must render
pub const PROFILE_MIN_ELEMENTS: usize = 2;

/// Minimum navigation buttons (of [`RBAC_BUTTONS`]) that must accept a click
pub const RBAC_MIN_WORKING_BUTTONS: usize = 2;

pub const REGISTRATION_PHRASE: &str = "Inscription réussie";
pub const LOGIN_PHRASE: &str = "Connexion réussie";

/// Accepted in any case when the localized phrase is absent
const SUCCESS_FALLBACK: &str = "success";

/// Checks in execution order
pub const CHECKS: [&str; 5] = [
    "page_load",
    "registration",
    "login",
    "profile_display",
    "rbac_navigation",
];

pub const PROFILE_SELECTORS: [&str; 4] = [
    "h1:has-text('Mon Profil')",
    "#profile-email",
    "#profile-firstName",
    "#profile-lastName",
];

pub const RBAC_BUTTONS: [&str; 4] = [
    "button:has-text('Utilisateurs')",
    "button:has-text('Rôles')",
    "button:has-text('Permissions')",
    "button:has-text('Dashboard')",
];

const REGISTER_BUTTON: &str = r"button:has-text('S\'inscrire')";
const LOGIN_BUTTON: &str = "button:has-text('Se connecter')";
const RESULT_SELECTOR: &str = "#auth-result";

const DRIVER: &str = include_str!("driver.js");

/// Parameters handed to the driver script
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DriverConfig<'a> {
    url: &'a str,
    headless: bool,
    navigation_timeout_ms: u64,
    selector_timeout_ms: u64,
    profile_settle_ms: u64,
    profile_timeout_ms: u64,
    click_settle_ms: u64,
    credentials: &'a Credentials,
    register_button: &'a str,
    login_button: &'a str,
    result_selector: &'a str,
    profile_selectors: &'a [&'a str],
    rbac_buttons: &'a [&'a str],
}

/// What the driver saw for one check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    #[serde(skip_serializing)]
    pub check: String,

    /// The check body ran to completion without throwing
    #[serde(skip_serializing)]
    pub ok: bool,

    #[serde(skip_serializing)]
    pub duration: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_text: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elements_found: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_buttons: Option<usize>,
}

impl Observation {
    fn duration(&self) -> Duration {
        if self.duration.is_finite() && self.duration >= 0.0 {
            Duration::from_secs_f64(self.duration)
        } else {
            Duration::ZERO
        }
    }
}

fn result_text_matches(text: Option<&str>, phrase: &str) -> bool {
    text.map(|t| t.contains(phrase) || t.to_lowercase().contains(SUCCESS_FALLBACK))
        .unwrap_or(false)
}

/// Decide pass/fail for one observation
pub fn score(observation: &Observation) -> bool {
    if !observation.ok {
        return false;
    }

    match observation.check.as_str() {
        "page_load" => true,
        "registration" => {
            result_text_matches(observation.result_text.as_deref(), REGISTRATION_PHRASE)
        }
        "login" => result_text_matches(observation.result_text.as_deref(), LOGIN_PHRASE),
        "profile_display" => observation.elements_found.unwrap_or(0) >= PROFILE_MIN_ELEMENTS,
        "rbac_navigation" => {
            observation.working_buttons.unwrap_or(0) >= RBAC_MIN_WORKING_BUTTONS
        }
        _ => false,
    }
}

/// Collect observation lines from driver stdout, skipping anything that isn't one
pub fn parse_observations(stdout: &str) -> Vec<Observation> {
    stdout
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            if !line.starts_with('{') {
                return None;
            }
            serde_json::from_str(line).ok()
        })
        .collect()
}

fn unavailable() -> OutcomeMap {
    [("playwright_available", false)].into_iter().collect()
}

/// The browser probe suite
pub struct BrowserProbes {
    frontend_url: String,
    settings: BrowserConfig,
    logger: EventLogger,
}

impl BrowserProbes {
    pub fn new(config: &RunConfig, logger: EventLogger) -> Self {
        Self {
            frontend_url: config.frontend_url.clone(),
            settings: config.browser.clone(),
            logger,
        }
    }

    /// Run every check. When Playwright cannot be used at all (no `npx
    /// playwright`, no `node`, or a driver that dies before reporting any
    /// check) the suite yields the single outcome `playwright_available =
    /// false` instead of five failures. A session that hangs past its timeout
    /// scores every check as failed.
    pub async fn run(&self) -> OutcomeMap {
        if let Err(e) = self.check_available().await {
            warn!("{}", e);
            self.logger.log_event(
                "playwright_import",
                "Playwright not installed",
                json!({ "status": "error", "error": e.to_string() }),
            );
            return unavailable();
        }

        let observations = match self.run_driver().await {
            Ok(observations) => observations,
            Err(e @ E2eError::Timeout(_)) => {
                warn!("Browser session failed: {}", e);
                self.logger.log_event(
                    "playwright_session",
                    "Browser session timed out",
                    json!({ "status": "error", "error": e.to_string() }),
                );
                Vec::new()
            }
            Err(e) => {
                warn!("Browser driver unavailable: {}", e);
                self.logger.log_event(
                    "playwright_session",
                    "Browser driver could not start",
                    json!({ "status": "error", "error": e.to_string() }),
                );
                return unavailable();
            }
        };

        self.score_all(&observations)
    }

    /// `npx playwright --version` must succeed
    pub async fn check_available(&self) -> E2eResult<String> {
        let output = Command::new(&self.settings.npx)
            .args(["playwright", "--version"])
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|_| E2eError::PlaywrightNotFound)?;

        if !output.status.success() {
            return Err(E2eError::PlaywrightNotFound);
        }

        let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
        debug!("Playwright {}", version);
        Ok(version)
    }

    /// Render the driver script with this run's parameters
    pub fn build_script(&self) -> E2eResult<String> {
        let navigation_timeout_ms = self.settings.navigation_timeout_secs * 1000;
        let config = DriverConfig {
            url: &self.frontend_url,
            headless: self.settings.headless,
            navigation_timeout_ms,
            selector_timeout_ms: 10_000,
            profile_settle_ms: 2_000,
            profile_timeout_ms: 5_000,
            click_settle_ms: 1_000,
            credentials: &self.settings.credentials,
            register_button: REGISTER_BUTTON,
            login_button: LOGIN_BUTTON,
            result_selector: RESULT_SELECTOR,
            profile_selectors: &PROFILE_SELECTORS,
            rbac_buttons: &RBAC_BUTTONS,
        };

        Ok(format!(
            "const config = {};\n\n{}",
            serde_json::to_string(&config)?,
            DRIVER
        ))
    }

    /// Write the script to a temp dir and run it under node, bounded by the session timeout
    pub async fn run_driver(&self) -> E2eResult<Vec<Observation>> {
        let temp_dir = tempfile::tempdir()?;
        let script_path = temp_dir.path().join("accessgate-e2e.js");
        std::fs::write(&script_path, self.build_script()?)?;

        debug!("Running browser driver: {}", script_path.display());

        let mut cmd = Command::new(&self.settings.node);
        cmd.arg(&script_path)
            .current_dir(temp_dir.path())
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(node_path) = &self.settings.node_path {
            cmd.env("NODE_PATH", node_path);
        }

        let session_timeout = self.settings.session_timeout();
        let output = timeout(session_timeout, cmd.output())
            .await
            .map_err(|_| {
                E2eError::Timeout(format!("browser session ({}s)", session_timeout.as_secs()))
            })??;

        let observations = parse_observations(&String::from_utf8_lossy(&output.stdout));
        if !output.status.success() && observations.is_empty() {
            return Err(E2eError::Playwright(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        Ok(observations)
    }

    /// Score every check, logging one test result each. Checks the driver
    /// never reported are failures.
    pub fn score_all(&self, observations: &[Observation]) -> OutcomeMap {
        let mut outcomes = OutcomeMap::new();

        for check in CHECKS {
            let Some(observation) = observations.iter().find(|o| o.check == check) else {
                warn!("No observation for {}", check);
                self.logger.log_test_result(
                    check,
                    TestStatus::Fail,
                    Duration::ZERO,
                    json!({ "error": "no observation from browser driver" }),
                );
                outcomes.record(check, false);
                continue;
            };

            let success = score(observation);
            let status = TestStatus::from_success(success);
            info!("{} {}", status, check);

            let context = serde_json::to_value(observation).unwrap_or_default();
            self.logger
                .log_test_result(check, status, observation.duration(), context);
            outcomes.record(check, success);
        }

        outcomes
    }
}
