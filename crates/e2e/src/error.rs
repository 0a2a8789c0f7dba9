//! Error types for the smoke-test runner

use thiserror::Error;

#[derive(Error, Debug)]
pub enum E2eError {
    #[error("kubectl not available: {0}")]
    KubectlUnavailable(String),

    #[error("kubectl {command} failed: {stderr}")]
    Kubectl { command: String, stderr: String },

    #[error("Pods not ready after {0}s")]
    ReadinessTimeout(u64),

    #[error("Tunnel '{name}' failed to start: {reason}")]
    TunnelStart { name: String, reason: String },

    #[error("Deployment step '{step}' failed: {reason}")]
    Deployment { step: String, reason: String },

    #[error("Playwright not found. Install with: npx playwright install chromium")]
    PlaywrightNotFound,

    #[error("Playwright error: {0}")]
    Playwright(String),

    #[error("Timeout waiting for: {0}")]
    Timeout(String),

    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Missing field '{0}' in response")]
    MissingField(&'static str),

    #[error("Config parse error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type E2eResult<T> = Result<T, E2eError>;
