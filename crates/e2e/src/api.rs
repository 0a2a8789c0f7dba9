//! HTTP probes against the AccessGate backend and frontend
//!
//! The probes run in a fixed order (health, register, login, protected fetch)
//! because the access token flows forward. The token lives in a [`Session`]
//! passed explicitly between calls, so any probe can also be exercised alone
//! with an injected token.

use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use accessgate_common::{EventLogger, OutcomeMap, TestStatus};

use crate::config::{Credentials, ProtectedAccess, RunConfig};
use crate::error::{E2eError, E2eResult};

/// Authentication state carried between probes of one run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    token: Option<String>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    /// Replace the token with whatever the latest auth response carried
    fn replace(&mut self, token: Option<String>) {
        self.token = token;
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RegisterRequest<'a> {
    email: &'a str,
    password: &'a str,
    first_name: &'a str,
    last_name: &'a str,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

/// Outcome of one probe body before it is logged
struct Probe {
    success: bool,
    context: Value,
}

/// Accept only absolute http(s) URLs
fn http_url(raw: &str) -> E2eResult<String> {
    let invalid = |reason: String| E2eError::InvalidUrl {
        url: raw.to_string(),
        reason,
    };
    let url = reqwest::Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(raw.to_string()),
        other => Err(invalid(format!("unsupported scheme '{}'", other))),
    }
}

/// The HTTP probe suite
pub struct ApiProbes {
    client: reqwest::Client,
    backend_url: String,
    frontend_url: String,
    protected_access: ProtectedAccess,
    frontend_probe: bool,
    logger: EventLogger,
}

impl ApiProbes {
    pub fn new(config: &RunConfig, logger: EventLogger) -> E2eResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.api.request_timeout())
            .build()?;

        Ok(Self {
            client,
            backend_url: http_url(&config.backend_url)?
                .trim_end_matches('/')
                .to_string(),
            frontend_url: http_url(&config.frontend_url)?,
            protected_access: config.api.protected_access,
            frontend_probe: config.api.frontend_probe,
            logger,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.backend_url, path)
    }

    /// Run the whole suite in order with a fresh session
    pub async fn run(&self, credentials: &Credentials) -> OutcomeMap {
        let mut session = Session::new();
        let mut outcomes = OutcomeMap::new();

        outcomes.record("api_health", self.health().await);
        outcomes.record("api_registration", self.register(&mut session, credentials).await);
        outcomes.record("api_login", self.login(&mut session, credentials).await);
        outcomes.record("api_protected", self.protected_fetch(&session).await);

        if self.frontend_probe {
            outcomes.record("frontend_access", self.frontend_access().await);
        }

        outcomes
    }

    /// GET /health, expecting 200; reports the `uptime` field as a metric
    pub async fn health(&self) -> bool {
        let start = Instant::now();
        let result = async {
            let response = self.client.get(self.url("/health")).send().await?;
            let status = response.status().as_u16();
            let success = status == 200;

            if success {
                // A body without uptime (or without JSON at all) still passes.
                let body: Value = response.json().await.unwrap_or(Value::Null);
                let uptime = body.get("uptime").and_then(Value::as_f64).unwrap_or(0.0);
                self.logger.log_metric("health_uptime", uptime, json!({}));
            }

            Ok::<_, E2eError>(Probe {
                success,
                context: json!({ "status_code": status }),
            })
        }
        .await;

        self.finish("api_health", start, result)
    }

    /// POST /api/auth/register, expecting 201 with an access token
    pub async fn register(&self, session: &mut Session, credentials: &Credentials) -> bool {
        let start = Instant::now();
        let result = async {
            let request = RegisterRequest {
                email: &credentials.email,
                password: &credentials.password,
                first_name: &credentials.first_name,
                last_name: &credentials.last_name,
            };
            let response = self
                .client
                .post(self.url("/api/auth/register"))
                .json(&request)
                .send()
                .await?;
            let status = response.status().as_u16();
            let success = status == 201;

            if success {
                let body: Value = response.json().await?;
                session.replace(access_token(&body));
                self.logger.log_metric("user_registration_success", 1.0, json!({}));
            } else {
                self.logger.log_metric("user_registration_failure", 1.0, json!({}));
            }

            Ok::<_, E2eError>(Probe {
                success,
                context: json!({ "status_code": status, "email": credentials.email }),
            })
        }
        .await;

        self.finish("api_registration", start, result)
    }

    /// POST /api/auth/login, expecting 200 with an access token
    pub async fn login(&self, session: &mut Session, credentials: &Credentials) -> bool {
        let start = Instant::now();
        let result = async {
            let request = LoginRequest {
                email: &credentials.email,
                password: &credentials.password,
            };
            let response = self
                .client
                .post(self.url("/api/auth/login"))
                .json(&request)
                .send()
                .await?;
            let status = response.status().as_u16();
            let success = status == 200;

            if success {
                let body: Value = response.json().await?;
                session.replace(access_token(&body));
                self.logger.log_metric("user_login_success", 1.0, json!({}));
            } else {
                self.logger.log_metric("user_login_failure", 1.0, json!({}));
            }

            Ok::<_, E2eError>(Probe {
                success,
                context: json!({ "status_code": status, "email": credentials.email }),
            })
        }
        .await;

        self.finish("api_login", start, result)
    }

    /// GET /api/users with the session's bearer token.
    ///
    /// Fails without sending anything when the session holds no token.
    pub async fn protected_fetch(&self, session: &Session) -> bool {
        let start = Instant::now();

        let Some(token) = session.token() else {
            warn!("No access token captured, skipping protected fetch");
            self.logger.log_test_result(
                "api_protected",
                TestStatus::Fail,
                start.elapsed(),
                json!({ "error": "no access token in session" }),
            );
            return false;
        };

        let result = async {
            let response = self
                .client
                .get(self.url("/api/users"))
                .bearer_auth(token)
                .send()
                .await?;
            let status = response.status().as_u16();
            let success = self.protected_access.accepts(status);

            if status == 200 {
                let body: Value = response.json().await?;
                let users = body
                    .get("users")
                    .and_then(Value::as_array)
                    .map(Vec::len)
                    .unwrap_or(0);
                self.logger.log_metric("users_count", users as f64, json!({}));
            }

            Ok::<_, E2eError>(Probe {
                success,
                context: json!({ "status_code": status }),
            })
        }
        .await;

        self.finish("api_protected", start, result)
    }

    /// GET the frontend root page, expecting 200
    pub async fn frontend_access(&self) -> bool {
        let start = Instant::now();
        let result = async {
            let response = self.client.get(&self.frontend_url).send().await?;
            let status = response.status().as_u16();
            let success = status == 200;

            if success {
                let page = response.text().await?;
                let valid = page.contains("AccessGate") && page.contains("RBAC");
                self.logger
                    .log_metric("frontend_page_valid", if valid { 1.0 } else { 0.0 }, json!({}));
            }

            Ok::<_, E2eError>(Probe {
                success,
                context: json!({ "status_code": status }),
            })
        }
        .await;

        self.finish("frontend_access", start, result)
    }

    /// Log the test result for a finished probe body and return its outcome
    fn finish(&self, name: &str, start: Instant, result: E2eResult<Probe>) -> bool {
        let duration: Duration = start.elapsed();
        match result {
            Ok(probe) => {
                let status = TestStatus::from_success(probe.success);
                info!("{} {} ({} ms)", status, name, duration.as_millis());
                self.logger
                    .log_test_result(name, status, duration, probe.context);
                probe.success
            }
            Err(e) => {
                warn!("{} failed: {}", name, e);
                self.logger.log_test_result(
                    name,
                    TestStatus::Fail,
                    duration,
                    json!({ "error": e.to_string() }),
                );
                false
            }
        }
    }
}

fn access_token(body: &Value) -> Option<String> {
    let token = body.get("accessToken").and_then(Value::as_str).map(String::from);
    if token.is_none() {
        warn!("{}", E2eError::MissingField("accessToken"));
    }
    token
}
