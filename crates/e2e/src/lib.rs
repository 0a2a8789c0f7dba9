//! AccessGate smoke-test runner
//!
//! Verifies an AccessGate deployment on Kubernetes end to end:
//! - Checks kubectl and (optionally) deploys the manifests
//! - Polls pod readiness in the namespace
//! - Opens `kubectl port-forward` tunnels to the backend and frontend
//! - Runs the HTTP probe suite and, if enabled, the Playwright browser suite
//! - Aggregates outcomes against the 80% threshold
//!
//! Every step reports into one JSON Lines event log shared by all components.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    SmokeRunner (Rust)                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Kubectl::check()                                           │
//! │  Deployer::deploy()            (--deploy)                   │
//! │  ReadinessPoller::wait_ready() -> bool                      │
//! │  TunnelManager::open() -> TunnelSet ──┐                     │
//! │  ApiProbes::run() -> OutcomeMap       │                     │
//! │    ├── health                         │                     │
//! │    ├── register ─┐                    │                     │
//! │    ├── login ────┤ Session (token)    │                     │
//! │    ├── protected ┘                    │                     │
//! │    └── frontend_access                │                     │
//! │  BrowserProbes::run() -> OutcomeMap   │ (--browser)         │
//! │  aggregate() -> RunSummary            │                     │
//! │  TunnelSet::close() <─────────────────┘ always              │
//! ├─────────────────────────────────────────────────────────────┤
//! │  EventSink (JSONL file + stdout)                            │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod browser;
pub mod config;
pub mod deploy;
pub mod error;
pub mod kube;
pub mod readiness;
pub mod runner;
pub mod tunnel;

pub use config::RunConfig;
pub use error::{E2eError, E2eResult};
pub use runner::{RunOutcome, RunReport, SmokeRunner};
