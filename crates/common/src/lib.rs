//! AccessGate Common Library
//!
//! Shared infrastructure for the AccessGate smoke-test tooling: the JSON Lines
//! event log consumed by the dashboard, and the pass/fail aggregation that
//! turns a run's probe outcomes into an exit status.

pub mod error;
pub mod event;
pub mod outcome;

pub use error::{Error, Result};
pub use event::{Clock, Event, EventLogger, EventSink, FixedClock, SystemClock, TestStatus};
pub use outcome::{aggregate, OutcomeMap, RunSummary, SUCCESS_THRESHOLD};
