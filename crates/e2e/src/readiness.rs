//! Pod readiness polling

use std::time::Duration;

use serde_json::json;
use tokio::time::{sleep, Instant};
use tracing::{error, info, warn};

use accessgate_common::EventLogger;

use crate::kube::PodStatusSource;

/// Polls a [`PodStatusSource`] on a fixed interval until every pod is ready
pub struct ReadinessPoller<S> {
    source: S,
    interval: Duration,
    logger: EventLogger,
}

impl<S: PodStatusSource> ReadinessPoller<S> {
    pub fn new(source: S, interval: Duration, logger: EventLogger) -> Self {
        Self {
            source,
            interval,
            logger,
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Wait until a snapshot shows every pod ready, or `timeout` elapses.
    ///
    /// An empty snapshot counts as ready and is logged with `pod_count: 0`.
    /// A failed query is "not yet ready" and is retried on the next interval.
    pub async fn wait_ready(&self, timeout: Duration) -> bool {
        self.logger.log_event("pods_wait", "Waiting for pods", json!({}));
        let start = Instant::now();
        let mut polls = 0u32;
        let mut failed_polls = 0u32;

        while start.elapsed() < timeout {
            polls += 1;
            let pods = match self.source.pod_statuses().await {
                Ok(pods) => pods,
                Err(e) => {
                    failed_polls += 1;
                    warn!("Pod status unavailable, retrying: {}", e);
                    sleep(self.interval).await;
                    continue;
                }
            };

            if pods.values().all(|pod| pod.ready) {
                let elapsed = start.elapsed();
                info!("All {} pod(s) ready after {:.1}s", pods.len(), elapsed.as_secs_f64());
                self.logger.log_event(
                    "pods_ready",
                    "All pods are ready",
                    json!({
                        "duration": elapsed.as_secs_f64(),
                        "pod_count": pods.len(),
                        "polls": polls,
                    }),
                );
                return true;
            }

            let pending: Vec<&str> = pods
                .iter()
                .filter(|(_, pod)| !pod.ready)
                .map(|(name, _)| name.as_str())
                .collect();
            info!("Waiting on {} pod(s): {}", pending.len(), pending.join(", "));

            sleep(self.interval).await;
        }

        error!("Pods not ready after {}s", timeout.as_secs());
        self.logger.log_event(
            "pods_timeout",
            "Timed out waiting for pods",
            json!({
                "status": "error",
                "duration": timeout.as_secs_f64(),
                "polls": polls,
                "failed_polls": failed_polls,
            }),
        );
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{E2eError, E2eResult};
    use crate::kube::PodStatus;
    use accessgate_common::{EventSink, SystemClock};
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    type Snapshot = Option<BTreeMap<String, PodStatus>>;

    /// Replays a fixed list of snapshots, repeating the last one forever.
    /// `None` stands for a failed query.
    struct ScriptedSource {
        snapshots: Mutex<Vec<Snapshot>>,
        calls: AtomicUsize,
    }

    impl ScriptedSource {
        fn new(snapshots: Vec<Snapshot>) -> Self {
            Self {
                snapshots: Mutex::new(snapshots),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PodStatusSource for ScriptedSource {
        async fn pod_statuses(&self) -> E2eResult<BTreeMap<String, PodStatus>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut snapshots = self.snapshots.lock().unwrap();
            let next = if snapshots.len() > 1 {
                snapshots.remove(0)
            } else {
                snapshots.first().cloned().flatten()
            };
            next.ok_or_else(|| E2eError::Kubectl {
                command: "get".to_string(),
                stderr: "Unable to connect to the server".to_string(),
            })
        }
    }

    fn snapshot(pods: &[(&str, bool)]) -> Snapshot {
        let pods = pods
            .iter()
            .map(|(name, ready)| {
                (
                    name.to_string(),
                    PodStatus {
                        status: "Running".to_string(),
                        ready: *ready,
                        restarts: 0,
                    },
                )
            })
            .collect();
        Some(pods)
    }

    fn make_poller(
        source: ScriptedSource,
        dir: &tempfile::TempDir,
    ) -> (ReadinessPoller<ScriptedSource>, EventSink) {
        let path = dir.path().join("ready.jsonl");
        let sink = EventSink::open_with(path, Arc::new(SystemClock), false).unwrap();
        let poller =
            ReadinessPoller::new(source, Duration::from_secs(10), sink.logger("kubernetes"));
        (poller, sink)
    }

    fn last_event(sink: &EventSink) -> serde_json::Value {
        let content = std::fs::read_to_string(sink.path()).unwrap();
        serde_json::from_str(content.lines().last().unwrap()).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_on_first_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let source =
            ScriptedSource::new(vec![snapshot(&[("backend", true), ("frontend", true)])]);
        let (poller, sink) = make_poller(source, &dir);

        let start = Instant::now();
        assert!(poller.wait_ready(Duration::from_secs(300)).await);
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(poller.source().calls(), 1);

        let event = last_event(&sink);
        assert_eq!(event["event_type"], "pods_ready");
        assert_eq!(event["pod_count"], 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_after_some_polls() {
        let dir = tempfile::tempdir().unwrap();
        let source = ScriptedSource::new(vec![
            Some(BTreeMap::new()),
            snapshot(&[("backend", false), ("frontend", true)]),
            snapshot(&[("backend", true), ("frontend", true)]),
        ]);
        // an empty first snapshot is already "all ready"
        let (poller, _sink) = make_poller(source, &dir);
        assert!(poller.wait_ready(Duration::from_secs(300)).await);
        assert_eq!(poller.source().calls(), 1);

        let source = ScriptedSource::new(vec![
            snapshot(&[("backend", false), ("frontend", true)]),
            snapshot(&[("backend", false), ("frontend", true)]),
            snapshot(&[("backend", true), ("frontend", true)]),
        ]);
        let (poller, _sink) = make_poller(source, &dir);
        let start = Instant::now();
        assert!(poller.wait_ready(Duration::from_secs(300)).await);
        assert_eq!(poller.source().calls(), 3);
        assert!(start.elapsed() >= Duration::from_secs(20));
        assert!(start.elapsed() < Duration::from_secs(21));
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_without_extra_poll() {
        let dir = tempfile::tempdir().unwrap();
        let source = ScriptedSource::new(vec![snapshot(&[("backend", false)])]);
        let (poller, sink) = make_poller(source, &dir);

        let start = Instant::now();
        assert!(!poller.wait_ready(Duration::from_secs(30)).await);

        // polls at 0s, 10s and 20s; the loop ends at 30s without a fourth query
        assert_eq!(poller.source().calls(), 3);
        assert!(start.elapsed() >= Duration::from_secs(30));
        assert!(start.elapsed() < Duration::from_secs(31));

        let event = last_event(&sink);
        assert_eq!(event["event_type"], "pods_timeout");
        assert_eq!(event["status"], "error");
        assert_eq!(event["level"], "INFO");
        assert_eq!(event["duration"], 30.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_queries_are_not_ready() {
        let dir = tempfile::tempdir().unwrap();
        let (poller, sink) = make_poller(ScriptedSource::new(vec![None]), &dir);

        let start = Instant::now();
        assert!(!poller.wait_ready(Duration::from_secs(30)).await);
        assert_eq!(poller.source().calls(), 3);
        assert!(start.elapsed() >= Duration::from_secs(30));

        let event = last_event(&sink);
        assert_eq!(event["event_type"], "pods_timeout");
        assert_eq!(event["failed_polls"], 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_once_cluster_answers() {
        let dir = tempfile::tempdir().unwrap();
        let source = ScriptedSource::new(vec![None, None, Some(BTreeMap::new())]);
        let (poller, sink) = make_poller(source, &dir);

        let start = Instant::now();
        assert!(poller.wait_ready(Duration::from_secs(300)).await);
        assert_eq!(poller.source().calls(), 3);
        assert!(start.elapsed() >= Duration::from_secs(20));
        assert!(start.elapsed() < Duration::from_secs(21));

        let event = last_event(&sink);
        assert_eq!(event["event_type"], "pods_ready");
        assert_eq!(event["pod_count"], 0);
        assert_eq!(event["polls"], 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_timeout_never_polls() {
        let dir = tempfile::tempdir().unwrap();
        let source = ScriptedSource::new(vec![snapshot(&[("backend", true)])]);
        let (poller, _sink) = make_poller(source, &dir);

        assert!(!poller.wait_ready(Duration::ZERO).await);
        assert_eq!(poller.source().calls(), 0);
    }
}
