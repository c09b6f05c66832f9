//! Health monitoring for egress paths
//!
//! Periodically probes every configured proxy and updates its health flag.
//! Each tick also drops expired sticky bindings.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use http::header::{HeaderMap, HeaderValue, USER_AGENT};
use tokio::sync::watch;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use super::pool::EgressPool;
use super::transport::UpstreamRequest;
use crate::config::HealthConfig;
use crate::models::EgressPath;

/// Upper bound on concurrent probes per round
const MAX_CONCURRENT_PROBES: usize = 16;

const PROBE_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Background prober for the egress pool
pub struct HealthMonitor {
    pool: Arc<EgressPool>,
    config: HealthConfig,
}

impl HealthMonitor {
    pub fn new(pool: Arc<EgressPool>, config: HealthConfig) -> Self {
        Self { pool, config }
    }

    /// Run until `shutdown` flips to true (call in a spawned task)
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting health monitor with {}s interval",
            self.config.interval.as_secs()
        );

        let mut check_interval = interval(self.config.interval);
        check_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = check_interval.tick() => {
                    self.check_all().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Health monitor shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Probe every path once and purge expired sticky bindings
    pub async fn check_all(&self) {
        let purged = self.pool.purge_expired();
        if purged > 0 {
            debug!("Purged {} expired sticky bindings", purged);
        }

        let paths = self.pool.paths().to_vec();
        if paths.is_empty() {
            return;
        }

        debug!("Checking health of {} egress paths", paths.len());

        let workers = paths.len().min(MAX_CONCURRENT_PROBES);
        let results = futures::stream::iter(paths)
            .map(|path| async move {
                let healthy = self.probe(&path).await;
                if healthy {
                    self.pool.mark_healthy(&path);
                } else {
                    self.pool.mark_unhealthy(&path);
                }
                healthy
            })
            .buffer_unordered(workers)
            .collect::<Vec<bool>>()
            .await;

        let healthy_count = results.iter().filter(|&&v| v).count();
        info!(
            "Health check complete: {} healthy, {} unhealthy",
            healthy_count,
            results.len().saturating_sub(healthy_count)
        );
    }

    /// Returns true when the probe URL answers with a 2xx through `path`
    async fn probe(&self, path: &EgressPath) -> bool {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(PROBE_USER_AGENT));
        let request = UpstreamRequest {
            url: self.config.probe_url.clone(),
            headers,
            timeout: self.config.timeout,
            streaming: false,
        };

        // The transport timeout covers the request; this one also bounds connection setup.
        let deadline = self.config.timeout + Duration::from_secs(1);
        match timeout(deadline, path.transport().send(request)).await {
            Ok(Ok(response)) if response.status.is_success() => {
                debug!("Egress path {} is healthy ({})", path.label(), response.status);
                true
            }
            Ok(Ok(response)) => {
                warn!(
                    "Egress path {} probe returned {}",
                    path.label(),
                    response.status
                );
                false
            }
            Ok(Err(e)) => {
                warn!("Egress path {} probe failed: {}", path.label(), e);
                false
            }
            Err(_) => {
                warn!("Egress path {} probe timed out", path.label());
                false
            }
        }
    }
}

/// Guard for managing health monitor lifecycle
pub struct HealthMonitorHandle {
    shutdown_tx: watch::Sender<bool>,
}

impl HealthMonitorHandle {
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { shutdown_tx: tx }, rx)
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Default for HealthMonitorHandle {
    fn default() -> Self {
        Self::new().0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EgressConfig;
    use crate::proxy::transport::mock::ScriptedTransport;
    use crate::proxy::transport::TransportError;

    fn config() -> HealthConfig {
        HealthConfig {
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(10),
            probe_url: "https://probe.example/generate_204".to_string(),
        }
    }

    fn monitor_with(transports: Vec<ScriptedTransport>) -> (HealthMonitor, Vec<Arc<EgressPath>>) {
        let paths: Vec<_> = transports
            .into_iter()
            .enumerate()
            .map(|(i, t)| {
                Arc::new(EgressPath::proxy(
                    format!("http://10.0.0.{}:8080", i + 1),
                    Arc::new(t),
                ))
            })
            .collect();
        let pool = Arc::new(EgressPool::new(
            paths.clone(),
            None,
            &EgressConfig::default(),
        ));
        (HealthMonitor::new(pool, config()), paths)
    }

    #[tokio::test]
    async fn test_check_all_updates_each_path() {
        let (monitor, paths) = monitor_with(vec![
            ScriptedTransport::new().respond(204, ""),
            ScriptedTransport::new().respond(407, "auth required"),
            ScriptedTransport::new().fail(TransportError::Connect("refused".into())),
        ]);

        monitor.check_all().await;

        assert!(paths[0].is_healthy());
        assert!(!paths[1].is_healthy());
        assert!(!paths[2].is_healthy());
        assert!(paths.iter().all(|p| p.health().last_checked.is_some()));
    }

    #[tokio::test]
    async fn test_single_failure_then_success_recovers() {
        let (monitor, paths) = monitor_with(vec![ScriptedTransport::new()
            .fail(TransportError::Timeout)
            .always(200, "")]);

        monitor.check_all().await;
        assert!(!paths[0].is_healthy());

        monitor.check_all().await;
        assert!(paths[0].is_healthy());
        monitor.check_all().await;
        assert!(paths[0].is_healthy());
    }

    #[tokio::test]
    async fn test_probe_uses_configured_url() {
        let transport = Arc::new(ScriptedTransport::new().respond(204, ""));
        let path = Arc::new(EgressPath::proxy("http://10.0.0.1:8080", transport.clone()));
        let pool = Arc::new(EgressPool::new(vec![path], None, &EgressConfig::default()));

        HealthMonitor::new(pool, config()).check_all().await;

        let sent = transport.requests();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].url, "https://probe.example/generate_204");
        assert_eq!(sent[0].timeout, Duration::from_secs(10));
        assert!(sent[0].headers.contains_key(USER_AGENT));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_ticks_until_shutdown() {
        let transport = Arc::new(ScriptedTransport::new().always(204, ""));
        let path = Arc::new(EgressPath::proxy("http://10.0.0.1:8080", transport.clone()));
        let pool = Arc::new(EgressPool::new(vec![path], None, &EgressConfig::default()));
        let monitor = HealthMonitor::new(pool, config());

        let (handle, shutdown_rx) = HealthMonitorHandle::new();
        let task = tokio::spawn(async move { monitor.run(shutdown_rx).await });

        // First tick fires immediately, then every 30s.
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(transport.request_count(), 3);

        handle.shutdown();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_survives_probe_errors() {
        let transport = Arc::new(
            ScriptedTransport::new().always_fail(TransportError::Connect("refused".into())),
        );
        let path = Arc::new(EgressPath::proxy("http://10.0.0.1:8080", transport.clone()));
        let pool = Arc::new(EgressPool::new(
            vec![path.clone()],
            None,
            &EgressConfig::default(),
        ));
        let monitor = HealthMonitor::new(pool, config());

        let (handle, shutdown_rx) = HealthMonitorHandle::new();
        let task = tokio::spawn(async move { monitor.run(shutdown_rx).await });

        tokio::time::sleep(Duration::from_secs(91)).await;
        assert_eq!(transport.request_count(), 4);
        assert!(!path.is_healthy());
        assert!(!task.is_finished());

        handle.shutdown();
        task.await.unwrap();
    }
}
