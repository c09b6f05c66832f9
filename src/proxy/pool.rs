//! Egress pool
//!
//! Owns the configured egress paths, their health flags and in-flight
//! counters, and the sticky session table. One instance is shared by every
//! request handler and by the health monitor.

use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{debug, info, warn};

use super::guard::InFlightGuard;
use super::sticky::StickyTable;
use super::transport::ReqwestTransport;
use crate::config::{EgressConfig, FetchConfig};
use crate::error::Result;
use crate::models::{EgressPath, EgressStatus};

pub struct EgressPool {
    paths: Vec<Arc<EgressPath>>,
    direct: Option<Arc<EgressPath>>,
    sticky: StickyTable,
    max_parallel: usize,
    guard_backoff: Duration,
}

impl EgressPool {
    pub fn new(
        paths: Vec<Arc<EgressPath>>,
        direct: Option<Arc<EgressPath>>,
        config: &EgressConfig,
    ) -> Self {
        Self {
            paths,
            direct,
            sticky: StickyTable::new(config.sticky_ttl),
            max_parallel: config.max_parallel_per_path.max(1),
            guard_backoff: config.guard_backoff,
        }
    }

    /// Build one reqwest-backed path per configured proxy, plus the direct
    /// path when it is allowed
    pub fn from_config(egress: &EgressConfig, fetch: &FetchConfig) -> Result<Self> {
        let paths = egress
            .proxies
            .iter()
            .map(|address| {
                let transport = ReqwestTransport::with_proxy(address, fetch)?;
                Ok(Arc::new(EgressPath::proxy(address.as_str(), Arc::new(transport))))
            })
            .collect::<Result<Vec<_>>>()?;

        let direct = if egress.allow_direct {
            Some(Arc::new(EgressPath::direct(Arc::new(
                ReqwestTransport::direct(fetch)?,
            ))))
        } else {
            None
        };

        Ok(Self::new(paths, direct, egress))
    }

    /// Pick the egress path for `session_key`
    ///
    /// A live binding to a healthy path wins. Otherwise a healthy path is
    /// chosen at random (any path if none is healthy) and bound to the key.
    /// Returns `None` only when no proxy is configured.
    pub fn resolve(&self, session_key: &str) -> Option<Arc<EgressPath>> {
        if self.paths.is_empty() {
            return None;
        }

        if let Some(index) = self.sticky.get(session_key) {
            if let Some(path) = self.paths.get(index).filter(|p| p.is_healthy()) {
                return Some(path.clone());
            }
        }

        let healthy: Vec<usize> = (0..self.paths.len())
            .filter(|&i| self.paths[i].is_healthy())
            .collect();

        let mut rng = rand::thread_rng();
        let index = if healthy.is_empty() {
            debug!("No healthy egress path, choosing from the full set");
            rng.gen_range(0..self.paths.len())
        } else {
            *healthy.choose(&mut rng)?
        };

        self.sticky.bind(session_key, index);
        Some(self.paths[index].clone())
    }

    /// Fallback path used when no proxy is configured
    pub fn direct(&self) -> Option<Arc<EgressPath>> {
        self.direct.clone()
    }

    /// True when requests go out without any proxy
    pub fn is_direct_mode(&self) -> bool {
        self.paths.is_empty()
    }

    /// Configured proxy paths
    pub fn paths(&self) -> &[Arc<EgressPath>] {
        &self.paths
    }

    pub fn mark_unhealthy(&self, path: &EgressPath) {
        if path.set_health(false) {
            warn!("Egress path {} marked unhealthy", path.label());
        }
    }

    pub fn mark_healthy(&self, path: &EgressPath) {
        if !path.set_health(true) {
            info!("Egress path {} recovered", path.label());
        }
    }

    /// Take an in-flight slot without waiting
    pub fn try_acquire(&self, path: &Arc<EgressPath>) -> Option<InFlightGuard> {
        path.try_enter(self.max_parallel)
            .then(|| InFlightGuard::adopt(path.clone()))
    }

    /// Release a slot taken by [`EgressPool::try_acquire`] or
    /// [`EgressPool::acquire`]; equivalent to dropping the guard
    pub fn release(&self, guard: InFlightGuard) {
        drop(guard);
    }

    /// Take an in-flight slot, sleeping briefly first when the path is
    /// saturated. Never refuses.
    pub async fn acquire(&self, path: &Arc<EgressPath>) -> InFlightGuard {
        if let Some(guard) = self.try_acquire(path) {
            return guard;
        }

        let delay = self.guard_delay();
        debug!(
            "Egress path {} at {} in-flight requests, backing off {}ms",
            path.label(),
            path.in_flight(),
            delay.as_millis()
        );
        tokio::time::sleep(delay).await;

        self.try_acquire(path)
            .unwrap_or_else(|| InFlightGuard::new(path.clone()))
    }

    fn guard_delay(&self) -> Duration {
        let base = self.guard_backoff.as_millis() as u64;
        let jitter = if base == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=base)
        };
        Duration::from_millis(base + jitter)
    }

    /// Drop expired sticky bindings
    pub fn purge_expired(&self) -> usize {
        self.sticky.purge_expired()
    }

    /// Status of every path, direct included
    pub fn snapshot(&self) -> Vec<EgressStatus> {
        self.paths
            .iter()
            .chain(self.direct.iter())
            .map(|p| p.status())
            .collect()
    }

    pub fn healthy_count(&self) -> usize {
        self.paths.iter().filter(|p| p.is_healthy()).count()
    }
}
