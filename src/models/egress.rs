use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use url::Url;

use crate::proxy::transport::Transport;

/// Identifier used for the implicit direct path
pub const DIRECT_ID: &str = "direct";

/// Egress path kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EgressKind {
    Proxy,
    Direct,
}

impl EgressKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EgressKind::Proxy => "proxy",
            EgressKind::Direct => "direct",
        }
    }
}

impl fmt::Display for EgressKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Health flag plus the time it was last set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthState {
    pub healthy: bool,
    pub last_checked: Option<DateTime<Utc>>,
}

impl Default for HealthState {
    fn default() -> Self {
        Self {
            healthy: true,
            last_checked: None,
        }
    }
}

/// An outbound route: a configured proxy or the direct connection
pub struct EgressPath {
    id: String,
    label: String,
    kind: EgressKind,
    transport: Arc<dyn Transport>,
    health: RwLock<HealthState>,
    in_flight: AtomicUsize,
}

impl EgressPath {
    /// Create a path for a configured proxy address
    pub fn proxy(address: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        let id = address.into();
        let label = redact_proxy_url(&id);
        Self::build(id, label, EgressKind::Proxy, transport)
    }

    /// Create the direct path
    pub fn direct(transport: Arc<dyn Transport>) -> Self {
        Self::build(
            DIRECT_ID.to_string(),
            DIRECT_ID.to_string(),
            EgressKind::Direct,
            transport,
        )
    }

    fn build(id: String, label: String, kind: EgressKind, transport: Arc<dyn Transport>) -> Self {
        Self {
            id,
            label,
            kind,
            transport,
            health: RwLock::new(HealthState::default()),
            in_flight: AtomicUsize::new(0),
        }
    }

    /// Configured address (may contain credentials, never log it)
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Credential-free identifier, safe for logs and status output
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn kind(&self) -> EgressKind {
        self.kind
    }

    pub fn is_direct(&self) -> bool {
        self.kind == EgressKind::Direct
    }

    /// Network client bound to this path
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn is_healthy(&self) -> bool {
        self.health.read().healthy
    }

    pub fn health(&self) -> HealthState {
        *self.health.read()
    }

    /// Set the health flag and stamp the check time, returning the previous flag
    pub(crate) fn set_health(&self, healthy: bool) -> bool {
        let mut state = self.health.write();
        let previous = state.healthy;
        state.healthy = healthy;
        state.last_checked = Some(Utc::now());
        previous
    }

    /// Current number of in-flight requests
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Increment the in-flight counter if it is below `max`
    pub(crate) fn try_enter(&self, max: usize) -> bool {
        self.in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < max).then_some(current + 1)
            })
            .is_ok()
    }

    /// Increment the in-flight counter unconditionally
    pub(crate) fn enter(&self) {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn leave(&self) {
        let _ = self
            .in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(current.saturating_sub(1))
            });
    }

    /// Snapshot for the status endpoint
    pub fn status(&self) -> EgressStatus {
        let health = self.health();
        EgressStatus {
            id: self.label.clone(),
            kind: self.kind,
            healthy: health.healthy,
            last_checked: health.last_checked,
            in_flight: self.in_flight(),
        }
    }
}

impl fmt::Debug for EgressPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EgressPath")
            .field("id", &self.label)
            .field("kind", &self.kind)
            .field("health", &self.health())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

/// Serializable view of one egress path
#[derive(Debug, Clone, Serialize)]
pub struct EgressStatus {
    pub id: String,
    pub kind: EgressKind,
    pub healthy: bool,
    pub last_checked: Option<DateTime<Utc>>,
    pub in_flight: usize,
}

/// Hide the password of a proxy URL
pub fn redact_proxy_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut url) if url.password().is_some() => {
            let _ = url.set_password(Some("***"));
            url.to_string().trim_end_matches('/').to_string()
        }
        Ok(url) => url.to_string().trim_end_matches('/').to_string(),
        Err(_) => "<invalid proxy url>".to_string(),
    }
}
