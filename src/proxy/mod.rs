//! Egress and fetch pipeline
//!
//! This module provides:
//! - The egress pool with sticky session bindings
//! - In-flight accounting with scoped release
//! - Health monitoring of configured proxies
//! - The retrying fetcher and its upstream transport

pub mod fetcher;
pub mod guard;
pub mod health;
pub mod pool;
pub mod sticky;
pub mod stream;
pub mod transport;

pub use fetcher::{FetchBody, FetchOutcome, FetchRequest, Fetcher};
pub use guard::InFlightGuard;
pub use health::{HealthMonitor, HealthMonitorHandle};
pub use pool::EgressPool;
pub use stream::GuardedStream;
pub use transport::{ReqwestTransport, Transport, TransportError};
