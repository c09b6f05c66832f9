//! Fetcher
//!
//! Retrieves a target URL through the egress path resolved for its session
//! key. Each attempt uses one strategy from an [`AttemptPlan`]; network
//! failures and blocked statuses are retried on the same path with a fresh
//! identity, anything else is handed back to the caller as-is.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::header::{HeaderMap, HeaderValue, CONTENT_TYPE, RANGE};
use http::StatusCode;
use rand::Rng;
use tokio::time::sleep;
use tracing::{debug, instrument, warn};

use super::pool::EgressPool;
use super::stream::GuardedStream;
use super::transport::{TransportError, UpstreamRequest};
use crate::config::FetchConfig;
use crate::error::{RelayError, Result};
use crate::models::{FetchStrategy, StrategyMode};

/// How much of a blocked response body is kept for the client
const BLOCKED_BODY_LIMIT: usize = 64 * 1024;

/// Lower bound of the pre-request jitter
const MIN_REQUEST_JITTER: Duration = Duration::from_millis(50);

/// Origin statuses that mean "this identity was rejected"
pub fn is_blocked(status: StatusCode) -> bool {
    matches!(status.as_u16(), 403 | 429 | 520..=524)
}

/// One planned attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attempt {
    /// Zero-based attempt number
    pub number: u32,
    /// Index into the strategy list
    pub strategy: usize,
}

/// Linear sequence of attempts over an immutable strategy list
///
/// `Rotate` yields `max_retries + 1` attempts with a random strategy each,
/// never repeating the previous one when there is a choice. `Sequential`
/// walks the list in order and always covers every strategy at least once.
#[derive(Debug, Clone)]
pub struct AttemptPlan {
    mode: StrategyMode,
    strategies: usize,
    total: u32,
    next: u32,
    previous: Option<usize>,
}

impl AttemptPlan {
    pub fn new(mode: StrategyMode, strategies: usize, max_retries: u32) -> Self {
        let strategies = strategies.max(1);
        let total = match mode {
            StrategyMode::Rotate => max_retries + 1,
            StrategyMode::Sequential => (max_retries + 1).max(strategies as u32),
        };
        Self {
            mode,
            strategies,
            total,
            next: 0,
            previous: None,
        }
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    fn pick(&mut self) -> usize {
        match self.mode {
            StrategyMode::Sequential => self.next as usize % self.strategies,
            StrategyMode::Rotate => {
                let mut rng = rand::thread_rng();
                match self.previous {
                    Some(prev) if self.strategies > 1 => {
                        let offset = rng.gen_range(1..self.strategies);
                        (prev + offset) % self.strategies
                    }
                    _ => rng.gen_range(0..self.strategies),
                }
            }
        }
    }
}

impl Iterator for AttemptPlan {
    type Item = Attempt;

    fn next(&mut self) -> Option<Attempt> {
        if self.next >= self.total {
            return None;
        }
        let strategy = self.pick();
        let attempt = Attempt {
            number: self.next,
            strategy,
        };
        self.next += 1;
        self.previous = Some(strategy);
        Some(attempt)
    }
}

/// What to fetch and how
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub session_key: String,
    /// Referer that overrides the strategy's own
    pub referer: Option<String>,
    /// Client `Range` header, forwarded as-is
    pub range: Option<HeaderValue>,
    /// Hand the body back as a stream instead of buffering it
    pub streaming: bool,
    /// Sleep a short random delay before the first attempt
    pub jitter: bool,
}

impl FetchRequest {
    /// Buffered fetch keyed by the URL itself
    pub fn buffered(url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            session_key: url.clone(),
            url,
            referer: None,
            range: None,
            streaming: false,
            jitter: false,
        }
    }

    /// Streaming fetch keyed by the URL itself
    pub fn streaming(url: impl Into<String>) -> Self {
        Self {
            streaming: true,
            ..Self::buffered(url)
        }
    }

    pub fn with_session_key(mut self, key: impl Into<String>) -> Self {
        self.session_key = key.into();
        self
    }

    pub fn with_referer(mut self, referer: Option<String>) -> Self {
        self.referer = referer;
        self
    }

    pub fn with_range(mut self, range: Option<HeaderValue>) -> Self {
        self.range = range;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }
}

pub enum FetchBody {
    Buffered(Bytes),
    Streaming(GuardedStream),
}

/// A response the origin did not block
pub struct FetchOutcome {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: FetchBody,
    pub attempts: u32,
}

impl FetchOutcome {
    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }
}

enum Failure {
    Network(TransportError),
    Blocked(StatusCode, Bytes),
}

pub struct Fetcher {
    pool: Arc<EgressPool>,
    strategies: Vec<FetchStrategy>,
    config: FetchConfig,
}

impl Fetcher {
    pub fn new(pool: Arc<EgressPool>, strategies: Vec<FetchStrategy>, config: FetchConfig) -> Self {
        Self {
            pool,
            strategies,
            config,
        }
    }

    /// Fetcher with the built-in strategy list
    pub fn with_default_strategies(pool: Arc<EgressPool>, config: FetchConfig) -> Self {
        let strategies = FetchStrategy::default_set(config.default_referer.as_deref());
        Self::new(pool, strategies, config)
    }

    pub fn pool(&self) -> &Arc<EgressPool> {
        &self.pool
    }

    #[instrument(skip_all, fields(streaming = request.streaming))]
    pub async fn fetch(&self, request: FetchRequest) -> Result<FetchOutcome> {
        let path = self
            .pool
            .resolve(&request.session_key)
            .or_else(|| self.pool.direct())
            .ok_or_else(|| {
                RelayError::Configuration(
                    "no proxy configured and direct egress is disabled".to_string(),
                )
            })?;

        if request.jitter {
            if let Some(delay) = self.request_jitter() {
                sleep(delay).await;
            }
        }

        let guard = self.pool.acquire(&path).await;
        let plan = AttemptPlan::new(
            self.config.strategy_mode,
            self.strategies.len(),
            self.config.max_retries,
        );
        let total = plan.total();
        let mut last_failure = None;

        for attempt in plan {
            let Some(strategy) = self.strategies.get(attempt.strategy) else {
                break;
            };

            let mut headers = strategy.headers_for(&request.url, request.referer.as_deref());
            if let Some(range) = &request.range {
                headers.insert(RANGE, range.clone());
            }
            let upstream = UpstreamRequest {
                url: request.url.clone(),
                headers,
                timeout: self.config.timeout,
                streaming: request.streaming,
            };

            debug!(
                "Attempt {}/{} via {} with strategy {}",
                attempt.number + 1,
                total,
                path.label(),
                strategy.name
            );

            match path.transport().send(upstream).await {
                Err(e) => {
                    warn!(
                        "Attempt {}/{} via {} failed: {}",
                        attempt.number + 1,
                        total,
                        path.label(),
                        e
                    );
                    last_failure = Some(Failure::Network(e));
                }
                Ok(response) if is_blocked(response.status) => {
                    let status = response.status;
                    warn!(
                        "Attempt {}/{} via {} blocked with {} (strategy {})",
                        attempt.number + 1,
                        total,
                        path.label(),
                        status,
                        strategy.name
                    );
                    let body = response.bytes_limited(BLOCKED_BODY_LIMIT).await;
                    last_failure = Some(Failure::Blocked(status, body));
                }
                Ok(response) => {
                    let status = response.status;
                    let headers = response.headers.clone();

                    let body = if request.streaming {
                        FetchBody::Streaming(GuardedStream::new(response.body, guard))
                    } else {
                        match response.bytes().await {
                            Ok(bytes) => FetchBody::Buffered(bytes),
                            Err(e) => {
                                warn!("Body read via {} failed: {}", path.label(), e);
                                last_failure = Some(Failure::Network(e));
                                self.backoff(attempt.number, total).await;
                                continue;
                            }
                        }
                    };

                    if status.is_success() {
                        self.pool.mark_healthy(&path);
                    }

                    return Ok(FetchOutcome {
                        status,
                        headers,
                        body,
                        attempts: attempt.number + 1,
                    });
                }
            }

            self.backoff(attempt.number, total).await;
        }

        self.pool.mark_unhealthy(&path);

        Err(match last_failure {
            Some(Failure::Blocked(status, body)) => RelayError::UpstreamBlocked { status, body },
            Some(Failure::Network(e)) => RelayError::TransientNetwork {
                attempts: total,
                message: e.to_string(),
            },
            None => RelayError::Internal("no fetch strategy configured".to_string()),
        })
    }

    async fn backoff(&self, attempt: u32, total: u32) {
        if attempt + 1 < total {
            sleep(self.retry_delay()).await;
        }
    }

    fn retry_delay(&self) -> Duration {
        let base = self.config.retry_backoff.as_millis() as u64;
        if base == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(base + rand::thread_rng().gen_range(0..=base))
    }

    fn request_jitter(&self) -> Option<Duration> {
        let max = self.config.request_jitter;
        if max.is_zero() {
            return None;
        }
        if max <= MIN_REQUEST_JITTER {
            return Some(max);
        }
        let ms = rand::thread_rng()
            .gen_range(MIN_REQUEST_JITTER.as_millis() as u64..=max.as_millis() as u64);
        Some(Duration::from_millis(ms))
    }
}
