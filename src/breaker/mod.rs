//! Per-dependency circuit breaker with rolling failure statistics.
//!
//! Each remote dependency gets one breaker, created lazily by the
//! [`BreakerRegistry`] and kept for the life of the process. The breaker
//! cycles CLOSED -> OPEN -> HALF_OPEN -> CLOSED driven purely by the rolling
//! window and elapsed time; business logic never touches its state.

pub mod fallback;
pub mod window;

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use window::{Outcome, RollingWindow};

/// Dependency name for the account service; the only remote dependency the
/// orchestrator talks to today.
pub const ACCOUNTS_DEPENDENCY: &str = "accounts-service";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "CLOSED",
            BreakerState::Open => "OPEN",
            BreakerState::HalfOpen => "HALF_OPEN",
        }
    }
}

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Per-call deadline; a call exceeding it is recorded as a timeout.
    pub call_timeout: Duration,
    /// Number of time slices in the rolling window.
    pub window_buckets: usize,
    /// Width of each time slice.
    pub bucket_width: Duration,
    /// Failure-or-timeout ratio over the window that trips the breaker.
    pub failure_ratio: f64,
    /// Minimum call volume in the window before the ratio is consulted.
    pub min_volume: u64,
    /// Time spent OPEN before the next call is admitted as a probe.
    pub reset_timeout: Duration,
    /// Concurrent probes admitted while HALF_OPEN.
    pub half_open_probes: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(5),
            window_buckets: 10,
            bucket_width: Duration::from_secs(1),
            failure_ratio: 0.5,
            min_volume: 5,
            reset_timeout: Duration::from_secs(30),
            half_open_probes: 1,
        }
    }
}

/// Error surface of a breaker-wrapped call. Callers map `Rejected` to the
/// dependency's fallback policy; `Timeout` and `Inner` are real failures.
#[derive(Error, Debug)]
pub enum BreakerError<E> {
    #[error("circuit breaker rejected the call")]
    Rejected,
    #[error("call timed out")]
    Timeout,
    #[error("operation failed: {0}")]
    Inner(E),
}

/// Point-in-time view of a breaker. Counters are cumulative for the process
/// lifetime; `pending` is a live gauge of in-flight calls.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerStats {
    pub state: BreakerState,
    pub successes: u64,
    pub failures: u64,
    pub timeouts: u64,
    pub pending: u64,
    pub last_state_change: DateTime<Utc>,
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    window: RollingWindow,
    opened_at: Option<Instant>,
    probes_in_flight: u32,
    last_state_change: DateTime<Utc>,
}

enum Admission {
    Allowed { probe: bool },
    Rejected,
}

pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<Inner>,
    pending: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    timeouts: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        let window = RollingWindow::new(config.window_buckets, config.bucket_width);
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                window,
                opened_at: None,
                probes_in_flight: 0,
                last_state_change: Utc::now(),
            }),
            pending: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
        }
    }

    /// Runs `operation` under the breaker's admission control and per-call
    /// deadline, recording the outcome into the rolling window.
    ///
    /// The admission is held by a drop guard: when the returned future is
    /// dropped mid-flight (a disconnecting client cancels the handler), the
    /// pending gauge and any probe slot are still released.
    pub async fn call<T, E, Fut>(&self, operation: Fut) -> Result<T, BreakerError<E>>
    where
        Fut: Future<Output = Result<T, E>>,
    {
        let probe = match self.admit(Instant::now()) {
            Admission::Allowed { probe } => probe,
            Admission::Rejected => return Err(BreakerError::Rejected),
        };

        let admission = AdmissionGuard::new(self, probe);
        let result = tokio::time::timeout(self.config.call_timeout, operation).await;

        match result {
            Ok(Ok(value)) => {
                self.successes.fetch_add(1, Ordering::Relaxed);
                admission.settle(Outcome::Success);
                Ok(value)
            }
            Ok(Err(e)) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                admission.settle(Outcome::Failure);
                Err(BreakerError::Inner(e))
            }
            Err(_elapsed) => {
                self.timeouts.fetch_add(1, Ordering::Relaxed);
                admission.settle(Outcome::Timeout);
                Err(BreakerError::Timeout)
            }
        }
    }

    /// Lock-light read; never blocks in-flight calls beyond the state mutex.
    pub fn stats(&self) -> BreakerStats {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        BreakerStats {
            state: inner.state,
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            pending: self.pending.load(Ordering::Relaxed),
            last_state_change: inner.last_state_change,
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .state
    }

    fn admit(&self, now: Instant) -> Admission {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match inner.state {
            BreakerState::Closed => Admission::Allowed { probe: false },
            BreakerState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|at| now.saturating_duration_since(at))
                    .unwrap_or_default();
                if elapsed >= self.config.reset_timeout {
                    self.transition(&mut inner, BreakerState::HalfOpen);
                    inner.probes_in_flight = 1;
                    Admission::Allowed { probe: true }
                } else {
                    Admission::Rejected
                }
            }
            BreakerState::HalfOpen => {
                if inner.probes_in_flight < self.config.half_open_probes {
                    inner.probes_in_flight += 1;
                    Admission::Allowed { probe: true }
                } else {
                    Admission::Rejected
                }
            }
        }
    }

    fn settle(&self, outcome: Outcome, probe: bool) {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.window.record(outcome, now);
        if probe {
            inner.probes_in_flight = inner.probes_in_flight.saturating_sub(1);
        }

        match (inner.state, outcome) {
            (BreakerState::HalfOpen, Outcome::Success) if probe => {
                self.transition(&mut inner, BreakerState::Closed);
                inner.opened_at = None;
                inner.window.reset();
            }
            (BreakerState::HalfOpen, Outcome::Failure | Outcome::Timeout) if probe => {
                self.transition(&mut inner, BreakerState::Open);
                inner.opened_at = Some(now);
            }
            (BreakerState::Closed, Outcome::Failure | Outcome::Timeout) => {
                let snap = inner.window.snapshot(now);
                if snap.total() >= self.config.min_volume
                    && snap.failure_ratio() >= self.config.failure_ratio
                {
                    self.transition(&mut inner, BreakerState::Open);
                    inner.opened_at = Some(now);
                }
            }
            // Stragglers admitted before a transition just record.
            _ => {}
        }
    }

    fn transition(&self, inner: &mut Inner, to: BreakerState) {
        let from = inner.state;
        inner.state = to;
        inner.last_state_change = Utc::now();
        match to {
            BreakerState::Open => tracing::warn!(
                breaker = %self.name,
                from = from.as_str(),
                "circuit breaker opened"
            ),
            BreakerState::HalfOpen => tracing::info!(
                breaker = %self.name,
                "circuit breaker half-open, probing"
            ),
            BreakerState::Closed => tracing::info!(
                breaker = %self.name,
                "circuit breaker closed"
            ),
        }
    }
}

/// An admitted in-flight call. Settling records the outcome; dropping
/// without settling means the call future was cancelled, and only the
/// pending gauge and any probe slot are given back. No outcome is recorded
/// for a cancelled call.
struct AdmissionGuard<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    settled: bool,
}

impl<'a> AdmissionGuard<'a> {
    fn new(breaker: &'a CircuitBreaker, probe: bool) -> Self {
        breaker.pending.fetch_add(1, Ordering::Relaxed);
        Self {
            breaker,
            probe,
            settled: false,
        }
    }

    fn settle(mut self, outcome: Outcome) {
        self.settled = true;
        self.breaker.pending.fetch_sub(1, Ordering::Relaxed);
        self.breaker.settle(outcome, self.probe);
    }
}

impl Drop for AdmissionGuard<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        self.breaker.pending.fetch_sub(1, Ordering::Relaxed);
        if self.probe {
            let mut inner = self
                .breaker
                .inner
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            inner.probes_in_flight = inner.probes_in_flight.saturating_sub(1);
            tracing::debug!(
                breaker = %self.breaker.name,
                "probe abandoned before settling, slot released"
            );
        }
    }
}

/// Concurrent map of dependency name -> breaker, with lazy double-checked
/// creation so two first callers never race two breakers into existence.
pub struct BreakerRegistry {
    config: BreakerConfig,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        {
            let map = self.breakers.read().unwrap_or_else(|e| e.into_inner());
            if let Some(breaker) = map.get(name) {
                return Arc::clone(breaker);
            }
        }

        let mut map = self.breakers.write().unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            map.entry(name.to_string())
                .or_insert_with(|| Arc::new(CircuitBreaker::new(name, self.config.clone()))),
        )
    }

    /// Pure read; `None` when the dependency has never been called.
    pub fn stats(&self, name: &str) -> Option<BreakerStats> {
        let map = self.breakers.read().unwrap_or_else(|e| e.into_inner());
        map.get(name).map(|b| b.stats())
    }

    pub fn all_stats(&self) -> BTreeMap<String, BreakerStats> {
        let map = self.breakers.read().unwrap_or_else(|e| e.into_inner());
        map.iter()
            .map(|(name, breaker)| (name.clone(), breaker.stats()))
            .collect()
    }

    /// Runs `operation` under the named dependency's breaker.
    pub async fn call<T, E, Fut>(&self, name: &str, operation: Fut) -> Result<T, BreakerError<E>>
    where
        Fut: Future<Output = Result<T, E>>,
    {
        self.get_or_create(name).call(operation).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> BreakerConfig {
        BreakerConfig {
            call_timeout: Duration::from_millis(100),
            window_buckets: 10,
            bucket_width: Duration::from_millis(100),
            failure_ratio: 0.5,
            min_volume: 3,
            reset_timeout: Duration::from_millis(200),
            half_open_probes: 1,
        }
    }

    async fn fail(breaker: &CircuitBreaker) {
        let _ = breaker
            .call(async { Err::<(), _>("boom".to_string()) })
            .await;
    }

    async fn succeed(breaker: &CircuitBreaker) {
        let _ = breaker.call(async { Ok::<_, String>(()) }).await;
    }

    #[tokio::test]
    async fn passes_through_while_closed() {
        let breaker = CircuitBreaker::new("dep", fast_config());
        let result = breaker.call(async { Ok::<_, String>(42) }).await;
        assert!(matches!(result, Ok(42)));
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn opens_once_failure_ratio_exceeds_threshold() {
        let breaker = CircuitBreaker::new("dep", fast_config());
        for _ in 0..3 {
            fail(&breaker).await;
        }
        assert_eq!(breaker.state(), BreakerState::Open);

        let stats = breaker.stats();
        assert_eq!(stats.state, BreakerState::Open);
        assert_eq!(stats.failures, 3);
    }

    #[tokio::test]
    async fn stays_closed_below_min_volume() {
        let breaker = CircuitBreaker::new("dep", fast_config());
        fail(&breaker).await;
        fail(&breaker).await;
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn stays_closed_when_ratio_is_low() {
        let breaker = CircuitBreaker::new("dep", fast_config());
        for _ in 0..8 {
            succeed(&breaker).await;
        }
        fail(&breaker).await;
        fail(&breaker).await;
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn rejects_immediately_while_open() {
        let breaker = CircuitBreaker::new("dep", fast_config());
        for _ in 0..3 {
            fail(&breaker).await;
        }

        let result = breaker.call(async { Ok::<_, String>(1) }).await;
        assert!(matches!(result, Err(BreakerError::Rejected)));
        // The rejected call never ran, so it is not in the counters.
        assert_eq!(breaker.stats().successes, 0);
    }

    #[tokio::test]
    async fn probes_after_reset_timeout_and_closes_on_success() {
        let breaker = CircuitBreaker::new("dep", fast_config());
        for _ in 0..3 {
            fail(&breaker).await;
        }
        assert_eq!(breaker.state(), BreakerState::Open);

        tokio::time::sleep(Duration::from_millis(250)).await;

        let result = breaker.call(async { Ok::<_, String>(7) }).await;
        assert!(matches!(result, Ok(7)));
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn probe_failure_reopens() {
        let breaker = CircuitBreaker::new("dep", fast_config());
        for _ in 0..3 {
            fail(&breaker).await;
        }

        tokio::time::sleep(Duration::from_millis(250)).await;
        fail(&breaker).await;
        assert_eq!(breaker.state(), BreakerState::Open);

        // Timer restarted: still rejected right away.
        let result = breaker.call(async { Ok::<_, String>(1) }).await;
        assert!(matches!(result, Err(BreakerError::Rejected)));
    }

    #[tokio::test]
    async fn slow_call_is_recorded_as_timeout() {
        let breaker = CircuitBreaker::new("dep", fast_config());
        let result = breaker
            .call(async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                Ok::<_, String>(())
            })
            .await;
        assert!(matches!(result, Err(BreakerError::Timeout)));
        assert_eq!(breaker.stats().timeouts, 1);
    }

    #[tokio::test]
    async fn pending_gauge_settles_back_to_zero() {
        let breaker = Arc::new(CircuitBreaker::new("dep", fast_config()));
        let mut handles = Vec::new();
        for _ in 0..20 {
            let b = Arc::clone(&breaker);
            handles.push(tokio::spawn(async move {
                let _ = b.call(async { Ok::<_, String>(()) }).await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        let stats = breaker.stats();
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.successes, 20);
    }

    #[tokio::test]
    async fn cancelled_call_releases_the_pending_gauge() {
        let breaker = CircuitBreaker::new("dep", fast_config());
        let call = breaker.call(async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok::<_, String>(())
        });
        // Drop the call future mid-flight, as a disconnecting client would.
        let _ = tokio::time::timeout(Duration::from_millis(20), call).await;

        let stats = breaker.stats();
        assert_eq!(stats.pending, 0);
        // A cancelled call records no outcome.
        assert_eq!(stats.successes + stats.failures + stats.timeouts, 0);
    }

    #[tokio::test]
    async fn cancelled_probe_frees_the_slot_for_recovery() {
        let breaker = CircuitBreaker::new("dep", fast_config());
        for _ in 0..3 {
            fail(&breaker).await;
        }
        assert_eq!(breaker.state(), BreakerState::Open);

        tokio::time::sleep(Duration::from_millis(250)).await;

        let probe = breaker.call(async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok::<_, String>(())
        });
        let _ = tokio::time::timeout(Duration::from_millis(50), probe).await;
        assert_eq!(breaker.stats().pending, 0);

        // The abandoned probe must not wedge the breaker: the next call is
        // admitted as a fresh probe and closes it.
        let result = breaker.call(async { Ok::<_, String>(7) }).await;
        assert!(matches!(result, Ok(7)));
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn registry_creates_lazily_and_reuses() {
        let registry = BreakerRegistry::new(fast_config());
        assert!(registry.stats("accounts-service").is_none());

        let a = registry.get_or_create("accounts-service");
        let b = registry.get_or_create("accounts-service");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(registry.stats("accounts-service").is_some());
        assert!(registry.stats("ledger-service").is_none());
    }

    #[tokio::test]
    async fn registry_call_routes_through_the_named_breaker() {
        let registry = BreakerRegistry::new(fast_config());
        for _ in 0..3 {
            let _ = registry
                .call("dep", async { Err::<(), _>("boom".to_string()) })
                .await;
        }
        let stats = registry.stats("dep").unwrap();
        assert_eq!(stats.state, BreakerState::Open);

        let result = registry.call("dep", async { Ok::<_, String>(()) }).await;
        assert!(matches!(result, Err(BreakerError::Rejected)));
    }

    #[tokio::test]
    async fn window_expiry_lets_old_failures_age_out() {
        let mut config = fast_config();
        config.window_buckets = 3;
        config.bucket_width = Duration::from_millis(50);
        let breaker = CircuitBreaker::new("dep", config);

        fail(&breaker).await;
        fail(&breaker).await;
        // Let the failures roll out of the window entirely.
        tokio::time::sleep(Duration::from_millis(300)).await;
        fail(&breaker).await;
        // Only one failure is live, below min_volume.
        assert_eq!(breaker.state(), BreakerState::Closed);
    }
}
