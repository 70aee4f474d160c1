//! Health Gate
//!
//! Converts "recently started" into "verified ready" by polling a liveness
//! check on a fixed interval until it succeeds, a deadline elapses, or the
//! caller cancels.
//!
//! The poll loop never outlives the call: every await inside it races the
//! deadline and the cancellation token, so a check that hangs is abandoned
//! at the deadline instead of keeping a task alive.
//!
//! # Examples
//!
//! ```no_run
//! use foreman_engine::health::{GateOutcome, HealthGate};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() {
//! let gate = HealthGate::default();
//! let cancel = CancellationToken::new();
//! let outcome = gate
//!     .wait(&cancel, || async { Ok::<(), sdk::EngineError>(()) })
//!     .await;
//! assert_eq!(outcome, GateOutcome::Ready);
//! # }
//! ```

use sdk::errors::EngineError;
use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Interval between two checks
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Deadline for the whole wait
pub const DEFAULT_HEALTH_TIMEOUT: Duration = Duration::from_secs(60);

/// How a gated wait ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    /// The check succeeded before the deadline
    Ready,
    /// The deadline elapsed first
    TimedOut,
    /// The caller cancelled the wait
    Cancelled,
}

impl GateOutcome {
    /// Convert the outcome into the engine's error taxonomy
    ///
    /// `TimedOut` becomes `HealthTimeout` for `target`, `Cancelled` becomes `Cancelled`.
    pub fn into_result(self, target: &str, timeout: Duration) -> Result<(), EngineError> {
        match self {
            GateOutcome::Ready => Ok(()),
            GateOutcome::TimedOut => Err(EngineError::HealthTimeout {
                target: target.to_string(),
                timeout_secs: timeout.as_secs(),
            }),
            GateOutcome::Cancelled => Err(EngineError::Cancelled),
        }
    }
}

/// Bounded polling of a liveness check
#[derive(Debug, Clone, Copy)]
pub struct HealthGate {
    interval: Duration,
    timeout: Duration,
}

impl HealthGate {
    /// Create a gate with a custom poll interval and deadline
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            // tokio intervals panic on a zero period
            interval: interval.max(Duration::from_millis(1)),
            timeout,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Poll `check` until it returns `Ok`, the deadline elapses, or `cancel` fires
    ///
    /// The first check runs immediately, then once per interval. A check error
    /// means "not ready yet" and is only logged. A check still in flight when
    /// the deadline elapses is dropped.
    pub async fn wait<F, Fut>(&self, cancel: &CancellationToken, mut check: F) -> GateOutcome
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), EngineError>>,
    {
        let deadline = Instant::now() + self.timeout;
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut attempts: u32 = 0;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return GateOutcome::Cancelled,
                _ = tokio::time::sleep_until(deadline) => return GateOutcome::TimedOut,
                _ = ticker.tick() => {}
            }

            attempts += 1;
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return GateOutcome::Cancelled,
                _ = tokio::time::sleep_until(deadline) => return GateOutcome::TimedOut,
                result = check() => result,
            };

            match result {
                Ok(()) => {
                    tracing::debug!("Health check succeeded after {} attempt(s)", attempts);
                    return GateOutcome::Ready;
                }
                Err(e) => tracing::debug!("Health check attempt {} not ready: {}", attempts, e),
            }
        }
    }
}

impl Default for HealthGate {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL, DEFAULT_HEALTH_TIMEOUT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_ready_on_first_check() {
        let gate = HealthGate::default();
        let cancel = CancellationToken::new();
        let start = Instant::now();

        let outcome = gate.wait(&cancel, || async { Ok(()) }).await;

        assert_eq!(outcome, GateOutcome::Ready);
        assert!(start.elapsed() < DEFAULT_POLL_INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_after_retries() {
        let gate = HealthGate::default();
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&calls);
        let outcome = gate
            .wait(&cancel, move || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 3 {
                        Err(EngineError::Transport("connection refused".to_string()))
                    } else {
                        Ok(())
                    }
                }
            })
            .await;

        assert_eq!(outcome, GateOutcome::Ready);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_at_deadline() {
        let gate = HealthGate::new(Duration::from_secs(2), Duration::from_secs(60));
        let cancel = CancellationToken::new();
        let start = Instant::now();

        let outcome = gate
            .wait(&cancel, || async {
                Err(EngineError::Transport("unhealthy".to_string()))
            })
            .await;

        assert_eq!(outcome, GateOutcome::TimedOut);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(60));
        assert!(elapsed < Duration::from_secs(63));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_check_is_abandoned_at_deadline() {
        let gate = HealthGate::new(Duration::from_secs(2), Duration::from_secs(10));
        let cancel = CancellationToken::new();

        let outcome = gate
            .wait(&cancel, || async {
                futures::future::pending::<()>().await;
                Ok(())
            })
            .await;

        assert_eq!(outcome, GateOutcome::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_wait() {
        let gate = HealthGate::default();
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            trigger.cancel();
        });

        let outcome = gate
            .wait(&cancel, || async {
                Err(EngineError::Transport("not yet".to_string()))
            })
            .await;

        assert_eq!(outcome, GateOutcome::Cancelled);
    }

    #[test]
    fn test_outcome_into_result() {
        let timeout = Duration::from_secs(60);
        assert!(GateOutcome::Ready.into_result("p", timeout).is_ok());
        assert!(matches!(
            GateOutcome::TimedOut.into_result("p", timeout),
            Err(EngineError::HealthTimeout { timeout_secs: 60, .. })
        ));
        assert!(matches!(
            GateOutcome::Cancelled.into_result("p", timeout),
            Err(EngineError::Cancelled)
        ));
    }
}
