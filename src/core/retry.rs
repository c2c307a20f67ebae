/*!
 * Retry logic with linear, capped backoff
 *
 * The delay before retry `n` (counting from zero) is
 * `min(retry_interval * n, max_retry_interval)`, so the first retry follows
 * the failure immediately. With `retry_times = 3` and a one-second interval
 * a failing write is attempted four times, with delays of 0, 1 and 2 seconds.
 */

use std::future::Future;
use std::time::Duration;

use crate::backend::{StoreError, StoreResult};
use crate::error::EXIT_RETRIES_EXCEEDED;
use tracing::{error, warn};

/// How many retries a write gets after its first failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryLimit {
    Unlimited,
    Bounded(u32),
}

impl RetryLimit {
    /// Map the `retry_times` setting (`-1` for unlimited)
    pub fn from_retry_times(retry_times: i64) -> Option<Self> {
        match retry_times {
            -1 => Some(RetryLimit::Unlimited),
            n if n >= 0 => Some(RetryLimit::Bounded(u32::try_from(n).unwrap_or(u32::MAX))),
            _ => None,
        }
    }

    /// True if another retry is allowed after `retries` retries
    pub fn allows(&self, retries: u32) -> bool {
        match self {
            RetryLimit::Unlimited => true,
            RetryLimit::Bounded(max) => retries < *max,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retry_interval: Duration,
    pub max_retry_interval: Duration,
    pub limit: RetryLimit,
    pub exit_on_exceeded: bool,
}

impl RetryPolicy {
    /// Delay before retry number `retries` (zero-based)
    pub fn backoff_delay(&self, retries: u32) -> Duration {
        self.retry_interval
            .saturating_mul(retries)
            .min(self.max_retry_interval)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_secs(1),
            max_retry_interval: Duration::from_secs(10),
            limit: RetryLimit::Bounded(3),
            exit_on_exceeded: false,
        }
    }
}

/// Result of one (path, buffer) write under the retry policy
#[derive(Debug)]
pub enum WriteOutcome {
    Written { attempts: u32 },
    Discarded { attempts: u32, error: StoreError },
}

impl WriteOutcome {
    pub fn attempts(&self) -> u32 {
        match self {
            WriteOutcome::Written { attempts } | WriteOutcome::Discarded { attempts, .. } => {
                *attempts
            }
        }
    }

    pub fn is_written(&self) -> bool {
        matches!(self, WriteOutcome::Written { .. })
    }
}

/// Action taken when a write exhausts its retries and
/// `exit_if_retries_exceeded` is set
pub trait Escalation: Send + Sync {
    fn retries_exceeded(&self, path: &str, error: &StoreError);
}

/// Terminates the process with [`EXIT_RETRIES_EXCEEDED`]
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessExit;

impl Escalation for ProcessExit {
    fn retries_exceeded(&self, path: &str, error: &StoreError) {
        error!(path, error = %error, "Retries exceeded, exiting");
        std::process::exit(EXIT_RETRIES_EXCEEDED);
    }
}

/// Run `write` until it succeeds or the policy gives up
///
/// `write` is called once per attempt, so it can pick up fresh state (such
/// as the current store handle) each time. On exhaustion the buffer is
/// dropped and the error is logged with any diagnostics the store sent.
pub async fn execute<F, Fut>(
    path: &str,
    policy: &RetryPolicy,
    escalation: &dyn Escalation,
    mut write: F,
) -> WriteOutcome
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StoreResult<()>>,
{
    let mut retries: u32 = 0;

    loop {
        let error = match write().await {
            Ok(()) => {
                return WriteOutcome::Written {
                    attempts: retries.saturating_add(1),
                }
            }
            Err(e) => e,
        };

        if policy.limit.allows(retries) {
            let delay = policy.backoff_delay(retries);
            warn!(
                path,
                attempt = retries.saturating_add(1),
                delay_secs = delay.as_secs_f64(),
                error = %error,
                "Failed to write, retrying"
            );
            tokio::time::sleep(delay).await;
            retries = retries.saturating_add(1);
            continue;
        }

        let attempts = retries.saturating_add(1);
        if error.has_remote_diagnostics() {
            error!(
                path = error.path().unwrap_or(path),
                attempts,
                status = error.status(),
                remote_exception = error.remote_exception(),
                remote_message = error.remote_message(),
                error = %error,
                "Max write retries exceeded, dropping batch"
            );
        } else {
            error!(path, attempts, error = %error, "Max write retries exceeded, dropping batch");
        }

        if policy.exit_on_exceeded {
            escalation.retries_exceeded(path, &error);
        }
        return WriteOutcome::Discarded { attempts, error };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::LogCapture;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    #[derive(Default)]
    struct Recording {
        calls: Mutex<Vec<String>>,
    }

    impl Escalation for Recording {
        fn retries_exceeded(&self, path: &str, _error: &StoreError) {
            self.calls.lock().unwrap().push(path.to_string());
        }
    }

    fn policy(limit: RetryLimit) -> RetryPolicy {
        RetryPolicy {
            limit,
            ..RetryPolicy::default()
        }
    }

    fn failure() -> StoreError {
        StoreError::Other {
            store: "test".into(),
            message: "boom".into(),
        }
    }

    #[test]
    fn test_backoff_is_linear_and_capped() {
        let p = RetryPolicy::default();
        assert_eq!(p.backoff_delay(0), Duration::ZERO);
        assert_eq!(p.backoff_delay(1), Duration::from_secs(1));
        assert_eq!(p.backoff_delay(2), Duration::from_secs(2));
        assert_eq!(p.backoff_delay(10), Duration::from_secs(10));
        assert_eq!(p.backoff_delay(500), Duration::from_secs(10));
        assert_eq!(p.backoff_delay(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn test_retry_limit_from_settings() {
        assert_eq!(RetryLimit::from_retry_times(-1), Some(RetryLimit::Unlimited));
        assert_eq!(RetryLimit::from_retry_times(0), Some(RetryLimit::Bounded(0)));
        assert_eq!(RetryLimit::from_retry_times(3), Some(RetryLimit::Bounded(3)));
        assert_eq!(RetryLimit::from_retry_times(-2), None);
        assert!(RetryLimit::Bounded(3).allows(2));
        assert!(!RetryLimit::Bounded(3).allows(3));
        assert!(RetryLimit::Unlimited.allows(u32::MAX));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_retries_use_increasing_delays() {
        let start = Instant::now();
        let times = Arc::new(Mutex::new(Vec::new()));
        let escalation = Recording::default();

        let outcome = execute("/a", &policy(RetryLimit::Bounded(3)), &escalation, || {
            let times = Arc::clone(&times);
            async move {
                times.lock().unwrap().push(start.elapsed());
                Err(failure())
            }
        })
        .await;

        assert!(matches!(outcome, WriteOutcome::Discarded { attempts: 4, .. }));
        let times = times.lock().unwrap().clone();
        assert_eq!(
            times,
            vec![
                Duration::ZERO,
                Duration::ZERO,
                Duration::from_secs(1),
                Duration::from_secs(3),
            ]
        );
        assert!(escalation.calls.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unlimited_retries_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let outcome = execute("/a", &policy(RetryLimit::Unlimited), &Recording::default(), || {
            let calls = Arc::clone(&calls);
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 25 {
                    Err(failure())
                } else {
                    Ok(())
                }
            }
        })
        .await;

        assert!(matches!(outcome, WriteOutcome::Written { attempts: 26 }));
        assert_eq!(calls.load(Ordering::SeqCst), 26);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_transient_failure() {
        let calls = Arc::new(AtomicU32::new(0));
        let outcome = execute("/a", &RetryPolicy::default(), &Recording::default(), || {
            let calls = Arc::clone(&calls);
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(failure())
                } else {
                    Ok(())
                }
            }
        })
        .await;

        assert!(outcome.is_written());
        assert_eq!(outcome.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retries_attempts_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let outcome = execute("/a", &policy(RetryLimit::Bounded(0)), &Recording::default(), || {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(failure())
            }
        })
        .await;

        assert_eq!(outcome.attempts(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_escalates_only_when_configured() {
        let escalation = Recording::default();
        let mut p = policy(RetryLimit::Bounded(1));

        execute("/quiet", &p, &escalation, || async { Err(failure()) }).await;
        assert!(escalation.calls.lock().unwrap().is_empty());

        p.exit_on_exceeded = true;
        let outcome = execute("/loud", &p, &escalation, || async { Err(failure()) }).await;
        assert_eq!(outcome.attempts(), 2);
        assert_eq!(*escalation.calls.lock().unwrap(), vec!["/loud".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_log_carries_remote_diagnostics() {
        let capture = LogCapture::default();
        let _guard = capture.install("orbit_adls=error");

        let remote = || StoreError::Remote {
            path: "/logs/remote.log".into(),
            status: Some(409),
            remote_exception: Some("ConcurrentWriteException".into()),
            remote_message: Some("concurrent append".into()),
            message: "append failed".into(),
        };
        let escalation = Recording::default();
        execute(
            "/logs/requested.log",
            &policy(RetryLimit::Bounded(1)),
            &escalation,
            || {
                let error = remote();
                async move { Err(error) }
            },
        )
        .await;
        execute(
            "/logs/plain.log",
            &policy(RetryLimit::Bounded(0)),
            &escalation,
            || async { Err(failure()) },
        )
        .await;

        let events = capture.events("Max write retries exceeded, dropping batch");
        assert_eq!(events.len(), 2);

        let remote = &events[0];
        assert_eq!(remote["level"], "ERROR");
        assert_eq!(remote["path"], "/logs/remote.log");
        assert_eq!(remote["attempts"], 2);
        assert_eq!(remote["status"], 409);
        assert_eq!(remote["remote_exception"], "ConcurrentWriteException");
        assert_eq!(remote["remote_message"], "concurrent append");

        let plain = &events[1];
        assert_eq!(plain["path"], "/logs/plain.log");
        assert_eq!(plain["attempts"], 1);
        assert!(plain.get("remote_message").is_none());
        assert!(plain.get("status").is_none());
    }
}
