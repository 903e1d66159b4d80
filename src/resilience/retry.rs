//! Bounded exponential backoff for chunk attempts
//!
//! Transient failures (worker error, chunk timeout, store hiccup) are tried
//! again up to `max_attempts` in total. Anything `StrataError::is_recoverable`
//! rejects (cycles, validation, cancellation) ends the loop at once.
//!
//! ```rust,ignore
//! let policy = RetryPolicy::new(RetryConfig::default().with_max_attempts(3));
//! let layout = policy
//!     .execute(|attempt| pool.pick(chunk_index, attempt).run(job.clone()))
//!     .await?;
//! ```

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::error::{Result, StrataError};

#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Attempts in total, first one included (at least 1)
    pub max_attempts: u32,
    /// Pause after the first failure
    pub base_delay: Duration,
    /// Upper bound for any pause
    pub max_delay: Duration,
    /// Growth per failed attempt
    pub factor: f64,
    /// +/- fraction of the pause drawn at random, in [0, 1]
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            factor: 2.0,
            jitter: 0.1,
        }
    }
}

impl RetryConfig {
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_factor(mut self, factor: f64) -> Self {
        self.factor = factor.max(1.0);
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Pause after failed attempt `attempt` (0-indexed), before jitter
    pub fn backoff(&self, attempt: u32) -> Duration {
        let scale = self.factor.powi(attempt.min(32) as i32);
        let millis = self.base_delay.as_millis() as f64 * scale;
        Duration::from_millis(millis.min(self.max_delay.as_millis() as f64) as u64)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// `backoff(attempt)` spread by the jitter fraction
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.config.backoff(attempt);
        if self.config.jitter <= 0.0 || base.is_zero() {
            return base;
        }
        let spread = 1.0 + rand::thread_rng().gen_range(-self.config.jitter..=self.config.jitter);
        base.mul_f64(spread)
    }

    /// Run `operation(attempt)` until it succeeds or attempts run out
    ///
    /// The attempt number lets the caller pick a different worker each time.
    /// Exhaustion yields `RetryExhausted` carrying the last failure.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: Fn(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            let error = match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_recoverable() => return Err(e),
                Err(e) => e,
            };

            attempt += 1;
            if attempt >= attempts {
                return Err(StrataError::RetryExhausted {
                    attempts,
                    last_error: error.to_string(),
                });
            }

            let pause = self.delay_for(attempt - 1);
            tracing::debug!(attempt, pause_ms = pause.as_millis() as u64, error = %error, "retrying");
            tokio::time::sleep(pause).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn worker_down(attempt: u32) -> StrataError {
        StrataError::ChunkFailure {
            job_id: "job".to_string(),
            chunk: 0,
            worker: format!("w{}", attempt),
            reason: "worker crashed".to_string(),
        }
    }

    fn quick(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(
            RetryConfig::default()
                .with_max_attempts(attempts)
                .with_base_delay(Duration::from_millis(1))
                .with_jitter(0.0),
        )
    }

    #[test]
    fn backoff_doubles_until_capped() {
        let config = RetryConfig::default().with_max_delay(Duration::from_millis(500));
        let pauses: Vec<u64> = (0..5).map(|a| config.backoff(a).as_millis() as u64).collect();
        assert_eq!(pauses, vec![100, 200, 400, 500, 500]);
        assert_eq!(config.backoff(u32::MAX), Duration::from_millis(500));
    }

    #[test]
    fn builder_clamps_nonsense() {
        let config = RetryConfig::default()
            .with_max_attempts(0)
            .with_factor(0.5)
            .with_jitter(3.0);
        assert_eq!(config.max_attempts, 1);
        assert_eq!(config.factor, 1.0);
        assert_eq!(config.jitter, 1.0);
    }

    #[test]
    fn jitter_stays_in_band() {
        let policy = RetryPolicy::new(RetryConfig::default().with_jitter(0.5));
        for _ in 0..100 {
            let pause = policy.delay_for(0);
            assert!(pause >= Duration::from_millis(50) && pause <= Duration::from_millis(150));
        }
    }

    #[tokio::test]
    async fn succeeds_on_a_later_attempt() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let result = quick(4)
            .execute(|attempt| {
                let seen = Arc::clone(&seen);
                async move {
                    seen.lock().push(attempt);
                    if attempt < 2 {
                        Err(worker_down(attempt))
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(*seen.lock(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn exhaustion_reports_last_failure() {
        let result: Result<()> = quick(3).execute(|a| async move { Err(worker_down(a)) }).await;
        let Err(StrataError::RetryExhausted { attempts, last_error }) = result else {
            panic!("expected RetryExhausted");
        };
        assert_eq!(attempts, 3);
        assert!(last_error.contains("w2"));
    }

    #[tokio::test]
    async fn deterministic_errors_are_not_retried() {
        let calls = Arc::new(Mutex::new(0));
        let result: Result<()> = quick(5)
            .execute(|_| {
                let calls = Arc::clone(&calls);
                async move {
                    *calls.lock() += 1;
                    Err(StrataError::CycleDetected {
                        source_id: "b".to_string(),
                        target_id: "a".to_string(),
                        cycle: "a -> b -> a".to_string(),
                    })
                }
            })
            .await;

        assert!(matches!(result, Err(StrataError::CycleDetected { .. })));
        assert_eq!(*calls.lock(), 1);
    }

    #[tokio::test]
    async fn timeouts_count_as_transient() {
        let result = quick(2)
            .execute(|attempt| async move {
                if attempt == 0 {
                    Err(StrataError::ChunkTimeout {
                        job_id: "j".into(),
                        chunk: 0,
                        timeout_ms: 10,
                    })
                } else {
                    Ok("done")
                }
            })
            .await;
        assert_eq!(result.unwrap(), "done");
    }
}
