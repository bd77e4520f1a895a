//! Retry utilities with bounded backoff
//!
//! Provides the backoff policy used by the fast-ack write pipeline and a small
//! retry executor for transient directory failures:
//! - Exponential or linear growth, capped at `max_delay`
//! - Optional jitter to spread retries
//! - Hard attempt limit
//! - Custom retry predicates

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// How the delay grows between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    /// initial * multiplier^n
    Exponential,
    /// initial * (n + 1)
    Linear,
}

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first one (minimum 1)
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Maximum delay between attempts (caps growth)
    pub max_delay: Duration,
    /// Growth curve
    pub kind: BackoffKind,
    /// Multiplier for exponential backoff (e.g., 2.0 = double each time)
    pub multiplier: f64,
    /// Jitter factor (0.0-1.0). Non-zero jitter gives up the
    /// non-decreasing delay guarantee.
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            kind: BackoffKind::Exponential,
            multiplier: 2.0,
            jitter: 0.0,
        }
    }
}

impl RetryConfig {
    /// Fast retries for in-process or local operations
    pub fn fast() -> Self {
        Self {
            max_attempts: 4,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(500),
            kind: BackoffKind::Exponential,
            multiplier: 2.0,
            jitter: 0.0,
        }
    }

    /// Short, jittered retries for tenant-directory queries on the request path
    pub fn directory() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(25),
            max_delay: Duration::from_millis(250),
            kind: BackoffKind::Exponential,
            multiplier: 2.0,
            jitter: 0.3,
        }
    }

    /// Fast-ack background writes: deterministic, non-decreasing delays
    pub fn background_write() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            kind: BackoffKind::Exponential,
            multiplier: 2.0,
            jitter: 0.0,
        }
    }

    /// Load a background-write policy from `WRITE_RETRY_*` variables
    pub fn from_env() -> Self {
        let defaults = Self::background_write();
        let max_attempts = std::env::var("WRITE_RETRY_MAX_ATTEMPTS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.max_attempts);
        let initial_delay = std::env::var("WRITE_RETRY_INITIAL_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.initial_delay);
        let max_delay = std::env::var("WRITE_RETRY_MAX_DELAY_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.max_delay);
        let multiplier = std::env::var("WRITE_RETRY_MULTIPLIER")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.multiplier);
        let kind = match std::env::var("WRITE_RETRY_BACKOFF").ok().as_deref() {
            Some("linear") => BackoffKind::Linear,
            _ => BackoffKind::Exponential,
        };

        defaults
            .with_max_attempts(max_attempts)
            .with_initial_delay(initial_delay)
            .with_max_delay(max_delay)
            .with_multiplier(multiplier)
            .with_kind(kind)
    }

    /// Set the attempt limit (clamped to at least 1)
    pub fn with_max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = max.max(1);
        self
    }

    /// Set the initial delay
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the maximum delay
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the multiplier (values below 1.0 are raised to 1.0)
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier.max(1.0);
        self
    }

    pub fn with_kind(mut self, kind: BackoffKind) -> Self {
        self.kind = kind;
        self
    }

    /// Set the jitter factor
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Delay after failed attempt number `attempt` (1-indexed).
    pub fn delay_after_attempt(&self, attempt: u32) -> Duration {
        let step = attempt.saturating_sub(1);
        let initial = self.initial_delay.as_secs_f64();
        let base_delay = match self.kind {
            BackoffKind::Exponential => initial * self.multiplier.powi(step.min(64) as i32),
            BackoffKind::Linear => initial * f64::from(step + 1),
        };
        let capped_delay = base_delay.min(self.max_delay.as_secs_f64());

        let final_delay = if self.jitter > 0.0 {
            let jitter_range = capped_delay * self.jitter;
            let mut rng = rand::thread_rng();
            let jitter_offset = rng.gen_range(-jitter_range..=jitter_range);
            (capped_delay + jitter_offset).max(0.0)
        } else {
            capped_delay
        };

        Duration::from_secs_f64(final_delay)
    }

    /// Sum of every inter-attempt delay (jitter ignored).
    pub fn total_budget(&self) -> Duration {
        let no_jitter = self.clone().with_jitter(0.0);
        (1..self.max_attempts)
            .map(|attempt| no_jitter.delay_after_attempt(attempt))
            .sum()
    }
}

/// Result of a retry operation
#[derive(Debug)]
pub struct RetryResult<T, E> {
    /// The final result (success or last error)
    pub result: Result<T, E>,
    /// Number of attempts made (1 = succeeded on first try)
    pub attempts: u32,
    /// Total time spent on retries (including delays)
    pub total_duration: Duration,
}

impl<T, E> RetryResult<T, E> {
    /// Check if the operation succeeded
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// Get the result, consuming self
    pub fn into_result(self) -> Result<T, E> {
        self.result
    }
}

/// A retry executor that can run operations with retry logic
pub struct Retry {
    config: RetryConfig,
}

impl Retry {
    /// Create a new retry executor with the given config
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Run an operation with retry logic
    pub async fn run<F, Fut, T, E>(&self, operation: F) -> RetryResult<T, E>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run_with_predicate(operation, |_| true).await
    }

    /// Run an operation with retry logic and a custom retry predicate
    ///
    /// The `should_retry` predicate receives the error and returns true if
    /// the operation should be retried.
    pub async fn run_with_predicate<F, Fut, T, E, P>(
        &self,
        operation: F,
        should_retry: P,
    ) -> RetryResult<T, E>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
    {
        let start = std::time::Instant::now();
        let mut attempts = 0;

        loop {
            attempts += 1;

            match operation().await {
                Ok(value) => {
                    return RetryResult {
                        result: Ok(value),
                        attempts,
                        total_duration: start.elapsed(),
                    };
                }
                Err(e) => {
                    if attempts >= self.config.max_attempts || !should_retry(&e) {
                        return RetryResult {
                            result: Err(e),
                            attempts,
                            total_duration: start.elapsed(),
                        };
                    }

                    let delay = self.config.delay_after_attempt(attempts);

                    tracing::debug!(
                        attempt = attempts,
                        max_attempts = self.config.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying operation after failure"
                    );

                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Check if a database error is transient and worth retrying
pub fn is_retryable_db_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_) => true,
        sqlx::Error::PoolTimedOut => true,
        sqlx::Error::PoolClosed => false, // Pool is intentionally closed
        sqlx::Error::Database(db_err) => {
            let code = db_err.code().unwrap_or_default();
            // PostgreSQL serialization failure
            code == "40001"
                // PostgreSQL deadlock detected
                || code == "40P01"
                // SQLite busy / locked
                || code == "5"
                || code == "6"
                // Connection exceptions
                || code.starts_with("08")
                // Operator intervention (admin disconnected, crash recovery)
                || code.starts_with("57")
        }
        _ => false,
    }
}

/// Check if a database error means the connection (not the statement) failed
pub fn is_connection_db_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db_err) => {
            let code = db_err.code().unwrap_or_default();
            code.starts_with("08") || code.starts_with("57")
        }
        _ => false,
    }
}

// ============================================================================
// Tests
// ============================================================================
