//! Quota-aware retry around an [`InferenceService`].
//!
//! ## Retry Strategy
//!
//! Only rate-limit errors are retried. Anything else (bad request, auth,
//! network) is assumed permanent and surfaces at once. On a quota error at
//! attempt `n` (0-based) the client waits `base_delay * 2^n` before the next
//! attempt; with the defaults that is 5 s → 10 s → 20 s → 40 s across five
//! attempts. A quota error on the last attempt ends the call without another
//! wait.
//!
//! The loop is an explicit [`RetryState`] machine so the attempt bound is
//! visible in one place.

use crate::config::PipelineConfig;
use crate::error::InferenceError;
use crate::pipeline::llm::InferenceService;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Something that can pause the pipeline.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeps on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Attempt bound and backoff base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, at least 1.
    pub max_retries: u32,
    /// Wait after the first quota error.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            max_retries: config.max_retries.max(1),
            base_delay: config.retry_base_delay,
        }
    }

    /// Wait after a quota error on `attempt` (0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// Where one `invoke` call stands.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryState {
    /// About to make attempt `n` (0-based).
    Attempting(u32),
    /// The service answered.
    Succeeded(String),
    /// Every attempt hit the quota.
    ExhaustedFailed { attempts: u32, last_error: String },
}

/// Calls an [`InferenceService`] with bounded exponential backoff on quota
/// errors.
#[derive(Clone)]
pub struct RetryingClient {
    service: Arc<dyn InferenceService>,
    sleeper: Arc<dyn Sleeper>,
    policy: RetryPolicy,
}

impl RetryingClient {
    pub fn new(service: Arc<dyn InferenceService>, policy: RetryPolicy) -> Self {
        Self {
            service,
            sleeper: Arc::new(TokioSleeper),
            policy: RetryPolicy {
                max_retries: policy.max_retries.max(1),
                ..policy
            },
        }
    }

    /// Replace the sleeper (tests record waits instead of sleeping).
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn service_name(&self) -> &str {
        self.service.name()
    }

    /// Send `prompt`, retrying on quota errors.
    ///
    /// # Errors
    /// * the first non-quota error, unchanged
    /// * [`InferenceError::RetriesExhausted`] once `max_retries` attempts
    ///   were all rate limited
    pub async fn invoke(&self, prompt: &str) -> Result<String, InferenceError> {
        let max = self.policy.max_retries;
        let mut state = RetryState::Attempting(0);

        loop {
            state = match state {
                RetryState::Attempting(attempt) => match self.service.generate(prompt).await {
                    Ok(text) => {
                        debug!("{}: answered on attempt {}", self.service.name(), attempt + 1);
                        RetryState::Succeeded(text)
                    }
                    Err(e) if e.is_rate_limited() => {
                        if attempt + 1 >= max {
                            RetryState::ExhaustedFailed {
                                attempts: attempt + 1,
                                last_error: e.to_string(),
                            }
                        } else {
                            let wait = self.policy.backoff(attempt);
                            warn!(
                                "Rate limited, waiting {}s before retry {}/{}...",
                                wait.as_secs_f64(),
                                attempt + 1,
                                max
                            );
                            self.sleeper.sleep(wait).await;
                            RetryState::Attempting(attempt + 1)
                        }
                    }
                    Err(e) => return Err(e),
                },
                RetryState::Succeeded(text) => return Ok(text),
                RetryState::ExhaustedFailed {
                    attempts,
                    last_error,
                } => {
                    return Err(InferenceError::RetriesExhausted {
                        attempts,
                        detail: last_error,
                    })
                }
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Fails with `fail_with` for the first `failures` calls, then answers.
    struct FlakyService {
        failures: u32,
        fail_with: InferenceError,
        calls: AtomicU32,
    }

    #[async_trait]
    impl InferenceService for FlakyService {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn generate(&self, _prompt: &str) -> Result<String, InferenceError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(self.fail_with.clone())
            } else {
                Ok("{}".to_string())
            }
        }
    }

    #[derive(Default)]
    struct RecordingSleeper(Mutex<Vec<Duration>>);

    #[async_trait]
    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.0.lock().unwrap().push(duration);
        }
    }

    fn quota() -> InferenceError {
        InferenceError::RateLimited {
            provider: "flaky".into(),
            detail: "429".into(),
        }
    }

    fn client(service: Arc<FlakyService>, sleeper: Arc<RecordingSleeper>) -> RetryingClient {
        RetryingClient::new(service, RetryPolicy::default()).with_sleeper(sleeper)
    }

    #[test]
    fn backoff_doubles_from_base() {
        let p = RetryPolicy::default();
        let secs: Vec<u64> = (0..5).map(|a| p.backoff(a).as_secs()).collect();
        assert_eq!(secs, vec![5, 10, 20, 40, 80]);
    }

    #[tokio::test]
    async fn recovers_after_two_quota_errors() {
        let service = Arc::new(FlakyService {
            failures: 2,
            fail_with: quota(),
            calls: AtomicU32::new(0),
        });
        let sleeper = Arc::new(RecordingSleeper::default());

        let text = client(service.clone(), sleeper.clone()).invoke("p").await.unwrap();

        assert_eq!(text, "{}");
        assert_eq!(service.calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            *sleeper.0.lock().unwrap(),
            vec![Duration::from_secs(5), Duration::from_secs(10)]
        );
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts_without_final_wait() {
        let service = Arc::new(FlakyService {
            failures: u32::MAX,
            fail_with: quota(),
            calls: AtomicU32::new(0),
        });
        let sleeper = Arc::new(RecordingSleeper::default());

        let err = client(service.clone(), sleeper.clone()).invoke("p").await.unwrap_err();

        assert!(matches!(err, InferenceError::RetriesExhausted { attempts: 5, .. }));
        assert_eq!(service.calls.load(Ordering::SeqCst), 5);
        let waits: Vec<u64> = sleeper.0.lock().unwrap().iter().map(|d| d.as_secs()).collect();
        assert_eq!(waits, vec![5, 10, 20, 40]);
    }

    #[tokio::test]
    async fn other_errors_are_not_retried() {
        let service = Arc::new(FlakyService {
            failures: 1,
            fail_with: InferenceError::Service {
                provider: "flaky".into(),
                detail: "400 bad request".into(),
            },
            calls: AtomicU32::new(0),
        });
        let sleeper = Arc::new(RecordingSleeper::default());

        let err = client(service.clone(), sleeper.clone()).invoke("p").await.unwrap_err();

        assert!(matches!(err, InferenceError::Service { .. }));
        assert_eq!(service.calls.load(Ordering::SeqCst), 1);
        assert!(sleeper.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn single_attempt_budget_never_waits() {
        let service = Arc::new(FlakyService {
            failures: 1,
            fail_with: quota(),
            calls: AtomicU32::new(0),
        });
        let sleeper = Arc::new(RecordingSleeper::default());
        let client = RetryingClient::new(
            service.clone(),
            RetryPolicy {
                max_retries: 1,
                base_delay: Duration::from_secs(5),
            },
        )
        .with_sleeper(sleeper.clone());

        let err = client.invoke("p").await.unwrap_err();
        assert!(matches!(err, InferenceError::RetriesExhausted { attempts: 1, .. }));
        assert!(sleeper.0.lock().unwrap().is_empty());
    }
}
