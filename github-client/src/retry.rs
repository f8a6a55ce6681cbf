use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use sync_core::{CoreError, GitHubApiError};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Base delay for exponential backoff (in milliseconds)
    pub base_delay_ms: u64,
    /// Maximum delay between retries (in milliseconds)
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Maximum jitter factor (0.0 to 1.0)
    pub jitter_factor: f64,
    /// Circuit breaker failure threshold
    pub failure_threshold: u32,
    /// Circuit breaker recovery timeout (in seconds)
    pub recovery_timeout_s: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
            failure_threshold: 5,
            recovery_timeout_s: 60,
        }
    }
}

impl RetryConfig {
    /// Retry config tuned for the GitHub REST API.
    pub fn github(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay_ms: 2000,
            max_delay_ms: 60000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.2, // jitter to prevent thundering herd
            failure_threshold: 3,
            recovery_timeout_s: 120,
        }
    }
}

/// Circuit breaker states
#[derive(Debug, Clone, PartialEq)]
pub enum CircuitBreakerState {
    Closed,   // Normal operation
    Open,     // Blocking requests
    HalfOpen, // Testing recovery
}

/// Circuit breaker for preventing cascading failures
#[derive(Debug)]
pub struct CircuitBreaker {
    state: CircuitBreakerState,
    failure_count: u32,
    last_failure_time: Option<Instant>,
    config: RetryConfig,
}

impl CircuitBreaker {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            state: CircuitBreakerState::Closed,
            failure_count: 0,
            last_failure_time: None,
            config,
        }
    }

    pub fn allow_request(&mut self) -> bool {
        match self.state {
            CircuitBreakerState::Closed => true,
            CircuitBreakerState::Open => {
                if let Some(last_failure) = self.last_failure_time {
                    let recovery = Duration::from_secs(self.config.recovery_timeout_s);
                    if last_failure.elapsed() >= recovery {
                        debug!("Circuit breaker transitioning to half-open for recovery test");
                        self.state = CircuitBreakerState::HalfOpen;
                        true
                    } else {
                        false
                    }
                } else {
                    false
                }
            }
            CircuitBreakerState::HalfOpen => true,
        }
    }

    pub fn record_success(&mut self) {
        match self.state {
            CircuitBreakerState::HalfOpen => {
                info!("Circuit breaker recovery successful, returning to closed state");
                self.state = CircuitBreakerState::Closed;
                self.failure_count = 0;
                self.last_failure_time = None;
            }
            _ => {
                self.failure_count = 0;
            }
        }
    }

    pub fn record_failure(&mut self) {
        self.failure_count += 1;
        self.last_failure_time = Some(Instant::now());

        match self.state {
            CircuitBreakerState::Closed => {
                if self.failure_count >= self.config.failure_threshold {
                    warn!(
                        "Circuit breaker opening after {} consecutive failures",
                        self.failure_count
                    );
                    self.state = CircuitBreakerState::Open;
                }
            }
            CircuitBreakerState::HalfOpen => {
                warn!("Circuit breaker recovery failed, returning to open state");
                self.state = CircuitBreakerState::Open;
            }
            CircuitBreakerState::Open => {}
        }
    }

    pub fn get_state(&self) -> CircuitBreakerState {
        self.state.clone()
    }
}

/// Retry strategy based on error type
#[derive(Debug, Clone, PartialEq)]
pub enum RetryStrategy {
    /// Retry with exponential backoff
    Retry,
    /// Retry after a server-specified delay (rate limits)
    RetryWithDelay(Duration),
    /// Don't retry (permanent failures)
    NoRetry,
}

/// Determine retry strategy based on error type
pub fn get_retry_strategy(error: &CoreError) -> RetryStrategy {
    match error {
        CoreError::GitHubApi(api_error) => match api_error {
            // Rate limits carry their own delay from the reset header
            GitHubApiError::RateLimitExceeded { retry_after } => {
                RetryStrategy::RetryWithDelay(Duration::from_secs(*retry_after))
            }
            GitHubApiError::ServerError { .. } => RetryStrategy::Retry,
            GitHubApiError::RequestTimeout => RetryStrategy::Retry,
            GitHubApiError::InvalidResponse { .. } => RetryStrategy::Retry,
            // Authentication and permission errors are permanent
            GitHubApiError::AuthenticationFailed { .. } => RetryStrategy::NoRetry,
            GitHubApiError::InvalidToken => RetryStrategy::NoRetry,
            GitHubApiError::Forbidden { .. } => RetryStrategy::NoRetry,
            // Missing users stay missing
            GitHubApiError::UserNotFound { .. } => RetryStrategy::NoRetry,
        },
        CoreError::Network(reqwest_error) => {
            if reqwest_error.is_timeout() || reqwest_error.is_connect() {
                RetryStrategy::Retry
            } else {
                RetryStrategy::NoRetry
            }
        }
        _ => RetryStrategy::NoRetry,
    }
}

/// Calculate delay with exponential backoff and jitter
pub fn calculate_delay(attempt: u32, config: &RetryConfig) -> Duration {
    let base_delay = Duration::from_millis(config.base_delay_ms);
    let max_delay = Duration::from_millis(config.max_delay_ms);

    let exponential_delay = if attempt == 0 {
        base_delay
    } else {
        let multiplier = config.backoff_multiplier.powi(attempt as i32);
        let delay_ms = (config.base_delay_ms as f64 * multiplier) as u64;
        Duration::from_millis(delay_ms.min(config.max_delay_ms))
    };

    let jitter_range = (exponential_delay.as_millis() as f64 * config.jitter_factor) as u64;
    let jitter = fastrand::u64(0..=jitter_range);
    let final_delay = exponential_delay + Duration::from_millis(jitter);

    final_delay.min(max_delay)
}

/// Retry metrics for monitoring
#[derive(Debug, Clone, Default)]
pub struct RetryMetrics {
    pub total_retries: u64,
    pub successful_retries: u64,
    pub failed_operations: u64,
    pub circuit_breaker_trips: u64,
}

/// Retry executor that wraps operations with retry logic
#[derive(Debug)]
pub struct RetryExecutor {
    config: RetryConfig,
    circuit_breaker: Arc<Mutex<CircuitBreaker>>,
    metrics: Arc<Mutex<RetryMetrics>>,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Self {
        let circuit_breaker = Arc::new(Mutex::new(CircuitBreaker::new(config.clone())));
        let metrics = Arc::new(Mutex::new(RetryMetrics::default()));

        Self {
            config,
            circuit_breaker,
            metrics,
        }
    }

    /// Execute an operation with retry logic. The final error is returned
    /// typed, so callers can still distinguish a missing user from an
    /// exhausted rate limit.
    pub async fn execute<F, Fut, T>(
        &self,
        operation_name: &str,
        operation: F,
    ) -> Result<T, CoreError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, CoreError>>,
    {
        {
            let mut breaker = self.circuit_breaker.lock().unwrap();
            if !breaker.allow_request() {
                drop(breaker);
                let mut metrics = self.metrics.lock().unwrap();
                metrics.circuit_breaker_trips += 1;
                drop(metrics);

                warn!(
                    "Circuit breaker is open, blocking request for {}",
                    operation_name
                );
                return Err(CoreError::Internal {
                    message: "Circuit breaker is open".to_string(),
                });
            }
        }

        let mut last_error: Option<CoreError> = None;
        let mut total_delay_ms = 0u64;

        for attempt in 0..self.config.max_attempts {
            if attempt > 0 {
                debug!("Retry attempt {} for {}", attempt, operation_name);
            }

            match operation().await {
                Ok(result) => {
                    {
                        let mut breaker = self.circuit_breaker.lock().unwrap();
                        breaker.record_success();
                    }

                    if attempt > 0 {
                        let mut metrics = self.metrics.lock().unwrap();
                        metrics.total_retries += attempt as u64;
                        metrics.successful_retries += 1;
                        info!(
                            "Operation {} succeeded after {} retries (total delay: {}ms)",
                            operation_name, attempt, total_delay_ms
                        );
                    }

                    return Ok(result);
                }
                Err(err) => {
                    let strategy = get_retry_strategy(&err);
                    let attempts_left = attempt + 1 < self.config.max_attempts;

                    match strategy {
                        RetryStrategy::NoRetry => {
                            debug!("Not retrying {} due to error type: {}", operation_name, err);
                            last_error = Some(err);
                            break;
                        }
                        RetryStrategy::Retry if attempts_left => {
                            let delay = calculate_delay(attempt, &self.config);
                            total_delay_ms += delay.as_millis() as u64;
                            info!("Retrying {} in {:?} due to: {}", operation_name, delay, err);
                            last_error = Some(err);
                            sleep(delay).await;
                        }
                        RetryStrategy::RetryWithDelay(delay) if attempts_left => {
                            total_delay_ms += delay.as_millis() as u64;
                            info!(
                                "Retrying {} after rate-limit delay of {:?}",
                                operation_name, delay
                            );
                            last_error = Some(err);
                            sleep(delay).await;
                        }
                        _ => {
                            debug!("Max retry attempts reached for {}", operation_name);
                            last_error = Some(err);
                            break;
                        }
                    }
                }
            }
        }

        // Only transport-level failures count against the breaker. Per-user
        // outcomes like 404 or 403 say nothing about service health and must
        // not block requests for other users.
        let breaker_relevant = last_error
            .as_ref()
            .map(|err| get_retry_strategy(err) != RetryStrategy::NoRetry)
            .unwrap_or(true);
        if breaker_relevant {
            let mut breaker = self.circuit_breaker.lock().unwrap();
            breaker.record_failure();
        }
        {
            let mut metrics = self.metrics.lock().unwrap();
            metrics.failed_operations += 1;
        }

        error!(
            "Operation {} failed after {} attempts with total delay of {}ms",
            operation_name, self.config.max_attempts, total_delay_ms
        );

        Err(last_error.unwrap_or(CoreError::Internal {
            message: "Retry executor exhausted without an error".to_string(),
        }))
    }

    pub fn get_metrics(&self) -> RetryMetrics {
        self.metrics.lock().unwrap().clone()
    }

    pub fn get_circuit_breaker_state(&self) -> CircuitBreakerState {
        self.circuit_breaker.lock().unwrap().get_state()
    }

    pub fn reset_metrics(&self) {
        let mut metrics = self.metrics.lock().unwrap();
        *metrics = RetryMetrics::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_github_retry_config() {
        let config = RetryConfig::github(3);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.base_delay_ms, 2000);
        assert_eq!(config.jitter_factor, 0.2);

        // Zero attempts would mean never even trying
        assert_eq!(RetryConfig::github(0).max_attempts, 1);
    }

    #[test]
    fn test_retry_strategy_for_errors() {
        let rate_limited =
            CoreError::GitHubApi(GitHubApiError::RateLimitExceeded { retry_after: 60 });
        match get_retry_strategy(&rate_limited) {
            RetryStrategy::RetryWithDelay(delay) => {
                assert_eq!(delay, Duration::from_secs(60));
            }
            _ => panic!("Expected RetryWithDelay for rate limit error"),
        }

        let auth = CoreError::GitHubApi(GitHubApiError::InvalidToken);
        assert_eq!(get_retry_strategy(&auth), RetryStrategy::NoRetry);

        let missing = CoreError::GitHubApi(GitHubApiError::UserNotFound {
            login: "ghost".to_string(),
        });
        assert_eq!(get_retry_strategy(&missing), RetryStrategy::NoRetry);

        let server = CoreError::GitHubApi(GitHubApiError::ServerError { status_code: 502 });
        assert_eq!(get_retry_strategy(&server), RetryStrategy::Retry);
    }

    #[test]
    fn test_exponential_backoff_calculation() {
        let config = RetryConfig {
            base_delay_ms: 1000,
            max_delay_ms: 10000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.0, // No jitter for predictable test
            ..Default::default()
        };

        assert_eq!(calculate_delay(0, &config), Duration::from_millis(1000));
        assert_eq!(calculate_delay(1, &config), Duration::from_millis(2000));
        assert_eq!(calculate_delay(2, &config), Duration::from_millis(4000));
        assert_eq!(calculate_delay(3, &config), Duration::from_millis(8000));

        // Should cap at max_delay_ms
        assert_eq!(calculate_delay(10, &config), Duration::from_millis(10000));
    }

    #[test]
    fn test_circuit_breaker_failure_threshold() {
        let config = RetryConfig {
            failure_threshold: 2,
            ..Default::default()
        };
        let mut breaker = CircuitBreaker::new(config);

        breaker.record_failure();
        assert_eq!(breaker.get_state(), CircuitBreakerState::Closed);
        assert!(breaker.allow_request());

        breaker.record_failure();
        assert_eq!(breaker.get_state(), CircuitBreakerState::Open);
        assert!(!breaker.allow_request());
    }

    #[test]
    fn test_circuit_breaker_recovery() {
        let config = RetryConfig {
            failure_threshold: 1,
            recovery_timeout_s: 0, // Immediate recovery for test
            ..Default::default()
        };
        let mut breaker = CircuitBreaker::new(config);

        breaker.record_failure();
        assert_eq!(breaker.get_state(), CircuitBreakerState::Open);

        std::thread::sleep(Duration::from_millis(1));
        assert!(breaker.allow_request());
        assert_eq!(breaker.get_state(), CircuitBreakerState::HalfOpen);

        breaker.record_success();
        assert_eq!(breaker.get_state(), CircuitBreakerState::Closed);
    }

    #[tokio::test]
    async fn test_executor_success_on_first_attempt() {
        let executor = RetryExecutor::new(RetryConfig::default());

        let result = executor
            .execute("test_operation", || async { Ok::<i32, CoreError>(42) })
            .await;

        assert_eq!(result.unwrap(), 42);
        let metrics = executor.get_metrics();
        assert_eq!(metrics.total_retries, 0);
    }

    #[tokio::test]
    async fn test_executor_success_after_retries() {
        let config = RetryConfig {
            max_attempts: 3,
            base_delay_ms: 1, // Very short delay for test
            ..Default::default()
        };
        let executor = RetryExecutor::new(config);

        let attempt_count = Arc::new(Mutex::new(0));
        let attempt_count_clone = attempt_count.clone();

        let result = executor
            .execute("test_operation", move || {
                let attempt_count = attempt_count_clone.clone();
                async move {
                    let mut count = attempt_count.lock().unwrap();
                    *count += 1;
                    if *count < 3 {
                        Err(CoreError::GitHubApi(GitHubApiError::ServerError {
                            status_code: 500,
                        }))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        let metrics = executor.get_metrics();
        assert_eq!(metrics.total_retries, 2);
        assert_eq!(metrics.successful_retries, 1);
    }

    #[tokio::test]
    async fn test_executor_preserves_typed_error() {
        let executor = RetryExecutor::new(RetryConfig::default());

        let result: Result<i32, CoreError> = executor
            .execute("test_operation", || async {
                Err(CoreError::GitHubApi(GitHubApiError::UserNotFound {
                    login: "ghost".to_string(),
                }))
            })
            .await;

        match result {
            Err(CoreError::GitHubApi(GitHubApiError::UserNotFound { login })) => {
                assert_eq!(login, "ghost");
            }
            other => panic!("Expected typed UserNotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_executor_no_retry_on_auth_error() {
        let executor = RetryExecutor::new(RetryConfig::default());

        let attempt_count = Arc::new(Mutex::new(0));
        let attempt_count_clone = attempt_count.clone();

        let result = executor
            .execute("test_operation", move || {
                let attempt_count = attempt_count_clone.clone();
                async move {
                    let mut count = attempt_count.lock().unwrap();
                    *count += 1;
                    Err::<i32, CoreError>(CoreError::GitHubApi(GitHubApiError::InvalidToken))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(*attempt_count.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_missing_users_leave_circuit_breaker_closed() {
        let config = RetryConfig {
            failure_threshold: 3,
            ..Default::default()
        };
        let executor = RetryExecutor::new(config);

        // A run over deleted or renamed accounts produces a streak of 404s
        for login in ["ghost1", "ghost2", "ghost3"] {
            let result: Result<i32, CoreError> = executor
                .execute("get_user", move || async move {
                    Err(CoreError::GitHubApi(GitHubApiError::UserNotFound {
                        login: login.to_string(),
                    }))
                })
                .await;
            assert!(result.is_err());
        }

        assert_eq!(
            executor.get_circuit_breaker_state(),
            CircuitBreakerState::Closed
        );

        // Requests for other users keep flowing
        let result = executor
            .execute("get_user", || async { Ok::<_, CoreError>("alive") })
            .await;
        assert_eq!(result.unwrap(), "alive");
    }

    #[tokio::test]
    async fn test_executor_circuit_breaker() {
        let config = RetryConfig {
            max_attempts: 2,
            failure_threshold: 2,
            base_delay_ms: 1,
            ..Default::default()
        };
        let executor = RetryExecutor::new(config);

        for name in ["op_1", "op_2"] {
            let result = executor
                .execute(name, || async {
                    Err::<i32, CoreError>(CoreError::GitHubApi(GitHubApiError::ServerError {
                        status_code: 500,
                    }))
                })
                .await;
            assert!(result.is_err());
        }

        assert_eq!(
            executor.get_circuit_breaker_state(),
            CircuitBreakerState::Open
        );

        // Third operation is blocked before it can run
        let result = executor
            .execute("op_3", || async { Ok::<i32, CoreError>(42) })
            .await;
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Circuit breaker is open"));

        let metrics = executor.get_metrics();
        assert_eq!(metrics.circuit_breaker_trips, 1);
    }
}
