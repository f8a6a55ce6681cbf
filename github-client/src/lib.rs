pub mod api;
pub mod metrics;
pub mod rate_limiter;
pub mod retry;

pub use api::{
    Account, CommitAuthor, Event, EventCommit, EventPayload, GitHubApiClient, RateLimitSnapshot,
    Repo, UserDetail,
};
pub use metrics::{ApiMetrics, EndpointMetrics, MetricsCollector, RequestMetrics};
pub use rate_limiter::{RateLimitConfig, RateLimitStatus, RateLimiter};
pub use retry::{CircuitBreakerState, RetryConfig, RetryExecutor, RetryStrategy};
