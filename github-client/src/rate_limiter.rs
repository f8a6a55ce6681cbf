use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::{Mutex, Semaphore};
use tokio::time::sleep;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub time_window: Duration,
    pub burst_allowance: u32,
}

impl RateLimitConfig {
    /// GitHub REST core quota: 5000 requests per hour for authenticated
    /// token requests. Bursts are kept small so one run cannot drain the
    /// hourly budget in seconds.
    pub fn github_core() -> Self {
        Self {
            max_requests: 5000,
            time_window: Duration::from_secs(3600),
            burst_allowance: 10,
        }
    }
}

/// Client-side token bucket. Smooths our own request rate below the server
/// quota so the server-side limiter rarely triggers.
#[derive(Debug)]
pub struct TokenBucket {
    state: Mutex<BucketState>,
    capacity: f64,
    refill_rate: f64, // tokens per second
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(config: &RateLimitConfig) -> Self {
        let capacity = config.burst_allowance as f64;
        let refill_rate = config.max_requests as f64 / config.time_window.as_secs_f64();

        Self {
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
            capacity,
            refill_rate,
        }
    }

    /// Take `tokens_needed` tokens, or report how long until enough refill.
    pub async fn acquire(&self, tokens_needed: f64) -> Result<(), Duration> {
        let mut state = self.state.lock().await;

        let elapsed = state.last_refill.elapsed();
        state.tokens = (state.tokens + elapsed.as_secs_f64() * self.refill_rate).min(self.capacity);
        state.last_refill = Instant::now();

        if state.tokens >= tokens_needed {
            state.tokens -= tokens_needed;
            Ok(())
        } else {
            let deficit = tokens_needed - state.tokens;
            Err(Duration::from_secs_f64(deficit / self.refill_rate))
        }
    }

    pub async fn available_tokens(&self) -> f64 {
        let mut state = self.state.lock().await;
        let elapsed = state.last_refill.elapsed();
        state.tokens = (state.tokens + elapsed.as_secs_f64() * self.refill_rate).min(self.capacity);
        state.last_refill = Instant::now();
        state.tokens
    }
}

/// Server-reported quota, updated from `x-ratelimit-*` response headers.
#[derive(Debug, Default, Clone)]
struct ServerQuota {
    remaining: Option<u32>,
    reset_at_epoch: Option<i64>,
}

#[derive(Debug)]
pub struct RateLimiter {
    token_bucket: TokenBucket,
    semaphore: Arc<Semaphore>,
    config: RateLimitConfig,
    server_quota: Mutex<ServerQuota>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.burst_allowance as usize));
        let token_bucket = TokenBucket::new(&config);

        Self {
            token_bucket,
            semaphore,
            config,
            server_quota: Mutex::new(ServerQuota::default()),
        }
    }

    /// Blocks until a request may be sent: bounded concurrency, client-side
    /// bucket, and the server-reported reset time when the quota is gone.
    pub async fn acquire_permit(&self) -> RateLimitPermit {
        let start_time = Instant::now();
        let _permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("Semaphore should not be closed");

        self.wait_for_server_quota().await;

        loop {
            match self.token_bucket.acquire(1.0).await {
                Ok(()) => break,
                Err(wait_time) => {
                    debug!("Client-side rate limit reached, waiting {:?}", wait_time);
                    sleep(wait_time).await;
                }
            }
        }

        RateLimitPermit {
            _permit,
            queue_wait_time: start_time.elapsed(),
        }
    }

    /// Record the quota headers from a response.
    pub async fn observe_headers(&self, remaining: Option<u32>, reset_at_epoch: Option<i64>) {
        let mut quota = self.server_quota.lock().await;
        if remaining.is_some() {
            quota.remaining = remaining;
        }
        if reset_at_epoch.is_some() {
            quota.reset_at_epoch = reset_at_epoch;
        }
    }

    async fn wait_for_server_quota(&self) {
        let quota = { self.server_quota.lock().await.clone() };
        if quota.remaining != Some(0) {
            return;
        }
        if let Some(reset_epoch) = quota.reset_at_epoch {
            let wait_secs = (reset_epoch - Utc::now().timestamp()).max(0) as u64;
            if wait_secs > 0 {
                warn!(
                    "Server quota exhausted, waiting {}s until reset",
                    wait_secs
                );
                sleep(Duration::from_secs(wait_secs)).await;
            }
        }
        // Quota window has passed; forget the stale reading.
        let mut quota = self.server_quota.lock().await;
        quota.remaining = None;
        quota.reset_at_epoch = None;
    }

    pub async fn get_status(&self) -> RateLimitStatus {
        let available_tokens = self.token_bucket.available_tokens().await;
        let quota = self.server_quota.lock().await.clone();

        RateLimitStatus {
            available_tokens: available_tokens as u32,
            max_tokens: self.config.burst_allowance,
            available_permits: self.semaphore.available_permits(),
            max_permits: self.config.burst_allowance as usize,
            requests_per_window: self.config.max_requests,
            server_remaining: quota.remaining,
            server_reset_at: quota
                .reset_at_epoch
                .map(|e| SystemTime::UNIX_EPOCH + Duration::from_secs(e.max(0) as u64)),
            is_near_limit: available_tokens < (self.config.burst_allowance as f64 * 0.2)
                || quota.remaining.map(|r| r < 100).unwrap_or(false),
        }
    }
}

#[derive(Debug)]
pub struct RateLimitPermit {
    _permit: tokio::sync::OwnedSemaphorePermit,
    pub queue_wait_time: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitStatus {
    pub available_tokens: u32,
    pub max_tokens: u32,
    pub available_permits: usize,
    pub max_permits: usize,
    pub requests_per_window: u32,
    pub server_remaining: Option<u32>,
    pub server_reset_at: Option<SystemTime>,
    pub is_near_limit: bool,
}
