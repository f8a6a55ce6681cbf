use async_trait::async_trait;
use github_client::GitHubApiClient;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use sync_core::{CoreError, FollowDecision};
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, info};

/// Write side of the GitHub API used by the actuator and the reciprocity
/// auditor.
#[async_trait]
pub trait FollowService: Send + Sync {
    async fn follow(&self, login: &str) -> Result<(), CoreError>;
    async fn unfollow(&self, login: &str) -> Result<(), CoreError>;
}

#[async_trait]
impl FollowService for GitHubApiClient {
    async fn follow(&self, login: &str) -> Result<(), CoreError> {
        GitHubApiClient::follow(self, login).await
    }

    async fn unfollow(&self, login: &str) -> Result<(), CoreError> {
        GitHubApiClient::unfollow(self, login).await
    }
}

/// Executes follow decisions under a per-run cap. The cap slot is reserved
/// before the API call and given back on failure, so concurrent workers can
/// never push the follow count past the cap.
pub struct FollowActuator<S: FollowService> {
    service: std::sync::Arc<S>,
    following: Mutex<HashSet<String>>,
    remaining: AtomicU32,
    cap: u32,
    delay: Duration,
    dry_run: bool,
}

impl<S: FollowService> FollowActuator<S> {
    pub fn new(
        service: std::sync::Arc<S>,
        initial_following: HashSet<String>,
        cap: u32,
        delay: Duration,
        dry_run: bool,
    ) -> Self {
        let following = initial_following
            .into_iter()
            .map(|l| l.to_ascii_lowercase())
            .collect();
        Self {
            service,
            following: Mutex::new(following),
            remaining: AtomicU32::new(cap),
            cap,
            delay,
            dry_run,
        }
    }

    /// Follow `login` unless already followed or the cap is spent.
    pub async fn attempt_follow(&self, login: &str) -> Result<FollowDecision, CoreError> {
        let key = login.to_ascii_lowercase();

        {
            let following = self.following.lock().await;
            if following.contains(&key) {
                debug!("Already following {}", login);
                return Ok(FollowDecision::AlreadyFollowing);
            }
        }

        // Reserve a cap slot before touching the API
        let reserved = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if !reserved {
            debug!("Follow cap reached, skipping {}", login);
            return Ok(FollowDecision::Skip);
        }

        if self.dry_run {
            info!("[dry run] would follow {}", login);
            self.following.lock().await.insert(key);
            return Ok(FollowDecision::Follow);
        }

        if let Err(e) = self.service.follow(login).await {
            // Give the slot back so a later candidate can use it
            self.remaining.fetch_add(1, Ordering::SeqCst);
            return Err(e);
        }

        self.following.lock().await.insert(key);

        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }

        Ok(FollowDecision::Follow)
    }

    pub fn follows_used(&self) -> u32 {
        self.cap - self.remaining.load(Ordering::SeqCst)
    }

    pub fn cap_reached(&self) -> bool {
        self.remaining.load(Ordering::SeqCst) == 0
    }

    pub async fn is_following(&self, login: &str) -> bool {
        self.following
            .lock()
            .await
            .contains(&login.to_ascii_lowercase())
    }
}
