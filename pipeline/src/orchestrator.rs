use async_trait::async_trait;
use github_client::{Account, GitHubApiClient};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use sync_core::{Config, CoreError, ErrorExt, FollowDecision, GitHubApiError, PipelineError};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{sleep, Instant};
use tracing::{error, info, warn};

use crate::actuator::{FollowActuator, FollowService};
use crate::enricher::{ProfileEnricher, UserDataSource};
use crate::filter::FollowFilter;
use crate::metrics::{RunMetrics, RunSummary};
use storage::ProfileStore;

/// Everything the orchestrator needs from the GitHub API: the read side
/// for enrichment, the write side for follows, and follower enumeration.
#[async_trait]
pub trait SyncApi: UserDataSource + FollowService {
    async fn list_followers(&self, login: &str) -> Result<Vec<Account>, CoreError>;
    async fn list_following(&self) -> Result<Vec<Account>, CoreError>;
}

#[async_trait]
impl SyncApi for GitHubApiClient {
    async fn list_followers(&self, login: &str) -> Result<Vec<Account>, CoreError> {
        GitHubApiClient::list_followers(self, login).await
    }

    async fn list_following(&self) -> Result<Vec<Account>, CoreError> {
        GitHubApiClient::list_following(self).await
    }
}

/// Process-wide pause. When one worker hits the rate limit, every worker
/// waits out the same reset instead of piling more requests on.
#[derive(Debug, Default)]
struct PauseGate {
    paused_until: Mutex<Option<Instant>>,
}

impl PauseGate {
    async fn wait_ready(&self) {
        let deadline = { *self.paused_until.lock().await };
        if let Some(deadline) = deadline {
            let now = Instant::now();
            if deadline > now {
                sleep(deadline - now).await;
            }
        }
    }

    async fn pause_for(&self, duration: Duration) {
        let mut paused = self.paused_until.lock().await;
        let deadline = Instant::now() + duration;
        // Never shorten an existing pause
        if paused.map(|p| p < deadline).unwrap_or(true) {
            warn!("Pausing all workers for {:?}", duration);
            *paused = Some(deadline);
        }
    }
}

enum UserOutcome {
    Processed,
    Failed,
    Aborted,
}

/// Drives one full run: enumerate followers of every target org, enrich
/// each one through a bounded worker pool, apply the follow rules, and
/// persist the rows.
pub struct PipelineOrchestrator<S: SyncApi + 'static> {
    api: Arc<S>,
    config: Config,
    metrics: Arc<RunMetrics>,
}

impl<S: SyncApi + 'static> PipelineOrchestrator<S> {
    pub fn new(api: Arc<S>, config: Config) -> Self {
        Self {
            api,
            config,
            metrics: Arc::new(RunMetrics::new()),
        }
    }

    pub fn metrics(&self) -> Arc<RunMetrics> {
        self.metrics.clone()
    }

    pub async fn run(&self) -> Result<RunSummary, CoreError> {
        info!(
            "Starting run {} for {:?} with strategy {}",
            self.metrics.run_id, self.config.target_organizations, self.config.strategy
        );

        let logins = self.enumerate_followers().await?;
        self.metrics.set_total_users(logins.len() as u64);
        info!("{} unique followers to process", logins.len());

        let store = Arc::new(Mutex::new(ProfileStore::open(&self.config.output_file)?));

        let initial_following: HashSet<String> = if self.config.follow.enabled {
            self.api
                .list_following()
                .await?
                .into_iter()
                .map(|a| a.login)
                .collect()
        } else {
            HashSet::new()
        };

        let actuator = Arc::new(FollowActuator::new(
            self.api.clone(),
            initial_following,
            self.config.max_follows_per_run,
            self.config.follow.delay_between_follows,
            self.config.dry_run,
        ));
        let filter = Arc::new(FollowFilter::new(self.config.follow.clone()));
        let enricher = Arc::new(ProfileEnricher::new(
            self.api.clone(),
            self.config.strategy,
        ));
        let semaphore = Arc::new(Semaphore::new(self.config.max_workers));
        let gate = Arc::new(PauseGate::default());
        let abort = Arc::new(AtomicBool::new(false));
        let fatal_reason = Arc::new(std::sync::Mutex::new(None::<String>));

        let mut workers = JoinSet::new();
        for login in logins {
            let semaphore = semaphore.clone();
            let gate = gate.clone();
            let abort = abort.clone();
            let fatal_reason = fatal_reason.clone();
            let enricher = enricher.clone();
            let filter = filter.clone();
            let actuator = actuator.clone();
            let store = store.clone();
            let metrics = self.metrics.clone();
            let follow_enabled = self.config.follow.enabled;
            let threshold = self.config.stop_on_error_threshold;

            workers.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("Semaphore should not be closed");

                if abort.load(Ordering::SeqCst) {
                    return UserOutcome::Aborted;
                }
                gate.wait_ready().await;

                let result = process_user(
                    &login,
                    &enricher,
                    &filter,
                    &actuator,
                    &store,
                    &metrics,
                    follow_enabled,
                )
                .await;

                let result = match result {
                    // A rate-limit error pauses everyone, then the user
                    // gets one more chance.
                    Err(
                        ref err @ CoreError::GitHubApi(GitHubApiError::RateLimitExceeded { .. }),
                    ) => {
                        if let Some(delay) = err.retry_after() {
                            gate.pause_for(delay).await;
                            gate.wait_ready().await;
                        }
                        process_user(
                            &login,
                            &enricher,
                            &filter,
                            &actuator,
                            &store,
                            &metrics,
                            follow_enabled,
                        )
                        .await
                    }
                    other => other,
                };

                match result {
                    Ok(()) => {
                        metrics.record_processed();
                        UserOutcome::Processed
                    }
                    Err(err) => {
                        error!("Processing {} failed: {}", login, err);
                        // A dead token fails every remaining user the same
                        // way; stop submitting work at the first sign.
                        if err.is_fatal() {
                            let mut fatal = fatal_reason.lock().unwrap();
                            if fatal.is_none() {
                                *fatal = Some(err.user_friendly_message());
                            }
                            abort.store(true, Ordering::SeqCst);
                        }
                        let failures = metrics.record_failure();
                        if threshold > 0 && failures >= threshold {
                            abort.store(true, Ordering::SeqCst);
                        }
                        UserOutcome::Failed
                    }
                }
            });
        }

        let mut aborted = false;
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(UserOutcome::Aborted) => aborted = true,
                Ok(_) => {}
                Err(e) => {
                    error!("Worker panicked: {}", e);
                    self.metrics.record_failure();
                }
            }
        }

        store.lock().await.flush()?;

        let summary = self.metrics.summary();
        if let Some(reason) = fatal_reason.lock().unwrap().take() {
            return Err(CoreError::Pipeline(PipelineError::Aborted { reason }));
        }
        if aborted || abort.load(Ordering::SeqCst) {
            return Err(CoreError::Pipeline(PipelineError::ErrorThresholdExceeded {
                failures: summary.failed,
                threshold: self.config.stop_on_error_threshold,
            }));
        }

        info!("{summary}");
        Ok(summary)
    }

    /// Followers of every target org, deduplicated case-insensitively.
    /// First occurrence wins, so ordering follows the org list.
    async fn enumerate_followers(&self) -> Result<Vec<String>, CoreError> {
        let mut seen = HashSet::new();
        let mut logins = Vec::new();

        for org in &self.config.target_organizations {
            let followers = self.api.list_followers(org).await?;
            info!("{}: {} followers", org, followers.len());
            for account in followers {
                if account.login.is_empty() {
                    return Err(CoreError::Pipeline(PipelineError::MissingLogin));
                }
                if seen.insert(account.login.to_ascii_lowercase()) {
                    logins.push(account.login);
                }
            }
        }

        Ok(logins)
    }
}

async fn process_user<S: SyncApi>(
    login: &str,
    enricher: &ProfileEnricher<S>,
    filter: &FollowFilter,
    actuator: &FollowActuator<S>,
    store: &Mutex<ProfileStore>,
    metrics: &RunMetrics,
    follow_enabled: bool,
) -> Result<(), CoreError> {
    let profile = enricher.enrich(login).await?;

    if follow_enabled {
        let verdict = filter.evaluate(&profile);
        if verdict.accepted {
            match actuator.attempt_follow(login).await? {
                FollowDecision::Follow => metrics.record_followed(),
                FollowDecision::Skip => metrics.record_skipped(),
                FollowDecision::AlreadyFollowing => metrics.record_already_following(),
            }
        } else {
            info!("Skipping {}: {}", login, verdict.reason);
            metrics.record_skipped();
        }
    }

    store.lock().await.append(profile.to_record());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use github_client::{Event, Repo, UserDetail};
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::atomic::AtomicU32;
    use sync_core::{FilterConfig, GitHubApiError, ProcessingStrategy};

    struct FakeApi {
        followers_by_org: HashMap<String, Vec<String>>,
        following: Vec<String>,
        details: HashMap<String, UserDetail>,
        follow_calls: AtomicU32,
        auth_broken: bool,
    }

    impl FakeApi {
        fn new(followers_by_org: HashMap<String, Vec<String>>, details: Vec<UserDetail>) -> Self {
            Self {
                followers_by_org,
                following: Vec::new(),
                details: details.into_iter().map(|d| (d.login.clone(), d)).collect(),
                follow_calls: AtomicU32::new(0),
                auth_broken: false,
            }
        }
    }

    #[async_trait]
    impl UserDataSource for FakeApi {
        async fn get_user(&self, login: &str) -> Result<UserDetail, CoreError> {
            if self.auth_broken {
                return Err(CoreError::GitHubApi(GitHubApiError::InvalidToken));
            }
            self.details.get(login).cloned().ok_or_else(|| {
                CoreError::GitHubApi(GitHubApiError::UserNotFound {
                    login: login.to_string(),
                })
            })
        }

        async fn list_repos(&self, _login: &str) -> Result<Vec<Repo>, CoreError> {
            Ok(vec![Repo {
                name: "demo".to_string(),
                language: Some("Rust".to_string()),
                stargazers_count: 5,
                forks_count: 1,
                fork: false,
                size: 10,
            }])
        }

        async fn list_public_events(&self, _login: &str) -> Result<Vec<Event>, CoreError> {
            Ok(Vec::new())
        }
    }

    #[async_trait]
    impl FollowService for FakeApi {
        async fn follow(&self, _login: &str) -> Result<(), CoreError> {
            self.follow_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn unfollow(&self, _login: &str) -> Result<(), CoreError> {
            Ok(())
        }
    }

    #[async_trait]
    impl SyncApi for FakeApi {
        async fn list_followers(&self, login: &str) -> Result<Vec<Account>, CoreError> {
            let logins = self.followers_by_org.get(login).cloned().unwrap_or_default();
            Ok(logins
                .into_iter()
                .enumerate()
                .map(|(i, login)| Account {
                    login,
                    id: i as u64 + 1,
                    avatar_url: None,
                    html_url: None,
                    account_type: None,
                })
                .collect())
        }

        async fn list_following(&self) -> Result<Vec<Account>, CoreError> {
            Ok(self
                .following
                .iter()
                .enumerate()
                .map(|(i, login)| Account {
                    login: login.clone(),
                    id: i as u64 + 1000,
                    avatar_url: None,
                    html_url: None,
                    account_type: None,
                })
                .collect())
        }
    }

    fn detail(login: &str, followers: u32) -> UserDetail {
        UserDetail {
            login: login.to_string(),
            id: 1,
            name: None,
            bio: None,
            company: None,
            location: None,
            email: None,
            blog: None,
            public_repos: 10,
            followers,
            following: 5,
            created_at: Some(chrono::Utc::now() - chrono::Duration::days(365)),
            avatar_url: None,
            html_url: None,
        }
    }

    fn temp_output() -> PathBuf {
        std::env::temp_dir().join(format!(
            "test_follower_sync_run_{}.csv",
            uuid::Uuid::new_v4()
        ))
    }

    fn test_config(output: PathBuf, follow_enabled: bool) -> Config {
        let mut config =
            Config::from_lookup(|key| match key {
                "GITHUB_TOKEN" => Some("ghp_test".to_string()),
                "TARGET_ORGANIZATIONS" => Some("acme".to_string()),
                _ => None,
            })
            .unwrap();
        config.output_file = output;
        config.max_workers = 4;
        config.strategy = ProcessingStrategy::Balanced;
        config.follow = FilterConfig {
            enabled: follow_enabled,
            ..FilterConfig::default()
        };
        config
    }

    fn org_map(org: &str, followers: &[&str]) -> HashMap<String, Vec<String>> {
        let mut map = HashMap::new();
        map.insert(
            org.to_string(),
            followers.iter().map(|s| s.to_string()).collect(),
        );
        map
    }

    #[tokio::test]
    async fn every_user_ends_processed_or_failed() {
        let output = temp_output();
        // "ghost" has no detail so balanced enrichment fails for it
        let api = Arc::new(FakeApi::new(
            org_map("acme", &["alice", "bob", "ghost"]),
            vec![detail("alice", 10), detail("bob", 10)],
        ));
        let orchestrator = PipelineOrchestrator::new(api, test_config(output.clone(), false));

        let summary = orchestrator.run().await.unwrap();
        assert_eq!(summary.total_users, 3);
        assert_eq!(summary.processed, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.processed + summary.failed, summary.total_users);

        std::fs::remove_file(&output).ok();
    }

    #[tokio::test]
    async fn followers_are_deduplicated_across_orgs() {
        let output = temp_output();
        let mut map = org_map("acme", &["alice", "bob"]);
        map.insert(
            "globex".to_string(),
            vec!["Alice".to_string(), "carol".to_string()],
        );

        let mut config = test_config(output.clone(), false);
        config.target_organizations = vec!["acme".to_string(), "globex".to_string()];

        let api = Arc::new(FakeApi::new(
            map,
            vec![detail("alice", 1), detail("bob", 1), detail("carol", 1)],
        ));
        let orchestrator = PipelineOrchestrator::new(api, config);

        let summary = orchestrator.run().await.unwrap();
        assert_eq!(summary.total_users, 3);

        std::fs::remove_file(&output).ok();
    }

    #[tokio::test]
    async fn follow_cap_bounds_follows_end_to_end() {
        let output = temp_output();
        let logins = ["a", "b", "c", "d", "e"];
        let api = Arc::new(FakeApi::new(
            org_map("acme", &logins),
            logins.iter().map(|l| detail(l, 10)).collect(),
        ));

        let mut config = test_config(output.clone(), true);
        config.max_follows_per_run = 2;

        let orchestrator = PipelineOrchestrator::new(api.clone(), config);
        let summary = orchestrator.run().await.unwrap();

        assert_eq!(summary.followed, 2);
        assert_eq!(api.follow_calls.load(Ordering::SeqCst), 2);
        assert_eq!(summary.followed + summary.skipped, 5);

        std::fs::remove_file(&output).ok();
    }

    #[tokio::test]
    async fn already_followed_accounts_are_never_refollowed() {
        let output = temp_output();
        let mut api = FakeApi::new(
            org_map("acme", &["alice", "bob"]),
            vec![detail("alice", 10), detail("bob", 10)],
        );
        api.following = vec!["Alice".to_string()];
        let api = Arc::new(api);

        let orchestrator =
            PipelineOrchestrator::new(api.clone(), test_config(output.clone(), true));
        let summary = orchestrator.run().await.unwrap();

        assert_eq!(summary.already_following, 1);
        assert_eq!(summary.followed, 1);
        assert_eq!(api.follow_calls.load(Ordering::SeqCst), 1);

        std::fs::remove_file(&output).ok();
    }

    #[tokio::test]
    async fn error_threshold_aborts_the_run() {
        let output = temp_output();
        // No details at all: every user fails enrichment
        let api = Arc::new(FakeApi::new(
            org_map("acme", &["a", "b", "c", "d", "e", "f"]),
            vec![],
        ));

        let mut config = test_config(output.clone(), false);
        config.stop_on_error_threshold = 2;
        config.max_workers = 1;

        let orchestrator = PipelineOrchestrator::new(api, config);
        let result = orchestrator.run().await;

        match result {
            Err(CoreError::Pipeline(PipelineError::ErrorThresholdExceeded {
                failures,
                threshold,
            })) => {
                assert!(failures >= threshold);
                assert_eq!(threshold, 2);
            }
            other => panic!("Expected ErrorThresholdExceeded, got {other:?}"),
        }

        std::fs::remove_file(&output).ok();
    }

    #[tokio::test]
    async fn invalid_token_aborts_without_burning_the_threshold() {
        let output = temp_output();
        let mut api = FakeApi::new(org_map("acme", &["a", "b", "c", "d", "e", "f"]), vec![]);
        api.auth_broken = true;
        let api = Arc::new(api);

        let mut config = test_config(output.clone(), false);
        config.stop_on_error_threshold = 10;
        config.max_workers = 1;

        let orchestrator = PipelineOrchestrator::new(api, config);
        let result = orchestrator.run().await;

        match result {
            Err(CoreError::Pipeline(PipelineError::Aborted { reason })) => {
                assert!(reason.contains("token"));
            }
            other => panic!("Expected Aborted, got {other:?}"),
        }
        // The run stopped on the first fatal error instead of failing
        // user after user toward the threshold
        assert_eq!(orchestrator.metrics().failed(), 1);

        std::fs::remove_file(&output).ok();
    }

    #[tokio::test]
    async fn processed_rows_are_persisted() {
        let output = temp_output();
        let api = Arc::new(FakeApi::new(
            org_map("acme", &["alice"]),
            vec![detail("alice", 10)],
        ));
        let orchestrator = PipelineOrchestrator::new(api, test_config(output.clone(), false));

        orchestrator.run().await.unwrap();

        let content = std::fs::read_to_string(&output).unwrap();
        assert!(content.contains("alice"));
        assert!(content.contains("Rust"));

        std::fs::remove_file(&output).ok();
    }

    #[tokio::test]
    async fn pause_gate_delays_until_deadline() {
        let gate = PauseGate::default();
        gate.pause_for(Duration::from_millis(50)).await;

        let start = std::time::Instant::now();
        gate.wait_ready().await;
        assert!(start.elapsed() >= Duration::from_millis(45));
    }
}
