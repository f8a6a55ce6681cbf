use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use storage::write_records;
use sync_core::CoreError;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::actuator::FollowService;

/// Accounts we follow that do not follow back. Comparison is
/// case-insensitive; the returned logins keep their original casing and
/// order from the following list.
pub fn find_non_reciprocal(following: &[String], followers: &[String]) -> Vec<String> {
    let follower_set: HashSet<String> = followers
        .iter()
        .map(|l| l.to_ascii_lowercase())
        .collect();

    following
        .iter()
        .filter(|login| !follower_set.contains(&login.to_ascii_lowercase()))
        .cloned()
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct DiffOptions {
    /// Write the non-reciprocal logins to this file when set.
    pub export_path: Option<PathBuf>,
    /// Actually unfollow the non-reciprocal accounts.
    pub unfollow: bool,
    /// Upper bound on unfollows in one run. Zero means unlimited.
    pub max_unfollows: u32,
    pub delay_between_unfollows: Duration,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffReport {
    pub following_count: usize,
    pub followers_count: usize,
    pub non_reciprocal: Vec<String>,
    pub unfollowed: u32,
    pub unfollow_failures: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct NonReciprocalRow {
    login: String,
}

/// Compares the following and follower lists and optionally unfollows the
/// accounts that don't follow back.
pub struct ReciprocityAuditor<S: FollowService> {
    service: Arc<S>,
    options: DiffOptions,
}

impl<S: FollowService> ReciprocityAuditor<S> {
    pub fn new(service: Arc<S>, options: DiffOptions) -> Self {
        Self { service, options }
    }

    pub async fn run(
        &self,
        following: Vec<String>,
        followers: Vec<String>,
    ) -> Result<DiffReport, CoreError> {
        let non_reciprocal = find_non_reciprocal(&following, &followers);
        info!(
            "Following {}, followed by {}, {} not reciprocal",
            following.len(),
            followers.len(),
            non_reciprocal.len()
        );

        if let Some(path) = &self.options.export_path {
            let rows: Vec<NonReciprocalRow> = non_reciprocal
                .iter()
                .map(|login| NonReciprocalRow {
                    login: login.clone(),
                })
                .collect();
            write_records(path, &rows)?;
        }

        let mut unfollowed = 0u32;
        let mut unfollow_failures = 0u32;

        if self.options.unfollow {
            let batch: Vec<&String> = if self.options.max_unfollows > 0 {
                non_reciprocal
                    .iter()
                    .take(self.options.max_unfollows as usize)
                    .collect()
            } else {
                non_reciprocal.iter().collect()
            };

            for login in batch {
                if self.options.dry_run {
                    info!("[dry run] would unfollow {}", login);
                    unfollowed += 1;
                    continue;
                }

                match self.service.unfollow(login).await {
                    Ok(()) => {
                        unfollowed += 1;
                        if !self.options.delay_between_unfollows.is_zero() {
                            sleep(self.options.delay_between_unfollows).await;
                        }
                    }
                    Err(e) => {
                        // One stubborn account should not abort the batch
                        warn!("Failed to unfollow {}: {}", login, e);
                        unfollow_failures += 1;
                    }
                }
            }
        }

        Ok(DiffReport {
            following_count: following.len(),
            followers_count: followers.len(),
            non_reciprocal,
            unfollowed,
            unfollow_failures,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use sync_core::GitHubApiError;

    fn logins(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn finds_non_reciprocal_accounts() {
        let following = logins(&["alice", "bob", "carol"]);
        let followers = logins(&["bob"]);
        assert_eq!(
            find_non_reciprocal(&following, &followers),
            logins(&["alice", "carol"])
        );
    }

    #[test]
    fn comparison_ignores_case_but_keeps_casing() {
        let following = logins(&["Alice", "BOB"]);
        let followers = logins(&["alice"]);
        assert_eq!(find_non_reciprocal(&following, &followers), logins(&["BOB"]));
    }

    #[test]
    fn empty_lists_yield_empty_diff() {
        assert!(find_non_reciprocal(&[], &logins(&["alice"])).is_empty());
        assert_eq!(
            find_non_reciprocal(&logins(&["alice"]), &[]),
            logins(&["alice"])
        );
    }

    #[derive(Default)]
    struct FakeService {
        unfollowed: Mutex<Vec<String>>,
        failures: AtomicU32,
        fail_logins: Vec<String>,
    }

    #[async_trait]
    impl FollowService for FakeService {
        async fn follow(&self, _login: &str) -> Result<(), CoreError> {
            Ok(())
        }

        async fn unfollow(&self, login: &str) -> Result<(), CoreError> {
            if self.fail_logins.iter().any(|l| l == login) {
                self.failures.fetch_add(1, Ordering::SeqCst);
                return Err(CoreError::GitHubApi(GitHubApiError::ServerError {
                    status_code: 500,
                }));
            }
            self.unfollowed.lock().unwrap().push(login.to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn audit_without_unfollow_only_reports() {
        let service = Arc::new(FakeService::default());
        let auditor = ReciprocityAuditor::new(service.clone(), DiffOptions::default());

        let report = auditor
            .run(logins(&["alice", "bob"]), logins(&["bob"]))
            .await
            .unwrap();

        assert_eq!(report.non_reciprocal, logins(&["alice"]));
        assert_eq!(report.unfollowed, 0);
        assert!(service.unfollowed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unfollow_respects_batch_cap() {
        let service = Arc::new(FakeService::default());
        let auditor = ReciprocityAuditor::new(
            service.clone(),
            DiffOptions {
                unfollow: true,
                max_unfollows: 2,
                ..DiffOptions::default()
            },
        );

        let report = auditor
            .run(logins(&["a", "b", "c", "d"]), vec![])
            .await
            .unwrap();

        assert_eq!(report.unfollowed, 2);
        assert_eq!(*service.unfollowed.lock().unwrap(), logins(&["a", "b"]));
    }

    #[tokio::test]
    async fn unfollow_failure_does_not_abort_batch() {
        let service = Arc::new(FakeService {
            fail_logins: logins(&["b"]),
            ..FakeService::default()
        });
        let auditor = ReciprocityAuditor::new(
            service.clone(),
            DiffOptions {
                unfollow: true,
                ..DiffOptions::default()
            },
        );

        let report = auditor
            .run(logins(&["a", "b", "c"]), vec![])
            .await
            .unwrap();

        assert_eq!(report.unfollowed, 2);
        assert_eq!(report.unfollow_failures, 1);
        assert_eq!(*service.unfollowed.lock().unwrap(), logins(&["a", "c"]));
    }

    #[tokio::test]
    async fn dry_run_counts_without_calling_the_api() {
        let service = Arc::new(FakeService::default());
        let auditor = ReciprocityAuditor::new(
            service.clone(),
            DiffOptions {
                unfollow: true,
                dry_run: true,
                ..DiffOptions::default()
            },
        );

        let report = auditor.run(logins(&["a", "b"]), vec![]).await.unwrap();
        assert_eq!(report.unfollowed, 2);
        assert!(service.unfollowed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn export_writes_csv() {
        let path = std::env::temp_dir().join(format!(
            "test_follower_sync_diff_{}.csv",
            uuid::Uuid::new_v4()
        ));
        let service = Arc::new(FakeService::default());
        let auditor = ReciprocityAuditor::new(
            service,
            DiffOptions {
                export_path: Some(path.clone()),
                ..DiffOptions::default()
            },
        );

        auditor
            .run(logins(&["alice", "bob"]), logins(&["bob"]))
            .await
            .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("alice"));
        assert!(!content.contains("bob"));
        std::fs::remove_file(&path).ok();
    }
}
