use async_trait::async_trait;
use github_client::{Event, GitHubApiClient, Repo, UserDetail};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use sync_core::{CoreError, ProcessingStrategy, UserProfile};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Read side of the GitHub API needed for enrichment. Split out so the
/// enricher can be driven by a fake in tests.
#[async_trait]
pub trait UserDataSource: Send + Sync {
    async fn get_user(&self, login: &str) -> Result<UserDetail, CoreError>;
    async fn list_repos(&self, login: &str) -> Result<Vec<Repo>, CoreError>;
    async fn list_public_events(&self, login: &str) -> Result<Vec<Event>, CoreError>;
}

#[async_trait]
impl UserDataSource for GitHubApiClient {
    async fn get_user(&self, login: &str) -> Result<UserDetail, CoreError> {
        GitHubApiClient::get_user(self, login).await
    }

    async fn list_repos(&self, login: &str) -> Result<Vec<Repo>, CoreError> {
        GitHubApiClient::list_repos(self, login).await
    }

    async fn list_public_events(&self, login: &str) -> Result<Vec<Event>, CoreError> {
        GitHubApiClient::list_public_events(self, login).await
    }
}

/// Builds a profile for one login, with the amount of auxiliary API work
/// governed by the strategy. Results are cached per login, so a user who
/// follows several target orgs is only enriched once per run.
pub struct ProfileEnricher<S: UserDataSource> {
    source: Arc<S>,
    strategy: ProcessingStrategy,
    cache: RwLock<HashMap<String, Arc<UserProfile>>>,
}

impl<S: UserDataSource> ProfileEnricher<S> {
    pub fn new(source: Arc<S>, strategy: ProcessingStrategy) -> Self {
        Self {
            source,
            strategy,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub async fn enrich(&self, login: &str) -> Result<Arc<UserProfile>, CoreError> {
        let cache_key = login.to_ascii_lowercase();
        if let Some(profile) = self.cache.read().await.get(&cache_key) {
            debug!("Cache hit for {}", login);
            return Ok(profile.clone());
        }

        let started = Instant::now();
        let mut profile = UserProfile::new(login);
        profile.enrichment_level = self.strategy;

        match self.strategy {
            ProcessingStrategy::Fast => {
                self.enrich_from_repos(&mut profile, login, false).await;
            }
            ProcessingStrategy::Balanced => {
                let detail = self.source.get_user(login).await?;
                apply_user_detail(&mut profile, detail);
                self.enrich_from_repos(&mut profile, login, false).await;
            }
            ProcessingStrategy::Comprehensive => {
                let detail = self.source.get_user(login).await?;
                apply_user_detail(&mut profile, detail);
                self.enrich_from_repos(&mut profile, login, true).await;
                if profile.email.is_none() {
                    self.mine_email(&mut profile, login).await;
                }
            }
        }

        profile.processing_time = started.elapsed();

        let profile = Arc::new(profile);
        self.cache
            .write()
            .await
            .insert(cache_key, profile.clone());
        Ok(profile)
    }

    pub async fn cached_count(&self) -> usize {
        self.cache.read().await.len()
    }

    /// Repo-derived fields. Repo listing failures degrade the profile with
    /// a warning instead of failing the user, except in fast mode where the
    /// repo list is the only data source.
    async fn enrich_from_repos(&self, profile: &mut UserProfile, login: &str, full_stats: bool) {
        let repos = match self.source.list_repos(login).await {
            Ok(repos) => repos,
            Err(e) => {
                warn!("Could not list repos for {}: {}", login, e);
                return;
            }
        };

        if profile.id.is_none() {
            // Fast mode never fetched the user object
            profile.public_repos = repos.len() as u32;
        }

        let own_repos: Vec<&Repo> = repos.iter().filter(|r| !r.fork).collect();

        let mut language_counts: HashMap<&str, u32> = HashMap::new();
        for repo in &own_repos {
            if let Some(language) = repo.language.as_deref() {
                *language_counts.entry(language).or_insert(0) += 1;
            }
        }

        profile.top_language = language_counts
            .iter()
            .max_by_key(|(language, count)| (**count, *language))
            .map(|(language, _)| language.to_string());

        if full_stats {
            let total_with_language: u32 = language_counts.values().sum();
            if total_with_language > 0 {
                profile.language_stats = language_counts
                    .iter()
                    .map(|(language, count)| {
                        (
                            language.to_string(),
                            *count as f64 / total_with_language as f64,
                        )
                    })
                    .collect();
            }
            profile.total_stars = own_repos.iter().map(|r| r.stargazers_count).sum();
            profile.total_forks = own_repos.iter().map(|r| r.forks_count).sum();
        }
    }

    /// Look for a usable author email in recent push events. Only real
    /// addresses count; noreply relay addresses are skipped.
    async fn mine_email(&self, profile: &mut UserProfile, login: &str) {
        let events = match self.source.list_public_events(login).await {
            Ok(events) => events,
            Err(e) => {
                warn!("Could not list events for {}: {}", login, e);
                return;
            }
        };

        for event in events {
            if event.event_type != "PushEvent" {
                continue;
            }
            let commits = match event.payload.and_then(|p| p.commits) {
                Some(commits) => commits,
                None => continue,
            };
            for commit in commits {
                if let Some(email) = commit.author.and_then(|a| a.email) {
                    if !email.ends_with("noreply.github.com") && email.contains('@') {
                        debug!("Mined email for {} from push events", login);
                        profile.email = Some(email);
                        return;
                    }
                }
            }
        }
    }
}

fn apply_user_detail(profile: &mut UserProfile, detail: UserDetail) {
    profile.id = Some(detail.id);
    profile.name = detail.name;
    profile.bio = detail.bio;
    profile.company = detail.company;
    profile.location = detail.location;
    profile.email = detail.email;
    profile.blog = detail.blog;
    profile.public_repos = detail.public_repos;
    profile.followers = detail.followers;
    profile.following = detail.following;
    profile.created_at = detail.created_at;
    if detail.avatar_url.is_some() {
        profile.avatar_url = detail.avatar_url;
    }
    if detail.html_url.is_some() {
        profile.profile_url = detail.html_url;
    }
}
