use crate::metrics::{MetricsCollector, RequestMetrics};
use crate::rate_limiter::{RateLimitConfig, RateLimiter};
use crate::retry::{RetryConfig, RetryExecutor};
use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use reqwest::{Client, Method, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use sync_core::{CoreError, GitHubApiError};
use tracing::{debug, error, info, warn};

const DEFAULT_API_BASE: &str = "https://api.github.com";
const API_VERSION: &str = "2022-11-28";
const PER_PAGE: u32 = 100;

/// A user as it appears in list endpoints (followers, following).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub login: String,
    pub id: u64,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub html_url: Option<String>,
    #[serde(rename = "type", default)]
    pub account_type: Option<String>,
}

/// The full user object from `/users/{login}` or `/user`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserDetail {
    pub login: String,
    pub id: u64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub blog: Option<String>,
    #[serde(default)]
    pub public_repos: u32,
    #[serde(default)]
    pub followers: u32,
    #[serde(default)]
    pub following: u32,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub html_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repo {
    pub name: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub stargazers_count: u64,
    #[serde(default)]
    pub forks_count: u64,
    #[serde(default)]
    pub fork: bool,
    #[serde(default)]
    pub size: u64,
}

/// A public event from `/users/{login}/events/public`. Only push events
/// carry commits, so the payload fields are all optional.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub payload: Option<EventPayload>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventPayload {
    #[serde(default)]
    pub commits: Option<Vec<EventCommit>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventCommit {
    #[serde(default)]
    pub author: Option<CommitAuthor>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitAuthor {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

/// Core quota snapshot from `/rate_limit`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSnapshot {
    pub limit: u32,
    pub remaining: u32,
    pub reset: i64,
    #[serde(default)]
    pub used: u32,
}

#[derive(Debug, Clone, Deserialize)]
struct RateLimitResponse {
    resources: RateLimitResources,
}

#[derive(Debug, Clone, Deserialize)]
struct RateLimitResources {
    core: RateLimitSnapshot,
}

/// Map a non-success status (plus the quota headers) to a typed error.
/// A 403 with zero remaining quota is a rate limit in disguise, so it is
/// classified using the reset header rather than as a permission error.
pub fn classify_status(
    status: StatusCode,
    endpoint: &str,
    remaining: Option<u32>,
    reset_at_epoch: Option<i64>,
    retry_after: Option<u64>,
) -> GitHubApiError {
    match status.as_u16() {
        401 => GitHubApiError::InvalidToken,
        403 => {
            if remaining == Some(0) {
                let delta = reset_at_epoch
                    .map(|reset| (reset - Utc::now().timestamp()).max(1) as u64)
                    .unwrap_or(60);
                GitHubApiError::RateLimitExceeded { retry_after: delta }
            } else {
                GitHubApiError::Forbidden {
                    resource: endpoint.to_string(),
                }
            }
        }
        404 => GitHubApiError::UserNotFound {
            login: login_from_endpoint(endpoint),
        },
        429 => GitHubApiError::RateLimitExceeded {
            retry_after: retry_after.unwrap_or(60),
        },
        s if status.is_server_error() => GitHubApiError::ServerError { status_code: s },
        _ => GitHubApiError::InvalidResponse {
            details: format!("Unexpected status {} for {}", status, endpoint),
        },
    }
}

/// The login a user-scoped endpoint refers to. `/users/{login}/repos`
/// names the user, not the trailing `repos` segment.
fn login_from_endpoint(endpoint: &str) -> String {
    let mut segments = endpoint.split('/').filter(|s| !s.is_empty());
    while let Some(segment) = segments.next() {
        if segment == "users" || segment == "following" {
            if let Some(login) = segments.next() {
                return login.to_string();
            }
        }
    }
    endpoint.rsplit('/').next().unwrap_or(endpoint).to_string()
}

fn header_u32(headers: &HeaderMap, name: &str) -> Option<u32> {
    headers.get(name)?.to_str().ok()?.parse().ok()
}

fn header_i64(headers: &HeaderMap, name: &str) -> Option<i64> {
    headers.get(name)?.to_str().ok()?.parse().ok()
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers.get(name)?.to_str().ok()?.parse().ok()
}

#[derive(Debug)]
pub struct GitHubApiClient {
    http_client: Client,
    base_url: String,
    token: String,
    rate_limiter: Arc<RateLimiter>,
    metrics: Arc<MetricsCollector>,
    retry: RetryExecutor,
}

impl GitHubApiClient {
    pub fn new(token: String, timeout: Duration, retry_attempts: u32) -> Result<Self, CoreError> {
        Self::with_base_url(DEFAULT_API_BASE.to_string(), token, timeout, retry_attempts)
    }

    pub fn with_base_url(
        base_url: String,
        token: String,
        timeout: Duration,
        retry_attempts: u32,
    ) -> Result<Self, CoreError> {
        let rate_limiter = Arc::new(RateLimiter::new(RateLimitConfig::github_core()));
        let metrics = Arc::new(MetricsCollector::new());
        let retry = RetryExecutor::new(RetryConfig::github(retry_attempts));

        let http_client = Client::builder()
            .user_agent(concat!("follower-sync/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(CoreError::Network)?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            rate_limiter,
            metrics,
            retry,
        })
    }

    async fn make_request(
        &self,
        method: Method,
        endpoint: &str,
        query_params: Option<&[(&str, &str)]>,
    ) -> Result<Response, CoreError> {
        let url = format!("{}{}", self.base_url, endpoint);
        let start_time = Instant::now();
        let mut success = false;
        let mut status_code = None;
        let mut error_type = None;
        let mut rate_limited = false;

        let _permit = self.rate_limiter.acquire_permit().await;
        debug!("Acquired rate limit permit for {} {}", method, endpoint);

        let mut request_builder = self
            .http_client
            .request(method.clone(), &url)
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION);

        if let Some(params) = query_params {
            request_builder = request_builder.query(params);
        }

        debug!("GitHub API request: {} {}", method, endpoint);
        let result = match request_builder.send().await {
            Ok(response) => {
                let status = response.status();
                status_code = Some(status.as_u16());

                let headers = response.headers();
                let remaining = header_u32(headers, "x-ratelimit-remaining");
                let reset_at = header_i64(headers, "x-ratelimit-reset");
                let retry_after = header_u64(headers, "retry-after");
                self.rate_limiter.observe_headers(remaining, reset_at).await;

                if status.is_success() {
                    success = true;
                    debug!("Request successful: {} {}", status, endpoint);
                    Ok(response)
                } else {
                    let api_error =
                        classify_status(status, endpoint, remaining, reset_at, retry_after);
                    if matches!(api_error, GitHubApiError::RateLimitExceeded { .. }) {
                        rate_limited = true;
                        warn!("Rate limited on {}: {}", endpoint, api_error);
                    } else {
                        error!("Request failed with status {} for {}", status, endpoint);
                    }
                    error_type = Some(api_error.to_string());
                    Err(CoreError::GitHubApi(api_error))
                }
            }
            Err(e) => {
                error!("Network error for {} {}: {}", method, endpoint, e);
                error_type = Some("network_error".to_string());

                if e.is_timeout() {
                    Err(CoreError::GitHubApi(GitHubApiError::RequestTimeout))
                } else {
                    Err(CoreError::Network(e))
                }
            }
        };

        let request_metrics = RequestMetrics {
            endpoint: endpoint.to_string(),
            method: method.to_string(),
            status_code,
            response_time: start_time.elapsed(),
            success,
            rate_limited,
            error_type,
        };
        self.metrics.record_request(request_metrics).await;

        result
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        operation_name: &str,
        endpoint: &str,
        query_params: Option<&[(&str, &str)]>,
    ) -> Result<T, CoreError> {
        self.retry
            .execute(operation_name, move || async move {
                let response = self
                    .make_request(Method::GET, endpoint, query_params)
                    .await?;
                response.json::<T>().await.map_err(|e| {
                    error!("Failed to parse response from {}: {}", endpoint, e);
                    CoreError::GitHubApi(GitHubApiError::InvalidResponse {
                        details: format!("Failed to parse response from {}", endpoint),
                    })
                })
            })
            .await
    }

    /// Fetch every page of a list endpoint. Pages are requested in order
    /// until one comes back shorter than the page size.
    async fn get_paginated<T: serde::de::DeserializeOwned>(
        &self,
        operation_name: &str,
        endpoint: &str,
    ) -> Result<Vec<T>, CoreError> {
        let mut items = Vec::new();
        let mut page: u32 = 1;
        let per_page = PER_PAGE.to_string();

        loop {
            let page_str = page.to_string();
            let params = [("per_page", per_page.as_str()), ("page", page_str.as_str())];
            let batch: Vec<T> = self
                .get_json(operation_name, endpoint, Some(&params))
                .await?;

            let batch_len = batch.len();
            items.extend(batch);

            if batch_len < PER_PAGE as usize {
                break;
            }
            page += 1;
        }

        debug!("Fetched {} items from {}", items.len(), endpoint);
        Ok(items)
    }

    /// The user the token belongs to. Also serves as a token check.
    pub async fn get_authenticated_user(&self) -> Result<UserDetail, CoreError> {
        self.get_json("get_authenticated_user", "/user", None).await
    }

    pub async fn get_user(&self, login: &str) -> Result<UserDetail, CoreError> {
        let endpoint = format!("/users/{}", login);
        self.get_json("get_user", &endpoint, None).await
    }

    /// All followers of `login`, across every page.
    pub async fn list_followers(&self, login: &str) -> Result<Vec<Account>, CoreError> {
        let endpoint = format!("/users/{}/followers", login);
        let followers = self.get_paginated("list_followers", &endpoint).await?;
        info!("Retrieved {} followers of {}", followers.len(), login);
        Ok(followers)
    }

    /// Everyone the authenticated user follows, across every page.
    pub async fn list_following(&self) -> Result<Vec<Account>, CoreError> {
        let following = self
            .get_paginated("list_following", "/user/following")
            .await?;
        info!("Authenticated user follows {} accounts", following.len());
        Ok(following)
    }

    pub async fn list_repos(&self, login: &str) -> Result<Vec<Repo>, CoreError> {
        let endpoint = format!("/users/{}/repos", login);
        self.get_paginated("list_repos", &endpoint).await
    }

    /// One page of recent public activity, newest first.
    pub async fn list_public_events(&self, login: &str) -> Result<Vec<Event>, CoreError> {
        let endpoint = format!("/users/{}/events/public", login);
        let per_page = PER_PAGE.to_string();
        let params = [("per_page", per_page.as_str())];
        self.get_json("list_public_events", &endpoint, Some(&params))
            .await
    }

    /// Follow a user. GitHub answers 204 on success, including when the
    /// user was already followed.
    pub async fn follow(&self, login: &str) -> Result<(), CoreError> {
        let endpoint = format!("/user/following/{}", login);
        let endpoint = endpoint.as_str();
        self.retry
            .execute("follow", move || async move {
                let response = self.make_request(Method::PUT, endpoint, None).await?;
                if response.status() == StatusCode::NO_CONTENT {
                    Ok(())
                } else {
                    Err(CoreError::GitHubApi(GitHubApiError::InvalidResponse {
                        details: format!(
                            "Unexpected status {} when following {}",
                            response.status(),
                            login
                        ),
                    }))
                }
            })
            .await?;
        info!("Followed {}", login);
        Ok(())
    }

    pub async fn unfollow(&self, login: &str) -> Result<(), CoreError> {
        let endpoint = format!("/user/following/{}", login);
        let endpoint = endpoint.as_str();
        self.retry
            .execute("unfollow", move || async move {
                let response = self.make_request(Method::DELETE, endpoint, None).await?;
                if response.status() == StatusCode::NO_CONTENT {
                    Ok(())
                } else {
                    Err(CoreError::GitHubApi(GitHubApiError::InvalidResponse {
                        details: format!(
                            "Unexpected status {} when unfollowing {}",
                            response.status(),
                            login
                        ),
                    }))
                }
            })
            .await?;
        info!("Unfollowed {}", login);
        Ok(())
    }

    /// Current core quota from `/rate_limit`. This endpoint does not count
    /// against the quota itself.
    pub async fn rate_limit(&self) -> Result<RateLimitSnapshot, CoreError> {
        let response: RateLimitResponse = self.get_json("rate_limit", "/rate_limit", None).await?;
        Ok(response.resources.core)
    }

    pub async fn get_metrics(&self) -> crate::metrics::ApiMetrics {
        self.metrics.get_metrics().await
    }

    pub async fn get_rate_limit_status(&self) -> crate::rate_limiter::RateLimitStatus {
        self.rate_limiter.get_status().await
    }

    pub async fn reset_metrics(&self) {
        self.metrics.reset_metrics().await;
    }
}
