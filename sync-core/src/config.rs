use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::error::ConfigError;
use crate::types::ProcessingStrategy;

const RECOGNIZED_TOKEN_PREFIXES: &[&str] = &["ghp_", "github_pat_", "gho_", "ghu_"];

/// Rule parameters for the follow decision. Loaded once per run, read-only
/// while the pipeline is processing.
#[derive(Debug, Clone)]
pub struct FilterConfig {
    pub enabled: bool,
    pub allow_list: HashSet<String>,
    pub deny_list: HashSet<String>,
    /// None means no language rule at all.
    pub languages: Option<HashSet<String>>,
    pub min_repos: u32,
    pub max_repos: u32,
    pub min_followers: u32,
    pub max_followers: u32,
    pub min_following: u32,
    pub required_keywords: Vec<String>,
    pub exclude_keywords: Vec<String>,
    pub min_account_age_days: i64,
    pub delay_between_follows: Duration,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            allow_list: HashSet::new(),
            deny_list: HashSet::new(),
            languages: None,
            min_repos: 0,
            max_repos: u32::MAX,
            min_followers: 0,
            max_followers: u32::MAX,
            min_following: 0,
            required_keywords: Vec::new(),
            exclude_keywords: Vec::new(),
            min_account_age_days: 0,
            delay_between_follows: Duration::from_secs(1),
        }
    }
}

/// Run configuration, sourced from environment variables with an optional
/// TOML overlay file.
#[derive(Debug, Clone)]
pub struct Config {
    pub github_token: String,
    pub api_url: String,
    pub target_organizations: Vec<String>,
    pub max_workers: usize,
    pub strategy: ProcessingStrategy,
    pub output_file: PathBuf,
    pub request_timeout: Duration,
    pub retry_attempts: u32,
    pub dry_run: bool,
    pub max_follows_per_run: u32,
    pub stop_on_error_threshold: u64,
    pub follow: FilterConfig,
}

/// Optional values read from a TOML file; anything present overrides the
/// environment-sourced value.
#[derive(Debug, Default, Deserialize)]
pub struct ConfigOverlay {
    pub api_url: Option<String>,
    pub target_organizations: Option<Vec<String>>,
    pub max_workers: Option<usize>,
    pub strategy: Option<String>,
    pub output_file: Option<PathBuf>,
    pub max_follows_per_run: Option<u32>,
    pub dry_run: Option<bool>,
}

impl Config {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup. The environment variant delegates
    /// here; tests feed in a map.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let github_token =
            lookup("GITHUB_TOKEN").ok_or_else(|| ConfigError::MissingEnvironmentVariable {
                var_name: "GITHUB_TOKEN".to_string(),
            })?;

        let follow = FilterConfig {
            enabled: parse_bool(&lookup, "FOLLOW_ENABLED", false)?,
            allow_list: parse_list(&lookup, "FOLLOW_ALLOWLIST")?.into_iter().collect(),
            deny_list: parse_list(&lookup, "FOLLOW_DENYLIST")?.into_iter().collect(),
            languages: {
                let langs = parse_list(&lookup, "FOLLOW_LANGUAGES")?;
                if langs.is_empty() {
                    None
                } else {
                    Some(langs.into_iter().collect())
                }
            },
            min_repos: parse_number(&lookup, "FOLLOW_MIN_REPOS", 0)?,
            max_repos: parse_number(&lookup, "FOLLOW_MAX_REPOS", u32::MAX)?,
            min_followers: parse_number(&lookup, "FOLLOW_MIN_FOLLOWERS", 0)?,
            max_followers: parse_number(&lookup, "FOLLOW_MAX_FOLLOWERS", u32::MAX)?,
            min_following: parse_number(&lookup, "FOLLOW_MIN_FOLLOWING", 0)?,
            required_keywords: parse_list(&lookup, "FOLLOW_REQUIRED_KEYWORDS")?,
            exclude_keywords: parse_list(&lookup, "FOLLOW_EXCLUDE_KEYWORDS")?,
            min_account_age_days: parse_number(&lookup, "FOLLOW_MIN_ACCOUNT_AGE_DAYS", 0)?,
            delay_between_follows: {
                let secs = parse_number(&lookup, "FOLLOW_DELAY", 1.0_f64)?;
                // from_secs_f64 panics on negative or NaN input
                if !secs.is_finite() || secs < 0.0 {
                    return Err(ConfigError::InvalidValue {
                        field: "FOLLOW_DELAY".to_string(),
                        value: secs.to_string(),
                    });
                }
                Duration::from_secs_f64(secs)
            },
        };

        let strategy = lookup("PROCESSING_STRATEGY")
            .map(|s| s.parse::<ProcessingStrategy>())
            .transpose()?
            .unwrap_or_default();

        Ok(Self {
            github_token,
            api_url: lookup("GITHUB_API_URL")
                .unwrap_or_else(|| "https://api.github.com".to_string()),
            target_organizations: parse_list(&lookup, "TARGET_ORGANIZATIONS")?,
            max_workers: parse_number(&lookup, "MAX_WORKERS", 10_usize)?,
            strategy,
            output_file: lookup("OUTPUT_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("out/profiles.csv")),
            request_timeout: Duration::from_secs(parse_number(&lookup, "REQUEST_TIMEOUT", 30_u64)?),
            retry_attempts: parse_number(&lookup, "RETRY_ATTEMPTS", 3)?,
            dry_run: parse_bool(&lookup, "DRY_RUN", false)?,
            max_follows_per_run: parse_number(&lookup, "MAX_FOLLOWS_PER_RUN", 100)?,
            stop_on_error_threshold: parse_number(&lookup, "STOP_ON_ERROR_THRESHOLD", 10_u64)?,
            follow,
        })
    }

    /// Apply a TOML overlay file on top of the current values.
    pub fn apply_overlay_file(mut self, path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
            path: path.display().to_string(),
        })?;
        let overlay: ConfigOverlay = toml::from_str(&raw)?;

        if let Some(api_url) = overlay.api_url {
            self.api_url = api_url;
        }
        if let Some(orgs) = overlay.target_organizations {
            self.target_organizations = orgs;
        }
        if let Some(workers) = overlay.max_workers {
            self.max_workers = workers;
        }
        if let Some(strategy) = overlay.strategy {
            self.strategy = strategy.parse()?;
        }
        if let Some(output) = overlay.output_file {
            self.output_file = output;
        }
        if let Some(cap) = overlay.max_follows_per_run {
            self.max_follows_per_run = cap;
        }
        if let Some(dry_run) = overlay.dry_run {
            self.dry_run = dry_run;
        }
        Ok(self)
    }

    /// Startup validation. Fatal problems come back as errors, suspicious but
    /// workable settings only log a warning.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.github_token.is_empty() {
            return Err(ConfigError::MissingEnvironmentVariable {
                var_name: "GITHUB_TOKEN".to_string(),
            });
        }

        if !RECOGNIZED_TOKEN_PREFIXES
            .iter()
            .any(|p| self.github_token.starts_with(p))
        {
            warn!("GITHUB_TOKEN doesn't look like a GitHub token");
        }

        if self.max_workers < 1 {
            return Err(ConfigError::ValidationFailed {
                reason: "MAX_WORKERS must be at least 1".to_string(),
            });
        }
        if self.max_workers > 50 {
            warn!("MAX_WORKERS > 50 may cause rate limiting issues");
        }

        if self.request_timeout < Duration::from_secs(5) {
            return Err(ConfigError::ValidationFailed {
                reason: "REQUEST_TIMEOUT must be at least 5 seconds".to_string(),
            });
        }

        if self.target_organizations.is_empty() {
            return Err(ConfigError::ValidationFailed {
                reason: "TARGET_ORGANIZATIONS must name at least one organization".to_string(),
            });
        }

        if self.follow.enabled {
            if self.follow.min_repos > self.follow.max_repos {
                return Err(ConfigError::ValidationFailed {
                    reason: "FOLLOW_MIN_REPOS cannot be greater than FOLLOW_MAX_REPOS".to_string(),
                });
            }
            if self.follow.min_followers > self.follow.max_followers {
                return Err(ConfigError::ValidationFailed {
                    reason: "FOLLOW_MIN_FOLLOWERS cannot be greater than FOLLOW_MAX_FOLLOWERS"
                        .to_string(),
                });
            }
        }

        Ok(())
    }
}

fn parse_bool<F>(lookup: &F, key: &str, default: bool) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => match raw.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" | "" => Ok(false),
            _ => Err(ConfigError::InvalidValue {
                field: key.to_string(),
                value: raw,
            }),
        },
    }
}

fn parse_number<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
            field: key.to_string(),
            value: raw,
        }),
    }
}

/// Lists arrive either as a JSON array (`["a","b"]`) or comma-separated
/// (`a,b`). Empty input yields an empty list.
fn parse_list<F>(lookup: &F, key: &str) -> Result<Vec<String>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = match lookup(key) {
        None => return Ok(Vec::new()),
        Some(raw) => raw,
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    if trimmed.starts_with('[') {
        serde_json::from_str::<Vec<String>>(trimmed).map_err(|_| ConfigError::InvalidValue {
            field: key.to_string(),
            value: raw,
        })
    } else {
        Ok(trimmed
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect())
    }
}
