use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Enrichment depth: controls how many auxiliary API calls are made per user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStrategy {
    /// Top language only, maximum speed.
    Fast,
    /// User detail plus top language.
    Balanced,
    /// Full enrichment: language distribution, star/fork totals, email mining.
    Comprehensive,
}

impl Default for ProcessingStrategy {
    fn default() -> Self {
        ProcessingStrategy::Balanced
    }
}

impl FromStr for ProcessingStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fast" => Ok(ProcessingStrategy::Fast),
            "balanced" => Ok(ProcessingStrategy::Balanced),
            "comprehensive" => Ok(ProcessingStrategy::Comprehensive),
            other => Err(ConfigError::InvalidValue {
                field: "PROCESSING_STRATEGY".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for ProcessingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProcessingStrategy::Fast => "fast",
            ProcessingStrategy::Balanced => "balanced",
            ProcessingStrategy::Comprehensive => "comprehensive",
        };
        f.write_str(s)
    }
}

/// Outcome of the follow decision for one user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowDecision {
    Follow,
    Skip,
    AlreadyFollowing,
}

/// Enriched user profile. Built once by the enricher, then read-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub login: String,
    pub id: Option<u64>,

    // Basic info
    pub name: Option<String>,
    pub bio: Option<String>,
    pub company: Option<String>,
    pub location: Option<String>,
    pub email: Option<String>,
    pub blog: Option<String>,

    // Statistics
    pub public_repos: u32,
    pub followers: u32,
    pub following: u32,

    // Technical
    pub top_language: Option<String>,
    pub language_stats: HashMap<String, f64>,

    // Contribution stats
    pub total_stars: u64,
    pub total_forks: u64,

    // Metadata
    pub created_at: Option<DateTime<Utc>>,
    pub profile_url: Option<String>,
    pub avatar_url: Option<String>,

    // Processing metadata
    pub enrichment_level: ProcessingStrategy,
    #[serde(with = "duration_secs")]
    pub processing_time: Duration,
}

impl UserProfile {
    pub fn new(login: impl Into<String>) -> Self {
        let login = login.into();
        Self {
            profile_url: Some(format!("https://github.com/{login}")),
            login,
            id: None,
            name: None,
            bio: None,
            company: None,
            location: None,
            email: None,
            blog: None,
            public_repos: 0,
            followers: 0,
            following: 0,
            top_language: None,
            language_stats: HashMap::new(),
            total_stars: 0,
            total_forks: 0,
            created_at: None,
            avatar_url: None,
            enrichment_level: ProcessingStrategy::Fast,
            processing_time: Duration::ZERO,
        }
    }

    /// Whole days since account creation, or None when the creation date is
    /// unknown (degraded profile).
    pub fn account_age_days(&self, now: DateTime<Utc>) -> Option<i64> {
        self.created_at
            .map(|created| (now - created).num_days())
    }

    /// Flattened row for the output file. Bio is capped at 200 characters,
    /// matching the output column contract.
    pub fn to_record(&self) -> ProfileRecord {
        ProfileRecord {
            id: self.id,
            login: self.login.clone(),
            name: self.name.clone(),
            bio: self
                .bio
                .as_deref()
                .map(|b| b.chars().take(200).collect())
                .unwrap_or_default(),
            company: self.company.clone(),
            location: self.location.clone(),
            email: self.email.clone(),
            blog: self.blog.clone(),
            public_repos: self.public_repos,
            followers: self.followers,
            following: self.following,
            top_language: self.top_language.clone(),
            total_stars: self.total_stars,
            total_forks: self.total_forks,
            url: self.profile_url.clone(),
            created_at: self.created_at.map(|t| t.to_rfc3339()),
            enrichment_level: self.enrichment_level.to_string(),
            processing_time: format!("{:.2}s", self.processing_time.as_secs_f64()),
        }
    }
}

/// One persisted row: the fixed column set of the output file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileRecord {
    pub id: Option<u64>,
    pub login: String,
    pub name: Option<String>,
    pub bio: String,
    pub company: Option<String>,
    pub location: Option<String>,
    pub email: Option<String>,
    pub blog: Option<String>,
    pub public_repos: u32,
    pub followers: u32,
    pub following: u32,
    pub top_language: Option<String>,
    pub total_stars: u64,
    pub total_forks: u64,
    pub url: Option<String>,
    pub created_at: Option<String>,
    pub enrichment_level: String,
    pub processing_time: String,
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        d.as_secs_f64().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Ok(Duration::from_secs_f64(secs.max(0.0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn strategy_parses_case_insensitively() {
        assert_eq!(
            "COMPREHENSIVE".parse::<ProcessingStrategy>().unwrap(),
            ProcessingStrategy::Comprehensive
        );
        assert!("turbo".parse::<ProcessingStrategy>().is_err());
    }

    #[test]
    fn account_age_uses_whole_days() {
        let mut profile = UserProfile::new("octocat");
        profile.created_at = Some(Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap());
        let now = Utc.with_ymd_and_hms(2024, 1, 31, 11, 0, 0).unwrap();
        assert_eq!(profile.account_age_days(now), Some(29));
    }

    #[test]
    fn record_truncates_long_bios() {
        let mut profile = UserProfile::new("octocat");
        profile.bio = Some("x".repeat(500));
        let record = profile.to_record();
        assert_eq!(record.bio.chars().count(), 200);
    }

    #[test]
    fn record_carries_profile_url() {
        let profile = UserProfile::new("octocat");
        let record = profile.to_record();
        assert_eq!(record.url.as_deref(), Some("https://github.com/octocat"));
    }
}
