use chrono::{DateTime, Utc};
use sync_core::{FilterConfig, UserProfile};
use tracing::debug;

/// Outcome of evaluating one profile against the follow rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub accepted: bool,
    pub reason: String,
}

impl Verdict {
    fn accept(reason: impl Into<String>) -> Self {
        Self {
            accepted: true,
            reason: reason.into(),
        }
    }

    fn reject(reason: impl Into<String>) -> Self {
        Self {
            accepted: false,
            reason: reason.into(),
        }
    }
}

/// A custom rule plugged into the filter. Runs after the built-in rules,
/// so it can only narrow the result, never override a rejection.
pub trait FilterPredicate: Send + Sync {
    fn name(&self) -> &str;
    /// True when the profile passes this rule.
    fn evaluate(&self, profile: &UserProfile) -> bool;
}

/// Pure rule evaluator. Rules run in a fixed order and the first failing
/// rule decides the verdict, so the same profile and config always produce
/// the same answer.
pub struct FollowFilter {
    config: FilterConfig,
    predicates: Vec<Box<dyn FilterPredicate>>,
}

impl FollowFilter {
    pub fn new(config: FilterConfig) -> Self {
        Self {
            config,
            predicates: Vec::new(),
        }
    }

    pub fn with_predicate(mut self, predicate: Box<dyn FilterPredicate>) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn evaluate(&self, profile: &UserProfile) -> Verdict {
        self.evaluate_at(profile, Utc::now())
    }

    /// Evaluate with an explicit clock, so account-age rules are testable.
    pub fn evaluate_at(&self, profile: &UserProfile, now: DateTime<Utc>) -> Verdict {
        let login_lower = profile.login.to_ascii_lowercase();

        if self
            .config
            .deny_list
            .iter()
            .any(|l| l.eq_ignore_ascii_case(&login_lower))
        {
            return Verdict::reject("deny list");
        }

        // Allow-listed logins bypass every remaining rule
        if self
            .config
            .allow_list
            .iter()
            .any(|l| l.eq_ignore_ascii_case(&login_lower))
        {
            return Verdict::accept("allow list");
        }

        if profile.public_repos < self.config.min_repos {
            return Verdict::reject(format!(
                "too few repos: {} < {}",
                profile.public_repos, self.config.min_repos
            ));
        }
        if profile.public_repos > self.config.max_repos {
            return Verdict::reject(format!(
                "too many repos: {} > {}",
                profile.public_repos, self.config.max_repos
            ));
        }

        if profile.followers < self.config.min_followers {
            return Verdict::reject(format!(
                "too few followers: {} < {}",
                profile.followers, self.config.min_followers
            ));
        }
        if profile.followers > self.config.max_followers {
            return Verdict::reject(format!(
                "too many followers: {} > {}",
                profile.followers, self.config.max_followers
            ));
        }

        if profile.following < self.config.min_following {
            return Verdict::reject(format!(
                "follows too few accounts: {} < {}",
                profile.following, self.config.min_following
            ));
        }

        if let Some(languages) = &self.config.languages {
            let matches = profile
                .top_language
                .as_deref()
                .map(|lang| languages.iter().any(|l| l.eq_ignore_ascii_case(lang)))
                .unwrap_or(false);
            if !matches {
                return Verdict::reject(format!(
                    "language mismatch: {}",
                    profile.top_language.as_deref().unwrap_or("unknown")
                ));
            }
        }

        let haystack = Self::profile_text(profile);

        if !self.config.required_keywords.is_empty() {
            let found = self
                .config
                .required_keywords
                .iter()
                .any(|kw| haystack.contains(&kw.to_ascii_lowercase()));
            if !found {
                return Verdict::reject("missing required keywords");
            }
        }

        for keyword in &self.config.exclude_keywords {
            if haystack.contains(&keyword.to_ascii_lowercase()) {
                return Verdict::reject(format!("excluded keyword: {keyword}"));
            }
        }

        if self.config.min_account_age_days > 0 {
            match profile.account_age_days(now) {
                Some(age) if age >= self.config.min_account_age_days => {}
                Some(age) => {
                    return Verdict::reject(format!(
                        "account too new: {} days < {}",
                        age, self.config.min_account_age_days
                    ));
                }
                // Unknown creation date fails a configured age rule
                None => return Verdict::reject("account age unknown"),
            }
        }

        for predicate in &self.predicates {
            if !predicate.evaluate(profile) {
                debug!(
                    "Profile {} rejected by predicate {}",
                    profile.login,
                    predicate.name()
                );
                return Verdict::reject(format!("predicate failed: {}", predicate.name()));
            }
        }

        Verdict::accept("all rules passed")
    }

    fn profile_text(profile: &UserProfile) -> String {
        [
            profile.bio.as_deref(),
            profile.name.as_deref(),
            profile.company.as_deref(),
            profile.location.as_deref(),
        ]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_lowercase()
    }
}
