use crate::error::*;
use std::time::Duration;
use tracing::{error, warn};

pub trait ErrorExt {
    fn is_retryable(&self) -> bool;
    fn is_fatal(&self) -> bool;
    fn retry_after(&self) -> Option<Duration>;
    fn user_friendly_message(&self) -> String;
    fn error_code(&self) -> String;
}

impl ErrorExt for CoreError {
    fn is_retryable(&self) -> bool {
        match self {
            CoreError::GitHubApi(e) => e.is_retryable(),
            CoreError::Network(e) => e.is_timeout() || e.is_connect(),
            CoreError::Timeout { .. } => true,
            _ => false,
        }
    }

    fn is_fatal(&self) -> bool {
        matches!(
            self,
            CoreError::GitHubApi(GitHubApiError::InvalidToken)
                | CoreError::GitHubApi(GitHubApiError::AuthenticationFailed { .. })
                | CoreError::Config(_)
        )
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            CoreError::GitHubApi(GitHubApiError::RateLimitExceeded { retry_after }) => {
                Some(Duration::from_secs(*retry_after))
            }
            CoreError::Timeout { seconds } => Some(Duration::from_secs(*seconds)),
            _ if self.is_retryable() => Some(Duration::from_secs(5)), // Default retry delay
            _ => None,
        }
    }

    fn user_friendly_message(&self) -> String {
        match self {
            CoreError::GitHubApi(e) => e.user_friendly_message(),
            CoreError::Config(e) => e.user_friendly_message(),
            CoreError::Storage(StorageError::UnsupportedFormat { extension }) => {
                format!("Output format '{extension}' is not supported. Use .csv, .json or .jsonl.")
            }
            CoreError::Storage(_) => {
                "Could not read or write the output file. Check the path and permissions."
                    .to_string()
            }
            CoreError::Network(_) => {
                "Network connection error. Please check your internet connection.".to_string()
            }
            CoreError::Timeout { .. } => {
                "The operation took too long to complete. Please try again.".to_string()
            }
            CoreError::Pipeline(PipelineError::ErrorThresholdExceeded { failures, .. }) => {
                format!("Run stopped early after {failures} failures. Partial output was kept.")
            }
            CoreError::InvalidInput { .. } => {
                "Invalid input provided. Please check your input and try again.".to_string()
            }
            _ => "An unexpected error occurred. Please try again later.".to_string(),
        }
    }

    fn error_code(&self) -> String {
        match self {
            CoreError::GitHubApi(_) => "GITHUB_API".to_string(),
            CoreError::Storage(_) => "STORAGE".to_string(),
            CoreError::Config(_) => "CONFIG".to_string(),
            CoreError::Pipeline(_) => "PIPELINE".to_string(),
            CoreError::Io(_) => "IO".to_string(),
            CoreError::Serialization(_) => "SERIALIZATION".to_string(),
            CoreError::Network(_) => "NETWORK".to_string(),
            CoreError::InvalidInput { .. } => "INVALID_INPUT".to_string(),
            CoreError::Timeout { .. } => "TIMEOUT".to_string(),
            CoreError::Internal { .. } => "INTERNAL".to_string(),
        }
    }
}

impl GitHubApiError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GitHubApiError::RateLimitExceeded { .. }
                | GitHubApiError::RequestTimeout
                | GitHubApiError::ServerError { .. }
                | GitHubApiError::InvalidResponse { .. }
        )
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            GitHubApiError::AuthenticationFailed { .. } | GitHubApiError::InvalidToken => {
                "Your GitHub authentication token is invalid or expired. Generate a new one at \
                 https://github.com/settings/tokens."
                    .to_string()
            }
            GitHubApiError::RateLimitExceeded { retry_after } => {
                format!("GitHub rate limit reached. Waiting {retry_after} seconds before retrying.")
            }
            GitHubApiError::Forbidden { resource } => {
                format!("Access to '{resource}' is forbidden. Your token may lack a scope.")
            }
            GitHubApiError::UserNotFound { login } => {
                format!("GitHub user '{login}' does not exist.")
            }
            GitHubApiError::RequestTimeout => "The GitHub API request timed out.".to_string(),
            GitHubApiError::ServerError { status_code } => {
                format!("GitHub returned a server error ({status_code}). Retrying usually helps.")
            }
            GitHubApiError::InvalidResponse { details } => {
                format!("GitHub returned an unexpected response: {details}")
            }
        }
    }
}

impl ConfigError {
    pub fn user_friendly_message(&self) -> String {
        match self {
            ConfigError::MissingEnvironmentVariable { var_name } => {
                format!("Required environment variable {var_name} is not set.")
            }
            ConfigError::InvalidValue { field, value } => {
                format!("Configuration value '{value}' is not valid for {field}.")
            }
            ConfigError::ValidationFailed { reason } => {
                format!("Configuration validation failed: {reason}")
            }
            ConfigError::FileNotFound { path } => {
                format!("Configuration file not found: {path}")
            }
            ConfigError::Parse(_) => "Configuration file could not be parsed.".to_string(),
        }
    }
}

/// Reports errors and warnings through tracing, with per-level switches so
/// callers can mute one channel without losing the other.
#[derive(Debug, Default)]
pub struct ErrorReporter {
    report_errors: bool,
    report_warnings: bool,
}

impl ErrorReporter {
    pub fn new() -> Self {
        Self {
            report_errors: true,
            report_warnings: false,
        }
    }

    pub fn with_error_reporting(mut self, enabled: bool) -> Self {
        self.report_errors = enabled;
        self
    }

    pub fn with_warning_reporting(mut self, enabled: bool) -> Self {
        self.report_warnings = enabled;
        self
    }

    pub fn report_error(&self, error: &CoreError) {
        if self.report_errors {
            error!(code = %error.error_code(), "{}", error.user_friendly_message());
        }
    }

    pub fn report_warning(&self, error: &CoreError) {
        if self.report_warnings {
            warn!(code = %error.error_code(), "{}", error.user_friendly_message());
        }
    }
}
