use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("GitHub API error: {0}")]
    GitHubApi(#[from] GitHubApiError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Operation timeout after {seconds} seconds")]
    Timeout { seconds: u64 },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

#[derive(Error, Debug, Clone)]
pub enum GitHubApiError {
    #[error("Authentication failed: {reason}")]
    AuthenticationFailed { reason: String },

    #[error("Invalid or expired access token")]
    InvalidToken,

    #[error("Rate limit exceeded. Retry after {retry_after} seconds")]
    RateLimitExceeded { retry_after: u64 },

    #[error("Forbidden access to resource: {resource}")]
    Forbidden { resource: String },

    #[error("User not found: {login}")]
    UserNotFound { login: String },

    #[error("Request timeout")]
    RequestTimeout,

    #[error("Server error: {status_code}")]
    ServerError { status_code: u16 },

    #[error("Invalid API response: {details}")]
    InvalidResponse { details: String },
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Unsupported output format: {extension}")]
    UnsupportedFormat { extension: String },

    #[error("Output file not found: {path}")]
    FileNotFound { path: String },

    #[error("Corrupt record data: {details}")]
    CorruptData { details: String },

    #[error("Flush failed: {path}")]
    FlushFailed { path: String },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Environment variable not set: {var_name}")]
    MissingEnvironmentVariable { var_name: String },

    #[error("Invalid value for {field}: {value}")]
    InvalidValue { field: String, value: String },

    #[error("Configuration validation failed: {reason}")]
    ValidationFailed { reason: String },

    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("Configuration parsing error: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Error, Debug, Clone)]
pub enum PipelineError {
    #[error("Error threshold exceeded: {failures} failures (limit {threshold})")]
    ErrorThresholdExceeded { failures: u64, threshold: u64 },

    #[error("Follower record missing login field")]
    MissingLogin,

    #[error("Run aborted: {reason}")]
    Aborted { reason: String },
}
