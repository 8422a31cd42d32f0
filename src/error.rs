/// vauban error types and handling utilities
use std::time::Duration;
use thiserror::Error;

/// Main error type for vauban operations
#[derive(Debug, Error)]
pub enum VaubanError {
    /// Image definitions violate a structural invariant
    #[error("Structural configuration error at {path}: {reason}")]
    StructuralConfig { path: String, reason: String },
    #[error("Cannot read configuration {path}: {source}")]
    ConfigRead {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Cannot parse configuration: {0}")]
    ConfigParse(#[from] serde_yaml::Error),
    /// Requested image is not defined
    #[error("Image {name} not found in configuration")]
    NotFound { name: String },
    /// The conffs stage was requested on an image without a conffs host
    #[error("No conffs key in {name}. Nothing to be done")]
    NothingToDo { name: String },
    /// The external builder exited with a failure status
    #[error("Builder failed for {image} ({stage}) with exit code {}", .code.map_or("none".to_string(), |c| c.to_string()))]
    ExternalBuilder {
        image: String,
        stage: String,
        code: Option<i32>,
    },
    #[error("Cannot start builder {program}: {source}")]
    BuilderSpawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Installation medium for {release} not found")]
    MediaNotFound { release: String },
    /// Downloaded or cached medium does not match the published checksum
    #[error("Integrity failure for {file}: expected {expected}, got {actual}")]
    MediaIntegrity {
        file: String,
        expected: String,
        actual: String,
    },
    #[error("Download of {url} failed: {reason}")]
    Download { url: String, reason: String },
    /// Platform errors that survived the local retry budget
    #[error("Transient platform error during {operation} after {attempts} attempts: {message}")]
    TransientPlatform {
        operation: String,
        attempts: u32,
        message: String,
    },
    #[error("Platform error during {operation}: {message}")]
    Platform { operation: String, message: String },
    #[error("Job {job_id} not found")]
    JobNotFound { job_id: String },
    #[error("Notification error: {0}")]
    Notification(String),
    /// The platform reported a status combination we do not know
    #[error("Job {job_id} in an unknown state: {status}")]
    UnknownJobState { job_id: String, status: String },
    #[error("{operation} timed out after {}s", .timeout.as_secs())]
    TimedOut { operation: String, timeout: Duration },
}

impl VaubanError {
    pub fn structural(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::StructuralConfig {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn is_nothing_to_do(&self) -> bool {
        matches!(self, Self::NothingToDo { .. })
    }
}

/// Helper to determine if an error is retryable
pub fn is_retryable(err: &VaubanError) -> bool {
    match err {
        VaubanError::TransientPlatform { .. } => true,
        VaubanError::Download { .. } => true,
        VaubanError::Notification(_) => true,
        VaubanError::TimedOut { .. } => true,
        VaubanError::StructuralConfig { .. }
        | VaubanError::ConfigRead { .. }
        | VaubanError::ConfigParse(_)
        | VaubanError::NotFound { .. }
        | VaubanError::NothingToDo { .. }
        | VaubanError::ExternalBuilder { .. }
        | VaubanError::BuilderSpawn { .. }
        | VaubanError::MediaNotFound { .. }
        | VaubanError::MediaIntegrity { .. }
        | VaubanError::Platform { .. }
        | VaubanError::JobNotFound { .. }
        | VaubanError::UnknownJobState { .. } => false,
    }
}

/// Retry configuration for bounded, fixed-backoff operations
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl RetryConfig {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: crate::constants::JOB_CREATE_ATTEMPTS,
            backoff: Duration::from_millis(crate::constants::PLATFORM_RETRY_BACKOFF_MS),
        }
    }
}
