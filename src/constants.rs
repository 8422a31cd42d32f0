// Centralized constants for vauban to avoid magic numbers

/// Default external builder program
pub const DEFAULT_BUILDER: &str = "./vauban.sh";

/// Default directory holding base installation media
pub const DEFAULT_ISO_DIR: &str = "/srv/iso";

/// Branch used when neither the request nor the image definition sets one
pub const DEFAULT_BRANCH: &str = "master";

/// Branch value left in templates; treated as "no branch given"
pub const PLACEHOLDER_BRANCH: &str = "ansible-branch-name-here";

/// Attempts to create a remote job before reporting failure
pub const JOB_CREATE_ATTEMPTS: u32 = 10;

/// Attempts to observe a freshly created job before giving up
pub const JOB_VISIBILITY_ATTEMPTS: u32 = 100;

/// Non-"not found" errors tolerated while waiting for job visibility
pub const JOB_VISIBILITY_MAX_ERRORS: u32 = 3;

/// Attempts to read a job's status on transient errors
pub const JOB_STATUS_ATTEMPTS: u32 = 10;

/// Fixed sleep between platform retries in milliseconds
pub const PLATFORM_RETRY_BACKOFF_MS: u64 = 200;

/// Log lines fetched per pod
pub const POD_LOG_TAIL_LINES: i64 = 150;

/// Log lines rendered in a notification
pub const NOTIFICATION_LOG_LINES: usize = 5;

/// Attempts for decision-critical notification updates under throttling
pub const NOTIFICATION_RETRY_ATTEMPTS: u32 = 5;

/// Fixed sleep between notification retries in milliseconds
pub const NOTIFICATION_RETRY_BACKOFF_MS: u64 = 1000;

/// Messages scanned when looking up an existing notification thread
pub const NOTIFICATION_HISTORY_LIMIT: u32 = 150;

/// Probability of skipping an in-progress notification with no throttling
pub const IN_PROGRESS_BASE_SKIP: f64 = 0.8;

/// Added to the skip probability each time the service throttles us
pub const THROTTLE_SKIP_STEP: f64 = 0.1;

/// Upper bound of the skip probability
pub const THROTTLE_MAX_SKIP: f64 = 0.99;

/// Half-life of the throttling boost in seconds
pub const THROTTLE_DECAY_HALF_LIFE_SECS: f64 = 60.0;

/// Job deadline on the platform (3 hours)
pub const JOB_ACTIVE_DEADLINE_SECS: i64 = 10_800;

/// Finished jobs are collected by the platform after a day
pub const JOB_TTL_AFTER_FINISHED_SECS: i32 = 86_400;

/// Label carrying the job id on jobs and pods
pub const JOB_ID_LABEL: &str = "vauban/job-id";

/// Default namespace for build jobs
pub const DEFAULT_NAMESPACE: &str = "vauban";

/// Default container image running the CLI inside a job
pub const DEFAULT_JOB_IMAGE: &str = "vauban:latest";
