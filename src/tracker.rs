//! Remote job lifecycle: submission, visibility, status polling and deletion,
//! with the notification thread kept in step.

use crate::constants::{
    JOB_CREATE_ATTEMPTS, JOB_STATUS_ATTEMPTS, JOB_VISIBILITY_ATTEMPTS, JOB_VISIBILITY_MAX_ERRORS,
    NOTIFICATION_LOG_LINES, PLATFORM_RETRY_BACKOFF_MS, POD_LOG_TAIL_LINES,
};
use crate::error::{RetryConfig, VaubanError};
use crate::job::{JobRecord, JobState, RawJobStatus};
use crate::notify::{NotificationEvent, Notifier};
use crate::platform::{DeleteOutcome, JobPlatform, JobSubmission, PlatformError, PodLog};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub create_retry: RetryConfig,
    pub visibility_attempts: u32,
    /// Errors other than "not found" tolerated while waiting for visibility
    pub visibility_max_errors: u32,
    pub visibility_interval: Duration,
    pub status_retry: RetryConfig,
    pub visibility_timeout: Option<Duration>,
    pub status_timeout: Option<Duration>,
    pub log_tail_lines: i64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        let backoff = Duration::from_millis(PLATFORM_RETRY_BACKOFF_MS);
        Self {
            create_retry: RetryConfig::new(JOB_CREATE_ATTEMPTS, backoff),
            visibility_attempts: JOB_VISIBILITY_ATTEMPTS,
            visibility_max_errors: JOB_VISIBILITY_MAX_ERRORS,
            visibility_interval: backoff,
            status_retry: RetryConfig::new(JOB_STATUS_ATTEMPTS, backoff),
            visibility_timeout: None,
            status_timeout: None,
            log_tail_lines: POD_LOG_TAIL_LINES,
        }
    }
}

/// Result of one status poll.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub job_id: String,
    pub state: JobState,
    pub raw: RawJobStatus,
    /// Logs of the most recent pod
    pub logs: Option<PodLog>,
    pub previous_pods_logs: Vec<PodLog>,
}

impl StatusReport {
    pub fn log_tail(&self, lines: usize) -> Vec<String> {
        self.logs
            .as_ref()
            .map(|l| l.last_lines(lines))
            .unwrap_or_default()
    }
}

/// Tracks remote build jobs for the service.
///
/// Requests for the same image are not deduplicated; every submission is
/// its own job.
pub struct JobTracker {
    platform: Arc<dyn JobPlatform>,
    notifier: Option<Arc<Notifier>>,
    config: TrackerConfig,
    records: Mutex<HashMap<String, JobRecord>>,
}

impl JobTracker {
    pub fn new(platform: Arc<dyn JobPlatform>, config: TrackerConfig) -> Self {
        Self {
            platform,
            notifier: None,
            config,
            records: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn record(&self, job_id: &str) -> Option<JobRecord> {
        self.records.lock().get(job_id).cloned()
    }

    /// Creates the remote job, retrying with a fixed backoff.
    pub async fn submit(&self, job: &JobSubmission, image: &str) -> Result<(), VaubanError> {
        let retry = self.config.create_retry;
        let attempts = retry.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            match self.platform.create_job(job).await {
                Ok(()) => {
                    tracing::info!(job_id = %job.job_id, image, attempt, "job submitted");
                    self.records
                        .lock()
                        .insert(job.job_id.clone(), JobRecord::new(&job.job_id, image));
                    return Ok(());
                }
                Err(e) => {
                    crate::log_platform_retry!("create job", attempt, e);
                    last_error = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(retry.backoff).await;
                    }
                }
            }
        }

        Err(transient("create job", attempts, last_error))
    }

    /// Opens the job's notification thread; failures are logged only.
    pub async fn open_thread(
        &self,
        job_id: &str,
        infos: BTreeMap<String, String>,
        context: BTreeMap<String, String>,
    ) {
        let Some(notifier) = &self.notifier else { return };
        match notifier.create(job_id, infos, context).await {
            Ok(handle) => {
                if let Some(record) = self.records.lock().get_mut(job_id) {
                    record.notification_ref = Some(handle);
                }
            }
            Err(e) => tracing::error!(job_id, error = %e, "failed to create notification"),
        }
    }

    /// Waits until the platform knows about a freshly created job.
    pub async fn await_visible(&self, job_id: &str) -> Result<(), VaubanError> {
        let start = Instant::now();
        let attempts = self.config.visibility_attempts.max(1);
        let mut errors = 0u32;
        let mut last_error = None;

        for attempt in 1..=attempts {
            check_deadline("await job visibility", start, self.config.visibility_timeout)?;
            match self.platform.get_job(job_id).await {
                Ok(_) => {
                    tracing::debug!(job_id, attempt, "job visible");
                    return Ok(());
                }
                Err(e) if e.is_not_found() => {
                    tracing::debug!(job_id, attempt, "job not visible yet");
                    last_error = Some(e);
                }
                Err(e) => {
                    crate::log_platform_retry!("await job visibility", attempt, e);
                    errors += 1;
                    last_error = Some(e);
                    if errors >= self.config.visibility_max_errors {
                        return Err(transient("await job visibility", attempt, last_error));
                    }
                }
            }
            if attempt < attempts {
                tokio::time::sleep(self.config.visibility_interval).await;
            }
        }

        Err(transient("await job visibility", attempts, last_error))
    }

    /// Reads, classifies and reports the job's current state.
    ///
    /// Only submitted jobs are recorded; polling never creates a record.
    /// An unknown state is returned like any other and logged as an error.
    pub async fn poll_status(
        &self,
        job_id: &str,
        context: BTreeMap<String, String>,
    ) -> Result<StatusReport, VaubanError> {
        let raw = self.read_status(job_id).await?;
        let state = raw.classify();

        let mut pod_logs = match self.platform.job_logs(job_id, self.config.log_tail_lines).await {
            Ok(logs) => logs,
            Err(e) => {
                tracing::warn!(job_id, error = %e, "cannot list job pods");
                Vec::new()
            }
        };
        let logs = pod_logs.pop();
        let report = StatusReport {
            job_id: job_id.to_string(),
            state,
            raw,
            logs,
            previous_pods_logs: pod_logs,
        };

        if state == JobState::Unknown {
            let unknown = VaubanError::UnknownJobState {
                job_id: job_id.to_string(),
                status: report.raw.to_string(),
            };
            tracing::error!(error = %unknown, "job status not understood");
        }

        let tail = report.log_tail(NOTIFICATION_LOG_LINES);
        if let Some(record) = self.records.lock().get_mut(job_id) {
            record.observe(state);
            record.log_tail = tail.clone();
        }

        let infos: BTreeMap<String, String> = match state {
            JobState::Failed => [("status".to_string(), "failed".to_string())].into(),
            JobState::Succeeded => [("status".to_string(), "built".to_string())].into(),
            _ => BTreeMap::new(),
        };
        let logs = (state != JobState::Creation).then_some(tail);
        self.notify(job_id, state.into(), infos, context, logs).await;

        Ok(report)
    }

    async fn read_status(&self, job_id: &str) -> Result<RawJobStatus, VaubanError> {
        let start = Instant::now();
        let retry = self.config.status_retry;
        let attempts = retry.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            check_deadline("read job status", start, self.config.status_timeout)?;
            match self.platform.get_job(job_id).await {
                Ok(raw) => return Ok(raw),
                Err(e) if e.is_not_found() => {
                    // expired by the platform, or never ours
                    self.records.lock().remove(job_id);
                    return Err(VaubanError::JobNotFound {
                        job_id: job_id.to_string(),
                    })
                }
                Err(e) => {
                    crate::log_platform_retry!("read job status", attempt, e);
                    last_error = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(retry.backoff).await;
                    }
                }
            }
        }

        Err(transient("read job status", attempts, last_error))
    }

    /// Deletes the job's resources and marks its thread garbage collected.
    ///
    /// The notification is attempted whatever the deletion outcome.
    pub async fn delete(
        &self,
        job_id: &str,
        context: BTreeMap<String, String>,
    ) -> Result<DeleteOutcome, VaubanError> {
        let outcome = match self.platform.delete_job(job_id).await {
            Ok(outcome) => Ok(outcome),
            Err(e) if e.is_not_found() => Ok(DeleteOutcome::AlreadyGone),
            Err(e) => Err(VaubanError::Platform {
                operation: "delete job".to_string(),
                message: e.to_string(),
            }),
        };

        if let Some(record) = self.records.lock().get_mut(job_id) {
            record.mark_garbage_collected();
        }
        self.notify(
            job_id,
            NotificationEvent::GarbageCollected,
            BTreeMap::new(),
            context,
            None,
        )
        .await;
        self.records.lock().remove(job_id);

        outcome
    }

    async fn notify(
        &self,
        job_id: &str,
        event: NotificationEvent,
        infos: BTreeMap<String, String>,
        context: BTreeMap<String, String>,
        logs: Option<Vec<String>>,
    ) {
        let Some(notifier) = &self.notifier else { return };
        if let Err(e) = notifier.update(job_id, event, infos, context, logs).await {
            tracing::error!(job_id, event = ?event, error = %e, "failed to update notification");
        }
    }
}

fn transient(operation: &str, attempts: u32, last_error: Option<PlatformError>) -> VaubanError {
    VaubanError::TransientPlatform {
        operation: operation.to_string(),
        attempts,
        message: last_error.map_or_else(|| "no attempt made".to_string(), |e| e.to_string()),
    }
}

fn check_deadline(
    operation: &str,
    start: Instant,
    timeout: Option<Duration>,
) -> Result<(), VaubanError> {
    match timeout {
        Some(timeout) if start.elapsed() >= timeout => Err(VaubanError::TimedOut {
            operation: operation.to_string(),
            timeout,
        }),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadline() {
        let start = Instant::now();
        assert!(check_deadline("x", start, None).is_ok());
        assert!(check_deadline("x", start, Some(Duration::from_secs(60))).is_ok());
        let err = check_deadline("x", start, Some(Duration::ZERO)).unwrap_err();
        assert!(matches!(err, VaubanError::TimedOut { .. }));
    }

    #[test]
    fn test_transient_error_message() {
        let err = transient(
            "create job",
            10,
            Some(PlatformError::Api {
                code: 409,
                message: "conflict".to_string(),
            }),
        );
        let msg = err.to_string();
        assert!(msg.contains("create job"));
        assert!(msg.contains("10 attempts"));
        assert!(msg.contains("conflict"));
    }
}
