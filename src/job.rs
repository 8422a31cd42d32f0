//! Remote build jobs: status classification and the per-job record kept by
//! the tracker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a remote build job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobState {
    /// Submitted, platform resources not created yet
    Creation,
    InProgress,
    Succeeded,
    Failed,
    /// Status fields in a combination nothing here knows about
    Unknown,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }

    fn rank(&self) -> u8 {
        match self {
            JobState::Creation => 0,
            JobState::InProgress | JobState::Unknown => 1,
            JobState::Succeeded | JobState::Failed => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Creation => "creation",
            JobState::InProgress => "in-progress",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
            JobState::Unknown => "unknown",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The status fields of a platform job that classification looks at.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawJobStatus {
    pub active: Option<i32>,
    pub completion_time: Option<DateTime<Utc>>,
    pub failed: Option<i32>,
    pub ready: Option<i32>,
    pub terminating: Option<i32>,
}

impl RawJobStatus {
    pub fn classify(&self) -> JobState {
        let active = self.active.unwrap_or(0);
        let failed = self.failed.unwrap_or(0);
        let ready = self.ready.unwrap_or(0);

        if failed > 0 && active == 0 && ready == 0 && self.completion_time.is_none() {
            JobState::Failed
        } else if active > 0 {
            JobState::InProgress
        } else if self.completion_time.is_some() {
            JobState::Succeeded
        } else if self.active.is_none()
            && self.failed.is_none()
            && self.terminating.is_none()
        {
            JobState::Creation
        } else {
            JobState::Unknown
        }
    }
}

impl fmt::Display for RawJobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "active={:?} completion_time={:?} failed={:?} ready={:?} terminating={:?}",
            self.active, self.completion_time, self.failed, self.ready, self.terminating
        )
    }
}

/// What the service remembers about one submitted job.
#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    pub job_id: String,
    pub image: String,
    pub submitted_at: DateTime<Utc>,
    last_observed_state: JobState,
    pub log_tail: Vec<String>,
    pub notification_ref: Option<String>,
    garbage_collected: bool,
}

impl JobRecord {
    pub fn new(job_id: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            image: image.into(),
            submitted_at: Utc::now(),
            last_observed_state: JobState::Creation,
            log_tail: Vec::new(),
            notification_ref: None,
            garbage_collected: false,
        }
    }

    pub fn state(&self) -> JobState {
        self.last_observed_state
    }

    pub fn is_garbage_collected(&self) -> bool {
        self.garbage_collected
    }

    /// Records an observed state, returning whether it was accepted.
    ///
    /// Terminal states are final and a job never moves back to creation.
    pub fn observe(&mut self, state: JobState) -> bool {
        let current = self.last_observed_state;
        if current == state {
            return false;
        }
        if current.is_terminal() || state.rank() < current.rank() {
            tracing::warn!(
                job_id = %self.job_id,
                current = %current,
                observed = %state,
                "Ignoring backwards job state"
            );
            return false;
        }
        crate::log_job_transition!(self.job_id, current, state);
        self.last_observed_state = state;
        true
    }

    /// Enters the garbage-collected overlay, keeping the observed state.
    pub fn mark_garbage_collected(&mut self) {
        self.garbage_collected = true;
    }
}
