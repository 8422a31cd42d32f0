//! Remote execution platform for service-mode builds.
//!
//! The tracker only sees [`JobPlatform`]; [`KubePlatform`] runs each build as
//! a `batch/v1` Job whose pods carry the job id as a label.

use crate::constants::{
    DEFAULT_NAMESPACE, JOB_ACTIVE_DEADLINE_SECS, JOB_ID_LABEL, JOB_TTL_AFTER_FINISHED_SECS,
};
use crate::job::RawJobStatus;
use async_trait::async_trait;
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Container, EnvVar, Pod, PodSpec, PodTemplateSpec, SecretVolumeSource, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, ListParams, LogParams, PostParams};
use kube::Client;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("job {0} not found")]
    NotFound(String),

    #[error("platform API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("platform transport error: {0}")]
    Transport(String),
}

impl PlatformError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, PlatformError::NotFound(_))
    }
}

impl From<kube::Error> for PlatformError {
    fn from(e: kube::Error) -> Self {
        match e {
            kube::Error::Api(resp) if resp.code == 404 => PlatformError::NotFound(resp.message),
            kube::Error::Api(resp) => PlatformError::Api {
                code: resp.code,
                message: resp.message,
            },
            other => PlatformError::Transport(other.to_string()),
        }
    }
}

/// One build to run remotely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSubmission {
    pub job_id: String,
    pub image: String,
    /// Command line run inside the job container
    pub command: Vec<String>,
    /// Keep the finished job around instead of letting the platform expire it
    pub no_cleanup: bool,
}

/// Logs of one pod of a job, oldest pod first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum PodLog {
    Ok { pod: String, logs: String },
    Error { pod: String, message: String },
}

impl PodLog {
    /// Last `n` lines; an unreadable log has none.
    pub fn last_lines(&self, n: usize) -> Vec<String> {
        match self {
            PodLog::Ok { logs, .. } => {
                let lines: Vec<&str> = logs.trim().lines().collect();
                let start = lines.len().saturating_sub(n);
                lines[start..].iter().map(|l| l.to_string()).collect()
            }
            PodLog::Error { .. } => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    AlreadyGone,
}

#[async_trait]
pub trait JobPlatform: Send + Sync {
    async fn create_job(&self, job: &JobSubmission) -> Result<(), PlatformError>;

    async fn get_job(&self, job_id: &str) -> Result<RawJobStatus, PlatformError>;

    /// Deletes the job and its pods, in the background.
    async fn delete_job(&self, job_id: &str) -> Result<DeleteOutcome, PlatformError>;

    async fn job_logs(&self, job_id: &str, tail_lines: i64) -> Result<Vec<PodLog>, PlatformError>;
}

pub fn job_name(job_id: &str) -> String {
    format!("vauban-{}", job_id.to_lowercase())
}

fn job_selector(job_id: &str) -> String {
    format!("{}={}", JOB_ID_LABEL, job_id)
}

/// Cluster-wide settings shared by every build job.
#[derive(Debug, Clone)]
pub struct JobTemplate {
    pub namespace: String,
    pub service_account: Option<String>,
    /// Secret mounted read-only at `/opt/vauban`
    pub secret_name: Option<String>,
    /// Shell snippet run before the build command
    pub setup_script: Option<String>,
}

impl Default for JobTemplate {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            service_account: None,
            secret_name: None,
            setup_script: None,
        }
    }
}

/// Quotes a word for `bash -c` when it holds anything but safe characters.
pub fn shell_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

fn container_command(template: &JobTemplate, command: &[String]) -> Vec<String> {
    let build = command
        .iter()
        .map(|w| shell_quote(w))
        .collect::<Vec<_>>()
        .join(" ");
    let script = match &template.setup_script {
        Some(setup) => format!("{} ; {}", setup.trim(), build),
        None => build,
    };
    vec!["bash".to_string(), "-c".to_string(), script]
}

/// Build the Job manifest for one submission.
pub fn build_job(template: &JobTemplate, job: &JobSubmission) -> Job {
    let labels: BTreeMap<String, String> =
        [(JOB_ID_LABEL.to_string(), job.job_id.clone())].into_iter().collect();

    let mut volumes = Vec::new();
    let mut volume_mounts = Vec::new();
    if let Some(ref secret) = template.secret_name {
        volumes.push(Volume {
            name: "secrets".to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(secret.clone()),
                ..Default::default()
            }),
            ..Default::default()
        });
        volume_mounts.push(VolumeMount {
            name: "secrets".to_string(),
            mount_path: "/opt/vauban".to_string(),
            read_only: Some(true),
            ..Default::default()
        });
    }

    let container = Container {
        name: "vauban".to_string(),
        image: Some(job.image.clone()),
        image_pull_policy: Some("Always".to_string()),
        command: Some(container_command(template, &job.command)),
        env: Some(vec![EnvVar {
            name: "VAUBAN_BUILD_JOB_ID".to_string(),
            value: Some(job.job_id.clone()),
            ..Default::default()
        }]),
        volume_mounts: (!volume_mounts.is_empty()).then_some(volume_mounts),
        ..Default::default()
    };

    Job {
        metadata: ObjectMeta {
            name: Some(job_name(&job.job_id)),
            namespace: Some(template.namespace.clone()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(JobSpec {
            active_deadline_seconds: Some(JOB_ACTIVE_DEADLINE_SECS),
            ttl_seconds_after_finished: (!job.no_cleanup).then_some(JOB_TTL_AFTER_FINISHED_SECS),
            backoff_limit: Some(1),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    restart_policy: Some("Never".to_string()),
                    service_account_name: template.service_account.clone(),
                    volumes: (!volumes.is_empty()).then_some(volumes),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Kubernetes-backed job platform.
#[derive(Clone)]
pub struct KubePlatform {
    client: Client,
    template: JobTemplate,
}

impl KubePlatform {
    pub async fn new(template: JobTemplate) -> Result<Self, PlatformError> {
        let client = Client::try_default()
            .await
            .map_err(|e| PlatformError::Transport(format!("failed to create kube client: {}", e)))?;
        Ok(Self { client, template })
    }

    fn jobs(&self) -> Api<Job> {
        Api::namespaced(self.client.clone(), &self.template.namespace)
    }

    fn pods(&self) -> Api<Pod> {
        Api::namespaced(self.client.clone(), &self.template.namespace)
    }
}

#[async_trait]
impl JobPlatform for KubePlatform {
    async fn create_job(&self, job: &JobSubmission) -> Result<(), PlatformError> {
        let manifest = build_job(&self.template, job);
        tracing::info!(
            job_id = %job.job_id,
            namespace = %self.template.namespace,
            "creating Kubernetes job"
        );
        self.jobs().create(&PostParams::default(), &manifest).await?;
        Ok(())
    }

    async fn get_job(&self, job_id: &str) -> Result<RawJobStatus, PlatformError> {
        let job = self.jobs().get(&job_name(job_id)).await?;
        Ok(job
            .status
            .map(|s| RawJobStatus {
                active: s.active,
                completion_time: s.completion_time.map(|t| t.0),
                failed: s.failed,
                ready: s.ready,
                terminating: s.terminating,
            })
            .unwrap_or_default())
    }

    async fn delete_job(&self, job_id: &str) -> Result<DeleteOutcome, PlatformError> {
        let lp = ListParams::default().labels(&job_selector(job_id));
        let dp = DeleteParams::background();
        let mut deleted = 0usize;

        let pods = self.pods();
        for pod in pods.list(&lp).await? {
            if let Some(name) = pod.metadata.name {
                pods.delete(&name, &dp).await?;
                deleted += 1;
            }
        }

        let jobs = self.jobs();
        for job in jobs.list(&lp).await? {
            if let Some(name) = job.metadata.name {
                jobs.delete(&name, &dp).await?;
                deleted += 1;
            }
        }

        tracing::info!(job_id, resources = deleted, "job resources deleted");
        Ok(if deleted > 0 {
            DeleteOutcome::Deleted
        } else {
            DeleteOutcome::AlreadyGone
        })
    }

    async fn job_logs(&self, job_id: &str, tail_lines: i64) -> Result<Vec<PodLog>, PlatformError> {
        let pods = self.pods();
        let lp = ListParams::default().labels(&job_selector(job_id));
        let mut listed: Vec<Pod> = pods
            .list(&lp)
            .await?
            .into_iter()
            .filter(|p| {
                p.status
                    .as_ref()
                    .and_then(|s| s.container_statuses.as_ref())
                    .is_some()
            })
            .collect();
        listed.sort_by(|a, b| {
            a.metadata
                .creation_timestamp
                .as_ref()
                .map(|t| t.0)
                .cmp(&b.metadata.creation_timestamp.as_ref().map(|t| t.0))
        });

        let params = LogParams {
            tail_lines: Some(tail_lines),
            ..Default::default()
        };
        let mut logs = Vec::with_capacity(listed.len());
        for pod in listed {
            let Some(name) = pod.metadata.name else { continue };
            logs.push(match pods.logs(&name, &params).await {
                Ok(text) => PodLog::Ok { pod: name, logs: text },
                Err(e) => PodLog::Error {
                    pod: name,
                    message: format!("Error while getting pod logs: {}", e),
                },
            });
        }
        Ok(logs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submission(no_cleanup: bool) -> JobSubmission {
        JobSubmission {
            job_id: "0f1e2d".to_string(),
            image: "registry.example.org/vauban:1".to_string(),
            command: vec![
                "vauban".to_string(),
                "build".to_string(),
                "--name".to_string(),
                "web server".to_string(),
            ],
            no_cleanup,
        }
    }

    #[test]
    fn test_job_manifest() {
        let template = JobTemplate {
            namespace: "builds".to_string(),
            service_account: Some("vauban".to_string()),
            secret_name: Some("vauban-main".to_string()),
            setup_script: Some("cp /opt/vauban/.secrets.env /srv".to_string()),
        };
        let job = build_job(&template, &submission(false));

        assert_eq!(job.metadata.name.as_deref(), Some("vauban-0f1e2d"));
        assert_eq!(job.metadata.namespace.as_deref(), Some("builds"));
        let spec = job.spec.unwrap();
        assert_eq!(spec.active_deadline_seconds, Some(10_800));
        assert_eq!(spec.ttl_seconds_after_finished, Some(86_400));
        assert_eq!(spec.backoff_limit, Some(1));

        let labels = spec.template.metadata.unwrap().labels.unwrap();
        assert_eq!(labels.get(JOB_ID_LABEL).map(String::as_str), Some("0f1e2d"));

        let pod = spec.template.spec.unwrap();
        assert_eq!(pod.restart_policy.as_deref(), Some("Never"));
        assert_eq!(pod.service_account_name.as_deref(), Some("vauban"));
        assert_eq!(pod.volumes.unwrap().len(), 1);

        let container = &pod.containers[0];
        assert_eq!(container.image_pull_policy.as_deref(), Some("Always"));
        let command = container.command.clone().unwrap();
        assert_eq!(
            command[2],
            "cp /opt/vauban/.secrets.env /srv ; vauban build --name 'web server'"
        );
        let mounts = container.volume_mounts.clone().unwrap();
        assert_eq!(mounts[0].mount_path, "/opt/vauban");
        assert_eq!(mounts[0].read_only, Some(true));
    }

    #[test]
    fn test_no_cleanup_keeps_job() {
        let job = build_job(&JobTemplate::default(), &submission(true));
        let spec = job.spec.unwrap();
        assert_eq!(spec.ttl_seconds_after_finished, None);
        assert!(spec.template.spec.unwrap().volumes.is_none());
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("--name"), "--name");
        assert_eq!(shell_quote("a b"), "'a b'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn test_pod_log_tail() {
        let log = PodLog::Ok {
            pod: "p".to_string(),
            logs: "one\ntwo\nthree\n".to_string(),
        };
        assert_eq!(log.last_lines(2), vec!["two", "three"]);
        assert_eq!(log.last_lines(10).len(), 3);

        let failed = PodLog::Error {
            pod: "p".to_string(),
            message: "gone".to_string(),
        };
        assert!(failed.last_lines(5).is_empty());
    }
}
