use super::AppState;
use crate::error::VaubanError;
use crate::job::JobState;
use crate::platform::{DeleteOutcome, JobSubmission};
use crate::stage::Stage;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header::USER_AGENT, HeaderMap, StatusCode},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Header set by the authenticating proxy in front of the service
pub const USER_HEADER: &str = "x-authentik-username";

const HELP: &str = r#"
Available routes:
    /build
        method: POST
        description: Starts a build job
        arguments:
            name (mandatory): name of the image to build
            stage (mandatory): stage to run (rootfs, conffs, initramfs, kernel, all, trueall)
            build-parents: Number of parent generations to build first
            branch: Override the configured branch
            conffs: Override the configured conffs host
            extra-args: Extra arguments given to the build command
            vauban-image: Container image running the build
            no-cleanup: Keep the job resources after completion (/delete still works)
        returns: Object containing `status` and a `job_id` if the job was accepted
    /status/<id>
        method: GET
        description: Current status of a build job
        returns: Object containing `status`, `message` and `logs`
    /delete/<id>
        method: DELETE POST
        description: Deletes a build job and its resources, interrupting it if running
"#;

type Reply = (StatusCode, Json<Value>);

fn reply(code: StatusCode, status: &str, message: impl Into<String>) -> Reply {
    (code, Json(json!({"status": status, "message": message.into()})))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BuildBody {
    pub name: Option<String>,
    pub stage: Option<String>,
    pub build_parents: Option<Value>,
    pub branch: Option<String>,
    pub conffs: Option<String>,
    pub extra_args: Option<String>,
    pub vauban_image: Option<String>,
    pub no_cleanup: Option<Value>,
}

fn scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        other => matches!(
            scalar(other).to_lowercase().as_str(),
            "true" | "yes" | "on" | "1"
        ),
    }
}

fn header(headers: &HeaderMap, name: impl axum::http::header::AsHeaderName) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("undefined")
        .to_string()
}

fn update_context(headers: &HeaderMap) -> BTreeMap<String, String> {
    [("last update user".to_string(), header(headers, USER_HEADER))].into()
}

/// Context of a new job's thread, including who asked for it.
pub fn creation_context(source: &str, headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut context = update_context(headers);
    context.insert("source".to_string(), source.to_string());
    context.insert(
        "creation date".to_string(),
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
    );
    context.insert("client".to_string(), header(headers, USER_AGENT));
    context
}

/// Command line and notification infos of a build request.
pub fn build_command(
    program: &str,
    body: &BuildBody,
) -> Result<(Vec<String>, BTreeMap<String, String>), String> {
    let name = body.name.as_deref().ok_or("Need some more arguments. missing: name")?;
    let stage = body
        .stage
        .as_deref()
        .ok_or("Need some more arguments. missing: stage")?;
    stage
        .parse::<Stage>()
        .map_err(|e| format!("Invalid stage: {}", e))?;

    let mut command: Vec<String> = [program, "build", "--name", name, "--stage", stage]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let mut infos: BTreeMap<String, String> = [
        ("stage".to_string(), stage.to_string()),
        ("name".to_string(), name.to_string()),
    ]
    .into();

    let overrides = [
        ("build-parents", body.build_parents.as_ref().map(scalar)),
        ("branch", body.branch.clone()),
        ("conffs", body.conffs.clone()),
    ];
    for (flag, value) in overrides {
        if let Some(value) = value {
            command.push(format!("--{}", flag));
            command.push(value.clone());
            infos.insert(flag.to_string(), value);
        }
    }
    if let Some(extra) = &body.extra_args {
        command.extend(extra.split_whitespace().map(str::to_string));
        infos.insert("extra-args".to_string(), extra.clone());
    }
    if body.no_cleanup.as_ref().is_some_and(truthy) {
        infos.insert("no cleanup".to_string(), "yes".to_string());
    }

    Ok((command, infos))
}

pub async fn help() -> &'static str {
    HELP
}

pub async fn health() -> &'static str {
    "ok"
}

pub async fn build(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Reply {
    let body: BuildBody = match serde_json::from_slice(&body) {
        Ok(body) => body,
        Err(e) => {
            tracing::debug!(error = %e, "rejecting malformed build request");
            return reply(StatusCode::BAD_REQUEST, "error", "Need some JSON arguments");
        }
    };
    let (command, mut infos) = match build_command(&state.settings.job_program, &body) {
        Ok(parts) => parts,
        Err(message) => return reply(StatusCode::BAD_REQUEST, "error", message),
    };

    let job_id = uuid::Uuid::new_v4().simple().to_string();
    let submission = JobSubmission {
        job_id: job_id.clone(),
        image: body
            .vauban_image
            .clone()
            .unwrap_or_else(|| state.settings.default_image.clone()),
        command,
        no_cleanup: body.no_cleanup.as_ref().is_some_and(truthy),
    };
    let image_name = infos.get("name").cloned().unwrap_or_default();

    if let Err(e) = state.tracker.submit(&submission, &image_name).await {
        tracing::error!(job_id = %job_id, error = %e, "failed to run a new job");
        return reply(
            StatusCode::INTERNAL_SERVER_ERROR,
            "error",
            format!("Failed to run a new job: {}", e),
        );
    }

    infos.insert("user".to_string(), header(&headers, USER_HEADER));
    let context = creation_context(&state.settings.source, &headers);
    state.tracker.open_thread(&job_id, infos, context).await;

    if let Err(e) = state.tracker.await_visible(&job_id).await {
        tracing::error!(job_id = %job_id, error = %e, "job never became visible");
        return reply(
            StatusCode::INTERNAL_SERVER_ERROR,
            "error",
            format!("Failed to get the new job: {}", e),
        );
    }

    (StatusCode::OK, Json(json!({"status": "ok", "job_id": job_id})))
}

pub async fn status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Reply {
    let report = match state.tracker.poll_status(&id, update_context(&headers)).await {
        Ok(report) => report,
        Err(VaubanError::JobNotFound { .. }) => {
            return reply(StatusCode::NOT_FOUND, "error", "Cannot find such job")
        }
        Err(e) => {
            tracing::error!(job_id = %id, error = %e, "cannot read job status");
            return reply(
                StatusCode::INTERNAL_SERVER_ERROR,
                "error",
                format!("Error while trying to get job: {}", e),
            );
        }
    };

    let (code, status, message) = match report.state {
        JobState::Succeeded => (StatusCode::OK, "ok", "Job is done ! Build successful".to_string()),
        JobState::InProgress => (
            StatusCode::ACCEPTED,
            "in-progress",
            "Job is currently running".to_string(),
        ),
        JobState::Creation => (
            StatusCode::ACCEPTED,
            "in-progress",
            "Job is waiting on platform resources to be created".to_string(),
        ),
        JobState::Failed => (StatusCode::INTERNAL_SERVER_ERROR, "error", "Job failed !".to_string()),
        JobState::Unknown => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "unknown",
            VaubanError::UnknownJobState {
                job_id: id.clone(),
                status: report.raw.to_string(),
            }
            .to_string(),
        ),
    };

    (
        code,
        Json(json!({
            "status": status,
            "message": message,
            "logs": report.logs,
            "previous_pods_logs": report.previous_pods_logs,
        })),
    )
}

pub async fn delete(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Reply {
    match state.tracker.delete(&id, update_context(&headers)).await {
        Ok(DeleteOutcome::Deleted) => reply(StatusCode::CREATED, "ok", "Deleted !"),
        Ok(DeleteOutcome::AlreadyGone) => reply(StatusCode::OK, "ok", "Already deleted !"),
        Err(e) => {
            tracing::error!(job_id = %id, error = %e, "cannot delete job");
            reply(
                StatusCode::INTERNAL_SERVER_ERROR,
                "error",
                format!("Error while trying to delete job: {}", e),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(value: Value) -> BuildBody {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_build_command_with_overrides() {
        let body = body(json!({
            "name": "web",
            "stage": "all",
            "build-parents": 2,
            "branch": "dev",
            "extra-args": "--check  --debug",
            "no-cleanup": "Yes"
        }));
        let (command, infos) = build_command("vauban", &body).unwrap();
        assert_eq!(
            command,
            vec![
                "vauban", "build", "--name", "web", "--stage", "all", "--build-parents", "2",
                "--branch", "dev", "--check", "--debug"
            ]
        );
        assert_eq!(infos.get("build-parents").map(String::as_str), Some("2"));
        assert_eq!(infos.get("no cleanup").map(String::as_str), Some("yes"));
        assert!(!infos.contains_key("conffs"));
    }

    #[test]
    fn test_build_command_requires_name_and_stage() {
        let err = build_command("vauban", &body(json!({"stage": "rootfs"}))).unwrap_err();
        assert!(err.contains("name"));
        let err = build_command("vauban", &body(json!({"name": "web"}))).unwrap_err();
        assert!(err.contains("stage"));
        let err =
            build_command("vauban", &body(json!({"name": "web", "stage": "bogus"}))).unwrap_err();
        assert!(err.contains("Invalid stage"));
    }

    #[test]
    fn test_creation_context_names_the_user() {
        let mut headers = HeaderMap::new();
        headers.insert(USER_HEADER, "alice".parse().unwrap());
        let context = creation_context("builder-0", &headers);
        assert_eq!(context.get("last update user").map(String::as_str), Some("alice"));
        assert_eq!(context.get("source").map(String::as_str), Some("builder-0"));
        assert_eq!(context.get("client").map(String::as_str), Some("undefined"));
        assert!(context.contains_key("creation date"));

        let anonymous = creation_context("builder-0", &HeaderMap::new());
        assert_eq!(
            anonymous.get("last update user").map(String::as_str),
            Some("undefined")
        );
    }

    #[test]
    fn test_truthy() {
        assert!(truthy(&json!(true)));
        assert!(truthy(&json!("on")));
        assert!(truthy(&json!(1)));
        assert!(!truthy(&json!("nope")));
        assert!(!truthy(&json!(false)));
    }
}
