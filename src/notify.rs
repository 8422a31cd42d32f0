//! Job notification threads.
//!
//! Each job owns one message in the notification service. The message is
//! created once, then found again through the correlation metadata stored
//! with it, merged with the new key-value pairs and fully re-rendered.

use crate::constants::{
    IN_PROGRESS_BASE_SKIP, NOTIFICATION_HISTORY_LIMIT, NOTIFICATION_LOG_LINES,
    NOTIFICATION_RETRY_ATTEMPTS, NOTIFICATION_RETRY_BACKOFF_MS, THROTTLE_DECAY_HALF_LIFE_SECS,
    THROTTLE_MAX_SKIP, THROTTLE_SKIP_STEP,
};
use crate::error::{RetryConfig, VaubanError};
use crate::job::JobState;
use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::header::RETRY_AFTER;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Metadata event type marking our messages
pub const METADATA_EVENT_TYPE: &str = "vauban_job";

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notification service throttled the request")]
    Throttled { retry_after: Option<Duration> },

    #[error("notification API error: {0}")]
    Api(String),

    #[error("notification transport error: {0}")]
    Transport(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NotificationEvent {
    Creation,
    InProgress,
    Failed,
    Succeeded,
    Unknown,
    GarbageCollected,
}

impl NotificationEvent {
    /// Updates that must not be lost under throttling
    pub fn is_critical(&self) -> bool {
        !matches!(self, NotificationEvent::InProgress)
    }

    fn tracking_message(&self, job_id: &str) -> String {
        match self {
            NotificationEvent::Creation => {
                format!("A vauban job has been submitted !\n*Job ID*: `{}`", job_id)
            }
            NotificationEvent::InProgress => {
                format!("A vauban job is running !\n*Job ID*: `{}`", job_id)
            }
            NotificationEvent::Failed => format!("The vauban job failed !\n*Job ID*: `{}`", job_id),
            NotificationEvent::Succeeded => {
                format!("The vauban job was successfully built !\n*Job ID*: `{}`", job_id)
            }
            NotificationEvent::Unknown => format!(
                "The vauban job went to an unknown state !\nThe tracker needs to learn this new case.\n*Job ID*: `{}`",
                job_id
            ),
            NotificationEvent::GarbageCollected => {
                "The vauban job was garbage collected :recycle:".to_string()
            }
        }
    }

    fn progress(&self) -> &'static str {
        match self {
            NotificationEvent::Creation => {
                ":large_yellow_circle: Waiting for the platform resources to be created ..."
            }
            NotificationEvent::InProgress => ":large_blue_circle: Job is running ...",
            NotificationEvent::Failed => ":red_circle: Job failed",
            NotificationEvent::Succeeded => ":large_green_circle: Job built !",
            NotificationEvent::Unknown => ":large_purple_circle: Job in unknown state",
            NotificationEvent::GarbageCollected => ":recycle: Job resources deleted",
        }
    }
}

impl From<JobState> for NotificationEvent {
    fn from(state: JobState) -> Self {
        match state {
            JobState::Creation => NotificationEvent::Creation,
            JobState::InProgress => NotificationEvent::InProgress,
            JobState::Succeeded => NotificationEvent::Succeeded,
            JobState::Failed => NotificationEvent::Failed,
            JobState::Unknown => NotificationEvent::Unknown,
        }
    }
}

/// Everything a notification thread remembers between updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadState {
    pub job_id: String,
    pub infos: BTreeMap<String, String>,
    pub context: BTreeMap<String, String>,
    /// Last lifecycle event; garbage collection never replaces it
    pub event: NotificationEvent,
    pub logs: Vec<String>,
}

impl ThreadState {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            infos: BTreeMap::new(),
            context: BTreeMap::new(),
            event: NotificationEvent::Creation,
            logs: Vec::new(),
        }
    }

    /// Last writer wins per key; keys absent from the update are kept.
    pub fn merge(&mut self, infos: BTreeMap<String, String>, context: BTreeMap<String, String>) {
        self.infos.extend(infos);
        self.context.extend(context);
    }

    /// Moves the thread to `event`, keeping the previous event and log
    /// tail for a garbage-collection update.
    pub fn advance(&mut self, event: NotificationEvent, logs: Option<Vec<String>>) {
        if event != NotificationEvent::GarbageCollected {
            self.event = event;
        }
        match logs {
            Some(lines) => {
                let start = lines.len().saturating_sub(NOTIFICATION_LOG_LINES);
                self.logs = lines[start..].to_vec();
            }
            None if event != NotificationEvent::GarbageCollected => self.logs.clear(),
            None => {}
        }
    }
}

/// A message found again through its correlation metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostedMessage {
    pub handle: String,
    pub state: ThreadState,
}

#[async_trait]
pub trait NotificationService: Send + Sync {
    /// Posts a new message, returning its handle.
    async fn post_message(&self, blocks: &Value, state: &ThreadState) -> Result<String, NotifyError>;

    async fn find_message(&self, job_id: &str) -> Result<Option<PostedMessage>, NotifyError>;

    async fn update_message(
        &self,
        handle: &str,
        blocks: &Value,
        state: &ThreadState,
    ) -> Result<(), NotifyError>;
}

/// Full message body for `event` on a thread in `state`.
pub fn render_blocks(state: &ThreadState, event: NotificationEvent) -> Value {
    let progress = if event == NotificationEvent::GarbageCollected {
        state.event.progress()
    } else {
        event.progress()
    };

    let mut blocks = vec![
        json!({
            "type": "header",
            "text": {"type": "plain_text", "text": "Vauban job info display"}
        }),
        json!({
            "type": "section",
            "text": {"type": "mrkdwn", "text": event.tracking_message(&state.job_id)}
        }),
    ];

    if !state.infos.is_empty() {
        let fields: Vec<Value> = state
            .infos
            .iter()
            .map(|(k, v)| json!({"type": "mrkdwn", "text": format!("*{}*\n{}", k, v)}))
            .collect();
        blocks.push(json!({"type": "section", "fields": fields}));
    }

    blocks.push(json!({"type": "divider"}));
    blocks.push(json!({
        "type": "section",
        "text": {"type": "mrkdwn", "text": progress}
    }));

    if !state.logs.is_empty() {
        let quoted: Vec<String> = state.logs.iter().map(|l| format!("> {}", l)).collect();
        blocks.push(json!({
            "type": "section",
            "text": {"type": "mrkdwn", "text": format!("```\n{}\n```", quoted.join("\n"))}
        }));
    }

    blocks.push(json!({"type": "divider"}));
    if !state.context.is_empty() {
        let elements: Vec<Value> = state
            .context
            .iter()
            .map(|(k, v)| json!({"type": "mrkdwn", "text": format!("*{}*: {}", k, v)}))
            .collect();
        blocks.push(json!({"type": "context", "elements": elements}));
    }

    Value::Array(blocks)
}

/// Probabilistic sampling of non-critical updates.
///
/// Every throttling response raises the skip probability by a fixed step;
/// the raise decays exponentially once throttling stops.
pub struct ThrottleGate {
    base_skip: f64,
    step: f64,
    max_skip: f64,
    half_life: Duration,
    boost: Mutex<(f64, Instant)>,
}

impl ThrottleGate {
    pub fn new(base_skip: f64, step: f64, max_skip: f64, half_life: Duration) -> Self {
        Self {
            base_skip,
            step,
            max_skip,
            half_life,
            boost: Mutex::new((0.0, Instant::now())),
        }
    }

    fn decayed_boost(&self, boost: f64, since: Instant) -> f64 {
        let half_life = self.half_life.as_secs_f64();
        if half_life <= 0.0 {
            return 0.0;
        }
        boost * 0.5f64.powf(since.elapsed().as_secs_f64() / half_life)
    }

    pub fn skip_probability(&self) -> f64 {
        let (boost, since) = *self.boost.lock();
        (self.base_skip + self.decayed_boost(boost, since)).clamp(0.0, self.max_skip)
    }

    pub fn should_skip(&self) -> bool {
        rand::random::<f64>() < self.skip_probability()
    }

    pub fn record_throttle(&self) {
        let mut guard = self.boost.lock();
        let current = self.decayed_boost(guard.0, guard.1);
        let ceiling = (self.max_skip - self.base_skip).max(0.0);
        *guard = ((current + self.step).min(ceiling), Instant::now());
        drop(guard);
        tracing::warn!(
            skip_probability = self.skip_probability(),
            "notification service throttled, sampling harder"
        );
    }
}

impl Default for ThrottleGate {
    fn default() -> Self {
        Self::new(
            IN_PROGRESS_BASE_SKIP,
            THROTTLE_SKIP_STEP,
            THROTTLE_MAX_SKIP,
            Duration::from_secs_f64(THROTTLE_DECAY_HALF_LIFE_SECS),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Updated,
    /// Sampled out before reaching the service
    Skipped,
    /// Given up on after the service throttled it
    Dropped,
    /// No thread exists for the job
    NoThread,
}

/// Keeps one notification thread per job in sync with its state.
pub struct Notifier {
    service: Arc<dyn NotificationService>,
    gate: ThrottleGate,
    retry: RetryConfig,
}

impl Notifier {
    pub fn new(service: Arc<dyn NotificationService>) -> Self {
        Self {
            service,
            gate: ThrottleGate::default(),
            retry: RetryConfig::new(
                NOTIFICATION_RETRY_ATTEMPTS,
                Duration::from_millis(NOTIFICATION_RETRY_BACKOFF_MS),
            ),
        }
    }

    pub fn with_gate(mut self, gate: ThrottleGate) -> Self {
        self.gate = gate;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn gate(&self) -> &ThrottleGate {
        &self.gate
    }

    /// Opens the thread of a new job.
    pub async fn create(
        &self,
        job_id: &str,
        infos: BTreeMap<String, String>,
        context: BTreeMap<String, String>,
    ) -> Result<String, VaubanError> {
        let mut state = ThreadState::new(job_id);
        state.merge(infos, context);
        state.context.insert("last update".to_string(), now());
        let blocks = render_blocks(&state, NotificationEvent::Creation);

        let handle = self
            .deliver("post notification", true, || {
                self.service.post_message(&blocks, &state)
            })
            .await?;
        // critical deliveries never come back empty
        handle.ok_or_else(|| VaubanError::Notification("notification was dropped".to_string()))
    }

    /// Merges the new pairs into the job's thread and re-renders it.
    pub async fn update(
        &self,
        job_id: &str,
        event: NotificationEvent,
        infos: BTreeMap<String, String>,
        context: BTreeMap<String, String>,
        logs: Option<Vec<String>>,
    ) -> Result<UpdateOutcome, VaubanError> {
        let critical = event.is_critical();
        if !critical && self.gate.should_skip() {
            tracing::debug!(job_id, event = ?event, "notification update sampled out");
            return Ok(UpdateOutcome::Skipped);
        }

        let found = self
            .deliver("find notification", critical, || self.service.find_message(job_id))
            .await?;
        let Some(found) = found else {
            return Ok(UpdateOutcome::Dropped);
        };
        let Some(PostedMessage { handle, mut state }) = found else {
            tracing::warn!(job_id, "asked to update a notification that does not exist");
            return Ok(UpdateOutcome::NoThread);
        };

        state.merge(infos, context);
        state.context.insert("last update".to_string(), now());
        state.advance(event, logs);
        let blocks = render_blocks(&state, event);

        let sent = self
            .deliver("update notification", critical, || {
                self.service.update_message(&handle, &blocks, &state)
            })
            .await?;
        Ok(match sent {
            Some(()) => UpdateOutcome::Updated,
            None => UpdateOutcome::Dropped,
        })
    }

    /// Runs `call` under the retry policy of the update class.
    ///
    /// Non-critical calls are attempted once and dropped when throttled;
    /// critical calls retry with a fixed backoff.
    async fn deliver<T, F, Fut>(
        &self,
        operation: &str,
        critical: bool,
        mut call: F,
    ) -> Result<Option<T>, VaubanError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, NotifyError>>,
    {
        let attempts = if critical {
            self.retry.max_attempts.max(1)
        } else {
            1
        };
        let mut last_error = None;

        for attempt in 1..=attempts {
            match call().await {
                Ok(value) => return Ok(Some(value)),
                Err(NotifyError::Throttled { retry_after }) => {
                    self.gate.record_throttle();
                    if !critical {
                        tracing::warn!(operation, "notification dropped under throttling");
                        return Ok(None);
                    }
                    last_error = Some(NotifyError::Throttled { retry_after });
                    if attempt < attempts {
                        tokio::time::sleep(retry_after.unwrap_or(self.retry.backoff)).await;
                    }
                }
                Err(e) if critical => {
                    tracing::debug!(operation, attempt, error = %e, "notification call failed, retrying");
                    last_error = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(self.retry.backoff).await;
                    }
                }
                Err(e) => return Err(VaubanError::Notification(format!("{}: {}", operation, e))),
            }
        }

        Err(VaubanError::Notification(format!(
            "{} failed after {} attempts: {}",
            operation,
            attempts,
            last_error.map_or_else(|| "no attempt made".to_string(), |e| e.to_string())
        )))
    }
}

fn now() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Slack connection settings.
#[derive(Debug, Clone)]
pub struct SlackSettings {
    pub token: String,
    /// Channel name, looked up when no id is given
    pub channel: String,
    pub channel_id: Option<String>,
    pub username: String,
    pub icon_emoji: String,
    pub history_limit: u32,
    pub api_base: String,
}

impl SlackSettings {
    pub fn new(token: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            channel: channel.into(),
            channel_id: None,
            username: "Vauban build manager".to_string(),
            icon_emoji: ":robot_face:".to_string(),
            history_limit: NOTIFICATION_HISTORY_LIMIT,
            api_base: "https://slack.com/api".to_string(),
        }
    }
}

/// Slack Web API client storing thread state in message metadata.
pub struct SlackClient {
    client: reqwest::Client,
    settings: SlackSettings,
    channel_id: String,
}

impl SlackClient {
    pub async fn connect(settings: SlackSettings) -> Result<Self, NotifyError> {
        let mut slack = Self {
            client: reqwest::Client::new(),
            channel_id: settings.channel_id.clone().unwrap_or_default(),
            settings,
        };
        if slack.channel_id.is_empty() {
            slack.channel_id = slack.lookup_channel().await?;
            tracing::info!(
                channel_id = %slack.channel_id,
                "Slack channel found, set SLACK_CHANNEL_ID to skip the lookup"
            );
        }
        Ok(slack)
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    fn url(&self, method: &str) -> String {
        format!("{}/{}", self.settings.api_base.trim_end_matches('/'), method)
    }

    async fn post(&self, method: &str, body: &Value) -> Result<Value, NotifyError> {
        let response = self
            .client
            .post(self.url(method))
            .bearer_auth(&self.settings.token)
            .json(body)
            .send()
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;
        read_response(response).await
    }

    async fn get(&self, method: &str, query: &[(&str, String)]) -> Result<Value, NotifyError> {
        let response = self
            .client
            .get(self.url(method))
            .bearer_auth(&self.settings.token)
            .query(query)
            .send()
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;
        read_response(response).await
    }

    async fn lookup_channel(&self) -> Result<String, NotifyError> {
        let mut cursor = String::new();
        loop {
            let mut query = vec![("limit", "200".to_string())];
            if !cursor.is_empty() {
                query.push(("cursor", cursor.clone()));
            }
            let page = self.get("conversations.list", &query).await?;
            let channels = page["channels"].as_array().cloned().unwrap_or_default();
            if let Some(id) = channels
                .iter()
                .find(|c| c["name"].as_str() == Some(self.settings.channel.as_str()))
                .and_then(|c| c["id"].as_str())
            {
                return Ok(id.to_string());
            }
            cursor = page["response_metadata"]["next_cursor"]
                .as_str()
                .unwrap_or_default()
                .to_string();
            if cursor.is_empty() {
                return Err(NotifyError::Api(format!(
                    "channel {} not found",
                    self.settings.channel
                )));
            }
        }
    }
}

async fn read_response(response: reqwest::Response) -> Result<Value, NotifyError> {
    if response.status() == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs);
        return Err(NotifyError::Throttled { retry_after });
    }

    let body: Value = response
        .json()
        .await
        .map_err(|e| NotifyError::Transport(e.to_string()))?;
    if body["ok"].as_bool() == Some(true) {
        return Ok(body);
    }
    match body["error"].as_str() {
        Some("ratelimited") => Err(NotifyError::Throttled { retry_after: None }),
        Some(error) => Err(NotifyError::Api(error.to_string())),
        None => Err(NotifyError::Api("unknown_error".to_string())),
    }
}

/// Message metadata carrying the thread state.
pub fn slack_metadata(state: &ThreadState) -> Value {
    json!({
        "event_type": METADATA_EVENT_TYPE,
        "event_payload": {
            "vauban_job_id": state.job_id,
            "vauban_infos": serde_json::to_string(&state.infos).unwrap_or_default(),
            "vauban_context": serde_json::to_string(&state.context).unwrap_or_default(),
            "vauban_event_type": state.event,
            "vauban_logs": serde_json::to_string(&state.logs).unwrap_or_default(),
        }
    })
}

/// Thread state of a message, if it belongs to `job_id`.
pub fn parse_slack_metadata(message: &Value, job_id: &str) -> Option<ThreadState> {
    let metadata = message.get("metadata")?;
    if metadata["event_type"].as_str() != Some(METADATA_EVENT_TYPE) {
        return None;
    }
    let payload = &metadata["event_payload"];
    if payload["vauban_job_id"].as_str() != Some(job_id) {
        return None;
    }

    fn decode<T: serde::de::DeserializeOwned + Default>(field: &Value) -> T {
        field
            .as_str()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default()
    }

    Some(ThreadState {
        job_id: job_id.to_string(),
        infos: decode(&payload["vauban_infos"]),
        context: decode(&payload["vauban_context"]),
        event: serde_json::from_value(payload["vauban_event_type"].clone())
            .unwrap_or(NotificationEvent::Unknown),
        logs: decode(&payload["vauban_logs"]),
    })
}

#[async_trait]
impl NotificationService for SlackClient {
    async fn post_message(&self, blocks: &Value, state: &ThreadState) -> Result<String, NotifyError> {
        let body = json!({
            "channel": self.channel_id,
            "text": format!("New Vauban job created: {}", state.job_id),
            "username": self.settings.username,
            "icon_emoji": self.settings.icon_emoji,
            "blocks": blocks,
            "metadata": slack_metadata(state),
        });
        let response = self.post("chat.postMessage", &body).await?;
        response["ts"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| NotifyError::Api("chat.postMessage returned no ts".to_string()))
    }

    async fn find_message(&self, job_id: &str) -> Result<Option<PostedMessage>, NotifyError> {
        let query = [
            ("channel", self.channel_id.clone()),
            ("include_all_metadata", "true".to_string()),
            ("limit", self.settings.history_limit.to_string()),
        ];
        let history = self.get("conversations.history", &query).await?;
        let messages = history["messages"].as_array().cloned().unwrap_or_default();

        Ok(messages.iter().find_map(|message| {
            let state = parse_slack_metadata(message, job_id)?;
            let handle = message["ts"].as_str()?.to_string();
            Some(PostedMessage { handle, state })
        }))
    }

    async fn update_message(
        &self,
        handle: &str,
        blocks: &Value,
        state: &ThreadState,
    ) -> Result<(), NotifyError> {
        let body = json!({
            "channel": self.channel_id,
            "ts": handle,
            "text": format!("Vauban job updated: {}", state.job_id),
            "username": self.settings.username,
            "icon_emoji": self.settings.icon_emoji,
            "blocks": blocks,
            "metadata": slack_metadata(state),
        });
        self.post("chat.update", &body).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(items: &[(&str, &str)]) -> BTreeMap<String, String> {
        items
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_merge_is_commutative_per_key() {
        let mut first = ThreadState::new("job");
        first.merge(pairs(&[("a", "1")]), BTreeMap::new());
        first.merge(pairs(&[("b", "2")]), BTreeMap::new());

        let mut second = ThreadState::new("job");
        second.merge(pairs(&[("b", "2")]), BTreeMap::new());
        second.merge(pairs(&[("a", "1")]), BTreeMap::new());

        assert_eq!(first, second);
    }

    #[test]
    fn test_merge_last_writer_wins() {
        let mut state = ThreadState::new("job");
        state.merge(pairs(&[("status", "running")]), pairs(&[("source", "a")]));
        state.merge(pairs(&[("status", "built")]), BTreeMap::new());
        assert_eq!(state.infos, pairs(&[("status", "built")]));
        assert_eq!(state.context, pairs(&[("source", "a")]));
    }

    #[test]
    fn test_garbage_collection_keeps_previous_event() {
        let mut state = ThreadState::new("job");
        state.advance(NotificationEvent::Failed, Some(vec!["boom".to_string()]));
        state.advance(NotificationEvent::GarbageCollected, None);
        assert_eq!(state.event, NotificationEvent::Failed);
        assert_eq!(state.logs, vec!["boom"]);

        let blocks = render_blocks(&state, NotificationEvent::GarbageCollected);
        let text = blocks.to_string();
        assert!(text.contains("garbage collected"));
        assert!(text.contains("Job failed"));
        assert!(text.contains("> boom"));
    }

    #[test]
    fn test_log_tail_is_bounded() {
        let mut state = ThreadState::new("job");
        let lines: Vec<String> = (0..20).map(|i| format!("line {}", i)).collect();
        state.advance(NotificationEvent::InProgress, Some(lines));
        assert_eq!(state.logs.len(), NOTIFICATION_LOG_LINES);
        assert_eq!(state.logs.last().map(String::as_str), Some("line 19"));
    }

    #[test]
    fn test_render_layout() {
        let mut state = ThreadState::new("abc");
        state.merge(pairs(&[("name", "web")]), pairs(&[("source", "host")]));
        let blocks = render_blocks(&state, NotificationEvent::Creation);
        let blocks = blocks.as_array().unwrap();
        assert_eq!(blocks[0]["type"], "header");
        assert!(blocks[1]["text"]["text"].as_str().unwrap().contains("`abc`"));
        assert_eq!(blocks[2]["fields"][0]["text"], "*name*\nweb");
        assert_eq!(blocks.last().unwrap()["type"], "context");
    }

    #[test]
    fn test_metadata_round_trip() {
        let mut state = ThreadState::new("abc");
        state.merge(pairs(&[("name", "web")]), pairs(&[("source", "host")]));
        state.advance(NotificationEvent::InProgress, Some(vec!["x".to_string()]));

        let message = json!({"ts": "1.2", "metadata": slack_metadata(&state)});
        assert_eq!(parse_slack_metadata(&message, "abc"), Some(state));
        assert_eq!(parse_slack_metadata(&message, "other"), None);
        assert_eq!(parse_slack_metadata(&json!({"ts": "1"}), "abc"), None);
    }

    #[test]
    fn test_throttle_gate_raises_and_caps() {
        let gate = ThrottleGate::new(0.5, 0.2, 0.9, Duration::from_secs(3600));
        assert!((gate.skip_probability() - 0.5).abs() < 1e-9);
        gate.record_throttle();
        assert!(gate.skip_probability() > 0.69);
        for _ in 0..10 {
            gate.record_throttle();
        }
        assert!(gate.skip_probability() <= 0.9);
    }

    #[test]
    fn test_throttle_probability_is_clamped() {
        let gate = ThrottleGate::new(0.95, 0.2, 0.9, Duration::from_secs(3600));
        gate.record_throttle();
        assert!((gate.skip_probability() - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_throttle_boost_decays() {
        let gate = ThrottleGate::new(0.0, 0.5, 1.0, Duration::from_millis(10));
        gate.record_throttle();
        std::thread::sleep(Duration::from_millis(100));
        assert!(gate.skip_probability() < 0.01);
    }
}
