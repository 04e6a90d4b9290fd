//! Shared types for kubesight
//!
//! This crate contains data structures used across multiple kubesight crates.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Session Identity
// ============================================================================

/// Maximum length of a Kubernetes object name
const MAX_NAME_LEN: usize = 253;

/// Identity of one logical log stream
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub namespace: String,
    pub pod: String,
    pub container: String,
}

impl SessionKey {
    pub fn new(
        namespace: impl Into<String>,
        pod: impl Into<String>,
        container: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            pod: pod.into(),
            container: container.into(),
        }
    }

    /// Build a key, rejecting names the API server would refuse
    pub fn validated(namespace: &str, pod: &str, container: &str) -> Result<Self, ParamError> {
        validate_name("namespace", namespace)?;
        validate_name("pod", pod)?;
        validate_name("container", container)?;
        Ok(Self::new(namespace, pod, container))
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.pod, self.container)
    }
}

fn validate_name(field: &'static str, value: &str) -> Result<(), ParamError> {
    if value.is_empty() {
        return Err(ParamError::Missing(field));
    }
    let valid_chars = value
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.');
    if value.len() > MAX_NAME_LEN || !valid_chars {
        return Err(ParamError::InvalidName {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

/// Errors raised while validating stream parameters
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParamError {
    #[error("missing required parameter `{0}`")]
    Missing(&'static str),

    #[error("invalid {field} name `{value}`: expected lowercase alphanumerics, '-' or '.'")]
    InvalidName { field: &'static str, value: String },

    #[error("invalid lookback `{0}`: expected digits followed by s, m or h (e.g. 30s, 5m, 1h)")]
    InvalidLookback(String),

    #[error("unknown demo scenario `{0}` (available: crashloop, oom, db-timeout, healthy)")]
    UnknownScenario(String),
}

// ============================================================================
// Stream Parameters
// ============================================================================

/// How far back the upstream should start reading
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Lookback(Duration);

impl Lookback {
    /// Parse `<digits><s|m|h>`, e.g. `30s`, `5m`, `2h`
    pub fn parse(raw: &str) -> Result<Self, ParamError> {
        let invalid = || ParamError::InvalidLookback(raw.to_string());
        let trimmed = raw.trim();
        let unit = trimmed.chars().last().ok_or_else(invalid)?;
        let digits = &trimmed[..trimmed.len() - unit.len_utf8()];

        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }
        let amount: u64 = digits.parse().map_err(|_| invalid())?;
        let multiplier = match unit {
            's' => 1,
            'm' => 60,
            'h' => 60 * 60,
            _ => return Err(invalid()),
        };
        let seconds = amount.checked_mul(multiplier).ok_or_else(invalid)?;
        if seconds == 0 || seconds > i64::MAX as u64 {
            return Err(invalid());
        }

        Ok(Self(Duration::from_secs(seconds)))
    }

    /// Seconds as the API server's `sinceSeconds` expects them
    pub fn as_seconds(&self) -> i64 {
        self.0.as_secs() as i64
    }
}

/// Scripted scenarios available in demo mode
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DemoScenario {
    CrashLoop,
    OomKilled,
    DbTimeout,
    Healthy,
}

impl DemoScenario {
    pub fn from_name(name: &str) -> Result<Self, ParamError> {
        match name.trim().to_lowercase().as_str() {
            "crashloop" | "crash-loop" => Ok(Self::CrashLoop),
            "oom" | "oomkilled" => Ok(Self::OomKilled),
            "db-timeout" | "db" => Ok(Self::DbTimeout),
            "healthy" | "" => Ok(Self::Healthy),
            other => Err(ParamError::UnknownScenario(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::CrashLoop => "crashloop",
            Self::OomKilled => "oom",
            Self::DbTimeout => "db-timeout",
            Self::Healthy => "healthy",
        }
    }
}

/// Where a session's chunks come from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceMode {
    Cluster,
    Demo(DemoScenario),
}

/// Stream parameters as they arrive on the wire (query string)
#[derive(Clone, Debug, Default, Deserialize)]
pub struct StreamQuery {
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub pod: String,
    #[serde(default)]
    pub container: String,
    /// Lookback window, e.g. `5m`
    #[serde(default)]
    pub since: Option<String>,
    /// Server-side line filter
    #[serde(default)]
    pub filter: Option<String>,
    #[serde(default = "default_follow")]
    pub follow: bool,
    #[serde(default)]
    pub demo: bool,
    #[serde(default)]
    pub scenario: Option<String>,
}

fn default_follow() -> bool {
    true
}

/// Validated parameters for one session
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamParams {
    pub key: SessionKey,
    pub since: Option<Lookback>,
    pub filter: Option<String>,
    pub follow: bool,
    pub mode: SourceMode,
}

impl StreamParams {
    pub fn new(key: SessionKey) -> Self {
        Self {
            key,
            since: None,
            filter: None,
            follow: true,
            mode: SourceMode::Cluster,
        }
    }
}

impl TryFrom<StreamQuery> for StreamParams {
    type Error = ParamError;

    fn try_from(query: StreamQuery) -> Result<Self, Self::Error> {
        let key = SessionKey::validated(&query.namespace, &query.pod, &query.container)?;

        let since = match query.since.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(Lookback::parse(raw)?),
        };

        let filter = query.filter.filter(|f| !f.is_empty());

        let mode = if query.demo {
            SourceMode::Demo(DemoScenario::from_name(
                query.scenario.as_deref().unwrap_or_default(),
            )?)
        } else {
            SourceMode::Cluster
        };

        Ok(Self {
            key,
            since,
            filter,
            follow: query.follow,
            mode,
        })
    }
}

// ============================================================================
// Session Lifecycle
// ============================================================================

/// Lifecycle state of a session
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Created, upstream not yet open
    #[default]
    Idle,
    Streaming,
    Ended,
    Errored,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ended | Self::Errored)
    }
}

// ============================================================================
// Events to the Viewer
// ============================================================================

/// Terminal state of one analysis call
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AnalysisOutcome {
    Complete,
    Aborted,
    Failed,
}

impl AnalysisOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::Aborted => "aborted",
            Self::Failed => "failed",
        }
    }
}

/// Structured control messages sent alongside log chunks
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ControlEvent {
    Error(String),
    StreamEnded,
    AnalysisStarted { id: u64 },
    AnalysisFragment { id: u64, text: String },
    AnalysisFinished { id: u64, outcome: AnalysisOutcome },
}

impl ControlEvent {
    /// JSON frame as the viewer expects it
    pub fn to_frame(&self) -> String {
        let value = match self {
            Self::Error(message) => serde_json::json!({ "error": message }),
            Self::StreamEnded => serde_json::json!({ "event": "stream_ended" }),
            Self::AnalysisStarted { id } => {
                serde_json::json!({ "event": "analysis_started", "id": id })
            }
            Self::AnalysisFragment { id, text } => {
                serde_json::json!({ "event": "analysis", "id": id, "text": text })
            }
            Self::AnalysisFinished { id, outcome } => serde_json::json!({
                "event": "analysis_finished",
                "id": id,
                "outcome": outcome.as_str(),
            }),
        };
        value.to_string()
    }
}

/// Everything a session pushes towards its viewer
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamEvent {
    /// Sanitized log text
    Chunk(String),
    Control(ControlEvent),
}

/// Requests a viewer may send over its connection
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ViewerRequest {
    Stop,
    Clear,
    Analyze {
        #[serde(default)]
        question: Option<String>,
    },
}

// ============================================================================
// Analysis Types
// ============================================================================

/// Where the analyzed excerpt came from
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisMeta {
    pub namespace: String,
    pub pod: String,
    pub container: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<String>,
}

impl AnalysisMeta {
    pub fn for_key(key: &SessionKey, cluster: Option<String>) -> Self {
        Self {
            namespace: key.namespace.clone(),
            pod: key.pod.clone(),
            container: key.container.clone(),
            cluster,
        }
    }
}

/// One request for a diagnostic explanation
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRequest {
    pub meta: AnalysisMeta,
    #[serde(default)]
    pub recent_log_chunk: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
}

/// Tuning for when analysis fires
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TriggerConfig {
    /// Lines since the last trigger before a new one is proposed
    pub line_threshold: usize,
    /// Minimum time between two fired triggers
    pub cooldown_secs: u64,
    /// Minimum amount of new text before a proposal is worth sending
    pub min_new_chars: usize,
    /// Number of most recent lines sent with a request
    pub tail_window: usize,
    pub buffer_capacity: usize,
    /// Upper bound on the excerpt size in characters
    pub max_excerpt_chars: usize,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            line_threshold: 10,
            cooldown_secs: 5,
            min_new_chars: 80,
            tail_window: 50,
            buffer_capacity: 1000,
            max_excerpt_chars: 12_000,
        }
    }
}

impl TriggerConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(since: Option<&str>) -> StreamQuery {
        StreamQuery {
            namespace: "payments".to_string(),
            pod: "api-7d9f8-xk2p".to_string(),
            container: "api".to_string(),
            since: since.map(str::to_string),
            follow: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_lookback_units() {
        assert_eq!(Lookback::parse("30s").unwrap().as_seconds(), 30);
        assert_eq!(Lookback::parse("5m").unwrap().as_seconds(), 300);
        assert_eq!(Lookback::parse("2h").unwrap().as_seconds(), 7200);
    }

    #[test]
    fn test_lookback_rejects_malformed() {
        for raw in ["5x", "m", "", "-5m", "5", "1.5h", "5 m", "0s", "99999999999999999999h"] {
            assert!(Lookback::parse(raw).is_err(), "accepted {raw:?}");
        }
    }

    #[test]
    fn test_lookback_error_is_descriptive() {
        let err = Lookback::parse("5x").unwrap_err();
        assert!(err.to_string().contains("5x"));
    }

    #[test]
    fn test_params_from_query() {
        let params = StreamParams::try_from(query(Some("5m"))).unwrap();
        assert_eq!(params.key, SessionKey::new("payments", "api-7d9f8-xk2p", "api"));
        assert_eq!(params.since.map(|l| l.as_seconds()), Some(300));
        assert_eq!(params.mode, SourceMode::Cluster);
        assert!(params.follow);
    }

    #[test]
    fn test_params_reject_invalid_lookback() {
        let err = StreamParams::try_from(query(Some("5x"))).unwrap_err();
        assert_eq!(err, ParamError::InvalidLookback("5x".to_string()));
    }

    #[test]
    fn test_params_reject_bad_names() {
        let mut q = query(None);
        q.pod = "../etc".to_string();
        assert!(matches!(
            StreamParams::try_from(q),
            Err(ParamError::InvalidName { field: "pod", .. })
        ));

        let mut q = query(None);
        q.container.clear();
        assert_eq!(
            StreamParams::try_from(q).unwrap_err(),
            ParamError::Missing("container")
        );
    }

    #[test]
    fn test_demo_scenario_selection() {
        let mut q = query(None);
        q.demo = true;
        q.scenario = Some("oom".to_string());
        let params = StreamParams::try_from(q.clone()).unwrap();
        assert_eq!(params.mode, SourceMode::Demo(DemoScenario::OomKilled));

        q.scenario = Some("meteor-strike".to_string());
        assert!(matches!(
            StreamParams::try_from(q),
            Err(ParamError::UnknownScenario(_))
        ));
    }

    #[test]
    fn test_control_frames() {
        assert_eq!(
            ControlEvent::StreamEnded.to_frame(),
            r#"{"event":"stream_ended"}"#
        );
        assert_eq!(
            ControlEvent::Error("boom".to_string()).to_frame(),
            r#"{"error":"boom"}"#
        );
        let finished = ControlEvent::AnalysisFinished {
            id: 3,
            outcome: AnalysisOutcome::Failed,
        };
        let value: serde_json::Value = serde_json::from_str(&finished.to_frame()).unwrap();
        assert_eq!(value["outcome"], "failed");
        assert_eq!(value["id"], 3);
    }

    #[test]
    fn test_viewer_requests() {
        let req: ViewerRequest = serde_json::from_str(r#"{"action":"stop"}"#).unwrap();
        assert_eq!(req, ViewerRequest::Stop);

        let req: ViewerRequest =
            serde_json::from_str(r#"{"action":"analyze","question":"why?"}"#).unwrap();
        assert_eq!(
            req,
            ViewerRequest::Analyze {
                question: Some("why?".to_string())
            }
        );
    }

    #[test]
    fn test_analysis_request_wire_format() {
        let raw = r#"{"meta":{"namespace":"ns","pod":"p","container":"c"},"recentLogChunk":"line"}"#;
        let req: AnalysisRequest = serde_json::from_str(raw).unwrap();
        assert_eq!(req.recent_log_chunk, "line");
        assert_eq!(req.meta.cluster, None);
        assert_eq!(req.question, None);
    }
}
