use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing_error::SpanTrace;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct MessageId(pub String);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct TraceId(pub String);

impl MessageId {
    pub fn new() -> Self {
        Self(format!("msg_{}", Uuid::new_v4().simple()))
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl TraceId {
    pub fn new() -> Self {
        Self(format!("trace_{}", Uuid::new_v4().simple()))
    }

    pub fn short(&self) -> &str {
        crate::str_utils::prefix_chars(&self.0, 14)
    }
}

impl Default for TraceId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<String> for TraceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Error, Debug)]
pub enum PenstockError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Upstream error (status {0}): {1}")]
    Upstream(u16, String),

    #[error("Stream heartbeat timed out after {0:?}")]
    HeartbeatTimeout(Duration),

    #[error("Stream ended without producing any events")]
    EmptyStream,

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Config error: {0}")]
    Config(String),
}

#[derive(Debug)]
pub struct ObservedError {
    pub inner: PenstockError,
    pub span_trace: SpanTrace,
}

impl fmt::Display for ObservedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl std::error::Error for ObservedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.inner)
    }
}

impl<E> From<E> for ObservedError
where
    E: Into<PenstockError>,
{
    fn from(error: E) -> Self {
        Self {
            inner: error.into(),
            span_trace: SpanTrace::capture(),
        }
    }
}

impl ObservedError {
    /// Liveness-timeout errors share the connectivity error path but stay
    /// distinguishable so the orchestrator can pick the silent degrade.
    pub fn is_timeout(&self) -> bool {
        matches!(self.inner, PenstockError::HeartbeatTimeout(_))
    }
}

pub type Result<T> = std::result::Result<T, ObservedError>;

/// --- THINKING STREAM WIRE TYPES ---

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EventKind {
    #[serde(rename = "meta.start")]
    Start,
    #[serde(rename = "router.decision")]
    RouterDecision,
    #[serde(rename = "memory.inject")]
    MemoryInject,
    #[serde(rename = "thought")]
    Thought,
    #[serde(rename = "tool_call")]
    ToolCall,
    #[serde(rename = "tool_result")]
    ToolResult,
    #[serde(rename = "fallback")]
    Fallback,
    #[serde(rename = "final")]
    Final,
    #[serde(rename = "error")]
    Error,
    #[serde(rename = "heartbeat")]
    Heartbeat,
}

impl EventKind {
    /// Structural events whose content may stand in as an interim progress
    /// line while no thought content has arrived yet.
    pub fn is_progress(self) -> bool {
        matches!(
            self,
            EventKind::Start
                | EventKind::RouterDecision
                | EventKind::MemoryInject
                | EventKind::ToolCall
                | EventKind::ToolResult
                | EventKind::Fallback
        )
    }
}

/// One unit of progress information for a single question/answer turn.
///
/// `step` restores ordering when frames arrive out of order; `ts` is always an
/// epoch-millisecond value regardless of the wire representation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ThinkingEvent {
    #[serde(default)]
    pub trace_id: String,
    /// Older backends emit `session_id` instead.
    #[serde(default, alias = "session_id", skip_serializing_if = "Option::is_none")]
    pub turn_id: Option<String>,
    #[serde(default)]
    pub step: u64,
    #[serde(default = "now_ms", deserialize_with = "de_event_ts")]
    pub ts: i64,
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ThinkingEvent {
    /// Synthetic liveness ping; carries nothing but the current time.
    pub fn heartbeat() -> Self {
        Self {
            trace_id: String::new(),
            turn_id: None,
            step: 0,
            ts: now_ms(),
            kind: EventKind::Heartbeat,
            content: String::new(),
            extra: serde_json::Map::new(),
        }
    }

    pub fn extra_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(|v| v.as_str())
    }

    pub fn extra_f64(&self, key: &str) -> Option<f64> {
        self.extra.get(key).and_then(|v| v.as_f64())
    }

    pub fn extra_bool(&self, key: &str) -> Option<bool> {
        self.extra.get(key).and_then(|v| v.as_bool())
    }

    pub fn extra_str_list(&self, key: &str) -> Option<Vec<String>> {
        let arr = self.extra.get(key)?.as_array()?;
        Some(
            arr.iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
        )
    }
}

pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn de_event_ts<'de, D>(de: D) -> std::result::Result<i64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(de)?;
    Ok(coerce_epoch_ms(raw))
}

/// Numeric, ISO-8601 string, or missing timestamps all collapse to epoch
/// milliseconds; unparseable values fall back to the current time.
pub fn coerce_epoch_ms(raw: Option<serde_json::Value>) -> i64 {
    match raw {
        Some(serde_json::Value::Number(n)) => match n.as_i64() {
            Some(i) => i,
            None => match n.as_f64() {
                Some(f) => f as i64,
                None => now_ms(),
            },
        },
        Some(serde_json::Value::String(s)) => match chrono::DateTime::parse_from_rfc3339(&s) {
            Ok(dt) => dt.timestamp_millis(),
            Err(_) => now_ms(),
        },
        _ => now_ms(),
    }
}

/// --- CHAT ENDPOINT WIRE TYPES ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatRequest {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_session: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_thoughts: Option<bool>,
}

impl ChatRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            session_id: None,
            create_session: None,
            reset: None,
            stream_thoughts: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub answer: String,
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub query_type: Option<String>,
    #[serde(default)]
    pub engines_used: Option<Vec<String>>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub enhancement_applied: Option<bool>,
    #[serde(default)]
    pub error: Option<String>,
}

/// --- CONVERSATION DOMAIN TYPES ---

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MessageMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engines_used: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enhancement_applied: Option<bool>,
}

/// A conversation entry. The assistant-side placeholder is created before the
/// network call starts and mutated in place while events arrive; it becomes
/// immutable once terminal content (answer, stop notice, error) is written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: MessageId,
    pub role: MessageRole,
    pub content: String,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MessageMetadata>,
    #[serde(default)]
    pub is_loading: bool,
    #[serde(default)]
    pub streaming: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<TraceId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
    #[serde(default)]
    pub fallback_triggered: bool,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            role: MessageRole::User,
            content: content.into(),
            timestamp: now_ms(),
            metadata: None,
            is_loading: false,
            streaming: false,
            trace_id: None,
            error: None,
            route: None,
            fallback_triggered: false,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            ..Self::user(content)
        }
    }

    pub fn placeholder(trace_id: TraceId) -> Self {
        Self {
            is_loading: true,
            streaming: true,
            trace_id: Some(trace_id),
            ..Self::assistant("")
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub session_id: String,
    pub title: String,
    pub created_at: i64,
    pub last_accessed: i64,
    pub message_count: usize,
}

/// --- STREAM LIFECYCLE TYPES ---

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StreamStatus {
    Idle,
    Connecting,
    Streaming,
    Completed,
    Error,
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    User,
    Timeout,
}

/// Non-error terminal outcomes of one stream session. Failures are reported
/// through the error channel instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    Completed,
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    EmptyInput,
    Busy,
}

/// Terminal outcome of one `send_message` call. Every variant except
/// `Rejected` leaves exactly one new assistant message in the conversation.
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    Rejected(RejectReason),
    Answered(Message),
    Stopped(Message),
    Failed(Message),
}
