use crate::types::{EventKind, ThinkingEvent};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Installs the global subscriber. `RUST_LOG` wins over the configured level.
/// Safe to call more than once; later calls are no-ops.
pub fn init(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string()));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init();
}

/// Per-stream accounting, logged once when the stream settles.
#[derive(Default)]
pub struct StreamMetric {
    pub events: usize,
    pub heartbeats: usize,
    pub thought_chars: usize,
    pub tool_events: usize,
    pub tool_names: Vec<String>,
}

impl StreamMetric {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_event(&mut self, event: &ThinkingEvent) {
        self.events += 1;
        match event.kind {
            EventKind::Heartbeat => self.heartbeats += 1,
            EventKind::Thought => self.thought_chars += event.content.len(),
            EventKind::ToolCall | EventKind::ToolResult => {
                self.tool_events += 1;
                if let Some(name) = event.extra_str("tool_name") {
                    if !name.is_empty() && !self.tool_names.iter().any(|n| n == name) {
                        self.tool_names.push(name.to_string());
                    }
                }
            }
            _ => {}
        }
    }

    pub fn log_summary(&self, trace_id: &str) {
        let tools_str = if self.tool_names.is_empty() {
            format!("{}", self.tool_events)
        } else {
            format!("{} ({})", self.tool_events, self.tool_names.join(", "))
        };

        info!(
            "[STREAM END] Trace: {} | Events: {} | Heartbeats: {} | Tools: {} | Thought: {} chars",
            trace_id, self.events, self.heartbeats, tools_str, self.thought_chars
        );
    }
}
