use crate::str_utils;
use crate::types::ThinkingEvent;

/// Converts one delimited SSE block into zero or one event.
///
/// A `event: heartbeat` block with no data becomes a synthetic heartbeat so
/// the caller can reset its liveness timer; it is filtered out before reaching
/// UI-facing consumers. Malformed payloads are logged and swallowed — a bad
/// block must not terminate the stream.
pub fn parse_block(block: &str, preview_max: usize) -> Option<ThinkingEvent> {
    let mut event_type = "";
    let mut data_lines: Vec<&str> = Vec::new();

    for raw_line in block.split('\n') {
        let line = raw_line.strip_suffix('\r').unwrap_or(raw_line);
        if line.starts_with(':') {
            continue;
        }
        if let Some(rest) = line.strip_prefix("event:") {
            event_type = rest.trim();
        } else if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.trim());
        }
    }

    let data = data_lines.join("\n");

    if event_type == "heartbeat" && data.is_empty() {
        tracing::debug!("SSE heartbeat received");
        return Some(ThinkingEvent::heartbeat());
    }

    if data.is_empty() {
        return None;
    }

    let mut event: ThinkingEvent = match serde_json::from_str(&data) {
        Ok(ev) => ev,
        Err(err) => {
            tracing::warn!(
                "Failed to parse SSE data: {} ({})",
                err,
                str_utils::prefix_chars(&data, 200)
            );
            return None;
        }
    };

    // Cap oversized tool previews. The only payload mutation the parser does.
    if let Some(serde_json::Value::String(preview)) = event.extra.get_mut("preview") {
        if preview.chars().count() > preview_max {
            *preview = str_utils::truncate_with_ellipsis(preview, preview_max);
        }
    }

    Some(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EventKind;

    const PREVIEW_MAX: usize = 500;

    #[test]
    fn well_formed_block_round_trips() {
        let block = "event: thought\ndata: {\"trace_id\":\"t-1\",\"step\":3,\"ts\":1717000000123,\"type\":\"thought\",\"content\":\"查询传感器数据...\"}";
        let event = parse_block(block, PREVIEW_MAX).expect("event expected");
        assert_eq!(event.trace_id, "t-1");
        assert_eq!(event.step, 3);
        assert_eq!(event.ts, 1717000000123);
        assert_eq!(event.kind, EventKind::Thought);
        assert_eq!(event.content, "查询传感器数据...");
    }

    #[test]
    fn malformed_json_yields_nothing() {
        let block = "data: {not json";
        assert!(parse_block(block, PREVIEW_MAX).is_none());
    }

    #[test]
    fn unknown_event_type_yields_nothing() {
        let block = r#"data: {"trace_id":"t-1","step":1,"type":"mystery","content":""}"#;
        assert!(parse_block(block, PREVIEW_MAX).is_none());
    }

    #[test]
    fn comment_only_block_yields_nothing() {
        assert!(parse_block(": keep-alive comment", PREVIEW_MAX).is_none());
        assert!(parse_block("", PREVIEW_MAX).is_none());
    }

    #[test]
    fn heartbeat_block_becomes_synthetic_event() {
        let event = parse_block("event: heartbeat", PREVIEW_MAX).expect("heartbeat expected");
        assert_eq!(event.kind, EventKind::Heartbeat);
        assert!(event.trace_id.is_empty());
        assert!(event.content.is_empty());
        assert!(event.ts > 0);
    }

    #[test]
    fn legacy_session_id_maps_to_turn_id() {
        let block = r#"data: {"trace_id":"t-1","session_id":"sess-9","step":1,"type":"meta.start","content":""}"#;
        let event = parse_block(block, PREVIEW_MAX).expect("event expected");
        assert_eq!(event.turn_id.as_deref(), Some("sess-9"));
    }

    #[test]
    fn iso_timestamp_is_normalized_to_epoch_ms() {
        let block = r#"data: {"trace_id":"t-1","step":1,"ts":"2024-05-29T16:26:40.123Z","type":"thought","content":"x"}"#;
        let event = parse_block(block, PREVIEW_MAX).expect("event expected");
        assert_eq!(event.ts, 1717000000123);
    }

    #[test]
    fn missing_timestamp_defaults_to_now() {
        let before = chrono::Utc::now().timestamp_millis();
        let block = r#"data: {"trace_id":"t-1","step":1,"type":"thought","content":"x"}"#;
        let event = parse_block(block, PREVIEW_MAX).expect("event expected");
        assert!(event.ts >= before);
    }

    #[test]
    fn oversized_preview_is_truncated() {
        let long = "x".repeat(600);
        let block = format!(
            r#"data: {{"trace_id":"t-1","step":1,"type":"tool_result","content":"","extra":{{"preview":"{long}"}}}}"#
        );
        let event = parse_block(&block, PREVIEW_MAX).expect("event expected");
        let preview = event.extra_str("preview").expect("preview kept");
        assert_eq!(preview.chars().count(), PREVIEW_MAX + 3);
        assert!(preview.ends_with("..."));
    }

    #[test]
    fn multi_line_data_is_rejoined() {
        let block = "data: {\"trace_id\":\"t-1\",\"step\":1,\ndata: \"type\":\"thought\",\"content\":\"ok\"}";
        // Lines are trimmed and rejoined with newlines; JSON tolerates the
        // embedded newline between fields.
        let event = parse_block(block, PREVIEW_MAX).expect("event expected");
        assert_eq!(event.content, "ok");
    }

    #[test]
    fn crlf_lines_are_accepted() {
        let block = "event: thought\r\ndata: {\"trace_id\":\"t-1\",\"step\":2,\"type\":\"thought\",\"content\":\"ok\"}\r";
        let event = parse_block(block, PREVIEW_MAX).expect("event expected");
        assert_eq!(event.step, 2);
    }
}
