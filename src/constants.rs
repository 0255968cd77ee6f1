/// Endpoint defaults, overridable through the environment.
pub const DEFAULT_CHAT_ENDPOINT: &str = "/api/chat";
pub const DEFAULT_STREAM_ENDPOINT: &str = "/api/react_stream";

/// Liveness defaults. The margin tolerates one missed heartbeat before the
/// watchdog declares the connection dead; it is a tunable, not a protocol
/// guarantee.
pub const DEFAULT_HEARTBEAT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_HEARTBEAT_MARGIN_MS: u64 = 5_000;

/// Fixed deadline for the single-shot endpoint. The streaming path carries no
/// overall deadline; liveness is the heartbeat watchdog's job.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 300_000;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Cooldown window during which sends skip straight to single-shot after a
/// stream failure.
pub const DEFAULT_FALLBACK_TTL_MS: u64 = 600_000;

/// Tool previews longer than this are truncated before reaching consumers.
pub const DEFAULT_PREVIEW_MAX_LENGTH: usize = 500;

/// Upper bound on events accepted from one stream.
pub const MAX_STREAM_EVENTS: usize = 10_000;

/// Session titles derive from the first query, truncated to this many chars.
pub const SESSION_TITLE_MAX_CHARS: usize = 20;

/// Key-value storage keys, shared with the original web client.
pub const SESSION_STORAGE_KEY: &str = "qa_agent_sessions";
pub const FALLBACK_STORAGE_KEY: &str = "qa_agent_stream_fallback";

/// User-facing strings (the product surface is Chinese).
pub const MSG_EMPTY_INPUT: &str = "请输入消息内容";
pub const MSG_BUSY: &str = "请等待当前消息处理完成";
pub const MSG_STOPPED: &str = "已停止生成";
pub const MSG_ANSWER_FAILED: &str = "抱歉，处理您的问题时出现错误，请稍后重试。";
pub const MSG_SEND_FAILED: &str = "发送消息失败";
pub const MSG_UNKNOWN_ERROR: &str = "未知错误";
pub const MSG_DEGRADED: &str = "已切换至标准模式";
