use crate::constants::*;
use std::time::Duration;

/// Runtime configuration, resolved once at startup from the process
/// environment (a `.env` file is honored when present).
#[derive(Debug, Clone)]
pub struct Config {
    pub api_base_url: String,
    pub chat_endpoint: String,
    pub stream_enabled: bool,
    pub stream_endpoint: String,
    pub heartbeat_timeout: Duration,
    pub heartbeat_margin: Duration,
    pub preview_max_length: usize,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub fallback_ttl: Duration,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: String::new(),
            chat_endpoint: DEFAULT_CHAT_ENDPOINT.to_string(),
            stream_enabled: true,
            stream_endpoint: DEFAULT_STREAM_ENDPOINT.to_string(),
            heartbeat_timeout: Duration::from_millis(DEFAULT_HEARTBEAT_TIMEOUT_MS),
            heartbeat_margin: Duration::from_millis(DEFAULT_HEARTBEAT_MARGIN_MS),
            preview_max_length: DEFAULT_PREVIEW_MAX_LENGTH,
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            fallback_ttl: Duration::from_millis(DEFAULT_FALLBACK_TTL_MS),
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let defaults = Self::default();
        Self {
            api_base_url: env_str("QA_API_BASE_URL", &defaults.api_base_url),
            chat_endpoint: env_str("QA_CHAT_ENDPOINT", &defaults.chat_endpoint),
            stream_enabled: env_bool("QA_STREAM_ENABLED", defaults.stream_enabled),
            stream_endpoint: env_str("QA_STREAM_ENDPOINT", &defaults.stream_endpoint),
            heartbeat_timeout: env_duration_ms(
                "QA_STREAM_HEARTBEAT_TIMEOUT_MS",
                defaults.heartbeat_timeout,
            ),
            heartbeat_margin: env_duration_ms(
                "QA_STREAM_HEARTBEAT_MARGIN_MS",
                defaults.heartbeat_margin,
            ),
            preview_max_length: env_usize("QA_PREVIEW_MAX_LENGTH", defaults.preview_max_length),
            request_timeout: env_duration_ms("QA_REQUEST_TIMEOUT_MS", defaults.request_timeout),
            connect_timeout: env_duration_ms("QA_CONNECT_TIMEOUT_MS", defaults.connect_timeout),
            fallback_ttl: env_duration_ms("QA_FALLBACK_TTL_MS", defaults.fallback_ttl),
            log_level: env_str("QA_LOG_LEVEL", &defaults.log_level),
        }
    }

    /// The watchdog window: heartbeat interval plus a margin that tolerates
    /// one missed heartbeat.
    pub fn liveness_window(&self) -> Duration {
        self.heartbeat_timeout + self.heartbeat_margin
    }
}

fn env_str(key: &str, default: &str) -> String {
    match std::env::var(key) {
        Ok(v) if !v.is_empty() => v,
        _ => default.to_string(),
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => parse_bool(&v, default),
        Err(_) => default,
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    match std::env::var(key) {
        Ok(v) => match v.trim().parse() {
            Ok(n) => n,
            Err(_) => {
                tracing::warn!("Invalid value for {}: {:?}, using default", key, v);
                default
            }
        },
        Err(_) => default,
    }
}

fn env_duration_ms(key: &str, default: Duration) -> Duration {
    match std::env::var(key) {
        Ok(v) => match v.trim().parse::<u64>() {
            Ok(ms) => Duration::from_millis(ms),
            Err(_) => {
                tracing::warn!("Invalid value for {}: {:?}, using default", key, v);
                default
            }
        },
        Err(_) => default,
    }
}

fn parse_bool(raw: &str, default: bool) -> bool {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => true,
        "false" | "0" | "no" | "off" => false,
        _ => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_constants() {
        let cfg = Config::default();
        assert_eq!(cfg.chat_endpoint, DEFAULT_CHAT_ENDPOINT);
        assert_eq!(cfg.stream_endpoint, DEFAULT_STREAM_ENDPOINT);
        assert_eq!(cfg.liveness_window(), Duration::from_millis(35_000));
    }

    #[test]
    fn parse_bool_accepts_common_spellings() {
        assert!(parse_bool("true", false));
        assert!(parse_bool("1", false));
        assert!(parse_bool(" ON ", false));
        assert!(!parse_bool("false", true));
        assert!(!parse_bool("0", true));
        assert!(parse_bool("garbage", true));
    }
}
