use crate::config::Config;
use crate::str_utils;
use crate::types::{ChatRequest, ChatResponse, PenstockError, Result};
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use std::future::Future;
use std::time::Duration;

/// Raw bytes of a streaming response body, available once headers arrive.
pub type ByteStream = BoxStream<'static, std::io::Result<Bytes>>;

/// Seam between the orchestration layers and the HTTP stack. Tests drive the
/// whole pipeline through scripted implementations.
pub trait ChatTransport: Send + Sync {
    /// Opens the streaming endpoint. Resolving means the connection is
    /// established (headers received); no event has necessarily arrived yet.
    fn open_stream(&self, request: ChatRequest) -> impl Future<Output = Result<ByteStream>> + Send;

    /// Single-shot request/response call with a fixed deadline.
    fn complete(&self, request: ChatRequest) -> impl Future<Output = Result<ChatResponse>> + Send;
}

pub fn join_url(base: &str, path: &str) -> String {
    if base.is_empty() {
        return path.to_string();
    }
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Production transport over reqwest.
pub struct ApiClient {
    http: reqwest::Client,
    chat_url: String,
    stream_url: String,
    request_timeout: Duration,
}

impl ApiClient {
    pub fn new(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()?;
        Ok(Self {
            http,
            chat_url: join_url(&config.api_base_url, &config.chat_endpoint),
            stream_url: join_url(&config.api_base_url, &config.stream_endpoint),
            request_timeout: config.request_timeout,
        })
    }
}

impl ChatTransport for ApiClient {
    fn open_stream(&self, request: ChatRequest) -> impl Future<Output = Result<ByteStream>> + Send {
        async move {
            tracing::info!(
                "Starting SSE stream: {}",
                str_utils::prefix_chars(&request.query, 64)
            );
            // No overall deadline here: liveness is the heartbeat watchdog's
            // job, and answers can legitimately take minutes.
            let response = self
                .http
                .post(&self.stream_url)
                .header(reqwest::header::ACCEPT, "text/event-stream")
                .json(&request)
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                let body = match response.text().await {
                    Ok(t) => t,
                    Err(_) => "SSE request failed".to_string(),
                };
                return Err(PenstockError::Upstream(status.as_u16(), body).into());
            }

            Ok(response
                .bytes_stream()
                .map(|r| r.map_err(std::io::Error::other))
                .boxed())
        }
    }

    fn complete(&self, request: ChatRequest) -> impl Future<Output = Result<ChatResponse>> + Send {
        async move {
            tracing::info!(
                "Sending chat message: {}",
                str_utils::prefix_chars(&request.query, 64)
            );
            let response = self
                .http
                .post(&self.chat_url)
                .timeout(self.request_timeout)
                .json(&request)
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                let body = match response.text().await {
                    Ok(t) => t,
                    Err(_) => "chat request failed".to_string(),
                };
                return Err(PenstockError::Upstream(status.as_u16(), body).into());
            }

            Ok(response.json::<ChatResponse>().await?)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_url_avoids_duplicate_slashes() {
        assert_eq!(
            join_url("http://host:8080/", "/api/chat"),
            "http://host:8080/api/chat"
        );
        assert_eq!(
            join_url("http://host:8080", "api/chat"),
            "http://host:8080/api/chat"
        );
        assert_eq!(join_url("", "/api/chat"), "/api/chat");
    }
}
