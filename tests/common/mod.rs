#![allow(dead_code)]

use bytes::Bytes;
use futures_util::{stream, StreamExt};
use penstock::{
    ByteStream, ChatRequest, ChatResponse, ChatTransport, Config, PenstockError, Result,
};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One scripted response of the streaming endpoint.
pub enum StreamScript {
    /// Emit these chunks, then end the body.
    Blocks(Vec<String>),
    /// Emit these chunks, then produce nothing ever again.
    BlocksThenHang(Vec<String>),
    /// Never finish connecting.
    ConnectHang,
    /// Fail before the connection opens.
    ConnectError(String),
    /// Arbitrary pre-built body.
    Custom(ByteStream),
}

/// One scripted response of the single-shot endpoint.
pub enum CompleteScript {
    Respond(ChatResponse),
    Fail(String),
}

#[derive(Default)]
struct MockInner {
    streams: Mutex<VecDeque<StreamScript>>,
    completions: Mutex<VecDeque<CompleteScript>>,
    stream_calls: AtomicUsize,
    complete_calls: AtomicUsize,
    stream_requests: Mutex<Vec<ChatRequest>>,
    complete_requests: Mutex<Vec<ChatRequest>>,
    complete_delay: Mutex<Option<Duration>>,
}

/// Scripted transport; clones share state so tests can assert on calls made
/// through the engine.
#[derive(Clone, Default)]
pub struct MockTransport {
    inner: Arc<MockInner>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_stream(&self, script: StreamScript) {
        self.inner.streams.lock().unwrap().push_back(script);
    }

    pub fn push_completion(&self, script: CompleteScript) {
        self.inner.completions.lock().unwrap().push_back(script);
    }

    pub fn set_complete_delay(&self, delay: Duration) {
        *self.inner.complete_delay.lock().unwrap() = Some(delay);
    }

    pub fn stream_calls(&self) -> usize {
        self.inner.stream_calls.load(Ordering::SeqCst)
    }

    pub fn complete_calls(&self) -> usize {
        self.inner.complete_calls.load(Ordering::SeqCst)
    }

    pub fn stream_requests(&self) -> Vec<ChatRequest> {
        self.inner.stream_requests.lock().unwrap().clone()
    }

    pub fn complete_requests(&self) -> Vec<ChatRequest> {
        self.inner.complete_requests.lock().unwrap().clone()
    }
}

fn chunks_to_stream(chunks: Vec<String>) -> ByteStream {
    tokio_stream::iter(
        chunks
            .into_iter()
            .map(|c| Ok(Bytes::from(c)) as std::io::Result<Bytes>)
            .collect::<Vec<_>>(),
    )
    .boxed()
}

impl ChatTransport for MockTransport {
    fn open_stream(&self, request: ChatRequest) -> impl Future<Output = Result<ByteStream>> + Send {
        async move {
            self.inner.stream_calls.fetch_add(1, Ordering::SeqCst);
            self.inner.stream_requests.lock().unwrap().push(request);
            let script = self
                .inner
                .streams
                .lock()
                .unwrap()
                .pop_front()
                .expect("unexpected open_stream call");
            match script {
                StreamScript::Blocks(chunks) => Ok(chunks_to_stream(chunks)),
                StreamScript::BlocksThenHang(chunks) => {
                    Ok(chunks_to_stream(chunks).chain(stream::pending()).boxed())
                }
                StreamScript::ConnectHang => {
                    futures_util::future::pending::<()>().await;
                    unreachable!("pending future resolved")
                }
                StreamScript::ConnectError(msg) => Err(PenstockError::Stream(msg).into()),
                StreamScript::Custom(body) => Ok(body),
            }
        }
    }

    fn complete(&self, request: ChatRequest) -> impl Future<Output = Result<ChatResponse>> + Send {
        async move {
            self.inner.complete_calls.fetch_add(1, Ordering::SeqCst);
            self.inner.complete_requests.lock().unwrap().push(request);
            let delay = *self.inner.complete_delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            match self
                .inner
                .completions
                .lock()
                .unwrap()
                .pop_front()
                .expect("unexpected complete call")
            {
                CompleteScript::Respond(resp) => Ok(resp),
                CompleteScript::Fail(msg) => Err(PenstockError::Stream(msg).into()),
            }
        }
    }
}

/// Serializes one SSE block for a thinking event.
pub fn event_block(payload: serde_json::Value) -> String {
    let kind = payload["type"].as_str().unwrap_or("thought").to_string();
    format!("event: {}\ndata: {}\n\n", kind, payload)
}

pub fn simple_block(kind: &str, trace: &str, step: u64, content: &str) -> String {
    event_block(serde_json::json!({
        "trace_id": trace,
        "step": step,
        "ts": step,
        "type": kind,
        "content": content,
    }))
}

pub fn heartbeat_block() -> String {
    "event: heartbeat\n\n".to_string()
}

pub fn answer_response(answer: &str, session_id: &str) -> ChatResponse {
    ChatResponse {
        success: true,
        answer: answer.to_string(),
        session_id: session_id.to_string(),
        query_type: Some("general".to_string()),
        ..ChatResponse::default()
    }
}

/// Config with short liveness windows so watchdog tests stay fast.
pub fn test_config() -> Config {
    Config {
        stream_enabled: true,
        heartbeat_timeout: Duration::from_millis(100),
        heartbeat_margin: Duration::from_millis(50),
        ..Config::default()
    }
}
