use crate::api::ChatTransport;
use crate::constants::MAX_STREAM_EVENTS;
use crate::logging::StreamMetric;
use crate::reader;
use crate::store::lock_or_recover;
use crate::types::{
    AbortReason, ChatRequest, EventKind, PenstockError, Result, StreamOutcome, StreamStatus,
    ThinkingEvent,
};
use futures_util::StreamExt;
use std::pin::pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

/// Protocol milestones dispatched to the orchestration layer through a single
/// handler. `Final` and `Error` follow the plain `Event` for the same frame.
#[derive(Debug, Clone)]
pub enum StreamSignal {
    Connected,
    Event(ThinkingEvent),
    Final {
        content: String,
        event: ThinkingEvent,
    },
    Error(String),
    Completed,
}

#[derive(Default)]
struct ControlState {
    token: Option<CancellationToken>,
    reason: Option<AbortReason>,
}

/// Cloneable stop handle shared between the engine and the active session.
/// `stop` is idempotent: once the session settles the token is disarmed and
/// further calls are no-ops.
#[derive(Clone, Default)]
pub struct StopControl {
    inner: Arc<Mutex<ControlState>>,
}

impl StopControl {
    pub fn new() -> Self {
        Self::default()
    }

    fn arm(&self) -> CancellationToken {
        let token = CancellationToken::new();
        let mut state = lock_or_recover(&self.inner);
        state.token = Some(token.clone());
        state.reason = None;
        token
    }

    fn disarm(&self) {
        lock_or_recover(&self.inner).token = None;
    }

    /// User-initiated stop. The first recorded reason wins, so a user stop
    /// racing the watchdog stays classified correctly.
    pub fn stop(&self) {
        let token = {
            let mut state = lock_or_recover(&self.inner);
            match state.token.clone() {
                Some(token) => {
                    state.reason.get_or_insert(AbortReason::User);
                    Some(token)
                }
                None => None,
            }
        };
        if let Some(token) = token {
            token.cancel();
        }
    }

    fn mark_timeout(&self) {
        lock_or_recover(&self.inner)
            .reason
            .get_or_insert(AbortReason::Timeout);
    }

    fn reason(&self) -> Option<AbortReason> {
        lock_or_recover(&self.inner).reason
    }

    pub fn is_active(&self) -> bool {
        lock_or_recover(&self.inner).token.is_some()
    }
}

/// Owns one request's network lifecycle: issues the call, supervises liveness,
/// dispatches events, and reports a single outcome. Never reused; a new user
/// action constructs a new session.
pub struct StreamSession {
    status: StreamStatus,
    control: StopControl,
    liveness_window: Duration,
    preview_max: usize,
}

impl StreamSession {
    pub fn new(control: StopControl, liveness_window: Duration, preview_max: usize) -> Self {
        Self {
            status: StreamStatus::Idle,
            control,
            liveness_window,
            preview_max,
        }
    }

    pub fn status(&self) -> StreamStatus {
        self.status
    }

    pub async fn start<T, F>(
        &mut self,
        transport: &T,
        request: ChatRequest,
        on_signal: &mut F,
    ) -> Result<StreamOutcome>
    where
        T: ChatTransport,
        F: FnMut(StreamSignal),
    {
        let token = self.control.arm();
        let result = self.drive(transport, request, &token, on_signal).await;
        // Runs on every exit path: the token must not outlive the session.
        self.control.disarm();
        result
    }

    async fn drive<T, F>(
        &mut self,
        transport: &T,
        mut request: ChatRequest,
        token: &CancellationToken,
        on_signal: &mut F,
    ) -> Result<StreamOutcome>
    where
        T: ChatTransport,
        F: FnMut(StreamSignal),
    {
        self.status = StreamStatus::Connecting;
        request.stream_thoughts = Some(true);

        let body = tokio::select! {
            res = transport.open_stream(request) => match res {
                Ok(body) => body,
                Err(e) => {
                    self.status = StreamStatus::Error;
                    return Err(e);
                }
            },
            _ = token.cancelled() => return self.settle_cancelled(),
        };

        // Connection established. Leave "connecting" now rather than after the
        // first token, which can take a while.
        self.status = StreamStatus::Streaming;
        on_signal(StreamSignal::Connected);

        let mut events = pin!(reader::events(body, self.preview_max));
        let mut metric = StreamMetric::new();
        let mut trace_label = String::new();
        let mut deadline = Instant::now() + self.liveness_window;

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    metric.log_summary(&trace_label);
                    return self.settle_cancelled();
                }
                _ = time::sleep_until(deadline) => {
                    tracing::warn!("SSE heartbeat timeout, cancelling stream");
                    self.control.mark_timeout();
                    token.cancel();
                }
                next = events.next() => match next {
                    Some(Ok(event)) => {
                        metric.record_event(&event);
                        deadline = Instant::now() + self.liveness_window;

                        if metric.events > MAX_STREAM_EVENTS {
                            self.status = StreamStatus::Error;
                            metric.log_summary(&trace_label);
                            return Err(PenstockError::Stream(format!(
                                "stream exceeded max event limit ({})",
                                MAX_STREAM_EVENTS
                            ))
                            .into());
                        }

                        // Heartbeats only feed the watchdog.
                        if event.kind == EventKind::Heartbeat {
                            continue;
                        }

                        if trace_label.is_empty() && !event.trace_id.is_empty() {
                            trace_label = event.trace_id.clone();
                        }
                        if self.status == StreamStatus::Connecting {
                            self.status = StreamStatus::Streaming;
                        }

                        match event.kind {
                            EventKind::Final => {
                                let content = event.content.clone();
                                on_signal(StreamSignal::Event(event.clone()));
                                on_signal(StreamSignal::Final { content, event });
                            }
                            EventKind::Error => {
                                let message = event.content.clone();
                                on_signal(StreamSignal::Event(event));
                                on_signal(StreamSignal::Error(message));
                            }
                            _ => on_signal(StreamSignal::Event(event)),
                        }
                    }
                    Some(Err(e)) => {
                        self.status = StreamStatus::Error;
                        metric.log_summary(&trace_label);
                        return Err(e.into());
                    }
                    None => break,
                }
            }
        }

        metric.log_summary(&trace_label);

        if metric.events == 0 {
            // Not even a heartbeat: the upstream never produced anything.
            self.status = StreamStatus::Error;
            return Err(PenstockError::EmptyStream.into());
        }

        self.status = StreamStatus::Completed;
        on_signal(StreamSignal::Completed);
        Ok(StreamOutcome::Completed)
    }

    fn settle_cancelled(&mut self) -> Result<StreamOutcome> {
        match self.control.reason() {
            Some(AbortReason::Timeout) => {
                self.status = StreamStatus::Error;
                Err(PenstockError::HeartbeatTimeout(self.liveness_window).into())
            }
            _ => {
                self.status = StreamStatus::Aborted;
                Ok(StreamOutcome::Aborted)
            }
        }
    }
}
