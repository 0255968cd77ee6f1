use crate::api::ChatTransport;
use crate::config::Config;
use crate::constants::{
    MSG_ANSWER_FAILED, MSG_BUSY, MSG_DEGRADED, MSG_EMPTY_INPUT, MSG_SEND_FAILED, MSG_STOPPED,
    MSG_UNKNOWN_ERROR,
};
use crate::fallback::FallbackGate;
use crate::session::{StopControl, StreamSession, StreamSignal};
use crate::store::{lock_or_recover, Conversation, SessionIndex, SessionStore};
use crate::str_utils;
use crate::trace::TraceStore;
use crate::types::{
    ChatRequest, EventKind, Message, MessageId, MessageMetadata, RejectReason, SendOutcome,
    Session, StreamOutcome, StreamStatus, ThinkingEvent, TraceId,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastLevel {
    Info,
    Warning,
    Error,
}

/// Notifications for the hosting UI, fanned out over a broadcast channel.
#[derive(Debug, Clone)]
pub enum UiEvent {
    Toast { level: ToastLevel, text: String },
    Status(StreamStatus),
}

/// Per-turn state fed by stream signals while a session runs.
struct TurnProgress {
    trace_id: TraceId,
    first_event_seen: bool,
    thought_seen: bool,
    query_type: Option<String>,
    route: Option<String>,
    fallback_seen: bool,
    finale: Option<(String, ThinkingEvent)>,
    server_error: Option<String>,
}

impl TurnProgress {
    fn new(trace_id: TraceId) -> Self {
        Self {
            trace_id,
            first_event_seen: false,
            thought_seen: false,
            query_type: None,
            route: None,
            fallback_seen: false,
            finale: None,
            server_error: None,
        }
    }
}

enum StreamDelivery {
    Done(SendOutcome),
    /// Stream unusable; retry the same logical request over the single-shot
    /// path. Carries the (possibly server-corrected) trace id to discard.
    Degrade(TraceId),
}

struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// The single entry point a UI action invokes. Owns conversation state, the
/// stream-vs-fallback policy, and the guarantee that exactly one assistant
/// message results from each accepted send.
pub struct ChatEngine<T> {
    transport: T,
    config: Config,
    conversation: Mutex<Conversation>,
    traces: TraceStore,
    sessions: Mutex<SessionIndex>,
    current_session: Mutex<Option<String>>,
    fallback: FallbackGate,
    control: StopControl,
    in_flight: AtomicBool,
    tx_ui: broadcast::Sender<UiEvent>,
}

impl<T: ChatTransport> ChatEngine<T> {
    pub fn new(transport: T, config: Config, store: Arc<dyn SessionStore>) -> Self {
        let (tx_ui, _) = broadcast::channel(64);
        Self {
            transport,
            fallback: FallbackGate::new(config.fallback_ttl, store.clone()),
            sessions: Mutex::new(SessionIndex::load(store)),
            config,
            conversation: Mutex::new(Conversation::default()),
            traces: TraceStore::new(),
            current_session: Mutex::new(None),
            control: StopControl::new(),
            in_flight: AtomicBool::new(false),
            tx_ui,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UiEvent> {
        self.tx_ui.subscribe()
    }

    pub fn messages(&self) -> Vec<Message> {
        lock_or_recover(&self.conversation).messages().to_vec()
    }

    pub fn trace_events(&self, trace_id: &TraceId) -> Vec<ThinkingEvent> {
        self.traces.events(trace_id)
    }

    pub fn sessions(&self) -> Vec<Session> {
        lock_or_recover(&self.sessions).sessions().to_vec()
    }

    pub fn current_session(&self) -> Option<String> {
        lock_or_recover(&self.current_session).clone()
    }

    /// Host-side session switching; history loading is the host's concern.
    pub fn set_current_session(&self, session_id: Option<String>) {
        *lock_or_recover(&self.current_session) = session_id;
    }

    pub fn clear_messages(&self) {
        lock_or_recover(&self.conversation).clear();
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn fallback_active(&self) -> bool {
        self.fallback.active()
    }

    /// Stops the in-flight stream, if any. Idempotent; a no-op once the
    /// session has settled.
    pub fn stop_generation(&self) {
        self.control.stop();
    }

    pub async fn send_message(&self, text: &str) -> SendOutcome {
        let query = text.trim().to_string();
        if query.is_empty() {
            self.toast(ToastLevel::Warning, MSG_EMPTY_INPUT);
            return SendOutcome::Rejected(RejectReason::EmptyInput);
        }

        // Hard serialization point: one send at a time. A second call while
        // busy is a no-op with a warning, not a backlog.
        if self.in_flight.swap(true, Ordering::SeqCst) {
            self.toast(ToastLevel::Warning, MSG_BUSY);
            return SendOutcome::Rejected(RejectReason::Busy);
        }
        let _guard = InFlightGuard(&self.in_flight);

        tracing::info!("User message sent: {}", str_utils::prefix_chars(&query, 64));
        {
            let mut conv = lock_or_recover(&self.conversation);
            conv.push(Message::user(query.clone()));
        }

        let trace_id = TraceId::new();
        let placeholder_id = {
            let mut conv = lock_or_recover(&self.conversation);
            conv.push(Message::placeholder(trace_id.clone()))
        };

        let current = self.current_session();
        let request = ChatRequest {
            query: query.clone(),
            create_session: Some(current.is_none()),
            session_id: current,
            reset: None,
            stream_thoughts: None,
        };

        if !self.config.stream_enabled || self.fallback.active() {
            return self
                .deliver_single_shot(&placeholder_id, request, &query)
                .await;
        }

        match self
            .deliver_streaming(&placeholder_id, trace_id, request.clone(), &query)
            .await
        {
            StreamDelivery::Done(outcome) => outcome,
            StreamDelivery::Degrade(trace_id) => {
                // Retry delivery only; re-entering send_message would append
                // the user message a second time. Partial traces never leak
                // into a fallback-obtained answer.
                self.traces.clear(&trace_id);
                if self.fallback.trip() {
                    self.toast(ToastLevel::Info, MSG_DEGRADED);
                }
                self.deliver_single_shot(&placeholder_id, request, &query)
                    .await
            }
        }
    }

    async fn deliver_streaming(
        &self,
        placeholder_id: &MessageId,
        trace_id: TraceId,
        request: ChatRequest,
        query: &str,
    ) -> StreamDelivery {
        let mut session = StreamSession::new(
            self.control.clone(),
            self.config.liveness_window(),
            self.config.preview_max_length,
        );
        let mut progress = TurnProgress::new(trace_id);
        self.emit_status(StreamStatus::Connecting);

        let result = {
            let mut handler =
                |signal: StreamSignal| self.on_stream_signal(placeholder_id, &mut progress, signal);
            session.start(&self.transport, request, &mut handler).await
        };

        match result {
            Ok(StreamOutcome::Completed) => match progress.finale.take() {
                Some((content, event)) => {
                    let message =
                        self.finalize_stream_answer(placeholder_id, &progress, content, event, query);
                    StreamDelivery::Done(SendOutcome::Answered(message))
                }
                None => {
                    match &progress.server_error {
                        Some(err) => tracing::error!("Stream reported error: {}", err),
                        None => tracing::error!("Stream completed without a final event"),
                    }
                    StreamDelivery::Degrade(progress.trace_id)
                }
            },
            Ok(StreamOutcome::Aborted) => {
                self.emit_status(StreamStatus::Aborted);
                tracing::info!("SSE stream aborted by user");
                let message = self.mutate_message(placeholder_id, |m| {
                    m.content = MSG_STOPPED.to_string();
                    m.streaming = false;
                    m.is_loading = false;
                });
                StreamDelivery::Done(SendOutcome::Stopped(message))
            }
            Err(e) => {
                self.emit_status(StreamStatus::Error);
                if e.is_timeout() {
                    tracing::warn!("Stream liveness lost, degrading to single-shot: {}", e);
                } else {
                    tracing::error!("SSE stream failed, degrading to single-shot: {}", e);
                }
                StreamDelivery::Degrade(progress.trace_id)
            }
        }
    }

    fn on_stream_signal(
        &self,
        placeholder_id: &MessageId,
        progress: &mut TurnProgress,
        signal: StreamSignal,
    ) {
        match signal {
            StreamSignal::Connected => self.emit_status(StreamStatus::Streaming),
            StreamSignal::Completed => self.emit_status(StreamStatus::Completed),
            StreamSignal::Final { content, event } => {
                progress.finale = Some((content, event));
            }
            StreamSignal::Error(message) => {
                progress.server_error = Some(message);
            }
            StreamSignal::Event(event) => self.on_stream_event(placeholder_id, progress, event),
        }
    }

    fn on_stream_event(
        &self,
        placeholder_id: &MessageId,
        progress: &mut TurnProgress,
        event: ThinkingEvent,
    ) {
        if !progress.first_event_seen {
            progress.first_event_seen = true;
            // Adopt the server-confirmed trace id when it differs from the
            // client-generated one.
            if !event.trace_id.is_empty() && event.trace_id != progress.trace_id.0 {
                tracing::debug!(
                    "Adopting server trace id {} (was {})",
                    event.trace_id,
                    progress.trace_id.short()
                );
                progress.trace_id = TraceId(event.trace_id.clone());
            }
            let adopted = progress.trace_id.clone();
            self.mutate_message(placeholder_id, |m| {
                m.is_loading = false;
                m.trace_id = Some(adopted);
            });
        }

        match event.kind {
            EventKind::RouterDecision => {
                if let Some(query_type) = event.extra_str("query_type") {
                    progress.query_type = Some(query_type.to_string());
                }
                if let Some(route) = event.extra_str("route") {
                    progress.route = Some(route.to_string());
                }
            }
            EventKind::Fallback => progress.fallback_seen = true,
            _ => {}
        }

        // Live display: thought content wins, last write wins. Until the
        // first thought, structural events may fill an empty bubble so the
        // user is not staring at nothing through long gaps.
        if event.kind == EventKind::Thought && !event.content.is_empty() {
            progress.thought_seen = true;
            let content = event.content.clone();
            self.mutate_message(placeholder_id, |m| m.content = content);
        } else if !progress.thought_seen && event.kind.is_progress() && !event.content.is_empty() {
            let content = event.content.clone();
            self.mutate_message(placeholder_id, |m| {
                if m.content.is_empty() {
                    m.content = content;
                }
            });
        }

        // The final answer lives on the message, not in the trace timeline.
        if event.kind != EventKind::Final {
            self.traces.append(&progress.trace_id, event);
        }
    }

    fn finalize_stream_answer(
        &self,
        placeholder_id: &MessageId,
        progress: &TurnProgress,
        content: String,
        event: ThinkingEvent,
        query: &str,
    ) -> Message {
        // The final event is authoritative: fields it does not carry are
        // cleared, not inherited from earlier stream values.
        let metadata = MessageMetadata {
            query_type: progress.query_type.clone(),
            engines_used: event.extra_str_list("engines_used"),
            confidence: event.extra_f64("confidence"),
            enhancement_applied: event.extra_bool("enhancement_applied"),
        };
        let route = progress
            .route
            .clone()
            .or_else(|| event.extra_str("route").map(str::to_string));
        let fallback_triggered =
            progress.fallback_seen || event.extra_bool("fallback_triggered").unwrap_or(false);

        let message = self.mutate_message(placeholder_id, |m| {
            m.content = content;
            m.streaming = false;
            m.is_loading = false;
            m.metadata = Some(metadata);
            m.route = route;
            m.fallback_triggered = fallback_triggered;
        });

        let session_id = event.turn_id.clone().or_else(|| self.current_session());
        if let Some(session_id) = session_id {
            self.reconcile_session(&session_id, query);
        }
        message
    }

    async fn deliver_single_shot(
        &self,
        placeholder_id: &MessageId,
        mut request: ChatRequest,
        query: &str,
    ) -> SendOutcome {
        request.stream_thoughts = None;
        match self.transport.complete(request).await {
            Ok(resp) if resp.success => {
                tracing::info!(
                    "Chat response received: query_type={:?} engines={:?}",
                    resp.query_type,
                    resp.engines_used
                );
                let mut message = Message::assistant(resp.answer.clone());
                message.metadata = Some(MessageMetadata {
                    query_type: resp.query_type.clone(),
                    engines_used: resp.engines_used.clone(),
                    confidence: resp.confidence,
                    enhancement_applied: resp.enhancement_applied,
                });
                {
                    let mut conv = lock_or_recover(&self.conversation);
                    conv.remove(placeholder_id);
                    conv.push(message.clone());
                }
                if !resp.session_id.is_empty() {
                    self.reconcile_session(&resp.session_id, query);
                }
                SendOutcome::Answered(message)
            }
            Ok(resp) => {
                let error = match resp.error {
                    Some(e) if !e.is_empty() => e,
                    _ => MSG_UNKNOWN_ERROR.to_string(),
                };
                self.fail_single_shot(placeholder_id, error)
            }
            Err(e) => self.fail_single_shot(placeholder_id, e.to_string()),
        }
    }

    fn fail_single_shot(&self, placeholder_id: &MessageId, error: String) -> SendOutcome {
        tracing::error!("Failed to send message: {}", error);
        let mut message = Message::assistant(MSG_ANSWER_FAILED);
        message.error = Some(error);
        {
            let mut conv = lock_or_recover(&self.conversation);
            conv.remove(placeholder_id);
            conv.push(message.clone());
        }
        self.toast(ToastLevel::Error, MSG_SEND_FAILED);
        SendOutcome::Failed(message)
    }

    /// Creates the session record on the first answer of a fresh conversation
    /// (title derived from the query), updates bookkeeping afterwards.
    fn reconcile_session(&self, session_id: &str, query: &str) {
        let message_count = lock_or_recover(&self.conversation).len();
        {
            let mut sessions = lock_or_recover(&self.sessions);
            if !sessions.touch(session_id, message_count) {
                sessions.create(session_id, query, message_count);
            }
        }
        let mut current = lock_or_recover(&self.current_session);
        if current.as_deref() != Some(session_id) {
            *current = Some(session_id.to_string());
        }
    }

    fn mutate_message<F>(&self, id: &MessageId, mutate: F) -> Message
    where
        F: FnOnce(&mut Message),
    {
        let mut conv = lock_or_recover(&self.conversation);
        if conv.update(id, mutate) {
            if let Some(message) = conv.get(id) {
                return message.clone();
            }
        }
        // Unreachable while the engine owns all mutation, but never panic on
        // conversation state.
        tracing::error!("Message {} vanished mid-update", id);
        Message::assistant("")
    }

    fn toast(&self, level: ToastLevel, text: &str) {
        let _ = self.tx_ui.send(UiEvent::Toast {
            level,
            text: text.to_string(),
        });
    }

    fn emit_status(&self, status: StreamStatus) {
        let _ = self.tx_ui.send(UiEvent::Status(status));
    }
}
