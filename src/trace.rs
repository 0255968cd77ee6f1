use crate::types::{ThinkingEvent, TraceId};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// Ordered, per-turn collections of thinking events keyed by trace id.
///
/// Arrival order on the wire is not `step` order; every append re-sorts the
/// trace so readers always observe ascending steps. Traces are tens of events
/// long, so re-sort-on-insert is fine.
#[derive(Default)]
pub struct TraceStore {
    inner: Mutex<HashMap<TraceId, Vec<ThinkingEvent>>>,
}

impl TraceStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TraceId, Vec<ThinkingEvent>>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn append(&self, trace_id: &TraceId, event: ThinkingEvent) {
        let mut map = self.lock();
        let events = map.entry(trace_id.clone()).or_default();
        events.push(event);
        events.sort_by_key(|e| e.step);
    }

    /// Snapshot of a trace in step order; absent traces read as empty.
    pub fn events(&self, trace_id: &TraceId) -> Vec<ThinkingEvent> {
        self.lock().get(trace_id).cloned().unwrap_or_default()
    }

    /// Discards a trace entirely. Used when a stream fails so a partial trace
    /// is never shown alongside a fallback-obtained answer.
    pub fn clear(&self, trace_id: &TraceId) {
        self.lock().remove(trace_id);
    }
}
