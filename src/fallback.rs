use crate::constants::FALLBACK_STORAGE_KEY;
use crate::store::{lock_or_recover, SessionStore};
use crate::types::now_ms;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Remembers a recent streaming failure across otherwise-independent sends.
///
/// While the gate is active, `send_message` skips straight to the single-shot
/// path. Expiry is checked at read time; there is no background timer. The
/// expiry timestamp is persisted through the key-value seam so a reload within
/// the cooldown window keeps preferring the degraded path.
pub struct FallbackGate {
    ttl: Duration,
    store: Arc<dyn SessionStore>,
    expiry: Mutex<Option<i64>>,
}

impl FallbackGate {
    pub fn new(ttl: Duration, store: Arc<dyn SessionStore>) -> Self {
        let persisted = match store.load(FALLBACK_STORAGE_KEY) {
            Ok(Some(raw)) => raw.trim().parse::<i64>().ok(),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("Failed to load fallback state: {}", e);
                None
            }
        };
        Self {
            ttl,
            store,
            expiry: Mutex::new(persisted),
        }
    }

    /// Read-with-expiry-check; expired state is cleared on the way out.
    pub fn active(&self) -> bool {
        let mut expiry = lock_or_recover(&self.expiry);
        match *expiry {
            Some(deadline) if now_ms() < deadline => true,
            Some(_) => {
                *expiry = None;
                if let Err(e) = self.store.save(FALLBACK_STORAGE_KEY, "") {
                    tracing::warn!("Failed to clear fallback state: {}", e);
                }
                false
            }
            None => false,
        }
    }

    /// Arms the gate with a fresh expiry. Returns true when the gate was not
    /// already active, so the caller can emit its one-time degrade notice.
    pub fn trip(&self) -> bool {
        let first = !self.active();
        let deadline = now_ms() + self.ttl.as_millis() as i64;
        *lock_or_recover(&self.expiry) = Some(deadline);
        if let Err(e) = self.store.save(FALLBACK_STORAGE_KEY, &deadline.to_string()) {
            tracing::warn!("Failed to persist fallback state: {}", e);
        }
        first
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn gate(ttl_ms: u64) -> (FallbackGate, Arc<dyn SessionStore>) {
        let store: Arc<dyn SessionStore> = Arc::new(MemoryStore::new());
        (
            FallbackGate::new(Duration::from_millis(ttl_ms), store.clone()),
            store,
        )
    }

    #[test]
    fn starts_inactive_and_trips_once() {
        let (gate, _) = gate(60_000);
        assert!(!gate.active());
        assert!(gate.trip());
        assert!(gate.active());
        // Already active: no second first-trigger.
        assert!(!gate.trip());
    }

    #[test]
    fn expires_at_read_time() {
        let (gate, _) = gate(1);
        gate.trip();
        std::thread::sleep(Duration::from_millis(5));
        assert!(!gate.active());
        // Expired and cleared; the next trip is a first trigger again.
        assert!(gate.trip());
    }

    #[test]
    fn survives_reload_through_store() {
        let (gate, store) = gate(60_000);
        gate.trip();

        let reloaded = FallbackGate::new(Duration::from_millis(60_000), store);
        assert!(reloaded.active());
    }
}
