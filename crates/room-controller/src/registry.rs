//! Process-wide producer registry.
//!
//! Every live producer in the process has exactly one entry here, keyed by
//! the engine-assigned producer id. Room actors insert on successful
//! produce and remove on whichever teardown path fires first (explicit
//! close, forced stop, owner disconnect, engine-side reclaim); removal is
//! idempotent so racing paths cannot double-free.
//!
//! Lookups are concurrent across rooms; insert/remove serialize on the map
//! lock. No engine call ever happens under the lock.

use crate::engine::ProducerHandle;

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// One registered producer: who owns it, where it lives, and its handle.
#[derive(Clone)]
pub struct ProducerEntry {
    /// Engine-assigned producer id.
    pub producer_id: String,
    /// Connection id of the owning session.
    pub session_id: String,
    /// Room the producer was published in.
    pub room_id: String,
    /// Application-supplied tag, passed through verbatim to consumers.
    pub app_data: Value,
    /// Engine handle for the producer.
    pub handle: Arc<dyn ProducerHandle>,
}

/// Process-wide map of live producers.
#[derive(Default)]
pub struct ProducerRegistry {
    entries: Mutex<HashMap<String, ProducerEntry>>,
}

impl ProducerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, ProducerEntry>> {
        // Poisoning cannot tear a HashMap insert/remove; recover the guard.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a producer. An id collision would mean the engine reused an
    /// id for a live producer; the newer entry wins and the event is logged.
    pub fn insert(&self, entry: ProducerEntry) {
        let producer_id = entry.producer_id.clone();
        if let Some(previous) = self.entries().insert(producer_id.clone(), entry) {
            warn!(
                target: "rc.registry",
                producer_id = %producer_id,
                previous_session = %previous.session_id,
                "Replaced live registry entry with duplicate producer id"
            );
        }
        metrics::gauge!("rc_producers_registered").increment(1.0);
        debug!(target: "rc.registry", producer_id = %producer_id, "Producer registered");
    }

    /// Remove a producer. Returns the entry if it was still present;
    /// removing an already-removed id is a no-op.
    pub fn remove(&self, producer_id: &str) -> Option<ProducerEntry> {
        let removed = self.entries().remove(producer_id);
        if removed.is_some() {
            metrics::gauge!("rc_producers_registered").decrement(1.0);
            debug!(target: "rc.registry", producer_id = %producer_id, "Producer deregistered");
        }
        removed
    }

    /// Look up a producer by id.
    #[must_use]
    pub fn get(&self, producer_id: &str) -> Option<ProducerEntry> {
        self.entries().get(producer_id).cloned()
    }

    /// Producer ids live in `room_id`, excluding those owned by
    /// `exclude_session` (a joiner never discovers its own streams).
    #[must_use]
    pub fn producers_in_room(&self, room_id: &str, exclude_session: &str) -> Vec<String> {
        self.entries()
            .values()
            .filter(|e| e.room_id == room_id && e.session_id != exclude_session)
            .map(|e| e.producer_id.clone())
            .collect()
    }

    /// Number of registered producers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::engine::local::LocalMediaEngine;
    use crate::engine::{MediaEngine, MediaKind, RouterHandle, TransportHandle};
    use serde_json::json;

    async fn test_producer() -> Arc<dyn ProducerHandle> {
        let engine = LocalMediaEngine::new();
        let router = engine.create_router().await.unwrap();
        let transport = router.create_transport().await.unwrap();
        transport
            .produce(MediaKind::Audio, json!({}), json!({}))
            .await
            .unwrap()
    }

    fn entry(producer_id: &str, session_id: &str, room_id: &str, handle: Arc<dyn ProducerHandle>) -> ProducerEntry {
        ProducerEntry {
            producer_id: producer_id.to_string(),
            session_id: session_id.to_string(),
            room_id: room_id.to_string(),
            app_data: json!({"source": "mic"}),
            handle,
        }
    }

    #[tokio::test]
    async fn test_insert_get_remove() {
        let registry = ProducerRegistry::new();
        let handle = test_producer().await;

        registry.insert(entry("p1", "conn-1", "r1", handle));
        assert_eq!(registry.len(), 1);

        let found = registry.get("p1").expect("entry should exist");
        assert_eq!(found.session_id, "conn-1");
        assert_eq!(found.room_id, "r1");
        assert_eq!(found.app_data, json!({"source": "mic"}));

        let removed = registry.remove("p1");
        assert!(removed.is_some());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let registry = ProducerRegistry::new();
        let handle = test_producer().await;

        registry.insert(entry("p1", "conn-1", "r1", handle));
        assert!(registry.remove("p1").is_some());
        assert!(registry.remove("p1").is_none());
        assert!(registry.remove("p1").is_none());
    }

    #[tokio::test]
    async fn test_producers_in_room_excludes_owner_and_other_rooms() {
        let registry = ProducerRegistry::new();

        registry.insert(entry("p1", "conn-1", "r1", test_producer().await));
        registry.insert(entry("p2", "conn-2", "r1", test_producer().await));
        registry.insert(entry("p3", "conn-3", "r2", test_producer().await));

        let mut visible = registry.producers_in_room("r1", "conn-1");
        visible.sort();
        assert_eq!(visible, vec!["p2".to_string()]);

        let mut all_r1 = registry.producers_in_room("r1", "conn-none");
        all_r1.sort();
        assert_eq!(all_r1, vec!["p1".to_string(), "p2".to_string()]);
    }
}
