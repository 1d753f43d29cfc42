//! Request correlation registry.
//!
//! Callers tag requests with their own numeric ids and the simulator echoes
//! those ids back in its answers. The registry remembers what each id was
//! issued for so answers can be matched up later. It is cleared on every
//! disconnect: callers commonly reuse the same ids in the next session, and an
//! entry from an old session must never match an answer from a new one.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// What a registered id refers to.
///
/// Ids are scoped per kind: definition 5 and request 5 are separate entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    /// A system event subscription (the id is the event id).
    SystemEvent,
    /// A data definition (the id is the define id).
    DataDefinition,
    /// A data request (the id is the request id).
    DataRequest,
}

/// Free-form annotations attached to a registered request.
///
/// Clones share the same underlying map.
#[derive(Debug, Clone, Default)]
pub struct RequestContext(Arc<Mutex<HashMap<String, serde_json::Value>>>);

impl RequestContext {
    /// Sets `key` to `value`, returning the previous value.
    pub fn insert(
        &self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Option<serde_json::Value> {
        self.0.lock().insert(key.into(), value.into())
    }

    /// Reads `key`.
    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.0.lock().get(key).cloned()
    }

    /// Removes `key`.
    pub fn remove(&self, key: &str) -> Option<serde_json::Value> {
        self.0.lock().remove(key)
    }

    /// Copies the whole map.
    pub fn to_map(&self) -> HashMap<String, serde_json::Value> {
        self.0.lock().clone()
    }
}

/// Metadata of one outstanding request.
#[derive(Debug)]
pub struct RequestEntry {
    /// Caller supplied id.
    pub id: u32,
    /// What the id refers to.
    pub kind: RequestKind,
    /// Human readable label, such as the event or datum name.
    pub label: String,
    /// When the request was issued.
    pub created_at: DateTime<Utc>,
    /// Removed as soon as its first answer arrives.
    pub one_shot: bool,
    /// Caller annotations.
    pub context: RequestContext,
    responses: AtomicU64,
}

impl RequestEntry {
    /// Answers matched to this entry so far.
    pub fn responses(&self) -> u64 {
        self.responses.load(Ordering::Relaxed)
    }
}

type Key = (RequestKind, u32);

/// Thread-safe map from id to request metadata.
#[derive(Debug, Default)]
pub struct RequestRegistry {
    entries: RwLock<HashMap<Key, Arc<RequestEntry>>>,
}

impl RequestRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a request and returns its context for annotation.
    ///
    /// Registering an id again replaces the earlier entry.
    pub fn register(&self, kind: RequestKind, id: u32, label: impl Into<String>) -> RequestContext {
        self.insert(kind, id, label.into(), false)
    }

    /// Records a request that completes with its first answer.
    pub fn register_one_shot(
        &self,
        kind: RequestKind,
        id: u32,
        label: impl Into<String>,
    ) -> RequestContext {
        self.insert(kind, id, label.into(), true)
    }

    fn insert(&self, kind: RequestKind, id: u32, label: String, one_shot: bool) -> RequestContext {
        let context = RequestContext::default();
        let entry = Arc::new(RequestEntry {
            id,
            kind,
            label,
            created_at: Utc::now(),
            one_shot,
            context: context.clone(),
            responses: AtomicU64::new(0),
        });
        if self.entries.write().insert((kind, id), entry).is_some() {
            debug!(?kind, id, "Request entry replaced");
        }
        context
    }

    /// Removes an entry, returning it if it existed.
    pub fn unregister(&self, kind: RequestKind, id: u32) -> Option<Arc<RequestEntry>> {
        self.entries.write().remove(&(kind, id))
    }

    /// Looks an entry up.
    pub fn get(&self, kind: RequestKind, id: u32) -> Option<Arc<RequestEntry>> {
        self.entries.read().get(&(kind, id)).cloned()
    }

    /// Returns `true` if the id is registered.
    pub fn contains(&self, kind: RequestKind, id: u32) -> bool {
        self.entries.read().contains_key(&(kind, id))
    }

    /// Matches an answer to its entry.
    ///
    /// Counts the answer and removes one-shot entries. Returns `None` for ids
    /// nobody registered.
    pub fn record_response(&self, kind: RequestKind, id: u32) -> Option<Arc<RequestEntry>> {
        let entry = self.get(kind, id)?;
        entry.responses.fetch_add(1, Ordering::Relaxed);
        if entry.one_shot {
            let mut entries = self.entries.write();
            // Only drop the entry we matched, not a later replacement
            if entries
                .get(&(kind, id))
                .is_some_and(|current| Arc::ptr_eq(current, &entry))
            {
                entries.remove(&(kind, id));
            }
        }
        Some(entry)
    }

    /// Number of registered entries.
    pub fn count(&self) -> usize {
        self.entries.read().len()
    }

    /// Every entry, oldest first.
    pub fn entries(&self) -> Vec<Arc<RequestEntry>> {
        let mut all: Vec<_> = self.entries.read().values().cloned().collect();
        all.sort_by_key(|entry| (entry.created_at, entry.kind as u8, entry.id));
        all
    }

    /// Removes every entry.
    pub fn clear(&self) {
        let mut entries = self.entries.write();
        if !entries.is_empty() {
            debug!(count = entries.len(), "Request registry cleared");
        }
        entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_register_and_lookup() {
        let registry = RequestRegistry::new();
        let ctx = registry.register(RequestKind::DataDefinition, 7, "PLANE ALTITUDE");
        ctx.insert("units", "feet");

        let entry = registry.get(RequestKind::DataDefinition, 7).unwrap();
        assert_eq!(entry.label, "PLANE ALTITUDE");
        assert_eq!(entry.context.get("units"), Some(json!("feet")));
        assert!(!registry.contains(RequestKind::DataRequest, 7));
    }

    #[test]
    fn test_kinds_do_not_collide() {
        let registry = RequestRegistry::new();
        registry.register(RequestKind::DataDefinition, 1, "def");
        registry.register(RequestKind::DataRequest, 1, "req");
        assert_eq!(registry.count(), 2);
        assert!(registry.unregister(RequestKind::DataRequest, 1).is_some());
        assert!(registry.unregister(RequestKind::DataRequest, 1).is_none());
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_clear_forgets_all_ids() {
        let registry = RequestRegistry::new();
        for id in 0..5 {
            registry.register(RequestKind::SystemEvent, id, "event");
        }
        registry.clear();
        assert_eq!(registry.count(), 0);
        assert!(registry.get(RequestKind::SystemEvent, 3).is_none());
    }

    #[test]
    fn test_one_shot_completes_on_response() {
        let registry = RequestRegistry::new();
        registry.register_one_shot(RequestKind::DataRequest, 9, "once");
        registry.register(RequestKind::DataRequest, 10, "periodic");

        let entry = registry.record_response(RequestKind::DataRequest, 9).unwrap();
        assert_eq!(entry.responses(), 1);
        assert!(!registry.contains(RequestKind::DataRequest, 9));

        registry.record_response(RequestKind::DataRequest, 10);
        registry.record_response(RequestKind::DataRequest, 10);
        let periodic = registry.get(RequestKind::DataRequest, 10).unwrap();
        assert_eq!(periodic.responses(), 2);

        assert!(registry.record_response(RequestKind::DataRequest, 99).is_none());
    }

    #[test]
    fn test_context_is_shared() {
        let registry = RequestRegistry::new();
        let ctx = registry.register(RequestKind::SystemEvent, 1, "Pause");
        let entry = registry.get(RequestKind::SystemEvent, 1).unwrap();
        ctx.insert("attempt", 2);
        assert_eq!(entry.context.get("attempt"), Some(json!(2)));
        assert_eq!(entry.context.remove("attempt"), Some(json!(2)));
        assert!(ctx.to_map().is_empty());
    }
}
