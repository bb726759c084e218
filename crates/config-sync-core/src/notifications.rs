//! Last-observed notification ids per namespace.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

/// Id assumed for namespaces the client has never seen a notification for.
pub const UNSEEN_NOTIFICATION_ID: i64 = 0;

/// Tracks the notification id most recently applied for each namespace.
///
/// Ids are opaque: the tracker only compares them for equality.
#[derive(Debug, Default)]
pub struct NotificationTracker {
    ids: Mutex<HashMap<String, i64>>,
}

impl NotificationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the last recorded id for `namespace`, or 0 when unseen.
    pub fn observed(&self, namespace: &str) -> i64 {
        let guard = match self.ids.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard
            .get(namespace)
            .copied()
            .unwrap_or(UNSEEN_NOTIFICATION_ID)
    }

    pub fn record(&self, namespace: &str, id: i64) {
        let mut guard = match self.ids.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.insert(namespace.to_string(), id);
    }

    /// Whether `id` differs from what was last recorded for `namespace`.
    pub fn is_stale(&self, namespace: &str, id: i64) -> bool {
        self.observed(namespace) != id
    }

    pub fn snapshot(&self) -> BTreeMap<String, i64> {
        let guard = match self.ids.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.iter().map(|(k, v)| (k.clone(), *v)).collect()
    }
}
