//! Health of the sync loop (state, consecutive failures, last error) exposed
//! to embedders.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::RwLock;

/// Lifecycle of a client's sync loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Initial fetch not yet completed.
    Init,
    /// Long-polling for change notifications.
    Polling,
    /// Terminal: retries exhausted or shut down.
    Stopped,
}

impl SyncState {
    fn as_u8(self) -> u8 {
        match self {
            SyncState::Init => 0,
            SyncState::Polling => 1,
            SyncState::Stopped => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => SyncState::Init,
            1 => SyncState::Polling,
            _ => SyncState::Stopped,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Init => "init",
            SyncState::Polling => "polling",
            SyncState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared status handle updated by the sync loop.
#[derive(Debug)]
pub struct SyncStatus {
    state: AtomicU8,
    consecutive_failures: AtomicU32,
    last_sync_millis: AtomicI64,
    last_error: RwLock<Option<String>>,
}

impl SyncStatus {
    /// Creates a reference-counted status handle in [`SyncState::Init`].
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: AtomicU8::new(SyncState::Init.as_u8()),
            consecutive_failures: AtomicU32::new(0),
            last_sync_millis: AtomicI64::new(0),
            last_error: RwLock::new(None),
        })
    }

    pub fn state(&self) -> SyncState {
        SyncState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Moves to `state` unless the loop has already stopped.
    ///
    /// Returns whether the transition happened.
    pub fn transition(&self, state: SyncState) -> bool {
        let stopped = SyncState::Stopped.as_u8();
        self.state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current != stopped).then_some(state.as_u8())
            })
            .is_ok()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    pub fn set_consecutive_failures(&self, failures: u32) {
        self.consecutive_failures.store(failures, Ordering::Relaxed);
    }

    /// Unix milliseconds of the last successful store update, 0 if none.
    pub fn last_sync_millis(&self) -> i64 {
        self.last_sync_millis.load(Ordering::Relaxed)
    }

    pub fn mark_synced(&self, unix_millis: i64) {
        self.last_sync_millis.store(unix_millis, Ordering::Relaxed);
    }

    pub async fn last_error(&self) -> Option<String> {
        self.last_error.read().await.clone()
    }

    /// Stores the last error message (or clears it when `None`).
    pub async fn set_last_error(&self, error: Option<String>) {
        let mut guard = self.last_error.write().await;
        *guard = error;
    }

    pub async fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            state: self.state(),
            consecutive_failures: self.consecutive_failures(),
            last_sync_millis: self.last_sync_millis(),
            last_error: self.last_error().await,
            notifications: BTreeMap::new(),
        }
    }
}

/// Point-in-time copy of [`SyncStatus`], optionally with the tracked
/// notification ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub state: SyncState,
    pub consecutive_failures: u32,
    pub last_sync_millis: i64,
    pub last_error: Option<String>,
    pub notifications: BTreeMap<String, i64>,
}

impl StatusSnapshot {
    pub fn to_map(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("state".into(), Value::String(self.state.to_string()));
        map.insert(
            "consecutiveFailures".into(),
            Value::from(self.consecutive_failures),
        );
        map.insert("lastSyncMillis".into(), Value::from(self.last_sync_millis));
        map.insert(
            "lastError".into(),
            match &self.last_error {
                Some(err) => Value::String(err.clone()),
                None => Value::Null,
            },
        );
        map.insert(
            "notifications".into(),
            Value::Object(
                self.notifications
                    .iter()
                    .map(|(name, id)| (name.clone(), Value::from(*id)))
                    .collect(),
            ),
        );
        map
    }

    pub fn to_json(&self) -> Value {
        Value::Object(self.to_map())
    }
}

/// Formats the current status as a JSON object
/// (`{"state":..,"consecutiveFailures":..,"lastSyncMillis":..,"lastError":..,"notifications":{..}}`).
pub async fn status_json(status: &SyncStatus) -> Value {
    status.snapshot().await.to_json()
}
