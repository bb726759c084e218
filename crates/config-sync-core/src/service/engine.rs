//! Sync loop orchestration.
//!
//! [`SyncEngine`] owns everything the loop touches: the HTTP client, the
//! shared store, notification ids, status and the optional snapshot writer.
//! The public facade in `client.rs` drives it; tests drive single iterations
//! directly.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::state::{
    dedupe_notifications, failure_label, ConfigChange, InitOutcome, LoopState, PollOutcome,
};
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::http::{HttpClient, HttpError, NotificationRecord, ReleaseSnapshot, RetryDecision};
use crate::namespace::Namespace;
use crate::notifications::NotificationTracker;
use crate::persistence::{self, PersistenceError, SnapshotImage, SnapshotWriter};
use crate::signature::current_unix_millis;
use crate::status::{StatusSnapshot, SyncState, SyncStatus};
use crate::store::{ConfigStore, NamespaceMap};

/// Capacity of the change broadcast; slow subscribers observe `Lagged`.
pub(crate) const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// Shared state of one client's sync loop.
pub(crate) struct SyncEngine {
    pub(crate) http: HttpClient,
    pub(crate) store: Arc<ConfigStore>,
    pub(crate) tracker: NotificationTracker,
    pub(crate) status: Arc<SyncStatus>,
    pub(crate) changes: broadcast::Sender<ConfigChange>,
    pub(crate) writer: Option<SnapshotWriter>,
    pub(crate) config: ClientConfig,
    namespaces: Vec<String>,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("server", &self.http.base_url().as_str())
            .field("namespaces", &self.namespaces)
            .field("state", &self.status.state())
            .finish()
    }
}

impl SyncEngine {
    pub(crate) fn new(
        config: ClientConfig,
        http: HttpClient,
        store: Arc<ConfigStore>,
        writer: Option<SnapshotWriter>,
    ) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            namespaces: config.watched_namespaces(),
            http,
            store,
            tracker: NotificationTracker::new(),
            status: SyncStatus::new(),
            changes,
            writer,
            config,
        }
    }

    pub(crate) fn namespaces(&self) -> &[String] {
        &self.namespaces
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<ConfigChange> {
        self.changes.subscribe()
    }

    pub(crate) async fn status_snapshot(&self) -> StatusSnapshot {
        let mut snapshot = self.status.snapshot().await;
        snapshot.notifications = self.tracker.snapshot();
        snapshot
    }

    /// Fetches every watched namespace once, falling back to the local
    /// snapshot for namespaces that could not be fetched.
    ///
    /// The snapshot is read before any fetch and rewritten at most once, after
    /// the fallback, so a partial failure never replaces last-known-good data
    /// on disk with an incomplete store.
    pub(crate) async fn initialize(&self) -> InitOutcome {
        let fallback = self.read_fallback().await;

        let mut failed = Vec::new();
        let mut fetched_release_key = None;
        for namespace in &self.namespaces {
            match self.fetch_namespace(namespace, &self.config.release_key).await {
                Ok(Some(fetched)) => {
                    let change = self.publish(fetched);
                    fetched_release_key = Some(change.release_key);
                }
                Ok(None) => {}
                Err(source) => {
                    let err = ClientError::InitialSync {
                        namespace: namespace.clone(),
                        source,
                    };
                    warn!(namespace = %namespace, error = %err, "config-sync: initial fetch failed");
                    self.status.set_last_error(Some(err.to_string())).await;
                    failed.push(namespace.clone());
                }
            }
        }

        let outcome = if failed.is_empty() {
            info!(namespaces = self.namespaces.len(), "config-sync: initial sync complete");
            InitOutcome::Synced
        } else {
            let restored = self.restore_from_snapshot(fallback);
            if restored.is_empty() {
                InitOutcome::Degraded { failed }
            } else {
                InitOutcome::RestoredFromSnapshot { failed, restored }
            }
        };
        if let Some(release_key) = fetched_release_key {
            self.persist_store(release_key);
        }
        self.status.transition(SyncState::Polling);
        outcome
    }

    /// Reads the local snapshot when persistence is enabled.
    async fn read_fallback(&self) -> Option<NamespaceMap> {
        let writer = self.writer.clone()?;
        let known = self.namespaces.clone();
        match tokio::task::spawn_blocking(move || writer.load(&known)).await {
            Ok(loaded) => Some(loaded),
            Err(err) => {
                warn!(%err, "config-sync: snapshot load task failed");
                None
            }
        }
    }

    /// Installs snapshot content for namespaces the store does not hold yet.
    fn restore_from_snapshot(&self, fallback: Option<NamespaceMap>) -> Vec<String> {
        let Some(loaded) = fallback else {
            return Vec::new();
        };

        let mut restored = Vec::new();
        for (name, configurations) in loaded {
            if self
                .store
                .install_if_absent(Namespace::new(name.clone(), "", configurations))
            {
                restored.push(name);
            }
        }
        if !restored.is_empty() {
            warn!(namespaces = ?restored, "config-sync: serving namespaces from local snapshot");
        }
        restored
    }

    /// Runs one long-poll and fetches every namespace reported as changed.
    pub(crate) async fn poll_iteration(&self) -> Result<PollOutcome, HttpError> {
        let watched: Vec<NotificationRecord> = self
            .namespaces
            .iter()
            .map(|name| NotificationRecord::new(name.clone(), self.tracker.observed(name)))
            .collect();

        let changes = match self.http.long_poll(&watched).await {
            Ok(changes) => changes,
            Err(err) if err.is_timeout() => return Ok(PollOutcome::TimedOut),
            Err(err) => return Err(err),
        };

        let mut applied = 0;
        for change in dedupe_notifications(changes) {
            if !self
                .tracker
                .is_stale(&change.namespace_name, change.notification_id)
            {
                continue;
            }
            debug!(
                namespace = %change.namespace_name,
                notification_id = change.notification_id,
                "config-sync: change notified"
            );
            self.fetch_and_apply(&change.namespace_name, &self.config.release_key)
                .await?;
            self.tracker
                .record(&change.namespace_name, change.notification_id);
            applied += 1;
        }

        Ok(if applied == 0 {
            PollOutcome::Unchanged
        } else {
            PollOutcome::Applied(applied)
        })
    }

    /// Fetches `namespace` from the release endpoint and installs it.
    ///
    /// Returns `None` when the server reports the release unchanged.
    pub(crate) async fn fetch_and_apply(
        &self,
        namespace: &str,
        release_key: &str,
    ) -> Result<Option<ConfigChange>, HttpError> {
        let fetched = self.fetch_namespace(namespace, release_key).await?;
        Ok(fetched.map(|namespace| self.apply(namespace)))
    }

    async fn fetch_namespace(
        &self,
        namespace: &str,
        release_key: &str,
    ) -> Result<Option<Namespace>, HttpError> {
        let Some(mut release) = self.http.fetch_release(namespace, release_key).await? else {
            debug!(namespace = %namespace, "config-sync: release unchanged");
            return Ok(None);
        };
        release.namespace_name = namespace.to_string();
        Ok(Some(Namespace::from_release(release)?))
    }

    /// Fetches the cache-served view of `namespace` and installs it.
    pub(crate) async fn fetch_cached_and_apply(
        &self,
        namespace: &str,
    ) -> Result<Option<ConfigChange>, HttpError> {
        let release_key = self
            .store
            .namespace(namespace)
            .map(|current| current.release_key().to_string())
            .unwrap_or_default();
        let Some(configurations) = self.http.fetch_cached(namespace, &release_key).await? else {
            debug!(namespace = %namespace, "config-sync: cached view unchanged");
            return Ok(None);
        };
        let release = ReleaseSnapshot {
            app_id: self.config.app_id.clone(),
            cluster: self.config.cluster.clone(),
            namespace_name: namespace.to_string(),
            configurations,
            release_key,
        };
        Ok(Some(self.apply(Namespace::from_release(release)?)))
    }

    /// Installs `namespace`, publishes the change and queues a snapshot write.
    fn apply(&self, namespace: Namespace) -> ConfigChange {
        let change = self.publish(namespace);
        self.persist_store(change.release_key.clone());
        change
    }

    /// Installs `namespace` and publishes the change without touching disk.
    fn publish(&self, namespace: Namespace) -> ConfigChange {
        let installed = self.store.install(namespace);
        self.status.mark_synced(current_unix_millis());
        let change = ConfigChange::from_namespace(&installed);
        debug!(
            namespace = %change.namespace,
            release_key = %change.release_key,
            keys = change.configurations.len(),
            "config-sync: namespace updated"
        );
        // No subscribers is not an error.
        let _ = self.changes.send(change.clone());
        change
    }

    /// Queues a write of the whole store.
    fn persist_store(&self, release_key: String) {
        if let Some(writer) = &self.writer {
            writer.submit(SnapshotImage::new(self.store.get_all(), release_key));
        }
    }

    /// Writes the current store to the snapshot file and waits for it.
    ///
    /// The `release_key` line carries the default namespace's release key.
    pub(crate) async fn save_snapshot(&self) -> Result<PathBuf, ClientError> {
        let Some(writer) = &self.writer else {
            return Err(ClientError::configuration(
                "snapshot persistence is disabled (persist_snapshot = false)",
            ));
        };
        writer.flush().await;

        let release_key = self
            .store
            .namespace(self.store.default_namespace())
            .map(|namespace| namespace.release_key().to_string())
            .unwrap_or_default();
        let image = SnapshotImage::new(self.store.get_all(), release_key);
        let path = writer.path().to_path_buf();
        let format = writer.format();
        let backup_limit = self.config.snapshot_backup_limit;
        let target = path.clone();
        tokio::task::spawn_blocking(move || {
            persistence::save(&target, &image, format, backup_limit)
        })
        .await
        .map_err(|err| PersistenceError::Io(io::Error::new(io::ErrorKind::Other, err)))??;
        Ok(path)
    }

    /// Long-polls until cancelled or until the retry budget is exhausted.
    ///
    /// Exhaustion cancels `cancel` so the facade observes the stop.
    pub(crate) async fn run(self: Arc<Self>, cancel: CancellationToken) {
        if !self.status.transition(SyncState::Polling) {
            return;
        }
        let mut state = LoopState::new(self.config.backoff);
        loop {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("config-sync: sync loop shutting down");
                    break;
                }
                result = self.poll_iteration() => result,
            };

            match result {
                Ok(PollOutcome::TimedOut) => {
                    debug!("config-sync: long poll timed out; polling again");
                }
                Ok(outcome) => {
                    if let PollOutcome::Applied(count) = outcome {
                        debug!(count, "config-sync: applied notified changes");
                    }
                    if state.failures() > 0 {
                        self.status.set_last_error(None).await;
                    }
                    state.on_success();
                    self.status.set_consecutive_failures(0);
                }
                Err(err) => {
                    let decision = state.on_failure();
                    self.status.set_consecutive_failures(state.failures());
                    self.status.set_last_error(Some(err.to_string())).await;
                    match decision {
                        RetryDecision::RetryAfter(delay) => {
                            warn!(
                                error = %err,
                                kind = failure_label(&err),
                                failures = state.failures(),
                                retry_in_ms = delay.as_millis() as u64,
                                "config-sync: poll failed; backing off"
                            );
                            tokio::select! {
                                biased;
                                _ = cancel.cancelled() => {
                                    debug!("config-sync: sync loop shutting down during backoff");
                                    break;
                                }
                                _ = sleep(delay) => {}
                            }
                        }
                        RetryDecision::GiveUp => {
                            error!(
                                error = %err,
                                failures = state.failures(),
                                "config-sync: retry budget exhausted; polling stopped"
                            );
                            cancel.cancel();
                            break;
                        }
                    }
                }
            }
        }
        self.status.transition(SyncState::Stopped);
    }
}
