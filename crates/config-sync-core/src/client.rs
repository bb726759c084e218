//! Public client facade.
//!
//! A [`ConfigClient`] owns one sync engine: it performs the startup fetch,
//! optionally runs the long-poll loop on a background task, and answers reads
//! from the in-memory store. Dropping the client cancels the loop.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use time::OffsetDateTime;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::http::HttpClient;
use crate::persistence::{resolve_snapshot_path, SnapshotWriter};
use crate::service::engine::SyncEngine;
use crate::service::{ConfigChange, InitOutcome};
use crate::signature::Signer;
use crate::status::{StatusSnapshot, SyncState};
use crate::store::{ConfigStore, NamespaceMap};

#[derive(Debug, Default)]
struct Tasks {
    sync_loop: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
}

/// Configuration client bound to one app and cluster.
#[derive(Debug)]
pub struct ConfigClient {
    engine: Arc<SyncEngine>,
    cancel: CancellationToken,
    tasks: Mutex<Tasks>,
    init_outcome: Mutex<Option<InitOutcome>>,
}

impl ConfigClient {
    /// Validates `config`, performs the startup fetch when `init_on_start` is
    /// set, and starts the long-poll loop when `watch` is set.
    ///
    /// Only configuration problems fail construction; an unreachable server
    /// is reported through [`ConfigClient::init_outcome`] and the status.
    pub async fn connect(config: ClientConfig) -> Result<Self, ClientError> {
        config.validate()?;

        let signer = config.secret.as_deref().map(Signer::new);
        let http = HttpClient::new(
            &config.server_url,
            config.identity(),
            signer,
            config.http_options(),
        )
        .map_err(|err| ClientError::configuration(err.to_string()))?;

        let mut tasks = Tasks::default();
        let writer = if config.persist_snapshot {
            let path = resolve_snapshot_path(config.snapshot_path.as_deref()).map_err(|err| {
                ClientError::configuration(format!("unusable snapshot path: {err}"))
            })?;
            debug!(path = %path.display(), "config-sync: snapshot persistence enabled");
            let (writer, handle) = SnapshotWriter::spawn(
                path,
                config.snapshot_format,
                config.snapshot_backup_limit,
            );
            tasks.writer = Some(handle);
            Some(writer)
        } else {
            None
        };

        let store = Arc::new(ConfigStore::new(config.namespace.clone()));
        let init_on_start = config.init_on_start;
        let watch = config.watch;
        let engine = Arc::new(SyncEngine::new(config, http, store, writer));
        info!(
            server = %engine.http.base_url(),
            app_id = %engine.config.app_id,
            cluster = %engine.config.cluster,
            namespaces = ?engine.namespaces(),
            "config-sync: client created"
        );

        let client = Self {
            engine,
            cancel: CancellationToken::new(),
            tasks: Mutex::new(tasks),
            init_outcome: Mutex::new(None),
        };
        if init_on_start {
            client.initialize().await;
        }
        if watch {
            client.start_watching();
        }
        Ok(client)
    }

    /// Runs the startup fetch (with snapshot fallback) and returns its outcome.
    ///
    /// Called by [`ConfigClient::connect`] unless `init_on_start` is off.
    pub async fn initialize(&self) -> InitOutcome {
        let outcome = self.engine.initialize().await;
        *lock(&self.init_outcome) = Some(outcome.clone());
        outcome
    }

    /// Outcome of the most recent startup fetch, if one ran.
    pub fn init_outcome(&self) -> Option<InitOutcome> {
        lock(&self.init_outcome).clone()
    }

    /// Spawns the long-poll loop. Returns `false` when it is already running
    /// or the client has stopped.
    pub fn start_watching(&self) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        let mut tasks = lock(&self.tasks);
        if tasks.sync_loop.is_some() {
            return false;
        }
        let engine = Arc::clone(&self.engine);
        tasks.sync_loop = Some(tokio::spawn(engine.run(self.cancel.clone())));
        true
    }

    /// Stops the loop, interrupting any in-flight long-poll or backoff sleep,
    /// and waits for queued snapshot writes.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let (sync_loop, writer) = {
            let mut tasks = lock(&self.tasks);
            (tasks.sync_loop.take(), tasks.writer.take())
        };
        if let Some(handle) = sync_loop {
            let _ = handle.await;
        }
        self.engine.status.transition(SyncState::Stopped);
        if let Some(snapshot_writer) = &self.engine.writer {
            snapshot_writer.flush().await;
        }
        if let Some(handle) = writer {
            handle.abort();
        }
        debug!("config-sync: client shut down");
    }

    /// Writes the current store to the snapshot file after any queued writes
    /// and returns its path.
    ///
    /// Fails with [`ErrorKind::Configuration`](crate::ErrorKind) when
    /// persistence is disabled and [`ErrorKind::Persistence`](crate::ErrorKind)
    /// when the write fails.
    pub async fn save_snapshot(&self) -> Result<PathBuf, ClientError> {
        self.engine.save_snapshot().await
    }

    /// Re-fetches `namespace` from the release endpoint.
    ///
    /// Returns the published change, or `None` when the server reports it unchanged.
    pub async fn refresh(&self, namespace: &str) -> Result<Option<ConfigChange>, ClientError> {
        let release_key = self.engine.config.release_key.clone();
        Ok(self.engine.fetch_and_apply(namespace, &release_key).await?)
    }

    /// Re-fetches `namespace` from the server's cache-served endpoint.
    pub async fn refresh_from_cache(
        &self,
        namespace: &str,
    ) -> Result<Option<ConfigChange>, ClientError> {
        Ok(self.engine.fetch_cached_and_apply(namespace).await?)
    }

    /// Receives a [`ConfigChange`] after every store update.
    pub fn subscribe(&self) -> broadcast::Receiver<ConfigChange> {
        self.engine.subscribe()
    }

    /// Current lifecycle state of the sync loop.
    pub fn state(&self) -> SyncState {
        self.engine.status.state()
    }

    /// Status snapshot including the tracked notification ids.
    pub async fn status(&self) -> StatusSnapshot {
        self.engine.status_snapshot().await
    }

    /// [`ConfigClient::status`] rendered as JSON.
    pub async fn status_json(&self) -> Value {
        self.status().await.to_json()
    }

    /// Shared handle to the store for readers that outlive a borrow of the client.
    pub fn store(&self) -> Arc<ConfigStore> {
        Arc::clone(&self.engine.store)
    }

    /// Raw value of `key` in the default namespace.
    pub fn get(&self, key: &str) -> Option<String> {
        self.engine.store.get(key)
    }

    /// Alias of [`ConfigClient::get`].
    pub fn get_string(&self, key: &str) -> Option<String> {
        self.engine.store.get_string(key)
    }

    /// `key` in the default namespace parsed as a number.
    pub fn get_number(&self, key: &str) -> Result<Option<f64>, ClientError> {
        self.engine.store.get_number(key)
    }

    /// `key` in the default namespace parsed as `true` / `false` (any case).
    pub fn get_boolean(&self, key: &str) -> Result<Option<bool>, ClientError> {
        self.engine.store.get_boolean(key)
    }

    /// `key` in the default namespace parsed as JSON.
    pub fn get_json(&self, key: &str) -> Result<Option<Value>, ClientError> {
        self.engine.store.get_json(key)
    }

    /// `key` in the default namespace parsed as an RFC 3339 date or unix milliseconds.
    pub fn get_date(&self, key: &str) -> Result<Option<OffsetDateTime>, ClientError> {
        self.engine.store.get_date(key)
    }

    /// Raw value of `key` in `namespace`.
    pub fn get_in(&self, namespace: &str, key: &str) -> Option<String> {
        self.engine.store.get_in(namespace, key)
    }

    /// Alias of [`ConfigClient::get_in`].
    pub fn get_string_in(&self, namespace: &str, key: &str) -> Option<String> {
        self.engine.store.get_string_in(namespace, key)
    }

    /// Scoped variant of [`ConfigClient::get_number`].
    pub fn get_number_in(&self, namespace: &str, key: &str) -> Result<Option<f64>, ClientError> {
        self.engine.store.get_number_in(namespace, key)
    }

    /// Scoped variant of [`ConfigClient::get_boolean`].
    pub fn get_boolean_in(
        &self,
        namespace: &str,
        key: &str,
    ) -> Result<Option<bool>, ClientError> {
        self.engine.store.get_boolean_in(namespace, key)
    }

    /// Scoped variant of [`ConfigClient::get_json`].
    pub fn get_json_in(&self, namespace: &str, key: &str) -> Result<Option<Value>, ClientError> {
        self.engine.store.get_json_in(namespace, key)
    }

    /// Scoped variant of [`ConfigClient::get_date`].
    pub fn get_date_in(
        &self,
        namespace: &str,
        key: &str,
    ) -> Result<Option<OffsetDateTime>, ClientError> {
        self.engine.store.get_date_in(namespace, key)
    }

    /// Key/value mapping of `namespace`; empty when unknown.
    pub fn get_namespace(&self, namespace: &str) -> BTreeMap<String, String> {
        self.engine.store.get_namespace(namespace)
    }

    /// Every namespace's key/value mapping.
    pub fn get_all(&self) -> NamespaceMap {
        self.engine.store.get_all()
    }
}

impl Drop for ConfigClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[tokio::test]
    async fn invalid_configuration_fails_construction() {
        let err = ConfigClient::connect(ClientConfig::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);

        let err = ConfigClient::connect(ClientConfig {
            server_url: "ftp://config.example.com".into(),
            app_id: "app1".into(),
            ..Default::default()
        })
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[tokio::test]
    async fn lazy_client_starts_empty_and_stops_on_shutdown() {
        let client = ConfigClient::connect(ClientConfig {
            server_url: "http://127.0.0.1:9".into(),
            app_id: "app1".into(),
            init_on_start: false,
            ..Default::default()
        })
        .await
        .expect("client builds");

        assert_eq!(client.state(), SyncState::Init);
        assert!(client.init_outcome().is_none());
        assert!(client.get_all().is_empty());
        assert!(client.get_namespace("application").is_empty());

        client.shutdown().await;
        assert_eq!(client.state(), SyncState::Stopped);
        assert!(!client.start_watching());
    }
}
