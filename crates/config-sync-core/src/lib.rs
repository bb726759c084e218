//! Public entry points for the config-sync client crate.
//!
//! A [`ConfigClient`] keeps an in-memory copy of an application's
//! configuration namespaces in sync with a remote configuration server: it
//! fetches every namespace at startup, long-polls for change notifications,
//! re-fetches changed namespaces, and optionally mirrors the store into a
//! local snapshot file used when the server is unreachable at startup.

pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod namespace;
pub mod notifications;
pub mod persistence;
pub mod service;
pub mod signature;
pub mod status;
pub mod store;

pub use client::ConfigClient;
pub use config::{ClientConfig, DEFAULT_CLUSTER, DEFAULT_NAMESPACE, ENV_PREFIX};
pub use error::{ClientError, ErrorKind};
pub use http::{
    BackoffConfig, BackoffState, ClientIdentity, HttpClient, HttpClientOptions, HttpError,
    NotificationRecord, ReleaseSnapshot, RetryDecision,
};
pub use namespace::{Namespace, NamespaceFormat};
pub use notifications::NotificationTracker;
pub use persistence::{PersistenceError, SnapshotFormat, SnapshotImage, SnapshotWriter};
pub use service::{ConfigChange, InitOutcome, PollOutcome};
pub use signature::{SignedHeaders, Signer};
pub use status::{status_json, StatusSnapshot, SyncState, SyncStatus};
pub use store::{ConfigStore, NamespaceMap};
