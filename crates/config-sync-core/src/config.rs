//! Client configuration.
//!
//! [`ClientConfig`] is a plain struct with defaults matching the server's
//! conventions. Hosts that receive options as strings (config files, process
//! environment) go through [`ClientConfig::from_options`], which maps the
//! fixed set of [`OPTION_NAMES`] onto typed fields and rejects anything else.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ClientError;
use crate::http::{
    BackoffConfig, ClientIdentity, HttpClientOptions, DEFAULT_FETCH_TIMEOUT,
    DEFAULT_LONG_POLL_TIMEOUT,
};
use crate::persistence::{SnapshotFormat, DEFAULT_BACKUP_LIMIT};

/// Cluster used when none is configured.
pub const DEFAULT_CLUSTER: &str = "default";
/// Namespace read by the unscoped getters when none is configured.
pub const DEFAULT_NAMESPACE: &str = "application";
/// Prefix of environment variables read by [`ClientConfig::from_os_env`].
pub const ENV_PREFIX: &str = "CONFIG_SYNC_";

/// Everything needed to build a [`crate::ConfigClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the configuration server (e.g. `http://config:8080`).
    pub server_url: String,
    pub app_id: String,
    /// Shared secret; when set every request is signed.
    pub secret: Option<String>,
    pub cluster: String,
    /// Namespace read by the unscoped typed getters.
    pub namespace: String,
    /// Namespaces to sync and watch; empty means just [`Self::namespace`].
    pub namespaces: Vec<String>,
    /// Release key sent with the first fetch of each namespace.
    pub release_key: String,
    /// Client address reported to the server.
    pub ip: String,
    /// Whether to start the long-poll loop after construction.
    pub watch: bool,
    /// Whether to perform the initial fetch during construction.
    pub init_on_start: bool,
    /// Whether to keep a local snapshot for offline startup.
    pub persist_snapshot: bool,
    pub snapshot_path: Option<PathBuf>,
    pub snapshot_format: SnapshotFormat,
    pub snapshot_backup_limit: usize,
    /// Client-side timeout of the notification long-poll.
    pub long_poll_timeout: Duration,
    /// Client-side timeout of release fetches.
    pub fetch_timeout: Duration,
    pub backoff: BackoffConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: String::new(),
            app_id: String::new(),
            secret: None,
            cluster: DEFAULT_CLUSTER.to_string(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            namespaces: Vec::new(),
            release_key: String::new(),
            ip: String::new(),
            watch: false,
            init_on_start: true,
            persist_snapshot: false,
            snapshot_path: None,
            snapshot_format: SnapshotFormat::Properties,
            snapshot_backup_limit: DEFAULT_BACKUP_LIMIT,
            long_poll_timeout: DEFAULT_LONG_POLL_TIMEOUT,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            backoff: BackoffConfig::default(),
        }
    }
}

/// Option names accepted by [`ClientConfig::set_option`].
pub const OPTION_NAMES: &[&str] = &[
    "config_server_url",
    "app_id",
    "secret",
    "cluster_name",
    "namespace_name",
    "namespaces",
    "release_key",
    "ip",
    "watch",
    "init_on_start",
    "persist_snapshot",
    "snapshot_path",
    "snapshot_format",
    "snapshot_backup_limit",
    "timeout",
    "fetch_timeout",
];

impl ClientConfig {
    /// Builds a configuration from `(option, value)` pairs.
    ///
    /// Unknown option names fail immediately instead of being ignored.
    pub fn from_options<I, K, V>(options: I) -> Result<Self, ClientError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = Self::default();
        for (name, value) in options {
            config.set_option(name.as_ref(), value.as_ref())?;
        }
        Ok(config)
    }

    /// Applies a single named option.
    pub fn set_option(&mut self, name: &str, value: &str) -> Result<(), ClientError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "config_server_url" => self.server_url = value.trim().to_string(),
            "app_id" => self.app_id = value.trim().to_string(),
            "secret" => self.secret = non_empty(value),
            "cluster_name" => self.cluster = value.trim().to_string(),
            "namespace_name" => self.namespace = value.trim().to_string(),
            "namespaces" => {
                self.namespaces = value
                    .split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(str::to_string)
                    .collect();
            }
            "release_key" => self.release_key = value.trim().to_string(),
            "ip" => self.ip = value.trim().to_string(),
            "watch" => self.watch = parse_bool("watch", value)?,
            "init_on_start" => self.init_on_start = parse_bool("init_on_start", value)?,
            "persist_snapshot" => self.persist_snapshot = parse_bool("persist_snapshot", value)?,
            "snapshot_path" => self.snapshot_path = non_empty(value).map(PathBuf::from),
            "snapshot_format" => {
                self.snapshot_format = SnapshotFormat::from_name(value).ok_or_else(|| {
                    ClientError::configuration(format!(
                        "unsupported snapshot_format `{}`",
                        value.trim()
                    ))
                })?;
            }
            "snapshot_backup_limit" => {
                self.snapshot_backup_limit = value.trim().parse().map_err(|_| {
                    ClientError::configuration(format!(
                        "snapshot_backup_limit `{value}` is not a count"
                    ))
                })?;
            }
            "timeout" => self.long_poll_timeout = parse_millis("timeout", value)?,
            "fetch_timeout" => self.fetch_timeout = parse_millis("fetch_timeout", value)?,
            _ => {
                return Err(ClientError::configuration(format!(
                    "`{name}` is not a recognised option"
                )))
            }
        }
        Ok(())
    }

    /// Builds a configuration from the process environment.
    pub fn from_os_env() -> Result<Self, ClientError> {
        Self::from_env_iter(env::vars())
    }

    /// Builds a configuration from `CONFIG_SYNC_<OPTION>` variables.
    ///
    /// Variables without the prefix are ignored; prefixed ones must name a
    /// recognised option.
    pub fn from_env_iter<I, K, V>(iter: I) -> Result<Self, ClientError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: HashMap<String, String> = iter
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        let mut options: Vec<(String, String)> = vars
            .into_iter()
            .filter_map(|(key, value)| {
                key.strip_prefix(ENV_PREFIX)
                    .map(|option| (option.to_ascii_lowercase(), value))
            })
            .collect();
        options.sort();
        Self::from_options(options)
    }

    /// Checks required fields and value ranges.
    pub fn validate(&self) -> Result<(), ClientError> {
        if self.server_url.trim().is_empty() {
            return Err(ClientError::configuration("config_server_url is required"));
        }
        if self.app_id.trim().is_empty() {
            return Err(ClientError::configuration("app_id is required"));
        }
        if self.cluster.trim().is_empty() {
            return Err(ClientError::configuration("cluster_name must not be empty"));
        }
        if self.namespace.trim().is_empty() {
            return Err(ClientError::configuration("namespace_name must not be empty"));
        }
        if let Some(bad) = self
            .watched_namespaces()
            .iter()
            .find(|name| name.is_empty() || name.contains('/'))
        {
            return Err(ClientError::configuration(format!(
                "invalid namespace name `{bad}`"
            )));
        }
        if self.long_poll_timeout.is_zero() || self.fetch_timeout.is_zero() {
            return Err(ClientError::configuration("timeouts must be greater than zero"));
        }
        if self.backoff.max_retries == 0 {
            return Err(ClientError::configuration("backoff max_retries must be at least 1"));
        }
        Ok(())
    }

    /// Namespaces synced at startup and watched by the long-poll loop.
    pub fn watched_namespaces(&self) -> Vec<String> {
        if self.namespaces.is_empty() {
            return vec![self.namespace.clone()];
        }
        let mut names = Vec::with_capacity(self.namespaces.len());
        for name in &self.namespaces {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
        names
    }

    pub(crate) fn identity(&self) -> ClientIdentity {
        ClientIdentity {
            app_id: self.app_id.clone(),
            cluster: self.cluster.clone(),
            ip: self.ip.clone(),
        }
    }

    pub(crate) fn http_options(&self) -> HttpClientOptions {
        HttpClientOptions {
            fetch_timeout: self.fetch_timeout,
            long_poll_timeout: self.long_poll_timeout,
        }
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn parse_bool(option: &str, value: &str) -> Result<bool, ClientError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ClientError::configuration(format!(
            "{option} expects a boolean, got `{other}`"
        ))),
    }
}

fn parse_millis(option: &str, value: &str) -> Result<Duration, ClientError> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|_| {
            ClientError::configuration(format!("{option} expects milliseconds, got `{value}`"))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn base() -> ClientConfig {
        ClientConfig {
            server_url: "http://config.example.com".into(),
            app_id: "app1".into(),
            ..Default::default()
        }
    }

    #[test]
    fn defaults_match_server_conventions() {
        let config = ClientConfig::default();
        assert_eq!(config.cluster, "default");
        assert_eq!(config.namespace, "application");
        assert_eq!(config.long_poll_timeout, Duration::from_millis(50_000));
        assert!(config.init_on_start);
        assert!(!config.watch);
        assert_eq!(config.watched_namespaces(), vec!["application".to_string()]);
    }

    #[test]
    fn options_table_sets_typed_fields() {
        let config = ClientConfig::from_options([
            ("config_server_url", "http://config:8080"),
            ("app_id", "app1"),
            ("secret", "s3cr3t"),
            ("cluster_name", "blue"),
            ("namespaces", "application, flags.json ,application"),
            ("watch", "true"),
            ("persist_snapshot", "yes"),
            ("snapshot_path", "/var/lib/app/snapshot.env"),
            ("timeout", "60000"),
            ("fetch_timeout", "2500"),
        ])
        .expect("valid options");

        assert_eq!(config.server_url, "http://config:8080");
        assert_eq!(config.secret.as_deref(), Some("s3cr3t"));
        assert_eq!(config.cluster, "blue");
        assert!(config.watch);
        assert!(config.persist_snapshot);
        assert_eq!(
            config.snapshot_path,
            Some(PathBuf::from("/var/lib/app/snapshot.env"))
        );
        assert_eq!(config.long_poll_timeout, Duration::from_secs(60));
        assert_eq!(config.fetch_timeout, Duration::from_millis(2500));
        assert_eq!(
            config.watched_namespaces(),
            vec!["application".to_string(), "flags.json".to_string()]
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn every_listed_option_is_accepted() {
        let mut config = base();
        for name in OPTION_NAMES {
            let value = match *name {
                "watch" | "init_on_start" | "persist_snapshot" => "false",
                "snapshot_format" => "properties",
                "snapshot_backup_limit" | "timeout" | "fetch_timeout" => "100",
                _ => "value",
            };
            config
                .set_option(name, value)
                .unwrap_or_else(|err| panic!("{name}: {err}"));
        }
    }

    #[test]
    fn unknown_or_invalid_options_fail() {
        let err = ClientConfig::from_options([("app_idd", "x")]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.to_string().contains("app_idd"));

        assert!(ClientConfig::from_options([("watch", "maybe")]).is_err());
        assert!(ClientConfig::from_options([("timeout", "soon")]).is_err());
        assert!(ClientConfig::from_options([("snapshot_format", "yaml")]).is_err());
    }

    #[test]
    fn env_variables_map_onto_options() {
        let config = ClientConfig::from_env_iter([
            ("CONFIG_SYNC_CONFIG_SERVER_URL", "http://config:8080"),
            ("CONFIG_SYNC_APP_ID", "app1"),
            ("CONFIG_SYNC_NAMESPACE_NAME", "shared"),
            ("PATH", "/usr/bin"),
        ])
        .expect("valid env");
        assert_eq!(config.app_id, "app1");
        assert_eq!(config.namespace, "shared");

        let err = ClientConfig::from_env_iter([("CONFIG_SYNC_BOGUS", "1")]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn validate_requires_server_url_and_app_id() {
        let missing_url = ClientConfig {
            server_url: String::new(),
            ..base()
        };
        assert!(missing_url.validate().unwrap_err().to_string().contains("config_server_url"));

        let missing_app = ClientConfig {
            app_id: " ".into(),
            ..base()
        };
        assert!(missing_app.validate().unwrap_err().to_string().contains("app_id"));

        let bad_namespace = ClientConfig {
            namespaces: vec!["a/b".into()],
            ..base()
        };
        assert!(bad_namespace.validate().is_err());

        let zero_timeout = ClientConfig {
            long_poll_timeout: Duration::ZERO,
            ..base()
        };
        assert!(zero_timeout.validate().is_err());
    }
}
