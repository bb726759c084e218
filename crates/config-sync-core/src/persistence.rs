//! Local snapshot of the configuration store.
//!
//! The snapshot is a flat properties file: one `namespace.key=value` line per
//! entry plus a single `release_key=value` line. It is rewritten after every
//! successful update (when enabled) and read only when the startup fetch
//! fails. Before a rewrite the previous file is moved aside to a
//! `{path}.{unix_millis}` backup so no reader ever opens a half-written file
//! under the live name.
//!
//! Backslash, newline and carriage return are escaped in keys and values, as
//! is `=` in keys, so arbitrary values survive a save/load cycle.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::signature::current_unix_millis;
use crate::store::NamespaceMap;

/// Pseudo-key carrying the release key of the most recent update.
pub const RELEASE_KEY_ENTRY: &str = "release_key";
/// File name used when the snapshot path is unset or names a directory.
pub const DEFAULT_SNAPSHOT_FILE_NAME: &str = ".env.config-sync";
/// Number of timestamped backups kept next to the snapshot.
pub const DEFAULT_BACKUP_LIMIT: usize = 5;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("snapshot io error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed snapshot line {line}: {reason}")]
    Malformed { line: usize, reason: &'static str },
}

/// On-disk snapshot encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SnapshotFormat {
    /// `namespace.key=value` lines plus one `release_key=value` line.
    #[default]
    Properties,
}

impl SnapshotFormat {
    /// Looks up a format by its configuration name (case-insensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "properties" => Some(SnapshotFormat::Properties),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotFormat::Properties => "properties",
        }
    }

    /// Serialises `image` in this format.
    pub fn encode(&self, image: &SnapshotImage) -> String {
        match self {
            SnapshotFormat::Properties => image.render(),
        }
    }

    /// Parses snapshot text written in this format.
    pub fn decode(
        &self,
        text: &str,
        known_namespaces: &[String],
    ) -> Result<NamespaceMap, PersistenceError> {
        match self {
            SnapshotFormat::Properties => parse(text, known_namespaces),
        }
    }
}

/// Flattened content written to disk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotImage {
    pub namespaces: NamespaceMap,
    pub release_key: String,
}

impl SnapshotImage {
    pub fn new(namespaces: NamespaceMap, release_key: impl Into<String>) -> Self {
        Self {
            namespaces,
            release_key: release_key.into(),
        }
    }

    /// Renders the properties-file representation.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (namespace, entries) in &self.namespaces {
            for (key, value) in entries {
                out.push_str(&escape(&format!("{namespace}.{key}"), true));
                out.push('=');
                out.push_str(&escape(value, false));
                out.push('\n');
            }
        }
        out.push_str(RELEASE_KEY_ENTRY);
        out.push('=');
        out.push_str(&escape(&self.release_key, false));
        out.push('\n');
        out
    }
}

/// Parses snapshot text into namespace → key → value.
///
/// A key is attributed to the longest entry of `known_namespaces` it starts
/// with (followed by `.`); otherwise the namespace ends at the first `.`.
pub fn parse(text: &str, known_namespaces: &[String]) -> Result<NamespaceMap, PersistenceError> {
    let mut result = NamespaceMap::new();
    for (index, raw_line) in text.lines().enumerate() {
        let line_no = index + 1;
        let line = raw_line.strip_suffix('\r').unwrap_or(raw_line);
        if line.trim().is_empty() {
            continue;
        }
        let Some(split) = find_unescaped_eq(line) else {
            return Err(PersistenceError::Malformed {
                line: line_no,
                reason: "missing `=` separator",
            });
        };
        let full_key = unescape(&line[..split]);
        let value = unescape(&line[split + 1..]);
        let full_key = full_key.trim();
        if full_key == RELEASE_KEY_ENTRY {
            continue;
        }
        let Some((namespace, key)) = split_namespace(full_key, known_namespaces) else {
            return Err(PersistenceError::Malformed {
                line: line_no,
                reason: "key is not of the form `namespace.key`",
            });
        };
        result
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value);
    }
    Ok(result)
}

fn split_namespace<'a>(full_key: &'a str, known: &[String]) -> Option<(&'a str, &'a str)> {
    let by_known = known
        .iter()
        .filter(|namespace| {
            full_key.len() > namespace.len() + 1
                && full_key.starts_with(namespace.as_str())
                && full_key.as_bytes()[namespace.len()] == b'.'
        })
        .max_by_key(|namespace| namespace.len())
        .map(|namespace| full_key.split_at(namespace.len()))
        .map(|(namespace, rest)| (namespace, &rest[1..]));

    let (namespace, key) = by_known.or_else(|| full_key.split_once('.'))?;
    let (namespace, key) = (namespace.trim(), key.trim());
    if namespace.is_empty() || key.is_empty() {
        return None;
    }
    Some((namespace, key))
}

fn escape(text: &str, is_key: bool) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '=' if is_key => out.push_str("\\="),
            other => out.push(other),
        }
    }
    out
}

fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

fn find_unescaped_eq(line: &str) -> Option<usize> {
    let mut escaped = false;
    for (index, byte) in line.bytes().enumerate() {
        match byte {
            _ if escaped => escaped = false,
            b'\\' => escaped = true,
            b'=' => return Some(index),
            _ => {}
        }
    }
    None
}

/// Writes `image` to `path`, moving any existing file to a timestamped backup first.
pub fn save(
    path: &Path,
    image: &SnapshotImage,
    format: SnapshotFormat,
    backup_limit: usize,
) -> Result<(), PersistenceError> {
    if path.exists() {
        let backup = next_backup_path(path, current_unix_millis());
        if let Err(err) = fs::rename(path, &backup) {
            warn!(
                path = %path.display(),
                backup = %backup.display(),
                %err,
                "config-sync: failed to move previous snapshot aside; overwriting in place"
            );
        }
    }
    fs::write(path, format.encode(image))?;
    prune_backups(path, backup_limit);
    debug!(path = %path.display(), format = format.as_str(), "config-sync: snapshot written");
    Ok(())
}

/// Reads the properties snapshot at `path`.
///
/// Any failure (missing file, unreadable file, malformed line) is logged and
/// yields an empty map so startup is never aborted.
pub fn load(path: &Path, known_namespaces: &[String]) -> NamespaceMap {
    load_as(path, SnapshotFormat::Properties, known_namespaces)
}

/// [`load`] for an explicit format.
pub fn load_as(path: &Path, format: SnapshotFormat, known_namespaces: &[String]) -> NamespaceMap {
    match read_snapshot_as(path, format, known_namespaces) {
        Ok(namespaces) => namespaces,
        Err(err) => {
            warn!(
                path = %path.display(),
                %err,
                "config-sync: could not read local snapshot; starting without it"
            );
            NamespaceMap::new()
        }
    }
}

/// Reads the properties snapshot at `path`, surfacing every failure.
pub fn read_snapshot(
    path: &Path,
    known_namespaces: &[String],
) -> Result<NamespaceMap, PersistenceError> {
    read_snapshot_as(path, SnapshotFormat::Properties, known_namespaces)
}

pub fn read_snapshot_as(
    path: &Path,
    format: SnapshotFormat,
    known_namespaces: &[String],
) -> Result<NamespaceMap, PersistenceError> {
    let text = fs::read_to_string(path)?;
    format.decode(&text, known_namespaces)
}

fn backup_path(path: &Path, millis: i64) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(format!(".{millis}"));
    PathBuf::from(name)
}

/// First unused backup name at or after `millis`; rewrites within the same
/// millisecond must not clobber each other's backups.
fn next_backup_path(path: &Path, millis: i64) -> PathBuf {
    let mut millis = millis;
    let mut candidate = backup_path(path, millis);
    while candidate.exists() {
        millis = millis.saturating_add(1);
        candidate = backup_path(path, millis);
    }
    candidate
}

/// Deletes all but the newest `limit` backups of `path`.
fn prune_backups(path: &Path, limit: usize) {
    let (Some(dir), Some(file_name)) = (path.parent(), path.file_name()) else {
        return;
    };
    let dir = if dir.as_os_str().is_empty() {
        Path::new(".")
    } else {
        dir
    };
    let prefix = format!("{}.", file_name.to_string_lossy());
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            debug!(%err, "config-sync: cannot list snapshot directory for pruning");
            return;
        }
    };

    let mut backups: Vec<(i64, PathBuf)> = entries
        .filter_map(Result::ok)
        .filter_map(|entry| {
            let name = entry.file_name();
            let millis = name
                .to_str()?
                .strip_prefix(&prefix)?
                .parse::<i64>()
                .ok()?;
            Some((millis, entry.path()))
        })
        .collect();
    if backups.len() <= limit {
        return;
    }
    backups.sort_by_key(|(millis, _)| *millis);
    let excess = backups.len() - limit;
    for (_, stale) in backups.into_iter().take(excess) {
        if let Err(err) = fs::remove_file(&stale) {
            debug!(path = %stale.display(), %err, "config-sync: failed to prune snapshot backup");
        }
    }
}

/// Resolves where the snapshot lives.
///
/// No path → `{temp_dir}/.env.config-sync`; relative paths are taken under
/// the temp directory; an existing directory gets the default file name; a
/// missing path whose last component has an extension is a file (its parent
/// is created), anything else is a directory to create.
pub fn resolve_snapshot_path(configured: Option<&Path>) -> io::Result<PathBuf> {
    let base_dir = std::env::temp_dir();
    let Some(configured) = configured else {
        return Ok(base_dir.join(DEFAULT_SNAPSHOT_FILE_NAME));
    };
    let path = if configured.is_absolute() {
        configured.to_path_buf()
    } else {
        base_dir.join(configured)
    };

    if path.is_dir() {
        return Ok(path.join(DEFAULT_SNAPSHOT_FILE_NAME));
    }
    if path.exists() {
        return Ok(path);
    }
    let looks_like_file = path
        .file_name()
        .map(|name| name.to_string_lossy().contains('.'))
        .unwrap_or(false);
    if looks_like_file {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(path)
    } else {
        fs::create_dir_all(&path)?;
        Ok(path.join(DEFAULT_SNAPSHOT_FILE_NAME))
    }
}

enum WriterCommand {
    Write(SnapshotImage),
    Flush(oneshot::Sender<()>),
}

/// Background writer that applies snapshot writes in submission order.
///
/// Submitting never waits on disk I/O; each write runs on the blocking pool.
#[derive(Debug, Clone)]
pub struct SnapshotWriter {
    path: PathBuf,
    format: SnapshotFormat,
    tx: mpsc::UnboundedSender<WriterCommand>,
}

impl std::fmt::Debug for WriterCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WriterCommand::Write(_) => f.write_str("Write"),
            WriterCommand::Flush(_) => f.write_str("Flush"),
        }
    }
}

impl SnapshotWriter {
    /// Spawns the writer task. Must be called from within a tokio runtime.
    pub fn spawn(
        path: PathBuf,
        format: SnapshotFormat,
        backup_limit: usize,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_writer(path.clone(), format, backup_limit, rx));
        (Self { path, format, tx }, handle)
    }

    /// Location of the live snapshot file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> SnapshotFormat {
        self.format
    }

    /// Reads the live snapshot in this writer's format; empty on any failure.
    pub fn load(&self, known_namespaces: &[String]) -> NamespaceMap {
        load_as(&self.path, self.format, known_namespaces)
    }

    /// Queues `image` to be written.
    pub fn submit(&self, image: SnapshotImage) {
        if self.tx.send(WriterCommand::Write(image)).is_err() {
            warn!("config-sync: snapshot writer stopped; dropping snapshot update");
        }
    }

    /// Waits until every previously submitted write has been applied.
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(WriterCommand::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }
}

async fn run_writer(
    path: PathBuf,
    format: SnapshotFormat,
    backup_limit: usize,
    mut rx: mpsc::UnboundedReceiver<WriterCommand>,
) {
    while let Some(command) = rx.recv().await {
        match command {
            WriterCommand::Write(image) => {
                let target = path.clone();
                let result = tokio::task::spawn_blocking(move || {
                    save(&target, &image, format, backup_limit)
                })
                .await;
                match result {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        warn!(path = %path.display(), %err, "config-sync: failed to write snapshot");
                    }
                    Err(err) => {
                        warn!(%err, "config-sync: snapshot write task failed");
                    }
                }
            }
            WriterCommand::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }
    debug!("config-sync: snapshot writer shutting down");
}
