//! Namespace values and typed accessors.
//!
//! A [`Namespace`] is immutable once built. The store hands out
//! `Arc<Namespace>` clones, so a reader always sees one complete key set.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::warn;

use crate::error::ClientError;
use crate::http::ReleaseSnapshot;

/// Key under which text-format namespaces (json, xml, yaml) carry their document.
pub const CONTENT_KEY: &str = "content";

/// Declared format of a namespace, derived from its name suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum NamespaceFormat {
    #[default]
    Properties,
    Xml,
    Json,
    Yml,
    Yaml,
}

impl NamespaceFormat {
    /// Infers the format from a namespace name (`foo.json` → `Json`).
    ///
    /// Names without a recognised suffix are properties namespaces.
    pub fn from_namespace_name(name: &str) -> Self {
        match name.rsplit_once('.').map(|(_, ext)| ext) {
            Some("properties") => NamespaceFormat::Properties,
            Some("xml") => NamespaceFormat::Xml,
            Some("json") => NamespaceFormat::Json,
            Some("yml") => NamespaceFormat::Yml,
            Some("yaml") => NamespaceFormat::Yaml,
            _ => NamespaceFormat::Properties,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NamespaceFormat::Properties => "properties",
            NamespaceFormat::Xml => "xml",
            NamespaceFormat::Json => "json",
            NamespaceFormat::Yml => "yml",
            NamespaceFormat::Yaml => "yaml",
        }
    }
}

impl fmt::Display for NamespaceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fully-applied state of one namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    name: String,
    format: NamespaceFormat,
    release_key: String,
    configurations: BTreeMap<String, String>,
}

impl Namespace {
    pub fn new(
        name: impl Into<String>,
        release_key: impl Into<String>,
        configurations: BTreeMap<String, String>,
    ) -> Self {
        let name = name.into();
        Self {
            format: NamespaceFormat::from_namespace_name(&name),
            name,
            release_key: release_key.into(),
            configurations,
        }
    }

    /// Builds a namespace from a fetch payload.
    ///
    /// JSON namespaces carry their document in `configurations.content`; its
    /// top-level members become the namespace keys.
    pub fn from_release(release: ReleaseSnapshot) -> Result<Self, serde_json::Error> {
        let ReleaseSnapshot {
            namespace_name,
            configurations,
            release_key,
            ..
        } = release;
        let format = NamespaceFormat::from_namespace_name(&namespace_name);
        let configurations = match (format, configurations.get(CONTENT_KEY)) {
            (NamespaceFormat::Json, Some(content)) => {
                flatten_json_content(&namespace_name, content)?
            }
            _ => configurations,
        };
        Ok(Self {
            name: namespace_name,
            format,
            release_key,
            configurations,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn format(&self) -> NamespaceFormat {
        self.format
    }

    /// Release the values were populated from; empty when restored from a snapshot.
    pub fn release_key(&self) -> &str {
        &self.release_key
    }

    pub fn configurations(&self) -> &BTreeMap<String, String> {
        &self.configurations
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.configurations.get(key).map(String::as_str)
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.get(key).map(str::to_string)
    }

    pub fn get_number(&self, key: &str) -> Result<Option<f64>, ClientError> {
        self.get(key)
            .map(|raw| {
                raw.trim()
                    .parse::<f64>()
                    .map_err(|err| ClientError::conversion(key, "number", err))
            })
            .transpose()
    }

    pub fn get_boolean(&self, key: &str) -> Result<Option<bool>, ClientError> {
        self.get(key).map(|raw| parse_boolean(key, raw)).transpose()
    }

    pub fn get_json(&self, key: &str) -> Result<Option<Value>, ClientError> {
        self.get(key)
            .map(|raw| {
                serde_json::from_str(raw).map_err(|err| ClientError::conversion(key, "json", err))
            })
            .transpose()
    }

    pub fn get_date(&self, key: &str) -> Result<Option<OffsetDateTime>, ClientError> {
        self.get(key).map(|raw| parse_date(key, raw)).transpose()
    }
}

fn parse_boolean(key: &str, raw: &str) -> Result<bool, ClientError> {
    let trimmed = raw.trim();
    if trimmed.eq_ignore_ascii_case("true") {
        Ok(true)
    } else if trimmed.eq_ignore_ascii_case("false") {
        Ok(false)
    } else {
        Err(ClientError::conversion(
            key,
            "boolean",
            format!("expected `true` or `false`, found `{trimmed}`"),
        ))
    }
}

/// Accepts RFC 3339 timestamps, then integer unix milliseconds.
fn parse_date(key: &str, raw: &str) -> Result<OffsetDateTime, ClientError> {
    let trimmed = raw.trim();
    if let Ok(date) = OffsetDateTime::parse(trimmed, &Rfc3339) {
        return Ok(date);
    }
    let millis = trimmed.parse::<i64>().map_err(|_| {
        ClientError::conversion(
            key,
            "date",
            format!("`{trimmed}` is neither RFC 3339 nor unix milliseconds"),
        )
    })?;
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000)
        .map_err(|err| ClientError::conversion(key, "date", err))
}

fn flatten_json_content(
    namespace: &str,
    content: &str,
) -> Result<BTreeMap<String, String>, serde_json::Error> {
    let document: Value = serde_json::from_str(content)?;
    let mut flattened = BTreeMap::new();
    match document {
        Value::Object(members) => {
            for (key, value) in members {
                let value = match value {
                    Value::String(text) => text,
                    other => other.to_string(),
                };
                flattened.insert(key, value);
            }
        }
        other => {
            warn!(
                namespace = namespace,
                "config-sync: json namespace content is not an object; keeping it as `content`"
            );
            flattened.insert(CONTENT_KEY.to_string(), other.to_string());
        }
    }
    Ok(flattened)
}
