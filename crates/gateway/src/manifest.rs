//! Operation manifest: a JSON object keyed by operation name.
//!
//! ```json
//! {
//!   "add":    { "script": "add.js", "description": "Adds five" },
//!   "notify": { "script": "notify.js", "push": "feed" },
//!   "feed":   { "script": "feed.js", "include": ["lib/format.js"] }
//! }
//! ```
//!
//! The file is re-read on every lookup so edits apply to the next call.

use std::path::{Path, PathBuf};

use {
    serde_json::{Map, Value},
    tracing::warn,
};

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("failed to read manifest {}: {source}", .path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("manifest is not a JSON object: {0}")]
    Invalid(String),

    #[error("operation not found: {0}")]
    NotFound(String),

    #[error("operation '{name}' is misconfigured: {reason}")]
    Misconfigured { name: String, reason: String },
}

/// One resolved manifest entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationEntry {
    pub name: String,
    /// Script path relative to the deployment root.
    pub script: PathBuf,
    pub description: String,
    /// Name of another entry to execute and push after this one.
    pub push: Option<String>,
    /// Extra includes for this entry, after the shared ones.
    pub includes: Vec<PathBuf>,
}

/// Snapshot of the manifest taken for a single dispatch.
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    entries: Map<String, Value>,
}

impl Manifest {
    pub fn parse(raw: &str) -> Result<Self, ManifestError> {
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(entries)) => Ok(Self { entries }),
            Ok(other) => Err(ManifestError::Invalid(format!("found {}", kind(&other)))),
            Err(e) => Err(ManifestError::Invalid(e.to_string())),
        }
    }

    pub fn resolve(&self, name: &str) -> Result<OperationEntry, ManifestError> {
        let raw = self
            .entries
            .get(name)
            .ok_or_else(|| ManifestError::NotFound(name.to_string()))?;
        let misconfigured = |reason: &str| ManifestError::Misconfigured {
            name: name.to_string(),
            reason: reason.to_string(),
        };
        let obj = raw
            .as_object()
            .ok_or_else(|| misconfigured("entry is not an object"))?;
        let script = obj
            .get("script")
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| misconfigured("missing script path"))?;

        let includes = match obj.get("include") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| {
                    v.as_str()
                        .map(PathBuf::from)
                        .ok_or_else(|| misconfigured("include entries must be strings"))
                })
                .collect::<Result<_, _>>()?,
            Some(_) => return Err(misconfigured("include must be an array")),
        };

        Ok(OperationEntry {
            name: name.to_string(),
            script: PathBuf::from(script),
            description: obj
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            push: obj
                .get("push")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string),
            includes,
        })
    }

    /// Operation names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Raw entry, as written in the file.
    pub fn raw_entry(&self, name: &str) -> Option<&Value> {
        self.entries.get(name)
    }

    /// Every entry with its script path removed.
    pub fn redacted(&self) -> Map<String, Value> {
        self.entries
            .iter()
            .map(|(name, entry)| {
                let mut entry = entry.clone();
                if let Value::Object(obj) = &mut entry {
                    obj.remove("script");
                }
                (name.clone(), entry)
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Reads the manifest from disk on every call.
#[derive(Debug, Clone)]
pub struct ManifestStore {
    path: PathBuf,
}

impl ManifestStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn load(&self) -> Result<Manifest, ManifestError> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| ManifestError::Unreadable {
                path: self.path.clone(),
                source,
            })?;
        Manifest::parse(&raw).inspect_err(|e| {
            warn!(path = %self.path.display(), error = %e, "manifest rejected");
        })
    }

    /// Load a fresh snapshot and resolve `name` in it.
    pub async fn resolve(&self, name: &str) -> Result<(Manifest, OperationEntry), ManifestError> {
        let manifest = self.load().await?;
        let entry = manifest.resolve(name)?;
        Ok((manifest, entry))
    }
}
