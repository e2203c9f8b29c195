use std::path::{Component, Path, PathBuf};

use {
    async_trait::async_trait,
    base64::{Engine as _, engine::general_purpose::STANDARD},
    serde::{Deserialize, Serialize},
};

use crate::{capabilities::FileReader, error::CapabilityError};

/// Reads files relative to the deployment root. Absolute paths and `..`
/// components are refused.
#[derive(Debug, Clone)]
pub struct RootFileReader {
    root: PathBuf,
}

impl RootFileReader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn resolve(&self, relative: &str) -> Result<PathBuf, CapabilityError> {
        let rel = Path::new(relative);
        if relative.trim().is_empty() {
            return Err(CapabilityError::invalid("file path is empty"));
        }
        let escapes = rel.components().any(|c| {
            matches!(
                c,
                Component::ParentDir | Component::RootDir | Component::Prefix(_)
            )
        });
        if escapes || rel.is_absolute() {
            return Err(CapabilityError::PathEscape(relative.to_string()));
        }
        Ok(self.root.join(rel))
    }
}

#[async_trait]
impl FileReader for RootFileReader {
    async fn read(&self, relative: &str) -> Result<Option<Vec<u8>>, CapabilityError> {
        let path = self.resolve(relative)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(CapabilityError::Io {
                path: relative.to_string(),
                source,
            }),
        }
    }
}

/// A file packaged for the mail capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    /// Base64 (standard alphabet, padded).
    pub content: String,
}

impl Attachment {
    pub fn from_bytes(relative: &str, bytes: &[u8]) -> Self {
        let filename = Path::new(relative)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(relative)
            .to_string();
        Self {
            content_type: content_type_for(&filename).to_string(),
            content: STANDARD.encode(bytes),
            filename,
        }
    }
}

pub fn encode_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// MIME type from the file extension; `application/octet-stream` otherwise.
pub fn content_type_for(filename: &str) -> &'static str {
    let ext = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "txt" | "log" => "text/plain",
        "csv" => "text/csv",
        "htm" | "html" => "text/html",
        "css" => "text/css",
        "js" => "text/javascript",
        "json" => "application/json",
        "xml" => "application/xml",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        _ => "application/octet-stream",
    }
}
