//! Source documents and upload validation.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default maximum upload size in megabytes.
pub const DEFAULT_MAX_UPLOAD_MB: u64 = 50;

/// Document type of an uploaded source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Text,
    Markdown,
    Pdf,
}

impl SourceKind {
    /// Map a lowercase file extension to a kind.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "txt" => Some(SourceKind::Text),
            "md" => Some(SourceKind::Markdown),
            "pdf" => Some(SourceKind::Pdf),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Text => "txt",
            SourceKind::Markdown => "md",
            SourceKind::Pdf => "pdf",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Reference to the uploaded document a job was created from.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SourceDocument {
    /// Local path of the uploaded file
    pub path: PathBuf,
    /// Detected document type
    pub kind: SourceKind,
    /// Size of the upload in bytes
    pub size_bytes: u64,
}

impl SourceDocument {
    pub fn new(path: impl Into<PathBuf>, kind: SourceKind, size_bytes: u64) -> Self {
        Self {
            path: path.into(),
            kind,
            size_bytes,
        }
    }
}

/// Upload constraints enforced at submission.
#[derive(Debug, Clone)]
pub struct UploadLimits {
    /// Maximum upload size in megabytes
    pub max_upload_size_mb: u64,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            max_upload_size_mb: DEFAULT_MAX_UPLOAD_MB,
        }
    }
}

impl UploadLimits {
    pub fn max_bytes(&self) -> u64 {
        self.max_upload_size_mb * 1024 * 1024
    }

    /// Validate a submission and resolve its document kind.
    ///
    /// The size check is inclusive: an upload of exactly the limit passes,
    /// one byte more fails.
    pub fn validate(&self, path: &Path, size_bytes: u64) -> Result<SourceKind, UploadError> {
        if size_bytes > self.max_bytes() {
            return Err(UploadError::TooLarge {
                size_bytes,
                max_bytes: self.max_bytes(),
            });
        }

        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        SourceKind::from_extension(&ext).ok_or(UploadError::UnsupportedType { extension: ext })
    }
}

/// Validation failure for an upload. Surfaced verbatim to the submitter;
/// never seen by the orchestrator.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("upload of {size_bytes} bytes exceeds the {max_bytes} byte limit")]
    TooLarge { size_bytes: u64, max_bytes: u64 },

    #[error("unsupported upload type '.{extension}' (allowed: txt, md, pdf)")]
    UnsupportedType { extension: String },
}
