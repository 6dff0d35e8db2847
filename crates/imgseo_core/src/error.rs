use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// Why a single image was not materialized. Always local to that image.
#[derive(Debug, Clone, Error, Serialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ImageError {
    #[error("image element has no src attribute")]
    MissingReference,

    #[error("reference {raw:?} does not name a file")]
    UnusableReference { raw: String },

    #[error("inline data reference cannot be materialized")]
    InlineData,

    #[error("local file not found: {path}")]
    UnresolvableLocal { path: PathBuf },

    #[error("failed to download {url}: {message}")]
    Transport { url: String, message: String },

    #[error("HTTP {status} while downloading {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("i/o error on {path}: {message}")]
    Io { path: PathBuf, message: String },

    #[error("destination {path} holds another image referenced on this page")]
    Occupied { path: PathBuf },
}

impl ImageError {
    pub fn io(path: impl Into<PathBuf>, error: &std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            message: error.to_string(),
        }
    }

    /// Missing references are skipped rather than counted as failures.
    pub fn is_skip(&self) -> bool {
        matches!(self, Self::MissingReference)
    }
}

/// Why a whole page was left untouched. Never aborts the run.
#[derive(Debug, Clone, Error, Serialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PageSkip {
    #[error("skipping {url} - no file mapping found")]
    ConfigurationGap { url: String },

    #[error("file not found: {path}")]
    MissingFile { url: String, path: PathBuf },

    #[error("failed to read {path}: {message}")]
    Unreadable {
        url: String,
        path: PathBuf,
        message: String,
    },

    #[error("failed to write {path}: {message}")]
    WriteFailed {
        url: String,
        path: PathBuf,
        message: String,
    },
}

impl PageSkip {
    pub fn url(&self) -> &str {
        match self {
            Self::ConfigurationGap { url }
            | Self::MissingFile { url, .. }
            | Self::Unreadable { url, .. }
            | Self::WriteFailed { url, .. } => url,
        }
    }
}
