use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::progress::Stage;

/// Errors produced while ingesting or serving an instance.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("failed to download {url}: {reason}")]
    Network { url: String, reason: String },

    #[error("invalid archive {}: {reason}", path.display())]
    Format { path: PathBuf, reason: String },

    #[error("rejected {subject:?}: {reason}")]
    Validation { subject: String, reason: String },

    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{what} not found: {name}")]
    NotFound { what: &'static str, name: String },

    #[error("manifest {} is not valid json: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl IngestError {
    pub(crate) fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io { path: path.as_ref().to_path_buf(), source }
    }

    pub(crate) fn validation(subject: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation { subject: subject.into(), reason: reason.into() }
    }

    pub(crate) fn format(path: impl AsRef<Path>, reason: impl ToString) -> Self {
        Self::Format { path: path.as_ref().to_path_buf(), reason: reason.to_string() }
    }

    pub(crate) fn network(url: impl ToString, reason: impl ToString) -> Self {
        Self::Network { url: url.to_string(), reason: reason.to_string() }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// A pipeline run that ended in the `Failed` state.
#[derive(Debug, Error)]
#[error("ingestion of instance `{instance}` failed while {stage}")]
pub struct IngestFailure {
    pub instance: String,
    pub stage: Stage,
    #[source]
    pub cause: IngestError,
}
