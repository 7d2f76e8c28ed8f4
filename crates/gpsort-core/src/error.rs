use std::path::PathBuf;

use thiserror::Error;

/// A sidecar that could not be turned into a descriptor. Excluded from the
/// store, never fatal for the folder.
#[derive(Debug, Clone, Error)]
pub enum SidecarLoadError {
    #[error("cannot read {path}: {reason}")]
    Read { path: PathBuf, reason: String },

    #[error("{path} is not valid UTF-8")]
    Encoding { path: PathBuf },

    #[error("{path} is not a JSON object: {reason}")]
    Structure { path: PathBuf, reason: String },
}

impl SidecarLoadError {
    pub fn path(&self) -> &std::path::Path {
        match self {
            Self::Read { path, .. } | Self::Encoding { path } | Self::Structure { path, .. } => path,
        }
    }
}

/// Failure reported by the metadata embedder. Always downgrades the file to
/// copy-only.
#[derive(Debug, Clone, Error)]
pub enum EmbedError {
    #[error("format .{0} does not support embedded metadata")]
    Unsupported(String),

    #[error("embedding tool could not be started: {0}")]
    Launch(String),

    #[error("embedding tool failed: {0}")]
    Tool(String),

    #[error("metadata embedding disabled")]
    Disabled,
}

/// Why a media file ended the run without output. Rendered verbatim into
/// the skip report, so each message fits on one line.
#[derive(Debug, Clone, Error)]
pub enum SkipReason {
    #[error("no sidecar matched (tried {tried} rules)")]
    NoMatch { tried: usize },

    #[error("ambiguous sidecar via {rule}: {}", .candidates.join(", "))]
    Ambiguous {
        rule: &'static str,
        candidates: Vec<String>,
    },

    #[error("no timestamp in {sidecar}")]
    MissingDate { sidecar: String },

    #[error("copy failed: {0}")]
    Io(String),
}

/// Error indicating the operation was cancelled.
#[derive(Debug, Clone)]
pub struct CancelledError;

impl std::fmt::Display for CancelledError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Operation cancelled")
    }
}

impl std::error::Error for CancelledError {}
