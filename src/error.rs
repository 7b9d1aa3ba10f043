//! Typed error taxonomy for the RAG core.
//!
//! Every fallible operation in the crate returns [`Result`]. The variants
//! follow the subsystem boundaries: client-correctable input problems,
//! index/search failures, per-document processing failures, generation
//! backend failures (with a transient/permanent distinction), and the
//! orchestration wrapper applied at the query boundary.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, RagError>;

/// Failure classification for the generation backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationErrorKind {
    /// Backend reachable but not serving (5xx, probe failure).
    Unavailable,
    /// Per-call timeout exceeded.
    Timeout,
    /// Could not establish or keep the connection.
    ConnectionFailed,
    /// Configured model is not present on the backend (404).
    ModelNotFound,
    /// Backend returned 429.
    RateLimited,
    /// Response body did not match the wire contract.
    InvalidResponse,
}

impl GenerationErrorKind {
    /// Whether a failure of this kind is worth retrying with backoff.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            GenerationErrorKind::Unavailable
                | GenerationErrorKind::Timeout
                | GenerationErrorKind::ConnectionFailed
                | GenerationErrorKind::RateLimited
        )
    }
}

impl std::fmt::Display for GenerationErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            GenerationErrorKind::Unavailable => "unavailable",
            GenerationErrorKind::Timeout => "timeout",
            GenerationErrorKind::ConnectionFailed => "connection failed",
            GenerationErrorKind::ModelNotFound => "model not found",
            GenerationErrorKind::RateLimited => "rate limited",
            GenerationErrorKind::InvalidResponse => "invalid response",
        };
        f.write_str(s)
    }
}

/// Error type for all RAG core operations.
#[derive(Error, Debug)]
pub enum RagError {
    /// Client-correctable request problem (empty query, out-of-range knobs).
    #[error("invalid input: {0}")]
    Input(String),

    /// Configuration failed validation at load time.
    #[error("configuration error: {0}")]
    Config(String),

    /// Vector index or embedding backend failure.
    #[error("index error: {0}")]
    Index(String),

    /// A single document could not be loaded or parsed.
    #[error("failed to process document '{file}': {reason}")]
    DocumentProcessing { file: String, reason: String },

    /// Generation backend failure.
    #[error("generation backend {kind}: {message}")]
    Generation {
        kind: GenerationErrorKind,
        message: String,
    },

    /// Wrapper applied at the query boundary.
    #[error("query failed: {source}")]
    Orchestration {
        #[source]
        source: Box<RagError>,
    },
}

impl RagError {
    /// Shorthand constructor for generation failures.
    pub fn generation(kind: GenerationErrorKind, message: impl Into<String>) -> Self {
        RagError::Generation {
            kind,
            message: message.into(),
        }
    }

    /// True for failures that bounded exponential retry may resolve.
    pub fn is_transient(&self) -> bool {
        match self {
            RagError::Generation { kind, .. } => kind.is_transient(),
            RagError::Orchestration { source } => source.is_transient(),
            _ => false,
        }
    }

    /// Classify a transport-level HTTP failure.
    pub(crate) fn from_transport(context: &str, err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            GenerationErrorKind::Timeout
        } else if err.is_connect() {
            GenerationErrorKind::ConnectionFailed
        } else if err.is_decode() {
            GenerationErrorKind::InvalidResponse
        } else {
            GenerationErrorKind::ConnectionFailed
        };
        RagError::generation(kind, format!("{context}: {err}"))
    }

    /// Wrap this error at the query boundary.
    pub fn into_orchestration(self) -> Self {
        match self {
            err @ RagError::Orchestration { .. } => err,
            other => RagError::Orchestration {
                source: Box::new(other),
            },
        }
    }
}
