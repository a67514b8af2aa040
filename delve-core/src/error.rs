//! Error types for the Delve research core.
//!
//! Uses `thiserror` for public API error types. Only planning failures
//! escape a research run; collaborator failures are absorbed into the
//! affected vector's error trail and surface as warnings on the session.

use crate::research::vector::VectorStatus;

/// Top-level error type for the Delve core library.
#[derive(Debug, thiserror::Error)]
pub enum DelveError {
    #[error("Research error: {0}")]
    Research(#[from] ResearchError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised by the orchestration engine itself.
#[derive(Debug, thiserror::Error)]
pub enum ResearchError {
    #[error("Research query is empty")]
    InvalidQuery,

    #[error("Planning failed: {message}")]
    PlanningFailed { message: String },

    #[error("Invalid status transition for vector {vector}: {from} -> {to}")]
    InvalidTransition {
        vector: String,
        from: VectorStatus,
        to: VectorStatus,
    },

    #[error("Vector {vector} cannot be refined: {count} of {max} refinements used")]
    RefinementNotAllowed {
        vector: String,
        count: u32,
        max: u32,
    },
}

/// Failures reported by the external collaborators (search, fetch, parse,
/// knowledge store). All of these are recoverable from the engine's point
/// of view.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CollaboratorError {
    #[error("Search unavailable for '{query}': {message}")]
    SearchUnavailable { query: String, message: String },

    #[error("Fetch failed for {url}: {message}")]
    FetchFailed { url: String, message: String },

    #[error("Parse failed for {url}: {message}")]
    ParseFailed { url: String, message: String },

    #[error("Partial ingestion for {url}: {ingested} ingested, {failed} rejected")]
    IngestPartial {
        url: String,
        ingested: usize,
        failed: usize,
    },

    #[error("Knowledge query failed: {message}")]
    KnowledgeQueryFailed { message: String },

    #[error("{operation} timed out after {timeout_secs}s")]
    Timeout {
        operation: String,
        timeout_secs: u64,
    },
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },
}

/// A type alias for results using the top-level `DelveError`.
pub type Result<T> = std::result::Result<T, DelveError>;
