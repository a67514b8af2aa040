//! # Delve Core
//!
//! Research orchestration engine: plans a research question into topics,
//! gathers evidence for each topic concurrently through pluggable search,
//! fetch, parse and knowledge-store collaborators, audits it against a
//! sufficiency threshold and writes a cited report.

pub mod config;
pub mod error;
pub mod persistence;
pub mod research;

// Re-export commonly used types at the crate root.
pub use config::{DelveConfig, ResearchConfig, ResearchDepth, WebConfig, load_config};
pub use error::{CollaboratorError, ConfigError, DelveError, ResearchError, Result};
pub use research::{
    Collaborators, ResearchEngine, ResearchPhase, ResearchReport, ResearchSession,
    ResearchVector, SessionId, VectorStatus,
};
