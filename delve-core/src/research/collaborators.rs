//! The four external capabilities the engine consumes.
//!
//! Search, fetch, parse and the knowledge store are implemented outside the
//! engine; the engine only sees these traits. All of them are `Send + Sync`
//! so a single bundle can be shared by every concurrent vector.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::CollaboratorError;

/// Correlation key scoping every knowledge-store call to one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// A single web search hit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchHit {
    pub url: String,
    pub title: String,
    pub snippet: String,
}

/// Raw page content returned by a fetcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageContent {
    pub url: String,
    /// MIME type as reported by the server, if any.
    pub content_type: Option<String>,
    pub body: String,
}

/// A unit of evidence produced by parsing a document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvidenceChunk {
    pub text: String,
    pub source_url: String,
    pub title: String,
    /// Character offset of the chunk in the parsed document.
    pub offset: usize,
}

/// A chunk returned from a knowledge-store query together with its score.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoredChunk {
    pub chunk: EvidenceChunk,
    /// Relevance in `0.0..=1.0`.
    pub score: f32,
}

/// Result of an ingestion call. Partial ingestion is allowed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestReport {
    /// Chunks that were stored.
    pub ingested: usize,
    /// One message per rejected chunk.
    pub errors: Vec<String>,
}

#[async_trait]
pub trait WebSearch: Send + Sync {
    /// Ranked hits for `query`, best first.
    async fn search_web(&self, query: &str) -> Result<Vec<SearchHit>, CollaboratorError>;
}

#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_page(&self, url: &str) -> Result<PageContent, CollaboratorError>;
}

#[async_trait]
pub trait DocumentParser: Send + Sync {
    /// Split a fetched page into evidence chunks.
    async fn parse_document(
        &self,
        page: &PageContent,
        title: &str,
    ) -> Result<Vec<EvidenceChunk>, CollaboratorError>;
}

/// Session-scoped evidence index shared across vectors and sessions.
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    async fn ingest_knowledge(
        &self,
        session_id: SessionId,
        chunks: Vec<EvidenceChunk>,
    ) -> Result<IngestReport, CollaboratorError>;

    /// Most relevant chunks for `topic` within the session, best first.
    ///
    /// With `sources`, only chunks whose `source_url` is in the set are
    /// ranked, so the limit applies to those chunks alone.
    async fn query_knowledge(
        &self,
        session_id: SessionId,
        topic: &str,
        sources: Option<&BTreeSet<String>>,
        limit: usize,
    ) -> Result<Vec<ScoredChunk>, CollaboratorError>;
}

/// Bundle of the collaborators handed to every engine step.
#[derive(Clone)]
pub struct Collaborators {
    pub search: Arc<dyn WebSearch>,
    pub fetcher: Arc<dyn PageFetcher>,
    pub parser: Arc<dyn DocumentParser>,
    pub knowledge: Arc<dyn KnowledgeStore>,
}

impl Collaborators {
    pub fn new(
        search: Arc<dyn WebSearch>,
        fetcher: Arc<dyn PageFetcher>,
        parser: Arc<dyn DocumentParser>,
        knowledge: Arc<dyn KnowledgeStore>,
    ) -> Self {
        Self {
            search,
            fetcher,
            parser,
            knowledge,
        }
    }
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}
