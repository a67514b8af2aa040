//! In-process reference collaborators.
//!
//! `InMemoryKnowledgeStore` keeps evidence per session and scores it by
//! keyword overlap with the query. `PlainTextParser` splits text into
//! paragraph-sized chunks. Both are good enough for tests and for local runs;
//! production deployments plug in a real store behind `KnowledgeStore`.

use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use tokio::sync::RwLock;

use super::collaborators::{
    DocumentParser, EvidenceChunk, IngestReport, KnowledgeStore, PageContent, ScoredChunk,
    SessionId,
};
use super::text::keywords;
use crate::error::CollaboratorError;

/// Session-scoped in-memory evidence store.
#[derive(Debug, Default)]
pub struct InMemoryKnowledgeStore {
    sessions: RwLock<HashMap<SessionId, Vec<EvidenceChunk>>>,
}

impl InMemoryKnowledgeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of chunks stored for a session.
    pub async fn len(&self, session_id: SessionId) -> usize {
        self.sessions
            .read()
            .await
            .get(&session_id)
            .map_or(0, Vec::len)
    }

    pub async fn is_empty(&self, session_id: SessionId) -> bool {
        self.len(session_id).await == 0
    }
}

/// Fraction of the topic's keywords present in the chunk.
fn score(topic_keywords: &[String], chunk: &EvidenceChunk) -> f32 {
    if topic_keywords.is_empty() {
        return 0.0;
    }
    let haystack = format!("{} {}", chunk.title, chunk.text).to_lowercase();
    let hits = topic_keywords
        .iter()
        .filter(|k| haystack.contains(k.as_str()))
        .count();
    hits as f32 / topic_keywords.len() as f32
}

#[async_trait]
impl KnowledgeStore for InMemoryKnowledgeStore {
    async fn ingest_knowledge(
        &self,
        session_id: SessionId,
        chunks: Vec<EvidenceChunk>,
    ) -> Result<IngestReport, CollaboratorError> {
        let mut report = IngestReport::default();
        let mut sessions = self.sessions.write().await;
        let stored = sessions.entry(session_id).or_default();
        for chunk in chunks {
            if chunk.text.trim().is_empty() {
                report
                    .errors
                    .push(format!("empty chunk at offset {}", chunk.offset));
                continue;
            }
            stored.push(chunk);
            report.ingested += 1;
        }
        Ok(report)
    }

    async fn query_knowledge(
        &self,
        session_id: SessionId,
        topic: &str,
        sources: Option<&BTreeSet<String>>,
        limit: usize,
    ) -> Result<Vec<ScoredChunk>, CollaboratorError> {
        let topic_keywords = keywords(topic);
        let sessions = self.sessions.read().await;
        let Some(stored) = sessions.get(&session_id) else {
            return Ok(Vec::new());
        };

        // A source-scoped query ranks every owned chunk, even unmatched ones.
        let mut scored: Vec<ScoredChunk> = stored
            .iter()
            .filter(|chunk| sources.is_none_or(|s| s.contains(&chunk.source_url)))
            .map(|chunk| ScoredChunk {
                score: score(&topic_keywords, chunk),
                chunk: chunk.clone(),
            })
            .filter(|s| sources.is_some() || s.score > 0.0)
            .collect();
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.chunk.source_url.cmp(&b.chunk.source_url))
                .then_with(|| a.chunk.offset.cmp(&b.chunk.offset))
        });
        scored.truncate(limit);
        Ok(scored)
    }
}

/// Splits plain text into paragraph chunks.
#[derive(Debug, Clone)]
pub struct PlainTextParser {
    /// Paragraphs shorter than this are merged into the next one.
    pub min_chunk_chars: usize,
    /// Chunks are cut once they grow beyond this.
    pub max_chunk_chars: usize,
}

impl Default for PlainTextParser {
    fn default() -> Self {
        Self {
            min_chunk_chars: 80,
            max_chunk_chars: 1200,
        }
    }
}

impl PlainTextParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Chunk `text`, attributing every chunk to `source_url`.
    pub fn chunk_text(&self, text: &str, source_url: &str, title: &str) -> Vec<EvidenceChunk> {
        let mut chunks = Vec::new();
        let mut current = String::new();
        let mut current_offset = 0usize;
        let mut offset = 0usize;

        for paragraph in text.split("\n\n") {
            let trimmed = paragraph.trim();
            if !trimmed.is_empty() {
                if current.is_empty() {
                    current_offset = offset;
                } else {
                    current.push(' ');
                }
                current.push_str(&super::text::normalize_whitespace(trimmed));

                if current.chars().count() >= self.min_chunk_chars {
                    self.flush(&mut chunks, &mut current, current_offset, source_url, title);
                }
            }
            offset += paragraph.chars().count() + 2;
        }
        if !current.trim().is_empty() {
            self.flush(&mut chunks, &mut current, current_offset, source_url, title);
        }
        chunks
    }

    fn flush(
        &self,
        chunks: &mut Vec<EvidenceChunk>,
        current: &mut String,
        offset: usize,
        source_url: &str,
        title: &str,
    ) {
        let text = std::mem::take(current);
        let chars: Vec<char> = text.chars().collect();
        for (i, piece) in chars.chunks(self.max_chunk_chars.max(1)).enumerate() {
            chunks.push(EvidenceChunk {
                text: piece.iter().collect(),
                source_url: source_url.to_string(),
                title: title.to_string(),
                offset: offset + i * self.max_chunk_chars,
            });
        }
    }
}

#[async_trait]
impl DocumentParser for PlainTextParser {
    async fn parse_document(
        &self,
        page: &PageContent,
        title: &str,
    ) -> Result<Vec<EvidenceChunk>, CollaboratorError> {
        if page.body.trim().is_empty() {
            return Err(CollaboratorError::ParseFailed {
                url: page.url.clone(),
                message: "document is empty".into(),
            });
        }
        Ok(self.chunk_text(&page.body, &page.url, title))
    }
}
