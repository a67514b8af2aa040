//! Executor: turns pending vectors into ingested evidence.
//!
//! Vectors in a batch run concurrently, bounded by a semaphore. Inside a
//! vector the searches fan out first, then candidate pages are fetched,
//! parsed and ingested concurrently. Every collaborator call carries a
//! timeout; failures land in the vector's `error_trail` and never abort the
//! batch.

use futures::future::join_all;
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::collaborators::{Collaborators, SearchHit, SessionId};
use super::vector::{ResearchVector, VectorStatus};
use crate::config::ResearchConfig;
use crate::error::CollaboratorError;

/// What one vector's execution produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionOutcome {
    pub vector_id: String,
    pub queries_run: usize,
    pub sources_added: Vec<String>,
    pub chunks_ingested: usize,
    pub failures: Vec<String>,
}

/// Result of the fetch/parse/ingest pipeline for one URL.
#[derive(Debug)]
struct PageResult {
    url: String,
    ingested: usize,
    failures: Vec<String>,
}

/// Runs batches of vectors against the collaborators.
///
/// Every search, fetch, parse and ingest call takes a slot from one pool of
/// `max_concurrent_vectors` permits, so a vector's parallel queries share the
/// budget of the whole batch instead of multiplying it.
#[derive(Debug, Clone)]
pub struct Executor {
    collaborators: Collaborators,
    call_slots: Arc<Semaphore>,
    max_concurrent_vectors: usize,
    max_parallel_queries: usize,
    results_per_query: usize,
    call_timeout: Duration,
}

impl Executor {
    pub fn new(collaborators: Collaborators, config: &ResearchConfig) -> Self {
        Self {
            collaborators,
            call_slots: Arc::new(Semaphore::new(config.max_concurrent_vectors.max(1))),
            max_concurrent_vectors: config.max_concurrent_vectors.max(1),
            max_parallel_queries: config.max_parallel_queries.max(1),
            results_per_query: config.results_per_query.max(1),
            call_timeout: config.call_timeout(),
        }
    }

    /// Execute every vector in `batch` that needs work.
    ///
    /// Each vector is borrowed exclusively by exactly one in-flight future,
    /// so no two tasks ever mutate the same vector.
    pub async fn execute_batch(
        &self,
        batch: &mut [&mut ResearchVector],
        session_id: SessionId,
    ) -> Vec<ExecutionOutcome> {
        let semaphore = Semaphore::new(self.max_concurrent_vectors);
        let semaphore = &semaphore;

        let tasks = batch
            .iter_mut()
            .filter(|v| v.needs_execution())
            .map(|vector| async move {
                let _permit = match semaphore.acquire().await {
                    Ok(permit) => permit,
                    Err(e) => {
                        return ExecutionOutcome {
                            vector_id: vector.id.clone(),
                            failures: vec![format!("executor semaphore closed: {e}")],
                            ..Default::default()
                        };
                    }
                };
                self.execute_vector(vector, session_id).await
            });

        join_all(tasks).await
    }

    /// Execute a single vector: search, fetch, parse, ingest.
    pub async fn execute_vector(
        &self,
        vector: &mut ResearchVector,
        session_id: SessionId,
    ) -> ExecutionOutcome {
        let mut outcome = ExecutionOutcome {
            vector_id: vector.id.clone(),
            ..Default::default()
        };

        if vector.status == VectorStatus::Pending {
            if let Err(e) = vector.transition(VectorStatus::Ingesting) {
                warn!(vector = %vector.id, error = %e, "Vector cannot start ingesting");
                outcome.failures.push(e.to_string());
                return outcome;
            }
        }

        let queries = match vector.refined_query.take() {
            Some(refined) => vec![refined],
            None => vector.search_queries.clone(),
        };
        outcome.queries_run = queries.len();
        debug!(vector = %vector.id, queries = queries.len(), "Executing vector");

        let search_results: Vec<(String, Result<Vec<SearchHit>, CollaboratorError>)> =
            stream::iter(queries)
                .map(|query| async move {
                    let result = self
                        .bounded(
                            format!("search '{query}'"),
                            self.collaborators.search.search_web(&query),
                        )
                        .await;
                    (query, result)
                })
                .buffered(self.max_parallel_queries)
                .collect()
                .await;

        let mut claimed: HashSet<String> = HashSet::new();
        let mut candidates: Vec<SearchHit> = Vec::new();
        for (query, result) in search_results {
            match result {
                Ok(hits) => {
                    if hits.is_empty() {
                        debug!(vector = %vector.id, query = %query, "Search returned no hits");
                    }
                    for hit in hits.into_iter().take(self.results_per_query) {
                        if vector.has_source(&hit.url) || !claimed.insert(hit.url.clone()) {
                            continue;
                        }
                        candidates.push(hit);
                    }
                }
                Err(e) => {
                    warn!(vector = %vector.id, query = %query, error = %e, "Search failed");
                    outcome.failures.push(e.to_string());
                }
            }
        }

        let pages: Vec<PageResult> = stream::iter(candidates)
            .map(|hit| self.ingest_page(hit, session_id))
            .buffered(self.max_parallel_queries)
            .collect()
            .await;

        for page in pages {
            outcome.failures.extend(page.failures);
            if page.ingested > 0 && vector.add_source(page.url.clone()) {
                vector.chunks_retrieved += page.ingested;
                outcome.chunks_ingested += page.ingested;
                outcome.sources_added.push(page.url);
            }
        }
        vector.error_trail.extend(outcome.failures.iter().cloned());

        info!(
            vector = %vector.id,
            sources = outcome.sources_added.len(),
            chunks = outcome.chunks_ingested,
            failures = outcome.failures.len(),
            "Vector pass complete"
        );
        outcome
    }

    async fn ingest_page(&self, hit: SearchHit, session_id: SessionId) -> PageResult {
        let mut result = PageResult {
            url: hit.url.clone(),
            ingested: 0,
            failures: Vec::new(),
        };

        let page = match self
            .bounded(
                format!("fetch {}", hit.url),
                self.collaborators.fetcher.fetch_page(&hit.url),
            )
            .await
        {
            Ok(page) => page,
            Err(e) => {
                debug!(url = %hit.url, error = %e, "Fetch failed");
                result.failures.push(e.to_string());
                return result;
            }
        };

        let chunks = match self
            .bounded(
                format!("parse {}", hit.url),
                self.collaborators.parser.parse_document(&page, &hit.title),
            )
            .await
        {
            Ok(chunks) => chunks,
            Err(e) => {
                debug!(url = %hit.url, error = %e, "Parse failed");
                result.failures.push(e.to_string());
                return result;
            }
        };
        if chunks.is_empty() {
            debug!(url = %hit.url, "Document produced no chunks");
            return result;
        }

        let submitted = chunks.len();
        match self
            .bounded(
                format!("ingest {}", hit.url),
                self.collaborators
                    .knowledge
                    .ingest_knowledge(session_id, chunks),
            )
            .await
        {
            Ok(report) => {
                result.ingested = report.ingested;
                if !report.errors.is_empty() {
                    result.failures.push(
                        CollaboratorError::IngestPartial {
                            url: hit.url.clone(),
                            ingested: report.ingested,
                            failed: submitted.saturating_sub(report.ingested),
                        }
                        .to_string(),
                    );
                }
            }
            Err(e) => {
                warn!(url = %hit.url, error = %e, "Ingestion failed");
                result.failures.push(e.to_string());
            }
        }
        result
    }

    /// Run a collaborator call inside a pool slot, under the per-call timeout.
    /// Waiting for a slot does not count against the timeout.
    async fn bounded<T>(
        &self,
        operation: String,
        call: impl Future<Output = Result<T, CollaboratorError>>,
    ) -> Result<T, CollaboratorError> {
        let _slot = self.call_slots.acquire().await.ok();
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(CollaboratorError::Timeout {
                operation,
                timeout_secs: self.call_timeout.as_secs(),
            }),
        }
    }
}
