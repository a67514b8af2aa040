//! Auditor: decides whether an ingesting vector has enough evidence.
//!
//! Sufficient vectors become `verified`. Insufficient ones are requeued
//! with a refined query while refinement budget remains, otherwise they
//! terminate as `incomplete` (some evidence) or `failed` (none).

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::collaborators::{KnowledgeStore, SessionId};
use super::session::SessionNote;
use super::text::keywords;
use super::vector::{ResearchVector, VectorStatus};
use crate::config::ResearchConfig;

/// Angles appended to topic keywords when refining a query, tried in order
/// starting from the vector's current refinement count.
const REFINEMENT_ANGLES: &[&str] = &[
    "overview",
    "research findings",
    "case study examples",
    "statistics and data",
    "recent developments",
    "expert analysis",
];

/// Result of auditing one vector.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditOutcome {
    pub vector_id: String,
    pub status: VectorStatus,
    pub chunks_retrieved: usize,
    /// Chunks the store returned above the relevance floor.
    pub corroborating_chunks: usize,
    pub refined_query: Option<String>,
    /// Set when the vector was terminated for exhausting its refinements.
    pub note: Option<SessionNote>,
}

#[derive(Clone)]
pub struct Auditor {
    knowledge: Arc<dyn KnowledgeStore>,
    sufficiency_threshold: usize,
    max_refinements: u32,
    min_relevance: f32,
    require_store_corroboration: bool,
    call_timeout: Duration,
}

impl std::fmt::Debug for Auditor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Auditor")
            .field("sufficiency_threshold", &self.sufficiency_threshold)
            .field("max_refinements", &self.max_refinements)
            .field("require_store_corroboration", &self.require_store_corroboration)
            .finish_non_exhaustive()
    }
}

impl Auditor {
    pub fn new(knowledge: Arc<dyn KnowledgeStore>, config: &ResearchConfig) -> Self {
        Self {
            knowledge,
            sufficiency_threshold: config.sufficiency_threshold,
            max_refinements: config.max_refinements,
            min_relevance: config.min_relevance,
            require_store_corroboration: config.require_store_corroboration,
            call_timeout: config.call_timeout(),
        }
    }

    /// Whether a vector with this evidence would be verified.
    pub fn is_sufficient(&self, chunks_retrieved: usize, corroborating: usize) -> bool {
        chunks_retrieved >= self.sufficiency_threshold
            && (!self.require_store_corroboration || corroborating >= self.sufficiency_threshold)
    }

    /// Audit a vector that the Executor has just processed.
    ///
    /// Vectors not in `ingesting` are left untouched.
    pub async fn audit(&self, vector: &mut ResearchVector, session_id: SessionId) -> AuditOutcome {
        let mut outcome = AuditOutcome {
            vector_id: vector.id.clone(),
            status: vector.status,
            chunks_retrieved: vector.chunks_retrieved,
            corroborating_chunks: 0,
            refined_query: None,
            note: None,
        };
        if vector.status != VectorStatus::Ingesting {
            debug!(vector = %vector.id, status = %vector.status, "Skipping audit");
            return outcome;
        }

        outcome.corroborating_chunks = self.corroborating_chunks(vector, session_id).await;

        let next = if self.is_sufficient(vector.chunks_retrieved, outcome.corroborating_chunks) {
            vector.refined_query = None;
            VectorStatus::Verified
        } else if vector.feedback_loop_count < self.max_refinements {
            let refined = refine_query(vector);
            match vector.requeue(refined.clone(), self.max_refinements) {
                Ok(()) => {
                    info!(
                        vector = %vector.id,
                        chunks = vector.chunks_retrieved,
                        refinement = vector.feedback_loop_count,
                        query = %refined,
                        "Evidence insufficient, requeueing"
                    );
                    outcome.status = vector.status;
                    outcome.refined_query = Some(refined);
                    return outcome;
                }
                Err(e) => {
                    warn!(vector = %vector.id, error = %e, "Requeue rejected");
                    self.exhausted_status(vector)
                }
            }
        } else {
            self.exhausted_status(vector)
        };

        if next != VectorStatus::Verified {
            outcome.note = Some(SessionNote::RefinementBudgetExhausted {
                vector: vector.id.clone(),
                topic: vector.topic.clone(),
                refinements: vector.feedback_loop_count,
                chunks: vector.chunks_retrieved,
                threshold: self.sufficiency_threshold,
            });
        }
        if let Err(e) = vector.transition(next) {
            warn!(vector = %vector.id, error = %e, "Audit transition rejected");
        }
        info!(vector = %vector.id, status = %vector.status, chunks = vector.chunks_retrieved, "Vector audited");
        outcome.status = vector.status;
        outcome
    }

    fn exhausted_status(&self, vector: &ResearchVector) -> VectorStatus {
        if vector.chunks_retrieved > 0 {
            VectorStatus::Incomplete
        } else {
            VectorStatus::Failed
        }
    }

    /// Count store chunks for the topic at or above the relevance floor.
    /// A failed or slow store counts as zero.
    async fn corroborating_chunks(&self, vector: &ResearchVector, session_id: SessionId) -> usize {
        let query = self.knowledge.query_knowledge(
            session_id,
            &vector.topic,
            Some(&vector.sources),
            vector.chunks_retrieved.max(self.sufficiency_threshold),
        );
        match tokio::time::timeout(self.call_timeout, query).await {
            Ok(Ok(chunks)) => chunks
                .iter()
                .filter(|c| c.score >= self.min_relevance && vector.has_source(&c.chunk.source_url))
                .count(),
            Ok(Err(e)) => {
                warn!(vector = %vector.id, error = %e, "Knowledge query failed during audit");
                0
            }
            Err(_) => {
                warn!(vector = %vector.id, "Knowledge query timed out during audit");
                0
            }
        }
    }
}

/// Build a refined query that differs from every query the vector has run.
pub fn refine_query(vector: &ResearchVector) -> String {
    let terms = keywords(&vector.topic);
    let base = if terms.is_empty() {
        vector.topic.trim().to_string()
    } else {
        terms.join(" ")
    };

    let start = vector.feedback_loop_count as usize;
    for offset in 0..REFINEMENT_ANGLES.len() {
        let angle = REFINEMENT_ANGLES[(start + offset) % REFINEMENT_ANGLES.len()];
        let candidate = format!("{base} {angle}");
        if !vector.search_queries.contains(&candidate) {
            return candidate;
        }
    }
    format!("\"{}\" {}", vector.topic.trim(), vector.feedback_loop_count + 1)
}
