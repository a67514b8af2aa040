//! Research vectors and their status state machine.
//!
//! A vector is one atomic research question. Its status only moves along
//! the edges below; every change is recorded in `history`.
//!
//! ```text
//! pending ──> ingesting ──> verified
//!    ^            │    ├──> incomplete
//!    └────────────┘    └──> failed
//!     (refinement)
//! ```
//!
//! The Orchestrator may additionally force a non-terminal vector to
//! `incomplete` when the session's iteration budget runs out.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::error::ResearchError;

/// Lifecycle status of a research vector.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum VectorStatus {
    /// Queued for the next Executor pass.
    Pending,
    /// Evidence gathering ran; awaiting the Auditor.
    Ingesting,
    /// Enough evidence was gathered.
    Verified,
    /// Budget exhausted with some, but insufficient, evidence.
    Incomplete,
    /// Budget exhausted with no evidence at all.
    Failed,
}

impl VectorStatus {
    /// Terminal states are final for the session.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            VectorStatus::Verified | VectorStatus::Incomplete | VectorStatus::Failed
        )
    }

    /// Whether the regular Executor/Auditor cycle may move from `self` to `next`.
    pub fn can_transition_to(self, next: VectorStatus) -> bool {
        use VectorStatus::*;
        matches!(
            (self, next),
            (Pending, Ingesting)
                | (Ingesting, Pending)
                | (Ingesting, Verified)
                | (Ingesting, Incomplete)
                | (Ingesting, Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            VectorStatus::Pending => "pending",
            VectorStatus::Ingesting => "ingesting",
            VectorStatus::Verified => "verified",
            VectorStatus::Incomplete => "incomplete",
            VectorStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for VectorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded status change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusChange {
    pub from: VectorStatus,
    pub to: VectorStatus,
    pub at: DateTime<Utc>,
}

/// An atomic research question tracked through its evidence lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchVector {
    /// Stable identifier, unique within a session.
    pub id: String,
    /// The question this vector answers.
    pub topic: String,
    /// Candidate queries; the Auditor appends refined ones.
    pub search_queries: Vec<String>,
    pub status: VectorStatus,
    /// Refinement cycles already applied.
    pub feedback_loop_count: u32,
    /// Query the next Executor pass should run instead of `search_queries`.
    pub refined_query: Option<String>,
    /// Source URLs already ingested for this vector.
    pub sources: BTreeSet<String>,
    /// Cumulative count of ingested evidence chunks.
    pub chunks_retrieved: usize,
    /// Per-call failures recorded by the Executor.
    #[serde(default)]
    pub error_trail: Vec<String>,
    #[serde(default)]
    pub history: Vec<StatusChange>,
}

impl ResearchVector {
    /// Create a pending vector seeded with its initial queries.
    pub fn new(
        id: impl Into<String>,
        topic: impl Into<String>,
        search_queries: Vec<String>,
    ) -> Self {
        Self {
            id: id.into(),
            topic: topic.into(),
            search_queries,
            status: VectorStatus::Pending,
            feedback_loop_count: 0,
            refined_query: None,
            sources: BTreeSet::new(),
            chunks_retrieved: 0,
            error_trail: Vec::new(),
            history: Vec::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether the Executor should pick this vector up.
    pub fn needs_execution(&self) -> bool {
        self.status == VectorStatus::Pending || self.refined_query.is_some()
    }

    /// Move along a regular edge of the state machine.
    pub fn transition(&mut self, next: VectorStatus) -> Result<(), ResearchError> {
        if !self.status.can_transition_to(next) {
            return Err(ResearchError::InvalidTransition {
                vector: self.id.clone(),
                from: self.status,
                to: next,
            });
        }
        self.record(next);
        Ok(())
    }

    /// Take the refinement edge `ingesting -> pending`.
    ///
    /// Requires `feedback_loop_count < max_refinements`; increments the
    /// count, appends the query to `search_queries` and stages it as the
    /// `refined_query` for the next pass.
    pub fn requeue(
        &mut self,
        refined_query: String,
        max_refinements: u32,
    ) -> Result<(), ResearchError> {
        if self.feedback_loop_count >= max_refinements {
            return Err(ResearchError::RefinementNotAllowed {
                vector: self.id.clone(),
                count: self.feedback_loop_count,
                max: max_refinements,
            });
        }
        self.transition(VectorStatus::Pending)?;
        self.feedback_loop_count += 1;
        if !self.search_queries.contains(&refined_query) {
            self.search_queries.push(refined_query.clone());
        }
        self.refined_query = Some(refined_query);
        Ok(())
    }

    /// Force a non-terminal vector to `incomplete` at session end.
    ///
    /// Returns `false` when the vector was already terminal.
    pub fn force_incomplete(&mut self) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.refined_query = None;
        self.record(VectorStatus::Incomplete);
        true
    }

    /// Record a source URL. Returns `false` if it was already known.
    pub fn add_source(&mut self, url: impl Into<String>) -> bool {
        self.sources.insert(url.into())
    }

    pub fn has_source(&self, url: &str) -> bool {
        self.sources.contains(url)
    }

    fn record(&mut self, next: VectorStatus) {
        self.history.push(StatusChange {
            from: self.status,
            to: next,
            at: Utc::now(),
        });
        self.status = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vector() -> ResearchVector {
        ResearchVector::new("v1", "What is io_uring?", vec!["io_uring".into()])
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut v = vector();
        assert!(v.needs_execution());
        v.transition(VectorStatus::Ingesting).unwrap();
        v.transition(VectorStatus::Verified).unwrap();
        assert!(v.is_terminal());
        assert_eq!(v.history.len(), 2);
        assert_eq!(v.history[0].from, VectorStatus::Pending);
        assert_eq!(v.history[1].to, VectorStatus::Verified);
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut v = vector();
        v.transition(VectorStatus::Ingesting).unwrap();
        v.transition(VectorStatus::Failed).unwrap();
        for next in [
            VectorStatus::Pending,
            VectorStatus::Ingesting,
            VectorStatus::Verified,
            VectorStatus::Incomplete,
        ] {
            assert!(v.transition(next).is_err());
        }
        assert!(!v.force_incomplete());
        assert_eq!(v.status, VectorStatus::Failed);
    }

    #[test]
    fn test_pending_cannot_skip_ingesting() {
        let mut v = vector();
        let err = v.transition(VectorStatus::Verified).unwrap_err();
        assert!(matches!(err, ResearchError::InvalidTransition { .. }));
        assert_eq!(v.status, VectorStatus::Pending);
        assert!(v.history.is_empty());
    }

    #[test]
    fn test_requeue_increments_and_stages_query() {
        let mut v = vector();
        v.transition(VectorStatus::Ingesting).unwrap();
        v.requeue("io_uring overview".into(), 2).unwrap();
        assert_eq!(v.status, VectorStatus::Pending);
        assert_eq!(v.feedback_loop_count, 1);
        assert_eq!(v.refined_query.as_deref(), Some("io_uring overview"));
        assert_eq!(v.search_queries.last().unwrap(), "io_uring overview");
    }

    #[test]
    fn test_requeue_respects_budget() {
        let mut v = vector();
        v.transition(VectorStatus::Ingesting).unwrap();
        let err = v.requeue("again".into(), 0).unwrap_err();
        assert!(matches!(err, ResearchError::RefinementNotAllowed { .. }));
        assert_eq!(v.status, VectorStatus::Ingesting);
        assert_eq!(v.feedback_loop_count, 0);
    }

    #[test]
    fn test_requeue_requires_ingesting() {
        let mut v = vector();
        assert!(v.requeue("too early".into(), 3).is_err());
        assert_eq!(v.feedback_loop_count, 0);
    }

    #[test]
    fn test_force_incomplete_from_pending() {
        let mut v = vector();
        v.refined_query = Some("pending refinement".into());
        assert!(v.force_incomplete());
        assert_eq!(v.status, VectorStatus::Incomplete);
        assert!(v.refined_query.is_none());
    }

    #[test]
    fn test_source_dedup() {
        let mut v = vector();
        assert!(v.add_source("https://a.example"));
        assert!(!v.add_source("https://a.example"));
        assert!(v.has_source("https://a.example"));
        assert_eq!(v.sources.len(), 1);
    }

    #[test]
    fn test_status_serde_snake_case() {
        let json = serde_json::to_string(&VectorStatus::Incomplete).unwrap();
        assert_eq!(json, "\"incomplete\"");
    }
}
