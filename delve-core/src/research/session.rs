//! Research session state with persistence.
//!
//! A `ResearchSession` is owned by exactly one orchestration run. It holds
//! the outline, every vector, the warnings gathered along the way and, once
//! the Writer ran, the final report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::collaborators::SessionId;
use super::vector::{ResearchVector, VectorStatus};
use super::writer::ResearchReport;
use crate::persistence::{atomic_write_json, load_json};

/// Coarse phase of a session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResearchPhase {
    /// Building the outline.
    Planning,
    /// Executor/Auditor passes.
    Gathering,
    /// Synthesizing the report.
    Writing,
    /// Report written.
    Complete,
    /// Stopped by the caller.
    Cancelled,
    /// Planning failed; no report.
    Failed,
}

impl fmt::Display for ResearchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResearchPhase::Planning => "planning",
            ResearchPhase::Gathering => "gathering",
            ResearchPhase::Writing => "writing",
            ResearchPhase::Complete => "complete",
            ResearchPhase::Cancelled => "cancelled",
            ResearchPhase::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Why the gather loop stopped.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionOutcome {
    /// Every vector reached a terminal status on its own.
    AllTerminal,
    /// The iteration budget ran out and remaining vectors were forced.
    IterationBudgetExhausted,
    /// The caller cancelled the run.
    Cancelled,
}

/// Informational entries recorded in `ResearchSession::errors`.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionNote {
    RefinementBudgetExhausted {
        vector: String,
        topic: String,
        refinements: u32,
        chunks: usize,
        threshold: usize,
    },
    IterationBudgetExhausted {
        max_iterations: u32,
        forced: Vec<String>,
    },
    SectionGap {
        topic: String,
    },
    EvidenceUnavailable {
        topic: String,
        message: String,
    },
    /// A verified or incomplete vector whose chunks the store no longer returns.
    EvidenceMissing {
        topic: String,
        status: VectorStatus,
    },
    Cancelled {
        iteration: u32,
    },
}

impl fmt::Display for SessionNote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionNote::RefinementBudgetExhausted {
                vector,
                topic,
                refinements,
                chunks,
                threshold,
            } => write!(
                f,
                "refinement budget exhausted for {vector} ('{topic}') after {refinements} refinement(s): {chunks}/{threshold} chunks"
            ),
            SessionNote::IterationBudgetExhausted {
                max_iterations,
                forced,
            } => write!(
                f,
                "iteration budget of {max_iterations} exhausted; forced to incomplete: {}",
                forced.join(", ")
            ),
            SessionNote::SectionGap { topic } => {
                write!(f, "no verifiable evidence for '{topic}'")
            }
            SessionNote::EvidenceUnavailable { topic, message } => {
                write!(f, "evidence unavailable for '{topic}': {message}")
            }
            SessionNote::EvidenceMissing { topic, status } => write!(
                f,
                "'{topic}' is {status} but the knowledge store returned none of its evidence"
            ),
            SessionNote::Cancelled { iteration } => {
                write!(f, "research cancelled during iteration {}", iteration + 1)
            }
        }
    }
}

/// A research session: one user query driven to a report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchSession {
    /// Correlation key for every knowledge-store call.
    pub id: SessionId,
    /// The original research question.
    pub user_query: String,
    /// Ordered section topics, set once by the planner.
    pub outline: Vec<String>,
    /// Vectors in outline order.
    pub vectors: Vec<ResearchVector>,
    /// Topic -> synthesized section text, filled by the writer.
    pub completed_sections: BTreeMap<String, String>,
    pub final_report: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<ResearchReport>,
    /// Append-only warnings and failures.
    pub errors: Vec<String>,
    pub iteration_count: u32,
    pub max_iterations: u32,
    pub max_refinements: u32,
    pub sufficiency_threshold: usize,
    pub phase: ResearchPhase,
    pub outcome: Option<SessionOutcome>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ResearchSession {
    /// Create an unplanned session.
    pub fn new(
        user_query: impl Into<String>,
        max_iterations: u32,
        max_refinements: u32,
        sufficiency_threshold: usize,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: SessionId::new(),
            user_query: user_query.into(),
            outline: Vec::new(),
            vectors: Vec::new(),
            completed_sections: BTreeMap::new(),
            final_report: None,
            report: None,
            errors: Vec::new(),
            iteration_count: 0,
            max_iterations,
            max_refinements,
            sufficiency_threshold,
            phase: ResearchPhase::Planning,
            outcome: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn transition(&mut self, phase: ResearchPhase) {
        self.phase = phase;
        self.touch();
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Append an entry to `errors`.
    pub fn record(&mut self, note: &SessionNote) {
        self.errors.push(note.to_string());
        self.touch();
    }

    /// Append an entry unless an identical one is already present.
    pub fn record_once(&mut self, note: &SessionNote) {
        let text = note.to_string();
        if !self.errors.contains(&text) {
            self.errors.push(text);
            self.touch();
        }
    }

    pub fn vector(&self, id: &str) -> Option<&ResearchVector> {
        self.vectors.iter().find(|v| v.id == id)
    }

    pub fn vector_for_topic(&self, topic: &str) -> Option<&ResearchVector> {
        self.vectors.iter().find(|v| v.topic == topic)
    }

    /// Vectors that still need Executor/Auditor passes.
    pub fn active_vectors(&self) -> impl Iterator<Item = &ResearchVector> {
        self.vectors.iter().filter(|v| !v.is_terminal())
    }

    pub fn all_terminal(&self) -> bool {
        self.vectors.iter().all(ResearchVector::is_terminal)
    }

    pub fn count_with_status(&self, status: VectorStatus) -> usize {
        self.vectors.iter().filter(|v| v.status == status).count()
    }

    /// True when the report has at least one section backed by evidence.
    pub fn succeeded(&self) -> bool {
        self.report.as_ref().is_some_and(|r| r.success)
    }

    /// Fraction of vectors that reached a terminal status.
    pub fn progress(&self) -> f64 {
        if self.phase == ResearchPhase::Complete {
            return 1.0;
        }
        let total = self.vectors.len().max(1);
        let terminal = self.vectors.iter().filter(|v| v.is_terminal()).count();
        terminal as f64 / total as f64
    }

    fn sessions_dir(base_dir: &Path) -> PathBuf {
        base_dir.join("sessions")
    }

    /// Persist the session as `<base_dir>/sessions/<id>.json`.
    pub fn save(&self, base_dir: &Path) -> Result<PathBuf, std::io::Error> {
        let path = Self::sessions_dir(base_dir).join(format!("{}.json", self.id));
        atomic_write_json(&path, self)?;
        Ok(path)
    }

    /// Load a persisted session.
    pub fn load(base_dir: &Path, session_id: &SessionId) -> Result<Self, std::io::Error> {
        let path = Self::sessions_dir(base_dir).join(format!("{session_id}.json"));
        load_json(&path)?.ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no saved session {session_id}"),
            )
        })
    }

    /// List all saved sessions, most recently updated first.
    pub fn list_sessions(base_dir: &Path) -> Vec<SessionSummary> {
        let dir = Self::sessions_dir(base_dir);
        let Ok(entries) = std::fs::read_dir(&dir) else {
            return Vec::new();
        };

        let mut summaries: Vec<SessionSummary> = entries
            .flatten()
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "json"))
            .filter_map(|e| load_json::<ResearchSession>(&e.path()).ok().flatten())
            .map(|s| SessionSummary::from(&s))
            .collect();
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        summaries
    }
}

/// Summary of a research session for listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: SessionId,
    pub user_query: String,
    pub phase: ResearchPhase,
    pub verified: usize,
    pub incomplete: usize,
    pub failed: usize,
    pub warnings: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&ResearchSession> for SessionSummary {
    fn from(s: &ResearchSession) -> Self {
        Self {
            id: s.id,
            user_query: s.user_query.clone(),
            phase: s.phase,
            verified: s.count_with_status(VectorStatus::Verified),
            incomplete: s.count_with_status(VectorStatus::Incomplete),
            failed: s.count_with_status(VectorStatus::Failed),
            warnings: s.errors.len(),
            created_at: s.created_at,
            updated_at: s.updated_at,
        }
    }
}

/// Callback trait for progressive research UI updates.
pub trait ResearchCallback: Send + Sync {
    /// Called when the session phase changes.
    fn on_phase_change(&self, phase: ResearchPhase);
    /// Called whenever a vector's status changes.
    fn on_vector_status(&self, vector_id: &str, topic: &str, status: VectorStatus);
    /// Called after each Executor+Auditor pass.
    fn on_iteration_complete(&self, iteration: u32, max_iterations: u32, remaining: usize);
}

/// No-op callback.
pub struct NoOpResearchCallback;

impl ResearchCallback for NoOpResearchCallback {
    fn on_phase_change(&self, _phase: ResearchPhase) {}
    fn on_vector_status(&self, _vector_id: &str, _topic: &str, _status: VectorStatus) {}
    fn on_iteration_complete(&self, _iteration: u32, _max_iterations: u32, _remaining: usize) {}
}

/// Event captured by `RecordingResearchCallback`.
#[derive(Debug, Clone, PartialEq)]
pub enum ResearchEvent {
    Phase(ResearchPhase),
    VectorStatus { vector_id: String, status: VectorStatus },
    Iteration { iteration: u32, remaining: usize },
}

/// Callback that records every event, for tests and progress replay.
#[derive(Default)]
pub struct RecordingResearchCallback {
    events: Mutex<Vec<ResearchEvent>>,
}

impl RecordingResearchCallback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ResearchEvent> {
        self.events
            .lock()
            .map(|e| e.clone())
            .unwrap_or_default()
    }

    fn push(&self, event: ResearchEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

impl ResearchCallback for RecordingResearchCallback {
    fn on_phase_change(&self, phase: ResearchPhase) {
        self.push(ResearchEvent::Phase(phase));
    }

    fn on_vector_status(&self, vector_id: &str, _topic: &str, status: VectorStatus) {
        self.push(ResearchEvent::VectorStatus {
            vector_id: vector_id.to_string(),
            status,
        });
    }

    fn on_iteration_complete(&self, iteration: u32, _max_iterations: u32, remaining: usize) {
        self.push(ResearchEvent::Iteration {
            iteration,
            remaining,
        });
    }
}
