//! Research orchestration engine.
//!
//! A query moves through three stages:
//! 1. **Plan**: the planner builds an outline and one vector per topic
//! 2. **Gather**: the Executor ingests evidence for pending vectors and the
//!    Auditor verifies or refines them, until all are terminal or the
//!    iteration budget runs out
//! 3. **Write**: the Writer turns stored evidence into a cited report
//!
//! Search, fetch, parse and the knowledge store are external collaborators
//! behind the traits in [`collaborators`].

pub mod auditor;
pub mod collaborators;
pub mod contradiction;
pub mod executor;
pub mod memory;
pub mod orchestrator;
pub mod planner;
pub mod session;
pub mod text;
pub mod vector;
pub mod writer;

pub use auditor::{AuditOutcome, Auditor};
pub use collaborators::{
    Collaborators, DocumentParser, EvidenceChunk, IngestReport, KnowledgeStore, PageContent,
    PageFetcher, ScoredChunk, SearchHit, SessionId, WebSearch,
};
pub use executor::{ExecutionOutcome, Executor};
pub use memory::{InMemoryKnowledgeStore, PlainTextParser};
pub use orchestrator::{IterationReport, ResearchEngine};
pub use planner::{HeuristicPlanner, Planner, ResearchPlan};
pub use session::{
    NoOpResearchCallback, RecordingResearchCallback, ResearchCallback, ResearchEvent,
    ResearchPhase, ResearchSession, SessionNote, SessionOutcome, SessionSummary,
};
pub use vector::{ResearchVector, StatusChange, VectorStatus};
pub use writer::{ReportSection, ResearchReport, SectionKind, Writer};
