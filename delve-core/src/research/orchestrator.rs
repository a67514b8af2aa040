//! Research engine: drives a query from plan to report.
//!
//! The loop is plan -> (execute, audit)* -> write. Each pass executes every
//! non-terminal vector concurrently, then audits them one at a time. The
//! loop stops when every vector is terminal or the iteration budget runs
//! out, in which case the remaining vectors are forced to `incomplete`.

use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use super::auditor::Auditor;
use super::collaborators::{Collaborators, SessionId};
use super::executor::Executor;
use super::planner::{HeuristicPlanner, Planner};
use super::session::{
    NoOpResearchCallback, ResearchCallback, ResearchPhase, ResearchSession, SessionNote,
    SessionOutcome, SessionSummary,
};
use super::vector::{ResearchVector, VectorStatus};
use super::writer::Writer;
use crate::config::ResearchConfig;
use crate::error::{ConfigError, ResearchError};

/// Summary of one Executor+Auditor pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IterationReport {
    pub iteration: u32,
    pub executed: usize,
    pub verified: usize,
    pub requeued: usize,
    pub terminated: usize,
    pub chunks_ingested: usize,
}

/// Orchestrates planning, gathering and writing for research sessions.
pub struct ResearchEngine {
    config: ResearchConfig,
    planner: Arc<dyn Planner>,
    executor: Executor,
    auditor: Auditor,
    writer: Writer,
    callback: Arc<dyn ResearchCallback>,
}

impl ResearchEngine {
    /// Create an engine with the heuristic planner and no progress callback.
    pub fn new(config: ResearchConfig, collaborators: Collaborators) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            executor: Executor::new(collaborators.clone(), &config),
            auditor: Auditor::new(collaborators.knowledge.clone(), &config),
            writer: Writer::new(collaborators.knowledge.clone(), &config),
            planner: Arc::new(HeuristicPlanner::new()),
            callback: Arc::new(NoOpResearchCallback),
            config,
        })
    }

    pub fn with_planner(mut self, planner: Arc<dyn Planner>) -> Self {
        self.planner = planner;
        self
    }

    pub fn with_callback(mut self, callback: Arc<dyn ResearchCallback>) -> Self {
        self.callback = callback;
        self
    }

    pub fn config(&self) -> &ResearchConfig {
        &self.config
    }

    /// Create an unplanned session with this engine's budgets.
    pub fn start_session(&self, user_query: impl Into<String>) -> ResearchSession {
        ResearchSession::new(
            user_query,
            self.config.max_iterations,
            self.config.max_refinements,
            self.config.sufficiency_threshold,
        )
    }

    /// Run a query end-to-end.
    pub async fn run(&self, user_query: &str) -> Result<ResearchSession, ResearchError> {
        self.run_with_cancel(user_query, CancellationToken::new())
            .await
    }

    /// Run a query end-to-end, stopping early if `cancel` fires.
    ///
    /// A cancelled run returns the session with phase `cancelled` and no
    /// report. Planning failures are the only errors surfaced to the caller.
    pub async fn run_with_cancel(
        &self,
        user_query: &str,
        cancel: CancellationToken,
    ) -> Result<ResearchSession, ResearchError> {
        let mut session = self.start_session(user_query);
        let span = info_span!("research", session_id = %session.id);
        async {
            self.plan(&mut session).await?;

            self.transition(&mut session, ResearchPhase::Gathering);
            while !session.all_terminal() && session.iteration_count < session.max_iterations {
                if cancel.is_cancelled() {
                    self.cancel(&mut session);
                    return Ok(());
                }
                let Some(report) = self.run_iteration(&mut session, &cancel).await else {
                    self.cancel(&mut session);
                    return Ok(());
                };
                debug!(?report, "Iteration complete");
            }

            if cancel.is_cancelled() {
                self.cancel(&mut session);
                return Ok(());
            }
            session.outcome = Some(if self.force_remaining(&mut session) {
                SessionOutcome::IterationBudgetExhausted
            } else {
                SessionOutcome::AllTerminal
            });

            self.transition(&mut session, ResearchPhase::Writing);
            self.writer.write(&mut session).await;
            self.transition(&mut session, ResearchPhase::Complete);
            info!(
                verified = session.count_with_status(VectorStatus::Verified),
                incomplete = session.count_with_status(VectorStatus::Incomplete),
                failed = session.count_with_status(VectorStatus::Failed),
                iterations = session.iteration_count,
                warnings = session.errors.len(),
                "Research complete"
            );
            Ok::<(), ResearchError>(())
        }
        .instrument(span)
        .await?;

        self.persist(&session);
        Ok(session)
    }

    /// Plan the session: set the outline and create the vectors.
    pub async fn plan(&self, session: &mut ResearchSession) -> Result<(), ResearchError> {
        self.transition(session, ResearchPhase::Planning);
        if session.user_query.trim().is_empty() {
            warn!("Refusing to plan an empty query");
            self.transition(session, ResearchPhase::Failed);
            return Err(ResearchError::InvalidQuery);
        }
        let plan = match self.planner.plan(&session.user_query).await {
            Ok(plan) => plan,
            Err(e) => {
                warn!(error = %e, "Planning failed");
                self.transition(session, ResearchPhase::Failed);
                return Err(match e {
                    ResearchError::InvalidQuery | ResearchError::PlanningFailed { .. } => e,
                    other => ResearchError::PlanningFailed {
                        message: other.to_string(),
                    },
                });
            }
        };
        if let Err(e) = plan.validate() {
            warn!(error = %e, "Planner returned an invalid plan");
            self.transition(session, ResearchPhase::Failed);
            return Err(e);
        }

        info!(topics = plan.outline.len(), "Research planned");
        session.outline = plan.outline;
        session.vectors = plan.vectors;
        session.touch();
        Ok(())
    }

    /// One Executor pass over every non-terminal vector, then an Auditor
    /// pass over the vectors it processed.
    ///
    /// Returns `None` if `cancel` fired while the Executor was running.
    pub async fn run_iteration(
        &self,
        session: &mut ResearchSession,
        cancel: &CancellationToken,
    ) -> Option<IterationReport> {
        let session_id = session.id;
        let mut report = IterationReport {
            iteration: session.iteration_count + 1,
            ..Default::default()
        };

        let outcomes = {
            let mut batch: Vec<&mut ResearchVector> = session
                .vectors
                .iter_mut()
                .filter(|v| v.needs_execution())
                .collect();
            for vector in &batch {
                self.callback
                    .on_vector_status(&vector.id, &vector.topic, VectorStatus::Ingesting);
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                outcomes = self.executor.execute_batch(&mut batch, session_id) => Some(outcomes),
            }
        }?;
        report.executed = outcomes.len();
        report.chunks_ingested = outcomes.iter().map(|o| o.chunks_ingested).sum();

        let mut notes = Vec::new();
        for outcome in &outcomes {
            let Some(vector) = session.vectors.iter_mut().find(|v| v.id == outcome.vector_id)
            else {
                continue;
            };
            let audit = self.auditor.audit(vector, session_id).await;
            match audit.status {
                VectorStatus::Verified => report.verified += 1,
                VectorStatus::Pending => report.requeued += 1,
                _ => report.terminated += 1,
            }
            self.callback
                .on_vector_status(&vector.id, &vector.topic, audit.status);
            notes.extend(audit.note);
        }
        for note in &notes {
            session.record(note);
        }

        session.iteration_count += 1;
        session.touch();
        let remaining = session.active_vectors().count();
        self.callback
            .on_iteration_complete(session.iteration_count, session.max_iterations, remaining);
        info!(
            iteration = session.iteration_count,
            max = session.max_iterations,
            executed = report.executed,
            verified = report.verified,
            requeued = report.requeued,
            remaining,
            "Research pass complete"
        );
        Some(report)
    }

    /// Force every non-terminal vector to `incomplete`, recording a single
    /// note naming all of them. Returns whether any vector was forced.
    pub fn force_remaining(&self, session: &mut ResearchSession) -> bool {
        let mut forced = Vec::new();
        for vector in session.vectors.iter_mut() {
            if vector.force_incomplete() {
                self.callback
                    .on_vector_status(&vector.id, &vector.topic, VectorStatus::Incomplete);
                forced.push(vector.id.clone());
            }
        }
        if forced.is_empty() {
            return false;
        }
        warn!(forced = ?forced, "Iteration budget exhausted");
        session.record(&SessionNote::IterationBudgetExhausted {
            max_iterations: session.max_iterations,
            forced,
        });
        true
    }

    fn cancel(&self, session: &mut ResearchSession) {
        warn!(iteration = session.iteration_count, "Research cancelled");
        session.record(&SessionNote::Cancelled {
            iteration: session.iteration_count,
        });
        session.outcome = Some(SessionOutcome::Cancelled);
        self.transition(session, ResearchPhase::Cancelled);
    }

    fn transition(&self, session: &mut ResearchSession, phase: ResearchPhase) {
        session.transition(phase);
        self.callback.on_phase_change(phase);
    }

    fn persist(&self, session: &ResearchSession) {
        let Some(dir) = &self.config.session_dir else {
            return;
        };
        match session.save(dir) {
            Ok(path) => debug!(path = %path.display(), "Session saved"),
            Err(e) => warn!(error = %e, "Failed to save research session"),
        }
    }

    fn session_dir(&self) -> Result<&PathBuf, std::io::Error> {
        self.config.session_dir.as_ref().ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "session persistence is not configured",
            )
        })
    }

    /// List saved research sessions.
    pub fn list_sessions(&self) -> Vec<SessionSummary> {
        self.session_dir()
            .map(|dir| ResearchSession::list_sessions(dir))
            .unwrap_or_default()
    }

    /// Load a saved session.
    pub fn load_session(&self, session_id: &SessionId) -> Result<ResearchSession, std::io::Error> {
        ResearchSession::load(self.session_dir()?, session_id)
    }
}
