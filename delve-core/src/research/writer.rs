//! Writer: synthesizes the final report from stored evidence.
//!
//! Sections follow the outline order. Each section cites its chunks with
//! `[n]` markers numbered by first citation; the reference list at the end
//! maps every marker to its source URL. Topics whose research failed get an
//! explicit gap note rather than silently disappearing.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::collaborators::{EvidenceChunk, KnowledgeStore, ScoredChunk, SessionId};
use super::contradiction::{ContradictionDetector, ContradictionKind};
use super::session::{ResearchSession, SessionNote};
use super::text::normalize_whitespace;
use super::vector::{ResearchVector, VectorStatus};
use crate::config::ResearchConfig;
use crate::error::CollaboratorError;

/// Longest excerpt taken from a single chunk.
const MAX_EXCERPT_CHARS: usize = 400;

/// How a section is backed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    /// Built from a verified vector.
    Verified,
    /// Built from an incomplete vector; labelled as partial.
    Partial,
    /// No usable evidence; body is a gap note.
    Gap,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReportSection {
    pub topic: String,
    pub vector_id: Option<String>,
    pub kind: SectionKind,
    pub body: String,
    /// Reference numbers cited in this section, in citation order.
    pub citations: Vec<usize>,
    pub contradictions: usize,
}

/// The synthesized report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResearchReport {
    pub query: String,
    pub sections: Vec<ReportSection>,
    /// Source URLs; reference `[n]` is `references[n - 1]`.
    pub references: Vec<String>,
    /// Rendered markdown.
    pub content: String,
    /// True when at least one section is backed by evidence.
    pub success: bool,
}

impl ResearchReport {
    pub fn gap_count(&self) -> usize {
        self.sections
            .iter()
            .filter(|s| s.kind == SectionKind::Gap)
            .count()
    }
}

#[derive(Clone)]
pub struct Writer {
    knowledge: Arc<dyn KnowledgeStore>,
    evidence_per_section: usize,
    sufficiency_threshold: usize,
    call_timeout: Duration,
    detector: ContradictionDetector,
}

impl std::fmt::Debug for Writer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Writer")
            .field("evidence_per_section", &self.evidence_per_section)
            .finish_non_exhaustive()
    }
}

impl Writer {
    pub fn new(knowledge: Arc<dyn KnowledgeStore>, config: &ResearchConfig) -> Self {
        Self {
            knowledge,
            evidence_per_section: config.evidence_per_section.max(1),
            sufficiency_threshold: config.sufficiency_threshold,
            call_timeout: config.call_timeout(),
            detector: ContradictionDetector::new(),
        }
    }

    /// Write the report for a session whose vectors are all terminal.
    ///
    /// Fills `completed_sections`, `final_report` and `report`. Running it
    /// twice against an unchanged store gives the same report and does not
    /// duplicate entries in `errors`.
    pub async fn write(&self, session: &mut ResearchSession) -> ResearchReport {
        let mut references: Vec<String> = Vec::new();
        let mut sections = Vec::with_capacity(session.outline.len());
        let mut notes = Vec::new();

        for topic in &session.outline {
            let Some(vector) = session.vector_for_topic(topic) else {
                warn!(topic = %topic, "Outline topic has no vector");
                notes.push(SessionNote::SectionGap {
                    topic: topic.clone(),
                });
                sections.push(gap_section(topic, None, "No research was planned for this topic."));
                continue;
            };

            let section = match vector.status {
                VectorStatus::Failed => {
                    notes.push(SessionNote::SectionGap {
                        topic: topic.clone(),
                    });
                    gap_section(
                        topic,
                        Some(vector),
                        &format!(
                            "Evidence gap: no verifiable evidence was found after {} refinement(s).",
                            vector.feedback_loop_count
                        ),
                    )
                }
                VectorStatus::Verified | VectorStatus::Incomplete => {
                    match self.evidence(session.id, vector).await {
                        Ok(chunks) if chunks.is_empty() => {
                            warn!(
                                topic = %topic,
                                status = %vector.status,
                                "Store returned no evidence for section"
                            );
                            notes.push(SessionNote::EvidenceMissing {
                                topic: topic.clone(),
                                status: vector.status,
                            });
                            gap_section(
                                topic,
                                Some(vector),
                                "No retained evidence matched this topic.",
                            )
                        }
                        Ok(chunks) => self.compose(topic, vector, &chunks, &mut references),
                        Err(e) => {
                            warn!(topic = %topic, error = %e, "Evidence unavailable for section");
                            notes.push(SessionNote::EvidenceUnavailable {
                                topic: topic.clone(),
                                message: e.to_string(),
                            });
                            gap_section(
                                topic,
                                Some(vector),
                                "Evidence could not be retrieved from the knowledge store.",
                            )
                        }
                    }
                }
                VectorStatus::Pending | VectorStatus::Ingesting => gap_section(
                    topic,
                    Some(vector),
                    "Research stopped before this topic was covered.",
                ),
            };
            sections.push(section);
        }

        for note in &notes {
            session.record_once(note);
        }

        let success = sections.iter().any(|s| s.kind != SectionKind::Gap);
        let content = render(&session.user_query, &sections, &references);
        session.completed_sections = sections
            .iter()
            .map(|s| (s.topic.clone(), s.body.clone()))
            .collect();
        session.final_report = Some(content.clone());

        let report = ResearchReport {
            query: session.user_query.clone(),
            sections,
            references,
            content,
            success,
        };
        info!(
            sections = report.sections.len(),
            gaps = report.gap_count(),
            references = report.references.len(),
            success = report.success,
            "Report written"
        );
        session.report = Some(report.clone());
        session.touch();
        report
    }

    /// The vector's own evidence for its topic, best first.
    async fn evidence(
        &self,
        session_id: SessionId,
        vector: &ResearchVector,
    ) -> Result<Vec<ScoredChunk>, CollaboratorError> {
        let query = self.knowledge.query_knowledge(
            session_id,
            &vector.topic,
            Some(&vector.sources),
            self.evidence_per_section,
        );
        let mut chunks = match tokio::time::timeout(self.call_timeout, query).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(CollaboratorError::Timeout {
                    operation: format!("knowledge query for '{}'", vector.topic),
                    timeout_secs: self.call_timeout.as_secs(),
                });
            }
        };
        chunks.retain(|c| vector.has_source(&c.chunk.source_url));
        chunks.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.chunk.source_url.cmp(&b.chunk.source_url))
                .then_with(|| a.chunk.offset.cmp(&b.chunk.offset))
        });
        chunks.truncate(self.evidence_per_section);
        debug!(topic = %vector.topic, chunks = chunks.len(), "Section evidence selected");
        Ok(chunks)
    }

    fn compose(
        &self,
        topic: &str,
        vector: &ResearchVector,
        chunks: &[ScoredChunk],
        references: &mut Vec<String>,
    ) -> ReportSection {
        let partial = vector.status == VectorStatus::Incomplete;
        let mut body = String::new();
        if partial {
            let _ = write!(
                body,
                "_Partial coverage: {} of {} required evidence chunks were gathered._\n\n",
                vector.chunks_retrieved, self.sufficiency_threshold
            );
        }

        let mut citations = Vec::new();
        let mut seen_excerpts: Vec<String> = Vec::new();
        let mut paragraphs = Vec::new();
        for scored in chunks {
            let excerpt = excerpt(&scored.chunk.text);
            if excerpt.is_empty() || seen_excerpts.contains(&excerpt) {
                continue;
            }
            let n = cite(references, &scored.chunk.source_url);
            if !citations.contains(&n) {
                citations.push(n);
            }
            paragraphs.push(format!("{excerpt} [{n}]"));
            seen_excerpts.push(excerpt);
        }
        body.push_str(&paragraphs.join("\n\n"));

        let evidence: Vec<EvidenceChunk> = chunks.iter().map(|c| c.chunk.clone()).collect();
        let contradictions = self.detector.detect(&evidence);
        if !contradictions.is_empty() {
            body.push_str("\n\n");
            for c in &contradictions {
                let a = cite(references, &c.first_source);
                let b = cite(references, &c.second_source);
                let kind = match c.kind {
                    ContradictionKind::Negation => "one source negates the other",
                    ContradictionKind::NumericDisagreement => "the sources report different figures",
                };
                let _ = writeln!(body, "> Conflicting evidence between [{a}] and [{b}]: {kind}.");
            }
        }

        ReportSection {
            topic: topic.to_string(),
            vector_id: Some(vector.id.clone()),
            kind: if partial {
                SectionKind::Partial
            } else {
                SectionKind::Verified
            },
            body: body.trim_end().to_string(),
            citations,
            contradictions: contradictions.len(),
        }
    }
}

fn gap_section(topic: &str, vector: Option<&ResearchVector>, note: &str) -> ReportSection {
    ReportSection {
        topic: topic.to_string(),
        vector_id: vector.map(|v| v.id.clone()),
        kind: SectionKind::Gap,
        body: format!("_{note}_"),
        citations: Vec::new(),
        contradictions: 0,
    }
}

/// Reference number for `url`, assigning the next one on first citation.
fn cite(references: &mut Vec<String>, url: &str) -> usize {
    match references.iter().position(|r| r == url) {
        Some(i) => i + 1,
        None => {
            references.push(url.to_string());
            references.len()
        }
    }
}

/// Leading sentences of a chunk, capped at `MAX_EXCERPT_CHARS`.
fn excerpt(text: &str) -> String {
    let text = normalize_whitespace(text);
    let mut out = String::new();
    for sentence in text.split_inclusive(['.', '!', '?']) {
        if !out.is_empty() && out.chars().count() + sentence.chars().count() > MAX_EXCERPT_CHARS {
            break;
        }
        out.push_str(sentence);
        if out.chars().count() >= MAX_EXCERPT_CHARS / 2 {
            break;
        }
    }
    if out.chars().count() > MAX_EXCERPT_CHARS {
        let cut: String = out.chars().take(MAX_EXCERPT_CHARS).collect();
        out = format!("{}...", cut.trim_end());
    }
    out.trim().to_string()
}

fn render(query: &str, sections: &[ReportSection], references: &[String]) -> String {
    let mut out = format!("# Research Report: {query}\n\n");
    for section in sections {
        let _ = write!(out, "## {}\n\n{}\n\n", section.topic, section.body);
    }
    if !references.is_empty() {
        out.push_str("## References\n\n");
        for (i, url) in references.iter().enumerate() {
            let _ = writeln!(out, "[{}] {url}", i + 1);
        }
    }
    out
}
