//! Planning: turning a user query into an outline and research vectors.
//!
//! The planner is the only component allowed to create vectors. The shipped
//! `HeuristicPlanner` derives outline facets from the shape of the question;
//! LLM-backed planners plug in behind the same trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::text::{keywords, normalize_whitespace};
use super::vector::ResearchVector;
use crate::error::ResearchError;

/// Minimum number of outline topics in a plan.
pub const MIN_OUTLINE_TOPICS: usize = 3;
/// Maximum number of outline topics in a plan.
pub const MAX_OUTLINE_TOPICS: usize = 8;
/// Maximum seed queries per vector.
pub const MAX_SEED_QUERIES: usize = 3;

/// Output of a planning step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchPlan {
    pub outline: Vec<String>,
    pub vectors: Vec<ResearchVector>,
}

impl ResearchPlan {
    /// Build a plan with one vector per topic, IDs assigned in outline order.
    pub fn from_topics(topics: Vec<(String, Vec<String>)>) -> Self {
        let mut outline = Vec::with_capacity(topics.len());
        let mut vectors = Vec::with_capacity(topics.len());
        for (i, (topic, queries)) in topics.into_iter().enumerate() {
            vectors.push(ResearchVector::new(format!("v{}", i + 1), &topic, queries));
            outline.push(topic);
        }
        Self { outline, vectors }
    }

    /// Structural checks every plan must pass before the session uses it.
    pub fn validate(&self) -> Result<(), ResearchError> {
        if self.vectors.is_empty() {
            return Err(ResearchError::PlanningFailed {
                message: "plan contains no research vectors".into(),
            });
        }
        if self.outline.len() > MAX_OUTLINE_TOPICS {
            return Err(ResearchError::PlanningFailed {
                message: format!(
                    "plan has {} topics, at most {MAX_OUTLINE_TOPICS} are allowed",
                    self.outline.len()
                ),
            });
        }
        let mut seen = HashSet::with_capacity(self.outline.len());
        for topic in &self.outline {
            if !seen.insert(topic.trim().to_lowercase()) {
                return Err(ResearchError::PlanningFailed {
                    message: format!("outline topic '{topic}' appears more than once"),
                });
            }
            if !self.vectors.iter().any(|v| &v.topic == topic) {
                return Err(ResearchError::PlanningFailed {
                    message: format!("outline topic '{topic}' has no vector"),
                });
            }
        }
        let mut ids: Vec<&str> = self.vectors.iter().map(|v| v.id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        if ids.len() != self.vectors.len() {
            return Err(ResearchError::PlanningFailed {
                message: "vector ids are not unique".into(),
            });
        }
        if let Some(v) = self.vectors.iter().find(|v| v.search_queries.is_empty()) {
            return Err(ResearchError::PlanningFailed {
                message: format!("vector {} has no seed queries", v.id),
            });
        }
        Ok(())
    }
}

/// Produces the outline and initial vectors for a query.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, user_query: &str) -> Result<ResearchPlan, ResearchError>;
}

/// Kind of question, used to choose outline facets.
#[derive(Debug, Clone, PartialEq, Eq)]
enum QuestionShape {
    Comparative(Vec<String>),
    HowTo,
    Open,
}

/// Rule-based planner.
#[derive(Debug, Clone, Default)]
pub struct HeuristicPlanner;

impl HeuristicPlanner {
    pub fn new() -> Self {
        Self
    }

    fn classify(&self, query: &str) -> QuestionShape {
        let parts = self.split_comparative(query);
        if parts.len() >= 2 {
            return QuestionShape::Comparative(parts);
        }
        let lower = query.to_lowercase();
        if lower.starts_with("how to") || lower.starts_with("how do") || lower.starts_with("how can")
        {
            return QuestionShape::HowTo;
        }
        QuestionShape::Open
    }

    /// Split a comparative question into its constituent subjects.
    fn split_comparative(&self, question: &str) -> Vec<String> {
        let lower = question.to_lowercase();
        for sep in [" vs. ", " vs ", " versus ", " compared to ", " compared with "] {
            if let Some(idx) = lower.find(sep) {
                let (Some(left), Some(right)) =
                    (question.get(..idx), question.get(idx + sep.len()..))
                else {
                    continue;
                };
                return [left, right]
                    .iter()
                    .map(|s| clean_subject(s))
                    .filter(|s| !s.is_empty())
                    .collect();
            }
        }
        Vec::new()
    }

    /// Short subject phrase used to anchor generated topics.
    fn subject(&self, query: &str) -> String {
        let words = keywords(query);
        if words.is_empty() {
            normalize_whitespace(query)
        } else {
            words.into_iter().take(6).collect::<Vec<_>>().join(" ")
        }
    }

    fn topics_for(&self, query: &str) -> Vec<String> {
        let subject = self.subject(query);
        let mut topics = Vec::new();
        match self.classify(query) {
            QuestionShape::Comparative(parts) => {
                for part in &parts {
                    topics.push(format!("Overview of {part}"));
                }
                topics.push(format!("Key differences between {}", parts.join(" and ")));
                topics.push(format!("Trade-offs and use cases: {}", parts.join(" vs ")));
                topics.push(format!("Performance and benchmarks of {}", parts.join(" and ")));
            }
            QuestionShape::HowTo => {
                topics.push(format!("Background and prerequisites for {subject}"));
                topics.push(format!("Practical steps for {subject}"));
                topics.push(format!("Tools and libraries for {subject}"));
                topics.push(format!("Common pitfalls in {subject}"));
            }
            QuestionShape::Open => {
                topics.push(format!("Definition and background of {subject}"));
                topics.push(format!("Current state of {subject}"));
                topics.push(format!("How {subject} works"));
                topics.push(format!("Challenges and limitations of {subject}"));
                topics.push(format!("Future outlook for {subject}"));
            }
        }

        let mut seen = HashSet::new();
        topics.retain(|t| seen.insert(t.to_lowercase()));
        while topics.len() < MIN_OUTLINE_TOPICS {
            let filler = [
                format!("Background of {subject}"),
                format!("Evidence and sources on {subject}"),
                format!("Open questions about {subject}"),
            ];
            let Some(next) = filler
                .into_iter()
                .find(|t| !seen.contains(&t.to_lowercase()))
            else {
                break;
            };
            seen.insert(next.to_lowercase());
            topics.push(next);
        }
        topics.truncate(MAX_OUTLINE_TOPICS);
        topics
    }

    /// 1-3 search queries derived from a topic.
    fn seed_queries(&self, topic: &str, query: &str) -> Vec<String> {
        let topic_terms = keywords(topic).join(" ");
        let anchored = format!("{} {}", self.subject(query), topic_terms);
        let mut queries = vec![normalize_whitespace(topic)];
        for candidate in [topic_terms, normalize_whitespace(&anchored)] {
            if !candidate.is_empty() && !queries.contains(&candidate) {
                queries.push(candidate);
            }
        }
        queries.truncate(MAX_SEED_QUERIES);
        queries
    }
}

fn clean_subject(s: &str) -> String {
    let trimmed = s.trim().trim_end_matches(['?', '.', '!']);
    let lower = trimmed.to_lowercase();
    let mut out = trimmed;
    for prefix in ["what is ", "what are ", "compare ", "which is better, ", "which is better "] {
        if lower.starts_with(prefix) {
            out = trimmed.get(prefix.len()..).unwrap_or(trimmed);
            break;
        }
    }
    normalize_whitespace(out)
}

#[async_trait]
impl Planner for HeuristicPlanner {
    async fn plan(&self, user_query: &str) -> Result<ResearchPlan, ResearchError> {
        let query = normalize_whitespace(user_query);
        if query.is_empty() {
            return Err(ResearchError::InvalidQuery);
        }
        let topics = self
            .topics_for(&query)
            .into_iter()
            .map(|topic| {
                let queries = self.seed_queries(&topic, &query);
                (topic, queries)
            })
            .collect();
        let plan = ResearchPlan::from_topics(topics);
        plan.validate()?;
        Ok(plan)
    }
}
