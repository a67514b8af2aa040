//! End-to-end research scenarios.
//!
//! These tests drive `ResearchEngine` with scripted collaborators and the
//! in-memory knowledge store, covering verification, refinement, budget
//! exhaustion, failures, cancellation and the concurrency bound.

use async_trait::async_trait;
use delve_core::config::ResearchConfig;
use delve_core::error::{CollaboratorError, ResearchError};
use delve_core::research::{
    Collaborators, DocumentParser, InMemoryKnowledgeStore, KnowledgeStore, PageContent,
    PageFetcher, Planner, PlainTextParser, RecordingResearchCallback, ResearchEngine,
    ResearchEvent, ResearchPhase, ResearchPlan, SearchHit, SectionKind, SessionOutcome,
    VectorStatus, WebSearch,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Planner that returns a fixed outline.
struct FixedPlanner(Vec<(&'static str, Vec<&'static str>)>);

#[async_trait]
impl Planner for FixedPlanner {
    async fn plan(&self, _user_query: &str) -> Result<ResearchPlan, ResearchError> {
        Ok(ResearchPlan::from_topics(
            self.0
                .iter()
                .map(|(topic, queries)| {
                    (
                        topic.to_string(),
                        queries.iter().map(|q| q.to_string()).collect(),
                    )
                })
                .collect(),
        ))
    }
}

struct FailingPlanner;

#[async_trait]
impl Planner for FailingPlanner {
    async fn plan(&self, _user_query: &str) -> Result<ResearchPlan, ResearchError> {
        Err(ResearchError::PlanningFailed {
            message: "model refused".into(),
        })
    }
}

/// Tracks how many collaborator calls are in flight at once.
#[derive(Default)]
struct InFlight {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl InFlight {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Search that answers from a query -> URLs table. Unknown queries return
/// no hits; `fail_all` makes every call fail.
#[derive(Default)]
struct ScriptedSearch {
    routes: HashMap<String, Vec<String>>,
    fail_all: bool,
    delay: Option<Duration>,
    in_flight: Arc<InFlight>,
    calls: AtomicUsize,
}

impl ScriptedSearch {
    fn route(mut self, query: &str, urls: &[&str]) -> Self {
        self.routes.insert(
            query.to_string(),
            urls.iter().map(|u| u.to_string()).collect(),
        );
        self
    }
}

#[async_trait]
impl WebSearch for ScriptedSearch {
    async fn search_web(&self, query: &str) -> Result<Vec<SearchHit>, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.in_flight.enter();
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.exit();

        if self.fail_all {
            return Err(CollaboratorError::SearchUnavailable {
                query: query.to_string(),
                message: "search backend down".into(),
            });
        }
        Ok(self
            .routes
            .get(query)
            .map(|urls| {
                urls.iter()
                    .map(|u| SearchHit {
                        url: u.clone(),
                        title: "Prompt caching".into(),
                        snippet: String::new(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// Fetcher serving a one-paragraph page per URL; URLs containing "hang"
/// never answer.
struct ScriptedFetcher;

#[async_trait]
impl PageFetcher for ScriptedFetcher {
    async fn fetch_page(&self, url: &str) -> Result<PageContent, CollaboratorError> {
        if url.contains("hang") {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if url.contains("fail") {
            return Err(CollaboratorError::FetchFailed {
                url: url.to_string(),
                message: "HTTP 503".into(),
            });
        }
        Ok(PageContent {
            url: url.to_string(),
            content_type: Some("text/plain".into()),
            body: format!("Prompt caching notes published at {url}."),
        })
    }
}

fn config() -> ResearchConfig {
    ResearchConfig {
        max_iterations: 5,
        max_refinements: 2,
        sufficiency_threshold: 3,
        results_per_query: 5,
        call_timeout_secs: 5,
        ..Default::default()
    }
}

fn engine_with(
    config: ResearchConfig,
    search: ScriptedSearch,
    planner: Arc<dyn Planner>,
) -> (ResearchEngine, Arc<InMemoryKnowledgeStore>) {
    let store = Arc::new(InMemoryKnowledgeStore::new());
    let parser: Arc<dyn DocumentParser> = Arc::new(PlainTextParser::new());
    let knowledge: Arc<dyn KnowledgeStore> = store.clone();
    let collaborators = Collaborators::new(
        Arc::new(search),
        Arc::new(ScriptedFetcher),
        parser,
        knowledge,
    );
    let engine = ResearchEngine::new(config, collaborators)
        .unwrap()
        .with_planner(planner);
    (engine, store)
}

fn single_topic() -> Arc<dyn Planner> {
    Arc::new(FixedPlanner(vec![("Prompt caching", vec!["prompt caching"])]))
}

#[tokio::test]
async fn happy_path_verifies_on_first_pass() {
    let search = ScriptedSearch::default().route(
        "prompt caching",
        &["https://a.dev", "https://b.dev", "https://c.dev", "https://d.dev"],
    );
    let (engine, _) = engine_with(config(), search, single_topic());

    let session = engine.run("What is prompt caching?").await.unwrap();
    let vector = &session.vectors[0];
    assert_eq!(vector.status, VectorStatus::Verified);
    assert_eq!(vector.feedback_loop_count, 0);
    assert_eq!(vector.chunks_retrieved, 4);
    assert_eq!(session.iteration_count, 1);

    let report = session.report.as_ref().unwrap();
    assert_eq!(report.sections.len(), 1);
    assert_eq!(report.gap_count(), 0);
    assert_eq!(report.references.len(), 4);
    assert!(report.success);
    assert!(session.errors.is_empty());
}

#[tokio::test]
async fn one_refinement_then_verified() {
    let search = ScriptedSearch::default()
        .route("prompt caching", &["https://a.dev"])
        .route(
            "prompt caching overview",
            &["https://a.dev", "https://b.dev", "https://c.dev", "https://d.dev", "https://e.dev"],
        );
    let (engine, _) = engine_with(config(), search, single_topic());

    let session = engine.run("What is prompt caching?").await.unwrap();
    let vector = &session.vectors[0];
    assert_eq!(vector.status, VectorStatus::Verified);
    assert_eq!(vector.feedback_loop_count, 1);
    // https://a.dev was already ingested on the first pass
    assert_eq!(vector.chunks_retrieved, 5);
    assert_eq!(vector.sources.len(), 5);
    assert!(vector.refined_query.is_none());
    assert_eq!(
        vector.search_queries,
        vec!["prompt caching".to_string(), "prompt caching overview".to_string()]
    );
    let statuses: Vec<VectorStatus> = vector.history.iter().map(|c| c.to).collect();
    assert_eq!(
        statuses,
        vec![
            VectorStatus::Ingesting,
            VectorStatus::Pending,
            VectorStatus::Ingesting,
            VectorStatus::Verified,
        ]
    );
}

#[tokio::test]
async fn exhausted_refinements_with_partial_evidence() {
    let search = ScriptedSearch::default().route("prompt caching", &["https://a.dev"]);
    let (engine, _) = engine_with(config(), search, single_topic());

    let session = engine.run("What is prompt caching?").await.unwrap();
    let vector = &session.vectors[0];
    assert_eq!(vector.status, VectorStatus::Incomplete);
    assert_eq!(vector.feedback_loop_count, 2);
    assert_eq!(vector.chunks_retrieved, 1);
    assert_eq!(session.iteration_count, 3);

    let report = session.report.as_ref().unwrap();
    assert_eq!(report.sections[0].kind, SectionKind::Partial);
    assert!(report.success);
    assert_eq!(session.errors.len(), 1);
    assert!(session.errors[0].contains("refinement budget exhausted"));
}

#[tokio::test]
async fn no_evidence_ever_fails_vector() {
    let search = ScriptedSearch {
        fail_all: true,
        ..Default::default()
    };
    let (engine, _) = engine_with(config(), search, single_topic());

    let session = engine.run("What is prompt caching?").await.unwrap();
    let vector = &session.vectors[0];
    assert_eq!(vector.status, VectorStatus::Failed);
    assert_eq!(vector.chunks_retrieved, 0);
    assert_eq!(vector.error_trail.len(), 3);

    let report = session.report.as_ref().unwrap();
    assert_eq!(report.sections[0].kind, SectionKind::Gap);
    assert!(!report.success);
    assert!(session.phase == ResearchPhase::Complete);
    assert_eq!(session.errors.len(), 2);
    assert!(session.errors.iter().all(|e| e.contains("Prompt caching")));
}

#[tokio::test]
async fn iteration_cap_forces_remaining_vectors() {
    let planner = Arc::new(FixedPlanner(vec![
        ("Prompt caching basics", vec!["basics"]),
        ("Prompt caching costs", vec!["costs"]),
        ("Prompt caching risks", vec!["risks"]),
    ]));
    let search = ScriptedSearch::default()
        .route("basics", &["https://basics.dev"])
        .route("costs", &["https://costs.dev"])
        .route("risks", &["https://risks.dev"]);
    let cfg = ResearchConfig {
        max_iterations: 1,
        ..config()
    };
    let (engine, _) = engine_with(cfg, search, planner);

    let session = engine.run("Prompt caching tradeoffs").await.unwrap();
    assert_eq!(session.iteration_count, 1);
    assert_eq!(session.outcome, Some(SessionOutcome::IterationBudgetExhausted));
    assert!(
        session
            .vectors
            .iter()
            .all(|v| v.status == VectorStatus::Incomplete && v.refined_query.is_none())
    );
    assert_eq!(session.errors.len(), 1);
    assert!(session.errors[0].contains("v1, v2, v3"));

    let report = session.report.as_ref().unwrap();
    assert_eq!(report.sections.len(), 3);
    assert!(report.sections.iter().all(|s| s.kind != SectionKind::Verified));
}

#[tokio::test]
async fn report_sections_follow_outline_order() {
    let planner = Arc::new(FixedPlanner(vec![
        ("Prompt caching risks", vec!["risks"]),
        ("Prompt caching basics", vec!["basics"]),
    ]));
    let search = ScriptedSearch::default()
        .route("risks", &["https://r1.dev", "https://r2.dev", "https://r3.dev"])
        .route("basics", &["https://b1.dev", "https://b2.dev", "https://b3.dev"]);
    let (engine, _) = engine_with(config(), search, planner);

    let session = engine.run("Prompt caching").await.unwrap();
    let report = session.report.as_ref().unwrap();
    let topics: Vec<&str> = report.sections.iter().map(|s| s.topic.as_str()).collect();
    assert_eq!(topics, vec!["Prompt caching risks", "Prompt caching basics"]);

    let risks = report.content.find("## Prompt caching risks").unwrap();
    let basics = report.content.find("## Prompt caching basics").unwrap();
    assert!(risks < basics);
    for (i, url) in report.references.iter().enumerate() {
        assert!(report.content.contains(&format!("[{}] {url}", i + 1)));
    }
}

#[tokio::test]
async fn planning_failure_is_surfaced() {
    let (engine, _) = engine_with(config(), ScriptedSearch::default(), Arc::new(FailingPlanner));
    let err = engine.run("anything").await.unwrap_err();
    assert!(matches!(err, ResearchError::PlanningFailed { .. }));
}

#[tokio::test]
async fn blank_query_is_rejected_before_any_planner_runs() {
    let (engine, _) = engine_with(config(), ScriptedSearch::default(), single_topic());
    let err = engine.run("   \n\t").await.unwrap_err();
    assert!(matches!(err, ResearchError::InvalidQuery));
}

#[tokio::test]
async fn duplicate_outline_topics_fail_planning() {
    let planner = Arc::new(FixedPlanner(vec![
        ("Prompt caching", vec!["prompt caching"]),
        ("Prompt Caching", vec!["prompt caching basics"]),
    ]));
    let (engine, _) = engine_with(config(), ScriptedSearch::default(), planner);
    let err = engine.run("What is prompt caching?").await.unwrap_err();
    assert!(matches!(err, ResearchError::PlanningFailed { .. }));
}

#[tokio::test]
async fn sessions_sharing_a_store_stay_isolated() {
    let search = ScriptedSearch::default().route(
        "prompt caching",
        &["https://a.dev", "https://b.dev", "https://c.dev"],
    );
    let (engine, store) = engine_with(config(), search, single_topic());

    let first = engine.run("What is prompt caching?").await.unwrap();
    let second = engine.run("What is prompt caching?").await.unwrap();
    assert_ne!(first.id, second.id);
    assert_eq!(store.len(first.id).await, 3);
    assert_eq!(store.len(second.id).await, 3);
    assert_eq!(second.vectors[0].chunks_retrieved, 3);
}

#[tokio::test(start_paused = true)]
async fn hung_fetch_times_out_without_blocking_the_vector() {
    let search = ScriptedSearch::default().route(
        "prompt caching",
        &["https://hang.dev", "https://a.dev", "https://b.dev", "https://c.dev"],
    );
    let (engine, _) = engine_with(config(), search, single_topic());

    let session = engine.run("What is prompt caching?").await.unwrap();
    let vector = &session.vectors[0];
    assert_eq!(vector.status, VectorStatus::Verified);
    assert!(!vector.has_source("https://hang.dev"));
    assert!(vector.error_trail.iter().any(|e| e.contains("timed out")));
}

#[tokio::test(start_paused = true)]
async fn concurrent_vectors_respect_the_bound() {
    let topics: Vec<(&'static str, Vec<&'static str>)> = vec![
        ("Prompt caching one", vec!["q1"]),
        ("Prompt caching two", vec!["q2"]),
        ("Prompt caching three", vec!["q3"]),
        ("Prompt caching four", vec!["q4"]),
        ("Prompt caching five", vec!["q5"]),
    ];
    let in_flight = Arc::new(InFlight::default());
    let search = ScriptedSearch {
        delay: Some(Duration::from_millis(50)),
        in_flight: in_flight.clone(),
        ..Default::default()
    };
    let cfg = ResearchConfig {
        max_concurrent_vectors: 2,
        max_parallel_queries: 1,
        max_iterations: 1,
        ..config()
    };
    let (engine, _) = engine_with(cfg, search, Arc::new(FixedPlanner(topics)));

    let session = engine.run("Prompt caching").await.unwrap();
    assert_eq!(in_flight.peak(), 2);
    assert_eq!(session.vectors.len(), 5);
}

#[tokio::test]
async fn parallel_queries_share_the_vector_budget() {
    let in_flight = Arc::new(InFlight::default());
    let search = ScriptedSearch {
        delay: Some(Duration::from_millis(50)),
        in_flight: in_flight.clone(),
        ..Default::default()
    };
    let cfg = ResearchConfig {
        max_concurrent_vectors: 2,
        max_parallel_queries: 3,
        max_iterations: 1,
        ..config()
    };
    let planner = Arc::new(FixedPlanner(vec![
        ("Prompt caching one", vec!["a1", "a2", "a3"]),
        ("Prompt caching two", vec!["b1", "b2", "b3"]),
    ]));
    let (engine, _) = engine_with(cfg, search, planner);

    engine.run("Prompt caching").await.unwrap();
    assert_eq!(in_flight.peak(), 2);
}

#[tokio::test(start_paused = true)]
async fn cancellation_stops_the_run_without_a_report() {
    let search = ScriptedSearch {
        delay: Some(Duration::from_secs(60)),
        ..Default::default()
    }
    .route("prompt caching", &["https://a.dev"]);
    let cfg = ResearchConfig {
        call_timeout_secs: 120,
        ..config()
    };
    let (engine, _) = engine_with(cfg, search, single_topic());

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        trigger.cancel();
    });

    let session = engine
        .run_with_cancel("What is prompt caching?", cancel)
        .await
        .unwrap();
    assert_eq!(session.phase, ResearchPhase::Cancelled);
    assert_eq!(session.outcome, Some(SessionOutcome::Cancelled));
    assert!(session.final_report.is_none());
    assert_eq!(session.iteration_count, 0);
    assert!(session.errors.iter().any(|e| e.contains("cancelled")));
}

#[tokio::test]
async fn callback_sees_phases_in_order() {
    let search = ScriptedSearch::default().route(
        "prompt caching",
        &["https://a.dev", "https://b.dev", "https://c.dev"],
    );
    let (engine, _) = engine_with(config(), search, single_topic());
    let callback = Arc::new(RecordingResearchCallback::new());
    let engine = engine.with_callback(callback.clone());

    engine.run("What is prompt caching?").await.unwrap();
    let phases: Vec<ResearchPhase> = callback
        .events()
        .into_iter()
        .filter_map(|e| match e {
            ResearchEvent::Phase(p) => Some(p),
            _ => None,
        })
        .collect();
    assert_eq!(
        phases,
        vec![
            ResearchPhase::Planning,
            ResearchPhase::Gathering,
            ResearchPhase::Writing,
            ResearchPhase::Complete,
        ]
    );
    assert!(callback.events().contains(&ResearchEvent::VectorStatus {
        vector_id: "v1".into(),
        status: VectorStatus::Verified,
    }));
}
