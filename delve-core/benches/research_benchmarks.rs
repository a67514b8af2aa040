use criterion::{Criterion, black_box, criterion_group, criterion_main};
use delve_core::config::ResearchConfig;
use delve_core::research::contradiction::ContradictionDetector;
use delve_core::research::text::keywords;
use delve_core::research::{
    EvidenceChunk, HeuristicPlanner, InMemoryKnowledgeStore, KnowledgeStore, Planner,
    PlainTextParser, ResearchSession, ResearchVector, VectorStatus, Writer,
};
use std::sync::Arc;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn bench_planner(c: &mut Criterion) {
    let rt = runtime();
    let planner = HeuristicPlanner::new();

    c.bench_function("plan_open_question", |b| {
        b.iter(|| rt.block_on(planner.plan(black_box("What is prompt caching and why does it matter?"))))
    });

    c.bench_function("plan_comparative_question", |b| {
        b.iter(|| rt.block_on(planner.plan(black_box("Redis vs Memcached for session storage"))))
    });
}

fn bench_text(c: &mut Criterion) {
    let paragraph = "Prompt caching stores the processed prefix of a request so that later \
                     requests sharing the prefix skip recomputation. "
        .repeat(40);

    c.bench_function("keywords_long_paragraph", |b| {
        b.iter(|| keywords(black_box(&paragraph)))
    });

    let parser = PlainTextParser::new();
    let document = format!("{paragraph}\n\n").repeat(20);
    c.bench_function("chunk_document", |b| {
        b.iter(|| parser.chunk_text(black_box(&document), "https://bench.dev", "Bench"))
    });

    let chunks: Vec<EvidenceChunk> = (0..20)
        .map(|i| EvidenceChunk {
            text: format!("Prompt caching reduces latency by {} percent in benchmark {i}", 10 + i),
            source_url: format!("https://source{}.dev", i % 5),
            title: "Caching".into(),
            offset: 0,
        })
        .collect();
    let detector = ContradictionDetector::new();
    c.bench_function("detect_contradictions_20_chunks", |b| {
        b.iter(|| detector.detect(black_box(&chunks)))
    });
}

fn bench_writer(c: &mut Criterion) {
    let rt = runtime();
    let store = Arc::new(InMemoryKnowledgeStore::new());
    let mut session = ResearchSession::new("How does prompt caching work?", 5, 2, 3);

    for t in 0..5 {
        let topic = format!("Prompt caching facet {t}");
        let mut vector = ResearchVector::new(format!("v{}", t + 1), &topic, vec![topic.clone()]);
        vector.transition(VectorStatus::Ingesting).unwrap();
        let chunks: Vec<EvidenceChunk> = (0..5)
            .map(|i| {
                let url = format!("https://facet{t}-{i}.dev");
                vector.add_source(url.clone());
                EvidenceChunk {
                    text: format!("Facet {t} evidence {i}: prompt caching keeps prefixes warm."),
                    source_url: url,
                    title: topic.clone(),
                    offset: 0,
                }
            })
            .collect();
        vector.chunks_retrieved = chunks.len();
        vector.transition(VectorStatus::Verified).unwrap();
        rt.block_on(store.ingest_knowledge(session.id, chunks)).unwrap();
        session.outline.push(topic);
        session.vectors.push(vector);
    }

    let writer = Writer::new(store, &ResearchConfig::default());
    c.bench_function("write_report_5_sections", |b| {
        b.iter(|| rt.block_on(writer.write(black_box(&mut session))))
    });
}

criterion_group!(benches, bench_planner, bench_text, bench_writer);
criterion_main!(benches);
