//! Scoring and panel benchmarks.
//!
//! - `aggregate`: weighted overall score over a full category map
//! - `outline_normalise`: target rescaling plus adjacent keyword dedupe
//! - `quick_audit_simulated`: one quick audit end to end against the
//!   simulated provider and the in-memory store (no network)

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use editorial_orchestrator::agent::AgentInvoker;
use editorial_orchestrator::config::EditorialConfig;
use editorial_orchestrator::content::ReviewCategory;
use editorial_orchestrator::provider::{ProviderPool, SimulatedProvider};
use editorial_orchestrator::resilience::RetryPolicy;
use editorial_orchestrator::scoring;
use editorial_orchestrator::sections::{normalise_outline, SectionStub};
use editorial_orchestrator::store::InMemoryStore;
use editorial_orchestrator::{
    AuditEngine, AuditMode, ContentId, ContentItem, ContentStore, EngineContext, ProviderHarness,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

// ---------------------------------------------------------------------------
// Bench: aggregation
// ---------------------------------------------------------------------------

fn bench_aggregate(c: &mut Criterion) {
    let weights = EditorialConfig::default().scoring.weights;
    let scores: BTreeMap<ReviewCategory, f64> = ReviewCategory::ALL
        .iter()
        .enumerate()
        .map(|(i, cat)| (*cat, 6.0 + i as f64 * 0.4))
        .collect();

    c.bench_function("aggregate", |b| {
        b.iter(|| scoring::aggregate(black_box(&scores), black_box(&weights)))
    });
}

// ---------------------------------------------------------------------------
// Bench: outline normalisation
// ---------------------------------------------------------------------------

fn bench_outline_normalise(c: &mut Criterion) {
    let mut group = c.benchmark_group("outline_normalise");
    for sections in [4usize, 12, 48] {
        let stubs: Vec<SectionStub> = (0..sections)
            .map(|i| SectionStub {
                title: format!("Section {i}"),
                target_words: 300 + (i % 5) * 90,
                keywords: vec![format!("kw{}", i % 3), format!("kw{}", (i + 1) % 3), "shared".into()],
                related_entities: vec![format!("entity{}", i % 4)],
            })
            .collect();
        group.bench_with_input(BenchmarkId::from_parameter(sections), &stubs, |b, stubs| {
            b.iter(|| normalise_outline(black_box(stubs.clone()), 8_000))
        });
    }
    group.finish();
}

// ---------------------------------------------------------------------------
// Bench: quick audit against the simulated provider
// ---------------------------------------------------------------------------

fn bench_quick_audit(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime");
    let store = Arc::new(InMemoryStore::new());
    let mut item = ContentItem::new_draft(ContentId::new("bench-1"), "Backoff and Jitter", "guide");
    item.body = "Exponential backoff with full jitter spreads retries out. ".repeat(40);
    rt.block_on(store.save_content_item(&item)).expect("seed");

    let harness = ProviderHarness::new(
        Arc::new(SimulatedProvider::new("sim", "sim-1")),
        RetryPolicy::fixed(1, Duration::from_millis(1)),
    );
    let mut config = EditorialConfig::default();
    config.audit.max_version_retries = 1_000;
    let ctx = EngineContext::new(config, AgentInvoker::new(ProviderPool::single(harness)), store);
    let engine = AuditEngine::new(ctx);

    c.bench_function("quick_audit_simulated", |b| {
        b.to_async(&rt).iter(|| async {
            black_box(engine.audit(&item.id, AuditMode::Quick).await.expect("audit"));
        })
    });
}

criterion_group!(benches, bench_aggregate, bench_outline_normalise, bench_quick_audit);
criterion_main!(benches);
