//! Benchmarks for streampdf extraction paths.
//!
//! Run with: cargo bench
//!
//! Documents are synthetic and held in memory so that the numbers measure
//! batching, normalization and caching rather than PDF decoding.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use streampdf::{
    AdaptiveCache, CacheConfig, CoordinatorConfig, ExtractionOptions, Fingerprint,
    InMemoryDocument, ManualSampler, Pipeline, PipelineConfig, StrategyConfig,
};

/// Creates a document whose pages carry a few paragraphs of text.
fn create_test_document(page_count: usize) -> InMemoryDocument {
    let pages = (0..page_count).map(|i| {
        format!(
            "Page {}\r\n\r\nBenchmark test content for streampdf performance measurement.\r\n\r\n\r\n  Second paragraph of page {}.  ",
            i + 1,
            i + 1
        )
    });
    InMemoryDocument::from_pages(format!("bench-{}", page_count), pages)
}

fn pipeline(strategy: StrategyConfig) -> Pipeline {
    let config = PipelineConfig::default()
        .with_strategy(strategy)
        .with_coordinator(CoordinatorConfig::default().with_settle_delay(std::time::Duration::ZERO));
    Pipeline::builder()
        .with_config(config)
        .with_sampler(Arc::new(ManualSampler::new(0, 16 << 30)))
        .build()
        .unwrap()
}

/// Benchmark page text normalization.
fn bench_normalization(c: &mut Criterion) {
    let text = "Line one\r\nLine two\r\n\r\n\r\n\r\n  Cafe\u{301} au lait  \r\n".repeat(50);

    c.bench_function("normalize_page_text", |b| {
        b.iter(|| streampdf::normalize_page_text(black_box(&text)));
    });
}

/// Benchmark streaming and direct extraction at various sizes.
fn bench_extraction(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap();
    let options = ExtractionOptions::default();

    let streaming = pipeline(StrategyConfig::default().with_streaming_threshold(0));
    let direct = pipeline(StrategyConfig::default());

    let mut group = c.benchmark_group("extraction");
    for page_count in [10, 100, 500].iter() {
        let doc = create_test_document(*page_count);

        group.bench_function(format!("streaming_{}_pages", page_count), |b| {
            b.iter(|| {
                streaming.cache().clear();
                runtime
                    .block_on(streaming.extract(black_box(&doc), &options))
                    .unwrap()
            });
        });

        group.bench_function(format!("direct_{}_pages", page_count), |b| {
            b.iter(|| {
                direct.cache().clear();
                runtime
                    .block_on(direct.extract(black_box(&doc), &options))
                    .unwrap()
            });
        });
    }

    group.finish();
}

/// Benchmark cache stores under eviction and lookups.
fn bench_cache(c: &mut Criterion) {
    let cache = AdaptiveCache::new(CacheConfig::default().with_max_items(64));
    let value = "x".repeat(4096);

    c.bench_function("cache_store_with_eviction", |b| {
        let mut n = 0u64;
        b.iter(|| {
            n += 1;
            cache.store(Fingerprint::from(n), value.clone()).unwrap();
        });
    });

    let key = Fingerprint::from(u64::MAX);
    cache.store(key, value.clone()).unwrap();
    c.bench_function("cache_get_hit", |b| {
        b.iter(|| cache.get(black_box(&key)));
    });
}

/// Benchmark PDF header detection.
fn bench_header_detection(c: &mut Criterion) {
    let pdf_data = b"%PDF-1.7\n%\xe2\xe3\xcf\xd3\n1 0 obj\n<< /Type /Catalog >>\nendobj\n";
    let non_pdf_data = b"Not a PDF file at all, just random text content";

    c.bench_function("detect_valid_pdf", |b| {
        b.iter(|| streampdf::detect_header(black_box(pdf_data)).unwrap());
    });

    c.bench_function("detect_non_pdf", |b| {
        b.iter(|| streampdf::detect_header(black_box(non_pdf_data)).is_err());
    });
}

criterion_group!(
    benches,
    bench_normalization,
    bench_extraction,
    bench_cache,
    bench_header_detection,
);
criterion_main!(benches);
