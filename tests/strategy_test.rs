//! Integration tests for strategy selection.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use streampdf::{
    CoordinatorConfig, ExtractionOptions, ExtractionStrategy, InMemoryDocument, ManualSampler,
    PageSource, Pipeline, PipelineConfig, PressureWaitFallback, StrategyConfig,
};

const MB: u64 = 1024 * 1024;

fn pipeline(resident: u64, strategy: StrategyConfig) -> Pipeline {
    Pipeline::builder()
        .with_config(PipelineConfig::default().with_strategy(strategy))
        .with_sampler(Arc::new(ManualSampler::new(resident, 16 * 1024 * MB)))
        .build()
        .unwrap()
}

/// A document that claims many pages of fixed-size text without storing them.
struct SyntheticDocument {
    pages: u32,
    chars_per_page: usize,
}

impl PageSource for SyntheticDocument {
    fn identity(&self) -> &str {
        "synthetic"
    }

    fn page_count(&self) -> u32 {
        self.pages
    }

    fn page_text(&self, index: u32) -> streampdf::Result<Option<String>> {
        let mut text = format!("{:06}", index);
        text.push_str(&"x".repeat(self.chars_per_page.saturating_sub(6)));
        Ok(Some(text))
    }
}

/// Counts every page read.
struct CountingDocument {
    name: &'static str,
    pages: u32,
    reads: AtomicU32,
}

impl CountingDocument {
    fn new(name: &'static str, pages: u32) -> Self {
        Self {
            name,
            pages,
            reads: AtomicU32::new(0),
        }
    }

    fn reads(&self) -> u32 {
        self.reads.load(Ordering::SeqCst)
    }
}

impl PageSource for CountingDocument {
    fn identity(&self) -> &str {
        self.name
    }

    fn page_count(&self) -> u32 {
        self.pages
    }

    fn page_text(&self, index: u32) -> streampdf::Result<Option<String>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(Some(format!("{} page {}", self.name, index)))
    }
}

#[test]
fn test_250_mb_estimate_routes_to_streaming() {
    // 1000 pages of 100,000 chars at 2 bytes each is 200 MB of text (~190.7 MiB)
    // plus 50 MiB overhead: about 241 MiB.
    let doc = SyntheticDocument {
        pages: 1000,
        chars_per_page: 100_000,
    };
    let pipeline = pipeline(0, StrategyConfig::default());
    let plan = pipeline.plan(&doc, &ExtractionOptions::default());

    assert!(plan.estimated_bytes > 200 * MB);
    assert_eq!(plan.strategy, ExtractionStrategy::Streaming);
}

#[test]
fn test_small_document_reads_directly() {
    let doc = SyntheticDocument {
        pages: 10,
        chars_per_page: 2000,
    };
    let pipeline = pipeline(0, StrategyConfig::default());

    let plan = pipeline.plan(&doc, &ExtractionOptions::default());
    assert_eq!(plan.estimated_bytes, 10 * 2000 * 2 + 50 * MB);
    assert_eq!(plan.strategy, ExtractionStrategy::DirectSequential);

    let parallel = pipeline.plan(&doc, &ExtractionOptions::default().with_parallel(true));
    assert_eq!(parallel.strategy, ExtractionStrategy::DirectParallel { workers: 4 });
}

#[test]
fn test_pressure_disables_parallel_reads() {
    let doc = SyntheticDocument {
        pages: 10,
        chars_per_page: 100,
    };
    let options = ExtractionOptions::default()
        .with_parallel(true)
        .with_max_concurrent_operations(2);

    let relaxed = pipeline(0, StrategyConfig::default()).plan(&doc, &options);
    assert_eq!(relaxed.strategy, ExtractionStrategy::DirectParallel { workers: 2 });

    let pressured = pipeline(320 * MB, StrategyConfig::default()).plan(&doc, &options);
    assert_eq!(pressured.strategy, ExtractionStrategy::DirectSequential);
}

#[test]
fn test_threshold_is_configurable() {
    let doc = SyntheticDocument {
        pages: 10,
        chars_per_page: 100,
    };
    let strategy = StrategyConfig::default()
        .with_processing_overhead(0)
        .with_streaming_threshold(1000);
    let plan = pipeline(0, strategy).plan(&doc, &ExtractionOptions::default());

    assert_eq!(plan.estimated_bytes, 2000);
    assert_eq!(plan.strategy, ExtractionStrategy::Streaming);
}

#[tokio::test(start_paused = true)]
async fn test_every_strategy_produces_the_same_text() {
    let doc = InMemoryDocument::new(
        "mixed",
        (0..30)
            .map(|i| match i % 4 {
                0 => None,
                1 => Some(format!("Heading {}\r\n\r\n\r\n\r\nBody", i)),
                _ => Some(format!("  line {}  ", i)),
            })
            .collect(),
    );
    let options = ExtractionOptions::default();

    let direct = pipeline(0, StrategyConfig::default());
    assert_eq!(
        direct.plan(&doc, &options).strategy,
        ExtractionStrategy::DirectSequential
    );
    let sequential = direct.extract(&doc, &options).await.unwrap();

    let parallel = pipeline(0, StrategyConfig::default())
        .extract(&doc, &options.clone().with_parallel(true))
        .await
        .unwrap();

    let streaming = pipeline(0, StrategyConfig::default().with_streaming_threshold(0));
    assert_eq!(
        streaming.plan(&doc, &options).strategy,
        ExtractionStrategy::Streaming
    );
    let streamed = streaming.extract(&doc, &options).await.unwrap();

    assert_eq!(sequential, parallel);
    assert_eq!(sequential, streamed);
    assert!(sequential.starts_with("Heading 1\n\nBody\n\nline 2\n\nline 3\n\nHeading 5"));
}

#[test]
fn test_plan_serializes_for_reporting() {
    let doc = SyntheticDocument {
        pages: 3,
        chars_per_page: 10,
    };
    let plan = pipeline(0, StrategyConfig::default())
        .plan(&doc, &ExtractionOptions::default().with_parallel(true));
    let json = serde_json::to_value(plan).unwrap();

    assert_eq!(json["strategy"]["kind"], "direct_parallel");
    assert_eq!(json["strategy"]["workers"], 4);
}

#[tokio::test]
async fn test_cached_result_reads_no_pages() {
    // Remember a single estimate so the first document's is gone by the repeat.
    let strategy = StrategyConfig {
        estimate_cache_cap: 1,
        ..StrategyConfig::default()
    };
    let pipeline = pipeline(0, strategy);
    let first = CountingDocument::new("first", 12);
    let second = CountingDocument::new("second", 12);
    let options = ExtractionOptions::default();

    let text = pipeline.extract(&first, &options).await.unwrap();
    pipeline.extract(&second, &options).await.unwrap();
    let reads_before = first.reads();
    assert!(reads_before > 0);

    let again = pipeline.extract(&first, &options).await.unwrap();
    assert_eq!(again, text);
    assert_eq!(first.reads(), reads_before);
    assert_eq!(pipeline.cache().stats().hits, 1);
}

#[tokio::test(start_paused = true)]
async fn test_cached_result_ignores_critical_pressure() {
    let sampler = Arc::new(ManualSampler::new(10 * MB, 16 * 1024 * MB));
    let config = PipelineConfig::default()
        .with_strategy(StrategyConfig::default().with_streaming_threshold(0))
        .with_coordinator(
            CoordinatorConfig::default()
                .with_max_pressure_wait(Some(Duration::from_secs(1)))
                .with_fallback(PressureWaitFallback::Fail),
        );
    let pipeline = Pipeline::builder()
        .with_config(config)
        .with_sampler(sampler.clone())
        .build()
        .unwrap();
    let doc = CountingDocument::new("doc", 6);
    let options = ExtractionOptions::default();

    let text = pipeline.extract(&doc, &options).await.unwrap();
    let reads = doc.reads();

    // A fresh extraction would now time out waiting for memory.
    sampler.set_resident(500 * MB);
    let cached = pipeline.extract(&doc, &options).await.unwrap();
    assert_eq!(cached, text);
    assert_eq!(doc.reads(), reads);
}
