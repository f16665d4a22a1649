//! Integration tests for batched streaming extraction.

use std::sync::Arc;

use parking_lot::Mutex;
use streampdf::{
    Error, ExtractionOptions, InMemoryDocument, ManualSampler, PageSource, Pipeline,
    PipelineConfig, ProcessingProgress, StrategyConfig,
};

const MB: u64 = 1024 * 1024;

/// Pipeline that streams every document regardless of its size.
fn streaming_pipeline(resident: u64) -> (Arc<ManualSampler>, Pipeline) {
    let sampler = Arc::new(ManualSampler::new(resident, 16 * 1024 * MB));
    let config =
        PipelineConfig::default().with_strategy(StrategyConfig::default().with_streaming_threshold(0));
    let pipeline = Pipeline::builder()
        .with_config(config)
        .with_sampler(sampler.clone())
        .build()
        .unwrap();
    (sampler, pipeline)
}

fn direct_pipeline() -> Pipeline {
    Pipeline::builder()
        .with_sampler(Arc::new(ManualSampler::new(0, 16 * 1024 * MB)))
        .build()
        .unwrap()
}

fn numbered_document(pages: u32) -> InMemoryDocument {
    InMemoryDocument::from_pages(
        format!("numbered-{}", pages),
        (1..=pages).map(|i| format!("Page {} content", i)),
    )
}

/// A document with unreadable, empty and untidy pages.
struct MixedDocument {
    pages: u32,
}

impl PageSource for MixedDocument {
    fn identity(&self) -> &str {
        "mixed"
    }

    fn page_count(&self) -> u32 {
        self.pages
    }

    fn page_text(&self, index: u32) -> streampdf::Result<Option<String>> {
        match index % 7 {
            0 => Err(Error::PageRead {
                page: index,
                reason: "damaged content stream".to_string(),
            }),
            3 => Ok(None),
            5 => Ok(Some("   \r\n  ".to_string())),
            _ => Ok(Some(format!("  Page {}\r\n\r\n\r\nbody  ", index))),
        }
    }
}

fn collect(receiver: &mut tokio::sync::broadcast::Receiver<ProcessingProgress>) -> Vec<ProcessingProgress> {
    let mut updates = Vec::new();
    while let Ok(progress) = receiver.try_recv() {
        updates.push(progress);
    }
    updates
}

#[tokio::test(start_paused = true)]
async fn test_150_pages_stream_in_30_batches() {
    let (_sampler, pipeline) = streaming_pipeline(10 * MB);
    let doc = numbered_document(150);
    let mut progress = pipeline.progress();

    let text = pipeline
        .extract(&doc, &ExtractionOptions::default())
        .await
        .unwrap();

    let expected: Vec<String> = (1..=150).map(|i| format!("Page {} content", i)).collect();
    assert_eq!(text, expected.join("\n\n"));

    let updates = collect(&mut progress);
    assert_eq!(updates.len(), 30);
    assert!(updates.iter().all(|p| p.total_batches == 30));
    assert_eq!(updates[0].completed_pages, 5);
    assert_eq!(pipeline.last_run().completed_batches, 30);
}

#[tokio::test(start_paused = true)]
async fn test_streaming_matches_direct_extraction() {
    let doc = MixedDocument { pages: 61 };
    let options = ExtractionOptions::default();

    let (_sampler, streaming) = streaming_pipeline(10 * MB);
    let streamed = streaming.extract(&doc, &options).await.unwrap();

    let direct = direct_pipeline();
    let sequential = direct.extract(&doc, &options).await.unwrap();

    let parallel_options = options.clone().with_parallel(true);
    let parallel = direct_pipeline()
        .extract(&doc, &parallel_options)
        .await
        .unwrap();

    assert_eq!(streamed, sequential);
    assert_eq!(streamed, parallel);
    assert!(streamed.starts_with("Page 1\n\nbody\n\nPage 2\n\nbody\n\nPage 4"));
    assert!(!streamed.contains("Page 0\n"));
    assert!(!streamed.contains("Page 7\n"));
}

#[tokio::test(start_paused = true)]
async fn test_streaming_matches_direct_in_raw_mode() {
    let doc = MixedDocument { pages: 20 };
    let options = ExtractionOptions::default().raw();

    let (_sampler, streaming) = streaming_pipeline(10 * MB);
    let streamed = streaming.extract(&doc, &options).await.unwrap();
    let direct = direct_pipeline().extract(&doc, &options).await.unwrap();

    assert_eq!(streamed, direct);
    assert!(streamed.contains("  Page 1\r\n\r\n\r\nbody  "));
}

#[tokio::test(start_paused = true)]
async fn test_progress_is_monotonic() {
    let (_sampler, pipeline) = streaming_pipeline(150 * MB);
    let doc = numbered_document(47);
    let seen = Mutex::new(Vec::new());
    let callback = |p: &ProcessingProgress| seen.lock().push(*p);

    pipeline
        .extract_with_progress(&doc, &ExtractionOptions::default(), &callback)
        .await
        .unwrap();

    let seen = seen.into_inner();
    assert!(!seen.is_empty());
    for pair in seen.windows(2) {
        assert!(pair[1].completed_pages > pair[0].completed_pages);
        assert!(pair[1].current_batch > pair[0].current_batch);
    }
    for p in &seen {
        assert!(p.current_batch <= p.total_batches);
        assert!(p.completed_pages <= p.total_pages);
    }
    let last = seen.last().unwrap();
    assert_eq!(last.completed_pages, 47);
    assert!(last.is_complete());
    assert_eq!(last.current_batch, last.total_batches);
}

#[tokio::test(start_paused = true)]
async fn test_progress_stays_monotonic_across_replanning() {
    let (sampler, pipeline) = streaming_pipeline(10 * MB);
    let doc = numbered_document(60);
    let seen = Mutex::new(Vec::new());
    let monitor = Arc::clone(pipeline.monitor());

    // Raise pressure to Medium once the first batch is reported.
    let callback = |p: &ProcessingProgress| {
        seen.lock().push(*p);
        if p.current_batch == 1 {
            sampler.set_resident(250 * MB);
            monitor.sample_now();
        }
    };

    let text = pipeline
        .extract_with_progress(&doc, &ExtractionOptions::default(), &callback)
        .await
        .unwrap();
    assert!(text.ends_with("Page 60 content"));

    let seen = seen.into_inner();
    // 60 pages: batches of 8 at Normal, then 5 at Medium for the rest.
    assert_eq!(seen[0].completed_pages, 8);
    assert_eq!(seen[1].completed_pages, 13);
    assert_eq!(seen.len(), 1 + 52_usize.div_ceil(5));
    for pair in seen.windows(2) {
        assert!(pair[1].completed_pages > pair[0].completed_pages);
    }
    let last = seen.last().unwrap();
    assert_eq!(last.completed_pages, 60);
    assert_eq!(last.current_batch, last.total_batches);
}

#[tokio::test(start_paused = true)]
async fn test_overlapping_extractions_keep_separate_progress() {
    let (_sampler, pipeline) = streaming_pipeline(10 * MB);
    let long = numbered_document(50);
    let short = numbered_document(10);
    let long_seen = Mutex::new(Vec::new());
    let short_seen = Mutex::new(Vec::new());
    let on_long = |p: &ProcessingProgress| long_seen.lock().push(*p);
    let on_short = |p: &ProcessingProgress| short_seen.lock().push(*p);
    let options = ExtractionOptions::default();

    let (long_text, short_text) = tokio::join!(
        pipeline.extract_with_progress(&long, &options, &on_long),
        pipeline.extract_with_progress(&short, &options, &on_short),
    );
    assert!(long_text.unwrap().ends_with("Page 50 content"));
    assert!(short_text.unwrap().ends_with("Page 10 content"));

    for (seen, pages) in [(long_seen.into_inner(), 50), (short_seen.into_inner(), 10)] {
        assert!(!seen.is_empty());
        assert!(seen.iter().all(|p| p.session == seen[0].session));
        assert!(seen.iter().all(|p| p.total_pages == pages));
        for pair in seen.windows(2) {
            assert!(pair[1].completed_pages > pair[0].completed_pages);
        }
        let last = seen.last().unwrap();
        assert_eq!(last.completed_pages, pages);
        assert_eq!(last.current_batch, last.total_batches);
    }
}

#[tokio::test(start_paused = true)]
async fn test_options_cap_batch_size() {
    let (_sampler, pipeline) = streaming_pipeline(10 * MB);
    let doc = numbered_document(12);
    let options = ExtractionOptions::default().with_max_batch_size(4);

    pipeline.extract(&doc, &options).await.unwrap();
    assert_eq!(pipeline.last_run().completed_batches, 3);
}

#[tokio::test(start_paused = true)]
async fn test_document_without_text() {
    let (_sampler, pipeline) = streaming_pipeline(10 * MB);
    let doc = InMemoryDocument::new("scanned", vec![None; 9]);

    let text = pipeline
        .extract(&doc, &ExtractionOptions::default())
        .await
        .unwrap();
    assert!(text.is_empty());
    assert_eq!(pipeline.last_run().completed_batches, 1);
}
