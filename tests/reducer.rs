mod common;

use std::collections::HashMap;
use std::sync::Arc;

use common::{long_document, simple_response, small_config, MapSource, ScriptedGenerator};
use legiscore::cache::{InterpretationKey, MemoryObjectCache, ObjectCache};
use legiscore::config::HarnessConfig;
use legiscore::interpretation::{InterpretationMetadata, SessionContext};
use legiscore::issues::IssueCategory;
use legiscore::reducer::{ReduceError, Reducer, SourceDocument};
use legiscore::slicer;

fn ctx() -> SessionContext {
    SessionContext::new("us/congress", "118")
}

fn reducer(
    generator: &Arc<ScriptedGenerator>,
    cache: &Arc<MemoryObjectCache>,
    config: HarnessConfig,
) -> Reducer {
    Reducer::new(generator.clone(), cache.clone(), config)
}

#[tokio::test]
async fn second_reduction_is_served_from_cache() {
    let generator = Arc::new(ScriptedGenerator::repeating(simple_response(30)));
    let cache = Arc::new(MemoryObjectCache::new());
    let reducer = reducer(&generator, &cache, HarnessConfig::default());
    let doc = SourceDocument::new("BIL/hr/1", "A short bill about clinics.");

    let first = reducer.reduce(&ctx(), &doc).await.unwrap();
    let second = reducer.reduce(&ctx(), &doc).await.unwrap();

    assert_eq!(generator.calls(), 1);
    assert_eq!(first, second);
    assert_eq!(first.rating(), 30);
    assert_eq!(first.generated_title.as_deref(), Some("Test Act"));
    assert!(matches!(first.metadata, InterpretationMetadata::Document(_)));
}

#[tokio::test]
async fn long_document_is_sliced_then_summarized() {
    let config = small_config();
    let text = long_document(6);
    let expected = slicer::slice("BIL/hr/2", &text, config.max_section_length)
        .unwrap()
        .len();
    assert!(expected > 1);

    let generator = Arc::new(ScriptedGenerator::repeating(simple_response(20)));
    let cache = Arc::new(MemoryObjectCache::new());
    let reducer = reducer(&generator, &cache, config);
    let doc = SourceDocument::new("BIL/hr/2", text);

    let out = reducer.reduce(&ctx(), &doc).await.unwrap();

    assert_eq!(generator.calls(), expected + 1);
    assert_eq!(out.children.len(), expected);
    assert_eq!(out.slice_index, None);
    assert_eq!(out.scores.overall(), Some(20));
    assert_eq!(out.scores.get(IssueCategory::Healthcare), Some(10));
    for (i, child) in out.children.iter().enumerate() {
        assert_eq!(child.slice_index, Some(i));
        assert_eq!(child.id, format!("BIL/hr/2#{i}"));
    }

    let summary = generator.requests().pop().unwrap();
    assert!(summary.user.contains("Part 1:"));
    assert!(summary.user.contains(&format!("Part {expected}:")));
}

#[tokio::test]
async fn interrupted_reduction_resumes_at_the_summary() {
    let config = small_config();
    let text = long_document(6);
    let slices = slicer::slice("BIL/hr/3", &text, config.max_section_length)
        .unwrap()
        .len();
    let cache = Arc::new(MemoryObjectCache::new());
    let doc = SourceDocument::new("BIL/hr/3", text);

    let script = (0..slices).map(|_| Ok(simple_response(10))).collect();
    let failing = Arc::new(ScriptedGenerator::new(script));
    let err = reducer(&failing, &cache, config.clone())
        .reduce(&ctx(), &doc)
        .await
        .unwrap_err();
    assert!(matches!(err, ReduceError::Generation(_)));
    assert_eq!(cache.len(), slices);

    let resumed = Arc::new(ScriptedGenerator::repeating(simple_response(10)));
    let out = reducer(&resumed, &cache, config)
        .reduce(&ctx(), &doc)
        .await
        .unwrap();
    assert_eq!(resumed.calls(), 1);
    assert_eq!(out.children.len(), slices);
}

#[tokio::test]
async fn unparseable_responses_are_retried_then_fail() {
    let cache = Arc::new(MemoryObjectCache::new());
    let doc = SourceDocument::new("BIL/s/9", "Short.");

    let flaky = Arc::new(ScriptedGenerator::new(vec![
        Ok("I cannot format this.".to_string()),
        Ok(simple_response(5)),
    ]));
    let out = reducer(&flaky, &cache, HarnessConfig::default())
        .reduce(&ctx(), &doc)
        .await
        .unwrap();
    assert_eq!(flaky.calls(), 2);
    assert_eq!(out.rating(), 5);

    let broken = Arc::new(ScriptedGenerator::repeating("Stats:\nHousing: +3\n"));
    let other = SourceDocument::new("BIL/s/10", "Short.");
    let err = reducer(&broken, &cache, HarnessConfig::default())
        .reduce(&ctx(), &other)
        .await
        .unwrap_err();
    match err {
        ReduceError::ParseValidation { attempts, .. } => assert_eq!(attempts, 3),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(broken.calls(), 3);
    let key = InterpretationKey::document(&ctx(), "BIL/s/10");
    assert!(!cache.exists(&key).await.unwrap());
}

#[tokio::test]
async fn oversized_request_fails_before_generation() {
    let generator = Arc::new(ScriptedGenerator::repeating(simple_response(5)));
    let cache = Arc::new(MemoryObjectCache::new());
    let config = HarnessConfig {
        max_request_length: 100,
        ..HarnessConfig::default()
    };
    let err = reducer(&generator, &cache, config)
        .reduce(&ctx(), &SourceDocument::new("BIL/hr/4", "Text."))
        .await
        .unwrap_err();
    assert!(matches!(err, ReduceError::BudgetExceeded { limit: 100, .. }));
    assert_eq!(generator.calls(), 0);
}

#[tokio::test]
async fn unsplittable_slice_is_a_budget_error() {
    let generator = Arc::new(ScriptedGenerator::repeating(simple_response(5)));
    let cache = Arc::new(MemoryObjectCache::new());
    let err = reducer(&generator, &cache, small_config())
        .reduce(&ctx(), &SourceDocument::new("BIL/hr/5", "x".repeat(1_000)))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "budget_exceeded");
    assert_eq!(generator.calls(), 0);
}

#[tokio::test]
async fn batch_skips_missing_sources_and_continues() {
    let generator = Arc::new(ScriptedGenerator::repeating(simple_response(12)));
    let cache = Arc::new(MemoryObjectCache::new());
    let source = MapSource(HashMap::from([(
        "BIL/hr/6".to_string(),
        "A bill.".to_string(),
    )]));

    let report = reducer(&generator, &cache, HarnessConfig::default())
        .reduce_batch(
            &ctx(),
            &["BIL/hr/404".to_string(), "BIL/hr/6".to_string()],
            &source,
        )
        .await;

    assert_eq!(report.reduced, vec!["BIL/hr/6".to_string()]);
    assert_eq!(report.skipped, vec!["BIL/hr/404".to_string()]);
    assert!(report.failed.is_empty());
}

#[tokio::test]
async fn origin_interpretations_are_keyed_separately() {
    let generator = Arc::new(ScriptedGenerator::repeating(simple_response(8)));
    let cache = Arc::new(MemoryObjectCache::new());
    let reducer = reducer(&generator, &cache, HarnessConfig::default());

    let plain = SourceDocument::new("BIL/hr/7", "Bill text.");
    let seen = SourceDocument::new("BIL/hr/7", "Bill text.").with_origin("reddit/politics");
    let a = reducer.reduce(&ctx(), &plain).await.unwrap();
    let b = reducer.reduce(&ctx(), &seen).await.unwrap();

    assert_eq!(generator.calls(), 2);
    assert_eq!(a.id, "BIL/hr/7");
    assert_eq!(b.id, "BIL/hr/7@reddit/politics");
    assert_eq!(b.origin_id.as_deref(), Some("reddit/politics"));
}

#[tokio::test]
async fn slice_failing_validation_aborts_the_document() {
    let config = small_config();
    let text = long_document(6);
    let slices = slicer::slice("BIL/hr/8", &text, config.max_section_length).unwrap();
    assert!(slices.len() > 1);
    let doc = SourceDocument::new("BIL/hr/8", text);
    let cache = Arc::new(MemoryObjectCache::new());

    let mut script: Vec<_> = (1..slices.len()).map(|_| Ok(simple_response(10))).collect();
    script.extend((0..3).map(|_| Ok("Stats:\nHousing: +3".to_string())));
    let generator = Arc::new(ScriptedGenerator::new(script));

    let err = reducer(&generator, &cache, config)
        .reduce(&ctx(), &doc)
        .await
        .unwrap_err();
    match err {
        ReduceError::ParseValidation { attempts, .. } => assert_eq!(attempts, 3),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(generator.calls(), slices.len() + 2);

    let document = InterpretationKey::document(&ctx(), "BIL/hr/8");
    assert!(!cache.exists(&document).await.unwrap());
    let (last, done) = slices.split_last().unwrap();
    for slice in done {
        assert!(cache.exists(&doc.slice_key(&ctx(), slice)).await.unwrap());
    }
    assert!(!cache.exists(&doc.slice_key(&ctx(), last)).await.unwrap());
    assert_eq!(cache.len(), slices.len() - 1);
}
