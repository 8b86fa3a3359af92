#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::NaiveDate;
use legiscore::config::HarnessConfig;
use legiscore::generation::{GenerationError, GenerationRequest, Generator};
use legiscore::interpretation::{Interpretation, InterpretationMetadata, ModelMetadata};
use legiscore::issues::IssueCategory;
use legiscore::parser::{self, InterpretationFragment};
use legiscore::reducer::DocumentSource;
use legiscore::stats::ScoreMap;

/// Replays queued responses, then repeats `fallback` (or fails when unset).
pub struct ScriptedGenerator {
    script: Mutex<VecDeque<Result<String, GenerationError>>>,
    fallback: Option<String>,
    calls: AtomicUsize,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub fn new(script: Vec<Result<String, GenerationError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: None,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn repeating(response: impl Into<String>) -> Self {
        Self {
            fallback: Some(response.into()),
            ..Self::new(Vec::new())
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(&self, req: &GenerationRequest) -> Result<String, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(req.clone());
        if let Some(next) = self.script.lock().unwrap().pop_front() {
            return next;
        }
        match &self.fallback {
            Some(text) => Ok(text.clone()),
            None => Err(GenerationError::invalid_request("script exhausted")),
        }
    }
}

pub struct MapSource(pub HashMap<String, String>);

#[async_trait]
impl DocumentSource for MapSource {
    async fn document_text(&self, subject_id: &str) -> Option<String> {
        self.0.get(subject_id).cloned()
    }
}

pub fn scores(entries: &[(IssueCategory, i32)]) -> ScoreMap {
    entries.iter().copied().collect()
}

/// A well-formed response carrying `scores` and both texts.
pub fn response(scores: ScoreMap, short: &str, long: &str) -> String {
    parser::render(&InterpretationFragment {
        scores,
        title: Some("Test Act".to_string()),
        riders: Vec::new(),
        short_text: short.to_string(),
        long_text: long.to_string(),
    })
}

pub fn simple_response(overall: i32) -> String {
    response(
        scores(&[
            (IssueCategory::OVERALL, overall),
            (IssueCategory::Healthcare, overall / 2),
        ]),
        "A short report.",
        "A longer report with detail.",
    )
}

/// Small slice budget so modest fixtures exercise slicing.
pub fn small_config() -> HarnessConfig {
    HarnessConfig {
        max_section_length: 400,
        ..HarnessConfig::default()
    }
}

/// `n` sections of roughly 200 bytes each.
pub fn long_document(n: usize) -> String {
    (1..=n)
        .map(|i| {
            format!(
                "SEC. {i}. Provision number {i}.\n{}\n\n",
                "The Secretary shall carry out this section. ".repeat(4)
            )
        })
        .collect()
}

pub fn model() -> ModelMetadata {
    ModelMetadata {
        provider: "openai".to_string(),
        model: "test-model".to_string(),
        prompt_version: 0,
        date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
    }
}

/// A document-level interpretation as it would sit in the cache.
pub fn stored(subject_id: &str, scores: ScoreMap) -> Interpretation {
    Interpretation::from_fragment(
        subject_id,
        subject_id,
        None,
        None,
        InterpretationFragment {
            scores,
            title: None,
            riders: Vec::new(),
            short_text: format!("{subject_id} short"),
            long_text: format!("{subject_id} long"),
        },
        InterpretationMetadata::Document(model()),
    )
}
