//! Reduces a document into one interpretation.
//!
//! Three paths:
//!
//! - **Fits**: the document is within the slice budget; one request.
//! - **Slice**: each slice is interpreted (or read back from the cache) under its
//!   own key, then the slice scores are averaged with a fixed denominator N.
//! - **Summarize**: the slice reports are concatenated (truncated per slice when
//!   needed) and one more request writes the document-level text. Slice
//!   interpretations are kept as children.
//!
//! Every request is keyed deterministically, so a rerun only issues the work
//! that is missing from the cache.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::cache::{CacheError, InterpretationKey, ObjectCache};
use crate::config::HarnessConfig;
use crate::generation::{GenerationError, GenerationRequest, Generator};
use crate::interpretation::{Interpretation, InterpretationMetadata, ModelMetadata, SessionContext};
use crate::parser::{self, InterpretationFragment, ParseError, Validation};
use crate::prompts::{ACTOR_PROMPT, COHORT_PROMPT, DOCUMENT_PROMPT, SLICE_PROMPT, SUMMARY_PROMPT};
use crate::slicer::{self, Slice, SliceError};
use crate::stats::{ScoreMap, StatsError, WeightedScoreMap};
use crate::trace::{ReductionTrace, TraceSink, WorkKind};

#[derive(Debug, thiserror::Error)]
pub enum ReduceError {
    #[error("no source text for {0}")]
    MissingSourceText(String),
    #[error("{key}: response failed validation after {attempts} attempts: {reason}")]
    ParseValidation {
        key: String,
        attempts: u32,
        reason: ParseError,
    },
    #[error("{key}: length {length} exceeds limit {limit}")]
    BudgetExceeded {
        key: String,
        length: usize,
        limit: usize,
    },
    #[error("generation failed: {0}")]
    Generation(#[from] GenerationError),
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
    #[error("stats error: {0}")]
    Stats(#[from] StatsError),
    #[error("slice error: {0}")]
    Slice(#[from] SliceError),
}

impl ReduceError {
    /// Short error code for logging.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingSourceText(_) => "missing_source_text",
            Self::ParseValidation { .. } => "parse_validation",
            Self::BudgetExceeded { .. } => "budget_exceeded",
            Self::Generation(_) => "generation",
            Self::Cache(_) => "cache",
            Self::Stats(_) => "stats",
            Self::Slice(_) => "slice",
        }
    }

    /// Only a missing document is skippable; everything else fails the document.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::MissingSourceText(_))
    }
}

/// Text to reduce, optionally seen through an external origin.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub subject_id: String,
    pub origin_id: Option<String>,
    pub text: String,
}

impl SourceDocument {
    pub fn new(subject_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            origin_id: None,
            text: text.into(),
        }
    }

    pub fn with_origin(mut self, origin_id: impl Into<String>) -> Self {
        self.origin_id = Some(origin_id.into());
        self
    }

    pub fn key(&self, ctx: &SessionContext) -> InterpretationKey {
        InterpretationKey::new(ctx, &self.subject_id, None, self.origin_id.as_deref())
    }

    pub fn slice_key(&self, ctx: &SessionContext, slice: &Slice) -> InterpretationKey {
        InterpretationKey::new(
            ctx,
            &self.subject_id,
            slice.slice_index,
            self.origin_id.as_deref(),
        )
    }
}

/// Where document text comes from. Absence is not an error.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn document_text(&self, subject_id: &str) -> Option<String>;
}

#[derive(Debug, Default, Clone)]
pub struct BatchReport {
    pub reduced: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<(String, String)>,
}

// =============================================================================
// Request builders
// =============================================================================

pub fn document_request(text: &str, config: &HarnessConfig) -> GenerationRequest {
    DOCUMENT_PROMPT.render(&[("document", text)], config.max_output_tokens)
}

pub fn slice_request(slice: &Slice, total: usize, config: &HarnessConfig) -> GenerationRequest {
    let part = (slice.slice_index.unwrap_or(0) + 1).to_string();
    let parts = total.to_string();
    SLICE_PROMPT.render(
        &[("part", part.as_str()), ("parts", parts.as_str()), ("document", slice.text.as_str())],
        config.max_output_tokens,
    )
}

/// Summary request over slice reports, truncating each part to an equal share
/// of the request budget when the whole would not fit.
pub fn summary_request(
    key: &InterpretationKey,
    children: &[Interpretation],
    config: &HarnessConfig,
) -> Result<GenerationRequest, ReduceError> {
    let sections: Vec<String> = children
        .iter()
        .enumerate()
        .map(|(i, child)| {
            let body = if child.long_text.trim().is_empty() {
                &child.short_text
            } else {
                &child.long_text
            };
            format!("Part {}:\n{}\n\n", i + 1, body)
        })
        .collect();

    let overhead = SUMMARY_PROMPT
        .render(&[("document", "")], config.max_output_tokens)
        .len();
    let available = config.max_request_length.saturating_sub(overhead);
    let total: usize = sections.iter().map(String::len).sum();

    let document = if total <= available || sections.is_empty() {
        sections.concat()
    } else {
        let share = available / sections.len();
        warn!(key = %key.id, total, available, share, "truncating slice reports for summary");
        sections
            .iter()
            .map(|s| truncate_at_char_boundary(s, share))
            .collect::<String>()
    };

    let request = SUMMARY_PROMPT.render(&[("document", document.as_str())], config.max_output_tokens);
    check_budget(key, &request, config)?;
    Ok(request)
}

fn truncate_at_char_boundary(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

fn template_slug(kind: WorkKind) -> &'static str {
    match kind {
        WorkKind::Document => DOCUMENT_PROMPT.slug,
        WorkKind::Slice => SLICE_PROMPT.slug,
        WorkKind::Summary => SUMMARY_PROMPT.slug,
        WorkKind::Actor => ACTOR_PROMPT.slug,
        WorkKind::Cohort => COHORT_PROMPT.slug,
    }
}

fn check_budget(
    key: &InterpretationKey,
    request: &GenerationRequest,
    config: &HarnessConfig,
) -> Result<(), ReduceError> {
    if request.len() > config.max_request_length {
        return Err(ReduceError::BudgetExceeded {
            key: key.id.clone(),
            length: request.len(),
            limit: config.max_request_length,
        });
    }
    Ok(())
}

/// Fixed-count mean of slice scores: every slice counts in the denominator,
/// including slices that scored a category as not applicable.
pub fn reduce_slice_scores(children: &[Interpretation]) -> Result<ScoreMap, StatsError> {
    let mut acc = WeightedScoreMap::new();
    for child in children {
        acc.sum(&child.scores.to_weighted(), 1.0);
    }
    if children.is_empty() {
        return Ok(ScoreMap::new());
    }
    acc.divide(children.len() as f64)?;
    Ok(acc.to_score_map())
}

/// Builds the document-level interpretation from its slices and the summary.
pub fn assemble_document(
    key: &InterpretationKey,
    children: Vec<Interpretation>,
    summary: InterpretationFragment,
    model: ModelMetadata,
) -> Result<Interpretation, StatsError> {
    let scores = reduce_slice_scores(&children)?;
    let mut riders = summary.riders;
    for child in &children {
        for rider in &child.riders {
            if !riders.contains(rider) {
                riders.push(rider.clone());
            }
        }
    }
    Ok(Interpretation {
        id: key.id.clone(),
        subject_id: key.subject_id.clone(),
        slice_index: None,
        origin_id: key.origin_id.clone(),
        scores,
        short_text: summary.short_text,
        long_text: summary.long_text,
        riders,
        generated_title: summary.title,
        metadata: InterpretationMetadata::Document(model),
        children,
    })
}

// =============================================================================
// Reducer
// =============================================================================

pub struct Reducer {
    generator: Arc<dyn Generator>,
    cache: Arc<dyn ObjectCache>,
    config: HarnessConfig,
    trace: Option<Arc<dyn TraceSink>>,
}

impl Reducer {
    pub fn new(
        generator: Arc<dyn Generator>,
        cache: Arc<dyn ObjectCache>,
        config: HarnessConfig,
    ) -> Self {
        Self {
            generator,
            cache,
            config,
            trace: None,
        }
    }

    pub fn with_trace(mut self, trace: Arc<dyn TraceSink>) -> Self {
        self.trace = Some(trace);
        self
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<dyn ObjectCache> {
        &self.cache
    }

    pub async fn reduce(
        &self,
        ctx: &SessionContext,
        doc: &SourceDocument,
    ) -> Result<Interpretation, ReduceError> {
        let key = doc.key(ctx);
        if let Some(found) = self.cache.get(&key).await? {
            self.record(ReductionTrace {
                cached: true,
                ..ReductionTrace::new(&key.id, &key.key_hash, WorkKind::Document)
            });
            return Ok(found);
        }

        let slices = slicer::slice(&doc.subject_id, &doc.text, self.config.max_section_length)?;
        let result = match slices.as_slice() {
            [only] if only.slice_index.is_none() => self.reduce_whole(&key, &doc.text).await,
            _ => self.reduce_sliced(ctx, &key, doc, &slices).await,
        };

        match result {
            Ok(interpretation) => {
                self.cache.put(&key, &interpretation).await?;
                info!(key = %key.id, slices = slices.len(), "document reduced");
                Ok(interpretation)
            }
            Err(err) => {
                error!(key = %key.id, code = err.code(), error = %err, "reduction failed");
                Err(err)
            }
        }
    }

    /// Looks up the text and reduces it.
    pub async fn reduce_from_source(
        &self,
        ctx: &SessionContext,
        subject_id: &str,
        source: &dyn DocumentSource,
    ) -> Result<Interpretation, ReduceError> {
        let text = source
            .document_text(subject_id)
            .await
            .ok_or_else(|| ReduceError::MissingSourceText(subject_id.to_string()))?;
        self.reduce(ctx, &SourceDocument::new(subject_id, text)).await
    }

    /// Reduces each subject in turn. One subject failing never stops the pass.
    pub async fn reduce_batch(
        &self,
        ctx: &SessionContext,
        subject_ids: &[String],
        source: &dyn DocumentSource,
    ) -> BatchReport {
        let mut report = BatchReport::default();
        for subject_id in subject_ids {
            match self.reduce_from_source(ctx, subject_id, source).await {
                Ok(_) => report.reduced.push(subject_id.clone()),
                Err(err) if err.is_recoverable() => {
                    warn!(subject = %subject_id, "no source text; skipping");
                    report.skipped.push(subject_id.clone());
                }
                Err(err) => report.failed.push((subject_id.clone(), err.to_string())),
            }
        }
        info!(
            reduced = report.reduced.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "batch reduction finished"
        );
        report
    }

    /// Narrative interpretation over scores computed elsewhere (actor, cohort).
    /// The response only has to carry text; `scores` are attached as given.
    pub async fn interpret_narrative(
        &self,
        key: &InterpretationKey,
        kind: WorkKind,
        request: &GenerationRequest,
        scores: ScoreMap,
    ) -> Result<Interpretation, ReduceError> {
        if let Some(found) = self.cache.get(key).await? {
            self.record(ReductionTrace {
                cached: true,
                ..ReductionTrace::new(&key.id, &key.key_hash, kind)
            });
            return Ok(found);
        }
        let fragment = self
            .generate_validated(key, kind, request, Validation::Summary)
            .await?;
        let mut interpretation = Interpretation::from_fragment(
            &key.id,
            &key.subject_id,
            None,
            key.origin_id.clone(),
            fragment,
            InterpretationMetadata::Document(self.config.model.metadata()),
        );
        interpretation.scores = scores;
        self.cache.put(key, &interpretation).await?;
        Ok(interpretation)
    }

    async fn reduce_whole(
        &self,
        key: &InterpretationKey,
        text: &str,
    ) -> Result<Interpretation, ReduceError> {
        let request = document_request(text, &self.config);
        let fragment = self
            .generate_validated(key, WorkKind::Document, &request, Validation::Document)
            .await?;
        Ok(Interpretation::from_fragment(
            &key.id,
            &key.subject_id,
            None,
            key.origin_id.clone(),
            fragment,
            InterpretationMetadata::Document(self.config.model.metadata()),
        ))
    }

    async fn reduce_sliced(
        &self,
        ctx: &SessionContext,
        key: &InterpretationKey,
        doc: &SourceDocument,
        slices: &[Slice],
    ) -> Result<Interpretation, ReduceError> {
        if let Some(oversized) = slices.iter().find(|s| s.oversized) {
            return Err(ReduceError::BudgetExceeded {
                key: doc.slice_key(ctx, oversized).id,
                length: oversized.len(),
                limit: self.config.max_section_length,
            });
        }

        let mut children = Vec::with_capacity(slices.len());
        for slice in slices {
            children.push(self.slice_interpretation(ctx, doc, slice, slices.len()).await?);
        }

        let request = summary_request(key, &children, &self.config)?;
        let summary = self
            .generate_validated(key, WorkKind::Summary, &request, Validation::Summary)
            .await?;
        Ok(assemble_document(
            key,
            children,
            summary,
            self.config.model.metadata(),
        )?)
    }

    async fn slice_interpretation(
        &self,
        ctx: &SessionContext,
        doc: &SourceDocument,
        slice: &Slice,
        total: usize,
    ) -> Result<Interpretation, ReduceError> {
        let key = doc.slice_key(ctx, slice);
        if let Some(found) = self.cache.get(&key).await? {
            self.record(ReductionTrace {
                cached: true,
                ..ReductionTrace::new(&key.id, &key.key_hash, WorkKind::Slice)
            });
            return Ok(found);
        }

        let request = slice_request(slice, total, &self.config);
        let fragment = self
            .generate_validated(&key, WorkKind::Slice, &request, Validation::Slice)
            .await?;
        let interpretation = Interpretation::from_fragment(
            &key.id,
            &key.subject_id,
            slice.slice_index,
            key.origin_id.clone(),
            fragment,
            InterpretationMetadata::for_slice(self.config.model.metadata(), slice.slice_index),
        );
        self.cache.put(&key, &interpretation).await?;
        Ok(interpretation)
    }

    /// Generates and parses with a bounded number of attempts. A response that
    /// never validates is a hard failure, never a partial record.
    async fn generate_validated(
        &self,
        key: &InterpretationKey,
        kind: WorkKind,
        request: &GenerationRequest,
        mode: Validation,
    ) -> Result<InterpretationFragment, ReduceError> {
        let mut trace = ReductionTrace::new(&key.id, &key.key_hash, kind);
        trace.prompt_template_slug = Some(template_slug(kind).to_string());
        trace.prompt_length = request.len();

        if let Err(err) = check_budget(key, request, &self.config) {
            trace.error = Some(err.to_string());
            self.record(trace);
            return Err(err);
        }

        let max_attempts = self.config.max_parse_attempts.max(1);
        let mut last = ParseError::MissingShortText;
        for attempt in 1..=max_attempts {
            trace.attempts = attempt;
            let text = match self.generator.generate(request).await {
                Ok(text) => text,
                Err(err) => {
                    trace.error = Some(err.to_string());
                    self.record(trace);
                    return Err(err.into());
                }
            };
            match parser::parse_validated(&text, mode) {
                Ok(fragment) => {
                    self.record(trace);
                    return Ok(fragment);
                }
                Err(reason) => {
                    warn!(key = %key.id, attempt, %reason, "response failed validation");
                    last = reason;
                }
            }
        }

        let err = ReduceError::ParseValidation {
            key: key.id.clone(),
            attempts: max_attempts,
            reason: last,
        };
        trace.error = Some(err.to_string());
        self.record(trace);
        Err(err)
    }

    fn record(&self, event: ReductionTrace) {
        if let Some(trace) = &self.trace {
            if let Err(err) = trace.record(event) {
                warn!(error = %err, "failed to record reduction trace");
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
