//! Offline batch mode.
//!
//! Requests are written to JSONL files in token-bounded blocks, submitted out of
//! band, and the responses reconciled back into the cache. Every line is handled
//! on its own: a bad row is reported and re-emitted, the rest still import.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tiktoken_rs::{cl100k_base, CoreBPE};
use tracing::{debug, info, warn};

use crate::cache::{CacheError, InterpretationKey, ObjectCache};
use crate::config::HarnessConfig;
use crate::generation::GenerationRequest;
use crate::interpretation::{Interpretation, InterpretationMetadata, SessionContext};
use crate::parser::{self, Validation};
use crate::reducer::{
    assemble_document, document_request, slice_request, summary_request, ReduceError,
    SourceDocument,
};
use crate::slicer;

pub const UNPROCESSED_FILE: &str = "unprocessed.jsonl";

static BPE: Lazy<Option<CoreBPE>> = Lazy::new(|| cl100k_base().ok());

/// Token estimate used to size request blocks. Falls back to bytes / 4 when
/// the tokenizer is unavailable.
pub fn count_tokens(text: &str) -> usize {
    match BPE.as_ref() {
        Some(bpe) => bpe.encode_with_special_tokens(text).len(),
        None => text.len().div_ceil(4),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
    #[error("planning failed: {0}")]
    Plan(#[from] ReduceError),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> BatchError + '_ {
    move |source| BatchError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// One request line: `{"id", "systemPrompt", "userPrompt", "maxTokens"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRequest {
    pub id: String,
    #[serde(flatten)]
    pub request: GenerationRequest,
}

/// One response line. `error` is whatever the provider reported for the row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResponse {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<serde_json::Value>,
}

// =============================================================================
// Writer
// =============================================================================

/// Writes `{stem}-{n}.jsonl` files, starting a new one once the current block
/// reaches `block_tokens`.
pub struct BatchWriter {
    dir: PathBuf,
    stem: String,
    block_tokens: usize,
    current: Option<BufWriter<File>>,
    current_tokens: usize,
    files: Vec<PathBuf>,
    written: usize,
}

impl BatchWriter {
    pub fn new(dir: impl Into<PathBuf>, stem: impl Into<String>, block_tokens: usize) -> Self {
        Self {
            dir: dir.into(),
            stem: stem.into(),
            block_tokens: block_tokens.max(1),
            current: None,
            current_tokens: 0,
            files: Vec::new(),
            written: 0,
        }
    }

    pub fn write(&mut self, request: &BatchRequest) -> Result<(), BatchError> {
        if self.current.is_none() {
            self.open_next()?;
        }
        let line = serde_json::to_string(request)?;
        let path = self.files.last().cloned().unwrap_or_default();
        if let Some(out) = self.current.as_mut() {
            writeln!(out, "{line}").map_err(io_err(&path))?;
        }
        self.written += 1;
        self.current_tokens += count_tokens(&request.request.system)
            + count_tokens(&request.request.user);
        if self.current_tokens >= self.block_tokens {
            self.close_current()?;
        }
        Ok(())
    }

    pub fn written(&self) -> usize {
        self.written
    }

    /// Flushes and returns every file written, in order.
    pub fn finish(mut self) -> Result<Vec<PathBuf>, BatchError> {
        self.close_current()?;
        Ok(self.files)
    }

    fn open_next(&mut self) -> Result<(), BatchError> {
        std::fs::create_dir_all(&self.dir).map_err(io_err(&self.dir))?;
        let path = self
            .dir
            .join(format!("{}-{}.jsonl", self.stem, self.files.len()));
        let file = File::create(&path).map_err(io_err(&path))?;
        debug!(path = %path.display(), "opened batch block");
        self.current = Some(BufWriter::new(file));
        self.current_tokens = 0;
        self.files.push(path);
        Ok(())
    }

    fn close_current(&mut self) -> Result<(), BatchError> {
        if let Some(mut out) = self.current.take() {
            let path = self.files.last().cloned().unwrap_or_default();
            out.flush().map_err(io_err(&path))?;
        }
        Ok(())
    }
}

// =============================================================================
// Planner
// =============================================================================

/// Decides which requests a document still needs, reading the cache the same
/// way the online reducer does.
pub struct BatchPlanner<'a> {
    cache: &'a dyn ObjectCache,
    config: &'a HarnessConfig,
}

impl<'a> BatchPlanner<'a> {
    pub fn new(cache: &'a dyn ObjectCache, config: &'a HarnessConfig) -> Self {
        Self { cache, config }
    }

    /// Requests still missing for `doc`: nothing if it is stored, the whole
    /// document if it fits, otherwise the uncached slices, or the summary once
    /// every slice is stored.
    pub async fn plan(
        &self,
        ctx: &SessionContext,
        doc: &SourceDocument,
    ) -> Result<Vec<BatchRequest>, BatchError> {
        let key = doc.key(ctx);
        if self.cache.exists(&key).await? {
            return Ok(Vec::new());
        }

        let slices = slicer::slice(&doc.subject_id, &doc.text, self.config.max_section_length)
            .map_err(ReduceError::from)?;
        if let [only] = slices.as_slice() {
            if only.slice_index.is_none() {
                let request = document_request(&doc.text, self.config);
                return Ok(vec![BatchRequest { id: key.id, request }]);
            }
        }
        if let Some(oversized) = slices.iter().find(|s| s.oversized) {
            return Err(ReduceError::BudgetExceeded {
                key: doc.slice_key(ctx, oversized).id,
                length: oversized.len(),
                limit: self.config.max_section_length,
            }
            .into());
        }

        let mut missing = Vec::new();
        let mut children = Vec::with_capacity(slices.len());
        for slice in &slices {
            let slice_key = doc.slice_key(ctx, slice);
            match self.cache.get(&slice_key).await? {
                Some(child) => children.push(child),
                None => missing.push(BatchRequest {
                    id: slice_key.id,
                    request: slice_request(slice, slices.len(), self.config),
                }),
            }
        }
        if !missing.is_empty() {
            return Ok(missing);
        }

        let request = summary_request(&key, &children, self.config)?;
        Ok(vec![BatchRequest { id: key.id, request }])
    }

    /// Plans every document into `writer`. Documents that cannot be planned
    /// are logged and left out.
    pub async fn write_all(
        &self,
        ctx: &SessionContext,
        docs: &[SourceDocument],
        writer: &mut BatchWriter,
    ) -> Result<usize, BatchError> {
        let mut planned = 0;
        for doc in docs {
            match self.plan(ctx, doc).await {
                Ok(requests) => {
                    for request in &requests {
                        writer.write(request)?;
                    }
                    planned += requests.len();
                }
                Err(BatchError::Plan(err)) => {
                    warn!(subject = %doc.subject_id, code = err.code(), error = %err, "cannot plan document");
                }
                Err(err) => return Err(err),
            }
        }
        info!(planned, "batch planned");
        Ok(planned)
    }
}

// =============================================================================
// Importer
// =============================================================================

/// A response line that could not be imported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRowError {
    pub line: usize,
    pub id: Option<String>,
    pub reason: String,
}

#[derive(Debug, Default, Clone)]
pub struct ImportReport {
    pub imported: usize,
    pub skipped: usize,
    pub failed: Vec<BatchRowError>,
    /// Requests for the failed rows, ready to resubmit.
    pub unprocessed_path: Option<PathBuf>,
}

enum RowOutcome {
    Imported,
    Skipped,
}

pub struct BatchImporter<'a> {
    cache: &'a dyn ObjectCache,
    config: &'a HarnessConfig,
    ctx: &'a SessionContext,
}

impl<'a> BatchImporter<'a> {
    pub fn new(
        cache: &'a dyn ObjectCache,
        config: &'a HarnessConfig,
        ctx: &'a SessionContext,
    ) -> Self {
        Self { cache, config, ctx }
    }

    /// Imports `responses`. Requests for rows that failed are looked up in
    /// `requests` and written to `out_dir/unprocessed.jsonl`.
    pub async fn import(
        &self,
        responses: &Path,
        requests: &[PathBuf],
        out_dir: &Path,
    ) -> Result<ImportReport, BatchError> {
        let file = File::open(responses).map_err(io_err(responses))?;
        let mut report = ImportReport::default();

        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(io_err(responses))?;
            if line.trim().is_empty() {
                continue;
            }
            match self.import_line(idx + 1, &line).await {
                Ok(RowOutcome::Imported) => report.imported += 1,
                Ok(RowOutcome::Skipped) => report.skipped += 1,
                Err(row) => {
                    warn!(line = row.line, id = row.id.as_deref().unwrap_or(""), reason = %row.reason, "batch row failed");
                    report.failed.push(row);
                }
            }
        }

        if !report.failed.is_empty() {
            report.unprocessed_path = self.write_unprocessed(&report.failed, requests, out_dir)?;
        }
        info!(
            imported = report.imported,
            skipped = report.skipped,
            failed = report.failed.len(),
            "batch import finished"
        );
        Ok(report)
    }

    async fn import_line(&self, line: usize, raw: &str) -> Result<RowOutcome, BatchRowError> {
        let fail = |id: Option<&str>, reason: String| BatchRowError {
            line,
            id: id.map(str::to_string),
            reason,
        };

        let response: BatchResponse =
            serde_json::from_str(raw).map_err(|e| fail(None, format!("malformed line: {e}")))?;
        let id = response.id.as_str();
        if let Some(error) = &response.error {
            return Err(fail(Some(id), format!("provider error: {error}")));
        }
        let text = response
            .response_text
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| fail(Some(id), "empty response".to_string()))?;

        let key = InterpretationKey::from_id(self.ctx, id);
        let cached = self
            .cache
            .exists(&key)
            .await
            .map_err(|e| fail(Some(id), e.to_string()))?;
        if cached {
            return Ok(RowOutcome::Skipped);
        }

        let interpretation = self
            .interpret(&key, text)
            .await
            .map_err(|reason| fail(Some(id), reason))?;
        self.cache
            .put(&key, &interpretation)
            .await
            .map_err(|e| fail(Some(id), e.to_string()))?;
        Ok(RowOutcome::Imported)
    }

    /// Slice keys parse as slices. A document key whose slices are stored is a
    /// summary response; otherwise it is a whole-document response.
    async fn interpret(&self, key: &InterpretationKey, text: &str) -> Result<Interpretation, String> {
        let model = self.config.model.metadata();
        if key.slice_index.is_some() {
            let fragment = parser::parse_validated(text, Validation::Slice).map_err(|e| e.to_string())?;
            return Ok(Interpretation::from_fragment(
                &key.id,
                &key.subject_id,
                key.slice_index,
                key.origin_id.clone(),
                fragment,
                InterpretationMetadata::for_slice(model, key.slice_index),
            ));
        }

        let children = self.stored_slices(key).await.map_err(|e| e.to_string())?;
        if children.is_empty() {
            let fragment =
                parser::parse_validated(text, Validation::Document).map_err(|e| e.to_string())?;
            return Ok(Interpretation::from_fragment(
                &key.id,
                &key.subject_id,
                None,
                key.origin_id.clone(),
                fragment,
                InterpretationMetadata::Document(model),
            ));
        }

        let fragment = parser::parse_validated(text, Validation::Summary).map_err(|e| e.to_string())?;
        assemble_document(key, children, fragment, model).map_err(|e| e.to_string())
    }

    async fn stored_slices(&self, key: &InterpretationKey) -> Result<Vec<Interpretation>, CacheError> {
        let mut children = Vec::new();
        loop {
            let slice_key = InterpretationKey::new(
                self.ctx,
                &key.subject_id,
                Some(children.len()),
                key.origin_id.as_deref(),
            );
            match self.cache.get(&slice_key).await? {
                Some(child) => children.push(child),
                None => return Ok(children),
            }
        }
    }

    fn write_unprocessed(
        &self,
        failed: &[BatchRowError],
        requests: &[PathBuf],
        out_dir: &Path,
    ) -> Result<Option<PathBuf>, BatchError> {
        let wanted: HashSet<&str> = failed.iter().filter_map(|f| f.id.as_deref()).collect();
        if wanted.is_empty() || requests.is_empty() {
            return Ok(None);
        }

        let mut found: HashMap<String, BatchRequest> = HashMap::new();
        for path in requests {
            let file = File::open(path).map_err(io_err(path))?;
            for line in BufReader::new(file).lines() {
                let line = line.map_err(io_err(path))?;
                if line.trim().is_empty() {
                    continue;
                }
                let request: BatchRequest = serde_json::from_str(&line)?;
                if wanted.contains(request.id.as_str()) {
                    found.insert(request.id.clone(), request);
                }
            }
        }
        if found.is_empty() {
            return Ok(None);
        }

        std::fs::create_dir_all(out_dir).map_err(io_err(out_dir))?;
        let path = out_dir.join(UNPROCESSED_FILE);
        let file = File::create(&path).map_err(io_err(&path))?;
        let mut out = BufWriter::new(file);
        for row in failed {
            let Some(request) = row.id.as_deref().and_then(|id| found.remove(id)) else {
                continue;
            };
            writeln!(out, "{}", serde_json::to_string(&request)?).map_err(io_err(&path))?;
        }
        out.flush().map_err(io_err(&path))?;
        Ok(Some(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_line_uses_wire_names() {
        let line = BatchRequest {
            id: "BIL/hr/1#0".into(),
            request: GenerationRequest::new("sys", "user", 100),
        };
        let json = serde_json::to_value(&line).unwrap();
        assert_eq!(json["id"], "BIL/hr/1#0");
        assert_eq!(json["systemPrompt"], "sys");
        assert_eq!(json["userPrompt"], "user");
        let back: BatchRequest = serde_json::from_value(json).unwrap();
        assert_eq!(back, line);
    }

    #[test]
    fn response_line_accepts_missing_fields() {
        let r: BatchResponse = serde_json::from_str(r#"{"id":"x"}"#).unwrap();
        assert!(r.response_text.is_none());
        assert!(r.error.is_none());
        let r: BatchResponse =
            serde_json::from_str(r#"{"id":"x","error":{"code":500}}"#).unwrap();
        assert!(r.error.is_some());
    }

    #[test]
    fn token_count_is_positive_for_text() {
        assert!(count_tokens("the quick brown fox") > 0);
        assert_eq!(count_tokens(""), 0);
    }
}
