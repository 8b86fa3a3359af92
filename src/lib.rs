#![forbid(unsafe_code)]

//! # legiscore
//!
//! Turns legislative text into structured, scored interpretations.
//!
//! A language model reads each bill (or each slice of a long bill) and reports
//! a signed score per policy issue plus short and long narratives. Slice
//! results are reduced into one document interpretation, and document
//! interpretations are aggregated upward into legislators and parties.
//! Every unit of work is keyed deterministically in a content-addressed
//! cache, so reruns only issue the requests that are still missing.

pub mod aggregate;
pub mod batch;
pub mod cache;
pub mod config;
pub mod generation;
pub mod impact;
pub mod interpretation;
pub mod issues;
pub mod parser;
pub mod prompts;
pub mod reducer;
pub mod slicer;
pub mod stats;
pub mod trace;

pub use cache::{InterpretationKey, ObjectCache, SqliteObjectCache, TieredCache};
pub use config::HarnessConfig;
pub use generation::{GenerationError, GenerationRequest, Generator};
pub use interpretation::{Interpretation, SessionContext};
pub use issues::IssueCategory;
pub use reducer::{BatchReport, DocumentSource, ReduceError, Reducer, SourceDocument};
pub use stats::{LetterGrade, ScoreMap, WeightedScoreMap};
pub use trace::{JsonlTraceSink, ReductionTrace, TraceSink, TraceWorker};
