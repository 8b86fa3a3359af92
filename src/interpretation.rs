//! Interpretation records and their metadata.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::parser::InterpretationFragment;
use crate::stats::{LetterGrade, ScoreMap};

/// Explicit session scope threaded through key building and aggregation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionContext {
    pub namespace: String,
    pub session: String,
}

impl SessionContext {
    pub fn new(namespace: impl Into<String>, session: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            session: session.into(),
        }
    }

    /// Storage bucket for everything produced in this session.
    pub fn bucket(&self) -> String {
        format!("{}/{}", self.namespace, self.session)
    }
}

/// Who generated an interpretation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelMetadata {
    pub provider: String,
    pub model: String,
    pub prompt_version: u32,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SliceMetadata {
    #[serde(flatten)]
    pub model: ModelMetadata,
    pub slice_index: usize,
}

/// Closed set of metadata shapes. The `@type` discriminants are part of the
/// stored format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "@type")]
pub enum InterpretationMetadata {
    #[serde(rename = "AIInterpretationMetadata")]
    Document(ModelMetadata),
    #[serde(rename = "AISliceInterpretationMetadata")]
    Slice(SliceMetadata),
}

impl InterpretationMetadata {
    pub fn model(&self) -> &ModelMetadata {
        match self {
            Self::Document(m) => m,
            Self::Slice(s) => &s.model,
        }
    }

    pub fn for_slice(model: ModelMetadata, slice_index: Option<usize>) -> Self {
        match slice_index {
            Some(slice_index) => Self::Slice(SliceMetadata { model, slice_index }),
            None => Self::Document(model),
        }
    }
}

/// External commentary an interpretation was derived from (e.g. a news article).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterpretationOrigin {
    pub url: String,
    pub title: Option<String>,
}

impl InterpretationOrigin {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: None,
        }
    }

    /// Short stable id: six alphanumerics of the host plus up to ten characters
    /// of the first path segment. Reddit links use the subreddit.
    pub fn id_hash(&self) -> String {
        let Ok(parsed) = reqwest::Url::parse(&self.url) else {
            let digest = blake3::hash(self.url.as_bytes()).to_hex().to_string();
            return digest.chars().take(10).collect();
        };

        let host = parsed.host_str().unwrap_or("");
        let host = host.strip_prefix("www.").unwrap_or(host);
        let mut segments = parsed
            .path_segments()
            .map(|s| s.filter(|p| !p.is_empty()).collect::<Vec<_>>())
            .unwrap_or_default()
            .into_iter();

        if host.ends_with("reddit.com") {
            if let (Some("r"), Some(sub)) = (segments.next(), segments.next()) {
                return format!("reddit/{sub}");
            }
            return "reddit".to_string();
        }

        let host_part: String = host
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .take(6)
            .collect();
        match segments.next() {
            Some(first) => {
                let path_part: String = first.chars().take(10).collect();
                format!("{host_part}/{path_part}")
            }
            None => host_part,
        }
    }
}

/// A structured assessment of a document, a slice, or a document seen through
/// an external origin. Immutable once stored, apart from cross-reference linking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Interpretation {
    pub id: String,
    pub subject_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slice_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_id: Option<String>,
    pub scores: ScoreMap,
    pub short_text: String,
    pub long_text: String,
    #[serde(default)]
    pub riders: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_title: Option<String>,
    pub metadata: InterpretationMetadata,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Interpretation>,
}

impl Interpretation {
    pub fn from_fragment(
        id: impl Into<String>,
        subject_id: impl Into<String>,
        slice_index: Option<usize>,
        origin_id: Option<String>,
        fragment: InterpretationFragment,
        metadata: InterpretationMetadata,
    ) -> Self {
        Self {
            id: id.into(),
            subject_id: subject_id.into(),
            slice_index,
            origin_id,
            scores: fragment.scores,
            short_text: fragment.short_text,
            long_text: fragment.long_text,
            riders: fragment.riders,
            generated_title: fragment.title,
            metadata,
            children: Vec::new(),
        }
    }

    pub fn rating(&self) -> i32 {
        self.scores.overall().unwrap_or(0)
    }

    pub fn letter_grade(&self) -> LetterGrade {
        self.scores.letter_grade()
    }
}
