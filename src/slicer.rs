//! Structure-aware slicing of oversized documents.
//!
//! # Algorithm
//!
//! 1. **Sections**: cut before `SEC. n` / `SECTION n` / `<section` lines
//! 2. **Paragraphs**: for sections over budget, cut after blank lines
//! 3. **Sentences**: for paragraphs over budget, cut after `. ! ? ;`
//! 4. **Words**: for sentences over budget, cut after whitespace
//! 5. **Greedy packing**: merge adjacent units while the merged span fits
//!
//! Units are byte ranges of the source, so the slices always concatenate back to
//! the original text. A unit that survives every level still over budget (one
//! enormous token) is emitted whole and flagged `oversized`.

use fancy_regex::Regex as FancyRegex;
use once_cell::sync::Lazy;
use regex::Regex;
use std::ops::Range;

static SECTION_START: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^[ \t]*(?:<section\b|SEC\.\s*\d+|SECTION\s+\d+|Sec\.\s*\d+)")
        .expect("Invalid section regex")
});

static PARAGRAPH_BREAK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n[ \t]*\n\s*").expect("Invalid paragraph break regex"));

// fancy-regex for lookbehind
static SENTENCE_END: Lazy<FancyRegex> =
    Lazy::new(|| FancyRegex::new(r"(?<=[.!?;])\s+").expect("Invalid sentence end regex"));

static WORD_BREAK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").expect("Invalid word break regex"));

#[derive(Debug, thiserror::Error)]
pub enum SliceError {
    #[error("slice budget must be positive")]
    ZeroBudget,
}

/// A contiguous excerpt of a parent document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slice {
    pub parent_id: String,
    /// `None` when the document fit and no slicing occurred.
    pub slice_index: Option<usize>,
    pub start_offset: usize,
    pub end_offset: usize,
    pub text: String,
    /// Longer than the budget because no boundary could split it further.
    pub oversized: bool,
}

impl Slice {
    pub fn len(&self) -> usize {
        self.end_offset - self.start_offset
    }

    pub fn is_empty(&self) -> bool {
        self.start_offset == self.end_offset
    }
}

#[derive(Debug, Clone, Copy)]
enum Boundary {
    Section,
    Paragraph,
    Sentence,
    Word,
}

const LEVELS: [Boundary; 4] = [
    Boundary::Section,
    Boundary::Paragraph,
    Boundary::Sentence,
    Boundary::Word,
];

/// Splits `text` into slices no longer than `max_length` bytes where possible.
pub fn slice(parent_id: &str, text: &str, max_length: usize) -> Result<Vec<Slice>, SliceError> {
    if max_length == 0 {
        return Err(SliceError::ZeroBudget);
    }

    if text.len() <= max_length {
        return Ok(vec![Slice {
            parent_id: parent_id.to_string(),
            slice_index: None,
            start_offset: 0,
            end_offset: text.len(),
            text: text.to_string(),
            oversized: false,
        }]);
    }

    let mut units = Vec::new();
    subdivide(text, 0..text.len(), 0, max_length, &mut units);

    let slices = pack(&units, max_length)
        .into_iter()
        .enumerate()
        .map(|(index, range)| Slice {
            parent_id: parent_id.to_string(),
            slice_index: Some(index),
            start_offset: range.start,
            end_offset: range.end,
            oversized: range.len() > max_length,
            text: text[range].to_string(),
        })
        .collect();
    Ok(slices)
}

/// Appends the units of `range` to `out`, descending boundary levels until each
/// unit fits or no level can split it.
fn subdivide(
    text: &str,
    range: Range<usize>,
    level: usize,
    max_length: usize,
    out: &mut Vec<Range<usize>>,
) {
    if range.len() <= max_length || level >= LEVELS.len() {
        out.push(range);
        return;
    }

    let span = &text[range.clone()];
    let cuts: Vec<usize> = cut_points(LEVELS[level], span)
        .into_iter()
        .filter(|c| *c > 0 && *c < span.len())
        .map(|c| range.start + c)
        .collect();

    let mut start = range.start;
    for cut in cuts.into_iter().chain(std::iter::once(range.end)) {
        if cut > start {
            subdivide(text, start..cut, level + 1, max_length, out);
            start = cut;
        }
    }
}

/// Relative byte offsets where `span` may be cut at the given level.
fn cut_points(boundary: Boundary, span: &str) -> Vec<usize> {
    match boundary {
        Boundary::Section => SECTION_START.find_iter(span).map(|m| m.start()).collect(),
        Boundary::Paragraph => PARAGRAPH_BREAK.find_iter(span).map(|m| m.end()).collect(),
        Boundary::Sentence => SENTENCE_END
            .find_iter(span)
            .filter_map(|m| m.ok())
            .map(|m| m.end())
            .collect(),
        Boundary::Word => WORD_BREAK.find_iter(span).map(|m| m.end()).collect(),
    }
}

/// Greedy packing of contiguous units.
fn pack(units: &[Range<usize>], max_length: usize) -> Vec<Range<usize>> {
    let mut packed: Vec<Range<usize>> = Vec::new();
    let mut current: Option<Range<usize>> = None;

    for unit in units {
        current = match current {
            None => Some(unit.clone()),
            Some(cur) if unit.end - cur.start <= max_length => Some(cur.start..unit.end),
            Some(cur) => {
                packed.push(cur);
                Some(unit.clone())
            }
        };
    }
    if let Some(cur) = current {
        packed.push(cur);
    }
    packed
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn joined(slices: &[Slice]) -> String {
        slices.iter().map(|s| s.text.as_str()).collect()
    }

    #[test]
    fn fitting_document_is_not_sliced() {
        let slices = slice("doc", "short text", 100).unwrap();
        assert_eq!(slices.len(), 1);
        assert_eq!(slices[0].slice_index, None);
    }

    #[test]
    fn prefers_section_boundaries() {
        let a = format!("SEC. 1. Short title.\n{}\n", "a".repeat(30));
        let b = format!("SEC. 2. Definitions.\n{}\n", "b".repeat(30));
        let text = format!("{a}{b}");
        let slices = slice("doc", &text, a.len().max(b.len()) + 5).unwrap();
        assert_eq!(slices.len(), 2);
        assert!(slices[1].text.starts_with("SEC. 2."));
        assert_eq!(joined(&slices), text);
    }

    #[test]
    fn falls_back_to_words_inside_long_sentence() {
        let text = "word ".repeat(50);
        let slices = slice("doc", &text, 22).unwrap();
        assert!(slices.iter().all(|s| s.len() <= 22 && !s.oversized));
        assert_eq!(joined(&slices), text);
    }

    #[test]
    fn indivisible_unit_is_flagged_not_truncated() {
        let long_token = "x".repeat(40);
        let text = format!("tiny. {long_token} end.");
        let slices = slice("doc", &text, 10).unwrap();
        let flagged: Vec<_> = slices.iter().filter(|s| s.oversized).collect();
        assert_eq!(flagged.len(), 1);
        assert!(flagged[0].text.contains(&long_token));
        assert_eq!(joined(&slices), text);
    }

    #[test]
    fn zero_budget_is_rejected() {
        assert!(matches!(slice("doc", "abc", 0), Err(SliceError::ZeroBudget)));
    }
}
