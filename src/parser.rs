//! Line scanner that recovers a structured interpretation from generated text.
//!
//! The generator's formatting is not reliable, so the scanner never fails:
//! unrecognized lines are skipped. Structural requirements are enforced
//! afterwards by [`validate`].

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::issues::IssueCategory;
use crate::stats::ScoreMap;

/// Topical categories that must be present before zero-scrubbing kicks in.
const SCRUB_MIN_PRESENT: usize = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseState {
    Scores,
    Title,
    ListField,
    ShortText,
    LongText,
    None,
}

fn header(names: &str) -> Regex {
    Regex::new(&format!(
        r"(?i)^[\s#>*_]*(?:{names})[\s*_]*:[\s*_]*(?P<inline>.*)$"
    ))
    .expect("Invalid header regex")
}

static HEADERS: Lazy<Vec<(ParseState, Regex)>> = Lazy::new(|| {
    vec![
        (ParseState::Scores, header(r"stats|scores")),
        (ParseState::Title, header(r"(?:bill\s+)?title")),
        (ParseState::ListField, header(r"riders")),
        (ParseState::ShortText, header(r"short\s+report|summary")),
        (ParseState::LongText, header(r"long\s+report|detailed\s+report")),
    ]
});

static SCORE_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^[\s*_\-]*(?P<label>[a-z][a-z ,&]*?)[\s*_]*:[\s*_]*(?P<value>[+-]?\d+(?:\.\d+)?|n/?a)(?:[\s*_.,;:)/!].*)?$",
    )
    .expect("Invalid score line regex")
});

static LIST_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:[-*•]\s+|\d+[.)]\s+)").expect("Invalid list prefix regex")
});

// =============================================================================
// Fragment
// =============================================================================

/// Everything the scanner could recover from one response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterpretationFragment {
    pub scores: ScoreMap,
    pub title: Option<String>,
    pub riders: Vec<String>,
    pub short_text: String,
    pub long_text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validation {
    /// Whole document: overall score and both texts.
    Document,
    /// One slice: overall score and the short text.
    Slice,
    /// Summary over slices: both texts. Scores come from the slice reduction.
    Summary,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("missing overall benefit score")]
    MissingOverall,
    #[error("missing short text")]
    MissingShortText,
    #[error("missing long text")]
    MissingLongText,
}

pub fn validate(fragment: &InterpretationFragment, mode: Validation) -> Result<(), ParseError> {
    let needs_overall = matches!(mode, Validation::Document | Validation::Slice);
    let needs_long = matches!(mode, Validation::Document | Validation::Summary);

    if needs_overall && fragment.scores.overall().is_none() {
        return Err(ParseError::MissingOverall);
    }
    if fragment.short_text.trim().is_empty() {
        return Err(ParseError::MissingShortText);
    }
    if needs_long && fragment.long_text.trim().is_empty() {
        return Err(ParseError::MissingLongText);
    }
    Ok(())
}

/// Parse then validate.
pub fn parse_validated(
    text: &str,
    mode: Validation,
) -> Result<InterpretationFragment, ParseError> {
    let fragment = parse(text);
    validate(&fragment, mode)?;
    Ok(fragment)
}

// =============================================================================
// Scanner
// =============================================================================

pub fn parse(text: &str) -> InterpretationFragment {
    let mut scanner = Scanner::default();
    for line in text.lines() {
        scanner.feed(line.trim_end());
    }
    scanner.finish()
}

struct Scanner {
    state: ParseState,
    scores: ScoreMap,
    title: Option<String>,
    riders: Vec<String>,
    short_lines: Vec<String>,
    long_lines: Vec<String>,
}

impl Default for Scanner {
    fn default() -> Self {
        Self {
            state: ParseState::None,
            scores: ScoreMap::new(),
            title: None,
            riders: Vec::new(),
            short_lines: Vec::new(),
            long_lines: Vec::new(),
        }
    }
}

impl Scanner {
    fn feed(&mut self, line: &str) {
        for (state, pattern) in HEADERS.iter() {
            if let Some(caps) = pattern.captures(line) {
                self.state = *state;
                let inline = caps.name("inline").map(|m| m.as_str().trim()).unwrap_or("");
                if !inline.is_empty() {
                    self.consume(inline);
                }
                return;
            }
        }
        self.consume(line);
    }

    fn consume(&mut self, line: &str) {
        match self.state {
            ParseState::Scores => self.consume_score(line),
            ParseState::Title => {
                let cleaned = line.trim().trim_matches(|c: char| c == '*' || c == '#' || c == '_');
                if self.title.is_none() && !cleaned.trim().is_empty() {
                    self.title = Some(cleaned.trim().to_string());
                }
            }
            ParseState::ListField => {
                let item = LIST_PREFIX.replace(line, "");
                let item = item.trim();
                if !item.is_empty() && !item.eq_ignore_ascii_case("none") {
                    self.riders.push(item.to_string());
                }
            }
            ParseState::ShortText => self.short_lines.push(line.to_string()),
            ParseState::LongText => self.long_lines.push(line.to_string()),
            ParseState::None => {}
        }
    }

    fn consume_score(&mut self, line: &str) {
        let Some(caps) = SCORE_LINE.captures(line) else {
            return;
        };
        let Some(category) = caps
            .name("label")
            .and_then(|m| IssueCategory::from_label(m.as_str()))
        else {
            return;
        };
        let raw = caps.name("value").map(|m| m.as_str()).unwrap_or("");
        if raw.eq_ignore_ascii_case("na") || raw.eq_ignore_ascii_case("n/a") {
            self.scores.remove(category);
            return;
        }
        if let Ok(value) = raw.parse::<f64>() {
            self.scores.set(category, value.round() as i32);
        }
    }

    fn finish(mut self) -> InterpretationFragment {
        scrub_placeholder_zeros(&mut self.scores);
        InterpretationFragment {
            scores: self.scores,
            title: self.title,
            riders: self.riders,
            short_text: self.short_lines.join("\n").trim().to_string(),
            long_text: self.long_lines.join("\n").trim().to_string(),
        }
    }
}

/// A response that scores nearly every category with several exact zeros
/// has filled in placeholders instead of answering "not applicable".
fn scrub_placeholder_zeros(scores: &mut ScoreMap) {
    let present: Vec<IssueCategory> = IssueCategory::topical()
        .filter(|c| scores.contains(*c))
        .collect();
    let zeros: Vec<IssueCategory> = present
        .iter()
        .copied()
        .filter(|c| scores.get(*c) == Some(0))
        .collect();
    if present.len() >= SCRUB_MIN_PRESENT && zeros.len() > 1 {
        warn!(
            present = present.len(),
            zeros = zeros.len(),
            "response scored placeholder zeros; treating them as not applicable"
        );
        for c in zeros {
            scores.remove(c);
        }
    }
}

// =============================================================================
// Rendering
// =============================================================================

/// Renders a fragment in the layout the scanner reads. Absent categories are
/// written as `N/A`.
pub fn render(fragment: &InterpretationFragment) -> String {
    let mut out = String::from("Stats:\n");
    for category in IssueCategory::ALL {
        match fragment.scores.get(category) {
            Some(v) => out.push_str(&format!("{}: {:+}\n", category.label(), v)),
            None => out.push_str(&format!("{}: N/A\n", category.label())),
        }
    }
    if let Some(title) = &fragment.title {
        out.push_str(&format!("\nBill Title: {title}\n"));
    }
    out.push_str("\nRiders:\n");
    if fragment.riders.is_empty() {
        out.push_str("- None\n");
    }
    for rider in &fragment.riders {
        out.push_str(&format!("- {rider}\n"));
    }
    out.push_str(&format!("\nShort Report:\n{}\n", fragment.short_text));
    out.push_str(&format!("\nLong Report:\n{}\n", fragment.long_text));
    out
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_tolerate_emphasis_and_inline_values() {
        let text = "**Bill Title:** Clean Water Act\n## Short Report: Protects rivers.\n";
        let f = parse(text);
        assert_eq!(f.title.as_deref(), Some("Clean Water Act"));
        assert_eq!(f.short_text, "Protects rivers.");
    }

    #[test]
    fn unknown_lines_are_skipped() {
        let text = "Stats:\nAstrology: +40\nEnergy: +12 (modest)\nnonsense line\n";
        let f = parse(text);
        assert_eq!(f.scores.len(), 1);
        assert_eq!(f.scores.get(IssueCategory::Energy), Some(12));
    }

    #[test]
    fn decimals_round_and_na_is_absent() {
        let f = parse("Scores:\nHousing: -3.6\nEducation: n/a\nEnergy: NA\n");
        assert_eq!(f.scores.get(IssueCategory::Housing), Some(-4));
        assert!(!f.scores.contains(IssueCategory::Education));
        assert!(!f.scores.contains(IssueCategory::Energy));
    }

    #[test]
    fn riders_strip_prefixes_and_drop_none() {
        let f = parse("Riders:\n- Funding for a bridge\n2. Tax carve-out\n- None\n");
        assert_eq!(f.riders, vec!["Funding for a bridge", "Tax carve-out"]);
    }

    #[test]
    fn placeholder_zeros_are_scrubbed() {
        let mut text = String::from("Stats:\n");
        for (i, c) in IssueCategory::ALL.iter().enumerate() {
            let v = if i < 3 { 0 } else { 10 };
            text.push_str(&format!("{}: {}\n", c.label(), v));
        }
        let f = parse(&text);
        assert!(!f.scores.contains(IssueCategory::AgricultureAndFood));
        assert!(!f.scores.contains(IssueCategory::Transportation));
        assert_eq!(f.scores.overall(), Some(10));
        assert_eq!(f.scores.len(), 14);
    }

    #[test]
    fn validation_modes() {
        let mut f = InterpretationFragment {
            short_text: "short".into(),
            ..Default::default()
        };
        assert_eq!(validate(&f, Validation::Slice), Err(ParseError::MissingOverall));
        assert_eq!(
            validate(&f, Validation::Summary),
            Err(ParseError::MissingLongText)
        );
        f.scores.set(IssueCategory::OVERALL, 5);
        assert!(validate(&f, Validation::Slice).is_ok());
        assert_eq!(
            validate(&f, Validation::Document),
            Err(ParseError::MissingLongText)
        );
        f.long_text = "long".into();
        assert!(validate(&f, Validation::Document).is_ok());
    }
}
