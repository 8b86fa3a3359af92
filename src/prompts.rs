//! Prompt templates for every kind of interpretation request.
//!
//! Templates use `{name}` placeholders. `{issues}` is always filled with the
//! taxonomy so the scanner in [`crate::parser`] sees the labels it expects.

use crate::generation::GenerationRequest;
use crate::issues::IssueCategory;
use crate::stats::LetterGrade;

// =============================================================================
// Prompt templates
// =============================================================================

#[derive(Debug, Clone, Copy)]
pub struct PromptTemplate {
    pub slug: &'static str,
    pub system: &'static str,
    pub user: &'static str,
}

impl PromptTemplate {
    /// Fills placeholders and produces a request.
    pub fn render(&self, vars: &[(&str, &str)], max_tokens: u32) -> GenerationRequest {
        let issues = issue_list();
        let fill = |template: &str| {
            let mut out = template.replace("{issues}", &issues);
            for (name, value) in vars {
                out = out.replace(&format!("{{{name}}}"), value);
            }
            out
        };
        GenerationRequest::new(fill(self.system), fill(self.user), max_tokens)
    }
}

/// One `-Label: ` line per category, in taxonomy order.
pub fn issue_list() -> String {
    IssueCategory::ALL
        .iter()
        .map(|c| format!("-{}:", c.label()))
        .collect::<Vec<_>>()
        .join("\n")
}

pub const DOCUMENT_PROMPT: PromptTemplate = PromptTemplate {
    slug: "document_v0",
    system: r#"You are a non-partisan policy analyst. Score the legislation below for its expected impact on each of the following issues. Scores are integers from -100 (very harmful) to +100 (very beneficial). Write N/A for issues the legislation does not touch.

Respond in exactly this layout:

Stats:
{issues}

Bill Title: <a short descriptive title>

Riders:
- <provisions unrelated to the bill's main purpose, or "None">

Short Report:
<one paragraph summary>

Long Report:
<several paragraphs of detailed analysis>"#,
    user: "{document}",
};

pub const SLICE_PROMPT: PromptTemplate = PromptTemplate {
    slug: "slice_v0",
    system: r#"You are a non-partisan policy analyst. The text below is part {part} of {parts} of a longer piece of legislation. Score this part for its expected impact on each of the following issues, as integers from -100 to +100, or N/A where the part does not touch the issue.

Respond in exactly this layout:

Stats:
{issues}

Short Report:
<one paragraph summary of this part>

Long Report:
<detailed analysis of this part>"#,
    user: "{document}",
};

pub const SUMMARY_PROMPT: PromptTemplate = PromptTemplate {
    slug: "summary_v0",
    system: r#"You are a non-partisan policy analyst. The text below contains analyses of consecutive parts of one piece of legislation. Combine them into a single assessment of the whole bill.

Respond in exactly this layout:

Bill Title: <a short descriptive title>

Riders:
- <provisions unrelated to the bill's main purpose, or "None">

Short Report:
<one paragraph summary>

Long Report:
<several paragraphs of detailed analysis>"#,
    user: "{document}",
};

pub const ACTOR_PROMPT: PromptTemplate = PromptTemplate {
    slug: "actor_v0",
    system: r#"You are writing a {analysis_type} of a legislator's record, using the issue scores and legislative history provided. Focus on {behavior}. Cite specific bills by name.

Respond in exactly this layout:

Short Report:
<one paragraph>

Long Report:
<several paragraphs>"#,
    user: r#"Legislator: {name}
Grade: {grade}

Scores:
{scores}

Legislative history:
{history}"#,
};

pub const COHORT_PROMPT: PromptTemplate = PromptTemplate {
    slug: "cohort_v0",
    system: r#"You are writing a {analysis_type} of a group of legislators for one session, using the aggregate issue scores, the best and worst bills they supported, and their best and worst members. Focus on {behavior}.

Respond in exactly this layout:

Short Report:
<one paragraph>

Long Report:
<several paragraphs>"#,
    user: r#"Group: {name}
Grade: {grade}

Scores:
{scores}

{sections}"#,
};

pub const PROMPTS: &[PromptTemplate] = &[
    DOCUMENT_PROMPT,
    SLICE_PROMPT,
    SUMMARY_PROMPT,
    ACTOR_PROMPT,
    COHORT_PROMPT,
];

pub fn prompt_by_slug(slug: &str) -> Option<PromptTemplate> {
    PROMPTS.iter().find(|t| t.slug == slug).copied()
}

/// Narrative framing for a grade: (analysis type, behaviour to focus on).
pub fn grade_wording(grade: LetterGrade) -> (&'static str, &'static str) {
    match grade {
        LetterGrade::A | LetterGrade::B => ("endorsement", "specific accomplishments"),
        LetterGrade::C | LetterGrade::D => (
            "mixed analysis",
            "specific accomplishments or alarming behaviour",
        ),
        LetterGrade::F => ("harsh critique", "alarming behaviour"),
    }
}

// =============================================================================
// TESTS
// =============================================================================
