//! Cosmetic cross-reference pass: turns mentions of known documents in long
//! text into markdown links.

use regex::{Regex, RegexBuilder};
use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::interpretation::Interpretation;

static EXISTING_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[[^\]]*\]\([^)]*\)").expect("Invalid markdown link regex"));

/// A document that may be mentioned by name or id.
#[derive(Debug, Clone)]
pub struct DocumentReference {
    pub names: Vec<String>,
    pub url: String,
}

pub struct Linker {
    pattern: Option<Regex>,
    targets: HashMap<String, String>,
}

impl Linker {
    /// Longer names are tried first so "Clean Water Act of 2024" wins over
    /// "Clean Water Act".
    pub fn new(references: &[DocumentReference]) -> Self {
        let mut targets = HashMap::new();
        for reference in references {
            for name in &reference.names {
                let name = name.trim();
                if !name.is_empty() {
                    targets
                        .entry(name.to_lowercase())
                        .or_insert_with(|| reference.url.clone());
                }
            }
        }
        let mut names: Vec<&String> = targets.keys().collect();
        names.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

        let pattern = if names.is_empty() {
            None
        } else {
            let alternation = names
                .iter()
                .map(|n| regex::escape(n))
                .collect::<Vec<_>>()
                .join("|");
            RegexBuilder::new(&format!(r"\b(?:{alternation})\b"))
                .case_insensitive(true)
                .build()
                .ok()
        };
        Self { pattern, targets }
    }

    /// Links every mention outside an existing markdown link.
    pub fn link(&self, text: &str) -> String {
        let Some(pattern) = &self.pattern else {
            return text.to_string();
        };
        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        for existing in EXISTING_LINK.find_iter(text) {
            out.push_str(&self.link_plain(pattern, &text[last..existing.start()]));
            out.push_str(existing.as_str());
            last = existing.end();
        }
        out.push_str(&self.link_plain(pattern, &text[last..]));
        out
    }

    fn link_plain(&self, pattern: &Regex, text: &str) -> String {
        pattern
            .replace_all(text, |caps: &regex::Captures| {
                let matched = &caps[0];
                match self.targets.get(&matched.to_lowercase()) {
                    Some(url) => format!("[{matched}]({url})"),
                    None => matched.to_string(),
                }
            })
            .into_owned()
    }

    /// Applies the pass to an interpretation's long text, children included.
    pub fn link_interpretation(&self, interpretation: &mut Interpretation) {
        interpretation.long_text = self.link(&interpretation.long_text);
        for child in &mut interpretation.children {
            self.link_interpretation(child);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linker() -> Linker {
        Linker::new(&[
            DocumentReference {
                names: vec!["Clean Water Act".into(), "HR 12".into()],
                url: "/bill/hr/12".into(),
            },
            DocumentReference {
                names: vec!["Clean Water Act of 2024".into()],
                url: "/bill/hr/99".into(),
            },
        ])
    }

    #[test]
    fn links_longest_name_first_case_insensitively() {
        let out = linker().link("the clean water act of 2024 amends HR 12.");
        assert_eq!(
            out,
            "the [clean water act of 2024](/bill/hr/99) amends [HR 12](/bill/hr/12)."
        );
    }

    #[test]
    fn leaves_existing_links_alone() {
        let text = "see [Clean Water Act](/x) and Clean Water Act";
        assert_eq!(
            linker().link(text),
            "see [Clean Water Act](/x) and [Clean Water Act](/bill/hr/12)"
        );
    }

    #[test]
    fn respects_word_boundaries() {
        assert_eq!(linker().link("HR 123 is different"), "HR 123 is different");
    }
}
