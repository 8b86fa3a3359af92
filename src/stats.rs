//! Issue score maps and the weighted aggregation model.
//!
//! Two normalization strategies exist and are not interchangeable:
//!
//! - [`WeightedScoreMap::divide`] is a flat positional division. Slice reduction
//!   uses it with the slice count, so a slice that did not score a category still
//!   counts in the denominator.
//! - [`WeightedScoreMap::divide_by_total_summed`] divides each category by its own
//!   accumulated weight. Actor and cohort aggregation use it, because contributors
//!   disagree on which categories they scored.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::issues::IssueCategory;

pub const MIN_SCORE: i32 = -100;
pub const MAX_SCORE: i32 = 100;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StatsError {
    #[error("category {0} has a score but no accumulated weight")]
    Uncovered(IssueCategory),
    #[error("invalid divisor: {0}")]
    InvalidDivisor(f64),
}

// =============================================================================
// Letter grade
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LetterGrade {
    A,
    B,
    C,
    D,
    F,
}

impl LetterGrade {
    pub fn from_score(score: f64) -> Self {
        if score >= 40.0 {
            Self::A
        } else if score >= 30.0 {
            Self::B
        } else if score >= 15.0 {
            Self::C
        } else if score >= 0.0 {
            Self::D
        } else {
            Self::F
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
            Self::D => "D",
            Self::F => "F",
        }
    }
}

impl fmt::Display for LetterGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// ScoreMap
// =============================================================================

/// Integer scores in [-100, 100]. A missing category means "not applicable",
/// which is distinct from a neutral 0.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScoreMap(BTreeMap<IssueCategory, i32>);

impl ScoreMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, category: IssueCategory) -> Option<i32> {
        self.0.get(&category).copied()
    }

    /// Stores `value` clamped to the score range.
    pub fn set(&mut self, category: IssueCategory, value: i32) {
        self.0.insert(category, value.clamp(MIN_SCORE, MAX_SCORE));
    }

    pub fn remove(&mut self, category: IssueCategory) -> Option<i32> {
        self.0.remove(&category)
    }

    pub fn contains(&self, category: IssueCategory) -> bool {
        self.0.contains_key(&category)
    }

    pub fn overall(&self) -> Option<i32> {
        self.get(IssueCategory::OVERALL)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (IssueCategory, i32)> + '_ {
        self.0.iter().map(|(c, v)| (*c, *v))
    }

    /// Grade of the overall category. A missing overall grades as 0.
    pub fn letter_grade(&self) -> LetterGrade {
        LetterGrade::from_score(self.overall().unwrap_or(0) as f64)
    }

    pub fn to_weighted(&self) -> WeightedScoreMap {
        let mut out = WeightedScoreMap::new();
        for (category, value) in self.iter() {
            out.set(category, value as f64);
        }
        out
    }

    /// One `Label: +N` line per present category, in taxonomy order.
    pub fn render(&self) -> String {
        self.iter()
            .map(|(c, v)| format!("{}: {:+}", c.label(), v))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl FromIterator<(IssueCategory, i32)> for ScoreMap {
    fn from_iter<T: IntoIterator<Item = (IssueCategory, i32)>>(iter: T) -> Self {
        let mut map = ScoreMap::new();
        for (c, v) in iter {
            map.set(c, v);
        }
        map
    }
}

// =============================================================================
// WeightedScoreMap
// =============================================================================

/// Float scores plus the weight each category has accumulated.
///
/// Weight only grows through [`sum`](Self::sum) and only for categories the
/// incoming operand actually reports.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeightedScoreMap {
    scores: BTreeMap<IssueCategory, f64>,
    weights: BTreeMap<IssueCategory, f64>,
}

impl WeightedScoreMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, category: IssueCategory) -> Option<f64> {
        self.scores.get(&category).copied()
    }

    pub fn weight(&self, category: IssueCategory) -> f64 {
        self.weights.get(&category).copied().unwrap_or(0.0)
    }

    pub fn set(&mut self, category: IssueCategory, value: f64) -> &mut Self {
        self.scores.insert(category, value);
        self
    }

    /// Adds to a category; a missing category starts at 0.
    pub fn add(&mut self, category: IssueCategory, value: f64) -> &mut Self {
        *self.scores.entry(category).or_insert(0.0) += value;
        self
    }

    pub fn multiply(&mut self, scalar: f64) -> &mut Self {
        for v in self.scores.values_mut() {
            *v *= scalar;
        }
        self
    }

    /// Positional division of every score. Weights are left untouched.
    pub fn divide(&mut self, divisor: f64) -> Result<&mut Self, StatsError> {
        if divisor == 0.0 || !divisor.is_finite() {
            return Err(StatsError::InvalidDivisor(divisor));
        }
        for v in self.scores.values_mut() {
            *v /= divisor;
        }
        Ok(self)
    }

    /// Elementwise add of `other`'s scores; `weight` accrues to each category
    /// `other` reports.
    pub fn sum(&mut self, other: &WeightedScoreMap, weight: f64) -> &mut Self {
        for (category, value) in &other.scores {
            *self.scores.entry(*category).or_insert(0.0) += value;
            *self.weights.entry(*category).or_insert(0.0) += weight;
        }
        self
    }

    /// Scales `scores` by a signed judgment weight and sums it in with `|weight|`.
    pub fn accumulate(&mut self, scores: &ScoreMap, weight: f64) -> &mut Self {
        let mut scaled = scores.to_weighted();
        scaled.multiply(weight);
        self.sum(&scaled, weight.abs())
    }

    /// Per-category division by that category's accumulated weight.
    ///
    /// Fails without touching any value when a category has no weight.
    pub fn divide_by_total_summed(&mut self) -> Result<&mut Self, StatsError> {
        if let Some(category) = self
            .scores
            .keys()
            .find(|c| self.weights.get(c).copied().unwrap_or(0.0) == 0.0)
        {
            return Err(StatsError::Uncovered(*category));
        }
        for (category, value) in self.scores.iter_mut() {
            *value /= self.weights[category];
        }
        Ok(self)
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (IssueCategory, f64)> + '_ {
        self.scores.iter().map(|(c, v)| (*c, *v))
    }

    /// Rounds and clamps into an integer map.
    pub fn to_score_map(&self) -> ScoreMap {
        self.iter()
            .map(|(c, v)| (c, v.round().clamp(MIN_SCORE as f64, MAX_SCORE as f64) as i32))
            .collect()
    }

    pub fn letter_grade(&self) -> LetterGrade {
        LetterGrade::from_score(self.get(IssueCategory::OVERALL).unwrap_or(0.0))
    }
}

impl From<&ScoreMap> for WeightedScoreMap {
    fn from(value: &ScoreMap) -> Self {
        value.to_weighted()
    }
}

// =============================================================================
// TESTS
// =============================================================================
