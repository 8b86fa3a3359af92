//! Cohort (party or session) aggregation with bounded best/worst rankings.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::actor::ActorAggregate;
use super::topk::TopK;
use super::AggregateError;
use crate::cache::InterpretationKey;
use crate::config::HarnessConfig;
use crate::generation::GenerationRequest;
use crate::interpretation::{Interpretation, SessionContext};
use crate::prompts::{grade_wording, COHORT_PROMPT};
use crate::reducer::{ReduceError, Reducer};
use crate::stats::{ScoreMap, StatsError, WeightedScoreMap};
use crate::trace::WorkKind;

/// What the cohort score averages over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CohortBasis {
    /// Every document the cohort touched, weight 1 each.
    #[default]
    Documents,
    /// Every member's actor-level aggregate, weight 1 each.
    Actors,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedDocument {
    pub document_id: String,
    pub name: String,
    pub rating: i32,
    pub cosponsors: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedActor {
    pub actor_id: String,
    pub name: String,
    pub rating: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CohortAggregate {
    pub cohort_id: String,
    pub scores: ScoreMap,
    pub weighted: WeightedScoreMap,
    pub best_documents: Vec<RankedDocument>,
    pub worst_documents: Vec<RankedDocument>,
    pub best_actors: Vec<RankedActor>,
    pub worst_actors: Vec<RankedActor>,
}

/// Streams documents and actors in, keeping only K of each ranking in memory.
pub struct CohortAccumulator {
    cohort_id: String,
    basis: CohortBasis,
    weighted: WeightedScoreMap,
    seen_documents: HashSet<String>,
    seen_actors: HashSet<String>,
    best_documents: TopK<RankedDocument>,
    worst_documents: TopK<RankedDocument>,
    best_actors: TopK<RankedActor>,
    worst_actors: TopK<RankedActor>,
}

impl CohortAccumulator {
    pub fn new(cohort_id: impl Into<String>, basis: CohortBasis, top_k: usize) -> Self {
        Self {
            cohort_id: cohort_id.into(),
            basis,
            weighted: WeightedScoreMap::new(),
            seen_documents: HashSet::new(),
            seen_actors: HashSet::new(),
            best_documents: TopK::highest(top_k),
            worst_documents: TopK::lowest(top_k),
            best_actors: TopK::highest(top_k),
            worst_actors: TopK::lowest(top_k),
        }
    }

    /// Ranked by `rating × (cosponsors + 1)`, so broadly supported documents
    /// outrank narrow ones of equal rating. Repeats are ignored.
    pub fn add_document(&mut self, name: &str, interpretation: &Interpretation, cosponsors: usize) {
        if !self.seen_documents.insert(interpretation.subject_id.clone()) {
            return;
        }
        if self.basis == CohortBasis::Documents {
            self.weighted.sum(&interpretation.scores.to_weighted(), 1.0);
        }
        let rating = interpretation.rating();
        let weight = rating as f64 * (cosponsors as f64 + 1.0);
        let ranked = RankedDocument {
            document_id: interpretation.subject_id.clone(),
            name: name.to_string(),
            rating,
            cosponsors,
        };
        self.best_documents.push(weight, ranked.clone());
        self.worst_documents.push(weight, ranked);
    }

    pub fn add_actor(&mut self, name: &str, aggregate: &ActorAggregate) {
        if !self.seen_actors.insert(aggregate.actor_id.clone()) {
            return;
        }
        if self.basis == CohortBasis::Actors {
            self.weighted.sum(&aggregate.scores.to_weighted(), 1.0);
        }
        let rating = aggregate.scores.overall().unwrap_or(0);
        let ranked = RankedActor {
            actor_id: aggregate.actor_id.clone(),
            name: name.to_string(),
            rating,
        };
        self.best_actors.push(rating as f64, ranked.clone());
        self.worst_actors.push(rating as f64, ranked);
    }

    pub fn finish(mut self) -> Result<CohortAggregate, StatsError> {
        self.weighted.divide_by_total_summed()?;
        Ok(CohortAggregate {
            cohort_id: self.cohort_id,
            scores: self.weighted.to_score_map(),
            weighted: self.weighted,
            best_documents: items(self.best_documents),
            worst_documents: items(self.worst_documents),
            best_actors: items(self.best_actors),
            worst_actors: items(self.worst_actors),
        })
    }
}

fn items<T>(top: TopK<T>) -> Vec<T> {
    top.into_sorted_vec().into_iter().map(|(_, v)| v).collect()
}

fn document_lines(title: &str, docs: &[RankedDocument]) -> String {
    let mut out = format!("{title}:\n");
    for d in docs {
        out.push_str(&format!(
            "- {} ({} cosponsors): {:+}\n",
            d.name, d.cosponsors, d.rating
        ));
    }
    out
}

fn actor_lines(title: &str, actors: &[RankedActor]) -> String {
    let mut out = format!("{title}:\n");
    for a in actors {
        out.push_str(&format!("- {}: {:+}\n", a.name, a.rating));
    }
    out
}

/// Narrative request for a cohort. The rendered user message must stay within
/// the section budget; it is never cut down to fit.
pub fn cohort_request(
    name: &str,
    aggregate: &CohortAggregate,
    config: &HarnessConfig,
) -> Result<GenerationRequest, ReduceError> {
    let grade = aggregate.scores.letter_grade();
    let (analysis_type, behavior) = grade_wording(grade);
    let sections = [
        document_lines("Best bills", &aggregate.best_documents),
        document_lines("Worst bills", &aggregate.worst_documents),
        actor_lines("Best legislators", &aggregate.best_actors),
        actor_lines("Worst legislators", &aggregate.worst_actors),
    ]
    .join("\n");

    let grade = grade.to_string();
    let scores = aggregate.scores.render();
    let request = COHORT_PROMPT.render(
        &[
            ("analysis_type", analysis_type),
            ("behavior", behavior),
            ("name", name),
            ("grade", grade.as_str()),
            ("scores", scores.as_str()),
            ("sections", sections.trim_end()),
        ],
        config.max_output_tokens,
    );
    if request.user.len() > config.max_section_length {
        return Err(ReduceError::BudgetExceeded {
            key: aggregate.cohort_id.clone(),
            length: request.user.len(),
            limit: config.max_section_length,
        });
    }
    Ok(request)
}

/// Writes and stores the narrative for a finished cohort under its id.
pub async fn interpret_cohort(
    reducer: &Reducer,
    ctx: &SessionContext,
    name: &str,
    aggregate: &CohortAggregate,
) -> Result<Interpretation, AggregateError> {
    let request = cohort_request(name, aggregate, reducer.config())
        .map_err(|e| AggregateError::Reduce(Box::new(e)))?;
    let key = InterpretationKey::document(ctx, &aggregate.cohort_id);
    reducer
        .interpret_narrative(&key, WorkKind::Cohort, &request, aggregate.scores.clone())
        .await
        .map_err(|e| AggregateError::Reduce(Box::new(e)))
}
