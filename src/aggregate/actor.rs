//! Actor (legislator) aggregation over sponsorships, cosponsorships and votes.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

use super::topk::TopK;
use super::AggregateError;
use crate::cache::{InterpretationKey, ObjectCache};
use crate::config::HarnessConfig;
use crate::generation::GenerationRequest;
use crate::interpretation::{Interpretation, SessionContext};
use crate::issues::IssueCategory;
use crate::prompts::{grade_wording, ACTOR_PROMPT};
use crate::reducer::{ReduceError, Reducer};
use crate::stats::{ScoreMap, WeightedScoreMap};
use crate::trace::WorkKind;

pub const SPONSOR_WEIGHT: f64 = 1.0;
pub const COSPONSOR_WEIGHT: f64 = 0.7;
pub const VOTE_WEIGHT: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VoteStatus {
    Aye,
    Nay,
    Present,
    NotVoting,
}

/// Relationship between an actor and a document. The `@type` discriminants are
/// part of the stored format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "@type")]
pub enum InteractionKind {
    #[serde(rename = "LegislatorBillSponsor")]
    Sponsor,
    #[serde(rename = "LegislatorBillCosponsor")]
    Cosponsor,
    #[serde(rename = "LegislatorBillVote", rename_all = "camelCase")]
    Vote { vote_status: VoteStatus },
}

impl InteractionKind {
    /// Signed judgment weight; `None` for relationships excluded from aggregation.
    pub fn judgement_weight(&self) -> Option<f64> {
        match self {
            Self::Sponsor => Some(SPONSOR_WEIGHT),
            Self::Cosponsor => Some(COSPONSOR_WEIGHT),
            Self::Vote {
                vote_status: VoteStatus::Aye,
            } => Some(VOTE_WEIGHT),
            Self::Vote {
                vote_status: VoteStatus::Nay,
            } => Some(-VOTE_WEIGHT),
            Self::Vote { .. } => None,
        }
    }

    /// When an actor has several relationships with one document, the highest wins.
    pub fn priority(&self) -> u8 {
        match self {
            Self::Sponsor => 3,
            Self::Cosponsor => 2,
            Self::Vote { .. } => 1,
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            Self::Sponsor => "Sponsor",
            Self::Cosponsor => "Cosponsor",
            Self::Vote { vote_status } => match vote_status {
                VoteStatus::Aye => "Voted for",
                VoteStatus::Nay => "Voted against",
                VoteStatus::Present => "Voted present on",
                VoteStatus::NotVoting => "Did not vote on",
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActorInteraction {
    pub document_id: String,
    pub document_name: String,
    pub date: NaiveDate,
    #[serde(flatten)]
    pub kind: InteractionKind,
}

impl ActorInteraction {
    pub fn judgement_weight(&self) -> Option<f64> {
        self.kind.judgement_weight()
    }
}

/// Drops neutral relationships, keeps one relationship per document (highest
/// priority) and orders newest first.
pub fn interactions_for_aggregation(interactions: &[ActorInteraction]) -> Vec<ActorInteraction> {
    let mut by_document: HashMap<&str, &ActorInteraction> = HashMap::new();
    for interaction in interactions {
        if interaction.judgement_weight().is_none() {
            continue;
        }
        let keep = match by_document.get(interaction.document_id.as_str()) {
            Some(existing) => interaction.kind.priority() > existing.kind.priority(),
            None => true,
        };
        if keep {
            by_document.insert(&interaction.document_id, interaction);
        }
    }
    let mut out: Vec<ActorInteraction> = by_document.into_values().cloned().collect();
    out.sort_by(|a, b| {
        b.date
            .cmp(&a.date)
            .then_with(|| a.document_id.cmp(&b.document_id))
    });
    out
}

/// An interaction with the document rating it was scored against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatedInteraction {
    pub interaction: ActorInteraction,
    pub weight: f64,
    /// The document's score for the category this entry is ranked under.
    pub rating: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActorAggregate {
    pub actor_id: String,
    pub scores: ScoreMap,
    pub weighted: WeightedScoreMap,
    /// Interactions that contributed, newest first, rated by overall benefit.
    pub interactions: Vec<RatedInteraction>,
    /// Per category, the interactions with the largest |rating × weight|.
    pub top_by_issue: BTreeMap<IssueCategory, Vec<RatedInteraction>>,
}

/// Weighted aggregation of document scores into one actor.
///
/// Each document score map is multiplied by the signed judgment weight, summed
/// with `|weight|`, then every category is divided by its own accumulated weight.
/// Documents with no stored interpretation are skipped.
pub async fn aggregate_actor(
    ctx: &SessionContext,
    actor_id: &str,
    interactions: &[ActorInteraction],
    cache: &dyn ObjectCache,
    top_interactions: usize,
) -> Result<ActorAggregate, AggregateError> {
    let mut acc = WeightedScoreMap::new();
    let mut rated = Vec::new();
    let mut tops: BTreeMap<IssueCategory, TopK<RatedInteraction>> = BTreeMap::new();

    for interaction in interactions_for_aggregation(interactions) {
        let Some(weight) = interaction.judgement_weight() else {
            continue;
        };
        let key = InterpretationKey::document(ctx, &interaction.document_id);
        let Some(interpretation) = cache.get(&key).await? else {
            warn!(actor = actor_id, document = %interaction.document_id, "no interpretation; skipping");
            continue;
        };

        acc.accumulate(&interpretation.scores, weight);
        for (category, score) in interpretation.scores.iter() {
            tops.entry(category)
                .or_insert_with(|| TopK::highest(top_interactions))
                .push(
                    (score as f64 * weight).abs(),
                    RatedInteraction {
                        interaction: interaction.clone(),
                        weight,
                        rating: score,
                    },
                );
        }
        rated.push(RatedInteraction {
            rating: interpretation.rating(),
            interaction,
            weight,
        });
    }

    acc.divide_by_total_summed()?;
    debug!(actor = actor_id, contributions = rated.len(), "actor aggregated");

    Ok(ActorAggregate {
        actor_id: actor_id.to_string(),
        scores: acc.to_score_map(),
        weighted: acc,
        interactions: rated,
        top_by_issue: tops
            .into_iter()
            .map(|(c, top)| (c, top.into_sorted_vec().into_iter().map(|(_, r)| r).collect()))
            .collect(),
    })
}

/// Narrative request for an actor. History lines are added newest first until
/// the section budget is reached.
pub fn actor_request(
    name: &str,
    aggregate: &ActorAggregate,
    config: &HarnessConfig,
) -> GenerationRequest {
    let grade = aggregate.scores.letter_grade();
    let (analysis_type, behavior) = grade_wording(grade);
    let scores = aggregate.scores.render();

    let mut history = String::new();
    for rated in &aggregate.interactions {
        let line = format!(
            "- {} {} ({}): {:+}\n",
            rated.interaction.kind.describe(),
            rated.interaction.document_name,
            rated.interaction.date,
            rated.rating
        );
        if history.len() + line.len() + scores.len() > config.max_section_length {
            break;
        }
        history.push_str(&line);
    }

    let grade = grade.to_string();
    ACTOR_PROMPT.render(
        &[
            ("analysis_type", analysis_type),
            ("behavior", behavior),
            ("name", name),
            ("grade", grade.as_str()),
            ("scores", scores.as_str()),
            ("history", history.trim_end()),
        ],
        config.max_output_tokens,
    )
}

/// Aggregates and writes the narrative for one actor, stored under the actor id.
pub async fn interpret_actor(
    reducer: &Reducer,
    ctx: &SessionContext,
    actor_id: &str,
    name: &str,
    interactions: &[ActorInteraction],
) -> Result<(ActorAggregate, Interpretation), AggregateError> {
    let aggregate = aggregate_actor(
        ctx,
        actor_id,
        interactions,
        reducer.cache().as_ref(),
        reducer.config().top_interactions,
    )
    .await?;
    let request = actor_request(name, &aggregate, reducer.config());
    let key = InterpretationKey::document(ctx, actor_id);
    let interpretation = reducer
        .interpret_narrative(&key, WorkKind::Actor, &request, aggregate.scores.clone())
        .await
        .map_err(|e: ReduceError| AggregateError::Reduce(Box::new(e)))?;
    Ok((aggregate, interpretation))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interaction(doc: &str, day: u32, kind: InteractionKind) -> ActorInteraction {
        ActorInteraction {
            document_id: doc.into(),
            document_name: format!("Bill {doc}"),
            date: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            kind,
        }
    }

    #[test]
    fn weights_by_kind() {
        assert_eq!(InteractionKind::Sponsor.judgement_weight(), Some(1.0));
        assert_eq!(InteractionKind::Cosponsor.judgement_weight(), Some(0.7));
        let nay = InteractionKind::Vote {
            vote_status: VoteStatus::Nay,
        };
        assert_eq!(nay.judgement_weight(), Some(-0.5));
        assert_eq!(nay.describe(), "Voted against");
        let present = InteractionKind::Vote {
            vote_status: VoteStatus::Present,
        };
        assert_eq!(present.judgement_weight(), None);
    }

    #[test]
    fn dedupe_keeps_highest_priority_and_sorts_newest_first() {
        let aye = InteractionKind::Vote {
            vote_status: VoteStatus::Aye,
        };
        let abstain = InteractionKind::Vote {
            vote_status: VoteStatus::NotVoting,
        };
        let kept = interactions_for_aggregation(&[
            interaction("a", 3, aye.clone()),
            interaction("a", 1, InteractionKind::Sponsor),
            interaction("b", 5, InteractionKind::Cosponsor),
            interaction("c", 9, abstain),
        ]);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].document_id, "b");
        assert_eq!(kept[1].kind, InteractionKind::Sponsor);
    }

    #[test]
    fn vote_serializes_with_type_tag() {
        let v = interaction(
            "a",
            2,
            InteractionKind::Vote {
                vote_status: VoteStatus::NotVoting,
            },
        );
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(json["@type"], "LegislatorBillVote");
        assert_eq!(json["voteStatus"], "NOT_VOTING");
        assert_eq!(json["documentId"], "a");
        let back: ActorInteraction = serde_json::from_value(json).unwrap();
        assert_eq!(back, v);
    }
}
