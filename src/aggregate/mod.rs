//! Upward aggregation: documents into actors, actors and documents into cohorts.
//!
//! Both levels use [`WeightedScoreMap::divide_by_total_summed`](crate::stats::WeightedScoreMap::divide_by_total_summed),
//! since contributors disagree on which categories they scored.

pub mod actor;
pub mod cohort;
pub mod linker;
pub mod topk;

pub use actor::{
    aggregate_actor, interactions_for_aggregation, interpret_actor, ActorAggregate,
    ActorInteraction, InteractionKind, RatedInteraction, VoteStatus,
};
pub use cohort::{
    interpret_cohort, CohortAccumulator, CohortAggregate, CohortBasis, RankedActor,
    RankedDocument,
};
pub use linker::{DocumentReference, Linker};
pub use topk::{Direction, TopK};

use crate::cache::CacheError;
use crate::reducer::ReduceError;
use crate::stats::StatsError;

#[derive(Debug, thiserror::Error)]
pub enum AggregateError {
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
    #[error("stats error: {0}")]
    Stats(#[from] StatsError),
    #[error("narrative failed: {0}")]
    Reduce(Box<ReduceError>),
}
