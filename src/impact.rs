//! Impact and time-decayed "hot" ranking scores for documents.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub const DEFAULT_IMPACT_LAW_WEIGHT: f64 = 100.0;
/// Law weight used inside the hot score, so enactment matters but does not swamp recency.
pub const HOT_LAW_WEIGHT: f64 = 2.0;
/// Exponential decay per day since the last action.
pub const HOT_DECAY_PER_DAY: f64 = 0.02;

const HOUSE_SEATS: f64 = 435.0;
const SENATE_SEATS: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chamber {
    House,
    Senate,
}

impl Chamber {
    pub fn seats(self) -> f64 {
        match self {
            Self::House => HOUSE_SEATS,
            Self::Senate => SENATE_SEATS,
        }
    }
}

/// Share of the originating chamber that cosponsored, capped at 1.
pub fn support_breadth(cosponsors: usize, chamber: Chamber) -> f64 {
    (cosponsors as f64 / chamber.seats()).min(1.0)
}

/// Ranking scalar blending procedural progress, rating magnitude and support.
///
/// `status_progress` is in [0, 1]; completion is amplified by `law_weight`.
/// The sign follows the rating.
pub fn impact(rating: f64, status_progress: f64, support_breadth: f64, law_weight: f64) -> i64 {
    let status_multiplier = if status_progress >= 1.0 { law_weight } else { 1.0 };
    let status_term = status_progress * 100_000.0 * status_multiplier;
    let rating_term = (rating / 100.0).abs() * 10_000.0;
    let breadth_term = support_breadth * 1_000.0;
    let magnitude = (status_term + rating_term + breadth_term).round() as i64;
    if rating < 0.0 {
        -magnitude
    } else {
        magnitude
    }
}

/// `|impact|` decayed by days since `last_action` (or `introduced` when no
/// action is recorded), measured at `today`.
pub fn hot(
    rating: f64,
    status_progress: f64,
    support_breadth: f64,
    introduced: NaiveDate,
    last_action: Option<NaiveDate>,
    today: NaiveDate,
) -> f64 {
    let base = impact(rating, status_progress, support_breadth, HOT_LAW_WEIGHT).unsigned_abs() as f64;
    let since = last_action.unwrap_or(introduced);
    let days = (today - since).num_days().max(0) as f64;
    base * (-HOT_DECAY_PER_DAY * days).exp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enacted_positive_bill() {
        assert_eq!(impact(50.0, 1.0, 0.2, DEFAULT_IMPACT_LAW_WEIGHT), 10_005_200);
    }

    #[test]
    fn negative_rating_flips_sign() {
        assert_eq!(impact(-50.0, 0.5, 0.0, DEFAULT_IMPACT_LAW_WEIGHT), -55_000);
    }

    #[test]
    fn law_weight_only_applies_at_completion() {
        let in_progress = impact(10.0, 0.9, 0.0, DEFAULT_IMPACT_LAW_WEIGHT);
        assert_eq!(in_progress, 91_000);
    }

    #[test]
    fn breadth_is_capped() {
        assert_eq!(support_breadth(500, Chamber::House), 1.0);
        assert!((support_breadth(87, Chamber::House) - 0.2).abs() < 1e-9);
        assert!((support_breadth(20, Chamber::Senate) - 0.2).abs() < 1e-9);
    }

    #[test]
    fn hot_decays_with_age() {
        let intro = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let fresh = hot(50.0, 0.3, 0.1, intro, None, intro);
        let stale = hot(
            50.0,
            0.3,
            0.1,
            intro,
            None,
            NaiveDate::from_ymd_opt(2024, 2, 20).unwrap(),
        );
        assert_eq!(fresh, 35_100.0);
        assert!((stale - 35_100.0 * (-1.0f64).exp()).abs() < 1e-6);
    }
}
