use chrono::NaiveDate;
use legiscore::impact::{
    hot, impact, support_breadth, Chamber, DEFAULT_IMPACT_LAW_WEIGHT,
};

#[test]
fn enacted_bill_with_broad_support() {
    let breadth = support_breadth(87, Chamber::House);
    assert!((breadth - 0.2).abs() < 1e-9);
    assert_eq!(impact(50.0, 1.0, breadth, DEFAULT_IMPACT_LAW_WEIGHT), 10_005_200);
}

#[test]
fn breadth_is_capped_and_chamber_relative() {
    assert_eq!(support_breadth(500, Chamber::House), 1.0);
    assert!((support_breadth(50, Chamber::Senate) - 0.5).abs() < 1e-9);
}

#[test]
fn harmful_bills_rank_below_zero() {
    let good = impact(20.0, 0.3, 0.1, DEFAULT_IMPACT_LAW_WEIGHT);
    let bad = impact(-20.0, 0.3, 0.1, DEFAULT_IMPACT_LAW_WEIGHT);
    assert_eq!(good, -bad);
    assert!(bad < 0);
}

#[test]
fn hot_score_decays_with_inactivity() {
    let introduced = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    let today = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
    let recent = hot(40.0, 0.5, 0.1, introduced, Some(today), today);
    let stale = hot(40.0, 0.5, 0.1, introduced, None, today);
    assert!(recent > stale);
    assert!(stale > 0.0);
    assert_eq!(recent, impact(40.0, 0.5, 0.1, 2.0) as f64);
}
