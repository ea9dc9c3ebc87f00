use mv_scout::normalize::{
    FeatureClass, FeatureClassification, GroupDimension, combine_columnwise, context_features,
    normalize_per90, standardize_by_group, zscore_within_group,
};
use mv_scout::table::{Cell, Table};

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn squad() -> Table {
    let mut t = Table::with_columns(
        "players",
        &["Player", "League", "Age", "Playing_Time.90s", "Tkl", "Save%"],
    );
    t.push_row(vec!["A".into(), "L1".into(), "21-010".into(), 10.0.into(), 20.0.into(), 70.0.into()]);
    t.push_row(vec!["B".into(), "L1".into(), "22-100".into(), 0.0.into(), 5.0.into(), 65.0.into()]);
    t.push_row(vec!["C".into(), "L2".into(), "31-200".into(), 20.0.into(), Cell::Null, 80.0.into()]);
    t.push_row(vec!["D".into(), "L2".into(), "29-000".into(), 5.0.into(), 10.0.into(), 75.0.into()]);
    t
}

#[test]
fn per90_divides_counting_stats_only() {
    let mut t = squad();
    let scaled = normalize_per90(
        &mut t,
        &strings(&["Tkl", "Save%", "Playing_Time.90s", "Missing"]),
        "Playing_Time.90s",
        &FeatureClassification::default(),
    )
    .unwrap();
    assert_eq!(scaled, strings(&["Tkl"]));
    assert_eq!(t.cell(0, "Tkl").as_f64(), Some(2.0));
    // Zero exposure is NaN, a null raw value stays null.
    assert!(matches!(t.cell(1, "Tkl"), Cell::Num(v) if v.is_nan()));
    assert_eq!(t.cell(2, "Tkl"), &Cell::Null);
    assert_eq!(t.cell(0, "Save%").as_f64(), Some(70.0));
    assert_eq!(t.cell(0, "Playing_Time.90s").as_f64(), Some(10.0));
}

#[test]
fn per90_requires_exposure_column() {
    let mut t = squad();
    let err = normalize_per90(&mut t, &strings(&["Tkl"]), "Minutes", &FeatureClassification::default());
    assert!(err.is_err());
}

#[test]
fn classification_loads_from_json() {
    let c = FeatureClassification::from_json(r#"{"overrides": {"Tkl": "rate", "Save%": "counting"}}"#).unwrap();
    assert_eq!(c.classify("Tkl"), FeatureClass::Rate);
    assert_eq!(c.classify("Save%"), FeatureClass::Counting);
    assert_eq!(c.classify("Rating"), FeatureClass::Rate);
}

#[test]
fn standardizes_within_each_league() {
    let t = squad();
    let out = standardize_by_group(&t, &GroupDimension::values("League"), &strings(&["Save%"])).unwrap();
    assert_eq!(out.len(), t.len());
    assert_eq!(out.columns(), ["League.Save%"]);
    // Two rows per league with sample std: +-1/sqrt(2).
    let z = out.cell(0, "League.Save%").as_f64().unwrap();
    assert!((z - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-12);
    let z = out.cell(3, "League.Save%").as_f64().unwrap();
    assert!((z + std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-12);
}

#[test]
fn degenerate_groups_score_zero() {
    let mut t = Table::with_columns("g", &["League", "x"]);
    t.push_row(vec!["L1".into(), 4.0.into()]);
    t.push_row(vec!["L1".into(), 4.0.into()]);
    t.push_row(vec!["L2".into(), 9.0.into()]);
    t.push_row(vec![Cell::Null, 1.0.into()]);
    let out = standardize_by_group(&t, &GroupDimension::values("League"), &strings(&["x"])).unwrap();
    assert_eq!(out.cell(0, "League.x").as_f64(), Some(0.0));
    assert_eq!(out.cell(1, "League.x").as_f64(), Some(0.0));
    // Single-member group: undefined deviation.
    assert_eq!(out.cell(2, "League.x").as_f64(), Some(0.0));
    // No group at all.
    assert!(out.cell(3, "League.x").is_null());
}

#[test]
fn age_buckets_group_rows() {
    let t = squad();
    let out = standardize_by_group(&t, &GroupDimension::age("Age"), &strings(&["Save%"])).unwrap();
    assert_eq!(out.columns(), ["Age_bucket.Save%"]);
    // A and B share 19-23; C is 30+ alone; D is 23-30 alone.
    assert!(out.cell(0, "Age_bucket.Save%").as_f64().unwrap() > 0.0);
    assert_eq!(out.cell(2, "Age_bucket.Save%").as_f64(), Some(0.0));
    assert_eq!(out.cell(3, "Age_bucket.Save%").as_f64(), Some(0.0));
}

#[test]
fn combined_parts_stay_row_aligned() {
    let mut t = squad();
    let league = standardize_by_group(&t, &GroupDimension::values("League"), &strings(&["Save%"])).unwrap();
    let age = standardize_by_group(&t, &GroupDimension::age("Age"), &strings(&["Save%"])).unwrap();
    let short = Table::with_columns("short", &["extra"]);
    let added = combine_columnwise(&mut t, &[league.clone(), age, league, short]);
    assert_eq!(added, 2);
    assert!(t.has_column("League.Save%"));
    assert!(t.has_column("Age_bucket.Save%"));
    assert!(!t.has_column("extra"));
}

#[test]
fn context_features_and_league_zscores() {
    let mut t = squad();
    t.set_column("Playing_Time.Min", vec![900.0.into(), 0.0.into(), 1800.0.into(), 450.0.into()]);
    t.set_column("League_Position", vec![1.0.into(), 4.0.into(), 2.0.into(), 0.0.into()]);
    let ctx = context_features(&mut t, "Playing_Time.Min", "Playing_Time.90s");
    assert_eq!(
        ctx,
        strings(&["ctx.log_minutes", "ctx.full_games", "ctx.age", "ctx.age2", "ctx.inv_league_pos"])
    );
    assert_eq!(t.cell(1, "ctx.log_minutes").as_f64(), Some(0.0));
    assert_eq!(t.cell(2, "ctx.age2").as_f64(), Some(961.0));
    assert_eq!(t.cell(1, "ctx.inv_league_pos").as_f64(), Some(0.25));
    assert!(t.cell(3, "ctx.inv_league_pos").is_null());

    let written = zscore_within_group(&mut t, &strings(&["ctx.age"]), &["League"], "LeagueCtx").unwrap();
    assert_eq!(written, strings(&["LeagueCtx.ctx.age"]));
    // Population std within L1 (ages 21, 22): +-1.
    assert_eq!(t.cell(0, "LeagueCtx.ctx.age").as_f64(), Some(-1.0));
    assert_eq!(t.cell(1, "LeagueCtx.ctx.age").as_f64(), Some(1.0));
}
