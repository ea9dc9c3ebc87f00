use mv_scout::identity::{IdentityResolver, SnapshotId, similarity};
use mv_scout::merge::{MergePolicy, PlayingTimePolicy, merge_tables};
use mv_scout::table::{Cell, Table};

fn table(name: &str, columns: &[&str], rows: Vec<Vec<Cell>>) -> Table {
    Table::from_rows(name, columns.iter().map(|c| c.to_string()).collect(), rows)
}

#[test]
fn outer_merge_keeps_every_player_once() {
    let goals = table(
        "stats_standard",
        &["Player", "Squad", "League", "Table", "Gls"],
        vec![
            vec!["A".into(), "X".into(), "L".into(), "stats_standard".into(), 3.0.into()],
            vec!["B".into(), "Y".into(), "L".into(), "stats_standard".into(), 1.0.into()],
        ],
    );
    let assists = table(
        "stats_passing",
        &["Player", "Squad", "League", "Table", "Ast"],
        vec![
            vec!["A".into(), "X".into(), "L".into(), "stats_passing".into(), 5.0.into()],
            vec!["C".into(), "Z".into(), "L".into(), "stats_passing".into(), 2.0.into()],
        ],
    );

    let merged = merge_tables(&[goals, assists], &MergePolicy::default());
    assert_eq!(merged.len(), 3);
    assert_eq!(
        merged.columns(),
        ["Player", "Squad", "League", "Table", "Gls", "stats_passing__Ast"]
    );
    assert!(!merged.columns().iter().any(|c| c.ends_with("_x") || c.ends_with("_y")));

    let row = |name: &str| {
        (0..merged.len())
            .find(|&r| merged.cell(r, "Player").as_text() == Some(name))
            .unwrap()
    };
    assert_eq!(merged.cell(row("A"), "Gls").as_f64(), Some(3.0));
    assert_eq!(merged.cell(row("A"), "stats_passing__Ast").as_f64(), Some(5.0));
    assert!(merged.cell(row("B"), "stats_passing__Ast").is_null());
    assert!(merged.cell(row("C"), "Gls").is_null());
    assert_eq!(merged.cell(row("C"), "Squad").as_text(), Some("Z"));
    // Table was already present on the left, so the right copy is dropped.
    assert_eq!(merged.cell(row("A"), "Table").as_text(), Some("stats_standard"));
}

#[test]
fn table_without_shared_key_is_skipped() {
    let left = table("a", &["Player", "Gls"], vec![vec!["A".into(), 1.0.into()]]);
    let right = table("b", &["Club", "Pts"], vec![vec!["X".into(), 3.0.into()]]);
    let merged = merge_tables(&[left.clone(), right], &MergePolicy::default());
    assert_eq!(merged, left);
}

#[test]
fn playing_time_filter_uses_fraction_of_max() {
    let mut t = table(
        "stats_standard",
        &["Player", "Playing_Time.90s"],
        vec![
            vec!["A".into(), 30.0.into()],
            vec!["B".into(), 6.0.into()],
            vec!["C".into(), 5.0.into()],
            vec!["D".into(), Cell::Null],
        ],
    );
    let removed = PlayingTimePolicy::FractionOfMax { fraction: 0.2 }.apply(&mut t);
    assert_eq!(removed, 3);
    assert_eq!(t.distinct_values("Player"), vec!["A".to_string()]);

    let mut untouched = table("x", &["Player", "Min"], vec![vec!["A".into(), 1.0.into()]]);
    assert_eq!(PlayingTimePolicy::default().apply(&mut untouched), 0);
}

#[test]
fn resolver_pulls_target_from_reference() {
    let mut players = table(
        "stats",
        &["Player", "Gls"],
        vec![
            vec!["Bukayo Saka".into(), 1.0.into()],
            vec!["Martin Odegaard".into(), 2.0.into()],
            vec!["Zzyzx Qwerty".into(), 3.0.into()],
        ],
    );
    let reference = table(
        "market",
        &["Player", "Market_Value_EUR"],
        vec![
            vec!["Bukayo Saka".into(), 140e6.into()],
            vec!["Martin Ødegaard".into(), 110e6.into()],
        ],
    );
    let mut resolver = IdentityResolver::default();
    let report = resolver
        .resolve(&mut players, &reference, "Player", "Market_Value_EUR")
        .unwrap();
    assert_eq!(report.distinct, 3);
    assert_eq!(report.matched, 2);
    assert_eq!(report.unmatched, vec!["Zzyzx Qwerty".to_string()]);
    assert_eq!(players.cell(1, "Player").as_text(), Some("Martin Ødegaard"));
    assert_eq!(players.cell(1, "Market_Value_EUR").as_f64(), Some(110e6));
    assert!(players.cell(2, "Player").is_null());
    assert!(players.cell(2, "Market_Value_EUR").is_null());
    assert_eq!(players.cell(2, "Gls").as_f64(), Some(3.0));
}

#[test]
fn empty_reference_nulls_every_target() {
    let mut players = table("stats", &["Player"], vec![vec!["A".into()], vec!["B".into()]]);
    let reference = Table::with_columns("market", &["Player", "Position"]);
    let report = IdentityResolver::default()
        .resolve(&mut players, &reference, "Player", "Position")
        .unwrap();
    assert_eq!(report.matched, 0);
    assert!((0..2).all(|r| players.cell(r, "Position").is_null()));
}

#[test]
fn missing_match_column_is_a_schema_error() {
    let mut players = table("stats", &["Name"], vec![vec!["A".into()]]);
    let reference = table("market", &["Player", "Position"], vec![vec!["A".into(), "GK".into()]]);
    assert!(
        IdentityResolver::default()
            .resolve(&mut players, &reference, "Player", "Position")
            .is_err()
    );
}

#[test]
fn threshold_is_strict_and_lookups_are_memoized() {
    let choices = vec!["abcdefghij".to_string()];
    // Four edits out of ten characters.
    assert!((similarity("abcdefwxyz", "abcdefghij") - 60.0).abs() < 1e-9);
    let snapshot = SnapshotId::of(&choices);
    let mut resolver = IdentityResolver::new(70.0);
    assert_eq!(resolver.lookup("abcdefwxyz", &choices, &snapshot), None);
    assert_eq!(resolver.lookup("abcdefwxyz", &choices, &snapshot), None);
    assert_eq!(resolver.cache().misses(), 1);
    assert_eq!(resolver.cache().hits(), 1);

    let other = vec!["abcdefwxyz".to_string()];
    let hit = resolver.lookup("abcdefwxyz", &other, &SnapshotId::of(&other));
    assert_eq!(hit.map(|(_, s)| s), Some(100.0));

    // A perfect score does not clear a threshold of 100.
    let mut strict = IdentityResolver::new(100.0);
    assert_eq!(strict.lookup("abcdefwxyz", &other, &SnapshotId::of(&other)), None);
}
