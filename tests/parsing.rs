use std::fs;
use std::path::PathBuf;

use mv_scout::error::FetchError;
use mv_scout::fbref::{TableMatch, clean_player_table, extract_table};
use mv_scout::market_value::{format_market_value, parse_market_value};
use mv_scout::standings::club_context;
use mv_scout::table::Cell;
use mv_scout::transfermarkt::{add_position_codes, parse_market_value_page};

fn read_fixture(name: &str) -> String {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("tests");
    path.push("fixtures");
    path.push(name);
    fs::read_to_string(path).expect("fixture file should be readable")
}

#[test]
fn extracts_commented_fbref_table_with_flattened_headers() {
    let html = read_fixture("fbref_stats.html");
    let mut table = extract_table(&html, TableMatch::Id("stats_standard"), "stats_standard")
        .expect("commented table should be found");
    assert_eq!(
        table.columns(),
        [
            "Rk",
            "Player",
            "Nation",
            "Pos",
            "Squad",
            "Age",
            "Playing_Time.90s",
            "Playing_Time.Min",
            "Per_90_Minutes.Gls",
            "Per_90_Minutes.G_A",
        ]
    );
    // Repeated header row is skipped; the empty spacer row survives parsing.
    assert_eq!(table.len(), 3);
    assert_eq!(table.cell(0, "Playing_Time.Min"), &Cell::Num(2709.0));
    assert_eq!(table.cell(1, "Age").as_text(), Some("22-101"));

    clean_player_table(&mut table);
    assert_eq!(table.len(), 2);
    assert!(!table.has_column("Rk"));
    assert_eq!(table.cell(1, "Player").as_text(), Some("Bukayo Saka"));
}

#[test]
fn standings_found_by_id_suffix() {
    let html = read_fixture("fbref_stats.html");
    let standings = extract_table(&html, TableMatch::IdSuffix("_overall"), "overall").unwrap();
    assert_eq!(standings.len(), 2);
    assert_eq!(standings.cell(0, "GD"), &Cell::Num(62.0));

    let ctx = club_context(&standings, "Premier_League").unwrap();
    assert_eq!(ctx.cell(1, "Squad").as_text(), Some("Arsenal"));
    assert_eq!(ctx.cell(1, "League_Position").as_f64(), Some(2.0));
    let points = ctx.cell(0, "Points_%").as_f64().unwrap();
    assert!((points - 91.0 / 114.0).abs() < 1e-12);
}

#[test]
fn missing_table_is_reported() {
    let html = read_fixture("fbref_stats.html");
    let err = extract_table(&html, TableMatch::Id("stats_keeper"), "stats_keeper").unwrap_err();
    assert!(matches!(err, FetchError::NoTable { .. }));
}

#[test]
fn parses_transfermarkt_market_value_page() {
    let html = read_fixture("transfermarkt_page.html");
    let mut table = parse_market_value_page(&html);
    assert_eq!(table.len(), 3);
    assert_eq!(table.cell(0, "Player").as_text(), Some("Erling Haaland"));
    assert_eq!(table.cell(0, "TM_Player_ID").as_text(), Some("418560"));
    assert_eq!(table.cell(0, "Club").as_text(), Some("Manchester City"));
    assert_eq!(table.cell(0, "Position").as_text(), Some("Centre-Forward"));
    assert_eq!(table.cell(0, "Age").as_f64(), Some(23.0));
    assert_eq!(table.cell(0, "Nation").as_text(), Some("Norway"));
    assert_eq!(table.cell(0, "Market_Value_EUR").as_f64(), Some(180_000_000.0));
    assert_eq!(
        table.cell(1, "TM_URL").as_text(),
        Some("https://www.transfermarkt.com/bukayo-saka/profil/spieler/433177")
    );
    assert!(table.cell(2, "Market_Value_EUR").is_null());

    add_position_codes(&mut table);
    assert_eq!(table.cell(0, "Pos").as_text(), Some("ST"));
    assert_eq!(table.cell(1, "Pos_group").as_text(), Some("AM"));
    assert_eq!(table.cell(2, "Pos").as_text(), Some("DF"));
    assert!(table.cell(2, "Pos_group").is_null());
}

#[test]
fn market_values_in_both_site_formats() {
    assert_eq!(parse_market_value("45,00 Mio. €"), Some(45_000_000));
    assert_eq!(parse_market_value("€45.00m"), Some(45_000_000));
    assert_eq!(parse_market_value("€750k"), Some(750_000));
    assert_eq!(parse_market_value("?"), None);
    assert_eq!(format_market_value(45_000_000), "45.0M €");
    assert_eq!(format_market_value(750_000), "750.0k €");
}
