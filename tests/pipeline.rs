use chrono::NaiveDate;
use serde_json::Value;

use mv_scout::config::{FbrefTable, PipelineConfig, default_leagues};
use mv_scout::error::FetchError;
use mv_scout::freshness::FreshnessScheduler;
use mv_scout::merge::PlayingTimePolicy;
use mv_scout::pipeline::{
    ALL_SHEET, MARKET_SHEET, POSITION_DATASET, Pipeline, RunMode, STANDINGS_SHEET, STATS_DATASET,
};
use mv_scout::predict::PREDICTED_COLUMN;
use mv_scout::source::{Source, TableLocator};
use mv_scout::store::{MemoryStore, TableStore};
use mv_scout::table::{Cell, Table};
use mv_scout::transfermarkt::MARKET_COLUMNS;

const STRIKERS: usize = 10;

fn club(i: usize) -> &'static str {
    if i % 2 == 0 { "Manchester City" } else { "Arsenal" }
}

fn market() -> Table {
    let mut t = Table::with_columns("transfermarkt", &MARKET_COLUMNS);
    for i in 0..STRIKERS {
        let eur = 5e6 * (i + 1) as f64;
        t.push_row(vec![
            format!("Striker {i}").into(),
            format!("{}", 1000 + i).into(),
            club(i).into(),
            "Centre-Forward".into(),
            (20.0 + i as f64).into(),
            "England".into(),
            format!("€{:.2}m", eur / 1e6).into(),
            eur.into(),
            Cell::Null,
        ]);
    }
    t.push_row(vec![
        "Keeper 0".into(),
        "2000".into(),
        "Arsenal".into(),
        "Goalkeeper".into(),
        30.0.into(),
        "Spain".into(),
        "€20.00m".into(),
        20e6.into(),
        Cell::Null,
    ]);
    t
}

fn standings() -> Table {
    let mut t = Table::with_columns("overall", &["Rk", "Squad", "MP", "GF", "GA", "GD", "Pts"]);
    t.push_row(vec![1.0.into(), "Manchester City".into(), 38.0.into(), 96.0.into(), 34.0.into(), 62.0.into(), 91.0.into()]);
    t.push_row(vec![2.0.into(), "Arsenal".into(), 38.0.into(), 91.0.into(), 29.0.into(), 62.0.into(), 89.0.into()]);
    t
}

fn identity(name: &str, i: usize) -> Vec<Cell> {
    vec![
        (i as f64 + 1.0).into(),
        name.into(),
        "eng ENG".into(),
        "FW".into(),
        club(i).into(),
        format!("{}-100", 20 + i).into(),
        (2004.0 - i as f64).into(),
    ]
}

fn standard() -> Table {
    let mut t = Table::with_columns(
        "stats_standard",
        &[
            "Rk",
            "Player",
            "Nation",
            "Pos",
            "Squad",
            "Age",
            "Born",
            "Playing_Time.90s",
            "Playing_Time.Min",
            "Per_90_Minutes.Gls",
            "Per_90_Minutes.npxG",
        ],
    );
    let mut names: Vec<String> = (0..STRIKERS).map(|i| format!("Striker {i}")).collect();
    names.push("Keeper 0".to_string());
    names.push("Unknown Guy".to_string());
    for (i, name) in names.iter().enumerate() {
        let x = i as f64;
        let mut row = identity(name, i);
        row.extend([
            (10.0 + x).into(),
            (900.0 + 90.0 * x).into(),
            (0.1 + 0.05 * x).into(),
            (0.08 + 0.045 * x + (i % 3) as f64 * 0.01).into(),
        ]);
        t.push_row(row);
    }
    t
}

fn shooting() -> Table {
    let mut t = Table::with_columns(
        "stats_shooting",
        &[
            "Rk",
            "Player",
            "Nation",
            "Pos",
            "Squad",
            "Age",
            "Born",
            "90s",
            "Standard.Sh/90",
            "Standard.SoT/90",
            "Standard.G/Sh",
        ],
    );
    for i in 0..STRIKERS {
        let x = i as f64;
        let mut row = identity(&format!("Striker {i}"), i);
        row.extend([
            (10.0 + x).into(),
            (1.5 + 0.2 * x).into(),
            (0.5 + 0.08 * x + (i % 2) as f64 * 0.05).into(),
            (0.08 + 0.01 * x).into(),
        ]);
        t.push_row(row);
    }
    t
}

#[derive(Default)]
struct FakeSource {
    calls: usize,
}

impl Source for FakeSource {
    fn fetch_table(&mut self, url: &str, locator: &TableLocator) -> Result<Table, FetchError> {
        self.calls += 1;
        match locator {
            TableLocator::MarketValueList if url.ends_with("page=1") => Ok(market()),
            TableLocator::MarketValueList => Ok(Table::with_columns("transfermarkt", &MARKET_COLUMNS)),
            TableLocator::IdSuffix(_) => Ok(standings()),
            TableLocator::ElementId(id) if id == "stats_standard" => Ok(standard()),
            TableLocator::ElementId(id) if id == "stats_shooting" => Ok(shooting()),
            TableLocator::ElementId(id) => Err(FetchError::NoTable {
                locator: format!("#{id}"),
            }),
        }
    }

    fn fetch_json(&mut self, url: &str) -> Result<Value, FetchError> {
        Err(FetchError::Blocked { url: url.to_string() })
    }
}

fn fbref_table(key: &str, page: &str) -> FbrefTable {
    FbrefTable {
        key: key.to_string(),
        page: page.to_string(),
        table_id: key.to_string(),
    }
}

fn config() -> PipelineConfig {
    PipelineConfig {
        leagues: vec![default_leagues()[0].clone()],
        tables: vec![
            fbref_table("stats_standard", "stats"),
            fbref_table("stats_shooting", "shooting"),
            fbref_table("stats_keeper", "keepers"),
        ],
        playing_time: PlayingTimePolicy::Off,
        market_pages: 3,
        ..PipelineConfig::default()
    }
}

fn scheduler() -> FreshnessScheduler {
    FreshnessScheduler::at(30, false, NaiveDate::from_ymd_opt(2024, 5, 1).unwrap())
}

fn row_of(table: &Table, player: &str) -> usize {
    (0..table.len())
        .find(|&r| table.cell(r, "Player").as_text() == Some(player))
        .unwrap_or_else(|| panic!("{player} missing"))
}

#[test]
fn full_run_scrapes_merges_and_scores() {
    let config = config();
    let mut store = MemoryStore::new();
    let mut source = FakeSource::default();
    let report = Pipeline::new(&config, &mut store, &mut source, scheduler())
        .run(RunMode::All)
        .unwrap();

    assert_eq!(report.fetched, vec![MARKET_SHEET, STANDINGS_SHEET, "Premier-League", ALL_SHEET]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "Premier-League/stats_keeper");

    let league = store.load_table(STATS_DATASET, "Premier-League").unwrap();
    assert_eq!(league.len(), STRIKERS + 2);
    for column in [
        "Player_raw",
        "Position",
        "Pos_group",
        "Market_Value_EUR",
        "stats_shooting__Standard.Sh/90",
        "League_Position",
        "Points_%",
        "Date",
    ] {
        assert!(league.has_column(column), "{column} missing");
    }
    assert!(!league.has_column("stats_shooting__Table"));

    let striker = row_of(&league, "Striker 3");
    assert_eq!(league.cell(striker, "League").as_text(), Some("Premier_League"));
    assert_eq!(league.cell(striker, "Market_Value_EUR").as_f64(), Some(20e6));
    assert_eq!(league.cell(striker, "Pos_group").as_text(), Some("ST"));
    assert_eq!(league.cell(striker, "League_Position").as_f64(), Some(2.0));

    // Unmatched players keep their source name and get no market data.
    let unknown = row_of(&league, "Unknown Guy");
    assert!(league.cell(unknown, "Market_Value_EUR").is_null());
    assert_eq!(league.cell(unknown, "Player_raw").as_text(), Some("Unknown Guy"));
    assert!(league.cell(unknown, "stats_shooting__Standard.Sh/90").is_null());

    let all = store.load_table(STATS_DATASET, ALL_SHEET).unwrap();
    assert_eq!(all.len(), league.len());

    assert_eq!(
        store.sheet_keys(POSITION_DATASET).unwrap(),
        vec!["GK".to_string(), "ST".to_string(), ALL_SHEET.to_string()]
    );
    let st = store.load_table(POSITION_DATASET, "ST").unwrap();
    assert_eq!(st.len(), STRIKERS);
    assert!((0..st.len()).all(|r| st.cell(r, PREDICTED_COLUMN).as_f64().is_some()));
    let gk = store.load_table(POSITION_DATASET, "GK").unwrap();
    assert_eq!(gk.len(), 1);
    assert!(!gk.has_column(PREDICTED_COLUMN));

    assert_eq!(report.groups.len(), 1);
    assert_eq!(report.groups[0].group, "ST");
    assert_eq!(report.groups[0].trained_rows, STRIKERS);
}

#[test]
fn fresh_sheets_are_not_fetched_again() {
    let config = config();
    let mut store = MemoryStore::new();
    let mut source = FakeSource::default();
    Pipeline::new(&config, &mut store, &mut source, scheduler())
        .run(RunMode::Scrape)
        .unwrap();
    let calls = source.calls;
    assert!(calls > 0);

    let report = Pipeline::new(&config, &mut store, &mut source, scheduler())
        .run(RunMode::Scrape)
        .unwrap();
    assert!(report.fetched.is_empty());
    assert_eq!(report.skipped.len(), 4);
    assert_eq!(source.calls, calls);

    let forced = FreshnessScheduler::at(30, true, NaiveDate::from_ymd_opt(2024, 5, 1).unwrap());
    let report = Pipeline::new(&config, &mut store, &mut source, forced)
        .run(RunMode::Scrape)
        .unwrap();
    assert_eq!(report.fetched.len(), 4);
    assert!(source.calls > calls);
}

#[test]
fn scoring_without_scraped_data_fails() {
    let config = config();
    let mut store = MemoryStore::new();
    let mut source = FakeSource::default();
    let err = Pipeline::new(&config, &mut store, &mut source, scheduler())
        .run(RunMode::Score)
        .unwrap_err();
    assert!(format!("{err:#}").contains("run a scrape first"));
    assert_eq!(source.calls, 0);
}

#[test]
fn rerun_on_fresh_data_writes_nothing() {
    let config = config();
    let mut store = MemoryStore::new();
    let mut source = FakeSource::default();
    Pipeline::new(&config, &mut store, &mut source, scheduler())
        .run(RunMode::All)
        .unwrap();
    let calls = source.calls;
    let scored = store.load_table(POSITION_DATASET, ALL_SHEET).unwrap();

    let report = Pipeline::new(&config, &mut store, &mut source, scheduler())
        .run(RunMode::All)
        .unwrap();
    assert!(report.fetched.is_empty());
    assert_eq!(report.rows_written, 0);
    assert!(report.groups.is_empty());
    assert_eq!(source.calls, calls);
    let kept = store.load_table(POSITION_DATASET, ALL_SHEET).unwrap();
    assert_eq!(kept.len(), scored.len());
    assert_eq!(kept.columns(), scored.columns());

    // An explicit score run always rescores.
    let report = Pipeline::new(&config, &mut store, &mut source, scheduler())
        .run(RunMode::Score)
        .unwrap();
    assert!(report.rows_written > 0);
    assert_eq!(report.groups.len(), 1);
    assert_eq!(source.calls, calls);
}

#[test]
fn scrape_only_run_leaves_scoring_to_the_next_all_run() {
    let config = config();
    let mut store = MemoryStore::new();
    let mut source = FakeSource::default();
    Pipeline::new(&config, &mut store, &mut source, scheduler())
        .run(RunMode::Scrape)
        .unwrap();
    assert!(store.sheet_keys(POSITION_DATASET).unwrap().is_empty());

    let report = Pipeline::new(&config, &mut store, &mut source, scheduler())
        .run(RunMode::All)
        .unwrap();
    assert!(report.fetched.is_empty());
    assert_eq!(report.groups.len(), 1);
    assert!(store.load_table(POSITION_DATASET, "ST").is_ok());
}
