use std::fmt;
use std::str::FromStr;

use anyhow::{Context, Result, anyhow, bail};
use tracing::{error, info, warn};

use crate::config::{LeagueConfig, PipelineConfig};
use crate::error::ModelError;
use crate::fbref::{clean_player_table, stats_url};
use crate::freshness::{FreshnessScheduler, stamp_date};
use crate::identity::IdentityResolver;
use crate::merge::{MergePolicy, merge_pair, merge_tables};
use crate::normalize::{
    GroupDimension, combine_columnwise, context_features, normalize_per90, standardize_by_group,
    zscore_within_group,
};
use crate::predict::{GroupScore, predict_position_group};
use crate::sofascore;
use crate::source::{Source, TableLocator};
use crate::standings::{attach_club_context, club_context};
use crate::store::TableStore;
use crate::table::{Cell, Table};
use crate::transfermarkt::{add_position_codes, market_value_url};

pub const STATS_DATASET: &str = "Player_Stats";
pub const POSITION_DATASET: &str = "Position_Data";
pub const MARKET_SHEET: &str = "Transfermarkt_Market_Values";
pub const STANDINGS_SHEET: &str = "Club_Standings";
pub const ALL_SHEET: &str = "All";
pub const LEAGUE_CONTEXT_PREFIX: &str = "LeagueCtx";
pub const STANDINGS_SUFFIX: &str = "_overall";

/// Columns pulled from the market-value reference onto player rows.
pub const IDENTITY_TARGETS: [&str; 3] = ["Position", "Pos_group", "Market_Value_EUR"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Scrape,
    Score,
    All,
}

impl RunMode {
    fn scrapes(self) -> bool {
        matches!(self, RunMode::Scrape | RunMode::All)
    }

    fn scores(self) -> bool {
        matches!(self, RunMode::Score | RunMode::All)
    }
}

impl FromStr for RunMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "scrape" => Ok(RunMode::Scrape),
            "score" => Ok(RunMode::Score),
            "all" => Ok(RunMode::All),
            other => Err(anyhow!("unknown mode '{other}' (expected scrape, score or all)")),
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunMode::Scrape => "scrape",
            RunMode::Score => "score",
            RunMode::All => "all",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    pub fetched: Vec<String>,
    pub skipped: Vec<String>,
    /// Failed units with the reason.
    pub failed: Vec<(String, String)>,
    pub rows_written: usize,
    pub groups: Vec<GroupScore>,
}

impl RunReport {
    fn fail(&mut self, unit: impl Into<String>, err: &anyhow::Error) {
        let unit = unit.into();
        error!(unit = %unit, "unit failed: {err:#}");
        self.failed.push((unit, format!("{err:#}")));
    }
}

/// Output of the scoring stage: one sheet per position group plus `All`.
#[derive(Debug, Clone, Default)]
pub struct ScoreOutput {
    pub sheets: Vec<(String, Table)>,
    pub groups: Vec<GroupScore>,
}

/// One batch run over the configured leagues, strictly sequential.
pub struct Pipeline<'a> {
    config: &'a PipelineConfig,
    store: &'a mut dyn TableStore,
    source: &'a mut dyn Source,
    scheduler: FreshnessScheduler,
    resolver: IdentityResolver,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        config: &'a PipelineConfig,
        store: &'a mut dyn TableStore,
        source: &'a mut dyn Source,
        scheduler: FreshnessScheduler,
    ) -> Self {
        Self {
            config,
            store,
            source,
            scheduler,
            resolver: IdentityResolver::new(config.match_threshold),
        }
    }

    pub fn run(&mut self, mode: RunMode) -> Result<RunReport> {
        info!(%mode, leagues = self.config.leagues.len(), "pipeline run");
        let mut report = RunReport::default();
        if mode.scrapes() {
            self.scrape(&mut report)?;
        }
        if mode == RunMode::Score || (mode.scores() && self.needs_scoring(&report)?) {
            self.score(&mut report)?;
        } else if mode.scores() {
            info!("scored sheets are up to date, nothing to score");
            report.skipped.push(format!("{POSITION_DATASET}/{ALL_SHEET}"));
        }
        info!(
            fetched = report.fetched.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            rows = report.rows_written,
            cache_hits = self.resolver.cache().hits(),
            "pipeline done"
        );
        Ok(report)
    }

    /// Whether scoring after a scrape has anything new to do: this run wrote
    /// sheets, the scored output is missing or stale, or it predates the
    /// combined sheet it was scored from.
    fn needs_scoring(&self, report: &RunReport) -> Result<bool> {
        if !report.fetched.is_empty() {
            return Ok(true);
        }
        let scored = self
            .store
            .recorded_dates(POSITION_DATASET)
            .context("read scored snapshot dates")?;
        if !self.scheduler.plan(&[ALL_SHEET.to_string()], &scored).is_noop() {
            return Ok(true);
        }
        let scraped = self
            .store
            .recorded_dates(STATS_DATASET)
            .context("read recorded snapshot dates")?;
        Ok(match (scored.get(ALL_SHEET), scraped.get(ALL_SHEET)) {
            (Some(scored), Some(scraped)) => scored < scraped,
            _ => true,
        })
    }

    fn store_sheet(&mut self, table: &Table, dataset: &str, sheet: &str, report: &mut RunReport) -> Result<()> {
        self.store
            .store_table(table, dataset, sheet)
            .with_context(|| format!("store {dataset}/{sheet}"))?;
        report.rows_written += table.len();
        Ok(())
    }

    fn load_or_empty(&self, dataset: &str, sheet: &str) -> Result<Table> {
        match self.store.load_table(dataset, sheet) {
            Ok(t) => Ok(t),
            Err(err) if err.is_not_found() => Ok(Table::new(sheet, Vec::new())),
            Err(err) => Err(err).with_context(|| format!("load {dataset}/{sheet}")),
        }
    }

    fn expected_sheets(&self) -> Vec<String> {
        let mut sheets: Vec<String> = self.config.leagues.iter().map(|l| l.key.clone()).collect();
        sheets.push(ALL_SHEET.to_string());
        sheets.push(MARKET_SHEET.to_string());
        sheets.push(STANDINGS_SHEET.to_string());
        sheets
    }

    fn scrape(&mut self, report: &mut RunReport) -> Result<()> {
        let recorded = self
            .store
            .recorded_dates(STATS_DATASET)
            .context("read recorded snapshot dates")?;
        let plan = self.scheduler.plan(&self.expected_sheets(), &recorded);
        report.skipped.extend(plan.fresh.iter().cloned());
        if plan.is_noop() {
            info!("every sheet is fresh, nothing to scrape");
            return Ok(());
        }

        let market = if plan.is_stale(MARKET_SHEET) {
            let market = self.scrape_market_values(report);
            self.store_sheet(&market, STATS_DATASET, MARKET_SHEET, report)?;
            report.fetched.push(MARKET_SHEET.to_string());
            market
        } else {
            self.load_or_empty(STATS_DATASET, MARKET_SHEET)?
        };

        let standings = if plan.is_stale(STANDINGS_SHEET) {
            let standings = self.scrape_standings(report);
            self.store_sheet(&standings, STATS_DATASET, STANDINGS_SHEET, report)?;
            report.fetched.push(STANDINGS_SHEET.to_string());
            standings
        } else {
            self.load_or_empty(STATS_DATASET, STANDINGS_SHEET)?
        };

        let config = self.config;
        let mut any_league_written = false;
        for league in &config.leagues {
            if !plan.is_stale(&league.key) {
                continue;
            }
            match self.scrape_league(league, &market, &standings, report) {
                Ok(table) => {
                    self.store_sheet(&table, STATS_DATASET, &league.key, report)?;
                    report.fetched.push(league.key.clone());
                    any_league_written = true;
                }
                Err(err) => report.fail(league.key.clone(), &err),
            }
        }

        if any_league_written || plan.is_stale(ALL_SHEET) {
            let mut sheets = Vec::new();
            for league in &config.leagues {
                let sheet = self.load_or_empty(STATS_DATASET, &league.key)?;
                if !sheet.is_empty() {
                    sheets.push(sheet);
                }
            }
            let all = Table::concat(ALL_SHEET, &sheets);
            self.store_sheet(&all, STATS_DATASET, ALL_SHEET, report)?;
            report.fetched.push(ALL_SHEET.to_string());
        }
        Ok(())
    }

    fn scrape_market_values(&mut self, report: &mut RunReport) -> Table {
        let mut pages: Vec<Table> = Vec::new();
        for league in &self.config.leagues {
            let label = league.label();
            let mut league_rows = 0;
            for page in 1..=self.config.market_pages.max(1) {
                let url = market_value_url(&league.transfermarkt_slug, &league.transfermarkt_code, page);
                match self.source.fetch_table(&url, &TableLocator::MarketValueList) {
                    Ok(mut table) if !table.is_empty() => {
                        league_rows += table.len();
                        fill_column(&mut table, "League", Cell::text(&label));
                        pages.push(table);
                    }
                    Ok(_) => break,
                    Err(err) => {
                        report.fail(format!("{MARKET_SHEET}/{}", league.key), &anyhow!(err));
                        break;
                    }
                }
            }
            info!(league = %league.key, players = league_rows, "market values scraped");
        }
        let mut market = Table::concat(MARKET_SHEET, &pages);
        add_position_codes(&mut market);
        stamp_date(&mut market, self.scheduler.today());
        market
    }


    fn scrape_standings(&mut self, report: &mut RunReport) -> Table {
        let config = self.config;
        let mut clubs: Vec<Table> = Vec::new();
        for league in &config.leagues {
            let url = stats_url(league.fbref_id, "", &league.fbref_slug);
            let locator = TableLocator::IdSuffix(STANDINGS_SUFFIX.to_string());
            let context = self
                .source
                .fetch_table(&url, &locator)
                .map_err(anyhow::Error::from)
                .and_then(|t| Ok(club_context(&t, &league.label())?));
            match context {
                Ok(table) => clubs.push(table),
                Err(err) => report.fail(format!("{STANDINGS_SHEET}/{}", league.key), &err),
            }
        }
        let mut standings = Table::concat(STANDINGS_SHEET, &clubs);
        stamp_date(&mut standings, self.scheduler.today());
        standings
    }

    /// Fetches, filters and merges every configured table of one league,
    /// then attaches identity, club context and optional live statistics.
    fn scrape_league(
        &mut self,
        league: &LeagueConfig,
        market: &Table,
        standings: &Table,
        report: &mut RunReport,
    ) -> Result<Table> {
        let config = self.config;
        let label = league.label();
        let mut tables: Vec<Table> = Vec::new();
        for fbref_table in &config.tables {
            let url = stats_url(league.fbref_id, &fbref_table.page, &league.fbref_slug);
            let locator = TableLocator::ElementId(fbref_table.table_id.clone());
            let mut table = match self.source.fetch_table(&url, &locator) {
                Ok(t) => t,
                Err(err) => {
                    report.fail(format!("{}/{}", league.key, fbref_table.key), &anyhow!(err));
                    continue;
                }
            };
            table.name = fbref_table.key.clone();
            clean_player_table(&mut table);
            let removed = config.playing_time.apply(&mut table);
            fill_column(&mut table, "League", Cell::text(&label));
            fill_column(&mut table, "Table", Cell::text(&fbref_table.key));
            info!(league = %league.key, table = %fbref_table.key, rows = table.len(), removed, "table fetched");
            tables.push(table);
        }
        if tables.is_empty() {
            bail!("no table could be fetched for {}", league.key);
        }

        let mut merged = merge_tables(&tables, &config.merge);
        merged.name = league.key.clone();
        self.resolve_identity(&mut merged, market, &label)?;

        let clubs = rows_where(standings, "League", &label);
        if clubs.is_empty() {
            warn!(league = %league.key, "no standings context");
        } else {
            attach_club_context(&mut merged, &clubs, &mut self.resolver)?;
        }

        if config.sofascore {
            if let Some(tournament_id) = league.sofascore_id {
                match self.attach_sofascore(&mut merged, &label, tournament_id) {
                    Ok(merged_with_live) => merged = merged_with_live,
                    Err(err) => warn!(league = %league.key, "sofascore skipped: {err:#}"),
                }
            }
        }

        stamp_date(&mut merged, self.scheduler.today());
        Ok(merged)
    }

    /// Canonicalizes player names against the league's market-value rows and
    /// pulls position and market value. Unmatched players keep their source
    /// name, which stays available in `Player_raw` either way.
    fn resolve_identity(&mut self, merged: &mut Table, market: &Table, label: &str) -> Result<()> {
        let Some(raw) = merged.cells("Player").map(|c| c.into_iter().cloned().collect::<Vec<_>>()) else {
            bail!("merged table {} has no Player column", merged.name);
        };
        merged.set_column("Player_raw", raw.clone());

        let mut reference = rows_where(market, "League", label);
        if reference.is_empty() {
            reference = market.clone();
        }
        for target in IDENTITY_TARGETS {
            if !reference.is_empty() && !reference.has_column(target) {
                warn!(column = target, "market reference lacks column");
                continue;
            }
            let report = self.resolver.resolve(merged, &reference, "Player", target)?;
            if target == IDENTITY_TARGETS[0] {
                info!(
                    table = %merged.name,
                    matched = report.matched,
                    distinct = report.distinct,
                    rate = report.match_rate(),
                    "player identity resolved"
                );
            }
        }

        let canonical: Vec<Cell> = merged
            .cells("Player")
            .unwrap_or_default()
            .into_iter()
            .zip(&raw)
            .map(|(c, r)| if c.is_null() { r.clone() } else { c.clone() })
            .collect();
        merged.set_column("Player", canonical);
        Ok(())
    }

    fn attach_sofascore(&mut self, merged: &mut Table, label: &str, tournament_id: u32) -> Result<Table> {
        let mut live = sofascore::scrape_league(&mut *self.source, label, tournament_id)?;
        if live.is_empty() {
            return Ok(merged.clone());
        }
        live.name = sofascore::SOURCE_NAME.to_string();
        self.resolver.resolve(&mut live, merged, "Player", "Player")?;
        if let Some(idx) = live.column_index("Player") {
            live.retain_rows(|row| !row[idx].is_null());
        }
        let policy = MergePolicy::with_keys(&["Player", "League"]);
        Ok(merge_pair(merged, &live, &policy)?)
    }

    fn score(&mut self, report: &mut RunReport) -> Result<()> {
        let all = self
            .store
            .load_table(STATS_DATASET, ALL_SHEET)
            .with_context(|| format!("load {STATS_DATASET}/{ALL_SHEET}; run a scrape first"))?;
        let output = score_table(all, self.config)?;
        for (sheet, table) in &output.sheets {
            self.store_sheet(table, POSITION_DATASET, sheet, report)?;
        }
        report.groups.extend(output.groups);
        Ok(())
    }
}

/// Normalizes, standardizes and scores a combined player table, returning
/// one sheet per position group of the schema plus `All`.
///
/// Groups without rows are skipped. A group without enough known market
/// values is kept unscored.
pub fn score_table(mut table: Table, config: &PipelineConfig) -> Result<ScoreOutput> {
    let features: Vec<String> = config
        .schema
        .all_feature_columns()
        .into_iter()
        .filter(|c| table.has_column(c))
        .collect();
    match normalize_per90(&mut table, &features, &config.exposure_column, &config.classification) {
        Ok(scaled) => info!(columns = scaled.len(), "per-90 normalization"),
        Err(err) => warn!("per-90 normalization skipped: {err}"),
    }

    let ctx = context_features(&mut table, &config.minutes_column, &config.exposure_column);
    let league_ctx = match zscore_within_group(&mut table, &ctx, &["League"], LEAGUE_CONTEXT_PREFIX) {
        Ok(cols) => cols,
        Err(err) => {
            warn!("league context z-scores skipped: {err}");
            Vec::new()
        }
    };

    let predictor = config.predictor();
    let dimensions = [
        GroupDimension::values("League"),
        GroupDimension::age("Age"),
        GroupDimension::values("Pos_group"),
    ];
    let group_idx = table.group_indices("Pos_group");

    let mut output = ScoreOutput::default();
    for schema in &config.schema.groups {
        let Some((_, rows)) = group_idx.iter().find(|(g, _)| *g == schema.group) else {
            info!(group = %schema.group, "no players in position group");
            continue;
        };
        let mut sub = table.select_rows(rows);
        sub.name = schema.group.clone();
        let feats: Vec<String> = schema
            .feature_columns()
            .into_iter()
            .filter(|c| sub.has_column(c))
            .collect();

        let mut parts = Vec::new();
        for dim in &dimensions {
            match standardize_by_group(&sub, dim, &feats) {
                Ok(part) => parts.push(part),
                Err(err) => warn!(group = %schema.group, dimension = dim.name(), "standardization skipped: {err}"),
            }
        }
        let mut standardized: Vec<String> = parts.iter().flat_map(|p| p.columns().to_vec()).collect();
        combine_columnwise(&mut sub, &parts);
        standardized.extend(league_ctx.iter().cloned());

        match predict_position_group(&mut sub, schema, &standardized, &predictor) {
            Ok(score) => output.groups.push(score),
            Err(err @ (ModelError::InsufficientRows { .. } | ModelError::Empty)) => {
                warn!(group = %schema.group, rows = sub.len(), "group left unscored: {err}");
            }
            Err(err) => return Err(err.into()),
        }
        output.sheets.push((schema.group.clone(), sub));
    }

    let groups: Vec<Table> = output.sheets.iter().map(|(_, t)| t.clone()).collect();
    output.sheets.push((ALL_SHEET.to_string(), Table::concat(ALL_SHEET, &groups)));
    Ok(output)
}

/// Rows whose `column` equals `value`; empty when the column is absent.
fn rows_where(table: &Table, column: &str, value: &str) -> Table {
    let Some(idx) = table.column_index(column) else {
        return Table::new(table.name.clone(), table.columns().to_vec());
    };
    let rows: Vec<usize> = table
        .rows()
        .iter()
        .enumerate()
        .filter(|(_, r)| r[idx].key_repr() == value)
        .map(|(i, _)| i)
        .collect();
    table.select_rows(&rows)
}

fn fill_column(table: &mut Table, column: &str, value: Cell) {
    let n = table.len();
    table.set_column(column, vec![value; n]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_mode_parses_case_insensitively() {
        assert_eq!("Scrape".parse::<RunMode>().unwrap(), RunMode::Scrape);
        assert_eq!(" all ".parse::<RunMode>().unwrap(), RunMode::All);
        assert!("train".parse::<RunMode>().is_err());
        assert_eq!(RunMode::Score.to_string(), "score");
    }

    #[test]
    fn rows_where_keeps_columns_when_nothing_matches() {
        let mut t = Table::with_columns("m", &["Player", "League"]);
        t.push_row(vec!["A".into(), "Serie_A".into()]);
        t.push_row(vec!["B".into(), "Ligue_1".into()]);
        let hit = rows_where(&t, "League", "Ligue_1");
        assert_eq!(hit.len(), 1);
        assert_eq!(hit.cell(0, "Player").as_text(), Some("B"));
        let miss = rows_where(&t, "League", "Bundesliga");
        assert!(miss.is_empty());
        assert_eq!(miss.columns().len(), 2);
    }
}
