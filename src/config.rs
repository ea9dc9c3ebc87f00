use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::freshness::DEFAULT_OFFSET_DAYS;
use crate::http_client::FetchPolicy;
use crate::identity::DEFAULT_MATCH_THRESHOLD;
use crate::merge::{MergePolicy, PlayingTimePolicy};
use crate::normalize::{DEFAULT_EXPOSURE_COLUMN, DEFAULT_MINUTES_COLUMN, FeatureClassification};
use crate::predict::{EnsembleWeights, PredictorConfig};
use crate::schema::FeatureSchema;

pub const DEFAULT_MIN_DELAY_MS: u64 = 3000;
pub const DEFAULT_MARKET_PAGES: u32 = 20;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeagueConfig {
    /// Sheet key, e.g. `Premier-League`.
    pub key: String,
    pub fbref_id: u32,
    pub fbref_slug: String,
    pub transfermarkt_slug: String,
    pub transfermarkt_code: String,
    #[serde(default)]
    pub sofascore_id: Option<u32>,
}

impl LeagueConfig {
    /// Value of the `League` column: the key with `+`, `-` and spaces as `_`.
    pub fn label(&self) -> String {
        self.key
            .chars()
            .map(|c| if matches!(c, '+' | '-' | ' ') { '_' } else { c })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FbrefTable {
    /// Source name; prefixes merged columns as `<key>__`.
    pub key: String,
    pub page: String,
    pub table_id: String,
}

fn league(key: &str, fbref_id: u32, tm_slug: &str, tm_code: &str, sofascore_id: u32) -> LeagueConfig {
    LeagueConfig {
        key: key.to_string(),
        fbref_id,
        fbref_slug: key.to_string(),
        transfermarkt_slug: tm_slug.to_string(),
        transfermarkt_code: tm_code.to_string(),
        sofascore_id: Some(sofascore_id),
    }
}

fn fbref_table(key: &str, page: &str) -> FbrefTable {
    FbrefTable {
        key: key.to_string(),
        page: page.to_string(),
        table_id: key.to_string(),
    }
}

pub fn default_leagues() -> Vec<LeagueConfig> {
    vec![
        league("Premier-League", 9, "premier-league", "GB1", 17),
        league("Bundesliga", 20, "bundesliga", "L1", 35),
        league("La-Liga", 12, "laliga", "ES1", 8),
        league("Serie-A", 11, "serie-a", "IT1", 23),
        league("Ligue-1", 13, "ligue-1", "FR1", 34),
    ]
}

pub fn default_tables() -> Vec<FbrefTable> {
    vec![
        fbref_table("stats_standard", "stats"),
        fbref_table("stats_shooting", "shooting"),
        fbref_table("stats_passing", "passing"),
        fbref_table("stats_passing_types", "passing_types"),
        fbref_table("stats_gca", "gca"),
        fbref_table("stats_defense", "defense"),
        fbref_table("stats_possession", "possession"),
        fbref_table("stats_playing_time", "playingtime"),
        fbref_table("stats_misc", "misc"),
        fbref_table("stats_keeper", "keepers"),
        fbref_table("stats_keeper_adv", "keepersadv"),
    ]
}

/// Everything a run needs. Built from defaults, then an optional JSON file,
/// then environment overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub data_dir: PathBuf,
    pub offset_days: i64,
    pub match_threshold: f64,
    pub playing_time: PlayingTimePolicy,
    pub weights: EnsembleWeights,
    pub min_delay_ms: u64,
    pub sofascore: bool,
    pub market_pages: u32,
    pub n_components: usize,
    pub exposure_column: String,
    pub minutes_column: String,
    pub leagues: Vec<LeagueConfig>,
    pub tables: Vec<FbrefTable>,
    pub merge: MergePolicy,
    pub classification: FeatureClassification,
    pub schema: FeatureSchema,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            offset_days: DEFAULT_OFFSET_DAYS,
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            playing_time: PlayingTimePolicy::default(),
            weights: EnsembleWeights::default(),
            min_delay_ms: DEFAULT_MIN_DELAY_MS,
            sofascore: false,
            market_pages: DEFAULT_MARKET_PAGES,
            n_components: crate::embedding::DEFAULT_COMPONENTS,
            exposure_column: DEFAULT_EXPOSURE_COLUMN.to_string(),
            minutes_column: DEFAULT_MINUTES_COLUMN.to_string(),
            leagues: default_leagues(),
            tables: default_tables(),
            merge: MergePolicy::default(),
            classification: FeatureClassification::default(),
            schema: FeatureSchema::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).with_context(|| format!("read config {}", path.display()))?;
        let config: Self =
            serde_json::from_str(&raw).with_context(|| format!("parse config {}", path.display()))?;
        config.weights.validate().context("config weights")?;
        Ok(config)
    }

    pub fn from_env() -> Result<Self> {
        let mut config = match env::var("MV_SCOUT_CONFIG").ok().filter(|p| !p.trim().is_empty()) {
            Some(path) => Self::from_json_file(Path::new(path.trim()))?,
            None => Self::default(),
        };
        config.apply_overrides(|key| env::var(key).ok())?;
        Ok(config)
    }

    /// Applies `MV_SCOUT_*` overrides from `lookup`. Unparsable values are
    /// logged and ignored; an unreadable classification file is an error.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(dir) = get("MV_SCOUT_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(v) = get("MV_SCOUT_OFFSET_DAYS") {
            match v.parse::<i64>() {
                Ok(days) if days >= 0 => self.offset_days = days,
                _ => warn!(value = %v, "ignoring MV_SCOUT_OFFSET_DAYS"),
            }
        }
        if let Some(v) = get("MV_SCOUT_MATCH_THRESHOLD") {
            match v.parse::<f64>() {
                Ok(t) if (0.0..=100.0).contains(&t) => self.match_threshold = t,
                _ => warn!(value = %v, "ignoring MV_SCOUT_MATCH_THRESHOLD"),
            }
        }
        if let Some(v) = get("MV_SCOUT_PLAYING_TIME") {
            match PlayingTimePolicy::parse(&v) {
                Some(policy) => self.playing_time = policy,
                None => warn!(value = %v, "ignoring MV_SCOUT_PLAYING_TIME"),
            }
        }
        if let Some(v) = get("MV_SCOUT_WEIGHTS") {
            match EnsembleWeights::parse(&v) {
                Ok(w) => self.weights = w,
                Err(err) => warn!(value = %v, "ignoring MV_SCOUT_WEIGHTS: {err:#}"),
            }
        }
        if let Some(v) = get("MV_SCOUT_MIN_DELAY_MS") {
            match v.parse::<u64>() {
                Ok(ms) => self.min_delay_ms = ms,
                Err(_) => warn!(value = %v, "ignoring MV_SCOUT_MIN_DELAY_MS"),
            }
        }
        if let Some(v) = get("MV_SCOUT_SOFASCORE") {
            let t = v.to_ascii_lowercase();
            self.sofascore = !(t == "0" || t == "false" || t == "off" || t == "no");
        }
        if let Some(path) = get("MV_SCOUT_FEATURE_CLASSES") {
            self.classification = FeatureClassification::load(Path::new(&path))?;
        }
        Ok(())
    }

    pub fn predictor(&self) -> PredictorConfig {
        PredictorConfig {
            weights: self.weights,
            n_components: self.n_components,
            ..PredictorConfig::default()
        }
    }

    pub fn fetch_policy(&self) -> FetchPolicy {
        FetchPolicy {
            min_delay: Duration::from_millis(self.min_delay_ms),
            ..FetchPolicy::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn overrides_apply_and_bad_values_are_ignored() {
        let vars = HashMap::from([
            ("MV_SCOUT_OFFSET_DAYS", "7"),
            ("MV_SCOUT_PLAYING_TIME", "percentile:0.3"),
            ("MV_SCOUT_WEIGHTS", "0.5,0.5,0.5,0.5"),
            ("MV_SCOUT_SOFASCORE", "1"),
        ]);
        let mut config = PipelineConfig::default();
        config
            .apply_overrides(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.offset_days, 7);
        assert_eq!(config.playing_time, PlayingTimePolicy::Percentile { quantile: 0.3 });
        assert_eq!(config.weights, EnsembleWeights::default());
        assert!(config.sofascore);
    }

    #[test]
    fn league_label_replaces_separators() {
        assert_eq!(default_leagues()[0].label(), "Premier_League");
    }
}
