use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::SchemaError;
use crate::schema::NON_FEATURES;
use crate::table::{Cell, Table};

/// Substrings marking a column as already a rate, share or per-90 metric.
pub const DEFAULT_RATE_MARKERS: [&str; 11] = [
    "percentage",
    "/90",
    "90s",
    "%",
    "rating",
    "frequency",
    "conversion",
    "appearances",
    "minute",
    "matches",
    "clean",
];

pub const DEFAULT_EXPOSURE_COLUMN: &str = "Playing_Time.90s";
pub const DEFAULT_MINUTES_COLUMN: &str = "Playing_Time.Min";
pub const AGE_DIMENSION: &str = "Age_bucket";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureClass {
    /// Already a rate; passes through per-90 normalization unchanged.
    Rate,
    /// Raw count; divided by the exposure column.
    Counting,
    /// Not a feature at all.
    Excluded,
}

/// Declarative feature-name classification. Explicit overrides win; otherwise
/// identity columns are excluded and any column containing a rate marker
/// (case-insensitive) is a rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureClassification {
    pub overrides: BTreeMap<String, FeatureClass>,
    pub rate_markers: Vec<String>,
}

impl Default for FeatureClassification {
    fn default() -> Self {
        Self {
            overrides: BTreeMap::new(),
            rate_markers: DEFAULT_RATE_MARKERS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl FeatureClassification {
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).context("parse feature classification")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        Self::from_json(&raw)
    }

    pub fn classify(&self, column: &str) -> FeatureClass {
        if let Some(class) = self.overrides.get(column) {
            return *class;
        }
        if NON_FEATURES.contains(&column) {
            return FeatureClass::Excluded;
        }
        let lower = column.to_lowercase();
        if self
            .rate_markers
            .iter()
            .any(|m| lower.contains(&m.to_lowercase()))
        {
            FeatureClass::Rate
        } else {
            FeatureClass::Counting
        }
    }
}

/// Divides every counting feature by the exposure column, in place.
///
/// Rate and excluded features are left untouched, as are features missing
/// from the table. Null raw values stay null; a zero, null or NaN exposure
/// yields NaN. Returns the columns that were rescaled.
pub fn normalize_per90(
    table: &mut Table,
    features: &[String],
    exposure_column: &str,
    classification: &FeatureClassification,
) -> Result<Vec<String>, SchemaError> {
    let exposure_idx = table.require_column(exposure_column)?;
    let exposure: Vec<Option<f64>> = table.rows().iter().map(|r| r[exposure_idx].as_f64()).collect();

    let mut rescaled = Vec::new();
    for feature in features {
        if feature == exposure_column || classification.classify(feature) != FeatureClass::Counting {
            continue;
        }
        let Some(values) = table.numeric_column(feature) else {
            debug!(column = %feature, "feature absent, not normalized");
            continue;
        };
        let scaled: Vec<Cell> = values
            .iter()
            .zip(&exposure)
            .map(|(raw, exp)| match (raw, exp) {
                (None, _) => Cell::Null,
                (Some(v), Some(e)) if *e != 0.0 => Cell::Num(v / e),
                (Some(_), _) => Cell::Num(f64::NAN),
            })
            .collect();
        table.set_column(feature, scaled);
        rescaled.push(feature.clone());
    }
    Ok(rescaled)
}

/// Mean and standard deviation of the finite values. The deviation is `None`
/// when it is undefined for the sample size.
pub fn mean_std(values: &[f64], ddof: usize) -> (f64, Option<f64>) {
    let n = values.len();
    if n == 0 {
        return (f64::NAN, None);
    }
    let mean = values.iter().sum::<f64>() / n as f64;
    if n <= ddof {
        return (mean, None);
    }
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - ddof) as f64;
    (mean, Some(var.sqrt()))
}

fn zscore(value: f64, mean: f64, sd: Option<f64>) -> f64 {
    match sd {
        Some(sd) if sd > 0.0 && sd.is_finite() => (value - mean) / sd,
        _ => 0.0,
    }
}

/// Half-open age buckets: `[lo, hi)`.
pub const AGE_BUCKETS: [(f64, f64, &str); 4] = [
    (0.0, 19.0, "U19"),
    (19.0, 23.0, "19-23"),
    (23.0, 30.0, "23-30"),
    (30.0, 101.0, "30+"),
];

pub fn age_bucket(age: f64) -> Option<&'static str> {
    AGE_BUCKETS
        .iter()
        .find(|(lo, hi, _)| age >= *lo && age < *hi)
        .map(|(_, _, label)| *label)
}

/// Age in whole years; FBref writes `"25-123"` (years-days).
pub fn parse_age(cell: &Cell) -> Option<f64> {
    match cell {
        Cell::Text(s) => {
            let years = s.trim().split('-').next()?.trim();
            years.parse::<f64>().ok().filter(|v| v.is_finite())
        }
        other => other.as_f64(),
    }
}

/// How rows are split into standardization groups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GroupDimension {
    /// One group per distinct value of a column (League, Pos_group, ...).
    Values { column: String },
    /// Fixed age ranges over an age column.
    AgeBuckets { column: String },
}

impl GroupDimension {
    pub fn values(column: &str) -> Self {
        GroupDimension::Values {
            column: column.to_string(),
        }
    }

    pub fn age(column: &str) -> Self {
        GroupDimension::AgeBuckets {
            column: column.to_string(),
        }
    }

    /// Prefix of the produced `<dimension>.<feature>` columns.
    pub fn name(&self) -> &str {
        match self {
            GroupDimension::Values { column } => column,
            GroupDimension::AgeBuckets { .. } => AGE_DIMENSION,
        }
    }

    fn keys(&self, table: &Table) -> Result<Vec<Option<String>>, SchemaError> {
        match self {
            GroupDimension::Values { column } => {
                let idx = table.require_column(column)?;
                Ok(table
                    .rows()
                    .iter()
                    .map(|r| (!r[idx].is_null()).then(|| r[idx].key_repr()))
                    .collect())
            }
            GroupDimension::AgeBuckets { column } => {
                let idx = table.require_column(column)?;
                Ok(table
                    .rows()
                    .iter()
                    .map(|r| parse_age(&r[idx]).and_then(age_bucket).map(str::to_string))
                    .collect())
            }
        }
    }
}

/// Z-scores `features` within each group of `dimension` (sample std, ddof 1).
///
/// The result has one `<dimension>.<feature>` column per available feature and
/// one row per input row. Rows without a group and null raw values produce
/// null; a group whose deviation is zero or undefined produces 0.
pub fn standardize_by_group(
    table: &Table,
    dimension: &GroupDimension,
    features: &[String],
) -> Result<Table, SchemaError> {
    let keys = dimension.keys(table)?;
    let mut groups: HashMap<&str, Vec<usize>> = HashMap::new();
    for (row, key) in keys.iter().enumerate() {
        if let Some(k) = key {
            groups.entry(k.as_str()).or_default().push(row);
        }
    }

    let mut out = Table::new(format!("{}_{}", table.name, dimension.name()), Vec::new());
    for _ in 0..table.len() {
        out.push_row(Vec::new());
    }
    for feature in features {
        let Some(values) = table.numeric_column(feature) else {
            continue;
        };
        let mut column = vec![Cell::Null; table.len()];
        for rows in groups.values() {
            let present: Vec<f64> = rows.iter().filter_map(|&r| values[r]).collect();
            let (mean, sd) = mean_std(&present, 1);
            for &r in rows {
                if let Some(v) = values[r] {
                    column[r] = Cell::Num(zscore(v, mean, sd));
                }
            }
        }
        out.set_column(&format!("{}.{}", dimension.name(), feature), column);
    }
    debug!(dimension = dimension.name(), groups = groups.len(), columns = out.columns().len(), "standardized");
    Ok(out)
}

/// Appends the columns of each part to `base`, skipping names already present.
/// Parts must be row-aligned with `base`. Returns the number of columns added.
pub fn combine_columnwise(base: &mut Table, parts: &[Table]) -> usize {
    let mut added = 0;
    for part in parts {
        if part.len() != base.len() {
            warn!(part = %part.name, rows = part.len(), expected = base.len(), "row count mismatch, part skipped");
            continue;
        }
        for (idx, column) in part.columns().iter().enumerate() {
            if base.has_column(column) {
                continue;
            }
            let values = part.rows().iter().map(|r| r[idx].clone()).collect();
            base.set_column(column, values);
            added += 1;
        }
    }
    added
}

/// Z-scores `columns` inside groups keyed by every column of `group_columns`,
/// with population std (ddof 0), writing `<prefix>.<column>`. Rows with a
/// missing group key stay null.
pub fn zscore_within_group(
    table: &mut Table,
    columns: &[String],
    group_columns: &[&str],
    prefix: &str,
) -> Result<Vec<String>, SchemaError> {
    let group_idx: Vec<usize> = group_columns
        .iter()
        .map(|c| table.require_column(c))
        .collect::<Result<_, _>>()?;
    let mut groups: HashMap<Vec<String>, Vec<usize>> = HashMap::new();
    for (r, row) in table.rows().iter().enumerate() {
        if group_idx.iter().any(|&i| row[i].is_null()) {
            continue;
        }
        let key = group_idx.iter().map(|&i| row[i].key_repr()).collect();
        groups.entry(key).or_default().push(r);
    }

    let mut written = Vec::new();
    for column in columns {
        let Some(values) = table.numeric_column(column) else {
            continue;
        };
        let mut out = vec![Cell::Null; table.len()];
        for rows in groups.values() {
            let present: Vec<f64> = rows.iter().filter_map(|&r| values[r]).collect();
            let (mean, sd) = mean_std(&present, 0);
            for &r in rows {
                if let Some(v) = values[r] {
                    out[r] = Cell::Num(zscore(v, mean, sd));
                }
            }
        }
        let name = format!("{prefix}.{column}");
        table.set_column(&name, out);
        written.push(name);
    }
    Ok(written)
}

/// Adds the `ctx.*` context columns. Inputs that are absent leave their
/// context column out; returns the columns written.
pub fn context_features(table: &mut Table, minutes_column: &str, exposure_column: &str) -> Vec<String> {
    let mut written = Vec::new();
    let n = table.len();

    let minutes = table.numeric_column(minutes_column);
    if let Some(minutes) = &minutes {
        let col = minutes
            .iter()
            .map(|m| Cell::from_opt(m.filter(|v| *v >= 0.0).map(f64::ln_1p)))
            .collect();
        table.set_column("ctx.log_minutes", col);
        written.push("ctx.log_minutes".to_string());
    }

    let full_games = table
        .numeric_column(exposure_column)
        .or_else(|| minutes.map(|m| m.iter().map(|v| v.map(|x| x / 90.0)).collect()));
    if let Some(full_games) = full_games {
        table.set_column("ctx.full_games", full_games.into_iter().map(Cell::from_opt).collect());
        written.push("ctx.full_games".to_string());
    }

    if let Some(ages) = table.cells("Age") {
        let ages: Vec<Option<f64>> = ages.into_iter().map(parse_age).collect();
        table.set_column("ctx.age", ages.iter().copied().map(Cell::from_opt).collect());
        table.set_column("ctx.age2", ages.iter().map(|a| Cell::from_opt(a.map(|v| v * v))).collect());
        written.push("ctx.age".to_string());
        written.push("ctx.age2".to_string());
    }

    if let Some(positions) = table.numeric_column("League_Position") {
        let col = positions
            .iter()
            .map(|p| Cell::from_opt(p.filter(|v| *v != 0.0).map(|v| 1.0 / v)))
            .collect();
        table.set_column("ctx.inv_league_pos", col);
        written.push("ctx.inv_league_pos".to_string());
    }

    for ratio in ["Points_%", "Goal_Diff_%"] {
        if let Some(values) = table.numeric_column(ratio) {
            let name = format!("ctx.{ratio}");
            table.set_column(&name, values.into_iter().map(Cell::from_opt).collect());
            written.push(name);
        }
    }

    debug!(rows = n, columns = written.len(), "context features");
    written
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_defaults_and_overrides() {
        let mut c = FeatureClassification::default();
        assert_eq!(c.classify("stats_keeper__Performance.Save%"), FeatureClass::Rate);
        assert_eq!(c.classify("Per_90_Minutes.Gls"), FeatureClass::Rate);
        assert_eq!(c.classify("stats_defense__Tackles.Tkl"), FeatureClass::Counting);
        assert_eq!(c.classify("Player"), FeatureClass::Excluded);
        c.overrides.insert("stats_defense__Tackles.Tkl".into(), FeatureClass::Rate);
        assert_eq!(c.classify("stats_defense__Tackles.Tkl"), FeatureClass::Rate);
    }

    #[test]
    fn age_buckets_are_half_open() {
        assert_eq!(age_bucket(18.9), Some("U19"));
        assert_eq!(age_bucket(19.0), Some("19-23"));
        assert_eq!(age_bucket(23.0), Some("23-30"));
        assert_eq!(age_bucket(30.0), Some("30+"));
    }

    #[test]
    fn parses_fbref_age() {
        assert_eq!(parse_age(&Cell::text("25-123")), Some(25.0));
        assert_eq!(parse_age(&Cell::Num(31.0)), Some(31.0));
        assert_eq!(parse_age(&Cell::Null), None);
    }

    #[test]
    fn mean_std_small_samples() {
        assert_eq!(mean_std(&[4.0], 1).1, None);
        assert_eq!(mean_std(&[4.0], 0).1, Some(0.0));
        let (m, sd) = mean_std(&[1.0, 3.0], 1);
        assert_eq!(m, 2.0);
        assert!((sd.unwrap() - 2f64.sqrt()).abs() < 1e-12);
    }
}
