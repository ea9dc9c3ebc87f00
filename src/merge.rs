use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::SchemaError;
use crate::table::{Cell, Table};

pub const DEFAULT_MERGE_KEYS: [&str; 7] = ["Player", "Nation", "Pos", "Age", "Born", "Squad", "League"];
pub const SINGLE_OCCURRENCE_COLUMNS: [&str; 4] = ["League", "Squad", "Table", "Matches"];
pub const VOLUME_MARKER: &str = "90s";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergePolicy {
    pub key_candidates: Vec<String>,
    pub single_occurrence: Vec<String>,
}

impl Default for MergePolicy {
    fn default() -> Self {
        Self {
            key_candidates: DEFAULT_MERGE_KEYS.iter().map(|s| s.to_string()).collect(),
            single_occurrence: SINGLE_OCCURRENCE_COLUMNS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl MergePolicy {
    pub fn with_keys(keys: &[&str]) -> Self {
        Self {
            key_candidates: keys.iter().map(|s| s.to_string()).collect(),
            ..Self::default()
        }
    }

    /// Candidate keys present in both tables, in candidate order.
    pub fn effective_keys(&self, left: &Table, right: &Table) -> Vec<String> {
        self.key_candidates
            .iter()
            .filter(|k| left.has_column(k) && right.has_column(k))
            .cloned()
            .collect()
    }
}

/// Folds same-entity tables into one wide table with full outer joins.
///
/// The first table seeds the result unchanged. Every later table has its
/// non-key columns prefixed with `<table name>__`; single-occurrence metadata
/// columns already present on the left are dropped from it first. Tables that
/// share no key with the accumulator are skipped with a warning.
pub fn merge_tables(tables: &[Table], policy: &MergePolicy) -> Table {
    let mut iter = tables.iter();
    let Some(first) = iter.next() else {
        return Table::default();
    };
    let mut acc = first.clone();
    for table in iter {
        match merge_pair(&acc, table, policy) {
            Ok(merged) => {
                debug!(table = %table.name, rows = merged.len(), columns = merged.columns().len(), "merged table");
                acc = merged;
            }
            Err(err) => warn!(table = %table.name, "skipping table: {err}"),
        }
    }
    info!(rows = acc.len(), columns = acc.columns().len(), tables = tables.len(), "merge complete");
    acc
}

pub fn merge_pair(left: &Table, right: &Table, policy: &MergePolicy) -> Result<Table, SchemaError> {
    let keys = policy.effective_keys(left, right);
    if keys.is_empty() {
        return Err(SchemaError::NoSharedKeys {
            table: right.name.clone(),
        });
    }
    let key_set: HashSet<&str> = keys.iter().map(String::as_str).collect();

    let left_columns: HashSet<&str> = left.columns().iter().map(String::as_str).collect();
    let mut right_features: Vec<(usize, String)> = Vec::new();
    for (idx, col) in right.columns().iter().enumerate() {
        if key_set.contains(col.as_str()) {
            continue;
        }
        if policy.single_occurrence.iter().any(|s| s == col) && left_columns.contains(col.as_str()) {
            continue;
        }
        let prefixed = format!("{}__{}", right.name, col);
        if left_columns.contains(prefixed.as_str()) {
            warn!(column = %prefixed, "column already present, dropping duplicate");
            continue;
        }
        right_features.push((idx, prefixed));
    }

    let left_keys: Vec<usize> = keys.iter().filter_map(|k| left.column_index(k)).collect();
    let right_keys: Vec<usize> = keys.iter().filter_map(|k| right.column_index(k)).collect();

    let mut right_index: HashMap<Vec<String>, Vec<usize>> = HashMap::new();
    for (i, row) in right.rows().iter().enumerate() {
        right_index.entry(row_key(row, &right_keys)).or_default().push(i);
    }

    let mut columns: Vec<String> = left.columns().to_vec();
    columns.extend(right_features.iter().map(|(_, name)| name.clone()));
    let mut out = Table::new(left.name.clone(), columns);

    let mut matched = vec![false; right.len()];
    for row in left.rows() {
        let key = row_key(row, &left_keys);
        match right_index.get(&key) {
            Some(hits) => {
                for &r in hits {
                    matched[r] = true;
                    let mut merged = row.clone();
                    merged.extend(right_features.iter().map(|(idx, _)| right.rows()[r][*idx].clone()));
                    out.push_row(merged);
                }
            }
            None => {
                let mut merged = row.clone();
                merged.extend(std::iter::repeat_n(Cell::Null, right_features.len()));
                out.push_row(merged);
            }
        }
    }

    // Right-only rows keep their key values; left-only columns stay null.
    let key_positions: HashMap<usize, usize> = left_keys.iter().copied().zip(right_keys.iter().copied()).collect();
    for (r, row) in right.rows().iter().enumerate() {
        if matched[r] {
            continue;
        }
        let mut merged: Vec<Cell> = (0..left.columns().len())
            .map(|l| key_positions.get(&l).map(|&ri| row[ri].clone()).unwrap_or_default())
            .collect();
        merged.extend(right_features.iter().map(|(idx, _)| row[*idx].clone()));
        out.push_row(merged);
    }

    Ok(out)
}

fn row_key(row: &[Cell], key_idx: &[usize]) -> Vec<String> {
    key_idx.iter().map(|&i| row[i].key_repr()).collect()
}

/// Minimum-playing-time filter applied to a table before it is merged.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum PlayingTimePolicy {
    Off,
    /// Keep rows whose volume exceeds `fraction` of the per-table maximum.
    FractionOfMax { fraction: f64 },
    /// Keep rows whose volume exceeds the `quantile` of the volume distribution.
    Percentile { quantile: f64 },
}

impl Default for PlayingTimePolicy {
    fn default() -> Self {
        PlayingTimePolicy::FractionOfMax { fraction: 0.2 }
    }
}

impl PlayingTimePolicy {
    /// Parses `off`, `max:0.2` or `percentile:0.3`.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim().to_ascii_lowercase();
        if matches!(raw.as_str(), "off" | "none" | "0") {
            return Some(PlayingTimePolicy::Off);
        }
        let (kind, value) = raw.split_once(':')?;
        let value = value.trim().parse::<f64>().ok().filter(|v| (0.0..=1.0).contains(v))?;
        match kind.trim() {
            "max" | "fraction" => Some(PlayingTimePolicy::FractionOfMax { fraction: value }),
            "percentile" | "quantile" => Some(PlayingTimePolicy::Percentile { quantile: value }),
            _ => None,
        }
    }

    /// Removes low-volume rows; returns how many were removed. Tables without
    /// a volume column, or without any numeric volume, are left untouched.
    pub fn apply(&self, table: &mut Table) -> usize {
        let Some(column) = volume_column(table) else {
            return 0;
        };
        let Some(values) = table.numeric_column(&column) else {
            return 0;
        };
        let mut finite: Vec<f64> = values.iter().flatten().copied().filter(|v| v.is_finite()).collect();
        if finite.is_empty() {
            return 0;
        }
        let threshold = match *self {
            PlayingTimePolicy::Off => return 0,
            PlayingTimePolicy::FractionOfMax { fraction } => {
                finite.iter().copied().fold(f64::NEG_INFINITY, f64::max) * fraction
            }
            PlayingTimePolicy::Percentile { quantile } => {
                finite.sort_by(f64::total_cmp);
                quantile_linear(&finite, quantile)
            }
        };
        let Some(idx) = table.column_index(&column) else {
            return 0;
        };
        let removed = table.retain_rows(|row| row[idx].as_f64().is_some_and(|v| v > threshold));
        debug!(table = %table.name, column = %column, threshold, removed, "playing-time filter");
        removed
    }
}

pub fn volume_column(table: &Table) -> Option<String> {
    table.columns().iter().find(|c| c.contains(VOLUME_MARKER)).cloned()
}

/// Quantile of sorted values with linear interpolation between neighbours.
pub fn quantile_linear(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}
