use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::SchemaError;

/// One value of a scraped table. `Num(NaN)` is treated the same as `Null`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    #[default]
    Null,
    Num(f64),
    Text(String),
}

static NULL_CELL: Cell = Cell::Null;

impl Cell {
    pub fn text(value: impl Into<String>) -> Self {
        Cell::Text(value.into())
    }

    pub fn from_opt(value: Option<f64>) -> Self {
        match value {
            Some(v) => Cell::Num(v),
            None => Cell::Null,
        }
    }

    pub fn is_null(&self) -> bool {
        match self {
            Cell::Null => true,
            Cell::Num(v) => v.is_nan(),
            Cell::Text(_) => false,
        }
    }

    /// Numeric view; text is parsed leniently, NaN and unparsable text are `None`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Null => None,
            Cell::Num(v) if v.is_nan() => None,
            Cell::Num(v) => Some(*v),
            Cell::Text(s) => {
                let cleaned = s.trim().replace(',', "");
                cleaned.parse::<f64>().ok().filter(|v| !v.is_nan())
            }
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Cell::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Stable representation used for join keys and distinct-value lookups.
    /// Numbers and numeric-looking text compare equal (`25` == `"25"`).
    pub fn key_repr(&self) -> String {
        match self {
            Cell::Null => "\u{1}null".to_string(),
            Cell::Num(v) if v.is_nan() => "\u{1}null".to_string(),
            Cell::Num(v) => format_number(*v),
            Cell::Text(s) => {
                let trimmed = s.trim();
                match trimmed.parse::<f64>() {
                    Ok(v) if !v.is_nan() && looks_numeric(trimmed) => format_number(v),
                    _ => trimmed.to_string(),
                }
            }
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Null => Ok(()),
            Cell::Num(v) if v.is_nan() => Ok(()),
            Cell::Num(v) => write!(f, "{}", format_number(*v)),
            Cell::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<f64> for Cell {
    fn from(value: f64) -> Self {
        Cell::Num(value)
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Cell::Text(value.to_string())
    }
}

impl From<String> for Cell {
    fn from(value: String) -> Self {
        Cell::Text(value)
    }
}

fn looks_numeric(s: &str) -> bool {
    let body = s.strip_prefix(['+', '-']).unwrap_or(s);
    !body.is_empty() && body.chars().all(|c| c.is_ascii_digit() || c == '.')
}

fn format_number(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{v}")
    }
}

/// A named, row-major table with an ordered column list.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

impl Table {
    pub fn new(name: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            columns,
            rows: Vec::new(),
        }
    }

    pub fn with_columns(name: impl Into<String>, columns: &[&str]) -> Self {
        Self::new(name, columns.iter().map(|c| c.to_string()).collect())
    }

    /// Builds a table, padding or truncating rows to the column count.
    pub fn from_rows(name: impl Into<String>, columns: Vec<String>, rows: Vec<Vec<Cell>>) -> Self {
        let mut table = Self::new(name, columns);
        for row in rows {
            table.push_row(row);
        }
        table
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    pub fn require_column(&self, name: &str) -> Result<usize, SchemaError> {
        self.column_index(name).ok_or_else(|| SchemaError::MissingColumn {
            table: self.name.clone(),
            column: name.to_string(),
        })
    }

    pub fn push_row(&mut self, mut row: Vec<Cell>) {
        row.resize(self.columns.len(), Cell::Null);
        self.rows.push(row);
    }

    pub fn cell(&self, row: usize, column: &str) -> &Cell {
        match (self.rows.get(row), self.column_index(column)) {
            (Some(r), Some(idx)) => &r[idx],
            _ => &NULL_CELL,
        }
    }

    pub fn cells(&self, column: &str) -> Option<Vec<&Cell>> {
        let idx = self.column_index(column)?;
        Some(self.rows.iter().map(|r| &r[idx]).collect())
    }

    pub fn numeric_column(&self, column: &str) -> Option<Vec<Option<f64>>> {
        let idx = self.column_index(column)?;
        Some(self.rows.iter().map(|r| r[idx].as_f64()).collect())
    }

    /// Replaces an existing column in place or appends a new one.
    pub fn set_column(&mut self, name: &str, mut values: Vec<Cell>) {
        values.resize(self.rows.len(), Cell::Null);
        match self.column_index(name) {
            Some(idx) => {
                for (row, value) in self.rows.iter_mut().zip(values) {
                    row[idx] = value;
                }
            }
            None => {
                self.columns.push(name.to_string());
                for (row, value) in self.rows.iter_mut().zip(values) {
                    row.push(value);
                }
            }
        }
    }

    pub fn drop_columns(&mut self, names: &[&str]) {
        let drop: HashSet<usize> = names.iter().filter_map(|n| self.column_index(n)).collect();
        if drop.is_empty() {
            return;
        }
        self.columns = keep_indices(std::mem::take(&mut self.columns), &drop);
        for row in &mut self.rows {
            *row = keep_indices(std::mem::take(row), &drop);
        }
    }

    pub fn rename_column(&mut self, from: &str, to: &str) {
        if let Some(idx) = self.column_index(from) {
            self.columns[idx] = to.to_string();
        }
    }

    pub fn retain_rows(&mut self, mut keep: impl FnMut(&[Cell]) -> bool) -> usize {
        let before = self.rows.len();
        self.rows.retain(|row| keep(row));
        before - self.rows.len()
    }

    pub fn select_rows(&self, indices: &[usize]) -> Table {
        Table {
            name: self.name.clone(),
            columns: self.columns.clone(),
            rows: indices
                .iter()
                .filter_map(|&i| self.rows.get(i).cloned())
                .collect(),
        }
    }

    pub fn select_columns(&self, names: &[String]) -> Table {
        let picks: Vec<Option<usize>> = names.iter().map(|n| self.column_index(n)).collect();
        Table {
            name: self.name.clone(),
            columns: names.to_vec(),
            rows: self
                .rows
                .iter()
                .map(|row| {
                    picks
                        .iter()
                        .map(|p| p.map(|i| row[i].clone()).unwrap_or_default())
                        .collect()
                })
                .collect(),
        }
    }

    /// Distinct non-null key values of a column, in first-seen order.
    pub fn distinct_values(&self, column: &str) -> Vec<String> {
        let Some(idx) = self.column_index(column) else {
            return Vec::new();
        };
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for row in &self.rows {
            let cell = &row[idx];
            if cell.is_null() {
                continue;
            }
            let key = cell.key_repr();
            if seen.insert(key.clone()) {
                out.push(key);
            }
        }
        out
    }

    /// Row indices grouped by the key of one column (nulls excluded).
    pub fn group_indices(&self, column: &str) -> Vec<(String, Vec<usize>)> {
        let Some(idx) = self.column_index(column) else {
            return Vec::new();
        };
        let mut order: Vec<String> = Vec::new();
        let mut groups: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, row) in self.rows.iter().enumerate() {
            if row[idx].is_null() {
                continue;
            }
            let key = row[idx].key_repr();
            groups
                .entry(key.clone())
                .or_insert_with(|| {
                    order.push(key);
                    Vec::new()
                })
                .push(i);
        }
        order
            .into_iter()
            .map(|k| {
                let rows = groups.remove(&k).unwrap_or_default();
                (k, rows)
            })
            .collect()
    }

    /// Row-concatenates tables, taking the union of columns in first-seen order.
    pub fn concat(name: impl Into<String>, tables: &[Table]) -> Table {
        let mut columns: Vec<String> = Vec::new();
        let mut seen = HashSet::new();
        for table in tables {
            for c in &table.columns {
                if seen.insert(c.clone()) {
                    columns.push(c.clone());
                }
            }
        }
        let mut out = Table::new(name, columns);
        for table in tables {
            let map: Vec<Option<usize>> = out.columns.iter().map(|c| table.column_index(c)).collect();
            for row in &table.rows {
                out.rows.push(
                    map.iter()
                        .map(|m| m.map(|i| row[i].clone()).unwrap_or_default())
                        .collect(),
                );
            }
        }
        out
    }
}

fn keep_indices<T>(items: Vec<T>, drop: &HashSet<usize>) -> Vec<T> {
    items
        .into_iter()
        .enumerate()
        .filter(|(i, _)| !drop.contains(i))
        .map(|(_, v)| v)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_repr_unifies_numbers_and_numeric_text() {
        assert_eq!(Cell::Num(25.0).key_repr(), "25");
        assert_eq!(Cell::text("25").key_repr(), "25");
        assert_eq!(Cell::text(" Arsenal ").key_repr(), "Arsenal");
        assert_eq!(Cell::Num(f64::NAN).key_repr(), Cell::Null.key_repr());
    }

    #[test]
    fn concat_aligns_columns() {
        let mut a = Table::with_columns("a", &["Player", "Goals"]);
        a.push_row(vec!["X".into(), 3.0.into()]);
        let mut b = Table::with_columns("b", &["Assists", "Player"]);
        b.push_row(vec![1.0.into(), "Y".into()]);
        let all = Table::concat("all", &[a, b]);
        assert_eq!(all.columns(), &["Player", "Goals", "Assists"]);
        assert_eq!(all.cell(1, "Player"), &Cell::text("Y"));
        assert!(all.cell(1, "Goals").is_null());
    }

    #[test]
    fn drop_and_set_columns() {
        let mut t = Table::with_columns("t", &["A", "B", "C"]);
        t.push_row(vec![1.0.into(), 2.0.into(), 3.0.into()]);
        t.drop_columns(&["B", "missing"]);
        assert_eq!(t.columns(), &["A", "C"]);
        t.set_column("A", vec![Cell::Num(9.0)]);
        t.set_column("D", vec![]);
        assert_eq!(t.cell(0, "A").as_f64(), Some(9.0));
        assert!(t.cell(0, "D").is_null());
    }
}
