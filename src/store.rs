use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use rust_xlsxwriter::{Workbook, Worksheet};
use tracing::{debug, info};

use crate::error::StoreError;
use crate::freshness::{format_date, parse_date, snapshot_date};
use crate::table::{Cell, Table};

/// Named-sheet persistence, one dataset per logical concern.
///
/// Storing a sheet overwrites it wholesale (last writer wins) and creates the
/// dataset when needed. Loading an absent sheet is `StoreError::NotFound`.
pub trait TableStore {
    fn load_table(&self, dataset: &str, sheet: &str) -> Result<Table, StoreError>;
    fn store_table(&mut self, table: &Table, dataset: &str, sheet: &str) -> Result<(), StoreError>;
    /// Sheet keys in creation order; empty for an absent dataset.
    fn sheet_keys(&self, dataset: &str) -> Result<Vec<String>, StoreError>;
    /// Snapshot date per sheet, for sheets that carry one.
    fn recorded_dates(&self, dataset: &str) -> Result<HashMap<String, NaiveDate>, StoreError>;
}

/// One sqlite file per dataset under a data directory.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    data_dir: PathBuf,
}

impl SqliteStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn dataset_path(&self, dataset: &str) -> PathBuf {
        self.data_dir.join(format!("{dataset}.sqlite"))
    }

    fn open_existing(&self, dataset: &str) -> Result<Option<Connection>, StoreError> {
        let path = self.dataset_path(dataset);
        if !path.exists() {
            return Ok(None);
        }
        open_db(&path).map(Some)
    }
}

pub fn open_db(path: &Path) -> Result<Connection, StoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(path)?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        CREATE TABLE IF NOT EXISTS sheets (
            sheet_key TEXT PRIMARY KEY,
            columns_json TEXT NOT NULL,
            rows_json TEXT NOT NULL,
            snapshot_date TEXT,
            updated_at TEXT NOT NULL
        );
        "#,
    )?;
    Ok(())
}

impl TableStore for SqliteStore {
    fn load_table(&self, dataset: &str, sheet: &str) -> Result<Table, StoreError> {
        let not_found = || StoreError::NotFound {
            dataset: dataset.to_string(),
            sheet: sheet.to_string(),
        };
        let conn = self.open_existing(dataset)?.ok_or_else(not_found)?;
        let stored: Option<(String, String)> = conn
            .query_row(
                "SELECT columns_json, rows_json FROM sheets WHERE sheet_key = ?1",
                params![sheet],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let (columns_json, rows_json) = stored.ok_or_else(not_found)?;
        let encoding = |source: serde_json::Error| StoreError::Encoding {
            sheet: sheet.to_string(),
            source,
        };
        let columns: Vec<String> = serde_json::from_str(&columns_json).map_err(encoding)?;
        let rows: Vec<Vec<Cell>> = serde_json::from_str(&rows_json).map_err(encoding)?;
        debug!(dataset, sheet, rows = rows.len(), "sheet loaded");
        Ok(Table::from_rows(sheet, columns, rows))
    }

    fn store_table(&mut self, table: &Table, dataset: &str, sheet: &str) -> Result<(), StoreError> {
        let conn = open_db(&self.dataset_path(dataset))?;
        let encoding = |source: serde_json::Error| StoreError::Encoding {
            sheet: sheet.to_string(),
            source,
        };
        let columns_json = serde_json::to_string(table.columns()).map_err(encoding)?;
        let rows_json = serde_json::to_string(table.rows()).map_err(encoding)?;
        let snapshot = snapshot_date(table).map(format_date);
        conn.execute(
            r#"
            INSERT INTO sheets (sheet_key, columns_json, rows_json, snapshot_date, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(sheet_key) DO UPDATE SET
                columns_json = excluded.columns_json,
                rows_json = excluded.rows_json,
                snapshot_date = excluded.snapshot_date,
                updated_at = excluded.updated_at
            "#,
            params![sheet, columns_json, rows_json, snapshot, Utc::now().to_rfc3339()],
        )?;
        info!(dataset, sheet, rows = table.len(), columns = table.columns().len(), "sheet stored");
        Ok(())
    }

    fn sheet_keys(&self, dataset: &str) -> Result<Vec<String>, StoreError> {
        let Some(conn) = self.open_existing(dataset)? else {
            return Ok(Vec::new());
        };
        let mut stmt = conn.prepare("SELECT sheet_key FROM sheets ORDER BY rowid")?;
        let keys = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(keys)
    }

    fn recorded_dates(&self, dataset: &str) -> Result<HashMap<String, NaiveDate>, StoreError> {
        let Some(conn) = self.open_existing(dataset)? else {
            return Ok(HashMap::new());
        };
        let mut stmt = conn.prepare("SELECT sheet_key, snapshot_date FROM sheets WHERE snapshot_date IS NOT NULL")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows
            .into_iter()
            .filter_map(|(sheet, date)| parse_date(&date).map(|d| (sheet, d)))
            .collect())
    }
}

/// In-process store for dry runs and tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    datasets: BTreeMap<String, Vec<(String, Table)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TableStore for MemoryStore {
    fn load_table(&self, dataset: &str, sheet: &str) -> Result<Table, StoreError> {
        self.datasets
            .get(dataset)
            .and_then(|sheets| sheets.iter().find(|(k, _)| k == sheet))
            .map(|(_, t)| t.clone())
            .ok_or_else(|| StoreError::NotFound {
                dataset: dataset.to_string(),
                sheet: sheet.to_string(),
            })
    }

    fn store_table(&mut self, table: &Table, dataset: &str, sheet: &str) -> Result<(), StoreError> {
        let sheets = self.datasets.entry(dataset.to_string()).or_default();
        let mut stored = table.clone();
        stored.name = sheet.to_string();
        match sheets.iter_mut().find(|(k, _)| k == sheet) {
            Some((_, existing)) => *existing = stored,
            None => sheets.push((sheet.to_string(), stored)),
        }
        Ok(())
    }

    fn sheet_keys(&self, dataset: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .datasets
            .get(dataset)
            .map(|sheets| sheets.iter().map(|(k, _)| k.clone()).collect())
            .unwrap_or_default())
    }

    fn recorded_dates(&self, dataset: &str) -> Result<HashMap<String, NaiveDate>, StoreError> {
        Ok(self
            .datasets
            .get(dataset)
            .map(|sheets| {
                sheets
                    .iter()
                    .filter_map(|(k, t)| snapshot_date(t).map(|d| (k.clone(), d)))
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// Worksheet name valid for Excel: no `[]:*?/\`, at most 31 characters.
pub fn worksheet_name(sheet: &str) -> String {
    let cleaned: String = sheet
        .chars()
        .map(|c| if matches!(c, '[' | ']' | ':' | '*' | '?' | '/' | '\\') { '_' } else { c })
        .take(31)
        .collect();
    if cleaned.trim().is_empty() {
        "Sheet".to_string()
    } else {
        cleaned
    }
}

/// Writes every sheet of a dataset into an `.xlsx` workbook, one worksheet
/// per sheet key. Returns the number of worksheets written.
pub fn export_workbook<S: TableStore + ?Sized>(store: &S, dataset: &str, path: &Path) -> Result<usize> {
    let keys = store
        .sheet_keys(dataset)
        .with_context(|| format!("list sheets of {dataset}"))?;
    let mut workbook = Workbook::new();
    let mut used: Vec<String> = Vec::new();
    for key in &keys {
        let table = store
            .load_table(dataset, key)
            .with_context(|| format!("load {dataset}/{key}"))?;
        let mut name = worksheet_name(key);
        let mut n = 1;
        while used.iter().any(|u| u.eq_ignore_ascii_case(&name)) {
            n += 1;
            let suffix = format!("~{n}");
            let base: String = worksheet_name(key).chars().take(31 - suffix.len()).collect();
            name = format!("{base}{suffix}");
        }
        let sheet = workbook.add_worksheet();
        sheet.set_name(&name)?;
        write_table(sheet, &table)?;
        used.push(name);
    }
    workbook
        .save(path)
        .with_context(|| format!("failed writing workbook to {}", path.display()))?;
    info!(dataset, sheets = keys.len(), path = %path.display(), "workbook exported");
    Ok(keys.len())
}

fn write_table(worksheet: &mut Worksheet, table: &Table) -> Result<()> {
    for (col_idx, name) in table.columns().iter().enumerate() {
        worksheet
            .write_string(0, col_idx as u16, name)
            .with_context(|| format!("write header {name}"))?;
    }
    for (row_idx, row) in table.rows().iter().enumerate() {
        let r = row_idx as u32 + 1;
        for (col_idx, cell) in row.iter().enumerate() {
            let c = col_idx as u16;
            match cell {
                Cell::Num(v) if v.is_finite() => {
                    worksheet.write_number(r, c, *v)?;
                }
                Cell::Text(s) => {
                    worksheet.write_string(r, c, s)?;
                }
                _ => {}
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worksheet_names_are_sanitized() {
        assert_eq!(worksheet_name("a/b:c"), "a_b_c");
        assert_eq!(worksheet_name(&"x".repeat(40)).len(), 31);
        assert_eq!(worksheet_name(""), "Sheet");
    }

    #[test]
    fn memory_store_overwrites_sheet() {
        let mut store = MemoryStore::new();
        let mut t = Table::with_columns("x", &["Player"]);
        t.push_row(vec!["A".into()]);
        store.store_table(&t, "ds", "s1").unwrap();
        t.push_row(vec!["B".into()]);
        store.store_table(&t, "ds", "s1").unwrap();
        assert_eq!(store.load_table("ds", "s1").unwrap().len(), 2);
        assert_eq!(store.sheet_keys("ds").unwrap(), vec!["s1".to_string()]);
        assert!(store.load_table("ds", "nope").unwrap_err().is_not_found());
    }
}
