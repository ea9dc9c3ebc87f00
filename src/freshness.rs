use std::collections::HashMap;

use chrono::{Duration, Local, NaiveDate};
use tracing::{debug, info};

use crate::table::{Cell, Table};

pub const DATE_COLUMN: &str = "Date";
pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const DEFAULT_OFFSET_DAYS: i64 = 30;

pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Parses `YYYY-MM-DD`, ignoring any trailing time part.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    let head = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(head, DATE_FORMAT).ok()
}

/// Latest snapshot date recorded in a table's Date column.
pub fn snapshot_date(table: &Table) -> Option<NaiveDate> {
    table
        .cells(DATE_COLUMN)?
        .into_iter()
        .filter_map(|c| match c {
            Cell::Text(s) => parse_date(s),
            _ => None,
        })
        .max()
}

/// Stamps every row with the snapshot date.
pub fn stamp_date(table: &mut Table, date: NaiveDate) {
    let text = format_date(date);
    table.set_column(DATE_COLUMN, vec![Cell::Text(text); table.len()]);
}

/// Sheets of `expected` that need re-scraping, in `expected` order: those
/// without a recorded date and those recorded before `today - offset_days`.
pub fn stale_sheets(
    expected: &[String],
    recorded: &HashMap<String, NaiveDate>,
    offset_days: i64,
    today: NaiveDate,
) -> Vec<String> {
    // An offset beyond chrono's range reaches back past any recorded date.
    let cutoff = Duration::try_days(offset_days.max(0)).and_then(|offset| today.checked_sub_signed(offset));
    expected
        .iter()
        .filter(|sheet| match (recorded.get(sheet.as_str()), cutoff) {
            (None, _) => true,
            (Some(date), Some(cutoff)) => *date < cutoff,
            (Some(_), None) => false,
        })
        .cloned()
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FreshnessPlan {
    pub stale: Vec<String>,
    pub fresh: Vec<String>,
}

impl FreshnessPlan {
    pub fn is_stale(&self, sheet: &str) -> bool {
        self.stale.iter().any(|s| s == sheet)
    }

    pub fn is_noop(&self) -> bool {
        self.stale.is_empty()
    }
}

/// Decides per run which sheets get re-pulled.
#[derive(Debug, Clone)]
pub struct FreshnessScheduler {
    offset_days: i64,
    force: bool,
    today: NaiveDate,
}

impl FreshnessScheduler {
    pub fn new(offset_days: i64, force: bool) -> Self {
        Self::at(offset_days, force, today())
    }

    pub fn at(offset_days: i64, force: bool, today: NaiveDate) -> Self {
        Self {
            offset_days,
            force,
            today,
        }
    }

    pub fn today(&self) -> NaiveDate {
        self.today
    }

    pub fn plan(&self, expected: &[String], recorded: &HashMap<String, NaiveDate>) -> FreshnessPlan {
        let stale = if self.force {
            expected.to_vec()
        } else {
            stale_sheets(expected, recorded, self.offset_days, self.today)
        };
        let fresh: Vec<String> = expected.iter().filter(|s| !stale.contains(s)).cloned().collect();
        for sheet in &fresh {
            debug!(sheet = %sheet, "sheet is fresh");
        }
        info!(stale = stale.len(), fresh = fresh.len(), force = self.force, "freshness plan");
        FreshnessPlan { stale, fresh }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        parse_date(s).unwrap()
    }

    #[test]
    fn stale_rules() {
        let expected = vec!["A".to_string(), "B".to_string(), "C".to_string()];
        let recorded = HashMap::from([("A".to_string(), d("2025-01-01")), ("B".to_string(), d("2025-02-01"))]);
        let stale = stale_sheets(&expected, &recorded, 30, d("2025-02-15"));
        assert_eq!(stale, vec!["A".to_string(), "C".to_string()]);
    }

    #[test]
    fn boundary_date_is_fresh() {
        let expected = vec!["A".to_string()];
        let recorded = HashMap::from([("A".to_string(), d("2025-01-16"))]);
        assert!(stale_sheets(&expected, &recorded, 30, d("2025-02-15")).is_empty());
    }

    #[test]
    fn huge_offset_keeps_recorded_sheets_fresh() {
        let expected = vec!["A".to_string(), "B".to_string()];
        let recorded = HashMap::from([("A".to_string(), d("1990-01-01"))]);
        for offset in [i64::MAX / 2, i64::MAX] {
            assert_eq!(stale_sheets(&expected, &recorded, offset, d("2025-02-15")), vec!["B".to_string()]);
        }
    }

    #[test]
    fn parse_date_ignores_time() {
        assert_eq!(parse_date("2025-03-04 10:11:12"), Some(d("2025-03-04")));
        assert_eq!(parse_date("garbage"), None);
    }
}
