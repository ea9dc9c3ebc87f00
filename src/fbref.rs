//! FBref page extraction.
//!
//! Most FBref tables ship inside HTML comments and are revealed by script,
//! so lookups search the live DOM first and then every commented fragment.

use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use crate::error::FetchError;
use crate::table::{Cell, Table};

pub const FBREF_BASE: &str = "https://fbref.com/en/comps";
pub const RANK_COLUMN: &str = "Rk";

fn sel(s: &str) -> Selector {
    Selector::parse(s).expect("static selector")
}

/// `https://fbref.com/en/comps/{id}/{page}/{slug}-Stats`; an empty page is the
/// competition overview holding the standings.
pub fn stats_url(competition_id: u32, page: &str, slug: &str) -> String {
    if page.is_empty() {
        format!("{FBREF_BASE}/{competition_id}/{slug}-Stats")
    } else {
        format!("{FBREF_BASE}/{competition_id}/{page}/{slug}-Stats")
    }
}

#[derive(Debug, Clone, Copy)]
pub enum TableMatch<'a> {
    Id(&'a str),
    IdSuffix(&'a str),
}

impl TableMatch<'_> {
    fn accepts(&self, id: &str) -> bool {
        match self {
            TableMatch::Id(want) => id == *want,
            TableMatch::IdSuffix(suffix) => id.ends_with(suffix),
        }
    }

    fn describe(&self) -> String {
        match self {
            TableMatch::Id(id) => format!("#{id}"),
            TableMatch::IdSuffix(suffix) => format!("*{suffix}"),
        }
    }
}

/// Extracts the first table accepted by `want`, looking in the DOM and then
/// inside HTML comments.
pub fn extract_table(html: &str, want: TableMatch<'_>, name: &str) -> Result<Table, FetchError> {
    let document = Html::parse_document(html);
    if let Some(table) = find_in(&document, want, name) {
        return Ok(table);
    }
    for fragment in commented_fragments(html) {
        let doc = Html::parse_fragment(fragment);
        if let Some(table) = find_in(&doc, want, name) {
            debug!(table = name, "table found inside html comment");
            return Ok(table);
        }
    }
    Err(FetchError::NoTable {
        locator: want.describe(),
    })
}

fn find_in(document: &Html, want: TableMatch<'_>, name: &str) -> Option<Table> {
    let tables = sel("table");
    document
        .select(&tables)
        .find(|t| t.value().id().is_some_and(|id| want.accepts(id)))
        .map(|t| parse_table(t, name))
}

fn commented_fragments(html: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut rest = html;
    while let Some(start) = rest.find("<!--") {
        let body = &rest[start + 4..];
        let Some(end) = body.find("-->") else {
            break;
        };
        let fragment = &body[..end];
        if fragment.contains("<table") {
            out.push(fragment);
        }
        rest = &body[end + 3..];
    }
    out
}

/// Flattens one header pair into `Group.Name`; empty and `Unnamed` levels are
/// dropped and `+`, `-` and spaces become `_`.
pub fn flatten_header(group: &str, name: &str) -> String {
    let clean = |s: &str| -> String {
        s.trim()
            .chars()
            .map(|c| if matches!(c, '+' | '-' | ' ') { '_' } else { c })
            .collect()
    };
    let keep = |s: &str| !s.trim().is_empty() && !s.trim().starts_with("Unnamed");
    match (keep(group), keep(name)) {
        (true, true) => format!("{}.{}", clean(group), clean(name)),
        (false, true) => clean(name),
        (true, false) => clean(group),
        (false, false) => String::new(),
    }
}

fn cell_text(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

fn colspan(el: ElementRef<'_>) -> usize {
    el.value()
        .attr("colspan")
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(1)
        .max(1)
}

fn parse_table(table: ElementRef<'_>, name: &str) -> Table {
    let header_rows_sel = sel("thead tr");
    let cells_sel = sel("th, td");
    let body_rows_sel = sel("tbody tr");

    let header_rows: Vec<ElementRef<'_>> = table.select(&header_rows_sel).collect();
    let leaf_row = header_rows.last();
    let leaves: Vec<String> = leaf_row
        .map(|r| r.select(&cells_sel).map(cell_text).collect())
        .unwrap_or_default();
    let groups: Vec<String> = if header_rows.len() >= 2 {
        header_rows[header_rows.len() - 2]
            .select(&cells_sel)
            .flat_map(|c| std::iter::repeat_n(cell_text(c), colspan(c)))
            .collect()
    } else {
        Vec::new()
    };

    let mut columns: Vec<String> = Vec::with_capacity(leaves.len());
    for (i, leaf) in leaves.iter().enumerate() {
        let group = groups.get(i).map(String::as_str).unwrap_or("");
        let mut col = flatten_header(group, leaf);
        if col.is_empty() {
            col = format!("col_{i}");
        }
        if columns.contains(&col) {
            let base = col.clone();
            let mut n = 2;
            while columns.contains(&col) {
                col = format!("{base}_{n}");
                n += 1;
            }
        }
        columns.push(col);
    }

    let first_leaf = leaves.first().cloned().unwrap_or_default();
    let mut out = Table::new(name, columns);
    for row in table.select(&body_rows_sel) {
        let class = row.value().attr("class").unwrap_or("");
        if class.contains("thead") || class.contains("over_header") || class.contains("spacer") {
            continue;
        }
        let cells: Vec<String> = row.select(&cells_sel).map(cell_text).collect();
        if cells.is_empty() || (!first_leaf.is_empty() && cells[0] == first_leaf) {
            continue;
        }
        out.push_row(cells.into_iter().map(Cell::Text).collect());
    }
    coerce_numeric(&mut out);
    out
}

/// `^[+-]?\d+(\.\d+)?$`
pub fn is_plain_number(s: &str) -> bool {
    let body = s.strip_prefix(['+', '-']).unwrap_or(s);
    let (int, frac) = match body.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (body, None),
    };
    let digits = |p: &str| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit());
    digits(int) && frac.is_none_or(digits)
}

/// Turns a column numeric when every non-empty cell is a plain number once
/// thousands separators are removed. Empty text becomes null everywhere.
pub fn coerce_numeric(table: &mut Table) {
    let columns = table.columns().to_vec();
    for column in columns {
        let Some(cells) = table.cells(&column) else {
            continue;
        };
        let texts: Vec<Option<String>> = cells
            .iter()
            .map(|c| match c {
                Cell::Text(s) if s.trim().is_empty() => None,
                Cell::Text(s) => Some(s.trim().replace(',', "")),
                Cell::Num(v) if !v.is_nan() => Some(v.to_string()),
                _ => None,
            })
            .collect();
        let numeric = texts.iter().flatten().all(|s| is_plain_number(s));
        let values = texts
            .into_iter()
            .zip(cells)
            .map(|(text, original)| match text {
                None => Cell::Null,
                Some(t) if numeric => t.parse::<f64>().map(Cell::Num).unwrap_or(Cell::Null),
                Some(_) => original.clone(),
            })
            .collect();
        table.set_column(&column, values);
    }
}

/// Drops the rank column and empty player rows from a player table.
pub fn clean_player_table(table: &mut Table) {
    table.drop_columns(&[RANK_COLUMN]);
    if let Some(idx) = table.column_index("Player") {
        table.retain_rows(|row| !row[idx].is_null());
    }
}
